// cli/src/norkvctl/cases.rs — the golden verification cases. `check
// <image> <n>` builds case n's flash image into the file, mounts it, and
// asserts the expected outcome; exit code 0 means every assertion held.

use std::path::Path;

use serde_json::json;

use norkv::config::*;
use norkv::layout;
use norkv::{Chunk, ChunkAddr, Flash, SimFlash, Store};

use super::{image, CtlError};

pub const CASE_COUNT: usize = 7;

pub fn run(path: &Path, case: usize, json_out: bool) -> Result<(), CtlError> {
    if case >= CASE_COUNT {
        return Err(CtlError::Arg(format!(
            "case {} out of range (0..{})",
            case, CASE_COUNT
        )));
    }
    let flash = build(case);
    image::save(&flash, path)?;
    verify(case, flash)?;
    if json_out {
        println!("{}", json!({ "case": case, "result": "pass" }));
    } else {
        println!("case {}: pass", case);
    }
    Ok(())
}

fn ensure(case: usize, cond: bool, detail: &str) -> Result<(), CtlError> {
    if cond {
        Ok(())
    } else {
        Err(CtlError::CaseFailed {
            case,
            detail: detail.into(),
        })
    }
}

// ---- golden-image construction ----

fn put(flash: &mut SimFlash, phys: usize, offset: usize, value: Chunk) {
    flash
        .write_chunk(value, ChunkAddr::new(phys, offset))
        .expect("golden image program");
}

fn make_valid(flash: &mut SimFlash, phys: usize, virt: Chunk) {
    layout::set_status(flash, phys, STATUS_RECEIVING).unwrap();
    layout::set_virt(flash, phys, virt).unwrap();
    layout::set_status(flash, phys, STATUS_VALID).unwrap();
}

fn raw_record(flash: &mut SimFlash, phys: usize, offset: usize, id: Chunk, payload: &[u8]) {
    let mut off = offset;
    let mut xor = id ^ payload.len() as Chunk;
    put(flash, phys, off, id);
    put(flash, phys, off + 1, payload.len() as Chunk);
    off += 2;
    for i in 0..layout::chunks_for(payload.len()) {
        let c = layout::pack_chunk(payload, i);
        put(flash, phys, off, c);
        xor ^= c;
        off += 1;
    }
    put(flash, phys, off, xor);
}

fn chain_record(flash: &mut SimFlash, pages: &[(usize, Chunk)], id: Chunk, payload: &[u8]) {
    for &(phys, virt) in pages {
        make_valid(flash, phys, virt);
    }
    let mut page = 0usize;
    let mut off = HEADER_CHUNKS;
    let mut xor = id ^ payload.len() as Chunk;
    put(flash, pages[0].0, off, id);
    put(flash, pages[0].0, off + 1, payload.len() as Chunk);
    off += 2;
    let mut emit = |page: &mut usize, off: &mut usize, flash: &mut SimFlash, value: Chunk| {
        if *off == PAGE_CHUNKS {
            *page += 1;
            *off = HEADER_CHUNKS;
            put(flash, pages[*page].0, *off, id);
            *off += 1;
        }
        put(flash, pages[*page].0, *off, value);
        *off += 1;
    };
    for i in 0..layout::chunks_for(payload.len()) {
        let c = layout::pack_chunk(payload, i);
        emit(&mut page, &mut off, flash, c);
        xor ^= c;
    }
    emit(&mut page, &mut off, flash, xor);
}

fn case4_payload() -> Vec<u8> {
    (0..2069u32).map(|i| (i * 7 + 13) as u8).collect()
}

fn build(case: usize) -> SimFlash {
    let mut flash = SimFlash::new();
    match case {
        // 0: blank flash
        0 => {}
        // 1: interrupted writes left RECEIVING pages behind
        1 => {
            for phys in [2usize, 4, 99] {
                layout::set_status(&mut flash, phys, STATUS_RECEIVING).unwrap();
                layout::set_virt(&mut flash, phys, 0).unwrap();
            }
        }
        // 2: one VALID page with a zero-length record
        2 => {
            make_valid(&mut flash, 44, 0);
            raw_record(&mut flash, 44, HEADER_CHUNKS, 243, &[]);
        }
        // 3: tombstones in front of a live record
        3 => {
            make_valid(&mut flash, 44, 0);
            for off in 0..20 {
                put(&mut flash, 44, HEADER_CHUNKS + off, TOMBSTONE_CHUNK);
            }
            raw_record(&mut flash, 44, HEADER_CHUNKS + 20, 243, &[]);
        }
        // 4: one record chained across three pages
        4 => {
            chain_record(
                &mut flash,
                &[(100, 0), (32, 1), (1, 2)],
                123,
                &case4_payload(),
            );
        }
        // 5: promotion interrupted mid-chain: head RECEIVING, tails VALID
        5 => {
            chain_record(&mut flash, &[(10, 0), (11, 1), (12, 2)], 55, &[0xFF; 2069]);
            flash.erase_page(10).unwrap();
            layout::set_status(&mut flash, 10, STATUS_RECEIVING).unwrap();
            layout::set_virt(&mut flash, 10, 0).unwrap();
        }
        // 6: crash between commit and tombstone leaves two copies of one id
        6 => {
            make_valid(&mut flash, 5, 0);
            raw_record(&mut flash, 5, HEADER_CHUNKS, 9, b"old value");
            make_valid(&mut flash, 6, 1);
            raw_record(&mut flash, 6, HEADER_CHUNKS, 9, b"new value");
        }
        _ => unreachable!("case index validated by run()"),
    }
    flash
}

fn verify(case: usize, flash: SimFlash) -> Result<(), CtlError> {
    let mut store = Store::mount(flash)?;
    let stats = store.stats();
    match case {
        0 => {
            ensure(case, stats.busy_pages == 0, "blank flash must mount empty")?;
            ensure(case, stats.ids == 0, "blank flash must bind no ids")?;
            ensure(case, stats.next_alloc == Some(0), "allocation must start at page 0")?;
        }
        1 => {
            ensure(case, stats.busy_pages == 0, "receiving pages must be discarded")?;
            for phys in [2usize, 4, 99] {
                ensure(
                    case,
                    layout::page_status(store.flash(), phys) == STATUS_ERASED,
                    "receiving pages must be erased",
                )?;
            }
            ensure(
                case,
                stats.next_alloc == Some(100),
                "allocation must resume after the scan position",
            )?;
        }
        2 => {
            let pages: Vec<_> = store.pages().collect();
            ensure(case, pages.len() == 1, "exactly one page must register")?;
            ensure(case, pages[0].virt == 0 && pages[0].phys == 44, "wrong page identity")?;
            ensure(case, pages[0].fragments == 0, "no fragments expected")?;
            ensure(case, pages[0].free_space == 1014, "free space must be 1014")?;
            let mut buf = [0u8; 4];
            ensure(
                case,
                store.read(243, &mut buf) == Ok(0),
                "id 243 must read back empty",
            )?;
        }
        3 => {
            let page = store.pages().next().ok_or(CtlError::CaseFailed {
                case,
                detail: "no page registered".into(),
            })?;
            ensure(case, page.fragments == 40, "fragments must be 40")?;
            ensure(case, page.free_space == 974, "free space must be 974")?;
            ensure(case, store.contains(243), "id 243 must survive")?;
        }
        4 => {
            ensure(case, stats.busy_pages == 3, "three chain pages must register")?;
            let expect = case4_payload();
            let mut buf = vec![0u8; expect.len()];
            let n = store.read(123, &mut buf)?;
            ensure(case, n == expect.len(), "length mismatch")?;
            ensure(case, buf == expect, "payload mismatch")?;
        }
        5 => {
            ensure(case, stats.ids == 0, "interrupted chain must be discarded")?;
            ensure(case, stats.busy_pages == 0, "orphan tails must be reclaimed")?;
        }
        6 => {
            ensure(case, stats.ids == 1, "exactly one copy must survive")?;
            let mut buf = [0u8; 16];
            let n = store.read(9, &mut buf)?;
            ensure(case, &buf[..n] == b"new value", "the newer copy must win")?;
        }
        _ => unreachable!(),
    }
    Ok(())
}
