//! Golden-image builders shared by the integration suites: raw page and
//! record construction straight through the flash trait, the way images
//! land on a device.

#![allow(dead_code)]

use norkv::config::*;
use norkv::layout;
use norkv::{Chunk, ChunkAddr, Flash, SimFlash};

pub fn put(flash: &mut SimFlash, phys: usize, offset: usize, value: Chunk) {
    flash
        .write_chunk(value, ChunkAddr::new(phys, offset))
        .expect("golden image program");
}

/// Stamp a page VALID with the given virtual number.
pub fn make_valid(flash: &mut SimFlash, phys: usize, virt: Chunk) {
    layout::set_status(flash, phys, STATUS_RECEIVING).unwrap();
    layout::set_virt(flash, phys, virt).unwrap();
    layout::set_status(flash, phys, STATUS_VALID).unwrap();
}

pub fn make_receiving(flash: &mut SimFlash, phys: usize, virt: Chunk) {
    layout::set_status(flash, phys, STATUS_RECEIVING).unwrap();
    layout::set_virt(flash, phys, virt).unwrap();
}

/// Lay one record into an already-VALID page at `offset`, returning the
/// offset one past its checksum chunk.
pub fn raw_record(
    flash: &mut SimFlash,
    phys: usize,
    offset: usize,
    id: Chunk,
    payload: &[u8],
) -> usize {
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
    off + 1
}

/// Lay one record across a chain of pages (stamped VALID here), repeating
/// the id as the first record-area chunk of every continuation page.
pub fn chain_record(flash: &mut SimFlash, pages: &[(usize, Chunk)], id: Chunk, payload: &[u8]) {
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

/// Deterministic byte pattern.
pub fn pattern(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}
