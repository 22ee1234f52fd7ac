//! End-to-end store behavior against the simulator: parameter checks,
//! round trips, supersede/delete semantics, capacity and reclaim.

mod common;

use common::pattern;
use norkv::config::*;
use norkv::{Error, SimFlash, Store};
use pretty_assertions::assert_eq;

fn fresh() -> Store<SimFlash> {
    Store::mount(SimFlash::new()).expect("mount blank flash")
}

#[test]
fn blank_flash_mounts_empty() {
    let store = fresh();
    let stats = store.stats();
    assert_eq!(stats.busy_pages, 0);
    assert_eq!(stats.ids, 0);
    assert_eq!(stats.free_pages, PAGE_COUNT);
    assert_eq!(stats.next_alloc, Some(0));
    for phys in 0..PAGE_COUNT {
        assert!(store.is_page_free(phys));
    }
}

#[test]
fn rejects_out_of_range_parameters() {
    let mut store = fresh();
    assert_eq!(store.write(0, b"x"), Err(Error::Id));
    assert_eq!(store.write(MAX_ID, b"x"), Err(Error::Id));
    // parameter errors leave no trace
    assert_eq!(store.stats().busy_pages, 0);

    let mut buf = [0u8; 4];
    assert_eq!(store.read(42, &mut buf), Err(Error::IdNotFound));
}

#[test]
fn zero_length_record_round_trips() {
    let mut store = fresh();
    store.write(243, &[]).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(store.read(243, &mut buf).unwrap(), 0);
    assert_eq!(store.read_len(243).unwrap(), 0);
    assert!(store.contains(243));
}

#[test]
fn short_buffer_is_rejected_without_copy() {
    let mut store = fresh();
    store.write(7, b"hello world").unwrap();
    let mut small = [0u8; 4];
    assert_eq!(store.read(7, &mut small), Err(Error::BufSize));
    assert_eq!(small, [0u8; 4]);
}

#[test]
fn round_trips_assorted_sizes() {
    let mut store = fresh();
    for (id, len) in [(1u16, 1usize), (2, 2), (3, 3), (4, 255), (5, 600), (6, 1018)] {
        let data = pattern(len, id as u64);
        store.write(id, &data).unwrap();
        let mut buf = vec![0u8; len + 3];
        let n = store.read(id, &mut buf).unwrap();
        assert_eq!(n, len);
        assert_eq!(&buf[..n], &data[..], "id {}", id);
    }
    assert_eq!(store.ids().collect::<Vec<_>>(), [1, 2, 3, 4, 5, 6]);
}

#[test]
fn multi_page_record_round_trips() {
    let mut store = fresh();
    let data = pattern(2069, 99);
    store.write(123, &data).unwrap();
    assert_eq!(store.stats().busy_pages, 3);

    let mut buf = vec![0u8; 2069];
    assert_eq!(store.read(123, &mut buf).unwrap(), 2069);
    assert_eq!(buf, data);

    // the three chain pages carry strictly increasing virtual numbers
    let virts: Vec<u16> = store.pages().map(|p| p.virt).collect();
    assert_eq!(virts, [0, 1, 2]);
}

#[test]
fn rewrite_supersedes_previous_value() {
    let mut store = fresh();
    store.write(9, b"first").unwrap();
    store.write(9, b"the second value").unwrap();
    let mut buf = [0u8; 64];
    let n = store.read(9, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"the second value");
    assert_eq!(store.stats().ids, 1);
}

#[test]
fn delete_unbinds_and_tolerates_absent_ids() {
    let mut store = fresh();
    store.write(5, b"doomed").unwrap();
    store.delete(5).unwrap();
    assert!(!store.contains(5));
    let mut buf = [0u8; 16];
    assert_eq!(store.read(5, &mut buf), Err(Error::IdNotFound));
    // deleting again is not an error
    store.delete(5).unwrap();
    store.delete(44).unwrap();
}

#[test]
fn delete_of_sole_record_reclaims_its_pages() {
    let mut store = fresh();
    store.write(11, &pattern(2069, 1)).unwrap();
    assert_eq!(store.stats().busy_pages, 3);
    store.delete(11).unwrap();
    // tombstoning emptied all three pages; the pass erased them
    assert_eq!(store.stats().busy_pages, 0);
    assert_eq!(store.stats().free_pages, PAGE_COUNT);
}

#[test]
fn clean_factory_resets() {
    let mut store = fresh();
    store.write(1, b"a").unwrap();
    store.write(2, b"b").unwrap();
    store.clean().unwrap();
    assert_eq!(store.stats().busy_pages, 0);
    assert_eq!(store.stats().ids, 0);
    assert_eq!(store.stats().next_alloc, Some(0));
    // still usable
    store.write(3, b"c").unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(store.read(3, &mut buf).unwrap(), 1);
}

/// One-byte records pack 127 to a page; the store holds exactly
/// 127 * PAGE_COUNT of them.
#[cfg(feature = "norkv-append")]
#[test]
fn fills_to_exact_capacity_then_nomem() {
    const PER_PAGE: usize = 127;
    let capacity = PER_PAGE * PAGE_COUNT; // 16256

    let mut store = fresh();
    for id in 1..=capacity as u16 {
        store.write(id, &[id as u8]).unwrap();
    }
    assert_eq!(store.stats().busy_pages, PAGE_COUNT);
    assert_eq!(store.stats().ids, capacity);
    assert_eq!(store.write(60000, &[1]), Err(Error::NoMem));

    // freeing one whole page's worth of records makes room again
    for id in 1..=PER_PAGE as u16 {
        store.delete(id).unwrap();
    }
    assert_eq!(store.stats().free_pages, 1);
    store.write(60000, &[1]).unwrap();

    // and deleting everything reclaims everything
    for id in PER_PAGE as u16 + 1..=capacity as u16 {
        store.delete(id).unwrap();
    }
    store.delete(60000).unwrap();
    assert_eq!(store.stats().busy_pages, 0);
    assert_eq!(store.stats().free_pages, PAGE_COUNT);
}

/// Rewriting a handful of ids forever keeps consuming virtual numbers and
/// must eventually report end of life, with all committed data intact.
#[test]
fn virtual_numbers_eventually_expire() {
    let mut store = fresh();
    let payloads: Vec<Vec<u8>> = [123u16, 456, 789]
        .iter()
        .map(|&id| pattern(255, id as u64))
        .collect();

    let mut expired = false;
    'outer: for round in 0..300_000u32 {
        for (i, &id) in [123u16, 456, 789].iter().enumerate() {
            match store.write(id, &payloads[i]) {
                Ok(()) => {}
                Err(Error::FlashExpired) => {
                    expired = true;
                    break 'outer;
                }
                Err(e) => panic!("round {}: unexpected error {:?}", round, e),
            }
        }
    }
    assert!(expired, "the virtual-number counter never ran out");

    // everything committed before the end of life is still readable
    let mut buf = vec![0u8; 255];
    for (i, &id) in [123u16, 456, 789].iter().enumerate() {
        if store.contains(id) {
            assert_eq!(store.read(id, &mut buf).unwrap(), 255);
            assert_eq!(&buf[..], &payloads[i][..], "id {}", id);
        }
    }
}

#[test]
fn unmount_returns_the_device_untouched() {
    let mut store = fresh();
    store.write(3, b"persist").unwrap();
    let flash = store.unmount();
    let mut store = Store::mount(flash).unwrap();
    let mut buf = [0u8; 16];
    let n = store.read(3, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"persist");
}
