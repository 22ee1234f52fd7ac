//! Power-loss matrix: interrupt a write and a delete at every flash-op
//! boundary, reboot on whatever survived, and require all-or-nothing
//! semantics with no collateral damage to other records.

mod common;

use common::pattern;
use norkv::{Error, Flash, SimFlash, Store};

// All-ones bytes for the value the cut tests tombstone: whatever suffix of
// the record a cut leaves zeroed, the checksum can never verify again, so
// a half-tombstoned copy is always repaired rather than resurrected.
fn doomed_value() -> Vec<u8> {
    vec![0xFF; 300]
}

fn base_image() -> SimFlash {
    let mut store = Store::mount(SimFlash::new()).unwrap();
    store.write(1, &pattern(40, 1)).unwrap();
    store.write(2, &pattern(600, 2)).unwrap();
    store.write(3, &pattern(2069, 3)).unwrap();
    // supersede once so the image carries tombstone fragments too
    store.write(2, &doomed_value()).unwrap();
    store.unmount()
}

fn assert_bystanders_intact(store: &mut Store<SimFlash>) {
    let mut buf = vec![0u8; 4096];
    let n = store.read(1, &mut buf).expect("id 1 must survive");
    assert_eq!(&buf[..n], &pattern(40, 1)[..]);
    let n = store.read(3, &mut buf).expect("id 3 must survive");
    assert_eq!(&buf[..n], &pattern(2069, 3)[..]);
}

#[test]
fn write_cut_at_every_op_boundary_is_all_or_nothing() {
    let base = base_image();
    let old_value = doomed_value();
    let new_value = pattern(1500, 77);

    let mut budget = 0usize;
    loop {
        let mut store = Store::mount(base.clone()).unwrap();
        store.flash_mut().fail_after(budget);
        let res = store.write(2, &new_value);
        let mut flash = store.unmount();
        flash.clear_fault();

        let mut store = Store::mount(flash).expect("remount after cut");
        assert_bystanders_intact(&mut store);

        let mut buf = vec![0u8; 4096];
        let n = store
            .read(2, &mut buf)
            .expect("a superseding write never loses the id");
        let got = &buf[..n];
        assert!(
            got == &old_value[..] || got == &new_value[..],
            "mixed state after a cut at {} ops",
            budget
        );

        if res.is_ok() {
            // once the call succeeds the new value is the only outcome
            assert_eq!(got, &new_value[..]);
            break;
        }
        budget += 1;
        assert!(budget < 20_000, "write kept failing with a huge op budget");
    }
}

#[test]
fn delete_cut_at_every_op_boundary_never_resurrects_garbage() {
    let base = base_image();
    let old_value = doomed_value();

    let mut budget = 0usize;
    loop {
        let mut store = Store::mount(base.clone()).unwrap();
        store.flash_mut().fail_after(budget);
        let res = store.delete(2);
        let mut flash = store.unmount();
        flash.clear_fault();

        let mut store = Store::mount(flash).expect("remount after cut");
        assert_bystanders_intact(&mut store);

        if store.contains(2) {
            // either untouched or fully repaired; a half-tombstoned
            // record must not read back truncated
            let mut buf = vec![0u8; 4096];
            let n = store.read(2, &mut buf).unwrap();
            assert_eq!(&buf[..n], &old_value[..], "cut at {} ops", budget);
        }

        if res.is_ok() {
            assert!(!store.contains(2));
            break;
        }
        budget += 1;
        assert!(budget < 20_000, "delete kept failing with a huge op budget");
    }
}

/// A flash fault mid-write, unlike a power cut, leaves the session
/// running. The rollback erases run against the same exhausted device,
/// so they fail too; the chain must still be fully released, the write's
/// own error (not the cleanup's) surfaced, and the session must keep
/// working once the fault clears.
#[test]
fn same_session_fault_releases_the_whole_chain() {
    let mut store = Store::mount(base_image()).unwrap();
    let before = store.stats();

    // enough budget to chain two RECEIVING pages and start streaming, so
    // the rollback has a multi-page chain to release under a dead device
    store.flash_mut().fail_after(10);
    assert_eq!(store.write(2, &pattern(1500, 77)), Err(Error::FlashWrite));

    let after = store.stats();
    assert_eq!(after.busy_pages, before.busy_pages);
    assert_eq!(after.free_pages, before.free_pages);

    store.flash_mut().clear_fault();
    store.write(2, &pattern(1500, 77)).unwrap();
    let mut buf = vec![0u8; 1500];
    assert_eq!(store.read(2, &mut buf).unwrap(), 1500);
    assert_eq!(&buf[..], &pattern(1500, 77)[..]);
}

/// Mount-time repair can itself be interrupted. Every intermediate state
/// it can leave behind (chain head erased but tails not yet parsed,
/// orphan tails half tombstoned) must mount clean on the next attempt.
#[test]
fn partially_repaired_images_mount_clean() {
    let interrupted_chain = || {
        // an interrupted write: head RECEIVING, continuation tails VALID
        let mut flash = SimFlash::new();
        let data = vec![0xFF; 2069];
        common::chain_record(&mut flash, &[(10, 0), (11, 1), (12, 2)], 55, &data);
        flash.erase_page(10).unwrap();
        common::make_receiving(&mut flash, 10, 0);
        flash
    };

    // repair died right after erasing the head
    let mut after_head_erase = interrupted_chain();
    after_head_erase.erase_page(10).unwrap();

    // repair died after tombstoning the first orphan's id chunk
    let mut after_partial_tombstone = interrupted_chain();
    after_partial_tombstone.erase_page(10).unwrap();
    common::put(&mut after_partial_tombstone, 11, 2, 0);

    for (name, flash) in [
        ("untouched", interrupted_chain()),
        ("head erased", after_head_erase),
        ("half tombstoned", after_partial_tombstone),
    ] {
        let store = Store::mount(flash).expect(name);
        assert_eq!(store.stats().ids, 0, "{}", name);
        assert_eq!(store.stats().busy_pages, 0, "{}", name);
    }
}
