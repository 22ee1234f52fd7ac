//! NORKV Mount-Time Recovery
//!
//! Every mount rebuilds the whole in-memory state from flash and repairs
//! whatever a power cut left behind:
//!
//! - RECEIVING pages are interrupted writes; they are erased.
//! - Two VALID pages claiming one virtual number are crash siblings; the
//!   more-written one survives.
//! - Partial records (missing length, torn payload, bad checksum) are
//!   tombstoned in place.
//! - Two committed copies of one id mean the crash hit between commit and
//!   tombstone of a superseding write; the later copy in parse order wins.
//!
//! After phase D (one compactor pass) the flash is exactly what a clean
//! shutdown would have left.

use log::{trace, warn};

use crate::config::*;
use crate::cursor::{Cursor, RecordLoc, Step};
use crate::error::{Error, Result};
use crate::flash::Flash;
use crate::layout;
use crate::store::directory::PageMeta;
use crate::store::Store;

impl<F: Flash> Store<F> {
    /// Phase A: classify every physical page and build the logical order.
    pub(crate) fn order_pages(&mut self) -> Result<()> {
        for phys in 0..PAGE_COUNT {
            match layout::page_status(&self.flash, phys) {
                STATUS_ERASED => {}
                STATUS_RECEIVING => {
                    warn!("mount: erasing interrupted write phys={}", phys);
                    self.flash.erase_page(phys)?;
                    self.dir.set_alloc_hint(phys as u16);
                }
                STATUS_VALID => {
                    let virt = layout::page_virt(&self.flash, phys);
                    if virt > MAX_VIRT {
                        return Err(Error::VirtNum);
                    }
                    match self.dir.get(virt).copied() {
                        Some(existing) => {
                            self.resolve_duplicate(virt, existing.phys, phys as u16)?
                        }
                        None => self.dir.register(PageMeta::new(virt, phys as u16))?,
                    }
                    self.dir.set_alloc_hint(phys as u16);
                }
                _ => return Err(Error::UnknownStatus),
            }
        }
        self.dir.advance_next_alloc();
        Ok(())
    }

    /// Two VALID pages with one virtual number: keep the one with less
    /// trailing free space (the more-written copy) and erase the other.
    /// Equal free space is unresolvable.
    fn resolve_duplicate(&mut self, virt: Chunk, old_phys: u16, new_phys: u16) -> Result<()> {
        let free_old = layout::free_tail_bytes(&self.flash, old_phys as usize);
        let free_new = layout::free_tail_bytes(&self.flash, new_phys as usize);
        warn!(
            "mount: duplicate virt={} phys={}({}B free) vs phys={}({}B free)",
            virt, old_phys, free_old, new_phys, free_new
        );
        if free_new < free_old {
            self.flash.erase_page(old_phys as usize)?;
            self.dir.deregister(virt);
            self.dir.register(PageMeta::new(virt, new_phys))
        } else if free_new > free_old {
            self.flash.erase_page(new_phys as usize)
        } else {
            Err(Error::Defrag)
        }
    }

    /// Phase B: the ordered map and the busy-page count must agree.
    pub(crate) fn check_order(&self) -> Result<()> {
        if self.dir.len() != self.dir.busy_pages() {
            return Err(Error::InvalidOrder);
        }
        Ok(())
    }

    /// Phase C: one continuous parse over all VALID pages in virtual
    /// order. This is the accounting walk: pages were registered with
    /// zeroed counters, and every fragment/free byte is credited exactly
    /// once here.
    pub(crate) fn init_data(&mut self) -> Result<()> {
        let first = match self.dir.first() {
            Some(meta) => *meta,
            None => return Ok(()),
        };
        let mut cur = Cursor::scan(&first);
        loop {
            match cur.step(&self.flash, &mut self.dir)? {
                Step::Progress | Step::Payload(_) => {}
                Step::Record => {
                    let id = cur.record_id();
                    let start = cur.record_start();
                    trace!(
                        "mount: record id={} len={} phys={} offset={}",
                        id,
                        cur.record_len(),
                        start.phys,
                        start.offset
                    );
                    self.add_data(id, start)?;
                    cur.resume();
                }
                Step::Failed => {
                    let (start, end) = cur.failed_extent();
                    warn!(
                        "mount: tombstoning partial record phys={} offset={}",
                        start.phys, start.offset
                    );
                    self.zero_extent(start, end)?;
                    cur.resume();
                }
                Step::EndOfStream => break,
            }
        }
        Ok(())
    }

    /// Publish a parsed record. A second committed copy of an id supersedes
    /// the earlier one: parse order (virtual order, then position within a
    /// page) equals write order.
    fn add_data(&mut self, id: Chunk, loc: RecordLoc) -> Result<()> {
        if let Some(old) = self.ids.get(&id).copied() {
            warn!(
                "mount: id collision id={} old phys={} new phys={}",
                id, old.phys, loc.phys
            );
            self.tombstone_record(old)?;
        }
        self.ids.insert(id, loc);
        Ok(())
    }
}
