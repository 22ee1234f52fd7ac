//! NORKV Compactor
//!
//! A single-shot reclaim pass, run after every mutation and once at mount.
//! Pages whose record area is all fragments and free space are erased
//! outright; pages past the fragmentation threshold get their live records
//! re-written to fresh pages (which tombstones the originals) and are then
//! erased too. Records merely *continuing* onto a page pin it until the
//! pass that moves their head.

use alloc::vec;
use alloc::vec::Vec;
use log::debug;

use arrayvec::ArrayVec;

use crate::config::*;
use crate::cursor::RecordLoc;
use crate::error::{Error, Result};
use crate::flash::Flash;
use crate::store::Store;

impl<F: Flash> Store<F> {
    /// One pass over the pages that existed when it started; pages the
    /// pass itself allocates are left for the next mutation.
    pub(crate) fn gc_pass(&mut self) -> Result<()> {
        let virts: ArrayVec<Chunk, PAGE_COUNT> = self.dir.iter().map(|m| m.virt).collect();
        for virt in virts {
            let meta = match self.dir.get(virt) {
                // erased earlier in this pass by a rewrite
                None => continue,
                Some(meta) => *meta,
            };
            if meta.live() == 0 {
                debug!("gc: erase dead page phys={} virt={}", meta.phys, virt);
                self.flash.erase_page(meta.phys as usize)?;
                self.dir.deregister(virt);
                continue;
            }
            if meta.fragments as usize >= USABLE_BYTES / GC_FRAG_DIVISOR
                && self.dir.free_pages() > 0
            {
                self.compact_page(virt)?;
            }
        }
        Ok(())
    }

    /// Move every record starting on the page to fresh pages, then erase
    /// the page once nothing live remains on it.
    fn compact_page(&mut self, virt: Chunk) -> Result<()> {
        let meta = match self.dir.get(virt) {
            None => return Ok(()),
            Some(meta) => *meta,
        };
        debug!(
            "gc: compact phys={} virt={} fragments={}",
            meta.phys, virt, meta.fragments
        );

        let movers: Vec<(Chunk, RecordLoc)> = self
            .ids
            .iter()
            .filter(|(_, loc)| loc.phys == meta.phys)
            .map(|(&id, &loc)| (id, loc))
            .collect();

        for (id, loc) in movers {
            let len = self.record_len_at(loc);
            let mut buf = vec![0u8; len];
            self.read_into(id, loc, len, &mut buf)?;
            match self.write_record(id, &buf) {
                Ok(()) => {}
                Err(Error::NoMem) | Err(Error::FlashExpired) => {
                    // reclaim is best-effort; the page stays until space or
                    // the caller frees something
                    debug!("gc: compaction out of space, leaving phys={}", meta.phys);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(meta) = self.dir.get(virt).copied() {
            if meta.live() == 0 {
                debug!("gc: erase compacted page phys={} virt={}", meta.phys, virt);
                self.flash.erase_page(meta.phys as usize)?;
                self.dir.deregister(virt);
            }
        }
        Ok(())
    }
}
