//! NORKV Store Core
//!
//! The owning handle over one flash region: the page directory, the id
//! index, and every public operation. One `Store` owns its device
//! exclusively; callers that need to share it serialize externally (see
//! [`SharedStore`](crate::SharedStore)).
//!
//! Submodules split the mechanics: `writer` (write/delete paths),
//! `recovery` (mount-time repair), `gc` (the compactor), `directory`
//! (in-memory page bookkeeping).

pub(crate) mod directory;
mod gc;
mod recovery;
mod writer;

use alloc::collections::BTreeMap;

use log::trace;

use crate::config::*;
use crate::cursor::{Cursor, RecordLoc, Step};
use crate::error::{Error, Result};
use crate::flash::{ChunkAddr, Flash};
use directory::PageDirectory;

/// Aggregate store counters, mostly for tooling and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Pages currently registered in the logical order.
    pub busy_pages: usize,
    /// Physical pages available for allocation.
    pub free_pages: usize,
    /// Live record ids.
    pub ids: usize,
    /// Physical index the next allocation will use.
    pub next_alloc: Option<u16>,
}

/// Per-page view of the in-memory accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageStats {
    pub virt: Chunk,
    pub phys: u16,
    pub fragments: u32,
    pub free_space: u32,
    pub live: u32,
}

/// A byte-addressable id/value store over a NOR-like flash device.
pub struct Store<F: Flash> {
    pub(crate) flash: F,
    pub(crate) dir: PageDirectory,
    pub(crate) ids: BTreeMap<Chunk, RecordLoc>,
    pub(crate) mounted: bool,
}

impl<F: Flash> Store<F> {
    /// Mount the store: classify every page, discard interrupted writes,
    /// rebuild the indices, and run one reclaim pass. The flash is left in
    /// a fully consistent state.
    pub fn mount(flash: F) -> Result<Self> {
        let mut store = Store {
            flash,
            dir: PageDirectory::new(),
            ids: BTreeMap::new(),
            mounted: false,
        };
        store.order_pages()?;
        store.check_order()?;
        store.init_data()?;
        store.mounted = true;
        store.gc_pass()?;
        Ok(store)
    }

    /// Release the in-memory structures and hand the device back. The
    /// flash contents are untouched.
    pub fn unmount(self) -> F {
        self.flash
    }

    /// Direct device access, for tooling and fault injection in tests.
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Mutable device access. Programming chunks behind the store's back
    /// invalidates its accounting; remount afterwards.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub(crate) fn ensure_mounted(&self) -> Result<()> {
        if self.mounted {
            Ok(())
        } else {
            Err(Error::Init)
        }
    }

    /// Whether a record is bound to `id`.
    pub fn contains(&self, id: Chunk) -> bool {
        self.ids.contains_key(&id)
    }

    /// Live record ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = Chunk> + '_ {
        self.ids.keys().copied()
    }

    /// Stored byte length of the record bound to `id`.
    pub fn read_len(&self, id: Chunk) -> Result<usize> {
        self.ensure_mounted()?;
        let loc = *self.ids.get(&id).ok_or(Error::IdNotFound)?;
        Ok(self.record_len_at(loc))
    }

    /// Copy the record bound to `id` into `buf`, returning its byte
    /// length. `buf` must hold the full record.
    pub fn read(&mut self, id: Chunk, buf: &mut [u8]) -> Result<usize> {
        self.ensure_mounted()?;
        let loc = *self.ids.get(&id).ok_or(Error::IdNotFound)?;
        let len = self.record_len_at(loc);
        if buf.len() < len {
            return Err(Error::BufSize);
        }
        self.read_into(id, loc, len, buf)?;
        Ok(len)
    }

    /// Factory reset: erase every page and start from an empty, mounted
    /// store.
    pub fn clean(&mut self) -> Result<()> {
        self.ensure_mounted()?;
        for phys in 0..PAGE_COUNT {
            self.flash.erase_page(phys)?;
        }
        self.dir = PageDirectory::new();
        self.ids.clear();
        self.dir.advance_next_alloc();
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            busy_pages: self.dir.busy_pages(),
            free_pages: self.dir.free_pages(),
            ids: self.ids.len(),
            next_alloc: self.dir.next_alloc(),
        }
    }

    /// Per-page accounting in virtual order.
    pub fn pages(&self) -> impl Iterator<Item = PageStats> + '_ {
        self.dir.iter().map(|m| PageStats {
            virt: m.virt,
            phys: m.phys,
            fragments: m.fragments,
            free_space: m.free_space,
            live: m.live(),
        })
    }

    /// Whether physical page `phys` is free for allocation.
    pub fn is_page_free(&self, phys: usize) -> bool {
        !self.dir.is_busy(phys)
    }

    // ---- internal record plumbing shared by the submodules ----

    /// The length chunk always sits right after the id chunk on the same
    /// page: chained records start at the top of a fresh page, appended
    /// records fit their page entirely.
    pub(crate) fn record_len_at(&self, loc: RecordLoc) -> usize {
        debug_assert!((loc.offset as usize) < PAGE_CHUNKS - 1);
        self.flash
            .read_chunk(ChunkAddr::new(loc.phys as usize, loc.offset as usize + 1)) as usize
    }

    /// Replay-walk the record at `loc`, unpacking `len` payload bytes into
    /// `out`.
    pub(crate) fn read_into(
        &mut self,
        id: Chunk,
        loc: RecordLoc,
        len: usize,
        out: &mut [u8],
    ) -> Result<()> {
        trace!("read: id={} phys={} offset={}", id, loc.phys, loc.offset);
        let mut cur = Cursor::walk(loc, id);
        let mut filled = 0usize;
        loop {
            match cur.step(&self.flash, &mut self.dir)? {
                Step::Payload(chunk) => {
                    let n = CHUNK_SIZE.min(len - filled);
                    crate::layout::unpack_chunk(chunk, &mut out[filled..filled + n]);
                    filled += n;
                }
                Step::Record => break,
                Step::Progress => {}
                Step::Failed | Step::EndOfStream => return Err(Error::DataConsistency),
            }
        }
        if filled != len {
            return Err(Error::DataConsistency);
        }
        Ok(())
    }

    /// Zero every chunk of a committed record and account the bytes as
    /// fragments. Walks the record first to find its end.
    pub(crate) fn tombstone_record(&mut self, loc: RecordLoc) -> Result<()> {
        let id = self.flash.read_chunk(loc.addr());
        if id == TOMBSTONE_CHUNK || id == FREE_CHUNK {
            return Err(Error::DataConsistency);
        }
        let mut cur = Cursor::walk(loc, id);
        loop {
            match cur.step(&self.flash, &mut self.dir)? {
                Step::Record => break,
                Step::Failed | Step::EndOfStream => return Err(Error::DataConsistency),
                _ => {}
            }
        }
        self.zero_extent(loc, cur.record_end())
    }

    /// Zero the chunks of `[start, end]` in reverse order (last page
    /// first, high offsets first), crediting each page's fragments. A
    /// power cut mid-way leaves a record whose checksum no longer
    /// verifies, which the next mount tombstones the rest of the way.
    pub(crate) fn zero_extent(&mut self, start: RecordLoc, end: RecordLoc) -> Result<()> {
        let mut virt = end.virt;
        let mut phys = end.phys;
        let mut hi = end.offset as usize;
        loop {
            let lo = if virt == start.virt {
                start.offset as usize
            } else {
                HEADER_CHUNKS
            };
            let mut zeroed = 0u32;
            let mut failure = None;
            for off in (lo..=hi).rev() {
                match self.flash.zero_chunk(ChunkAddr::new(phys as usize, off)) {
                    Ok(()) => zeroed += CHUNK_SIZE as u32,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            let meta = self.dir.get_mut(virt).ok_or(Error::DataConsistency)?;
            meta.fragments += zeroed;
            debug_assert!(meta.fragments + meta.free_space <= USABLE_BYTES as u32);
            if let Some(e) = failure {
                return Err(e);
            }
            if virt == start.virt {
                return Ok(());
            }
            let prev = self.dir.prev_virt(virt).ok_or(Error::DataConsistency)?;
            virt = prev.virt;
            phys = prev.phys;
            hi = PAGE_CHUNKS - 1;
        }
    }
}
