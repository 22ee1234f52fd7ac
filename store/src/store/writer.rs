//! NORKV Write & Delete Paths
//!
//! A write either packs into the tail page in place (small records, feature
//! `norkv-append`) or chains fresh pages: program them RECEIVING with
//! strictly-increasing virtual numbers, stream the record through the
//! cursor, then promote RECEIVING→VALID **tail first**. The reverse
//! promotion order is what makes a power cut harmless: if the head page
//! never becomes VALID, the next mount erases the whole chain as an
//! interrupted write.
//!
//! Deleting never erases: it programs the record's chunks to 0x0000 from
//! the end backwards and leaves the bytes as fragments for the compactor.

use arrayvec::ArrayVec;
use log::{debug, trace, warn};

use crate::config::*;
use crate::cursor::{Cursor, RecordLoc};
use crate::error::{Error, Result};
use crate::flash::Flash;
use crate::layout;
use crate::store::directory::PageMeta;
use crate::store::Store;

#[cfg(feature = "norkv-append")]
use crate::flash::ChunkAddr;

type Chain = ArrayVec<(Chunk, u16), PAGE_COUNT>;

impl<F: Flash> Store<F> {
    /// Bind `data` to `id`, superseding any previous record. The previous
    /// record is tombstoned only after the new one is fully committed, so
    /// an interruption leaves one complete copy and the mount-time
    /// collision rules pick the newer.
    pub fn write(&mut self, id: Chunk, data: &[u8]) -> Result<()> {
        self.ensure_mounted()?;
        if id == 0 || id >= MAX_ID {
            return Err(Error::Id);
        }
        if data.len() >= MAX_LEN {
            return Err(Error::Length);
        }
        self.write_record(id, data)?;
        self.gc_pass()
    }

    /// Remove the record bound to `id`. Unbound ids succeed.
    pub fn delete(&mut self, id: Chunk) -> Result<()> {
        self.ensure_mounted()?;
        let loc = match self.ids.get(&id).copied() {
            Some(loc) => loc,
            None => {
                debug!("delete: id={} not bound", id);
                return Ok(());
            }
        };
        debug!("delete: id={} phys={} offset={}", id, loc.phys, loc.offset);
        self.tombstone_record(loc)?;
        self.ids.remove(&id);
        self.gc_pass()
    }

    /// The write path without the trailing reclaim pass; the compactor
    /// re-enters here when it moves records off a fragmented page.
    pub(crate) fn write_record(&mut self, id: Chunk, data: &[u8]) -> Result<()> {
        #[cfg(feature = "norkv-append")]
        if self.try_append(id, data)? {
            return Ok(());
        }
        self.write_chained(id, data)
    }

    fn write_chained(&mut self, id: Chunk, data: &[u8]) -> Result<()> {
        let pages = layout::pages_for(data.len());
        let chain = self.alloc_chain(pages)?;
        let (first_virt, first_phys) = chain[0];
        let start = RecordLoc {
            virt: first_virt,
            phys: first_phys,
            offset: HEADER_CHUNKS as u16,
        };
        trace!(
            "write: id={} len={} chain of {} from virt={}",
            id,
            data.len(),
            pages,
            first_virt
        );

        let streamed = self
            .stream_record(&chain, id, data)
            .and_then(|end| self.promote_chain(&chain).map(|_| end));
        let (end_virt, end_pos) = match streamed {
            Ok(end) => end,
            Err(e) => {
                // the write failure is the root cause; the rollback logs
                // its own troubles and always releases the chain
                let _ = self.erase_chain(&chain);
                return Err(e);
            }
        };

        // only the last page of the chain keeps writable tail space
        if let Some(meta) = self.dir.get_mut(end_virt) {
            meta.free_space = ((PAGE_CHUNKS - end_pos) * CHUNK_SIZE) as u32;
        }

        self.publish(id, start)
    }

    /// Program the record stream through the chain, returning the page and
    /// position one past the checksum chunk.
    fn stream_record(&mut self, chain: &Chain, id: Chunk, data: &[u8]) -> Result<(Chunk, usize)> {
        let (virt0, phys0) = chain[0];
        let mut cur = Cursor::writer(virt0, phys0, id);
        cur.put_chunk(&mut self.flash, &self.dir, id)?;
        cur.put_chunk(&mut self.flash, &self.dir, data.len() as Chunk)?;
        for i in 0..layout::chunks_for(data.len()) {
            cur.put_chunk(&mut self.flash, &self.dir, layout::pack_chunk(data, i))?;
        }
        let checksum = cur.checksum();
        cur.put_chunk(&mut self.flash, &self.dir, checksum)?;
        if cur.checksum() != 0 {
            return Err(Error::DataConsistency);
        }
        let (virt, _) = cur.page();
        Ok((virt, cur.pos()))
    }

    /// Claim `pages` ERASED pages and program them RECEIVING, in allocation
    /// order, extending the virtual-number tail.
    fn alloc_chain(&mut self, pages: usize) -> Result<Chain> {
        if pages > self.dir.free_pages() {
            return Err(Error::NoMem);
        }
        let mut chain = Chain::new();
        for _ in 0..pages {
            let step = self.begin_receiving();
            match step {
                Ok(entry) => chain.push(entry),
                Err(e) => {
                    let _ = self.erase_chain(&chain);
                    return Err(e);
                }
            }
        }
        Ok(chain)
    }

    fn begin_receiving(&mut self) -> Result<(Chunk, u16)> {
        let phys = self.dir.next_alloc().ok_or(Error::NoMem)?;
        let virt = self.dir.next_virt_number()?;
        debug!("write: receiving phys={} virt={}", phys, virt);
        let programmed = layout::set_status(&mut self.flash, phys as usize, STATUS_RECEIVING)
            .and_then(|_| layout::set_virt(&mut self.flash, phys as usize, virt));
        if let Err(e) = programmed {
            // scrub the half-written header so the page stays allocatable;
            // if the scrub fails too the next mount erases it
            if self.flash.erase_page(phys as usize).is_err() {
                warn!("write: header scrub failed phys={}", phys);
            }
            return Err(e);
        }
        self.dir.register(PageMeta::new(virt, phys))?;
        self.dir.advance_next_alloc();
        Ok((virt, phys))
    }

    /// Commit the chain: RECEIVING→VALID from the highest virtual number
    /// down.
    fn promote_chain(&mut self, chain: &Chain) -> Result<()> {
        for &(_, phys) in chain.iter().rev() {
            layout::set_status(&mut self.flash, phys as usize, STATUS_VALID)?;
        }
        Ok(())
    }

    /// Roll an unpublished chain back to free pages. Also used when a
    /// failure hits between promotion steps: none of the pages are
    /// reachable from the id index yet, so erasing VALID chain pages is
    /// safe.
    ///
    /// Cleanup is best-effort. The fault that aborted the write is often
    /// still present, so a failing rollback erase must not strand the rest
    /// of the chain as registered-but-dead pages the compactor would never
    /// reclaim; every entry is deregistered and the first device error is
    /// reported once the whole chain is released. The next mount re-erases
    /// whatever the failed erases left behind.
    fn erase_chain(&mut self, chain: &Chain) -> Result<()> {
        let mut first_err = None;
        for &(virt, phys) in chain.iter().rev() {
            debug!("write: rollback phys={} virt={}", phys, virt);
            if let Err(e) = self.flash.erase_page(phys as usize) {
                warn!("write: rollback erase failed phys={}", phys);
                first_err.get_or_insert(e);
            }
            self.dir.deregister(virt);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Point the id index at the freshly committed record, tombstoning the
    /// superseded one first.
    fn publish(&mut self, id: Chunk, loc: RecordLoc) -> Result<()> {
        if let Some(old) = self.ids.get(&id).copied() {
            trace!("write: supersede id={} old phys={}", id, old.phys);
            self.tombstone_record(old)?;
        }
        self.ids.insert(id, loc);
        Ok(())
    }

    /// Pack a small record into the trailing free space of the tail page.
    ///
    /// Only the maximum-virt page is eligible: the mount-time parse orders
    /// records by (virt, position within page), and only tail appends keep
    /// that order equal to write order.
    #[cfg(feature = "norkv-append")]
    fn try_append(&mut self, id: Chunk, data: &[u8]) -> Result<bool> {
        let needed = layout::record_chunks(data.len());
        if needed > DATA_CHUNKS {
            return Ok(false);
        }
        let tail = match self.dir.last() {
            Some(meta) => *meta,
            None => return Ok(false),
        };
        if tail.fragments != 0 || (tail.free_space as usize) < needed * CHUNK_SIZE {
            return Ok(false);
        }

        let start_off = PAGE_CHUNKS - tail.free_space as usize / CHUNK_SIZE;
        trace!(
            "write: id={} len={} append phys={} offset={}",
            id,
            data.len(),
            tail.phys,
            start_off
        );

        let payload_chunks = layout::chunks_for(data.len());
        let mut xor: Chunk = 0;
        let mut written: u32 = 0;
        let mut pos = start_off;
        let mut result = Ok(());
        for i in 0..payload_chunks + 3 {
            let value = match i {
                0 => id,
                1 => data.len() as Chunk,
                _ if i < 2 + payload_chunks => layout::pack_chunk(data, i - 2),
                _ => xor,
            };
            match self
                .flash
                .write_chunk(value, ChunkAddr::new(tail.phys as usize, pos))
            {
                Ok(()) => {
                    xor ^= value;
                    written += CHUNK_SIZE as u32;
                    pos += 1;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let meta = self.dir.get_mut(tail.virt).ok_or(Error::DataConsistency)?;
        meta.free_space -= written;
        if result.is_err() {
            // the torn prefix is dead weight until the compactor gets it
            meta.fragments += written;
        }
        result?;
        debug_assert_eq!(xor, 0);

        self.publish(
            id,
            RecordLoc {
                virt: tail.virt,
                phys: tail.phys,
                offset: start_off as u16,
            },
        )?;
        Ok(true)
    }
}
