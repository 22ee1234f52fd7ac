//! NORKV Record Cursor
//!
//! A stateful walker over the record area of the logical page sequence. The
//! same machine drives three jobs:
//!
//! - **scan**: the mount-time parse of everything on flash, in virtual
//!   order, accumulating the per-page fragment/free accounting as it goes;
//! - **walk**: re-reading one committed record (reads, deletes, the
//!   compactor), flagged `REPLAY` so the accounting is not touched twice;
//! - **write**: streaming a fresh record through a RECEIVING chain,
//!   maintaining the running XOR and programming the linkage id on every
//!   page crossing.
//!
//! The cursor is a plain value: it holds positions, not borrows, so the
//! store can interleave stepping with index updates and tombstoning.

use bitflags::bitflags;
use log::trace;

use crate::config::*;
use crate::error::{Error, Result};
use crate::flash::{ChunkAddr, Flash};
use crate::layout;
use crate::store::directory::{PageDirectory, PageMeta};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CursorFlags: u8 {
        /// Walk without updating fragment/free accounting (the bytes were
        /// already accounted by the mount-time scan or the writer).
        const REPLAY = 1 << 0;
        /// The current page's record area is exhausted; the next step moves
        /// to the next page in virtual order.
        const PAGE_FINISHED = 1 << 1;
    }
}

/// Parse phase of the in-progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Between records.
    Clean,
    /// Id consumed, expecting the length chunk.
    IdDone,
    /// Length consumed, payload chunks outstanding.
    LengthDone,
    /// Payload consumed, expecting the checksum chunk.
    DataDone,
    /// Record complete and checksum-verified.
    Ok,
    /// Record could not be completed.
    Failed,
}

/// Location of one chunk on flash, carrying the page's virtual number so
/// neighbours in logical order can be found again without a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLoc {
    pub virt: Chunk,
    pub phys: u16,
    pub offset: u16,
}

impl RecordLoc {
    pub fn addr(self) -> ChunkAddr {
        ChunkAddr::new(self.phys as usize, self.offset as usize)
    }
}

/// Outcome of one parse step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A chunk (or page crossing) was consumed; nothing finished.
    Progress,
    /// One payload chunk of the in-progress record.
    Payload(Chunk),
    /// A record completed; `record_id`/`record_len`/`record_start`/
    /// `record_end` describe it. Call `resume` before stepping on.
    Record,
    /// The in-progress record cannot complete; `failed_extent` covers the
    /// chunks it consumed. Call `resume` before stepping on. Scan mode
    /// only; a replay walk surfaces the error instead.
    Failed,
    /// No pages left. Scan mode only.
    EndOfStream,
}

pub struct Cursor {
    virt: Chunk,
    phys: u16,
    pos: usize,
    flags: CursorFlags,
    phase: Phase,

    // in-progress record
    id: Chunk,
    length: Chunk,
    checksum: Chunk,
    data_left: usize,
    start: RecordLoc,
    end: RecordLoc,

    // chunks of the current free run on this page
    free_run: usize,
}

impl Cursor {
    fn at(virt: Chunk, phys: u16, offset: usize, flags: CursorFlags) -> Self {
        Cursor {
            virt,
            phys,
            pos: offset,
            flags,
            phase: Phase::Clean,
            id: 0,
            length: 0,
            checksum: 0,
            data_left: 0,
            start: RecordLoc { virt, phys, offset: offset as u16 },
            end: RecordLoc { virt, phys, offset: offset as u16 },
            free_run: 0,
        }
    }

    /// Full-stream accounting parse, starting at the first page in virtual
    /// order. Used once, on mount.
    pub fn scan(first: &PageMeta) -> Self {
        Cursor::at(first.virt, first.phys, HEADER_CHUNKS, CursorFlags::empty())
    }

    /// Replay walk over one committed record starting at `loc`. `id` is the
    /// value the linkage chunks of continuation pages must repeat.
    pub fn walk(loc: RecordLoc, id: Chunk) -> Self {
        let mut cur = Cursor::at(loc.virt, loc.phys, loc.offset as usize, CursorFlags::REPLAY);
        cur.id = id;
        cur
    }

    /// Write-mode cursor positioned at the first record-area chunk of a
    /// freshly chained page. `id` is programmed as the linkage on every
    /// crossing.
    pub fn writer(virt: Chunk, phys: u16, id: Chunk) -> Self {
        let mut cur = Cursor::at(virt, phys, HEADER_CHUNKS, CursorFlags::empty());
        cur.id = id;
        cur
    }

    pub fn record_id(&self) -> Chunk {
        self.id
    }

    pub fn record_len(&self) -> usize {
        self.length as usize
    }

    pub fn record_start(&self) -> RecordLoc {
        self.start
    }

    pub fn record_end(&self) -> RecordLoc {
        self.end
    }

    /// First and last chunk consumed by the record that just failed.
    pub fn failed_extent(&self) -> (RecordLoc, RecordLoc) {
        (self.start, self.end)
    }

    /// Chunk offset one past the last chunk written/consumed on the current
    /// page.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn page(&self) -> (Chunk, u16) {
        (self.virt, self.phys)
    }

    pub fn checksum(&self) -> Chunk {
        self.checksum
    }

    /// Re-arm the machine after `Record` or `Failed`.
    pub fn resume(&mut self) {
        debug_assert!(matches!(self.phase, Phase::Ok | Phase::Failed));
        self.phase = Phase::Clean;
        self.id = 0;
        self.length = 0;
        self.checksum = 0;
        self.data_left = 0;
    }

    fn here(&self) -> RecordLoc {
        RecordLoc {
            virt: self.virt,
            phys: self.phys,
            offset: self.pos as u16,
        }
    }

    fn mid_record(&self) -> bool {
        matches!(self.phase, Phase::IdDone | Phase::LengthDone | Phase::DataDone)
    }

    /// Flush the trailing free run of the current page into its free-space
    /// counter.
    fn flush_free_run(&mut self, dir: &mut PageDirectory) {
        if self.free_run > 0 && !self.flags.contains(CursorFlags::REPLAY) {
            if let Some(meta) = dir.get_mut(self.virt) {
                meta.free_space += (self.free_run * CHUNK_SIZE) as u32;
            }
        }
        self.free_run = 0;
    }

    /// A free run followed by anything written is not trailing space but
    /// unusable interior, accounted as fragments.
    fn demote_free_run(&mut self, dir: &mut PageDirectory) {
        if self.free_run > 0 && !self.flags.contains(CursorFlags::REPLAY) {
            if let Some(meta) = dir.get_mut(self.virt) {
                meta.fragments += (self.free_run * CHUNK_SIZE) as u32;
            }
        }
        self.free_run = 0;
    }

    fn credit_fragment(&mut self, dir: &mut PageDirectory) {
        if !self.flags.contains(CursorFlags::REPLAY) {
            if let Some(meta) = dir.get_mut(self.virt) {
                meta.fragments += CHUNK_SIZE as u32;
            }
        }
    }

    fn fail_at(&mut self, end: RecordLoc) -> Result<Step> {
        if self.flags.contains(CursorFlags::REPLAY) {
            // a committed record must not fail mid-walk
            return Err(Error::DataConsistency);
        }
        self.phase = Phase::Failed;
        self.end = end;
        Ok(Step::Failed)
    }

    fn move_to(&mut self, virt: Chunk, phys: u16) {
        self.virt = virt;
        self.phys = phys;
        self.pos = HEADER_CHUNKS;
        self.flags.remove(CursorFlags::PAGE_FINISHED);
    }

    /// Leave the exhausted page for the next one in virtual order.
    fn advance<F: Flash>(&mut self, flash: &F, dir: &mut PageDirectory) -> Result<Step> {
        let prev_end = RecordLoc {
            virt: self.virt,
            phys: self.phys,
            offset: (PAGE_CHUNKS - 1) as u16,
        };

        if self.mid_record() {
            let next = match dir.next_virt(self.virt) {
                Some(meta) => *meta,
                None => return self.fail_at(prev_end),
            };
            if layout::page_status(flash, next.phys as usize) != STATUS_VALID {
                return self.fail_at(prev_end);
            }
            let link = flash.read_chunk(ChunkAddr::new(next.phys as usize, HEADER_CHUNKS));
            if link != self.id {
                return self.fail_at(prev_end);
            }
            trace!("cursor: record {} continues on virt={}", self.id, next.virt);
            self.move_to(next.virt, next.phys);
            self.pos += 1; // the linkage chunk is not payload
            Ok(Step::Progress)
        } else {
            debug_assert_eq!(self.phase, Phase::Clean);
            self.flush_free_run(dir);
            match dir.next_virt(self.virt) {
                Some(meta) => {
                    let (virt, phys) = (meta.virt, meta.phys);
                    self.move_to(virt, phys);
                    Ok(Step::Progress)
                }
                None => Ok(Step::EndOfStream),
            }
        }
    }

    /// Consume one chunk (or perform one page crossing).
    pub fn step<F: Flash>(&mut self, flash: &F, dir: &mut PageDirectory) -> Result<Step> {
        debug_assert!(
            !matches!(self.phase, Phase::Ok | Phase::Failed),
            "resume() the cursor before stepping on"
        );

        if self.pos >= PAGE_CHUNKS {
            self.flags.insert(CursorFlags::PAGE_FINISHED);
        }
        if self.flags.contains(CursorFlags::PAGE_FINISHED) {
            return self.advance(flash, dir);
        }

        let loc = self.here();
        let chunk = flash.read_chunk(loc.addr());

        match self.phase {
            Phase::Clean => match chunk {
                FREE_CHUNK => {
                    if self.flags.contains(CursorFlags::REPLAY) {
                        return Err(Error::DataConsistency);
                    }
                    self.free_run += 1;
                }
                TOMBSTONE_CHUNK => {
                    if self.flags.contains(CursorFlags::REPLAY) {
                        return Err(Error::DataConsistency);
                    }
                    self.demote_free_run(dir);
                    self.credit_fragment(dir);
                }
                id => {
                    self.demote_free_run(dir);
                    if self.flags.contains(CursorFlags::REPLAY) && id != self.id {
                        return Err(Error::DataConsistency);
                    }
                    self.id = id;
                    self.checksum = id;
                    self.start = loc;
                    self.phase = Phase::IdDone;
                }
            },
            Phase::IdDone => {
                if chunk == FREE_CHUNK {
                    // interrupted before the length was programmed; the free
                    // chunk stays unconsumed
                    self.length = FREE_CHUNK;
                    return self.fail_at(self.start);
                }
                self.length = chunk;
                self.checksum ^= chunk;
                self.data_left = layout::chunks_for(chunk as usize);
                self.phase = if self.data_left == 0 {
                    Phase::DataDone
                } else {
                    Phase::LengthDone
                };
            }
            Phase::LengthDone => {
                self.checksum ^= chunk;
                self.data_left -= 1;
                if self.data_left == 0 {
                    self.phase = Phase::DataDone;
                }
                self.pos += 1;
                return Ok(Step::Payload(chunk));
            }
            Phase::DataDone => {
                if chunk == self.checksum {
                    self.phase = Phase::Ok;
                    self.end = loc;
                    self.pos += 1;
                    return Ok(Step::Record);
                }
                if self.flags.contains(CursorFlags::REPLAY) {
                    return Err(Error::Checksum);
                }
                // the chunk where the checksum belongs is part of the wreck
                self.pos += 1;
                return self.fail_at(loc);
            }
            Phase::Ok | Phase::Failed => return Err(Error::DataConsistency),
        }

        self.pos += 1;
        Ok(Step::Progress)
    }

    /// Write-mode: program one chunk at the cursor, chaining into the next
    /// RECEIVING page (and programming the linkage id there) when the
    /// current page runs out.
    pub fn put_chunk<F: Flash>(
        &mut self,
        flash: &mut F,
        dir: &PageDirectory,
        value: Chunk,
    ) -> Result<()> {
        if self.pos >= PAGE_CHUNKS {
            let next = *dir.next_virt(self.virt).ok_or(Error::DataConsistency)?;
            if layout::page_status(flash, next.phys as usize) != STATUS_RECEIVING {
                return Err(Error::DataConsistency);
            }
            trace!("cursor: chaining record {} onto virt={}", self.id, next.virt);
            self.move_to(next.virt, next.phys);
            flash.write_chunk(self.id, ChunkAddr::new(next.phys as usize, HEADER_CHUNKS))?;
            self.pos += 1;
        }
        flash.write_chunk(value, ChunkAddr::new(self.phys as usize, self.pos))?;
        self.checksum ^= value;
        self.pos += 1;
        Ok(())
    }
}
