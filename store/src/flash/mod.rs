//! NORKV Flash Device Abstraction
//!
//! The store talks to flash through three primitives: erase a page, program
//! one chunk (clearing bits only), and read a chunk back. Everything else
//! (page states, records, recovery) is layered on top in the core and must
//! hold for any device implementing [`Flash`].

use crate::config::{Chunk, PAGE_CHUNKS, PAGE_COUNT};
use crate::error::Result;

#[cfg(any(test, feature = "std"))]
mod sim;
#[cfg(any(test, feature = "std"))]
pub use sim::SimFlash;

/// Flat chunk index into the flash region.
///
/// Pages are contiguous: page `p` starts at chunk `p * PAGE_CHUNKS`. The
/// flat form keeps cursor arithmetic trivial; the `(page, offset)` view is
/// always one accessor away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkAddr(u32);

impl ChunkAddr {
    /// Address of chunk `offset` within physical page `page`.
    pub fn new(page: usize, offset: usize) -> Self {
        debug_assert!(page < PAGE_COUNT);
        debug_assert!(offset < PAGE_CHUNKS);
        ChunkAddr((page * PAGE_CHUNKS + offset) as u32)
    }

    /// Physical page this address falls into.
    pub fn page(self) -> usize {
        self.0 as usize / PAGE_CHUNKS
    }

    /// Chunk offset within the page.
    pub fn offset(self) -> usize {
        self.0 as usize % PAGE_CHUNKS
    }

    /// Raw flat chunk index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A NOR-like block device: page-granular erase to all-ones, chunk-granular
/// programming that may only clear bits.
///
/// Programs and erases are synchronous; a power cut between two operations
/// is legal and is what the recovery path exists for.
pub trait Flash {
    /// Read one chunk. NOR reads are plain memory reads and cannot fail.
    fn read_chunk(&self, addr: ChunkAddr) -> Chunk;

    /// Program one chunk. The new value must be a bitwise subset of the
    /// current one; devices reject anything else with `FlashAssert` and
    /// report hardware faults as `FlashWrite`.
    fn write_chunk(&mut self, value: Chunk, addr: ChunkAddr) -> Result<()>;

    /// Erase a whole page back to all-ones. Fails with `FlashErase`.
    fn erase_page(&mut self, page: usize) -> Result<()>;

    /// Program a chunk to all-zeroes. Always a legal transition.
    fn zero_chunk(&mut self, addr: ChunkAddr) -> Result<()> {
        self.write_chunk(0, addr)
    }
}

impl<T: Flash> Flash for &mut T {
    fn read_chunk(&self, addr: ChunkAddr) -> Chunk {
        T::read_chunk(self, addr)
    }
    fn write_chunk(&mut self, value: Chunk, addr: ChunkAddr) -> Result<()> {
        T::write_chunk(self, value, addr)
    }
    fn erase_page(&mut self, page: usize) -> Result<()> {
        T::erase_page(self, page)
    }
}
