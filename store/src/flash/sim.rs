//! NORKV Simulated Flash
//!
//! A `Vec`-backed flash region with the same program/erase rules as the
//! real device: erase to all-ones, chunk programs that may only clear bits.
//! Used by the test suites and by `norkvctl` against file-backed images.
//!
//! The simulator also carries:
//! - operation counters (programs, erases) for wear assertions,
//! - a fault budget: `fail_after(n)` makes the n-th following program or
//!   erase report a device fault, cutting an operation short at a flash-op
//!   boundary the way a power loss would.

use alloc::vec;
use alloc::vec::Vec;

use crate::config::{Chunk, PAGE_CHUNKS, PAGE_COUNT, STATUS_ERASED};
use crate::error::{Error, Result};
use crate::flash::{ChunkAddr, Flash};

/// In-memory flash region.
#[derive(Clone)]
pub struct SimFlash {
    /// Raw chunks, public so golden-image builders can poke them directly.
    pub data: Vec<Chunk>,
    /// Chunk programs performed.
    pub programs: usize,
    /// Page erases performed.
    pub erases: usize,
    /// Remaining operations before an injected fault; `None` = no fault.
    budget: Option<usize>,
}

impl SimFlash {
    /// A blank region, fully erased.
    pub fn new() -> Self {
        SimFlash {
            data: vec![STATUS_ERASED; PAGE_COUNT * PAGE_CHUNKS],
            programs: 0,
            erases: 0,
            budget: None,
        }
    }

    /// Inject a fault: the next `ops` programs/erases succeed, everything
    /// after fails with the device error until [`clear_fault`] is called.
    ///
    /// [`clear_fault`]: SimFlash::clear_fault
    pub fn fail_after(&mut self, ops: usize) {
        self.budget = Some(ops);
    }

    /// Remove an injected fault.
    pub fn clear_fault(&mut self) {
        self.budget = None;
    }

    pub fn reset_counters(&mut self) {
        self.programs = 0;
        self.erases = 0;
    }

    fn spend(&mut self, err: Error) -> Result<()> {
        match self.budget {
            Some(0) => Err(err),
            Some(ref mut n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Default for SimFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl Flash for SimFlash {
    fn read_chunk(&self, addr: ChunkAddr) -> Chunk {
        self.data[addr.index()]
    }

    fn write_chunk(&mut self, value: Chunk, addr: ChunkAddr) -> Result<()> {
        self.spend(Error::FlashWrite)?;
        let cur = self.data[addr.index()];
        if value & !cur != 0 {
            return Err(Error::FlashAssert);
        }
        self.data[addr.index()] = value;
        self.programs += 1;
        Ok(())
    }

    fn erase_page(&mut self, page: usize) -> Result<()> {
        self.spend(Error::FlashErase)?;
        debug_assert!(page < PAGE_COUNT);
        let base = page * PAGE_CHUNKS;
        self.data[base..base + PAGE_CHUNKS].fill(STATUS_ERASED);
        self.erases += 1;
        Ok(())
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        use std::fs;
        use std::io;
        use std::path::Path;

        use alloc::format;

        use crate::config::{CHUNK_SIZE, PAGE_SIZE};

        impl SimFlash {
            /// Load a raw little-endian image file. The file must be exactly
            /// `PAGE_COUNT * PAGE_SIZE` bytes.
            pub fn from_image_file(path: &Path) -> io::Result<Self> {
                let bytes = fs::read(path)?;
                if bytes.len() != PAGE_COUNT * PAGE_SIZE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "image is {} bytes, expected {}",
                            bytes.len(),
                            PAGE_COUNT * PAGE_SIZE
                        ),
                    ));
                }
                let mut flash = SimFlash::new();
                for (i, chunk) in flash.data.iter_mut().enumerate() {
                    let b = i * CHUNK_SIZE;
                    *chunk = Chunk::from_le_bytes([bytes[b], bytes[b + 1]]);
                }
                Ok(flash)
            }

            /// Write the region back out as a raw little-endian image.
            pub fn save_image_file(&self, path: &Path) -> io::Result<()> {
                let mut bytes = Vec::with_capacity(PAGE_COUNT * PAGE_SIZE);
                for chunk in &self.data {
                    bytes.extend_from_slice(&chunk.to_le_bytes());
                }
                fs::write(path, bytes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_fills_ones() {
        let mut f = SimFlash::new();
        f.data[5] = 0x1234;
        f.erase_page(0).unwrap();
        assert_eq!(f.data[5], 0xFFFF);
        assert_eq!(f.erases, 1);
    }

    #[test]
    fn program_clears_bits_only() {
        let mut f = SimFlash::new();
        let a = ChunkAddr::new(0, 10);
        f.write_chunk(0xAAAA, a).unwrap();
        assert_eq!(f.read_chunk(a), 0xAAAA);
        // clearing further is fine
        f.write_chunk(0x0000, a).unwrap();
        // raising bits is not
        assert_eq!(f.write_chunk(0x0001, a), Err(Error::FlashAssert));
    }

    #[test]
    fn fault_budget_cuts_at_op_boundary() {
        let mut f = SimFlash::new();
        f.fail_after(1);
        f.write_chunk(0x00FF, ChunkAddr::new(0, 2)).unwrap();
        assert_eq!(
            f.write_chunk(0x00FF, ChunkAddr::new(0, 3)),
            Err(Error::FlashWrite)
        );
        assert_eq!(f.erase_page(1), Err(Error::FlashErase));
        // the failed ops left no trace
        assert_eq!(f.read_chunk(ChunkAddr::new(0, 3)), 0xFFFF);
        f.clear_fault();
        f.write_chunk(0x00FF, ChunkAddr::new(0, 3)).unwrap();
    }
}
