//! NORKV Page Layout Codec
//!
//! The single source of truth for what bytes on a page mean: the two-chunk
//! header (status word + virtual number), record geometry, and the packing
//! of payload bytes into chunks.
//!
//! A record in the record area is
//!
//! ```text
//! [id: 1 chunk] [length: 1 chunk] [payload: ceil(length/2) chunks] [xor: 1 chunk]
//! ```
//!
//! with `xor = id ^ length ^ payload chunks`. When a record spans pages,
//! every continuation page repeats the id in its first record-area chunk;
//! the first page additionally carries the length, the last the checksum.

use crate::config::*;
use crate::error::Result;
use crate::flash::{ChunkAddr, Flash};

/// Chunk offset of the status word within a page.
pub const STATUS_OFFSET: usize = 0;
/// Chunk offset of the virtual number within a page.
pub const VIRT_OFFSET: usize = 1;

pub fn page_status<F: Flash>(flash: &F, phys: usize) -> Chunk {
    flash.read_chunk(ChunkAddr::new(phys, STATUS_OFFSET))
}

pub fn page_virt<F: Flash>(flash: &F, phys: usize) -> Chunk {
    flash.read_chunk(ChunkAddr::new(phys, VIRT_OFFSET))
}

pub fn set_status<F: Flash>(flash: &mut F, phys: usize, status: Chunk) -> Result<()> {
    flash.write_chunk(status, ChunkAddr::new(phys, STATUS_OFFSET))
}

pub fn set_virt<F: Flash>(flash: &mut F, phys: usize, virt: Chunk) -> Result<()> {
    flash.write_chunk(virt, ChunkAddr::new(phys, VIRT_OFFSET))
}

/// Chunks needed to hold `len` payload bytes.
pub fn chunks_for(len: usize) -> usize {
    (len + CHUNK_SIZE - 1) / CHUNK_SIZE
}

/// Total record-area chunks a record occupies when laid out contiguously in
/// one page: id + length + payload + checksum.
pub fn record_chunks(len: usize) -> usize {
    chunks_for(len) + 3
}

/// Pages a fresh chain for `len` payload bytes needs.
///
/// Every page of the chain reserves one chunk for the id (first page) or
/// the repeated linkage id (continuations); the stream itself is the length
/// chunk, the payload chunks and the checksum chunk.
pub fn pages_for(len: usize) -> usize {
    let stream = chunks_for(len) + 2;
    let per_page = DATA_CHUNKS - 1;
    let pages = (stream + per_page - 1) / per_page;
    pages.max(1)
}

/// Pack payload bytes into chunks, low byte first within each chunk. The
/// final chunk of an odd-length payload is padded with zeroes in its high
/// bytes.
pub fn pack_chunk(data: &[u8], chunk_idx: usize) -> Chunk {
    let mut acc: Chunk = 0;
    for s in 0..CHUNK_SIZE {
        let i = chunk_idx * CHUNK_SIZE + s;
        if i < data.len() {
            acc |= (data[i] as Chunk) << (s * 8);
        }
    }
    acc
}

/// Unpack one chunk into up to `CHUNK_SIZE` payload bytes, low byte first,
/// truncated to the bytes the record still owes.
pub fn unpack_chunk(chunk: Chunk, out: &mut [u8]) {
    for (s, byte) in out.iter_mut().enumerate().take(CHUNK_SIZE) {
        *byte = (chunk >> (s * 8)) as u8;
    }
}

/// Bytes of contiguous trailing `0xFFFF` in a page's record area.
///
/// This is a raw scan with no record semantics; it is only meaningful when
/// comparing two crash-sibling pages that claim the same virtual number,
/// where "less free space" identifies the more-written copy.
pub fn free_tail_bytes<F: Flash>(flash: &F, phys: usize) -> usize {
    let mut free = 0;
    for offset in (HEADER_CHUNKS..PAGE_CHUNKS).rev() {
        if flash.read_chunk(ChunkAddr::new(phys, offset)) != FREE_CHUNK {
            break;
        }
        free += CHUNK_SIZE;
    }
    free
}
