//! NORKV Flash Geometry & Tuning
//!
//! Every size in the store is fixed at compile time: the flash region is a
//! linker/board property, not something to discover at runtime. All derived
//! values below follow from `PAGE_SIZE`, `PAGE_COUNT` and the chunk width.

/// The minimum program unit of the flash. The checksum XOR and all on-flash
/// fields follow this width.
pub type Chunk = u16;

/// Bytes per chunk.
pub const CHUNK_SIZE: usize = core::mem::size_of::<Chunk>();

/// Bytes per page (the minimum erase unit).
pub const PAGE_SIZE: usize = 1024;

/// Number of physical pages owned by the store.
pub const PAGE_COUNT: usize = 128;

/// Chunks per page.
pub const PAGE_CHUNKS: usize = PAGE_SIZE / CHUNK_SIZE;

/// The page header occupies the first two chunks: status word, then the
/// virtual number.
pub const HEADER_CHUNKS: usize = 2;

/// Header bytes.
pub const HEADER_SIZE: usize = HEADER_CHUNKS * CHUNK_SIZE;

/// Chunks of record area per page.
pub const DATA_CHUNKS: usize = PAGE_CHUNKS - HEADER_CHUNKS;

/// Bytes of record area per page. Fragments + free space + live bytes of a
/// page always sum to this.
pub const USABLE_BYTES: usize = DATA_CHUNKS * CHUNK_SIZE;

/// Freshly erased page: every chunk reads back as all ones.
pub const STATUS_ERASED: Chunk = 0xFFFF;

/// Page is part of a write in flight. `0xAAAA` is a strict bit-subset of
/// `0xFFFF`, so the transition needs no erase.
pub const STATUS_RECEIVING: Chunk = 0xAAAA;

/// Page holds committed records. `0x0000` is a strict bit-subset of
/// `0xAAAA`.
pub const STATUS_VALID: Chunk = 0x0000;

/// An unwritten chunk in the record area.
pub const FREE_CHUNK: Chunk = 0xFFFF;

/// A tombstoned chunk in the record area.
pub const TOMBSTONE_CHUNK: Chunk = 0x0000;

/// Highest virtual number a page may carry. The counter starts at 0 and
/// never wraps; allocating past this value means the flash has reached its
/// end of life.
pub const MAX_VIRT: Chunk = 0xFFFE;

/// Exclusive upper bound for record ids. Id 0 is reserved for tombstones,
/// id `0xFFFF` would be indistinguishable from a free chunk.
pub const MAX_ID: Chunk = 0xFFFF;

/// Exclusive upper bound for payload byte length.
pub const MAX_LEN: usize = 0xFFFF;

/// A page is compacted once its tombstoned bytes reach
/// `USABLE_BYTES / GC_FRAG_DIVISOR`.
pub const GC_FRAG_DIVISOR: usize = 2;
