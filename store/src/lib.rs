//! NORKV: power-loss-safe key/value records on NOR flash
//!
//! A byte-addressable id/value store over a flash device whose cells only
//! program 1→0 and erase in page granularity. Records are appended to a
//! log of virtual pages; updates supersede, deletes tombstone in place,
//! and a compactor reclaims fragmented pages. A power cut at any point of
//! a write, delete or erase is repaired on the next mount without touching
//! committed records.
//!
//! The crate is `no_std` + `alloc`. The `std` feature (on by default)
//! carries the host-side `SimFlash` simulator and its file-backed
//! images; firmware builds disable default features so none of that
//! lands in the binary. The `norkv-append` feature (default) packs small
//! records into the tail page instead of opening a fresh page per write.
//!
//! ```no_run
//! use norkv::{SimFlash, Store};
//!
//! # fn main() -> norkv::Result<()> {
//! let mut store = Store::mount(SimFlash::new())?;
//! store.write(7, b"calibration")?;
//! let mut buf = [0u8; 64];
//! let n = store.read(7, &mut buf)?;
//! assert_eq!(&buf[..n], b"calibration");
//! store.delete(7)?;
//! # Ok(())
//! # }
//! ```

#![no_std]

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod config;
pub mod error;
pub mod flash;
pub mod layout;

mod cursor;
mod store;

pub use config::Chunk;
pub use error::{Error, Result};
pub use flash::{ChunkAddr, Flash};
pub use store::{PageStats, Store, StoreStats};

#[cfg(any(test, feature = "std"))]
pub use flash::SimFlash;

/// The store is single-writer; callers that share one across contexts
/// serialize through a mutex.
pub type SharedStore<F> = spin::Mutex<Store<F>>;
