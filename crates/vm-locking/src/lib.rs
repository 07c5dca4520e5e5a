//! Access synchronization for an emulated 32-bit address space.
//!
//! Emulated CPU threads touch guest memory constantly, while a few administrative operations
//! (mapping, unmapping, protection changes, code invalidation) must occasionally exclude them. This
//! crate keeps the common case to a handful of uncontended atomics:
//!
//! - [`RangeSlot`] / [`Accessor::range_lock`]: optimistic per-access range locks. An accessor
//!   publishes the range it is about to touch in its own cache line and re-checks the global lock
//!   word; only a conflict takes the cold path.
//! - [`Accessor::passive_lock`]: long-lived registration of a CPU thread as a memory reader. Whole
//!   space writers ask registered readers to yield through [`AccessorFlags::MEMORY`] and wait until
//!   they do.
//! - [`ReaderLock`] / [`WriterLock`]: scoped shared and administrative locks over the whole space
//!   or one range.
//!
//! # Global lock word
//!
//! ```text
//!  63                     35 34   32 31                        0
//! +-------------------------+-------+---------------------------+
//! |          size           | kind  |           begin           |
//! +-------------------------+-------+---------------------------+
//! ```
//!
//! A size of zero means no administrative lock is installed; a size of all ones covers the whole
//! address space. Only [`LockKind::Locked`] blocks the fast path. `Locked` words over a shareable
//! chunk store their begin folded to the low 16 bits, and accessors fold their own address before
//! comparing, so aliases of one shared block collide.

mod admin;
mod config;
mod error;
mod guard;
mod registry;
mod shareable;
mod slot;
mod space;
mod stats;
mod sync;
mod word;

pub use config::{AddressSpaceConfig, DEFAULT_WRITER_GRANULE, MAX_WRITER_GRANULE};
pub use error::{ConfigError, LockError};
pub use guard::{RangeLockGuard, RangeSlotHandle, ReaderLock, WriterLock};
pub use registry::{Accessor, AccessorFlags};
pub use shareable::{ShareableTable, CHUNK_SHIFT, CHUNK_SIZE, FOLD_MASK};
pub use slot::{RangeSlot, STALL_MASK};
pub use space::AddressSpace;
pub use stats::LockStatsSnapshot;
pub use word::{
    AddressRange, GlobalLockWord, LockKind, LockWord, ADDRESS_SPACE_END, RANGE_KIND_MASK,
    RANGE_KIND_SHIFT, RANGE_SIZE_MAX, RANGE_SIZE_SHIFT, RANGE_SIZE_WHOLE,
};

#[cfg(all(test, not(feature = "loom")))]
mod proptests;
