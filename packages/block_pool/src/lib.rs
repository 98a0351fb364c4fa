#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-size object pool that amortizes allocation cost by requesting memory in large blocks.
//!
//! This crate provides [`BlockPool`], a pool of slots for values of one type. Slots are carved
//! out of fixed-size blocks obtained from an underlying allocator, and released slots are
//! recycled through an intrusive free list. Allocating and releasing a slot is O(1) and only
//! reaches the underlying allocator when the current block is exhausted and no released slot is
//! available.
//!
//! # Key Features
//!
//! - **Block-based storage**: Memory is acquired in blocks of a configurable size and all blocks
//!   are released together when the pool is dropped
//! - **LIFO reuse**: The most recently released slot is the next one handed out
//! - **Raw storage control**: Separate allocate/construct/destroy/deallocate steps, plus
//!   [`insert()`](BlockPool::insert) and [`remove()`](BlockPool::remove) for the common case
//! - **Pluggable allocator**: Blocks come from any [`std::alloc::GlobalAlloc`], by default
//!   [`std::alloc::System`]
//! - **Type-erased variant**: [`RawBlockPool`] works with any slot layout, and builders can be
//!   rebound to a different item type
//! - **Debug-build misuse detection**: Double releases, foreign pointers and construct/destroy
//!   out of order panic in debug builds instead of corrupting the pool
//!
//! # Examples
//!
//! ## Basic usage
//!
//! ```rust
//! use block_pool::BlockPool;
//!
//! let mut pool = BlockPool::<u64>::new();
//!
//! let item = pool.insert(42).unwrap();
//!
//! // SAFETY: The item was inserted above and has not been removed.
//! assert_eq!(unsafe { *item.as_ref() }, 42);
//!
//! // SAFETY: The item came from this pool and is not used after this.
//! unsafe {
//!     pool.remove(item);
//! }
//! ```
//!
//! ## Separate storage and value lifecycle
//!
//! ```rust
//! use block_pool::BlockPool;
//!
//! let mut pool = BlockPool::<String>::builder().block_size(1024).build().unwrap();
//!
//! let slot = pool.allocate().unwrap();
//!
//! // SAFETY: The slot was just allocated and is empty.
//! let item = unsafe { pool.construct(slot, "pooled".to_string()) };
//!
//! // SAFETY: The value was constructed above and is not used after this.
//! unsafe {
//!     pool.destroy(item);
//! }
//!
//! // SAFETY: The slot came from this pool and is now empty.
//! unsafe {
//!     pool.deallocate(slot.as_ptr());
//! }
//! ```
//!
//! # Safety model
//!
//! The pool does not track which slots hold values in release builds. Releasing a slot twice,
//! releasing a slot of another pool or constructing into an occupied slot is undefined
//! behavior, which is why those operations are `unsafe`. Debug builds tag every slot with its
//! lifecycle state and panic on such misuse.

mod builder;
mod error;
mod layout;
mod pool;
mod raw;
#[cfg(debug_assertions)]
mod tracker;

pub use builder::*;
pub use error::Error;
pub(crate) use error::Result;
pub(crate) use layout::*;
pub use pool::BlockPool;
pub use raw::RawBlockPool;
#[cfg(debug_assertions)]
pub(crate) use tracker::*;
