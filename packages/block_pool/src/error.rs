use std::alloc::LayoutError;
use std::result;

use thiserror::Error;

/// Errors that can occur when creating a pool or acquiring storage from it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The configured block size cannot hold at least two slots, so no usable block
    /// layout exists for the requested slot layout.
    #[error(
        "block size {block_size} is too small for slots of {slot_size} bytes - at least {minimum} bytes are required"
    )]
    BlockSizeTooSmall {
        /// The block size that was requested.
        block_size: usize,

        /// The size of a single slot, including padding and the room for a free list link.
        slot_size: usize,

        /// The smallest block size that would have been accepted.
        minimum: usize,
    },

    /// The slot or block layout cannot be represented on this platform, e.g. because the
    /// block size overflows when rounded up to the required alignment.
    #[error("invalid memory layout: {0}")]
    InvalidLayout(#[from] LayoutError),

    /// The underlying allocator could not supply a new block.
    #[error("the underlying allocator failed to supply a block of {block_size} bytes")]
    OutOfMemory {
        /// Size of the block that could not be acquired.
        block_size: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = result::Result<T, Error>;
