use std::alloc::{GlobalAlloc, Layout, System};
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use crate::{BlockPool, RawBlockPool, Result};

/// The block size used unless a builder specifies otherwise.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Builder for creating an instance of [`BlockPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`BlockPool::new()`][1] is sufficient for most use cases.
///
/// # Examples
///
/// ```
/// use block_pool::BlockPool;
///
/// let pool = BlockPool::<u32>::builder().block_size(256).build().unwrap();
///
/// assert_eq!(pool.block_size(), 256);
/// ```
///
/// [1]: BlockPool::new
#[must_use]
pub struct BlockPoolBuilder<T, A: GlobalAlloc = System> {
    block_size: usize,
    allocator: A,

    _item: PhantomData<fn() -> T>,
}

impl<T, A: GlobalAlloc> fmt::Debug for BlockPoolBuilder<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("block_size", &self.block_size)
            .field("allocator", &format_args!("{}", type_name::<A>()))
            .finish()
    }
}

impl<T> BlockPoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            allocator: System,
            _item: PhantomData,
        }
    }
}

impl<T, A: GlobalAlloc> BlockPoolBuilder<T, A> {
    /// Sets the size in bytes of each block the pool requests from the underlying allocator.
    ///
    /// A block must be large enough to hold at least two slots, which is verified by
    /// [`build()`](Self::build).
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::BlockPool;
    ///
    /// let pool = BlockPool::<u64>::builder().block_size(64).build().unwrap();
    ///
    /// assert_eq!(pool.slots_per_block(), 7);
    /// ```
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the allocator from which the pool acquires its blocks.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::System;
    ///
    /// use block_pool::BlockPool;
    ///
    /// let pool = BlockPool::<u64>::builder().allocator(System).build().unwrap();
    /// ```
    pub fn allocator<B: GlobalAlloc>(self, allocator: B) -> BlockPoolBuilder<T, B> {
        BlockPoolBuilder {
            block_size: self.block_size,
            allocator,
            _item: PhantomData,
        }
    }

    /// Carries the configuration over to a pool of another item type.
    ///
    /// The block size is validated against the new item type when the pool is built.
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::BlockPool;
    ///
    /// let words = BlockPool::<u64>::builder().block_size(512);
    /// let strings = words.rebind::<String>().build().unwrap();
    ///
    /// assert_eq!(strings.block_size(), 512);
    /// ```
    pub fn rebind<U>(self) -> BlockPoolBuilder<U, A> {
        BlockPoolBuilder {
            block_size: self.block_size,
            allocator: self.allocator,
            _item: PhantomData,
        }
    }

    /// Builds the pool with the specified configuration.
    ///
    /// No memory is acquired until the first slot is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockSizeTooSmall`][crate::Error::BlockSizeTooSmall] if a block
    /// cannot hold at least two slots for `T`.
    ///
    /// Returns [`Error::InvalidLayout`][crate::Error::InvalidLayout] if the block size cannot
    /// be represented as a memory layout.
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::{BlockPool, Error};
    ///
    /// let result = BlockPool::<u64>::builder().block_size(8).build();
    ///
    /// assert!(matches!(result, Err(Error::BlockSizeTooSmall { .. })));
    /// ```
    pub fn build(self) -> Result<BlockPool<T, A>> {
        BlockPool::new_inner(self.block_size, self.allocator)
    }
}

/// Builder for creating an instance of [`RawBlockPool`].
///
/// [`RawBlockPool`] requires the slot layout to be specified at construction time.
/// Use either `.layout()` to provide a specific layout or `.layout_of::<T>()` to generate
/// a layout based on the provided type.
///
/// The layout is mandatory, whereas other settings are optional.
///
/// # Examples
///
/// ```
/// use std::alloc::Layout;
///
/// use block_pool::RawBlockPool;
///
/// let layout = Layout::from_size_align(48, 16).unwrap();
/// let pool = RawBlockPool::builder().layout(layout).build().unwrap();
///
/// assert_eq!(pool.slot_layout(), layout);
/// ```
#[must_use]
pub struct RawBlockPoolBuilder<A: GlobalAlloc = System> {
    item_layout: Option<Layout>,
    block_size: usize,
    allocator: A,
}

impl<A: GlobalAlloc> fmt::Debug for RawBlockPoolBuilder<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBlockPoolBuilder")
            .field("item_layout", &self.item_layout)
            .field("block_size", &self.block_size)
            .field("allocator", &format_args!("{}", type_name::<A>()))
            .finish()
    }
}

impl RawBlockPoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            item_layout: None,
            block_size: DEFAULT_BLOCK_SIZE,
            allocator: System,
        }
    }
}

impl<A: GlobalAlloc> RawBlockPoolBuilder<A> {
    /// Sets the memory layout of the items that the slots must be able to hold.
    pub fn layout(mut self, layout: Layout) -> Self {
        self.item_layout = Some(layout);
        self
    }

    /// Sets the memory layout of the items that the slots must be able to hold based on a type.
    pub fn layout_of<T>(mut self) -> Self {
        self.item_layout = Some(Layout::new::<T>());
        self
    }

    /// Sets the size in bytes of each block the pool requests from the underlying allocator.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the allocator from which the pool acquires its blocks.
    pub fn allocator<B: GlobalAlloc>(self, allocator: B) -> RawBlockPoolBuilder<B> {
        RawBlockPoolBuilder {
            item_layout: self.item_layout,
            block_size: self.block_size,
            allocator,
        }
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockSizeTooSmall`][crate::Error::BlockSizeTooSmall] if a block
    /// cannot hold at least two slots.
    ///
    /// Returns [`Error::InvalidLayout`][crate::Error::InvalidLayout] if the slot or block
    /// layout cannot be represented.
    ///
    /// # Panics
    ///
    /// Panics if no layout has been set using either [`layout`](Self::layout) or
    /// [`layout_of`](Self::layout_of).
    pub fn build(self) -> Result<RawBlockPool<A>> {
        let layout = self.item_layout.expect(
            "Layout must be set using .layout() or .layout_of::<T>() before calling .build()",
        );

        RawBlockPool::new_inner(layout, self.block_size, self.allocator)
    }
}
