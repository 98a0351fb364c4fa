use std::alloc::{GlobalAlloc, Layout, System};
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::{BlockPoolBuilder, RawBlockPool, Result};

/// A pool of fixed-size slots for values of type `T`.
///
/// Storage is requested from the underlying allocator `A` in large blocks, each carved into as
/// many slots as fit. Released slots are recycled through an intrusive free list, with the most
/// recently released slot reused first, so steady-state allocation does not touch the underlying
/// allocator at all.
///
/// The pool deals in raw storage. [`allocate()`][1] hands out uninitialized slots, and the
/// caller decides when to [`construct()`][2] and [`destroy()`][3] values in them.
/// [`insert()`][4] and [`remove()`][5] combine both steps for the common case.
///
/// # Resource usage
///
/// Blocks are only returned to the underlying allocator when the pool is dropped. Dropping the
/// pool does not drop values that are still in slots, so destroy them first if they own
/// resources.
///
/// # Thread safety
///
/// The pool can be moved to another thread if `T` and the allocator can, but it cannot be shared
/// between threads without external synchronization.
///
/// # Examples
///
/// ```
/// use block_pool::BlockPool;
///
/// let mut pool = BlockPool::<String>::new();
///
/// let item = pool.insert("Hello".to_string()).unwrap();
///
/// // SAFETY: The item was inserted above and has not been removed.
/// assert_eq!(unsafe { item.as_ref() }, "Hello");
///
/// // SAFETY: The item came from this pool and is not used after this.
/// unsafe {
///     pool.remove(item);
/// }
/// ```
///
/// [1]: Self::allocate
/// [2]: Self::construct
/// [3]: Self::destroy
/// [4]: Self::insert
/// [5]: Self::remove
pub struct BlockPool<T, A: GlobalAlloc = System> {
    raw: RawBlockPool<A>,

    _item: PhantomData<T>,
}

impl<T> BlockPool<T> {
    /// Creates a new [`BlockPool`] with the default configuration.
    ///
    /// The pool starts empty and acquires its first block on the first allocation.
    ///
    /// # Panics
    ///
    /// Panics if the default block size cannot hold two slots of `T`.
    /// Use [`try_new()`](Self::try_new) to handle that as an error.
    #[must_use]
    pub fn new() -> Self {
        Self::try_new().unwrap_or_else(|error| {
            panic!(
                "cannot create a pool of {} with the default configuration: {error}",
                type_name::<T>()
            )
        })
    }

    /// Creates a new [`BlockPool`] with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockSizeTooSmall`][crate::Error::BlockSizeTooSmall] if the default
    /// block size cannot hold two slots of `T`.
    pub fn try_new() -> Result<Self> {
        Self::builder().build()
    }

    /// Starts building a new [`BlockPool`].
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    #[inline]
    pub fn builder() -> BlockPoolBuilder<T> {
        BlockPoolBuilder::new()
    }
}

impl<T> Default for BlockPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: GlobalAlloc> BlockPool<T, A> {
    pub(crate) fn new_inner(block_size: usize, allocator: A) -> Result<Self> {
        Ok(Self {
            raw: RawBlockPool::new_inner(Layout::new::<T>(), block_size, allocator)?,
            _item: PhantomData,
        })
    }

    /// The size in bytes of each block requested from the underlying allocator.
    #[must_use]
    #[inline]
    pub fn block_size(&self) -> usize {
        self.raw.block_size()
    }

    /// How many slots are carved out of each block.
    #[must_use]
    #[inline]
    pub fn slots_per_block(&self) -> usize {
        self.raw.slots_per_block()
    }

    /// The layout of a single slot, which may be larger than the layout of `T`.
    #[must_use]
    #[inline]
    pub fn slot_layout(&self) -> Layout {
        self.raw.slot_layout()
    }

    /// Hands out an uninitialized slot for a `T`.
    ///
    /// The pointer is aligned for `T` and valid for `size_of::<T>()` bytes until the slot is
    /// passed to [`deallocate()`](Self::deallocate) or the pool is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][crate::Error::OutOfMemory] if a new block is needed and
    /// the underlying allocator cannot supply one.
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::BlockPool;
    ///
    /// let mut pool = BlockPool::<u64>::new();
    ///
    /// let first = pool.allocate().unwrap();
    /// let second = pool.allocate().unwrap();
    /// assert_ne!(first, second);
    ///
    /// // SAFETY: The slot came from this pool and is not used after this.
    /// unsafe {
    ///     pool.deallocate(first.as_ptr());
    /// }
    ///
    /// // The most recently released slot is reused first.
    /// assert_eq!(pool.allocate().unwrap(), first);
    /// ```
    #[inline]
    pub fn allocate(&mut self) -> Result<NonNull<T>> {
        self.raw.allocate().map(NonNull::cast)
    }

    /// Returns a slot to the pool for reuse. A null pointer is ignored.
    ///
    /// This does not drop the value in the slot. Call [`destroy()`](Self::destroy) first if
    /// the slot holds a value that needs dropping.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `slot` is either null or was returned by
    /// [`allocate()`](Self::allocate) on this pool and has not been deallocated since.
    ///
    /// The caller must not access the slot after this call.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if `slot` is not currently allocated from this pool.
    #[inline]
    pub unsafe fn deallocate(&mut self, slot: *mut T) {
        // SAFETY: Forwarding the guarantees of our caller.
        unsafe {
            self.raw.deallocate(slot.cast());
        }
    }

    /// Moves `value` into an allocated slot.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `slot` was returned by [`allocate()`](Self::allocate) on this
    /// pool, has not been deallocated since and does not currently hold a value.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the slot is not allocated or already holds a value.
    #[inline]
    pub unsafe fn construct(&mut self, slot: NonNull<T>, value: T) -> NonNull<T> {
        // SAFETY: Forwarding the guarantees of our caller.
        unsafe { self.raw.construct(slot.cast(), value) }
    }

    /// Moves the value returned by `f` into an allocated slot.
    ///
    /// If `f` panics, the slot stays allocated and empty.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `slot` was returned by [`allocate()`](Self::allocate) on this
    /// pool, has not been deallocated since and does not currently hold a value.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the slot is not allocated or already holds a value.
    #[inline]
    pub unsafe fn construct_with(
        &mut self,
        slot: NonNull<T>,
        f: impl FnOnce() -> T,
    ) -> NonNull<T> {
        // SAFETY: Forwarding the guarantees of our caller.
        unsafe { self.raw.construct_with(slot.cast(), f) }
    }

    /// Drops the value in a slot in place. The slot stays allocated to the caller.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `item` holds a value constructed in this pool that has not
    /// been destroyed yet, and that the value is not used after this call.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the slot does not hold a value.
    #[inline]
    pub unsafe fn destroy(&mut self, item: NonNull<T>) {
        // SAFETY: Forwarding the guarantees of our caller.
        unsafe {
            self.raw.destroy(item);
        }
    }

    /// Allocates a slot and moves `value` into it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][crate::Error::OutOfMemory] if a new block is needed and
    /// the underlying allocator cannot supply one. The value is dropped in that case.
    pub fn insert(&mut self, value: T) -> Result<NonNull<T>> {
        let slot = self.allocate()?;

        // SAFETY: The slot was just allocated, so it is empty and owned by us.
        Ok(unsafe { self.construct(slot, value) })
    }

    /// Drops the value in a slot and returns the slot to the pool for reuse.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `item` holds a value constructed in this pool that has not
    /// been destroyed yet, and that neither the value nor the slot is used after this call.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the slot does not hold a value.
    pub unsafe fn remove(&mut self, item: NonNull<T>) {
        // SAFETY: Forwarding the guarantees of our caller.
        unsafe {
            self.destroy(item);
        }

        // SAFETY: The caller guarantees the slot came from this pool, and we just emptied it.
        unsafe {
            self.deallocate(item.as_ptr());
        }
    }
}

impl<T, A: GlobalAlloc> fmt::Debug for BlockPool<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("raw", &self.raw)
            .finish()
    }
}
