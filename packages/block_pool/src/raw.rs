use std::alloc::{GlobalAlloc, Layout, System};
use std::any::type_name;
use std::fmt;
use std::ptr::{self, NonNull};

use tracing::debug;

use crate::{BlockLayout, Error, RawBlockPoolBuilder, Result};
#[cfg(debug_assertions)]
use crate::{LINK_SIZE, SlotTracker};

/// Byte pattern written over released slots in debug builds, past the free list link.
#[cfg(debug_assertions)]
const POISON: u8 = 0xDD;

/// The leading word of every block, pointing to the block acquired before it.
type BlockLink = Option<NonNull<u8>>;

/// The storage of a released slot, reinterpreted as a link in the free list.
#[repr(C)]
struct FreeSlot {
    next: Option<NonNull<Self>>,
}

/// A fixed-size slot pool that does not know the type of the values stored in it.
///
/// The pool is configured with a slot layout and hands out raw, uninitialized slots that fit
/// that layout. Slots are carved out of large blocks obtained from the underlying allocator `A`
/// and released slots are recycled in LIFO order through an intrusive free list.
///
/// Blocks are never returned to the underlying allocator before the pool itself is dropped.
/// Dropping the pool releases all blocks but does not drop any values still in the slots.
///
/// Use [`BlockPool`][crate::BlockPool] if the pool only stores values of a single type.
///
/// # Examples
///
/// ```
/// use block_pool::RawBlockPool;
///
/// let mut pool = RawBlockPool::builder().layout_of::<u64>().build().unwrap();
///
/// let slot = pool.allocate().unwrap();
///
/// // SAFETY: The slot was just allocated from this pool and u64 matches its layout.
/// let value = unsafe { pool.construct(slot, 42_u64) };
///
/// // SAFETY: The value was constructed above and is not used after this.
/// unsafe {
///     pool.destroy(value);
/// }
///
/// // SAFETY: The slot came from this pool and has not been released yet.
/// unsafe {
///     pool.deallocate(slot.as_ptr());
/// }
/// ```
pub struct RawBlockPool<A: GlobalAlloc = System> {
    layout: BlockLayout,

    allocator: A,

    /// The most recently acquired block, if any. The blocks form a chain through their leading
    /// words, which is only ever walked when the pool is dropped.
    newest_block: BlockLink,

    /// Offset of the next uncarved slot in the newest block. Equal to `bump_limit` when the
    /// newest block has been fully carved or when there is no block yet.
    bump_cursor: usize,

    /// Offset just past the last slot of the newest block.
    bump_limit: usize,

    /// Head of the intrusive free list. The most recently released slot is reused first.
    free_list: Option<NonNull<FreeSlot>>,

    #[cfg(debug_assertions)]
    tracker: SlotTracker,
}

impl RawBlockPool {
    /// Starts building a new [`RawBlockPool`].
    ///
    /// The slot layout must be specified via the builder before building the pool.
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::RawBlockPool;
    ///
    /// let pool = RawBlockPool::builder()
    ///     .layout_of::<[u32; 4]>()
    ///     .block_size(1024)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.block_size(), 1024);
    /// ```
    #[inline]
    pub fn builder() -> RawBlockPoolBuilder {
        RawBlockPoolBuilder::new()
    }
}

impl<A: GlobalAlloc> RawBlockPool<A> {
    pub(crate) fn new_inner(item_layout: Layout, block_size: usize, allocator: A) -> Result<Self> {
        let layout = BlockLayout::new(item_layout, block_size)?;

        Ok(Self {
            layout,
            allocator,
            newest_block: None,
            bump_cursor: 0,
            bump_limit: 0,
            free_list: None,
            #[cfg(debug_assertions)]
            tracker: SlotTracker::new(),
        })
    }

    /// The layout of a single slot.
    ///
    /// The slot is at least as large and as aligned as the layout the pool was configured with,
    /// and never smaller than a pointer.
    #[must_use]
    #[inline]
    pub fn slot_layout(&self) -> Layout {
        self.layout.slot_layout()
    }

    /// The size in bytes of each block requested from the underlying allocator.
    #[must_use]
    #[inline]
    pub fn block_size(&self) -> usize {
        self.layout.block_size()
    }

    /// How many slots are carved out of each block.
    #[must_use]
    #[inline]
    pub fn slots_per_block(&self) -> usize {
        self.layout.slots_per_block().get()
    }

    /// Hands out an uninitialized slot that fits the slot layout of the pool.
    ///
    /// The most recently released slot is reused first. If no released slot is available, the
    /// next uncarved slot of the current block is used, acquiring a new block from the
    /// underlying allocator if the current block is exhausted.
    ///
    /// The slot remains owned by the caller until it is passed to
    /// [`deallocate()`](Self::deallocate) or the pool is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if a new block is needed and the underlying allocator
    /// cannot supply one.
    pub fn allocate(&mut self) -> Result<NonNull<u8>> {
        let slot = match self.free_list {
            Some(head) => {
                // SAFETY: Every slot on the free list had a link written into it when it was
                // released and nothing else writes to a slot while it is on the free list.
                self.free_list = unsafe { head.as_ptr().read() }.next;

                head.cast::<u8>()
            }
            None => self.carve()?,
        };

        #[cfg(debug_assertions)]
        self.tracker.allocated(slot);

        Ok(slot)
    }

    #[cfg_attr(test, mutants::skip)] // Can be mutated to carve slots past the end of a block.
    fn carve(&mut self) -> Result<NonNull<u8>> {
        if self.bump_cursor >= self.bump_limit {
            self.acquire_block()?;
        }

        let block = self
            .newest_block
            .expect("a block is always present once the bump cursor is below the limit");

        // SAFETY: The cursor is below the limit, so a whole slot lies between the cursor and
        // the end of the block.
        let slot = unsafe { block.add(self.bump_cursor) };

        self.bump_cursor = self
            .bump_cursor
            .checked_add(self.layout.slot_size())
            .expect("the cursor never moves past the end of a valid block layout");

        Ok(slot)
    }

    #[cold]
    fn acquire_block(&mut self) -> Result<()> {
        let block_layout = self.layout.block_layout();

        // SAFETY: The block layout is never zero-sized because it holds at least two slots.
        let block = NonNull::new(unsafe { self.allocator.alloc(block_layout) }).ok_or_else(|| {
            Error::OutOfMemory {
                block_size: block_layout.size(),
            }
        })?;

        // SAFETY: The block is at least pointer-aligned and larger than a pointer.
        unsafe {
            block.cast::<BlockLink>().write(self.newest_block);
        }

        self.newest_block = Some(block);
        self.bump_cursor = self.layout.first_slot_offset();
        self.bump_limit = self.layout.slots_end_offset();

        debug!(
            block_size = block_layout.size(),
            slots_per_block = self.layout.slots_per_block().get(),
            "acquired block"
        );

        Ok(())
    }

    /// Returns a slot to the pool for reuse. A null pointer is ignored.
    ///
    /// The slot storage is overwritten with free list bookkeeping. Any value still in the slot
    /// is not dropped, so it is leaked unless it was destroyed first.
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
    pub unsafe fn deallocate(&mut self, slot: *mut u8) {
        let Some(slot) = NonNull::new(slot) else {
            return;
        };

        #[cfg(debug_assertions)]
        self.release_and_poison(slot);

        let free_slot = slot.cast::<FreeSlot>();

        // SAFETY: The caller guarantees the slot came from this pool, so it is large enough and
        // sufficiently aligned for a free list link, and that nobody else is using it anymore.
        unsafe {
            free_slot.write(FreeSlot {
                next: self.free_list,
            });
        }

        self.free_list = Some(free_slot);
    }

    #[cfg(debug_assertions)]
    fn release_and_poison(&mut self, slot: NonNull<u8>) {
        self.tracker.released(slot);

        let poison_len = self
            .layout
            .slot_size()
            .checked_sub(LINK_SIZE)
            .expect("slots are never smaller than a link");

        // SAFETY: The tracker confirmed the slot is owned by this pool. The bytes past the link
        // are inside the slot because slots are never smaller than a link.
        let tail = unsafe { slot.add(LINK_SIZE) };

        // SAFETY: See above, the range lies within the slot.
        unsafe {
            ptr::write_bytes(tail.as_ptr(), POISON, poison_len);
        }
    }

    /// Moves `value` into the slot and returns a typed pointer to it.
    ///
    /// This does not touch the state of the pool itself beyond debug bookkeeping.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `slot` was returned by [`allocate()`](Self::allocate) on this
    /// pool, has not been deallocated since and does not currently hold a value.
    ///
    /// # Panics
    ///
    /// Panics if `U` does not fit the slot layout of the pool.
    ///
    /// In debug builds, panics if the slot is not allocated or already holds a value.
    pub unsafe fn construct<U>(&mut self, slot: NonNull<u8>, value: U) -> NonNull<U> {
        // SAFETY: Forwarding the guarantees of our caller.
        unsafe { self.construct_with(slot, || value) }
    }

    /// Moves the value returned by `f` into the slot and returns a typed pointer to it.
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
    /// Panics if `U` does not fit the slot layout of the pool.
    ///
    /// In debug builds, panics if the slot is not allocated or already holds a value.
    pub unsafe fn construct_with<U>(
        &mut self,
        slot: NonNull<u8>,
        f: impl FnOnce() -> U,
    ) -> NonNull<U> {
        assert!(
            self.layout.fits(Layout::new::<U>()),
            "{} does not fit into slots with layout {:?}",
            type_name::<U>(),
            self.layout.slot_layout()
        );

        #[cfg(debug_assertions)]
        self.tracker.assert_constructible(slot);

        let value = f();
        let target = slot.cast::<U>();

        // SAFETY: The slot is owned by the caller, unoccupied, and we checked above that it is
        // large enough and sufficiently aligned for U.
        unsafe {
            target.write(value);
        }

        #[cfg(debug_assertions)]
        self.tracker.constructed(slot);

        target
    }

    /// Drops the value in the slot in place. The slot stays allocated to the caller.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `value` points to a value previously placed into a slot of
    /// this pool via [`construct()`](Self::construct) or [`construct_with()`](Self::construct_with)
    /// that has not been destroyed yet, and that the value is not used after this call.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the slot does not hold a value.
    pub unsafe fn destroy<U>(&mut self, value: NonNull<U>) {
        #[cfg(debug_assertions)]
        self.tracker.destroyed(value.cast());

        // SAFETY: The caller guarantees the slot holds a live U that nobody else uses.
        unsafe {
            ptr::drop_in_place(value.as_ptr());
        }
    }
}

impl<A: GlobalAlloc> Drop for RawBlockPool<A> {
    #[cfg_attr(test, mutants::skip)] // Can be mutated to an infinite loop over the block chain.
    fn drop(&mut self) {
        let block_layout = self.layout.block_layout();
        let mut released_blocks: usize = 0;

        let mut next = self.newest_block.take();

        while let Some(block) = next {
            // The link must be read before the memory holding it is released.
            // SAFETY: Every block had its link written when it was acquired.
            next = unsafe { block.cast::<BlockLink>().read() };

            // SAFETY: The block was allocated by this allocator with this layout and we are
            // the only owner. Values still in the slots are not dropped, which is allowed.
            unsafe {
                self.allocator.dealloc(block.as_ptr(), block_layout);
            }

            released_blocks = released_blocks.wrapping_add(1);
        }

        if released_blocks > 0 {
            debug!(
                blocks = released_blocks,
                block_size = block_layout.size(),
                "released all blocks"
            );
        }
    }
}

impl<A: GlobalAlloc> fmt::Debug for RawBlockPool<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBlockPool")
            .field("layout", &self.layout)
            .field("allocator", &format_args!("{}", type_name::<A>()))
            .field("newest_block", &self.newest_block)
            .field("bump_cursor", &self.bump_cursor)
            .field("bump_limit", &self.bump_limit)
            .field("free_list", &self.free_list)
            .finish_non_exhaustive()
    }
}

// SAFETY: The pool exclusively owns its blocks and holds no values of its own, so nothing
// prevents it from moving between threads as long as the allocator can.
unsafe impl<A: GlobalAlloc + Send> Send for RawBlockPool<A> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::LINK_SIZE;

    assert_impl_all!(RawBlockPool: Send, fmt::Debug);
    assert_not_impl_any!(RawBlockPool: Sync);

    fn words_pool(block_size: usize) -> RawBlockPool {
        RawBlockPool::builder()
            .layout_of::<u64>()
            .block_size(block_size)
            .build()
            .unwrap()
    }

    #[test]
    fn smoke_test() {
        let mut pool = words_pool(64);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        // SAFETY: Slots come from this pool and are empty.
        let a_value = unsafe { pool.construct(a, 1_u64) };
        // SAFETY: Slots come from this pool and are empty.
        let b_value = unsafe { pool.construct(b, 2_u64) };

        // SAFETY: Values were constructed above.
        unsafe {
            assert_eq!(a_value.read(), 1);
        }
        // SAFETY: Values were constructed above.
        unsafe {
            assert_eq!(b_value.read(), 2);
        }

        // SAFETY: Values were constructed above and are not used afterwards.
        unsafe {
            pool.destroy(a_value);
        }
        // SAFETY: Values were constructed above and are not used afterwards.
        unsafe {
            pool.destroy(b_value);
        }
        // SAFETY: Slots come from this pool.
        unsafe {
            pool.deallocate(a.as_ptr());
        }
        // SAFETY: Slots come from this pool.
        unsafe {
            pool.deallocate(b.as_ptr());
        }
    }

    #[test]
    fn new_pool_has_no_block() {
        let pool = words_pool(64);

        assert!(pool.newest_block.is_none());
        assert!(pool.free_list.is_none());
        assert_eq!(pool.bump_cursor, pool.bump_limit);
    }

    #[test]
    fn carving_is_sequential() {
        let mut pool = words_pool(64);

        let first = pool.allocate().unwrap();
        let second = pool.allocate().unwrap();

        let block = pool.newest_block.unwrap();

        assert_eq!(first.addr().get() - block.addr().get(), 8);
        assert_eq!(second.addr().get() - first.addr().get(), 8);
    }

    #[test]
    fn free_list_is_lifo() {
        let mut pool = words_pool(64);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        // SAFETY: Slots come from this pool and are released once each.
        unsafe {
            pool.deallocate(a.as_ptr());
        }
        // SAFETY: As above.
        unsafe {
            pool.deallocate(c.as_ptr());
        }
        // SAFETY: As above.
        unsafe {
            pool.deallocate(b.as_ptr());
        }

        assert_eq!(pool.allocate().unwrap(), b);
        assert_eq!(pool.allocate().unwrap(), c);
        assert_eq!(pool.allocate().unwrap(), a);
    }

    #[test]
    fn exhausting_block_chains_a_new_one() {
        let mut pool = words_pool(64);
        assert_eq!(pool.slots_per_block(), 7);

        for _ in 0..7 {
            _ = pool.allocate().unwrap();
        }

        let first_block = pool.newest_block.unwrap();

        _ = pool.allocate().unwrap();

        let second_block = pool.newest_block.unwrap();
        assert_ne!(first_block, second_block);

        // SAFETY: The block link was written when the second block was acquired.
        let link = unsafe { second_block.cast::<BlockLink>().read() };
        assert_eq!(link, Some(first_block));
    }

    #[test]
    fn slots_stay_within_their_block() {
        let mut pool = words_pool(100);

        for _ in 0..50 {
            let slot = pool.allocate().unwrap();
            let block = pool.newest_block.unwrap();

            let offset = slot.addr().get() - block.addr().get();
            assert!(offset >= LINK_SIZE);
            assert!(offset + pool.slot_layout().size() <= pool.block_size());
        }
    }

    #[test]
    fn null_deallocate_is_noop() {
        let mut pool = words_pool(64);

        // SAFETY: Null is explicitly allowed.
        unsafe {
            pool.deallocate(ptr::null_mut());
        }

        assert!(pool.free_list.is_none());
    }

    #[test]
    fn construct_other_type_that_fits() {
        let mut pool = words_pool(64);

        let slot = pool.allocate().unwrap();

        // SAFETY: The slot is empty and a u32 fits into a u64 slot.
        let value = unsafe { pool.construct(slot, 7_u32) };

        // SAFETY: The value was just constructed.
        unsafe {
            assert_eq!(value.read(), 7);
        }
    }

    #[test]
    #[should_panic]
    fn construct_type_that_does_not_fit_panics() {
        let mut pool = words_pool(64);

        let slot = pool.allocate().unwrap();

        // SAFETY: The slot is empty. The layout mismatch is what we are testing.
        _ = unsafe { pool.construct(slot, [0_u64; 2]) };
    }

    #[test]
    fn destroy_drops_value() {
        struct Droppable {
            dropped: Rc<Cell<bool>>,
        }

        impl Drop for Droppable {
            fn drop(&mut self) {
                self.dropped.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));

        let mut pool = RawBlockPool::builder()
            .layout_of::<Droppable>()
            .build()
            .unwrap();

        let slot = pool.allocate().unwrap();

        // SAFETY: The slot is empty and matches the layout.
        let value = unsafe {
            pool.construct(
                slot,
                Droppable {
                    dropped: Rc::clone(&dropped),
                },
            )
        };

        assert!(!dropped.get());

        // SAFETY: The value was constructed above and is not used afterwards.
        unsafe {
            pool.destroy(value);
        }

        assert!(dropped.get());
    }

    #[test]
    fn construct_with_panic_leaves_slot_empty() {
        let mut pool = words_pool(64);

        let slot = pool.allocate().unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: The slot is empty and matches the layout.
            _ = unsafe { pool.construct_with::<u64>(slot, || panic!("constructor failed")) };
        }));
        assert!(result.is_err());

        // The slot is still allocated and empty, so constructing into it works.
        // SAFETY: The slot is empty and matches the layout.
        let value = unsafe { pool.construct(slot, 5_u64) };

        // SAFETY: The value was just constructed.
        unsafe {
            assert_eq!(value.read(), 5);
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    fn released_slot_is_poisoned() {
        #[allow(dead_code, reason = "only the layout of this type matters")]
        struct TwoWords([usize; 2]);

        let mut pool = RawBlockPool::builder()
            .layout_of::<TwoWords>()
            .build()
            .unwrap();

        let slot = pool.allocate().unwrap();

        // SAFETY: The slot comes from this pool. We only peek at pool-owned memory afterwards.
        unsafe {
            pool.deallocate(slot.as_ptr());
        }

        // SAFETY: The slot is inside a live block of the pool.
        let tail = unsafe { slot.add(LINK_SIZE).read() };
        assert_eq!(tail, POISON);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn double_deallocate_panics_in_debug() {
        let mut pool = words_pool(64);

        let slot = pool.allocate().unwrap();

        // SAFETY: The slot comes from this pool.
        unsafe {
            pool.deallocate(slot.as_ptr());
        }

        // SAFETY: This is the contract violation we are testing, caught by the tracker before
        // any memory is touched.
        unsafe {
            pool.deallocate(slot.as_ptr());
        }
    }

    #[test]
    fn debug_output_names_allocator_type() {
        let pool = words_pool(64);

        let output = format!("{pool:?}");
        assert!(output.contains("RawBlockPool"));
        assert!(output.contains(type_name::<System>()));
    }
}
