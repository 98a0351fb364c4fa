use std::alloc::Layout;
use std::num::NonZero;

use crate::{Error, Result};

/// Size of the link word that chains blocks together. Free slots hold a link of the same size.
pub(crate) const LINK_SIZE: usize = size_of::<*mut u8>();

const LINK_ALIGN: usize = align_of::<*mut u8>();

/// Precalculates how a block of a given size is carved into slots for a given item layout.
///
/// ```text
/// |<------------------------------- block_size -------------------------------->|
/// |<--link-->|<--padding-->|<--slot 0-->|<--slot 1-->|...|<--slot n-1-->|<-tail->|
/// ```
///
/// The link word points to the previously acquired block. The padding absorbs the part of the
/// usable region that does not make up a whole slot, so the slots end at the block boundary.
/// The tail is only non-empty when the block size is not a multiple of the slot alignment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct BlockLayout {
    /// Layout of a single slot. The size is the stride between consecutive slots and is large
    /// enough to hold either an item or a free list link.
    slot_layout: Layout,

    /// Layout of an entire block as requested from the underlying allocator.
    block: Layout,

    /// Byte offset from the start of a block to its first slot.
    first_slot_offset: usize,

    /// Byte offset from the start of a block to the end of its last slot.
    slots_end_offset: usize,

    slots_per_block: NonZero<usize>,
}

impl BlockLayout {
    /// Calculates the block layout for items of `item_layout` in blocks of `block_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockSizeTooSmall`] if a block cannot hold at least two slots.
    ///
    /// Returns [`Error::InvalidLayout`] if the slot or block layout cannot be represented.
    pub(crate) fn new(item_layout: Layout, block_size: usize) -> Result<Self> {
        let slot_align = item_layout.align().max(LINK_ALIGN);

        let slot_layout =
            Layout::from_size_align(item_layout.size().max(LINK_SIZE), slot_align)?.pad_to_align();
        let slot_size = slot_layout.size();

        let minimum = slot_size
            .checked_mul(2)
            .expect("slot size is bounded by isize::MAX so doubling it fits in usize");

        if block_size < minimum {
            return Err(Error::BlockSizeTooSmall {
                block_size,
                slot_size,
                minimum,
            });
        }

        let block_layout = Layout::from_size_align(block_size, slot_align)?;

        // The link word is never wider than a slot and slots are a multiple of the alignment,
        // so rounding it up still leaves room for at least one slot.
        let header_size = LINK_SIZE.next_multiple_of(slot_align);

        let usable_size = block_size
            .checked_sub(header_size)
            .expect("a block holds two slots and the header is at most one slot wide");

        let slots_per_block = NonZero::new(
            usable_size
                .checked_div(slot_size)
                .expect("slot size is never zero"),
        )
        .expect("the usable region is at least one slot wide");

        let remainder = usable_size
            .checked_rem(slot_size)
            .expect("slot size is never zero");

        // Padding must keep the first slot aligned, so any sub-alignment part of the remainder
        // stays at the tail of the block instead.
        let padding = remainder
            .checked_sub(
                remainder
                    .checked_rem(slot_align)
                    .expect("alignment is never zero"),
            )
            .expect("remainder modulo alignment cannot exceed the remainder");

        let first_slot_offset = header_size
            .checked_add(padding)
            .expect("offsets within a valid layout cannot overflow");

        let slots_end_offset = slot_size
            .checked_mul(slots_per_block.get())
            .and_then(|slots_size| slots_size.checked_add(first_slot_offset))
            .expect("offsets within a valid layout cannot overflow");

        debug_assert!(slots_end_offset <= block_size);

        Ok(Self {
            slot_layout,
            block: block_layout,
            first_slot_offset,
            slots_end_offset,
            slots_per_block,
        })
    }

    #[must_use]
    pub(crate) fn slot_layout(&self) -> Layout {
        self.slot_layout
    }

    #[must_use]
    pub(crate) fn slot_size(&self) -> usize {
        self.slot_layout.size()
    }

    #[must_use]
    pub(crate) fn block_layout(&self) -> Layout {
        self.block
    }

    #[must_use]
    pub(crate) fn block_size(&self) -> usize {
        self.block.size()
    }

    #[must_use]
    pub(crate) fn first_slot_offset(&self) -> usize {
        self.first_slot_offset
    }

    #[must_use]
    pub(crate) fn slots_end_offset(&self) -> usize {
        self.slots_end_offset
    }

    #[must_use]
    pub(crate) fn slots_per_block(&self) -> NonZero<usize> {
        self.slots_per_block
    }

    /// Whether a value of the given layout can be stored in a slot.
    #[must_use]
    pub(crate) fn fits(&self, layout: Layout) -> bool {
        layout.size() <= self.slot_layout.size() && layout.align() <= self.slot_layout.align()
    }
}
