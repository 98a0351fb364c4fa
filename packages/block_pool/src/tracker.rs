use std::ptr::NonNull;

use foldhash::{HashMap, HashMapExt};

/// Lifecycle state of a slot that is currently owned by a caller.
///
/// Slots that are free or uncarved are simply absent from the tracker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SlotState {
    /// Handed out by `allocate()`, storage is uninitialized.
    Allocated,

    /// Holds a value placed there by `construct()`.
    Constructed,
}

/// Debug-build bookkeeping that turns caller contract violations into panics instead of silent
/// free list corruption. Release builds do not contain this type at all.
#[derive(Debug)]
pub(crate) struct SlotTracker {
    states: HashMap<usize, SlotState>,
}

impl SlotTracker {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            states: HashMap::new(),
        }
    }

    pub(crate) fn allocated(&mut self, slot: NonNull<u8>) {
        let previous = self.states.insert(slot.addr().get(), SlotState::Allocated);

        assert!(
            previous.is_none(),
            "slot {slot:?} was handed out while already owned by a caller - the free list is corrupted"
        );
    }

    pub(crate) fn released(&mut self, slot: NonNull<u8>) {
        assert!(
            self.states.remove(&slot.addr().get()).is_some(),
            "slot {slot:?} was released but is not allocated from this pool - it is foreign or already released"
        );
    }

    pub(crate) fn assert_constructible(&self, slot: NonNull<u8>) {
        match self.states.get(&slot.addr().get()) {
            Some(SlotState::Allocated) => {}
            Some(SlotState::Constructed) => {
                panic!("cannot construct into slot {slot:?} because it already holds a value")
            }
            None => panic!("cannot construct into slot {slot:?} because it is not allocated"),
        }
    }

    pub(crate) fn constructed(&mut self, slot: NonNull<u8>) {
        self.transition(slot, SlotState::Allocated, SlotState::Constructed, "construct");
    }

    pub(crate) fn destroyed(&mut self, slot: NonNull<u8>) {
        self.transition(slot, SlotState::Constructed, SlotState::Allocated, "destroy");
    }

    fn transition(
        &mut self,
        slot: NonNull<u8>,
        expected: SlotState,
        new: SlotState,
        operation: &str,
    ) {
        let state = self.states.get_mut(&slot.addr().get());

        match state {
            Some(state) if *state == expected => *state = new,
            Some(state) => panic!(
                "cannot {operation} slot {slot:?} in state {state:?}, expected {expected:?}"
            ),
            None => panic!("cannot {operation} slot {slot:?} because it is not allocated"),
        }
    }
}
