use index_vec::IndexVec;

use crate::codegen::machine::Size;

index_vec::define_index_type! {
    pub struct StackSlotId = u32;

    DISPLAY_FORMAT = "ss{}";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSlot {
    pub size: Size,
}

/// Stack objects created for spilled virtual registers.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    slots: IndexVec<StackSlotId, StackSlot>,
}

impl Frame {
    pub fn create_spill_slot(&mut self, size: Size) -> StackSlotId {
        self.slots.push(StackSlot { size })
    }

    pub fn slot(&self, id: StackSlotId) -> &StackSlot {
        &self.slots[id]
    }

    pub fn slots(&self) -> impl Iterator<Item = (StackSlotId, &StackSlot)> {
        self.slots.iter_enumerated()
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }
}
