use crate::codegen::machine::{
    frame::StackSlotId,
    TargetMachine,
};

/// Target hooks for expanding pseudo instructions after allocation.
pub trait Backend {
    type TM: TargetMachine;

    fn mov(
        dest: <Self::TM as TargetMachine>::Reg,
        src: <Self::TM as TargetMachine>::Reg,
    ) -> <Self::TM as TargetMachine>::Instr;

    fn spill_store(
        slot: StackSlotId,
        src: <Self::TM as TargetMachine>::Reg,
    ) -> <Self::TM as TargetMachine>::Instr;

    fn spill_load(
        dest: <Self::TM as TargetMachine>::Reg,
        slot: StackSlotId,
    ) -> <Self::TM as TargetMachine>::Instr;

    fn new() -> Self;
}
