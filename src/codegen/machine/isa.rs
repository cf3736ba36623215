use std::{
    fmt::Debug,
    hash::Hash,
};

use smallvec::SmallVec;

use crate::codegen::machine::{
    instr::InstrOperand,
    reg::Register,
    Size,
    TargetMachine,
};

pub trait PhysicalRegister: Debug + Clone + Copy + PartialEq + Eq + Hash + Sized + 'static {
    type Class: RegisterClass<Reg = Self>;

    fn name(&self) -> &'static str;

    fn all() -> &'static [Self];

    fn class(&self) -> Self::Class;

    fn size(&self) -> Size;

    /// Returns the sub registers of this register.
    ///
    /// E.g. on x86-64, the sub register of RAX is EAX.
    fn subregs(&self) -> Option<&'static [Self]>;

    fn superregs(&self) -> Option<&'static [Self]>;

    fn aliases(&self) -> impl Iterator<Item = Self> {
        self.subregs()
            .into_iter()
            .flatten()
            .copied()
            .chain(self.superregs().into_iter().flatten().copied())
            .chain(std::iter::once(*self))
    }

    fn has_subreg(&self, other: Self) -> bool {
        self.subregs()
            .map_or(false, |subregs| subregs.contains(&other))
    }

    fn interferes_with(self, other: Self) -> bool {
        if self == other {
            return true;
        }
        if self.has_subreg(other) || other.has_subreg(self) {
            return true;
        }
        false
    }
}

pub trait RegisterClass: Debug + Clone + Copy + PartialEq + Eq + Hash + Sized + 'static {
    type Reg: PhysicalRegister<Class = Self>;

    fn name(&self) -> &'static str;

    /// The target-preferred order in which registers of this class are tried
    /// during allocation.
    fn allocation_order(&self) -> &'static [Self::Reg];
}

pub trait MachInstr: Debug + PartialEq + Eq + Clone {
    type TM: TargetMachine;

    fn name(&self) -> &'static str;

    fn writes(&self) -> Option<Register<Self::TM>>;

    fn reads(&self) -> SmallVec<[Register<Self::TM>; 2]>;

    fn operands(&self) -> SmallVec<[InstrOperand<Self::TM>; 3]>;

    fn written_regs_mut(&mut self) -> SmallVec<[&mut Register<Self::TM>; 1]>;

    fn read_regs_mut(&mut self) -> SmallVec<[&mut Register<Self::TM>; 2]>;

    fn is_terminator(&self) -> bool {
        false
    }

    /// Debug value instructions do not keep their operands alive.
    fn is_debug(&self) -> bool {
        false
    }

    /// True for instructions whose result can be recomputed at any program
    /// point, e.g. moves of an immediate into a register.
    fn is_trivially_rematerializable(&self) -> bool {
        false
    }

    /// Registers clobbered across this instruction, e.g. the caller-saved
    /// registers of a call.
    fn regmask_clobbers(&self) -> Option<&'static [<Self::TM as TargetMachine>::Reg]> {
        None
    }
}
