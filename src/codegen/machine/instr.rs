use std::fmt::{
    Display,
    Formatter,
};

use smallvec::{
    smallvec,
    SmallVec,
};

use crate::codegen::machine::{
    frame::StackSlotId,
    function::BasicBlockId,
    isa::MachInstr,
    reg::Register,
    Size,
    TargetMachine,
};

index_vec::define_index_type! {
    pub struct InstrId = u32;

    DISPLAY_FORMAT = "instr{}";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr<TM: TargetMachine> {
    Pseudo(PseudoInstr<TM>),
    Machine(TM::Instr),
}

impl<TM: TargetMachine> Instr<TM> {
    pub fn name(&self) -> &'static str {
        match self {
            Instr::Pseudo(pseudo) => pseudo.name(),
            Instr::Machine(machine) => machine.name(),
        }
    }

    pub fn reads(&self) -> SmallVec<[Register<TM>; 2]> {
        match self {
            Instr::Pseudo(pseudo) => pseudo.reads(),
            Instr::Machine(machine) => machine.reads(),
        }
    }

    pub fn reads_implicitly(&self) -> SmallVec<[Register<TM>; 2]> {
        let writes = self.writes();
        let reg_operands = self
            .operands()
            .iter()
            .filter_map(|operand| {
                if let InstrOperand::Reg(reg) = operand {
                    Some(*reg)
                } else {
                    None
                }
            })
            .collect::<SmallVec<[_; 2]>>();
        let mut implicit_reads = SmallVec::new();
        for read in self.reads() {
            if !reg_operands.contains(&read) && writes.map_or(true, |writes| writes != read) {
                implicit_reads.push(read);
            }
        }
        implicit_reads
    }

    pub fn writes(&self) -> Option<Register<TM>> {
        match self {
            Instr::Pseudo(pseudo) => pseudo.writes(),
            Instr::Machine(machine) => machine.writes(),
        }
    }

    pub fn operands(&self) -> SmallVec<[InstrOperand<TM>; 3]> {
        match self {
            Instr::Pseudo(pseudo) => pseudo.operands(),
            Instr::Machine(machine) => machine.operands(),
        }
    }

    pub fn written_regs_mut(&mut self) -> SmallVec<[&mut Register<TM>; 1]> {
        match self {
            Instr::Pseudo(pseudo) => pseudo.written_regs_mut(),
            Instr::Machine(machine) => machine.written_regs_mut(),
        }
    }

    pub fn read_regs_mut(&mut self) -> SmallVec<[&mut Register<TM>; 2]> {
        match self {
            Instr::Pseudo(pseudo) => pseudo.read_regs_mut(),
            Instr::Machine(machine) => machine.read_regs_mut(),
        }
    }

    pub fn try_as_machine(&self) -> Option<&TM::Instr> {
        match self {
            Instr::Pseudo(_) => None,
            Instr::Machine(machine) => Some(machine),
        }
    }

    pub fn is_debug(&self) -> bool {
        match self {
            Instr::Pseudo(pseudo) => pseudo.is_debug(),
            Instr::Machine(machine) => machine.is_debug(),
        }
    }

    pub fn is_terminator(&self) -> bool {
        match self {
            Instr::Pseudo(_) => false,
            Instr::Machine(machine) => machine.is_terminator(),
        }
    }

    pub fn is_trivially_rematerializable(&self) -> bool {
        match self {
            Instr::Pseudo(_) => false,
            Instr::Machine(machine) => machine.is_trivially_rematerializable(),
        }
    }

    pub fn regmask_clobbers(&self) -> Option<&'static [TM::Reg]> {
        match self {
            Instr::Pseudo(_) => None,
            Instr::Machine(machine) => machine.regmask_clobbers(),
        }
    }

    /// Whether the instruction reads or writes `reg`, ignoring debug uses.
    pub fn references(&self, reg: Register<TM>) -> bool {
        if self.is_debug() {
            return false;
        }
        self.writes() == Some(reg) || self.reads().contains(&reg)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PseudoInstr<TM: TargetMachine> {
    Copy(Register<TM>, Register<TM>),
    Spill {
        slot: StackSlotId,
        src: Register<TM>,
    },
    Reload {
        dest: Register<TM>,
        slot: StackSlotId,
    },
    DbgValue(Register<TM>),
}

impl<TM: TargetMachine> PseudoInstr<TM> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Copy(_, _) => "COPY",
            Self::Spill { .. } => "SPILL",
            Self::Reload { .. } => "RELOAD",
            Self::DbgValue(_) => "DBG_VALUE",
        }
    }

    pub fn reads(&self) -> SmallVec<[Register<TM>; 2]> {
        match self {
            Self::Copy(_, src) => smallvec![*src],
            Self::Spill { src, .. } => smallvec![*src],
            Self::Reload { .. } => smallvec![],
            Self::DbgValue(reg) => smallvec![*reg],
        }
    }

    pub fn writes(&self) -> Option<Register<TM>> {
        match self {
            Self::Copy(dest, _) => Some(*dest),
            Self::Spill { .. } => None,
            Self::Reload { dest, .. } => Some(*dest),
            Self::DbgValue(_) => None,
        }
    }

    pub fn operands(&self) -> SmallVec<[InstrOperand<TM>; 3]> {
        match self {
            Self::Copy(dest, src) => {
                smallvec![InstrOperand::Reg(*dest), InstrOperand::Reg(*src)]
            }
            Self::Spill { slot, src } => {
                smallvec![InstrOperand::Slot(*slot), InstrOperand::Reg(*src)]
            }
            Self::Reload { dest, slot } => {
                smallvec![InstrOperand::Reg(*dest), InstrOperand::Slot(*slot)]
            }
            Self::DbgValue(reg) => smallvec![InstrOperand::Reg(*reg)],
        }
    }

    pub fn written_regs_mut(&mut self) -> SmallVec<[&mut Register<TM>; 1]> {
        match self {
            Self::Copy(dest, _) => smallvec![dest],
            Self::Spill { .. } => smallvec![],
            Self::Reload { dest, .. } => smallvec![dest],
            Self::DbgValue(_) => smallvec![],
        }
    }

    pub fn read_regs_mut(&mut self) -> SmallVec<[&mut Register<TM>; 2]> {
        match self {
            Self::Copy(_, src) => smallvec![src],
            Self::Spill { src, .. } => smallvec![src],
            Self::Reload { .. } => smallvec![],
            Self::DbgValue(reg) => smallvec![reg],
        }
    }

    pub fn is_debug(&self) -> bool {
        matches!(self, Self::DbgValue(_))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InstrOperand<TM: TargetMachine> {
    Reg(Register<TM>),
    Imm(Immediate),
    Slot(StackSlotId),
    Label(BasicBlockId),
}

impl<TM: TargetMachine> Display for InstrOperand<TM> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reg(reg) => write!(f, "{}", reg),
            Self::Imm(imm) => write!(f, "{}", imm),
            Self::Slot(slot) => write!(f, "{}", slot),
            Self::Label(label) => write!(f, "{}", label),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Immediate {
    pub value: i64,
    pub size: Size,
}

impl Display for Immediate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}
