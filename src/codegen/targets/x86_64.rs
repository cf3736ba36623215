use smallvec::{
    smallvec,
    SmallVec,
};
use strum::VariantArray;

use crate::codegen::machine::{
    backend,
    frame::StackSlotId,
    function::BasicBlockId,
    instr::{
        Immediate,
        InstrOperand,
    },
    isa,
    isa::PhysicalRegister as MachPhysicalRegister,
    Size,
    TargetMachine,
};

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Target;

impl TargetMachine for Target {
    type Reg = PhysicalRegister;
    type RegClass = RegClass;
    type Instr = Instr;
    type Backend = Backend;
}

pub type Register = crate::codegen::machine::reg::Register<Target>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, VariantArray)]
pub enum PhysicalRegister {
    RAX,
    RCX,
    RDX,
    RSI,
    RDI,
    R8,
    R9,
    RBX,
    EAX,
    ECX,
    EDX,
    ESI,
    EDI,
    R8D,
    R9D,
    EBX,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum RegClass {
    Gpr64,
    Gpr32,
}

const GPR64_ORDER: &[PhysicalRegister] = &[
    PhysicalRegister::RAX,
    PhysicalRegister::RCX,
    PhysicalRegister::RDX,
    PhysicalRegister::RSI,
    PhysicalRegister::RDI,
    PhysicalRegister::R8,
    PhysicalRegister::R9,
    PhysicalRegister::RBX,
];

const GPR32_ORDER: &[PhysicalRegister] = &[
    PhysicalRegister::EAX,
    PhysicalRegister::ECX,
    PhysicalRegister::EDX,
    PhysicalRegister::ESI,
    PhysicalRegister::EDI,
    PhysicalRegister::R8D,
    PhysicalRegister::R9D,
    PhysicalRegister::EBX,
];

/// Registers not preserved across a call in the SysV calling convention.
/// Clobbers of the 64-bit registers cover their aliases.
pub const CALLER_SAVED: &[PhysicalRegister] = &[
    PhysicalRegister::RAX,
    PhysicalRegister::RCX,
    PhysicalRegister::RDX,
    PhysicalRegister::RSI,
    PhysicalRegister::RDI,
    PhysicalRegister::R8,
    PhysicalRegister::R9,
];

impl isa::RegisterClass for RegClass {
    type Reg = PhysicalRegister;

    fn name(&self) -> &'static str {
        self.into()
    }

    fn allocation_order(&self) -> &'static [PhysicalRegister] {
        match self {
            Self::Gpr64 => GPR64_ORDER,
            Self::Gpr32 => GPR32_ORDER,
        }
    }
}

impl isa::PhysicalRegister for PhysicalRegister {
    type Class = RegClass;

    fn name(&self) -> &'static str {
        self.into()
    }

    fn all() -> &'static [Self] {
        Self::VARIANTS
    }

    fn class(&self) -> RegClass {
        match self {
            Self::RAX
            | Self::RCX
            | Self::RDX
            | Self::RSI
            | Self::RDI
            | Self::R8
            | Self::R9
            | Self::RBX => RegClass::Gpr64,
            Self::EAX
            | Self::ECX
            | Self::EDX
            | Self::ESI
            | Self::EDI
            | Self::R8D
            | Self::R9D
            | Self::EBX => RegClass::Gpr32,
        }
    }

    fn size(&self) -> Size {
        match self.class() {
            RegClass::Gpr64 => Size::QWord,
            RegClass::Gpr32 => Size::DWord,
        }
    }

    fn subregs(&self) -> Option<&'static [Self]> {
        match self {
            Self::RAX => Some(&[Self::EAX]),
            Self::RCX => Some(&[Self::ECX]),
            Self::RDX => Some(&[Self::EDX]),
            Self::RSI => Some(&[Self::ESI]),
            Self::RDI => Some(&[Self::EDI]),
            Self::R8 => Some(&[Self::R8D]),
            Self::R9 => Some(&[Self::R9D]),
            Self::RBX => Some(&[Self::EBX]),
            _ => None,
        }
    }

    fn superregs(&self) -> Option<&'static [Self]> {
        match self {
            Self::EAX => Some(&[Self::RAX]),
            Self::ECX => Some(&[Self::RCX]),
            Self::EDX => Some(&[Self::RDX]),
            Self::ESI => Some(&[Self::RSI]),
            Self::EDI => Some(&[Self::RDI]),
            Self::R8D => Some(&[Self::R8]),
            Self::R9D => Some(&[Self::R9]),
            Self::EBX => Some(&[Self::RBX]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum CC {
    Eq,
    Gt,
}

#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
pub enum Instr {
    MOV64rr {
        dest: Register,
        src: Register,
    },
    MOV64ri {
        dest: Register,
        immediate: Immediate,
    },
    MOV32rr {
        dest: Register,
        src: Register,
    },
    MOV32ri {
        dest: Register,
        immediate: Immediate,
    },
    /// Spill store.
    MOV64mr {
        slot: StackSlotId,
        src: Register,
    },
    /// Spill reload.
    MOV64rm {
        dest: Register,
        slot: StackSlotId,
    },
    ADD64rr {
        dest: Register,
        src: Register,
    },
    CMP64rr {
        lhs: Register,
        rhs: Register,
    },
    RDRAND64r {
        dest: Register,
    },
    CALL {
        callee: &'static str,
    },
    JCC {
        cc: CC,
        target: BasicBlockId,
    },
    JMP {
        target: BasicBlockId,
    },
    RET,
}

impl isa::MachInstr for Instr {
    type TM = Target;

    fn name(&self) -> &'static str {
        self.into()
    }

    fn writes(&self) -> Option<Register> {
        match self {
            Self::MOV64rr { dest, .. }
            | Self::MOV64ri { dest, .. }
            | Self::MOV32rr { dest, .. }
            | Self::MOV32ri { dest, .. }
            | Self::MOV64rm { dest, .. }
            | Self::ADD64rr { dest, .. }
            | Self::RDRAND64r { dest } => Some(*dest),
            Self::MOV64mr { .. }
            | Self::CMP64rr { .. }
            | Self::CALL { .. }
            | Self::JCC { .. }
            | Self::JMP { .. }
            | Self::RET => None,
        }
    }

    fn reads(&self) -> SmallVec<[Register; 2]> {
        match self {
            Self::MOV64rr { src, .. } | Self::MOV32rr { src, .. } | Self::MOV64mr { src, .. } => {
                smallvec![*src]
            }
            // ADD is two-address: dest is read and written
            Self::ADD64rr { dest, src } => smallvec![*dest, *src],
            Self::CMP64rr { lhs, rhs } => smallvec![*lhs, *rhs],
            Self::MOV64ri { .. }
            | Self::MOV32ri { .. }
            | Self::MOV64rm { .. }
            | Self::RDRAND64r { .. }
            | Self::CALL { .. }
            | Self::JCC { .. }
            | Self::JMP { .. }
            | Self::RET => smallvec![],
        }
    }

    fn operands(&self) -> SmallVec<[InstrOperand<Target>; 3]> {
        match self {
            Self::MOV64rr { dest, src } | Self::MOV32rr { dest, src } => {
                smallvec![InstrOperand::Reg(*dest), InstrOperand::Reg(*src)]
            }
            Self::MOV64ri { dest, immediate } | Self::MOV32ri { dest, immediate } => {
                smallvec![InstrOperand::Reg(*dest), InstrOperand::Imm(*immediate)]
            }
            Self::MOV64mr { slot, src } => {
                smallvec![InstrOperand::Slot(*slot), InstrOperand::Reg(*src)]
            }
            Self::MOV64rm { dest, slot } => {
                smallvec![InstrOperand::Reg(*dest), InstrOperand::Slot(*slot)]
            }
            Self::ADD64rr { dest, src } => {
                smallvec![InstrOperand::Reg(*dest), InstrOperand::Reg(*src)]
            }
            Self::CMP64rr { lhs, rhs } => {
                smallvec![InstrOperand::Reg(*lhs), InstrOperand::Reg(*rhs)]
            }
            Self::RDRAND64r { dest } => smallvec![InstrOperand::Reg(*dest)],
            Self::CALL { .. } => smallvec![],
            Self::JCC { target, .. } | Self::JMP { target } => {
                smallvec![InstrOperand::Label(*target)]
            }
            Self::RET => smallvec![],
        }
    }

    fn written_regs_mut(&mut self) -> SmallVec<[&mut Register; 1]> {
        match self {
            Self::MOV64rr { dest, .. }
            | Self::MOV64ri { dest, .. }
            | Self::MOV32rr { dest, .. }
            | Self::MOV32ri { dest, .. }
            | Self::MOV64rm { dest, .. }
            | Self::ADD64rr { dest, .. }
            | Self::RDRAND64r { dest } => smallvec![dest],
            Self::MOV64mr { .. }
            | Self::CMP64rr { .. }
            | Self::CALL { .. }
            | Self::JCC { .. }
            | Self::JMP { .. }
            | Self::RET => smallvec![],
        }
    }

    fn read_regs_mut(&mut self) -> SmallVec<[&mut Register; 2]> {
        match self {
            Self::MOV64rr { src, .. } | Self::MOV32rr { src, .. } | Self::MOV64mr { src, .. } => {
                smallvec![src]
            }
            Self::ADD64rr { dest, src } => smallvec![dest, src],
            Self::CMP64rr { lhs, rhs } => smallvec![lhs, rhs],
            Self::MOV64ri { .. }
            | Self::MOV32ri { .. }
            | Self::MOV64rm { .. }
            | Self::RDRAND64r { .. }
            | Self::CALL { .. }
            | Self::JCC { .. }
            | Self::JMP { .. }
            | Self::RET => smallvec![],
        }
    }

    fn is_terminator(&self) -> bool {
        matches!(self, Self::JMP { .. } | Self::RET)
    }

    fn is_trivially_rematerializable(&self) -> bool {
        matches!(self, Self::MOV64ri { .. } | Self::MOV32ri { .. })
    }

    fn regmask_clobbers(&self) -> Option<&'static [PhysicalRegister]> {
        match self {
            Self::CALL { .. } => Some(CALLER_SAVED),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Backend;

impl backend::Backend for Backend {
    type TM = Target;

    fn mov(dest: PhysicalRegister, src: PhysicalRegister) -> Instr {
        match dest.class() {
            RegClass::Gpr64 => Instr::MOV64rr {
                dest: Register::Physical(dest),
                src: Register::Physical(src),
            },
            RegClass::Gpr32 => Instr::MOV32rr {
                dest: Register::Physical(dest),
                src: Register::Physical(src),
            },
        }
    }

    fn spill_store(slot: StackSlotId, src: PhysicalRegister) -> Instr {
        Instr::MOV64mr {
            slot,
            src: Register::Physical(src),
        }
    }

    fn spill_load(dest: PhysicalRegister, slot: StackSlotId) -> Instr {
        Instr::MOV64rm {
            dest: Register::Physical(dest),
            slot,
        }
    }

    fn new() -> Self {
        Self
    }
}
