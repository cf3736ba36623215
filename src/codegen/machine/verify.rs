use std::fmt::{
    Display,
    Formatter,
};

use cranelift_entity::EntityRef;

use crate::codegen::machine::{
    function::{
        BasicBlockId,
        Function,
    },
    instr::InstrOperand,
    reg::VReg,
    TargetMachine,
};
use crate::codegen::register_allocator::InstrUid;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum VerifyError {
    UnknownBlock(BasicBlockId, InstrUid),
    UnknownVReg(VReg, InstrUid),
    MissingTerminator(BasicBlockId),
    PhisPresent(BasicBlockId),
    VirtualRegisterPresent(VReg, InstrUid),
}

impl Display for VerifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownBlock(bb, uid) => {
                write!(f, "instruction at {uid} references unknown block {bb}")
            }
            Self::UnknownVReg(vreg, uid) => {
                write!(f, "instruction at {uid} references unknown vreg {vreg}")
            }
            Self::MissingTerminator(bb) => write!(f, "missing terminator in {bb}"),
            Self::PhisPresent(bb) => write!(f, "{bb} still contains phis"),
            Self::VirtualRegisterPresent(vreg, uid) => {
                write!(f, "{vreg} at {uid} was not rewritten to a physical register")
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Verifier<'func, TM: TargetMachine> {
    function: &'func Function<TM>,
    allow_virtual_regs: bool,
}

impl<'func, TM: TargetMachine> Verifier<'func, TM> {
    pub fn new(function: &'func Function<TM>) -> Self {
        Self {
            function,
            allow_virtual_regs: true,
        }
    }

    /// A verifier for functions whose operands have been rewritten to
    /// physical registers.
    pub fn after_rewrite(function: &'func Function<TM>) -> Self {
        Self {
            function,
            allow_virtual_regs: false,
        }
    }

    pub fn verify(self) -> Vec<VerifyError> {
        let errors = self.collect_errors();
        if !errors.is_empty() {
            for error in &errors {
                tracing::debug!("verifier: {error}");
            }
        }
        errors
    }

    fn collect_errors(self) -> Vec<VerifyError> {
        let mut errors = vec![];
        for (bb_id, bb) in self.function.basic_blocks.iter_enumerated() {
            if !bb.phis.is_empty() {
                errors.push(VerifyError::PhisPresent(bb_id));
            }
            let terminated = bb
                .instructions
                .last()
                .map_or(false, super::instr::Instr::is_terminator);
            if !terminated {
                errors.push(VerifyError::MissingTerminator(bb_id));
            }
            for (instr_id, instr) in bb.instructions.iter_enumerated() {
                let uid = InstrUid::new(bb_id, instr_id);
                for operand in instr.operands() {
                    match operand {
                        InstrOperand::Reg(reg) => {
                            if let Some(vreg) = reg.try_as_virtual() {
                                if vreg.index() >= self.function.vreg_count() {
                                    errors.push(VerifyError::UnknownVReg(vreg, uid));
                                } else if !self.allow_virtual_regs && !instr.is_debug() {
                                    errors.push(VerifyError::VirtualRegisterPresent(vreg, uid));
                                }
                            }
                        }
                        InstrOperand::Label(target) => {
                            if target.raw() as usize >= self.function.basic_blocks.len() {
                                errors.push(VerifyError::UnknownBlock(target, uid));
                            }
                        }
                        InstrOperand::Imm(_) | InstrOperand::Slot(_) => {}
                    }
                }
            }
        }
        errors
    }
}
