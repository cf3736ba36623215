use crate::codegen::machine::{
    function::{
        BasicBlockId,
        Function,
    },
    instr::{
        Immediate,
        Instr,
        PseudoInstr,
    },
    isa::RegisterClass as _,
    reg::{
        Register,
        VReg,
    },
    Size,
};
use crate::codegen::targets::x86_64::{
    Instr as X64Instr,
    PhysicalRegister,
    RegClass,
    Target,
};

pub(crate) fn create_test_function() -> Function<Target> {
    Function::new("test".to_string())
}

pub(crate) fn gpr64(func: &mut Function<Target>) -> VReg {
    func.alloc_vreg(Size::QWord, RegClass::Gpr64)
}

pub(crate) fn mov_ri(dest: VReg, value: i64) -> Instr<Target> {
    Instr::Machine(X64Instr::MOV64ri {
        dest: Register::Virtual(dest),
        immediate: Immediate {
            value,
            size: Size::QWord,
        },
    })
}

pub(crate) fn mov_rr(dest: VReg, src: VReg) -> Instr<Target> {
    Instr::Machine(X64Instr::MOV64rr {
        dest: Register::Virtual(dest),
        src: Register::Virtual(src),
    })
}

pub(crate) fn rdrand(dest: VReg) -> Instr<Target> {
    Instr::Machine(X64Instr::RDRAND64r {
        dest: Register::Virtual(dest),
    })
}

pub(crate) fn cmp_rr(lhs: VReg, rhs: VReg) -> Instr<Target> {
    Instr::Machine(X64Instr::CMP64rr {
        lhs: Register::Virtual(lhs),
        rhs: Register::Virtual(rhs),
    })
}

pub(crate) fn add_rr(dest: VReg, src: VReg) -> Instr<Target> {
    Instr::Machine(X64Instr::ADD64rr {
        dest: Register::Virtual(dest),
        src: Register::Virtual(src),
    })
}

pub(crate) fn call(callee: &'static str) -> Instr<Target> {
    Instr::Machine(X64Instr::CALL { callee })
}

pub(crate) fn jmp(target: BasicBlockId) -> Instr<Target> {
    Instr::Machine(X64Instr::JMP { target })
}

pub(crate) fn jcc(target: BasicBlockId) -> Instr<Target> {
    Instr::Machine(X64Instr::JCC {
        cc: crate::codegen::targets::x86_64::CC::Eq,
        target,
    })
}

pub(crate) fn ret() -> Instr<Target> {
    Instr::Machine(X64Instr::RET)
}

pub(crate) fn dbg_value(reg: VReg) -> Instr<Target> {
    Instr::Pseudo(PseudoInstr::DbgValue(Register::Virtual(reg)))
}

/// Reserves every GP register except `keep`, shrinking the effective
/// allocation orders down to `keep`.
pub(crate) fn reserve_all_but(func: &mut Function<Target>, keep: &[PhysicalRegister]) {
    for reg in RegClass::Gpr64.allocation_order() {
        if !keep.contains(reg) {
            func.reserve_reg(*reg);
        }
    }
}
