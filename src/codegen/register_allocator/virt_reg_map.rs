use std::fmt::{
    Display,
    Formatter,
};

use cranelift_entity::SecondaryMap;
use tracing::debug;

use crate::codegen::machine::{
    function::Function,
    instr::InstrId,
    isa::PhysicalRegister,
    reg::{
        Register,
        VReg,
    },
    TargetMachine,
};

/// Final sink of allocation decisions: which physical register every virtual
/// register will be rewritten to.
#[derive(Debug, Clone)]
pub struct VirtRegMap<TM: TargetMachine> {
    assignments: SecondaryMap<VReg, Option<TM::Reg>>,
}

impl<TM: TargetMachine> Default for VirtRegMap<TM> {
    fn default() -> Self {
        Self::new()
    }
}

impl<TM: TargetMachine> VirtRegMap<TM> {
    pub fn new() -> Self {
        Self {
            assignments: SecondaryMap::default(),
        }
    }

    pub fn has_phys(&self, vreg: VReg) -> bool {
        self.assignments[vreg].is_some()
    }

    pub fn phys(&self, vreg: VReg) -> Option<TM::Reg> {
        self.assignments[vreg]
    }

    pub fn assign_virt2phys(&mut self, vreg: VReg, reg: TM::Reg) {
        assert!(
            self.assignments[vreg].is_none(),
            "{vreg} is already assigned to ${}",
            self.assignments[vreg].map_or("<none>", |reg| reg.name())
        );
        debug!("Mapping {vreg} to ${}", reg.name());
        self.assignments[vreg] = Some(reg);
    }

    /// Bound vregs in dense index order.
    pub fn assignments(&self) -> impl Iterator<Item = (VReg, TM::Reg)> + '_ {
        self.assignments
            .iter()
            .filter_map(|(vreg, reg)| reg.map(|reg| (vreg, reg)))
    }

    pub fn num_assigned(&self) -> usize {
        self.assignments().count()
    }

    /// Replaces every virtual register operand with its binding.
    ///
    /// Debug value instructions whose vreg has no binding lost their value to
    /// a spill and are dropped.
    pub fn rewrite(&self, func: &mut Function<TM>) {
        debug!("Rewriting virtual registers in function {}", func.name);
        for bb_id in func.basic_blocks.indices().collect::<Vec<_>>() {
            let mut instr_id = InstrId::new(0);
            while instr_id < func.basic_blocks[bb_id].instructions.len_idx() {
                let instr = &mut func.basic_blocks[bb_id].instructions[instr_id];
                if instr.is_debug() {
                    let unbound = instr
                        .reads()
                        .iter()
                        .filter_map(Register::try_as_virtual)
                        .any(|vreg| !self.has_phys(vreg));
                    if unbound {
                        debug!("Dropping debug value of an unallocated vreg at {instr_id}");
                        func.basic_blocks[bb_id].instructions.remove(instr_id);
                        continue;
                    }
                }
                let instr = &mut func.basic_blocks[bb_id].instructions[instr_id];
                for reg in instr.read_regs_mut() {
                    if let Some(vreg) = reg.try_as_virtual() {
                        let phys_reg = self
                            .phys(vreg)
                            .unwrap_or_else(|| panic!("{vreg} was not allocated"));
                        *reg = Register::Physical(phys_reg);
                    }
                }
                for reg in instr.written_regs_mut() {
                    if let Some(vreg) = reg.try_as_virtual() {
                        let phys_reg = self
                            .phys(vreg)
                            .unwrap_or_else(|| panic!("{vreg} was not allocated"));
                        *reg = Register::Physical(phys_reg);
                    }
                }
                instr_id += 1;
            }
        }
    }
}

impl<TM: TargetMachine> Display for VirtRegMap<TM> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (vreg, reg) in self.assignments() {
            writeln!(f, "{} -> ${}", vreg, reg.name())?;
        }
        Ok(())
    }
}
