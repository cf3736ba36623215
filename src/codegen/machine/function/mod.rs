use std::fmt::{
    Display,
    Formatter,
};

pub use cfg::{
    BasicBlock,
    BasicBlockId,
    Cfg,
};
use cranelift_entity::PrimaryMap;
use rustc_hash::FxHashSet;
use smallvec::smallvec;
use tracing::debug;

use crate::codegen::machine::{
    backend::Backend,
    frame::Frame,
    instr::{
        Instr,
        InstrId,
        PseudoInstr,
    },
    isa::PhysicalRegister,
    reg::{
        Register,
        VReg,
        VRegInfo,
    },
    Size,
    TargetMachine,
};
use crate::codegen::register_allocator::InstrUid;

pub mod cfg;

#[derive(Debug, Clone)]
pub struct Function<TM: TargetMachine> {
    pub name: String,
    pub basic_blocks: index_vec::IndexVec<BasicBlockId, BasicBlock<TM>>,
    pub(crate) vregs: PrimaryMap<VReg, VRegInfo<TM>>,
    frame: Frame,
    reserved_regs: FxHashSet<TM::Reg>,
    reserved_frozen: bool,
    cfg: Option<Cfg>,
}

impl<TM: TargetMachine> Function<TM> {
    pub fn new(name: String) -> Self {
        let mut reserved_regs = FxHashSet::default();
        reserved_regs.extend(TM::reserved_regs().iter().copied());
        Self {
            name,
            basic_blocks: index_vec::IndexVec::default(),
            vregs: PrimaryMap::new(),
            frame: Frame::default(),
            reserved_regs,
            reserved_frozen: false,
            cfg: None,
        }
    }

    pub fn alloc_vreg(&mut self, size: Size, class: TM::RegClass) -> VReg {
        self.vregs.push(VRegInfo {
            size,
            class,
            spillable: true,
            hint: None,
        })
    }

    pub fn get_vreg(&self, vreg: VReg) -> &VRegInfo<TM> {
        &self.vregs[vreg]
    }

    pub fn vreg_count(&self) -> usize {
        self.vregs.len()
    }

    /// Virtual registers of the function in dense index order.
    pub fn vreg_ids(&self) -> impl Iterator<Item = VReg> + '_ {
        self.vregs.keys()
    }

    pub fn mark_unspillable(&mut self, vreg: VReg) {
        debug!("Marking {vreg} as unspillable");
        self.vregs[vreg].spillable = false;
    }

    pub fn hint_vreg(&mut self, vreg: VReg, to: TM::Reg) {
        debug!("Hinting {vreg} to {}", to.name());
        self.vregs[vreg].hint = Some(to);
    }

    /// Whether `vreg` has no non-debug reads or writes left in the function.
    pub fn reg_nodbg_empty(&self, vreg: VReg) -> bool {
        let reg = Register::Virtual(vreg);
        !self
            .basic_blocks
            .iter()
            .flat_map(|bb| bb.instructions.iter())
            .any(|instr| instr.references(reg))
    }

    pub fn reserve_reg(&mut self, reg: TM::Reg) {
        assert!(
            !self.reserved_frozen,
            "cannot reserve {} after the reserved set was frozen",
            reg.name()
        );
        self.reserved_regs.insert(reg);
    }

    pub fn freeze_reserved_regs(&mut self) {
        debug!(
            "Freezing reserved registers of function {}: {} register(s)",
            self.name,
            self.reserved_regs.len()
        );
        self.reserved_frozen = true;
    }

    pub fn reserved_frozen(&self) -> bool {
        self.reserved_frozen
    }

    /// Whether `reg` or one of its aliases is reserved.
    pub fn is_reserved(&self, reg: TM::Reg) -> bool {
        self.reserved_regs
            .iter()
            .any(|reserved| reserved.interferes_with(reg))
    }

    pub fn create_bb(&mut self) -> BasicBlockId {
        let id = self.basic_blocks.next_idx();
        self.basic_blocks.push(BasicBlock::new(id))
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    pub fn instr(&self, uid: InstrUid) -> &Instr<TM> {
        &self.basic_blocks[uid.bb].instructions[uid.instr]
    }

    pub fn instr_mut(&mut self, uid: InstrUid) -> &mut Instr<TM> {
        &mut self.basic_blocks[uid.bb].instructions[uid.instr]
    }

    pub fn insert_instr(&mut self, bb: BasicBlockId, idx: InstrId, instr: Instr<TM>) {
        self.basic_blocks[bb].instructions.insert(idx, instr);
    }

    pub fn remove_instr(&mut self, uid: InstrUid) -> Instr<TM> {
        self.basic_blocks[uid.bb].instructions.remove(uid.instr)
    }

    pub fn expand_pseudo_instructions<B>(&mut self)
    where
        B: Backend<TM = TM>,
    {
        debug!("Expanding pseudo instructions for function {}", self.name);
        for bb in &mut self.basic_blocks {
            if bb.instructions.is_empty() {
                continue;
            }
            let mut instr_id = InstrId::new(0);
            while instr_id <= bb.instructions.last_idx() {
                let instr = &mut bb.instructions[instr_id];
                if let Instr::Pseudo(pseudo_instr) = instr {
                    let expanded: smallvec::SmallVec<[_; 2]> = match pseudo_instr {
                        PseudoInstr::Copy(dest, src) => {
                            let instr = B::mov(
                                dest.try_as_physical().unwrap(),
                                src.try_as_physical().unwrap(),
                            );
                            smallvec![instr]
                        }
                        PseudoInstr::Spill { slot, src } => {
                            smallvec![B::spill_store(*slot, src.try_as_physical().unwrap())]
                        }
                        PseudoInstr::Reload { dest, slot } => {
                            smallvec![B::spill_load(dest.try_as_physical().unwrap(), *slot)]
                        }
                        PseudoInstr::DbgValue(_) => {
                            smallvec![]
                        }
                    };
                    debug!(
                        "Expanded pseudo instruction {:?} to {:?}",
                        pseudo_instr, expanded
                    );
                    bb.instructions.remove(instr_id);
                    let expanded_len = expanded.len();
                    if expanded_len == 0 {
                        continue;
                    }
                    for (offset, instr) in expanded.into_iter().enumerate() {
                        bb.instructions
                            .insert(instr_id + offset, Instr::Machine(instr));
                    }
                    instr_id += expanded_len - 1;
                }
                instr_id += 1;
            }
        }
    }

    pub fn build_cfg(&mut self) {
        let cfg = Cfg::build(&self.basic_blocks);
        self.cfg = Some(cfg);
    }

    pub fn cfg(&self) -> &Cfg {
        self.cfg.as_ref().expect("Cfg has not been built yet")
    }
}


impl<TM: TargetMachine> Display for Function<TM> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "function {}:", self.name)?;
        let bbs: Box<dyn Iterator<Item = BasicBlockId>> = match &self.cfg {
            Some(cfg) => Box::new(cfg.ordered().into_iter()),
            None => Box::new(self.basic_blocks.indices()),
        };
        for bb_id in bbs {
            let bb = &self.basic_blocks[bb_id];
            writeln!(f, "{bb_id}: ")?;
            for (dest, operands) in &bb.phis {
                write!(f, "  {dest} = phi ")?;
                for (i, (reg, bb)) in operands.iter().enumerate() {
                    write!(f, "{reg}:{bb}")?;
                    if i < operands.len() - 1 {
                        write!(f, ", ")?;
                    }
                }
                writeln!(f)?;
            }
            for instr in &bb.instructions {
                write!(f, "  ")?;
                if let Some(out) = instr.writes() {
                    write!(f, "{out} = ")?;
                }
                write!(f, "{}", instr.name())?;
                let operands = instr.operands();
                let operands_len = operands.len();
                for (i, operand) in operands.into_iter().enumerate() {
                    write!(f, " {operand}")?;
                    if i < operands_len - 1 {
                        write!(f, ",")?;
                    }
                }
                let reads_impl = instr.reads_implicitly();
                let reads_impl_len = reads_impl.len();
                if !reads_impl.is_empty() {
                    write!(f, " {{implicit reads: ")?;
                    for (i, reg) in reads_impl.into_iter().enumerate() {
                        write!(f, "{reg}")?;
                        if i < reads_impl_len - 1 {
                            write!(f, ", ")?;
                        }
                    }
                    write!(f, "}}")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
