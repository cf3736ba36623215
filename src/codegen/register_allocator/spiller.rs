use smallvec::SmallVec;
use tracing::debug;

use crate::codegen::machine::{
    function::Function,
    instr::{
        Instr,
        PseudoInstr,
    },
    reg::{
        Register,
        VReg,
    },
    TargetMachine,
};
use crate::codegen::register_allocator::{
    liveness::{
        InstrUid,
        LiveIntervals,
    },
    FxIndexSet,
};

/// Lifecycle callbacks the allocator hands to the spiller.
pub trait SpillerDelegate {
    /// Whether the live interval of `vreg` may be erased once it has no
    /// references left.
    fn may_erase_vreg(&mut self, vreg: VReg) -> bool;

    /// Called before an edit narrows the live range of `vreg`.
    fn will_shrink_vreg(&mut self, _vreg: VReg) {}
}

/// One spill in progress: the vreg being spilled, the sink for replacement
/// vregs, the dead instruction set and the delegate handle.
pub struct LiveRangeEdit<'a, TM: TargetMachine> {
    parent: VReg,
    new_vregs: &'a mut SmallVec<[VReg; 4]>,
    dead_remats: &'a mut FxIndexSet<InstrUid>,
    delegate: &'a mut dyn SpillerDelegate,
    marker: std::marker::PhantomData<TM>,
}

impl<'a, TM: TargetMachine> LiveRangeEdit<'a, TM> {
    pub fn new(
        parent: VReg,
        new_vregs: &'a mut SmallVec<[VReg; 4]>,
        dead_remats: &'a mut FxIndexSet<InstrUid>,
        delegate: &'a mut dyn SpillerDelegate,
    ) -> Self {
        Self {
            parent,
            new_vregs,
            dead_remats,
            delegate,
            marker: std::marker::PhantomData,
        }
    }

    pub fn parent(&self) -> VReg {
        self.parent
    }

    pub fn delegate(&mut self) -> &mut dyn SpillerDelegate {
        &mut *self.delegate
    }

    /// Creates a replacement vreg with the parent's size and class.
    ///
    /// Replacements are unspillable: spilling must shrink live ranges, and a
    /// range that is already a single def-use pair cannot shrink further.
    pub fn create_from(&mut self, func: &mut Function<TM>) -> VReg {
        let info = *func.get_vreg(self.parent);
        let vreg = func.alloc_vreg(info.size, info.class);
        func.mark_unspillable(vreg);
        self.new_vregs.push(vreg);
        debug!("Created {vreg} from {}", self.parent);
        vreg
    }

    /// Inserts an instruction, keeping recorded dead instruction positions
    /// valid.
    pub fn insert_instr(
        &mut self,
        func: &mut Function<TM>,
        at: InstrUid,
        instr: Instr<TM>,
    ) {
        if !self.dead_remats.is_empty() {
            let updated: FxIndexSet<InstrUid> = self
                .dead_remats
                .iter()
                .copied()
                .map(|uid| {
                    if uid.bb == at.bb && uid.instr >= at.instr {
                        InstrUid::new(uid.bb, uid.instr + 1)
                    } else {
                        uid
                    }
                })
                .collect();
            *self.dead_remats = updated;
        }
        func.insert_instr(at.bb, at.instr, instr);
    }

    /// Records an instruction for removal at finalization.
    pub fn mark_dead(&mut self, uid: InstrUid) {
        debug!("Marking instruction at {uid} as dead");
        self.dead_remats.insert(uid);
    }
}

pub trait Spiller<TM: TargetMachine> {
    /// Rewrites the edit's vreg against memory, enqueueing every replacement
    /// vreg on the edit.
    fn spill(
        &mut self,
        edit: &mut LiveRangeEdit<'_, TM>,
        func: &mut Function<TM>,
        liveness: &mut LiveIntervals,
    );

    /// Final cleanup hook once the allocation loop has drained.
    fn post_optimization(&mut self, func: &mut Function<TM>, liveness: &mut LiveIntervals);
}

/// Spills a vreg by rewriting every use and def against a stack slot, or by
/// re-emitting the def at each use when the def trivially rematerializes.
#[derive(Debug, Default)]
pub struct InlineSpiller {
    spilled: usize,
}

impl<TM: TargetMachine> Spiller<TM> for InlineSpiller {
    fn spill(
        &mut self,
        edit: &mut LiveRangeEdit<'_, TM>,
        func: &mut Function<TM>,
        liveness: &mut LiveIntervals,
    ) {
        let parent = edit.parent();
        debug!("Spilling {parent}");
        edit.delegate().will_shrink_vreg(parent);

        let parent_reg = Register::Virtual(parent);
        let mut refs: Vec<(InstrUid, bool, bool)> = Vec::new();
        for (bb_id, bb) in func.basic_blocks.iter_enumerated() {
            for (instr_id, instr) in bb.instructions.iter_enumerated() {
                if instr.is_debug() {
                    continue;
                }
                let reads = instr.reads().contains(&parent_reg);
                let writes = instr.writes() == Some(parent_reg);
                if reads || writes {
                    refs.push((InstrUid::new(bb_id, instr_id), reads, writes));
                }
            }
        }
        assert!(!refs.is_empty(), "spilled {parent} has no references");

        let defs = refs
            .iter()
            .filter(|(_, _, writes)| *writes)
            .map(|(uid, _, _)| *uid)
            .collect::<SmallVec<[_; 2]>>();
        let remat_def = match defs.as_slice() {
            [def] => {
                let instr = func.instr(*def);
                (instr.is_trivially_rematerializable() && instr.reads().is_empty())
                    .then_some(*def)
            }
            _ => None,
        };

        match remat_def {
            Some(def) => self.rematerialize(edit, func, parent, &refs, def),
            None => self.spill_to_slot(edit, func, parent, &refs),
        }

        if func.reg_nodbg_empty(parent) && edit.delegate().may_erase_vreg(parent) {
            liveness.remove_interval(parent);
        }
        // the edit moved instructions around, renumber and recompute
        liveness.recompute(func);
        self.spilled += 1;
    }

    fn post_optimization(&mut self, _func: &mut Function<TM>, _liveness: &mut LiveIntervals) {
        debug!("Spiller post optimization: {} vreg(s) spilled", self.spilled);
    }
}

impl InlineSpiller {
    /// Rewrites refs against a fresh stack slot: a reload in front of every
    /// use, a store behind every def.
    ///
    /// Refs are processed in reverse so insertions do not shift pending
    /// positions.
    fn spill_to_slot<TM: TargetMachine>(
        &mut self,
        edit: &mut LiveRangeEdit<'_, TM>,
        func: &mut Function<TM>,
        parent: VReg,
        refs: &[(InstrUid, bool, bool)],
    ) {
        let size = func.get_vreg(parent).size;
        let slot = func.frame_mut().create_spill_slot(size);
        debug!("Assigned {slot} to {parent}");
        for (uid, reads, writes) in refs.iter().rev().copied() {
            let vreg = edit.create_from(func);
            let replacement = Register::Virtual(vreg);
            rewrite_refs(func, uid, parent, vreg, reads, writes);
            if writes {
                edit.insert_instr(
                    func,
                    InstrUid::new(uid.bb, uid.instr + 1),
                    Instr::Pseudo(PseudoInstr::Spill {
                        slot,
                        src: replacement,
                    }),
                );
            }
            if reads {
                edit.insert_instr(
                    func,
                    uid,
                    Instr::Pseudo(PseudoInstr::Reload {
                        dest: replacement,
                        slot,
                    }),
                );
            }
        }
    }

    /// Re-emits the single rematerializable def in front of every use and
    /// marks the original def dead.
    fn rematerialize<TM: TargetMachine>(
        &mut self,
        edit: &mut LiveRangeEdit<'_, TM>,
        func: &mut Function<TM>,
        parent: VReg,
        refs: &[(InstrUid, bool, bool)],
        def: InstrUid,
    ) {
        debug!("Rematerializing {parent} at each use");
        let def_instr = func.instr(def).clone();
        for (uid, reads, _) in refs.iter().rev().copied() {
            if uid == def {
                continue;
            }
            assert!(reads, "{parent} has a second def despite rematerializing");
            let vreg = edit.create_from(func);
            rewrite_refs(func, uid, parent, vreg, true, false);
            let mut remat = def_instr.clone();
            for reg in remat.written_regs_mut() {
                if reg.try_as_virtual() == Some(parent) {
                    *reg = Register::Virtual(vreg);
                }
            }
            edit.insert_instr(func, uid, remat);
        }
        edit.mark_dead(def);
    }
}

fn rewrite_refs<TM: TargetMachine>(
    func: &mut Function<TM>,
    uid: InstrUid,
    from: VReg,
    to: VReg,
    reads: bool,
    writes: bool,
) {
    let instr = func.instr_mut(uid);
    if reads {
        for reg in instr.read_regs_mut() {
            if reg.try_as_virtual() == Some(from) {
                *reg = Register::Virtual(to);
            }
        }
    }
    if writes {
        for reg in instr.written_regs_mut() {
            if reg.try_as_virtual() == Some(from) {
                *reg = Register::Virtual(to);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use smallvec::SmallVec;
    use tracing_test::traced_test;

    use super::*;
    use crate::codegen::register_allocator::FxIndexSet;
    use crate::codegen::test_utils::{
        cmp_rr,
        create_test_function,
        gpr64,
        mov_ri,
        rdrand,
        ret,
    };

    #[derive(Default)]
    struct RecordingDelegate {
        erased: Vec<VReg>,
        shrunk: Vec<VReg>,
    }

    impl SpillerDelegate for RecordingDelegate {
        fn may_erase_vreg(&mut self, vreg: VReg) -> bool {
            self.erased.push(vreg);
            true
        }

        fn will_shrink_vreg(&mut self, vreg: VReg) {
            self.shrunk.push(vreg);
        }
    }

    #[test]
    #[traced_test]
    fn spill_to_slot_rewrites_uses_and_defs() {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(rdrand(v0));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v0));
        func.basic_blocks[bb].instructions.push(ret());
        func.build_cfg();

        let mut liveness = LiveIntervals::compute(&func);
        let mut spiller = InlineSpiller::default();
        let mut delegate = RecordingDelegate::default();
        let mut new_vregs = SmallVec::new();
        let mut dead_remats = FxIndexSet::default();
        let mut edit = LiveRangeEdit::new(v0, &mut new_vregs, &mut dead_remats, &mut delegate);
        spiller.spill(&mut edit, &mut func, &mut liveness);

        // rdrand w, spill w, reload r, cmp r, ret
        assert_eq!(func.basic_blocks[bb].instructions.len(), 5);
        assert_eq!(func.frame().num_slots(), 1);
        assert_eq!(new_vregs.len(), 2);
        assert!(func.reg_nodbg_empty(v0));
        assert!(!liveness.has_interval(v0));
        assert_eq!(delegate.shrunk, vec![v0]);
        assert_eq!(delegate.erased, vec![v0]);
        for vreg in &new_vregs {
            assert!(!func.get_vreg(*vreg).spillable);
            assert!(liveness.has_interval(*vreg));
        }
        let spills = func.basic_blocks[bb]
            .instructions
            .iter()
            .filter(|instr| matches!(instr, Instr::Pseudo(PseudoInstr::Spill { .. })))
            .count();
        let reloads = func.basic_blocks[bb]
            .instructions
            .iter()
            .filter(|instr| matches!(instr, Instr::Pseudo(PseudoInstr::Reload { .. })))
            .count();
        assert_eq!(spills, 1);
        assert_eq!(reloads, 1);
    }

    #[test]
    #[traced_test]
    fn rematerializable_def_is_reemitted_and_marked_dead() {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(mov_ri(v0, 42));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v0));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v0));
        func.basic_blocks[bb].instructions.push(ret());
        func.build_cfg();

        let mut liveness = LiveIntervals::compute(&func);
        let mut spiller = InlineSpiller::default();
        let mut delegate = RecordingDelegate::default();
        let mut new_vregs = SmallVec::new();
        let mut dead_remats = FxIndexSet::default();
        let mut edit = LiveRangeEdit::new(v0, &mut new_vregs, &mut dead_remats, &mut delegate);
        spiller.spill(&mut edit, &mut func, &mut liveness);

        // mov v0 (dead), mov r1, cmp r1, mov r0, cmp r0, ret
        assert_eq!(func.basic_blocks[bb].instructions.len(), 6);
        assert_eq!(func.frame().num_slots(), 0);
        assert_eq!(new_vregs.len(), 2);
        // the dead def still references the parent until finalization
        assert!(!func.reg_nodbg_empty(v0));
        assert_eq!(dead_remats.len(), 1);
        let dead = *dead_remats.iter().next().unwrap();
        assert_eq!(dead, InstrUid::new(bb, 0.into()));
        assert!(matches!(
            func.instr(dead).writes(),
            Some(Register::Virtual(vreg)) if vreg == v0
        ));
    }

    #[test]
    #[traced_test]
    fn two_address_instruction_gets_one_replacement() {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        let v1 = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(rdrand(v0));
        func.basic_blocks[bb].instructions.push(rdrand(v1));
        func.basic_blocks[bb]
            .instructions
            .push(crate::codegen::test_utils::add_rr(v0, v1));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v0));
        func.basic_blocks[bb].instructions.push(ret());
        func.build_cfg();

        let mut liveness = LiveIntervals::compute(&func);
        let mut spiller = InlineSpiller::default();
        let mut delegate = RecordingDelegate::default();
        let mut new_vregs = SmallVec::new();
        let mut dead_remats = FxIndexSet::default();
        let mut edit = LiveRangeEdit::new(v0, &mut new_vregs, &mut dead_remats, &mut delegate);
        spiller.spill(&mut edit, &mut func, &mut liveness);

        // def, read-modify-write and use produce one replacement each
        assert_eq!(new_vregs.len(), 3);
        assert_eq!(func.basic_blocks[bb].instructions.len(), 9);
        let stores = func.basic_blocks[bb]
            .instructions
            .iter()
            .filter(|instr| matches!(instr, Instr::Pseudo(PseudoInstr::Spill { .. })))
            .count();
        let reloads = func.basic_blocks[bb]
            .instructions
            .iter()
            .filter(|instr| matches!(instr, Instr::Pseudo(PseudoInstr::Reload { .. })))
            .count();
        assert_eq!(stores, 2);
        assert_eq!(reloads, 2);
        assert!(func.reg_nodbg_empty(v0));
    }

    #[test]
    fn insertions_keep_dead_positions_valid() {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        let v1 = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(mov_ri(v0, 1));
        func.basic_blocks[bb].instructions.push(mov_ri(v1, 2));
        func.basic_blocks[bb].instructions.push(cmp_rr(v1, v1));
        func.basic_blocks[bb].instructions.push(ret());
        func.build_cfg();

        let mut new_vregs = SmallVec::new();
        let mut dead_remats = FxIndexSet::default();
        let mut delegate = RecordingDelegate::default();
        let mut edit: LiveRangeEdit<'_, crate::codegen::targets::x86_64::Target> =
            LiveRangeEdit::new(v1, &mut new_vregs, &mut dead_remats, &mut delegate);
        edit.mark_dead(InstrUid::new(bb, 1.into()));
        // inserting in front of the recorded position shifts it
        edit.insert_instr(&mut func, InstrUid::new(bb, 0.into()), ret());
        drop(edit);
        let dead = *dead_remats.iter().next().unwrap();
        assert_eq!(dead, InstrUid::new(bb, 2.into()));
        assert!(matches!(
            func.instr(dead).writes(),
            Some(Register::Virtual(vreg)) if vreg == v1
        ));
    }
}
