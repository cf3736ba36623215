use std::cmp::Ordering;

use itertools::Itertools;
use smallvec::SmallVec;
use tracing::debug;

use crate::codegen::machine::{
    function::Function,
    isa::PhysicalRegister,
    reg::VReg,
    TargetMachine,
};
use crate::codegen::register_allocator::{
    finalize,
    liveness::LiveIntervals,
    matrix::{
        AllocationOrder,
        RegisterClassInfo,
    },
    spiller::{
        InlineSpiller,
        LiveRangeEdit,
        Spiller,
    },
    AllocatorDelegate,
    Analyses,
    AnalysisDependency,
    FxIndexMap,
    FxIndexSet,
    RegAllocPass,
    FULL_ANALYSIS_SET,
};

/// Undirected interference graph over virtual registers: an edge iff the
/// live intervals overlap.
///
/// Nodes live in an insertion-ordered map so every traversal is deterministic;
/// colors survive node removal.
#[derive(Debug)]
pub struct InterferenceGraph<TM: TargetMachine> {
    neighbors: FxIndexMap<VReg, Vec<VReg>>,
    colors: FxIndexMap<VReg, TM::Reg>,
}

impl<TM: TargetMachine> InterferenceGraph<TM> {
    pub fn build(vregs: &[VReg], liveness: &LiveIntervals) -> Self {
        let mut graph = Self {
            neighbors: FxIndexMap::default(),
            colors: FxIndexMap::default(),
        };
        for vreg in vregs {
            graph.neighbors.insert(*vreg, Vec::new());
        }
        for (i, u) in vregs.iter().copied().enumerate() {
            for v in vregs[i + 1..].iter().copied() {
                if liveness.overlap(u, v) {
                    debug!("{u} interferes with {v}");
                    graph.neighbors[&u].push(v);
                    graph.neighbors[&v].push(u);
                }
            }
        }
        graph
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn contains(&self, vreg: VReg) -> bool {
        self.neighbors.contains_key(&vreg)
    }

    pub fn degree(&self, vreg: VReg) -> usize {
        self.neighbors
            .get(&vreg)
            .unwrap_or_else(|| panic!("{vreg} is not in the graph"))
            .len()
    }

    /// Any node with degree < k; first one in seed order. Callers must not
    /// rely on which qualifying node is returned.
    pub fn find_degree_less_than(&self, k: usize) -> Option<VReg> {
        self.neighbors
            .iter()
            .find(|(_, neighbors)| neighbors.len() < k)
            .map(|(vreg, _)| *vreg)
    }

    /// The maximum node under `compare`, which must be a total order over the
    /// present nodes.
    pub fn pick_by(&self, compare: impl Fn(VReg, VReg) -> Ordering) -> VReg {
        self.neighbors
            .keys()
            .copied()
            .max_by(|a, b| compare(*a, *b))
            .expect("pick_by on an empty graph")
    }

    pub fn remove(&mut self, vreg: VReg) {
        let neighbors = self
            .neighbors
            .shift_remove(&vreg)
            .unwrap_or_else(|| panic!("{vreg} is not in the graph"));
        for neighbor in neighbors {
            self.neighbors
                .get_mut(&neighbor)
                .expect("adjacency listed a vreg that is not in the graph")
                .retain(|reg| *reg != vreg);
        }
    }

    /// Re-adds `vreg`, deriving its adjacency from the interval oracle (the
    /// intervals may have changed since removal), and colors it with the
    /// first candidate that aliases no color of a present neighbor.
    ///
    /// On failure the node stays in the graph uncolored.
    pub fn reinsert_and_color(
        &mut self,
        vreg: VReg,
        candidates: &[TM::Reg],
        liveness: &LiveIntervals,
    ) -> Option<TM::Reg> {
        assert!(!self.contains(vreg), "{vreg} is already in the graph");
        let neighbors = self
            .neighbors
            .keys()
            .copied()
            .filter(|other| liveness.overlap(vreg, *other))
            .collect_vec();
        for neighbor in neighbors.iter().copied() {
            self.neighbors[&neighbor].push(vreg);
        }
        self.neighbors.insert(vreg, neighbors);
        let color = candidates.iter().copied().find(|candidate| {
            self.neighbors[&vreg].iter().all(|neighbor| {
                self.colors
                    .get(neighbor)
                    .map_or(true, |color| !color.interferes_with(*candidate))
            })
        });
        match color {
            Some(color) => {
                debug!("Colored {vreg} with ${}", color.name());
                self.colors.insert(vreg, color);
                Some(color)
            }
            None => {
                debug!("Found no color for {vreg}");
                None
            }
        }
    }

    pub fn color_of(&self, vreg: VReg) -> Option<TM::Reg> {
        self.colors.get(&vreg).copied()
    }
}

const MAX_SELECT_ITERATIONS_PER_VREG: usize = 8;

/// Stack-based graph coloring register allocator.
///
/// Simplify removes trivially colorable nodes onto a stack, select colors
/// them in reverse order; nodes that fail to color are spilled and the
/// spiller's replacement vregs are fed back onto the stack.
#[derive(Debug, Default)]
pub struct RegAlloc;

impl<TM: TargetMachine> RegAllocPass<TM> for RegAlloc {
    fn short_name(&self) -> &'static str {
        "rass"
    }

    fn pass_name(&self) -> &'static str {
        "Stack-based graph coloring register allocator"
    }

    fn required_analyses(&self) -> &'static [AnalysisDependency] {
        FULL_ANALYSIS_SET
    }

    fn run_on_function(&mut self, func: &mut Function<TM>, analyses: &mut Analyses<TM>) {
        debug!("********** GRAPH COLORING REGISTER ALLOCATION **********");
        debug!("********** Function: {}", func.name);
        let Analyses {
            liveness,
            vrm,
            matrix,
        } = analyses;
        func.freeze_reserved_regs();
        let rci = RegisterClassInfo::new(func);
        let mut spiller = InlineSpiller::default();
        let mut delegate = AllocatorDelegate;
        let mut dead_remats = FxIndexSet::default();

        // Seed: every vreg with a non-debug reference participates.
        let seeded = func
            .vreg_ids()
            .filter(|vreg| !func.reg_nodbg_empty(*vreg))
            .collect_vec();
        if seeded.is_empty() {
            debug!("No virtual registers to allocate");
            finalize(func, liveness, vrm, &mut spiller, &mut dead_remats, &seeded);
            return;
        }

        let k = seeded
            .iter()
            .map(|vreg| rci.order(func.get_vreg(*vreg).class).len())
            .min()
            .expect("seed set is non-empty");
        debug!("k = {k}");

        let mut graph = InterferenceGraph::<TM>::build(&seeded, liveness);

        // Simplify: push trivially colorable nodes, then optimistic spill
        // candidates, onto the stack.
        let mut stack: Vec<VReg> = Vec::with_capacity(seeded.len());
        while !graph.is_empty() {
            if let Some(vreg) = graph.find_degree_less_than(k) {
                debug!("Simplified {vreg} (degree {} < {k})", graph.degree(vreg));
                graph.remove(vreg);
                stack.push(vreg);
            } else {
                // may still color during select once its neighbors are placed
                let vreg = graph.pick_by(|a, b| a.cmp(&b));
                debug!("Spill heuristic chose {vreg}");
                graph.remove(vreg);
                stack.push(vreg);
            }
        }

        // Select: color in reverse removal order, spilling on failure.
        let max_iterations = MAX_SELECT_ITERATIONS_PER_VREG * seeded.len() + 16;
        let mut iterations = 0usize;
        while let Some(vreg) = stack.pop() {
            iterations += 1;
            assert!(
                iterations <= max_iterations,
                "register allocation of function {} did not converge within {max_iterations} select iterations",
                func.name
            );
            if vrm.has_phys(vreg) {
                continue;
            }
            let order = AllocationOrder::new(vreg, func, &rci);
            match graph.reinsert_and_color(vreg, order.regs(), liveness) {
                Some(reg) => {
                    let interval = liveness.interval(vreg).clone();
                    matrix.assign(vreg, interval, reg, vrm);
                }
                None => {
                    let mut new_vregs = SmallVec::new();
                    let mut edit =
                        LiveRangeEdit::new(vreg, &mut new_vregs, &mut dead_remats, &mut delegate);
                    spiller.spill(&mut edit, func, liveness);
                    matrix.invalidate_virt_regs(func, liveness, vrm);
                    assert!(
                        !new_vregs.is_empty() || func.reg_nodbg_empty(vreg),
                        "spilling {vreg} made no progress"
                    );
                    for new_vreg in new_vregs {
                        if func.reg_nodbg_empty(new_vreg) {
                            liveness.remove_interval(new_vreg);
                            continue;
                        }
                        debug!("Queued {new_vreg} for coloring");
                        stack.push(new_vreg);
                    }
                }
            }
        }

        finalize(func, liveness, vrm, &mut spiller, &mut dead_remats, &seeded);
    }
}

#[cfg(test)]
mod allocation_tests {
    use itertools::Itertools;
    use tracing_test::traced_test;

    use super::*;
    use crate::codegen::machine::{
        instr::{
            Instr,
            PseudoInstr,
        },
        verify::Verifier,
    };
    use crate::codegen::register_allocator::{
        run_reg_alloc,
        Analyses,
    };
    use crate::codegen::targets::x86_64::{
        Backend,
        PhysicalRegister,
        Target,
    };
    use crate::codegen::test_utils::{
        cmp_rr,
        create_test_function,
        gpr64,
        jcc,
        jmp,
        mov_ri,
        mov_rr,
        rdrand,
        reserve_all_but,
        ret,
    };

    /// Three vregs in one block whose intervals are pairwise disjoint.
    fn disjoint_chain() -> (Function<Target>, [VReg; 3]) {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        let v1 = gpr64(&mut func);
        let v2 = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(mov_ri(v0, 5));
        func.basic_blocks[bb].instructions.push(mov_rr(v1, v0));
        func.basic_blocks[bb].instructions.push(mov_rr(v2, v1));
        func.basic_blocks[bb].instructions.push(ret());
        (func, [v0, v1, v2])
    }

    /// Three mutually interfering vregs; the comparator-maximum (`v2`) can be
    /// rematerialized.
    fn interfering_triple() -> (Function<Target>, [VReg; 3]) {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        let v1 = gpr64(&mut func);
        let v2 = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(mov_ri(v0, 1));
        func.basic_blocks[bb].instructions.push(mov_ri(v1, 2));
        func.basic_blocks[bb].instructions.push(mov_ri(v2, 3));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v1));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v0));
        func.basic_blocks[bb].instructions.push(cmp_rr(v1, v1));
        func.basic_blocks[bb].instructions.push(cmp_rr(v2, v2));
        func.basic_blocks[bb].instructions.push(cmp_rr(v2, v2));
        func.basic_blocks[bb].instructions.push(ret());
        reserve_all_but(&mut func, &[PhysicalRegister::RAX, PhysicalRegister::RCX]);
        (func, [v0, v1, v2])
    }

    /// A clique of three where the comparator-maximum (`vc`, allocated last
    /// but defined first) is live across the region in which the other two
    /// interfere, and its def is not rematerializable.
    fn live_through_triple() -> (Function<Target>, [VReg; 3]) {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        let v1 = gpr64(&mut func);
        let vc = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(rdrand(vc));
        func.basic_blocks[bb].instructions.push(cmp_rr(vc, vc));
        func.basic_blocks[bb].instructions.push(rdrand(v0));
        func.basic_blocks[bb].instructions.push(rdrand(v1));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v1));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v0));
        func.basic_blocks[bb].instructions.push(cmp_rr(v1, v1));
        func.basic_blocks[bb].instructions.push(cmp_rr(vc, vc));
        func.basic_blocks[bb].instructions.push(ret());
        reserve_all_but(&mut func, &[PhysicalRegister::RAX, PhysicalRegister::RCX]);
        (func, [v0, v1, vc])
    }

    fn assert_bindings_respect_interference(analyses: &Analyses<Target>) {
        use crate::codegen::machine::isa::PhysicalRegister as _;
        let bound = analyses.vrm.assignments().collect_vec();
        for (i, (u, u_reg)) in bound.iter().copied().enumerate() {
            for (v, v_reg) in bound[i + 1..].iter().copied() {
                if analyses.liveness.overlap(u, v) {
                    assert!(
                        !u_reg.interferes_with(v_reg),
                        "{u} (${}) and {v} (${}) overlap but alias",
                        u_reg.name(),
                        v_reg.name()
                    );
                }
            }
        }
    }

    #[test]
    #[traced_test]
    fn disjoint_intervals_reuse_the_first_register() {
        let (mut func, [v0, v1, v2]) = disjoint_chain();
        reserve_all_but(&mut func, &[PhysicalRegister::RAX, PhysicalRegister::RCX]);
        let analyses = run_reg_alloc(&mut func, &mut RegAlloc);
        assert_eq!(analyses.vrm.phys(v0), Some(PhysicalRegister::RAX));
        assert_eq!(analyses.vrm.phys(v1), Some(PhysicalRegister::RAX));
        assert_eq!(analyses.vrm.phys(v2), Some(PhysicalRegister::RAX));
        assert_eq!(func.frame().num_slots(), 0);
    }

    #[test]
    #[traced_test]
    fn interfering_pair_gets_two_registers() {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        let v1 = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(mov_ri(v0, 1));
        func.basic_blocks[bb].instructions.push(mov_ri(v1, 2));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v1));
        func.basic_blocks[bb].instructions.push(ret());
        reserve_all_but(&mut func, &[PhysicalRegister::RAX, PhysicalRegister::RCX]);

        let analyses = run_reg_alloc(&mut func, &mut RegAlloc);
        assert_eq!(analyses.vrm.phys(v1), Some(PhysicalRegister::RAX));
        assert_eq!(analyses.vrm.phys(v0), Some(PhysicalRegister::RCX));
        assert_eq!(func.frame().num_slots(), 0);
        assert_bindings_respect_interference(&analyses);
    }

    #[test]
    #[traced_test]
    fn interfering_triple_spills_the_heuristic_pick() {
        let (mut func, [v0, v1, v2]) = interfering_triple();
        let analyses = run_reg_alloc(&mut func, &mut RegAlloc);

        assert_eq!(analyses.vrm.phys(v1), Some(PhysicalRegister::RAX));
        assert_eq!(analyses.vrm.phys(v0), Some(PhysicalRegister::RCX));
        // the heuristic pick was rematerialized instead of taking a register
        assert!(!analyses.vrm.has_phys(v2));
        assert!(func.reg_nodbg_empty(v2));
        assert!(!analyses.liveness.has_interval(v2));
        // two replacements, one per use, both colored
        assert_eq!(analyses.vrm.num_assigned(), 4);
        // the dead def was drained from the function body
        assert_eq!(func.basic_blocks.iter().next().unwrap().instructions.len(), 10);
        assert!(!func
            .basic_blocks
            .iter()
            .flat_map(|bb| bb.instructions.iter())
            .any(|instr| instr.references(crate::codegen::machine::Register::Virtual(v2))));
        assert_bindings_respect_interference(&analyses);
    }

    #[test]
    #[traced_test]
    fn non_rematerializable_spill_goes_through_a_stack_slot() {
        let (mut func, [v0, v1, vc]) = live_through_triple();
        let analyses = run_reg_alloc(&mut func, &mut RegAlloc);

        assert_eq!(analyses.vrm.phys(v1), Some(PhysicalRegister::RAX));
        assert_eq!(analyses.vrm.phys(v0), Some(PhysicalRegister::RCX));
        assert!(!analyses.vrm.has_phys(vc));
        assert_eq!(func.frame().num_slots(), 1);
        // def replacement + two use replacements
        assert_eq!(analyses.vrm.num_assigned(), 5);
        let bb = func.basic_blocks.iter().next().unwrap();
        let stores = bb
            .instructions
            .iter()
            .filter(|instr| matches!(instr, Instr::Pseudo(PseudoInstr::Spill { .. })))
            .count();
        let reloads = bb
            .instructions
            .iter()
            .filter(|instr| matches!(instr, Instr::Pseudo(PseudoInstr::Reload { .. })))
            .count();
        assert_eq!(stores, 1);
        assert_eq!(reloads, 2);
        assert_bindings_respect_interference(&analyses);
    }

    #[test]
    #[traced_test]
    fn forced_spill_with_a_single_register() {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        let v1 = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(rdrand(v0));
        func.basic_blocks[bb].instructions.push(mov_ri(v1, 7));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v0));
        func.basic_blocks[bb].instructions.push(cmp_rr(v1, v1));
        func.basic_blocks[bb].instructions.push(ret());
        reserve_all_but(&mut func, &[PhysicalRegister::RAX]);

        let analyses = run_reg_alloc(&mut func, &mut RegAlloc);
        assert_eq!(analyses.vrm.phys(v0), Some(PhysicalRegister::RAX));
        assert!(!analyses.vrm.has_phys(v1));
        // the rematerialized use landed in the same register
        assert_eq!(analyses.vrm.num_assigned(), 2);
        assert!(analyses
            .vrm
            .assignments()
            .all(|(_, reg)| reg == PhysicalRegister::RAX));
        // dead def cleanup: the original immediate move is gone
        assert_eq!(func.basic_blocks[bb].instructions.len(), 5);
        assert!(!analyses.liveness.has_interval(v1));
        assert!(Verifier::new(&func).verify().is_empty());
    }

    #[test]
    #[traced_test]
    fn single_vreg_single_candidate_binds() {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(rdrand(v0));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v0));
        func.basic_blocks[bb].instructions.push(ret());
        reserve_all_but(&mut func, &[PhysicalRegister::RAX]);

        let analyses = run_reg_alloc(&mut func, &mut RegAlloc);
        assert_eq!(analyses.vrm.phys(v0), Some(PhysicalRegister::RAX));
    }

    #[test]
    #[traced_test]
    fn prebound_function_gets_no_new_bindings() {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        let v1 = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(mov_ri(v0, 1));
        func.basic_blocks[bb].instructions.push(mov_ri(v1, 2));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v1));
        func.basic_blocks[bb].instructions.push(ret());
        reserve_all_but(&mut func, &[PhysicalRegister::RAX, PhysicalRegister::RCX]);

        let mut analyses = Analyses::compute(&mut func);
        let interval0 = analyses.liveness.interval(v0).clone();
        let interval1 = analyses.liveness.interval(v1).clone();
        analyses
            .matrix
            .assign(v0, interval0, PhysicalRegister::RCX, &mut analyses.vrm);
        analyses
            .matrix
            .assign(v1, interval1, PhysicalRegister::RAX, &mut analyses.vrm);

        RegAlloc.run_on_function(&mut func, &mut analyses);
        assert_eq!(analyses.vrm.num_assigned(), 2);
        assert_eq!(analyses.vrm.phys(v0), Some(PhysicalRegister::RCX));
        assert_eq!(analyses.vrm.phys(v1), Some(PhysicalRegister::RAX));
        assert_eq!(func.frame().num_slots(), 0);
    }

    #[test]
    #[traced_test]
    fn allocation_is_deterministic() {
        let (mut first, _) = interfering_triple();
        let (mut second, _) = interfering_triple();
        let first_bindings = run_reg_alloc(&mut first, &mut RegAlloc)
            .vrm
            .assignments()
            .collect_vec();
        let second_bindings = run_reg_alloc(&mut second, &mut RegAlloc)
            .vrm
            .assignments()
            .collect_vec();
        assert_eq!(first_bindings, second_bindings);
    }

    #[test]
    #[traced_test]
    fn control_flow_graph_is_preserved() {
        let mut func = create_test_function();
        let bb0 = func.create_bb();
        let bb1 = func.create_bb();
        let bb2 = func.create_bb();
        let v0 = gpr64(&mut func);
        func.basic_blocks[bb0].instructions.push(rdrand(v0));
        func.basic_blocks[bb0].instructions.push(jcc(bb2));
        func.basic_blocks[bb0].instructions.push(jmp(bb1));
        func.basic_blocks[bb1].instructions.push(cmp_rr(v0, v0));
        func.basic_blocks[bb1].instructions.push(jmp(bb2));
        func.basic_blocks[bb2].instructions.push(ret());
        func.build_cfg();
        let successors_before = func
            .basic_blocks
            .indices()
            .map(|bb| func.cfg().successors(bb).sorted().collect_vec())
            .collect_vec();
        let num_blocks_before = func.basic_blocks.len();

        let _analyses = run_reg_alloc(&mut func, &mut RegAlloc);

        func.build_cfg();
        let successors_after = func
            .basic_blocks
            .indices()
            .map(|bb| func.cfg().successors(bb).sorted().collect_vec())
            .collect_vec();
        assert_eq!(num_blocks_before, func.basic_blocks.len());
        assert_eq!(successors_before, successors_after);
    }

    #[test]
    #[traced_test]
    fn rewrite_and_expansion_produce_a_physical_function() {
        let (mut func, _) = live_through_triple();
        let analyses = run_reg_alloc(&mut func, &mut RegAlloc);

        analyses.vrm.rewrite(&mut func);
        assert!(Verifier::after_rewrite(&func).verify().is_empty());

        func.expand_pseudo_instructions::<Backend>();
        assert!(!func
            .basic_blocks
            .iter()
            .flat_map(|bb| bb.instructions.iter())
            .any(|instr| matches!(instr, Instr::Pseudo(_))));
        let machine_names = func
            .basic_blocks
            .iter()
            .flat_map(|bb| bb.instructions.iter())
            .map(crate::codegen::machine::Instr::name)
            .collect_vec();
        assert!(machine_names.contains(&"MOV64mr"));
        assert!(machine_names.contains(&"MOV64rm"));
    }

    #[test]
    #[traced_test]
    fn debug_only_vregs_do_not_participate() {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        let shadow = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(rdrand(v0));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v0));
        func.basic_blocks[bb]
            .instructions
            .push(crate::codegen::test_utils::dbg_value(shadow));
        func.basic_blocks[bb].instructions.push(ret());
        reserve_all_but(&mut func, &[PhysicalRegister::RAX]);

        let analyses = run_reg_alloc(&mut func, &mut RegAlloc);
        assert_eq!(analyses.vrm.phys(v0), Some(PhysicalRegister::RAX));
        assert!(!analyses.vrm.has_phys(shadow));

        // rewriting drops the debug value of the never-defined vreg
        analyses.vrm.rewrite(&mut func);
        assert_eq!(func.basic_blocks[bb].instructions.len(), 3);
        assert!(Verifier::after_rewrite(&func).verify().is_empty());
    }

    #[test]
    #[traced_test]
    #[should_panic(expected = "did not converge")]
    fn unallocatable_pressure_hits_the_iteration_cap() {
        let mut func = create_test_function();
        let bb = func.create_bb();
        let v0 = gpr64(&mut func);
        let v1 = gpr64(&mut func);
        func.basic_blocks[bb].instructions.push(rdrand(v0));
        func.basic_blocks[bb].instructions.push(rdrand(v1));
        func.basic_blocks[bb].instructions.push(cmp_rr(v0, v0));
        func.basic_blocks[bb].instructions.push(cmp_rr(v1, v1));
        func.basic_blocks[bb].instructions.push(ret());
        // two values are live at the same point but only one register exists,
        // and neither def rematerializes
        reserve_all_but(&mut func, &[PhysicalRegister::RAX]);

        run_reg_alloc(&mut func, &mut RegAlloc);
    }
}
