use std::collections::VecDeque;

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
    liveness::{
        InstrUid,
        LiveIntervals,
    },
    matrix::{
        AllocationOrder,
        InterferenceKind,
        LiveRegMatrix,
        RegisterClassInfo,
    },
    spiller::{
        InlineSpiller,
        LiveRangeEdit,
        Spiller,
        SpillerDelegate,
    },
    AllocatorDelegate,
    Analyses,
    AnalysisDependency,
    FxIndexSet,
    RegAllocPass,
    FULL_ANALYSIS_SET,
};

/// Naive spill-everything register allocator.
///
/// Works through a FIFO queue of vregs; every spillable vreg is spilled and
/// only the spiller's products are placed in registers. Exists as a
/// correctness baseline for the graph coloring allocator.
#[derive(Debug, Default)]
pub struct RegAlloc;

impl<TM: TargetMachine> RegAllocPass<TM> for RegAlloc {
    fn short_name(&self) -> &'static str {
        "ranaive"
    }

    fn pass_name(&self) -> &'static str {
        "Naive spill-everything register allocator"
    }

    fn required_analyses(&self) -> &'static [AnalysisDependency] {
        FULL_ANALYSIS_SET
    }

    fn run_on_function(&mut self, func: &mut Function<TM>, analyses: &mut Analyses<TM>) {
        debug!("********** NAIVE REGISTER ALLOCATION (spill all registers) **********");
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

        let seeded = func
            .vreg_ids()
            .filter(|vreg| !func.reg_nodbg_empty(*vreg))
            .collect_vec();
        let mut queue: VecDeque<VReg> = seeded.iter().copied().collect();
        let mut new_queued = 0usize;

        // Assign vregs one at a time to available physical registers.
        while let Some(vreg) = queue.pop_front() {
            debug!("Dequeued {vreg}");
            if vrm.has_phys(vreg) {
                continue;
            }
            // Unused vregs appear when the spiller coalesces snippets.
            if func.reg_nodbg_empty(vreg) {
                debug!("Dropping unused {vreg}");
                liveness.remove_interval(vreg);
                continue;
            }
            // Live ranges could have changed.
            matrix.invalidate_virt_regs(func, liveness, vrm);

            let mut split_vregs = SmallVec::new();
            let assigned = select_or_split(
                func,
                liveness,
                matrix,
                &rci,
                &mut spiller,
                &mut delegate,
                &mut dead_remats,
                vreg,
                &mut split_vregs,
            );
            if let Some(reg) = assigned {
                let interval = liveness.interval(vreg).clone();
                matrix.assign(vreg, interval, reg, vrm);
            }
            for split in split_vregs {
                debug!("Split vreg {split}");
                if func.reg_nodbg_empty(split) {
                    liveness.remove_interval(split);
                    continue;
                }
                queue.push_back(split);
                new_queued += 1;
            }
        }

        debug!("{new_queued} new live range(s) queued");
        finalize(func, liveness, vrm, &mut spiller, &mut dead_remats, &seeded);
    }
}

/// Returns the register to assign `vreg` to, or none if it was spilled
/// instead; replacements are collected into `split_vregs`.
fn select_or_split<TM: TargetMachine>(
    func: &mut Function<TM>,
    liveness: &mut LiveIntervals,
    matrix: &mut LiveRegMatrix<TM>,
    rci: &RegisterClassInfo<TM>,
    spiller: &mut InlineSpiller,
    delegate: &mut dyn SpillerDelegate,
    dead_remats: &mut FxIndexSet<InstrUid>,
    vreg: VReg,
    split_vregs: &mut SmallVec<[VReg; 4]>,
) -> Option<TM::Reg> {
    if !func.get_vreg(vreg).spillable {
        debug!("{vreg} is not spillable");
        let order = AllocationOrder::new(vreg, func, rci);
        let interval = liveness.interval(vreg).clone();
        for reg in order.iter() {
            if matrix.check_interference(func, vreg, &interval, reg) == InterferenceKind::Free {
                debug!("Allocating ${} to {vreg}", reg.name());
                return Some(reg);
            }
        }
        panic!("unable to find a physical register for unspillable {vreg}");
    }
    let mut edit = LiveRangeEdit::new(vreg, split_vregs, dead_remats, delegate);
    spiller.spill(&mut edit, func, liveness);
    // the live range was spilled, nothing gets assigned this round
    debug!("{vreg} was spilled");
    None
}
