use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::codegen::machine::{
    function::Function,
    isa::{
        PhysicalRegister,
        RegisterClass,
    },
    reg::VReg,
    TargetMachine,
};
use crate::codegen::register_allocator::{
    liveness::{
        InstrNr,
        LiveInterval,
        LiveIntervals,
        ProgPoint,
    },
    virt_reg_map::VirtRegMap,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterferenceKind {
    /// No interference, the register can be assigned.
    Free,
    /// The register or one of its aliases is reserved.
    Fixed,
    /// A register mask inside the live interval clobbers the register.
    RegMask,
    /// The interval overlaps a vreg already assigned to the register or to
    /// one of its aliases.
    Virt,
}

/// Tracks which physical registers are occupied by which live intervals,
/// including occupancy through register aliasing.
#[derive(Debug)]
pub struct LiveRegMatrix<TM: TargetMachine> {
    occupancy: FxHashMap<TM::Reg, Vec<(VReg, LiveInterval)>>,
    regmask_points: Vec<(InstrNr, &'static [TM::Reg])>,
    query_cache: FxHashMap<(VReg, TM::Reg), InterferenceKind>,
}

impl<TM: TargetMachine> LiveRegMatrix<TM> {
    pub fn new(func: &Function<TM>, liveness: &LiveIntervals) -> Self {
        Self {
            occupancy: FxHashMap::default(),
            regmask_points: collect_regmask_points(func, liveness),
            query_cache: FxHashMap::default(),
        }
    }

    pub fn check_interference(
        &mut self,
        func: &Function<TM>,
        vreg: VReg,
        interval: &LiveInterval,
        reg: TM::Reg,
    ) -> InterferenceKind {
        if let Some(cached) = self.query_cache.get(&(vreg, reg)) {
            return *cached;
        }
        let kind = self.compute_interference(func, vreg, interval, reg);
        debug!("Interference of {vreg} with ${}: {:?}", reg.name(), kind);
        self.query_cache.insert((vreg, reg), kind);
        kind
    }

    fn compute_interference(
        &self,
        func: &Function<TM>,
        vreg: VReg,
        interval: &LiveInterval,
        reg: TM::Reg,
    ) -> InterferenceKind {
        if func.is_reserved(reg) {
            return InterferenceKind::Fixed;
        }
        for (nr, clobbers) in &self.regmask_points {
            if clobbers.iter().any(|clobber| clobber.interferes_with(reg))
                && interval.contains(ProgPoint::Write(*nr))
            {
                return InterferenceKind::RegMask;
            }
        }
        for unit in reg.aliases() {
            let Some(assigned) = self.occupancy.get(&unit) else {
                continue;
            };
            for (other, other_interval) in assigned {
                if *other != vreg && interval.overlaps(other_interval) {
                    return InterferenceKind::Virt;
                }
            }
        }
        InterferenceKind::Free
    }

    /// Commits `vreg -> reg`, updating both the vreg map and the occupancy
    /// view.
    pub fn assign(
        &mut self,
        vreg: VReg,
        interval: LiveInterval,
        reg: TM::Reg,
        vrm: &mut VirtRegMap<TM>,
    ) {
        debug!("Assigning {vreg} to ${}", reg.name());
        vrm.assign_virt2phys(vreg, reg);
        self.occupancy.entry(reg).or_default().push((vreg, interval));
        self.query_cache.clear();
    }

    /// Drops every cached interference result and rebuilds occupancy and
    /// clobber points from the current function, bindings and intervals.
    /// Must be called whenever live ranges may have changed, i.e. after
    /// every spill.
    pub fn invalidate_virt_regs(
        &mut self,
        func: &Function<TM>,
        liveness: &LiveIntervals,
        vrm: &VirtRegMap<TM>,
    ) {
        debug!("Invalidating cached interference queries");
        self.query_cache.clear();
        self.regmask_points = collect_regmask_points(func, liveness);
        self.occupancy.clear();
        for (vreg, reg) in vrm.assignments() {
            if let Some(interval) = liveness.try_interval(vreg) {
                self.occupancy
                    .entry(reg)
                    .or_default()
                    .push((vreg, interval.clone()));
            }
        }
    }
}

fn collect_regmask_points<TM: TargetMachine>(
    func: &Function<TM>,
    liveness: &LiveIntervals,
) -> Vec<(InstrNr, &'static [TM::Reg])> {
    let mut points = Vec::new();
    for (nr, uid) in liveness.instr_numbering.iter_enumerated() {
        if let Some(clobbers) = func.instr(uid).regmask_clobbers() {
            debug!("Register mask at instruction {nr}");
            points.push((nr, clobbers));
        }
    }
    points
}

/// Per-class allocation orders with the function's reserved registers pruned.
///
/// Scratch data scoped to one allocator run; reserved registers must be
/// frozen before it is built.
#[derive(Debug)]
pub struct RegisterClassInfo<TM: TargetMachine> {
    orders: FxHashMap<TM::RegClass, SmallVec<[TM::Reg; 8]>>,
}

impl<TM: TargetMachine> RegisterClassInfo<TM> {
    pub fn new(func: &Function<TM>) -> Self {
        assert!(
            func.reserved_frozen(),
            "reserved registers must be frozen before allocation orders are computed"
        );
        let mut orders: FxHashMap<TM::RegClass, SmallVec<[TM::Reg; 8]>> = FxHashMap::default();
        for vreg in func.vreg_ids() {
            let class = func.get_vreg(vreg).class;
            orders.entry(class).or_insert_with(|| {
                let order: SmallVec<[TM::Reg; 8]> = class
                    .allocation_order()
                    .iter()
                    .copied()
                    .filter(|reg| !func.is_reserved(*reg))
                    .collect();
                debug!(
                    "Allocation order for class {}: {:?}",
                    class.name(),
                    order.iter().map(|reg| reg.name()).collect::<Vec<_>>()
                );
                order
            });
        }
        Self { orders }
    }

    pub fn order(&self, class: TM::RegClass) -> &[TM::Reg] {
        self.orders.get(&class).map_or(&[], SmallVec::as_slice)
    }
}

/// The sequence of candidate registers for one vreg: its class allocation
/// order, allocation hint first.
#[derive(Debug)]
pub struct AllocationOrder<TM: TargetMachine> {
    regs: SmallVec<[TM::Reg; 8]>,
}

impl<TM: TargetMachine> AllocationOrder<TM> {
    pub fn new(vreg: VReg, func: &Function<TM>, rci: &RegisterClassInfo<TM>) -> Self {
        let info = func.get_vreg(vreg);
        let mut regs: SmallVec<[TM::Reg; 8]> = rci.order(info.class).iter().copied().collect();
        if let Some(hint) = info.hint {
            if let Some(pos) = regs.iter().position(|reg| *reg == hint) {
                regs.remove(pos);
                regs.insert(0, hint);
            }
        }
        Self { regs }
    }

    pub fn iter(&self) -> impl Iterator<Item = TM::Reg> + '_ {
        self.regs.iter().copied()
    }

    pub fn regs(&self) -> &[TM::Reg] {
        &self.regs
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }
}
