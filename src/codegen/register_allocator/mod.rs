use std::hash::BuildHasherDefault;

use itertools::Itertools;
use rustc_hash::FxHasher;
use tracing::debug;

pub use liveness::{
    InstrNr,
    InstrNumbering,
    InstrUid,
    LiveInterval,
    LiveIntervals,
    LiveRange,
    ProgPoint,
};
pub use matrix::{
    AllocationOrder,
    InterferenceKind,
    LiveRegMatrix,
    RegisterClassInfo,
};
pub use spiller::{
    InlineSpiller,
    LiveRangeEdit,
    Spiller,
    SpillerDelegate,
};
pub use virt_reg_map::VirtRegMap;

use crate::codegen::machine::{
    function::Function,
    reg::VReg,
    verify::Verifier,
    TargetMachine,
};

pub mod graph_coloring;
pub mod liveness;
pub mod matrix;
pub mod naive;
pub mod spiller;
pub mod virt_reg_map;

pub(crate) type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<FxHasher>>;
pub(crate) type FxIndexSet<T> = indexmap::IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Analyses a register allocation pass may declare a dependency on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisDependency {
    AliasAnalysis,
    SlotIndexes,
    LiveIntervals,
    LiveDebugVariables,
    LiveStacks,
    MachineBlockFrequency,
    MachineDominatorTree,
    MachineLoopInfo,
    VirtRegMap,
    LiveRegMatrix,
}

pub const FULL_ANALYSIS_SET: &[AnalysisDependency] = &[
    AnalysisDependency::AliasAnalysis,
    AnalysisDependency::SlotIndexes,
    AnalysisDependency::LiveIntervals,
    AnalysisDependency::LiveDebugVariables,
    AnalysisDependency::LiveStacks,
    AnalysisDependency::MachineBlockFrequency,
    AnalysisDependency::MachineDominatorTree,
    AnalysisDependency::MachineLoopInfo,
    AnalysisDependency::VirtRegMap,
    AnalysisDependency::LiveRegMatrix,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineFunctionProperties {
    /// The function must not contain phi nodes.
    pub no_phis: bool,
}

impl Default for MachineFunctionProperties {
    fn default() -> Self {
        Self { no_phis: true }
    }
}

/// The per-function analysis state threaded into a pass.
pub struct Analyses<TM: TargetMachine> {
    pub liveness: LiveIntervals,
    pub vrm: VirtRegMap<TM>,
    pub matrix: LiveRegMatrix<TM>,
}

impl<TM: TargetMachine> Analyses<TM> {
    pub fn compute(func: &mut Function<TM>) -> Self {
        func.build_cfg();
        let liveness = LiveIntervals::compute(func);
        let matrix = LiveRegMatrix::new(func, &liveness);
        Self {
            liveness,
            vrm: VirtRegMap::new(),
            matrix,
        }
    }
}

pub trait RegAllocPass<TM: TargetMachine> {
    /// Identifier the allocator is registered under, e.g. `rass`.
    fn short_name(&self) -> &'static str;

    /// Human readable pass name.
    fn pass_name(&self) -> &'static str;

    fn required_analyses(&self) -> &'static [AnalysisDependency] {
        FULL_ANALYSIS_SET
    }

    fn required_properties(&self) -> MachineFunctionProperties {
        MachineFunctionProperties::default()
    }

    fn run_on_function(&mut self, func: &mut Function<TM>, analyses: &mut Analyses<TM>);
}

pub struct RegAllocEntry<TM: TargetMachine> {
    pub short_name: &'static str,
    pub description: &'static str,
    factory: fn() -> Box<dyn RegAllocPass<TM>>,
}

impl<TM: TargetMachine> RegAllocEntry<TM> {
    pub fn create(&self) -> Box<dyn RegAllocPass<TM>> {
        (self.factory)()
    }
}

/// Registry of the available register allocators, keyed by short name.
pub struct RegAllocRegistry<TM: TargetMachine> {
    entries: FxIndexMap<&'static str, RegAllocEntry<TM>>,
}

impl<TM: TargetMachine> Default for RegAllocRegistry<TM> {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(
            "rass",
            "Stack-based graph coloring register allocator",
            || Box::new(graph_coloring::RegAlloc),
        );
        registry.register("ranaive", "Naive spill-everything register allocator", || {
            Box::new(naive::RegAlloc)
        });
        registry
    }
}

impl<TM: TargetMachine> RegAllocRegistry<TM> {
    pub fn new() -> Self {
        Self {
            entries: FxIndexMap::default(),
        }
    }

    pub fn register(
        &mut self,
        short_name: &'static str,
        description: &'static str,
        factory: fn() -> Box<dyn RegAllocPass<TM>>,
    ) {
        debug!("Registering register allocator {short_name} ({description})");
        self.entries.insert(
            short_name,
            RegAllocEntry {
                short_name,
                description,
                factory,
            },
        );
    }

    pub fn create(&self, short_name: &str) -> Option<Box<dyn RegAllocPass<TM>>> {
        self.entries.get(short_name).map(RegAllocEntry::create)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegAllocEntry<TM>> {
        self.entries.values()
    }
}

/// Computes the analyses, checks the pass' required properties and runs it.
///
/// The returned analyses hold the final bindings; rewriting the function body
/// against them is the caller's move (`VirtRegMap::rewrite`).
pub fn run_reg_alloc<TM: TargetMachine>(
    func: &mut Function<TM>,
    pass: &mut dyn RegAllocPass<TM>,
) -> Analyses<TM> {
    debug!("Running {} on function {}", pass.pass_name(), func.name);
    let mut analyses = Analyses::compute(func);
    if pass.required_properties().no_phis {
        for bb in &func.basic_blocks {
            assert!(
                bb.phis.is_empty(),
                "{} requires a phi-free function, but {} has phis",
                pass.pass_name(),
                bb.id
            );
        }
    }
    pass.run_on_function(func, &mut analyses);
    analyses
}

/// Shared finalization: spiller hook, dead instruction drain, binding checks,
/// map dump and the verifier.
pub(crate) fn finalize<TM: TargetMachine>(
    func: &mut Function<TM>,
    liveness: &mut LiveIntervals,
    vrm: &VirtRegMap<TM>,
    spiller: &mut dyn Spiller<TM>,
    dead_remats: &mut FxIndexSet<InstrUid>,
    seeded: &[VReg],
) {
    spiller.post_optimization(func, liveness);
    if !dead_remats.is_empty() {
        // delete per block bottom-up so recorded positions stay valid
        let mut dead = dead_remats.drain(..).collect_vec();
        dead.sort_unstable_by_key(|uid| (uid.bb, std::cmp::Reverse(uid.instr)));
        for uid in dead {
            debug!("Removing dead instruction at {uid}");
            func.remove_instr(uid);
        }
        liveness.recompute(func);
    }
    for vreg in seeded.iter().copied() {
        // a vreg the spiller rewrote away has nothing left to bind
        assert!(
            vrm.has_phys(vreg) || func.reg_nodbg_empty(vreg),
            "{vreg} has no register assigned after allocation"
        );
    }
    debug!("Post alloc virtual register map:\n{vrm}");
    let errors = Verifier::new(func).verify();
    assert!(
        errors.is_empty(),
        "machine verifier failed after register allocation: {}",
        errors.iter().map(ToString::to_string).join("; ")
    );
}

/// Lifecycle handle the allocators pass to the spiller: erasing a vreg that
/// lost all its references is always fine, shrinking is only observed.
#[derive(Debug, Default)]
pub(crate) struct AllocatorDelegate;

impl SpillerDelegate for AllocatorDelegate {
    fn may_erase_vreg(&mut self, vreg: VReg) -> bool {
        debug!("Allowing erasure of {vreg}");
        true
    }

    fn will_shrink_vreg(&mut self, vreg: VReg) {
        debug!("{vreg} is about to shrink");
    }
}
