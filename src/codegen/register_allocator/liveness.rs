use std::{
    cmp::Ordering,
    fmt::{
        Display,
        Formatter,
    },
};

use cranelift_entity::SecondaryMap;
use itertools::Itertools;
use rustc_hash::{
    FxHashMap,
    FxHashSet,
};
use smallvec::SmallVec;
use tracing::debug;

use crate::codegen::machine::{
    function::{
        BasicBlockId,
        Function,
    },
    instr::InstrId,
    reg::{
        Register,
        VReg,
    },
    TargetMachine,
};

pub type InstrNr = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrUid {
    pub bb: BasicBlockId,
    pub instr: InstrId,
}

impl InstrUid {
    pub fn new(bb: BasicBlockId, instr: InstrId) -> Self {
        Self { bb, instr }
    }
}

impl Display for InstrUid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.bb, self.instr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgPoint {
    Read(InstrNr),
    Write(InstrNr),
}

impl ProgPoint {
    pub const fn instr_nr(&self) -> InstrNr {
        match self {
            Self::Write(nr) | Self::Read(nr) => *nr,
        }
    }
}

impl Default for ProgPoint {
    fn default() -> Self {
        Self::Read(0)
    }
}

impl PartialOrd for ProgPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProgPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Read(a), Self::Read(b)) | (Self::Write(a), Self::Write(b)) => a.cmp(b),
            (Self::Read(a), Self::Write(b)) => {
                if a <= b {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Self::Write(a), Self::Read(b)) => {
                if a < b {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
        }
    }
}

impl Display for ProgPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgPoint::Read(nr) => write!(f, "{}r", nr),
            ProgPoint::Write(nr) => write!(f, "{}w", nr),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LiveRange {
    pub start: ProgPoint,
    pub end: ProgPoint,
}

impl LiveRange {
    pub fn new(start: ProgPoint, end: ProgPoint) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, pp: ProgPoint) -> bool {
        self.start <= pp && pp <= self.end
    }

    /// Returns true if the two live ranges overlap.
    ///
    /// Two live ranges l, j overlap iff the intersection of their ranges is
    /// not empty, i.e. l.start <= j.end and j.start <= l.end.
    ///
    /// Overlaps are **symmetric**.
    pub fn are_overlapping(l: &Self, j: &Self) -> bool {
        l.start <= j.end && j.start <= l.end
    }

    pub fn are_adjacent(l: &Self, j: &Self) -> bool {
        let are_adjacent = |j: &Self, l: &Self| match (l.end, j.start) {
            (ProgPoint::Read(a), ProgPoint::Write(b)) => a == b,
            (ProgPoint::Write(a), ProgPoint::Read(b)) => a + 1 == b,
            _ => false,
        };
        are_adjacent(l, j) || are_adjacent(j, l)
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        Self::are_overlapping(self, other)
    }
}

impl Display for LiveRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.start, self.end)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LiveInterval {
    /// List of ranges in which the vreg is live, sorted by start point.
    pub ranges: SmallVec<[LiveRange; 3]>,
}

impl LiveInterval {
    /// Adds a new range to the interval, potentially merging it with an
    /// existing adjacent one. Keeps the ranges sorted by start point.
    pub fn add_range(&mut self, range: LiveRange) {
        let mut new_ranges = SmallVec::new();
        let mut added = false;
        for existing_range in &self.ranges {
            if LiveRange::are_adjacent(existing_range, &range)
                || LiveRange::are_overlapping(existing_range, &range)
            {
                let new_range = LiveRange {
                    start: std::cmp::min(existing_range.start, range.start),
                    end: std::cmp::max(existing_range.end, range.end),
                };
                new_ranges.push(new_range);
                added = true;
            } else {
                new_ranges.push(existing_range.clone());
            }
        }
        if !added {
            new_ranges.push(range);
        }
        new_ranges.sort_by(|a: &LiveRange, b| a.start.cmp(&b.start));
        self.ranges = new_ranges;
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.ranges.iter().any(|range| {
            other
                .ranges
                .iter()
                .any(|other_range| LiveRange::are_overlapping(range, other_range))
        })
    }

    pub fn contains(&self, pp: ProgPoint) -> bool {
        self.ranges.iter().any(|range| range.contains(pp))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl Display for LiveInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (index, range) in self.ranges.iter().enumerate() {
            write!(f, "{}", range)?;
            if index < self.ranges.len() - 1 {
                write!(f, ", ")?;
            }
        }
        write!(f, "]")
    }
}

#[derive(Debug)]
pub struct InstrNumbering {
    topological_order: Vec<(BasicBlockId, u32)>,
}

impl InstrNumbering {
    pub fn new<TM: TargetMachine>(func: &Function<TM>) -> Self {
        let order = func
            .cfg()
            .ordered()
            .into_iter()
            .map(|bb| (bb, func.basic_blocks[bb].instructions.len_idx().raw()))
            .collect_vec();
        debug!("Created instruction numbering with ordering: {:?}", order);
        Self {
            topological_order: order,
        }
    }

    pub fn get_instr_uid(&self, instr_nr: InstrNr) -> Option<InstrUid> {
        let mut nr = 0;
        for (bb, instructions_len) in self.topological_order.iter().copied() {
            let next_nr = nr + instructions_len;
            if nr <= instr_nr && instr_nr < next_nr {
                return Some(InstrUid {
                    bb,
                    instr: InstrId::from_raw(instr_nr - nr),
                });
            }
            nr = next_nr;
        }
        None
    }

    pub fn get_instr_nr(&self, instr_uid: InstrUid) -> Option<InstrNr> {
        let bb_offset = self.get_bb_offset(instr_uid.bb)?;
        Some(bb_offset + instr_uid.instr.raw())
    }

    pub fn get_bb_offset(&self, bb_query: BasicBlockId) -> Option<InstrNr> {
        let mut nr = 0;
        for (bb, instr_len) in self.topological_order.iter().copied() {
            if bb == bb_query {
                return Some(nr);
            }
            nr += instr_len;
        }
        None
    }

    pub fn end_of_bb(&self, bb: BasicBlockId) -> Option<InstrNr> {
        let offset = self.get_bb_offset(bb)?;
        let len = self
            .topological_order
            .iter()
            .find(|(bb_id, _)| *bb_id == bb)?
            .1;
        if len == 0 {
            return None;
        }
        Some(offset + len - 1)
    }

    pub fn iter(&self) -> InstrNumberingIter<'_> {
        InstrNumberingIter::new(self)
    }

    pub fn iter_enumerated(&self) -> impl Iterator<Item = (InstrNr, InstrUid)> + '_ {
        self.iter()
            .enumerate()
            .map(|(nr, instr_uid)| (nr as InstrNr, instr_uid))
    }
}

pub struct InstrNumberingIter<'numbering> {
    instr_id: InstrId,
    bb: usize,
    numbering: &'numbering InstrNumbering,
}

impl<'numbering> InstrNumberingIter<'numbering> {
    pub fn new(numbering: &'numbering InstrNumbering) -> Self {
        Self {
            numbering,
            bb: 0,
            instr_id: 0.into(),
        }
    }
}

impl Iterator for InstrNumberingIter<'_> {
    type Item = InstrUid;

    fn next(&mut self) -> Option<Self::Item> {
        let (bb, instr_len) = self.numbering.topological_order.get(self.bb).copied()?;
        if instr_len <= self.instr_id.raw() {
            self.bb += 1;
            self.instr_id = 0.into();
            return self.next();
        }
        let instr_id = self.instr_id;
        self.instr_id += 1;
        Some(InstrUid {
            bb,
            instr: instr_id,
        })
    }
}

#[derive(Default, Debug)]
struct LiveSets(FxHashMap<BasicBlockId, FxHashSet<VReg>>);

impl LiveSets {
    fn insert(&mut self, bb: BasicBlockId, reg: VReg) {
        self.0.entry(bb).or_default().insert(reg);
    }

    fn remove(&mut self, bb: BasicBlockId, reg: VReg) {
        self.0.entry(bb).or_default().remove(&reg);
    }

    fn get(&self, bb: BasicBlockId) -> impl Iterator<Item = VReg> + '_ {
        self.0
            .get(&bb)
            .map(|regs| regs.iter().copied())
            .into_iter()
            .flatten()
    }
}

/// Live interval oracle: an instruction numbering plus one interval per
/// virtual register that is live somewhere in the function.
#[derive(Debug)]
pub struct LiveIntervals {
    pub instr_numbering: InstrNumbering,
    intervals: SecondaryMap<VReg, Option<LiveInterval>>,
}

impl LiveIntervals {
    pub fn compute<TM: TargetMachine>(func: &Function<TM>) -> Self {
        #[derive(Default, Clone)]
        struct IncompleteLiveRange {
            start: Option<ProgPoint>,
            end: Option<ProgPoint>,
        }

        impl IncompleteLiveRange {
            fn set_start(&mut self, pp: ProgPoint) {
                self.start = Some(pp);
            }
            fn maybe_set_end(&mut self, pp: ProgPoint) {
                if self.end.is_none() {
                    self.end = Some(pp);
                }
            }
        }

        let mut intervals = Self {
            instr_numbering: InstrNumbering::new(func),
            intervals: SecondaryMap::default(),
        };
        debug!("Starting liveness analysis for function {}", func.name);
        let mut live_sets = LiveSets::default();
        for bb_id in func.cfg().ordered().into_iter().rev() {
            let bb = &func.basic_blocks[bb_id];
            if bb.instructions.is_empty() {
                continue;
            }
            let Some(bb_offset) = intervals.instr_numbering.get_bb_offset(bb_id) else {
                continue;
            };
            let entry_pp = ProgPoint::Read(bb_offset);
            let exit_nr = bb_offset + bb.instructions.len_idx().raw() - 1;
            let exit_pp = ProgPoint::Write(exit_nr);
            let mut local_live_ranges: SecondaryMap<VReg, Option<IncompleteLiveRange>> =
                SecondaryMap::default();
            let successors = func.cfg().successors(bb_id).collect::<SmallVec<[_; 2]>>();
            for succ in successors {
                let liveset = live_sets.get(succ).collect::<SmallVec<[_; 3]>>();
                for liveout in liveset {
                    live_sets.insert(bb_id, liveout);
                    local_live_ranges[liveout] = Some(IncompleteLiveRange {
                        start: None,
                        end: Some(exit_pp),
                    });
                }
            }
            let mut instr_nr = exit_nr;
            for instr in bb.instructions.iter().rev() {
                if !instr.is_debug() {
                    if let Some(reg) = instr.writes().and_then(|reg| reg.try_as_virtual()) {
                        live_sets.remove(bb_id, reg);
                        local_live_ranges[reg]
                            .get_or_insert_with(Default::default)
                            .set_start(ProgPoint::Write(instr_nr));
                    }
                    for reg in instr.reads() {
                        let Register::Virtual(reg) = reg else {
                            continue;
                        };
                        live_sets.insert(bb_id, reg);
                        local_live_ranges[reg]
                            .get_or_insert_with(Default::default)
                            .maybe_set_end(ProgPoint::Read(instr_nr));
                    }
                }
                if let Some(val) = instr_nr.checked_sub(1) {
                    instr_nr = val;
                }
            }
            for (vreg, range) in local_live_ranges
                .iter()
                .filter_map(|(vreg, range)| range.as_ref().map(|range| (vreg, range)))
            {
                let start = range.start.unwrap_or(entry_pp);
                let range = LiveRange::new(start, range.end.unwrap_or(start));
                intervals.add_range(vreg, range);
            }
        }
        debug!("{}", intervals);
        intervals
    }

    /// Recomputes numbering and intervals from the current function body.
    ///
    /// Must be called after any edit that inserts or removes instructions.
    pub fn recompute<TM: TargetMachine>(&mut self, func: &Function<TM>) {
        *self = Self::compute(func);
    }

    pub fn interval(&self, vreg: VReg) -> &LiveInterval {
        self.try_interval(vreg)
            .unwrap_or_else(|| panic!("{vreg} has no live interval"))
    }

    pub fn try_interval(&self, vreg: VReg) -> Option<&LiveInterval> {
        self.intervals[vreg].as_ref()
    }

    pub fn has_interval(&self, vreg: VReg) -> bool {
        self.intervals[vreg].is_some()
    }

    pub fn add_range(&mut self, vreg: VReg, range: LiveRange) {
        self.intervals[vreg]
            .get_or_insert_with(LiveInterval::default)
            .add_range(range);
    }

    pub fn remove_interval(&mut self, vreg: VReg) {
        debug!("Removing live interval of {vreg}");
        self.intervals[vreg] = None;
    }

    /// Whether the intervals of two vregs overlap. Vregs without an interval
    /// overlap nothing.
    pub fn overlap(&self, a: VReg, b: VReg) -> bool {
        match (self.try_interval(a), self.try_interval(b)) {
            (Some(a), Some(b)) => a.overlaps(b),
            _ => false,
        }
    }
}

impl Display for LiveIntervals {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (vreg, interval) in self.intervals.iter() {
            if let Some(interval) = interval {
                writeln!(f, "{}: {}", vreg, interval)?;
            }
        }
        Ok(())
    }
}
