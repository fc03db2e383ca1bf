//! Unit-granular interference tracking over committed assignments.
//!
//! One `BTreeMap` per register unit holds the committed code ranges on
//! that unit. The engine only ever asks `check_interference`; commits,
//! removals, and cache invalidation are driven by the worklist scheduler.

use super::regfile::RegFile;
use crate::{CodeRange, FxHashMap, FxHashSet, LiveRange, PReg, VReg};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Key whose equality is *overlap*: two keys compare `Equal` iff their
/// half-open ranges intersect. Committed ranges on a single unit never
/// overlap, so the map keeps a valid total order and a lookup finds
/// exactly the entries that intersect the probe.
#[derive(Clone, Copy, Debug)]
pub struct LiveRangeKey {
    pub from: u32,
    pub to: u32,
}

impl LiveRangeKey {
    #[inline(always)]
    pub fn from_range(range: &CodeRange) -> Self {
        Self {
            from: range.from.to_index(),
            to: range.to.to_index(),
        }
    }
}

impl core::cmp::PartialEq for LiveRangeKey {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.to > other.from && self.from < other.to
    }
}
impl core::cmp::Eq for LiveRangeKey {}
impl core::cmp::PartialOrd for LiveRangeKey {
    #[inline(always)]
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl core::cmp::Ord for LiveRangeKey {
    #[inline(always)]
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        if self.to <= other.from {
            core::cmp::Ordering::Less
        } else if self.from >= other.to {
            core::cmp::Ordering::Greater
        } else {
            core::cmp::Ordering::Equal
        }
    }
}

/// Committed ranges on one register unit. `VReg::invalid()` marks a
/// permanent reservation rather than a reassignable virtual occupant.
#[derive(Clone, Debug)]
pub struct LiveRangeSet {
    pub btree: BTreeMap<LiveRangeKey, VReg>,
}

impl LiveRangeSet {
    pub(crate) fn new() -> Self {
        Self {
            btree: BTreeMap::new(),
        }
    }
}

/// Classification of a (live range, candidate register) probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InterferenceKind {
    /// No committed range overlaps any unit of the candidate over the
    /// whole probed span.
    Free,
    /// Overlap with committed assignments of other virtual registers:
    /// every current occupant that would have to move for the candidate
    /// to become free. The only category eligible for eviction.
    VRegs(SmallVec<[VReg; 4]>),
    /// Overlap with a permanent reservation or another non-reassignable
    /// unit. Never a spill candidate.
    RegUnit,
}

pub struct LiveUnitMatrix {
    units: Vec<LiveRangeSet>,
    /// Classification cache per (vreg, candidate) query. Stale whenever
    /// an assignment changes; the scheduler invalidates before the next
    /// pop.
    cache: FxHashMap<(VReg, PReg), InterferenceKind>,
    dirty: bool,
}

impl LiveUnitMatrix {
    /// Build the matrix for one allocation unit, blocking the units of
    /// every reserved register for the whole code range up front.
    pub fn new(regfile: &RegFile) -> Self {
        let mut units: Vec<LiveRangeSet> =
            (0..regfile.num_units()).map(|_| LiveRangeSet::new()).collect();
        let whole = LiveRangeKey {
            from: 0,
            to: u32::MAX,
        };
        for &preg in regfile.reserved_regs() {
            for &unit in regfile.units(preg) {
                units[unit.index()].btree.insert(whole, VReg::invalid());
            }
        }
        Self {
            units,
            cache: FxHashMap::default(),
            dirty: false,
        }
    }

    pub fn check_interference(
        &mut self,
        vreg: VReg,
        range: &LiveRange,
        preg: PReg,
        regfile: &RegFile,
    ) -> InterferenceKind {
        if let Some(cached) = self.cache.get(&(vreg, preg)) {
            trace!("{} vs {}: cached {:?}", vreg, preg, cached);
            return cached.clone();
        }
        let kind = self.compute_interference(range, preg, regfile);
        trace!("{} vs {}: {:?}", vreg, preg, kind);
        self.cache.insert((vreg, preg), kind.clone());
        kind
    }

    fn compute_interference(
        &self,
        range: &LiveRange,
        preg: PReg,
        regfile: &RegFile,
    ) -> InterferenceKind {
        let mut occupants: SmallVec<[VReg; 4]> = SmallVec::new();
        let mut seen: FxHashSet<VReg> = FxHashSet::default();
        for &unit in regfile.units(preg) {
            let set = &self.units[unit.index()];
            for probe in range.ranges() {
                let start = LiveRangeKey {
                    from: probe.from.to_index(),
                    to: probe.from.to_index(),
                };
                for (key, &occupant) in set.btree.range(start..) {
                    if key.from >= probe.to.to_index() {
                        break;
                    }
                    if occupant == VReg::invalid() {
                        return InterferenceKind::RegUnit;
                    }
                    if seen.insert(occupant) {
                        occupants.push(occupant);
                    }
                }
            }
        }
        if occupants.is_empty() {
            InterferenceKind::Free
        } else {
            InterferenceKind::VRegs(occupants)
        }
    }

    /// Commit `vreg`'s range to every unit of `preg`.
    pub fn assign(&mut self, vreg: VReg, range: &LiveRange, preg: PReg, regfile: &RegFile) {
        trace!("matrix: assign {} to {}", vreg, preg);
        for &unit in regfile.units(preg) {
            for cr in range.ranges() {
                let res = self.units[unit.index()]
                    .btree
                    .insert(LiveRangeKey::from_range(cr), vreg);
                // Committed ranges on one unit never overlap.
                debug_assert!(res.is_none());
            }
        }
        self.dirty = true;
    }

    /// Remove a committed assignment (eviction path).
    pub fn unassign(&mut self, vreg: VReg, range: &LiveRange, preg: PReg, regfile: &RegFile) {
        trace!("matrix: unassign {} from {}", vreg, preg);
        for &unit in regfile.units(preg) {
            for cr in range.ranges() {
                let res = self.units[unit.index()]
                    .btree
                    .remove(&LiveRangeKey::from_range(cr));
                debug_assert_eq!(res, Some(vreg));
            }
        }
        self.dirty = true;
    }

    /// Has any assignment changed since the cache was last invalidated?
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn invalidate_cached_queries(&mut self) {
        trace!("matrix: interference cache invalidated");
        self.cache.clear();
        self.dirty = false;
    }
}
