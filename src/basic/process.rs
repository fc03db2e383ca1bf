//! Main allocation loop: pops pending live ranges, probes the candidate
//! order, and resolves conflicts by eviction or spill.

use super::data_structures::{Env, VRegIndex, VRegState};
use super::matrix::InterferenceKind;
use super::order::AllocationOrder;
use crate::{Function, PReg, RegAllocError, SpillWeight, Spiller, VReg};
use smallvec::SmallVec;

/// The decision produced for one live range. The engine only decides; the
/// scheduler performs the commit, evictions, requeues, and spiller call.
#[derive(Clone, Debug)]
pub enum Selection {
    /// Take this free register.
    Assign(PReg),
    /// Evict `victims` (the current occupants of `preg`'s units), requeue
    /// them, then take `preg`.
    Evict {
        preg: PReg,
        victims: SmallVec<[VReg; 4]>,
    },
    /// Hand the range to the spiller; no register this cycle.
    Spill,
}

impl<'a, F: Function, S: Spiller> Env<'a, F, S> {
    pub fn process_worklist(&mut self) -> Result<(), RegAllocError> {
        let mut pops = 0usize;
        while let Some(vix) = self.worklist.pop() {
            pops += 1;
            // Eviction requires a strictly lower weight, so requeues are
            // bounded; runaway popping means the policy is broken.
            debug_assert!(pops <= 100 * self.vregs.len() + 100);

            let reg = self.vregs[vix.index()].reg;
            if !self.func.has_nondebug_uses(reg) {
                trace!("{}: only debug uses remain; discarding", reg);
                self.vregs[vix.index()].state = VRegState::Discarded;
                self.discarded.push(reg);
                self.func.retire_live_range(reg);
                self.stats.discarded += 1;
                continue;
            }

            // Any assignment change since the last pop leaves stale
            // cached classifications behind.
            if self.matrix.is_dirty() {
                self.matrix.invalidate_cached_queries();
            }

            match self.select_or_spill(vix)? {
                Selection::Assign(preg) => {
                    self.commit(vix, preg);
                }
                Selection::Evict { preg, victims } => {
                    for victim in victims {
                        self.evict(victim);
                    }
                    self.commit(vix, preg);
                }
                Selection::Spill => {
                    let slot = self
                        .spiller
                        .spill(reg)
                        .map_err(|_| RegAllocError::SpillFailed(reg))?;
                    trace!("{} spilled to {}", reg, slot);
                    self.vregs[vix.index()].state = VRegState::Spilled(slot);
                    self.stats.spills += 1;
                }
            }
        }
        Ok(())
    }

    /// The selection engine. Walks the candidate order once: the first
    /// free register wins (first-fit); occupied candidates are collected
    /// across the whole order and the cheapest one is kept as the
    /// eviction fallback; reserved-unit conflicts are skipped outright.
    fn select_or_spill(&mut self, vix: VRegIndex) -> Result<Selection, RegAllocError> {
        let reg = self.vregs[vix.index()].reg;
        let hints = self.func.reg_hints(reg);
        let order = AllocationOrder::compute(reg, &hints, &self.regfile);
        trace!(
            "{}: candidate order {:?} (hard {})",
            reg,
            order.regs(),
            order.is_hard()
        );

        let range = self.func.live_range(reg);
        let mut cheapest: Option<(PReg, SmallVec<[VReg; 4]>, SpillWeight)> = None;
        for &preg in order.regs() {
            self.stats.reg_probes += 1;
            match self.matrix.check_interference(reg, range, preg, &self.regfile) {
                InterferenceKind::Free => {
                    trace!("{}: {} is free; taking it", reg, preg);
                    return Ok(Selection::Assign(preg));
                }
                InterferenceKind::VRegs(occupants) => {
                    // Cost of freeing this candidate: the heaviest of its
                    // occupants, all of which would have to move.
                    let cost = occupants.iter().fold(SpillWeight::zero(), |cost, &v| {
                        cost.max(self.func.live_range(v).spill_weight())
                    });
                    trace!("{}: {} occupied by {:?}, cost {:?}", reg, preg, occupants, cost);
                    if cheapest
                        .as_ref()
                        .map_or(true, |(_, _, best)| cost < *best)
                    {
                        cheapest = Some((preg, occupants, cost));
                    }
                }
                InterferenceKind::RegUnit => {
                    trace!("{}: {} blocked by reserved unit", reg, preg);
                }
            }
        }

        let our_weight = range.spill_weight();
        match cheapest {
            // Strictly cheaper occupants move; on a tie the incumbent
            // stays, so two equal-weight ranges cannot evict each other
            // forever.
            Some((preg, victims, cost)) if cost < our_weight => {
                trace!(
                    "{}: evicting {:?} from {} (cost {:?} < {:?})",
                    reg,
                    victims,
                    preg,
                    cost,
                    our_weight
                );
                Ok(Selection::Evict { preg, victims })
            }
            _ if !our_weight.is_unspillable() => {
                trace!("{}: no free register; spilling (weight {:?})", reg, our_weight);
                Ok(Selection::Spill)
            }
            _ => {
                trace!("{}: unspillable and nothing cheaper to evict", reg);
                Err(RegAllocError::OutOfRegisters(reg))
            }
        }
    }

    fn commit(&mut self, vix: VRegIndex, preg: PReg) {
        let reg = self.vregs[vix.index()].reg;
        let range = self.func.live_range(reg);
        self.matrix.assign(reg, range, preg, &self.regfile);
        self.vregs[vix.index()].state = VRegState::Assigned(preg);
        self.stats.assignments += 1;
        trace!("{} assigned to {}", reg, preg);
    }

    fn evict(&mut self, victim: VReg) {
        let vix = VRegIndex::new(victim.vreg());
        let preg = match self.vregs[vix.index()].state {
            VRegState::Assigned(preg) => preg,
            state => panic!("eviction victim {} is not assigned: {:?}", victim, state),
        };
        let range = self.func.live_range(victim);
        self.matrix.unassign(victim, range, preg, &self.regfile);
        self.vregs[vix.index()].state = VRegState::Pending;
        self.worklist.push(vix);
        self.stats.evictions += 1;
        self.stats.requeues += 1;
        trace!("{} evicted from {} and requeued", victim, preg);
    }
}
