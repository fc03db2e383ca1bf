//! Candidate-order resolution: target hints probe ahead of the class
//! allocation order.

use super::regfile::RegFile;
use crate::{PReg, RegHints, VReg};
use smallvec::SmallVec;

/// The ordered sequence of physical registers to probe for one live
/// range. Hints come first in their given order (the hint source already
/// ranked them); a hard hint cuts the sequence off after the hints, so a
/// conflict on every hinted register ends in a spill rather than a
/// non-hinted assignment.
#[derive(Clone, Debug)]
pub struct AllocationOrder {
    regs: SmallVec<[PReg; 16]>,
    hard: bool,
}

impl AllocationOrder {
    pub fn compute(vreg: VReg, hints: &RegHints, regfile: &RegFile) -> Self {
        let class_order = regfile.allocation_order(vreg.class());
        let mut regs: SmallVec<[PReg; 16]> = SmallVec::new();

        // Hints naming reserved or foreign-class registers are not
        // allocatable here and are dropped.
        for &hint in &hints.regs {
            if hint.class() != vreg.class() || !class_order.contains(&hint) {
                trace!("{}: dropping non-allocatable hint {}", vreg, hint);
                continue;
            }
            if !regs.contains(&hint) {
                regs.push(hint);
            }
        }

        if !hints.hard {
            for &reg in class_order {
                if !regs.contains(&reg) {
                    regs.push(reg);
                }
            }
        }

        Self {
            regs,
            hard: hints.hard,
        }
    }

    pub fn regs(&self) -> &[PReg] {
        &self.regs
    }

    pub fn is_hard(&self) -> bool {
        self.hard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MachineEnv, RegClass};
    use smallvec::smallvec;

    fn preg(i: usize) -> PReg {
        PReg::new(i, RegClass::Int)
    }

    fn regfile(n: usize, reserved: Vec<PReg>) -> RegFile {
        RegFile::new(&MachineEnv {
            regs: (0..n).map(preg).collect(),
            preferred_regs_by_class: [(0..n).map(preg).collect(), vec![]],
            non_preferred_regs_by_class: [vec![], vec![]],
            reserved_regs: reserved,
            units: vec![],
        })
    }

    fn vreg() -> VReg {
        VReg::new(0, RegClass::Int)
    }

    #[test]
    fn test_no_hints_gives_class_order() {
        let file = regfile(3, vec![]);
        let order = AllocationOrder::compute(vreg(), &RegHints::default(), &file);
        debug_assert_eq!(order.regs(), &[preg(0), preg(1), preg(2)]);
        debug_assert!(!order.is_hard());
    }

    #[test]
    fn test_soft_hints_front_loaded_and_deduped() {
        let file = regfile(3, vec![]);
        let hints = RegHints {
            regs: smallvec![preg(2), preg(1)],
            hard: false,
        };
        let order = AllocationOrder::compute(vreg(), &hints, &file);
        debug_assert_eq!(order.regs(), &[preg(2), preg(1), preg(0)]);
    }

    #[test]
    fn test_hard_hints_cut_off_class_order() {
        let file = regfile(3, vec![]);
        let hints = RegHints {
            regs: smallvec![preg(1)],
            hard: true,
        };
        let order = AllocationOrder::compute(vreg(), &hints, &file);
        debug_assert_eq!(order.regs(), &[preg(1)]);
        debug_assert!(order.is_hard());
    }

    #[test]
    fn test_reserved_hint_dropped() {
        let file = regfile(3, vec![preg(0)]);
        let hints = RegHints {
            regs: smallvec![preg(0)],
            hard: false,
        };
        let order = AllocationOrder::compute(vreg(), &hints, &file);
        debug_assert_eq!(order.regs(), &[preg(1), preg(2)]);
    }

    #[test]
    fn test_foreign_class_hint_dropped() {
        let file = regfile(2, vec![]);
        let hints = RegHints {
            regs: smallvec![PReg::new(0, RegClass::Float)],
            hard: false,
        };
        let order = AllocationOrder::compute(vreg(), &hints, &file);
        debug_assert_eq!(order.regs(), &[preg(0), preg(1)]);
    }
}
