//! Per-run view of the target register file: allocation orders with
//! reserved registers removed, and the register-unit aliasing table.

use crate::{MachineEnv, PReg, RegClass, RegUnit};
use smallvec::{smallvec, SmallVec};

/// Compiled once per allocation unit from the static `MachineEnv`;
/// read-only afterwards. The reserved set is frozen here and never
/// revisited during the run.
#[derive(Clone, Debug)]
pub struct RegFile {
    order_by_class: [Vec<PReg>; 2],
    /// Units per register, indexed by `PReg::index()`. Empty entries mark
    /// registers the target does not define.
    units_by_preg: Vec<SmallVec<[RegUnit; 2]>>,
    reserved: Vec<PReg>,
    num_units: usize,
}

impl RegFile {
    pub fn new(env: &MachineEnv) -> Self {
        let mut units_by_preg: Vec<SmallVec<[RegUnit; 2]>> =
            vec![SmallVec::new(); PReg::NUM_INDEX];
        let mut num_units = 0;
        if env.units.is_empty() {
            for &reg in &env.regs {
                units_by_preg[reg.index()] = smallvec![RegUnit::new(num_units)];
                num_units += 1;
            }
        } else {
            assert_eq!(
                env.units.len(),
                env.regs.len(),
                "unit table must parallel MachineEnv::regs"
            );
            for (&reg, units) in env.regs.iter().zip(&env.units) {
                assert!(!units.is_empty(), "register {} backed by no units", reg);
                for &unit in units {
                    num_units = core::cmp::max(num_units, unit.index() + 1);
                }
                units_by_preg[reg.index()] = units.clone();
            }
        }

        let reserved = env.reserved_regs.clone();
        for &reg in &reserved {
            assert!(
                !units_by_preg[reg.index()].is_empty(),
                "reserved register {} not in MachineEnv::regs",
                reg
            );
        }

        let mut order_by_class = [Vec::new(), Vec::new()];
        for &class in &[RegClass::Int, RegClass::Float] {
            let order = &mut order_by_class[class as usize];
            for &reg in env.preferred_regs_by_class[class as usize]
                .iter()
                .chain(env.non_preferred_regs_by_class[class as usize].iter())
            {
                assert!(
                    !units_by_preg[reg.index()].is_empty(),
                    "allocation order names unknown register {}",
                    reg
                );
                assert_eq!(reg.class(), class, "register {} listed under wrong class", reg);
                debug_assert!(!order.contains(&reg), "duplicate register {} in order", reg);
                if !reserved.contains(&reg) {
                    order.push(reg);
                }
            }
        }

        Self {
            order_by_class,
            units_by_preg,
            reserved,
            num_units,
        }
    }

    /// The canonical probe order for a class, reserved registers already
    /// removed.
    pub fn allocation_order(&self, class: RegClass) -> &[PReg] {
        &self.order_by_class[class as usize]
    }

    /// The storage units backing `preg`. Querying a register the target
    /// never declared is a contract violation.
    pub fn units(&self, preg: PReg) -> &[RegUnit] {
        let units = &self.units_by_preg[preg.index()];
        assert!(!units.is_empty(), "unit query for unknown register {}", preg);
        units
    }

    pub fn num_units(&self) -> usize {
        self.num_units
    }

    pub fn reserved_regs(&self) -> &[PReg] {
        &self.reserved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preg(i: usize) -> PReg {
        PReg::new(i, RegClass::Int)
    }

    fn env(n: usize) -> MachineEnv {
        MachineEnv {
            regs: (0..n).map(preg).collect(),
            preferred_regs_by_class: [(0..n).map(preg).collect(), vec![]],
            non_preferred_regs_by_class: [vec![], vec![]],
            reserved_regs: vec![],
            units: vec![],
        }
    }

    #[test]
    fn test_identity_units_are_distinct() {
        let file = RegFile::new(&env(3));
        debug_assert_eq!(file.num_units(), 3);
        debug_assert_ne!(file.units(preg(0)), file.units(preg(1)));
    }

    #[test]
    fn test_reserved_removed_from_order() {
        let mut e = env(3);
        e.reserved_regs = vec![preg(1)];
        let file = RegFile::new(&e);
        debug_assert_eq!(file.allocation_order(RegClass::Int), &[preg(0), preg(2)]);
        debug_assert_eq!(file.allocation_order(RegClass::Float), &[] as &[PReg]);
    }

    #[test]
    fn test_preferred_ahead_of_non_preferred() {
        let mut e = env(3);
        e.preferred_regs_by_class[0] = vec![preg(2)];
        e.non_preferred_regs_by_class[0] = vec![preg(0), preg(1)];
        let file = RegFile::new(&e);
        debug_assert_eq!(
            file.allocation_order(RegClass::Int),
            &[preg(2), preg(0), preg(1)]
        );
    }

    #[test]
    fn test_explicit_unit_table() {
        let mut e = env(2);
        // preg1 is a wide register covering preg0's unit plus one more.
        e.units = vec![
            smallvec![RegUnit::new(0)],
            smallvec![RegUnit::new(0), RegUnit::new(1)],
        ];
        let file = RegFile::new(&e);
        debug_assert_eq!(file.num_units(), 2);
        debug_assert_eq!(file.units(preg(1)).len(), 2);
    }

    #[test]
    #[should_panic]
    fn test_order_with_unknown_register_panics() {
        let mut e = env(2);
        e.preferred_regs_by_class[0].push(preg(7));
        RegFile::new(&e);
    }
}
