//! Minimal worklist-driven allocator: FIFO scheduling over live ranges,
//! first-fit probing of a hint-aware allocation order, lowest-weight
//! eviction, spill as the fallback.

use crate::{Function, MachineEnv, Output, RegAllocError, RegClass, Spiller, VReg};

pub(crate) mod data_structures;
pub use data_structures::Stats;
use data_structures::*;
pub(crate) mod matrix;
use matrix::LiveUnitMatrix;
pub(crate) mod order;
pub(crate) mod process;
pub(crate) mod regfile;
use regfile::RegFile;

impl<'a, F: Function, S: Spiller> Env<'a, F, S> {
    pub(crate) fn new(
        func: &'a mut F,
        mach_env: &MachineEnv,
        spiller: &'a mut S,
        verbose_log: bool,
    ) -> Self {
        let regfile = RegFile::new(mach_env);
        let matrix = LiveUnitMatrix::new(&regfile);
        let n = func.num_vregs();
        Self {
            func,
            spiller,
            regfile,
            matrix,
            vregs: Vec::with_capacity(n),
            worklist: Worklist::with_capacity(n),
            discarded: vec![],
            stats: Stats::default(),
            verbose_log,
        }
    }

    /// Seed the vreg table and enqueue, in ascending index order, every
    /// vreg that a real instruction still references. Ascending order
    /// keeps the output reproducible.
    pub(crate) fn init(&mut self) {
        let n = self.func.num_vregs();
        // Index VReg::MAX is the reserved-unit sentinel in the matrix.
        assert!(n < VReg::MAX, "too many virtual registers");
        self.stats.initial_vreg_count = n;
        if trace_enabled!() {
            trace!(
                "int allocation order: {:?}",
                self.regfile.allocation_order(RegClass::Int)
            );
            trace!(
                "float allocation order: {:?}",
                self.regfile.allocation_order(RegClass::Float)
            );
        }
        for idx in 0..n {
            let reg = self.func.vreg(idx);
            assert_eq!(
                reg.vreg(),
                idx,
                "Function::vreg must return the queried index"
            );
            let state = if self.func.has_nondebug_uses(reg) {
                self.worklist.push(VRegIndex::new(idx));
                self.stats.queued += 1;
                VRegState::Pending
            } else {
                VRegState::Discarded
            };
            self.vregs.push(VRegData { reg, state });
        }
    }

    pub(crate) fn run(&mut self) -> Result<(), RegAllocError> {
        self.process_worklist()
    }

    fn dump_results(&self) {
        log::debug!("=== final assignments ===");
        for vreg in &self.vregs {
            log::debug!("{}: {}", vreg.reg, vreg.allocation());
        }
    }
}

pub(crate) fn run<F: Function, S: Spiller>(
    func: &mut F,
    mach_env: &MachineEnv,
    spiller: &mut S,
    verbose_log: bool,
) -> Result<Output, RegAllocError> {
    let mut env = Env::new(func, mach_env, spiller, verbose_log);
    env.init();
    env.run()?;

    if env.verbose_log {
        env.dump_results();
    }

    debug_assert!(env.worklist.is_empty());

    Ok(Output {
        allocs: env.vregs.iter().map(|vreg| vreg.allocation()).collect(),
        discarded: core::mem::take(&mut env.discarded),
        stats: env.stats,
    })
}
