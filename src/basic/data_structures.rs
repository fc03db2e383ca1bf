//! Data structures for the minimal allocator.

use super::matrix::LiveUnitMatrix;
use super::regfile::RegFile;
use crate::{define_index, Allocation, Function, PReg, SpillSlot, Spiller, VReg};
use std::collections::VecDeque;

define_index!(VRegIndex);

/// Where a virtual register stands in the allocation state machine.
/// `Pending` ranges sit on the worklist; an eviction moves an `Assigned`
/// range back to `Pending`. `Spilled` and `Discarded` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VRegState {
    Pending,
    Assigned(PReg),
    Spilled(SpillSlot),
    Discarded,
}

#[derive(Clone, Debug)]
pub struct VRegData {
    pub reg: VReg,
    pub state: VRegState,
}

impl VRegData {
    pub fn allocation(&self) -> Allocation {
        match self.state {
            VRegState::Assigned(preg) => Allocation::reg(preg),
            VRegState::Spilled(slot) => Allocation::stack(slot),
            VRegState::Pending | VRegState::Discarded => Allocation::none(),
        }
    }
}

/// FIFO queue of live ranges awaiting assignment. A vreg is queued at most
/// once at any time; redundant pushes are dropped.
#[derive(Clone, Debug)]
pub struct Worklist {
    queue: VecDeque<VRegIndex>,
    in_queue: Vec<bool>,
}

impl Worklist {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(n),
            in_queue: vec![false; n],
        }
    }

    pub fn push(&mut self, vreg: VRegIndex) {
        if self.in_queue[vreg.index()] {
            return;
        }
        trace!("enqueue vreg{}", vreg.index());
        self.in_queue[vreg.index()] = true;
        self.queue.push_back(vreg);
    }

    pub fn pop(&mut self) -> Option<VRegIndex> {
        let vreg = self.queue.pop_front()?;
        self.in_queue[vreg.index()] = false;
        trace!("pop vreg{}", vreg.index());
        Some(vreg)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub initial_vreg_count: usize,
    pub queued: usize,
    pub discarded: usize,
    pub reg_probes: usize,
    pub assignments: usize,
    pub evictions: usize,
    pub requeues: usize,
    pub spills: usize,
}

pub struct Env<'a, F: Function, S: Spiller> {
    pub func: &'a mut F,
    pub spiller: &'a mut S,
    pub regfile: RegFile,
    pub matrix: LiveUnitMatrix,
    pub vregs: Vec<VRegData>,
    pub worklist: Worklist,
    pub discarded: Vec<VReg>,
    pub stats: Stats,
    pub verbose_log: bool,
}
