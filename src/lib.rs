//! A minimal register allocator.
//!
//! Virtual registers with externally-computed live ranges are drained from
//! a FIFO worklist and assigned physical registers first-fit along a
//! hint-aware allocation order. Conflicts are resolved by evicting
//! strictly-cheaper occupants (which are requeued) or by spilling the
//! range at hand; there is no live-range splitting.

#![allow(dead_code)]

// Detailed tracing is compiled out unless the `trace-log` feature is
// enabled; see the feature comment in Cargo.toml.
macro_rules! trace {
    ($($tt:tt)*) => {
        if cfg!(feature = "trace-log") {
            ::log::trace!($($tt)*);
        }
    };
}

macro_rules! trace_enabled {
    () => {
        cfg!(feature = "trace-log") && ::log::log_enabled!(::log::Level::Trace)
    };
}

#[macro_use]
mod index;
pub use index::{Inst, RegUnit};

pub(crate) mod basic;
pub use basic::Stats;

use core::hash::BuildHasherDefault;
use rustc_hash::FxHasher;
use smallvec::SmallVec;

pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, BuildHasherDefault<FxHasher>>;
pub type FxHashSet<V> = hashbrown::HashSet<V, BuildHasherDefault<FxHasher>>;

/// Register classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub enum RegClass {
    Int = 0,
    Float = 1,
}

/// A physical register. Contains a hardware register number and a class.
///
/// The `hw_enc` field is the register number as encoded by the ISA, in a
/// logically separate index space per class. `hw_enc` must fit in 5 bits,
/// i.e., at most 32 registers per class.
///
/// The value returned by `index()` is in a single index space shared by
/// all classes, so that per-register tables can be kept in one flat array:
/// the class bit sits above the register number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct PReg {
    hw_enc: u8,
    class: RegClass,
}

impl PReg {
    pub const MAX_BITS: usize = 5;
    pub const MAX: usize = (1 << Self::MAX_BITS) - 1;
    pub const NUM_INDEX: usize = 1 << (Self::MAX_BITS + 1); // including RegClass bit

    #[inline(always)]
    pub const fn new(hw_enc: usize, class: RegClass) -> Self {
        assert!(hw_enc <= PReg::MAX);
        PReg {
            hw_enc: hw_enc as u8,
            class,
        }
    }

    /// The hardware register number, as encoded by the ISA for this class.
    #[inline(always)]
    pub fn hw_enc(self) -> usize {
        self.hw_enc as usize
    }

    /// The register class.
    #[inline(always)]
    pub fn class(self) -> RegClass {
        self.class
    }

    /// Index into the (not necessarily contiguous) space of all physical
    /// registers across classes.
    #[inline(always)]
    pub fn index(self) -> usize {
        ((self.class as u8 as usize) << Self::MAX_BITS) | (self.hw_enc as usize)
    }

    #[inline(always)]
    pub fn from_index(index: usize) -> Self {
        let class = match (index >> Self::MAX_BITS) & 1 {
            0 => RegClass::Int,
            1 => RegClass::Float,
            _ => unreachable!(),
        };
        PReg::new(index & Self::MAX, class)
    }

    #[inline(always)]
    pub fn invalid() -> Self {
        PReg::new(Self::MAX, RegClass::Int)
    }
}

impl core::fmt::Debug for PReg {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "PReg(hw = {}, class = {:?}, index = {})",
            self.hw_enc(),
            self.class(),
            self.index()
        )
    }
}

impl core::fmt::Display for PReg {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let class = match self.class() {
            RegClass::Int => "i",
            RegClass::Float => "f",
        };
        write!(f, "p{}{}", self.hw_enc(), class)
    }
}

/// A virtual register. Contains a virtual register number and a class.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct VReg {
    bits: u32,
}

impl VReg {
    pub const MAX_BITS: usize = 20;
    pub const MAX: usize = (1 << Self::MAX_BITS) - 1;

    #[inline(always)]
    pub const fn new(virt_reg: usize, class: RegClass) -> Self {
        assert!(virt_reg <= VReg::MAX);
        VReg {
            bits: ((virt_reg as u32) << 1) | (class as u8 as u32),
        }
    }

    #[inline(always)]
    pub fn vreg(self) -> usize {
        (self.bits >> 1) as usize
    }

    #[inline(always)]
    pub fn class(self) -> RegClass {
        match self.bits & 1 {
            0 => RegClass::Int,
            1 => RegClass::Float,
            _ => unreachable!(),
        }
    }

    #[inline(always)]
    pub fn invalid() -> Self {
        VReg::new(Self::MAX, RegClass::Int)
    }
}

impl core::fmt::Debug for VReg {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "VReg(vreg = {}, class = {:?})",
            self.vreg(),
            self.class()
        )
    }
}

impl core::fmt::Display for VReg {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "v{}", self.vreg())
    }
}

/// A spill slot in the stack frame, handed out by the `Spiller`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct SpillSlot {
    bits: u32,
}

impl SpillSlot {
    #[inline(always)]
    pub fn new(slot: usize) -> Self {
        assert!(slot < (1 << 28));
        SpillSlot { bits: slot as u32 }
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        self.bits as usize
    }

    #[inline(always)]
    pub fn invalid() -> Self {
        SpillSlot { bits: 0xffff_ffff }
    }

    #[inline(always)]
    pub fn is_valid(self) -> bool {
        self != Self::invalid()
    }
}

impl core::fmt::Display for SpillSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "stack{}", self.index())
    }
}

/// A position before or after an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
#[repr(u8)]
pub enum InstPosition {
    Before = 0,
    After = 1,
}

/// A program point: a single point before or after a given instruction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct ProgPoint {
    bits: u32,
}

impl core::fmt::Debug for ProgPoint {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "progpoint{}{}",
            self.inst().index(),
            match self.pos() {
                InstPosition::Before => "-pre",
                InstPosition::After => "-post",
            }
        )
    }
}

impl ProgPoint {
    #[inline(always)]
    pub fn new(inst: Inst, pos: InstPosition) -> Self {
        let bits = (inst.0 << 1) | (pos as u8 as u32);
        Self { bits }
    }

    #[inline(always)]
    pub fn before(inst: Inst) -> Self {
        Self::new(inst, InstPosition::Before)
    }

    #[inline(always)]
    pub fn after(inst: Inst) -> Self {
        Self::new(inst, InstPosition::After)
    }

    #[inline(always)]
    pub fn inst(self) -> Inst {
        Inst::new((self.bits >> 1) as usize)
    }

    #[inline(always)]
    pub fn pos(self) -> InstPosition {
        match self.bits & 1 {
            0 => InstPosition::Before,
            1 => InstPosition::After,
            _ => unreachable!(),
        }
    }

    #[inline(always)]
    pub fn next(self) -> ProgPoint {
        Self {
            bits: self.bits + 1,
        }
    }

    #[inline(always)]
    pub fn prev(self) -> ProgPoint {
        Self {
            bits: self.bits - 1,
        }
    }

    #[inline(always)]
    pub fn to_index(self) -> u32 {
        self.bits
    }

    #[inline(always)]
    pub fn from_index(index: u32) -> Self {
        Self { bits: index }
    }
}

/// A range from `from` (inclusive) to `to` (exclusive).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct CodeRange {
    pub from: ProgPoint,
    pub to: ProgPoint,
}

impl CodeRange {
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    #[inline(always)]
    pub fn contains_point(&self, other: ProgPoint) -> bool {
        other >= self.from && other < self.to
    }

    #[inline(always)]
    pub fn overlaps(&self, other: &Self) -> bool {
        other.to > self.from && other.from < self.to
    }
}

/// The cost of keeping a live range in memory rather than in a register.
///
/// Weights are non-negative and never NaN. An infinite weight marks a
/// range that must stay in a register; such a range is never chosen for
/// spilling and never evicted by a finite-weight contender.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct SpillWeight(f32);

impl SpillWeight {
    /// Create a `SpillWeight` from a raw floating-point value.
    pub fn from_f32(x: f32) -> SpillWeight {
        assert!(x >= 0.0);
        SpillWeight(x)
    }

    /// Get a zero spill weight.
    pub fn zero() -> SpillWeight {
        SpillWeight(0.0)
    }

    /// A weight above every finite weight: the range may never be spilled.
    pub fn infinite() -> SpillWeight {
        SpillWeight(f32::INFINITY)
    }

    pub fn is_unspillable(self) -> bool {
        self.0 == f32::INFINITY
    }

    /// Convert to a raw floating-point value.
    pub fn to_f32(self) -> f32 {
        self.0
    }

    pub fn max(self, other: SpillWeight) -> SpillWeight {
        SpillWeight(self.0.max(other.0))
    }
}

/// The liveness of one virtual register: an ordered, disjoint sequence of
/// code ranges over which its value must be preserved, plus its spill
/// weight. Computed by the client's liveness analysis; the allocator only
/// reads it.
#[derive(Clone, Debug)]
pub struct LiveRange {
    ranges: SmallVec<[CodeRange; 4]>,
    spill_weight: SpillWeight,
}

impl LiveRange {
    /// Build a live range from sorted, pairwise-disjoint, non-empty
    /// intervals. A malformed interval list is a bug in the liveness
    /// provider and panics.
    pub fn new(ranges: SmallVec<[CodeRange; 4]>, spill_weight: SpillWeight) -> Self {
        assert!(!ranges.is_empty(), "live range covers no program points");
        for range in &ranges {
            assert!(range.from < range.to, "empty live range interval");
        }
        for pair in ranges.windows(2) {
            assert!(
                pair[0].to <= pair[1].from,
                "live range intervals unsorted or overlapping"
            );
        }
        Self {
            ranges,
            spill_weight,
        }
    }

    pub fn ranges(&self) -> &[CodeRange] {
        &self.ranges
    }

    pub fn spill_weight(&self) -> SpillWeight {
        self.spill_weight
    }
}

/// Allocation hints for one virtual register: preferred physical registers
/// in best-first order, as given by ABI convention or copy affinities. A
/// `hard` hint restricts the search to the hinted registers alone,
/// accepting a spill over the use of a non-hinted register.
#[derive(Clone, Debug, Default)]
pub struct RegHints {
    pub regs: SmallVec<[PReg; 4]>,
    pub hard: bool,
}

/// The end result of allocation for one virtual register.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "enable-serde",
    derive(::serde::Serialize, ::serde::Deserialize)
)]
pub struct Allocation {
    /// Bit-pack in 32 bits: kind:3 unused:1 index:28.
    bits: u32,
}

impl core::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(self, f)
    }
}

impl core::fmt::Display for Allocation {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self.kind() {
            AllocationKind::None => write!(f, "none"),
            AllocationKind::Reg => write!(f, "{}", self.as_reg().unwrap()),
            AllocationKind::Stack => write!(f, "{}", self.as_stack().unwrap()),
        }
    }
}

impl Allocation {
    #[inline(always)]
    pub(crate) fn new(kind: AllocationKind, index: usize) -> Self {
        debug_assert!(index < (1 << 28));
        Self {
            bits: ((kind as u8 as u32) << 29) | (index as u32),
        }
    }

    #[inline(always)]
    pub fn none() -> Allocation {
        Allocation::new(AllocationKind::None, 0)
    }

    #[inline(always)]
    pub fn reg(preg: PReg) -> Allocation {
        Allocation::new(AllocationKind::Reg, preg.index())
    }

    #[inline(always)]
    pub fn stack(slot: SpillSlot) -> Allocation {
        debug_assert!(slot.is_valid());
        Allocation::new(AllocationKind::Stack, slot.index())
    }

    #[inline(always)]
    pub fn kind(self) -> AllocationKind {
        match (self.bits >> 29) & 7 {
            0 => AllocationKind::None,
            1 => AllocationKind::Reg,
            2 => AllocationKind::Stack,
            _ => unreachable!(),
        }
    }

    #[inline(always)]
    pub fn is_none(self) -> bool {
        self.kind() == AllocationKind::None
    }

    #[inline(always)]
    pub fn is_reg(self) -> bool {
        self.kind() == AllocationKind::Reg
    }

    #[inline(always)]
    pub fn is_stack(self) -> bool {
        self.kind() == AllocationKind::Stack
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        (self.bits & ((1 << 28) - 1)) as usize
    }

    #[inline(always)]
    pub fn as_reg(self) -> Option<PReg> {
        if self.kind() == AllocationKind::Reg {
            Some(PReg::from_index(self.index()))
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn as_stack(self) -> Option<SpillSlot> {
        if self.kind() == AllocationKind::Stack {
            Some(SpillSlot::new(self.index()))
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AllocationKind {
    None = 0,
    Reg = 1,
    Stack = 2,
}

/// A trait defined by the client to provide the virtual registers of one
/// allocation unit, their liveness, and target-specific hints.
///
/// Virtual register indices are dense: `0..num_vregs()`.
pub trait Function {
    /// How many virtual registers are there?
    fn num_vregs(&self) -> usize;

    /// The `VReg` (index plus register class) for the given dense index.
    /// Must satisfy `self.vreg(i).vreg() == i`.
    fn vreg(&self, index: usize) -> VReg;

    /// Does any real (non-debug) instruction still use or define `vreg`?
    /// Queried when the worklist is seeded and again when the vreg is
    /// popped, since rewrites may strip real uses in between.
    fn has_nondebug_uses(&self, vreg: VReg) -> bool;

    /// The computed live range for `vreg`. Must not change for the
    /// duration of the allocation run.
    fn live_range(&self, vreg: VReg) -> &LiveRange;

    /// Allocation hints for `vreg`, best-first. Defaults to none.
    fn reg_hints(&self, _vreg: VReg) -> RegHints {
        RegHints::default()
    }

    /// Called when a queued vreg turned out to have only debug uses left
    /// and was dropped without an assignment, so the provider can drop its
    /// liveness bookkeeping.
    fn retire_live_range(&mut self, _vreg: VReg) {}
}

/// External collaborator that rewrites a spilled virtual register's uses
/// into loads and stores against a stack slot.
pub trait Spiller {
    /// Materialize a spill of `vreg`, returning the slot that now backs
    /// it. A failure aborts allocation for the whole unit.
    fn spill(&mut self, vreg: VReg) -> Result<SpillSlot, SpillFailed>;
}

/// The spiller could not rewrite a chosen range into memory traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpillFailed;

/// A machine environment tells the register allocator which registers are
/// available, how they alias one another, and which are permanently
/// reserved. Built once from static target data and treated as read-only.
#[derive(Clone, Debug)]
pub struct MachineEnv {
    /// Every physical register the target defines, allocatable or not.
    pub regs: Vec<PReg>,

    /// Preferred physical registers for each class; allocated first, if
    /// free. In normal usage these are the caller-save registers.
    pub preferred_regs_by_class: [Vec<PReg>; 2],

    /// Non-preferred physical registers for each class; allocated when no
    /// preferred register is available, which is still better than
    /// spilling.
    pub non_preferred_regs_by_class: [Vec<PReg>; 2],

    /// Registers excluded from allocation for the whole unit (stack and
    /// frame pointers and the like). Their storage units are blocked even
    /// for registers that merely alias them.
    pub reserved_regs: Vec<PReg>,

    /// Storage units backing each register, parallel to `regs`. Registers
    /// that share a unit alias each other and may never hold overlapping
    /// live values. An empty table gives every register its own unit (no
    /// aliasing).
    pub units: Vec<SmallVec<[RegUnit; 2]>>,
}

/// The output of the register allocator.
#[derive(Clone, Debug)]
pub struct Output {
    /// Final placement for each virtual register, indexed by vreg index.
    /// `Allocation::none()` for vregs that never had a real use or were
    /// discarded.
    pub allocs: Vec<Allocation>,

    /// VRegs that were queued but dropped without an assignment because
    /// only debug uses remained by the time they were popped.
    pub discarded: Vec<VReg>,

    /// Internal stats from the allocator.
    pub stats: Stats,
}

/// An error that prevents allocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegAllocError {
    /// No free register, no strictly cheaper occupant to evict, and the
    /// range itself is unspillable.
    OutOfRegisters(VReg),
    /// The spiller could not materialize a spill for this vreg.
    SpillFailed(VReg),
}

impl core::fmt::Display for RegAllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for RegAllocError {}

/// Options for allocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegallocOptions {
    /// Dump final assignments to the `debug` log level.
    pub verbose_log: bool,
}

/// Run the allocator over one allocation unit. `func` supplies the virtual
/// registers and their liveness, `env` the register file, and `spiller`
/// executes spill decisions. Contract violations in any collaborator
/// panic; resource exhaustion and spill failures are returned as errors.
pub fn run<F: Function, S: Spiller>(
    func: &mut F,
    env: &MachineEnv,
    spiller: &mut S,
    options: &RegallocOptions,
) -> Result<Output, RegAllocError> {
    basic::run(func, env, spiller, options.verbose_log)
}
