//! Stack provenance analysis.
//!
//! Given an instruction in a method body, the analyzer answers:
//!
//! - **operands**: for each stack slot the instruction consumes, every
//!   instruction sub-sequence that could have produced the value, one per
//!   distinct incoming control-flow history ([`ProvenancePath`])
//! - **usage**: for an instruction that pushes, every instruction that
//!   consumes the pushed value ([`Usage`]), optionally following the value
//!   through locals and `dup`
//! - **local def/use**: the `stloc` sites reaching an `ldloc`, and the
//!   `ldloc` sites reached from a `stloc`
//! - **stack types**: the static type of a slot along every path
//!   ([`StackType`]), or divergence when paths disagree
//!
//! ## Algorithm
//!
//! Backward queries walk control-flow predecessors from the query point while
//! tracking how many stack values are still owed. At a join each incoming
//! edge forks its own path. A visited set keyed by (instruction, owed depth,
//! walk mode) and scoped to the current path cuts loops. Locals are
//! stack-neutral for the walk; their def/use is answered by separate
//! queries. Per-method control-flow indexes are memoized in a [`FlowCache`].

mod analyzer;
mod flow_index;
mod stack_type;
mod walker;

pub use analyzer::StackAnalyzer;
pub use flow_index::{FlowCache, FlowIndex};
pub use stack_type::StackType;

use contextify_core::InstrId;

/// Where a provenance path begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathOrigin {
    /// Every value on the path is produced by an instruction of the path.
    Instruction,
    /// The path starts with the exception object at a catch handler entry.
    CatchEntry(InstrId),
}

/// One way a consumed stack value may have been produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProvenancePath {
    /// Contributing instructions in execution order; the last one pushes
    /// the value.
    pub instructions: Vec<InstrId>,
    pub origin: PathOrigin,
    /// Whether every instruction on the path pushes only values the path
    /// needs, so that inserting code before [`start`](Self::start) places it
    /// directly beneath the value.
    pub exact: bool,
}

impl ProvenancePath {
    /// First contributing instruction.
    pub fn start(&self) -> Option<InstrId> {
        self.instructions.first().copied()
    }

    /// Instruction that pushed the value.
    pub fn producer(&self) -> Option<InstrId> {
        self.instructions.last().copied()
    }

    /// Whether new code can be inserted ahead of the whole path.
    pub fn is_insertable(&self) -> bool {
        self.exact && self.origin == PathOrigin::Instruction && !self.instructions.is_empty()
    }
}

/// An instruction consuming a value, and which of its operand slots it is.
///
/// Slot 0 is the deepest consumed value (the receiver of an instance call).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Usage {
    pub consumer: InstrId,
    pub slot: usize,
}
