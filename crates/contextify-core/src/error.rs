//! Error types for every phase of a contextify run.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ContextifyError (top-level wrapper)
//! ├── ModelError     - Program model lookups and body edits
//! ├── AnalysisError  - Stack provenance analysis
//! ├── PlanError      - Context plan validation
//! ├── BindingError   - Propagation and closure rewriting
//! └── ResolveError   - Instantiation ordering
//! ```
//!
//! Fatal errors carry the identity of the offending method or type (as
//! rendered by [`Program::identity`](crate::Program::identity)) so a report
//! can be acted on without a debugger.

use thiserror::Error;

use crate::{FieldId, InstrId, MethodId, TypeId};

// ============================================================================
// Model Errors
// ============================================================================

/// Errors raised by the program model itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("unknown type {id}")]
    UnknownType { id: TypeId },

    #[error("unknown field {id}")]
    UnknownField { id: FieldId },

    #[error("unknown method {id}")]
    UnknownMethod { id: MethodId },

    #[error("type '{name}' is already registered")]
    DuplicateType { name: String },

    #[error("field '{identity}' is already registered")]
    DuplicateField { identity: String },

    #[error("method '{identity}' is already registered")]
    DuplicateMethod { identity: String },

    #[error("method '{method}' has no body")]
    NoBody { method: String },

    #[error("instruction {instr} is not part of the body")]
    UnknownInstruction { instr: InstrId },

    #[error("label {label} was used but never marked")]
    UnboundLabel { label: u32 },

    #[error("operand of {instr} is invalid: {detail}")]
    InvalidOperand { instr: InstrId, detail: String },
}

// ============================================================================
// Analysis Errors
// ============================================================================

/// Errors raised by the stack provenance analyzer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// The net stack effect of an instruction could not be determined.
    #[error("cannot resolve stack effect of {opcode} at {instr} in '{method}'")]
    UnresolvedStackEffect {
        method: String,
        instr: InstrId,
        opcode: &'static str,
    },

    /// A backward walk reached the method entry with a value still owed.
    #[error("stack underflow tracing operands of {instr} in '{method}'")]
    StackUnderflow { method: String, instr: InstrId },

    /// An operand slot beyond the instruction's consumed arity was requested.
    #[error("slot {slot} out of range for {instr} in '{method}' (consumes {arity})")]
    SlotOutOfRange {
        method: String,
        instr: InstrId,
        slot: usize,
        arity: usize,
    },

    #[error(transparent)]
    Model(#[from] ModelError),
}

// ============================================================================
// Plan Errors
// ============================================================================

/// Errors raised while validating a context plan against the program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("context '{context}' nested chain does not start at the root type")]
    ChainStartsOffRoot { context: String },

    #[error("context '{context}' chain link '{link}' does not lead to '{expected}'")]
    ChainLinkMismatch {
        context: String,
        link: String,
        expected: String,
    },

    #[error("holder '{holder}' is planned as more than one context")]
    DuplicateHolder { holder: String },

    #[error("context '{context}' names an unknown parent")]
    UnknownParent { context: String },

    #[error("context '{context}' moves '{field}', which is not a static field of its holder")]
    MovedFieldNotStatic { context: String, field: String },

    #[error("context '{context}' maps '{field}' onto a field outside its generated type")]
    FieldNotOnGenerated { context: String, field: String },

    #[error("context '{context}' constructor does not belong to its generated type")]
    ForeignConstructor { context: String },

    #[error(transparent)]
    Model(#[from] ModelError),
}

// ============================================================================
// Binding Errors
// ============================================================================

/// Errors raised by the binding propagator and the closure rewriter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingError {
    /// A method was bound a second time through an incompatible path.
    #[error("method '{method}' is already bound to '{existing}'")]
    AlreadyBound { method: String, existing: String },

    /// An override family cannot change shape in lockstep.
    #[error("cannot add a context parameter to '{method}': family member '{member}' is instance-converted")]
    IncompatibleFamily { method: String, member: String },

    /// A plain read through a value-typed link of a nested chain.
    #[error("'{method}' reads '{field}' through a value-typed chain link")]
    ValueTypeIndirection { method: String, field: String },

    /// A callable construction that matches none of the recognized idioms.
    #[error("unrecognized callable construction at {instr} in '{method}': {detail}")]
    UnrecognizedCallable {
        method: String,
        instr: InstrId,
        detail: String,
    },

    /// A method needed a context handle but none could be provided.
    #[error("no context handle available in '{method}'")]
    MissingHandle { method: String },

    #[error("propagation did not converge within {limit} iterations")]
    IterationLimit { limit: usize },
}

// ============================================================================
// Resolve Errors
// ============================================================================

/// Errors raised while ordering context instantiation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    /// Residual dependency cycles; each cycle starts at its smallest name.
    #[error("instantiation cycles: {}", format_cycles(cycles))]
    Cycles { cycles: Vec<Vec<String>> },

    #[error("root type '{root}' has no constructor body to populate")]
    MissingRootConstructor { root: String },
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| {
            let mut names = cycle.clone();
            if let Some(first) = cycle.first() {
                names.push(first.clone());
            }
            names.join(" -> ")
        })
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Top-level Error
// ============================================================================

/// Top-level error wrapping every phase-specific error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextifyError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}
