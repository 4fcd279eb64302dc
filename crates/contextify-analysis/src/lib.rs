//! Analyses over the contextify program model.
//!
//! - [`provenance`] - Backward stack-value provenance, forward usage, local
//!   def/use and stack-type inference over one method body
//! - [`graph`] - Call, inheritance and captured-callable graphs over the
//!   whole program
//!
//! Both are read-only with respect to the [`Program`](contextify_core::Program);
//! rewriting passes call back into them (`invalidate`, `rederive_method`)
//! after each edit.

pub mod graph;
pub mod provenance;

pub use graph::{
    CallSite, CaptureGraph, CaptureLink, CaptureSite, ImplicitCallMode, InheritanceGraph,
    ReferenceGraph,
};
pub use provenance::{
    FlowCache, FlowIndex, PathOrigin, ProvenancePath, StackAnalyzer, StackType, Usage,
};
