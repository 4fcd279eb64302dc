//! Whole-program reference graphs.
//!
//! [`ReferenceGraph`] is the single entry point. One pass over every method
//! body builds three indexes:
//!
//! - the mediated call graph: callee -> call sites grouped by caller, each
//!   tagged with an [`ImplicitCallMode`]
//! - the [`InheritanceGraph`]: immediate overrides, concrete implementations
//!   and override families
//! - the [`CaptureGraph`]: captured callable targets linked to the sites that
//!   construct and invoke them
//!
//! Callers of a method therefore include virtual call sites of anything it
//! overrides and the methods that capture or invoke it as a callable.

mod call_graph;
mod capture;
mod inheritance;
mod site;

pub use call_graph::ReferenceGraph;
pub use capture::{CaptureGraph, CaptureLink, CaptureSite};
pub use inheritance::InheritanceGraph;
pub use site::{CallSite, ImplicitCallMode};
