//! Contextify
//!
//! Rewrites a stack-bytecode program that keeps mutable state in static
//! holder types so that all of it lives in context instances reached from one
//! aggregate root. Several roots can then coexist in a single process.
//!
//! ## Pipeline
//!
//! 1. **Validate** the [`ContextPlan`] against the [`Program`]
//! 2. **Propagate** context bindings to a fixed point, rewriting field
//!    accesses, calls and callable captures
//! 3. **Resolve** the order contexts are constructed in
//! 4. **Emit** the construction steps into the root constructor
//!
//! ## Crates
//!
//! - [`contextify_core`]: program model, bytecode and errors
//! - [`contextify_analysis`]: stack provenance and reference graphs
//! - [`contextify_rewrite`]: propagation, closure rewriting and ordering
//!
//! # Example
//!
//! ```ignore
//! use contextify::{BinderConfig, ContextBinder};
//!
//! let binder = ContextBinder::new(BinderConfig::default());
//! let report = binder.run(&mut program, &mut plan)?;
//! for step in &report.steps {
//!     println!("{step:?}");
//! }
//! ```

mod binder;
mod config;
mod report;

pub use binder::{ContextBinder, Result};
pub use config::BinderConfig;
pub use report::BindReport;

pub use contextify_analysis::{ReferenceGraph, StackAnalyzer};
pub use contextify_core::{
    BindingError, ContextifyError, FieldId, MethodId, ModelError, PlanError, Program,
    ResolveError, TypeId,
};
pub use contextify_rewrite::{
    Binding, BindingMap, BindingMode, CaptureRecord, ContextDescriptor, ContextId, ContextPlan,
    InstantiationStep, PropagationStats,
};
