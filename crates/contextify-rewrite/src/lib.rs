//! Contextify rewriting passes.
//!
//! Moves static holder state into context instances reached from an
//! aggregate root, then works out the order the root constructs them in.
//!
//! ## Passes
//!
//! - **Propagation**: rewrite every method reaching moved state, binding
//!   methods that cannot reach a context handle until nothing changes
//! - **Closures**: keep callables built over bound methods working
//! - **Resolution**: order context construction and populate the root
//!   constructor
//!
//! ## Modules
//!
//! - [`plan`]: Context descriptors handed in by the caller
//! - [`binding`]: Method bindings produced by propagation
//! - [`handle`]: Loading the root or a context instance inside a method
//! - [`sites`]: Inserting a value beneath already-pushed operands
//! - [`closure`]: Capture records, trampolines and display classes
//! - [`propagator`]: The fixed-point worklist
//! - [`resolver`]: Instantiation order and root constructor emission

pub mod binding;
pub mod closure;
pub mod handle;
pub mod plan;
pub mod propagator;
pub mod resolver;
pub mod sites;

pub use binding::{Binding, BindingMap, BindingMode};
pub use closure::{CaptureRecord, CapturedValue, ClosureRewriter, RecordKey};
pub use handle::{ChainAccess, HandleSource};
pub use plan::{ContextDescriptor, ContextId, ContextPlan};
pub use propagator::{Propagation, PropagationStats, Propagator, RewriteOptions};
pub use resolver::{
    InstantiationResolver, InstantiationStep, emit_root_constructor, root_constructor_body,
};
pub use sites::{Placement, insert_below};
