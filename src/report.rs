//! What a binder run produced.

use std::fmt;

use contextify_core::{MethodId, Program};
use contextify_rewrite::{
    BindingMap, BindingMode, CaptureRecord, ContextId, InstantiationStep, PropagationStats,
};

/// Outcome of a successful [`ContextBinder::run`](crate::ContextBinder::run).
#[derive(Debug, Clone)]
pub struct BindReport {
    /// Original method -> replacement, with the binding mode.
    pub bindings: BindingMap,
    /// Capture records synthesized for callables over bound methods.
    pub records: Vec<CaptureRecord>,
    /// Contexts in the order the root constructs them.
    pub order: Vec<ContextId>,
    /// Root constructor steps matching `order`.
    pub steps: Vec<InstantiationStep>,
    /// Steps newly written into the root constructor.
    pub emitted_steps: usize,
    pub stats: PropagationStats,
}

impl BindReport {
    pub fn replacement(&self, original: MethodId) -> Option<MethodId> {
        self.bindings.replacement(original)
    }

    pub fn mode(&self, method: MethodId) -> BindingMode {
        self.bindings.mode(method)
    }

    /// Whether the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.bindings.is_empty() && self.records.is_empty() && self.emitted_steps == 0
    }

    /// Human-readable binding table, one line per original.
    pub fn describe(&self, program: &Program) -> String {
        let mut out = String::new();
        for binding in self.bindings.iter() {
            out.push_str(&format!(
                "{} => {} [{}]\n",
                program.identity(binding.original),
                program.identity(binding.replacement),
                binding.mode
            ));
        }
        out
    }
}

impl fmt::Display for BindReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bindings, {} capture records, {} contexts ordered, {} batches",
            self.bindings.len(),
            self.records.len(),
            self.order.len(),
            self.stats.iterations
        )
    }
}
