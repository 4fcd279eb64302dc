//! Binder configuration.

use contextify_rewrite::RewriteOptions;

/// Settings for one [`ContextBinder`](crate::ContextBinder) run.
///
/// # Example
///
/// ```
/// use contextify::BinderConfig;
///
/// let config = BinderConfig::default()
///     .with_strict_capture_sites(false)
///     .with_max_iterations(64);
/// assert!(!config.strict_capture_sites);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinderConfig {
    /// Abort on a callable construction matching no known idiom. When off,
    /// the site is logged and left alone.
    pub strict_capture_sites: bool,
    /// Call converted init units from the context constructor when nothing
    /// else does.
    pub inline_init_units: bool,
    /// Detach replaced methods and moved fields from their original owners.
    pub retire_originals: bool,
    /// Populate the root constructor with the instantiation steps.
    pub emit_root_constructor: bool,
    /// Cap on propagation batches.
    pub max_iterations: Option<usize>,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            strict_capture_sites: true,
            inline_init_units: true,
            retire_originals: true,
            emit_root_constructor: true,
            max_iterations: None,
        }
    }
}

impl BinderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strict_capture_sites(mut self, strict: bool) -> Self {
        self.strict_capture_sites = strict;
        self
    }

    pub fn with_inline_init_units(mut self, inline: bool) -> Self {
        self.inline_init_units = inline;
        self
    }

    pub fn with_retire_originals(mut self, retire: bool) -> Self {
        self.retire_originals = retire;
        self
    }

    pub fn with_emit_root_constructor(mut self, emit: bool) -> Self {
        self.emit_root_constructor = emit;
        self
    }

    pub fn with_max_iterations(mut self, limit: usize) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    /// Options handed to the rewriting passes.
    pub fn rewrite_options(&self) -> RewriteOptions {
        RewriteOptions {
            strict_capture_sites: self.strict_capture_sites,
            inline_init_units: self.inline_init_units,
            retire_originals: self.retire_originals,
            max_iterations: self.max_iterations,
        }
    }
}
