//! The binder: validation, propagation, resolution and emission in one run.

use tracing::{debug, info};

use contextify_core::{ContextifyError, Program};
use contextify_rewrite::{ContextPlan, InstantiationResolver, Propagator, emit_root_constructor};

use crate::config::BinderConfig;
use crate::report::BindReport;

pub type Result<T> = std::result::Result<T, ContextifyError>;

/// Rewrites a program so its holder state lives in context instances.
///
/// A run works on copies of the program and plan and commits them only when
/// every phase succeeds, so a failed run leaves the caller's values as they
/// were.
///
/// # Example
///
/// ```ignore
/// let report = ContextBinder::new(BinderConfig::default()).run(&mut program, &mut plan)?;
/// println!("{report}");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContextBinder {
    config: BinderConfig,
}

impl ContextBinder {
    pub fn new(config: BinderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BinderConfig {
        &self.config
    }

    /// Bind `program` against `plan`.
    ///
    /// Running again on the output changes nothing.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(&self, program: &mut Program, plan: &mut ContextPlan) -> Result<BindReport> {
        let mut working = program.clone();
        let mut working_plan = plan.clone();
        let report = self.bind(&mut working, &mut working_plan)?;

        *program = working;
        *plan = working_plan;
        info!(
            bindings = report.bindings.len(),
            records = report.records.len(),
            contexts = report.order.len(),
            iterations = report.stats.iterations,
            skipped_captures = report.stats.skipped_capture_sites,
            "context binding complete"
        );
        Ok(report)
    }

    fn bind(&self, program: &mut Program, plan: &mut ContextPlan) -> Result<BindReport> {
        {
            #[cfg(feature = "profiling")]
            profiling::scope!("validate");
            plan.validate(program)?;
        }

        let propagation = {
            #[cfg(feature = "profiling")]
            profiling::scope!("propagate");
            Propagator::new(program, plan, self.config.rewrite_options()).run()?
        };

        let (order, steps) = {
            #[cfg(feature = "profiling")]
            profiling::scope!("resolve");
            let resolver = InstantiationResolver::new(program, plan, &propagation.graph);
            let order = resolver.order()?;
            let steps = resolver.steps_in(&order);
            (order, steps)
        };
        debug!(steps = steps.len(), "instantiation steps resolved");

        let emitted_steps = if self.config.emit_root_constructor {
            #[cfg(feature = "profiling")]
            profiling::scope!("emit");
            emit_root_constructor(program, plan, &steps)?
        } else {
            0
        };

        Ok(BindReport {
            bindings: propagation.bindings,
            records: propagation.records,
            order,
            steps,
            emitted_steps,
            stats: propagation.stats,
        })
    }
}
