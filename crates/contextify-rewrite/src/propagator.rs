//! Fixed-point propagation of context bindings.
//!
//! ## Algorithm
//!
//! 1. Seed a worklist with every live method body outside the root, the
//!    synthesized context types and the capture records.
//! 2. Process the worklist in batches, each in method-id order. Visiting a
//!    method scans its body for sites that need context: moved static
//!    fields, ambient singleton loads, calls to bound methods, captures of
//!    bound methods and display-class creations missing their root store.
//! 3. A method that already reaches a handle (`this` is the root or a
//!    context, a parameter of a replacement, a display class root field) is
//!    rewritten in place.
//! 4. Any other method is bound: static holder methods are cloned onto their
//!    context type as instance methods, everything else gains a leading root
//!    parameter. Override families and property accessor pairs change shape
//!    together. Each transition enqueues the replacement and every caller of
//!    the original for the next batch.
//! 5. The fixed point is reached when a batch changes nothing.
//!
//! Bindings only ever grow, so the loop terminates; `max_iterations` caps
//! the number of batches regardless.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use tracing::{debug, trace, warn};

use contextify_analysis::{ReferenceGraph, StackAnalyzer};
use contextify_core::{
    BindingError, ContextifyError, FieldId, InstrId, Instruction, MethodFlags, MethodId,
    MethodShape, ModelError, OpCode, Operand, Param, Program, PropertyDef, TypeId, TypeRef,
};

use crate::binding::{Binding, BindingMap, BindingMode};
use crate::closure::{fresh_body, CaptureOutcome, CaptureRecord, ClosureRewriter, RewriteSite};
use crate::handle::{ChainAccess, HandleSource};
use crate::plan::{ContextId, ContextPlan};
use crate::sites::{insert_below, Placement};

// ============================================================================
// Options and results
// ============================================================================

/// Knobs of the rewriting passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOptions {
    /// Fail on callable constructions matching no recognized idiom instead
    /// of leaving them untouched.
    pub strict_capture_sites: bool,
    /// Call converted init units from their context constructor when
    /// nothing else calls them.
    pub inline_init_units: bool,
    /// Detach replaced methods and moved fields from their owners.
    pub retire_originals: bool,
    /// Upper bound on worklist batches.
    pub max_iterations: Option<usize>,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            strict_capture_sites: true,
            inline_init_units: true,
            retire_originals: true,
            max_iterations: None,
        }
    }
}

/// Counters collected while propagating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationStats {
    /// Worklist batches processed.
    pub iterations: usize,
    /// Method visits across all batches.
    pub visits: usize,
    /// Originals that changed binding mode.
    pub transitions: usize,
    /// Sites rewritten in place.
    pub rewritten_sites: usize,
    /// Sites whose operands had to be spilled to locals.
    pub spilled_sites: usize,
    pub capture_sites: usize,
    pub skipped_capture_sites: usize,
}

/// Everything a finished propagation hands to later phases.
#[derive(Debug)]
pub struct Propagation {
    pub bindings: BindingMap,
    pub records: Vec<CaptureRecord>,
    pub stats: PropagationStats,
    pub graph: ReferenceGraph,
    pub analyzer: StackAnalyzer,
}

// ============================================================================
// Sites
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Rewrite {
    /// Access of a static field that moved onto a context.
    StaticField { context: ContextId, instance: FieldId },
    /// Load of a reused singleton's ambient instance.
    SingletonInstance { context: ContextId },
    BoundCall(Binding),
    Capture(Binding),
    /// Display-class creation missing its root store.
    DisplayStore(FieldId),
}

impl Rewrite {
    /// Whether the site reaches the state of `context` itself.
    fn targets(&self, context: ContextId) -> bool {
        match *self {
            Rewrite::StaticField { context: c, .. } | Rewrite::SingletonInstance { context: c } => {
                c == context
            }
            Rewrite::BoundCall(binding) | Rewrite::Capture(binding) => {
                binding.mode == BindingMode::InstanceConverted(context)
            }
            Rewrite::DisplayStore(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Site {
    at: InstrId,
    rewrite: Rewrite,
}

// ============================================================================
// Propagator
// ============================================================================

/// Drives methods to a fixed point of context bindings.
pub struct Propagator<'p> {
    program: &'p mut Program,
    plan: &'p mut ContextPlan,
    options: RewriteOptions,
    analyzer: StackAnalyzer,
    graph: ReferenceGraph,
    bindings: BindingMap,
    closures: ClosureRewriter,
    stats: PropagationStats,
    pending: BTreeSet<MethodId>,
}

impl<'p> Propagator<'p> {
    pub fn new(program: &'p mut Program, plan: &'p mut ContextPlan, options: RewriteOptions) -> Self {
        let closures = ClosureRewriter::new(program, plan.root, options.strict_capture_sites);
        Self {
            program,
            plan,
            options,
            analyzer: StackAnalyzer::new(),
            graph: ReferenceGraph::default(),
            bindings: BindingMap::new(),
            closures,
            stats: PropagationStats::default(),
            pending: BTreeSet::new(),
        }
    }

    /// Run to the fixed point.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn run(mut self) -> Result<Propagation, ContextifyError> {
        self.graph = ReferenceGraph::build(self.program, &mut self.analyzer)?;
        self.bind_singleton_replacements()?;
        self.seed();

        while !self.pending.is_empty() {
            self.stats.iterations += 1;
            if let Some(limit) = self.options.max_iterations {
                if self.stats.iterations > limit {
                    return Err(BindingError::IterationLimit { limit }.into());
                }
            }
            let batch = mem::take(&mut self.pending);
            debug!(
                iteration = self.stats.iterations,
                methods = batch.len(),
                "propagation batch"
            );
            for method in batch {
                self.visit(method)?;
            }
        }

        self.retire_moved_fields()?;
        debug!(
            iterations = self.stats.iterations,
            visits = self.stats.visits,
            transitions = self.stats.transitions,
            rewritten = self.stats.rewritten_sites,
            "propagation reached fixed point"
        );
        self.stats.skipped_capture_sites = self.closures.skipped();
        Ok(Propagation {
            bindings: self.bindings,
            records: self.closures.into_records(),
            stats: self.stats,
            graph: self.graph,
            analyzer: self.analyzer,
        })
    }

    fn seed(&mut self) {
        for method in self.program.methods_with_bodies() {
            let Ok(def) = self.program.method(method) else { continue };
            if def.is_static_constructor() || def.owner == self.plan.root {
                continue;
            }
            let synthesized_context = self
                .plan
                .by_generated(def.owner)
                .is_some_and(|c| !self.plan.context(c).is_reused_singleton());
            if synthesized_context || self.closures.is_record_type(def.owner) {
                continue;
            }
            self.pending.insert(method);
        }
        debug!(methods = self.pending.len(), "worklist seeded");
    }

    /// Reused singletons come with their replacement methods; bind them up
    /// front so callers are redirected without cloning.
    fn bind_singleton_replacements(&mut self) -> Result<(), ContextifyError> {
        let pairs: Vec<(ContextId, MethodId, MethodId)> = self
            .plan
            .contexts()
            .filter(|(_, c)| c.is_reused_singleton())
            .flat_map(|(id, c)| c.replacement_methods.iter().map(move |(o, r)| (id, *o, *r)))
            .collect();
        let mut bound = Vec::new();
        for (context, original, replacement) in pairs {
            if self.program.method(original)?.is_retired() {
                continue;
            }
            self.bindings.bind(
                self.program,
                original,
                replacement,
                BindingMode::InstanceConverted(context),
            )?;
            bound.push((original, replacement));
        }
        self.complete(bound)
    }

    // ==========================================================================
    // Visiting
    // ==========================================================================

    #[cfg_attr(feature = "profiling", profiling::function)]
    fn visit(&mut self, method: MethodId) -> Result<(), ContextifyError> {
        self.stats.visits += 1;
        let def = self.program.method(method)?;
        if def.is_retired() || def.body.is_none() || self.bindings.is_bound(method) {
            return Ok(());
        }

        let sites = self.scan(method)?;
        if sites.is_empty() {
            return Ok(());
        }
        trace!(method = %self.program.identity(method), sites = sites.len(), "needs context");

        let handle = match self.handle_of(method)? {
            Some(handle) => handle,
            None => match self.display_handle(method)? {
                Some(handle) => handle,
                None => return self.bind(method, &sites),
            },
        };
        self.rewrite(method, handle, sites)
    }

    /// Sites in `method` that need a context handle. Read-only.
    fn scan(&self, method: MethodId) -> Result<Vec<Site>, ContextifyError> {
        let body = self.program.body(method)?;
        let mut sites = Vec::new();
        for instr in body.instructions() {
            let rewrite = match instr.opcode {
                OpCode::LdSFld | OpCode::LdSFldA | OpCode::StSFld => {
                    let Some(field) = instr.field_operand() else { continue };
                    match self.plan.moved_field(field) {
                        Some((context, instance)) => Some(Rewrite::StaticField { context, instance }),
                        None if instr.opcode == OpCode::LdSFld => self
                            .plan
                            .singleton_of(field)
                            .map(|context| Rewrite::SingletonInstance { context }),
                        None => None,
                    }
                }
                OpCode::Call | OpCode::CallVirt | OpCode::NewObj => {
                    let Some(target) = instr.method_operand() else { continue };
                    match self.bindings.get(target) {
                        Some(binding) => Some(Rewrite::BoundCall(*binding)),
                        None if instr.opcode == OpCode::NewObj => self
                            .closures
                            .pending_display_store(self.program, body, instr.id)
                            .map(Rewrite::DisplayStore),
                        None => None,
                    }
                }
                OpCode::LdFtn | OpCode::LdVirtFtn => instr
                    .method_operand()
                    .and_then(|target| self.bindings.get(target))
                    .map(|binding| Rewrite::Capture(*binding)),
                _ => None,
            };
            if let Some(rewrite) = rewrite {
                sites.push(Site { at: instr.id, rewrite });
            }
        }
        Ok(sites)
    }

    /// How `method` reaches the root without changing shape.
    fn handle_of(&self, method: MethodId) -> Result<Option<HandleSource>, ContextifyError> {
        let def = self.program.method(method)?;
        if let Some(binding) = self.bindings.original_of(method) {
            return Ok(match binding.mode {
                BindingMode::AddedParameter => Some(HandleSource::Parameter(def.this_offset())),
                BindingMode::InstanceConverted(context) => Some(HandleSource::ContextThis {
                    context,
                    root_field: self.plan.context(context).root_field,
                }),
                BindingMode::Unbound => None,
            });
        }
        if def.is_static() {
            return Ok(None);
        }
        if def.owner == self.plan.root {
            return Ok(Some(HandleSource::RootThis));
        }
        if let Some(context) = self.plan.by_generated(def.owner) {
            return Ok(Some(HandleSource::ContextThis {
                context,
                root_field: self.plan.context(context).root_field,
            }));
        }
        Ok(self.closures.display_root(def.owner).map(HandleSource::CapturedRoot))
    }

    /// Give a display class lambda a handle by adding the root field to its
    /// display class.
    fn display_handle(&mut self, method: MethodId) -> Result<Option<HandleSource>, ContextifyError> {
        let (owner, is_static) = {
            let def = self.program.method(method)?;
            (def.owner, def.is_static())
        };
        if is_static || !self.program.type_def(owner)?.is_display_class() {
            return Ok(None);
        }
        let (field, created) = self.closures.ensure_display_root(self.program, owner)?;
        if created {
            for ctor in self.program.constructors(owner) {
                self.pending.extend(self.graph.caller_methods(ctor));
            }
        }
        Ok(Some(HandleSource::CapturedRoot(field)))
    }

    // ==========================================================================
    // In-place rewriting
    // ==========================================================================

    fn rewrite(&mut self, method: MethodId, handle: HandleSource, sites: Vec<Site>) -> Result<(), ContextifyError> {
        let mut changed = 0;
        for site in sites {
            match site.rewrite {
                Rewrite::StaticField { context, instance } => {
                    self.rewrite_field(method, handle, site.at, context, instance)?;
                }
                Rewrite::SingletonInstance { context } => {
                    let seq = handle.load_context(self.program, self.plan, method, context, ChainAccess::Read)?;
                    self.program.body_mut(method)?.replace_with(site.at, seq)?;
                }
                Rewrite::BoundCall(binding) => {
                    self.rewrite_call(method, handle, site.at, binding)?;
                }
                Rewrite::Capture(binding) => {
                    self.stats.capture_sites += 1;
                    let outcome = self.closures.rewrite_capture(
                        self.program,
                        &mut self.analyzer,
                        self.plan,
                        RewriteSite { method, handle },
                        site.at,
                        binding,
                    )?;
                    if outcome == CaptureOutcome::Skipped {
                        continue;
                    }
                }
                Rewrite::DisplayStore(field) => {
                    self.closures
                        .store_display_root(self.program, method, handle, site.at, field)?;
                }
            }
            changed += 1;
        }

        if changed > 0 {
            self.stats.rewritten_sites += changed;
            self.graph
                .rederive_method(self.program, &mut self.analyzer, method)?;
            debug!(method = %self.program.identity(method), sites = changed, "rewritten in place");
        }
        Ok(())
    }

    fn rewrite_field(
        &mut self,
        method: MethodId,
        handle: HandleSource,
        at: InstrId,
        context: ContextId,
        instance: FieldId,
    ) -> Result<(), ContextifyError> {
        let opcode = self
            .program
            .body(method)?
            .get(at)
            .ok_or(ModelError::UnknownInstruction { instr: at })?
            .opcode;
        match opcode {
            OpCode::LdSFld | OpCode::LdSFldA => {
                let (access, load) = if opcode == OpCode::LdSFld {
                    (ChainAccess::Read, OpCode::LdFld)
                } else {
                    (ChainAccess::Address, OpCode::LdFldA)
                };
                let mut seq = handle.load_context(self.program, self.plan, method, context, access)?;
                seq.push(Instruction::field(load, instance));
                self.program.body_mut(method)?.replace_with(at, seq)?;
            }
            OpCode::StSFld => {
                let receiver =
                    handle.load_context(self.program, self.plan, method, context, ChainAccess::Address)?;
                let placement = insert_below(self.program, &mut self.analyzer, method, at, 0, receiver)?;
                self.note_placement(&placement);
                self.program
                    .body_mut(method)?
                    .replace(at, Instruction::field(OpCode::StFld, instance))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn rewrite_call(
        &mut self,
        method: MethodId,
        handle: HandleSource,
        at: InstrId,
        binding: Binding,
    ) -> Result<(), ContextifyError> {
        let opcode = self
            .program
            .body(method)?
            .get(at)
            .ok_or(ModelError::UnknownInstruction { instr: at })?
            .opcode;
        match binding.mode {
            BindingMode::AddedParameter => {
                let slot = if opcode == OpCode::NewObj {
                    0
                } else {
                    self.program.method(binding.original)?.this_offset() as usize
                };
                let root = handle.load_root(self.program, method)?;
                let placement = insert_below(self.program, &mut self.analyzer, method, at, slot, root)?;
                self.note_placement(&placement);
                self.program
                    .body_mut(method)?
                    .set_operand(at, Operand::Method(binding.replacement))?;
            }
            BindingMode::InstanceConverted(context) => {
                let receiver =
                    handle.load_context(self.program, self.plan, method, context, ChainAccess::Address)?;
                let placement = insert_below(self.program, &mut self.analyzer, method, at, 0, receiver)?;
                self.note_placement(&placement);
                self.program
                    .body_mut(method)?
                    .replace(at, Instruction::method(OpCode::Call, binding.replacement))?;
            }
            BindingMode::Unbound => {}
        }
        Ok(())
    }

    fn note_placement(&mut self, placement: &Placement) {
        if matches!(placement, Placement::Spilled { .. }) {
            self.stats.spilled_sites += 1;
        }
    }

    // ==========================================================================
    // Binding transitions
    // ==========================================================================

    /// Holder statics that touch their own holder's state move onto the
    /// context type. Everything else takes the root as a leading parameter.
    fn bind(&mut self, method: MethodId, sites: &[Site]) -> Result<(), ContextifyError> {
        let (owner, is_static) = {
            let def = self.program.method(method)?;
            (def.owner, def.is_static())
        };
        match self.plan.by_holder(owner) {
            Some(context) if is_static && sites.iter().any(|s| s.rewrite.targets(context)) => {
                self.convert(method, context)
            }
            _ => self.add_parameter(method),
        }
    }

    /// Move a static holder method onto its context type.
    fn convert(&mut self, method: MethodId, context: ContextId) -> Result<(), ContextifyError> {
        let (holder, generated) = {
            let descriptor = self.plan.context(context);
            (descriptor.holder, descriptor.generated)
        };
        let mode = BindingMode::InstanceConverted(context);
        let mut bound = Vec::new();
        for original in self.binding_group(method, false)? {
            if self.bindings.mode(original) == mode {
                continue;
            }
            let (replacement, fresh) = self.converted_replacement(original, context)?;
            self.bindings.bind(self.program, original, replacement, mode)?;
            if fresh {
                let copies = self
                    .closures
                    .relocate_display_classes(self.program, replacement, holder, generated)?;
                self.pending.extend(copies);
            }
            self.adopt_init_unit(context, original, replacement)?;
            bound.push((original, replacement));
        }
        self.mirror_properties(&bound, Some(generated))?;
        self.complete(bound)
    }

    fn converted_replacement(
        &mut self,
        original: MethodId,
        context: ContextId,
    ) -> Result<(MethodId, bool), ContextifyError> {
        let descriptor = self.plan.context(context);
        if let Some(existing) = descriptor.replacement_methods.get(&original) {
            return Ok((*existing, false));
        }
        let generated = descriptor.generated;
        let (name, params) = {
            let def = self.program.method(original)?;
            (def.name.clone(), param_types(&def.params))
        };
        if let Some(existing) = self.find_signature(generated, &name, &params, false) {
            return Ok((existing, false));
        }
        let name = self.copy_name(generated, &name, &params);
        let replacement = self
            .program
            .clone_method(original, generated, &name, MethodShape::instance())?;
        self.program.method_mut(replacement)?.flags |= MethodFlags::CONTEXT_REPLACEMENT;
        Ok((replacement, true))
    }

    /// Give `method`, its override family and its accessor siblings a
    /// leading root parameter.
    fn add_parameter(&mut self, method: MethodId) -> Result<(), ContextifyError> {
        let group = self.binding_group(method, true)?;
        for member in &group {
            if let BindingMode::InstanceConverted(_) = self.bindings.mode(*member) {
                return Err(BindingError::IncompatibleFamily {
                    method: self.program.identity(method),
                    member: self.program.identity(*member),
                }
                .into());
            }
        }

        let root = TypeRef::Named(self.plan.root);
        let mut replaced: BTreeMap<MethodId, MethodId> = BTreeMap::new();
        let mut bound = Vec::new();
        for original in group {
            if self.bindings.is_bound(original) {
                continue;
            }
            let (owner, name, is_static, mut params) = {
                let def = self.program.method(original)?;
                (def.owner, def.name.clone(), def.is_static(), vec![root.clone()])
            };
            params.extend(param_types(&self.program.method(original)?.params));
            let replacement = match self.find_signature(owner, &name, &params, is_static) {
                Some(existing) => existing,
                None => {
                    let name = self.copy_name(owner, &name, &params);
                    let copy = self.program.clone_method(
                        original,
                        owner,
                        &name,
                        MethodShape::leading(Param::new("context", root.clone())),
                    )?;
                    self.program.method_mut(copy)?.flags |= MethodFlags::CONTEXT_REPLACEMENT;
                    copy
                }
            };
            self.bindings
                .bind(self.program, original, replacement, BindingMode::AddedParameter)?;
            replaced.insert(original, replacement);
            bound.push((original, replacement));
        }

        // Explicit overrides of the copies point at the copies.
        for replacement in replaced.values().copied() {
            let overrides = self.program.method(replacement)?.overrides.clone();
            let mapped: Vec<MethodId> = overrides
                .iter()
                .map(|o| {
                    replaced
                        .get(o)
                        .copied()
                        .or_else(|| self.bindings.replacement(*o))
                        .unwrap_or(*o)
                })
                .collect();
            if mapped != overrides {
                self.program.method_mut(replacement)?.overrides = mapped;
            }
        }

        self.mirror_properties(&bound, None)?;
        self.complete(bound)
    }

    /// `method` plus every method that must change shape with it.
    fn binding_group(&self, method: MethodId, follow_overrides: bool) -> Result<BTreeSet<MethodId>, ContextifyError> {
        let mut group = BTreeSet::new();
        let mut work = vec![method];
        while let Some(current) = work.pop() {
            if !group.insert(current) {
                continue;
            }
            if follow_overrides && self.graph.inheritance().contains(current) {
                work.extend(self.graph.inheritance().family(current));
            }
            if let Some(sibling) = self.accessor_sibling(current)? {
                work.push(sibling);
            }
        }
        Ok(group)
    }

    fn accessor_sibling(&self, method: MethodId) -> Result<Option<MethodId>, ContextifyError> {
        let def = self.program.method(method)?;
        if !def.is_special_name() {
            return Ok(None);
        }
        Ok(self
            .program
            .type_def(def.owner)?
            .property_of(method)
            .and_then(|p| p.sibling_of(method))
            .flatten())
    }

    /// Replacement left by an earlier run: a live copy on `owner` named
    /// after `name` with exactly `params`. User methods never match.
    fn find_signature(&self, owner: TypeId, name: &str, params: &[TypeRef], is_static: bool) -> Option<MethodId> {
        let def = self.program.type_def(owner).ok()?;
        def.methods.iter().copied().find(|m| {
            self.program.method(*m).is_ok_and(|def| {
                def.is_context_replacement()
                    && copy_of(&def.name, name)
                    && def.is_static() == is_static
                    && param_types(&def.params) == params
            })
        })
    }

    /// `name`, suffixed when a live method of `owner` already has the
    /// signature a copy would take.
    fn copy_name(&self, owner: TypeId, name: &str, params: &[TypeRef]) -> String {
        let taken = |candidate: &str| {
            self.program
                .find_methods(owner, candidate)
                .into_iter()
                .any(|m| self.program.method(m).is_ok_and(|def| param_types(&def.params) == params))
        };
        if !taken(name) {
            return name.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = match n {
                1 => format!("{name}{COPY_SUFFIX}"),
                _ => format!("{name}{COPY_SUFFIX}{n}"),
            };
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Keep properties pointing at live accessors.
    ///
    /// Same-owner replacements are swapped into the existing property;
    /// converted accessor pairs get a property on the context type. A
    /// property with a single accessor cannot keep its shape once the
    /// accessor changes signature, so the replacement becomes a plain
    /// method.
    fn mirror_properties(&mut self, bound: &[(MethodId, MethodId)], into: Option<TypeId>) -> Result<(), ContextifyError> {
        for &(original, replacement) in bound {
            let (owner, special) = {
                let def = self.program.method(original)?;
                (def.owner, def.is_special_name())
            };
            if !special {
                continue;
            }
            let Some(property) = self.program.type_def(owner)?.property_of(original).cloned() else {
                continue;
            };
            if property.sibling_of(original).flatten().is_none() {
                warn!(
                    accessor = %self.program.identity(original),
                    property = %property.name,
                    "single-accessor property; replacement is no longer an accessor"
                );
                self.program
                    .method_mut(replacement)?
                    .flags
                    .remove(MethodFlags::SPECIAL_NAME);
                continue;
            }
            match into {
                None => {
                    for p in &mut self.program.type_def_mut(owner)?.properties {
                        p.remap(original, replacement);
                    }
                }
                Some(generated) => {
                    let exists = self
                        .program
                        .type_def(generated)?
                        .properties
                        .iter()
                        .any(|p| p.name == property.name);
                    if !exists {
                        let mirrored = PropertyDef {
                            name: property.name.clone(),
                            getter: property.getter.and_then(|g| self.bindings.replacement(g)),
                            setter: property.setter.and_then(|s| self.bindings.replacement(s)),
                        };
                        self.program.add_property(generated, mirrored)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Track a converted init unit, and call it from the context constructor
    /// when nothing else does.
    fn adopt_init_unit(
        &mut self,
        context: ContextId,
        original: MethodId,
        replacement: MethodId,
    ) -> Result<(), ContextifyError> {
        let (is_unit, constructor) = {
            let descriptor = self.plan.context(context);
            (descriptor.init_units.contains(&original), descriptor.constructor)
        };
        if !is_unit {
            return Ok(());
        }
        let called = self.graph.call_count(original) > 0;
        self.plan.replace_init_unit(context, original, replacement);
        if called || !self.options.inline_init_units {
            return Ok(());
        }

        let call = vec![
            Instruction::arg(OpCode::LdArg, 0),
            Instruction::method(OpCode::Call, replacement),
        ];
        match self.program.method(constructor)?.body.as_ref() {
            None => {
                let mut code = call;
                code.push(Instruction::op(OpCode::Ret));
                self.program.set_body(constructor, fresh_body(code))?;
            }
            Some(body) => {
                if body
                    .instructions()
                    .iter()
                    .any(|i| i.is_method_op(OpCode::Call, replacement))
                {
                    return Ok(());
                }
                let returns = body.returns();
                let body = self.program.body_mut(constructor)?;
                for ret in returns {
                    body.insert_before(ret, call.clone())?;
                }
            }
        }
        self.graph
            .rederive_method(self.program, &mut self.analyzer, constructor)?;
        debug!(
            unit = %self.program.identity(replacement),
            constructor = %self.program.identity(constructor),
            "init unit inlined"
        );
        Ok(())
    }

    /// Retire the originals, refresh the graph and enqueue the replacements
    /// and every caller of the originals.
    fn complete(&mut self, bound: Vec<(MethodId, MethodId)>) -> Result<(), ContextifyError> {
        if bound.is_empty() {
            return Ok(());
        }
        let mut callers = BTreeSet::new();
        let mut virtual_changed = false;
        for &(original, _) in &bound {
            callers.extend(self.graph.caller_methods(original));
            let def = self.program.method(original)?;
            virtual_changed |= def.is_virtual();
            if self.options.retire_originals && !def.is_retired() {
                self.program.retire_method(original)?;
            }
        }
        if virtual_changed {
            self.graph.rebuild_inheritance(self.program);
        }
        for &(original, replacement) in &bound {
            self.graph
                .rederive_method(self.program, &mut self.analyzer, original)?;
            self.graph
                .rederive_method(self.program, &mut self.analyzer, replacement)?;
            if self.program.method(replacement)?.body.is_some() {
                self.pending.insert(replacement);
            }
            self.stats.transitions += 1;
            debug!(
                original = %self.program.identity(original),
                replacement = %self.program.identity(replacement),
                mode = %self.bindings.mode(original),
                "binding transition"
            );
        }
        self.pending.extend(callers);
        Ok(())
    }

    /// Retire moved statics nothing references any more.
    fn retire_moved_fields(&mut self) -> Result<(), ContextifyError> {
        if !self.options.retire_originals {
            return Ok(());
        }
        let moved: BTreeSet<FieldId> = self
            .plan
            .contexts()
            .flat_map(|(_, c)| c.moved_fields.keys().chain(c.replacement_fields.keys()).copied())
            .collect();
        let mut referenced = BTreeSet::new();
        for method in self.program.methods_with_bodies() {
            for instr in self.program.body(method)?.instructions() {
                if let Some(field) = instr.field_operand() {
                    if moved.contains(&field) {
                        referenced.insert(field);
                    }
                }
            }
        }
        for field in moved {
            if self.program.field(field)?.is_retired() {
                continue;
            }
            if referenced.contains(&field) {
                warn!(field = %self.program.field_identity(field), "moved field still referenced; left in place");
                continue;
            }
            self.program.retire_field(field)?;
        }
        Ok(())
    }
}

const COPY_SUFFIX: &str = "$context";

fn copy_of(copy: &str, name: &str) -> bool {
    copy.strip_prefix(name).is_some_and(|rest| {
        rest.is_empty()
            || rest
                .strip_prefix(COPY_SUFFIX)
                .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
    })
}

fn param_types(params: &[Param]) -> Vec<TypeRef> {
    params.iter().map(|p| p.ty.clone()).collect()
}
