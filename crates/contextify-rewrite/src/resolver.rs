//! Instantiation order of context instances.
//!
//! ## Algorithm
//!
//! A context depends on another when code reachable from its constructor or
//! init units (through call, inheritance and capture edges) loads the other
//! context's slot field, and a nested context depends on its parent. Reused
//! singletons are assigned rather than constructed, so they depend only on
//! their parent.
//!
//! Contexts are ordered with Kahn's algorithm, ties broken by context id.
//! Whatever remains afterwards lies on or behind a cycle. The remainder is
//! split into strongly connected components, and every elementary circuit of
//! each component is reported once, rotated to start at its lexicographically
//! smallest name.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use contextify_analysis::ReferenceGraph;
use contextify_core::{
    ContextifyError, FieldId, Instruction, MethodId, OpCode, Program, ResolveError, TypeRef,
};

use crate::closure::fresh_body;
use crate::plan::{ContextId, ContextPlan};

/// One statement of the root constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstantiationStep {
    /// `slot = new Context(...)`, stored in `parent` or the root.
    Construct {
        context: ContextId,
        slot: FieldId,
        parent: Option<ContextId>,
    },
    /// `slot = <ambient singleton instance>`.
    AssignSingleton {
        context: ContextId,
        slot: FieldId,
        instance: FieldId,
    },
}

impl InstantiationStep {
    pub fn context(&self) -> ContextId {
        match self {
            InstantiationStep::Construct { context, .. }
            | InstantiationStep::AssignSingleton { context, .. } => *context,
        }
    }

    pub fn slot(&self) -> FieldId {
        match self {
            InstantiationStep::Construct { slot, .. } | InstantiationStep::AssignSingleton { slot, .. } => {
                *slot
            }
        }
    }
}

/// Orders context instantiation inside the root constructor.
pub struct InstantiationResolver<'a> {
    program: &'a Program,
    plan: &'a ContextPlan,
    graph: &'a ReferenceGraph,
}

impl<'a> InstantiationResolver<'a> {
    pub fn new(program: &'a Program, plan: &'a ContextPlan, graph: &'a ReferenceGraph) -> Self {
        Self { program, plan, graph }
    }

    /// Context -> contexts that must exist before it.
    pub fn dependencies(&self) -> BTreeMap<ContextId, BTreeSet<ContextId>> {
        let slots: BTreeMap<FieldId, ContextId> = self
            .plan
            .contexts()
            .filter_map(|(id, c)| c.slot().map(|slot| (slot, id)))
            .collect();

        let mut dependencies = BTreeMap::new();
        for (id, context) in self.plan.contexts() {
            let mut needs = BTreeSet::new();
            if let Some(parent) = context.parent {
                needs.insert(parent);
            }
            if !context.is_reused_singleton() {
                let mut entries = vec![context.constructor];
                entries.extend(context.init_units.iter().copied());
                for method in self.reachable(entries) {
                    let Ok(body) = self.program.body(method) else { continue };
                    for instr in body.instructions() {
                        if !matches!(instr.opcode, OpCode::LdFld | OpCode::LdFldA) {
                            continue;
                        }
                        if let Some(other) = instr.field_operand().and_then(|f| slots.get(&f)) {
                            if *other != id {
                                needs.insert(*other);
                            }
                        }
                    }
                }
            }
            dependencies.insert(id, needs);
        }
        dependencies
    }

    /// Methods reachable from `entries`, entries included.
    fn reachable(&self, entries: Vec<MethodId>) -> BTreeSet<MethodId> {
        let mut seen = BTreeSet::new();
        let mut work = entries;
        while let Some(method) = work.pop() {
            if !seen.insert(method) {
                continue;
            }
            work.extend(self.graph.callees(method).iter().map(|s| s.callee));
        }
        seen
    }

    /// Contexts in instantiation order.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn order(&self) -> Result<Vec<ContextId>, ResolveError> {
        let dependencies = self.dependencies();

        // Edge dependency -> dependent; node index == context index.
        let mut graph: DiGraph<ContextId, ()> = DiGraph::new();
        for (id, _) in self.plan.contexts() {
            graph.add_node(id);
        }
        for (id, needs) in &dependencies {
            for need in needs {
                graph.add_edge(node(*need), node(*id), ());
            }
        }

        let mut remaining: BTreeMap<ContextId, usize> = dependencies
            .iter()
            .map(|(id, needs)| (*id, needs.len()))
            .collect();
        let mut ready: BTreeSet<ContextId> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(remaining.len());
        while let Some(next) = ready.pop_first() {
            remaining.remove(&next);
            order.push(next);
            for dependent in graph.neighbors_directed(node(next), Direction::Outgoing) {
                let dependent = graph[dependent];
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if remaining.is_empty() {
            debug!(contexts = order.len(), "instantiation order resolved");
            return Ok(order);
        }

        let left: BTreeSet<ContextId> = remaining.keys().copied().collect();
        let cycles = self.cycles(&dependencies, &left);
        Err(ResolveError::Cycles {
            cycles: cycles.into_iter().collect(),
        })
    }

    /// Every elementary cycle among `left`, each as names starting at the
    /// smallest.
    fn cycles(
        &self,
        dependencies: &BTreeMap<ContextId, BTreeSet<ContextId>>,
        left: &BTreeSet<ContextId>,
    ) -> BTreeSet<Vec<String>> {
        let mut graph: DiGraph<ContextId, ()> = DiGraph::new();
        let nodes: BTreeMap<ContextId, NodeIndex> =
            left.iter().map(|id| (*id, graph.add_node(*id))).collect();
        for (id, from) in &nodes {
            for need in dependencies.get(id).into_iter().flatten() {
                if let Some(to) = nodes.get(need) {
                    graph.add_edge(*from, *to, ());
                }
            }
        }

        let mut found = BTreeSet::new();
        for component in tarjan_scc(&graph) {
            let members: BTreeSet<ContextId> = component.iter().map(|n| graph[*n]).collect();
            // Circuits through `start` use only members ordered after it, so
            // each circuit is found from its smallest member alone.
            for start in &members {
                let allowed: BTreeSet<ContextId> = members.range(*start..).copied().collect();
                let mut path = vec![*start];
                self.circuits(*start, dependencies, &allowed, &mut path, &mut found);
            }
        }
        found
    }

    fn circuits(
        &self,
        start: ContextId,
        dependencies: &BTreeMap<ContextId, BTreeSet<ContextId>>,
        allowed: &BTreeSet<ContextId>,
        path: &mut Vec<ContextId>,
        found: &mut BTreeSet<Vec<String>>,
    ) {
        let Some(current) = path.last().copied() else {
            return;
        };
        for next in dependencies.get(&current).into_iter().flatten() {
            if *next == start {
                found.insert(self.normalize(path));
            } else if allowed.contains(next) && !path.contains(next) {
                path.push(*next);
                self.circuits(start, dependencies, allowed, path, found);
                path.pop();
            }
        }
    }

    /// Names of `cycle`, rotated to start at the smallest.
    fn normalize(&self, cycle: &[ContextId]) -> Vec<String> {
        let mut names: Vec<String> = cycle
            .iter()
            .map(|c| self.plan.context(*c).name.clone())
            .collect();
        if let Some(smallest) = names
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(i, _)| i)
        {
            names.rotate_left(smallest);
        }
        names
    }

    /// Root-constructor steps in instantiation order.
    pub fn steps(&self) -> Result<Vec<InstantiationStep>, ResolveError> {
        Ok(self.steps_in(&self.order()?))
    }

    /// Steps for contexts already in `order`. Contexts without a slot are
    /// skipped.
    pub fn steps_in(&self, order: &[ContextId]) -> Vec<InstantiationStep> {
        order
            .iter()
            .copied()
            .filter_map(|id| {
                let context = self.plan.context(id);
                let slot = context.slot()?;
                Some(match context.singleton {
                    Some(instance) => InstantiationStep::AssignSingleton {
                        context: id,
                        slot,
                        instance,
                    },
                    None => InstantiationStep::Construct {
                        context: id,
                        slot,
                        parent: context.parent,
                    },
                })
            })
            .collect()
    }
}

fn node(id: ContextId) -> NodeIndex {
    NodeIndex::new(id.index())
}

// ============================================================================
// Root constructor emission
// ============================================================================

/// Append the instantiation `steps` to the root constructor, ahead of every
/// `ret`. Slots the constructor already stores are left alone.
///
/// Returns the number of steps emitted.
pub fn emit_root_constructor(
    program: &mut Program,
    plan: &ContextPlan,
    steps: &[InstantiationStep],
) -> Result<usize, ContextifyError> {
    let constructor = plan.root_constructor;
    let missing = || ResolveError::MissingRootConstructor {
        root: program.type_name(plan.root).to_string(),
    };
    let Some(body) = program.method(constructor)?.body.as_ref() else {
        return Err(missing().into());
    };
    let stored: BTreeSet<FieldId> = body
        .instructions()
        .iter()
        .filter(|i| i.opcode == OpCode::StFld)
        .filter_map(|i| i.field_operand())
        .collect();

    let mut code = Vec::new();
    let mut emitted = 0;
    for step in steps {
        if stored.contains(&step.slot()) {
            continue;
        }
        let context = plan.context(step.context());
        code.push(Instruction::arg(OpCode::LdArg, 0));
        for link in &context.chain[..context.chain.len().saturating_sub(1)] {
            code.push(chain_load(program, *link)?);
        }
        match *step {
            InstantiationStep::Construct { .. } => {
                let params = program.method(context.constructor)?.params.clone();
                for param in &params {
                    code.extend(constructor_argument(program, plan, step.context(), &param.ty)?);
                }
                code.push(Instruction::method(OpCode::NewObj, context.constructor));
            }
            InstantiationStep::AssignSingleton { instance, .. } => {
                code.push(Instruction::field(OpCode::LdSFld, instance));
            }
        }
        code.push(Instruction::field(OpCode::StFld, step.slot()));
        emitted += 1;
    }
    if code.is_empty() {
        return Ok(0);
    }

    let returns = program.body(constructor)?.returns();
    let body = program.body_mut(constructor)?;
    if returns.is_empty() {
        code.push(Instruction::op(OpCode::Ret));
        body.push(code);
    } else {
        for ret in returns {
            body.insert_before(ret, code.clone())?;
        }
    }
    debug!(steps = emitted, "root constructor populated");
    Ok(emitted)
}

/// Build a root constructor body holding only the instantiation steps.
pub fn root_constructor_body(
    program: &mut Program,
    plan: &ContextPlan,
    steps: &[InstantiationStep],
) -> Result<usize, ContextifyError> {
    if program.method(plan.root_constructor)?.body.is_none() {
        program.set_body(plan.root_constructor, fresh_body(vec![Instruction::op(OpCode::Ret)]))?;
    }
    emit_root_constructor(program, plan, steps)
}

fn chain_load(program: &Program, link: FieldId) -> Result<Instruction, ContextifyError> {
    let ty = &program.field(link)?.ty;
    let opcode = if program.is_value_type(ty) { OpCode::LdFldA } else { OpCode::LdFld };
    Ok(Instruction::field(opcode, link))
}

/// Value for a context constructor parameter of type `ty`.
fn constructor_argument(
    program: &Program,
    plan: &ContextPlan,
    context: ContextId,
    ty: &TypeRef,
) -> Result<Vec<Instruction>, ContextifyError> {
    if *ty == TypeRef::Named(plan.root) {
        return Ok(vec![Instruction::arg(OpCode::LdArg, 0)]);
    }
    let descriptor = plan.context(context);
    if let Some(parent) = descriptor.parent {
        let parent = plan.context(parent);
        if *ty == TypeRef::Named(parent.generated) {
            let mut seq = vec![Instruction::arg(OpCode::LdArg, 0)];
            for link in &parent.chain {
                seq.push(chain_load(program, *link)?);
            }
            return Ok(seq);
        }
    }
    warn!(
        context = %descriptor.name,
        parameter = %program.type_ref_name(ty),
        "constructor parameter has no known source; passing null"
    );
    Ok(vec![Instruction::op(OpCode::LdNull)])
}
