use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use tracing::debug;

use contextify_core::{AnalysisError, MethodId, OpCode, Program};

use super::{CallSite, CaptureGraph, ImplicitCallMode, InheritanceGraph};
use crate::provenance::StackAnalyzer;

/// Who calls whom, including through virtual dispatch and captured callables.
///
/// Edges are owned by their caller: re-deriving a caller replaces exactly the
/// edges it contributed.
#[derive(Debug, Default)]
pub struct ReferenceGraph {
    /// callee -> caller -> sites, callers in id order.
    callers: FxHashMap<MethodId, BTreeMap<MethodId, Vec<CallSite>>>,
    /// caller -> outgoing sites in instruction order.
    callees: FxHashMap<MethodId, Vec<CallSite>>,
    inheritance: InheritanceGraph,
    captures: CaptureGraph,
}

impl ReferenceGraph {
    /// Scan every live method body.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn build(program: &Program, analyzer: &mut StackAnalyzer) -> Result<Self, AnalysisError> {
        let mut graph = Self {
            inheritance: InheritanceGraph::build(program),
            captures: CaptureGraph::build(program, analyzer)?,
            ..Self::default()
        };
        for method in program.methods_with_bodies() {
            graph.scan_method(program, method)?;
        }
        debug!(
            callers = graph.callees.len(),
            callees = graph.callers.len(),
            virtuals = graph.inheritance.len(),
            captures = graph.captures.len(),
            "reference graph built"
        );
        Ok(graph)
    }

    fn scan_method(&mut self, program: &Program, caller: MethodId) -> Result<(), AnalysisError> {
        let body = program.body(caller)?;
        let mut sites = Vec::new();
        for instr in body.instructions() {
            let Some(target) = instr.method_operand() else {
                continue;
            };
            match instr.opcode {
                OpCode::Call | OpCode::NewObj => {
                    sites.push(CallSite::new(caller, instr.id, target, ImplicitCallMode::Direct));
                }
                OpCode::CallVirt => {
                    sites.push(CallSite::new(caller, instr.id, target, ImplicitCallMode::Direct));
                    for implementation in self.inheritance.implementations(target) {
                        sites.push(CallSite::new(
                            caller,
                            instr.id,
                            implementation,
                            ImplicitCallMode::Inheritance,
                        ));
                    }
                }
                OpCode::LdFtn => {
                    sites.push(CallSite::new(caller, instr.id, target, ImplicitCallMode::Capture));
                }
                OpCode::LdVirtFtn => {
                    sites.push(CallSite::new(caller, instr.id, target, ImplicitCallMode::Capture));
                    for implementation in self.inheritance.implementations(target) {
                        sites.push(CallSite::new(
                            caller,
                            instr.id,
                            implementation,
                            ImplicitCallMode::Capture,
                        ));
                    }
                }
                _ => {}
            }
        }

        // Invoking a constructed callable reaches its target.
        for link in self.captures.links_in(caller) {
            for &invoke in &link.invokes {
                sites.push(CallSite::new(caller, invoke, link.target, ImplicitCallMode::Capture));
            }
        }

        sites.sort_by_key(|s| (body.position(s.instruction), s.callee, s.mode));
        sites.dedup();
        for site in &sites {
            self.callers
                .entry(site.callee)
                .or_default()
                .entry(caller)
                .or_default()
                .push(*site);
        }
        self.callees.insert(caller, sites);
        Ok(())
    }

    /// Remove every edge `method` contributes as a caller, and its capture
    /// sites. Incoming edges from other callers stay until those callers are
    /// re-derived.
    pub fn forget_method(&mut self, method: MethodId) {
        if let Some(sites) = self.callees.remove(&method) {
            for site in sites {
                if let Some(by_caller) = self.callers.get_mut(&site.callee) {
                    by_caller.remove(&method);
                    if by_caller.is_empty() {
                        self.callers.remove(&site.callee);
                    }
                }
            }
        }
        self.captures.forget_method(method);
    }

    /// Replace the edges contributed by `method` after its body changed.
    pub fn rederive_method(
        &mut self,
        program: &Program,
        analyzer: &mut StackAnalyzer,
        method: MethodId,
    ) -> Result<(), AnalysisError> {
        self.forget_method(method);
        let live = program
            .method(method)
            .is_ok_and(|m| !m.is_retired() && m.body.is_some());
        if !live {
            return Ok(());
        }
        analyzer.invalidate(method);
        self.captures.rederive_method(program, analyzer, method)?;
        self.scan_method(program, method)
    }

    /// Recompute override relations after methods were cloned or retired.
    ///
    /// Existing `Inheritance` edges are not revisited; re-derive the affected
    /// callers afterwards.
    pub fn rebuild_inheritance(&mut self, program: &Program) {
        self.inheritance.rebuild(program);
    }

    // ==========================================================================
    // Queries
    // ==========================================================================

    /// Every site reaching `callee`, grouped by caller in id order.
    pub fn callers(&self, callee: MethodId) -> impl Iterator<Item = &CallSite> {
        self.callers
            .get(&callee)
            .into_iter()
            .flat_map(|by_caller| by_caller.values().flatten())
    }

    /// Distinct methods reaching `callee`, in id order.
    pub fn caller_methods(&self, callee: MethodId) -> Vec<MethodId> {
        self.callers
            .get(&callee)
            .map(|by_caller| by_caller.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Outgoing sites of `caller` in instruction order.
    pub fn callees(&self, caller: MethodId) -> &[CallSite] {
        self.callees.get(&caller).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of direct call sites naming `method`.
    pub fn call_count(&self, method: MethodId) -> usize {
        self.callers(method)
            .filter(|s| s.mode == ImplicitCallMode::Direct)
            .count()
    }

    pub fn inheritance(&self) -> &InheritanceGraph {
        &self.inheritance
    }

    pub fn captures(&self) -> &CaptureGraph {
        &self.captures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextify_core::{BodyBuilder, InstrId, MethodFlags, Param, TypeFlags, TypeRef};

    struct World {
        program: Program,
        base_run: MethodId,
        derived_run: MethodId,
        helper: MethodId,
        main: MethodId,
        other: MethodId,
    }

    fn world() -> World {
        let mut p = Program::new();
        let base = p.add_type("G", "Base", None, TypeFlags::empty()).unwrap();
        let derived = p.add_type("G", "Derived", None, TypeFlags::empty()).unwrap();
        p.set_base(derived, TypeRef::Named(base)).unwrap();
        let util = p.add_type("G", "Util", None, TypeFlags::STATIC).unwrap();

        let base_run = p
            .add_method(base, "Run", vec![], TypeRef::Void, MethodFlags::VIRTUAL)
            .unwrap();
        let derived_run = p
            .add_method(derived, "Run", vec![], TypeRef::Void, MethodFlags::VIRTUAL)
            .unwrap();
        let helper = p
            .add_method(util, "Helper", vec![], TypeRef::Int32, MethodFlags::STATIC)
            .unwrap();
        let main = p
            .add_method(
                util,
                "Main",
                vec![Param::new("b", TypeRef::Named(base))],
                TypeRef::Void,
                MethodFlags::STATIC,
            )
            .unwrap();
        let other = p
            .add_method(util, "Other", vec![], TypeRef::Void, MethodFlags::STATIC)
            .unwrap();

        for m in [base_run, derived_run, other] {
            let mut b = BodyBuilder::new();
            b.emit_method(OpCode::Call, helper);
            b.emit(OpCode::Pop);
            b.emit(OpCode::Ret);
            p.set_body(m, b.build().unwrap()).unwrap();
        }
        let mut b = BodyBuilder::new();
        b.emit_i4(1);
        b.emit(OpCode::Ret);
        p.set_body(helper, b.build().unwrap()).unwrap();

        let mut b = BodyBuilder::new();
        b.emit_arg(OpCode::LdArg, 0);
        b.emit_method(OpCode::CallVirt, base_run);
        b.emit(OpCode::Ret);
        p.set_body(main, b.build().unwrap()).unwrap();

        World {
            program: p,
            base_run,
            derived_run,
            helper,
            main,
            other,
        }
    }

    #[test]
    fn direct_and_inheritance_edges() {
        let w = world();
        let mut analyzer = StackAnalyzer::new();
        let graph = ReferenceGraph::build(&w.program, &mut analyzer).unwrap();

        assert_eq!(
            graph.caller_methods(w.helper),
            vec![w.base_run, w.derived_run, w.other]
        );
        assert_eq!(graph.call_count(w.helper), 3);

        let into_derived: Vec<_> = graph.callers(w.derived_run).collect();
        assert_eq!(into_derived.len(), 1);
        assert_eq!(into_derived[0].caller, w.main);
        assert_eq!(into_derived[0].mode, ImplicitCallMode::Inheritance);
        assert_eq!(graph.call_count(w.derived_run), 0);
        assert_eq!(graph.call_count(w.base_run), 1);

        let out = graph.callees(w.main);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].instruction, InstrId::new(1));
    }

    #[test]
    fn rederive_drops_and_adds_edges() {
        let mut w = world();
        let mut analyzer = StackAnalyzer::new();
        let mut graph = ReferenceGraph::build(&w.program, &mut analyzer).unwrap();

        let mut b = BodyBuilder::new();
        b.emit(OpCode::Ret);
        w.program.set_body(w.other, b.build().unwrap()).unwrap();
        graph.rederive_method(&w.program, &mut analyzer, w.other).unwrap();
        assert_eq!(graph.caller_methods(w.helper), vec![w.base_run, w.derived_run]);
        assert!(graph.callees(w.other).is_empty());
    }

    #[test]
    fn forget_retired_caller() {
        let mut w = world();
        let mut analyzer = StackAnalyzer::new();
        let mut graph = ReferenceGraph::build(&w.program, &mut analyzer).unwrap();
        w.program.retire_method(w.other).unwrap();
        graph.rederive_method(&w.program, &mut analyzer, w.other).unwrap();
        assert_eq!(graph.call_count(w.helper), 2);
    }
}
