//! Public entry point for provenance queries.

use tracing::trace;

use contextify_core::{AnalysisError, InstrId, MethodId, Program};

use super::walker::Walker;
use super::{FlowCache, ProvenancePath, StackType, Usage};

/// Stack provenance analyzer.
///
/// Owns the per-method [`FlowCache`]; every query takes the program by
/// shared reference, so the analyzer can live beside a mutable program as
/// long as edits are followed by [`invalidate`](Self::invalidate).
#[derive(Debug, Default)]
pub struct StackAnalyzer {
    cache: FlowCache,
}

impl StackAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget cached flow data for `method` after a structural edit.
    pub fn invalidate(&mut self, method: MethodId) {
        self.cache.invalidate(method);
    }

    pub fn cache(&self) -> &FlowCache {
        &self.cache
    }

    fn walker<'a>(
        &'a mut self,
        program: &'a Program,
        method: MethodId,
    ) -> Result<Walker<'a>, AnalysisError> {
        let body = program.body(method)?;
        let index = self.cache.index(method, body);
        Ok(Walker::new(program, method, body, index))
    }

    /// Provenance of every operand consumed by `at`, indexed by slot.
    ///
    /// Slot 0 is the deepest operand: the receiver of an instance call, or
    /// the object of a field store.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn operands(
        &mut self,
        program: &Program,
        method: MethodId,
        at: InstrId,
    ) -> Result<Vec<Vec<ProvenancePath>>, AnalysisError> {
        let mut walker = self.walker(program, method)?;
        let pops = walker.effect(at)?.pops;
        let mut slots = Vec::with_capacity(pops);
        for slot in 0..pops {
            slots.push(walker.value_paths(at, pops - 1 - slot)?);
        }
        trace!(%method, %at, slots = slots.len(), "operand provenance");
        Ok(slots)
    }

    /// Provenance of operand `slot` of `at`.
    pub fn operand(
        &mut self,
        program: &Program,
        method: MethodId,
        at: InstrId,
        slot: usize,
    ) -> Result<Vec<ProvenancePath>, AnalysisError> {
        let mut walker = self.walker(program, method)?;
        let pops = walker.effect(at)?.pops;
        if slot >= pops {
            return Err(AnalysisError::SlotOutOfRange {
                method: program.identity(method),
                instr: at,
                slot,
                arity: pops,
            });
        }
        let paths = walker.value_paths(at, pops - 1 - slot)?;
        trace!(%method, %at, slot, paths = paths.len(), "operand provenance");
        Ok(paths)
    }

    /// Provenance of the value `depth` slots below the top of the stack just
    /// before `at`, whether or not `at` consumes it.
    pub fn stack_value(
        &mut self,
        program: &Program,
        method: MethodId,
        at: InstrId,
        depth: usize,
    ) -> Result<Vec<ProvenancePath>, AnalysisError> {
        self.walker(program, method)?.value_paths(at, depth)
    }

    /// Direct consumers of the values pushed by `at`.
    pub fn usage(
        &mut self,
        program: &Program,
        method: MethodId,
        at: InstrId,
    ) -> Result<Vec<Usage>, AnalysisError> {
        self.walker(program, method)?.usage(at)
    }

    /// Consumers of the values pushed by `at`, following them through locals
    /// and `dup`.
    pub fn usage_through_locals(
        &mut self,
        program: &Program,
        method: MethodId,
        at: InstrId,
    ) -> Result<Vec<Usage>, AnalysisError> {
        self.walker(program, method)?.usage_through_locals(at)
    }

    /// Stores that may define the local read at `at`.
    pub fn local_sources(
        &mut self,
        program: &Program,
        method: MethodId,
        at: InstrId,
    ) -> Result<Vec<InstrId>, AnalysisError> {
        self.walker(program, method)?.local_sources(at)
    }

    /// Loads that observe the local written at `at`.
    pub fn local_uses(
        &mut self,
        program: &Program,
        method: MethodId,
        at: InstrId,
    ) -> Result<Vec<InstrId>, AnalysisError> {
        self.walker(program, method)?.local_uses(at)
    }

    /// Common type of the top of the stack just before `at`.
    pub fn stack_top_type(
        &mut self,
        program: &Program,
        method: MethodId,
        at: InstrId,
    ) -> Result<StackType, AnalysisError> {
        self.walker(program, method)?.value_type(at, 0)
    }

    /// Common type of operand `slot` of `at`.
    pub fn operand_type(
        &mut self,
        program: &Program,
        method: MethodId,
        at: InstrId,
        slot: usize,
    ) -> Result<StackType, AnalysisError> {
        let mut walker = self.walker(program, method)?;
        let pops = walker.effect(at)?.pops;
        if slot >= pops {
            return Err(AnalysisError::SlotOutOfRange {
                method: program.identity(method),
                instr: at,
                slot,
                arity: pops,
            });
        }
        walker.value_type(at, pops - 1 - slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::PathOrigin;
    use contextify_core::{
        BodyBuilder, FieldFlags, HandlerKind, MethodBody, MethodFlags, OpCode, Param, TypeFlags,
        TypeRef,
    };

    struct Fixture {
        program: Program,
        method: MethodId,
    }

    fn fixture(build: impl FnOnce(&mut Program, &mut BodyBuilder)) -> Fixture {
        let mut program = Program::new();
        let ty = program.add_type("Test", "T", None, TypeFlags::empty()).unwrap();
        let method = program
            .add_method(
                ty,
                "Run",
                vec![Param::new("flag", TypeRef::Bool)],
                TypeRef::Void,
                MethodFlags::STATIC,
            )
            .unwrap();
        let mut b = BodyBuilder::new();
        build(&mut program, &mut b);
        program.set_body(method, b.build().unwrap()).unwrap();
        Fixture { program, method }
    }

    fn body(f: &Fixture) -> &MethodBody {
        f.program.body(f.method).unwrap()
    }

    fn id_of(f: &Fixture, op: OpCode, nth: usize) -> InstrId {
        body(f)
            .instructions()
            .iter()
            .filter(|i| i.opcode == op)
            .nth(nth)
            .unwrap()
            .id
    }

    #[test]
    fn straight_line_operand() {
        // ldc 1; ldc 2; add; stsfld x; ret
        let f = fixture(|p, b| {
            let ty = p.find_type("Test.T").unwrap();
            let x = p.add_field(ty, "x", TypeRef::Int32, FieldFlags::STATIC).unwrap();
            b.emit_i4(1);
            b.emit_i4(2);
            b.emit(OpCode::Add);
            b.emit_field(OpCode::StSFld, x);
            b.emit(OpCode::Ret);
        });
        let mut analyzer = StackAnalyzer::new();
        let store = id_of(&f, OpCode::StSFld, 0);
        let paths = analyzer.operand(&f.program, f.method, store, 0).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(
            paths[0].instructions,
            vec![InstrId::new(0), InstrId::new(1), InstrId::new(2)]
        );
        assert!(paths[0].is_insertable());
    }

    #[test]
    fn two_branches_give_two_paths() {
        // ldarg0; brfalse L; ldc 1; br J; L: ldc 2; J: pop; ret
        let f = fixture(|_, b| {
            let l = b.label();
            let j = b.label();
            b.emit_arg(OpCode::LdArg, 0);
            b.emit_branch(OpCode::BrFalse, l);
            b.emit_i4(1);
            b.emit_branch(OpCode::Br, j);
            b.mark(l);
            b.emit_i4(2);
            b.mark(j);
            b.emit(OpCode::Pop);
            b.emit(OpCode::Ret);
        });
        let mut analyzer = StackAnalyzer::new();
        let pop = id_of(&f, OpCode::Pop, 0);
        let paths = analyzer.operand(&f.program, f.method, pop, 0).unwrap();
        let producers: Vec<_> = paths.iter().filter_map(ProvenancePath::producer).collect();
        assert_eq!(producers, vec![InstrId::new(4), InstrId::new(2)]);
    }

    #[test]
    fn value_from_before_branch_is_one_path() {
        // ldc 7; ldarg0; brtrue J; nop; J: pop; ret
        let f = fixture(|_, b| {
            let j = b.label();
            b.emit_i4(7);
            b.emit_arg(OpCode::LdArg, 0);
            b.emit_branch(OpCode::BrTrue, j);
            b.emit(OpCode::Nop);
            b.mark(j);
            b.emit(OpCode::Pop);
            b.emit(OpCode::Ret);
        });
        let mut analyzer = StackAnalyzer::new();
        let pop = id_of(&f, OpCode::Pop, 0);
        let paths = analyzer.operand(&f.program, f.method, pop, 0).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].instructions, vec![InstrId::new(0)]);
    }

    #[test]
    fn sequential_joins_are_walked_once() {
        // ldc 7; 30 x (ldarg0; brfalse L; nop; br J; L: nop; J:); pop; ret
        let f = fixture(|_, b| {
            b.emit_i4(7);
            for _ in 0..30 {
                let l = b.label();
                let j = b.label();
                b.emit_arg(OpCode::LdArg, 0);
                b.emit_branch(OpCode::BrFalse, l);
                b.emit(OpCode::Nop);
                b.emit_branch(OpCode::Br, j);
                b.mark(l);
                b.emit(OpCode::Nop);
                b.mark(j);
            }
            b.emit(OpCode::Pop);
            b.emit(OpCode::Ret);
        });
        let mut analyzer = StackAnalyzer::new();
        let pop = id_of(&f, OpCode::Pop, 0);
        let paths = analyzer.operand(&f.program, f.method, pop, 0).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].instructions, vec![InstrId::new(0)]);
        assert!(paths[0].is_insertable());
    }

    #[test]
    fn dup_makes_path_inexact() {
        let f = fixture(|p, b| {
            let ty = p.find_type("Test.T").unwrap();
            let x = p.add_field(ty, "x", TypeRef::Int32, FieldFlags::STATIC).unwrap();
            b.emit_i4(1);
            b.emit(OpCode::Dup);
            b.emit_field(OpCode::StSFld, x);
            b.emit(OpCode::Pop);
            b.emit(OpCode::Ret);
        });
        let mut analyzer = StackAnalyzer::new();
        let store = id_of(&f, OpCode::StSFld, 0);
        let paths = analyzer.operand(&f.program, f.method, store, 0).unwrap();
        assert_eq!(paths.len(), 1);
        assert!(!paths[0].is_insertable());
    }

    #[test]
    fn loop_terminates() {
        // L: ldc 1; pop; ldarg0; brtrue L; ret
        let f = fixture(|_, b| {
            let top = b.label();
            b.mark(top);
            b.emit_i4(1);
            b.emit(OpCode::Pop);
            b.emit_arg(OpCode::LdArg, 0);
            b.emit_branch(OpCode::BrTrue, top);
            b.emit(OpCode::Ret);
        });
        let mut analyzer = StackAnalyzer::new();
        let pop = id_of(&f, OpCode::Pop, 0);
        let paths = analyzer.operand(&f.program, f.method, pop, 0).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].producer(), Some(InstrId::new(0)));
    }

    #[test]
    fn underflow_at_entry() {
        let f = fixture(|_, b| {
            b.emit(OpCode::Pop);
            b.emit(OpCode::Ret);
        });
        let mut analyzer = StackAnalyzer::new();
        let err = analyzer
            .operand(&f.program, f.method, InstrId::new(0), 0)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::StackUnderflow { .. }));
    }

    #[test]
    fn slot_out_of_range() {
        let f = fixture(|_, b| {
            b.emit_i4(1);
            b.emit(OpCode::Pop);
            b.emit(OpCode::Ret);
        });
        let mut analyzer = StackAnalyzer::new();
        let err = analyzer
            .operand(&f.program, f.method, InstrId::new(1), 1)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::SlotOutOfRange { arity: 1, .. }));
    }

    #[test]
    fn catch_entry_origin() {
        let f = fixture(|_, b| {
            let (ts, te, hs, he) = (b.label(), b.label(), b.label(), b.label());
            b.mark(ts);
            b.emit(OpCode::Nop);
            b.emit_branch(OpCode::Leave, he);
            b.mark(te);
            b.mark(hs);
            b.emit(OpCode::Pop);
            b.emit_branch(OpCode::Leave, he);
            b.mark(he);
            b.emit(OpCode::Ret);
            b.handler(HandlerKind::Catch(TypeRef::Object), ts, te, hs, he);
        });
        let mut analyzer = StackAnalyzer::new();
        let pop = id_of(&f, OpCode::Pop, 0);
        let paths = analyzer.operand(&f.program, f.method, pop, 0).unwrap();
        assert_eq!(paths[0].origin, PathOrigin::CatchEntry(pop));
        assert_eq!(
            analyzer.operand_type(&f.program, f.method, pop, 0).unwrap(),
            StackType::Known(TypeRef::Object)
        );
    }

    #[test]
    fn usage_follows_locals_and_dup() {
        // ldstr; dup; stloc 0; pop; ldloc 0; pop; ret
        let f = fixture(|_, b| {
            let l = b.local(TypeRef::String);
            b.emit_str("x");
            b.emit(OpCode::Dup);
            b.emit_local(OpCode::StLoc, l);
            b.emit(OpCode::Pop);
            b.emit_local(OpCode::LdLoc, l);
            b.emit(OpCode::Pop);
            b.emit(OpCode::Ret);
        });
        let mut analyzer = StackAnalyzer::new();
        let direct = analyzer.usage(&f.program, f.method, InstrId::new(0)).unwrap();
        assert_eq!(direct, vec![Usage { consumer: InstrId::new(1), slot: 0 }]);

        let through = analyzer
            .usage_through_locals(&f.program, f.method, InstrId::new(0))
            .unwrap();
        let consumers: Vec<_> = through.iter().map(|u| u.consumer).collect();
        assert_eq!(consumers, vec![InstrId::new(3), InstrId::new(5)]);
    }

    #[test]
    fn local_def_use() {
        // ldarg0; brfalse L; ldc 1; stloc0; br J; L: ldc 2; stloc0; J: ldloc0; pop; ret
        let f = fixture(|_, b| {
            let l = b.local(TypeRef::Int32);
            let else_ = b.label();
            let join = b.label();
            b.emit_arg(OpCode::LdArg, 0);
            b.emit_branch(OpCode::BrFalse, else_);
            b.emit_i4(1);
            b.emit_local(OpCode::StLoc, l);
            b.emit_branch(OpCode::Br, join);
            b.mark(else_);
            b.emit_i4(2);
            b.emit_local(OpCode::StLoc, l);
            b.mark(join);
            b.emit_local(OpCode::LdLoc, l);
            b.emit(OpCode::Pop);
            b.emit(OpCode::Ret);
        });
        let mut analyzer = StackAnalyzer::new();
        let load = id_of(&f, OpCode::LdLoc, 0);
        let sources = analyzer.local_sources(&f.program, f.method, load).unwrap();
        assert_eq!(sources, vec![InstrId::new(3), InstrId::new(6)]);
        let uses = analyzer
            .local_uses(&f.program, f.method, InstrId::new(3))
            .unwrap();
        assert_eq!(uses, vec![load]);
    }

    #[test]
    fn null_versus_object_diverges() {
        let f = fixture(|_, b| {
            let l = b.label();
            let j = b.label();
            b.emit_arg(OpCode::LdArg, 0);
            b.emit_branch(OpCode::BrFalse, l);
            b.emit(OpCode::LdNull);
            b.emit_branch(OpCode::Br, j);
            b.mark(l);
            b.emit_str("s");
            b.mark(j);
            b.emit(OpCode::Pop);
            b.emit(OpCode::Ret);
        });
        let mut analyzer = StackAnalyzer::new();
        let pop = id_of(&f, OpCode::Pop, 0);
        assert_eq!(
            analyzer.stack_top_type(&f.program, f.method, pop).unwrap(),
            StackType::Divergent
        );
        assert_eq!(
            analyzer.stack_top_type(&f.program, f.method, InstrId::new(1)).unwrap(),
            StackType::Known(TypeRef::Bool)
        );
    }
}
