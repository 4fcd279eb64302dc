//! Rewriting callable constructions whose target gained a context handle.
//!
//! ## Recognized shapes
//!
//! ```text
//! capture-free      ldnull; ldftn T; newobj D::.ctor
//! cached            ldsfld c; dup; brtrue L; pop; <recv>; ldftn T; newobj D::.ctor; dup; stsfld c; L:
//! bound receiver    <recv>; ldftn T; newobj D::.ctor
//! virtual receiver  <recv>; dup; ldvirtftn T; newobj D::.ctor
//! ```
//!
//! The cached shape is first expanded into the plain one: the cache would
//! otherwise keep a callable bound to whichever root created it first.
//! Targets that gained a leading parameter are reached through a capture
//! record whose trampoline supplies the stored root. Targets converted onto a
//! context type are bound directly to the context instance.

use tracing::{debug, warn};

use contextify_analysis::{StackAnalyzer, Usage};
use contextify_core::{
    BindingError, ContextifyError, InstrId, Instruction, MethodId, ModelError, OpCode, Operand,
    Program, TypeId,
};

use super::{CaptureOutcome, ClosureRewriter, RecordKey, RewriteSite};
use crate::binding::{Binding, BindingMode};
use crate::handle::ChainAccess;
use crate::plan::ContextPlan;

impl ClosureRewriter {
    /// Rewrite the capture of a bound target at `ldftn`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn rewrite_capture(
        &mut self,
        program: &mut Program,
        analyzer: &mut StackAnalyzer,
        plan: &ContextPlan,
        site: RewriteSite,
        ldftn: InstrId,
        binding: Binding,
    ) -> Result<CaptureOutcome, ContextifyError> {
        let method = site.method;
        let opcode = program
            .body(method)?
            .get(ldftn)
            .ok_or(ModelError::UnknownInstruction { instr: ldftn })?
            .opcode;

        let usage = analyzer.usage(program, method, ldftn)?;
        let construct = match usage.as_slice() {
            [Usage { consumer, slot: 1 }] if self.is_callable_construction(program, method, *consumer)? => {
                *consumer
            }
            _ => {
                return self.unrecognized(
                    program,
                    method,
                    ldftn,
                    "function pointer is not passed to a callable constructor",
                );
            }
        };

        if self.expand_cached(program, analyzer, method, construct)? {
            debug!(method = %program.identity(method), %construct, "cached callable expanded");
        }

        let receiver = analyzer.operand(program, method, construct, 0)?;
        let capture_free = {
            let body = program.body(method)?;
            !receiver.is_empty()
                && receiver.iter().all(|path| {
                    path.producer()
                        .and_then(|p| body.get(p))
                        .is_some_and(|i| i.opcode == OpCode::LdNull)
                })
        };

        match (binding.mode, capture_free, opcode) {
            (BindingMode::InstanceConverted(context), true, OpCode::LdFtn) => {
                let mut seq = vec![Instruction::op(OpCode::Pop)];
                seq.extend(site.handle.load_context(program, plan, method, context, ChainAccess::Read)?);
                let body = program.body_mut(method)?;
                body.insert_before(ldftn, seq)?;
                body.set_operand(ldftn, Operand::Method(binding.replacement))?;
            }
            (BindingMode::AddedParameter, true, OpCode::LdFtn) => {
                let (ctor, forward) = self.record_for(program, method, None, binding)?;
                let mut seq = vec![Instruction::op(OpCode::Pop)];
                seq.extend(site.handle.load_root(program, method)?);
                seq.push(Instruction::method(OpCode::NewObj, ctor));
                let body = program.body_mut(method)?;
                body.insert_before(ldftn, seq)?;
                body.set_operand(ldftn, Operand::Method(forward))?;
            }
            (BindingMode::AddedParameter, false, OpCode::LdFtn) => {
                let owner = program.method(binding.original)?.owner;
                let (ctor, forward) = self.record_for(program, method, Some(owner), binding)?;
                let mut seq = site.handle.load_root(program, method)?;
                seq.push(Instruction::method(OpCode::NewObj, ctor));
                let body = program.body_mut(method)?;
                body.insert_before(ldftn, seq)?;
                body.set_operand(ldftn, Operand::Method(forward))?;
            }
            (BindingMode::AddedParameter, false, OpCode::LdVirtFtn) => {
                let owner = program.method(binding.original)?.owner;
                let (ctor, forward) = self.record_for(program, method, Some(owner), binding)?;
                // The duplicated receiver feeding ldvirtftn is dropped; the
                // record dispatches virtually instead.
                let mut seq = vec![Instruction::op(OpCode::Pop)];
                seq.extend(site.handle.load_root(program, method)?);
                seq.push(Instruction::method(OpCode::NewObj, ctor));
                let body = program.body_mut(method)?;
                body.insert_before(ldftn, seq)?;
                body.replace(ldftn, Instruction::method(OpCode::LdFtn, forward))?;
            }
            (BindingMode::InstanceConverted(_), false, _) => {
                return self.unrecognized(
                    program,
                    method,
                    ldftn,
                    "static target captured together with a receiver",
                );
            }
            _ => {
                return self.unrecognized(program, method, ldftn, "unsupported capture shape");
            }
        }

        debug!(
            method = %program.identity(method),
            target = %program.identity(binding.replacement),
            %ldftn,
            "capture site rewritten"
        );
        Ok(CaptureOutcome::Rewritten)
    }

    fn is_callable_construction(
        &self,
        program: &Program,
        method: MethodId,
        consumer: InstrId,
    ) -> Result<bool, ModelError> {
        let instr = program
            .body(method)?
            .get(consumer)
            .ok_or(ModelError::UnknownInstruction { instr: consumer })?;
        Ok(instr.opcode == OpCode::NewObj
            && instr
                .method_operand()
                .is_some_and(|ctor| program.is_delegate_ctor(ctor)))
    }

    /// Record constructor and trampoline for a capture in `method`.
    fn record_for(
        &mut self,
        program: &mut Program,
        method: MethodId,
        receiver: Option<TypeId>,
        binding: Binding,
    ) -> Result<(MethodId, MethodId), ModelError> {
        let key = RecordKey {
            enclosing: method,
            receiver,
        };
        let record = self.record(program, key)?;
        let forward = record.trampoline(program, binding.original, binding.replacement)?;
        record.rewritten.insert(method);
        Ok((record.constructor, forward))
    }

    /// Strip the lazily-populated cache around the construction at
    /// `construct`, leaving a plain construction.
    fn expand_cached(
        &mut self,
        program: &mut Program,
        analyzer: &mut StackAnalyzer,
        method: MethodId,
        construct: InstrId,
    ) -> Result<bool, ContextifyError> {
        let receiver = analyzer.operand(program, method, construct, 0)?;
        let [path] = receiver.as_slice() else {
            return Ok(false);
        };
        let Some(start) = path.start() else {
            return Ok(false);
        };

        let body = program.body(method)?;
        let opcode_of = |id: Option<InstrId>| id.and_then(|i| body.get(i)).map(|i| i.opcode);

        let dup_after = body.next_of(construct);
        let store = dup_after.and_then(|id| body.next_of(id));
        if opcode_of(dup_after) != Some(OpCode::Dup) || opcode_of(store) != Some(OpCode::StSFld) {
            return Ok(false);
        }
        let cache = store.and_then(|id| body.get(id)).and_then(|i| i.field_operand());
        let resume = store.and_then(|id| body.next_of(id));

        let pop = body.prev_of(start);
        let branch = pop.and_then(|id| body.prev_of(id));
        let dup_before = branch.and_then(|id| body.prev_of(id));
        let load = dup_before.and_then(|id| body.prev_of(id));

        let skips_to_resume = match (branch.and_then(|id| body.get(id)), resume) {
            (Some(instr), Some(resume)) => instr.jump_targets() == [resume].as_slice(),
            _ => false,
        };
        let cached = opcode_of(pop) == Some(OpCode::Pop)
            && opcode_of(branch) == Some(OpCode::BrTrue)
            && skips_to_resume
            && opcode_of(dup_before) == Some(OpCode::Dup)
            && load
                .and_then(|id| body.get(id))
                .is_some_and(|i| i.opcode == OpCode::LdSFld && i.field_operand() == cache);
        if !cached {
            return Ok(false);
        }

        let body = program.body_mut(method)?;
        for id in [store, dup_after, load, dup_before, branch, pop].into_iter().flatten() {
            body.remove(id)?;
        }
        Ok(true)
    }

    fn unrecognized(
        &mut self,
        program: &Program,
        method: MethodId,
        at: InstrId,
        detail: &str,
    ) -> Result<CaptureOutcome, ContextifyError> {
        if self.strict {
            return Err(BindingError::UnrecognizedCallable {
                method: program.identity(method),
                instr: at,
                detail: detail.to_string(),
            }
            .into());
        }
        warn!(method = %program.identity(method), %at, detail, "capture site left unrewritten");
        self.skipped += 1;
        Ok(CaptureOutcome::Skipped)
    }
}
