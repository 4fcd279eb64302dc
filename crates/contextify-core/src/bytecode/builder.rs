//! Label-based body construction.
//!
//! [`BodyBuilder`] emits instructions in order and lets branches name their
//! destination with a [`Label`] before the destination exists. Labels are
//! resolved when the body is built: a label marked at position `n` resolves
//! to the id of the `n`th emitted instruction.
//!
//! ```
//! use contextify_core::{BodyBuilder, OpCode};
//!
//! let mut b = BodyBuilder::new();
//! let done = b.label();
//! b.emit_arg(OpCode::LdArg, 0);
//! b.emit_branch(OpCode::BrFalse, done);
//! b.emit_i4(1);
//! b.emit(OpCode::Pop);
//! b.mark(done);
//! b.emit(OpCode::Ret);
//! let body = b.build().unwrap();
//! assert_eq!(body.len(), 5);
//! ```

use super::{ExceptionHandler, HandlerKind, Instruction, MethodBody, OpCode, Operand};
use crate::{FieldId, InstrId, MethodId, ModelError, TypeRef};

/// A forward-declarable jump destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

struct PendingHandler {
    kind: HandlerKind,
    labels: [Label; 4],
}

/// Builds a [`MethodBody`] with forward jump patching.
#[derive(Default)]
pub struct BodyBuilder {
    instructions: Vec<Instruction>,
    locals: Vec<TypeRef>,
    /// Marked position of each label.
    marks: Vec<Option<usize>>,
    /// Instruction positions whose operand still names labels.
    pending: Vec<(usize, Vec<Label>)>,
    handlers: Vec<PendingHandler>,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a local and return its index.
    pub fn local(&mut self, ty: TypeRef) -> u16 {
        self.locals.push(ty);
        (self.locals.len() - 1) as u16
    }

    pub fn label(&mut self) -> Label {
        self.marks.push(None);
        Label(self.marks.len() as u32 - 1)
    }

    /// Bind `label` to the next emitted instruction.
    pub fn mark(&mut self, label: Label) {
        if let Some(slot) = self.marks.get_mut(label.0 as usize) {
            *slot = Some(self.instructions.len());
        }
    }

    /// Id the next emitted instruction will receive.
    pub fn next_id(&self) -> InstrId {
        InstrId::new(self.instructions.len() as u32)
    }

    pub fn emit_instr(&mut self, mut instr: Instruction) -> InstrId {
        let id = self.next_id();
        instr.id = id;
        self.instructions.push(instr);
        id
    }

    pub fn emit(&mut self, opcode: OpCode) -> InstrId {
        self.emit_instr(Instruction::op(opcode))
    }

    pub fn emit_field(&mut self, opcode: OpCode, field: FieldId) -> InstrId {
        self.emit_instr(Instruction::field(opcode, field))
    }

    pub fn emit_method(&mut self, opcode: OpCode, method: MethodId) -> InstrId {
        self.emit_instr(Instruction::method(opcode, method))
    }

    pub fn emit_arg(&mut self, opcode: OpCode, index: u16) -> InstrId {
        self.emit_instr(Instruction::arg(opcode, index))
    }

    pub fn emit_local(&mut self, opcode: OpCode, index: u16) -> InstrId {
        self.emit_instr(Instruction::local(opcode, index))
    }

    pub fn emit_type(&mut self, opcode: OpCode, ty: TypeRef) -> InstrId {
        self.emit_instr(Instruction::ty(opcode, ty))
    }

    pub fn emit_i4(&mut self, value: i32) -> InstrId {
        self.emit_instr(Instruction::int32(value))
    }

    pub fn emit_str(&mut self, value: &str) -> InstrId {
        self.emit_instr(Instruction::string(value))
    }

    /// Emit a branch whose target is patched at build time.
    pub fn emit_branch(&mut self, opcode: OpCode, label: Label) -> InstrId {
        self.pending.push((self.instructions.len(), vec![label]));
        self.emit_instr(Instruction::new(opcode, Operand::Target(Instruction::UNPLACED)))
    }

    pub fn emit_switch(&mut self, labels: &[Label]) -> InstrId {
        self.pending.push((self.instructions.len(), labels.to_vec()));
        self.emit_instr(Instruction::new(
            OpCode::Switch,
            Operand::Targets(vec![Instruction::UNPLACED; labels.len()]),
        ))
    }

    /// Register a protected region: `[try_start, try_end)` guarded by
    /// `[handler_start, handler_end)`.
    pub fn handler(
        &mut self,
        kind: HandlerKind,
        try_start: Label,
        try_end: Label,
        handler_start: Label,
        handler_end: Label,
    ) {
        self.handlers.push(PendingHandler {
            kind,
            labels: [try_start, try_end, handler_start, handler_end],
        });
    }

    fn resolve(&self, label: Label) -> Result<InstrId, ModelError> {
        match self.marks.get(label.0 as usize).copied().flatten() {
            Some(pos) if pos < self.instructions.len() => Ok(self.instructions[pos].id),
            _ => Err(ModelError::UnboundLabel { label: label.0 }),
        }
    }

    /// Patch every label reference and produce the body.
    pub fn build(mut self) -> Result<MethodBody, ModelError> {
        let pending = std::mem::take(&mut self.pending);
        for (pos, labels) in pending {
            let targets = labels
                .iter()
                .map(|l| self.resolve(*l))
                .collect::<Result<Vec<_>, _>>()?;
            let instr = &mut self.instructions[pos];
            instr.operand = match instr.operand {
                Operand::Targets(_) => Operand::Targets(targets),
                _ => Operand::Target(targets[0]),
            };
        }

        let mut handlers = Vec::with_capacity(self.handlers.len());
        for pending in &self.handlers {
            let [a, b, c, d] = pending.labels;
            handlers.push(ExceptionHandler {
                kind: pending.kind.clone(),
                try_start: self.resolve(a)?,
                try_end: self.resolve(b)?,
                handler_start: self.resolve(c)?,
                handler_end: self.resolve(d)?,
            });
        }

        Ok(MethodBody::from_parts(self.instructions, self.locals, handlers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_backward_labels() {
        let mut b = BodyBuilder::new();
        let top = b.label();
        let exit = b.label();
        b.mark(top);
        b.emit_arg(OpCode::LdArg, 0);
        b.emit_branch(OpCode::BrTrue, exit);
        b.emit_branch(OpCode::Br, top);
        b.mark(exit);
        b.emit(OpCode::Ret);
        let body = b.build().unwrap();
        assert_eq!(body.instructions()[1].jump_targets(), &[InstrId::new(3)]);
        assert_eq!(body.instructions()[2].jump_targets(), &[InstrId::new(0)]);
    }

    #[test]
    fn switch_targets() {
        let mut b = BodyBuilder::new();
        let a = b.label();
        let c = b.label();
        b.emit_arg(OpCode::LdArg, 0);
        b.emit_switch(&[a, c]);
        b.mark(a);
        b.emit(OpCode::Nop);
        b.mark(c);
        b.emit(OpCode::Ret);
        let body = b.build().unwrap();
        assert_eq!(
            body.instructions()[1].jump_targets(),
            &[InstrId::new(2), InstrId::new(3)]
        );
    }

    #[test]
    fn unmarked_label_fails() {
        let mut b = BodyBuilder::new();
        let nowhere = b.label();
        b.emit_branch(OpCode::Br, nowhere);
        assert!(matches!(b.build(), Err(ModelError::UnboundLabel { .. })));
    }

    #[test]
    fn label_past_end_fails() {
        let mut b = BodyBuilder::new();
        let end = b.label();
        b.emit_branch(OpCode::Br, end);
        b.mark(end);
        assert!(b.build().is_err());
    }

    #[test]
    fn handlers_resolve() {
        let mut b = BodyBuilder::new();
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
        let body = b.build().unwrap();
        let h = &body.handlers()[0];
        assert_eq!(h.try_start, InstrId::new(0));
        assert_eq!(h.handler_start, InstrId::new(2));
        assert_eq!(h.handler_end, InstrId::new(4));
    }
}
