//! Method bodies and their edit API.
//!
//! A [`MethodBody`] is an ordered instruction list with stable ids, a local
//! variable table and exception handler regions. All edits go through the
//! methods below so that jump targets and handler boundaries stay consistent
//! and the body `revision` advances; analysis caches compare revisions to
//! detect stale results.
//!
//! ## Retargeting rules
//!
//! - `insert_before(x, ..)`: anything that referred to `x` (jump targets and
//!   handler boundaries) now refers to the first inserted instruction, so the
//!   new code runs on every path that used to reach `x`.
//! - `remove(x)`: anything that referred to `x` now refers to its successor.
//! - `insert_after`, `replace` and `replace_with` never retarget.

use std::fmt;

use super::{Instruction, OpCode, Operand};
use crate::{InstrId, ModelError, TypeRef};

/// Kind of an exception handler region.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerKind {
    /// Catch clause; the handler entry starts with the exception on the stack.
    Catch(TypeRef),
    Finally,
}

/// A protected region and its handler. Ends are exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    pub kind: HandlerKind,
    pub try_start: InstrId,
    pub try_end: InstrId,
    pub handler_start: InstrId,
    pub handler_end: InstrId,
}

impl ExceptionHandler {
    fn retarget(&mut self, from: InstrId, to: InstrId) {
        for slot in [
            &mut self.try_start,
            &mut self.try_end,
            &mut self.handler_start,
            &mut self.handler_end,
        ] {
            if *slot == from {
                *slot = to;
            }
        }
    }

    fn mentions(&self, id: InstrId) -> bool {
        self.try_start == id || self.try_end == id || self.handler_start == id || self.handler_end == id
    }
}

/// A method body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodBody {
    instructions: Vec<Instruction>,
    locals: Vec<TypeRef>,
    handlers: Vec<ExceptionHandler>,
    next_id: u32,
    revision: u64,
}

impl MethodBody {
    /// Create a body from already-numbered parts.
    ///
    /// Ids must be unique; the next fresh id continues after the largest one.
    pub fn from_parts(
        instructions: Vec<Instruction>,
        locals: Vec<TypeRef>,
        handlers: Vec<ExceptionHandler>,
    ) -> Self {
        let next_id = instructions
            .iter()
            .map(|i| i.id.index() + 1)
            .max()
            .unwrap_or(0);
        Self {
            instructions,
            locals,
            handlers,
            next_id,
            revision: 0,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn locals(&self) -> &[TypeRef] {
        &self.locals
    }

    pub fn handlers(&self) -> &[ExceptionHandler] {
        &self.handlers
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Edit counter; advances on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn position(&self, id: InstrId) -> Option<usize> {
        self.instructions.iter().position(|i| i.id == id)
    }

    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.iter().find(|i| i.id == id)
    }

    pub fn at(&self, position: usize) -> Option<&Instruction> {
        self.instructions.get(position)
    }

    /// Id of the instruction following `id` in layout order.
    pub fn next_of(&self, id: InstrId) -> Option<InstrId> {
        let pos = self.position(id)?;
        self.instructions.get(pos + 1).map(|i| i.id)
    }

    /// Id of the instruction preceding `id` in layout order.
    pub fn prev_of(&self, id: InstrId) -> Option<InstrId> {
        let pos = self.position(id)?;
        pos.checked_sub(1).map(|p| self.instructions[p].id)
    }

    fn require(&self, id: InstrId) -> Result<usize, ModelError> {
        self.position(id)
            .ok_or(ModelError::UnknownInstruction { instr: id })
    }

    fn fresh_id(&mut self) -> InstrId {
        let id = InstrId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn place(&mut self, seq: Vec<Instruction>) -> Vec<Instruction> {
        seq.into_iter()
            .map(|mut instr| {
                instr.id = self.fresh_id();
                instr
            })
            .collect()
    }

    fn retarget_all(&mut self, from: InstrId, to: InstrId) {
        for instr in &mut self.instructions {
            instr.retarget(from, to);
        }
        for handler in &mut self.handlers {
            handler.retarget(from, to);
        }
    }

    fn is_referenced(&self, id: InstrId) -> bool {
        self.instructions.iter().any(|i| i.jump_targets().contains(&id))
            || self.handlers.iter().any(|h| h.mentions(id))
    }

    /// Insert `seq` ahead of `anchor`, retargeting references to `anchor`.
    pub fn insert_before(
        &mut self,
        anchor: InstrId,
        seq: Vec<Instruction>,
    ) -> Result<Vec<InstrId>, ModelError> {
        let pos = self.require(anchor)?;
        if seq.is_empty() {
            return Ok(Vec::new());
        }
        let placed = self.place(seq);
        let ids: Vec<InstrId> = placed.iter().map(|i| i.id).collect();
        self.retarget_all(anchor, ids[0]);
        self.instructions.splice(pos..pos, placed);
        self.revision += 1;
        Ok(ids)
    }

    /// Insert `seq` right after `anchor`.
    pub fn insert_after(
        &mut self,
        anchor: InstrId,
        seq: Vec<Instruction>,
    ) -> Result<Vec<InstrId>, ModelError> {
        let pos = self.require(anchor)? + 1;
        let placed = self.place(seq);
        let ids = placed.iter().map(|i| i.id).collect();
        self.instructions.splice(pos..pos, placed);
        self.revision += 1;
        Ok(ids)
    }

    /// Append `seq` at the end of the body.
    pub fn push(&mut self, seq: Vec<Instruction>) -> Vec<InstrId> {
        let placed = self.place(seq);
        let ids = placed.iter().map(|i| i.id).collect();
        self.instructions.extend(placed);
        self.revision += 1;
        ids
    }

    /// Replace the opcode and operand of `id`, keeping its id.
    pub fn replace(&mut self, id: InstrId, instr: Instruction) -> Result<(), ModelError> {
        let pos = self.require(id)?;
        self.instructions[pos] = Instruction { id, ..instr };
        self.revision += 1;
        Ok(())
    }

    /// Replace `id` with a sequence; the first element keeps the id.
    pub fn replace_with(
        &mut self,
        id: InstrId,
        seq: Vec<Instruction>,
    ) -> Result<Vec<InstrId>, ModelError> {
        let pos = self.require(id)?;
        let mut seq = seq.into_iter();
        let Some(first) = seq.next() else {
            self.remove(id)?;
            return Ok(Vec::new());
        };
        self.instructions[pos] = Instruction { id, ..first };
        let rest = self.place(seq.collect());
        let mut ids = vec![id];
        ids.extend(rest.iter().map(|i| i.id));
        self.instructions.splice(pos + 1..pos + 1, rest);
        self.revision += 1;
        Ok(ids)
    }

    /// Remove `id`, moving references to its successor.
    pub fn remove(&mut self, id: InstrId) -> Result<Instruction, ModelError> {
        let pos = self.require(id)?;
        match self.instructions.get(pos + 1).map(|i| i.id) {
            Some(next) => self.retarget_all(id, next),
            None if self.is_referenced(id) => {
                return Err(ModelError::InvalidOperand {
                    instr: id,
                    detail: "last instruction is still a jump target".into(),
                });
            }
            None => {}
        }
        let removed = self.instructions.remove(pos);
        self.revision += 1;
        Ok(removed)
    }

    pub fn set_operand(&mut self, id: InstrId, operand: Operand) -> Result<(), ModelError> {
        let pos = self.require(id)?;
        self.instructions[pos].operand = operand;
        self.revision += 1;
        Ok(())
    }

    /// Declare a new local and return its index.
    pub fn add_local(&mut self, ty: TypeRef) -> u16 {
        self.locals.push(ty);
        self.revision += 1;
        (self.locals.len() - 1) as u16
    }

    /// Add `by` to every argument index at or above `from`.
    pub fn shift_arguments(&mut self, from: u16, by: u16) {
        if by == 0 {
            return;
        }
        for instr in &mut self.instructions {
            if instr.opcode.is_arg_access() {
                if let Operand::Arg(index) = &mut instr.operand {
                    if *index >= from {
                        *index += by;
                    }
                }
            }
        }
        self.revision += 1;
    }

    pub fn add_handler(&mut self, handler: ExceptionHandler) {
        self.handlers.push(handler);
        self.revision += 1;
    }

    /// Ids of every `ret` in the body.
    pub fn returns(&self) -> Vec<InstrId> {
        self.instructions
            .iter()
            .filter(|i| i.opcode == OpCode::Ret)
            .map(|i| i.id)
            .collect()
    }

    /// Opcode sequence, for assertions.
    pub fn opcodes(&self) -> Vec<OpCode> {
        self.instructions.iter().map(|i| i.opcode).collect()
    }

    /// Check that the body contains exactly the given opcode sequence.
    #[track_caller]
    pub fn assert_opcodes(&self, expected: &[OpCode]) {
        let actual = self.opcodes();
        assert_eq!(
            actual,
            expected,
            "Bytecode mismatch.\nExpected: {:?}\nActual:   {:?}",
            expected.iter().map(|op| op.name()).collect::<Vec<_>>(),
            actual.iter().map(|op| op.name()).collect::<Vec<_>>(),
        );
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.instructions {
            writeln!(f, "  {instr}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldId;

    fn numbered(ops: Vec<Instruction>) -> MethodBody {
        let instructions = ops
            .into_iter()
            .enumerate()
            .map(|(i, mut instr)| {
                instr.id = InstrId::new(i as u32);
                instr
            })
            .collect();
        MethodBody::from_parts(instructions, Vec::new(), Vec::new())
    }

    #[test]
    fn insert_before_retargets_jumps() {
        // 0: br 2 ; 1: nop ; 2: ret
        let mut body = numbered(vec![
            Instruction::branch(OpCode::Br, InstrId::new(2)),
            Instruction::op(OpCode::Nop),
            Instruction::op(OpCode::Ret),
        ]);
        let ids = body
            .insert_before(InstrId::new(2), vec![Instruction::op(OpCode::Nop)])
            .unwrap();
        assert_eq!(ids, vec![InstrId::new(3)]);
        assert_eq!(body.instructions()[0].jump_targets(), &[InstrId::new(3)]);
        body.assert_opcodes(&[OpCode::Br, OpCode::Nop, OpCode::Nop, OpCode::Ret]);
    }

    #[test]
    fn insert_after_does_not_retarget() {
        let mut body = numbered(vec![
            Instruction::branch(OpCode::Br, InstrId::new(1)),
            Instruction::op(OpCode::Ret),
        ]);
        body.insert_after(InstrId::new(0), vec![Instruction::op(OpCode::Nop)])
            .unwrap();
        assert_eq!(body.instructions()[0].jump_targets(), &[InstrId::new(1)]);
    }

    #[test]
    fn insert_before_moves_handler_start() {
        let mut body = numbered(vec![
            Instruction::op(OpCode::Nop),
            Instruction::branch(OpCode::Leave, InstrId::new(4)),
            Instruction::op(OpCode::Pop),
            Instruction::branch(OpCode::Leave, InstrId::new(4)),
            Instruction::op(OpCode::Ret),
        ]);
        body.add_handler(ExceptionHandler {
            kind: HandlerKind::Catch(TypeRef::Object),
            try_start: InstrId::new(0),
            try_end: InstrId::new(2),
            handler_start: InstrId::new(2),
            handler_end: InstrId::new(4),
        });
        let ids = body
            .insert_before(InstrId::new(0), vec![Instruction::op(OpCode::Nop)])
            .unwrap();
        assert_eq!(body.handlers()[0].try_start, ids[0]);
    }

    #[test]
    fn remove_moves_targets_to_successor() {
        let mut body = numbered(vec![
            Instruction::branch(OpCode::Br, InstrId::new(1)),
            Instruction::op(OpCode::Nop),
            Instruction::op(OpCode::Ret),
        ]);
        body.remove(InstrId::new(1)).unwrap();
        assert_eq!(body.instructions()[0].jump_targets(), &[InstrId::new(2)]);
    }

    #[test]
    fn remove_referenced_tail_fails() {
        let mut body = numbered(vec![
            Instruction::branch(OpCode::Br, InstrId::new(1)),
            Instruction::op(OpCode::Ret),
        ]);
        assert!(body.remove(InstrId::new(1)).is_err());
    }

    #[test]
    fn replace_with_keeps_first_id() {
        let mut body = numbered(vec![
            Instruction::field(OpCode::LdSFld, FieldId::new(0)),
            Instruction::op(OpCode::Ret),
        ]);
        let ids = body
            .replace_with(
                InstrId::new(0),
                vec![
                    Instruction::arg(OpCode::LdArg, 0),
                    Instruction::field(OpCode::LdFld, FieldId::new(0)),
                ],
            )
            .unwrap();
        assert_eq!(ids[0], InstrId::new(0));
        body.assert_opcodes(&[OpCode::LdArg, OpCode::LdFld, OpCode::Ret]);
    }

    #[test]
    fn edits_bump_revision() {
        let mut body = numbered(vec![Instruction::op(OpCode::Ret)]);
        let before = body.revision();
        body.add_local(TypeRef::Int32);
        body.shift_arguments(0, 1);
        assert_eq!(body.revision(), before + 2);
    }

    #[test]
    fn shift_arguments_from_index() {
        let mut body = numbered(vec![
            Instruction::arg(OpCode::LdArg, 0),
            Instruction::arg(OpCode::LdArg, 1),
            Instruction::arg(OpCode::StArg, 2),
            Instruction::op(OpCode::Ret),
        ]);
        body.shift_arguments(1, 1);
        let args: Vec<_> = body
            .instructions()
            .iter()
            .filter_map(Instruction::arg_operand)
            .collect();
        assert_eq!(args, vec![0, 2, 3]);
    }
}
