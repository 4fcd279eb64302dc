//! Inserting a value beneath the operands an instruction already consumes.
//!
//! Call sites that gain a receiver or a leading handle argument, and static
//! stores that become instance stores, all need one extra value placed under
//! operands that are already on the stack. When the operand has a single exact
//! provenance path the value is inserted ahead of that path. Otherwise the
//! operands from the slot upward are spilled to fresh locals, the value is
//! pushed, and the operands are reloaded.

use tracing::trace;

use contextify_analysis::{StackAnalyzer, StackType};
use contextify_core::{ContextifyError, InstrId, Instruction, MethodId, ModelError, OpCode, Program, TypeRef};

/// Where an inserted value was placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Inserted ahead of an instruction without disturbing the stack.
    Before(InstrId),
    /// Operands were spilled into this many new locals around the value.
    Spilled { locals: usize },
}

/// Insert `seq`, which pushes one value, so that the value sits directly
/// beneath operand `slot` of `at` (slot 0 is the deepest operand). A `slot`
/// equal to the operand count places the value on top.
pub fn insert_below(
    program: &mut Program,
    analyzer: &mut StackAnalyzer,
    method: MethodId,
    at: InstrId,
    slot: usize,
    seq: Vec<Instruction>,
) -> Result<Placement, ContextifyError> {
    let pops = {
        let instr = program
            .body(method)?
            .get(at)
            .ok_or(ModelError::UnknownInstruction { instr: at })?;
        program.stack_effect(method, instr)?.pops
    };

    if slot >= pops {
        program.body_mut(method)?.insert_before(at, seq)?;
        trace!(%method, %at, "inserted on top of operands");
        return Ok(Placement::Before(at));
    }

    let paths = analyzer.operand(program, method, at, slot)?;
    if let [path] = paths.as_slice() {
        if let (true, Some(start)) = (path.is_insertable(), path.start()) {
            program.body_mut(method)?.insert_before(start, seq)?;
            trace!(%method, %at, slot, %start, "inserted below operand");
            return Ok(Placement::Before(start));
        }
    }

    let mut types = Vec::with_capacity(pops - slot);
    for s in slot..pops {
        let ty = match analyzer.operand_type(program, method, at, s)? {
            StackType::Known(ty) => ty,
            StackType::Null | StackType::Divergent => TypeRef::Object,
        };
        types.push(ty);
    }

    let body = program.body_mut(method)?;
    let locals: Vec<u16> = types.into_iter().map(|ty| body.add_local(ty)).collect();
    let mut spill: Vec<Instruction> = locals
        .iter()
        .rev()
        .map(|l| Instruction::local(OpCode::StLoc, *l))
        .collect();
    spill.extend(seq);
    spill.extend(locals.iter().map(|l| Instruction::local(OpCode::LdLoc, *l)));
    body.insert_before(at, spill)?;
    trace!(%method, %at, slot, locals = locals.len(), "spilled operands");
    Ok(Placement::Spilled {
        locals: locals.len(),
    })
}
