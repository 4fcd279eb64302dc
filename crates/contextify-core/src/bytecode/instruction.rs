//! Instructions and their operands.

use std::fmt;

use super::OpCode;
use crate::{FieldId, InstrId, MethodId, TypeRef};

/// Inline operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Arg(u16),
    Local(u16),
    Field(FieldId),
    Method(MethodId),
    Type(TypeRef),
    Target(InstrId),
    Targets(Vec<InstrId>),
}

/// One instruction of a method body.
///
/// The `id` is assigned by the owning [`MethodBody`](super::MethodBody) and
/// stays stable across edits; instructions built with the constructors below
/// carry a placeholder id until they are inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub id: InstrId,
    pub opcode: OpCode,
    pub operand: Operand,
}

impl Instruction {
    /// Id carried by instructions that have not been placed in a body yet.
    pub const UNPLACED: InstrId = InstrId::new(u32::MAX);

    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Self {
            id: Self::UNPLACED,
            opcode,
            operand,
        }
    }

    pub fn op(opcode: OpCode) -> Self {
        Self::new(opcode, Operand::None)
    }

    pub fn field(opcode: OpCode, field: FieldId) -> Self {
        Self::new(opcode, Operand::Field(field))
    }

    pub fn method(opcode: OpCode, method: MethodId) -> Self {
        Self::new(opcode, Operand::Method(method))
    }

    pub fn arg(opcode: OpCode, index: u16) -> Self {
        Self::new(opcode, Operand::Arg(index))
    }

    pub fn local(opcode: OpCode, index: u16) -> Self {
        Self::new(opcode, Operand::Local(index))
    }

    pub fn ty(opcode: OpCode, ty: TypeRef) -> Self {
        Self::new(opcode, Operand::Type(ty))
    }

    pub fn int32(value: i32) -> Self {
        Self::new(OpCode::LdcI4, Operand::Int32(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(OpCode::LdStr, Operand::String(value.into()))
    }

    pub fn branch(opcode: OpCode, target: InstrId) -> Self {
        Self::new(opcode, Operand::Target(target))
    }

    pub fn field_operand(&self) -> Option<FieldId> {
        match self.operand {
            Operand::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn method_operand(&self) -> Option<MethodId> {
        match self.operand {
            Operand::Method(m) => Some(m),
            _ => None,
        }
    }

    pub fn arg_operand(&self) -> Option<u16> {
        match self.operand {
            Operand::Arg(a) => Some(a),
            _ => None,
        }
    }

    pub fn local_operand(&self) -> Option<u16> {
        match self.operand {
            Operand::Local(l) => Some(l),
            _ => None,
        }
    }

    pub fn type_operand(&self) -> Option<&TypeRef> {
        match &self.operand {
            Operand::Type(t) => Some(t),
            _ => None,
        }
    }

    /// Explicit jump targets of a branch or switch.
    pub fn jump_targets(&self) -> &[InstrId] {
        match &self.operand {
            Operand::Target(t) => std::slice::from_ref(t),
            Operand::Targets(ts) => ts,
            _ => &[],
        }
    }

    /// Rewrite every jump target equal to `from`.
    pub(crate) fn retarget(&mut self, from: InstrId, to: InstrId) {
        match &mut self.operand {
            Operand::Target(t) if *t == from => *t = to,
            Operand::Targets(ts) => {
                for t in ts.iter_mut().filter(|t| **t == from) {
                    *t = to;
                }
            }
            _ => {}
        }
    }

    /// Whether this instruction is `opcode` applied to `method`.
    pub fn is_method_op(&self, opcode: OpCode, method: MethodId) -> bool {
        self.opcode == opcode && self.method_operand() == Some(method)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Int32(v) => write!(f, "{v}"),
            Operand::Int64(v) => write!(f, "{v}"),
            Operand::Float64(v) => write!(f, "{v}"),
            Operand::String(s) => write!(f, "{s:?}"),
            Operand::Arg(a) => write!(f, "arg{a}"),
            Operand::Local(l) => write!(f, "loc{l}"),
            Operand::Field(id) => write!(f, "{id}"),
            Operand::Method(id) => write!(f, "{id}"),
            Operand::Type(t) => write!(f, "{t:?}"),
            Operand::Target(t) => write!(f, "{t}"),
            Operand::Targets(ts) => {
                let names: Vec<String> = ts.iter().map(ToString::to_string).collect();
                write!(f, "({})", names.join(", "))
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Operand::None => write!(f, "{}: {}", self.id, self.opcode.name()),
            _ => write!(f, "{}: {} {}", self.id, self.opcode.name(), self.operand),
        }
    }
}
