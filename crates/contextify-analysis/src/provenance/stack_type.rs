//! Static type inference for stack slots.

use contextify_core::{AnalysisError, InstrId, OpCode, TypeRef};

use super::walker::Walker;
use super::{PathOrigin, ProvenancePath};

/// Type of a stack value across every path reaching a point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackType {
    /// Every path produces this type.
    Known(TypeRef),
    /// Every path produces the null constant.
    Null,
    /// Paths disagree, or a producer's type cannot be inferred.
    Divergent,
}

impl StackType {
    pub fn known(&self) -> Option<&TypeRef> {
        match self {
            StackType::Known(ty) => Some(ty),
            _ => None,
        }
    }

    fn merge(self, other: StackType) -> StackType {
        match (self, other) {
            (StackType::Null, StackType::Null) => StackType::Null,
            (StackType::Known(a), StackType::Known(b)) if a == b => StackType::Known(a),
            _ => StackType::Divergent,
        }
    }

    /// Merge the types of several paths; no paths means no common type.
    pub fn common(types: impl IntoIterator<Item = StackType>) -> StackType {
        let mut iter = types.into_iter();
        match iter.next() {
            Some(first) => iter.fold(first, StackType::merge),
            None => StackType::Divergent,
        }
    }
}

/// Recursion guard for types derived from an operand (dup, arithmetic).
const MAX_DERIVATION_DEPTH: usize = 32;

impl Walker<'_> {
    /// Common type of the value `depth` slots below the top before `at`.
    pub(super) fn value_type(&mut self, at: InstrId, depth: usize) -> Result<StackType, AnalysisError> {
        self.value_type_bounded(at, depth, 0)
    }

    fn value_type_bounded(
        &mut self,
        at: InstrId,
        depth: usize,
        level: usize,
    ) -> Result<StackType, AnalysisError> {
        if level > MAX_DERIVATION_DEPTH {
            return Ok(StackType::Divergent);
        }
        let paths = self.value_paths(at, depth)?;
        let mut types = Vec::with_capacity(paths.len());
        for path in &paths {
            types.push(self.path_type(path, level)?);
        }
        Ok(StackType::common(types))
    }

    /// Type of the first consumed operand of `producer`.
    fn input_type(&mut self, producer: InstrId, level: usize) -> Result<StackType, AnalysisError> {
        let pops = self.effect(producer)?.pops;
        if pops == 0 {
            return Ok(StackType::Divergent);
        }
        self.value_type_bounded(producer, pops - 1, level + 1)
    }

    fn path_type(&mut self, path: &ProvenancePath, level: usize) -> Result<StackType, AnalysisError> {
        if let PathOrigin::CatchEntry(entry) = path.origin {
            if path.instructions.is_empty() {
                return Ok(match self.index.handler_entry(entry).flatten() {
                    Some(ty) => StackType::Known(ty.clone()),
                    None => StackType::Divergent,
                });
            }
        }
        let Some(producer) = path.producer() else {
            return Ok(StackType::Divergent);
        };
        let instr = self.instr(producer)?;
        let program = self.program;
        let known = |ty: TypeRef| -> Result<StackType, AnalysisError> { Ok(StackType::Known(ty)) };

        match instr.opcode {
            OpCode::LdNull => Ok(StackType::Null),
            OpCode::LdcI4 | OpCode::ConvI4 | OpCode::Ceq | OpCode::Cgt | OpCode::Clt => {
                known(TypeRef::Int32)
            }
            OpCode::LdcI8 | OpCode::ConvI8 => known(TypeRef::Int64),
            OpCode::LdcR8 | OpCode::ConvR8 => known(TypeRef::Float64),
            OpCode::LdStr => known(TypeRef::String),
            OpCode::LdFtn | OpCode::LdVirtFtn | OpCode::LdLen => known(TypeRef::NativeInt),
            OpCode::Box => known(TypeRef::Object),
            OpCode::LdArg | OpCode::LdArgA => {
                let method = program.method(self.method)?;
                let receiver = program.receiver_type(method.owner);
                let ty = instr
                    .arg_operand()
                    .and_then(|a| method.arg_type(a, receiver));
                Ok(match ty {
                    Some(ty) if instr.opcode == OpCode::LdArgA => StackType::Known(TypeRef::by_ref(ty)),
                    Some(ty) => StackType::Known(ty),
                    None => StackType::Divergent,
                })
            }
            OpCode::LdLoc | OpCode::LdLocA => {
                let ty = instr
                    .local_operand()
                    .and_then(|l| self.body.locals().get(l as usize).cloned());
                Ok(match ty {
                    Some(ty) if instr.opcode == OpCode::LdLocA => StackType::Known(TypeRef::by_ref(ty)),
                    Some(ty) => StackType::Known(ty),
                    None => StackType::Divergent,
                })
            }
            OpCode::LdFld | OpCode::LdSFld | OpCode::LdFldA | OpCode::LdSFldA => {
                let Some(field) = instr.field_operand() else {
                    return Ok(StackType::Divergent);
                };
                let ty = program.field(field)?.ty.clone();
                if matches!(instr.opcode, OpCode::LdFldA | OpCode::LdSFldA) {
                    known(TypeRef::by_ref(ty))
                } else {
                    known(ty)
                }
            }
            OpCode::Call | OpCode::CallVirt => match instr.method_operand() {
                Some(target) => known(program.method(target)?.return_type.clone()),
                None => Ok(StackType::Divergent),
            },
            OpCode::NewObj => match instr.method_operand() {
                Some(ctor) => known(TypeRef::Named(program.method(ctor)?.owner)),
                None => Ok(StackType::Divergent),
            },
            OpCode::CastClass | OpCode::IsInst | OpCode::UnboxAny => match instr.type_operand() {
                Some(ty) => known(ty.clone()),
                None => Ok(StackType::Divergent),
            },
            OpCode::NewArr => match instr.type_operand() {
                Some(ty) => known(TypeRef::array(ty.clone())),
                None => Ok(StackType::Divergent),
            },
            OpCode::LdElem => Ok(match self.input_type(producer, level)? {
                StackType::Known(TypeRef::Array(element)) => StackType::Known(*element),
                _ => StackType::Divergent,
            }),
            OpCode::LdInd | OpCode::LdObj => Ok(match self.input_type(producer, level)? {
                StackType::Known(TypeRef::ByRef(inner)) => StackType::Known(*inner),
                _ => StackType::Divergent,
            }),
            OpCode::Dup
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Rem
            | OpCode::Neg
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Not
            | OpCode::Shl
            | OpCode::Shr => self.input_type(producer, level),
            _ => Ok(StackType::Divergent),
        }
    }
}
