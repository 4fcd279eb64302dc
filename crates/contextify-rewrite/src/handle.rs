//! Context handles: how a method reaches the aggregate root and, through the
//! nested chain, any context instance.

use contextify_core::{BindingError, FieldId, Instruction, MethodId, OpCode, Program};

use crate::plan::{ContextId, ContextPlan};

/// Where a method finds its root handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSource {
    /// A parameter holding the root.
    Parameter(u16),
    /// `this` is the root itself.
    RootThis,
    /// `this` is a context instance; the root is reachable through
    /// `root_field` when the context has a back-reference.
    ContextThis {
        context: ContextId,
        root_field: Option<FieldId>,
    },
    /// `this` is a capture record or display class storing the root.
    CapturedRoot(FieldId),
}

/// What the loaded context instance is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainAccess {
    /// Plain value read of a field of the instance.
    Read,
    /// Address of a field, a store into the instance, or a call receiver.
    Address,
}

impl HandleSource {
    /// Instructions pushing the aggregate root.
    pub fn load_root(&self, program: &Program, method: MethodId) -> Result<Vec<Instruction>, BindingError> {
        Ok(match *self {
            HandleSource::Parameter(index) => vec![Instruction::arg(OpCode::LdArg, index)],
            HandleSource::RootThis => vec![Instruction::arg(OpCode::LdArg, 0)],
            HandleSource::ContextThis {
                root_field: Some(field),
                ..
            }
            | HandleSource::CapturedRoot(field) => vec![
                Instruction::arg(OpCode::LdArg, 0),
                Instruction::field(OpCode::LdFld, field),
            ],
            HandleSource::ContextThis { root_field: None, .. } => {
                return Err(BindingError::MissingHandle {
                    method: program.identity(method),
                });
            }
        })
    }

    /// Instructions pushing the instance of `context`.
    ///
    /// Starts from `this` when it already is the context or one of its
    /// ancestors, otherwise from the root, then follows the remaining chain
    /// links. Value-typed links are walked by address, which a plain read
    /// cannot do.
    pub fn load_context(
        &self,
        program: &Program,
        plan: &ContextPlan,
        method: MethodId,
        context: ContextId,
        access: ChainAccess,
    ) -> Result<Vec<Instruction>, BindingError> {
        let target = plan.context(context);
        let (mut seq, links) = match *self {
            HandleSource::ContextThis { context: current, .. }
                if target.chain.starts_with(&plan.context(current).chain) =>
            {
                let skip = plan.context(current).chain.len();
                (vec![Instruction::arg(OpCode::LdArg, 0)], &target.chain[skip..])
            }
            _ => (self.load_root(program, method)?, target.chain.as_slice()),
        };

        for &link in links {
            let def = program
                .field(link)
                .map_err(|_| BindingError::MissingHandle {
                    method: program.identity(method),
                })?;
            if program.is_value_type(&def.ty) {
                if access == ChainAccess::Read {
                    return Err(BindingError::ValueTypeIndirection {
                        method: program.identity(method),
                        field: program.field_identity(link),
                    });
                }
                seq.push(Instruction::field(OpCode::LdFldA, link));
            } else {
                seq.push(Instruction::field(OpCode::LdFld, link));
            }
        }
        Ok(seq)
    }
}
