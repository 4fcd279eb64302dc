//! Display classes: compiler-generated holders of a lambda's captured
//! variables.
//!
//! A display class whose lambda bodies need context gains a field holding the
//! aggregate root. Every creation site stores the root right after the
//! `newobj`, and the lambda bodies are then rewritten in place against that
//! field. When the method creating the display class is moved onto a context
//! type, the display class moves with it.

use tracing::debug;

use contextify_core::{
    ContextifyError, FieldFlags, FieldId, InstrId, Instruction, MethodBody, MethodId, ModelError,
    OpCode, Program, TypeId, TypeRef,
};

use super::ClosureRewriter;
use crate::handle::HandleSource;

/// Name of the root field added to display classes.
pub const DISPLAY_ROOT_FIELD: &str = "<>4__context";

impl ClosureRewriter {
    /// Root field of a display class, if it already has one.
    pub fn display_root(&self, ty: TypeId) -> Option<FieldId> {
        self.display_roots.get(&ty).copied()
    }

    /// Add the root field to `ty`, returning it and whether it was created.
    pub(crate) fn ensure_display_root(
        &mut self,
        program: &mut Program,
        ty: TypeId,
    ) -> Result<(FieldId, bool), ModelError> {
        if let Some(field) = self.display_root(ty) {
            return Ok((field, false));
        }
        let field = program.add_field(
            ty,
            DISPLAY_ROOT_FIELD,
            TypeRef::Named(self.root),
            FieldFlags::COMPILER_GENERATED,
        )?;
        self.display_roots.insert(ty, field);
        debug!(display = %program.type_name(ty), "display class gains root field");
        Ok((field, true))
    }

    /// Root field to store after the `newobj` at `at`, when the created
    /// display class has one and the store is not there yet.
    pub(crate) fn pending_display_store(
        &self,
        program: &Program,
        body: &MethodBody,
        at: InstrId,
    ) -> Option<FieldId> {
        let instr = body.get(at)?;
        if instr.opcode != OpCode::NewObj {
            return None;
        }
        let ctor = program.method(instr.method_operand()?).ok()?;
        let field = self.display_root(ctor.owner)?;

        let next = body.next_of(at).and_then(|id| body.get(id));
        if next.is_some_and(|i| i.opcode == OpCode::Dup) {
            let position = body.position(at)?;
            let stored = (position + 2..position + 6)
                .filter_map(|p| body.at(p))
                .any(|i| i.opcode == OpCode::StFld && i.field_operand() == Some(field));
            if stored {
                return None;
            }
        }
        Some(field)
    }

    /// Emit `dup; <root>; stfld field` after the `newobj` at `at`.
    pub(crate) fn store_display_root(
        &self,
        program: &mut Program,
        method: MethodId,
        handle: HandleSource,
        at: InstrId,
        field: FieldId,
    ) -> Result<(), ContextifyError> {
        let mut seq = vec![Instruction::op(OpCode::Dup)];
        seq.extend(handle.load_root(program, method)?);
        seq.push(Instruction::field(OpCode::StFld, field));
        program.body_mut(method)?.insert_after(at, seq)?;
        Ok(())
    }

    /// Move display classes nested in `holder` and created by `method` onto
    /// `generated`, redirecting `method` to the copies.
    ///
    /// Returns the copied methods, which need visiting.
    pub(crate) fn relocate_display_classes(
        &mut self,
        program: &mut Program,
        method: MethodId,
        holder: TypeId,
        generated: TypeId,
    ) -> Result<Vec<MethodId>, ModelError> {
        let mut created: Vec<TypeId> = Vec::new();
        if let Some(body) = program.method(method)?.body.as_ref() {
            for instr in body.instructions() {
                if instr.opcode != OpCode::NewObj {
                    continue;
                }
                let Some(owner) = instr
                    .method_operand()
                    .and_then(|m| program.method(m).ok())
                    .map(|m| m.owner)
                else {
                    continue;
                };
                let def = program.type_def(owner)?;
                if def.is_display_class() && def.declaring == Some(holder) && !created.contains(&owner) {
                    created.push(owner);
                }
            }
        }

        let mut copied = Vec::new();
        for class in created {
            let key = (class, generated);
            if !self.relocated.contains_key(&key) {
                let clone = program.clone_type(class, Some(generated))?;
                if let (Some(root), Some(ty)) = (self.display_root(class), clone.ty) {
                    if let Some(new_root) = clone.fields.get(&root) {
                        self.display_roots.insert(ty, *new_root);
                    }
                }
                copied.extend(clone.methods.values().copied());
                debug!(
                    display = %program.type_name(class),
                    into = %program.type_name(generated),
                    "display class relocated"
                );
                self.relocated.insert(key, clone);
            }
            if let Some(clone) = self.relocated.get(&key) {
                program.remap_members(method, clone)?;
            }
        }
        Ok(copied)
    }
}
