//! Synthesized capture records and their forwarding trampolines.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use contextify_core::{
    FieldFlags, FieldId, Instruction, MethodBody, MethodFlags, MethodId, ModelError, OpCode, Param,
    Program, TypeFlags, TypeId, TypeRef,
};

/// Marker embedded in the names of synthesized records.
pub const RECORD_MARKER: &str = "c__ContextCapture";

/// Deterministic cache key: one record per originating method and receiver
/// type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub enclosing: MethodId,
    pub receiver: Option<TypeId>,
}

/// A value stored in a capture record, in constructor parameter order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturedValue {
    /// The callable's original target object.
    Receiver(TypeId),
    /// The aggregate root.
    ContextHandle,
}

/// A closure type carrying the context handle into a captured callable.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub key: RecordKey,
    pub ty: TypeId,
    pub constructor: MethodId,
    pub receiver_field: Option<FieldId>,
    pub root_field: FieldId,
    pub captured: Vec<CapturedValue>,
    /// Bound replacement -> forwarding instance method on the record.
    pub trampolines: BTreeMap<MethodId, MethodId>,
    /// Methods whose capture sites construct this record.
    pub rewritten: BTreeSet<MethodId>,
}

impl CaptureRecord {
    /// Declare the record type, its fields and its constructor.
    pub(crate) fn synthesize(program: &mut Program, root: TypeId, key: RecordKey) -> Result<Self, ModelError> {
        let (enclosing_name, owner) = {
            let def = program.method(key.enclosing)?;
            (def.name.clone(), def.owner)
        };
        let name = match key.receiver {
            None => format!("<{}>{}{}", enclosing_name, RECORD_MARKER, key.enclosing.index()),
            Some(receiver) => format!(
                "<{}>{}{}_{}",
                enclosing_name,
                RECORD_MARKER,
                key.enclosing.index(),
                program.type_def(receiver)?.name
            ),
        };
        let ty = program.add_type(
            "",
            &name,
            Some(owner),
            TypeFlags::COMPILER_GENERATED | TypeFlags::SEALED,
        )?;

        let mut params = Vec::new();
        let mut captured = Vec::new();
        let mut stored = Vec::new();
        let receiver_field = match key.receiver {
            Some(receiver) => {
                let field = program.add_field(ty, "receiver", TypeRef::Named(receiver), FieldFlags::INIT_ONLY)?;
                params.push(Param::new("receiver", TypeRef::Named(receiver)));
                captured.push(CapturedValue::Receiver(receiver));
                stored.push(field);
                Some(field)
            }
            None => None,
        };
        let root_field = program.add_field(ty, "context", TypeRef::Named(root), FieldFlags::INIT_ONLY)?;
        params.push(Param::new("context", TypeRef::Named(root)));
        captured.push(CapturedValue::ContextHandle);
        stored.push(root_field);

        let constructor = program.add_method(
            ty,
            ".ctor",
            params,
            TypeRef::Void,
            MethodFlags::CONSTRUCTOR | MethodFlags::SPECIAL_NAME | MethodFlags::COMPILER_GENERATED,
        )?;
        let mut code = Vec::with_capacity(stored.len() * 3 + 1);
        for (i, field) in stored.iter().enumerate() {
            code.push(Instruction::arg(OpCode::LdArg, 0));
            code.push(Instruction::arg(OpCode::LdArg, i as u16 + 1));
            code.push(Instruction::field(OpCode::StFld, *field));
        }
        code.push(Instruction::op(OpCode::Ret));
        program.set_body(constructor, fresh_body(code))?;

        debug!(record = %program.type_name(ty), "capture record synthesized");
        Ok(Self {
            key,
            ty,
            constructor,
            receiver_field,
            root_field,
            captured,
            trampolines: BTreeMap::new(),
            rewritten: BTreeSet::new(),
        })
    }

    /// Instance method forwarding the original arguments, plus the stored
    /// receiver and root, to `replacement`.
    pub(crate) fn trampoline(
        &mut self,
        program: &mut Program,
        original: MethodId,
        replacement: MethodId,
    ) -> Result<MethodId, ModelError> {
        if let Some(existing) = self.trampolines.get(&replacement) {
            return Ok(*existing);
        }
        let (name, params, return_type) = {
            let def = program.method(original)?;
            (
                format!("<{}>b__Forward{}", def.name, self.trampolines.len()),
                def.params.clone(),
                def.return_type.clone(),
            )
        };
        let target = program.method(replacement)?;
        let call = if target.is_virtual() { OpCode::CallVirt } else { OpCode::Call };
        let receiver_is_value = match self.captured.first() {
            Some(CapturedValue::Receiver(ty)) => program.is_value_type(&TypeRef::Named(*ty)),
            _ => false,
        };

        let mut code = Vec::new();
        if let Some(receiver) = self.receiver_field {
            code.push(Instruction::arg(OpCode::LdArg, 0));
            let load = if receiver_is_value { OpCode::LdFldA } else { OpCode::LdFld };
            code.push(Instruction::field(load, receiver));
        }
        code.push(Instruction::arg(OpCode::LdArg, 0));
        code.push(Instruction::field(OpCode::LdFld, self.root_field));
        for i in 0..params.len() {
            code.push(Instruction::arg(OpCode::LdArg, i as u16 + 1));
        }
        code.push(Instruction::method(call, replacement));
        code.push(Instruction::op(OpCode::Ret));

        let method = program.add_method(self.ty, &name, params, return_type, MethodFlags::COMPILER_GENERATED)?;
        program.set_body(method, fresh_body(code))?;
        self.trampolines.insert(replacement, method);
        Ok(method)
    }

    /// Whether `ty` is named like a synthesized record.
    pub fn is_record_name(name: &str) -> bool {
        name.starts_with('<') && name.contains(RECORD_MARKER)
    }
}

/// A new body holding `code`.
pub(crate) fn fresh_body(code: Vec<Instruction>) -> MethodBody {
    let mut body = MethodBody::default();
    body.push(code);
    body
}
