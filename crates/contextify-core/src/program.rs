//! Program - arena storage for types, fields and methods.
//!
//! [`Program`] is the object model every pass reads and rewrites. Entities are
//! stored in three arenas indexed by [`TypeId`], [`FieldId`] and [`MethodId`];
//! name lookups go through [`SymbolHash`] maps.
//!
//! # Storage Model
//!
//! - **Arenas** never shrink. Retiring a member detaches it from its owner and
//!   flags it, but the slot stays so that stale operands still resolve to
//!   something printable.
//! - **Lookups**: `find_type` takes a fully qualified name (`Ns.Name`,
//!   `Outer/Inner`), `find_method` takes an identity string as rendered by
//!   [`Program::identity`] (`Ns.Owner::Name(int32,string)`).
//! - **Revision**: registrations, retirements and every mutable borrow of an
//!   entity advance a counter; together with the body revisions it gives a
//!   cheap "did anything change" check.
//!
//! # Example
//!
//! ```
//! use contextify_core::{BodyBuilder, MethodFlags, OpCode, Program, TypeFlags, TypeRef};
//!
//! let mut program = Program::new();
//! let util = program.add_type("Game", "Util", None, TypeFlags::STATIC).unwrap();
//! let helper = program
//!     .add_method(util, "Helper", vec![], TypeRef::Void, MethodFlags::STATIC)
//!     .unwrap();
//! let mut b = BodyBuilder::new();
//! b.emit(OpCode::Ret);
//! program.set_body(helper, b.build().unwrap()).unwrap();
//!
//! assert_eq!(program.identity(helper), "Game.Util::Helper()");
//! assert_eq!(program.find_method("Game.Util::Helper()"), Some(helper));
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rustc_hash::FxHashMap;

use crate::{
    AnalysisError, FieldDef, FieldFlags, FieldId, InstrId, Instruction, MethodBody, MethodDef,
    MethodFlags, MethodId, MethodShape, ModelError, OpCode, Operand, Param, PropertyDef,
    StackEffect, SymbolHash, TypeDef, TypeFlags, TypeId, TypeRef,
};

/// Result of cloning a type: the new type and old-to-new member maps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeClone {
    pub source: Option<TypeId>,
    pub ty: Option<TypeId>,
    pub fields: BTreeMap<FieldId, FieldId>,
    pub methods: BTreeMap<MethodId, MethodId>,
}

impl TypeClone {
    fn map_type(&self, ty: &TypeRef) -> TypeRef {
        match (ty, self.source, self.ty) {
            (TypeRef::Named(id), Some(src), Some(new)) if *id == src => TypeRef::Named(new),
            (TypeRef::ByRef(inner), ..) => TypeRef::by_ref(self.map_type(inner)),
            (TypeRef::Array(inner), ..) => TypeRef::array(self.map_type(inner)),
            _ => ty.clone(),
        }
    }
}

/// Arena storage for a whole program.
#[derive(Debug, Clone, Default)]
pub struct Program {
    types: Vec<TypeDef>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,

    types_by_hash: FxHashMap<SymbolHash, TypeId>,
    fields_by_hash: FxHashMap<SymbolHash, FieldId>,
    methods_by_hash: FxHashMap<SymbolHash, MethodId>,

    revision: u64,
}

impl Program {
    /// Create an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    // ==========================================================================
    // Registration
    // ==========================================================================

    /// Register a type. Nested types pass their enclosing type as `declaring`
    /// and an empty namespace.
    pub fn add_type(
        &mut self,
        namespace: &str,
        name: &str,
        declaring: Option<TypeId>,
        flags: TypeFlags,
    ) -> Result<TypeId, ModelError> {
        let full_name = match declaring {
            Some(outer) => format!("{}/{}", self.type_def(outer)?.full_name, name),
            None if namespace.is_empty() => name.to_string(),
            None => format!("{namespace}.{name}"),
        };
        let hash = SymbolHash::from_type(&full_name);
        if self.types_by_hash.contains_key(&hash) {
            return Err(ModelError::DuplicateType { name: full_name });
        }

        let id = TypeId::new(self.types.len() as u32);
        let namespace = if declaring.is_some() { String::new() } else { namespace.to_string() };
        self.types.push(TypeDef::new(
            id,
            namespace,
            name.to_string(),
            full_name,
            declaring,
            flags,
        ));
        self.types_by_hash.insert(hash, id);
        if let Some(outer) = declaring {
            self.types[outer.slot()].nested.push(id);
        }
        self.revision += 1;
        Ok(id)
    }

    pub fn set_base(&mut self, ty: TypeId, base: TypeRef) -> Result<(), ModelError> {
        self.type_def_mut(ty)?.base = Some(base);
        Ok(())
    }

    pub fn add_interface(&mut self, ty: TypeId, interface: TypeId) -> Result<(), ModelError> {
        self.type_def(interface)?;
        self.type_def_mut(ty)?.interfaces.push(interface);
        Ok(())
    }

    pub fn add_field(
        &mut self,
        owner: TypeId,
        name: &str,
        ty: TypeRef,
        flags: FieldFlags,
    ) -> Result<FieldId, ModelError> {
        let hash = SymbolHash::from_field(self.type_hash(owner)?, name);
        if self.fields_by_hash.contains_key(&hash) {
            return Err(ModelError::DuplicateField {
                identity: format!("{}::{}", self.type_def(owner)?.full_name, name),
            });
        }
        let id = FieldId::new(self.fields.len() as u32);
        self.fields.push(FieldDef {
            id,
            owner,
            name: name.to_string(),
            ty,
            flags,
        });
        self.fields_by_hash.insert(hash, id);
        self.types[owner.slot()].fields.push(id);
        self.revision += 1;
        Ok(id)
    }

    pub fn add_method(
        &mut self,
        owner: TypeId,
        name: &str,
        params: Vec<Param>,
        return_type: TypeRef,
        flags: MethodFlags,
    ) -> Result<MethodId, ModelError> {
        let hash = self.method_hash(owner, name, &params)?;
        if self.methods_by_hash.contains_key(&hash) {
            return Err(ModelError::DuplicateMethod {
                identity: self.format_identity(owner, name, &params),
            });
        }
        let id = MethodId::new(self.methods.len() as u32);
        self.methods.push(MethodDef {
            id,
            owner,
            name: name.to_string(),
            params,
            return_type,
            flags,
            overrides: Vec::new(),
            body: None,
        });
        self.methods_by_hash.insert(hash, id);
        self.types[owner.slot()].methods.push(id);
        self.revision += 1;
        Ok(id)
    }

    pub fn set_body(&mut self, method: MethodId, body: MethodBody) -> Result<(), ModelError> {
        self.method_mut(method)?.body = Some(body);
        Ok(())
    }

    pub fn add_property(&mut self, owner: TypeId, property: PropertyDef) -> Result<(), ModelError> {
        self.type_def_mut(owner)?.properties.push(property);
        Ok(())
    }

    // ==========================================================================
    // Accessors
    // ==========================================================================

    pub fn type_def(&self, id: TypeId) -> Result<&TypeDef, ModelError> {
        self.types.get(id.slot()).ok_or(ModelError::UnknownType { id })
    }

    pub fn type_def_mut(&mut self, id: TypeId) -> Result<&mut TypeDef, ModelError> {
        self.revision += 1;
        self.types.get_mut(id.slot()).ok_or(ModelError::UnknownType { id })
    }

    pub fn field(&self, id: FieldId) -> Result<&FieldDef, ModelError> {
        self.fields.get(id.slot()).ok_or(ModelError::UnknownField { id })
    }

    pub fn field_mut(&mut self, id: FieldId) -> Result<&mut FieldDef, ModelError> {
        self.revision += 1;
        self.fields.get_mut(id.slot()).ok_or(ModelError::UnknownField { id })
    }

    pub fn method(&self, id: MethodId) -> Result<&MethodDef, ModelError> {
        self.methods.get(id.slot()).ok_or(ModelError::UnknownMethod { id })
    }

    pub fn method_mut(&mut self, id: MethodId) -> Result<&mut MethodDef, ModelError> {
        self.revision += 1;
        self.methods.get_mut(id.slot()).ok_or(ModelError::UnknownMethod { id })
    }

    pub fn body(&self, id: MethodId) -> Result<&MethodBody, ModelError> {
        self.method(id)?
            .body
            .as_ref()
            .ok_or_else(|| ModelError::NoBody { method: self.identity(id) })
    }

    pub fn body_mut(&mut self, id: MethodId) -> Result<&mut MethodBody, ModelError> {
        let identity = self.identity(id);
        self.method_mut(id)?
            .body
            .as_mut()
            .ok_or(ModelError::NoBody { method: identity })
    }

    /// All types in registration order.
    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.iter()
    }

    /// All methods in registration order, retired ones included.
    pub fn methods(&self) -> impl Iterator<Item = &MethodDef> {
        self.methods.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    /// Live methods that carry a body, in id order.
    pub fn methods_with_bodies(&self) -> Vec<MethodId> {
        self.methods
            .iter()
            .filter(|m| m.body.is_some() && !m.is_retired())
            .map(|m| m.id)
            .collect()
    }

    /// Mutation counter including every body revision.
    pub fn revision(&self) -> u64 {
        self.revision
            + self
                .methods
                .iter()
                .filter_map(|m| m.body.as_ref())
                .map(MethodBody::revision)
                .sum::<u64>()
    }

    // ==========================================================================
    // Names and lookup
    // ==========================================================================

    fn type_hash(&self, id: TypeId) -> Result<SymbolHash, ModelError> {
        Ok(SymbolHash::from_type(&self.type_def(id)?.full_name))
    }

    fn method_hash(
        &self,
        owner: TypeId,
        name: &str,
        params: &[Param],
    ) -> Result<SymbolHash, ModelError> {
        let param_hashes: Vec<SymbolHash> = params
            .iter()
            .map(|p| SymbolHash::from_type(&self.type_ref_name(&p.ty)))
            .collect();
        Ok(SymbolHash::from_method(self.type_hash(owner)?, name, &param_hashes))
    }

    pub fn find_type(&self, full_name: &str) -> Option<TypeId> {
        self.types_by_hash.get(&SymbolHash::from_type(full_name)).copied()
    }

    pub fn find_field(&self, owner: TypeId, name: &str) -> Option<FieldId> {
        let hash = SymbolHash::from_field(self.type_hash(owner).ok()?, name);
        self.fields_by_hash.get(&hash).copied()
    }

    /// Look up a live method by identity, e.g. `Game.Util::Helper(int32)`.
    pub fn find_method(&self, identity: &str) -> Option<MethodId> {
        let (head, rest) = identity.split_once('(')?;
        let params = rest.strip_suffix(')')?;
        let (owner, name) = head.rsplit_once("::")?;
        let owner_hash = SymbolHash::from_type(owner);
        let param_hashes: Vec<SymbolHash> = if params.is_empty() {
            Vec::new()
        } else {
            params.split(',').map(|p| SymbolHash::from_type(p.trim())).collect()
        };
        let hash = SymbolHash::from_method(owner_hash, name, &param_hashes);
        self.methods_by_hash.get(&hash).copied()
    }

    /// Live methods of `owner` named `name`.
    pub fn find_methods(&self, owner: TypeId, name: &str) -> Vec<MethodId> {
        self.type_def(owner)
            .map(|t| {
                t.methods
                    .iter()
                    .copied()
                    .filter(|m| self.methods[m.slot()].name == name)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn type_name(&self, id: TypeId) -> &str {
        self.types
            .get(id.slot())
            .map(|t| t.full_name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn type_ref_name(&self, ty: &TypeRef) -> String {
        match ty {
            TypeRef::Named(id) => self.type_name(*id).to_string(),
            TypeRef::ByRef(inner) => format!("{}&", self.type_ref_name(inner)),
            TypeRef::Array(inner) => format!("{}[]", self.type_ref_name(inner)),
            other => other.builtin_name().unwrap_or("<unknown>").to_string(),
        }
    }

    fn format_identity(&self, owner: TypeId, name: &str, params: &[Param]) -> String {
        let params: Vec<String> = params.iter().map(|p| self.type_ref_name(&p.ty)).collect();
        format!("{}::{}({})", self.type_name(owner), name, params.join(","))
    }

    /// Fully qualified signature of a method.
    pub fn identity(&self, id: MethodId) -> String {
        match self.methods.get(id.slot()) {
            Some(m) => self.format_identity(m.owner, &m.name, &m.params),
            None => id.to_string(),
        }
    }

    /// `Owner::name` of a field.
    pub fn field_identity(&self, id: FieldId) -> String {
        match self.fields.get(id.slot()) {
            Some(f) => format!("{}::{}", self.type_name(f.owner), f.name),
            None => id.to_string(),
        }
    }

    // ==========================================================================
    // Type queries
    // ==========================================================================

    /// Whether values of `ty` are copied rather than referenced.
    pub fn is_value_type(&self, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Bool | TypeRef::Int32 | TypeRef::Int64 | TypeRef::Float64 | TypeRef::NativeInt => {
                true
            }
            TypeRef::Named(id) => self.type_def(*id).is_ok_and(TypeDef::is_value_type),
            _ => false,
        }
    }

    /// Type of `this` inside an instance method of `owner`.
    pub fn receiver_type(&self, owner: TypeId) -> TypeRef {
        let named = TypeRef::Named(owner);
        if self.is_value_type(&named) { TypeRef::by_ref(named) } else { named }
    }

    /// Whether `ty` is `ancestor` or derives from / implements it.
    pub fn is_assignable_to(&self, ty: TypeId, ancestor: TypeId) -> bool {
        let mut current = Some(ty);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            let Ok(def) = self.type_def(id) else { return false };
            if def.interfaces.iter().any(|i| self.is_assignable_to(*i, ancestor)) {
                return true;
            }
            current = def.base_type();
        }
        false
    }

    pub fn constructors(&self, ty: TypeId) -> Vec<MethodId> {
        self.type_def(ty)
            .map(|t| {
                t.methods
                    .iter()
                    .copied()
                    .filter(|m| self.methods[m.slot()].is_constructor())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_delegate_ctor(&self, method: MethodId) -> bool {
        self.method(method).is_ok_and(|m| {
            m.is_constructor() && self.type_def(m.owner).is_ok_and(TypeDef::is_delegate)
        })
    }

    /// The `Invoke` method of a delegate type.
    pub fn delegate_invoke(&self, ty: TypeId) -> Option<MethodId> {
        let def = self.type_def(ty).ok()?;
        if !def.is_delegate() {
            return None;
        }
        self.find_methods(ty, "Invoke").into_iter().next()
    }

    // ==========================================================================
    // Stack effects
    // ==========================================================================

    /// Static pop/push arity of `instr` inside `method`.
    pub fn stack_effect(
        &self,
        method: MethodId,
        instr: &Instruction,
    ) -> Result<StackEffect, AnalysisError> {
        if let Some(effect) = instr.opcode.fixed_effect() {
            return Ok(effect);
        }
        let unresolved = || AnalysisError::UnresolvedStackEffect {
            method: self.identity(method),
            instr: instr.id,
            opcode: instr.opcode.name(),
        };
        match instr.opcode {
            OpCode::Ret => {
                let enclosing = self.method(method)?;
                Ok(StackEffect::new(enclosing.returns_value() as usize, 0))
            }
            OpCode::Call | OpCode::CallVirt => {
                let target = instr
                    .method_operand()
                    .and_then(|m| self.method(m).ok())
                    .ok_or_else(unresolved)?;
                Ok(StackEffect::new(target.arg_count(), target.returns_value() as usize))
            }
            OpCode::NewObj => {
                let target = instr
                    .method_operand()
                    .and_then(|m| self.method(m).ok())
                    .filter(|m| m.is_constructor())
                    .ok_or_else(unresolved)?;
                Ok(StackEffect::new(target.params.len(), 1))
            }
            _ => Err(unresolved()),
        }
    }

    // ==========================================================================
    // Cloning and retirement
    // ==========================================================================

    /// Deep-copy `src` into `owner` under `name`, applying `shape`.
    ///
    /// Argument indexes in the copied body are shifted to make room for a new
    /// receiver and/or leading parameter. Overrides are copied verbatim.
    pub fn clone_method(
        &mut self,
        src: MethodId,
        owner: TypeId,
        name: &str,
        shape: MethodShape,
    ) -> Result<MethodId, ModelError> {
        let source = self.method(src)?.clone();
        let this_offset = source.this_offset();
        let make_instance = shape.make_instance && source.is_static();
        let leading = shape.leading_param.is_some();

        let mut flags = source.flags - MethodFlags::RETIRED;
        if make_instance {
            flags.remove(MethodFlags::STATIC);
        }
        let mut params = source.params.clone();
        if let Some(param) = shape.leading_param {
            params.insert(0, param);
        }

        let body = source.body.map(|mut body| {
            body.shift_arguments(this_offset, make_instance as u16 + leading as u16);
            body
        });

        let id = self.add_method(owner, name, params, source.return_type.clone(), flags)?;
        let clone = self.method_mut(id)?;
        clone.body = body;
        clone.overrides = source.overrides;
        Ok(id)
    }

    /// Clone a type with all its fields and methods under a new enclosing type.
    ///
    /// References to the source type's own members inside the cloned bodies
    /// are redirected to the copies.
    pub fn clone_type(
        &mut self,
        src: TypeId,
        declaring: Option<TypeId>,
    ) -> Result<TypeClone, ModelError> {
        let source = self.type_def(src)?.clone();
        let ty = self.add_type(&source.namespace, &source.name, declaring, source.flags)?;
        let mut map = TypeClone {
            source: Some(src),
            ty: Some(ty),
            ..TypeClone::default()
        };
        {
            let def = self.type_def_mut(ty)?;
            def.base = source.base.clone();
            def.interfaces = source.interfaces.clone();
        }

        for field in &source.fields {
            let def = self.field(*field)?.clone();
            if def.is_retired() {
                continue;
            }
            let new = self.add_field(ty, &def.name, map.map_type(&def.ty), def.flags)?;
            map.fields.insert(*field, new);
        }
        for method in &source.methods {
            let name = self.method(*method)?.name.clone();
            let new = self.clone_method(*method, ty, &name, MethodShape::unchanged())?;
            map.methods.insert(*method, new);
        }
        for method in map.methods.values().copied().collect::<Vec<_>>() {
            self.remap_members(method, &map)?;
        }
        for mut property in source.properties {
            for (from, to) in &map.methods {
                property.remap(*from, *to);
            }
            self.type_def_mut(ty)?.properties.push(property);
        }
        Ok(map)
    }

    /// Redirect field, method and type operands in `method` according to `map`.
    ///
    /// Returns whether anything changed.
    pub fn remap_members(&mut self, method: MethodId, map: &TypeClone) -> Result<bool, ModelError> {
        let Some(body) = self.method(method)?.body.as_ref() else {
            return Ok(false);
        };
        let mut edits: Vec<(InstrId, Operand)> = Vec::new();
        for instr in body.instructions() {
            let remapped = match &instr.operand {
                Operand::Field(f) => map.fields.get(f).map(|n| Operand::Field(*n)),
                Operand::Method(m) => map.methods.get(m).map(|n| Operand::Method(*n)),
                Operand::Type(t) => {
                    let mapped = map.map_type(t);
                    (mapped != *t).then_some(Operand::Type(mapped))
                }
                _ => None,
            };
            if let Some(operand) = remapped {
                edits.push((instr.id, operand));
            }
        }
        if edits.is_empty() {
            return Ok(false);
        }
        let body = self.body_mut(method)?;
        for (id, operand) in edits {
            body.set_operand(id, operand)?;
        }
        Ok(true)
    }

    /// Detach a method from its owner and flag it retired.
    pub fn retire_method(&mut self, id: MethodId) -> Result<(), ModelError> {
        let (owner, hash) = {
            let m = self.method(id)?;
            (m.owner, self.method_hash(m.owner, &m.name, &m.params)?)
        };
        if self.methods_by_hash.get(&hash) == Some(&id) {
            self.methods_by_hash.remove(&hash);
        }
        self.type_def_mut(owner)?.methods.retain(|m| *m != id);
        self.method_mut(id)?.flags.insert(MethodFlags::RETIRED);
        Ok(())
    }

    /// Detach a field from its owner and flag it retired.
    pub fn retire_field(&mut self, id: FieldId) -> Result<(), ModelError> {
        let (owner, hash) = {
            let f = self.field(id)?;
            (f.owner, SymbolHash::from_field(self.type_hash(f.owner)?, &f.name))
        };
        if self.fields_by_hash.get(&hash) == Some(&id) {
            self.fields_by_hash.remove(&hash);
        }
        self.type_def_mut(owner)?.fields.retain(|f| *f != id);
        self.field_mut(id)?.flags.insert(FieldFlags::RETIRED);
        Ok(())
    }

    // ==========================================================================
    // Disassembly
    // ==========================================================================

    fn operand_text(&self, operand: &Operand) -> String {
        match operand {
            Operand::Field(f) => self.field_identity(*f),
            Operand::Method(m) => self.identity(*m),
            Operand::Type(t) => self.type_ref_name(t),
            other => other.to_string(),
        }
    }

    /// Render a method body with symbolic operands, for debug logging.
    pub fn disassemble(&self, method: MethodId) -> String {
        let mut out = format!("{}\n", self.identity(method));
        let Ok(body) = self.body(method) else {
            out.push_str("  <no body>\n");
            return out;
        };
        for instr in body.instructions() {
            let operand = self.operand_text(&instr.operand);
            let _ = if operand.is_empty() {
                writeln!(out, "  {}: {}", instr.id, instr.opcode.name())
            } else {
                writeln!(out, "  {}: {} {}", instr.id, instr.opcode.name(), operand)
            };
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BodyBuilder;

    fn body(f: impl FnOnce(&mut BodyBuilder)) -> MethodBody {
        let mut b = BodyBuilder::new();
        f(&mut b);
        b.build().unwrap()
    }

    #[test]
    fn nested_type_names() {
        let mut p = Program::new();
        let outer = p.add_type("Game", "Outer", None, TypeFlags::empty()).unwrap();
        let inner = p.add_type("", "Inner", Some(outer), TypeFlags::empty()).unwrap();
        assert_eq!(p.type_name(inner), "Game.Outer/Inner");
        assert_eq!(p.find_type("Game.Outer/Inner"), Some(inner));
        assert_eq!(p.type_def(outer).unwrap().nested, vec![inner]);
    }

    #[test]
    fn duplicate_type_rejected() {
        let mut p = Program::new();
        p.add_type("Game", "H", None, TypeFlags::empty()).unwrap();
        assert!(matches!(
            p.add_type("Game", "H", None, TypeFlags::empty()),
            Err(ModelError::DuplicateType { .. })
        ));
    }

    #[test]
    fn find_method_by_identity() {
        let mut p = Program::new();
        let h = p.add_type("Game", "H", None, TypeFlags::empty()).unwrap();
        let m = p
            .add_method(
                h,
                "Set",
                vec![Param::new("a", TypeRef::Int32), Param::new("b", TypeRef::Named(h))],
                TypeRef::Void,
                MethodFlags::STATIC,
            )
            .unwrap();
        assert_eq!(p.identity(m), "Game.H::Set(int32,Game.H)");
        assert_eq!(p.find_method("Game.H::Set(int32,Game.H)"), Some(m));
        assert_eq!(p.find_method("Game.H::Set(int32)"), None);
    }

    #[test]
    fn stack_effect_of_calls() {
        let mut p = Program::new();
        let h = p.add_type("Game", "H", None, TypeFlags::empty()).unwrap();
        let inst = p
            .add_method(h, "Get", vec![Param::new("a", TypeRef::Int32)], TypeRef::Int32, MethodFlags::empty())
            .unwrap();
        let ctor = p
            .add_method(h, ".ctor", vec![Param::new("a", TypeRef::Int32)], TypeRef::Void, MethodFlags::CONSTRUCTOR)
            .unwrap();
        let call = Instruction::method(OpCode::CallVirt, inst);
        let newobj = Instruction::method(OpCode::NewObj, ctor);
        assert_eq!(p.stack_effect(inst, &call).unwrap(), StackEffect::new(2, 1));
        assert_eq!(p.stack_effect(inst, &newobj).unwrap(), StackEffect::new(1, 1));
        assert_eq!(
            p.stack_effect(inst, &Instruction::op(OpCode::Ret)).unwrap(),
            StackEffect::new(1, 0)
        );
    }

    #[test]
    fn unresolved_call_target() {
        let p = Program::new();
        let call = Instruction::method(OpCode::Call, MethodId::new(99));
        assert!(matches!(
            p.stack_effect(MethodId::new(0), &call),
            Err(AnalysisError::UnresolvedStackEffect { .. })
        ));
    }

    #[test]
    fn clone_static_to_instance_shifts_args() {
        let mut p = Program::new();
        let h = p.add_type("Game", "H", None, TypeFlags::STATIC).unwrap();
        let ctx = p.add_type("Game", "H_Ctx", None, TypeFlags::empty()).unwrap();
        let m = p
            .add_method(h, "Foo", vec![Param::new("a", TypeRef::Int32)], TypeRef::Int32, MethodFlags::STATIC)
            .unwrap();
        p.set_body(
            m,
            body(|b| {
                b.emit_arg(OpCode::LdArg, 0);
                b.emit(OpCode::Ret);
            }),
        )
        .unwrap();
        let clone = p.clone_method(m, ctx, "Foo", MethodShape::instance()).unwrap();
        let def = p.method(clone).unwrap();
        assert!(!def.is_static());
        assert_eq!(p.body(clone).unwrap().instructions()[0].arg_operand(), Some(1));
    }

    #[test]
    fn clone_instance_with_leading_param() {
        let mut p = Program::new();
        let root = p.add_type("Game", "Root", None, TypeFlags::empty()).unwrap();
        let t = p.add_type("Game", "T", None, TypeFlags::empty()).unwrap();
        let m = p
            .add_method(t, "Run", vec![Param::new("a", TypeRef::Int32)], TypeRef::Void, MethodFlags::VIRTUAL)
            .unwrap();
        p.set_body(
            m,
            body(|b| {
                b.emit_arg(OpCode::LdArg, 0);
                b.emit_arg(OpCode::LdArg, 1);
                b.emit(OpCode::Pop);
                b.emit(OpCode::Pop);
                b.emit(OpCode::Ret);
            }),
        )
        .unwrap();
        let shape = MethodShape::leading(Param::new("root", TypeRef::Named(root)));
        let clone = p.clone_method(m, t, "Run", shape).unwrap();
        let args: Vec<_> = p
            .body(clone)
            .unwrap()
            .instructions()
            .iter()
            .filter_map(Instruction::arg_operand)
            .collect();
        assert_eq!(args, vec![0, 2]);
        assert_eq!(p.identity(clone), "Game.T::Run(Game.Root,int32)");
    }

    #[test]
    fn retire_detaches_method() {
        let mut p = Program::new();
        let h = p.add_type("Game", "H", None, TypeFlags::empty()).unwrap();
        let m = p.add_method(h, "Foo", vec![], TypeRef::Void, MethodFlags::STATIC).unwrap();
        p.retire_method(m).unwrap();
        assert!(p.method(m).unwrap().is_retired());
        assert!(p.type_def(h).unwrap().methods.is_empty());
        assert_eq!(p.find_method("Game.H::Foo()"), None);
    }

    #[test]
    fn clone_type_remaps_members() {
        let mut p = Program::new();
        let outer = p.add_type("Game", "H", None, TypeFlags::empty()).unwrap();
        let dc = p
            .add_type("", "<>c__DisplayClass0_0", Some(outer), TypeFlags::DISPLAY_CLASS)
            .unwrap();
        let x = p.add_field(dc, "x", TypeRef::Int32, FieldFlags::empty()).unwrap();
        let m = p.add_method(dc, "<Run>b__0", vec![], TypeRef::Int32, MethodFlags::empty()).unwrap();
        p.set_body(
            m,
            body(|b| {
                b.emit_arg(OpCode::LdArg, 0);
                b.emit_field(OpCode::LdFld, x);
                b.emit(OpCode::Ret);
            }),
        )
        .unwrap();
        let ctx = p.add_type("Game", "H_Ctx", None, TypeFlags::empty()).unwrap();
        let clone = p.clone_type(dc, Some(ctx)).unwrap();
        let new_ty = clone.ty.unwrap();
        assert_eq!(p.type_name(new_ty), "Game.H_Ctx/<>c__DisplayClass0_0");
        let new_m = clone.methods[&m];
        let new_x = clone.fields[&x];
        assert_eq!(p.body(new_m).unwrap().instructions()[1].field_operand(), Some(new_x));
    }

    #[test]
    fn mutable_access_advances_revision() {
        let mut p = Program::new();
        let h = p.add_type("Game", "H", None, TypeFlags::empty()).unwrap();
        let before = p.revision();
        let _ = p.type_def(h).unwrap();
        assert_eq!(p.revision(), before);
        p.type_def_mut(h).unwrap().flags.insert(TypeFlags::SEALED);
        assert!(p.revision() > before);
    }

    #[test]
    fn disassembly_uses_names() {
        let mut p = Program::new();
        let h = p.add_type("Game", "H", None, TypeFlags::empty()).unwrap();
        let x = p.add_field(h, "x", TypeRef::Int32, FieldFlags::STATIC).unwrap();
        let m = p.add_method(h, "Foo", vec![], TypeRef::Int32, MethodFlags::STATIC).unwrap();
        p.set_body(
            m,
            body(|b| {
                b.emit_field(OpCode::LdSFld, x);
                b.emit(OpCode::Ret);
            }),
        )
        .unwrap();
        let text = p.disassemble(m);
        assert!(text.contains("ldsfld Game.H::x"));
    }
}
