//! Context plan: which holder types become context instances.
//!
//! The plan is produced by an external discovery pass and handed to the
//! binder together with a [`Program`] in which the generated context types,
//! their constructors and their instance fields are already declared. The
//! propagator and resolver only read it, apart from init-unit replacement.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;

use contextify_core::{FieldId, MethodId, PlanError, Program, TypeId};

/// Index of a context inside its [`ContextPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

impl ContextId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx_{}", self.0)
    }
}

/// One holder type converted to an instance type.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextDescriptor {
    /// Display name used in reports and cycle errors.
    pub name: String,
    /// Original type whose static state moves into the context.
    pub holder: TypeId,
    /// Generated instance type.
    pub generated: TypeId,
    /// Constructor of the generated type.
    pub constructor: MethodId,
    /// Field path from the aggregate root to the instance; the last link is
    /// the slot the instance is stored in.
    pub chain: Vec<FieldId>,
    /// Field on the generated type holding the aggregate root.
    pub root_field: Option<FieldId>,
    /// For a reused singleton, the static field holding the ambient instance.
    pub singleton: Option<FieldId>,
    pub parent: Option<ContextId>,
    /// Original static field -> instance field on the generated type.
    pub moved_fields: BTreeMap<FieldId, FieldId>,
    /// Pre-existing instance fields standing in for original statics.
    pub replacement_fields: BTreeMap<FieldId, FieldId>,
    /// Pre-existing methods standing in for original static methods.
    pub replacement_methods: BTreeMap<MethodId, MethodId>,
    /// Static-initialization units split out of the holder's initializer.
    pub init_units: Vec<MethodId>,
}

impl ContextDescriptor {
    pub fn new(
        name: impl Into<String>,
        holder: TypeId,
        generated: TypeId,
        constructor: MethodId,
    ) -> Self {
        Self {
            name: name.into(),
            holder,
            generated,
            constructor,
            chain: Vec::new(),
            root_field: None,
            singleton: None,
            parent: None,
            moved_fields: BTreeMap::new(),
            replacement_fields: BTreeMap::new(),
            replacement_methods: BTreeMap::new(),
            init_units: Vec::new(),
        }
    }

    pub fn with_chain(mut self, chain: Vec<FieldId>) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_root_field(mut self, field: FieldId) -> Self {
        self.root_field = Some(field);
        self
    }

    pub fn with_parent(mut self, parent: ContextId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn reused_singleton(mut self, instance: FieldId) -> Self {
        self.singleton = Some(instance);
        self
    }

    pub fn move_field(mut self, original: FieldId, instance: FieldId) -> Self {
        self.moved_fields.insert(original, instance);
        self
    }

    pub fn replace_field(mut self, original: FieldId, replacement: FieldId) -> Self {
        self.replacement_fields.insert(original, replacement);
        self
    }

    pub fn replace_method(mut self, original: MethodId, replacement: MethodId) -> Self {
        self.replacement_methods.insert(original, replacement);
        self
    }

    pub fn with_init_unit(mut self, unit: MethodId) -> Self {
        self.init_units.push(unit);
        self
    }

    pub fn is_reused_singleton(&self) -> bool {
        self.singleton.is_some()
    }

    /// Field of the enclosing object the instance is stored in.
    pub fn slot(&self) -> Option<FieldId> {
        self.chain.last().copied()
    }

    /// Instance field replacing the original static `field`.
    pub fn instance_field(&self, field: FieldId) -> Option<FieldId> {
        self.moved_fields
            .get(&field)
            .or_else(|| self.replacement_fields.get(&field))
            .copied()
    }
}

/// The root type plus every context descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextPlan {
    /// Aggregate root type owning the context tree.
    pub root: TypeId,
    /// Constructor of the root, populated with instantiation steps.
    pub root_constructor: MethodId,
    contexts: Vec<ContextDescriptor>,

    by_holder: FxHashMap<TypeId, ContextId>,
    by_generated: FxHashMap<TypeId, ContextId>,
    by_field: FxHashMap<FieldId, (ContextId, FieldId)>,
    by_singleton: FxHashMap<FieldId, ContextId>,
}

impl ContextPlan {
    pub fn new(root: TypeId, root_constructor: MethodId) -> Self {
        Self {
            root,
            root_constructor,
            contexts: Vec::new(),
            by_holder: FxHashMap::default(),
            by_generated: FxHashMap::default(),
            by_field: FxHashMap::default(),
            by_singleton: FxHashMap::default(),
        }
    }

    pub fn add_context(&mut self, descriptor: ContextDescriptor) -> ContextId {
        let id = ContextId(self.contexts.len() as u32);
        self.by_holder.entry(descriptor.holder).or_insert(id);
        self.by_generated.entry(descriptor.generated).or_insert(id);
        for (original, instance) in descriptor
            .moved_fields
            .iter()
            .chain(&descriptor.replacement_fields)
        {
            self.by_field.insert(*original, (id, *instance));
        }
        if let Some(instance) = descriptor.singleton {
            self.by_singleton.insert(instance, id);
        }
        self.contexts.push(descriptor);
        id
    }

    pub fn context(&self, id: ContextId) -> &ContextDescriptor {
        &self.contexts[id.index()]
    }

    pub fn get(&self, id: ContextId) -> Option<&ContextDescriptor> {
        self.contexts.get(id.index())
    }

    /// Contexts in id order.
    pub fn contexts(&self) -> impl Iterator<Item = (ContextId, &ContextDescriptor)> {
        self.contexts
            .iter()
            .enumerate()
            .map(|(i, c)| (ContextId(i as u32), c))
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn by_holder(&self, holder: TypeId) -> Option<ContextId> {
        self.by_holder.get(&holder).copied()
    }

    pub fn by_generated(&self, generated: TypeId) -> Option<ContextId> {
        self.by_generated.get(&generated).copied()
    }

    /// Context and instance field for an original static field.
    pub fn moved_field(&self, original: FieldId) -> Option<(ContextId, FieldId)> {
        self.by_field.get(&original).copied()
    }

    /// Context whose ambient instance lives in the static `field`.
    pub fn singleton_of(&self, field: FieldId) -> Option<ContextId> {
        self.by_singleton.get(&field).copied()
    }

    /// Whether `ty` is the root or a generated context type.
    pub fn is_context_type(&self, ty: TypeId) -> bool {
        ty == self.root || self.by_generated.contains_key(&ty)
    }

    /// Replace init unit `original` of `context` with `replacement`.
    pub(crate) fn replace_init_unit(
        &mut self,
        context: ContextId,
        original: MethodId,
        replacement: MethodId,
    ) {
        if let Some(descriptor) = self.contexts.get_mut(context.index()) {
            for unit in &mut descriptor.init_units {
                if *unit == original {
                    *unit = replacement;
                }
            }
        }
    }

    // ==========================================================================
    // Validation
    // ==========================================================================

    /// Check that every descriptor is consistent with `program`.
    pub fn validate(&self, program: &Program) -> Result<(), PlanError> {
        let mut holders: FxHashMap<TypeId, ContextId> = FxHashMap::default();
        for (id, context) in self.contexts() {
            if holders.insert(context.holder, id).is_some() {
                return Err(PlanError::DuplicateHolder {
                    holder: program.type_name(context.holder).to_string(),
                });
            }
            if program.method(context.constructor)?.owner != context.generated {
                return Err(PlanError::ForeignConstructor {
                    context: context.name.clone(),
                });
            }
            if let Some(parent) = context.parent {
                if parent == id || self.get(parent).is_none() {
                    return Err(PlanError::UnknownParent {
                        context: context.name.clone(),
                    });
                }
            }
            self.validate_chain(program, context)?;
            self.validate_fields(program, context)?;
        }
        Ok(())
    }

    fn validate_chain(&self, program: &Program, context: &ContextDescriptor) -> Result<(), PlanError> {
        let Some(first) = context.chain.first() else {
            return Err(PlanError::ChainStartsOffRoot {
                context: context.name.clone(),
            });
        };
        if program.field(*first)?.owner != self.root {
            return Err(PlanError::ChainStartsOffRoot {
                context: context.name.clone(),
            });
        }

        let mismatch = |link: FieldId, expected: TypeId| PlanError::ChainLinkMismatch {
            context: context.name.clone(),
            link: program.field_identity(link),
            expected: program.type_name(expected).to_string(),
        };

        for pair in context.chain.windows(2) {
            let holder = program.field(pair[0])?.ty.named();
            let owner = program.field(pair[1])?.owner;
            if holder != Some(owner) {
                return Err(mismatch(pair[0], owner));
            }
        }

        let last = context.chain[context.chain.len() - 1];
        if program.field(last)?.ty.named() != Some(context.generated) {
            return Err(mismatch(last, context.generated));
        }
        if let Some(parent) = context.parent {
            let parent = self.context(parent);
            if program.field(last)?.owner != parent.generated {
                return Err(mismatch(last, parent.generated));
            }
        }
        Ok(())
    }

    fn validate_fields(&self, program: &Program, context: &ContextDescriptor) -> Result<(), PlanError> {
        for (original, instance) in context
            .moved_fields
            .iter()
            .chain(&context.replacement_fields)
        {
            let def = program.field(*original)?;
            if !def.is_static() || def.owner != context.holder {
                return Err(PlanError::MovedFieldNotStatic {
                    context: context.name.clone(),
                    field: program.field_identity(*original),
                });
            }
            let target = program.field(*instance)?;
            if target.is_static() || target.owner != context.generated {
                return Err(PlanError::FieldNotOnGenerated {
                    context: context.name.clone(),
                    field: program.field_identity(*instance),
                });
            }
        }
        if let Some(root_field) = context.root_field {
            if program.field(root_field)?.owner != context.generated {
                return Err(PlanError::FieldNotOnGenerated {
                    context: context.name.clone(),
                    field: program.field_identity(root_field),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextify_core::{FieldFlags, MethodFlags, TypeFlags, TypeRef};

    struct Skeleton {
        program: Program,
        plan: ContextPlan,
        holder: TypeId,
        generated: TypeId,
        ctor: MethodId,
        slot: FieldId,
        x: FieldId,
        x_inst: FieldId,
    }

    fn skeleton() -> Skeleton {
        let mut p = Program::new();
        let root = p.add_type("Game", "Root", None, TypeFlags::empty()).unwrap();
        let root_ctor = p
            .add_method(root, ".ctor", vec![], TypeRef::Void, MethodFlags::CONSTRUCTOR)
            .unwrap();
        let holder = p.add_type("Game", "H", None, TypeFlags::STATIC).unwrap();
        let generated = p.add_type("Game", "H_Context", None, TypeFlags::empty()).unwrap();
        let ctor = p
            .add_method(generated, ".ctor", vec![], TypeRef::Void, MethodFlags::CONSTRUCTOR)
            .unwrap();
        let slot = p
            .add_field(root, "H_field", TypeRef::Named(generated), FieldFlags::empty())
            .unwrap();
        let x = p.add_field(holder, "x", TypeRef::Int32, FieldFlags::STATIC).unwrap();
        let x_inst = p.add_field(generated, "x", TypeRef::Int32, FieldFlags::empty()).unwrap();
        Skeleton {
            program: p,
            plan: ContextPlan::new(root, root_ctor),
            holder,
            generated,
            ctor,
            slot,
            x,
            x_inst,
        }
    }

    #[test]
    fn valid_plan_and_lookups() {
        let mut s = skeleton();
        let id = s.plan.add_context(
            ContextDescriptor::new("H", s.holder, s.generated, s.ctor)
                .with_chain(vec![s.slot])
                .move_field(s.x, s.x_inst),
        );
        assert_eq!(s.plan.validate(&s.program), Ok(()));
        assert_eq!(s.plan.by_holder(s.holder), Some(id));
        assert_eq!(s.plan.moved_field(s.x), Some((id, s.x_inst)));
        assert_eq!(s.plan.context(id).slot(), Some(s.slot));
        assert!(s.plan.is_context_type(s.generated));
    }

    #[test]
    fn empty_chain_rejected() {
        let mut s = skeleton();
        s.plan
            .add_context(ContextDescriptor::new("H", s.holder, s.generated, s.ctor));
        assert!(matches!(
            s.plan.validate(&s.program),
            Err(PlanError::ChainStartsOffRoot { .. })
        ));
    }

    #[test]
    fn moved_field_must_be_static_on_holder() {
        let mut s = skeleton();
        s.plan.add_context(
            ContextDescriptor::new("H", s.holder, s.generated, s.ctor)
                .with_chain(vec![s.slot])
                .move_field(s.x_inst, s.x_inst),
        );
        assert!(matches!(
            s.plan.validate(&s.program),
            Err(PlanError::MovedFieldNotStatic { .. })
        ));
    }

    #[test]
    fn duplicate_holder_rejected() {
        let mut s = skeleton();
        for _ in 0..2 {
            s.plan.add_context(
                ContextDescriptor::new("H", s.holder, s.generated, s.ctor).with_chain(vec![s.slot]),
            );
        }
        assert_eq!(
            s.plan.validate(&s.program),
            Err(PlanError::DuplicateHolder {
                holder: "Game.H".into()
            })
        );
    }

    #[test]
    fn chain_must_end_at_generated_type() {
        let mut s = skeleton();
        let stray = s
            .program
            .add_field(s.plan.root, "other", TypeRef::Object, FieldFlags::empty())
            .unwrap();
        s.plan.add_context(
            ContextDescriptor::new("H", s.holder, s.generated, s.ctor).with_chain(vec![stray]),
        );
        assert!(matches!(
            s.plan.validate(&s.program),
            Err(PlanError::ChainLinkMismatch { .. })
        ));
    }
}
