//! Method definition entry.

use bitflags::bitflags;

use crate::{MethodBody, MethodId, TypeId, TypeRef};

bitflags! {
    /// Method modifiers and roles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u32 {
        const STATIC = 1 << 0;
        const VIRTUAL = 1 << 1;
        const ABSTRACT = 1 << 2;
        /// Starts a new virtual slot instead of overriding a base method.
        const NEW_SLOT = 1 << 3;
        const CONSTRUCTOR = 1 << 4;
        const STATIC_CONSTRUCTOR = 1 << 5;
        /// Accessor or operator; paired through the owner's property table.
        const SPECIAL_NAME = 1 << 6;
        const GETTER = 1 << 7;
        const SETTER = 1 << 8;
        const COMPILER_GENERATED = 1 << 9;
        /// Constructor-shaped static produced by splitting a static initializer.
        const INIT_UNIT = 1 << 10;
        /// Detached from its owner after being replaced.
        const RETIRED = 1 << 11;
        /// Copy that stands in for a method bound to a context.
        const CONTEXT_REPLACEMENT = 1 << 12;
    }
}

/// A named, typed parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Shape change applied when cloning a method.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodShape {
    /// Turn a static source into an instance method of the new owner.
    pub make_instance: bool,
    /// Prepend a parameter ahead of the source parameters.
    pub leading_param: Option<Param>,
}

impl MethodShape {
    /// Same parameters, same staticness.
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn instance() -> Self {
        Self {
            make_instance: true,
            leading_param: None,
        }
    }

    pub fn leading(param: Param) -> Self {
        Self {
            make_instance: false,
            leading_param: Some(param),
        }
    }
}

/// A method definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub id: MethodId,
    pub owner: TypeId,
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: TypeRef,
    pub flags: MethodFlags,
    /// Base or interface methods this method explicitly overrides.
    pub overrides: Vec<MethodId>,
    pub body: Option<MethodBody>,
}

impl MethodDef {
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodFlags::VIRTUAL)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodFlags::ABSTRACT)
    }

    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodFlags::CONSTRUCTOR)
    }

    pub fn is_static_constructor(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC_CONSTRUCTOR)
    }

    pub fn is_init_unit(&self) -> bool {
        self.flags.contains(MethodFlags::INIT_UNIT)
    }

    pub fn is_context_replacement(&self) -> bool {
        self.flags.contains(MethodFlags::CONTEXT_REPLACEMENT)
    }

    pub fn is_retired(&self) -> bool {
        self.flags.contains(MethodFlags::RETIRED)
    }

    pub fn is_special_name(&self) -> bool {
        self.flags.contains(MethodFlags::SPECIAL_NAME)
    }

    /// Number of argument slots occupied by the implicit receiver.
    pub fn this_offset(&self) -> u16 {
        if self.is_static() { 0 } else { 1 }
    }

    /// Total argument slots, receiver included.
    pub fn arg_count(&self) -> usize {
        self.params.len() + self.this_offset() as usize
    }

    pub fn returns_value(&self) -> bool {
        !self.return_type.is_void()
    }

    /// Type of argument slot `index` given the owner type of the receiver.
    pub fn arg_type(&self, index: u16, receiver: TypeRef) -> Option<TypeRef> {
        if !self.is_static() && index == 0 {
            return Some(receiver);
        }
        let param = index.checked_sub(self.this_offset())?;
        self.params.get(param as usize).map(|p| p.ty.clone())
    }
}
