//! Type definition entry.

use bitflags::bitflags;

use crate::{FieldId, MethodId, TypeId, TypeRef};

bitflags! {
    /// Modifiers and roles of a type definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u32 {
        const INTERFACE = 1 << 0;
        const ABSTRACT = 1 << 1;
        const SEALED = 1 << 2;
        /// Copied by value; addresses are needed to mutate in place.
        const VALUE_TYPE = 1 << 3;
        /// Callable type with a `(object, native int)` constructor and `Invoke`.
        const DELEGATE = 1 << 4;
        const COMPILER_GENERATED = 1 << 5;
        /// Compiler-generated holder of cached capture-free callables (`<>c`).
        const CLOSURE_SINGLETON = 1 << 6;
        /// Compiler-generated holder of a lambda's captured outer variables.
        const DISPLAY_CLASS = 1 << 7;
        const STATIC = 1 << 8;
    }
}

/// A property: a name grouping a getter and/or a setter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: String,
    pub getter: Option<MethodId>,
    pub setter: Option<MethodId>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            getter: None,
            setter: None,
        }
    }

    pub fn with_getter(mut self, getter: MethodId) -> Self {
        self.getter = Some(getter);
        self
    }

    pub fn with_setter(mut self, setter: MethodId) -> Self {
        self.setter = Some(setter);
        self
    }

    /// The accessor paired with `method`, if `method` is one of the two.
    pub fn sibling_of(&self, method: MethodId) -> Option<Option<MethodId>> {
        if self.getter == Some(method) {
            Some(self.setter)
        } else if self.setter == Some(method) {
            Some(self.getter)
        } else {
            None
        }
    }

    /// Replace one accessor id with another.
    pub fn remap(&mut self, from: MethodId, to: MethodId) {
        if self.getter == Some(from) {
            self.getter = Some(to);
        }
        if self.setter == Some(from) {
            self.setter = Some(to);
        }
    }
}

/// A type definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub id: TypeId,
    /// Namespace, empty for the global namespace and for nested types.
    pub namespace: String,
    /// Unqualified name.
    pub name: String,
    /// Fully qualified name: `Ns.Name`, or `Outer/Name` for nested types.
    pub full_name: String,
    /// Enclosing type for nested types.
    pub declaring: Option<TypeId>,

    // === Inheritance ===
    pub base: Option<TypeRef>,
    pub interfaces: Vec<TypeId>,

    // === Members ===
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub nested: Vec<TypeId>,
    pub properties: Vec<PropertyDef>,

    pub flags: TypeFlags,
}

impl TypeDef {
    pub(crate) fn new(
        id: TypeId,
        namespace: String,
        name: String,
        full_name: String,
        declaring: Option<TypeId>,
        flags: TypeFlags,
    ) -> Self {
        Self {
            id,
            namespace,
            name,
            full_name,
            declaring,
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            nested: Vec::new(),
            properties: Vec::new(),
            flags,
        }
    }

    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeFlags::INTERFACE)
    }

    pub fn is_value_type(&self) -> bool {
        self.flags.contains(TypeFlags::VALUE_TYPE)
    }

    pub fn is_delegate(&self) -> bool {
        self.flags.contains(TypeFlags::DELEGATE)
    }

    pub fn is_display_class(&self) -> bool {
        self.flags.contains(TypeFlags::DISPLAY_CLASS)
    }

    pub fn is_closure_singleton(&self) -> bool {
        self.flags.contains(TypeFlags::CLOSURE_SINGLETON)
    }

    /// Base type id when the base is a named type.
    pub fn base_type(&self) -> Option<TypeId> {
        self.base.as_ref().and_then(TypeRef::named)
    }

    /// Property that has `method` as one of its accessors.
    pub fn property_of(&self, method: MethodId) -> Option<&PropertyDef> {
        self.properties
            .iter()
            .find(|p| p.getter == Some(method) || p.setter == Some(method))
    }
}
