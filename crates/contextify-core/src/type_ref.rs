//! Type references used by signatures, fields, locals and operands.

use crate::TypeId;

/// A reference to a type as it appears in a signature or operand.
///
/// Named types point into the [`Program`](crate::Program) arena; everything
/// else is a built-in with fixed semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Void,
    Bool,
    Int32,
    Int64,
    Float64,
    String,
    Object,
    NativeInt,
    Named(TypeId),
    ByRef(Box<TypeRef>),
    Array(Box<TypeRef>),
}

impl TypeRef {
    /// Managed reference to `inner` (the type of an address-of result).
    pub fn by_ref(inner: TypeRef) -> Self {
        TypeRef::ByRef(Box::new(inner))
    }

    /// Single-dimension array of `element`.
    pub fn array(element: TypeRef) -> Self {
        TypeRef::Array(Box::new(element))
    }

    /// The named type this reference resolves to, looking through `ByRef`.
    pub fn named(&self) -> Option<TypeId> {
        match self {
            TypeRef::Named(id) => Some(*id),
            TypeRef::ByRef(inner) => inner.named(),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Void)
    }

    pub fn is_by_ref(&self) -> bool {
        matches!(self, TypeRef::ByRef(_))
    }

    /// Name of a built-in type, `None` for named types and composites.
    pub fn builtin_name(&self) -> Option<&'static str> {
        Some(match self {
            TypeRef::Void => "void",
            TypeRef::Bool => "bool",
            TypeRef::Int32 => "int32",
            TypeRef::Int64 => "int64",
            TypeRef::Float64 => "float64",
            TypeRef::String => "string",
            TypeRef::Object => "object",
            TypeRef::NativeInt => "native int",
            _ => return None,
        })
    }
}

impl From<TypeId> for TypeRef {
    fn from(id: TypeId) -> Self {
        TypeRef::Named(id)
    }
}
