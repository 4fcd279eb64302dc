//! Arena identifiers for program entities.
//!
//! Every type, field, method and instruction lives in an arena owned by the
//! [`Program`](crate::Program) (or, for instructions, by its
//! [`MethodBody`](crate::MethodBody)). Identifiers are dense `u32` indexes and
//! order the same way the entities were registered, which keeps every
//! traversal over the program deterministic.

use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            /// Create an identifier from its raw index.
            #[inline]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Get the underlying index.
            #[inline]
            pub const fn index(self) -> u32 {
                self.0
            }

            /// Index suitable for addressing the owning arena.
            #[inline]
            pub(crate) const fn slot(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "_{}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(index: u32) -> Self {
                Self::new(index)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

arena_id!(
    /// Identifies a type definition in a [`Program`](crate::Program).
    TypeId,
    "type"
);

arena_id!(
    /// Identifies a field definition in a [`Program`](crate::Program).
    FieldId,
    "field"
);

arena_id!(
    /// Identifies a method definition in a [`Program`](crate::Program).
    MethodId,
    "method"
);

arena_id!(
    /// Identifies an instruction inside one method body.
    ///
    /// Instruction ids are stable across edits: inserting or removing
    /// instructions never renumbers the survivors, so jump targets and cached
    /// analysis results can refer to them safely.
    InstrId,
    "instr"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip() {
        let id = MethodId::new(42);
        assert_eq!(id.index(), 42);
        assert_eq!(u32::from(id), 42);
        assert_eq!(MethodId::from(42), id);
    }

    #[test]
    fn id_display_tags() {
        assert_eq!(TypeId::new(1).to_string(), "type_1");
        assert_eq!(FieldId::new(2).to_string(), "field_2");
        assert_eq!(MethodId::new(3).to_string(), "method_3");
        assert_eq!(InstrId::new(4).to_string(), "instr_4");
    }

    #[test]
    fn ids_order_by_index() {
        let mut ids = vec![MethodId::new(5), MethodId::new(1), MethodId::new(3)];
        ids.sort();
        assert_eq!(ids, vec![MethodId::new(1), MethodId::new(3), MethodId::new(5)]);
    }
}
