//! Field definition entry.

use bitflags::bitflags;

use crate::{FieldId, TypeId, TypeRef};

bitflags! {
    /// Field modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldFlags: u16 {
        const STATIC = 1 << 0;
        const INIT_ONLY = 1 << 1;
        /// Compile-time constant; never read through an instruction.
        const LITERAL = 1 << 2;
        const COMPILER_GENERATED = 1 << 3;
        /// Detached from its owner; kept so stale operands still resolve.
        const RETIRED = 1 << 4;
    }
}

/// A field definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub id: FieldId,
    pub owner: TypeId,
    pub name: String,
    pub ty: TypeRef,
    pub flags: FieldFlags,
}

impl FieldDef {
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }

    pub fn is_literal(&self) -> bool {
        self.flags.contains(FieldFlags::LITERAL)
    }

    pub fn is_retired(&self) -> bool {
        self.flags.contains(FieldFlags::RETIRED)
    }
}
