//! Program entry types.
//!
//! - [`TypeDef`] - Classes, value types, interfaces and delegates
//! - [`FieldDef`] - Static and instance fields
//! - [`MethodDef`] - Methods, constructors and accessors, with optional bodies
//! - [`PropertyDef`] - Getter/setter pairs grouped under a property name
//!
//! Supporting types:
//! - [`TypeFlags`], [`FieldFlags`], [`MethodFlags`] - Modifier bitsets
//! - [`Param`], [`MethodShape`] - Signatures and clone shapes

mod field;
mod method;
mod type_def;

pub use field::{FieldDef, FieldFlags};
pub use method::{MethodDef, MethodFlags, MethodShape, Param};
pub use type_def::{PropertyDef, TypeDef, TypeFlags};
