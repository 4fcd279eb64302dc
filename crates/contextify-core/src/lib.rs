//! Program model for the contextify rewriting engine.
//!
//! This crate provides the in-memory object model the analysis and rewriting
//! passes operate on:
//!
//! - [`Program`] - Arena storage for types, fields and methods
//! - [`TypeDef`], [`FieldDef`], [`MethodDef`], [`PropertyDef`] - Member entries
//! - [`MethodBody`], [`Instruction`], [`OpCode`] - Stack-based bytecode
//! - [`BodyBuilder`] - Label-based body construction
//! - [`SymbolHash`] - Deterministic identity hashing for name lookups
//! - Error types for every phase (see [`error`])
//!
//! Loading and saving binary modules is not part of this crate; callers build a
//! [`Program`] through its registration API.

pub mod bytecode;
pub mod entries;
pub mod error;
mod ids;
mod program;
mod symbol_hash;
mod type_ref;

pub use bytecode::{
    BodyBuilder, ExceptionHandler, FlowKind, HandlerKind, Instruction, Label, MethodBody, OpCode,
    Operand, StackEffect,
};
pub use entries::{
    FieldDef, FieldFlags, MethodDef, MethodFlags, MethodShape, Param, PropertyDef, TypeDef,
    TypeFlags,
};
pub use error::{
    AnalysisError, BindingError, ContextifyError, ModelError, PlanError, ResolveError,
};
pub use ids::{FieldId, InstrId, MethodId, TypeId};
pub use program::{Program, TypeClone};
pub use symbol_hash::{SymbolHash, hash_constants};
pub use type_ref::TypeRef;
