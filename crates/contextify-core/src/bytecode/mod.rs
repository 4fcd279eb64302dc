//! Bytecode types.
//!
//! - [`OpCode`] - The instruction set
//! - [`Instruction`] and [`Operand`] - One placed instruction
//! - [`MethodBody`] - Instruction list with stable ids and an edit API
//! - [`BodyBuilder`] - Label-based construction with jump patching

mod body;
mod builder;
mod instruction;
mod opcode;

pub use body::{ExceptionHandler, HandlerKind, MethodBody};
pub use builder::{BodyBuilder, Label};
pub use instruction::{Instruction, Operand};
pub use opcode::{FlowKind, OpCode, StackEffect};
