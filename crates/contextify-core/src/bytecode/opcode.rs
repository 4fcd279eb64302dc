//! Bytecode operation codes.
//!
//! The instruction set is a conventional evaluation-stack IR: every opcode
//! pops a fixed or signature-dependent number of values and pushes its
//! results. Operands (field, method, type, branch targets) live beside the
//! opcode in an [`Operand`](super::Operand), not inline in a byte stream.

/// Bytecode operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum OpCode {
    // =========================================================================
    // Constants and stack
    // =========================================================================
    Nop = 0,
    Pop,
    Dup,
    LdNull,
    LdcI4,
    LdcI8,
    LdcR8,
    LdStr,

    // =========================================================================
    // Arguments and locals
    // =========================================================================
    LdArg,
    LdArgA,
    StArg,
    LdLoc,
    LdLocA,
    StLoc,

    // =========================================================================
    // Fields
    // =========================================================================
    /// Pop object, push instance field value.
    LdFld,
    /// Pop object, push address of instance field.
    LdFldA,
    /// Pop object and value, store instance field.
    StFld,
    /// Push static field value.
    LdSFld,
    /// Push address of static field.
    LdSFldA,
    /// Pop value, store static field.
    StSFld,

    // =========================================================================
    // Indirection
    // =========================================================================
    LdInd,
    StInd,
    LdObj,
    StObj,

    // =========================================================================
    // Arithmetic and comparison
    // =========================================================================
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Ceq,
    Cgt,
    Clt,
    ConvI4,
    ConvI8,
    ConvR8,

    // =========================================================================
    // Control flow
    // =========================================================================
    Br,
    BrTrue,
    BrFalse,
    Beq,
    Bne,
    Blt,
    Bge,
    Bgt,
    Ble,
    Switch,
    /// Exit a protected region, emptying the evaluation stack.
    Leave,
    Ret,

    // =========================================================================
    // Calls and callables
    // =========================================================================
    Call,
    CallVirt,
    NewObj,
    /// Push a native pointer to a method.
    LdFtn,
    /// Pop an object, push a pointer to its virtual implementation.
    LdVirtFtn,

    // =========================================================================
    // Objects and arrays
    // =========================================================================
    Box,
    UnboxAny,
    CastClass,
    IsInst,
    InitObj,
    NewArr,
    LdLen,
    LdElem,
    StElem,

    // =========================================================================
    // Exceptions
    // =========================================================================
    Throw,
    EndFinally,
}

/// How control leaves an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Falls through to the next instruction.
    Next,
    /// Unconditional jump.
    Branch,
    /// Jump or fall through.
    CondBranch,
    /// Jump table with fall-through default.
    Switch,
    /// Leaves the method.
    Return,
    /// Transfers to a handler or ends a handler.
    Throw,
}

/// Static pop/push arity of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: usize,
    pub pushes: usize,
}

impl StackEffect {
    pub const fn new(pops: usize, pushes: usize) -> Self {
        Self { pops, pushes }
    }

    /// Net change in stack depth.
    pub fn net(&self) -> isize {
        self.pushes as isize - self.pops as isize
    }
}

impl OpCode {
    /// Arity that does not depend on any signature.
    ///
    /// Returns `None` for the call family and `ret`, whose arity comes from
    /// the target or enclosing method.
    pub fn fixed_effect(&self) -> Option<StackEffect> {
        use OpCode::*;
        let (pops, pushes) = match self {
            Nop | Br | Leave | EndFinally => (0, 0),
            Pop | StArg | StLoc | StSFld | BrTrue | BrFalse | Switch | InitObj | Throw => (1, 0),
            Dup => (1, 2),
            LdNull | LdcI4 | LdcI8 | LdcR8 | LdStr | LdArg | LdArgA | LdLoc | LdLocA | LdSFld
            | LdSFldA | LdFtn => (0, 1),
            LdFld | LdFldA | LdInd | LdObj | Neg | Not | ConvI4 | ConvI8 | ConvR8 | LdVirtFtn
            | Box | UnboxAny | CastClass | IsInst | NewArr | LdLen => (1, 1),
            StFld | StInd | StObj | Beq | Bne | Blt | Bge | Bgt | Ble => (2, 0),
            Add | Sub | Mul | Div | Rem | And | Or | Xor | Shl | Shr | Ceq | Cgt | Clt
            | LdElem => (2, 1),
            StElem => (3, 0),
            Ret | Call | CallVirt | NewObj => return None,
        };
        Some(StackEffect::new(pops, pushes))
    }

    pub fn flow(&self) -> FlowKind {
        use OpCode::*;
        match self {
            Br | Leave => FlowKind::Branch,
            BrTrue | BrFalse | Beq | Bne | Blt | Bge | Bgt | Ble => FlowKind::CondBranch,
            Switch => FlowKind::Switch,
            Ret => FlowKind::Return,
            Throw | EndFinally => FlowKind::Throw,
            _ => FlowKind::Next,
        }
    }

    /// Whether execution can continue with the next instruction.
    pub fn falls_through(&self) -> bool {
        matches!(
            self.flow(),
            FlowKind::Next | FlowKind::CondBranch | FlowKind::Switch
        )
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow(),
            FlowKind::Branch | FlowKind::CondBranch | FlowKind::Switch
        )
    }

    pub fn is_call(&self) -> bool {
        matches!(self, OpCode::Call | OpCode::CallVirt | OpCode::NewObj)
    }

    pub fn is_static_field_access(&self) -> bool {
        matches!(self, OpCode::LdSFld | OpCode::LdSFldA | OpCode::StSFld)
    }

    /// Instance-field counterpart of a static-field opcode.
    pub fn to_instance_field(&self) -> Option<OpCode> {
        match self {
            OpCode::LdSFld => Some(OpCode::LdFld),
            OpCode::LdSFldA => Some(OpCode::LdFldA),
            OpCode::StSFld => Some(OpCode::StFld),
            _ => None,
        }
    }

    pub fn is_arg_access(&self) -> bool {
        matches!(self, OpCode::LdArg | OpCode::LdArgA | OpCode::StArg)
    }

    pub fn is_local_access(&self) -> bool {
        matches!(self, OpCode::LdLoc | OpCode::LdLocA | OpCode::StLoc)
    }

    /// Get the mnemonic of this opcode for disassembly.
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Nop => "nop",
            OpCode::Pop => "pop",
            OpCode::Dup => "dup",
            OpCode::LdNull => "ldnull",
            OpCode::LdcI4 => "ldc.i4",
            OpCode::LdcI8 => "ldc.i8",
            OpCode::LdcR8 => "ldc.r8",
            OpCode::LdStr => "ldstr",
            OpCode::LdArg => "ldarg",
            OpCode::LdArgA => "ldarga",
            OpCode::StArg => "starg",
            OpCode::LdLoc => "ldloc",
            OpCode::LdLocA => "ldloca",
            OpCode::StLoc => "stloc",
            OpCode::LdFld => "ldfld",
            OpCode::LdFldA => "ldflda",
            OpCode::StFld => "stfld",
            OpCode::LdSFld => "ldsfld",
            OpCode::LdSFldA => "ldsflda",
            OpCode::StSFld => "stsfld",
            OpCode::LdInd => "ldind",
            OpCode::StInd => "stind",
            OpCode::LdObj => "ldobj",
            OpCode::StObj => "stobj",
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Mul => "mul",
            OpCode::Div => "div",
            OpCode::Rem => "rem",
            OpCode::Neg => "neg",
            OpCode::And => "and",
            OpCode::Or => "or",
            OpCode::Xor => "xor",
            OpCode::Not => "not",
            OpCode::Shl => "shl",
            OpCode::Shr => "shr",
            OpCode::Ceq => "ceq",
            OpCode::Cgt => "cgt",
            OpCode::Clt => "clt",
            OpCode::ConvI4 => "conv.i4",
            OpCode::ConvI8 => "conv.i8",
            OpCode::ConvR8 => "conv.r8",
            OpCode::Br => "br",
            OpCode::BrTrue => "brtrue",
            OpCode::BrFalse => "brfalse",
            OpCode::Beq => "beq",
            OpCode::Bne => "bne.un",
            OpCode::Blt => "blt",
            OpCode::Bge => "bge",
            OpCode::Bgt => "bgt",
            OpCode::Ble => "ble",
            OpCode::Switch => "switch",
            OpCode::Leave => "leave",
            OpCode::Ret => "ret",
            OpCode::Call => "call",
            OpCode::CallVirt => "callvirt",
            OpCode::NewObj => "newobj",
            OpCode::LdFtn => "ldftn",
            OpCode::LdVirtFtn => "ldvirtftn",
            OpCode::Box => "box",
            OpCode::UnboxAny => "unbox.any",
            OpCode::CastClass => "castclass",
            OpCode::IsInst => "isinst",
            OpCode::InitObj => "initobj",
            OpCode::NewArr => "newarr",
            OpCode::LdLen => "ldlen",
            OpCode::LdElem => "ldelem",
            OpCode::StElem => "stelem",
            OpCode::Throw => "throw",
            OpCode::EndFinally => "endfinally",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_repr() {
        assert_eq!(OpCode::Nop as u8, 0);
        assert_eq!(OpCode::Pop as u8, 1);
    }

    #[test]
    fn opcode_name() {
        assert_eq!(OpCode::LdSFld.name(), "ldsfld");
        assert_eq!(OpCode::LdcI4.name(), "ldc.i4");
        assert_eq!(OpCode::UnboxAny.name(), "unbox.any");
    }

    #[test]
    fn contextual_effects() {
        assert_eq!(OpCode::Call.fixed_effect(), None);
        assert_eq!(OpCode::NewObj.fixed_effect(), None);
        assert_eq!(OpCode::Ret.fixed_effect(), None);
    }

    #[test]
    fn fixed_effects() {
        assert_eq!(OpCode::Dup.fixed_effect(), Some(StackEffect::new(1, 2)));
        assert_eq!(OpCode::StFld.fixed_effect(), Some(StackEffect::new(2, 0)));
        assert_eq!(OpCode::StElem.fixed_effect(), Some(StackEffect::new(3, 0)));
        assert_eq!(OpCode::LdSFldA.fixed_effect(), Some(StackEffect::new(0, 1)));
        assert_eq!(StackEffect::new(2, 1).net(), -1);
    }

    #[test]
    fn flow_classification() {
        assert!(!OpCode::Br.falls_through());
        assert!(!OpCode::Leave.falls_through());
        assert!(!OpCode::Throw.falls_through());
        assert!(OpCode::BrTrue.falls_through());
        assert!(OpCode::Switch.is_branch());
        assert!(!OpCode::Ret.is_branch());
    }

    #[test]
    fn static_to_instance_field() {
        assert_eq!(OpCode::LdSFld.to_instance_field(), Some(OpCode::LdFld));
        assert_eq!(OpCode::LdSFldA.to_instance_field(), Some(OpCode::LdFldA));
        assert_eq!(OpCode::StSFld.to_instance_field(), Some(OpCode::StFld));
        assert_eq!(OpCode::LdFld.to_instance_field(), None);
    }
}
