use std::fmt;

use contextify_core::{InstrId, MethodId};

/// How a caller reaches a callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImplicitCallMode {
    /// `call`, `callvirt` or `newobj` naming the callee.
    Direct,
    /// Virtual dispatch to an override or interface implementation.
    Inheritance,
    /// The callee is captured as a callable (`ldftn`) or invoked through one.
    Capture,
}

impl fmt::Display for ImplicitCallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImplicitCallMode::Direct => "direct",
            ImplicitCallMode::Inheritance => "inheritance",
            ImplicitCallMode::Capture => "capture",
        })
    }
}

/// One caller-to-callee edge of the reference graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSite {
    pub caller: MethodId,
    pub instruction: InstrId,
    pub callee: MethodId,
    pub mode: ImplicitCallMode,
}

impl CallSite {
    pub fn new(
        caller: MethodId,
        instruction: InstrId,
        callee: MethodId,
        mode: ImplicitCallMode,
    ) -> Self {
        Self {
            caller,
            instruction,
            callee,
            mode,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} at {} ({})",
            self.caller, self.callee, self.instruction, self.mode
        )
    }
}
