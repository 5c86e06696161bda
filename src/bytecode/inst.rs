use std::fmt;

use crate::bytecode::op_code::OpCode;

/// A decoded instruction: an opcode plus its static arguments.
///
/// Static arguments are table indices, addresses, counts and flags; the
/// meaning of each position comes from [`OpCode::arg_kinds`]. Operand
/// values always travel on the frame stack, never here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub op: OpCode,
    pub args: Vec<usize>,
}

impl Inst {
    pub fn new(op: OpCode, args: Vec<usize>) -> Inst {
        Inst { op, args }
    }

    pub fn arg(&self, idx: usize) -> usize {
        self.args[idx]
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
