use thiserror::Error;

use crate::bytecode::inst::Inst;
use crate::bytecode::label::Label;
use crate::bytecode::op_code::OpCode;
use crate::bytecode::program::Program;
use crate::runtime::value::Value;

/// A static argument as written by a builder caller. Label references may
/// be forward; everything else resolves immediately.
#[derive(Debug, Clone)]
pub enum Arg<'a> {
    Imm(usize),
    Label(&'a str),
    Const(Value),
    Sym(&'a str),
    Intrinsic(&'a str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("unresolved label: {0}")]
    UnresolvedLabel(String),
}

/// Assembles a [`Program`] instruction by instruction. Label arguments
/// are patched when [`ProgramBuilder::finish`] runs, so forward jumps
/// read naturally.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
    fixups: Vec<(usize, usize, String)>,
}

impl ProgramBuilder {
    pub fn new() -> ProgramBuilder {
        ProgramBuilder::default()
    }

    /// Marks the next emitted instruction's address with a label.
    pub fn label(&mut self, name: &str) {
        let addr = self.program.insts.len();
        self.program.labels.register(Label::new(name, addr));
    }

    pub fn current_addr(&self) -> usize {
        self.program.insts.len()
    }

    pub fn emit(&mut self, op: OpCode, args: &[Arg]) -> usize {
        let addr = self.program.insts.len();
        let mut resolved = Vec::with_capacity(args.len());

        for (i, arg) in args.iter().enumerate() {
            match arg {
                Arg::Imm(value) => resolved.push(*value),
                Arg::Label(name) => {
                    self.fixups.push((addr, i, name.to_string()));
                    resolved.push(0);
                }
                Arg::Const(value) => {
                    resolved.push(self.program.add_constant(value.clone()));
                }
                Arg::Sym(name) | Arg::Intrinsic(name) => {
                    resolved.push(self.program.symbols.sym(name).0 as usize);
                }
            }
        }

        self.program.insts.push(Inst::new(op, resolved));
        addr
    }

    pub fn finish(mut self) -> Result<Program, BuildError> {
        for (inst_idx, arg_idx, name) in self.fixups.drain(..) {
            let addr = match self.program.labels.get(&name) {
                Some(label) => label.addr,
                None => return Err(BuildError::UnresolvedLabel(name)),
            };
            self.program.insts[inst_idx].args[arg_idx] = addr;
        }
        Ok(self.program)
    }
}
