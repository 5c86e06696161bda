use std::fmt::Write;

use crate::bytecode::inst::Inst;
use crate::bytecode::label::{Label, LabelTable};
use crate::bytecode::op_code::{ArgKind, OpCode};
use crate::bytecode::symbol::{Sym, SymbolTable};
use crate::runtime::value::Value;

/// The label a machine starts from when no entry is named.
pub const ENTRY_LABEL: &str = "main";

/// The static side of a loaded program: constants, interned symbols,
/// labels and decoded instructions.
///
/// All four tables are append-only. The loader and the builder populate
/// them before the machine starts; during a run only the symbol table
/// grows (runtime strings interned by `dynamic-ref`), everything else is
/// read-only. Instruction arguments index into these tables, so entries
/// are never removed or reordered.
#[derive(Debug, Default)]
pub struct Program {
    pub constants: Vec<Value>,
    pub symbols: SymbolTable,
    pub labels: LabelTable,
    pub insts: Vec<Inst>,
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    pub fn entry(&self) -> Option<&Label> {
        self.labels.get(ENTRY_LABEL)
    }

    pub fn inst(&self, pc: usize) -> &Inst {
        &self.insts[pc]
    }

    pub fn constant(&self, idx: usize) -> &Value {
        &self.constants[idx]
    }

    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Renders one static argument for disassembly and traces, marked by
    /// kind: `#raw`, `@label`, `+const`, `:sym`, `@!intrinsic`.
    pub fn arg_as_str(&self, op: OpCode, idx: usize, arg: usize) -> String {
        match op.arg_kinds().get(idx) {
            Some(ArgKind::Raw) => format!("#{}", arg),
            Some(ArgKind::Addr) => match self.labels.at_addr(arg) {
                Some(label) => format!("@{}", label.name),
                None => format!("?{}", arg),
            },
            Some(ArgKind::Const) => match self.constants.get(arg) {
                Some(value) => format!("+{}", value),
                None => format!("?{}", arg),
            },
            Some(ArgKind::Sym) => format!(":{}", self.symbols.revsym(Sym(arg as u32))),
            Some(ArgKind::Intrinsic) => {
                format!("@!{}", self.symbols.revsym(Sym(arg as u32)))
            }
            None => format!("?{}", arg),
        }
    }

    /// Text dump of all four tables, instructions grouped under their
    /// labels.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();

        out.push_str("==== symbols ====\n");
        for (sym, name) in self.symbols.iter() {
            let _ = writeln!(out, "{} {}", sym.0, name);
        }

        out.push_str("\n==== consts ====\n");
        for (i, constant) in self.constants.iter().enumerate() {
            let _ = writeln!(out, "{} {}", i, constant);
        }

        out.push_str("\n==== labels ====\n");
        for (i, label) in self.labels.iter().enumerate() {
            let _ = writeln!(out, "{} {}", i, label);
        }

        out.push_str("\n==== instructions ====\n");
        for (addr, inst) in self.insts.iter().enumerate() {
            if let Some(label) = self.labels.at_addr(addr) {
                match &label.trace {
                    Some(trace) => {
                        let _ = writeln!(out, "{}: {}", label.name, trace);
                    }
                    None => {
                        let _ = writeln!(out, "{}:", label.name);
                    }
                }
            }

            let _ = write!(out, "  {} {}", addr, inst.op);
            for (i, &arg) in inst.args.iter().enumerate() {
                let _ = write!(out, " {}", self.arg_as_str(inst.op, i, arg));
            }
            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_rendering() {
        let mut program = Program::new();
        program.add_constant(Value::int(42));
        let x = program.symbols.sym("x");
        program.labels.register(Label::new("main", 0));

        assert_eq!(program.arg_as_str(OpCode::OpConst, 0, 0), "+42");
        assert_eq!(
            program.arg_as_str(OpCode::OpLet, 0, x.0 as usize),
            ":x"
        );
        assert_eq!(program.arg_as_str(OpCode::OpJump, 0, 0), "@main");
        assert_eq!(program.arg_as_str(OpCode::OpJump, 0, 7), "?7");
        assert_eq!(program.arg_as_str(OpCode::OpIndex, 0, 3), "#3");
    }

    #[test]
    fn test_entry_label() {
        let mut program = Program::new();
        assert!(program.entry().is_none());
        program.labels.register(Label::new("main", 2));
        assert_eq!(program.entry().map(|l| l.addr), Some(2));
    }
}
