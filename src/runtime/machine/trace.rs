use crate::bytecode::inst::Inst;
use crate::runtime::channel::Close;
use crate::runtime::proc::ProcId;
use crate::runtime::value::Crash;

use super::Machine;

/// Step tracing to stderr, gated on the trace flag. One line per event,
/// prefixed with the tick and the proc, with addresses rendered through
/// the label table so traces read like the disassembly.
impl Machine {
    fn site(&self, addr: usize) -> String {
        match self.program.labels.covering(addr) {
            Some(label) if label.addr == addr => format!("@{}", label.name),
            Some(label) => format!("@{}+{}", label.name, addr - label.addr),
            None => format!("?{}", addr),
        }
    }

    pub(super) fn trace_spawn(&self, pid: ProcId, addr: usize) {
        if !self.trace {
            return;
        }
        eprintln!("[tick {}] p{} spawn {}", self.ticks, pid, self.site(addr));
    }

    pub(super) fn trace_step(&self, pid: ProcId, pc: usize, inst: &Inst) {
        if !self.trace {
            return;
        }
        let mut rendered = inst.op.wire_name().to_string();
        for (idx, &arg) in inst.args.iter().enumerate() {
            rendered.push(' ');
            rendered.push_str(&self.program.arg_as_str(inst.op, idx, arg));
        }
        eprintln!(
            "[tick {}] p{} {} {}",
            self.ticks,
            pid,
            self.site(pc),
            rendered
        );
    }

    pub(super) fn trace_crash(&self, pid: ProcId, crash: &Crash) {
        if !self.trace {
            return;
        }
        eprintln!("[tick {}] p{} {}", self.ticks, pid, crash);
    }

    pub(super) fn trace_interrupt(&self, pid: ProcId, close: &Close) {
        if !self.trace {
            return;
        }
        eprintln!("[tick {}] p{} interrupt {}", self.ticks, pid, close);
    }
}
