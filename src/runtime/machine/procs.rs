use crate::bytecode::op_code::OpCode;
use crate::runtime::env::Env;
use crate::runtime::frame::{Compensation, Frame};
use crate::runtime::proc::{ProcId, ProcState};
use crate::runtime::value::{Crash, Status};

use super::Machine;

impl Machine {
    /// Runs one scheduling step for a proc: either drain one pending close
    /// interrupt, or execute one instruction. Crashes are caught here and
    /// terminate the proc, leaving its frames in place for inspection.
    pub(crate) fn step_proc(&mut self, pid: ProcId) {
        if self.procs[pid].state == ProcState::Interrupted {
            self.check_interrupts(pid);
            return;
        }
        if self.procs[pid].frames.is_empty() {
            self.procs[pid].set_done();
            return;
        }
        self.procs[pid].set_running();

        let pc = match self.procs[pid].current_frame() {
            Some(frame) => frame.pc,
            None => return,
        };
        if pc >= self.program.insts.len() {
            self.catch_crash(pid, Crash::str("pc-out-of-range"));
            return;
        }
        let inst = self.program.inst(pc).clone();
        self.trace_step(pid, pc, &inst);
        if let Some(frame) = self.procs[pid].current_frame_mut() {
            frame.pc += 1;
        }
        if let Err(crash) = self.run_action(pid, &inst) {
            self.catch_crash(pid, crash);
        }
    }

    fn catch_crash(&mut self, pid: ProcId, crash: Crash) {
        self.trace_crash(pid, &crash);
        let proc = &mut self.procs[pid];
        proc.status = Status::fail(crash.reason);
        proc.set_terminated();
    }

    /// Pushes a frame for `addr` under `env`, tail-eliminating completed
    /// frames beneath it.
    ///
    /// The incoming env is registered with its channels before any
    /// elimination, so a channel shared by the old and new frame never sees
    /// its count touch zero in between. Eliminated frames fold into the new
    /// one: their envs merge deepest-first with the incoming env on top, and
    /// their compensations are inherited ahead of any the new frame will
    /// register, preserving the firing order a non-eliminated stack would
    /// have had.
    pub(crate) fn push_frame(&mut self, pid: ProcId, env: Env, addr: usize) {
        self.register_frame_env(&env);

        let mut eliminated: Vec<Frame> = Vec::new();
        while self.procs[pid].frames.len() > 1 && self.at_return(pid) {
            match self.pop_frame(pid) {
                Some(dead) => eliminated.push(dead),
                None => break,
            }
        }

        let mut frame = Frame::new(env, addr);
        if !eliminated.is_empty() {
            let mut inherited: Vec<Compensation> = Vec::new();
            let mut folded: Option<Env> = None;
            for dead in eliminated.iter_mut().rev() {
                inherited.extend(dead.take_compensations());
                folded = Some(match folded {
                    None => dead.env.clone(),
                    Some(acc) => acc.merge(&dead.env),
                });
            }
            if let Some(acc) = folded {
                frame.env = acc.merge(&frame.env);
            }
            frame.inherit_compensations(inherited);
        }
        self.procs[pid].frames.push(frame);
    }

    /// Whether the proc's current frame sits on a `return`, meaning a frame
    /// pushed now can replace it. The root frame is never eliminated; its env
    /// is the proc's link to the base environment.
    fn at_return(&self, pid: ProcId) -> bool {
        match self.procs[pid].current_frame() {
            Some(frame) => {
                frame.pc < self.program.insts.len()
                    && self.program.inst(frame.pc).op == OpCode::OpReturn
            }
            None => false,
        }
    }

    /// Pops the current frame and releases its channel registrations.
    pub(crate) fn pop_frame(&mut self, pid: ProcId) -> Option<Frame> {
        let frame = self.procs[pid].frames.pop()?;
        self.release_frame_env(&frame.env);
        Some(frame)
    }

    /// The `return` instruction: tear down the current frame, then fire its
    /// unconditional compensations as fresh frames over the caller. With the
    /// last frame gone the proc is done.
    pub(crate) fn do_return(&mut self, pid: ProcId) {
        let Some(mut frame) = self.pop_frame(pid) else {
            self.procs[pid].set_done();
            return;
        };
        for comp in frame.take_compensations() {
            if comp.unconditional {
                self.push_frame(pid, frame.env.clone(), comp.addr);
            }
        }
        if self.procs[pid].frames.is_empty() {
            self.procs[pid].set_done();
        }
    }

    /// Drains one close interrupt: unwind every frame whose env still
    /// exposes the closed channel on the interrupted side, then replay the
    /// compensations of the unwound frames. Consumes the proc's step.
    ///
    /// The proc stays interrupted while more interrupts are queued, so the
    /// whole queue drains before the next instruction runs.
    fn check_interrupts(&mut self, pid: ProcId) {
        let Some(close) = self.procs[pid].take_interrupt() else {
            self.procs[pid].set_running();
            return;
        };
        self.trace_interrupt(pid, &close);

        let mut unwound: Vec<Frame> = Vec::new();
        loop {
            let exposes = match self.procs[pid].current_frame() {
                Some(frame) => frame.env.has_channel(&close.channel, close.direction),
                None => false,
            };
            if !exposes {
                break;
            }
            match self.pop_frame(pid) {
                Some(frame) => unwound.push(frame),
                None => break,
            }
        }

        for frame in &unwound {
            for comp in frame.compensations() {
                self.push_frame(pid, frame.env.clone(), comp.addr);
            }
        }

        let proc = &mut self.procs[pid];
        if proc.frames.is_empty() {
            proc.set_done();
        } else if !proc.has_interrupts() {
            proc.set_running();
        }
    }
}
