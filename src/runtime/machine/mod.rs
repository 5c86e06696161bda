use serde::Serialize;
use thiserror::Error;

use crate::bytecode::program::Program;
use crate::runtime::channel::Channel;
use crate::runtime::env::Env;
use crate::runtime::intrinsics;
use crate::runtime::proc::{Proc, ProcId, ProcState};
use crate::runtime::value::{Crash, Status, Streamer, Value, Vector};

mod actions;
mod channels;
mod invoke;
mod procs;
mod trace;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("image has no main label")]
    MissingEntry,
    #[error("no label named {name:?} in image")]
    NoSuchLabel { name: String },
    #[error("deadlock: {waiting} proc(s) blocked with no runnable peer")]
    Deadlock { waiting: usize },
}

/// Summary of a finished run, one entry per proc ever spawned.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub ticks: u64,
    pub procs: Vec<ProcReport>,
}

#[derive(Debug, Serialize)]
pub struct ProcReport {
    pub id: ProcId,
    pub state: String,
    pub status: String,
}

/// The scheduler and shared-state coordinator.
///
/// The machine owns every proc and channel and drives them in global ticks.
/// One tick is: step each runnable proc exactly one instruction (oldest
/// first), then run the resolve phase that pairs blocked writers with blocked
/// readers and closes collectors. Procs spawned mid-tick get their first step
/// on the next tick.
///
/// All cross-proc effects (waking, interrupting, channel registration) run
/// through machine methods, so proc and channel state never reach into each
/// other directly.
pub struct Machine {
    program: Program,
    procs: Vec<Proc>,
    channels: Vec<Channel>,
    collectors: Vec<Vector>,
    base_env: Env,
    ticks: u64,
    trace: bool,
}

impl Machine {
    pub fn new(program: Program) -> Machine {
        let mut program = program;
        let base_env = Env::root();
        intrinsics::install(&mut program.symbols, &base_env);

        Machine {
            program,
            procs: Vec::new(),
            channels: Vec::new(),
            collectors: Vec::new(),
            base_env,
            ticks: 0,
            trace: false,
        }
    }

    pub fn set_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The root environment, with every intrinsic bound by name. Shared
    /// state, so rewiring it affects procs spawned afterwards.
    pub fn base_env(&self) -> Env {
        self.base_env.clone()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn proc_count(&self) -> usize {
        self.procs.len()
    }

    pub fn proc(&self, pid: ProcId) -> &Proc {
        &self.procs[pid]
    }

    pub fn proc_state(&self, pid: ProcId) -> ProcState {
        self.procs[pid].state
    }

    pub fn proc_status(&self, pid: ProcId) -> Status {
        self.procs[pid].status.clone()
    }

    pub fn frame_depth(&self, pid: ProcId) -> usize {
        self.procs[pid].frame_depth()
    }

    pub(crate) fn set_status(&mut self, pid: ProcId, status: Status) {
        self.procs[pid].status = status;
    }

    pub(crate) fn current_env(&self, pid: ProcId) -> Result<Env, Crash> {
        Ok(self.frame(pid)?.env.clone())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Creates a fresh channel registered for the resolve phase.
    pub fn make_channel(&mut self) -> Channel {
        let channel = Channel::new(self.channels.len());
        self.channels.push(channel.clone());
        channel
    }

    pub(crate) fn watch_collector(&mut self, collector: Vector) {
        if !self.collectors.iter().any(|c| c.ptr_eq(&collector)) {
            self.collectors.push(collector);
        }
    }

    /// Spawns a proc whose root frame runs `addr` under `env`.
    pub fn spawn(&mut self, env: Env, addr: usize) -> ProcId {
        let pid = self.procs.len();
        self.procs.push(Proc::new(pid));
        self.push_frame(pid, env, addr);
        self.trace_spawn(pid, addr);
        pid
    }

    /// Spawns a proc at a named label.
    pub fn spawn_label(&mut self, env: Env, name: &str) -> Result<ProcId, MachineError> {
        let addr = self
            .program
            .labels
            .get(name)
            .map(|label| label.addr)
            .ok_or_else(|| MachineError::NoSuchLabel {
                name: name.to_string(),
            })?;
        Ok(self.spawn(env, addr))
    }

    /// Spawns the entry proc at the `main` label, under a child of the base
    /// environment with `sink` wired as its standard output.
    pub fn spawn_main(&mut self, sink: Streamer) -> Result<ProcId, MachineError> {
        let addr = self
            .program
            .entry()
            .map(|label| label.addr)
            .ok_or(MachineError::MissingEntry)?;
        let env = self.base_env.extend();
        env.set_output(0, Value::Streamer(sink));
        Ok(self.spawn(env, addr))
    }

    /// One global tick. The step order is decided up front: every proc
    /// runnable at tick start, oldest first (age, then id). Stepping bumps a
    /// proc's age, so the scheduler round-robins instead of starving anyone.
    pub fn tick(&mut self) {
        self.ticks += 1;

        let mut order: Vec<ProcId> = self
            .procs
            .iter()
            .filter(|p| p.is_runnable())
            .map(|p| p.id)
            .collect();
        order.sort_by_key(|&pid| (self.procs[pid].age, pid));

        for pid in order {
            if !self.procs[pid].is_runnable() {
                continue;
            }
            self.procs[pid].age += 1;
            self.step_proc(pid);
        }

        self.resolve_all();
    }

    /// Runs until every proc is done or the machine deadlocks: nothing
    /// runnable while someone still waits on a channel.
    pub fn run(&mut self) -> Result<(), MachineError> {
        loop {
            let runnable = self.procs.iter().filter(|p| p.is_runnable()).count();
            if runnable == 0 {
                let waiting = self.procs.iter().filter(|p| p.is_waiting()).count();
                if waiting > 0 {
                    return Err(MachineError::Deadlock { waiting });
                }
                return Ok(());
            }
            self.tick();
        }
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            ticks: self.ticks,
            procs: self
                .procs
                .iter()
                .map(|p| ProcReport {
                    id: p.id,
                    state: p.state.to_string(),
                    status: p.status.to_string(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod procs_test;
