use std::collections::VecDeque;
use std::fmt;

use crate::runtime::channel::Close;
use crate::runtime::frame::Frame;
use crate::runtime::value::Status;

pub type ProcId = usize;

/// Scheduling state of a proc.
///
/// `Init`, `Running` and `Interrupted` all count as runnable: a fresh proc
/// has not run yet, and an interrupted proc must get scheduled so it can
/// unwind. `Waiting` procs sit in a channel queue. `Done` and `Terminated`
/// are final; the difference is whether the proc finished or crashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Init,
    Running,
    Waiting,
    Interrupted,
    Done,
    Terminated,
}

impl ProcState {
    pub fn is_runnable(self) -> bool {
        matches!(
            self,
            ProcState::Init | ProcState::Running | ProcState::Interrupted
        )
    }

    pub fn is_final(self) -> bool {
        matches!(self, ProcState::Done | ProcState::Terminated)
    }
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcState::Init => "init",
            ProcState::Running => "running",
            ProcState::Waiting => "waiting",
            ProcState::Interrupted => "interrupted",
            ProcState::Done => "done",
            ProcState::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

/// A lightweight process: a frame stack, a status register, and a queue of
/// pending close interrupts. The machine owns all procs and drives them; the
/// proc itself only keeps state.
#[derive(Debug)]
pub struct Proc {
    pub id: ProcId,
    pub state: ProcState,
    pub status: Status,
    pub age: u64,
    pub frames: Vec<Frame>,
    pub interrupts: VecDeque<Close>,
}

impl Proc {
    pub fn new(id: ProcId) -> Proc {
        Proc {
            id,
            state: ProcState::Init,
            status: Status::Success,
            age: 0,
            frames: Vec::new(),
            interrupts: VecDeque::new(),
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.state.is_runnable()
    }

    pub fn is_waiting(&self) -> bool {
        self.state == ProcState::Waiting
    }

    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }

    pub fn set_running(&mut self) {
        self.state = ProcState::Running;
    }

    pub fn set_waiting(&mut self) {
        self.state = ProcState::Waiting;
    }

    pub fn set_done(&mut self) {
        self.state = ProcState::Done;
    }

    pub fn set_terminated(&mut self) {
        self.state = ProcState::Terminated;
    }

    /// Wakes the proc only if it is blocked. A proc that was interrupted
    /// while blocked stays interrupted; the unwind takes precedence over
    /// the wake.
    pub fn try_set_running(&mut self) {
        if self.state == ProcState::Waiting {
            self.state = ProcState::Running;
        }
    }

    /// Queues a close interrupt and forces the proc runnable so it unwinds.
    pub fn interrupt(&mut self, close: Close) {
        self.interrupts.push_back(close);
        self.state = ProcState::Interrupted;
    }

    pub fn take_interrupt(&mut self) -> Option<Close> {
        self.interrupts.pop_front()
    }

    pub fn has_interrupts(&self) -> bool {
        !self.interrupts.is_empty()
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }
}
