use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::runtime::proc::ProcId;
use crate::runtime::value::{Streamer, Value, Vector};

/// Which side of a channel an operation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "read"),
            Direction::Output => write!(f, "write"),
        }
    }
}

/// Interrupt payload delivered to a proc whose channel operation can never
/// complete because the channel closed. The direction is the side the
/// interrupted proc was using: a stranded reader gets `Input`, a stranded
/// writer gets `Output`. Unwinding pops frames as long as they expose the
/// channel on that side.
#[derive(Debug, Clone)]
pub struct Close {
    pub channel: Channel,
    pub direction: Direction,
}

impl fmt::Display for Close {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<close:{} {}>", self.channel, self.direction)
    }
}

/// Lifecycle of a channel. Strictly monotonic: `Init` until both sides have
/// attached at least once, then `Open`, then `Closed` forever once either
/// side empties out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    Init,
    Open,
    Closed,
}

impl fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelPhase::Init => write!(f, "init"),
            ChannelPhase::Open => write!(f, "open"),
            ChannelPhase::Closed => write!(f, "closed"),
        }
    }
}

/// A blocked writer: the proc and the values it still has to hand over.
#[derive(Debug)]
pub struct Sender {
    pub pid: ProcId,
    values: Vec<Value>,
    index: usize,
}

impl Sender {
    fn new(pid: ProcId, values: Vec<Value>) -> Sender {
        Sender {
            pid,
            values,
            index: 0,
        }
    }

    pub(crate) fn next_val(&mut self) -> Value {
        let value = self.values[self.index].clone();
        self.index += 1;
        value
    }

    pub(crate) fn is_done(&self) -> bool {
        self.index >= self.values.len()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.values.len() - self.index
    }
}

/// A blocked reader: the proc, how many values it still wants, and the
/// channelable target each value is written into on arrival.
#[derive(Debug)]
pub struct Receiver {
    pub pid: ProcId,
    count: usize,
    into: Value,
}

impl Receiver {
    fn new(pid: ProcId, count: usize, into: Value) -> Receiver {
        Receiver { pid, count, into }
    }

    pub(crate) fn receive_one(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    pub(crate) fn is_done(&self) -> bool {
        self.count == 0
    }

    pub(crate) fn target(&self) -> Value {
        self.into.clone()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.count
    }
}

#[derive(Debug)]
struct ChannelState {
    phase: ChannelPhase,
    reader_count: usize,
    writer_count: usize,
    senders: VecDeque<Sender>,
    receivers: VecDeque<Receiver>,
}

/// A rendezvous channel. Unbuffered: writers and readers queue as blockers
/// and the machine pairs them off during its resolve phase.
///
/// Reader and writer counts track how many live frames expose the channel.
/// All four count mutators run the close check, so the channel opens the
/// moment both sides exist and closes the moment either side empties. Count
/// changes on a closed channel are no-ops.
///
/// `Channel` is a handle; clones share state. Methods that can close the
/// channel hand back the stranded blockers as `(pid, Close)` pairs for the
/// caller to interrupt, keeping interrupt delivery outside the borrow.
#[derive(Debug, Clone)]
pub struct Channel {
    id: usize,
    state: Rc<RefCell<ChannelState>>,
}

impl Channel {
    pub fn new(id: usize) -> Channel {
        Channel {
            id,
            state: Rc::new(RefCell::new(ChannelState {
                phase: ChannelPhase::Init,
                reader_count: 0,
                writer_count: 0,
                senders: VecDeque::new(),
                receivers: VecDeque::new(),
            })),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn phase(&self) -> ChannelPhase {
        self.state.borrow().phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == ChannelPhase::Closed
    }

    pub fn reader_count(&self) -> usize {
        self.state.borrow().reader_count
    }

    pub fn writer_count(&self) -> usize {
        self.state.borrow().writer_count
    }

    pub fn pending_senders(&self) -> usize {
        self.state.borrow().senders.len()
    }

    pub fn pending_receivers(&self) -> usize {
        self.state.borrow().receivers.len()
    }

    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    pub(crate) fn add_reader(&self) -> Vec<(ProcId, Close)> {
        let mut state = self.state.borrow_mut();
        if state.phase != ChannelPhase::Closed {
            state.reader_count += 1;
        }
        self.check_for_close(&mut state)
    }

    pub(crate) fn add_writer(&self) -> Vec<(ProcId, Close)> {
        let mut state = self.state.borrow_mut();
        if state.phase != ChannelPhase::Closed {
            state.writer_count += 1;
        }
        self.check_for_close(&mut state)
    }

    pub(crate) fn rm_reader(&self) -> Vec<(ProcId, Close)> {
        let mut state = self.state.borrow_mut();
        if state.phase != ChannelPhase::Closed {
            debug_assert!(state.reader_count > 0, "channel reader underflow");
            state.reader_count = state.reader_count.saturating_sub(1);
        }
        self.check_for_close(&mut state)
    }

    pub(crate) fn rm_writer(&self) -> Vec<(ProcId, Close)> {
        let mut state = self.state.borrow_mut();
        if state.phase != ChannelPhase::Closed {
            debug_assert!(state.writer_count > 0, "channel writer underflow");
            state.writer_count = state.writer_count.saturating_sub(1);
        }
        self.check_for_close(&mut state)
    }

    /// Queues a blocked writer. `Err` means the channel is already closed and
    /// the caller must interrupt the proc instead of blocking it.
    pub(crate) fn write_all(&self, pid: ProcId, values: Vec<Value>) -> Result<(), Close> {
        let mut state = self.state.borrow_mut();
        if state.phase == ChannelPhase::Closed {
            return Err(Close {
                channel: self.clone(),
                direction: Direction::Output,
            });
        }
        state.senders.push_back(Sender::new(pid, values));
        Ok(())
    }

    /// Queues a blocked reader. `Err` means the channel is already closed.
    pub(crate) fn read(&self, pid: ProcId, count: usize, into: Value) -> Result<(), Close> {
        let mut state = self.state.borrow_mut();
        if state.phase == ChannelPhase::Closed {
            return Err(Close {
                channel: self.clone(),
                direction: Direction::Input,
            });
        }
        state.receivers.push_back(Receiver::new(pid, count, into));
        Ok(())
    }

    /// Pops the front sender/receiver pair if both queues are nonempty.
    /// Delivery works in `Init` too; only `Closed` stops pairing.
    pub(crate) fn take_pair(&self) -> Option<(Sender, Receiver)> {
        let mut state = self.state.borrow_mut();
        if state.phase == ChannelPhase::Closed {
            return None;
        }
        if state.senders.is_empty() || state.receivers.is_empty() {
            return None;
        }
        let sender = state.senders.pop_front()?;
        let receiver = state.receivers.pop_front()?;
        Some((sender, receiver))
    }

    /// Puts a partly-drained sender back at the head of the queue.
    pub(crate) fn requeue_sender(&self, sender: Sender) {
        self.state.borrow_mut().senders.push_front(sender);
    }

    /// Puts a partly-filled receiver back at the head of the queue.
    pub(crate) fn requeue_receiver(&self, receiver: Receiver) {
        self.state.borrow_mut().receivers.push_front(receiver);
    }

    /// The close check that ends every resolve pass.
    pub(crate) fn after_resolve(&self) -> Vec<(ProcId, Close)> {
        let mut state = self.state.borrow_mut();
        self.check_for_close(&mut state)
    }

    // Init -> Open once both sides exist; Open -> Closed once either side is
    // gone. Closing strands every queued blocker: each is drained and handed
    // back with the direction its operation was using.
    fn check_for_close(&self, state: &mut ChannelState) -> Vec<(ProcId, Close)> {
        match state.phase {
            ChannelPhase::Init => {
                if state.reader_count > 0 && state.writer_count > 0 {
                    state.phase = ChannelPhase::Open;
                }
                Vec::new()
            }
            ChannelPhase::Open => {
                if state.reader_count > 0 && state.writer_count > 0 {
                    return Vec::new();
                }
                state.phase = ChannelPhase::Closed;
                let mut stranded = Vec::new();
                for sender in state.senders.drain(..) {
                    stranded.push((
                        sender.pid,
                        Close {
                            channel: self.clone(),
                            direction: Direction::Output,
                        },
                    ));
                }
                for receiver in state.receivers.drain(..) {
                    stranded.push((
                        receiver.pid,
                        Close {
                            channel: self.clone(),
                            direction: Direction::Input,
                        },
                    ));
                }
                stranded
            }
            ChannelPhase::Closed => Vec::new(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        write!(
            f,
            "<channel{} {}/{}:{}>",
            self.id, state.reader_count, state.writer_count, state.phase
        )
    }
}

/// The channel protocol, as a closed set of participating value shapes.
/// Dispatch happens here rather than through a trait object so the machine
/// can keep proc bookkeeping on its side of the call.
#[derive(Debug, Clone)]
pub enum Channelable {
    Channel(Channel),
    Collector(Vector),
    Streamer(Streamer),
}

impl Channelable {
    pub fn as_value(&self) -> Value {
        match self {
            Channelable::Channel(ch) => Value::Channel(ch.clone()),
            Channelable::Collector(v) => Value::Vector(v.clone()),
            Channelable::Streamer(s) => Value::Streamer(s.clone()),
        }
    }
}

impl fmt::Display for Channelable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_value())
    }
}
