use crate::runtime::channel::{Channel, Channelable, Close};
use crate::runtime::env::Env;
use crate::runtime::proc::ProcId;
use crate::runtime::value::{Crash, Step, Value, Vector};

use super::Machine;

/// Channel plumbing: reference counting driven by frame lifetimes, the
/// blocking read/write entry points, and the end-of-tick resolve pass.
///
/// Count changes can close a channel, and closing strands every proc
/// still queued on it. Those strandings come back as `(pid, Close)`
/// pairs so the interrupt is delivered here, with no channel state
/// borrowed.
impl Machine {
    pub(crate) fn interrupt(&mut self, pid: ProcId, close: Close) {
        self.procs[pid].interrupt(close);
    }

    fn deliver(&mut self, stranded: Vec<(ProcId, Close)>) {
        for (pid, close) in stranded {
            self.interrupt(pid, close);
        }
    }

    fn add_reader(&mut self, target: &Channelable) {
        match target {
            Channelable::Channel(channel) => {
                let stranded = channel.add_reader();
                self.deliver(stranded);
            }
            Channelable::Collector(_) | Channelable::Streamer(_) => {}
        }
    }

    fn add_writer(&mut self, target: &Channelable) {
        match target {
            Channelable::Channel(channel) => {
                let stranded = channel.add_writer();
                self.deliver(stranded);
            }
            Channelable::Collector(collector) => collector.add_writer(),
            Channelable::Streamer(_) => {}
        }
    }

    fn rm_reader(&mut self, target: &Channelable) {
        match target {
            Channelable::Channel(channel) => {
                let stranded = channel.rm_reader();
                self.deliver(stranded);
            }
            Channelable::Collector(_) | Channelable::Streamer(_) => {}
        }
    }

    fn rm_writer(&mut self, target: &Channelable) {
        match target {
            Channelable::Channel(channel) => {
                let stranded = channel.rm_writer();
                self.deliver(stranded);
            }
            Channelable::Collector(collector) => collector.rm_writer(),
            Channelable::Streamer(_) => {}
        }
    }

    /// Counts every channel the env exposes, input slots as readers and
    /// output slots as writers. Runs once when a frame is pushed.
    pub(super) fn register_frame_env(&mut self, env: &Env) {
        for (_, value) in env.inputs() {
            if let Some(target) = value.channelable() {
                self.add_reader(&target);
            }
        }
        for (_, value) in env.outputs() {
            if let Some(target) = value.channelable() {
                self.add_writer(&target);
            }
        }
    }

    /// The inverse of [`Machine::register_frame_env`], run when a frame
    /// is popped. Dropping the last writer or reader closes the channel.
    pub(super) fn release_frame_env(&mut self, env: &Env) {
        for (_, value) in env.inputs() {
            if let Some(target) = value.channelable() {
                self.rm_reader(&target);
            }
        }
        for (_, value) in env.outputs() {
            if let Some(target) = value.channelable() {
                self.rm_writer(&target);
            }
        }
    }

    /// Writes `values` to a channelable on behalf of `pid`. Collectors
    /// and streamers accept immediately; a live channel queues the proc
    /// as a sender and blocks it, and a closed channel interrupts it.
    pub(crate) fn write_all(&mut self, pid: ProcId, target: &Channelable, values: Vec<Value>) {
        if values.is_empty() {
            return;
        }
        match target {
            Channelable::Channel(channel) => match channel.write_all(pid, values) {
                Ok(()) => self.procs[pid].set_waiting(),
                Err(close) => self.interrupt(pid, close),
            },
            Channelable::Collector(collector) => collector.push_all(&values),
            Channelable::Streamer(streamer) => streamer.write_all(&values),
        }
    }

    /// Reads `count` values on behalf of `pid`, to be delivered into
    /// `into` as they arrive. Only channels are readable.
    pub(crate) fn read(
        &mut self,
        pid: ProcId,
        target: &Channelable,
        count: usize,
        into: Value,
    ) -> Step {
        match target {
            Channelable::Channel(channel) => {
                if count == 0 {
                    return Ok(());
                }
                match channel.read(pid, count, into) {
                    Ok(()) => self.procs[pid].set_waiting(),
                    Err(close) => self.interrupt(pid, close),
                }
                Ok(())
            }
            Channelable::Collector(_) | Channelable::Streamer(_) => {
                Err(Crash::tagged("not-readable", &[target.as_value()]))
            }
        }
    }

    /// Writes through the current frame's standard output slot.
    pub(crate) fn put(&mut self, pid: ProcId, values: Vec<Value>) -> Step {
        let env = self.frame(pid)?.env.clone();
        let target = env
            .output(0)
            .and_then(|value| value.channelable())
            .ok_or_else(|| Crash::str("no-output"))?;
        self.write_all(pid, &target, values);
        Ok(())
    }

    /// Reads through the current frame's standard input slot.
    pub(crate) fn get(&mut self, pid: ProcId, count: usize, into: Value) -> Step {
        let env = self.frame(pid)?.env.clone();
        let target = env
            .input(0)
            .and_then(|value| value.channelable())
            .ok_or_else(|| Crash::str("no-input"))?;
        self.read(pid, &target, count, into)
    }

    /// The end-of-tick pass: pair up queued senders and receivers on
    /// every channel, then close any collector whose writers are gone.
    pub(super) fn resolve_all(&mut self) {
        for idx in 0..self.channels.len() {
            let channel = self.channels[idx].clone();
            self.resolve_channel(&channel);
        }
        for idx in 0..self.collectors.len() {
            let collector = self.collectors[idx].clone();
            self.resolve_collector(&collector);
        }
    }

    fn resolve_channel(&mut self, channel: &Channel) {
        while let Some((mut sender, mut receiver)) = channel.take_pair() {
            let value = sender.next_val();
            receiver.receive_one();

            // Wake the receiver before delivery: if the value lands in
            // another rendezvous channel the receiver re-blocks there,
            // and that write must see it runnable first.
            let receiver_done = receiver.is_done();
            if receiver_done {
                self.procs[receiver.pid].try_set_running();
            }
            if let Some(target) = receiver.target().channelable() {
                self.write_all(receiver.pid, &target, vec![value]);
            }

            if sender.is_done() {
                self.procs[sender.pid].try_set_running();
            } else {
                channel.requeue_sender(sender);
            }
            if !receiver_done {
                channel.requeue_receiver(receiver);
            }
        }
        let stranded = channel.after_resolve();
        self.deliver(stranded);
    }

    fn resolve_collector(&mut self, collector: &Vector) {
        if let Some(waiters) = collector.try_close() {
            for pid in waiters {
                self.procs[pid].try_set_running();
            }
        }
    }
}
