use std::rc::Rc;

use crate::runtime::channel::Channelable;
use crate::runtime::env::Env;
use crate::runtime::value::{Crash, Ref, Status, Value, Vector};

/// A compensation registered in a frame: code to run when the frame exits.
/// Unconditional ones run on any exit; the rest only when the frame is torn
/// down by an interrupt unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compensation {
    pub addr: usize,
    pub unconditional: bool,
}

/// One call frame: the code address it entered at, the program counter, the
/// environment, an operand stack, and any registered compensations.
///
/// The typed pop helpers crash with the conventional tagged reasons, so
/// actions can use `?` and let the machine normalize the proc's death.
#[derive(Debug)]
pub struct Frame {
    pub addr: usize,
    pub pc: usize,
    pub env: Env,
    stack: Vec<Value>,
    compensations: Vec<Compensation>,
}

impl Frame {
    pub fn new(env: Env, addr: usize) -> Frame {
        Frame {
            addr,
            pc: addr,
            env,
            stack: Vec::new(),
            compensations: Vec::new(),
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value, Crash> {
        self.stack.pop().ok_or_else(|| Crash::str("empty-stack"))
    }

    pub fn pop_string(&mut self) -> Result<Rc<str>, Crash> {
        match self.pop()? {
            Value::String(s) => Ok(s),
            other => Err(Crash::tagged("not-a-string", &[other])),
        }
    }

    pub fn pop_number(&mut self) -> Result<i64, Crash> {
        self.pop()?.as_number()
    }

    pub fn pop_status(&mut self) -> Result<Status, Crash> {
        match self.pop()? {
            Value::Status(status) => Ok(status),
            other => Err(Crash::tagged("not-a-status", &[other])),
        }
    }

    pub fn pop_env(&mut self) -> Result<Env, Crash> {
        match self.pop()? {
            Value::Env(env) => Ok(env),
            other => Err(Crash::tagged("not-an-env", &[other])),
        }
    }

    pub fn pop_ref(&mut self) -> Result<Ref, Crash> {
        match self.pop()? {
            Value::Ref(cell) => Ok(cell),
            other => Err(Crash::tagged("not-a-ref", &[other])),
        }
    }

    pub fn pop_vec(&mut self) -> Result<Vector, Crash> {
        match self.pop()? {
            Value::Vector(vec) => Ok(vec),
            other => Err(Crash::tagged("not-a-vector", &[other])),
        }
    }

    /// Pops anything with the channel facet.
    pub fn pop_channel(&mut self) -> Result<Channelable, Crash> {
        let value = self.pop()?;
        value
            .channelable()
            .ok_or_else(|| Crash::tagged("not-a-channel", &[value]))
    }

    pub fn top(&self) -> Result<Value, Crash> {
        self.stack
            .last()
            .cloned()
            .ok_or_else(|| Crash::str("empty-stack"))
    }

    /// The top of the stack as a vector, left in place.
    pub fn top_vec(&self) -> Result<Vector, Crash> {
        match self.top()? {
            Value::Vector(vec) => Ok(vec),
            other => Err(Crash::tagged("not-a-vector", &[other])),
        }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Drops everything above the bottommost stack entry.
    pub fn clear_to_bottom(&mut self) {
        self.stack.truncate(1);
    }

    pub fn add_compensation(&mut self, addr: usize, unconditional: bool) {
        self.compensations.push(Compensation {
            addr,
            unconditional,
        });
    }

    pub fn compensations(&self) -> &[Compensation] {
        &self.compensations
    }

    pub fn take_compensations(&mut self) -> Vec<Compensation> {
        std::mem::take(&mut self.compensations)
    }

    /// Splices compensations from an eliminated frame in front of this
    /// frame's own, preserving the firing order the eliminated frame would
    /// have had.
    pub fn inherit_compensations(&mut self, earlier: Vec<Compensation>) {
        if !earlier.is_empty() {
            let mut merged = earlier;
            merged.extend(self.compensations.drain(..));
            self.compensations = merged;
        }
    }
}
