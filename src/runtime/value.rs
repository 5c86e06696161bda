use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::runtime::channel::{Channel, Channelable};
use crate::runtime::env::Env;
use crate::runtime::proc::ProcId;

/// Runtime value held on operand stacks, in environment bindings, in channel
/// queues, and in the constant table.
///
/// ## Memory Management Model
///
/// Compound values (`Vector`, `Ref`, `Env`, `Channel`, `Function`) are handles:
/// an `Rc` around shared interior state. Cloning a value clones the handle, so
/// a vector pushed onto two stacks is one vector observed from two places.
/// Primitives (`Int`, `Placeholder`, `Status`) are unboxed.
///
/// `Rc` means value graphs can leak if a program ties a vector to itself
/// through a ref. Machines that run to completion release everything when
/// dropped; long-lived cyclic garbage is accepted until a tracing collector
/// is warranted.
///
/// ## Facets
///
/// There is no inheritance here. A value participates in a protocol when the
/// matching facet accessor says so: [`Value::channelable`] for values that can
/// sit in an environment channel slot, [`Value::can_invoke`] for values
/// callable through `invoke`. Everything else is a per-variant method.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    String(Rc<str>),
    Vector(Vector),
    Ref(Ref),
    Env(Env),
    Channel(Channel),
    Function(Function),
    Intrinsic(Intrinsic),
    Status(Status),
    Placeholder,
    Streamer(Streamer),
}

impl Value {
    pub fn int(n: i64) -> Value {
        Value::Int(n)
    }

    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn vector(values: Vec<Value>) -> Value {
        Value::Vector(Vector::new(values))
    }

    pub fn success() -> Value {
        Value::Status(Status::Success)
    }

    pub fn fail(reason: Value) -> Value {
        Value::Status(Status::fail(reason))
    }

    /// Lowercase type tag, as reported by the `typeof` instruction. Total
    /// over every variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::String(_) => "string",
            Value::Vector(_) => "vector",
            Value::Ref(_) => "ref",
            Value::Env(_) => "env",
            Value::Channel(_) => "channel",
            Value::Function(_) => "function",
            Value::Intrinsic(_) => "intrinsic",
            Value::Status(_) => "status",
            Value::Placeholder => "placeholder",
            Value::Streamer(_) => "streamer",
        }
    }

    /// Numeric coercion used by the arithmetic intrinsics and `jumplt`.
    /// Ints pass through, strings are parsed, everything else crashes with a
    /// `not-a-number` reason carrying the offending value.
    pub fn as_number(&self) -> Result<i64, Crash> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::String(s) => s
                .parse::<i64>()
                .map_err(|_| Crash::tagged("not-a-number", &[self.clone()])),
            _ => Err(Crash::tagged("not-a-number", &[self.clone()])),
        }
    }

    /// The channel-protocol facet. Channels rendezvous, vectors collect,
    /// streamers sink; every other value has no channel behavior.
    pub fn channelable(&self) -> Option<Channelable> {
        match self {
            Value::Channel(ch) => Some(Channelable::Channel(ch.clone())),
            Value::Vector(vec) => Some(Channelable::Collector(vec.clone())),
            Value::Streamer(s) => Some(Channelable::Streamer(s.clone())),
            _ => None,
        }
    }

    /// Whether `invoke` can dispatch on this value.
    pub fn can_invoke(&self) -> bool {
        matches!(
            self,
            Value::String(_) | Value::Vector(_) | Value::Function(_) | Value::Intrinsic(_)
        )
    }
}

/// The printable form. This is also the machine's equality domain: `jumpne`
/// compares printable forms, so two values are equal exactly when they render
/// the same. Strings render as their raw content, without quotes.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Vector(v) => write!(f, "{v}"),
            Value::Ref(r) => write!(f, "{r}"),
            Value::Env(_) => write!(f, "<env>"),
            Value::Channel(ch) => write!(f, "{ch}"),
            Value::Function(func) => write!(f, "{func}"),
            Value::Intrinsic(i) => write!(f, "{i}"),
            Value::Status(status) => write!(f, "{status}"),
            Value::Placeholder => write!(f, "<placeholder>"),
            Value::Streamer(_) => write!(f, "<streamer>"),
        }
    }
}

/// Builds the conventional crash payload: a vector whose head is a string tag
/// and whose tail is the values involved.
pub fn tagged(tag: &str, values: &[Value]) -> Value {
    let mut out = Vec::with_capacity(values.len() + 1);
    out.push(Value::string(tag));
    out.extend_from_slice(values);
    Value::vector(out)
}

/// A shared, growable vector of values.
///
/// Vectors double as collectors: a vector placed in an output slot accepts
/// channel writes by appending, tracks a writer count, and closes once every
/// writer has detached. `wait-for-close` parks procs here until that happens.
#[derive(Debug, Clone)]
pub struct Vector {
    state: Rc<RefCell<VectorState>>,
}

#[derive(Debug)]
struct VectorState {
    values: Vec<Value>,
    writer_count: usize,
    closed: bool,
    close_waiters: Vec<ProcId>,
}

impl Vector {
    pub fn new(values: Vec<Value>) -> Vector {
        Vector {
            state: Rc::new(RefCell::new(VectorState {
                values,
                writer_count: 0,
                closed: false,
                close_waiters: Vec::new(),
            })),
        }
    }

    pub fn empty() -> Vector {
        Vector::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.state.borrow().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.state.borrow().values.get(index).cloned()
    }

    pub fn push(&self, value: Value) {
        self.state.borrow_mut().values.push(value);
    }

    pub fn push_all(&self, values: &[Value]) {
        self.state
            .borrow_mut()
            .values
            .extend(values.iter().cloned());
    }

    /// Removes and returns the first element.
    pub fn shift(&self) -> Option<Value> {
        let mut state = self.state.borrow_mut();
        if state.values.is_empty() {
            None
        } else {
            Some(state.values.remove(0))
        }
    }

    /// A fresh vector holding copies of the elements from `start` on.
    pub fn tail_from(&self, start: usize) -> Vector {
        Vector::new(self.state.borrow().values[start..].to_vec())
    }

    /// Copies out the current elements.
    pub fn snapshot(&self) -> Vec<Value> {
        self.state.borrow().values.clone()
    }

    pub fn ptr_eq(&self, other: &Vector) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn writer_count(&self) -> usize {
        self.state.borrow().writer_count
    }

    pub(crate) fn add_writer(&self) {
        let mut state = self.state.borrow_mut();
        if !state.closed {
            state.writer_count += 1;
        }
    }

    pub(crate) fn rm_writer(&self) {
        let mut state = self.state.borrow_mut();
        if !state.closed {
            debug_assert!(state.writer_count > 0, "collector writer underflow");
            state.writer_count = state.writer_count.saturating_sub(1);
        }
    }

    /// Registers `pid` to be woken when this collector closes. Returns false
    /// when already closed, in which case the caller should not block.
    pub(crate) fn wait_for_close(&self, pid: ProcId) -> bool {
        let mut state = self.state.borrow_mut();
        if state.closed {
            false
        } else {
            state.close_waiters.push(pid);
            true
        }
    }

    /// Closes the collector if every writer has detached. Returns the procs
    /// waiting on the close, or None when the collector stays open.
    pub(crate) fn try_close(&self) -> Option<Vec<ProcId>> {
        let mut state = self.state.borrow_mut();
        if state.closed || state.writer_count > 0 {
            None
        } else {
            state.closed = true;
            Some(std::mem::take(&mut state.close_waiters))
        }
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.state.borrow().values.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, "]")
    }
}

/// A shared mutable cell. Every environment binding is a ref, so a binding
/// captured by two closures is one cell seen from both.
#[derive(Debug, Clone)]
pub struct Ref {
    cell: Rc<RefCell<Value>>,
}

impl Ref {
    pub fn new(value: Value) -> Ref {
        Ref {
            cell: Rc::new(RefCell::new(value)),
        }
    }

    /// A cell holding the placeholder sentinel, readable only after a set.
    pub fn unset() -> Ref {
        Ref::new(Value::Placeholder)
    }

    pub fn get(&self) -> Value {
        self.cell.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.cell.borrow_mut() = value;
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(*self.cell.borrow(), Value::Placeholder)
    }

    pub fn ptr_eq(&self, other: &Ref) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ref {}>", self.cell.borrow())
    }
}

/// A closure: code address plus the environment it captured. The label is
/// snapshotted at creation so traces can name the function.
#[derive(Debug, Clone)]
pub struct Function {
    pub env: Env,
    pub addr: usize,
    pub label: Option<Rc<str>>,
}

impl Function {
    pub fn new(env: Env, addr: usize, label: Option<&str>) -> Function {
        Function {
            env,
            addr,
            label: label.map(Rc::from),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "<function {label}>"),
            None => write!(f, "<function @{}>", self.addr),
        }
    }
}

/// Outcome of one instruction: either it completed (possibly blocking the
/// proc) or it crashed the proc with a reason value.
pub type Step = Result<(), Crash>;

/// A native operation callable through `invoke`. Runs inline on the caller's
/// frame, no frame of its own.
#[derive(Clone)]
pub struct Intrinsic {
    pub name: &'static str,
    pub handler: crate::runtime::IntrinsicFn,
}

impl fmt::Debug for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intrinsic").field("name", &self.name).finish()
    }
}

impl PartialEq for Intrinsic {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@!{}", self.name)
    }
}

/// Success or failure of the most recent checked operation. `jumpfail`
/// branches on this; `fail` and the comparison intrinsics set it.
#[derive(Debug, Clone)]
pub enum Status {
    Success,
    Fail(Box<Value>),
}

impl Status {
    pub fn fail(reason: Value) -> Status {
        Status::Fail(Box::new(reason))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "<success>"),
            Status::Fail(reason) => write!(f, "<fail {reason}>"),
        }
    }
}

/// A write-only sink that satisfies the channel protocol. Reads are no-ops;
/// writes land on stdout or in a capture buffer.
#[derive(Debug, Clone)]
pub struct Streamer {
    name: &'static str,
    target: StreamTarget,
}

#[derive(Debug, Clone)]
enum StreamTarget {
    Stdout,
    Capture(Rc<RefCell<Vec<Value>>>),
}

impl Streamer {
    pub fn stdout() -> Streamer {
        Streamer {
            name: "stdout",
            target: StreamTarget::Stdout,
        }
    }

    /// A streamer that records writes, plus the handle to read them back.
    pub fn capture() -> (Streamer, Captured) {
        let buffer = Rc::new(RefCell::new(Vec::new()));
        let streamer = Streamer {
            name: "capture",
            target: StreamTarget::Capture(Rc::clone(&buffer)),
        };
        (streamer, Captured { buffer })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn write_all(&self, values: &[Value]) {
        match &self.target {
            StreamTarget::Stdout => {
                for value in values {
                    println!("{value}");
                }
            }
            StreamTarget::Capture(buffer) => {
                buffer.borrow_mut().extend(values.iter().cloned());
            }
        }
    }
}

/// Read side of a capture streamer.
#[derive(Debug, Clone)]
pub struct Captured {
    buffer: Rc<RefCell<Vec<Value>>>,
}

impl Captured {
    pub fn values(&self) -> Vec<Value> {
        self.buffer.borrow().clone()
    }

    /// The captured values in printable form, which is what tests usually
    /// want to compare.
    pub fn rendered(&self) -> Vec<String> {
        self.buffer.borrow().iter().map(Value::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.borrow().is_empty()
    }
}

/// A proc-fatal error carrying its reason value. Crashes unwind the erroring
/// proc only; the machine catches them at the step boundary and marks the
/// proc terminated with a fail status.
#[derive(Debug, Clone)]
pub struct Crash {
    pub reason: Value,
}

impl Crash {
    pub fn new(reason: Value) -> Crash {
        Crash { reason }
    }

    /// Crash with a bare string reason.
    pub fn str(reason: &str) -> Crash {
        Crash::new(Value::string(reason))
    }

    /// Crash with the conventional tagged-vector reason.
    pub fn tagged(tag: &str, values: &[Value]) -> Crash {
        Crash::new(tagged(tag, values))
    }
}

impl fmt::Display for Crash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "crash: {}", self.reason)
    }
}
