//! Runtime values and the process machine.
//!
//! # Sharing Model
//! Heap-backed values are shared handles: vectors, refs, envs and channels
//! wrap `Rc<RefCell>` state, so clones alias one underlying object and
//! mutation through any handle is visible through every other. Env chains
//! can be cyclic (a recursive function is bound inside the env it
//! captures), so nothing in the runtime deep-walks a value graph; display
//! and debug output stay shallow.
use crate::runtime::proc::ProcId;
use crate::runtime::value::{Step, Value};

pub mod channel;
pub mod env;
pub mod frame;
pub mod intrinsics;
pub mod machine;
pub mod proc;
pub mod value;

pub type IntrinsicFn = fn(&mut machine::Machine, ProcId, &[Value]) -> Step;
