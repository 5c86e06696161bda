use crate::bytecode::inst::Inst;
use crate::bytecode::op_code::OpCode;
use crate::bytecode::symbol::Sym;
use crate::runtime::env::Env;
use crate::runtime::frame::Frame;
use crate::runtime::intrinsics;
use crate::runtime::proc::ProcId;
use crate::runtime::value::{Crash, Function, Step, Value};

use super::Machine;

impl Machine {
    pub(super) fn frame(&self, pid: ProcId) -> Result<&Frame, Crash> {
        self.procs[pid]
            .current_frame()
            .ok_or_else(|| Crash::str("no-frame"))
    }

    pub(super) fn frame_mut(&mut self, pid: ProcId) -> Result<&mut Frame, Crash> {
        self.procs[pid]
            .current_frame_mut()
            .ok_or_else(|| Crash::str("no-frame"))
    }

    /// Executes one decoded instruction for `pid`. The frame's pc has
    /// already moved past the instruction, so jumps just overwrite it.
    pub(super) fn run_action(&mut self, pid: ProcId, inst: &Inst) -> Step {
        match inst.op {
            OpCode::OpPop => {
                self.frame_mut(pid)?.pop()?;
                Ok(())
            }
            OpCode::OpNoop => Ok(()),
            OpCode::OpSwap => {
                let frame = self.frame_mut(pid)?;
                let x = frame.pop()?;
                let y = frame.pop()?;
                frame.push(x);
                frame.push(y);
                Ok(())
            }
            OpCode::OpDup => {
                let frame = self.frame_mut(pid)?;
                let top = frame.top()?;
                frame.push(top);
                Ok(())
            }
            OpCode::OpClear => {
                self.frame_mut(pid)?.clear_to_bottom();
                Ok(())
            }
            OpCode::OpConst => {
                let value = self
                    .program
                    .constants
                    .get(inst.arg(0))
                    .cloned()
                    .ok_or_else(|| Crash::str("bad-const"))?;
                self.frame_mut(pid)?.push(value);
                Ok(())
            }
            OpCode::OpVector => {
                let count = inst.arg(0);
                let frame = self.frame_mut(pid)?;
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(frame.pop()?);
                }
                // popped newest-first; the vector reads in push order
                values.reverse();
                frame.push(Value::vector(values));
                Ok(())
            }
            OpCode::OpCollection => {
                self.frame_mut(pid)?.push(Value::vector(Vec::new()));
                Ok(())
            }
            OpCode::OpCollect => {
                let frame = self.frame_mut(pid)?;
                let value = frame.pop()?;
                let collection = frame.top_vec()?;
                collection.push(value);
                Ok(())
            }
            OpCode::OpIndex => {
                let idx = inst.arg(0);
                let frame = self.frame_mut(pid)?;
                let source = frame.pop_vec()?;
                let Some(value) = source.get(idx) else {
                    panic!("index {idx} out of range for vector of {}", source.len());
                };
                frame.push(value);
                Ok(())
            }
            OpCode::OpRest => {
                let size = inst.arg(0);
                let frame = self.frame_mut(pid)?;
                let source = frame.pop_vec()?;
                assert!(
                    size <= source.len(),
                    "rest {size} out of range for vector of {}",
                    source.len()
                );
                frame.push(Value::Vector(source.tail_from(size)));
                Ok(())
            }
            OpCode::OpSize => {
                let frame = self.frame_mut(pid)?;
                let source = frame.pop_vec()?;
                frame.push(Value::int(source.len() as i64));
                Ok(())
            }
            OpCode::OpTypeof => {
                let frame = self.frame_mut(pid)?;
                let value = frame.pop()?;
                frame.push(Value::string(value.type_name()));
                Ok(())
            }
            OpCode::OpLet => {
                let sym = Sym(inst.arg(0) as u32);
                let frame = self.frame_mut(pid)?;
                let value = frame.pop()?;
                let env = frame.pop_env()?;
                env.bind(sym, value);
                Ok(())
            }
            OpCode::OpRef => {
                let sym = Sym(inst.arg(0) as u32);
                let env = self.frame_mut(pid)?.pop_env()?;
                match env.lookup_ref(sym) {
                    Some(cell) => {
                        self.frame_mut(pid)?.push(Value::Ref(cell));
                        Ok(())
                    }
                    None => {
                        let name = self.program.symbols.revsym(sym);
                        Err(Crash::tagged(
                            "missing-key",
                            &[Value::Env(env), Value::string(name)],
                        ))
                    }
                }
            }
            OpCode::OpDynamicRef => {
                let (lookup, env) = {
                    let frame = self.frame_mut(pid)?;
                    let lookup = frame.pop_string()?;
                    let env = frame.pop_env()?;
                    (lookup, env)
                };
                let sym = self.program.symbols.sym(&lookup);
                let cell = match env.lookup_ref(sym) {
                    Some(cell) => cell,
                    None => env.bind(sym, Value::Placeholder),
                };
                self.frame_mut(pid)?.push(Value::Ref(cell));
                Ok(())
            }
            OpCode::OpRefGet => {
                let frame = self.frame_mut(pid)?;
                let cell = frame.pop_ref()?;
                if cell.is_placeholder() {
                    return Err(Crash::tagged("uninitialized-ref", &[Value::Ref(cell)]));
                }
                frame.push(cell.get());
                Ok(())
            }
            OpCode::OpRefSet => {
                let frame = self.frame_mut(pid)?;
                let value = frame.pop()?;
                let cell = frame.pop_ref()?;
                cell.set(value);
                Ok(())
            }
            OpCode::OpEnv => {
                self.frame_mut(pid)?.push(Value::Env(Env::root()));
                Ok(())
            }
            OpCode::OpCurrentEnv => {
                let frame = self.frame_mut(pid)?;
                let env = frame.env.clone();
                frame.push(Value::Env(env));
                Ok(())
            }
            OpCode::OpEnvExtend => {
                let frame = self.frame_mut(pid)?;
                let env = frame.pop_env()?;
                frame.push(Value::Env(env.extend()));
                Ok(())
            }
            OpCode::OpEnvUnhinge => {
                let frame = self.frame_mut(pid)?;
                let env = frame.pop_env()?;
                frame.push(Value::Env(env.unhinge()));
                Ok(())
            }
            OpCode::OpEnvCollect => {
                let frame = self.frame_mut(pid)?;
                let env = frame.pop_env()?;
                let collection = frame.pop_vec()?;
                env.set_output(0, Value::Vector(collection.clone()));
                frame.push(Value::Vector(collection));
                frame.push(Value::Env(env));
                Ok(())
            }
            OpCode::OpEnvPipe => {
                let frame = self.frame_mut(pid)?;
                let channel = frame.pop_channel()?;
                let env = frame.pop_env()?;
                let producer = env.extend();
                producer.set_output(0, channel.as_value());
                let consumer = env.extend();
                consumer.set_input(0, channel.as_value());
                frame.push(Value::Env(consumer));
                frame.push(Value::Env(producer));
                Ok(())
            }
            OpCode::OpEnvSetInput => {
                let idx = inst.arg(0);
                let frame = self.frame_mut(pid)?;
                let channel = frame.pop_channel()?;
                let env = frame.pop_env()?;
                env.set_input(idx, channel.as_value());
                Ok(())
            }
            OpCode::OpEnvSetOutput => {
                let idx = inst.arg(0);
                let frame = self.frame_mut(pid)?;
                let channel = frame.pop_channel()?;
                let env = frame.pop_env()?;
                env.set_output(idx, channel.as_value());
                Ok(())
            }
            OpCode::OpJump => {
                self.frame_mut(pid)?.pc = inst.arg(0);
                Ok(())
            }
            OpCode::OpJumpNe => {
                let frame = self.frame_mut(pid)?;
                let lhs = frame.pop()?;
                let rhs = frame.pop()?;
                if lhs.to_string() != rhs.to_string() {
                    frame.pc = inst.arg(0);
                }
                Ok(())
            }
            OpCode::OpJumpLt => {
                let frame = self.frame_mut(pid)?;
                let limit = frame.pop_number()?;
                let value = frame.pop_number()?;
                if value < limit {
                    frame.pc = inst.arg(0);
                }
                Ok(())
            }
            OpCode::OpJumpFail => {
                let frame = self.frame_mut(pid)?;
                let status = frame.pop_status()?;
                if !status.is_success() {
                    frame.pc = inst.arg(0);
                }
                Ok(())
            }
            OpCode::OpFrame => {
                let env = self.frame_mut(pid)?.pop_env()?;
                self.push_frame(pid, env, inst.arg(0));
                Ok(())
            }
            OpCode::OpReturn => {
                self.do_return(pid);
                Ok(())
            }
            OpCode::OpSpawn => {
                let env = self.frame_mut(pid)?.pop_env()?;
                self.spawn(env, inst.arg(0));
                Ok(())
            }
            OpCode::OpInvoke => {
                let collection = self.frame_mut(pid)?.pop_vec()?;
                let Some(invokee) = collection.shift() else {
                    return Err(Crash::str("empty-invocation"));
                };
                self.invoke(pid, invokee, collection)
            }
            OpCode::OpClosure => {
                let addr = inst.arg(0);
                let label = self.program.labels.at_addr(addr).map(|l| l.name.clone());
                let frame = self.frame_mut(pid)?;
                let env = frame.pop_env()?;
                frame.push(Value::Function(Function::new(env, addr, label.as_deref())));
                Ok(())
            }
            OpCode::OpIntrinsic => {
                let sym = Sym(inst.arg(0) as u32);
                let name = self.program.symbols.revsym(sym).to_string();
                match intrinsics::find(&name) {
                    Some(intrinsic) => {
                        self.frame_mut(pid)?.push(Value::Intrinsic(intrinsic));
                        Ok(())
                    }
                    None => Err(Crash::tagged("unknown-intrinsic", &[Value::string(&name)])),
                }
            }
            OpCode::OpChannel => {
                let channel = self.make_channel();
                self.frame_mut(pid)?.push(Value::Channel(channel));
                Ok(())
            }
            OpCode::OpWaitForClose => {
                let collection = self.frame(pid)?.top_vec()?;
                if collection.wait_for_close(pid) {
                    self.watch_collector(collection);
                    self.procs[pid].set_waiting();
                }
                Ok(())
            }
            OpCode::OpCrash => {
                let reason = self.frame_mut(pid)?.pop()?;
                Err(Crash::new(reason))
            }
            OpCode::OpLastStatus => {
                let status = self.procs[pid].status.clone();
                self.frame_mut(pid)?.push(Value::Status(status));
                Ok(())
            }
            OpCode::OpCompensate => {
                let addr = inst.arg(0);
                let unconditional = inst.arg(1) == 1;
                self.frame_mut(pid)?.add_compensation(addr, unconditional);
                Ok(())
            }
        }
    }
}
