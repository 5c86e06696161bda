use crate::runtime::proc::ProcId;
use crate::runtime::value::{Crash, Step, Value, Vector};

use super::Machine;

impl Machine {
    /// Invocation dispatch. Strings resolve through the calling frame's
    /// env and invoke whatever they name; vectors prepend their tail to
    /// the argument list and invoke their head; functions push a frame;
    /// intrinsics run inside the current step.
    pub(crate) fn invoke(&mut self, pid: ProcId, target: Value, args: Vector) -> Step {
        match target {
            Value::String(name) => {
                let sym = self.program.symbols.sym(&name);
                let env = self.frame(pid)?.env.clone();
                let Some(bound) = env.get(sym) else {
                    return Err(Crash::tagged("no-such-function", &[Value::String(name)]));
                };
                self.invoke(pid, bound, args)
            }
            Value::Vector(vec) => {
                let partial = vec.snapshot();
                let Some(head) = partial.first().cloned() else {
                    return Err(Crash::str("empty-invocation"));
                };
                let mut rest = partial[1..].to_vec();
                rest.extend(args.snapshot());
                self.invoke(pid, head, Vector::new(rest))
            }
            Value::Function(func) => {
                let caller = self.frame(pid)?.env.clone();
                let env = caller.extend().merge(&func.env);
                self.push_frame(pid, env, func.addr);
                self.frame_mut(pid)?.push(Value::Vector(args));
                Ok(())
            }
            Value::Intrinsic(intrinsic) => (intrinsic.handler)(self, pid, &args.snapshot()),
            other => Err(Crash::tagged("not-invokable", &[other])),
        }
    }
}
