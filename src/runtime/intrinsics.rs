//! The native function registry.
//!
//! Intrinsics are the only way arithmetic, string building and host I/O
//! enter the machine. Each one runs inline on the caller's frame during
//! its step; results leave through output slot 0 in pipe style rather
//! than on the stack.
//!
//! Binary operations curry their arguments: `sub` takes the decremand
//! first, so the partial application `[sub 3]` reads "subtract 3", and
//! `[gt 5]` reads "greater than 5".

use crate::bytecode::symbol::SymbolTable;
use crate::runtime::env::Env;
use crate::runtime::machine::Machine;
use crate::runtime::proc::ProcId;
use crate::runtime::value::{tagged, Crash, Intrinsic, Status, Step, Value};

const REGISTRY: &[Intrinsic] = &[
    Intrinsic {
        name: "put",
        handler: put,
    },
    Intrinsic {
        name: "get",
        handler: get,
    },
    Intrinsic {
        name: "for",
        handler: for_each,
    },
    Intrinsic {
        name: "add",
        handler: add,
    },
    Intrinsic {
        name: "sub",
        handler: sub,
    },
    Intrinsic {
        name: "mul",
        handler: mul,
    },
    Intrinsic {
        name: "div",
        handler: div,
    },
    Intrinsic {
        name: "mod",
        handler: modulo,
    },
    Intrinsic {
        name: "str",
        handler: str_concat,
    },
    Intrinsic {
        name: "eq",
        handler: eq,
    },
    Intrinsic {
        name: "gt",
        handler: gt,
    },
    Intrinsic {
        name: "lt",
        handler: lt,
    },
    Intrinsic {
        name: "fail",
        handler: fail,
    },
    Intrinsic {
        name: "crash",
        handler: crash,
    },
];

/// Looks up a registry entry by name.
pub fn find(name: &str) -> Option<Intrinsic> {
    REGISTRY.iter().find(|i| i.name == name).cloned()
}

/// Interns every intrinsic's name and binds the registry into `base`,
/// so programs can reach intrinsics by plain name lookup.
pub fn install(symbols: &mut SymbolTable, base: &Env) {
    for intrinsic in REGISTRY {
        let sym = symbols.sym(intrinsic.name);
        base.bind(sym, Value::Intrinsic(intrinsic.clone()));
    }
}

fn put(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    machine.put(pid, args.to_vec())
}

fn get(machine: &mut Machine, pid: ProcId, _args: &[Value]) -> Step {
    // Reads cannot block mid-step, so the value is delivered into the
    // output slot's target during a later resolve phase.
    let env = machine.current_env(pid)?;
    let into = env.output(0).ok_or_else(|| Crash::str("no-output"))?;
    machine.get(pid, 1, into)
}

fn for_each(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    let mut values = Vec::new();
    for arg in args {
        match arg {
            Value::Vector(vec) => values.extend(vec.snapshot()),
            other => return Err(Crash::tagged("not-a-vector", &[other.clone()])),
        }
    }
    machine.put(pid, values)
}

fn add(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    let mut total = 0;
    for arg in args {
        total += arg.as_number()?;
    }
    machine.put(pid, vec![Value::int(total)])
}

fn mul(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    let mut total = 1;
    for arg in args {
        total *= arg.as_number()?;
    }
    machine.put(pid, vec![Value::int(total)])
}

fn sub(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    let (decremand, num) = binary(args, "sub")?;
    machine.put(pid, vec![Value::int(num - decremand)])
}

fn div(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    let (den, num) = binary(args, "div")?;
    if den == 0 {
        return Err(Crash::str("division-by-zero"));
    }
    machine.put(pid, vec![Value::int(num / den)])
}

fn modulo(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    let (base, num) = binary(args, "mod")?;
    if base == 0 {
        return Err(Crash::str("division-by-zero"));
    }
    machine.put(pid, vec![Value::int(num % base)])
}

fn str_concat(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    let mut out = String::new();
    for arg in args {
        out.push_str(&arg.to_string());
    }
    machine.put(pid, vec![Value::string(&out)])
}

fn eq(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    let equal = args
        .windows(2)
        .all(|pair| pair[0].to_string() == pair[1].to_string());
    let status = if equal {
        Status::Success
    } else {
        Status::fail(tagged("not-equal", args))
    };
    machine.set_status(pid, status);
    Ok(())
}

fn gt(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    let (than, num) = binary(args, "gt")?;
    let status = if num > than {
        Status::Success
    } else {
        Status::fail(tagged("not-greater", args))
    };
    machine.set_status(pid, status);
    Ok(())
}

fn lt(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    let (than, num) = binary(args, "lt")?;
    let status = if num < than {
        Status::Success
    } else {
        Status::fail(tagged("not-less", args))
    };
    machine.set_status(pid, status);
    Ok(())
}

fn fail(machine: &mut Machine, pid: ProcId, args: &[Value]) -> Step {
    machine.set_status(pid, Status::fail(reason_from(args)));
    Ok(())
}

fn crash(_machine: &mut Machine, _pid: ProcId, args: &[Value]) -> Step {
    Err(Crash::new(reason_from(args)))
}

fn binary(args: &[Value], name: &str) -> Result<(i64, i64), Crash> {
    match args {
        [a, b] => Ok((a.as_number()?, b.as_number()?)),
        _ => Err(Crash::tagged("wrong-arity", &[Value::string(name)])),
    }
}

fn reason_from(args: &[Value]) -> Value {
    match args {
        [single] => single.clone(),
        _ => Value::vector(args.to_vec()),
    }
}
