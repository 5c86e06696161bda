use runnel::bytecode::builder::{Arg, ProgramBuilder};
use runnel::bytecode::op_code::OpCode::*;
use runnel::runtime::machine::Machine;
use runnel::runtime::proc::ProcState;
use runnel::runtime::value::{Captured, Streamer, Value};

fn run_machine(build: impl FnOnce(&mut ProgramBuilder)) -> (Machine, Captured) {
    let mut b = ProgramBuilder::new();
    build(&mut b);
    let mut machine = Machine::new(b.finish().unwrap());
    let (sink, captured) = Streamer::capture();
    machine.spawn_main(sink).unwrap();
    machine.run().unwrap();
    (machine, captured)
}

/// Emits an invocation of a named binding with constant arguments. Name
/// resolution goes through the calling env, like compiled source would.
fn emit_named_call(b: &mut ProgramBuilder, name: &str, args: &[Value]) {
    b.emit(OpCollection, &[]);
    b.emit(OpConst, &[Arg::Const(Value::string(name))]);
    b.emit(OpCollect, &[]);
    for arg in args {
        b.emit(OpConst, &[Arg::Const(arg.clone())]);
        b.emit(OpCollect, &[]);
    }
    b.emit(OpInvoke, &[]);
}

fn final_status(build: impl FnOnce(&mut ProgramBuilder)) -> String {
    let (machine, _captured) = run_machine(build);
    machine.proc_status(0).to_string()
}

#[test]
fn empty_main_runs_to_done() {
    let (machine, captured) = run_machine(|b| {
        b.label("main");
        b.emit(OpReturn, &[]);
    });
    assert_eq!(machine.proc_state(0), ProcState::Done);
    assert_eq!(machine.ticks(), 1);
    assert!(captured.is_empty());
}

#[test]
fn producer_consumer_pipeline() {
    let (machine, captured) = run_machine(|b| {
        b.label("main");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpChannel, &[]);
        b.emit(OpEnvPipe, &[]);
        b.emit(OpSpawn, &[Arg::Label("producer")]);
        b.emit(OpSpawn, &[Arg::Label("consumer")]);
        b.emit(OpReturn, &[]);

        b.label("producer");
        emit_named_call(b, "put", &[Value::int(1), Value::int(2), Value::int(3)]);
        b.emit(OpReturn, &[]);

        b.label("consumer");
        emit_named_call(b, "get", &[]);
        b.emit(OpJump, &[Arg::Label("consumer")]);
    });

    assert_eq!(captured.rendered(), vec!["1", "2", "3"]);
    for pid in 0..machine.proc_count() {
        assert_eq!(machine.proc_state(pid), ProcState::Done);
    }
}

#[test]
fn two_producers_share_a_channel() {
    // both writers hold the same env, so the channel only closes once the
    // second one finishes
    let (machine, captured) = run_machine(|b| {
        b.label("main");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpChannel, &[]);
        b.emit(OpEnvPipe, &[]);
        b.emit(OpDup, &[]);
        b.emit(OpSpawn, &[Arg::Label("first")]);
        b.emit(OpSpawn, &[Arg::Label("second")]);
        b.emit(OpSpawn, &[Arg::Label("consumer")]);
        b.emit(OpReturn, &[]);

        b.label("first");
        emit_named_call(b, "put", &[Value::string("a")]);
        b.emit(OpReturn, &[]);

        b.label("second");
        emit_named_call(b, "put", &[Value::string("b")]);
        b.emit(OpReturn, &[]);

        b.label("consumer");
        emit_named_call(b, "get", &[]);
        b.emit(OpJump, &[Arg::Label("consumer")]);
    });

    assert_eq!(captured.rendered(), vec!["a", "b"]);
    for pid in 0..machine.proc_count() {
        assert_eq!(machine.proc_state(pid), ProcState::Done);
    }
}

#[test]
fn transfer_stage_re_blocks_and_close_cascades() {
    // producer -> c1 -> transfer -> c2 -> consumer. The transfer proc's
    // reads deliver straight into its output channel, so each resolve
    // re-blocks it as a sender. Closing c1 must tear down the transfer,
    // which closes c2, which tears down the consumer.
    let (machine, captured) = run_machine(|b| {
        b.label("main");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpChannel, &[]);
        b.emit(OpEnvPipe, &[]);
        b.emit(OpSpawn, &[Arg::Label("producer")]);
        b.emit(OpChannel, &[]);
        b.emit(OpEnvPipe, &[]);
        b.emit(OpSpawn, &[Arg::Label("transfer")]);
        b.emit(OpSpawn, &[Arg::Label("consumer")]);
        b.emit(OpReturn, &[]);

        b.label("producer");
        emit_named_call(b, "put", &[Value::int(1), Value::int(2), Value::int(3)]);
        b.emit(OpReturn, &[]);

        b.label("transfer");
        emit_named_call(b, "get", &[]);
        b.emit(OpJump, &[Arg::Label("transfer")]);

        b.label("consumer");
        emit_named_call(b, "get", &[]);
        b.emit(OpJump, &[Arg::Label("consumer")]);
    });

    assert_eq!(captured.rendered(), vec!["1", "2", "3"]);
    for pid in 0..machine.proc_count() {
        assert_eq!(machine.proc_state(pid), ProcState::Done);
    }
}

#[test]
fn arithmetic_flows_to_the_output_slot() {
    let (_machine, captured) = run_machine(|b| {
        b.label("main");
        emit_named_call(b, "add", &[Value::int(1), Value::int(2), Value::int(3)]);
        emit_named_call(b, "sub", &[Value::int(3), Value::int(10)]);
        emit_named_call(b, "mul", &[Value::int(2), Value::int(5)]);
        emit_named_call(b, "div", &[Value::int(4), Value::int(12)]);
        emit_named_call(b, "mod", &[Value::int(5), Value::int(13)]);
        emit_named_call(b, "str", &[Value::string("a"), Value::int(1)]);
        b.emit(OpReturn, &[]);
    });

    assert_eq!(captured.rendered(), vec!["6", "7", "10", "3", "3", "a1"]);
}

#[test]
fn for_spreads_vectors_into_one_write() {
    let (_machine, captured) = run_machine(|b| {
        b.label("main");
        emit_named_call(
            b,
            "for",
            &[
                Value::vector(vec![Value::int(1), Value::int(2)]),
                Value::vector(vec![Value::int(3)]),
            ],
        );
        b.emit(OpReturn, &[]);
    });

    assert_eq!(captured.rendered(), vec!["1", "2", "3"]);
}

#[test]
fn comparison_partials_control_flow() {
    // `[gt 5]` reads "greater than 5": the partial supplies the
    // threshold, the invocation supplies the number under test
    let apply_gt_5 = |b: &mut ProgramBuilder, n: i64| {
        b.emit(OpIntrinsic, &[Arg::Intrinsic("gt")]);
        b.emit(OpConst, &[Arg::Const(Value::int(5))]);
        b.emit(OpVector, &[Arg::Imm(2)]);
        b.emit(OpCollection, &[]);
        b.emit(OpSwap, &[]);
        b.emit(OpCollect, &[]);
        b.emit(OpConst, &[Arg::Const(Value::int(n))]);
        b.emit(OpCollect, &[]);
        b.emit(OpInvoke, &[]);
    };

    let (_machine, captured) = run_machine(|b| {
        b.label("main");
        apply_gt_5(b, 7);
        b.emit(OpLastStatus, &[]);
        b.emit(OpJumpFail, &[Arg::Label("small-first")]);
        emit_named_call(b, "put", &[Value::string("big")]);
        b.emit(OpJump, &[Arg::Label("second")]);
        b.label("small-first");
        emit_named_call(b, "put", &[Value::string("small")]);

        b.label("second");
        apply_gt_5(b, 3);
        b.emit(OpLastStatus, &[]);
        b.emit(OpJumpFail, &[Arg::Label("small-second")]);
        emit_named_call(b, "put", &[Value::string("big")]);
        b.emit(OpReturn, &[]);
        b.label("small-second");
        emit_named_call(b, "put", &[Value::string("small")]);
        b.emit(OpReturn, &[]);
    });

    assert_eq!(captured.rendered(), vec!["big", "small"]);
}

#[test]
fn predicate_statuses() {
    let eq_differs = final_status(|b| {
        b.label("main");
        emit_named_call(b, "eq", &[Value::int(1), Value::int(2)]);
        b.emit(OpReturn, &[]);
    });
    assert_eq!(eq_differs, "<fail [not-equal 1 2]>");

    let eq_same = final_status(|b| {
        b.label("main");
        emit_named_call(b, "eq", &[Value::int(3), Value::int(3)]);
        b.emit(OpReturn, &[]);
    });
    assert_eq!(eq_same, "<success>");

    let lt_holds = final_status(|b| {
        b.label("main");
        emit_named_call(b, "lt", &[Value::int(5), Value::int(3)]);
        b.emit(OpReturn, &[]);
    });
    assert_eq!(lt_holds, "<success>");

    let gt_fails = final_status(|b| {
        b.label("main");
        emit_named_call(b, "gt", &[Value::int(5), Value::int(3)]);
        b.emit(OpReturn, &[]);
    });
    assert_eq!(gt_fails, "<fail [not-greater 5 3]>");
}

#[test]
fn division_by_zero_terminates() {
    let (machine, _captured) = run_machine(|b| {
        b.label("main");
        emit_named_call(b, "div", &[Value::int(0), Value::int(7)]);
    });
    assert_eq!(machine.proc_state(0), ProcState::Terminated);
    assert_eq!(machine.proc_status(0).to_string(), "<fail division-by-zero>");
}

#[test]
fn fail_is_recoverable_within_the_proc() {
    let (machine, captured) = run_machine(|b| {
        b.label("main");
        emit_named_call(b, "fail", &[Value::string("warn")]);
        emit_named_call(b, "put", &[Value::string("after")]);
        b.emit(OpReturn, &[]);
    });
    assert_eq!(captured.rendered(), vec!["after"]);
    assert_eq!(machine.proc_state(0), ProcState::Done);
    assert_eq!(machine.proc_status(0).to_string(), "<fail warn>");
}

#[test]
fn crashes_surface_in_the_run_report() {
    let (machine, captured) = run_machine(|b| {
        b.label("main");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpEnvExtend, &[]);
        b.emit(OpSpawn, &[Arg::Label("doomed")]);
        emit_named_call(b, "put", &[Value::string("survived")]);
        b.emit(OpReturn, &[]);

        b.label("doomed");
        emit_named_call(b, "crash", &[Value::string("boom")]);
        b.emit(OpReturn, &[]);
    });

    assert_eq!(captured.rendered(), vec!["survived"]);
    let report = machine.report();
    assert_eq!(report.procs.len(), 2);
    assert_eq!(report.procs[0].state, "done");
    assert_eq!(report.procs[1].state, "terminated");
    assert_eq!(report.procs[1].status, "<fail boom>");

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"terminated\""));
    assert!(json.contains("\"<fail boom>\""));
}

#[test]
fn embedding_spawns_by_label() {
    let mut b = ProgramBuilder::new();
    b.label("main");
    b.emit(OpReturn, &[]);
    b.label("worker");
    emit_named_call(&mut b, "put", &[Value::string("hi")]);
    b.emit(OpReturn, &[]);

    let mut machine = Machine::new(b.finish().unwrap());
    let (sink, captured) = Streamer::capture();
    let env = machine.base_env().extend();
    env.set_output(0, Value::Streamer(sink));
    machine.spawn_label(env, "worker").unwrap();
    machine.run().unwrap();

    assert_eq!(captured.rendered(), vec!["hi"]);
    assert_eq!(machine.proc_state(0), ProcState::Done);
}
