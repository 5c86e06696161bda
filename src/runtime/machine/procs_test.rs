use crate::bytecode::builder::{Arg, ProgramBuilder};
use crate::bytecode::op_code::OpCode::*;
use crate::runtime::machine::{Machine, MachineError};
use crate::runtime::proc::{ProcId, ProcState};
use crate::runtime::value::{Captured, Streamer, Value};

fn new_machine(build: impl FnOnce(&mut ProgramBuilder)) -> (Machine, Captured, ProcId) {
    let mut b = ProgramBuilder::new();
    build(&mut b);
    let mut machine = Machine::new(b.finish().unwrap());
    let (sink, captured) = Streamer::capture();
    let pid = machine.spawn_main(sink).unwrap();
    (machine, captured, pid)
}

fn emit_put(b: &mut ProgramBuilder, value: Value) {
    b.emit(OpCollection, &[]);
    b.emit(OpIntrinsic, &[Arg::Intrinsic("put")]);
    b.emit(OpCollect, &[]);
    b.emit(OpConst, &[Arg::Const(value)]);
    b.emit(OpCollect, &[]);
    b.emit(OpInvoke, &[]);
}

#[test]
fn one_instruction_per_tick() {
    let (mut machine, _captured, pid) = new_machine(|b| {
        b.label("main");
        b.emit(OpConst, &[Arg::Const(Value::int(1))]);
        b.emit(OpPop, &[]);
        b.emit(OpReturn, &[]);
    });

    machine.run().unwrap();
    assert_eq!(machine.ticks(), 3);
    assert_eq!(machine.proc_state(pid), ProcState::Done);
}

#[test]
fn missing_entry_label() {
    let mut b = ProgramBuilder::new();
    b.label("helper");
    b.emit(OpReturn, &[]);
    let mut machine = Machine::new(b.finish().unwrap());

    let (sink, _captured) = Streamer::capture();
    let err = machine.spawn_main(sink).unwrap_err();
    assert!(matches!(err, MachineError::MissingEntry));
}

#[test]
fn spawn_label_unknown() {
    let mut b = ProgramBuilder::new();
    b.label("main");
    b.emit(OpReturn, &[]);
    let mut machine = Machine::new(b.finish().unwrap());

    let env = machine.base_env().extend();
    let err = machine.spawn_label(env, "nowhere").unwrap_err();
    assert!(matches!(err, MachineError::NoSuchLabel { name } if name == "nowhere"));
}

#[test]
fn spawned_proc_steps_from_the_next_tick() {
    let (mut machine, _captured, main) = new_machine(|b| {
        b.label("main");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpSpawn, &[Arg::Label("worker")]);
        b.emit(OpNoop, &[]);
        b.emit(OpNoop, &[]);
        b.emit(OpReturn, &[]);
        b.label("worker");
        b.emit(OpNoop, &[]);
        b.emit(OpReturn, &[]);
    });

    machine.run().unwrap();
    // main needs 5 ticks; the worker starts after the spawn tick and
    // finishes inside that window
    assert_eq!(machine.ticks(), 5);
    assert_eq!(machine.proc_count(), 2);
    assert_eq!(machine.proc_state(main), ProcState::Done);
    assert_eq!(machine.proc_state(1), ProcState::Done);
}

#[test]
fn tail_calls_keep_frame_depth_flat() {
    let (mut machine, _captured, pid) = new_machine(|b| {
        b.label("main");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpFrame, &[Arg::Label("step1")]);
        b.emit(OpReturn, &[]);
        b.label("step1");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpFrame, &[Arg::Label("step2")]);
        b.emit(OpReturn, &[]);
        b.label("step2");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpFrame, &[Arg::Label("step3")]);
        b.emit(OpReturn, &[]);
        b.label("step3");
        b.emit(OpNoop, &[]);
        b.emit(OpReturn, &[]);
    });

    let mut ticks = 0;
    while !machine.proc_state(pid).is_final() {
        machine.tick();
        assert!(machine.frame_depth(pid) <= 2, "tail call grew the stack");
        ticks += 1;
        assert!(ticks < 100, "program did not finish");
    }
    assert_eq!(machine.proc_state(pid), ProcState::Done);
}

#[test]
fn tail_call_folds_bindings_into_successor() {
    // step1 binds x in its own env, then tail-calls step2 under a fresh
    // unrelated env. The binding must survive the elimination fold.
    let (mut machine, _captured, pid) = new_machine(|b| {
        b.label("main");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpEnvExtend, &[]);
        b.emit(OpFrame, &[Arg::Label("step1")]);
        b.emit(OpReturn, &[]);
        b.label("step1");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpConst, &[Arg::Const(Value::string("kept"))]);
        b.emit(OpLet, &[Arg::Sym("x")]);
        b.emit(OpEnv, &[]);
        b.emit(OpFrame, &[Arg::Label("step2")]);
        b.emit(OpReturn, &[]);
        b.label("step2");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpRef, &[Arg::Sym("x")]);
        b.emit(OpRefGet, &[]);
        b.emit(OpCrash, &[]);
    });

    machine.run().unwrap();
    assert_eq!(machine.proc_state(pid), ProcState::Terminated);
    assert_eq!(machine.proc_status(pid).to_string(), "<fail kept>");
}

#[test]
fn unconditional_compensation_runs_on_return() {
    let (mut machine, captured, pid) = new_machine(|b| {
        b.label("main");
        b.emit(OpCompensate, &[Arg::Label("comp"), Arg::Imm(1)]);
        emit_put(b, Value::string("body"));
        b.emit(OpReturn, &[]);
        b.label("comp");
        emit_put(b, Value::string("after"));
        b.emit(OpReturn, &[]);
    });

    machine.run().unwrap();
    assert_eq!(machine.proc_state(pid), ProcState::Done);
    assert_eq!(captured.rendered(), vec!["body", "after"]);
}

#[test]
fn conditional_compensation_skipped_on_return() {
    let (mut machine, captured, pid) = new_machine(|b| {
        b.label("main");
        b.emit(OpCompensate, &[Arg::Label("comp"), Arg::Imm(0)]);
        emit_put(b, Value::string("body"));
        b.emit(OpReturn, &[]);
        b.label("comp");
        emit_put(b, Value::string("after"));
        b.emit(OpReturn, &[]);
    });

    machine.run().unwrap();
    assert_eq!(machine.proc_state(pid), ProcState::Done);
    assert_eq!(captured.rendered(), vec!["body"]);
}

#[test]
fn crash_terminates_with_fail_status() {
    let (mut machine, _captured, pid) = new_machine(|b| {
        b.label("main");
        b.emit(OpConst, &[Arg::Const(Value::string("boom"))]);
        b.emit(OpCrash, &[]);
        b.emit(OpReturn, &[]);
    });

    machine.run().unwrap();
    assert_eq!(machine.proc_state(pid), ProcState::Terminated);
    assert_eq!(machine.proc_status(pid).to_string(), "<fail boom>");
}

#[test]
fn running_off_the_end_crashes() {
    let (mut machine, _captured, pid) = new_machine(|b| {
        b.label("main");
        b.emit(OpNoop, &[]);
    });

    machine.run().unwrap();
    assert_eq!(machine.proc_state(pid), ProcState::Terminated);
    assert_eq!(
        machine.proc_status(pid).to_string(),
        "<fail pc-out-of-range>"
    );
}

#[test]
fn empty_stack_crashes_instead_of_aborting() {
    let (mut machine, _captured, pid) = new_machine(|b| {
        b.label("main");
        b.emit(OpPop, &[]);
        b.emit(OpReturn, &[]);
    });

    machine.run().unwrap();
    assert_eq!(machine.proc_state(pid), ProcState::Terminated);
    assert_eq!(machine.proc_status(pid).to_string(), "<fail empty-stack>");
}

#[test]
fn fail_intrinsic_sets_status_and_jumpfail_branches() {
    let (mut machine, captured, pid) = new_machine(|b| {
        b.label("main");
        b.emit(OpCollection, &[]);
        b.emit(OpIntrinsic, &[Arg::Intrinsic("fail")]);
        b.emit(OpCollect, &[]);
        b.emit(OpConst, &[Arg::Const(Value::string("nope"))]);
        b.emit(OpCollect, &[]);
        b.emit(OpInvoke, &[]);
        b.emit(OpLastStatus, &[]);
        b.emit(OpJumpFail, &[Arg::Label("caught")]);
        emit_put(b, Value::string("missed"));
        b.emit(OpReturn, &[]);
        b.label("caught");
        emit_put(b, Value::string("caught"));
        b.emit(OpReturn, &[]);
    });

    machine.run().unwrap();
    assert_eq!(machine.proc_state(pid), ProcState::Done);
    assert_eq!(machine.proc_status(pid).to_string(), "<fail nope>");
    assert_eq!(captured.rendered(), vec!["caught"]);
}

#[test]
fn report_lists_every_proc() {
    let (mut machine, _captured, _pid) = new_machine(|b| {
        b.label("main");
        b.emit(OpCurrentEnv, &[]);
        b.emit(OpSpawn, &[Arg::Label("worker")]);
        b.emit(OpReturn, &[]);
        b.label("worker");
        b.emit(OpConst, &[Arg::Const(Value::string("oops"))]);
        b.emit(OpCrash, &[]);
    });

    machine.run().unwrap();
    let report = machine.report();
    assert_eq!(report.procs.len(), 2);
    assert_eq!(report.procs[0].state, "done");
    assert_eq!(report.procs[1].state, "terminated");
    assert_eq!(report.procs[1].status, "<fail oops>");
    assert_eq!(report.ticks, machine.ticks());
}
