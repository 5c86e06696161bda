use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use runnel::bytecode::builder::{Arg, ProgramBuilder};
use runnel::bytecode::op_code::OpCode::*;
use runnel::bytecode::program::Program;
use runnel::runtime::machine::Machine;
use runnel::runtime::value::{Streamer, Value};

fn emit_call(b: &mut ProgramBuilder, name: &str, args: &[Value]) {
    b.emit(OpCollection, &[]);
    b.emit(OpIntrinsic, &[Arg::Intrinsic(name)]);
    b.emit(OpCollect, &[]);
    for arg in args {
        b.emit(OpConst, &[Arg::Const(arg.clone())]);
        b.emit(OpCollect, &[]);
    }
    b.emit(OpInvoke, &[]);
}

/// A proc that frames into itself forever. Each pass through `spin` sits
/// on a `return` when the next frame is pushed, so the old frame is
/// eliminated and depth stays flat no matter how long it runs.
fn build_spin_program() -> Program {
    let mut b = ProgramBuilder::new();
    b.label("main");
    b.emit(OpCurrentEnv, &[]);
    b.emit(OpFrame, &[Arg::Label("spin")]);
    b.emit(OpReturn, &[]);
    b.label("spin");
    b.emit(OpCurrentEnv, &[]);
    b.emit(OpFrame, &[Arg::Label("spin")]);
    b.emit(OpReturn, &[]);
    b.finish().unwrap()
}

fn build_pipe_program(values: usize) -> Program {
    let ints: Vec<Value> = (0..values).map(|i| Value::int(i as i64)).collect();
    let mut b = ProgramBuilder::new();
    b.label("main");
    b.emit(OpCurrentEnv, &[]);
    b.emit(OpChannel, &[]);
    b.emit(OpEnvPipe, &[]);
    b.emit(OpSpawn, &[Arg::Label("producer")]);
    b.emit(OpSpawn, &[Arg::Label("consumer")]);
    b.emit(OpReturn, &[]);

    b.label("producer");
    emit_call(&mut b, "put", &ints);
    b.emit(OpReturn, &[]);

    b.label("consumer");
    emit_call(&mut b, "get", &[]);
    b.emit(OpJump, &[Arg::Label("consumer")]);
    b.finish().unwrap()
}

fn bench_tail_call_stepping(c: &mut Criterion) {
    let mut group = c.benchmark_group("machine/tail_call_stepping");

    for &ticks in &[1_000usize, 10_000] {
        group.throughput(Throughput::Elements(ticks as u64));
        group.bench_with_input(BenchmarkId::from_parameter(ticks), &ticks, |b, &n| {
            b.iter(|| {
                let mut machine = Machine::new(build_spin_program());
                let (sink, _captured) = Streamer::capture();
                machine.spawn_main(sink).unwrap();
                for _ in 0..n {
                    machine.tick();
                }
                black_box(machine.ticks());
            });
        });
    }

    group.finish();
}

fn bench_pipe_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("machine/pipe_throughput");

    for &values in &[100usize, 1_000] {
        group.throughput(Throughput::Elements(values as u64));
        group.bench_with_input(BenchmarkId::from_parameter(values), &values, |b, &n| {
            b.iter(|| {
                let mut machine = Machine::new(build_pipe_program(n));
                let (sink, captured) = Streamer::capture();
                machine.spawn_main(sink).unwrap();
                machine.run().unwrap();
                black_box(captured.len());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tail_call_stepping, bench_pipe_throughput);
criterion_main!(benches);
