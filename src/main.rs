use std::{env, path::Path, process};

use runnel::bytecode::{image, program::Program};
use runnel::runtime::machine::Machine;
use runnel::runtime::value::Streamer;

fn main() {
    let mut args: Vec<String> = env::args().collect();
    let trace = args.iter().any(|arg| arg == "--trace") || env_trace();
    let disasm = args.iter().any(|arg| arg == "--disasm");
    let report_json = args.iter().any(|arg| arg == "--report=json");
    let report = report_json || args.iter().any(|arg| arg == "--report");
    if trace {
        args.retain(|arg| arg != "--trace");
    }
    if disasm {
        args.retain(|arg| arg != "--disasm");
    }
    if report {
        args.retain(|arg| arg != "--report" && arg != "--report=json");
    }

    if args.len() < 2 {
        print_help();
        return;
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => {
            print_help();
            return;
        }
        _ => {}
    }

    if let Some(flag) = args[1..].iter().find(|arg| arg.starts_with("--")) {
        eprintln!("Unknown flag: {}", flag);
        process::exit(1);
    }

    let mut program = Program::new();
    for path in &args[1..] {
        if !is_rnc_file(path) {
            eprintln!("Error: file must have .rnc extension: {}", path);
            process::exit(1);
        }
        if let Err(err) = image::load_file(Path::new(path), &mut program) {
            eprintln!("Error loading {}: {}", path, err);
            process::exit(1);
        }
    }

    if disasm {
        print!("{}", program.disassemble());
        return;
    }

    let mut machine = Machine::new(program);
    machine.set_trace(trace);
    if let Err(err) = machine.spawn_main(Streamer::stdout()) {
        eprintln!("{}", err);
        process::exit(1);
    }
    let outcome = machine.run();

    if report {
        print_report(&machine, report_json);
    }

    if let Err(err) = outcome {
        eprintln!("{}", err);
        process::exit(1);
    }
}

fn print_help() {
    println!(
        "\
Runnel VM

Usage:
  runnel <image.rnc> [<image.rnc> ...]

Flags:
  --trace          Print an instruction trace to stderr (also: RUNNEL_TRACE=1)
  --disasm         Print the linked program's disassembly and exit
  --report         Print a per-proc summary after the run
  --report=json    Same, as JSON
  -h, --help       Show this help message

Several images are linked in argument order into one program; execution
starts at the last-loaded main label.
"
    );
}

fn env_trace() -> bool {
    env::var("RUNNEL_TRACE")
        .map(|value| !value.is_empty() && value != "0")
        .unwrap_or(false)
}

fn is_rnc_file(path: &str) -> bool {
    Path::new(path).extension().and_then(|ext| ext.to_str()) == Some("rnc")
}

fn print_report(machine: &Machine, as_json: bool) {
    let report = machine.report();
    if as_json {
        match serde_json::to_string_pretty(&report) {
            Ok(rendered) => println!("{}", rendered),
            Err(err) => eprintln!("Error rendering report: {}", err),
        }
        return;
    }
    println!("ticks: {}", report.ticks);
    println!("procs:");
    for proc in &report.procs {
        println!("  p{} {} {}", proc.id, proc.state, proc.status);
    }
}
