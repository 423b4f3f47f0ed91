use std::{env, fs, process::ExitCode, time::Instant};

use burrow::{NoPrint, Session, SessionConfig, StderrTracer, Vm, VmResult};

const USAGE: &str = "usage: burrow <script> [--trace] [--stats] [--quiet]";

#[derive(Debug, Default)]
struct Options {
    script: Option<String>,
    trace: bool,
    stats: bool,
    quiet: bool,
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    let Some(script) = options.script.as_deref() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };
    if let Err(err) = check_file(script) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let mut config = SessionConfig::new();
    if options.trace {
        config = config.tracer(Box::new(StderrTracer::new()));
    }
    if options.quiet {
        config = config.print_writer(Box::new(NoPrint));
    }
    let mut session = Session::new();
    session.open_with(config);
    if let Err(err) = session.register_function(None, "add_ints", add_ints) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }

    let start = Instant::now();
    let result = session.run_script(script);
    let elapsed = start.elapsed();

    if options.stats {
        match serde_json::to_string_pretty(&session.heap_stats()) {
            Ok(json) => eprintln!("{json}"),
            Err(err) => eprintln!("error serializing heap stats: {err}"),
        }
    }
    match result {
        Ok(()) => {
            eprintln!("success after: {elapsed:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error after: {elapsed:?}\n{err}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    for arg in args {
        match arg.as_str() {
            "--trace" => options.trace = true,
            "--stats" => options.stats = true,
            "--quiet" => options.quiet = true,
            flag if flag.starts_with("--") => return Err(format!("unknown option {flag}")),
            path if options.script.is_some() => return Err(format!("unexpected argument {path}")),
            path => options.script = Some(path.to_owned()),
        }
    }
    Ok(options)
}

fn check_file(file_path: &str) -> Result<(), String> {
    match fs::metadata(file_path) {
        Ok(metadata) if metadata.is_file() => Ok(()),
        Ok(_) => Err(format!("{file_path} is not a file")),
        Err(err) => Err(format!("cannot read {file_path}: {err}")),
    }
}

/// `add_ints(a, b)`, available to every script run from the command line.
fn add_ints(vm: &mut Vm) -> VmResult<usize> {
    let sum = vm.get_integer(1)?.wrapping_add(vm.get_integer(2)?);
    vm.push_integer(sum);
    Ok(1)
}
