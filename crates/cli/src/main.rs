//! The `lute` binary.
//!
//! With a script argument, reads and interprets the file; with none, runs
//! an interactive prompt against one long-lived VM so globals persist
//! across lines. Exit codes follow the sysexits convention: 65 for compile
//! errors, 70 for runtime errors, 74 for unreadable input, 64 for misuse.

use std::path::{Path, PathBuf};
use std::process;
use std::{env, fs};

use clap::Parser;
use clap::error::ErrorKind;
use lute_runtime::{InterpretError, Vm, VmOptions};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lute")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Lute interpreter - run a script or start an interactive prompt", long_about = None)]
struct Cli {
    /// Script to run; omit to start the interactive prompt
    script: Option<PathBuf>,

    /// Disassemble each function to stderr as it compiles
    #[arg(long)]
    dump_bytecode: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            err.exit();
        }
        Err(err) => {
            let _ = err.print();
            process::exit(64);
        }
    };

    let options = VmOptions {
        stress_gc: env_flag("LUTE_GC_STRESS"),
        trace_execution: env_flag("LUTE_TRACE"),
        print_code: cli.dump_bytecode,
    };
    let mut vm = Vm::with_options(options);

    match cli.script {
        Some(path) => run_file(&mut vm, &path),
        None => repl(&mut vm),
    }
}

fn env_flag(name: &str) -> bool {
    env::var_os(name).is_some_and(|value| !value.is_empty() && value != "0")
}

fn run_file(vm: &mut Vm, path: &Path) -> ! {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(_) => {
            eprintln!("Could not open file \"{}\".", path.display());
            process::exit(74);
        }
    };

    match vm.interpret(&source) {
        Ok(()) => process::exit(0),
        Err(InterpretError::Compile) => process::exit(65),
        Err(InterpretError::Runtime) => process::exit(70),
    }
}

fn repl(vm: &mut Vm) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Could not start line editor: {err}");
            process::exit(74);
        }
    };

    let history = history_path();
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                // Errors were already reported; the prompt carries on.
                let _ = vm.interpret(&line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{err}");
                break;
            }
        }
    }

    if let Some(path) = &history {
        let _ = editor.save_history(path);
    }
}

fn history_path() -> Option<PathBuf> {
    home::home_dir().map(|dir| dir.join(".lute_history"))
}
