//! Lox CLI: execute a script file or run the REPL.

use std::env;
use std::path::Path;
use std::process;

use loxide::error::LoxError;

fn print_usage() {
    eprintln!("Usage: lox [script]");
    eprintln!();
    eprintln!("With no arguments, starts an interactive session.");
}

fn run_file(path: &str) {
    if let Err(err) = loxide::run_file(Path::new(path)) {
        let code = match &err {
            // Compile diagnostics were already printed as they were found.
            LoxError::Compile(_) => 65,
            LoxError::Runtime(err) => {
                eprintln!("{}", err);
                70
            }
            LoxError::Io(err) => {
                eprintln!("Could not read \"{}\": {}", path, err);
                74
            }
        };
        process::exit(code);
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => loxide::repl::run(),
        2 => run_file(&args[1]),
        _ => {
            print_usage();
            process::exit(64);
        }
    }
}
