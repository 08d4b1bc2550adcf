//! Interactive line REPL backed by a persistent VM.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::error::LoxError;
use crate::vm::Vm;

const HISTORY_FILE: &str = ".lox_history";

fn history_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(HISTORY_FILE),
        None => PathBuf::from(HISTORY_FILE),
    }
}

/// Run the REPL until EOF. Globals persist across lines; errors are printed
/// and the session continues.
pub fn run() {
    let mut vm = Vm::new();
    let Ok(mut editor) = DefaultEditor::new() else {
        run_basic(&mut vm);
        return;
    };
    let history = history_path();
    let _ = editor.load_history(&history);

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                execute(&mut vm, line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {}", err);
                break;
            }
        }
    }
    let _ = editor.save_history(&history);
}

/// Plain stdin fallback when no terminal editor is available.
fn run_basic(vm: &mut Vm) {
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = line.trim();
                if !line.is_empty() {
                    execute(vm, line);
                }
            }
        }
    }
}

fn execute(vm: &mut Vm, line: &str) {
    match vm.interpret(line) {
        // Compile diagnostics already went to stderr as they were found.
        Ok(()) | Err(LoxError::Compile(_)) => {}
        Err(err) => eprintln!("{}", err),
    }
}
