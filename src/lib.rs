//! Loxide: a single-pass bytecode compiler and stack-based virtual machine
//! for the Lox language.
//!
//! The scanner turns source text into tokens, the single-pass compiler turns
//! tokens into a top-level function, and the VM wraps that function in a
//! closure, pushes a call frame, and runs the dispatch loop. Heap objects
//! live in an arena swept by a precise mark-and-sweep collector that any
//! allocation may transparently invoke.
//!
//! # Build features
//!
//! - `nan-boxing`: pack values into one 64-bit word instead of a tagged enum
//! - `gc-stress`: collect on every allocation
//! - `gc-log`: log allocations, frees, and collections to stderr
//! - `trace-execution`: print the stack and each instruction while running

#![allow(clippy::module_inception)]

pub mod compiler;
pub mod error;
pub mod lexer;
pub mod repl;
pub mod vm;

pub use error::{CompileError, LoxError, RuntimeError};
pub use vm::{disassemble, Heap, Value, Vm};

/// Execute a source buffer in a fresh VM.
pub fn run(source: &str) -> Result<(), LoxError> {
    let mut vm = Vm::new();
    vm.interpret(source)
}

/// Execute a script file.
pub fn run_file(path: &std::path::Path) -> Result<(), LoxError> {
    let source = std::fs::read_to_string(path)?;
    let mut vm = Vm::new();
    vm.interpret(&source)
}
