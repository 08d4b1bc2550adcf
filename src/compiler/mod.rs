//! The single-pass compiler: a Pratt parser over the token stream that
//! resolves variables and emits bytecode as it goes. There is no AST; one
//! walk over the source produces the top-level script function.

mod classes;
mod core;
mod expressions;
mod precedence;
mod statements;
#[cfg(test)]
mod tests;

pub use self::core::{compile, CompileResult, Compiler, FunctionKind};
pub use self::precedence::Precedence;
