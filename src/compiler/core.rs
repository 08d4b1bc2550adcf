//! Compiler state: the parser driver, function nesting, and scope tracking.

use std::collections::HashMap;
use std::mem;

use crate::error::CompileError;
use crate::lexer::{Scanner, Token, TokenKind};
use crate::vm::heap::Heap;
use crate::vm::object::{Obj, ObjFunction, UpvalueDescriptor};
use crate::vm::opcode::Op;
use crate::vm::value::{ObjRef, Value};

use super::precedence::{rule, Precedence};

/// Result type for parse functions; the error is reported (and the parser
/// resynchronized) at statement level.
pub type CompileResult<T> = Result<T, Diagnostic>;

/// Locals and upvalues are addressed by a single byte.
pub(crate) const MAX_LOCALS: usize = 256;
pub(crate) const MAX_UPVALUES: usize = 256;

/// An error anchored to a token, not yet formatted.
#[derive(Debug)]
pub struct Diagnostic {
    line: usize,
    at: At,
    message: String,
}

#[derive(Debug)]
enum At {
    Token(String),
    End,
    Nowhere,
}

impl Diagnostic {
    fn at_token(token: Token<'_>, message: &str) -> Self {
        let at = if token.kind == TokenKind::Eof {
            At::End
        } else {
            At::Token(token.lexeme.to_string())
        };
        Self {
            line: token.line,
            at,
            message: message.to_string(),
        }
    }

    fn bare(line: usize, message: String) -> Self {
        Self {
            line,
            at: At::Nowhere,
            message,
        }
    }

    fn format(&self) -> String {
        match &self.at {
            At::Token(lexeme) => {
                format!("[line {}] Error at '{}': {}", self.line, lexeme, self.message)
            }
            At::End => format!("[line {}] Error at end: {}", self.line, self.message),
            At::Nowhere => format!("[line {}] Error: {}", self.line, self.message),
        }
    }
}

/// What kind of function is being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// A local variable tracked during compilation. Depth -1 marks a variable
/// that is declared but not yet initialized.
#[derive(Debug)]
pub(crate) struct Local {
    pub name: String,
    pub depth: i32,
    pub is_captured: bool,
}

/// Per-function compilation state. Nested function declarations push a new
/// state; the enclosing chain is what the collector walks for roots.
pub(crate) struct FunctionState {
    pub enclosing: Option<Box<FunctionState>>,
    pub function: ObjFunction,
    pub kind: FunctionKind,
    pub locals: Vec<Local>,
    pub scope_depth: i32,
}

impl FunctionState {
    pub(crate) fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        // Slot 0 belongs to the callee; methods see it as `this`.
        let reserved = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        Self {
            enclosing: None,
            function: ObjFunction::new(name),
            kind,
            locals: vec![Local {
                name: reserved.to_string(),
                depth: 0,
                is_captured: false,
            }],
            scope_depth: 0,
        }
    }

    /// Find a local by name, scanning innermost-first.
    pub(crate) fn resolve_local(&self, name: &str) -> Result<Option<u8>, &'static str> {
        for (i, local) in self.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err("Can't read local variable in its own initializer.");
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    /// Find (or create) an upvalue for a variable owned by an enclosing
    /// function, marking the captured local along the way.
    pub(crate) fn resolve_upvalue(&mut self, name: &str) -> Result<Option<u8>, &'static str> {
        let captured = match self.enclosing.as_mut() {
            None => return Ok(None),
            Some(enclosing) => {
                if let Some(local) = enclosing.resolve_local(name)? {
                    enclosing.locals[local as usize].is_captured = true;
                    Some((local, true))
                } else if let Some(upvalue) = enclosing.resolve_upvalue(name)? {
                    Some((upvalue, false))
                } else {
                    None
                }
            }
        };
        match captured {
            Some((index, is_local)) => self.add_upvalue(index, is_local).map(Some),
            None => Ok(None),
        }
    }

    fn add_upvalue(&mut self, index: u8, is_local: bool) -> Result<u8, &'static str> {
        for (i, upvalue) in self.function.upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return Ok(i as u8);
            }
        }
        if self.function.upvalues.len() >= MAX_UPVALUES {
            return Err("Too many closure variables in function.");
        }
        self.function.upvalues.push(UpvalueDescriptor { index, is_local });
        Ok((self.function.upvalues.len() - 1) as u8)
    }
}

/// Class context chain, for `this`/`super` validity checks.
pub(crate) struct ClassState {
    pub enclosing: Option<Box<ClassState>>,
    pub has_superclass: bool,
}

/// Compile one source buffer to a top-level script function.
///
/// Diagnostics go to stderr as they are found; the parser keeps walking to
/// EOF so it can report as many as possible, and returns them all when
/// compilation failed. The globals table is only read, as a GC root.
pub fn compile(
    source: &str,
    heap: &mut Heap,
    globals: &HashMap<ObjRef, Value>,
) -> Result<ObjRef, CompileError> {
    let mut compiler = Compiler::new(source, heap, globals);
    compiler.advance();
    while !compiler.matches(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.finish()
}

/// The single-pass compiler: parses tokens, resolves variables, and emits
/// bytecode into the current function's chunk, all in one walk.
pub struct Compiler<'src, 'ctx> {
    scanner: Scanner<'src>,
    pub(crate) current: Token<'src>,
    pub(crate) previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<String>,
    heap: &'ctx mut Heap,
    globals: &'ctx HashMap<ObjRef, Value>,
    pub(crate) func: FunctionState,
    pub(crate) class: Option<Box<ClassState>>,
}

impl<'src, 'ctx> Compiler<'src, 'ctx> {
    fn new(
        source: &'src str,
        heap: &'ctx mut Heap,
        globals: &'ctx HashMap<ObjRef, Value>,
    ) -> Self {
        Self {
            scanner: Scanner::new(source),
            current: Token::eof(1),
            previous: Token::eof(1),
            had_error: false,
            panic_mode: false,
            diagnostics: Vec::new(),
            heap,
            globals,
            func: FunctionState::new(FunctionKind::Script, None),
            class: None,
        }
    }

    fn finish(mut self) -> Result<ObjRef, CompileError> {
        self.emit_return();
        if self.had_error {
            return Err(CompileError::new(self.diagnostics));
        }
        self.maybe_collect();
        let Compiler { heap, func, .. } = self;
        Ok(heap.allocate(Obj::Function(func.function)))
    }

    // --- Token flow ---

    pub(crate) fn advance(&mut self) {
        self.previous = self.current;
        loop {
            match self.scanner.scan_token() {
                Ok(token) => {
                    self.current = token;
                    break;
                }
                Err(err) => {
                    let diagnostic = Diagnostic::bare(err.line(), err.to_string());
                    self.report(diagnostic);
                }
            }
        }
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    pub(crate) fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn consume(&mut self, kind: TokenKind, message: &str) -> CompileResult<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_at_current(message))
        }
    }

    // --- Errors ---

    pub(crate) fn error(&self, message: &str) -> Diagnostic {
        Diagnostic::at_token(self.previous, message)
    }

    pub(crate) fn error_at_current(&self, message: &str) -> Diagnostic {
        Diagnostic::at_token(self.current, message)
    }

    /// Print and record a diagnostic. While panicking, further diagnostics
    /// are swallowed until the parser resynchronizes.
    pub(crate) fn report(&mut self, diagnostic: Diagnostic) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let formatted = diagnostic.format();
        eprintln!("{}", formatted);
        self.diagnostics.push(formatted);
    }

    /// Skip tokens until a statement boundary.
    pub(crate) fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // --- Emitting ---

    pub(crate) fn emit(&mut self, op: Op) -> usize {
        let line = self.previous.line;
        self.func.function.chunk.emit(op, line)
    }

    pub(crate) fn emit_return(&mut self) {
        if self.func.kind == FunctionKind::Initializer {
            self.emit(Op::GetLocal(0));
        } else {
            self.emit(Op::Nil);
        }
        self.emit(Op::Return);
    }

    pub(crate) fn make_constant(&mut self, value: Value) -> CompileResult<u8> {
        self.func
            .function
            .chunk
            .add_constant(value)
            .ok_or_else(|| self.error("Too many constants in one chunk."))
    }

    pub(crate) fn emit_constant(&mut self, value: Value) -> CompileResult<()> {
        let idx = self.make_constant(value)?;
        self.emit(Op::Constant(idx));
        Ok(())
    }

    pub(crate) fn patch_jump(&mut self, offset: usize) -> CompileResult<()> {
        self.func
            .function
            .chunk
            .patch_jump(offset)
            .map_err(|()| self.error("Too much code to jump over."))
    }

    pub(crate) fn emit_loop(&mut self, loop_start: usize) -> CompileResult<()> {
        let offset = self.current_offset() - loop_start + 1;
        if offset > u16::MAX as usize {
            return Err(self.error("Loop body too large."));
        }
        self.emit(Op::Loop(offset as u16));
        Ok(())
    }

    pub(crate) fn current_offset(&self) -> usize {
        self.func.function.chunk.len()
    }

    // --- Heap access ---

    pub(crate) fn intern(&mut self, text: &str) -> ObjRef {
        self.maybe_collect();
        self.heap.intern(text)
    }

    pub(crate) fn identifier_constant(&mut self, name: &str) -> CompileResult<u8> {
        let handle = self.intern(name);
        self.make_constant(Value::obj(handle))
    }

    /// Run a pending collection with the compiler's roots: every in-progress
    /// function along the enclosing chain (name and constants) and the VM's
    /// globals table.
    fn maybe_collect(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        let func = &self.func;
        let globals = self.globals;
        self.heap.collect(|marker| {
            let mut state = Some(func);
            while let Some(f) = state {
                if let Some(name) = f.function.name {
                    marker.mark_object(name);
                }
                for &constant in &f.function.chunk.constants {
                    marker.mark_value(constant);
                }
                state = f.enclosing.as_deref();
            }
            for (&name, &value) in globals {
                marker.mark_object(name);
                marker.mark_value(value);
            }
        });
    }

    // --- Scopes & variables ---

    pub(crate) fn begin_scope(&mut self) {
        self.func.scope_depth += 1;
    }

    pub(crate) fn end_scope(&mut self) {
        self.func.scope_depth -= 1;
        while matches!(self.func.locals.last(), Some(l) if l.depth > self.func.scope_depth) {
            let captured = self.func.locals.pop().expect("local was just checked").is_captured;
            self.emit(if captured { Op::CloseUpvalue } else { Op::Pop });
        }
    }

    /// Consume an identifier and declare it; returns the name's constant
    /// index at global scope, 0 for locals.
    pub(crate) fn parse_variable(&mut self, message: &str) -> CompileResult<u8> {
        self.consume(TokenKind::Identifier, message)?;
        self.declare_variable()?;
        if self.func.scope_depth > 0 {
            return Ok(0);
        }
        let name = self.previous.lexeme;
        self.identifier_constant(name)
    }

    pub(crate) fn declare_variable(&mut self) -> CompileResult<()> {
        if self.func.scope_depth == 0 {
            return Ok(());
        }
        let name = self.previous.lexeme;
        for local in self.func.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.func.scope_depth {
                break;
            }
            if local.name == name {
                return Err(self.error("Already a variable with this name in this scope."));
            }
        }
        self.add_local(name)
    }

    pub(crate) fn add_local(&mut self, name: &str) -> CompileResult<()> {
        if self.func.locals.len() >= MAX_LOCALS {
            return Err(self.error("Too many local variables in function."));
        }
        self.func.locals.push(Local {
            name: name.to_string(),
            depth: -1,
            is_captured: false,
        });
        Ok(())
    }

    pub(crate) fn mark_initialized(&mut self) {
        if self.func.scope_depth == 0 {
            return;
        }
        let depth = self.func.scope_depth;
        self.func
            .locals
            .last_mut()
            .expect("no local to initialize")
            .depth = depth;
    }

    pub(crate) fn define_variable(&mut self, global: u8) {
        if self.func.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit(Op::DefineGlobal(global));
    }

    /// Emit the load or store for a name, resolving local, then upvalue,
    /// then global.
    pub(crate) fn named_variable(&mut self, name: &str, can_assign: bool) -> CompileResult<()> {
        let (get_op, set_op) = match self.func.resolve_local(name) {
            Err(message) => return Err(self.error(message)),
            Ok(Some(slot)) => (Op::GetLocal(slot), Op::SetLocal(slot)),
            Ok(None) => match self.func.resolve_upvalue(name) {
                Err(message) => return Err(self.error(message)),
                Ok(Some(idx)) => (Op::GetUpvalue(idx), Op::SetUpvalue(idx)),
                Ok(None) => {
                    let idx = self.identifier_constant(name)?;
                    (Op::GetGlobal(idx), Op::SetGlobal(idx))
                }
            },
        };
        if can_assign && self.matches(TokenKind::Equal) {
            self.expression()?;
            self.emit(set_op);
        } else {
            self.emit(get_op);
        }
        Ok(())
    }

    // --- Function nesting ---

    pub(crate) fn begin_function(&mut self, kind: FunctionKind, name: Option<ObjRef>) {
        let state = FunctionState::new(kind, name);
        let enclosing = mem::replace(&mut self.func, state);
        self.func.enclosing = Some(Box::new(enclosing));
    }

    /// Close out the current function: allocate it, restore the enclosing
    /// state, and emit the closure that builds it at runtime.
    pub(crate) fn end_function(&mut self) -> CompileResult<()> {
        self.emit_return();
        // Collect while the finished function is still on the root chain.
        self.maybe_collect();
        let enclosing = self
            .func
            .enclosing
            .take()
            .expect("ending a function with no enclosing compiler");
        let state = mem::replace(&mut self.func, *enclosing);
        let function = self.heap.allocate(Obj::Function(state.function));
        let constant = self.make_constant(Value::obj(function))?;
        self.emit(Op::Closure(constant));
        Ok(())
    }

    // --- Pratt driver ---

    pub(crate) fn expression(&mut self) -> CompileResult<()> {
        self.parse_precedence(Precedence::Assignment)
    }

    pub(crate) fn parse_precedence(&mut self, precedence: Precedence) -> CompileResult<()> {
        self.advance();
        let Some(prefix) = rule(self.previous.kind).prefix else {
            return Err(self.error("Expect expression."));
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign)?;

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            let infix = rule(self.previous.kind)
                .infix
                .expect("token with a precedence has an infix rule");
            infix(self, can_assign)?;
        }

        if can_assign && self.matches(TokenKind::Equal) {
            return Err(self.error("Invalid assignment target."));
        }
        Ok(())
    }
}
