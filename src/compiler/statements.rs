//! Declarations and statements.

use crate::lexer::TokenKind;
use crate::vm::opcode::Op;

use super::core::{CompileResult, Compiler, FunctionKind};

impl<'src, 'ctx> Compiler<'src, 'ctx> {
    /// Compile one declaration; on error, report it and resynchronize at the
    /// next statement boundary.
    pub(crate) fn declaration(&mut self) {
        let result = if self.matches(TokenKind::Class) {
            self.class_declaration()
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration()
        } else if self.matches(TokenKind::Var) {
            self.var_declaration()
        } else {
            self.statement()
        };
        if let Err(diagnostic) = result {
            self.report(diagnostic);
            self.synchronize();
        }
    }

    pub(crate) fn statement(&mut self) -> CompileResult<()> {
        if self.matches(TokenKind::Print) {
            self.print_statement()
        } else if self.matches(TokenKind::If) {
            self.if_statement()
        } else if self.matches(TokenKind::Return) {
            self.return_statement()
        } else if self.matches(TokenKind::While) {
            self.while_statement()
        } else if self.matches(TokenKind::For) {
            self.for_statement()
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            let result = self.block();
            self.end_scope();
            result
        } else {
            self.expression_statement()
        }
    }

    fn fun_declaration(&mut self) -> CompileResult<()> {
        let global = self.parse_variable("Expect function name.")?;
        // A function may refer to itself; it is initialized before its body.
        self.mark_initialized();
        self.function(FunctionKind::Function)?;
        self.define_variable(global);
        Ok(())
    }

    /// Compile a function body (the name was just consumed) and emit the
    /// closure that builds it.
    pub(crate) fn function(&mut self, kind: FunctionKind) -> CompileResult<()> {
        let lexeme = self.previous.lexeme;
        let name = self.intern(lexeme);
        self.begin_function(kind, Some(name));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.")?;
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.func.function.arity == 255 {
                    return Err(self.error_at_current("Can't have more than 255 parameters."));
                }
                self.func.function.arity += 1;
                let constant = self.parse_variable("Expect parameter name.")?;
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.")?;
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.")?;
        self.block()?;
        self.end_function()
    }

    fn var_declaration(&mut self) -> CompileResult<()> {
        let global = self.parse_variable("Expect variable name.")?;
        if self.matches(TokenKind::Equal) {
            self.expression()?;
        } else {
            self.emit(Op::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.")?;
        self.define_variable(global);
        Ok(())
    }

    pub(crate) fn block(&mut self) -> CompileResult<()> {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.")
    }

    fn print_statement(&mut self) -> CompileResult<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after value.")?;
        self.emit(Op::Print);
        Ok(())
    }

    fn expression_statement(&mut self) -> CompileResult<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
        self.emit(Op::Pop);
        Ok(())
    }

    fn if_statement(&mut self) -> CompileResult<()> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.")?;
        self.expression()?;
        self.consume(TokenKind::RightParen, "Expect ')' after condition.")?;

        let then_jump = self.emit(Op::JumpIfFalse(0));
        self.emit(Op::Pop);
        self.statement()?;
        let else_jump = self.emit(Op::Jump(0));
        self.patch_jump(then_jump)?;
        self.emit(Op::Pop);
        if self.matches(TokenKind::Else) {
            self.statement()?;
        }
        self.patch_jump(else_jump)
    }

    fn return_statement(&mut self) -> CompileResult<()> {
        if self.func.kind == FunctionKind::Script {
            return Err(self.error("Can't return from top-level code."));
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
            Ok(())
        } else {
            if self.func.kind == FunctionKind::Initializer {
                return Err(self.error("Can't return a value from an initializer."));
            }
            self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.")?;
            self.emit(Op::Return);
            Ok(())
        }
    }

    fn while_statement(&mut self) -> CompileResult<()> {
        let loop_start = self.current_offset();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.")?;
        self.expression()?;
        self.consume(TokenKind::RightParen, "Expect ')' after condition.")?;

        let exit_jump = self.emit(Op::JumpIfFalse(0));
        self.emit(Op::Pop);
        self.statement()?;
        self.emit_loop(loop_start)?;

        self.patch_jump(exit_jump)?;
        self.emit(Op::Pop);
        Ok(())
    }

    /// Any of the three clauses may be empty. The increment runs after the
    /// body, so it is compiled out-of-line and the loop rewired through it.
    fn for_statement(&mut self) -> CompileResult<()> {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.")?;
        if self.matches(TokenKind::Semicolon) {
            // No initializer.
        } else if self.matches(TokenKind::Var) {
            self.var_declaration()?;
        } else {
            self.expression_statement()?;
        }

        let mut loop_start = self.current_offset();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.")?;
            exit_jump = Some(self.emit(Op::JumpIfFalse(0)));
            self.emit(Op::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit(Op::Jump(0));
            let increment_start = self.current_offset();
            self.expression()?;
            self.emit(Op::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.")?;

            self.emit_loop(loop_start)?;
            loop_start = increment_start;
            self.patch_jump(body_jump)?;
        }

        self.statement()?;
        self.emit_loop(loop_start)?;

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump)?;
            self.emit(Op::Pop);
        }
        self.end_scope();
        Ok(())
    }
}
