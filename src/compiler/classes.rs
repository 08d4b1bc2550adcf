//! Class declarations, methods, and `this`/`super` expressions.

use crate::lexer::TokenKind;
use crate::vm::opcode::Op;

use super::core::{ClassState, CompileResult, Compiler, FunctionKind};

impl<'src, 'ctx> Compiler<'src, 'ctx> {
    pub(crate) fn class_declaration(&mut self) -> CompileResult<()> {
        self.consume(TokenKind::Identifier, "Expect class name.")?;
        let class_name = self.previous.lexeme;
        let name_constant = self.identifier_constant(class_name)?;
        self.declare_variable()?;
        self.emit(Op::Class(name_constant));
        self.define_variable(name_constant);

        let enclosing = self.class.take();
        self.class = Some(Box::new(ClassState {
            enclosing,
            has_superclass: false,
        }));

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.")?;
            self.variable(false)?;
            if class_name == self.previous.lexeme {
                return Err(self.error("A class can't inherit from itself."));
            }
            // The superclass value becomes a scoped local named "super".
            self.begin_scope();
            self.add_local("super")?;
            self.define_variable(0);

            self.named_variable(class_name, false)?;
            self.emit(Op::Inherit);
            self.class
                .as_mut()
                .expect("class context was just pushed")
                .has_superclass = true;
        }

        // The class sits on the stack while its methods are bound.
        self.named_variable(class_name, false)?;
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.")?;
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method()?;
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.")?;
        self.emit(Op::Pop);

        let has_superclass = self
            .class
            .as_ref()
            .expect("class context was just pushed")
            .has_superclass;
        if has_superclass {
            self.end_scope();
        }
        self.class = self
            .class
            .take()
            .expect("class context was just pushed")
            .enclosing;
        Ok(())
    }

    fn method(&mut self) -> CompileResult<()> {
        self.consume(TokenKind::Identifier, "Expect method name.")?;
        let name = self.previous.lexeme;
        let constant = self.identifier_constant(name)?;
        let kind = if name == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind)?;
        self.emit(Op::Method(constant));
        Ok(())
    }

    pub(crate) fn dot(&mut self, can_assign: bool) -> CompileResult<()> {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.")?;
        let name = self.previous.lexeme;
        let constant = self.identifier_constant(name)?;

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression()?;
            self.emit(Op::SetProperty(constant));
        } else if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list()?;
            self.emit(Op::Invoke(constant, argc));
        } else {
            self.emit(Op::GetProperty(constant));
        }
        Ok(())
    }

    pub(crate) fn this_(&mut self, _can_assign: bool) -> CompileResult<()> {
        if self.class.is_none() {
            return Err(self.error("Can't use 'this' outside of a class."));
        }
        self.named_variable("this", false)
    }

    pub(crate) fn super_(&mut self, _can_assign: bool) -> CompileResult<()> {
        match self.class.as_ref() {
            None => return Err(self.error("Can't use 'super' outside of a class.")),
            Some(class) if !class.has_superclass => {
                return Err(self.error("Can't use 'super' in a class with no superclass."));
            }
            Some(_) => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.")?;
        self.consume(TokenKind::Identifier, "Expect superclass method name.")?;
        let name = self.previous.lexeme;
        let constant = self.identifier_constant(name)?;

        self.named_variable("this", false)?;
        if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list()?;
            self.named_variable("super", false)?;
            self.emit(Op::SuperInvoke(constant, argc));
        } else {
            self.named_variable("super", false)?;
            self.emit(Op::GetSuper(constant));
        }
        Ok(())
    }
}
