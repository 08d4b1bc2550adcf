//! Operator precedence and the Pratt rule table.

use crate::lexer::TokenKind;

use super::core::{CompileResult, Compiler};

/// Precedence levels, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    /// The next-tighter level, used for left-associative infix operators.
    pub fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

pub(crate) type ParseFn<'src, 'ctx> = fn(&mut Compiler<'src, 'ctx>, bool) -> CompileResult<()>;

/// One row of the Pratt table.
pub(crate) struct ParseRule<'src, 'ctx> {
    pub prefix: Option<ParseFn<'src, 'ctx>>,
    pub infix: Option<ParseFn<'src, 'ctx>>,
    pub precedence: Precedence,
}

/// The rule for a token type.
pub(crate) fn rule<'src, 'ctx>(kind: TokenKind) -> ParseRule<'src, 'ctx> {
    type Row<'src, 'ctx> = (
        Option<ParseFn<'src, 'ctx>>,
        Option<ParseFn<'src, 'ctx>>,
        Precedence,
    );
    let (prefix, infix, precedence): Row<'src, 'ctx> = match kind {
        TokenKind::LeftParen => (
            Some(Compiler::grouping),
            Some(Compiler::call),
            Precedence::Call,
        ),
        TokenKind::Dot => (None, Some(Compiler::dot), Precedence::Call),
        TokenKind::Minus => (
            Some(Compiler::unary),
            Some(Compiler::binary),
            Precedence::Term,
        ),
        TokenKind::Plus => (None, Some(Compiler::binary), Precedence::Term),
        TokenKind::Slash | TokenKind::Star => {
            (None, Some(Compiler::binary), Precedence::Factor)
        }
        TokenKind::Bang => (Some(Compiler::unary), None, Precedence::None),
        TokenKind::BangEqual | TokenKind::EqualEqual => {
            (None, Some(Compiler::binary), Precedence::Equality)
        }
        TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Less
        | TokenKind::LessEqual => (None, Some(Compiler::binary), Precedence::Comparison),
        TokenKind::Identifier => (Some(Compiler::variable), None, Precedence::None),
        TokenKind::String => (Some(Compiler::string), None, Precedence::None),
        TokenKind::Number => (Some(Compiler::number), None, Precedence::None),
        TokenKind::And => (None, Some(Compiler::and_op), Precedence::And),
        TokenKind::Or => (None, Some(Compiler::or_op), Precedence::Or),
        TokenKind::True | TokenKind::False | TokenKind::Nil => {
            (Some(Compiler::literal), None, Precedence::None)
        }
        TokenKind::This => (Some(Compiler::this_), None, Precedence::None),
        TokenKind::Super => (Some(Compiler::super_), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}
