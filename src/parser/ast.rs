//! The syntax tree consumed by the code generator.
//!
//! Nodes only carry what code generation and diagnostics need: names keep
//! their source span and position, literals keep their source text.
use arbitrary::Arbitrary;

use crate::lexer::{Position, Span};

/// An identifier occurrence in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: Box<str>,
    pub span: Span,
    pub pos: Position,
}

impl Ident {
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub items: Vec<Item>,
}

/// Top-level children of a [`Program`]
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// A statement of the implicit main entry
    Main(Stmt),
    Function(FunctionDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Ident,
    /// Parameters, in declaration order
    pub params: Vec<Ident>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Scalar,
    Stack,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub kind: DeclKind,
    pub name: Ident,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionBlock {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Printable {
    Expr(Expr),
    /// A string literal, kept as written (quotes included)
    Text(Box<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDec {
    PreIncrement,
    PostIncrement,
    PreDecrement,
    PostDecrement,
}

impl IncDec {
    pub fn is_increment(self) -> bool {
        matches!(self, Self::PreIncrement | Self::PostIncrement)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declare(Declaration),
    Assign {
        target: Ident,
        value: Expr,
    },
    /// `int x = value;`
    DeclareAssign {
        target: Ident,
        value: Expr,
    },
    /// `if`, any number of `elif`s, then an optional `else`
    If {
        branches: Vec<ConditionBlock>,
        otherwise: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Print(Printable),
    IncDec {
        kind: IncDec,
        target: Ident,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    And,
    Or,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Eq,
    NotEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Arbitrary)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackOpKind {
    Push,
    Pop,
    Peek,
    IsEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Number,
    Boolean,
    String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub kind: LiteralKind,
    pub text: Box<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Variable(Ident),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        name: Ident,
        args: Vec<Expr>,
    },
    Input,
    StackOp {
        kind: StackOpKind,
        target: Ident,
        /// Only present for [`StackOpKind::Push`]
        value: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn number(value: i64) -> Self {
        Self::Literal(Literal {
            kind: LiteralKind::Number,
            text: Box::from(value.to_string()),
        })
    }

    pub fn boolean(value: bool) -> Self {
        Self::Literal(Literal {
            kind: LiteralKind::Boolean,
            text: Box::from(if value { "true" } else { "false" }),
        })
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }
}
