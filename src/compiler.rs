//! Compile Bitsy source into textual stack machine instructions.
//!
//! For example:
//!
//! ```text
//! int x; x = 1;
//! while(x < 3) { print(x); x++; }
//! ```
//!
//! compiles to
//!
//! ```text
//! PUSH 1
//! STORE x
//! LABEL .L2
//! LOAD x
//! PUSH 3
//! ISGE
//! NOT
//! JIF .L1
//! LOAD x
//! PRINT
//! LOAD x
//! PUSH 1
//! ADD
//! STORE x
//! JMP .L2
//! LABEL .L1
//! HALT
//! ```
//!
//! The generator checks names as it goes: every scalar and stack name must be
//! declared before use, and may only be declared once.
pub mod codegen;
pub mod environment;

use crate::lexer::{Position, Span};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("{pos} undeclared variable <{name}>")]
    UndeclaredVariable {
        name: Box<str>,
        pos: Position,
        span: Span,
    },
    #[error("{pos} variable already defined: <{name}>")]
    VariableAlreadyDefined {
        name: Box<str>,
        pos: Position,
        span: Span,
    },
    #[error("{pos} function already defined: <{name}>")]
    FunctionAlreadyDefined {
        name: Box<str>,
        pos: Position,
        span: Span,
    },
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            Self::UndeclaredVariable { span, .. }
            | Self::VariableAlreadyDefined { span, .. }
            | Self::FunctionAlreadyDefined { span, .. } => span.clone(),
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Self::UndeclaredVariable { pos, .. }
            | Self::VariableAlreadyDefined { pos, .. }
            | Self::FunctionAlreadyDefined { pos, .. } => *pos,
        }
    }

    /// The offending name
    pub fn name(&self) -> &str {
        match self {
            Self::UndeclaredVariable { name, .. }
            | Self::VariableAlreadyDefined { name, .. }
            | Self::FunctionAlreadyDefined { name, .. } => name,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

pub use codegen::generate;
