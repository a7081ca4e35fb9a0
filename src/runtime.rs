//! The stack machine that executes instruction streams.
//!
//! A stream is first [loaded](loader::Program::load): labels are stripped and
//! resolved to addresses, and every word is interned. A [`machine::StackMachine`]
//! then decodes and executes the program one instruction at a time, talking to
//! the outside world only through its [ports](port).

pub mod frame;
pub mod fuel;
pub mod loader;
pub mod machine;
pub mod port;
pub mod value;

use crate::instruction::Opcode;

/// Fatal execution failures.
///
/// `address` is always the address of the opcode that failed.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("malformed program: {0}")]
    MalformedProgram(Box<str>),
    #[error("stack underflow at {address} ({opcode})")]
    StackUnderflow { address: usize, opcode: Opcode },
    #[error("undefined variable <{name}> at {address}")]
    UndefinedVariable { address: usize, name: Box<str> },
    #[error("undefined stack variable <{name}> at {address}")]
    UndefinedStackVariable { address: usize, name: Box<str> },
    #[error("stack variable <{name}> is empty at {address}")]
    EmptyStackVariable { address: usize, name: Box<str> },
    #[error("invalid label <{label}> at {address}")]
    InvalidLabel { address: usize, label: Box<str> },
    #[error("invalid address {target} at {address}")]
    InvalidAddress { address: usize, target: usize },
    #[error("return without a call at {address}")]
    InvalidReturn { address: usize },
    #[error("unknown instruction '{text}' at {address}")]
    UnknownInstruction { address: usize, text: Box<str> },
    #[error("missing operand for {opcode} at {address}")]
    MissingOperand { address: usize, opcode: Opcode },
    #[error("invalid operand '{value}' for {opcode} at {address}")]
    InvalidOperand {
        address: usize,
        opcode: Opcode,
        value: Box<str>,
    },
    #[error("division by zero at {address}")]
    DivisionByZero { address: usize },
    #[error("integer overflow at {address}")]
    IntegerOverflow { address: usize },
    #[error("call stack overflow at {address} (depth {depth})")]
    StackOverflow { address: usize, depth: usize },
    #[error("machine is halted, cannot execute at {address}")]
    HaltedExecution { address: usize },
    #[error("ran past the end of the program at {address}")]
    EndOfProgram { address: usize },
    #[error("no more input at {address}")]
    EndOfInput { address: usize },
    #[error("i/o failure at {address}")]
    Io {
        address: usize,
        #[source]
        source: std::io::Error,
    },
}

impl RuntimeError {
    /// The failing instruction address, if the error happened while executing
    pub fn address(&self) -> Option<usize> {
        match self {
            Self::MalformedProgram(_) => None,
            Self::StackUnderflow { address, .. }
            | Self::UndefinedVariable { address, .. }
            | Self::UndefinedStackVariable { address, .. }
            | Self::EmptyStackVariable { address, .. }
            | Self::InvalidLabel { address, .. }
            | Self::InvalidAddress { address, .. }
            | Self::InvalidReturn { address }
            | Self::UnknownInstruction { address, .. }
            | Self::MissingOperand { address, .. }
            | Self::InvalidOperand { address, .. }
            | Self::DivisionByZero { address }
            | Self::IntegerOverflow { address }
            | Self::StackOverflow { address, .. }
            | Self::HaltedExecution { address }
            | Self::EndOfProgram { address }
            | Self::EndOfInput { address }
            | Self::Io { address, .. } => Some(*address),
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

pub use fuel::Fuel;
pub use loader::Program;
pub use machine::{MachineOptions, MachineState, StackMachine};
pub use port::{InputPort, OutputPort};
pub use value::Value;
