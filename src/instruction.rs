//! The opcode vocabulary shared by the code generator and the stack machine.
//!
//! An instruction stream is plain text: every opcode is one whitespace-separated
//! word, optionally followed by exactly one operand word.
use core::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Halt,
    Push,
    Pop,
    Dup,
    Load,
    Store,
    StackPush,
    StackPop,
    StackPeek,
    StackIsEmpty,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    IsEq,
    IsGe,
    IsGt,
    And,
    Or,
    Not,
    Jif,
    Jmp,
    Call,
    Ret,
    Print,
    Input,
    /// Only meaningful to the loader, never executed
    Label,
}

impl Opcode {
    pub const ALL: [Opcode; 29] = [
        Self::Halt,
        Self::Push,
        Self::Pop,
        Self::Dup,
        Self::Load,
        Self::Store,
        Self::StackPush,
        Self::StackPop,
        Self::StackPeek,
        Self::StackIsEmpty,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Mod,
        Self::Pow,
        Self::IsEq,
        Self::IsGe,
        Self::IsGt,
        Self::And,
        Self::Or,
        Self::Not,
        Self::Jif,
        Self::Jmp,
        Self::Call,
        Self::Ret,
        Self::Print,
        Self::Input,
        Self::Label,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Halt => "HALT",
            Self::Push => "PUSH",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::Load => "LOAD",
            Self::Store => "STORE",
            Self::StackPush => "STACK_PUSH",
            Self::StackPop => "STACK_POP",
            Self::StackPeek => "STACK_PEEK",
            Self::StackIsEmpty => "STACK_ISEMPTY",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::Pow => "POW",
            Self::IsEq => "ISEQ",
            Self::IsGe => "ISGE",
            Self::IsGt => "ISGT",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
            Self::Jif => "JIF",
            Self::Jmp => "JMP",
            Self::Call => "CALL",
            Self::Ret => "RET",
            Self::Print => "PRINT",
            Self::Input => "INPUT",
            Self::Label => "LABEL",
        }
    }

    /// How many operand words follow this opcode in the stream
    pub fn operand_count(self) -> usize {
        match self {
            Self::Push
            | Self::Load
            | Self::Store
            | Self::StackPush
            | Self::StackPop
            | Self::StackPeek
            | Self::StackIsEmpty
            | Self::Jif
            | Self::Jmp
            | Self::Call
            | Self::Label => 1,
            _ => 0,
        }
    }

    /// Whether the operand of this opcode names a label
    pub fn takes_label(self) -> bool {
        matches!(self, Self::Jif | Self::Jmp | Self::Call)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown instruction: {0}")]
pub struct UnknownOpcode(pub Box<str>);

impl FromStr for Opcode {
    type Err = UnknownOpcode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.mnemonic() == s)
            .ok_or_else(|| UnknownOpcode(Box::from(s)))
    }
}
