//! Bitsy: a small imperative language compiled to a textual stack machine.
//!
//! [`compile`] turns source text into an instruction stream, [`execute`] runs
//! an instruction stream, and [`run`] does both.
pub mod compiler;
pub mod instruction;
pub mod lexer;
pub mod parser;
pub mod runtime;

pub use compiler::{CompileError, CompileResult};
pub use instruction::Opcode;
pub use lexer::Position;
pub use parser::{parse, SyntaxError};
pub use runtime::{
    Fuel, InputPort, MachineOptions, MachineState, OutputPort, Program, RuntimeError,
    StackMachine, Value,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Compile source text into an instruction stream.
pub fn compile(source: &str) -> Result<String, Error> {
    let program = parse(source)?;
    Ok(compiler::generate(&program)?)
}

/// Load and run an instruction stream to completion.
pub fn execute(
    code: &str,
    options: MachineOptions,
    input: InputPort,
    output: OutputPort,
) -> Result<(), Error> {
    let program = Program::load(code)?;
    StackMachine::with_options(program, options, input, output)?.run()?;
    Ok(())
}

/// Compile source text, then run it.
pub fn run(
    source: &str,
    options: MachineOptions,
    input: InputPort,
    output: OutputPort,
) -> Result<(), Error> {
    let code = compile(source)?;
    execute(&code, options, input, output)
}
