use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use bitsy::{
    lexer::Span, Error, Fuel, InputPort, MachineOptions, MachineState, OutputPort, Program,
    StackMachine,
};
use clap::{Parser, Subcommand};
use codesnake::{Block, CodeWidth, Label, LineIndex};
use yansi::Paint;

/// Bitsy - compile and run programs on the Bitsy stack machine
#[derive(Parser, Debug)]
#[command(name = "bitsy", version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    machine: MachineArgs,
}

#[derive(clap::Args, Debug)]
struct MachineArgs {
    /// Deepest call nesting allowed before failing with a stack overflow
    #[arg(long, global = true, default_value_t = MachineOptions::default().max_call_depth)]
    max_call_depth: usize,

    /// Check every jump target before running
    #[arg(long, global = true)]
    verify_labels: bool,

    /// Stop after executing this many instructions
    #[arg(long, global = true)]
    fuel: Option<i64>,
}

impl MachineArgs {
    fn options(&self) -> MachineOptions {
        MachineOptions {
            max_call_depth: self.max_call_depth,
            verify_labels: self.verify_labels,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a source file into an instruction file
    Compile {
        source: PathBuf,
        /// Defaults to the source path with an `.int` extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run an instruction file
    Execute { code: PathBuf },
    /// Compile a source file and run it
    Run { source: PathBuf },
    /// Run each entered line as a program of its own
    Repl,
}

fn make_block<'a>(
    idx: &'a LineIndex,
    span: Span,
    message: &str,
) -> Option<Block<&'a str, String>> {
    Block::new(
        idx,
        [Label::new(span)
            .with_text(message.red().to_string())
            .with_style(|s| s.red().to_string())],
    )
}

/// Prints a diagnostic pointing into `source`, falling back to a plain line
/// when the span cannot be shown.
fn report(name: &str, source: &str, span: Span, message: &str) {
    let idx = LineIndex::new(source);
    let block = (span.start < span.end && span.end <= source.len())
        .then(|| make_block(&idx, span, message))
        .flatten();
    match block {
        Some(block) => {
            let block = block.map_code(|c| CodeWidth::new(c, c.len()));
            eprintln!("{}[{name}]", block.prologue());
            eprint!("{block}");
            eprintln!("{}", block.epilogue());
        }
        None => eprintln!("{}: {name}: {message}", "error".red().bold()),
    }
}

/// Compiles, rendering front end errors against the source.
fn compile(name: &str, source: &str) -> anyhow::Result<String> {
    match bitsy::compile(source) {
        Ok(code) => Ok(code),
        Err(Error::Syntax(err)) => {
            report(name, source, err.span.clone(), &err.to_string());
            bail!("could not compile {name}")
        }
        Err(Error::Compile(err)) => {
            report(name, source, err.span(), &err.to_string());
            bail!("could not compile {name}")
        }
        Err(err) => Err(err.into()),
    }
}

fn execute(code: &str, args: &MachineArgs) -> anyhow::Result<()> {
    let program = Program::load(code)?;
    let mut machine = StackMachine::with_options(
        program,
        args.options(),
        InputPort::stdin(),
        OutputPort::stdout(),
    )?;
    match args.fuel {
        Some(fuel) => {
            let state = machine.run_with_fuel(&mut Fuel::with(fuel))?;
            if state == MachineState::Running {
                bail!(
                    "ran out of fuel after {fuel} instructions (next address {})",
                    machine.cursor()
                );
            }
        }
        None => machine.run()?,
    }
    Ok(())
}

fn read(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))
}

fn repl(args: &MachineArgs) -> anyhow::Result<()> {
    let mut readline = rustyline::DefaultEditor::new()?;

    while let Ok(input) = readline.readline(">> ") {
        if input.trim().is_empty() {
            continue;
        }
        if let Err(err) = readline.add_history_entry(input.as_str()) {
            tracing::warn!(%err, "could not record history entry");
        }
        let result = compile("<repl>", &input).and_then(|code| execute(&code, args));
        println!();
        if let Err(err) = result {
            eprintln!("{}: {err:#}", "error".red().bold());
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // BITSY_LOG wins over RUST_LOG, default to warnings only
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_env("BITSY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match &args.command {
        Command::Compile { source, output } => {
            let name = source.display().to_string();
            let code = compile(&name, &read(source)?)?;
            let output = output
                .clone()
                .unwrap_or_else(|| source.with_extension("int"));
            fs::write(&output, code)
                .with_context(|| format!("could not write {}", output.display()))?;
            tracing::info!(output = %output.display(), "wrote instructions");
        }
        Command::Execute { code } => execute(&read(code)?, &args.machine)?,
        Command::Run { source } => {
            let name = source.display().to_string();
            let code = compile(&name, &read(source)?)?;
            execute(&code, &args.machine)?;
        }
        Command::Repl => repl(&args.machine)?,
    }

    std::io::stdout().flush()?;
    Ok(())
}
