use std::{io::Write, mem};

use lasso::Spur;

use crate::instruction::Opcode;

use super::{
    frame::Frame,
    fuel::{Fuel, INSTRUCTION_COST},
    loader::Program,
    port::{InputPort, OutputPort},
    value::{unescape, Value},
    RuntimeError, RuntimeResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineOptions {
    /// Most frames that may be live at once, the entry frame included
    pub max_call_depth: usize,
    /// Check every label before executing the first instruction
    pub verify_labels: bool,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 1024,
            verify_labels: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineState {
    Running,
    /// Terminal, reached by `HALT` or by a runtime error
    Halted,
}

/// Executes a loaded [`Program`].
///
/// The machine owns an operand stack shared by every frame, the current
/// frame, and the frames of every caller above it.
#[derive(Debug)]
pub struct StackMachine {
    program: Program,
    options: MachineOptions,
    state: MachineState,
    cursor: usize,
    operands: Vec<Value>,
    frame: Frame,
    callers: Vec<Frame>,
    input: InputPort,
    output: OutputPort,
}

impl StackMachine {
    pub fn new(program: Program, input: InputPort, output: OutputPort) -> Self {
        Self {
            program,
            options: MachineOptions::default(),
            state: MachineState::Running,
            cursor: 0,
            operands: vec![],
            frame: Frame::entry(),
            callers: vec![],
            input,
            output,
        }
    }

    pub fn with_options(
        program: Program,
        options: MachineOptions,
        input: InputPort,
        output: OutputPort,
    ) -> RuntimeResult<Self> {
        if options.verify_labels {
            program.verify_labels()?;
        }
        let mut machine = Self::new(program, input, output);
        machine.options = options;
        Ok(machine)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Address of the next instruction
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    /// Number of live frames, the entry frame included
    pub fn call_depth(&self) -> usize {
        self.callers.len() + 1
    }

    /// The value bound to `name` in the current frame
    pub fn variable(&self, name: &str) -> Option<&Value> {
        // names the program never mentions were never interned
        let name = self.program.symbol_of(name)?;
        self.frame.load(name)
    }

    /// Back to the initial state, ready to run the program again
    pub fn reset(&mut self) {
        self.state = MachineState::Running;
        self.cursor = 0;
        self.operands.clear();
        self.frame = Frame::entry();
        self.callers.clear();
    }

    /// Runs until `HALT` or an error.
    pub fn run(&mut self) -> RuntimeResult<()> {
        while self.state == MachineState::Running {
            self.step()?;
        }
        Ok(())
    }

    /// Runs until `HALT`, an error, or until `fuel` says to stop.
    ///
    /// Returns [`MachineState::Running`] when stopped early; calling again
    /// resumes where execution left off.
    pub fn run_with_fuel(&mut self, fuel: &mut Fuel) -> RuntimeResult<MachineState> {
        while self.state == MachineState::Running && fuel.should_continue() {
            self.step()?;
            fuel.consume(INSTRUCTION_COST);
        }
        Ok(self.state)
    }

    /// Executes exactly one instruction.
    ///
    /// Any error halts the machine.
    pub fn step(&mut self) -> RuntimeResult<()> {
        if self.state == MachineState::Halted {
            return Err(RuntimeError::HaltedExecution {
                address: self.cursor,
            });
        }
        let result = self.execute();
        if let Err(err) = &result {
            tracing::debug!(%err, "machine faulted");
            self.state = MachineState::Halted;
        }
        result
    }

    fn execute(&mut self) -> RuntimeResult<()> {
        let address = self.cursor;
        let opcode = self.program.opcode(address)?;
        self.cursor += 1;
        tracing::trace!(
            address,
            %opcode,
            depth = self.call_depth(),
            operands = self.operands.len(),
            "step"
        );

        match opcode {
            Opcode::Halt => self.state = MachineState::Halted,
            Opcode::Push => {
                let value = self.operand(address, opcode)?;
                self.operands.push(Value::new(self.program.resolve(value)));
            }
            Opcode::Pop => {
                self.pop(address, opcode)?;
            }
            Opcode::Dup => {
                let top = self.peek(address, opcode)?.clone();
                self.operands.push(top);
            }
            Opcode::Load => {
                let name = self.operand(address, opcode)?;
                let value = self.frame.load(name).cloned().ok_or_else(|| {
                    RuntimeError::UndefinedVariable {
                        address,
                        name: Box::from(self.program.resolve(name)),
                    }
                })?;
                self.operands.push(value);
            }
            Opcode::Store => {
                let name = self.operand(address, opcode)?;
                let value = self.pop(address, opcode)?;
                self.frame.store(name, value);
            }
            Opcode::StackPush => {
                let name = self.operand(address, opcode)?;
                let value = self.pop(address, opcode)?;
                self.frame.stack_push(name, value);
            }
            Opcode::StackPop => {
                let name = self.operand(address, opcode)?;
                let value = self.named_stack(address, name)?.pop();
                let value = value.ok_or_else(|| self.empty_stack(address, name))?;
                self.operands.push(value);
            }
            Opcode::StackPeek => {
                let name = self.operand(address, opcode)?;
                let value = self.named_stack(address, name)?.last().cloned();
                let value = value.ok_or_else(|| self.empty_stack(address, name))?;
                self.operands.push(value);
            }
            Opcode::StackIsEmpty => {
                let name = self.operand(address, opcode)?;
                let empty = self.named_stack(address, name)?.is_empty();
                self.operands.push(Value::boolean(empty));
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Pow => {
                let rhs = self.pop_integer(address, opcode)?;
                let lhs = self.pop_integer(address, opcode)?;
                let result = arithmetic(opcode, lhs, rhs, address)?;
                self.operands.push(Value::integer(result));
            }
            Opcode::IsEq => {
                let rhs = self.pop(address, opcode)?;
                let lhs = self.pop(address, opcode)?;
                self.operands.push(Value::boolean(lhs.loosely_equals(&rhs)));
            }
            Opcode::IsGe | Opcode::IsGt => {
                let rhs = self.pop_integer(address, opcode)?;
                let lhs = self.pop_integer(address, opcode)?;
                let result = if opcode == Opcode::IsGe {
                    lhs >= rhs
                } else {
                    lhs > rhs
                };
                self.operands.push(Value::boolean(result));
            }
            Opcode::And | Opcode::Or => {
                let rhs = self.pop(address, opcode)?.is_truthy();
                let lhs = self.pop(address, opcode)?.is_truthy();
                let result = if opcode == Opcode::And {
                    lhs && rhs
                } else {
                    lhs || rhs
                };
                self.operands.push(Value::boolean(result));
            }
            Opcode::Not => {
                let value = self.pop(address, opcode)?;
                self.operands.push(Value::boolean(!value.is_truthy()));
            }
            Opcode::Jif => {
                let label = self.operand(address, opcode)?;
                let target = self.program.jump_target(address, label)?;
                if !self.pop(address, opcode)?.is_truthy() {
                    self.cursor = target;
                }
            }
            Opcode::Jmp => {
                let label = self.operand(address, opcode)?;
                self.cursor = self.program.jump_target(address, label)?;
            }
            Opcode::Call => {
                let label = self.operand(address, opcode)?;
                let target = self.program.jump_target(address, label)?;
                let depth = self.call_depth();
                if depth >= self.options.max_call_depth {
                    return Err(RuntimeError::StackOverflow { address, depth });
                }
                let entry = self.callers.first().unwrap_or(&self.frame);
                let callee = Frame::call(entry, self.cursor);
                self.callers.push(mem::replace(&mut self.frame, callee));
                self.cursor = target;
            }
            Opcode::Ret => {
                let caller = self
                    .callers
                    .pop()
                    .ok_or(RuntimeError::InvalidReturn { address })?;
                let returning = mem::replace(&mut self.frame, caller);
                self.cursor = returning.return_address();
            }
            Opcode::Print => {
                let top = self
                    .operands
                    .last()
                    .ok_or(RuntimeError::StackUnderflow { address, opcode })?;
                let text = unescape(top.as_str());
                write!(self.output, "{text}")
                    .and_then(|()| self.output.flush())
                    .map_err(|source| RuntimeError::Io { address, source })?;
            }
            Opcode::Input => {
                let line = self
                    .input
                    .read_line()
                    .map_err(|source| RuntimeError::Io { address, source })?
                    .ok_or(RuntimeError::EndOfInput { address })?;
                self.operands.push(Value::new(line));
            }
            Opcode::Label => {
                return Err(RuntimeError::UnknownInstruction {
                    address,
                    text: Box::from(opcode.mnemonic()),
                })
            }
        }
        Ok(())
    }

    /// Consumes the operand word following the opcode at `address`
    fn operand(&mut self, address: usize, opcode: Opcode) -> RuntimeResult<Spur> {
        let operand = self
            .program
            .symbol(self.cursor)
            .ok_or(RuntimeError::MissingOperand { address, opcode })?;
        self.cursor += 1;
        Ok(operand)
    }

    fn pop(&mut self, address: usize, opcode: Opcode) -> RuntimeResult<Value> {
        self.operands
            .pop()
            .ok_or(RuntimeError::StackUnderflow { address, opcode })
    }

    fn peek(&self, address: usize, opcode: Opcode) -> RuntimeResult<&Value> {
        self.operands
            .last()
            .ok_or(RuntimeError::StackUnderflow { address, opcode })
    }

    fn pop_integer(&mut self, address: usize, opcode: Opcode) -> RuntimeResult<i64> {
        let value = self.pop(address, opcode)?;
        value
            .as_integer()
            .ok_or_else(|| RuntimeError::InvalidOperand {
                address,
                opcode,
                value: Box::from(value.as_str()),
            })
    }

    fn named_stack(&mut self, address: usize, name: Spur) -> RuntimeResult<&mut Vec<Value>> {
        let program = &self.program;
        self.frame
            .stack_mut(name)
            .ok_or_else(|| RuntimeError::UndefinedStackVariable {
                address,
                name: Box::from(program.resolve(name)),
            })
    }

    fn empty_stack(&self, address: usize, name: Spur) -> RuntimeError {
        RuntimeError::EmptyStackVariable {
            address,
            name: Box::from(self.program.resolve(name)),
        }
    }
}

fn arithmetic(opcode: Opcode, lhs: i64, rhs: i64, address: usize) -> RuntimeResult<i64> {
    let overflow = RuntimeError::IntegerOverflow { address };
    match opcode {
        Opcode::Add => lhs.checked_add(rhs).ok_or(overflow),
        Opcode::Sub => lhs.checked_sub(rhs).ok_or(overflow),
        Opcode::Mul => lhs.checked_mul(rhs).ok_or(overflow),
        Opcode::Div | Opcode::Mod if rhs == 0 => Err(RuntimeError::DivisionByZero { address }),
        Opcode::Div => lhs.checked_div(rhs).ok_or(overflow),
        // the only overflowing case, MIN % -1, has remainder 0
        Opcode::Mod => Ok(lhs.wrapping_rem(rhs)),
        // POW
        _ => power(lhs, rhs)
            .ok_or(overflow)
            .and_then(|result| result.ok_or(RuntimeError::DivisionByZero { address })),
    }
}

/// `base ^ exponent`, truncated towards zero.
///
/// `None` on overflow, `Some(None)` for a negative power of zero.
fn power(base: i64, exponent: i64) -> Option<Option<i64>> {
    let odd = exponent % 2 != 0;
    Some(match base {
        1 => Some(1),
        -1 => Some(if odd { -1 } else { 1 }),
        0 if exponent < 0 => None,
        0 => Some(if exponent == 0 { 1 } else { 0 }),
        _ if exponent < 0 => Some(0),
        _ => Some(base.checked_pow(u32::try_from(exponent).ok()?)?),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use assert2::{check, let_assert};

    use super::{MachineOptions, MachineState, StackMachine};
    use crate::{
        instruction::Opcode,
        runtime::{Fuel, InputPort, OutputPort, Program, RuntimeError, Value},
    };

    struct Harness {
        machine: StackMachine,
        output: Arc<Mutex<Vec<u8>>>,
    }

    impl Harness {
        fn new(code: &str, input: &str) -> Self {
            let output = Arc::new(Mutex::new(vec![]));
            let program = Program::load(code).unwrap();
            let machine = StackMachine::new(
                program,
                InputPort::from_text(input),
                OutputPort::from(output.clone()),
            );
            Self { machine, output }
        }

        fn output(&self) -> String {
            String::from_utf8(self.output.lock().unwrap().clone()).unwrap()
        }
    }

    fn run(code: &str) -> (Result<(), RuntimeError>, String) {
        run_with_input(code, "")
    }

    fn run_with_input(code: &str, input: &str) -> (Result<(), RuntimeError>, String) {
        let mut harness = Harness::new(code, input);
        let result = harness.machine.run();
        (result, harness.output())
    }

    fn prints(code: &str) -> String {
        let (result, output) = run(code);
        check!(let Ok(()) = result);
        output
    }

    #[test]
    fn print_does_not_pop() {
        check!(prints("PUSH \"Hello World!\" PRINT HALT") == "Hello World!");
        check!(prints("PUSH 1 PRINT PRINT HALT") == "11");
        check!(prints("PUSH \"a\\tb\\n\" PRINT HALT") == "a\tb\n");
    }

    #[test]
    fn echo_input() {
        let (result, output) = run_with_input("INPUT PRINT INPUT PRINT HALT", "hello\nworld\n");
        check!(let Ok(()) = result);
        check!(output == "helloworld");

        let (result, _) = run_with_input("INPUT INPUT HALT", "once\n");
        let_assert!(Err(RuntimeError::EndOfInput { address: 1 }) = result);
    }

    #[test]
    fn arithmetic() {
        check!(prints("PUSH 7 PUSH 2 DIV PRINT HALT") == "3");
        check!(prints("PUSH -7 PUSH 2 DIV PRINT HALT") == "-3");
        check!(prints("PUSH 7 PUSH 2 MOD PRINT HALT") == "1");
        check!(prints("PUSH -7 PUSH 2 MOD PRINT HALT") == "-1");
        check!(prints("PUSH 2 PUSH 3 POW PRINT HALT") == "8");
        check!(prints("PUSH 2 PUSH -1 POW PRINT HALT") == "0");
        check!(prints("PUSH -1 PUSH -3 POW PRINT HALT") == "-1");
        check!(prints("PUSH 5 PUSH 0 POW PRINT HALT") == "1");
        check!(prints("PUSH 1 PUSH 10 SUB PRINT HALT") == "-9");
        check!(prints("PUSH 6 PUSH 7 MUL PRINT HALT") == "42");
    }

    #[test]
    fn arithmetic_failures() {
        let_assert!((Err(RuntimeError::DivisionByZero { address: 4 }), _) = run("PUSH 1 PUSH 0 DIV HALT"));
        let_assert!((Err(RuntimeError::DivisionByZero { address: 4 }), _) = run("PUSH 1 PUSH 0 MOD HALT"));
        let_assert!((Err(RuntimeError::DivisionByZero { .. }), _) = run("PUSH 0 PUSH -2 POW HALT"));
        let_assert!(
            (Err(RuntimeError::IntegerOverflow { .. }), _) =
                run("PUSH 9223372036854775807 PUSH 1 ADD HALT")
        );
        let_assert!((Err(RuntimeError::IntegerOverflow { .. }), _) = run("PUSH 10 PUSH 40 POW HALT"));
        let_assert!(
            (Err(RuntimeError::InvalidOperand { opcode: Opcode::Add, value, .. }), _) =
                run("PUSH 1 PUSH true ADD HALT")
        );
        check!(value.as_ref() == "true");

        check!(prints("PUSH -9223372036854775808 PUSH -1 MOD PRINT HALT") == "0");
        let_assert!(
            (Err(RuntimeError::IntegerOverflow { address: 4 }), _) =
                run("PUSH -9223372036854775808 PUSH -1 DIV HALT")
        );
    }

    #[test]
    fn comparisons_and_logic() {
        check!(prints("PUSH 1 PUSH 1 ISEQ PRINT HALT") == "true");
        check!(prints("PUSH 01 PUSH 1 ISEQ PRINT HALT") == "true");
        check!(prints("PUSH a PUSH b ISEQ PRINT HALT") == "false");
        check!(prints("PUSH 3 PUSH 2 ISGT PRINT HALT") == "true");
        check!(prints("PUSH 2 PUSH 2 ISGT PRINT HALT") == "false");
        check!(prints("PUSH 2 PUSH 2 ISGE PRINT HALT") == "true");
        check!(prints("PUSH true NOT PRINT HALT") == "false");
        check!(prints("PUSH 0 NOT PRINT HALT") == "true");
        check!(prints("PUSH true PUSH false OR PRINT HALT") == "true");
        check!(prints("PUSH true PUSH 1 AND PRINT HALT") == "true");
        check!(prints("PUSH true PUSH 0 AND PRINT HALT") == "false");
    }

    #[test]
    fn variables() {
        check!(prints("PUSH 5 STORE x LOAD x LOAD x ADD PRINT HALT") == "10");
        let_assert!((Err(RuntimeError::UndefinedVariable { address: 0, name }), _) = run("LOAD y HALT"));
        check!(name.as_ref() == "y");
    }

    #[test]
    fn named_stacks() {
        check!(
            prints("PUSH 4 STACK_PUSH s PUSH 3 STACK_PUSH s STACK_PEEK s PRINT POP STACK_POP s STACK_POP s ADD PRINT STACK_ISEMPTY s PRINT HALT")
                == "37true"
        );
        let_assert!((Err(RuntimeError::UndefinedStackVariable { name, .. }), _) = run("STACK_POP s HALT"));
        check!(name.as_ref() == "s");
        let_assert!(
            (Err(RuntimeError::EmptyStackVariable { address: 6, .. }), _) =
                run("PUSH 1 STACK_PUSH s STACK_POP s STACK_POP s HALT")
        );
    }

    #[test]
    fn jumps() {
        // counts down from 3
        let code = "PUSH 3 STORE n LABEL top LOAD n PRINT PUSH 1 SUB STORE n LOAD n JIF end JMP top LABEL end HALT";
        check!(prints(code) == "321");

        let_assert!((Err(RuntimeError::InvalidLabel { address: 0, label }), _) = run("JMP nowhere HALT"));
        check!(label.as_ref() == "nowhere");
        let_assert!(
            (Err(RuntimeError::InvalidAddress { address: 0, target: 3 }), _) =
                run("JMP end HALT LABEL end")
        );
    }

    #[test]
    fn calls_and_returns() {
        let code = "PUSH 5 PUSH 8 CALL add PRINT HALT LABEL add STORE b STORE a LOAD a LOAD b ADD RET";
        check!(prints(code) == "13");

        let_assert!((Err(RuntimeError::InvalidReturn { address: 0 }), _) = run("RET"));
    }

    #[test]
    fn calls_see_a_copy_of_the_entry_frame() {
        let code = "PUSH 1 STORE g CALL f LOAD g PRINT HALT \
                    LABEL f LOAD g PRINT PUSH 2 STORE g LOAD g PRINT RET";
        check!(prints(code) == "121");
    }

    #[test]
    fn call_depth_is_bounded() {
        let program = Program::load("LABEL f CALL f").unwrap();
        let options = MachineOptions {
            max_call_depth: 16,
            ..MachineOptions::default()
        };
        let mut machine =
            StackMachine::with_options(program, options, InputPort::empty(), OutputPort::sink())
                .unwrap();
        let_assert!(Err(RuntimeError::StackOverflow { depth: 16, .. }) = machine.run());
    }

    #[test]
    fn boundaries() {
        let_assert!((Err(RuntimeError::StackUnderflow { opcode: Opcode::Print, .. }), _) = run("PRINT"));
        let_assert!((Err(RuntimeError::StackUnderflow { opcode: Opcode::Pop, .. }), _) = run("POP"));
        let_assert!((Err(RuntimeError::StackUnderflow { opcode: Opcode::Not, .. }), _) = run("NOT"));
        let_assert!((Err(RuntimeError::StackUnderflow { opcode: Opcode::Store, .. }), _) = run("STORE x"));
        let_assert!((Err(RuntimeError::UnknownInstruction { address: 2, text }), _) = run("PUSH 1 FROB"));
        check!(text.as_ref() == "FROB");
        let_assert!((Err(RuntimeError::EndOfProgram { address: 2 }), _) = run("PUSH 1"));
        let_assert!((Err(RuntimeError::MissingOperand { address: 3, opcode: Opcode::Push }), _) = run("PUSH 1 DUP PUSH"));
    }

    #[test]
    fn output_before_a_fault_is_kept() {
        let (result, output) = run("PUSH 1 PRINT PUSH 0 DIV HALT");
        let_assert!(Err(RuntimeError::DivisionByZero { address: 5 }) = result);
        check!(output == "1");
    }

    #[test]
    fn halted_machines_refuse_to_step() {
        let mut harness = Harness::new("HALT", "");
        let_assert!(Ok(()) = harness.machine.run());
        check!(harness.machine.state() == MachineState::Halted);
        let_assert!(Err(RuntimeError::HaltedExecution { address: 1 }) = harness.machine.step());
    }

    #[test]
    fn fuel_pauses_and_resumes() {
        let mut harness = Harness::new("PUSH 1 PRINT PUSH 2 PRINT HALT", "");
        let mut fuel = Fuel::with(2);
        let_assert!(Ok(MachineState::Running) = harness.machine.run_with_fuel(&mut fuel));
        check!(harness.output() == "1");
        check!(harness.machine.cursor() == 3);

        fuel.refill(10, 10);
        let_assert!(Ok(MachineState::Halted) = harness.machine.run_with_fuel(&mut fuel));
        check!(harness.output() == "12");
        check!(fuel.remaining() == 7);
    }

    #[test]
    fn reset_replays_identically() {
        let mut harness = Harness::new("PUSH 1 STORE x LOAD x PRINT HALT", "");
        let_assert!(Ok(()) = harness.machine.run());
        check!(harness.machine.variable("x") == Some(&Value::from(1)));
        harness.machine.reset();
        check!(harness.machine.cursor() == 0);
        check!(harness.machine.program().len() == 8);
        check!(harness.machine.operands().is_empty());
        check!(harness.machine.variable("x") == None);
        let_assert!(Ok(()) = harness.machine.run());
        check!(harness.output() == "11");
    }
}
