//! Tree-walking code generation.
//!
//! Every node appends its instruction fragment to an [`Emitter`]; fragments
//! concatenated in tree order form the program. The code of the implicit main
//! entry comes first, then `HALT`, then every function body. A function body
//! that does not end in `return` gets an implicit `RET`.
use core::fmt;
use std::collections::HashMap;

use crate::{
    instruction::Opcode,
    lexer::Position,
    parser::ast::{
        BinaryOp, ConditionBlock, DeclKind, Expr, FunctionDef, Ident, Item, Printable, Program,
        StackOpKind, Stmt, UnaryOp,
    },
};

use super::{environment::Scope, CompileError, CompileResult};

/// A jump target in the emitted stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label(Box<str>);

impl Label {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accumulates instruction text, one operation per line.
#[derive(Debug, Default)]
pub struct Emitter {
    text: String,
}

impl Emitter {
    pub fn op(&mut self, op: Opcode) {
        self.text.push_str(op.mnemonic());
        self.text.push('\n');
    }

    pub fn op_with(&mut self, op: Opcode, operand: impl fmt::Display) {
        self.text.push_str(&format!("{op} {operand}\n"));
    }

    pub fn label(&mut self, label: &Label) {
        self.op_with(Opcode::Label, label);
    }

    pub fn append(&mut self, other: Emitter) {
        self.text.push_str(&other.text);
    }

    pub fn finish(self) -> String {
        self.text
    }
}

/// Per-body state threaded through the visit.
struct Context {
    scope: Scope,
    /// Exit labels of the enclosing `if`/`while` statements, innermost last
    exits: Vec<Label>,
}

#[derive(Debug, Default)]
pub struct CodeGenerator {
    label_counter: usize,
    functions: HashMap<Box<str>, Position>,
}

/// Generate the instruction stream for a whole program.
pub fn generate(program: &Program) -> CompileResult<String> {
    CodeGenerator::default().program(program)
}

fn undeclared(name: &Ident) -> CompileError {
    CompileError::UndeclaredVariable {
        name: name.name.clone(),
        pos: name.pos,
        span: name.span.clone(),
    }
}

impl CodeGenerator {
    /// Generated labels start with `.`, which no identifier (and so no
    /// function label) can.
    fn fresh_label(&mut self) -> Label {
        self.label_counter += 1;
        Label(format!(".L{}", self.label_counter).into_boxed_str())
    }

    pub fn program(&mut self, program: &Program) -> CompileResult<String> {
        let mut globals = Context {
            scope: Scope::new(),
            exits: vec![],
        };
        let mut main = Emitter::default();
        let mut functions = Emitter::default();

        for item in &program.items {
            match item {
                Item::Main(stmt) => self.stmt(stmt, &mut globals, &mut main)?,
                Item::Function(func) => {
                    self.function(func, &globals.scope, &mut functions)?;
                }
            }
        }

        main.op(Opcode::Halt);
        main.append(functions);
        let code = main.finish();
        tracing::debug!(
            labels = self.label_counter,
            functions = self.functions.len(),
            "generated {} lines of instructions",
            code.lines().count()
        );
        Ok(code)
    }

    fn function(
        &mut self,
        func: &FunctionDef,
        globals: &Scope,
        out: &mut Emitter,
    ) -> CompileResult<()> {
        if self.functions.contains_key(func.name.as_str()) {
            return Err(CompileError::FunctionAlreadyDefined {
                name: func.name.name.clone(),
                pos: func.name.pos,
                span: func.name.span.clone(),
            });
        }
        self.functions.insert(func.name.name.clone(), func.name.pos);

        let mut ctx = Context {
            scope: globals.enter_function(),
            exits: vec![],
        };
        for param in &func.params {
            declare(&mut ctx.scope, param, DeclKind::Scalar)?;
        }

        out.op_with(Opcode::Label, &func.name.name);
        // Arguments arrive in push order, so the last one is on top.
        for param in func.params.iter().rev() {
            out.op_with(Opcode::Store, &param.name);
        }
        for stmt in &func.body {
            self.stmt(stmt, &mut ctx, out)?;
        }
        // A body that does not end in `return` would run on into the next
        // function, and its trailing exit label would point past the stream.
        if !matches!(func.body.last(), Some(Stmt::Return(_))) {
            out.op(Opcode::Ret);
        }
        Ok(())
    }

    fn stmts(&mut self, stmts: &[Stmt], ctx: &mut Context, out: &mut Emitter) -> CompileResult<()> {
        stmts.iter().try_for_each(|stmt| self.stmt(stmt, ctx, out))
    }

    fn stmt(&mut self, stmt: &Stmt, ctx: &mut Context, out: &mut Emitter) -> CompileResult<()> {
        match stmt {
            Stmt::Declare(decl) => declare(&mut ctx.scope, &decl.name, decl.kind)?,
            Stmt::Assign { target, value } => {
                self.expr(value, ctx, out)?;
                let name = scalar(&ctx.scope, target)?;
                out.op_with(Opcode::Store, name);
            }
            Stmt::DeclareAssign { target, value } => {
                declare(&mut ctx.scope, target, DeclKind::Scalar)?;
                self.expr(value, ctx, out)?;
                out.op_with(Opcode::Store, target.as_str());
            }
            Stmt::If {
                branches,
                otherwise,
            } => {
                let end = self.fresh_label();
                ctx.exits.push(end.clone());
                for branch in branches {
                    self.condition_block(branch, ctx, out)?;
                }
                if let Some(body) = otherwise {
                    self.stmts(body, ctx, out)?;
                }
                out.label(&end);
                ctx.exits.pop();
            }
            Stmt::While { condition, body } => {
                let end = self.fresh_label();
                ctx.exits.push(end.clone());
                let top = self.fresh_label();
                out.label(&top);
                self.expr(condition, ctx, out)?;
                out.op_with(Opcode::Jif, &end);
                self.stmts(body, ctx, out)?;
                out.op_with(Opcode::Jmp, &top);
                ctx.exits.pop();
                out.label(&end);
            }
            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.expr(value, ctx, out)?;
                }
                out.op(Opcode::Ret);
            }
            Stmt::Print(Printable::Expr(value)) => {
                self.expr(value, ctx, out)?;
                out.op(Opcode::Print);
            }
            Stmt::Print(Printable::Text(text)) => {
                out.op_with(Opcode::Push, text);
                out.op(Opcode::Print);
            }
            // Prefix and postfix forms lower identically; as statements the
            // old/new value distinction is not observable.
            Stmt::IncDec { kind, target } => {
                let name = scalar(&ctx.scope, target)?;
                out.op_with(Opcode::Load, name);
                out.op_with(Opcode::Push, 1);
                out.op(if kind.is_increment() {
                    Opcode::Add
                } else {
                    Opcode::Sub
                });
                out.op_with(Opcode::Store, name);
            }
            Stmt::Expr(expr) => self.expr(expr, ctx, out)?,
        }
        Ok(())
    }

    fn condition_block(
        &mut self,
        block: &ConditionBlock,
        ctx: &mut Context,
        out: &mut Emitter,
    ) -> CompileResult<()> {
        let next = self.fresh_label();
        self.expr(&block.condition, ctx, out)?;
        out.op_with(Opcode::Jif, &next);
        self.stmts(&block.body, ctx, out)?;
        if let Some(exit) = ctx.exits.last() {
            out.op_with(Opcode::Jmp, exit);
        }
        out.label(&next);
        Ok(())
    }

    fn expr(&mut self, expr: &Expr, ctx: &mut Context, out: &mut Emitter) -> CompileResult<()> {
        match expr {
            Expr::Literal(literal) => out.op_with(Opcode::Push, &literal.text),
            Expr::Variable(name) => {
                let name = scalar(&ctx.scope, name)?;
                out.op_with(Opcode::Load, name);
            }
            Expr::Binary { op, lhs, rhs } => {
                self.expr(lhs, ctx, out)?;
                self.expr(rhs, ctx, out)?;
                for opcode in lower_binary(*op) {
                    out.op(*opcode);
                }
            }
            Expr::Unary {
                op: UnaryOp::Plus,
                operand,
            } => self.expr(operand, ctx, out)?,
            Expr::Unary {
                op: UnaryOp::Minus,
                operand,
            } => {
                out.op_with(Opcode::Push, 0);
                self.expr(operand, ctx, out)?;
                out.op(Opcode::Sub);
            }
            Expr::Call { name, args } => {
                for arg in args {
                    self.expr(arg, ctx, out)?;
                }
                out.op_with(Opcode::Call, name.as_str());
            }
            Expr::Input => out.op(Opcode::Input),
            Expr::StackOp {
                kind,
                target,
                value,
            } => {
                if let Some(value) = value {
                    self.expr(value, ctx, out)?;
                }
                if !ctx.scope.is_stack(target.as_str()) {
                    return Err(undeclared(target));
                }
                let opcode = match kind {
                    StackOpKind::Push => Opcode::StackPush,
                    StackOpKind::Pop => Opcode::StackPop,
                    StackOpKind::Peek => Opcode::StackPeek,
                    StackOpKind::IsEmpty => Opcode::StackIsEmpty,
                };
                out.op_with(opcode, target.as_str());
            }
        }
        Ok(())
    }
}

fn declare(scope: &mut Scope, name: &Ident, kind: DeclKind) -> CompileResult<()> {
    scope
        .define(name.as_str(), kind)
        .map_err(|_| CompileError::VariableAlreadyDefined {
            name: name.name.clone(),
            pos: name.pos,
            span: name.span.clone(),
        })
}

fn scalar<'a>(scope: &Scope, name: &'a Ident) -> CompileResult<&'a str> {
    if scope.is_variable(name.as_str()) {
        Ok(name.as_str())
    } else {
        Err(undeclared(name))
    }
}

/// Relational operators reduce to `ISEQ`/`ISGE`/`ISGT`, optionally negated.
fn lower_binary(op: BinaryOp) -> &'static [Opcode] {
    match op {
        BinaryOp::Add => &[Opcode::Add],
        BinaryOp::Sub => &[Opcode::Sub],
        BinaryOp::Mul => &[Opcode::Mul],
        BinaryOp::Div => &[Opcode::Div],
        BinaryOp::Mod => &[Opcode::Mod],
        BinaryOp::Pow => &[Opcode::Pow],
        BinaryOp::And => &[Opcode::And],
        BinaryOp::Or => &[Opcode::Or],
        BinaryOp::Less => &[Opcode::IsGe, Opcode::Not],
        BinaryOp::LessEq => &[Opcode::IsGt, Opcode::Not],
        BinaryOp::Greater => &[Opcode::IsGt],
        BinaryOp::GreaterEq => &[Opcode::IsGe],
        BinaryOp::Eq => &[Opcode::IsEq],
        BinaryOp::NotEq => &[Opcode::IsEq, Opcode::Not],
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::generate;
    use crate::{compiler::CompileError, lexer::Position, parser::parse, runtime::Program};

    fn compile(source: &str) -> Result<String, CompileError> {
        generate(&parse(source).unwrap())
    }

    fn lines(code: &str) -> Vec<&str> {
        code.lines().collect()
    }

    #[test]
    fn arithmetic_keeps_operand_order() {
        let code = compile("print(1+2+42);").unwrap();
        check!(
            lines(&code)
                == ["PUSH 1", "PUSH 2", "ADD", "PUSH 42", "ADD", "PRINT", "HALT"]
        );
    }

    #[test]
    fn negation_pushes_zero_first() {
        let code = compile("print(-2);").unwrap();
        check!(lines(&code) == ["PUSH 0", "PUSH 2", "SUB", "PRINT", "HALT"]);
    }

    #[test]
    fn relational_operators_reduce_to_primitives() {
        let code = compile("print(1<2); print(1<=2); print(1>2); print(1>=2); print(1!=2);")
            .unwrap();
        let ops = lines(&code)
            .into_iter()
            .filter(|line| !line.starts_with("PUSH") && *line != "PRINT")
            .collect::<Vec<_>>();
        check!(ops == ["ISGE", "NOT", "ISGT", "NOT", "ISGT", "ISGE", "ISEQ", "NOT", "HALT"]);
    }

    #[test]
    fn prefix_and_postfix_lower_identically() {
        let post = compile("int a; a++; a--;").unwrap();
        let pre = compile("int a; ++a; --a;").unwrap();
        check!(post == pre);
        check!(
            lines(&post)
                == [
                    "LOAD a", "PUSH 1", "ADD", "STORE a", "LOAD a", "PUSH 1", "SUB", "STORE a",
                    "HALT"
                ]
        );
    }

    #[test]
    fn if_elif_else_lowering() {
        let code = compile("int a; a = 6; if(a < 5) { print(1); } elif(a < 10) { print(2); } else { print(3); }")
            .unwrap();
        check!(
            lines(&code)
                == [
                    "PUSH 6", "STORE a", //
                    "LOAD a", "PUSH 5", "ISGE", "NOT", "JIF .L2", "PUSH 1", "PRINT", "JMP .L1",
                    "LABEL .L2", //
                    "LOAD a", "PUSH 10", "ISGE", "NOT", "JIF .L3", "PUSH 2", "PRINT", "JMP .L1",
                    "LABEL .L3", //
                    "PUSH 3", "PRINT", "LABEL .L1", "HALT",
                ]
        );
    }

    #[test]
    fn while_lowering() {
        let code = compile("int x; x = 1; while(x < 4){ print(x); x++; }").unwrap();
        check!(
            lines(&code)
                == [
                    "PUSH 1", "STORE x", "LABEL .L2", "LOAD x", "PUSH 4", "ISGE", "NOT",
                    "JIF .L1", "LOAD x", "PRINT", "LOAD x", "PUSH 1", "ADD", "STORE x",
                    "JMP .L2", "LABEL .L1", "HALT",
                ]
        );
    }

    #[test]
    fn functions_follow_halt_and_store_parameters_in_reverse() {
        let code = compile("func add(int a, int b) { return a+b; } print(add(5,8));").unwrap();
        check!(
            lines(&code)
                == [
                    "PUSH 5", "PUSH 8", "CALL add", "PRINT", "HALT", //
                    "LABEL add", "STORE b", "STORE a", "LOAD a", "LOAD b", "ADD", "RET",
                ]
        );
    }

    #[test]
    fn bodies_without_a_final_return_get_one() {
        let code = compile("func a() { print(1); } func b() { print(2); } a();").unwrap();
        check!(
            lines(&code)
                == [
                    "CALL a", "HALT", //
                    "LABEL a", "PUSH 1", "PRINT", "RET", //
                    "LABEL b", "PUSH 2", "PRINT", "RET",
                ]
        );

        let code = compile("func f() { return 1; } f();").unwrap();
        check!(lines(&code).iter().filter(|line| **line == "RET").count() == 1);
    }

    #[test]
    fn trailing_exit_labels_stay_in_range() {
        let sources = [
            "func f(int n) { if (n == 1) { return 1; } else { return 2; } } print(f(1)); print(f(2));",
            "func g(int n) { while (n > 0) { n--; } } g(3);",
        ];
        for source in sources {
            let code = compile(source).unwrap();
            check!(!lines(&code).last().unwrap().starts_with("LABEL"), "{code}");
            let_assert!(Ok(program) = code.parse::<Program>());
            check!(let Ok(()) = program.verify_labels(), "{code}");
        }
    }

    #[test]
    fn function_locals_do_not_leak() {
        let_assert!(
            Err(CompileError::UndeclaredVariable { name, pos, .. }) =
                compile("func f() { int i; i = 4; return i; }\nprint(i);")
        );
        check!(name.as_ref() == "i");
        check!(pos == Position { line: 2, column: 6 });

        // globals declared before the function stay visible inside it
        check!(compile("int g; func f() { return g; } print(f());").is_ok());
        // and a local may reuse a name only the function has declared
        check!(compile("func f() { int i; return i; } int i; i = 42;").is_ok());
    }

    #[test]
    fn declaration_errors() {
        let_assert!(Err(err) = compile("print(x);"));
        check!(err.to_string() == "1:6 undeclared variable <x>");

        let_assert!(Err(err) = compile("x = 5;"));
        check!(err.to_string() == "1:0 undeclared variable <x>");

        let_assert!(Err(err) = compile("int x;\nint x;"));
        check!(err.to_string() == "2:4 variable already defined: <x>");

        let_assert!(Err(err) = compile("int s;\nstack s;"));
        check!(err.to_string() == "2:6 variable already defined: <s>");

        let_assert!(Err(err) = compile("int x; x.push(1);"));
        check!(err.to_string() == "1:7 undeclared variable <x>");

        let_assert!(Err(err) = compile("stack s; s = 1;"));
        check!(err.to_string() == "1:9 undeclared variable <s>");

        let_assert!(Err(err) = compile("func f() { return 1; }\nfunc f() { return 2; }"));
        check!(err.to_string() == "2:5 function already defined: <f>");
        check!(err.name() == "f");
        check!(err.position() == Position { line: 2, column: 5 });
        check!(err.span() == (28..29));
    }

    #[test]
    fn declare_then_assign_order() {
        check!(compile("int x = 1; print(x);").unwrap() == "PUSH 1\nSTORE x\nLOAD x\nPRINT\nHALT\n");
        // the declaration is visible to its own initializer
        check!(compile("int x = x;").is_ok());
    }

    #[test]
    fn text_is_printed_as_written() {
        let code = compile("print(\"hello world\");").unwrap();
        check!(lines(&code) == ["PUSH \"hello world\"", "PRINT", "HALT"]);
    }
}
