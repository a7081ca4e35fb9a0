//! Parsing starts where the lexer drops off, and builds the [`ast`] consumed by
//! the code generator with a small recursive-descent parser.
//!
//! Precedence, loosest first: `||`, `&&`, `== !=`, `< <= > >=`, `+ -`,
//! `* / %`, unary `+ -`, then `^` (right associative).
use crate::lexer::{LexerError, LineIndex, Position, Span, Token};

pub mod ast;

use ast::{
    BinaryOp, ConditionBlock, DeclKind, Declaration, Expr, FunctionDef, Ident, IncDec, Item,
    Literal, LiteralKind, Printable, Program, StackOpKind, Stmt, UnaryOp,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{pos} {message}")]
pub struct SyntaxError {
    pub pos: Position,
    pub span: Span,
    pub message: Box<str>,
}

pub type ParseResult<T> = Result<T, SyntaxError>;

/// Parse a whole source text into a [`Program`].
pub fn parse(source: &str) -> ParseResult<Program> {
    let index = LineIndex::new(source);
    let mut tokens = vec![];
    for (token, span) in Token::lexer(source).spanned() {
        match token {
            Ok(token) => tokens.push((token, span)),
            Err(err) => {
                let message = match err {
                    LexerError::Invalid => {
                        format!("invalid token: '{}'", &source[span.clone()])
                    }
                    err => err.to_string(),
                };
                return Err(SyntaxError {
                    pos: index.position(span.start),
                    span,
                    message: message.into(),
                });
            }
        }
    }

    let mut parser = Parser {
        tokens,
        cursor: 0,
        index,
        end: source.len(),
    };
    parser.program()
}

const BINARY_LEVELS: usize = 6;

// Binary levels from loosest (0) to tightest; everything past the last one is unary.
fn binary_op(level: usize, token: &Token) -> Option<BinaryOp> {
    let op = match (level, token) {
        (0, Token::OrOr) => BinaryOp::Or,
        (1, Token::AndAnd) => BinaryOp::And,
        (2, Token::EqEq) => BinaryOp::Eq,
        (2, Token::NotEq) => BinaryOp::NotEq,
        (3, Token::Less) => BinaryOp::Less,
        (3, Token::LessEq) => BinaryOp::LessEq,
        (3, Token::Greater) => BinaryOp::Greater,
        (3, Token::GreaterEq) => BinaryOp::GreaterEq,
        (4, Token::Plus) => BinaryOp::Add,
        (4, Token::Minus) => BinaryOp::Sub,
        (5, Token::Star) => BinaryOp::Mul,
        (5, Token::Slash) => BinaryOp::Div,
        (5, Token::Percent) => BinaryOp::Mod,
        _ => return None,
    };
    Some(op)
}

struct Parser<'src> {
    tokens: Vec<(Token, Span)>,
    cursor: usize,
    index: LineIndex<'src>,
    end: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<&Token> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.cursor + n).map(|(token, _)| token)
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.cursor)
            .map_or(self.end..self.end, |(_, span)| span.clone())
    }

    fn bump(&mut self) -> Option<(Token, Span)> {
        let next = self.tokens.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        next
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let span = self.current_span();
        let message: String = message.into();
        SyntaxError {
            pos: self.index.position(span.start),
            span,
            message: message.into_boxed_str(),
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        match self.peek() {
            Some(token) => self.error_here(format!("expected {expected}, but got \"{token}\"")),
            None => self.error_here(format!("expected {expected}, but reached end of input")),
        }
    }

    fn expect(&mut self, expected: Token) -> ParseResult<Span> {
        if self.peek() == Some(&expected) {
            let span = self.current_span();
            self.cursor += 1;
            Ok(span)
        } else {
            Err(self.unexpected(&format!("\"{expected}\"")))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<Ident> {
        match self.tokens.get(self.cursor) {
            Some((Token::Identifier(name), span)) => {
                let ident = Ident {
                    name: name.clone(),
                    pos: self.index.position(span.start),
                    span: span.clone(),
                };
                self.cursor += 1;
                Ok(ident)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn program(&mut self) -> ParseResult<Program> {
        let mut items = vec![];
        while self.peek().is_some() {
            if self.peek() == Some(&Token::Func) {
                items.push(Item::Function(self.function()?));
            } else {
                items.push(Item::Main(self.statement()?));
            }
        }
        Ok(Program { items })
    }

    fn function(&mut self) -> ParseResult<FunctionDef> {
        self.expect(Token::Func)?;
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let mut params = vec![];
        if !self.eat(&Token::RParen) {
            loop {
                self.expect(Token::Int)?;
                params.push(self.expect_ident()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen)?;
        }
        let body = self.block()?;
        Ok(FunctionDef { name, params, body })
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(Token::LBrace)?;
        let mut stmts = vec![];
        while !self.eat(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.unexpected("\"}\""));
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn parenthesized(&mut self) -> ParseResult<Expr> {
        self.expect(Token::LParen)?;
        let expr = self.expr()?;
        self.expect(Token::RParen)?;
        Ok(expr)
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let stmt = match self.peek() {
            Some(Token::Func) => {
                return Err(self.error_here("functions may only be defined at top level"))
            }
            Some(Token::Int) => {
                self.bump();
                let target = self.expect_ident()?;
                if self.eat(&Token::Assign) {
                    let value = self.expr()?;
                    Stmt::DeclareAssign { target, value }
                } else {
                    Stmt::Declare(Declaration {
                        kind: DeclKind::Scalar,
                        name: target,
                    })
                }
            }
            Some(Token::Stack) => {
                self.bump();
                Stmt::Declare(Declaration {
                    kind: DeclKind::Stack,
                    name: self.expect_ident()?,
                })
            }
            Some(Token::If) => return self.if_statement(),
            Some(Token::While) => {
                self.bump();
                let condition = self.parenthesized()?;
                let body = self.block()?;
                return Ok(Stmt::While { condition, body });
            }
            Some(Token::Return) => {
                self.bump();
                if self.peek() == Some(&Token::Semicolon) {
                    Stmt::Return(None)
                } else {
                    Stmt::Return(Some(self.expr()?))
                }
            }
            Some(Token::Print) => {
                self.bump();
                self.expect(Token::LParen)?;
                let printable = match (self.peek(), self.peek_nth(1)) {
                    (Some(Token::String(text)), Some(Token::RParen)) => {
                        let text = text.clone();
                        self.bump();
                        Printable::Text(text)
                    }
                    _ => Printable::Expr(self.expr()?),
                };
                self.expect(Token::RParen)?;
                Stmt::Print(printable)
            }
            Some(Token::PlusPlus | Token::MinusMinus) => {
                let kind = match self.bump() {
                    Some((Token::PlusPlus, _)) => IncDec::PreIncrement,
                    _ => IncDec::PreDecrement,
                };
                Stmt::IncDec {
                    kind,
                    target: self.expect_ident()?,
                }
            }
            Some(Token::Identifier(_)) => match self.peek_nth(1) {
                Some(Token::Assign) => {
                    let target = self.expect_ident()?;
                    self.bump();
                    Stmt::Assign {
                        target,
                        value: self.expr()?,
                    }
                }
                Some(Token::PlusPlus | Token::MinusMinus) => {
                    let target = self.expect_ident()?;
                    let kind = match self.bump() {
                        Some((Token::PlusPlus, _)) => IncDec::PostIncrement,
                        _ => IncDec::PostDecrement,
                    };
                    Stmt::IncDec { kind, target }
                }
                _ => Stmt::Expr(self.expr()?),
            },
            Some(_) => Stmt::Expr(self.expr()?),
            None => return Err(self.unexpected("a statement")),
        };
        self.expect(Token::Semicolon)?;
        Ok(stmt)
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        self.expect(Token::If)?;
        let condition = self.parenthesized()?;
        let body = self.block()?;
        let mut branches = vec![ConditionBlock { condition, body }];
        while self.eat(&Token::Elif) {
            let condition = self.parenthesized()?;
            let body = self.block()?;
            branches.push(ConditionBlock { condition, body });
        }
        let otherwise = if self.eat(&Token::Else) {
            Some(self.block()?)
        } else {
            None
        };
        Ok(Stmt::If {
            branches,
            otherwise,
        })
    }

    fn expr(&mut self) -> ParseResult<Expr> {
        self.binary_level(0)
    }

    fn binary_level(&mut self, level: usize) -> ParseResult<Expr> {
        if level == BINARY_LEVELS {
            return self.unary();
        }
        let mut lhs = self.binary_level(level + 1)?;
        while let Some(op) = self.peek().and_then(|token| binary_op(level, token)) {
            self.bump();
            let rhs = self.binary_level(level + 1)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        if self.eat(&Token::Plus) {
            Ok(Expr::unary(UnaryOp::Plus, self.unary()?))
        } else if self.eat(&Token::Minus) {
            Ok(Expr::unary(UnaryOp::Minus, self.unary()?))
        } else {
            self.power()
        }
    }

    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.primary()?;
        if self.eat(&Token::Caret) {
            let exponent = self.unary()?;
            Ok(Expr::binary(BinaryOp::Pow, base, exponent))
        } else {
            Ok(base)
        }
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let literal = match self.peek() {
            Some(Token::Number(n)) => Some((LiteralKind::Number, Box::from(n.to_string()))),
            Some(Token::Boolean(b)) => Some((LiteralKind::Boolean, Box::from(b.to_string()))),
            Some(Token::String(s)) => Some((LiteralKind::String, s.clone())),
            _ => None,
        };
        if let Some((kind, text)) = literal {
            self.bump();
            return Ok(Expr::Literal(Literal { kind, text }));
        }

        match self.peek() {
            Some(Token::Input) => {
                self.bump();
                self.expect(Token::LParen)?;
                self.expect(Token::RParen)?;
                Ok(Expr::Input)
            }
            Some(Token::LParen) => self.parenthesized(),
            Some(Token::Identifier(_)) => {
                let name = self.expect_ident()?;
                match self.peek() {
                    Some(Token::LParen) => {
                        self.bump();
                        let mut args = vec![];
                        if !self.eat(&Token::RParen) {
                            loop {
                                args.push(self.expr()?);
                                if !self.eat(&Token::Comma) {
                                    break;
                                }
                            }
                            self.expect(Token::RParen)?;
                        }
                        Ok(Expr::Call { name, args })
                    }
                    Some(Token::Dot) => {
                        self.bump();
                        self.stack_op(name)
                    }
                    _ => Ok(Expr::Variable(name)),
                }
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn stack_op(&mut self, target: Ident) -> ParseResult<Expr> {
        let method = self.expect_ident()?;
        let kind = match method.as_str() {
            "push" => StackOpKind::Push,
            "pop" => StackOpKind::Pop,
            "peek" => StackOpKind::Peek,
            "isEmpty" => StackOpKind::IsEmpty,
            other => {
                return Err(SyntaxError {
                    pos: method.pos,
                    span: method.span.clone(),
                    message: format!("unknown stack operation: {other}").into(),
                })
            }
        };
        self.expect(Token::LParen)?;
        let value = if kind == StackOpKind::Push {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        self.expect(Token::RParen)?;
        Ok(Expr::StackOp {
            kind,
            target,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{
        ast::{BinaryOp, Expr, IncDec, Item, Printable, StackOpKind, Stmt, UnaryOp},
        parse,
    };
    use crate::lexer::Position;

    fn single_expr(source: &str) -> Expr {
        let program = parse(source).unwrap();
        let_assert!([Item::Main(Stmt::Print(Printable::Expr(expr)))] = program.items.as_slice());
        expr.clone()
    }

    #[test]
    fn precedence_and_associativity() {
        check!(
            single_expr("print(2+3*3);")
                == Expr::binary(
                    BinaryOp::Add,
                    Expr::number(2),
                    Expr::binary(BinaryOp::Mul, Expr::number(3), Expr::number(3))
                )
        );
        check!(
            single_expr("print(8-2+5);")
                == Expr::binary(
                    BinaryOp::Add,
                    Expr::binary(BinaryOp::Sub, Expr::number(8), Expr::number(2)),
                    Expr::number(5)
                )
        );
        check!(
            single_expr("print(2^3^2);")
                == Expr::binary(
                    BinaryOp::Pow,
                    Expr::number(2),
                    Expr::binary(BinaryOp::Pow, Expr::number(3), Expr::number(2))
                )
        );
        check!(
            single_expr("print(-2 - 3);")
                == Expr::binary(
                    BinaryOp::Sub,
                    Expr::unary(UnaryOp::Minus, Expr::number(2)),
                    Expr::number(3)
                )
        );
        check!(
            single_expr("print(true || 1 < 2 && false);")
                == Expr::binary(
                    BinaryOp::Or,
                    Expr::boolean(true),
                    Expr::binary(
                        BinaryOp::And,
                        Expr::binary(BinaryOp::Less, Expr::number(1), Expr::number(2)),
                        Expr::boolean(false)
                    )
                )
        );
    }

    #[test]
    fn functions_and_main_statements() {
        let program = parse(
            "func add(int a, int b) { return a+b; }\nprint(add(5,8));\nprint(\"done\");",
        )
        .unwrap();
        let_assert!(
            [Item::Function(func), Item::Main(Stmt::Print(Printable::Expr(call))), Item::Main(Stmt::Print(Printable::Text(text)))] =
                program.items.as_slice()
        );
        check!(func.name.as_str() == "add");
        check!(func.params.iter().map(|p| p.as_str()).collect::<Vec<_>>() == ["a", "b"]);
        let_assert!(Expr::Call { name, args } = call);
        check!(name.as_str() == "add");
        check!(args.len() == 2);
        check!(text.as_ref() == "\"done\"");
    }

    #[test]
    fn increments_and_stack_ops() {
        let program = parse("stack s; int a; a++; --a; s.push(4+3); s.pop();").unwrap();
        let kinds = program
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Main(Stmt::IncDec { kind, .. }) => Some(*kind),
                _ => None,
            })
            .collect::<Vec<_>>();
        check!(kinds == [IncDec::PostIncrement, IncDec::PreDecrement]);
        let_assert!(
            Item::Main(Stmt::Expr(Expr::StackOp {
                kind: StackOpKind::Push,
                value: Some(_),
                ..
            })) = &program.items[4]
        );
    }

    #[test]
    fn if_elif_else_chain() {
        let program = parse("if(1<2){print(1);} elif(2<3){print(2);} else {print(3);}").unwrap();
        let_assert!([Item::Main(Stmt::If { branches, otherwise })] = program.items.as_slice());
        check!(branches.len() == 2);
        check!(otherwise.as_ref().map(Vec::len) == Some(1));
    }

    #[test]
    fn identifiers_record_positions() {
        let program = parse("int a;\n  a = 5;").unwrap();
        let_assert!(Item::Main(Stmt::Assign { target, .. }) = &program.items[1]);
        check!(target.pos == Position { line: 2, column: 2 });
        check!(target.span == (9..10));
    }

    #[test]
    fn syntax_errors() {
        let_assert!(Err(err) = parse("print(1"));
        check!(err.to_string() == "1:7 expected \")\", but reached end of input");

        let_assert!(Err(err) = parse("int x;\nx = $;"));
        check!(err.pos == Position { line: 2, column: 4 });
        check!(err.message.as_ref() == "invalid token: '$'");

        let_assert!(Err(err) = parse("while(1) { func f() {} }"));
        check!(err.message.as_ref() == "functions may only be defined at top level");

        let_assert!(Err(err) = parse("stack s; s.size();"));
        check!(err.message.as_ref() == "unknown stack operation: size");
    }
}
