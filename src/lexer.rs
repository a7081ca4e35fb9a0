use core::fmt;

pub use logos::Span;
use logos::{Lexer, Logos};

fn read_number(lexer: &mut Lexer<Token>) -> Result<i64, LexerError> {
    lexer
        .slice()
        .parse::<i64>()
        .map_err(|_| LexerError::NumberTooBig)
}

// The raw text (quotes and escapes included) is what ends up behind `PUSH`,
// escapes are only resolved when the machine prints the value.
fn read_string(lexer: &mut Lexer<Token>) -> Box<str> {
    Box::from(lexer.slice())
}

fn unterminated_string(_: &mut Lexer<Token>) -> Result<Box<str>, LexerError> {
    Err(LexerError::UnterminatedString)
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid token encountered")]
    Invalid,
    #[error("number literal too big")]
    NumberTooBig,
    #[error("unterminated string literal")]
    UnterminatedString,
}

#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum Token {
    #[token("int")]
    Int,
    #[token("stack")]
    Stack,
    #[token("func")]
    Func,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("return")]
    Return,
    #[token("print")]
    Print,
    #[token("input")]
    Input,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,

    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Boolean(bool),
    #[regex("[0-9]+", read_number)]
    Number(i64),
    #[regex(r#""([^"\\]|\\.)*""#, read_string)]
    #[regex(r#""([^"\\]|\\.)*"#, unterminated_string)]
    String(Box<str>),
    #[regex("[a-zA-Z_][a-zA-Z0-9_]*", |l| Box::from(l.slice()))]
    Identifier(Box<str>),
}

impl Token {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Int => "int",
            Self::Stack => "stack",
            Self::Func => "func",
            Self::If => "if",
            Self::Elif => "elif",
            Self::Else => "else",
            Self::While => "while",
            Self::Return => "return",
            Self::Print => "print",
            Self::Input => "input",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::Semicolon => ";",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::Assign => "=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Caret => "^",
            Self::PlusPlus => "++",
            Self::MinusMinus => "--",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Less => "<",
            Self::LessEq => "<=",
            Self::Greater => ">",
            Self::GreaterEq => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Boolean(b) => return write!(f, "{b}"),
            Self::Number(n) => return write!(f, "{n}"),
            Self::String(s) | Self::Identifier(s) => s,
        };
        f.write_str(text)
    }
}

/// A line (1-based) and column (0-based, in characters) inside a source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Maps byte offsets to [`Position`]s
#[derive(Debug, Clone)]
pub struct LineIndex<'src> {
    source: &'src str,
    line_starts: Vec<usize>,
}

impl<'src> LineIndex<'src> {
    pub fn new(source: &'src str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self {
            source,
            line_starts,
        }
    }

    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.source.len());
        let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
        let line_start = self.line_starts[line];
        let column = self
            .source
            .get(line_start..offset)
            .map_or(offset - line_start, |text| text.chars().count());
        Position {
            line: line + 1,
            column,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LexerError, LineIndex, Position, Token};
    use assert2::{check, let_assert};

    fn lex(source: &str) -> Vec<Result<Token, LexerError>> {
        Token::lexer(source).collect()
    }

    #[test]
    fn keywords_win_over_identifiers() {
        check!(lex("int") == [Ok(Token::Int)]);
        check!(lex("integer") == [Ok(Token::Identifier(Box::from("integer")))]);
        check!(lex("elif else") == [Ok(Token::Elif), Ok(Token::Else)]);
        check!(lex("true false") == [Ok(Token::Boolean(true)), Ok(Token::Boolean(false))]);
    }

    #[test]
    fn multi_character_operators() {
        check!(
            lex("++ + -- - <= < >= > == = != && ||")
                == [
                    Ok(Token::PlusPlus),
                    Ok(Token::Plus),
                    Ok(Token::MinusMinus),
                    Ok(Token::Minus),
                    Ok(Token::LessEq),
                    Ok(Token::Less),
                    Ok(Token::GreaterEq),
                    Ok(Token::Greater),
                    Ok(Token::EqEq),
                    Ok(Token::Assign),
                    Ok(Token::NotEq),
                    Ok(Token::AndAnd),
                    Ok(Token::OrOr),
                ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let source = "// hello world\nprint /* a\n * multi-line comment */ (1);";
        check!(
            lex(source)
                == [
                    Ok(Token::Print),
                    Ok(Token::LParen),
                    Ok(Token::Number(1)),
                    Ok(Token::RParen),
                    Ok(Token::Semicolon),
                ]
        );
    }

    #[test]
    fn strings_keep_their_raw_text() {
        let tokens = lex(r#""hello \"big\" world\n""#);
        let_assert!([Ok(Token::String(s))] = tokens.as_slice());
        check!(s.as_ref() == r#""hello \"big\" world\n""#);
        check!(lex(r#""oops"#) == [Err(LexerError::UnterminatedString)]);
    }

    #[test]
    fn numbers() {
        check!(lex("42") == [Ok(Token::Number(42))]);
        check!(lex("99999999999999999999") == [Err(LexerError::NumberTooBig)]);
        check!(lex("#") == [Err(LexerError::Invalid)]);
    }

    #[test]
    fn positions() {
        let index = LineIndex::new("int x;\nint x;");
        check!(index.position(0) == Position { line: 1, column: 0 });
        check!(index.position(4) == Position { line: 1, column: 4 });
        check!(index.position(11) == Position { line: 2, column: 4 });
        check!(index.position(11).to_string() == "2:4");
    }
}
