use core::fmt;
use std::borrow::Cow;

/// A value on the operand stack, in a variable or on a named stack.
///
/// Values are untyped printable tokens. Whether one is an integer or a boolean
/// is decided by the instruction that consumes it:
///
/// - integers are whatever parses as an `i64`
/// - booleans are the tokens `true` and `false`
/// - a value is truthy when it is a nonzero integer or the token `true`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Value(Box<str>);

pub const TRUE: &str = "true";
pub const FALSE: &str = "false";

impl Value {
    pub fn new(text: impl Into<Box<str>>) -> Self {
        Self(text.into())
    }

    pub fn integer(value: i64) -> Self {
        Self(value.to_string().into_boxed_str())
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(if value { TRUE } else { FALSE })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_integer(&self) -> Option<i64> {
        self.0.parse().ok()
    }

    pub fn is_truthy(&self) -> bool {
        match self.as_integer() {
            Some(value) => value != 0,
            None => &*self.0 == TRUE,
        }
    }

    /// Numeric equality when both sides are integers, textual otherwise
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self.as_integer(), other.as_integer()) {
            (Some(lhs), Some(rhs)) => lhs == rhs,
            _ => self.0 == other.0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Resolve backslash escapes the way string literals are written in source.
///
/// Recognized: `\n \t \r \b \f \\ \" \'` and `\uXXXX`. Any other escape is
/// left as written.
pub fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('\\') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let rest = chars.as_str();
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('u') => match rest.get(1..5).and_then(decode_unicode) {
                Some(decoded) => {
                    out.push(decoded);
                    chars = rest[5..].chars();
                }
                None => out.push_str("\\u"),
            },
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}

fn decode_unicode(hex: &str) -> Option<char> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}
