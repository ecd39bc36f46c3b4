use std::fmt::{self, Display, Formatter};

use seal_core::{Error as CoreError, Position, Token, Type};
use thiserror::Error;

/// Classification shared by every error the interpreter can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Lex,
    Parse,
    UndefinedName,
    ConstReassign,
    ConstMutation,
    Type,
    Index,
    NotCallable,
    Arithmetic,
    CircularModule,
    ModuleNotFound,
    Host,
    Suspend,
    StackOverflow,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Lex => "LexError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::UndefinedName => "UndefinedNameError",
            ErrorKind::ConstReassign => "ConstReassignError",
            ErrorKind::ConstMutation => "ConstMutationError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Index => "IndexError",
            ErrorKind::NotCallable => "NotCallableError",
            ErrorKind::Arithmetic => "ArithmeticError",
            ErrorKind::CircularModule => "CircularModuleError",
            ErrorKind::ModuleNotFound => "ModuleNotFoundError",
            ErrorKind::Host => "HostError",
            ErrorKind::Suspend => "SuspendError",
            ErrorKind::StackOverflow => "StackOverflowError",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Error, PartialEq, Clone)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[error("[line {line}:{col}] lex error: {source}")]
    LexError {
        line: usize,
        col: usize,
        source: CoreError,
    },

    #[error("[line {line}:{col}] parse error: expected {expected}, found {found}")]
    ParseError {
        expected: String,
        found: String,
        line: usize,
        col: usize,
    },

    #[error("{}{kind}: {msg}", location(.pos))]
    RuntimeError {
        kind: ErrorKind,
        msg: String,
        pos: Option<Position>,
    },

    // Raised by `wait` and caught by the statement executor, the same way a return value
    // unwinds through the call chain. It never reaches the caller of `interpret`.
    #[error("wait() called outside of a task")]
    Suspend(f64),
}

fn location(pos: &Option<Position>) -> String {
    match pos {
        Some(pos) => format!("[line {}:{}] ", pos.line, pos.col),
        None => String::new(),
    }
}

impl Error {
    /// A runtime error without a source position, typically raised by a native function.
    /// The call site attaches its own position on the way out.
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Error::RuntimeError {
            kind,
            msg: msg.into(),
            pos: None,
        }
    }

    /// Wraps a failure reported by a host capability.
    pub fn host(msg: impl Into<String>) -> Self {
        Error::new(ErrorKind::Host, msg)
    }

    pub(crate) fn runtime(kind: ErrorKind, token: &Token, msg: impl Into<String>) -> Self {
        Error::RuntimeError {
            kind,
            msg: msg.into(),
            pos: Some(token.position()),
        }
    }

    pub(crate) fn parse(token: &Token, expected: &str) -> Self {
        Error::ParseError {
            expected: String::from(expected),
            found: describe(token),
            line: token.line,
            col: token.col,
        }
    }

    /// Attaches `pos` to a runtime error that does not carry one yet.
    pub(crate) fn at(self, pos: Position) -> Self {
        match self {
            Error::RuntimeError {
                kind,
                msg,
                pos: None,
            } => Error::RuntimeError {
                kind,
                msg,
                pos: Some(pos),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::LexError { .. } => ErrorKind::Lex,
            Error::ParseError { .. } => ErrorKind::Parse,
            Error::RuntimeError { kind, .. } => *kind,
            Error::Suspend(_) => ErrorKind::Suspend,
        }
    }

    pub fn position(&self) -> Option<Position> {
        match self {
            Error::LexError { source, .. } => Some(source.position()),
            Error::ParseError { line, col, .. } => Some(Position::new(*line, *col)),
            Error::RuntimeError { pos, .. } => *pos,
            Error::Suspend(_) => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Error::RuntimeError { msg, .. } => msg.clone(),
            other => other.to_string(),
        }
    }
}

fn describe(token: &Token) -> String {
    match token.ty {
        Type::Eof => String::from("end of input"),
        Type::Identifier => format!("identifier '{}'", token.lexeme),
        Type::Number => format!("number {}", token.lexeme),
        Type::String => format!("string {}", token.lexeme),
        _ => format!("'{}'", token.lexeme),
    }
}

impl From<CoreError> for Error {
    fn from(value: CoreError) -> Self {
        let Position { line, col } = value.position();
        Error::LexError {
            line,
            col,
            source: value,
        }
    }
}

#[cfg(test)]
mod tests {
    use seal_core::{Literal, Position, Token, Type};

    use crate::error::{Error, ErrorKind};

    #[test]
    fn test_runtime_error_display() {
        let err = Error::new(ErrorKind::Type, "operands must be numbers");
        assert_eq!(err.to_string(), "TypeError: operands must be numbers");

        let err = err.at(Position::new(3, 7));
        assert_eq!(
            err.to_string(),
            "[line 3:7] TypeError: operands must be numbers"
        );

        // an existing position wins
        let err = err.at(Position::new(1, 1));
        assert_eq!(err.position(), Some(Position::new(3, 7)));
    }

    #[test]
    fn test_parse_error_display() {
        let token = Token::new(Type::Identifier, String::from("foo"), 2, 5, 0, Literal::Nil);
        let err = Error::parse(&token, "'='");
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(
            err.to_string(),
            "[line 2:5] parse error: expected '=', found identifier 'foo'"
        );
    }
}
