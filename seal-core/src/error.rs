use thiserror::Error;

use crate::token::Position;

#[derive(Debug, Error, PartialEq, Clone)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    #[error("unterminated string")]
    UnterminatedString { line: usize, col: usize },

    #[error("unexpected character '{ch}'")]
    UnexpectedCharacter { ch: char, line: usize, col: usize },

    #[error("invalid escape sequence '\\{ch}'")]
    InvalidEscape { ch: char, line: usize, col: usize },
}

impl Error {
    pub fn line(&self) -> usize {
        self.position().line
    }

    pub fn position(&self) -> Position {
        match self {
            Error::UnterminatedString { line, col } => Position::new(*line, *col),
            Error::UnexpectedCharacter { line, col, .. } => Position::new(*line, *col),
            Error::InvalidEscape { line, col, .. } => Position::new(*line, *col),
        }
    }
}
