use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Colon,
    SemiColon,
    Minus,
    Plus,
    Slash,
    Star,

    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    AndAnd,
    OrOr,

    Identifier,
    String,
    Number,

    Const,
    Else,
    Elseif,
    False,
    Fn,
    For,
    If,
    In,
    Let,
    Nil,
    True,
    While,

    Eof,
}

/// Coarse classification of a token type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Category {
    Identifier,
    Number,
    String,
    Keyword,
    Operator,
    Punctuation,
    Eof,
}

impl Type {
    pub fn category(self) -> Category {
        match self {
            Type::LeftParen
            | Type::RightParen
            | Type::LeftBrace
            | Type::RightBrace
            | Type::LeftBracket
            | Type::RightBracket
            | Type::Comma
            | Type::Dot
            | Type::Colon
            | Type::SemiColon => Category::Punctuation,

            Type::Minus
            | Type::Plus
            | Type::Slash
            | Type::Star
            | Type::Bang
            | Type::BangEqual
            | Type::Equal
            | Type::EqualEqual
            | Type::Greater
            | Type::GreaterEqual
            | Type::Less
            | Type::LessEqual
            | Type::AndAnd
            | Type::OrOr => Category::Operator,

            Type::Identifier => Category::Identifier,
            Type::String => Category::String,
            Type::Number => Category::Number,

            Type::Const
            | Type::Else
            | Type::Elseif
            | Type::False
            | Type::Fn
            | Type::For
            | Type::If
            | Type::In
            | Type::Let
            | Type::Nil
            | Type::True
            | Type::While => Category::Keyword,

            Type::Eof => Category::Eof,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Type::LeftParen => "'('",
            Type::RightParen => "')'",
            Type::LeftBrace => "'{'",
            Type::RightBrace => "'}'",
            Type::LeftBracket => "'['",
            Type::RightBracket => "']'",
            Type::Comma => "','",
            Type::Dot => "'.'",
            Type::Colon => "':'",
            Type::SemiColon => "';'",
            Type::Minus => "'-'",
            Type::Plus => "'+'",
            Type::Slash => "'/'",
            Type::Star => "'*'",
            Type::Bang => "'!'",
            Type::BangEqual => "'!='",
            Type::Equal => "'='",
            Type::EqualEqual => "'=='",
            Type::Greater => "'>'",
            Type::GreaterEqual => "'>='",
            Type::Less => "'<'",
            Type::LessEqual => "'<='",
            Type::AndAnd => "'&&'",
            Type::OrOr => "'||'",
            Type::Identifier => "identifier",
            Type::String => "string",
            Type::Number => "number",
            Type::Const => "'const'",
            Type::Else => "'else'",
            Type::Elseif => "'elseif'",
            Type::False => "'false'",
            Type::Fn => "'fn'",
            Type::For => "'for'",
            Type::If => "'if'",
            Type::In => "'in'",
            Type::Let => "'let'",
            Type::Nil => "'nil'",
            Type::True => "'true'",
            Type::While => "'while'",
            Type::Eof => "end of input",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
    Nil,
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Str(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Str(String::from(value))
    }
}

macro_rules! impl_from_num_for_literal {
    ( $( $t:ident )* ) => {
        $(
            impl From<$t> for Literal {
                fn from(n: $t) -> Literal {
                    Literal::Num(n as f64)
                }
            }
        )*
    }
}

impl_from_num_for_literal!(u8 i8 u16 i16 u32 i32 u64 i64 usize isize f32 f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenIndex(pub usize);

/// 1-based source location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub line: usize,
    pub col: usize,
}

impl Position {
    pub fn new(line: usize, col: usize) -> Self {
        Position { line, col }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub ty: Type,
    pub lexeme: String,
    pub line: usize,
    pub col: usize,
    pub idx: TokenIndex,
    pub value: Literal,
}

impl Token {
    pub fn new(
        ty: Type,
        lexeme: String,
        line: usize,
        col: usize,
        idx: usize,
        value: Literal,
    ) -> Self {
        Token {
            ty,
            lexeme,
            line,
            col,
            idx: TokenIndex(idx),
            value,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.line, self.col)
    }

    pub fn category(&self) -> Category {
        self.ty.category()
    }
}
