use phf::{phf_map, Map};

use crate::error::Error;
use crate::token::{Literal, Token, Type};

pub struct Scanner;

impl Scanner {
    const KEYWORDS: Map<&'static str, Type> = phf_map! {
        "const" => Type::Const,
        "else" => Type::Else,
        "elseif" => Type::Elseif,
        "false" => Type::False,
        "fn" => Type::Fn,
        "for" => Type::For,
        "if" => Type::If,
        "in" => Type::In,
        "let" => Type::Let,
        "nil" => Type::Nil,
        "true" => Type::True,
        "while" => Type::While,
    };

    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Scanner
    }

    pub fn scan_tokens(&mut self, src: &str) -> TokenStream {
        TokenStream::new(src)
    }
}

/// Scans the whole source, stopping at the first malformed token.
pub fn tokenize(src: &str) -> Result<Vec<Token>, Error> {
    let mut stream = TokenStream::new(src);
    let tokens: Vec<Token> = stream.by_ref().collect();
    match stream.error() {
        Some(err) => Err(err.clone()),
        None => Ok(tokens),
    }
}

pub struct TokenStream {
    // Decoded up front so that peeking is O(1) instead of walking the utf-8 string
    src: Vec<char>,

    // `start` and `current` points to the start and end of the token being scanned
    start: usize,
    current: usize,

    line: usize,
    col: usize,
    start_line: usize,
    start_col: usize,

    // This represents a token's index in the token stream
    index: usize,

    // This flag is set to `true` if the eof is reached and the eof token has been emitted.
    eof: bool,
    error: Option<Error>,
}

impl TokenStream {
    pub fn new(src: &str) -> Self {
        TokenStream {
            src: src.chars().collect(),
            start: 0,
            current: 0,
            line: 1,
            col: 1,
            start_line: 1,
            start_col: 1,
            index: 0,
            eof: false,
            error: None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    fn scan_token(&mut self) -> Result<Option<Token>, Error> {
        let c = self.advance();

        let token = match c {
            '(' => Some(self.make_token(Type::LeftParen)),
            ')' => Some(self.make_token(Type::RightParen)),
            '{' => Some(self.make_token(Type::LeftBrace)),
            '}' => Some(self.make_token(Type::RightBrace)),
            '[' => Some(self.make_token(Type::LeftBracket)),
            ']' => Some(self.make_token(Type::RightBracket)),
            ',' => Some(self.make_token(Type::Comma)),
            '.' => Some(self.make_token(Type::Dot)),
            ':' => Some(self.make_token(Type::Colon)),
            '-' => Some(self.make_token(Type::Minus)),
            '+' => Some(self.make_token(Type::Plus)),
            ';' => Some(self.make_token(Type::SemiColon)),
            '*' => Some(self.make_token(Type::Star)),

            '!' => {
                if self.match_char('=') {
                    Some(self.make_token(Type::BangEqual))
                } else {
                    Some(self.make_token(Type::Bang))
                }
            }

            '=' => {
                if self.match_char('=') {
                    Some(self.make_token(Type::EqualEqual))
                } else {
                    Some(self.make_token(Type::Equal))
                }
            }

            '<' => {
                if self.match_char('=') {
                    Some(self.make_token(Type::LessEqual))
                } else {
                    Some(self.make_token(Type::Less))
                }
            }

            '>' => {
                if self.match_char('=') {
                    Some(self.make_token(Type::GreaterEqual))
                } else {
                    Some(self.make_token(Type::Greater))
                }
            }

            '&' if self.match_char('&') => Some(self.make_token(Type::AndAnd)),
            '|' if self.match_char('|') => Some(self.make_token(Type::OrOr)),

            '/' => {
                if self.match_char('/') {
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                    None
                } else {
                    Some(self.make_token(Type::Slash))
                }
            }

            '"' => Some(self.string()?),

            // White spaces and newlines, `advance` keeps the position up to date
            ' ' | '\t' | '\r' | '\n' => None,

            _ => {
                if c.is_ascii_digit() {
                    Some(self.number())
                } else if c.is_alphabetic() || c == '_' {
                    Some(self.identifier())
                } else {
                    return Err(Error::UnexpectedCharacter {
                        ch: c,
                        line: self.start_line,
                        col: self.start_col,
                    });
                }
            }
        };

        Ok(token)
    }

    fn string(&mut self) -> Result<Token, Error> {
        let mut value = String::new();
        while self.peek() != '"' && !self.is_at_end() {
            let c = self.advance();
            if c != '\\' {
                value.push(c);
                continue;
            }

            if self.is_at_end() {
                break;
            }

            let (line, col) = (self.line, self.col);
            let escaped = match self.advance() {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                '"' => '"',
                '\\' => '\\',
                other => return Err(Error::InvalidEscape { ch: other, line, col }),
            };
            value.push(escaped);
        }

        if self.is_at_end() {
            return Err(Error::UnterminatedString {
                line: self.start_line,
                col: self.start_col,
            });
        }

        // consume the closing "
        self.advance();
        Ok(self.make_token_with_val(Type::String, Literal::from(value)))
    }

    fn number(&mut self) -> Token {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.advance();

            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        // The lexeme only ever holds ascii digits and at most one dot, which always parses
        let text: String = self.src[self.start..self.current].iter().collect();
        let value = text.parse::<f64>().unwrap_or_default();
        self.make_token_with_val(Type::Number, Literal::Num(value))
    }

    fn identifier(&mut self) -> Token {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }

        let text: String = self.src[self.start..self.current].iter().collect();

        match Scanner::KEYWORDS.get(text.as_str()) {
            None => self.make_token(Type::Identifier),
            Some(Type::True) => self.make_token_with_val(Type::True, Literal::Bool(true)),
            Some(Type::False) => self.make_token_with_val(Type::False, Literal::Bool(false)),
            Some(keyword) => self.make_token(*keyword),
        }
    }

    fn peek(&self) -> char {
        self.src.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.src.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let res = self.peek();
        self.current += 1;
        if res == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        res
    }

    fn match_char(&mut self, c: char) -> bool {
        if self.is_at_end() || self.peek() != c {
            false
        } else {
            self.advance();
            true
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.src.len()
    }

    fn make_token(&mut self, ty: Type) -> Token {
        self.make_token_with_val(ty, Literal::Nil)
    }

    fn make_token_with_val(&mut self, ty: Type, val: Literal) -> Token {
        let lexeme = match ty {
            Type::Eof => String::new(),
            _ => self.src[self.start..self.current].iter().collect(),
        };

        let token = Token::new(ty, lexeme, self.start_line, self.start_col, self.index, val);
        self.index += 1;
        token
    }
}

impl Iterator for TokenStream {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        if self.eof || self.error.is_some() {
            return None;
        }

        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_col = self.col;

            let token = self.scan_token();
            match token {
                Ok(None) => continue,
                Ok(Some(token)) => return Some(token),
                Err(err) => {
                    self.error = Some(err);
                    return None;
                }
            }
        }

        self.start = self.current;
        self.start_line = self.line;
        self.start_col = self.col;
        self.eof = true;
        Some(self.make_token(Type::Eof))
    }
}
