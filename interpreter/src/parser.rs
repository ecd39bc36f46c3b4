use std::rc::Rc;

use seal_core::{tokenize, Literal, Token, Type};

use crate::ast::{Block, Expr, FunctionDecl, Stmt};
use crate::error::Error;
use crate::limits::ARG_LIMIT;

pub struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
}

// A wrapper over the statements to not leak Stmt to public
#[derive(Debug, PartialEq)]
pub struct Program(pub(crate) Block);

// Helper alias for shorter return types
type BlockResult = Result<Block, Error>;
type StmtResult = Result<Stmt, Error>;
type ExprResult = Result<Expr, Error>;

/// Lexes and parses `src` in one go.
pub fn parse_source(src: &str) -> Result<Program, Error> {
    let tokens = tokenize(src)?;
    Parser::new(&tokens).parse()
}

// Binding strength of the infix operators, higher binds tighter
fn precedence(ty: Type) -> Option<u8> {
    match ty {
        Type::OrOr => Some(1),
        Type::AndAnd => Some(2),
        Type::EqualEqual | Type::BangEqual => Some(3),
        Type::Less | Type::LessEqual | Type::Greater | Type::GreaterEqual => Some(4),
        Type::Plus | Type::Minus => Some(5),
        Type::Star | Type::Slash => Some(6),
        _ => None,
    }
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Parser { tokens, current: 0 }
    }

    /// Parses the whole token sequence. The first grammar violation aborts the pass.
    pub fn parse(&mut self) -> Result<Program, Error> {
        let mut statements = Vec::new();
        self.skip_terminators();
        while !self.is_at_end() {
            statements.push(self.declaration()?);
            self.skip_terminators();
        }

        Ok(Program(statements.into()))
    }

    fn declaration(&mut self) -> StmtResult {
        if self.match_one(Type::Let) {
            self.var_declaration(false)
        } else if self.match_one(Type::Const) {
            if self.match_one(Type::Fn) {
                self.function_declaration(true)
            } else {
                self.var_declaration(true)
            }
        } else if self.check(Type::Fn) && self.check_next(Type::Identifier) {
            self.advance();
            self.function_declaration(false)
        } else {
            self.statement()
        }
    }

    fn var_declaration(&mut self, constant: bool) -> StmtResult {
        let name = self.consume(Type::Identifier, "variable name")?.clone();

        let init = if self.match_one(Type::Equal) {
            self.expression()?
        } else if constant {
            return Err(Error::parse(self.peek(), "'=' after constant name"));
        } else {
            Expr::literal(Literal::Nil)
        };

        Ok(Stmt::Let {
            name,
            init,
            constant,
        })
    }

    fn function_declaration(&mut self, constant: bool) -> StmtResult {
        let keyword = self.previous().clone();
        let name = self.consume(Type::Identifier, "function name")?.clone();
        let decl = self.function(Some(name), keyword)?;
        Ok(Stmt::Function {
            decl: Rc::new(decl),
            constant,
        })
    }

    // Parameter list and body, shared by declarations and function literals
    fn function(&mut self, name: Option<Token>, keyword: Token) -> Result<FunctionDecl, Error> {
        self.consume(Type::LeftParen, "'(' before parameters")?;

        let mut params = Vec::new();
        if !self.check(Type::RightParen) {
            loop {
                if params.len() >= ARG_LIMIT {
                    return Err(Error::parse(self.peek(), "at most 255 parameters"));
                }

                params.push(self.consume(Type::Identifier, "parameter name")?.clone());
                if !self.match_one(Type::Comma) {
                    break;
                }
            }
        }

        self.consume(Type::RightParen, "')' after parameters")?;
        let body = self.block("function body")?;

        Ok(FunctionDecl {
            name,
            keyword,
            params,
            body,
        })
    }

    fn statement(&mut self) -> StmtResult {
        if self.match_one(Type::If) {
            self.if_statement()
        } else if self.match_one(Type::For) {
            self.for_statement()
        } else if self.match_one(Type::While) {
            self.while_statement()
        } else {
            Ok(Stmt::expression(self.expression()?))
        }
    }

    fn block(&mut self, context: &str) -> BlockResult {
        self.consume(Type::LeftBrace, &format!("'{{' before {}", context))?;

        let mut stmts = Vec::new();
        self.skip_terminators();
        while !self.check(Type::RightBrace) && !self.is_at_end() {
            stmts.push(self.declaration()?);
            self.skip_terminators();
        }

        self.consume(Type::RightBrace, &format!("'}}' after {}", context))?;
        Ok(stmts.into())
    }

    fn condition(&mut self, keyword: &str) -> ExprResult {
        self.consume(Type::LeftParen, &format!("'(' after '{}'", keyword))?;
        let condition = self.expression()?;
        self.consume(Type::RightParen, &format!("')' after {} condition", keyword))?;
        Ok(condition)
    }

    fn if_statement(&mut self) -> StmtResult {
        let token = self.previous().clone();

        let mut branches = Vec::new();
        let condition = self.condition("if")?;
        branches.push((condition, self.block("if body")?));

        while self.match_one(Type::Elseif) {
            let condition = self.condition("elseif")?;
            branches.push((condition, self.block("elseif body")?));
        }

        let else_branch = if self.match_one(Type::Else) {
            Some(self.block("else body")?)
        } else {
            None
        };

        Ok(Stmt::If {
            branches,
            else_branch,
            token,
        })
    }

    fn while_statement(&mut self) -> StmtResult {
        let token = self.previous().clone();
        let condition = self.condition("while")?;
        let body = self.block("while body")?;
        Ok(Stmt::While {
            condition,
            body,
            token,
        })
    }

    // Either `for (i = start, end[, step])` or `for (key, value in expr)`
    fn for_statement(&mut self) -> StmtResult {
        let token = self.previous().clone();
        self.consume(Type::LeftParen, "'(' after 'for'")?;
        let first = self.consume(Type::Identifier, "loop variable name")?.clone();

        if self.match_one(Type::Equal) {
            let start = self.expression()?;
            self.consume(Type::Comma, "',' after loop start")?;
            let end = self.expression()?;
            let step = if self.match_one(Type::Comma) {
                Some(self.expression()?)
            } else {
                None
            };
            self.consume(Type::RightParen, "')' after for clauses")?;

            return Ok(Stmt::NumericFor {
                var: first,
                start,
                end,
                step,
                body: self.block("for body")?,
                token,
            });
        }

        self.consume(Type::Comma, "'=' or ',' after loop variable")?;
        let value = self.consume(Type::Identifier, "value variable name")?.clone();
        self.consume(Type::In, "'in' after loop variables")?;
        let iterable = self.expression()?;
        self.consume(Type::RightParen, "')' after for clauses")?;

        Ok(Stmt::ForIn {
            key: first,
            value,
            iterable,
            body: self.block("for body")?,
            token,
        })
    }

    fn expression(&mut self) -> ExprResult {
        self.assignment()
    }

    fn assignment(&mut self) -> ExprResult {
        let expr = self.binary(1)?;
        if !self.match_one(Type::Equal) {
            return Ok(expr);
        }

        let equals = self.previous().clone();
        let value = Box::new(self.assignment()?);

        match expr {
            Expr::Variable { name } => Ok(Expr::Assign { name, value }),
            Expr::Index {
                object,
                index,
                bracket,
            } => Ok(Expr::SetIndex {
                object,
                index,
                value,
                token: bracket,
            }),
            Expr::Member { object, name } => Ok(Expr::SetIndex {
                object,
                index: Box::new(Expr::literal(name.lexeme.as_str())),
                value,
                token: name,
            }),
            _ => Err(Error::parse(&equals, "assignable target before '='")),
        }
    }

    // Precedence climbing over the binary operator table; every level is left associative
    fn binary(&mut self, min_prec: u8) -> ExprResult {
        let mut expr = self.unary()?;

        while let Some(prec) = precedence(self.peek().ty) {
            if prec < min_prec {
                break;
            }
            // a leading `-` on a new line starts a negated expression statement
            if self.check(Type::Minus) && !self.check_same_line(Type::Minus) {
                break;
            }

            let operator = self.advance().clone();
            let right = self.binary(prec + 1)?;
            expr = match operator.ty {
                Type::AndAnd | Type::OrOr => Expr::logical(expr, operator, right),
                _ => Expr::binary(expr, operator, right),
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> ExprResult {
        if self.match_either(&[Type::Bang, Type::Minus]) {
            let operator = self.previous().clone();
            Ok(Expr::unary(operator, self.unary()?))
        } else {
            self.postfix()
        }
    }

    fn postfix(&mut self) -> ExprResult {
        let mut expr = self.primary()?;
        loop {
            if self.check_same_line(Type::LeftParen) {
                self.advance();
                expr = self.finish_call(expr, false)?;
            } else if self.check_same_line(Type::LeftBracket) {
                let bracket = self.advance().clone();
                let index = self.expression()?;
                self.consume(Type::RightBracket, "']' after index")?;
                expr = Expr::index(expr, index, bracket);
            } else if self.match_one(Type::Dot) {
                let name = self.consume(Type::Identifier, "member name after '.'")?.clone();
                expr = Expr::member(expr, name);
            } else if self.check_same_line(Type::Bang)
                && self.check_next(Type::LeftParen)
                && matches!(expr, Expr::Member { .. } | Expr::Index { .. })
            {
                // self-call: `recv.name!(args)` calls `recv.name` with `recv` prepended
                self.advance();
                self.advance();
                expr = self.finish_call(expr, true)?;
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr, receiver: bool) -> ExprResult {
        let mut args: Vec<Expr> = Vec::new();
        if !self.check(Type::RightParen) {
            loop {
                if args.len() >= ARG_LIMIT {
                    return Err(Error::parse(self.peek(), "at most 255 arguments"));
                }

                args.push(self.expression()?);
                if !self.match_one(Type::Comma) {
                    break;
                }
            }
        }

        let paren = self.consume(Type::RightParen, "')' after arguments")?;
        Ok(Expr::call(callee, paren.clone(), args, receiver))
    }

    fn primary(&mut self) -> ExprResult {
        if self.match_either(&[Type::True, Type::False, Type::Nil, Type::Number, Type::String]) {
            Ok(Expr::literal(self.previous().value.clone()))
        } else if self.match_one(Type::Identifier) {
            Ok(Expr::variable(self.previous().clone()))
        } else if self.match_one(Type::LeftParen) {
            let expr = self.expression()?;
            self.consume(Type::RightParen, "')' after expression")?;
            Ok(Expr::grouping(expr))
        } else if self.match_one(Type::LeftBracket) {
            self.array_literal()
        } else if self.match_one(Type::LeftBrace) {
            self.dict_literal()
        } else if self.match_one(Type::Fn) {
            let keyword = self.previous().clone();
            let decl = self.function(None, keyword)?;
            Ok(Expr::Function {
                decl: Rc::new(decl),
            })
        } else {
            Err(Error::parse(self.peek(), "expression"))
        }
    }

    fn array_literal(&mut self) -> ExprResult {
        let bracket = self.previous().clone();
        let mut elements = Vec::new();
        while !self.check(Type::RightBracket) {
            elements.push(self.expression()?);
            if !self.match_one(Type::Comma) {
                break;
            }
        }

        self.consume(Type::RightBracket, "']' after array elements")?;
        Ok(Expr::Array { elements, bracket })
    }

    fn dict_literal(&mut self) -> ExprResult {
        let brace = self.previous().clone();
        let mut entries = Vec::new();
        while !self.check(Type::RightBrace) {
            let key = if self.match_one(Type::Identifier) {
                self.previous().lexeme.clone()
            } else if self.match_one(Type::String) {
                match &self.previous().value {
                    Literal::Str(key) => key.clone(),
                    _ => self.previous().lexeme.clone(),
                }
            } else {
                return Err(Error::parse(self.peek(), "dictionary key"));
            };

            self.consume(Type::Colon, "':' after dictionary key")?;
            entries.push((key, self.expression()?));
            if !self.match_one(Type::Comma) {
                break;
            }
        }

        self.consume(Type::RightBrace, "'}' after dictionary entries")?;
        Ok(Expr::Dict { entries, brace })
    }

    fn skip_terminators(&mut self) {
        while self.match_one(Type::SemiColon) {}
    }

    fn is_at_end(&self) -> bool {
        self.peek().ty == Type::Eof
    }

    fn check(&self, ty: Type) -> bool {
        if self.is_at_end() {
            false
        } else {
            self.peek().ty == ty
        }
    }

    fn check_next(&self, ty: Type) -> bool {
        matches!(self.tokens.get(self.current + 1), Some(token) if token.ty == ty)
    }

    // Call, index and self-call suffixes must start on the line of the previous token, so a
    // statement on the next line is never taken as a continuation.
    fn check_same_line(&self, ty: Type) -> bool {
        self.check(ty) && self.current > 0 && self.peek().line == self.previous().line
    }

    fn consume(&mut self, ty: Type, expected: &str) -> Result<&Token, Error> {
        if self.check(ty) {
            Ok(self.advance())
        } else {
            Err(Error::parse(self.peek(), expected))
        }
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }

        self.previous()
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn match_either(&mut self, types: &[Type]) -> bool {
        for ty in types {
            if self.match_one(*ty) {
                // Already skipped in the `match_one`, just return result
                return true;
            }
        }

        false
    }

    fn match_one(&mut self, ty: Type) -> bool {
        if self.check(ty) {
            self.advance();
            true
        } else {
            false
        }
    }
}
