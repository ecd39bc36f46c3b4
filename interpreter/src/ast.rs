use std::rc::Rc;

use seal_core::{Literal, Token};

use crate::error::Error;

// Blocks are shared slices so that function values and suspended tasks can point into the
// tree without cloning statements. The tree itself is never mutated after parsing.
pub(crate) type Block = Rc<[Stmt]>;

#[derive(Debug, PartialEq)]
pub(crate) enum Expr {
    Literal {
        value: Literal,
    },
    Variable {
        name: Token,
    },
    Assign {
        name: Token,
        value: Box<Expr>,
    },
    // Covers both `a[i] = v` and `a.name = v`, the latter with a string literal index
    SetIndex {
        object: Box<Expr>,
        index: Box<Expr>,
        value: Box<Expr>,
        token: Token,
    },
    Binary {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },
    Unary {
        operator: Token,
        right: Box<Expr>,
    },
    // `receiver` is set by the `!` self-call suffix: the callee is a member or index access
    // and the accessed object is passed as the first argument.
    Call {
        callee: Box<Expr>,
        paren: Token,
        args: Vec<Expr>,
        receiver: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        bracket: Token,
    },
    Member {
        object: Box<Expr>,
        name: Token,
    },
    Array {
        elements: Vec<Expr>,
        bracket: Token,
    },
    Dict {
        entries: Vec<(String, Expr)>,
        brace: Token,
    },
    Function {
        decl: Rc<FunctionDecl>,
    },
    Grouping {
        expression: Box<Expr>,
    },
}

#[derive(Debug, PartialEq)]
pub(crate) struct FunctionDecl {
    pub(crate) name: Option<Token>,
    pub(crate) keyword: Token,
    pub(crate) params: Vec<Token>,
    pub(crate) body: Block,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Stmt {
    Let {
        name: Token,
        init: Expr,
        constant: bool,
    },
    Function {
        decl: Rc<FunctionDecl>,
        constant: bool,
    },
    If {
        branches: Vec<(Expr, Block)>,
        else_branch: Option<Block>,
        token: Token,
    },
    NumericFor {
        var: Token,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Block,
        token: Token,
    },
    ForIn {
        key: Token,
        value: Token,
        iterable: Expr,
        body: Block,
        token: Token,
    },
    While {
        condition: Expr,
        body: Block,
        token: Token,
    },
    Expression {
        expression: Expr,
    },
}

pub(crate) trait ExprVisitor {
    type Item;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Item, Error> {
        match expr {
            Expr::Literal { value } => self.visit_literal(value),
            Expr::Variable { name } => self.visit_variable(name),
            Expr::Assign { name, value } => self.visit_assign(name, value),
            Expr::SetIndex {
                object,
                index,
                value,
                token,
            } => self.visit_set_index(object, index, value, token),
            Expr::Binary {
                left,
                operator,
                right,
            } => self.visit_binary(left, operator, right),
            Expr::Logical {
                left,
                operator,
                right,
            } => self.visit_logical(left, operator, right),
            Expr::Unary { operator, right } => self.visit_unary(operator, right),
            Expr::Call {
                callee,
                paren,
                args,
                receiver,
            } => self.visit_call(callee, paren, args, *receiver),
            Expr::Index {
                object,
                index,
                bracket,
            } => self.visit_index(object, index, bracket),
            Expr::Member { object, name } => self.visit_member(object, name),
            Expr::Array { elements, bracket } => self.visit_array(elements, bracket),
            Expr::Dict { entries, brace } => self.visit_dict(entries, brace),
            Expr::Function { decl } => self.visit_function(decl),
            Expr::Grouping { expression } => self.visit_grouping(expression),
        }
    }

    fn visit_literal(&mut self, value: &Literal) -> Result<Self::Item, Error>;
    fn visit_variable(&mut self, name: &Token) -> Result<Self::Item, Error>;
    fn visit_assign(&mut self, name: &Token, value: &Expr) -> Result<Self::Item, Error>;
    fn visit_set_index(
        &mut self,
        object: &Expr,
        index: &Expr,
        value: &Expr,
        token: &Token,
    ) -> Result<Self::Item, Error>;
    fn visit_binary(
        &mut self,
        left: &Expr,
        operator: &Token,
        right: &Expr,
    ) -> Result<Self::Item, Error>;
    fn visit_logical(
        &mut self,
        left: &Expr,
        operator: &Token,
        right: &Expr,
    ) -> Result<Self::Item, Error>;
    fn visit_unary(&mut self, operator: &Token, right: &Expr) -> Result<Self::Item, Error>;
    fn visit_call(
        &mut self,
        callee: &Expr,
        paren: &Token,
        args: &[Expr],
        receiver: bool,
    ) -> Result<Self::Item, Error>;
    fn visit_index(
        &mut self,
        object: &Expr,
        index: &Expr,
        bracket: &Token,
    ) -> Result<Self::Item, Error>;
    fn visit_member(&mut self, object: &Expr, name: &Token) -> Result<Self::Item, Error>;
    fn visit_array(&mut self, elements: &[Expr], bracket: &Token) -> Result<Self::Item, Error>;
    fn visit_dict(
        &mut self,
        entries: &[(String, Expr)],
        brace: &Token,
    ) -> Result<Self::Item, Error>;
    fn visit_function(&mut self, decl: &Rc<FunctionDecl>) -> Result<Self::Item, Error>;
    fn visit_grouping(&mut self, expression: &Expr) -> Result<Self::Item, Error>;
}

impl Expr {
    // Creator methods, mostly to keep the parser readable
    pub(crate) fn literal(value: impl Into<Literal>) -> Self {
        Expr::Literal {
            value: value.into(),
        }
    }

    pub(crate) fn variable(name: Token) -> Self {
        Expr::Variable { name }
    }

    pub(crate) fn binary(left: Expr, operator: Token, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        }
    }

    pub(crate) fn logical(left: Expr, operator: Token, right: Expr) -> Self {
        Expr::Logical {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        }
    }

    pub(crate) fn unary(operator: Token, right: Expr) -> Self {
        Expr::Unary {
            operator,
            right: Box::new(right),
        }
    }

    pub(crate) fn call(callee: Expr, paren: Token, args: Vec<Expr>, receiver: bool) -> Self {
        Expr::Call {
            callee: Box::new(callee),
            paren,
            args,
            receiver,
        }
    }

    pub(crate) fn index(object: Expr, index: Expr, bracket: Token) -> Self {
        Expr::Index {
            object: Box::new(object),
            index: Box::new(index),
            bracket,
        }
    }

    pub(crate) fn member(object: Expr, name: Token) -> Self {
        Expr::Member {
            object: Box::new(object),
            name,
        }
    }

    pub(crate) fn grouping(expression: Expr) -> Self {
        Expr::Grouping {
            expression: Box::new(expression),
        }
    }
}

impl Stmt {
    pub(crate) fn expression(expression: Expr) -> Self {
        Stmt::Expression { expression }
    }
}
