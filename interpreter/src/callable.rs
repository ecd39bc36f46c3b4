use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

use crate::ast::FunctionDecl;
use crate::env::Environment;
use crate::error::{Error, ErrorKind};
use crate::interpreter::Interpreter;
use crate::value::Value;

pub trait Callable {
    fn name(&self) -> &str;
    fn call(self: Rc<Self>, interpreter: &mut Interpreter, args: Vec<Value>)
        -> Result<Value, Error>;
}

pub type NativeFn = Box<dyn Fn(&mut Interpreter, &[Value]) -> Result<Value, Error>>;

// `Native` bridges host rust functions and the script environment. Builtins live in the prelude
// frame, namespace natives behind `loadmodule("@std/<name>")`. A native must not keep script
// values around after it returns, the cycle collector only sees what the interpreter holds.
pub struct Native {
    name: String,
    min_arity: usize,
    max_arity: Option<usize>,
    func: NativeFn,
}

impl Native {
    pub fn new<F>(name: &str, arity: usize, func: F) -> Self
    where
        F: Fn(&mut Interpreter, &[Value]) -> Result<Value, Error> + 'static,
    {
        Native::range(name, arity, arity, func)
    }

    /// A native taking `min_arity` or more arguments.
    pub fn variadic<F>(name: &str, min_arity: usize, func: F) -> Self
    where
        F: Fn(&mut Interpreter, &[Value]) -> Result<Value, Error> + 'static,
    {
        Native {
            name: String::from(name),
            min_arity,
            max_arity: None,
            func: Box::new(func),
        }
    }

    pub fn range<F>(name: &str, min_arity: usize, max_arity: usize, func: F) -> Self
    where
        F: Fn(&mut Interpreter, &[Value]) -> Result<Value, Error> + 'static,
    {
        Native {
            name: String::from(name),
            min_arity,
            max_arity: Some(max_arity),
            func: Box::new(func),
        }
    }

    fn check_arity(&self, got: usize) -> Result<(), Error> {
        let expected = match self.max_arity {
            Some(max) if max == self.min_arity && got != max => format!("{}", max),
            Some(max) if got < self.min_arity || got > max => {
                format!("{} to {}", self.min_arity, max)
            }
            None if got < self.min_arity => format!("at least {}", self.min_arity),
            _ => return Ok(()),
        };

        Err(Error::new(
            ErrorKind::Type,
            format!(
                "{}() expected {} arguments but got {}",
                self.name, expected, got
            ),
        ))
    }
}

impl Callable for Native {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(self: Rc<Self>, interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, Error> {
        self.check_arity(args.len())?;
        (self.func)(interpreter, &args)
    }
}

impl Debug for Native {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

pub struct Function {
    decl: Rc<FunctionDecl>,
    closure: Rc<RefCell<Environment>>,
    hookable: bool,
}

impl Function {
    pub(crate) fn new(
        decl: Rc<FunctionDecl>,
        closure: Rc<RefCell<Environment>>,
        hookable: bool,
    ) -> Self {
        Function {
            decl,
            closure,
            hookable,
        }
    }

    /// `const fn` declarations can't be rebound, plain `fn` ones can be hooked at runtime.
    pub fn is_hookable(&self) -> bool {
        self.hookable
    }

    pub fn arity(&self) -> usize {
        self.decl.params.len()
    }

    pub(crate) fn decl(&self) -> &Rc<FunctionDecl> {
        &self.decl
    }

    pub(crate) fn closure(&self) -> &Rc<RefCell<Environment>> {
        &self.closure
    }
}

impl Callable for Function {
    fn name(&self) -> &str {
        match &self.decl.name {
            Some(name) => &name.lexeme,
            None => "anonymous",
        }
    }

    fn call(self: Rc<Self>, interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, Error> {
        interpreter.call_function(self, args)
    }
}

// Printing the closure would walk every enclosing frame
impl Debug for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<fn {}>", self.name())
    }
}
