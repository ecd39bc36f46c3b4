use std::cell::RefCell;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use ahash::AHashMap;
use seal_core::{Literal, Token, Type};

use crate::ast::{Expr, ExprVisitor, FunctionDecl};
use crate::builtins;
use crate::callable::{Callable, Function, Native};
use crate::env::{BindingError, Environment};
use crate::error::{Error, ErrorKind};
use crate::exec::{BlockKind, Continuation, Cursor};
use crate::gc::{Heap, Marker};
use crate::limits::{LOADARGS_BINDING, MODULE_DIR_BINDING, STD_PREFIX};
use crate::module::ModuleCache;
use crate::parser::{parse_source, Program};
use crate::scheduler::{self, Clock, MonotonicClock, Scheduler};
use crate::value::{to_index, Entries, Module, Value};

pub struct Interpreter {
    // builtins, shared by the entry program and every module as their outermost frame
    pub(crate) prelude: Rc<RefCell<Environment>>,
    pub(crate) globals: Rc<RefCell<Environment>>,
    pub(crate) env: Rc<RefCell<Environment>>,
    pub(crate) stdout: Rc<RefCell<dyn Write>>,
    pub(crate) heap: Heap,
    pub(crate) scheduler: Scheduler,
    pub(crate) modules: ModuleCache,
    pub(crate) namespaces: AHashMap<String, Value>,
    pub(crate) root: PathBuf,

    // nested continuations currently on the native stack
    pub(crate) depth: usize,
    running: bool,
    pub(crate) evaluating: bool,
}

impl Interpreter {
    pub fn new(stdout: Rc<RefCell<dyn Write>>) -> Self {
        let mut heap = Heap::new();
        let prelude = heap.frame(Environment::new());
        builtins::install(&mut prelude.borrow_mut());

        let globals = heap.frame(Environment::with(Rc::clone(&prelude)));
        let args = heap.array(Vec::new(), false);
        globals
            .borrow_mut()
            .bind(LOADARGS_BINDING, Value::Array(args));

        let mut interpreter = Interpreter {
            env: Rc::clone(&globals),
            prelude,
            globals,
            stdout,
            heap,
            scheduler: Scheduler::new(Box::new(MonotonicClock::new())),
            modules: ModuleCache::new(),
            namespaces: AHashMap::new(),
            root: PathBuf::from("."),
            depth: 0,
            running: false,
            evaluating: false,
        };

        interpreter.register_namespace("task", scheduler::task_natives());
        interpreter.register_namespace("time", scheduler::time_natives());
        interpreter.with_root(".")
    }

    /// Directory the entry program resolves relative module paths and `Modules/` against.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        let dir = Value::from(self.root.to_string_lossy().as_ref());
        self.globals.borrow_mut().bind(MODULE_DIR_BINDING, dir);
        self
    }

    /// Arguments handed to the entry program, returned by `getloadargs()`.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        let items = args.into_iter().map(Value::from).collect();
        let args = self.heap.array(items, false);
        self.globals
            .borrow_mut()
            .bind(LOADARGS_BINDING, Value::Array(args));
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.scheduler.set_clock(Box::new(clock));
        self
    }

    /// Exposes `natives` to scripts as `loadmodule("@std/<name>")`.
    pub fn register_namespace(&mut self, name: &str, natives: Vec<Native>) {
        let members: Entries = natives
            .into_iter()
            .map(|native| (Rc::from(native.name()), Value::Native(Rc::new(native))))
            .collect();

        let module = Module::new(format!("{}{}", STD_PREFIX, name), members);
        self.namespaces
            .insert(String::from(name), Value::Module(Rc::new(module)));
    }

    pub fn run_source(&mut self, src: &str) -> Result<Value, Error> {
        let program = parse_source(src)?;
        self.interpret(&program)
    }

    /// Runs `program` as the entry task and drives the scheduler until no task is left.
    /// Returns the value of the program's final expression statement.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn interpret(&mut self, program: &Program) -> Result<Value, Error> {
        if self.running {
            return Err(Error::host("the interpreter is already running"));
        }

        self.running = true;
        let main = Continuation::new(
            Cursor::block(Rc::clone(&program.0), Rc::clone(&self.globals), BlockKind::Scope),
            true,
        );
        let result = self.run_tasks(main);
        self.running = false;
        self.env = Rc::clone(&self.globals);
        result
    }

    /// Forces a cycle collection, returning the number of frames and containers it cleared.
    /// Does nothing while a script is being evaluated.
    pub fn collect_garbage(&mut self) -> usize {
        if self.evaluating {
            return 0;
        }
        self.collect(&[])
    }

    pub(crate) fn collect(&mut self, extra_roots: &[Value]) -> usize {
        let mut marker = Marker::new();
        marker.frame(&self.prelude);
        marker.frame(&self.globals);
        marker.frame(&self.env);
        for namespace in self.namespaces.values() {
            marker.value(namespace);
        }
        for root in extra_roots {
            marker.value(root);
        }
        self.modules.trace(&mut marker);
        self.scheduler.trace(&mut marker);
        self.heap.sweep(marker)
    }

    /// Builds a script array, for natives that return collections.
    pub fn array(&mut self, items: Vec<Value>) -> Value {
        Value::Array(self.heap.array(items, false))
    }

    pub fn dict(&mut self, entries: Entries) -> Value {
        Value::Dict(self.heap.dict(entries, false))
    }

    /// Calls any callable value from host code. A `wait` reached this way fails with
    /// `SuspendError` since there is no task statement to suspend.
    pub fn call_value(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, Error> {
        match callee {
            Value::Function(function) => function.call(self, args),
            Value::Native(native) => match native.call(self, args) {
                Err(Error::Suspend(_)) => Err(suspend_error()),
                res => res,
            },
            other => Err(Error::new(
                ErrorKind::NotCallable,
                format!("can only call functions, not {}", other.type_name()),
            )),
        }
    }

    pub(crate) fn call_function(
        &mut self,
        function: Rc<Function>,
        args: Vec<Value>,
    ) -> Result<Value, Error> {
        let frame = self.prepare_call(&function, args);
        let body = Rc::clone(&function.decl().body);
        let mut cont = Continuation::new(Cursor::block(body, frame, BlockKind::Call), false);
        self.run_nested(&mut cont)
    }

    // Parameters bind positionally, extra arguments are dropped and missing ones are nil
    pub(crate) fn prepare_call(
        &mut self,
        function: &Function,
        args: Vec<Value>,
    ) -> Rc<RefCell<Environment>> {
        let mut frame = Environment::with(Rc::clone(function.closure()));
        let mut args = args.into_iter();
        for param in &function.decl().params {
            frame.bind(&param.lexeme, args.next().unwrap_or_default());
        }
        self.heap.frame(frame)
    }

    pub(crate) fn lookup(&self, key: &str) -> Option<Value> {
        self.env.borrow().get(key)
    }

    pub(crate) fn declare(&mut self, name: &Token, value: Value, mutable: bool) -> Result<(), Error> {
        self.env
            .borrow_mut()
            .define(&name.lexeme, value, mutable)
            .map_err(|_| {
                Error::runtime(
                    ErrorKind::ConstReassign,
                    name,
                    format!("cannot redeclare constant '{}'", name.lexeme),
                )
            })
    }

    pub(crate) fn declare_function(&mut self, decl: &Rc<FunctionDecl>, constant: bool) -> Result<(), Error> {
        let function = Function::new(Rc::clone(decl), Rc::clone(&self.env), !constant);
        match &decl.name {
            Some(name) => self.declare(name, Value::Function(Rc::new(function)), !constant),
            None => Ok(()),
        }
    }

    /// Evaluates a `const` initializer: array and dictionary literals in the literal tree come
    /// out frozen, anything computed (calls, variables) is left alone.
    pub(crate) fn evaluate_frozen(&mut self, expr: &Expr) -> Result<Value, Error> {
        match expr {
            Expr::Array { elements, .. } => self.array_literal(elements, true),
            Expr::Dict { entries, .. } => self.dict_literal(entries, true),
            Expr::Grouping { expression } => self.evaluate_frozen(expression),
            _ => self.visit_expr(expr),
        }
    }

    fn array_literal(&mut self, elements: &[Expr], frozen: bool) -> Result<Value, Error> {
        let mut items = Vec::with_capacity(elements.len());
        for element in elements {
            let item = if frozen {
                self.evaluate_frozen(element)?
            } else {
                self.visit_expr(element)?
            };
            items.push(item);
        }
        Ok(Value::Array(self.heap.array(items, frozen)))
    }

    fn dict_literal(&mut self, entries: &[(String, Expr)], frozen: bool) -> Result<Value, Error> {
        let mut dict = Entries::new();
        for (key, expr) in entries {
            let value = if frozen {
                self.evaluate_frozen(expr)?
            } else {
                self.visit_expr(expr)?
            };
            dict.insert(Rc::from(key.as_str()), value);
        }
        Ok(Value::Dict(self.heap.dict(dict, frozen)))
    }

    /// Evaluates the callee and arguments of a call. For a self-call the receiver object is
    /// evaluated once, used to look the callee up and passed as the first argument.
    pub(crate) fn evaluate_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        receiver: bool,
    ) -> Result<(Value, Vec<Value>), Error> {
        let mut values = Vec::with_capacity(args.len() + 1);
        let callee = match callee {
            Expr::Member { object, name } if receiver => {
                let object = self.visit_expr(object)?;
                let key = Value::from(name.lexeme.as_str());
                let callee = index_value(&object, &key).map_err(|err| err.at(name.position()))?;
                values.push(object);
                callee
            }
            Expr::Index {
                object,
                index,
                bracket,
            } if receiver => {
                let object = self.visit_expr(object)?;
                let key = self.visit_expr(index)?;
                let callee =
                    index_value(&object, &key).map_err(|err| err.at(bracket.position()))?;
                values.push(object);
                callee
            }
            other => self.visit_expr(other)?,
        };

        for arg in args {
            values.push(self.visit_expr(arg)?);
        }
        Ok((callee, values))
    }
}

pub(crate) fn suspend_error() -> Error {
    Error::new(
        ErrorKind::Suspend,
        "wait() can only suspend a task when called as a statement",
    )
}

fn binding_error(err: BindingError, name: &Token) -> Error {
    match err {
        BindingError::Undefined => Error::runtime(
            ErrorKind::UndefinedName,
            name,
            format!("undefined name '{}'", name.lexeme),
        ),
        BindingError::Constant => Error::runtime(
            ErrorKind::ConstReassign,
            name,
            format!("cannot reassign constant '{}'", name.lexeme),
        ),
    }
}

/// Reads `object[index]`. Errors carry no position, the caller attaches its own.
pub(crate) fn index_value(object: &Value, index: &Value) -> Result<Value, Error> {
    match (object, index) {
        (Value::Array(array), Value::Num(i)) => array.get(*i),
        (Value::Dict(dict), Value::Str(key)) => Ok(dict.get(key)),
        (Value::Str(string), Value::Num(i)) => {
            let len = string.chars().count();
            to_index(*i, len)
                .and_then(|at| string.chars().nth(at))
                .map(|ch| Value::from(ch.to_string()))
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::Index,
                        format!("index {} out of range for length {}", i, len),
                    )
                })
        }
        (Value::Module(module), Value::Str(key)) => module.get(key).ok_or_else(|| {
            Error::new(
                ErrorKind::Index,
                format!("module '{}' has no member '{}'", module.name(), key),
            )
        }),
        (Value::Array(_) | Value::Str(_), other) => Err(Error::new(
            ErrorKind::Index,
            format!("index must be a number, not {}", other.type_name()),
        )),
        (Value::Dict(_) | Value::Module(_), other) => Err(Error::new(
            ErrorKind::Index,
            format!("key must be a string, not {}", other.type_name()),
        )),
        (other, _) => Err(Error::new(
            ErrorKind::Type,
            format!("cannot index into {}", other.type_name()),
        )),
    }
}

/// Writes `object[index] = value`, inserting missing dictionary keys.
pub(crate) fn set_index(object: &Value, index: &Value, value: Value) -> Result<(), Error> {
    match (object, index) {
        (Value::Array(array), Value::Num(i)) => array.set(*i, value),
        (Value::Dict(dict), Value::Str(key)) => dict.set(Rc::clone(key), value),
        (Value::Module(module), _) => Err(Error::new(
            ErrorKind::ConstMutation,
            format!("module '{}' is read-only", module.name()),
        )),
        (Value::Array(_), other) => Err(Error::new(
            ErrorKind::Index,
            format!("index must be a number, not {}", other.type_name()),
        )),
        (Value::Dict(_), other) => Err(Error::new(
            ErrorKind::Index,
            format!("key must be a string, not {}", other.type_name()),
        )),
        (other, _) => Err(Error::new(
            ErrorKind::Type,
            format!("cannot assign into {}", other.type_name()),
        )),
    }
}

fn numbers(operator: &Token, left: &Value, right: &Value) -> Result<(f64, f64), Error> {
    match (left, right) {
        (Value::Num(left), Value::Num(right)) => Ok((*left, *right)),
        _ => Err(Error::runtime(
            ErrorKind::Type,
            operator,
            format!(
                "operands of '{}' must be numbers, got {} and {}",
                operator.lexeme,
                left.type_name(),
                right.type_name()
            ),
        )),
    }
}

fn compare<T: PartialOrd + ?Sized>(ty: Type, left: &T, right: &T) -> bool {
    match ty {
        Type::Less => left < right,
        Type::LessEqual => left <= right,
        Type::Greater => left > right,
        _ => left >= right,
    }
}

impl ExprVisitor for Interpreter {
    type Item = Value;

    fn visit_literal(&mut self, value: &Literal) -> Result<Value, Error> {
        Ok(Value::from(value.clone()))
    }

    fn visit_variable(&mut self, name: &Token) -> Result<Value, Error> {
        self.lookup(&name.lexeme)
            .ok_or_else(|| binding_error(BindingError::Undefined, name))
    }

    fn visit_assign(&mut self, name: &Token, value: &Expr) -> Result<Value, Error> {
        let value = self.visit_expr(value)?;
        self.env
            .borrow_mut()
            .assign(&name.lexeme, value.clone())
            .map_err(|err| binding_error(err, name))?;
        Ok(value)
    }

    fn visit_set_index(
        &mut self,
        object: &Expr,
        index: &Expr,
        value: &Expr,
        token: &Token,
    ) -> Result<Value, Error> {
        let object = self.visit_expr(object)?;
        let index = self.visit_expr(index)?;
        let value = self.visit_expr(value)?;
        set_index(&object, &index, value.clone()).map_err(|err| err.at(token.position()))?;
        Ok(value)
    }

    fn visit_binary(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Result<Value, Error> {
        let left = self.visit_expr(left)?;
        let right = self.visit_expr(right)?;

        match operator.ty {
            Type::Plus => match (&left, &right) {
                (Value::Num(left), Value::Num(right)) => Ok(Value::Num(left + right)),
                (Value::Str(_), _) | (_, Value::Str(_)) => {
                    Ok(Value::from(format!("{}{}", left, right)))
                }
                _ => Err(Error::runtime(
                    ErrorKind::Type,
                    operator,
                    format!(
                        "operands of '+' must be numbers or strings, got {} and {}",
                        left.type_name(),
                        right.type_name()
                    ),
                )),
            },
            Type::Minus => {
                let (left, right) = numbers(operator, &left, &right)?;
                Ok(Value::Num(left - right))
            }
            Type::Star => {
                let (left, right) = numbers(operator, &left, &right)?;
                Ok(Value::Num(left * right))
            }
            Type::Slash => {
                let (left, right) = numbers(operator, &left, &right)?;
                if right == 0.0 {
                    return Err(Error::runtime(
                        ErrorKind::Arithmetic,
                        operator,
                        "division by zero",
                    ));
                }
                Ok(Value::Num(left / right))
            }
            Type::Less | Type::LessEqual | Type::Greater | Type::GreaterEqual => {
                match (&left, &right) {
                    (Value::Num(l), Value::Num(r)) => Ok(Value::Bool(compare(operator.ty, l, r))),
                    (Value::Str(l), Value::Str(r)) => {
                        Ok(Value::Bool(compare::<str>(operator.ty, l, r)))
                    }
                    _ => Err(Error::runtime(
                        ErrorKind::Type,
                        operator,
                        format!(
                            "operands of '{}' must be two numbers or two strings, got {} and {}",
                            operator.lexeme,
                            left.type_name(),
                            right.type_name()
                        ),
                    )),
                }
            }
            Type::EqualEqual => Ok(Value::Bool(left == right)),
            Type::BangEqual => Ok(Value::Bool(left != right)),
            _ => Err(Error::runtime(
                ErrorKind::Type,
                operator,
                format!("invalid binary operator '{}'", operator.lexeme),
            )),
        }
    }

    // Short-circuits and yields the operand that decided the result
    fn visit_logical(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Result<Value, Error> {
        let left = self.visit_expr(left)?;
        match operator.ty {
            Type::OrOr if left.is_truthy() => Ok(left),
            Type::AndAnd if !left.is_truthy() => Ok(left),
            _ => self.visit_expr(right),
        }
    }

    fn visit_unary(&mut self, operator: &Token, right: &Expr) -> Result<Value, Error> {
        let right = self.visit_expr(right)?;
        match (operator.ty, right) {
            (Type::Minus, Value::Num(val)) => Ok(Value::Num(-val)),
            (Type::Bang, val) => Ok(Value::Bool(!val.is_truthy())),
            (_, val) => Err(Error::runtime(
                ErrorKind::Type,
                operator,
                format!(
                    "operand of '{}' must be a number, not {}",
                    operator.lexeme,
                    val.type_name()
                ),
            )),
        }
    }

    fn visit_call(
        &mut self,
        callee: &Expr,
        paren: &Token,
        args: &[Expr],
        receiver: bool,
    ) -> Result<Value, Error> {
        let (callee, args) = self.evaluate_call(callee, args, receiver)?;
        self.call_value(callee, args)
            .map_err(|err| err.at(paren.position()))
    }

    fn visit_index(&mut self, object: &Expr, index: &Expr, bracket: &Token) -> Result<Value, Error> {
        let object = self.visit_expr(object)?;
        let index = self.visit_expr(index)?;
        index_value(&object, &index).map_err(|err| err.at(bracket.position()))
    }

    fn visit_member(&mut self, object: &Expr, name: &Token) -> Result<Value, Error> {
        let object = self.visit_expr(object)?;
        index_value(&object, &Value::from(name.lexeme.as_str()))
            .map_err(|err| err.at(name.position()))
    }

    fn visit_array(&mut self, elements: &[Expr], _: &Token) -> Result<Value, Error> {
        self.array_literal(elements, false)
    }

    fn visit_dict(&mut self, entries: &[(String, Expr)], _: &Token) -> Result<Value, Error> {
        self.dict_literal(entries, false)
    }

    fn visit_function(&mut self, decl: &Rc<FunctionDecl>) -> Result<Value, Error> {
        let function = Function::new(Rc::clone(decl), Rc::clone(&self.env), true);
        Ok(Value::Function(Rc::new(function)))
    }

    fn visit_grouping(&mut self, expression: &Expr) -> Result<Value, Error> {
        self.visit_expr(expression)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::thread;

    use pretty_assertions::assert_eq;

    use crate::callable::Native;
    use crate::error::{Error, ErrorKind};
    use crate::interpreter::Interpreter;
    use crate::value::Value;

    fn run(src: &str) -> (Result<Value, Error>, String) {
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut interpreter = Interpreter::new(output.clone());
        let result = interpreter.run_source(src);
        let printed = String::from_utf8(output.borrow().clone()).unwrap();
        (result, printed)
    }

    fn eval(src: &str) -> Value {
        run(src).0.unwrap()
    }

    fn error_kind(src: &str) -> ErrorKind {
        run(src).0.unwrap_err().kind()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("5 + 2 * 3"), Value::from(11));
        assert_eq!(eval("(5 + 2) * 3"), Value::from(21));
        assert_eq!(eval("10 - 4 - 3"), Value::from(3));
        assert_eq!(eval("7 / 2"), Value::from(3.5));
        assert_eq!(eval("-(2 + 1)"), Value::from(-3));
        assert_eq!(error_kind("1 / 0"), ErrorKind::Arithmetic);
        assert_eq!(error_kind("1 - \"a\""), ErrorKind::Type);
        assert_eq!(error_kind("1 + true"), ErrorKind::Type);
        assert_eq!(error_kind("-\"a\""), ErrorKind::Type);
    }

    #[test]
    fn test_strings() {
        assert_eq!(eval("\"Hello \" + \"World\""), Value::from("Hello World"));
        assert_eq!(eval("\"n = \" + 1"), Value::from("n = 1"));
        assert_eq!(eval("nil + \"!\""), Value::from("nil!"));
        assert_eq!(eval("\"abc\"[1]"), Value::from("b"));
        assert_eq!(eval("\"abc\" < \"abd\""), Value::from(true));
        assert_eq!(error_kind("\"abc\"[3]"), ErrorKind::Index);
        assert_eq!(error_kind("1 < \"a\""), ErrorKind::Type);
    }

    #[test]
    fn test_truthiness_and_logical_operators() {
        assert_eq!(eval("nil || 0"), Value::from(0));
        assert_eq!(eval("1 && 2"), Value::from(2));
        assert_eq!(eval("false && undefined_name"), Value::from(false));
        assert_eq!(eval("\"\" || 1"), Value::from(""));
        assert_eq!(eval("!nil"), Value::from(true));
        assert_eq!(eval("!0"), Value::from(false));
    }

    #[test]
    fn test_equality() {
        assert_eq!(eval("1 == 1.0"), Value::from(true));
        assert_eq!(eval("\"a\" == \"a\""), Value::from(true));
        assert_eq!(eval("1 == \"1\""), Value::from(false));
        assert_eq!(eval("nil == false"), Value::from(false));
        assert_eq!(eval("[1] == [1]"), Value::from(false));
        assert_eq!(eval("let a = [1]\nlet b = a\na == b"), Value::from(true));
    }

    #[test]
    fn test_arrays_and_dicts() {
        assert_eq!(eval("let arr = [1, 2, 3]\narr[0] == 1"), Value::from(true));
        assert_eq!(error_kind("let arr = [1, 2, 3]\narr[3]"), ErrorKind::Index);
        assert_eq!(error_kind("let arr = [1]\narr[\"a\"]"), ErrorKind::Index);
        assert_eq!(eval("let arr = [1, 2]\narr[1] = 5\narr[1]"), Value::from(5));

        assert_eq!(eval("let d = {a: 1}\nd.missing"), Value::Nil);
        assert_eq!(eval("let d = {a: 1}\nd.a = 2\nd[\"b\"] = 3\nd.a + d.b"), Value::from(5));
        assert_eq!(error_kind("let d = {}\nd[1]"), ErrorKind::Index);
        assert_eq!(error_kind("let n = 1\nn[0]"), ErrorKind::Type);
        assert_eq!(error_kind("let n = 1\nn.x = 2"), ErrorKind::Type);
    }

    #[test]
    fn test_scoping() {
        assert_eq!(eval("let a = 1\nif (true) { let a = 2 }\na"), Value::from(1));
        assert_eq!(eval("let a = 1\nif (true) { a = 2 }\na"), Value::from(2));
        assert_eq!(
            error_kind("if (true) { let b = 2 }\nb"),
            ErrorKind::UndefinedName
        );
        assert_eq!(error_kind("c = 1"), ErrorKind::UndefinedName);
    }

    #[test]
    fn test_const_bindings_and_containers() {
        assert_eq!(error_kind("const a = 1\na = 2"), ErrorKind::ConstReassign);
        assert_eq!(error_kind("const a = 1\nconst a = 2"), ErrorKind::ConstReassign);
        assert_eq!(error_kind("const a = 1\nlet a = 2"), ErrorKind::ConstReassign);
        assert_eq!(eval("let a = 1\nlet a = 2\na"), Value::from(2));
        assert_eq!(eval("const a = 1\nif (true) { let a = 2\na }"), Value::from(2));

        assert_eq!(error_kind("const arr = [1, [2]]\npush(arr, 3)"), ErrorKind::ConstMutation);
        assert_eq!(error_kind("const arr = [1, [2]]\narr[1][0] = 5"), ErrorKind::ConstMutation);
        assert_eq!(error_kind("const d = {a: {b: 1}}\nd.a.b = 2"), ErrorKind::ConstMutation);
        assert_eq!(error_kind("const d = {a: 1}\nremove(d, \"a\")"), ErrorKind::ConstMutation);

        // only the literal tree is frozen, computed values are not
        assert_eq!(eval("fn make() { [1] }\nconst a = [make()]\npush(a[0], 2)"), Value::from(2));

        // a mutable binding to a frozen container can be rebound but not mutated
        assert_eq!(error_kind("const a = [1]\nlet b = a\nb[0] = 2"), ErrorKind::ConstMutation);
    }

    #[test]
    fn test_hookable_and_const_functions() {
        assert_eq!(eval("fn f() { 1 }\nf = fn () { 2 }\nf()"), Value::from(2));
        assert_eq!(eval("fn f() { 1 }\nfn f() { 3 }\nf()"), Value::from(3));
        assert_eq!(error_kind("const fn f() { 1 }\nf = 2"), ErrorKind::ConstReassign);
        assert_eq!(error_kind("const fn f() { 1 }\nfn f() { 2 }"), ErrorKind::ConstReassign);
    }

    #[test]
    fn test_functions_and_closures() {
        assert_eq!(eval("fn add(a, b) { a + b; }\nadd(2, 3)"), Value::from(5));
        assert_eq!(eval("fn f(a, b) { b }\nf(1)"), Value::Nil);
        assert_eq!(eval("fn f(a) { a }\nf(1, 2, 3)"), Value::from(1));
        assert_eq!(eval("fn f() { let x = 1 }\nf()"), Value::Nil);
        assert_eq!(eval("fn f(x) { if (x) { \"yes\" } else { \"no\" } }\nf(false)"), Value::from("no"));
        assert_eq!(eval("fn f(x) { if (x) { \"yes\" } }\nf(false)"), Value::Nil);
        assert_eq!(eval("fn f() { for (i = 1, 3) { i } }\nf()"), Value::Nil);

        let src = r#"
            fn counter() {
                let count = 0
                fn () {
                    count = count + 1
                    count
                }
            }
            let next = counter()
            next()
            next()
            next()
        "#;
        assert_eq!(eval(src), Value::from(3));

        let src = r#"
            fn fib(n) {
                if (n < 2) { n } else { fib(n - 1) + fib(n - 2) }
            }
            let result = fib(15)
            result
        "#;
        assert_eq!(eval(src), Value::from(610));
    }

    #[test]
    fn test_calls() {
        assert_eq!(error_kind("let x = 1\nx()"), ErrorKind::NotCallable);
        assert_eq!(error_kind("len()"), ErrorKind::Type);

        let err = run("let x = nil\n  len(x, 1)").0.unwrap_err();
        assert_eq!(err.to_string(), "[line 2:11] TypeError: len() expected 1 arguments but got 2");
    }

    #[test]
    fn test_self_call() {
        let src = r#"
            let account = {
                balance: 10,
                deposit: fn (self, amount) { self.balance = self.balance + amount },
            }
            account.deposit!(5)
            account["deposit"]!(1)
            account.balance
        "#;
        assert_eq!(eval(src), Value::from(16));

        let src = r#"
            let calls = 0
            fn get() {
                calls = calls + 1
                {echo: fn (receiver, x) { x }}
            }
            let seven = get().echo!(7)
            calls * 10 + seven
        "#;
        assert_eq!(eval(src), Value::from(17));
    }

    #[test]
    fn test_runtime_error_position() {
        let err = run("let a = 1\nlet b = a + nil").0.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        assert_eq!(
            err.to_string(),
            "[line 2:11] TypeError: operands of '+' must be numbers or strings, got number and nil"
        );
    }

    #[test]
    fn test_output_is_deterministic() {
        let src = "let d = {z: 1, a: 2, m: 3}\nfor (k, v in d) { print(k, v) }\nprint([1, \"two\", nil])";
        let (first, printed) = run(src);
        let (second, again) = run(src);
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(printed, "z 1\na 2\nm 3\n[1, \"two\", nil]\n");
        assert_eq!(printed, again);
    }

    #[test]
    fn test_statement_recursion_overflows() {
        assert_eq!(error_kind("fn f(n) { f(n + 1) }\nf(0)"), ErrorKind::StackOverflow);
    }

    #[test]
    fn test_expression_recursion_overflows() {
        // nested expression calls recurse on the native stack
        let child = thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| error_kind("fn g(n) { 1 + g(n + 1) }\ng(0)"))
            .unwrap();
        assert_eq!(child.join().unwrap(), ErrorKind::StackOverflow);
    }

    #[test]
    fn test_cycles_are_collected() {
        let src = r#"
            fn make() {
                let box = {}
                box.me = box
                fn again() { again }
                let items = [1]
                push(items, items)
                again
            }
            let keep = make()
            make()
            make()
            nil
        "#;
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut interpreter = Interpreter::new(output);
        interpreter.run_source(src).unwrap();

        // two dropped calls, each leaving a frame, a dictionary and an array in a cycle
        assert_eq!(interpreter.collect_garbage(), 6);
        assert_eq!(interpreter.collect_garbage(), 0);
        assert_eq!(
            interpreter.run_source("type(keep())").unwrap(),
            Value::from("function")
        );
    }

    #[test]
    fn test_host_values_survive_collection() {
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut interpreter = Interpreter::new(output);
        let kept = interpreter.run_source("[1, 2, 3]").unwrap();
        let built = interpreter.array(vec![Value::from(7)]);

        // enough allocations to sweep at a tick boundary, then a forced sweep
        interpreter
            .run_source("for (i = 1, 2000) { let pair = [i, {n: i}] }")
            .unwrap();
        interpreter.collect_garbage();

        assert_eq!(kept.to_string(), "[1, 2, 3]");
        assert_eq!(built.to_string(), "[7]");
    }

    #[test]
    fn test_globals_persist_between_runs() {
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut interpreter = Interpreter::new(output);
        interpreter.run_source("let total = 40").unwrap();
        assert_eq!(interpreter.run_source("total + 2").unwrap(), Value::from(42));
    }

    #[test]
    fn test_interpret_is_not_reentrant() {
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut interpreter = Interpreter::new(output);
        interpreter.register_namespace(
            "host",
            vec![Native::new("nested", 0, |interpreter, _| {
                interpreter.run_source("1")
            })],
        );

        let err = interpreter
            .run_source("loadmodule(\"@std/host\").nested()")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Host);
    }
}
