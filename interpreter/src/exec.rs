use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use seal_core::Token;

use crate::ast::{Block, Expr, ExprVisitor, Stmt};
use crate::callable::{Callable, Native};
use crate::env::Environment;
use crate::error::{Error, ErrorKind};
use crate::gc::Marker;
use crate::interpreter::{suspend_error, Interpreter};
use crate::limits::MAX_CALL_DEPTH;
use crate::value::Value;

// Statements run on an explicit cursor stack instead of the native stack. A task that waits keeps
// its stack of cursors (statement positions plus the frames they run in) and picks up where it
// left off once the scheduler resumes it.

/// A statement inside a shared block.
#[derive(Clone)]
pub(crate) struct StmtRef {
    block: Block,
    index: usize,
}

impl StmtRef {
    fn stmt(&self) -> &Stmt {
        &self.block[self.index]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Scope,
    Call,
}

pub(crate) enum LoopState {
    While,
    Numeric { next: f64, end: f64, step: f64 },
    // snapshot of the iterated container taken when the loop starts
    Entries { entries: Vec<(Value, Value)>, next: usize },
}

pub(crate) enum Cursor {
    Block {
        body: Block,
        pc: usize,
        env: Rc<RefCell<Environment>>,
        kind: BlockKind,
    },
    Loop {
        at: StmtRef,
        env: Rc<RefCell<Environment>>,
        state: LoopState,
    },
    // a task whose body is a native function, taken on first resume
    Native {
        call: Option<(Rc<Native>, Vec<Value>)>,
    },
}

impl Cursor {
    pub(crate) fn block(body: Block, env: Rc<RefCell<Environment>>, kind: BlockKind) -> Self {
        Cursor::Block {
            body,
            pc: 0,
            env,
            kind,
        }
    }
}

pub(crate) struct Continuation {
    cursors: Vec<Cursor>,

    // value of the last expression statement, the result once every cursor is popped
    last: Value,

    // function bodies on this stack, bounded by MAX_CALL_DEPTH
    calls: usize,

    // only task continuations may suspend, nested ones run to completion
    suspendable: bool,
}

impl Continuation {
    pub(crate) fn new(cursor: Cursor, suspendable: bool) -> Self {
        let calls = match cursor {
            Cursor::Block {
                kind: BlockKind::Call,
                ..
            } => 1,
            _ => 0,
        };

        Continuation {
            cursors: vec![cursor],
            last: Value::Nil,
            calls,
            suspendable,
        }
    }

    pub(crate) fn trace(&self, marker: &mut Marker) {
        marker.value(&self.last);
        for cursor in &self.cursors {
            match cursor {
                Cursor::Block { env, .. } => marker.frame(env),
                Cursor::Loop { env, state, .. } => {
                    marker.frame(env);
                    if let LoopState::Entries { entries, .. } = state {
                        for (key, value) in entries {
                            marker.value(key);
                            marker.value(value);
                        }
                    }
                }
                Cursor::Native { call } => {
                    for arg in call.iter().flat_map(|(_, args)| args) {
                        marker.value(arg);
                    }
                }
            }
        }
    }
}

pub(crate) enum Step {
    Finished(Value),
    Suspended(f64),
}

enum Flow {
    Done,
    Value(Value),
    Enter(Cursor),
    Suspend(f64),
}

impl Interpreter {
    /// Runs `cont` until its cursor stack is empty or a statement-level `wait` suspends it.
    pub(crate) fn resume(&mut self, cont: &mut Continuation) -> Result<Step, Error> {
        loop {
            let flow = match cont.cursors.last_mut() {
                None => return Ok(Step::Finished(mem::take(&mut cont.last))),
                Some(Cursor::Block { body, pc, env, .. }) => {
                    if *pc < body.len() {
                        let at = StmtRef {
                            block: Rc::clone(body),
                            index: *pc,
                        };
                        *pc += 1;
                        self.env = Rc::clone(env);
                        Some(self.exec_statement(&at, cont.calls, cont.suspendable)?)
                    } else {
                        None
                    }
                }
                Some(Cursor::Loop { at, env, state }) => {
                    self.env = Rc::clone(env);
                    self.next_iteration(at.stmt(), env, state)?.map(Flow::Enter)
                }
                Some(Cursor::Native { call }) => match call.take() {
                    Some((native, args)) => {
                        Some(self.native_statement(native, args, cont.suspendable)?)
                    }
                    None => None,
                },
            };

            match flow {
                // Blocks keep the value of their last statement so an `if` chain at the end of
                // a function body yields its branch result. Loops always yield nil.
                None => match cont.cursors.pop() {
                    Some(Cursor::Block {
                        kind: BlockKind::Call,
                        ..
                    }) => cont.calls -= 1,
                    Some(Cursor::Loop { .. }) => cont.last = Value::Nil,
                    _ => {}
                },
                Some(Flow::Done) => cont.last = Value::Nil,
                Some(Flow::Value(value)) => cont.last = value,
                Some(Flow::Enter(cursor)) => {
                    if let Cursor::Block {
                        kind: BlockKind::Call,
                        ..
                    } = cursor
                    {
                        cont.calls += 1;
                    }
                    cont.last = Value::Nil;
                    cont.cursors.push(cursor);
                }
                Some(Flow::Suspend(seconds)) => {
                    cont.last = Value::Nil;
                    return Ok(Step::Suspended(seconds));
                }
            }
        }
    }

    /// Runs a non-suspendable continuation to completion on the native stack, restoring the
    /// current environment afterwards.
    pub(crate) fn run_nested(&mut self, cont: &mut Continuation) -> Result<Value, Error> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Error::new(
                ErrorKind::StackOverflow,
                "maximum call depth exceeded",
            ));
        }

        let saved = Rc::clone(&self.env);
        self.depth += 1;
        let step = self.resume(cont);
        self.depth -= 1;
        self.env = saved;

        match step? {
            Step::Finished(value) => Ok(value),
            Step::Suspended(_) => Err(suspend_error()),
        }
    }

    /// Builds a task continuation that calls `callee` with `args`.
    pub(crate) fn invocation(&mut self, callee: Value, args: Vec<Value>) -> Result<Continuation, Error> {
        match callee {
            Value::Function(function) => {
                let frame = self.prepare_call(&function, args);
                let body = Rc::clone(&function.decl().body);
                Ok(Continuation::new(
                    Cursor::block(body, frame, BlockKind::Call),
                    true,
                ))
            }
            Value::Native(native) => Ok(Continuation::new(
                Cursor::Native {
                    call: Some((native, args)),
                },
                true,
            )),
            other => Err(Error::new(
                ErrorKind::NotCallable,
                format!("can only schedule functions, not {}", other.type_name()),
            )),
        }
    }

    fn exec_statement(
        &mut self,
        at: &StmtRef,
        calls: usize,
        suspendable: bool,
    ) -> Result<Flow, Error> {
        match at.stmt() {
            Stmt::Let {
                name,
                init,
                constant,
            } => {
                let value = if *constant {
                    self.evaluate_frozen(init)?
                } else {
                    self.visit_expr(init)?
                };
                self.declare(name, value, !constant)?;
                Ok(Flow::Done)
            }
            Stmt::Function { decl, constant } => {
                self.declare_function(decl, *constant)?;
                Ok(Flow::Done)
            }
            Stmt::If {
                branches,
                else_branch,
                ..
            } => {
                for (condition, body) in branches {
                    if self.visit_expr(condition)?.is_truthy() {
                        return Ok(Flow::Enter(self.scope(body)));
                    }
                }

                match else_branch {
                    Some(body) => Ok(Flow::Enter(self.scope(body))),
                    None => Ok(Flow::Done),
                }
            }
            Stmt::While { .. } => Ok(Flow::Enter(Cursor::Loop {
                at: at.clone(),
                env: Rc::clone(&self.env),
                state: LoopState::While,
            })),
            Stmt::NumericFor {
                start,
                end,
                step,
                token,
                ..
            } => {
                let start = self.visit_expr(start)?;
                let end = self.visit_expr(end)?;
                let step = match step {
                    Some(step) => self.visit_expr(step)?,
                    None => Value::Num(1.0),
                };

                let (Value::Num(start), Value::Num(end), Value::Num(step)) = (&start, &end, &step)
                else {
                    return Err(Error::runtime(
                        ErrorKind::Type,
                        token,
                        format!(
                            "'for' bounds must be numbers, got {}, {} and {}",
                            start.type_name(),
                            end.type_name(),
                            step.type_name()
                        ),
                    ));
                };

                if *step == 0.0 {
                    return Err(Error::runtime(
                        ErrorKind::Arithmetic,
                        token,
                        "'for' step cannot be zero",
                    ));
                }

                Ok(Flow::Enter(Cursor::Loop {
                    at: at.clone(),
                    env: Rc::clone(&self.env),
                    state: LoopState::Numeric {
                        next: *start,
                        end: *end,
                        step: *step,
                    },
                }))
            }
            Stmt::ForIn {
                iterable, token, ..
            } => {
                let iterable = self.visit_expr(iterable)?;
                let entries = entries_of(&iterable).map_err(|err| err.at(token.position()))?;
                Ok(Flow::Enter(Cursor::Loop {
                    at: at.clone(),
                    env: Rc::clone(&self.env),
                    state: LoopState::Entries { entries, next: 0 },
                }))
            }
            Stmt::Expression {
                expression:
                    Expr::Call {
                        callee,
                        paren,
                        args,
                        receiver,
                    },
            } => self.exec_call(callee, paren, args, *receiver, calls, suspendable),
            Stmt::Expression { expression } => Ok(Flow::Value(self.visit_expr(expression)?)),
        }
    }

    // A call in statement position pushes the callee's body onto the cursor stack, which is what
    // lets a `wait` deep inside it suspend the whole task.
    fn exec_call(
        &mut self,
        callee: &Expr,
        paren: &Token,
        args: &[Expr],
        receiver: bool,
        calls: usize,
        suspendable: bool,
    ) -> Result<Flow, Error> {
        let (callee, args) = self.evaluate_call(callee, args, receiver)?;
        match callee {
            Value::Function(function) => {
                if calls >= MAX_CALL_DEPTH {
                    return Err(Error::runtime(
                        ErrorKind::StackOverflow,
                        paren,
                        "maximum call depth exceeded",
                    ));
                }

                let frame = self.prepare_call(&function, args);
                let body = Rc::clone(&function.decl().body);
                Ok(Flow::Enter(Cursor::block(body, frame, BlockKind::Call)))
            }
            Value::Native(native) => self
                .native_statement(native, args, suspendable)
                .map_err(|err| err.at(paren.position())),
            other => self
                .call_value(other, args)
                .map(Flow::Value)
                .map_err(|err| err.at(paren.position())),
        }
    }

    fn native_statement(
        &mut self,
        native: Rc<Native>,
        args: Vec<Value>,
        suspendable: bool,
    ) -> Result<Flow, Error> {
        match native.call(self, args) {
            Ok(value) => Ok(Flow::Value(value)),
            Err(Error::Suspend(seconds)) if suspendable => Ok(Flow::Suspend(seconds)),
            Err(Error::Suspend(_)) => Err(suspend_error()),
            Err(err) => Err(err),
        }
    }

    fn next_iteration(
        &mut self,
        stmt: &Stmt,
        env: &Rc<RefCell<Environment>>,
        state: &mut LoopState,
    ) -> Result<Option<Cursor>, Error> {
        match (stmt, state) {
            (Stmt::While { condition, body, .. }, LoopState::While) => {
                if self.visit_expr(condition)?.is_truthy() {
                    Ok(Some(self.scope(body)))
                } else {
                    Ok(None)
                }
            }
            (Stmt::NumericFor { var, body, .. }, LoopState::Numeric { next, end, step }) => {
                let more = if *step > 0.0 {
                    *next <= *end
                } else {
                    *next >= *end
                };
                if !more {
                    return Ok(None);
                }

                // a fresh frame per iteration, so closures capture that iteration's variable
                let mut frame = Environment::with(Rc::clone(env));
                frame.bind(&var.lexeme, Value::Num(*next));
                *next += *step;
                let frame = self.heap.frame(frame);
                Ok(Some(Cursor::block(Rc::clone(body), frame, BlockKind::Scope)))
            }
            (
                Stmt::ForIn {
                    key, value, body, ..
                },
                LoopState::Entries { entries, next },
            ) => {
                let Some((k, v)) = entries.get(*next) else {
                    return Ok(None);
                };

                let mut frame = Environment::with(Rc::clone(env));
                frame.bind(&key.lexeme, k.clone());
                frame.bind(&value.lexeme, v.clone());
                *next += 1;
                let frame = self.heap.frame(frame);
                Ok(Some(Cursor::block(Rc::clone(body), frame, BlockKind::Scope)))
            }
            _ => Ok(None),
        }
    }

    fn scope(&mut self, body: &Block) -> Cursor {
        let frame = self.heap.frame(Environment::with(Rc::clone(&self.env)));
        Cursor::block(Rc::clone(body), frame, BlockKind::Scope)
    }
}

/// Key/value pairs a `for (k, v in x)` loop walks: dictionary and module entries in insertion
/// order, array elements with their index.
fn entries_of(value: &Value) -> Result<Vec<(Value, Value)>, Error> {
    match value {
        Value::Dict(dict) => Ok(dict
            .entries()
            .iter()
            .map(|(key, value)| (Value::from(Rc::clone(key)), value.clone()))
            .collect()),
        Value::Array(array) => Ok(array
            .items()
            .iter()
            .enumerate()
            .map(|(i, item)| (Value::from(i), item.clone()))
            .collect()),
        Value::Module(module) => Ok(module
            .members()
            .iter()
            .map(|(key, value)| (Value::from(Rc::clone(key)), value.clone()))
            .collect()),
        other => Err(Error::new(
            ErrorKind::Type,
            format!("cannot iterate over {}", other.type_name()),
        )),
    }
}
