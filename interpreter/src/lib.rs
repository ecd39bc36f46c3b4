pub mod error;
pub mod interpreter;
pub mod parser;
pub mod scheduler;
pub mod value;

pub(crate) mod ast;
mod builtins;
mod callable;
pub(crate) mod env;
mod exec;
mod gc;
mod limits;
mod module;

pub use callable::{Callable, Function, Native, NativeFn};
pub use error::{Error, ErrorKind};
pub use interpreter::Interpreter;
pub use parser::{parse_source, Parser, Program};
pub use scheduler::{Clock, ManualClock, MonotonicClock, TaskId};
pub use value::{Array, Dict, Entries, Module, Value};
