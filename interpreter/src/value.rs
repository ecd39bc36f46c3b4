use std::cell::{Ref, RefCell};
use std::fmt::{self, Debug, Display, Formatter};
use std::rc::Rc;

use ahash::AHashMap;
use seal_core::Literal;

use crate::callable::{Callable, Function, Native};
use crate::error::{Error, ErrorKind};

#[derive(Clone, Default)]
pub enum Value {
    Num(f64),
    Str(Rc<str>),
    Bool(bool),
    #[default]
    Nil,
    Array(Rc<Array>),
    Dict(Rc<Dict>),
    Function(Rc<Function>),
    Native(Rc<Native>),
    Module(Rc<Module>),
}

impl Value {
    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Nil => "nil",
            Value::Array(_) => "array",
            Value::Dict(_) => "dictionary",
            Value::Function(_) => "function",
            Value::Native(_) => "nativefunction",
            Value::Module(_) => "module",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(val) => Some(val),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(val) => Some(*val),
            _ => None,
        }
    }
}

impl From<Literal> for Value {
    fn from(value: Literal) -> Self {
        match value {
            Literal::Str(val) => Value::Str(Rc::from(val)),
            Literal::Num(val) => Value::Num(val),
            Literal::Bool(val) => Value::Bool(val),
            Literal::Nil => Value::Nil,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Value::Str(value)
    }
}

macro_rules! impl_from_num_for_value {
    ( $( $t:ident )* ) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Value {
                    Value::Num(n as f64)
                }
            }
        )*
    }
}

impl_from_num_for_value!(u8 i8 u16 i16 u32 i32 u64 i64 usize isize f32 f64);

// Scalars compare by value, everything that lives behind an Rc by identity
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Num(lhs), Value::Num(rhs)) => lhs == rhs,
            (Value::Str(lhs), Value::Str(rhs)) => lhs == rhs,
            (Value::Bool(lhs), Value::Bool(rhs)) => lhs == rhs,
            (Value::Nil, Value::Nil) => true,
            (Value::Array(lhs), Value::Array(rhs)) => Rc::ptr_eq(lhs, rhs),
            (Value::Dict(lhs), Value::Dict(rhs)) => Rc::ptr_eq(lhs, rhs),
            (Value::Function(lhs), Value::Function(rhs)) => Rc::ptr_eq(lhs, rhs),
            (Value::Native(lhs), Value::Native(rhs)) => Rc::ptr_eq(lhs, rhs),
            (Value::Module(lhs), Value::Module(rhs)) => Rc::ptr_eq(lhs, rhs),
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(val) => write!(f, "{}", val),
            other => write_nested(other, f, &mut Vec::new()),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_nested(self, f, &mut Vec::new())
    }
}

// Strings inside containers are quoted. `seen` holds the containers currently being printed so
// that a container reachable from itself prints as `[...]` or `{...}` instead of recursing.
fn write_nested(value: &Value, f: &mut Formatter<'_>, seen: &mut Vec<*const ()>) -> fmt::Result {
    match value {
        Value::Num(val) => write!(f, "{}", val),
        Value::Str(val) => write!(f, "\"{}\"", val),
        Value::Bool(val) => write!(f, "{}", val),
        Value::Nil => write!(f, "nil"),
        Value::Array(array) => {
            let ptr = Rc::as_ptr(array) as *const ();
            if seen.contains(&ptr) {
                return write!(f, "[...]");
            }

            seen.push(ptr);
            write!(f, "[")?;
            for (i, item) in array.items().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_nested(item, f, seen)?;
            }
            seen.pop();
            write!(f, "]")
        }
        Value::Dict(dict) => {
            let ptr = Rc::as_ptr(dict) as *const ();
            if seen.contains(&ptr) {
                return write!(f, "{{...}}");
            }

            seen.push(ptr);
            write!(f, "{{")?;
            for (i, (key, item)) in dict.entries().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: ", key)?;
                write_nested(item, f, seen)?;
            }
            seen.pop();
            write!(f, "}}")
        }
        Value::Function(function) => write!(f, "<fn {}>", function.name()),
        Value::Native(native) => write!(f, "<native fn {}>", native.name()),
        Value::Module(module) => write!(f, "<module {}>", module.name()),
    }
}

/// Insertion-ordered string-keyed map backing dictionaries and module namespaces.
#[derive(Default, Clone)]
pub struct Entries {
    index: AHashMap<Rc<str>, usize>,
    entries: Vec<(Rc<str>, Value)>,
}

impl Entries {
    pub fn new() -> Self {
        Entries::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Overwriting an existing key keeps its original position.
    pub fn insert(&mut self, key: Rc<str>, value: Value) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(Rc::clone(&key), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let at = self.index.remove(key)?;
        let (_, value) = self.entries.remove(at);
        for (_, i) in self.index.iter_mut() {
            if *i > at {
                *i -= 1;
            }
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Rc<str>, Value)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, value)| value)
    }
}

impl FromIterator<(Rc<str>, Value)> for Entries {
    fn from_iter<T: IntoIterator<Item = (Rc<str>, Value)>>(iter: T) -> Self {
        let mut entries = Entries::new();
        for (key, value) in iter {
            entries.insert(key, value);
        }
        entries
    }
}

fn frozen_error(ty: &str) -> Error {
    Error::new(
        ErrorKind::ConstMutation,
        format!("cannot mutate a constant {}", ty),
    )
}

/// Maps a script number onto a container position, rejecting fractions and out-of-range values.
pub(crate) fn to_index(index: f64, len: usize) -> Option<usize> {
    if index.fract() == 0.0 && index >= 0.0 && index < len as f64 {
        Some(index as usize)
    } else {
        None
    }
}

fn index_error(index: f64, len: usize) -> Error {
    Error::new(
        ErrorKind::Index,
        format!("index {} out of range for length {}", index, len),
    )
}

pub struct Array {
    items: RefCell<Vec<Value>>,
    frozen: bool,
}

impl Array {
    pub(crate) fn new(items: Vec<Value>, frozen: bool) -> Self {
        Array {
            items: RefCell::new(items),
            frozen,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn items(&self) -> Ref<'_, Vec<Value>> {
        self.items.borrow()
    }

    pub fn get(&self, index: f64) -> Result<Value, Error> {
        let items = self.items.borrow();
        match to_index(index, items.len()) {
            Some(i) => Ok(items[i].clone()),
            None => Err(index_error(index, items.len())),
        }
    }

    pub fn set(&self, index: f64, value: Value) -> Result<(), Error> {
        self.check_mutable()?;
        let mut items = self.items.borrow_mut();
        let len = items.len();
        match to_index(index, len) {
            Some(i) => {
                items[i] = value;
                Ok(())
            }
            None => Err(index_error(index, len)),
        }
    }

    pub fn push(&self, value: Value) -> Result<usize, Error> {
        self.check_mutable()?;
        let mut items = self.items.borrow_mut();
        items.push(value);
        Ok(items.len())
    }

    pub fn pop(&self) -> Result<Option<Value>, Error> {
        self.check_mutable()?;
        Ok(self.items.borrow_mut().pop())
    }

    pub fn remove(&self, index: f64) -> Result<Value, Error> {
        self.check_mutable()?;
        let mut items = self.items.borrow_mut();
        let len = items.len();
        match to_index(index, len) {
            Some(i) => Ok(items.remove(i)),
            None => Err(index_error(index, len)),
        }
    }

    // Used by the cycle collector, which has to break cycles through frozen arrays too
    pub(crate) fn take_items(&self) -> Vec<Value> {
        std::mem::take(&mut *self.items.borrow_mut())
    }

    fn check_mutable(&self) -> Result<(), Error> {
        if self.frozen {
            Err(frozen_error("array"))
        } else {
            Ok(())
        }
    }
}

impl Debug for Array {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Array(len={}, frozen={})", self.len(), self.frozen)
    }
}

pub struct Dict {
    entries: RefCell<Entries>,
    frozen: bool,
}

impl Dict {
    pub(crate) fn new(entries: Entries, frozen: bool) -> Self {
        Dict {
            entries: RefCell::new(entries),
            frozen,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn entries(&self) -> Ref<'_, Entries> {
        self.entries.borrow()
    }

    /// A missing key reads as `nil`.
    pub fn get(&self, key: &str) -> Value {
        self.entries.borrow().get(key).cloned().unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    pub fn set(&self, key: Rc<str>, value: Value) -> Result<(), Error> {
        self.check_mutable()?;
        self.entries.borrow_mut().insert(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>, Error> {
        self.check_mutable()?;
        Ok(self.entries.borrow_mut().remove(key))
    }

    pub(crate) fn take_entries(&self) -> Entries {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    fn check_mutable(&self) -> Result<(), Error> {
        if self.frozen {
            Err(frozen_error("dictionary"))
        } else {
            Ok(())
        }
    }
}

impl Debug for Dict {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Dict(len={}, frozen={})", self.len(), self.frozen)
    }
}

/// A read-only namespace, produced by native namespace registration.
#[derive(Debug)]
pub struct Module {
    name: String,
    members: Entries,
}

impl Module {
    pub(crate) fn new(name: String, members: Entries) -> Self {
        Module { name, members }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.members.get(key).cloned()
    }

    pub fn members(&self) -> &Entries {
        &self.members
    }
}

impl Debug for Entries {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(key, value)| (key, value)))
            .finish()
    }
}
