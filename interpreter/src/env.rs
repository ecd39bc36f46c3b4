use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::value::Value;

#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub(crate) value: Value,
    pub(crate) mutable: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Environment {
    enclosing: Option<Rc<RefCell<Environment>>>,
    values: AHashMap<String, Binding>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum BindingError {
    Undefined,
    Constant,
}

impl Environment {
    pub(crate) fn new() -> Self {
        Environment::default()
    }

    pub(crate) fn with(enclosing: Rc<RefCell<Environment>>) -> Self {
        Environment {
            enclosing: Some(enclosing),
            values: AHashMap::new(),
        }
    }

    /// Declares `key` in this frame. A mutable binding may be redeclared, a constant one may not.
    pub(crate) fn define(
        &mut self,
        key: &str,
        value: Value,
        mutable: bool,
    ) -> Result<(), BindingError> {
        if matches!(self.values.get(key), Some(binding) if !binding.mutable) {
            return Err(BindingError::Constant);
        }

        self.values
            .insert(String::from(key), Binding { value, mutable });
        Ok(())
    }

    // Parameters and loop variables always land in a fresh frame
    pub(crate) fn bind(&mut self, key: &str, value: Value) {
        self.values.insert(
            String::from(key),
            Binding {
                value,
                mutable: true,
            },
        );
    }

    // Builtins are installed once into a frame nothing else writes to
    pub(crate) fn bind_constant(&mut self, key: &str, value: Value) {
        self.values.insert(
            String::from(key),
            Binding {
                value,
                mutable: false,
            },
        );
    }

    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        if let Some(binding) = self.values.get(key) {
            Some(binding.value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(key)
        } else {
            None
        }
    }

    pub(crate) fn assign(&mut self, key: &str, value: Value) -> Result<(), BindingError> {
        if let Some(binding) = self.values.get_mut(key) {
            if !binding.mutable {
                return Err(BindingError::Constant);
            }

            binding.value = value;
            Ok(())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(key, value)
        } else {
            Err(BindingError::Undefined)
        }
    }

    pub(crate) fn enclosing(&self) -> Option<&Rc<RefCell<Environment>>> {
        self.enclosing.as_ref()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.values().map(|binding| &binding.value)
    }

    // Empties the frame for the cycle collector. The caller drops the returned contents after
    // releasing its borrow, since dropping them may free other frames.
    pub(crate) fn take_contents(
        &mut self,
    ) -> (AHashMap<String, Binding>, Option<Rc<RefCell<Environment>>>) {
        (std::mem::take(&mut self.values), self.enclosing.take())
    }
}
