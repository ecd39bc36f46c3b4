use std::cell::RefCell;
use std::mem;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};

use crate::callable::Function;
use crate::env::Environment;
use crate::limits::{GC_HEAP_GROW_FACTOR, GC_INITIAL_THRESHOLD};
use crate::value::{Array, Dict, Entries, Value};

// Frames and containers are reference counted, which leaks as soon as a closure ends up in its
// own captured frame or a container holds itself. The heap keeps a weak handle to every frame and
// container it hands out. A collection marks everything reachable from the roots and empties
// whatever is left, which breaks the cycles and lets `Rc` free the rest. Objects with more strong
// references than the registry accounts for are still held from outside and count as roots.
pub(crate) struct Heap {
    frames: Vec<Weak<RefCell<Environment>>>,
    arrays: Vec<Weak<Array>>,
    dicts: Vec<Weak<Dict>>,

    // allocations since the last collection
    allocated: usize,
    threshold: usize,

    // registry size at which dead handles get compacted away
    compact_at: usize,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Heap {
            frames: Vec::new(),
            arrays: Vec::new(),
            dicts: Vec::new(),
            allocated: 0,
            threshold: GC_INITIAL_THRESHOLD,
            compact_at: GC_INITIAL_THRESHOLD,
        }
    }

    pub(crate) fn frame(&mut self, env: Environment) -> Rc<RefCell<Environment>> {
        let frame = Rc::new(RefCell::new(env));
        self.frames.push(Rc::downgrade(&frame));
        self.allocated();
        frame
    }

    pub(crate) fn array(&mut self, items: Vec<Value>, frozen: bool) -> Rc<Array> {
        let array = Rc::new(Array::new(items, frozen));
        self.arrays.push(Rc::downgrade(&array));
        self.allocated();
        array
    }

    pub(crate) fn dict(&mut self, entries: Entries, frozen: bool) -> Rc<Dict> {
        let dict = Rc::new(Dict::new(entries, frozen));
        self.dicts.push(Rc::downgrade(&dict));
        self.allocated();
        dict
    }

    pub(crate) fn should_collect(&self) -> bool {
        self.allocated >= self.threshold
    }

    pub(crate) fn live(&self) -> usize {
        self.frames.len() + self.arrays.len() + self.dicts.len()
    }

    fn allocated(&mut self) {
        self.allocated += 1;

        // A long running task can allocate plenty without ever reaching a tick boundary, so dead
        // handles are dropped here as well to keep the registries bounded.
        if self.live() >= self.compact_at {
            self.frames.retain(|frame| frame.strong_count() > 0);
            self.arrays.retain(|array| array.strong_count() > 0);
            self.dicts.retain(|dict| dict.strong_count() > 0);
            self.compact_at = (self.live() * GC_HEAP_GROW_FACTOR).max(GC_INITIAL_THRESHOLD);
        }
    }

    /// Empties every registered object the marker did not reach, returning how many were cleared.
    ///
    /// Anything holding a strong reference from outside the registry (the host, a pending
    /// continuation, a module record) is a root as well, so only cycles nothing else can see are
    /// broken.
    pub(crate) fn sweep(&mut self, mut marker: Marker) -> usize {
        let frames: Vec<_> = mem::take(&mut self.frames)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        let arrays: Vec<_> = mem::take(&mut self.arrays)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        let dicts: Vec<_> = mem::take(&mut self.dicts)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        let mut census = Census::default();
        for frame in &frames {
            let frame = frame.borrow();
            if let Some(enclosing) = frame.enclosing() {
                census.edge(address(enclosing));
            }
            for value in frame.values() {
                census.value(value);
            }
        }
        for array in &arrays {
            for item in array.items().iter() {
                census.value(item);
            }
        }
        for dict in &dicts {
            for item in dict.entries().values() {
                census.value(item);
            }
        }

        // a function only held by registered objects passes its closure on as an internal edge
        let functions = mem::take(&mut census.functions);
        for function in functions.values() {
            if census.external(function) > 0 {
                marker.value(&Value::Function(Rc::clone(function)));
            } else {
                census.edge(address(function.closure()));
            }
        }
        drop(functions);

        for frame in &frames {
            if census.external(frame) > 0 {
                marker.frame(frame);
            }
        }
        for array in &arrays {
            if census.external(array) > 0 {
                marker.value(&Value::Array(Rc::clone(array)));
            }
        }
        for dict in &dicts {
            if census.external(dict) > 0 {
                marker.value(&Value::Dict(Rc::clone(dict)));
            }
        }

        marker.trace();
        let mut cleared = 0;

        for frame in frames {
            if marker.is_marked(address(&frame)) {
                self.frames.push(Rc::downgrade(&frame));
            } else {
                let garbage = frame.borrow_mut().take_contents();
                drop(garbage);
                cleared += 1;
            }
        }

        for array in arrays {
            if marker.is_marked(address(&array)) {
                self.arrays.push(Rc::downgrade(&array));
            } else {
                drop(array.take_items());
                cleared += 1;
            }
        }

        for dict in dicts {
            if marker.is_marked(address(&dict)) {
                self.dicts.push(Rc::downgrade(&dict));
            } else {
                drop(dict.take_entries());
                cleared += 1;
            }
        }

        self.allocated = 0;
        self.threshold = (self.live() * GC_HEAP_GROW_FACTOR).max(GC_INITIAL_THRESHOLD);
        self.compact_at = self.threshold;
        tracing::debug!(cleared, live = self.live(), "heap swept");
        cleared
    }
}

fn address<T>(rc: &Rc<T>) -> *const () {
    Rc::as_ptr(rc) as *const ()
}

// References the registered objects hold to each other, keyed by allocation address. Functions
// are not registered, so the ones met along the way are kept here to weigh their closures.
#[derive(Default)]
struct Census {
    internal: AHashMap<usize, usize>,
    functions: AHashMap<usize, Rc<Function>>,
}

impl Census {
    fn edge(&mut self, ptr: *const ()) {
        *self.internal.entry(ptr as usize).or_default() += 1;
    }

    fn value(&mut self, value: &Value) {
        match value {
            Value::Array(array) => self.edge(address(array)),
            Value::Dict(dict) => self.edge(address(dict)),
            Value::Function(function) => {
                self.edge(address(function));
                self.functions
                    .entry(address(function) as usize)
                    .or_insert_with(|| Rc::clone(function));
            }
            _ => {}
        }
    }

    // Strong references from outside the registry. The caller's own handle is one of them.
    fn external<T>(&self, rc: &Rc<T>) -> usize {
        let internal = self
            .internal
            .get(&(address(rc) as usize))
            .copied()
            .unwrap_or(0);
        Rc::strong_count(rc).saturating_sub(internal + 1)
    }
}

/// Worklist marker over frames and values, keyed by allocation address.
#[derive(Default)]
pub(crate) struct Marker {
    marked: AHashSet<usize>,
    frames: Vec<Rc<RefCell<Environment>>>,
    values: Vec<Value>,
}

impl Marker {
    pub(crate) fn new() -> Self {
        Marker::default()
    }

    pub(crate) fn frame(&mut self, frame: &Rc<RefCell<Environment>>) {
        if self.mark(Rc::as_ptr(frame) as *const ()) {
            self.frames.push(Rc::clone(frame));
        }
    }

    pub(crate) fn value(&mut self, value: &Value) {
        let ptr = match value {
            Value::Array(array) => Rc::as_ptr(array) as *const (),
            Value::Dict(dict) => Rc::as_ptr(dict) as *const (),
            Value::Function(function) => Rc::as_ptr(function) as *const (),
            Value::Module(module) => Rc::as_ptr(module) as *const (),
            _ => return,
        };

        if self.mark(ptr) {
            self.values.push(value.clone());
        }
    }

    fn mark(&mut self, ptr: *const ()) -> bool {
        self.marked.insert(ptr as usize)
    }

    fn is_marked(&self, ptr: *const ()) -> bool {
        self.marked.contains(&(ptr as usize))
    }

    fn trace(&mut self) {
        loop {
            if let Some(frame) = self.frames.pop() {
                let frame = frame.borrow();
                if let Some(enclosing) = frame.enclosing() {
                    self.frame(enclosing);
                }
                for value in frame.values() {
                    self.value(value);
                }
                continue;
            }

            let Some(value) = self.values.pop() else {
                break;
            };

            match &value {
                Value::Array(array) => {
                    for item in array.items().iter() {
                        self.value(item);
                    }
                }
                Value::Dict(dict) => {
                    for item in dict.entries().values() {
                        self.value(item);
                    }
                }
                Value::Function(function) => self.frame(function.closure()),
                Value::Module(module) => {
                    for item in module.members().values() {
                        self.value(item);
                    }
                }
                _ => {}
            }
        }
    }
}
