use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ahash::AHashMap;

use crate::env::Environment;
use crate::error::{Error, ErrorKind};
use crate::exec::{BlockKind, Continuation, Cursor};
use crate::gc::Marker;
use crate::interpreter::Interpreter;
use crate::limits::{
    LOADARGS_BINDING, MODULE_DIR_BINDING, MODULE_ENTRY_FILE, PACKAGE_DIR, SOURCE_EXTENSION,
    STD_PREFIX,
};
use crate::parser::parse_source;
use crate::value::Value;

pub(crate) enum ModuleState {
    Loading,
    Loaded(Value),
    Failed(Error),
}

/// Load records keyed by canonical path. A module body runs at most once per interpreter, later
/// loads get the cached export or the cached error.
#[derive(Default)]
pub(crate) struct ModuleCache {
    records: AHashMap<PathBuf, ModuleState>,
}

impl ModuleCache {
    pub(crate) fn new() -> Self {
        ModuleCache::default()
    }

    pub(crate) fn trace(&self, marker: &mut Marker) {
        for state in self.records.values() {
            if let ModuleState::Loaded(export) = state {
                marker.value(export);
            }
        }
    }
}

impl Interpreter {
    /// Resolves `id` and returns the module's export, evaluating its body on first load.
    pub(crate) fn load_module(&mut self, id: &str, args: Vec<Value>) -> Result<Value, Error> {
        if let Some(name) = id.strip_prefix(STD_PREFIX) {
            return self.namespaces.get(name).cloned().ok_or_else(|| {
                Error::new(
                    ErrorKind::ModuleNotFound,
                    format!("no native module named '{}'", id),
                )
            });
        }

        let path = self.resolve_module(id)?;
        match self.modules.records.get(&path) {
            Some(ModuleState::Loading) => {
                return Err(Error::new(
                    ErrorKind::CircularModule,
                    format!("module '{}' is already being loaded", id),
                ))
            }
            Some(ModuleState::Loaded(export)) => return Ok(export.clone()),
            Some(ModuleState::Failed(err)) => return Err(err.clone()),
            None => {}
        }

        tracing::debug!(module = id, path = %path.display(), "loading module");
        self.modules.records.insert(path.clone(), ModuleState::Loading);
        let result = self.evaluate_module(&path, args);
        let state = match &result {
            Ok(export) => ModuleState::Loaded(export.clone()),
            Err(err) => {
                tracing::debug!(module = id, error = %err, "module failed to load");
                ModuleState::Failed(err.clone())
            }
        };
        self.modules.records.insert(path, state);
        result
    }

    // Relative to the directory of the loading module first, then the package folder
    fn resolve_module(&self, id: &str) -> Result<PathBuf, Error> {
        let base = match self.lookup(MODULE_DIR_BINDING) {
            Some(Value::Str(dir)) => PathBuf::from(dir.as_ref()),
            _ => self.root.clone(),
        };

        let candidates = [base.join(id), self.root.join(PACKAGE_DIR).join(id)];
        for candidate in &candidates {
            if let Some(file) = source_file(candidate) {
                return file.canonicalize().map_err(|err| {
                    Error::host(format!("cannot resolve module '{}': {}", id, err))
                });
            }
        }

        Err(Error::new(
            ErrorKind::ModuleNotFound,
            format!("module '{}' not found", id),
        ))
    }

    // Module bodies run in their own top-level frame under the prelude, so they see builtins
    // but none of the loader's names.
    fn evaluate_module(&mut self, path: &Path, args: Vec<Value>) -> Result<Value, Error> {
        let src = fs::read_to_string(path).map_err(|err| {
            Error::host(format!("cannot read module '{}': {}", path.display(), err))
        })?;
        let program = parse_source(&src)?;

        let dir = path
            .parent()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default();
        let args = self.heap.array(args, false);

        let mut frame = Environment::with(Rc::clone(&self.prelude));
        frame.bind(LOADARGS_BINDING, Value::Array(args));
        frame.bind(MODULE_DIR_BINDING, Value::from(dir));
        let frame = self.heap.frame(frame);

        let body = Cursor::block(Rc::clone(&program.0), frame, BlockKind::Scope);
        self.run_nested(&mut Continuation::new(body, false))
    }
}

// `path` itself, `path.tfs`, or `path/main.tfs`
fn source_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }

    let mut with_extension = OsString::from(path.as_os_str());
    with_extension.push(".");
    with_extension.push(SOURCE_EXTENSION);
    let with_extension = PathBuf::from(with_extension);
    if with_extension.is_file() {
        return Some(with_extension);
    }

    let entry = path.join(MODULE_ENTRY_FILE);
    if entry.is_file() {
        return Some(entry);
    }

    None
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use crate::error::{Error, ErrorKind};
    use crate::interpreter::Interpreter;
    use crate::value::Value;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, src) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, src).unwrap();
        }
        dir
    }

    fn run_in(root: &Path, src: &str) -> (Result<Value, Error>, String) {
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut interpreter = Interpreter::new(output.clone()).with_root(root);
        let result = interpreter.run_source(src);
        let printed = String::from_utf8(output.borrow().clone()).unwrap();
        (result, printed)
    }

    #[test]
    fn test_module_body_runs_once() {
        let dir = project(&[("counter.tfs", "print(\"loading\")\n{value: 42}")]);
        let src = r#"
            let a = loadmodule("counter")
            let b = loadmodule("counter.tfs")
            print(a.value, a == b)
        "#;
        let (result, printed) = run_in(dir.path(), src);
        result.unwrap();
        assert_eq!(printed, "loading\n42 true\n");
    }

    #[test]
    fn test_resolution_order() {
        let dir = project(&[
            ("lib/util.tfs", "let helper = loadmodule(\"helper\")\n{name: \"util+\" + helper.name}"),
            ("lib/helper.tfs", "{name: \"local helper\"}"),
            ("Modules/helper/main.tfs", "{name: \"package helper\"}"),
            ("Modules/json/main.tfs", "{parse: fn (text) { \"parsed \" + text }}"),
        ]);
        let src = r#"
            print(loadmodule("lib/util").name)
            print(loadmodule("helper").name)
            print(loadmodule("json").parse("{}"))
        "#;
        let (result, printed) = run_in(dir.path(), src);
        result.unwrap();
        assert_eq!(
            printed,
            "util+local helper\npackage helper\nparsed {}\n"
        );
    }

    #[test]
    fn test_missing_and_circular_modules() {
        let dir = project(&[
            ("a.tfs", "loadmodule(\"b\")"),
            ("b.tfs", "loadmodule(\"a\")"),
        ]);

        let (result, _) = run_in(dir.path(), "loadmodule(\"nowhere\")");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ModuleNotFound);

        let (result, _) = run_in(dir.path(), "loadmodule(\"@std/nowhere\")");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ModuleNotFound);

        let (result, _) = run_in(dir.path(), "loadmodule(\"a\")");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::CircularModule);
    }

    #[test]
    fn test_failed_modules_are_cached() {
        let dir = project(&[
            ("broken.tfs", "print(\"running\")\n1 / 0"),
            ("invalid.tfs", "let = 1"),
        ]);
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut interpreter = Interpreter::new(output.clone()).with_root(dir.path());

        for _ in 0..2 {
            let err = interpreter.run_source("loadmodule(\"broken\")").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Arithmetic);
        }
        assert_eq!(String::from_utf8(output.borrow().clone()).unwrap(), "running\n");

        let err = interpreter.run_source("loadmodule(\"invalid\")").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn test_load_args() {
        let dir = project(&[("args.tfs", "getloadargs()")]);
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut interpreter = Interpreter::new(output.clone())
            .with_root(dir.path())
            .with_args(vec![String::from("--fast")]);

        let src = r#"
            print(loadmodule("args", 1, "two"))
            print(getloadargs())
        "#;
        interpreter.run_source(src).unwrap();
        assert_eq!(
            String::from_utf8(output.borrow().clone()).unwrap(),
            "[1, \"two\"]\n[\"--fast\"]\n"
        );
    }

    #[test]
    fn test_modules_are_isolated_from_the_loader() {
        let dir = project(&[
            ("peek.tfs", "secret"),
            ("pause.tfs", "loadmodule(\"@std/task\").wait(1)"),
        ]);

        let (result, _) = run_in(dir.path(), "let secret = 1\nloadmodule(\"peek\")");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::UndefinedName);

        // a module body is not a task
        let (result, _) = run_in(dir.path(), "loadmodule(\"pause\")");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Suspend);
    }

    #[test]
    fn test_std_namespaces() {
        let dir = project(&[]);
        let (result, _) = run_in(
            dir.path(),
            "let task = loadmodule(\"@std/task\")\nprint(type(task), type(task.spawn))\ntask == loadmodule(\"@std/task\")",
        );
        assert_eq!(result.unwrap(), Value::from(true));
    }
}
