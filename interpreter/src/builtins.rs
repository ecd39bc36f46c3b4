use std::io::Write;
use std::rc::Rc;

use crate::callable::{Callable, Native};
use crate::env::Environment;
use crate::error::{Error, ErrorKind};
use crate::interpreter::{index_value, set_index, Interpreter};
use crate::limits::LOADARGS_BINDING;
use crate::value::{Array, Value};

/// Defines every builtin in `prelude` as an immutable binding.
pub(crate) fn install(prelude: &mut Environment) {
    for native in natives() {
        let name = String::from(native.name());
        prelude.bind_constant(&name, Value::Native(Rc::new(native)));
    }
}

fn natives() -> Vec<Native> {
    vec![
        Native::variadic("print", 0, print),
        Native::new("type", 1, |_, args| Ok(Value::from(args[0].type_name()))),
        Native::new("len", 1, len),
        Native::new("find", 2, |_, args| {
            let array = array_arg("find", &args[0])?;
            let found = array.items().iter().position(|item| *item == args[1]);
            Ok(found.map(Value::from).unwrap_or_default())
        }),
        Native::new("pop", 1, |_, args| {
            let array = array_arg("pop", &args[0])?;
            Ok(array.pop()?.unwrap_or_default())
        }),
        Native::new("push", 2, |_, args| {
            let array = array_arg("push", &args[0])?;
            Ok(Value::from(array.push(args[1].clone())?))
        }),
        Native::new("remove", 2, remove),
        Native::new("hasattr", 2, |_, args| {
            let found = match (&args[0], &args[1]) {
                (Value::Dict(dict), Value::Str(key)) => dict.contains_key(key),
                (Value::Module(module), Value::Str(key)) => module.get(key).is_some(),
                _ => false,
            };
            Ok(Value::from(found))
        }),
        Native::new("getattr", 2, |_, args| index_value(&args[0], &args[1])),
        Native::new("setattr", 3, |_, args| {
            set_index(&args[0], &args[1], args[2].clone())?;
            Ok(args[2].clone())
        }),
        Native::variadic("loadmodule", 1, |interpreter, args| {
            let Value::Str(id) = &args[0] else {
                return Err(Error::new(
                    ErrorKind::Type,
                    format!("loadmodule() expects a string, not {}", args[0].type_name()),
                ));
            };
            interpreter.load_module(id, args[1..].to_vec())
        }),
        // a copy, so callers can't change what the next call sees
        Native::new("getloadargs", 0, |interpreter, _| {
            let items = match interpreter.lookup(LOADARGS_BINDING) {
                Some(Value::Array(args)) => {
                    let items = args.items().to_vec();
                    items
                }
                _ => Vec::new(),
            };
            Ok(interpreter.array(items))
        }),
    ]
}

fn print(interpreter: &mut Interpreter, args: &[Value]) -> Result<Value, Error> {
    let line = args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");

    writeln!(interpreter.stdout.borrow_mut(), "{}", line)
        .map_err(|err| Error::host(format!("print() failed: {}", err)))?;
    Ok(Value::Nil)
}

fn len(_: &mut Interpreter, args: &[Value]) -> Result<Value, Error> {
    let len = match &args[0] {
        Value::Array(array) => array.len(),
        Value::Dict(dict) => dict.len(),
        Value::Str(string) => string.chars().count(),
        Value::Module(module) => module.members().len(),
        other => {
            return Err(Error::new(
                ErrorKind::Type,
                format!("len() expects a collection or string, not {}", other.type_name()),
            ))
        }
    };
    Ok(Value::from(len))
}

fn remove(_: &mut Interpreter, args: &[Value]) -> Result<Value, Error> {
    match (&args[0], &args[1]) {
        (Value::Array(array), Value::Num(index)) => array.remove(*index),
        (Value::Dict(dict), Value::Str(key)) => Ok(dict.remove(key)?.unwrap_or_default()),
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
            format!("remove() expects an array or dictionary, not {}", other.type_name()),
        )),
    }
}

fn array_arg<'a>(name: &str, value: &'a Value) -> Result<&'a Rc<Array>, Error> {
    match value {
        Value::Array(array) => Ok(array),
        other => Err(Error::new(
            ErrorKind::Type,
            format!("{}() expects an array, not {}", name, other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

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
    fn test_print() {
        let (_, printed) = run("print(1, \"two\", true, nil, [1.5, \"x\"], {k: \"v\"})\nprint()");
        assert_eq!(printed, "1 two true nil [1.5, \"x\"] {k: \"v\"}\n\n");

        let (_, printed) = run("let a = [1]\npush(a, a)\nprint(a)\nfn named() { }\nprint(print, named)");
        assert_eq!(printed, "[1, [...]]\n<native fn print> <fn named>\n");
    }

    #[test]
    fn test_type() {
        let src = r#"
            let names = [type(1), type(""), type(false), type(nil), type([]), type({}),
                type(fn () { }), type(print), type(loadmodule("@std/time"))]
            names
        "#;
        assert_eq!(
            eval(src).to_string(),
            "[\"number\", \"string\", \"boolean\", \"nil\", \"array\", \"dictionary\", \"function\", \"nativefunction\", \"module\"]"
        );
    }

    #[test]
    fn test_len() {
        assert_eq!(eval("len([1, 2, 3])"), Value::from(3));
        assert_eq!(eval("len({a: 1})"), Value::from(1));
        assert_eq!(eval("len(\"héllo\")"), Value::from(5));
        assert_eq!(eval("len(loadmodule(\"@std/task\"))"), Value::from(4));
        assert_eq!(error_kind("len(5)"), ErrorKind::Type);
    }

    #[test]
    fn test_array_builtins() {
        assert_eq!(eval("find([\"a\", \"b\"], \"b\")"), Value::from(1));
        assert_eq!(eval("find([\"a\"], \"z\")"), Value::Nil);
        assert_eq!(eval("let a = [1, 2]\npop(a) + len(a)"), Value::from(3));
        assert_eq!(eval("pop([])"), Value::Nil);
        assert_eq!(eval("let a = []\npush(a, 1)\npush(a, 2)"), Value::from(2));
        assert_eq!(eval("let a = [1, 2, 3]\nremove(a, 0) + a[0]"), Value::from(3));
        assert_eq!(error_kind("remove([1], 4)"), ErrorKind::Index);
        assert_eq!(error_kind("find(1, 1)"), ErrorKind::Type);
        assert_eq!(error_kind("push(\"s\", 1)"), ErrorKind::Type);
    }

    #[test]
    fn test_dict_builtins() {
        assert_eq!(eval("let d = {a: 1, b: 2}\nremove(d, \"a\")\nlen(d)"), Value::from(1));
        assert_eq!(eval("remove({}, \"missing\")"), Value::Nil);
        assert_eq!(error_kind("remove({}, 1)"), ErrorKind::Index);

        assert_eq!(eval("hasattr({a: nil}, \"a\")"), Value::from(true));
        assert_eq!(eval("hasattr({}, \"a\")"), Value::from(false));
        assert_eq!(eval("hasattr(5, \"a\")"), Value::from(false));
        assert_eq!(eval("hasattr(loadmodule(\"@std/task\"), \"spawn\")"), Value::from(true));

        assert_eq!(eval("getattr({a: 7}, \"a\")"), Value::from(7));
        assert_eq!(eval("getattr([4, 5], 1)"), Value::from(5));
        assert_eq!(eval("let d = {}\nsetattr(d, \"k\", 3)\nd.k"), Value::from(3));
        assert_eq!(error_kind("const d = {}\nsetattr(d, \"k\", 3)"), ErrorKind::ConstMutation);
        assert_eq!(error_kind("getattr(loadmodule(\"@std/task\"), \"nope\")"), ErrorKind::Index);
    }

    #[test]
    fn test_builtins_are_constant() {
        assert_eq!(error_kind("print = 1"), ErrorKind::ConstReassign);
        // shadowing in a nested frame is still allowed
        assert_eq!(eval("let len = 3\nlen"), Value::from(3));
    }

    #[test]
    fn test_print_failure_is_a_host_error() {
        struct Closed;

        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut interpreter = Interpreter::new(Rc::new(RefCell::new(Closed)));
        let err = interpreter.run_source("print(1)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Host);
    }
}
