use std::cell::RefCell;
use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::process;
use std::rc::Rc;
use std::thread;

use seal_interpreter::{ErrorKind, Interpreter};

// sysexits(3)
const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_SOFTWARE: i32 = 70;
const EX_NOINPUT: i32 = 66;

// Expression calls recurse on the native stack, the default main thread stack is too small for
// the full call depth.
const STACK_SIZE: usize = 64 * 1024 * 1024;

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    // Only initialize if RUST_LOG is set
    if env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true).with_writer(io::stderr))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn run(script: String, args: Vec<String>) -> i32 {
    let src = match fs::read_to_string(&script) {
        Ok(src) => src,
        Err(err) => {
            eprintln!("cannot read {}: {}", script, err);
            return EX_NOINPUT;
        }
    };

    let root = Path::new(&script)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let stdout = Rc::new(RefCell::new(io::stdout()));
    let mut interpreter = Interpreter::new(stdout).with_root(root).with_args(args);

    match interpreter.run_source(&src) {
        Ok(_) => 0,
        Err(err) => {
            eprintln!("{}", err);
            match err.kind() {
                ErrorKind::Lex | ErrorKind::Parse => EX_DATAERR,
                _ => EX_SOFTWARE,
            }
        }
    }
}

fn main() {
    init_tracing();

    let mut args = env::args().skip(1);
    let Some(script) = args.next() else {
        eprintln!("usage: seal <script.tfs> [args...]");
        process::exit(EX_USAGE);
    };
    let args: Vec<String> = args.collect();

    let code = thread::Builder::new()
        .name(String::from("seal"))
        .stack_size(STACK_SIZE)
        .spawn(move || run(script, args))
        .map(|handle| handle.join().unwrap_or(EX_SOFTWARE));

    match code {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("cannot start interpreter thread: {}", err);
            process::exit(EX_SOFTWARE);
        }
    }
}
