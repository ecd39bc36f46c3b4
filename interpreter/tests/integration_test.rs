use std::cell::RefCell;
use std::fs::File;
use std::io::Read;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use seal_interpreter::{Interpreter, ManualClock};
use walkdir::WalkDir;

// Every `tests/<name>.tfs` with a sibling `<name>.tfs.out` runs under a manual clock. The expected
// file holds everything printed, followed by the error line when the program fails.
#[test]
fn test_programs() {
    let source_files = WalkDir::new("../tests")
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| matches!(entry.path().extension(), Some(extension) if extension == "tfs"))
        .filter_map(|entry| {
            let mut exp_filename = entry.file_name().to_os_string();
            exp_filename.push(".out");

            let parent = entry.path().parent().unwrap();
            let exp_filepath = parent.join(exp_filename);

            if exp_filepath.exists() {
                Some((entry, exp_filepath))
            } else {
                None
            }
        });

    let mut total = 0;

    for (src_path, exp_path) in source_files {
        println!("🕑 Running test: {}", src_path.path().display());

        let mut src_content = String::new();
        let mut exp_content = String::new();

        File::open(src_path.path())
            .unwrap()
            .read_to_string(&mut src_content)
            .unwrap();
        File::open(exp_path)
            .unwrap()
            .read_to_string(&mut exp_content)
            .unwrap();

        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let root = src_path.path().parent().unwrap();
        let mut interpreter = Interpreter::new(output.clone())
            .with_root(root)
            .with_clock(ManualClock::new());

        let result = interpreter.run_source(&src_content);
        let mut actual = String::from_utf8(output.borrow().clone()).unwrap();
        if let Err(err) = result {
            actual.push_str(&err.to_string());
            actual.push('\n');
        }

        assert_eq!(exp_content, actual, "{}", src_path.path().display());

        println!("✅ Test complete: {}", src_path.path().display());
        total += 1;
    }

    assert!(total > 0, "no programs found under ../tests");
    println!("✅ Ran {} tests", total)
}
