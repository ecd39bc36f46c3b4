use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt::{self, Display, Formatter};
use std::io::Write;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use crate::callable::Native;
use crate::error::{Error, ErrorKind};
use crate::exec::{Continuation, Step};
use crate::gc::Marker;
use crate::interpreter::Interpreter;
use crate::value::Value;

/// Time source for `delay`, `wait` and `clock()`, measured from an arbitrary origin.
pub trait Clock {
    fn now(&self) -> Duration;

    /// Blocks until `now() >= deadline`. Called only when no task is runnable.
    fn sleep_until(&self, deadline: Duration);
}

pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        MonotonicClock::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        if let Some(left) = deadline.checked_sub(self.now()) {
            thread::sleep(left);
        }
    }
}

/// Virtual time that only moves when told to. Sleeping jumps straight to the deadline, so a
/// program full of waits runs instantly and deterministically. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep_until(&self, deadline: Duration) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// A task is ready or deferred while it sits in one of the run queues, sleeping while it sits in
// the deadline heap and done once the scheduler drops it.
struct Task {
    id: TaskId,
    cont: Continuation,

    // the entry program, whose result and errors belong to the caller of `interpret`
    main: bool,
}

// Min-heap entry, earliest deadline first and enqueue order among equal deadlines
struct Sleeper {
    until: Duration,
    seq: u64,
    task: Task,
}

impl PartialEq for Sleeper {
    fn eq(&self, other: &Self) -> bool {
        self.until == other.until && self.seq == other.seq
    }
}

impl Eq for Sleeper {}

impl PartialOrd for Sleeper {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Sleeper {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.until, other.seq).cmp(&(self.until, self.seq))
    }
}

pub(crate) struct Scheduler {
    clock: Box<dyn Clock>,
    ready: VecDeque<Task>,
    deferred: VecDeque<Task>,
    sleeping: BinaryHeap<Sleeper>,
    next_id: u64,
    next_seq: u64,
}

impl Scheduler {
    pub(crate) fn new(clock: Box<dyn Clock>) -> Self {
        Scheduler {
            clock,
            ready: VecDeque::new(),
            deferred: VecDeque::new(),
            sleeping: BinaryHeap::new(),
            next_id: 0,
            next_seq: 0,
        }
    }

    pub(crate) fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = clock;
    }

    pub(crate) fn now(&self) -> Duration {
        self.clock.now()
    }

    pub(crate) fn spawn(&mut self, cont: Continuation) -> TaskId {
        let task = self.task(cont, false);
        let id = task.id;
        self.ready.push_back(task);
        id
    }

    pub(crate) fn defer(&mut self, cont: Continuation) -> TaskId {
        let task = self.task(cont, false);
        let id = task.id;
        self.deferred.push_back(task);
        id
    }

    pub(crate) fn delay(&mut self, after: Duration, cont: Continuation) -> TaskId {
        let task = self.task(cont, false);
        let id = task.id;
        let until = self.now().saturating_add(after);
        self.sleep(task, until);
        id
    }

    fn task(&mut self, cont: Continuation, main: bool) -> Task {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        tracing::debug!(task = %id, main, "task created");
        Task { id, cont, main }
    }

    fn sleep(&mut self, task: Task, until: Duration) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.sleeping.push(Sleeper { until, seq, task });
    }

    // Moves every sleeper whose deadline has passed to the ready queue, in deadline order
    fn promote_due(&mut self) {
        let now = self.now();
        while matches!(self.sleeping.peek(), Some(sleeper) if sleeper.until <= now) {
            if let Some(Sleeper { task, .. }) = self.sleeping.pop() {
                self.ready.push_back(task);
            }
        }
    }

    // Ready work first. Deferred tasks run once it drains, and anything they spawn still goes
    // ahead of the remaining deferred tasks.
    fn next_runnable(&mut self) -> Option<Task> {
        self.ready
            .pop_front()
            .or_else(|| self.deferred.pop_front())
    }

    fn has_runnable(&self) -> bool {
        !self.ready.is_empty() || !self.deferred.is_empty()
    }

    fn next_deadline(&self) -> Option<Duration> {
        self.sleeping.peek().map(|sleeper| sleeper.until)
    }

    fn clear(&mut self) {
        let discarded = self.ready.len() + self.deferred.len() + self.sleeping.len();
        if discarded > 0 {
            tracing::debug!(discarded, "pending tasks discarded");
        }
        self.ready.clear();
        self.deferred.clear();
        self.sleeping.clear();
    }

    pub(crate) fn trace(&self, marker: &mut Marker) {
        let sleeping = self.sleeping.iter().map(|sleeper| &sleeper.task);
        for task in self.ready.iter().chain(&self.deferred).chain(sleeping) {
            task.cont.trace(marker);
        }
    }
}

impl Interpreter {
    /// Runs `main` as the entry task and keeps ticking until no task is left.
    pub(crate) fn run_tasks(&mut self, main: Continuation) -> Result<Value, Error> {
        let task = self.scheduler.task(main, true);
        self.scheduler.ready.push_back(task);
        let mut result = Value::Nil;

        loop {
            self.scheduler.promote_due();
            if !self.scheduler.has_runnable() {
                match self.scheduler.next_deadline() {
                    Some(deadline) => {
                        self.scheduler.clock.sleep_until(deadline);
                        continue;
                    }
                    None => break,
                }
            }

            while let Some(mut task) = self.scheduler.next_runnable() {
                self.evaluating = true;
                let step = self.resume(&mut task.cont);
                self.evaluating = false;
                self.env = Rc::clone(&self.globals);

                match step {
                    Ok(Step::Finished(value)) => {
                        tracing::debug!(task = %task.id, "task finished");
                        if task.main {
                            result = value;
                        }
                    }
                    Ok(Step::Suspended(seconds)) => {
                        let after = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);
                        let until = self.scheduler.now().saturating_add(after);
                        self.scheduler.sleep(task, until);
                    }
                    Err(err) if task.main => {
                        self.scheduler.clear();
                        return Err(err);
                    }
                    Err(err) => {
                        tracing::error!(task = %task.id, error = %err, "task failed");
                        let written = writeln!(self.stdout.borrow_mut(), "error in task {}: {}", task.id, err);
                        if let Err(io) = written {
                            tracing::warn!(error = %io, "could not report task failure");
                        }
                    }
                }
            }

            if self.heap.should_collect() {
                self.collect(&[result.clone()]);
            }
        }

        Ok(result)
    }
}

// Delays and waits take non-negative seconds, negative ones count as zero
fn seconds(name: &str, value: &Value) -> Result<Duration, Error> {
    let Value::Num(secs) = value else {
        return Err(Error::new(
            ErrorKind::Type,
            format!("{}() expects a number of seconds, not {}", name, value.type_name()),
        ));
    };

    Duration::try_from_secs_f64(secs.max(0.0)).map_err(|_| {
        Error::new(
            ErrorKind::Type,
            format!("{}() expects a finite number of seconds, got {}", name, secs),
        )
    })
}

/// Members of `@std/task`.
pub(crate) fn task_natives() -> Vec<Native> {
    vec![
        Native::variadic("spawn", 1, |interpreter, args| {
            let cont = interpreter.invocation(args[0].clone(), args[1..].to_vec())?;
            let id = interpreter.scheduler.spawn(cont);
            Ok(Value::from(id.0))
        }),
        Native::variadic("defer", 1, |interpreter, args| {
            let cont = interpreter.invocation(args[0].clone(), args[1..].to_vec())?;
            let id = interpreter.scheduler.defer(cont);
            Ok(Value::from(id.0))
        }),
        Native::variadic("delay", 2, |interpreter, args| {
            let after = seconds("delay", &args[0])?;
            let cont = interpreter.invocation(args[1].clone(), args[2..].to_vec())?;
            let id = interpreter.scheduler.delay(after, cont);
            Ok(Value::from(id.0))
        }),
        // unwinds to the statement executor, which parks the task
        Native::new("wait", 1, |_, args| {
            let after = seconds("wait", &args[0])?;
            Err(Error::Suspend(after.as_secs_f64()))
        }),
    ]
}

/// Members of `@std/time`.
pub(crate) fn time_natives() -> Vec<Native> {
    vec![Native::new("clock", 0, |interpreter, _| {
        Ok(Value::from(interpreter.scheduler.now().as_secs_f64()))
    })]
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use crate::error::{Error, ErrorKind};
    use crate::interpreter::Interpreter;
    use crate::scheduler::{Clock, ManualClock};
    use crate::value::Value;

    const PRELUDE: &str = "let task = loadmodule(\"@std/task\")\nlet time = loadmodule(\"@std/time\")\n";

    fn run_with(clock: ManualClock, src: &str) -> (Result<Value, Error>, String) {
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut interpreter = Interpreter::new(output.clone()).with_clock(clock);
        let result = interpreter.run_source(&format!("{}{}", PRELUDE, src));
        let printed = String::from_utf8(output.borrow().clone()).unwrap();
        (result, printed)
    }

    fn run(src: &str) -> (Result<Value, Error>, String) {
        run_with(ManualClock::new(), src)
    }

    #[test]
    fn test_spawn_defer_delay_order() {
        let src = r#"
            task.spawn(fn () { print("A") })
            task.defer(fn () { print("B") })
            task.delay(0, fn () { print("C") })
            print("main")
        "#;
        let (result, printed) = run(src);
        result.unwrap();
        assert_eq!(printed, "main\nA\nB\nC\n");

        // stable across runs
        assert_eq!(run(src).1, printed);
    }

    #[test]
    fn test_spawned_work_runs_before_remaining_deferred() {
        let src = r#"
            task.defer(fn () {
                print("d1")
                task.spawn(fn () { print("s") })
            })
            task.defer(fn () { print("d2") })
        "#;
        assert_eq!(run(src).1, "d1\ns\nd2\n");
    }

    #[test]
    fn test_delay_deadlines_and_ties() {
        let src = r#"
            task.delay(1, fn () { print("first", time.clock()) })
            task.delay(1, fn () { print("second", time.clock()) })
            task.delay(0.5, fn () { print("early", time.clock()) })
            task.delay(-3, fn () { print("now", time.clock()) })
        "#;
        assert_eq!(run(src).1, "now 0\nearly 0.5\nfirst 1\nsecond 1\n");
    }

    #[test]
    fn test_wait_interleaves_tasks() {
        let src = r#"
            task.spawn(fn () {
                print("a1", time.clock())
                task.wait(2)
                print("a2", time.clock())
            })
            task.spawn(fn () {
                print("b1", time.clock())
                task.wait(1)
                print("b2", time.clock())
            })
        "#;
        assert_eq!(run(src).1, "a1 0\nb1 0\nb2 1\na2 2\n");
    }

    #[test]
    fn test_wait_inside_loops_and_statement_calls() {
        let src = r#"
            fn countdown(n) {
                for (i = n, 1, -1) {
                    print(i); task.wait(1)
                }
                "liftoff"
            }
            countdown(3)
            print("done", time.clock())
            let status = {ok: true}
            while (status.ok) {
                task.wait(0.5)
                status.ok = false
            }
            time.clock()
        "#;
        let (result, printed) = run(src);
        assert_eq!(printed, "3\n2\n1\ndone 3\n");
        assert_eq!(result.unwrap(), Value::from(3.5));
    }

    #[test]
    fn test_wait_in_expression_fails() {
        let (result, _) = run("let x = task.wait(1)");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Suspend);

        let (result, _) = run("fn pause() { task.wait(1) }\nlet y = pause()");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Suspend);
    }

    #[test]
    fn test_wait_argument_errors() {
        let (result, _) = run("task.wait(\"soon\")");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Type);

        let (result, _) = run("task.spawn(5)");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::NotCallable);
    }

    #[test]
    fn test_task_failures_are_isolated() {
        let src = r#"
            task.spawn(fn () { 1 + nil })
            task.spawn(fn () { print("still running") })
            "main result"
        "#;
        let (result, printed) = run(src);
        assert_eq!(result.unwrap(), Value::from("main result"));

        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("error in task 1: "), "{}", lines[0]);
        assert!(lines[0].ends_with("TypeError: operands of '+' must be numbers or strings, got number and nil"));
        assert_eq!(lines[1], "still running");
    }

    #[test]
    fn test_main_failure_discards_pending_tasks() {
        let output = Rc::new(RefCell::new(Vec::<u8>::new()));
        let mut interpreter = Interpreter::new(output.clone()).with_clock(ManualClock::new());
        let src = format!("{}task.delay(1, fn () {{ print(\"never\") }})\n1 / 0", PRELUDE);
        let err = interpreter.run_source(&src).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arithmetic);

        interpreter.run_source("print(\"after\")").unwrap();
        assert_eq!(String::from_utf8(output.borrow().clone()).unwrap(), "after\n");
    }

    #[test]
    fn test_native_tasks_and_ids() {
        let src = r#"
            let first = task.spawn(print, "from", "native")
            let second = task.defer(print, "deferred")
            print(first, second)
        "#;
        assert_eq!(run(src).1, "1 2\nfrom native\ndeferred\n");
    }

    #[test]
    fn test_manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new();
        let handle = clock.clone();
        let src = "task.wait(4)\ntime.clock()";
        let (result, _) = run_with(clock, src);
        assert_eq!(result.unwrap(), Value::from(4));
        assert_eq!(handle.now(), Duration::from_secs(4));

        handle.advance(Duration::from_millis(500));
        assert_eq!(handle.now(), Duration::from_millis(4500));
    }
}
