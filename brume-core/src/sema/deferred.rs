//! Deferred results and the cooperative scheduler that drives analysis.
//!
//! A `Deferred` is a single-producer, multi-consumer completion cell.
//! Consumers never block: they register a continuation with `then`, and the
//! continuation is queued on the `Scheduler` once the value is produced. The
//! scheduler runs queued tasks one at a time against a mutable context until
//! the queue drains or a task fails.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::error::CoreError;

pub type Task<C> = Box<dyn FnOnce(&mut C) -> Result<(), CoreError>>;
type Continuation<T, C> = Box<dyn FnOnce(&mut C, T) -> Result<(), CoreError>>;

/// FIFO of ready-to-run tasks.
pub struct Scheduler<C> {
    queue: VecDeque<Task<C>>,
    executed: usize,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Scheduler {
            queue: VecDeque::new(),
            executed: 0,
        }
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Scheduler::default()
    }

    pub fn push(&mut self, task: Task<C>) {
        self.queue.push_back(task);
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn executed(&self) -> usize {
        self.executed
    }

    fn pop(&mut self) -> Option<Task<C>> {
        let task = self.queue.pop_front();
        if task.is_some() {
            self.executed += 1;
        }
        task
    }
}

/// State that owns a scheduler.
pub trait Context: Sized + 'static {
    fn scheduler(&mut self) -> &mut Scheduler<Self>;

    fn spawn(&mut self, task: impl FnOnce(&mut Self) -> Result<(), CoreError> + 'static) {
        self.scheduler().push(Box::new(task));
    }
}

/// Runs queued tasks until none are left. The first error aborts the run and
/// leaves the remaining tasks unexecuted.
pub fn run<C: Context>(cx: &mut C) -> Result<(), CoreError> {
    while let Some(task) = cx.scheduler().pop() {
        task(cx)?;
    }
    tracing::trace!(tasks = cx.scheduler().executed(), "scheduler drained");
    Ok(())
}

enum State<T, C> {
    Pending(Vec<Continuation<T, C>>),
    Ready(T),
}

pub struct Deferred<T, C> {
    state: Rc<RefCell<State<T, C>>>,
}

impl<T, C> Clone for Deferred<T, C> {
    fn clone(&self) -> Self {
        Deferred {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T, C> fmt::Debug for Deferred<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ready = matches!(&*self.state.borrow(), State::Ready(_));
        f.debug_struct("Deferred").field("ready", &ready).finish()
    }
}

impl<T: Clone + 'static, C: Context> Default for Deferred<T, C> {
    fn default() -> Self {
        Deferred::new()
    }
}

impl<T: Clone + 'static, C: Context> Deferred<T, C> {
    pub fn new() -> Self {
        Deferred {
            state: Rc::new(RefCell::new(State::Pending(Vec::new()))),
        }
    }

    pub fn ready(value: T) -> Self {
        Deferred {
            state: Rc::new(RefCell::new(State::Ready(value))),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.borrow(), State::Ready(_))
    }

    pub fn get(&self) -> Option<T> {
        match &*self.state.borrow() {
            State::Ready(value) => Some(value.clone()),
            State::Pending(_) => None,
        }
    }

    /// Stores the value and queues every registered continuation.
    pub fn complete(&self, cx: &mut C, value: T) -> Result<(), CoreError> {
        let waiters = {
            let mut state = self.state.borrow_mut();
            let waiters = match &mut *state {
                State::Ready(_) => {
                    return Err(CoreError::malformed("deferred result", "a second completion"));
                }
                State::Pending(waiters) => std::mem::take(waiters),
            };
            *state = State::Ready(value.clone());
            waiters
        };

        for waiter in waiters {
            let value = value.clone();
            cx.spawn(move |cx| waiter(cx, value));
        }
        Ok(())
    }

    /// Registers `f` to run once the value is available. A ready value still
    /// goes through the queue, so continuations never run re-entrantly.
    pub fn then<F>(&self, cx: &mut C, f: F)
    where
        F: FnOnce(&mut C, T) -> Result<(), CoreError> + 'static,
    {
        let value = match &mut *self.state.borrow_mut() {
            State::Ready(value) => value.clone(),
            State::Pending(waiters) => {
                waiters.push(Box::new(f));
                return;
            }
        };
        cx.spawn(move |cx| f(cx, value));
    }

    pub fn map<U, F>(&self, cx: &mut C, f: F) -> Deferred<U, C>
    where
        U: Clone + 'static,
        F: FnOnce(&mut C, T) -> Result<U, CoreError> + 'static,
    {
        let out = Deferred::new();
        let result = out.clone();
        self.then(cx, move |cx, value| {
            let mapped = f(cx, value)?;
            result.complete(cx, mapped)
        });
        out
    }

    pub fn and_then<U, F>(&self, cx: &mut C, f: F) -> Deferred<U, C>
    where
        U: Clone + 'static,
        F: FnOnce(&mut C, T) -> Result<Deferred<U, C>, CoreError> + 'static,
    {
        let out = Deferred::new();
        let result = out.clone();
        self.then(cx, move |cx, value| {
            let next = f(cx, value)?;
            next.then(cx, move |cx, inner| result.complete(cx, inner));
            Ok(())
        });
        out
    }
}

/// Completes once every input has completed, with the values in input order.
/// Inputs may complete in any order.
pub fn join_all<T, C>(cx: &mut C, items: Vec<Deferred<T, C>>) -> Deferred<Vec<T>, C>
where
    T: Clone + 'static,
    C: Context,
{
    if items.is_empty() {
        return Deferred::ready(Vec::new());
    }

    let out = Deferred::new();
    let slots: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; items.len()]));
    let remaining = Rc::new(Cell::new(items.len()));

    for (index, item) in items.into_iter().enumerate() {
        let slots = Rc::clone(&slots);
        let remaining = Rc::clone(&remaining);
        let out = out.clone();
        item.then(cx, move |cx, value| {
            slots.borrow_mut()[index] = Some(value);
            remaining.set(remaining.get() - 1);
            if remaining.get() == 0 {
                let values = slots.borrow_mut().drain(..).flatten().collect();
                out.complete(cx, values)?;
            }
            Ok(())
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        scheduler: Scheduler<Recorder>,
        log: Vec<String>,
    }

    impl Context for Recorder {
        fn scheduler(&mut self) -> &mut Scheduler<Self> {
            &mut self.scheduler
        }
    }

    #[test]
    fn continuations_wait_for_completion() {
        let mut cx = Recorder::default();
        let cell: Deferred<i64, Recorder> = Deferred::new();
        cell.then(&mut cx, |cx, v| {
            cx.log.push(format!("got {v}"));
            Ok(())
        });
        run(&mut cx).expect("run");
        assert!(cx.log.is_empty());

        cell.complete(&mut cx, 7).expect("complete");
        run(&mut cx).expect("run");
        assert_eq!(cx.log, vec!["got 7"]);
        assert_eq!(cell.get(), Some(7));
    }

    #[test]
    fn completing_twice_is_a_defect() {
        let mut cx = Recorder::default();
        let cell: Deferred<(), Recorder> = Deferred::new();
        cell.complete(&mut cx, ()).expect("first");
        let err = cell.complete(&mut cx, ()).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn join_keeps_input_order_regardless_of_completion_order() {
        let mut cx = Recorder::default();
        let a: Deferred<i64, Recorder> = Deferred::new();
        let b: Deferred<i64, Recorder> = Deferred::new();
        let joined = join_all(&mut cx, vec![a.clone(), b.clone()]);

        b.complete(&mut cx, 2).expect("b");
        run(&mut cx).expect("run");
        assert!(!joined.is_ready());

        a.complete(&mut cx, 1).expect("a");
        run(&mut cx).expect("run");
        assert_eq!(joined.get(), Some(vec![1, 2]));
    }

    #[test]
    fn map_and_then_chain() {
        let mut cx = Recorder::default();
        let source: Deferred<i64, Recorder> = Deferred::ready(20);
        let doubled = source.map(&mut cx, |_, v| Ok(v * 2));
        let later: Deferred<i64, Recorder> = Deferred::new();
        let later_handle = later.clone();
        let sum = doubled.and_then(&mut cx, move |cx, v| {
            Ok(later_handle.map(cx, move |_, w| Ok(v + w)))
        });
        run(&mut cx).expect("run");
        assert!(!sum.is_ready());

        later.complete(&mut cx, 2).expect("complete");
        run(&mut cx).expect("run");
        assert_eq!(sum.get(), Some(42));
    }

    #[test]
    fn first_error_aborts_the_run() {
        let mut cx = Recorder::default();
        cx.spawn(|_| Err(CoreError::malformed("task", "a test")));
        cx.spawn(|cx| {
            cx.log.push("unreachable".to_string());
            Ok(())
        });
        assert!(run(&mut cx).is_err());
        assert!(cx.log.is_empty());
    }
}
