//! Asynchronously resolved values.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::Mutex;
use static_assertions::{assert_impl_all, assert_not_impl_any};

use super::fault::Fault;
use crate::error::RaceError;
use crate::sched::task::{Reject, Resolve, TaskBuilder, TaskFn};
use crate::sched::wait::ThreadWaitList;

/// The message carried by the fault of a future whose writers were all dropped before any of them resolved it.
pub const ABANDONED_MESSAGE: &str = "future abandoned without a result";

/// The final state of a resolved future.
#[derive(Debug, Clone)]
pub enum Outcome<T, E> {
    /// The work completed and produced a value.
    Value(T),
    /// The work completed and reported an error.
    Error(E),
    /// The work panicked.
    Fault(Fault)
}

impl<T, E> Outcome<T, E> {
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Outcome::Fault(_))
    }

    /// Gets the fault of this outcome, if the work panicked.
    pub fn fault(&self) -> Option<&Fault> {
        match *self {
            Outcome::Fault(ref fault) => Some(fault),
            _ => None
        }
    }

    /// Converts this outcome into the result the work produced.
    ///
    /// # Panics
    ///
    /// If this outcome is a [`Fault`], the fault is re-raised on the current thread instead of being returned.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Outcome::Value(val) => Ok(val),
            Outcome::Error(err) => Err(err),
            Outcome::Fault(fault) => fault.resume()
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(val) => Outcome::Value(val),
            Err(err) => Outcome::Error(err)
        }
    }
}

struct FutureState<T, E> {
    outcome: Option<Outcome<T, E>>,
    writers: usize
}

/// The shared state behind a [`Future`] and its [`FutureWriter`]s.
///
/// `outcome` goes from `None` to `Some` exactly once and is never modified afterwards. Threads waiting for that transition sit on `wait`,
/// which they join while holding `state` so that a writer cannot slip in between their check and their suspension.
struct FutureWait<T, E> {
    state: Mutex<FutureState<T, E>>,
    wait: ThreadWaitList
}

impl<T, E> FutureWait<T, E> {
    fn new(outcome: Option<Outcome<T, E>>, writers: usize) -> Arc<FutureWait<T, E>> {
        Arc::new(FutureWait {
            state: Mutex::new(FutureState { outcome, writers }),
            wait: ThreadWaitList::new()
        })
    }

    fn resolve(&self, outcome: Outcome<T, E>) -> bool {
        let mut state = self.state.lock();

        if state.outcome.is_some() {
            return false;
        }

        state.outcome = Some(outcome);
        drop(state);

        self.wait.wake_all();
        true
    }

    fn is_resolved(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    fn with_outcome<U>(&self, f: impl FnOnce(&Outcome<T, E>) -> U) -> U {
        loop {
            let state = self.state.lock();

            if let Some(ref outcome) = state.outcome {
                return f(outcome);
            }

            let wait = self.wait.wait();
            drop(state);
            wait.suspend();
        }
    }
}

/// Represents a value that will be available when work running on another thread completes.
///
/// A future is a cheap handle: cloning it yields another handle to the same result, and every clone observes the same outcome. The outcome
/// is set exactly once, by whichever [`FutureWriter`] gets there first. Readers can block on it with [`Future::wait`] from any number of
/// threads at once.
///
/// Futures can be created already running via [`Future::spawn`] and its variants, combined via [`Future::race`], or resolved manually via
/// the writer returned by [`Future::new`].
///
/// Reading the result of a future requires `T: Clone` and `E: Clone` since every reader receives its own copy of it.
#[must_use]
pub struct Future<T, E>(Arc<FutureWait<T, E>>);

impl<T, E> Future<T, E> {
    /// Creates a new unresolved [`Future`] that can be resolved using the provided [`FutureWriter`].
    pub fn new() -> (Future<T, E>, FutureWriter<T, E>) {
        let wait = FutureWait::new(None, 1);

        (Future(wait.clone()), FutureWriter(wait))
    }

    /// Creates a new [`Future`] that is already resolved with the provided result. Calling methods on the returned future will never block.
    pub fn done(result: Result<T, E>) -> Future<T, E> {
        Future(FutureWait::new(Some(result.into()), 0))
    }

    /// Gets whether this future has been resolved. This never blocks.
    ///
    /// Once this returns `true` for a future, it will return `true` for that future forever.
    pub fn is_ready(&self) -> bool {
        self.0.is_resolved()
    }

    /// Blocks the current thread until this future resolves.
    ///
    /// Unlike [`Future::wait`], this will not re-raise a fault. It is safe to call from any number of threads concurrently.
    pub fn block_until_ready(&self) {
        self.0.with_outcome(|_| ());
    }
}

impl<T, E: Clone> Future<T, E> {
    /// Blocks until this future is resolved, then returns its error if there was one, discarding the value. This is useful for work which
    /// does not produce a meaningful value.
    ///
    /// # Panics
    ///
    /// If the work behind this future panicked, the panic is re-raised on the current thread.
    pub fn wait_done(&self) -> Result<(), E> {
        let outcome = self.0.with_outcome(|outcome| match *outcome {
            Outcome::Value(_) => Outcome::Value(()),
            Outcome::Error(ref err) => Outcome::Error(err.clone()),
            Outcome::Fault(ref fault) => Outcome::Fault(fault.clone())
        });

        outcome.into_result()
    }
}

impl<T: Clone, E: Clone> Future<T, E> {
    /// Blocks until this future is resolved, then returns a copy of the value or error that the work produced.
    ///
    /// This may be called any number of times, from any number of threads, and always returns the same result.
    ///
    /// # Panics
    ///
    /// If the work behind this future panicked, the panic is re-raised on the current thread with an equivalent payload. Panics with a
    /// `&'static str` or `String` message, which covers everything raised by `panic!`, are re-raised with a payload of that same type. Any
    /// other payload, e.g. from `panic_any(42u32)`, cannot be duplicated and is re-raised as a boxed [`Fault`] instead; the original is
    /// still reachable through [`Fault::with_payload`]. See [`Fault::to_payload`].
    pub fn wait(&self) -> Result<T, E> {
        self.outcome().into_result()
    }

    /// Blocks until this future is resolved, then returns a copy of its outcome. Unlike [`Future::wait`], a fault is returned rather than
    /// re-raised.
    pub fn outcome(&self) -> Outcome<T, E> {
        self.0.with_outcome(Outcome::clone)
    }

    /// Gets a copy of this future's outcome if it has been resolved. This never blocks.
    pub fn try_outcome(&self) -> Option<Outcome<T, E>> {
        self.0.state.lock().outcome.clone()
    }
}

impl<T: Send + 'static, E: Send + 'static> Future<T, E> {
    /// Runs the provided function on a new thread and returns a future for its result.
    ///
    /// This returns immediately. The thread is configured from [`TaskOptions::global`](crate::options::TaskOptions::global); use
    /// [`TaskBuilder`] to configure it explicitly.
    pub fn spawn<F>(f: F) -> Future<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static
    {
        TaskBuilder::new().spawn(f)
    }

    /// Runs the provided function on a new thread, passing it the elements of the `args` tuple as positional arguments, and returns a
    /// future for its result.
    ///
    /// ```
    /// use thread_future::Future;
    ///
    /// fn add(a: u32, b: u32) -> Result<u32, ()> {
    ///     Ok(a + b)
    /// }
    ///
    /// assert_eq!(Ok(3), Future::spawn_with(add, (1, 2)).wait());
    /// ```
    pub fn spawn_with<F, A>(f: F, args: A) -> Future<T, E>
    where
        F: TaskFn<A, Output = Result<T, E>>,
        A: Send + 'static
    {
        TaskBuilder::new().spawn_with(f, args)
    }

    /// Runs the provided function on a new thread, handing it a pair of functions to resolve or reject the returned future with.
    ///
    /// The first of the two to be called determines the outcome. They may be sent to and called from other threads. If the function and
    /// everything it handed the completion functions to drop them without calling either, the future resolves with a fault.
    pub fn spawn_callback<F>(f: F) -> Future<T, E>
    where
        F: FnOnce(Resolve<T>, Reject<E>) + Send + 'static
    {
        TaskBuilder::new().spawn_callback(f)
    }
}

impl<T: Clone + Send + 'static, E: Clone + Send + 'static> Future<T, E> {
    /// Creates a future that resolves with the outcome of whichever of the provided futures resolves first.
    ///
    /// Each source future is watched by its own relay thread. The futures that lose the race are _not_ stopped: their work keeps running
    /// until it completes on its own, and their own outcomes remain available through the original handles. Work that must actually stop
    /// needs to be told to by the caller, e.g. through a cancellation flag passed to it when it was spawned.
    ///
    /// This function will return [`RaceError::Empty`] if provided with an empty iterator, since the returned future could never resolve.
    pub fn race(futures: impl IntoIterator<Item = Future<T, E>>) -> Result<Future<T, E>, RaceError> {
        TaskBuilder::new().race(futures)
    }

    pub(crate) fn race_with(builder: &TaskBuilder, futures: impl IntoIterator<Item = Future<T, E>>) -> Result<Future<T, E>, RaceError> {
        let sources = futures.into_iter().collect_vec();

        if sources.is_empty() {
            return Err(RaceError::Empty);
        }

        let (future, writer) = Future::new();

        for source in sources {
            builder.launch(writer.clone(), move || Some(source.outcome()));
        }

        Ok(future)
    }
}

impl<T, E> Clone for Future<T, E> {
    fn clone(&self) -> Self {
        Future(self.0.clone())
    }
}

impl<T, E> fmt::Debug for Future<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future").field("ready", &self.is_ready()).finish()
    }
}

/// Represents ownership of the "resolution side" of a future. Holding a value of this type allows the caller to resolve its associated
/// future.
///
/// Writers can be cloned, and all clones race to resolve the same future: the first write wins and every later write is silently ignored.
/// Each write operation reports whether it was the one that took effect.
///
/// If the last writer for a future is dropped without the future having been resolved, the future resolves with a [`Fault`] whose message
/// is [`ABANDONED_MESSAGE`], so that threads waiting on it do not hang forever.
#[must_use]
pub struct FutureWriter<T, E>(Arc<FutureWait<T, E>>);

impl<T, E> FutureWriter<T, E> {
    /// Creates a new [`Future`] that will resolve to the value written to this writer.
    pub fn as_future(&self) -> Future<T, E> {
        Future(self.0.clone())
    }

    /// Checks whether the future associated with this writer has already been resolved, in which case writing to it has no effect.
    pub fn is_resolved(&self) -> bool {
        self.0.is_resolved()
    }

    /// Resolves the associated future with the provided outcome. Returns `true` if this write resolved the future and `false` if it had
    /// already been resolved.
    pub fn complete(self, outcome: Outcome<T, E>) -> bool {
        self.0.resolve(outcome)
    }

    /// Resolves the associated future with the provided value or error.
    pub fn finish(self, result: Result<T, E>) -> bool {
        self.complete(result.into())
    }

    /// Resolves the associated future as having panicked.
    pub fn fault(self, fault: Fault) -> bool {
        self.complete(Outcome::Fault(fault))
    }
}

impl<T, E> Clone for FutureWriter<T, E> {
    fn clone(&self) -> Self {
        self.0.state.lock().writers += 1;
        FutureWriter(self.0.clone())
    }
}

impl<T, E> Drop for FutureWriter<T, E> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();

        state.writers -= 1;
        if state.writers == 0 && state.outcome.is_none() {
            drop(state);

            tracing::debug!("last writer dropped before resolving its future");
            self.0.resolve(Outcome::Fault(Fault::new(ABANDONED_MESSAGE)));
        }
    }
}

impl<T, E> fmt::Debug for FutureWriter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureWriter").field("resolved", &self.is_resolved()).finish()
    }
}

assert_impl_all!(Future<String, String>: Send, Sync, Clone);
assert_impl_all!(FutureWriter<String, String>: Send, Sync, Clone);
assert_impl_all!(Outcome<String, String>: Send, Sync, Clone);
assert_not_impl_any!(Future<std::rc::Rc<u32>, ()>: Send, Sync);

#[cfg(test)]
mod test {
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    fn cancellable(cancel: Arc<AtomicBool>, id: &'static str) -> Result<u32, String> {
        if id == "quick" {
            thread::sleep(Duration::from_millis(5));
            return Ok(2000);
        }

        for _ in 0..1000 {
            if cancel.load(Ordering::Relaxed) {
                return Err(format!("cancel {}", id));
            }

            thread::sleep(Duration::from_millis(10));
        }

        Ok(1000)
    }

    fn panic_message<T>(result: thread::Result<T>) -> String {
        let payload = match result {
            Ok(_) => panic!("expected a panic"),
            Err(payload) => payload
        };

        match payload.downcast::<&'static str>() {
            Ok(s) => s.to_string(),
            Err(payload) => *payload.downcast::<String>().unwrap()
        }
    }

    #[test]
    fn test_done() {
        let future: Future<u32, ()> = Future::done(Ok(0xdead));

        assert!(future.is_ready());
        assert_eq!(Ok(0xdead), future.wait());
        assert!(matches!(future.try_outcome(), Some(Outcome::Value(0xdead))));
    }

    #[test]
    fn test_is_ready() {
        let (future, writer) = Future::<u32, ()>::new();

        assert!(!future.is_ready());
        assert!(future.try_outcome().is_none());

        assert!(writer.finish(Ok(0xdead)));
        assert!(future.is_ready());
        assert!(future.is_ready());
    }

    #[test]
    fn test_first_write_wins() {
        let (future, writer) = Future::<u32, String>::new();
        let second = writer.clone();
        let third = writer.clone();

        assert!(writer.finish(Err("first".to_string())));
        assert!(!second.finish(Ok(2)));
        assert!(!third.fault(Fault::new("late")));

        assert_eq!(Err("first".to_string()), future.wait());
        assert_eq!(Err("first".to_string()), future.wait());
    }

    #[test]
    fn test_concurrent_writes_single_resolution() {
        const WRITERS: usize = 8;

        let (future, writer) = Future::<usize, ()>::new();
        let barrier = Arc::new(Barrier::new(WRITERS));

        let threads = (0..WRITERS)
            .map(|i| {
                let writer = writer.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();
                    writer.finish(Ok(i))
                })
            })
            .collect_vec();
        drop(writer);

        let wins = threads.into_iter().map(|t| t.join().unwrap()).filter(|&won| won).count();
        assert_eq!(1, wins);

        let val = future.wait().unwrap();
        assert!(val < WRITERS);
        for _ in 0..10 {
            assert_eq!(Ok(val), future.wait());
        }
    }

    fn describe(outcome: &Outcome<usize, ()>) -> String {
        match *outcome {
            Outcome::Value(val) => format!("value {}", val),
            Outcome::Error(()) => "error".to_string(),
            Outcome::Fault(ref fault) => format!("fault {}", fault.message().unwrap_or("?"))
        }
    }

    #[test]
    fn test_concurrent_finish_and_fault() {
        const WRITERS: usize = 8;
        const READERS: usize = 4;

        let (future, writer) = Future::<usize, ()>::new();
        let barrier = Arc::new(Barrier::new(WRITERS + READERS));

        let readers = (0..READERS)
            .map(|_| {
                let future = future.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();
                    future.outcome()
                })
            })
            .collect_vec();

        let writers = (0..WRITERS)
            .map(|i| {
                let writer = writer.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();
                    if i % 2 == 0 {
                        writer.finish(Ok(i))
                    } else {
                        writer.fault(Fault::new(format!("writer {}", i)))
                    }
                })
            })
            .collect_vec();
        drop(writer);

        let wins = writers.into_iter().map(|t| t.join().unwrap()).filter(|&won| won).count();
        assert_eq!(1, wins);

        let expected = future.outcome();
        for reader in readers {
            let outcome = reader.join().unwrap();

            assert_eq!(describe(&expected), describe(&outcome));
            if let (Some(a), Some(b)) = (expected.fault(), outcome.fault()) {
                assert!(a.ptr_eq(b));
            }
        }
    }

    #[test]
    fn test_fault_reraised_in_parked_readers() {
        const READERS: usize = 4;

        let (future, writer) = Future::<u32, String>::new();

        let readers = (0..READERS)
            .map(|_| {
                let future = future.clone();
                thread::spawn(move || panic_message(catch_unwind(AssertUnwindSafe(|| future.wait()))))
            })
            .collect_vec();

        while future.0.wait.len() < READERS {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!future.is_ready());

        assert!(writer.fault(Fault::new("set to panic")));
        for reader in readers {
            assert_eq!("set to panic", reader.join().unwrap());
        }
    }

    #[test]
    fn test_many_readers() {
        let (future, writer) = Future::<String, ()>::new();

        let readers = (0..4)
            .map(|_| {
                let future = future.clone();
                thread::spawn(move || future.wait())
            })
            .collect_vec();

        thread::sleep(Duration::from_millis(10));
        writer.finish(Ok("happy days".to_string()));

        for reader in readers {
            assert_eq!(Ok("happy days".to_string()), reader.join().unwrap());
        }
    }

    #[test]
    fn test_block_until_ready() {
        let (future, writer) = Future::<u32, ()>::new();
        let waiter = {
            let future = future.clone();
            thread::spawn(move || future.block_until_ready())
        };

        thread::sleep(Duration::from_millis(5));
        assert!(!waiter.is_finished());

        writer.fault(Fault::new("boom"));
        waiter.join().unwrap();
        assert!(future.is_ready());
    }

    #[test]
    fn test_fault_reraised_for_every_reader() {
        let (future, writer) = Future::<u32, String>::new();
        writer.fault(Fault::new("set to panic"));

        for _ in 0..3 {
            let result = catch_unwind(AssertUnwindSafe(|| future.wait()));
            assert_eq!("set to panic", panic_message(result));
        }

        let result = catch_unwind(AssertUnwindSafe(|| future.wait_done()));
        assert_eq!("set to panic", panic_message(result));

        assert_eq!(Some("set to panic"), future.outcome().fault().and_then(Fault::message));
    }

    #[test]
    fn test_non_string_fault_reraised_as_fault() {
        let future = Future::spawn(|| -> Result<u32, ()> { std::panic::panic_any(42u32) });

        let payload = catch_unwind(AssertUnwindSafe(|| future.wait())).unwrap_err();
        assert!(!payload.is::<u32>());

        let fault = payload.downcast_ref::<Fault>().unwrap();
        assert_eq!(Some(42), fault.with_payload(|p| p.downcast_ref::<u32>().copied()));
    }

    #[test]
    fn test_wait_done() {
        let ok: Future<u32, String> = Future::done(Ok(1));
        let err: Future<u32, String> = Future::done(Err("nope".to_string()));

        assert_eq!(Ok(()), ok.wait_done());
        assert_eq!(Err("nope".to_string()), err.wait_done());
    }

    #[test]
    fn test_abandoned() {
        let (future, writer) = Future::<u32, ()>::new();
        let other = writer.clone();

        drop(writer);
        assert!(!future.is_ready());

        drop(other);
        let outcome = future.outcome();
        assert_eq!(Some(ABANDONED_MESSAGE), outcome.fault().and_then(Fault::message));
    }

    #[test]
    fn test_as_future() {
        let (future, writer) = Future::<u32, ()>::new();
        let other = writer.as_future();

        writer.finish(Ok(7));
        assert_eq!(Ok(7), future.wait());
        assert_eq!(Ok(7), other.wait());
    }

    #[test]
    fn test_spawn() {
        let future = Future::spawn(|| Ok::<_, String>("happy days".to_string()));

        assert_eq!(Ok("happy days".to_string()), future.wait());
    }

    #[test]
    fn test_spawn_cancelled() {
        let cancel = Arc::new(AtomicBool::new(false));
        let future = Future::spawn_with(cancellable, (cancel.clone(), "one"));

        assert!(!future.is_ready());
        thread::sleep(Duration::from_millis(30));
        cancel.store(true, Ordering::Relaxed);

        assert_eq!(Err("cancel one".to_string()), future.wait());
    }

    #[test]
    fn test_race_and_cancel() {
        let cancel = Arc::new(AtomicBool::new(false));
        let f1 = Future::spawn_with(cancellable, (cancel.clone(), "one"));
        let f2 = Future::spawn_with(cancellable, (cancel.clone(), "two"));
        let f3 = Future::spawn_with(cancellable, (cancel.clone(), "quick"));

        let race = Future::race([f1.clone(), f2.clone(), f3]).unwrap();
        assert_eq!(Ok(2000), race.wait());

        // The race does not stop the losers; they only finish once told to.
        assert!(!f1.is_ready());
        cancel.store(true, Ordering::Relaxed);

        assert_eq!(Err("cancel one".to_string()), f1.wait_done());
        assert_eq!(Err("cancel two".to_string()), f2.wait_done());
        assert_eq!(Ok(2000), race.wait());
    }

    #[test]
    fn test_race_already_resolved() {
        let (pending, _writer) = Future::<u32, ()>::new();
        let race = Future::race([pending, Future::done(Ok(5))]).unwrap();

        assert_eq!(Ok(5), race.wait());
    }

    #[test]
    fn test_race_error_wins() {
        let (pending, _writer) = Future::<u32, &'static str>::new();
        let race = Future::race([pending, Future::done(Err("failed"))]).unwrap();

        assert_eq!(Err("failed"), race.wait());
    }

    #[test]
    fn test_race_forwards_fault() {
        let (pending, _writer) = Future::<u32, ()>::new();
        let faulted = Future::spawn(|| -> Result<u32, ()> { panic!("set to panic") });

        let race = Future::race([pending, faulted.clone()]).unwrap();
        let outcome = race.outcome();

        assert!(outcome.fault().unwrap().ptr_eq(faulted.outcome().fault().unwrap()));
        assert_eq!("set to panic", panic_message(catch_unwind(AssertUnwindSafe(|| race.wait()))));
    }

    #[test]
    fn test_race_timeout() {
        let slow = Future::spawn(|| {
            thread::sleep(Duration::from_secs(5));
            Ok::<_, &'static str>(1)
        });
        let timer = Future::spawn(|| {
            thread::sleep(Duration::from_millis(10));
            Err("timed out")
        });

        assert_eq!(Err("timed out"), Future::race([slow, timer]).unwrap().wait());
    }

    #[test]
    fn test_race_empty() {
        assert_eq!(RaceError::Empty, Future::<u32, ()>::race([]).unwrap_err());
    }

    proptest! {
        #[test]
        fn prop_first_write_wins(writes in prop::collection::vec((any::<bool>(), any::<u8>()), 1..16)) {
            let (future, writer) = Future::<u8, u8>::new();

            for (i, &(ok, val)) in writes.iter().enumerate() {
                let result = if ok { Ok(val) } else { Err(val) };
                prop_assert_eq!(i == 0, writer.clone().finish(result));
            }

            let (ok, val) = writes[0];
            let expected = if ok { Ok(val) } else { Err(val) };
            prop_assert_eq!(expected, future.wait());
            prop_assert_eq!(expected, future.wait());
        }
    }
}
