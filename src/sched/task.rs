//! Running the work behind a future on its own thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crate::error::{RaceError, SpawnError};
use crate::options::TaskOptions;
use crate::sync::{Fault, Future, FutureWriter, Outcome};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

/// The function handed to work spawned with [`Future::spawn_callback`] to resolve its future with a value.
pub type Resolve<T> = Box<dyn FnOnce(T) + Send>;

/// The function handed to work spawned with [`Future::spawn_callback`] to resolve its future with an error.
pub type Reject<E> = Box<dyn FnOnce(E) + Send>;

/// A function that can be run as a task with its positional arguments bound up front as the tuple `Args`.
///
/// This is implemented for every `FnOnce` taking up to six arguments, with `Args` being the tuple of those argument types, e.g. a
/// `fn(String, u32) -> R` is a `TaskFn<(String, u32)>`. Closures must annotate their argument types since they cannot be inferred through
/// this trait.
pub trait TaskFn<Args>: Send + 'static {
    type Output;

    fn call(self, args: Args) -> Self::Output;
}

macro_rules! impl_task_fn {
    ($($arg:ident),*) => {
        impl<Func, Ret, $($arg),*> TaskFn<($($arg,)*)> for Func
        where
            Func: FnOnce($($arg),*) -> Ret + Send + 'static
        {
            type Output = Ret;

            #[allow(non_snake_case)]
            fn call(self, ($($arg,)*): ($($arg,)*)) -> Ret {
                self($($arg),*)
            }
        }
    };
}

impl_task_fn!();
impl_task_fn!(A);
impl_task_fn!(A, B);
impl_task_fn!(A, B, C);
impl_task_fn!(A, B, C, D);
impl_task_fn!(A, B, C, D, E);
impl_task_fn!(A, B, C, D, E, F);

/// Runs `work` and resolves `writer` with whatever it produces. A panic in `work` is caught here and stored as a fault rather than being
/// allowed to unwind out of the task's thread. Work that returns `None` has arranged to resolve the future some other way.
fn run_task<T, E>(task: u64, writer: FutureWriter<T, E>, work: impl FnOnce() -> Option<Outcome<T, E>>) {
    tracing::trace!(task, "task started");

    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Some(outcome)) => {
            writer.complete(outcome);
        },
        Ok(None) => {},
        Err(payload) => {
            let fault = Fault::from_panic(payload);

            tracing::debug!(task, %fault, "task panicked, storing fault");
            writer.fault(fault);
        }
    }

    tracing::trace!(task, "task finished");
}

/// Configuration for the threads that run the work behind futures, in the manner of [`std::thread::Builder`].
///
/// The free-standing constructors on [`Future`] use a builder created by [`TaskBuilder::new`].
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    name_prefix: String,
    stack_size: Option<usize>
}

impl TaskBuilder {
    /// Creates a builder using the process-wide options from [`TaskOptions::global`].
    pub fn new() -> TaskBuilder {
        TaskBuilder::from_options(TaskOptions::global())
    }

    /// Creates a builder using the provided options.
    pub fn from_options(options: &TaskOptions) -> TaskBuilder {
        TaskBuilder {
            name_prefix: options.name_prefix().to_owned(),
            stack_size: options.stack_size()
        }
    }

    /// Sets the prefix of the names of threads spawned by this builder. Each thread is named with this prefix followed by a unique task id.
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> TaskBuilder {
        self.name_prefix = prefix.into();
        self
    }

    /// Sets the stack size, in bytes, of threads spawned by this builder.
    pub fn stack_size(mut self, size: usize) -> TaskBuilder {
        self.stack_size = Some(size);
        self
    }

    /// Like [`Future::spawn`], but with this builder's configuration.
    pub fn spawn<T, E, F>(&self, f: F) -> Future<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static
    {
        self.spawn_with(f, ())
    }

    /// Like [`Future::spawn_with`], but with this builder's configuration.
    pub fn spawn_with<T, E, F, A>(&self, f: F, args: A) -> Future<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: TaskFn<A, Output = Result<T, E>>,
        A: Send + 'static
    {
        let (future, writer) = Future::new();

        self.launch(writer, move || Some(f.call(args).into()));
        future
    }

    /// Like [`Future::spawn_callback`], but with this builder's configuration.
    pub fn spawn_callback<T, E, F>(&self, f: F) -> Future<T, E>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce(Resolve<T>, Reject<E>) + Send + 'static
    {
        let (future, writer) = Future::new();
        let resolve_writer = writer.clone();
        let reject_writer = writer.clone();

        self.launch(writer, move || {
            f(
                Box::new(move |val| {
                    resolve_writer.finish(Ok(val));
                }),
                Box::new(move |err| {
                    reject_writer.finish(Err(err));
                })
            );
            None
        });
        future
    }

    /// Like [`Future::race`], but spawning the relay threads with this builder's configuration.
    pub fn race<T, E>(&self, futures: impl IntoIterator<Item = Future<T, E>>) -> Result<Future<T, E>, RaceError>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static
    {
        Future::race_with(self, futures)
    }

    /// Thread names cannot contain NUL bytes, so any in the prefix are dropped.
    fn thread_name(&self, task: u64) -> String {
        let prefix = self.name_prefix.replace('\0', "");

        format!("{}-{}", prefix, task)
    }

    /// Starts a new thread that runs `work` and resolves `writer` with its outcome.
    ///
    /// If the thread cannot be created, `writer` is resolved with a fault describing the failure instead. This never blocks and never fails.
    pub(crate) fn launch<T, E>(&self, writer: FutureWriter<T, E>, work: impl FnOnce() -> Option<Outcome<T, E>> + Send + 'static)
    where
        T: Send + 'static,
        E: Send + 'static
    {
        let task = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        let fallback = writer.clone();

        let mut builder = thread::Builder::new().name(self.thread_name(task));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        if let Err(source) = builder.spawn(move || run_task(task, writer, work)) {
            let err = SpawnError::Os { task, source };

            tracing::error!(task, error = %err, "failed to spawn task thread");
            fallback.fault(Fault::new(err.to_string()));
        }
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        TaskBuilder::new()
    }
}
