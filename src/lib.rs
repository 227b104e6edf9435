//! Futures whose values are produced by work running on dedicated OS threads.
//!
//! [`Future::spawn`] and its variants start a function on a new thread and immediately hand back a [`Future`] for its result. Any thread
//! holding a clone of that future can then block until the result is available with [`Future::wait`]. A panic in the work is captured
//! as a [`Fault`] and re-raised in every thread that waits on it, while an error returned by the work is simply handed back.
//!
//! ```
//! use thread_future::Future;
//!
//! let slow = Future::spawn(|| {
//!     std::thread::sleep(std::time::Duration::from_secs(5));
//!     Ok::<_, &str>("slow")
//! });
//! let fast = Future::spawn(|| Ok("fast"));
//!
//! assert_eq!(Ok("fast"), Future::race([slow, fast]).unwrap().wait());
//! ```

pub mod error;
pub mod options;
pub mod sched;
pub mod sync;

pub use error::{InvalidOptionValue, RaceError, SpawnError};
pub use options::TaskOptions;
pub use sched::{Reject, Resolve, TaskBuilder, TaskFn};
pub use sync::{Fault, Future, FutureWriter, Outcome};
