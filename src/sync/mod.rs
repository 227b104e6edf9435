//! Single-assignment values shared between threads.
//!
//! A [`Future`] is resolved exactly once through one of its [`FutureWriter`]s, after which every handle to it observes the same
//! [`Outcome`]. Any number of threads can block on a future at once.

pub mod fault;
pub mod future;

pub use fault::Fault;
pub use future::{Future, FutureWriter, Outcome};
