//! Running work on OS threads.
//!
//! This module contains the machinery that starts the threads behind spawned futures and the wait lists that threads blocked on a future
//! are parked on until it resolves.

pub mod task;
pub mod wait;

pub use task::{Reject, Resolve, TaskBuilder, TaskFn};
