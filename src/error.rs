//! Errors reported by the future machinery itself, as opposed to the errors produced by the work that futures wrap.

use std::io;

use thiserror::Error;

/// Error returned by [`Future::race`](crate::sync::Future::race).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RaceError {
    /// No futures were provided. A race between zero futures could never resolve.
    #[error("cannot race an empty set of futures")]
    Empty
}

/// Error raised when a task thread cannot be started.
///
/// Spawning never fails from the caller's point of view: this error is instead stored as the [`Fault`](crate::sync::Fault) of the future
/// that the task would have resolved.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to spawn thread for task {task}: {source}")]
    Os {
        task: u64,
        #[source]
        source: io::Error
    }
}

/// A configuration value that could not be parsed for the option it was given to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value '{value}' given for option '{key}'")]
pub struct InvalidOptionValue {
    pub key: String,
    pub value: String
}
