//! Error type shared by every fallible engine operation.

use thiserror::Error;

/// Errors raised by environment construction, lookups, and lifecycle misuse.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Indicates an invalid construction or run parameter.
    #[error("invalid settings: {0}")]
    InvalidSettings(&'static str),
    /// Coordinates outside the grid.
    #[error("cell ({x}, {y}) is outside the {width}x{height} grid")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// `run` was called on an environment that is running or has already run.
    #[error("environment is already running or has already run")]
    AlreadyRunning,
    /// `stop` was called more than once.
    #[error("stop has already been requested")]
    AlreadyStopped,
    /// The OS refused to start a worker or ticker thread.
    #[error("failed to spawn thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
    /// A worker thread panicked while processing a request; carries its id.
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}
