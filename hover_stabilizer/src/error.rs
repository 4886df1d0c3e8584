//! Stabilizer startup and lifecycle errors.

use hover_common::registry::RegistryError;
use thiserror::Error;

use crate::schedule::LoopError;

/// Unrecoverable stabilizer failures.
#[derive(Debug, Error)]
pub enum StabilizerError {
    /// Variable registration failed during init.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The control thread could not be created.
    #[error("failed to spawn control thread: {0}")]
    TaskSpawn(#[source] std::io::Error),

    /// The scheduling loop stopped with a fatal error.
    #[error("scheduling loop failed: {0}")]
    Loop(#[from] LoopError),

    /// The control thread panicked.
    #[error("control thread panicked")]
    TaskPanicked,

    /// An earlier `init()` failed after consuming the collaborators.
    #[error("stabilizer init failed earlier; construct a new stabilizer")]
    InitFailed,

    /// `join()` called before `init()` or twice.
    #[error("control thread not running")]
    NotRunning,
}
