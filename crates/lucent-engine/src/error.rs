use std::io;

use thiserror::Error;

/// Errors surfaced by the scheduler itself. Collaborator internals report
/// through `anyhow` and are wrapped in [`EngineError::Collaborator`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("rendering is already in progress")]
    AlreadyRendering,
    #[error("unknown channel index {0}")]
    UnknownChannel(usize),
    #[error("failed to spawn worker thread")]
    WorkerSpawn(#[source] io::Error),
    #[error("worker thread panicked")]
    WorkerPanicked,
    #[error("collaborator failed during {phase}")]
    Collaborator {
        phase: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidConfiguration(message.into())
    }
}
