use thiserror::Error;

/// Failures the driver surfaces to the orchestrator.
///
/// Only misconfiguration and spawn failures are returned as errors; anything
/// that happens once the model is running is logged and folded into the
/// driver's lifecycle state.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to spawn model process `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: ProcessError,
    },

    #[error("Model driver {0} has already been started")]
    AlreadyStarted(String),

    #[error("Model driver {0} has been terminated and cannot be restarted")]
    Terminated(String),

    #[error("Model process was spawned without a stdout pipe")]
    MissingStdout,
}

impl DriverError {
    /// Check if this error was raised before any process was spawned
    pub fn is_configuration(&self) -> bool {
        matches!(self, DriverError::Configuration(_))
    }
}

/// Error types for platform process operations
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("Process not found: {0}")]
    ProcessNotFound(u32),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}
