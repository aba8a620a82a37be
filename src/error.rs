use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a supervisor could not bring its server up.
///
/// Every variant is terminal for that `begin` call; nothing is retried.
#[derive(Debug, Error)]
pub enum StartError {
    /// `begin` was called on a supervisor that already ran once
    #[error("server has already been started")]
    AlreadyStarted,
    /// A launch parameter is empty or absent
    #[error("missing launch parameter: {0}")]
    MissingParameter(&'static str),
    /// The server home directory does not exist
    #[error("home directory not found: {}", .0.display())]
    HomeDirectory(PathBuf),
    /// The external properties writer refused the configuration
    #[error("failed to write server properties: {0}")]
    Properties(#[source] io::Error),
    /// fork or exec failed; exec errors arrive over the child's error pipe
    #[error("failed to start '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The shared tick source could not be brought up
    #[error("failed to enable timer service: {0}")]
    Timer(#[source] io::Error),
    /// The monitor or console thread could not be started
    #[error("failed to start monitor thread: {0}")]
    Monitor(#[source] io::Error),
}

/// Custom error type for fleetd operations
#[derive(Debug, Error)]
pub enum FleetError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
    /// The registry no longer hands out new servers
    #[error("fleet is shutting down")]
    ShuttingDown,
    /// A server failed to start
    #[error("Failed to start server: {0}")]
    Start(#[from] StartError),
}

/// Result type alias for fleetd operations
pub type Result<T> = std::result::Result<T, FleetError>;
