//! Error types and exit codes for graphex

use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

/// Main error type for graphex operations
#[derive(Error, Debug)]
pub enum GraphexError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to read watch directory {path}: {source}")]
    DirectoryScan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file {name}: {source}")]
    FileRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid file name: {name}")]
    InvalidFileName { name: String },

    #[error("Watch error: {message}")]
    Watch { message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Connection {id} is already closed")]
    ConnectionClosed { id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphexError {
    /// Convert error to a process exit code:
    /// - 1: IO / transport failure
    /// - 2: Configuration error
    /// - 3: Watch directory unusable
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config { .. } => ExitCode::from(2),
            Self::DirectoryScan { .. } | Self::Watch { .. } => ExitCode::from(3),
            Self::FileRead { .. } | Self::InvalidFileName { .. } => ExitCode::from(1),
            Self::Transport(_) | Self::Io(_) | Self::ShuttingDown => ExitCode::from(1),
            Self::ConnectionClosed { .. } => ExitCode::from(1),
        }
    }
}

impl From<notify::Error> for GraphexError {
    fn from(err: notify::Error) -> Self {
        Self::Watch {
            message: err.to_string(),
        }
    }
}

/// Result type alias for graphex operations
pub type Result<T> = std::result::Result<T, GraphexError>;
