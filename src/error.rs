//! Error types shared across the launcher.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn an app list document into a catalog.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read app list {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("app list is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),

    #[error("app list does not match the current schema: {0}")]
    Schema(#[source] serde_json::Error),

    #[error("app #{index} has an invalid uuid {value:?}")]
    InvalidUuid { index: usize, value: String },

    #[error("uuid {0} is used by more than one app")]
    DuplicateUuid(uuid::Uuid),
}

/// Failure to spawn a command.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {command:?}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command:?} exited with {status}")]
    Failed { command: String, status: String },
}

impl SpawnError {
    /// True when the OS refused the spawn for lack of privileges.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            SpawnError::Io { source, .. } => {
                source.kind() == std::io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

/// Reasons a launch is aborted.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("encoder probe failed")]
    EncoderProbeFailed,

    #[error("prep command {command:?} failed: {source}")]
    PrepCommand {
        command: String,
        #[source]
        source: SpawnError,
    },

    #[error("failed to start {command:?}: {source}")]
    Primary {
        command: String,
        #[source]
        source: SpawnError,
    },

    #[error("launcher plugin is not available for game {0:?}")]
    PluginUnavailable(String),
}

/// Status code reported to callers for a successful launch.
pub const STATUS_OK: i32 = 0;
/// Status code reported when no encoder answered the probe.
pub const STATUS_ENCODER_PROBE_FAILED: i32 = 503;
/// Status code reported for every other launch failure.
pub const STATUS_LAUNCH_FAILED: i32 = -1;

impl LaunchError {
    /// Numeric status handed back to the HTTP/RTSP layer.
    pub fn status_code(&self) -> i32 {
        match self {
            LaunchError::EncoderProbeFailed => STATUS_ENCODER_PROBE_FAILED,
            _ => STATUS_LAUNCH_FAILED,
        }
    }
}
