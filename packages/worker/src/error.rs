//! Error types for the simulation worker.
//!
//! Each seam gets its own enum so callers can tell a missing asset from a
//! broken sandbox filesystem from an engine that refused to run.

use thiserror::Error;

/// Errors from an [`AssetSource`](crate::assets::AssetSource).
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("Failed to fetch {path}: {status} {reason}")]
    Status {
        path: String,
        status: u16,
        reason: String,
    },

    /// The request never produced a response.
    #[error("Failed to fetch {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// A local asset could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The asset base or an asset path is not a valid URL.
    #[error("invalid asset url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl FetchError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        FetchError::Status {
            path: path.into(),
            status: 404,
            reason: "Not Found".to_string(),
        }
    }
}

/// Errors from a [`VirtualFs`](crate::fs::VirtualFs) backend.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// The path climbs above the filesystem root.
    #[error("path escapes the filesystem root: {0}")]
    Escape(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while loading the engine module.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The binary image could not be retrieved.
    #[error("engine image unavailable: {0}")]
    Image(#[from] FetchError),

    /// The runtime rejected the image.
    #[error("engine module rejected: {0}")]
    Module(String),

    /// The runtime failed before reporting initialization.
    #[error("runtime initialization failed: {0}")]
    Runtime(String),
}

/// Errors raised while invoking the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Neither entry point binding exists in this build.
    #[error("ngspice entrypoint callMain is not available in this build.")]
    EntrypointUnavailable,

    #[error("engine exited with status {0}")]
    Exit(i32),

    #[error("engine trapped: {0}")]
    Trap(String),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Errors raised while staging support files into the sandbox.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed to stage {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: FsError,
    },
}

/// Top-level worker errors: the ones no protocol message can report.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to load engine module: {0}")]
    Load(#[from] LoadError),
}

/// Result type alias for worker operations.
pub type Result<T, E = WorkerError> = std::result::Result<T, E>;
