//! Error types for dlx
//!
//! All modules use `DlxResult<T>` as their return type. Corrupted cache
//! metadata is never represented here: it is recovered locally by treating
//! the entry as absent.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for dlx operations
pub type DlxResult<T> = Result<T, DlxError>;

/// All errors that can occur in dlx
#[derive(Error, Debug)]
pub enum DlxError {
    // Lock errors
    #[error("Timed out after {waited_ms}ms waiting for cache lock {path}")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    // Fetch errors
    #[error("Artifact not found: {artifact} ({source_desc})")]
    NotFound {
        artifact: String,
        source_desc: String,
    },

    #[error("Network error fetching {artifact}: {reason}")]
    Network { artifact: String, reason: String },

    #[error("Timed out fetching {artifact}")]
    FetchTimeout { artifact: String },

    #[error("Request for {artifact} was rejected: HTTP {status}")]
    Rejected { artifact: String, status: u16 },

    #[error("Failed to install package {spec}: {reason}")]
    ExtractFailed { spec: String, reason: String },

    // Integrity errors
    #[error("Integrity mismatch for {artifact} at {path}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        artifact: String,
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // Filesystem errors
    #[error("Permission denied: cannot write to {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Read-only filesystem: cannot write to {path}")]
    ReadOnlyFilesystem { path: PathBuf },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    // Resolution errors
    #[error("Package {package} does not declare any binaries")]
    NoBinaries { package: String },

    #[error("Binary for {package} not found at {path}")]
    BinaryNotFound { package: String, path: PathBuf },

    #[error("Invalid specification '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl DlxError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Classify a filesystem error by its OS error code.
    ///
    /// Permission and read-only failures get their own variants so the user
    /// sees a tailored remedy instead of a raw errno.
    pub fn classify_io(path: &Path, context: impl Into<String>, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                path: path.to_path_buf(),
            };
        }

        #[cfg(unix)]
        if source.raw_os_error() == Some(libc::EROFS) {
            return Self::ReadOnlyFilesystem {
                path: path.to_path_buf(),
            };
        }

        Self::io(context, source)
    }

    /// Transient fetch failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::FetchTimeout { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::LockTimeout { .. } => Some(
                "Another dlx process is still populating this entry. Retry, or remove the .dlx.lock file if no dlx process is running",
            ),
            Self::NotFound { .. } => Some("Check the URL or package name and version"),
            Self::Rejected { .. } => Some("Check the URL and that it is publicly accessible"),
            Self::Network { .. } | Self::FetchTimeout { .. } => {
                Some("Check your network connection and retry")
            }
            Self::IntegrityMismatch { .. } => Some(
                "The download did not match the expected checksum. Verify the checksum or the source",
            ),
            Self::PermissionDenied { .. } => {
                Some("Fix the directory ownership, or set DLX_CACHE_DIR to a writable location")
            }
            Self::ReadOnlyFilesystem { .. } => {
                Some("Set DLX_CACHE_DIR to a directory on a writable filesystem")
            }
            Self::NoBinaries { .. } => Some("This package has nothing to execute"),
            Self::ConfigInvalid { .. } => Some("Run: dlx config init --force"),
            _ => None,
        }
    }
}
