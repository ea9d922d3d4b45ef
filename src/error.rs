//! Error types for Kiln
//!
//! All modules use `KilnResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// All errors that can occur in Kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Stage errors
    #[error("Invalid or missing lockfile {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("Dependency resolution failed: {reason}")]
    Resolution { reason: String },

    #[error("Build-time dependency resolution disagrees with the lockfile: {reason}")]
    LockMismatch { reason: String },

    #[error("Compilation failed: {reason}")]
    Compile { reason: String },

    #[error("Runtime assembly failed at step '{step}': {reason}")]
    Assembly { step: String, reason: String },

    // Cache errors
    #[error("Failed to create cache volume {id}: {reason}")]
    CacheVolumeCreate { id: String, reason: String },

    #[error("Cache volume not found: {0}")]
    CacheVolumeNotFound(String),

    #[error("Cache volume is held by another build: {0}")]
    CacheVolumeBusy(String),

    #[error("Failed to lock cache volume {id}")]
    CacheLock {
        id: String,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("{0}")]
    User(String),
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create an assembly error for a named step
    pub fn assembly(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Assembly {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is safe to retry from a clean invocation
    ///
    /// Locked cache volumes tolerate retry-after-abort, so resolution
    /// failures and lock contention are retryable. Lock mismatches and
    /// compile errors are not: retrying without changing inputs cannot
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Resolution { .. } | Self::CacheVolumeBusy(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Manifest { .. } => Some("Generate a lockfile with: cargo generate-lockfile"),
            Self::LockMismatch { .. } => {
                Some("Refresh the lockfile with: cargo update, then commit it")
            }
            Self::CacheVolumeBusy(_) => {
                Some("Another build holds this cache; retry after it finishes")
            }
            _ => None,
        }
    }
}
