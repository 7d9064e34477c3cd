//! FD-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Top-level error type for the duplicate-folder finder.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("[FD-1001] root path is not a directory: {path}")]
    InvalidRoot { path: PathBuf },

    #[error("[FD-1002] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[FD-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[FD-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[FD-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[FD-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[FD-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FD-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[FD-4001] scan job not found: {scan_id}")]
    JobNotFound { scan_id: String },

    #[error("[FD-4002] scan {scan_id} is not complete")]
    ScanNotComplete { scan_id: String },

    #[error("[FD-4003] group not found: {group_id}")]
    GroupNotFound { group_id: String },

    #[error("[FD-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl ScanError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRoot { .. } => "FD-1001",
            Self::InvalidConfig { .. } => "FD-1002",
            Self::ConfigParse { .. } => "FD-1003",
            Self::Serialization { .. } => "FD-2101",
            Self::Sql { .. } => "FD-2102",
            Self::PermissionDenied { .. } => "FD-3001",
            Self::Io { .. } => "FD-3002",
            Self::ChannelClosed { .. } => "FD-3003",
            Self::JobNotFound { .. } => "FD-4001",
            Self::ScanNotComplete { .. } => "FD-4002",
            Self::GroupNotFound { .. } => "FD-4003",
            Self::Runtime { .. } => "FD-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::ChannelClosed { .. } | Self::Sql { .. } | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for ScanError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
