//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use folderdupe::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, ScanError};

// Scanner
pub use crate::scanner::job::ScanJobManager;
pub use crate::scanner::types::{
    FolderInfo, FolderLabel, GroupRecord, ScanMetrics, ScanProgress, ScanRequest, ScanStatus,
    WarningRecord,
};

// Logger
pub use crate::logger::dual::{ActivityLoggerHandle, DualLoggerConfig, ScanLogEvent, spawn_logger};
