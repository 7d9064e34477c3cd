//! Duplicate-folder scanner: directory walker, fingerprint aggregation, similarity
//! grouping, suppression, and the job manager tying phases together.

pub mod aggregator;
#[cfg(feature = "sqlite")]
pub mod cache;
pub mod events;
pub mod job;
pub mod resource;
pub mod similarity;
pub mod suppressor;
pub mod types;
pub mod walker;
