#![forbid(unsafe_code)]

//! `folderdupe` — finds duplicate and near-duplicate directory subtrees by
//! content fingerprint and weighted-Jaccard similarity.
//!
//! A scan walks a root directory, fingerprints every folder by the set of
//! file identities it (recursively) contains, buckets folders by size to
//! bound the pairwise comparison, scores candidate pairs by weighted
//! Jaccard similarity, merges matches into connected components, and
//! suppresses groups whose members are ancestors/descendants of a group
//! already reported.
//!
//! [`scanner::job::ScanJobManager`] is the entry point: it owns a bounded
//! worker pool, runs scans to completion, and exposes progress/result
//! views. [`logger::dual`] mirrors every scan-lifecycle event to both a
//! SQLite table and an append-only JSONL file with graceful degradation.

#[cfg(feature = "cli")]
pub mod cli;
pub mod core;
pub mod logger;
pub mod prelude;
pub mod scanner;
