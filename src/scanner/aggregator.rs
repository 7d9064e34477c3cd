//! Fingerprint Aggregator: bottom-up rollup of per-folder file-weight maps
//! into recursive directory fingerprints, plus the pure diff function used
//! to compare two already-aggregated fingerprints.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use crate::scanner::events::{ScanEvent, ScanEventHandle};
use crate::scanner::types::{DiffEntry, DirectoryFingerprint, GroupDiff, MismatchEntry};

/// Replace every fingerprint's weights with its recursive rollup in place.
///
/// Processes folders in order of decreasing depth (leaves first) so that by
/// the time a folder is combined, every child already holds its own
/// recursive weights.
pub fn aggregate_fingerprints(
    fingerprints: &mut BTreeMap<String, DirectoryFingerprint>,
    events: &ScanEventHandle,
) {
    let children = build_children_index(fingerprints);

    let mut keys: Vec<String> = fingerprints.keys().cloned().collect();
    keys.sort_by_key(|key| std::cmp::Reverse(depth_of(key)));

    for key in keys {
        let child_keys = children.get(&key).cloned().unwrap_or_default();
        let mut combined: BTreeMap<String, u64> = fingerprints[&key].file_weights.clone();

        for child_key in &child_keys {
            let prefix = relative_prefix(&key, child_key);
            let child_weights = fingerprints[child_key].file_weights.clone();
            for (identity, weight) in child_weights {
                let rewritten = prefix_identity(&prefix, &identity);
                *combined.entry(rewritten).or_insert(0) += weight;
            }
        }

        let total_bytes: u64 = combined.values().sum();
        let file_count = combined.len();

        if let Some(entry) = fingerprints.get_mut(&key) {
            entry.file_weights = combined;
            entry.folder.total_bytes = total_bytes;
            entry.folder.file_count = file_count;
        }

        events.send(ScanEvent::FolderAggregated);
    }
}

fn build_children_index(
    fingerprints: &BTreeMap<String, DirectoryFingerprint>,
) -> BTreeMap<String, Vec<String>> {
    let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in fingerprints.keys() {
        if key == "." {
            continue;
        }
        let parent = posix_parent(key);
        index.entry(parent).or_default().push(key.clone());
    }
    index
}

fn posix_parent(relative_path: &str) -> String {
    match relative_path.rfind('/') {
        Some(idx) => relative_path[..idx].to_string(),
        None => ".".to_string(),
    }
}

fn depth_of(relative_path: &str) -> usize {
    if relative_path == "." {
        0
    } else {
        relative_path.split('/').count()
    }
}

/// Path of `child_key` relative to `parent_key`, or `child_key` itself when
/// `parent_key` is the root.
fn relative_prefix(parent_key: &str, child_key: &str) -> String {
    if parent_key == "." {
        child_key.to_string()
    } else {
        child_key
            .strip_prefix(parent_key)
            .and_then(|s| s.strip_prefix('/'))
            .unwrap_or(child_key)
            .to_string()
    }
}

/// Rewrite `identity`'s base path by prefixing it with `prefix`, preserving
/// the `#sha256` or `:size` equality token.
///
/// `#` identities split their base from the first `#`; `:` identities split
/// from the first `:` (not the last — this is a faithful reproduction of an
/// asymmetry between this function and [`identity_to_path`], which splits
/// `:` identities from the last colon instead).
pub fn prefix_identity(prefix: &str, identity: &str) -> String {
    if prefix.is_empty() || prefix == "." {
        return identity.to_string();
    }
    if identity.is_empty() {
        return prefix.to_string();
    }

    if let Some(idx) = identity.find('#') {
        let (base, rest) = identity.split_at(idx);
        let base = base.trim_matches('/');
        let combined = if base.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}/{base}")
        };
        return format!("{combined}{rest}");
    }

    if let Some(idx) = identity.find(':') {
        let (base, rest) = identity.split_at(idx);
        let base = base.trim_matches('/');
        let combined = if base.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}/{base}")
        };
        return format!("{combined}{rest}");
    }

    format!("{prefix}/{identity}")
}

/// Strip an identity's equality token, recovering the base path it encodes.
///
/// `#` identities split at the first `#`; `:` identities split at the
/// *last* `:` (see [`prefix_identity`] for the asymmetric counterpart used
/// during aggregation).
pub fn identity_to_path(identity: &str) -> &str {
    if let Some(idx) = identity.find('#') {
        &identity[..idx]
    } else if let Some(idx) = identity.rfind(':') {
        &identity[..idx]
    } else {
        identity
    }
}

/// Pure per-path diff between two already-aggregated fingerprints.
///
/// Identities are reduced to their base path before comparison (via
/// [`identity_to_path`]), so this finds files whose *content* differs
/// between sides even when the equality mode would otherwise encode that
/// difference as two unrelated identity strings.
#[must_use]
pub fn compute_fingerprint_diff(left: &DirectoryFingerprint, right: &DirectoryFingerprint) -> GroupDiff {
    let left_by_path = path_keyed(&left.file_weights);
    let right_by_path = path_keyed(&right.file_weights);

    let mut only_left = Vec::new();
    let mut only_right = Vec::new();
    let mut mismatched = Vec::new();

    for (path, &bytes) in &left_by_path {
        match right_by_path.get(path) {
            None => only_left.push(DiffEntry {
                path: path.clone(),
                bytes,
            }),
            Some(&right_bytes) if right_bytes != bytes => mismatched.push(MismatchEntry {
                path: path.clone(),
                left_bytes: bytes,
                right_bytes,
            }),
            Some(_) => {}
        }
    }
    for (path, &bytes) in &right_by_path {
        if !left_by_path.contains_key(path) {
            only_right.push(DiffEntry {
                path: path.clone(),
                bytes,
            });
        }
    }

    only_left.sort_by(|a, b| a.path.cmp(&b.path));
    only_right.sort_by(|a, b| a.path.cmp(&b.path));
    mismatched.sort_by(|a, b| a.path.cmp(&b.path));

    GroupDiff {
        left: left.folder.clone(),
        right: right.folder.clone(),
        only_left,
        only_right,
        mismatched,
    }
}

fn path_keyed(weights: &BTreeMap<String, u64>) -> BTreeMap<String, u64> {
    let mut by_path = BTreeMap::new();
    for (identity, &bytes) in weights {
        by_path.insert(identity_to_path(identity).to_string(), bytes);
    }
    by_path
}
