//! Similarity Engine: size-bucketed pairwise weighted-Jaccard, connected-
//! component merging, label classification, and divergence extraction.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use crate::core::config::SimilarityConfig;
use crate::scanner::events::{ScanEvent, ScanEventHandle};
use crate::scanner::types::{
    DirectoryFingerprint, DivergenceRecord, FolderInfo, FolderLabel, GroupRecord,
    PairwiseSimilarity, SimilarityGroup,
};

const IDENTICAL_EPSILON: f64 = 1e-9;

/// Weighted Jaccard similarity between two identity->bytes weight maps.
///
/// Iterates the smaller map first, looking up into the larger, so the cost
/// is bounded by the smaller map's size rather than the union's.
#[must_use]
pub fn weighted_jaccard(a: &BTreeMap<String, u64>, b: &BTreeMap<String, u64>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }

    let (smaller, larger) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    let mut intersection: u128 = 0;
    let mut union: u128 = 0;
    let mut visited: HashSet<&str> = HashSet::with_capacity(smaller.len());

    for (key, &value) in smaller {
        visited.insert(key.as_str());
        match larger.get(key) {
            Some(&other) => {
                intersection += u128::from(value.min(other));
                union += u128::from(value.max(other));
            }
            None => {
                union += u128::from(value);
            }
        }
    }
    for (key, &value) in larger {
        if !visited.contains(key.as_str()) {
            union += u128::from(value);
        }
    }

    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Folders whose relative paths are a strict `/`-boundary prefix of each
/// other (or either is `.`) are considered an ancestor/descendant pair and
/// are never scored against one another.
#[must_use]
pub fn is_ancestor_descendant_pair(path_a: &str, path_b: &str) -> bool {
    if path_a == path_b {
        return false;
    }
    if path_a == "." || path_b == "." {
        return true;
    }
    let a = path_a.trim_end_matches('/');
    let b = path_b.trim_end_matches('/');
    b.starts_with(&format!("{a}/")) || a.starts_with(&format!("{b}/"))
}

fn size_bucket(total_bytes: u64, size_bucket_bytes: u64) -> i64 {
    if size_bucket_bytes == 0 {
        return 0;
    }
    ((total_bytes as f64 / size_bucket_bytes as f64).round()) as i64
}

/// Total number of pairwise comparisons [`compute_similarity_groups`] will
/// perform: the sum of `n * (n - 1) / 2` over each size bucket, mirroring
/// the same bucketing so progress reporting can divide processed-pairs by
/// this up front without re-walking the fingerprint map mid-scan.
#[must_use]
pub fn total_candidate_pairs(
    fingerprints: &BTreeMap<String, DirectoryFingerprint>,
    config: &SimilarityConfig,
) -> u64 {
    let mut bucket_sizes: HashMap<i64, u64> = HashMap::new();
    for fingerprint in fingerprints.values() {
        let bucket = size_bucket(fingerprint.folder.total_bytes, config.size_bucket_bytes);
        *bucket_sizes.entry(bucket).or_insert(0) += 1;
    }
    bucket_sizes
        .values()
        .map(|&n| n.saturating_mul(n.saturating_sub(1)) / 2)
        .sum()
}

/// Build candidate `SimilarityGroup`s from aggregated fingerprints.
///
/// Bucketing, pairwise scoring, ancestor pruning, candidate generation and
/// connected-component merging all happen here; classification and id
/// assignment are a separate pass in [`classify_and_finalize`].
pub fn compute_similarity_groups(
    fingerprints: &BTreeMap<String, DirectoryFingerprint>,
    config: &SimilarityConfig,
    events: &ScanEventHandle,
) -> Vec<SimilarityGroup> {
    let mut buckets: HashMap<i64, Vec<&String>> = HashMap::new();
    for (key, fingerprint) in fingerprints {
        let bucket = size_bucket(fingerprint.folder.total_bytes, config.size_bucket_bytes);
        buckets.entry(bucket).or_default().push(key);
    }

    // Edge with the maximum observed similarity, keyed by the sorted pair of
    // relative paths.
    let mut edges: HashMap<(String, String), f64> = HashMap::new();
    let mut adjacency: HashMap<String, HashSet<String>> = HashMap::new();

    for bucket_items in buckets.values() {
        for i in 0..bucket_items.len() {
            for j in (i + 1)..bucket_items.len() {
                let key_a = bucket_items[i];
                let key_b = bucket_items[j];
                events.send(ScanEvent::PairEvaluated);

                if is_ancestor_descendant_pair(key_a, key_b) {
                    continue;
                }

                let similarity = weighted_jaccard(
                    &fingerprints[key_a].file_weights,
                    &fingerprints[key_b].file_weights,
                );
                if similarity < config.threshold {
                    continue;
                }

                let (lo, hi) = if key_a <= key_b {
                    (key_a.clone(), key_b.clone())
                } else {
                    (key_b.clone(), key_a.clone())
                };
                let entry = edges.entry((lo.clone(), hi.clone())).or_insert(0.0);
                if similarity > *entry {
                    *entry = similarity;
                }
                adjacency.entry(lo.clone()).or_default().insert(hi.clone());
                adjacency.entry(hi).or_default().insert(lo);
            }
        }
    }

    merge_components(fingerprints, &adjacency, &edges)
}

fn merge_components(
    fingerprints: &BTreeMap<String, DirectoryFingerprint>,
    adjacency: &HashMap<String, HashSet<String>>,
    edges: &HashMap<(String, String), f64>,
) -> Vec<SimilarityGroup> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut groups = Vec::new();

    let mut node_order: Vec<&String> = adjacency.keys().collect();
    node_order.sort();

    for start in node_order {
        if visited.contains(start) {
            continue;
        }
        let mut component: Vec<String> = Vec::new();
        let mut stack = vec![start.clone()];
        visited.insert(start.clone());

        while let Some(node) = stack.pop() {
            component.push(node.clone());
            if let Some(neighbors) = adjacency.get(&node) {
                let mut ordered: Vec<&String> = neighbors.iter().collect();
                ordered.sort();
                for neighbor in ordered {
                    if visited.insert(neighbor.clone()) {
                        stack.push(neighbor.clone());
                    }
                }
            }
        }

        component.sort();
        let members: Vec<FolderInfo> = component
            .iter()
            .map(|key| fingerprints[key].folder.clone())
            .collect();

        let mut pairs = Vec::new();
        for a in 0..component.len() {
            for b in (a + 1)..component.len() {
                let (lo, hi) = if component[a] <= component[b] {
                    (component[a].clone(), component[b].clone())
                } else {
                    (component[b].clone(), component[a].clone())
                };
                if let Some(&similarity) = edges.get(&(lo, hi)) {
                    if similarity > 0.0 {
                        pairs.push(PairwiseSimilarity {
                            a,
                            b,
                            similarity,
                        });
                    }
                }
            }
        }

        groups.push(SimilarityGroup {
            members,
            similarity_pairs: pairs,
        });
    }

    groups
}

/// Classify a merged group and build its caller-facing `GroupRecord`.
#[must_use]
pub fn classify_and_finalize(
    group: &SimilarityGroup,
    fingerprints: &BTreeMap<String, DirectoryFingerprint>,
    config: &SimilarityConfig,
) -> GroupRecord {
    let max_similarity = group.max_similarity();

    let mut members = group.members.clone();
    members.sort_by(|a, b| {
        (a.path.len(), a.path.as_str()).cmp(&(b.path.len(), b.path.as_str()))
    });
    let canonical = members[0].clone();

    let first = &members[0];
    let identical_sizes = members
        .iter()
        .all(|m| m.total_bytes == first.total_bytes && m.file_count == first.file_count);

    let label = if max_similarity >= 1.0 - IDENTICAL_EPSILON && identical_sizes {
        FolderLabel::Identical
    } else if max_similarity >= config.threshold {
        FolderLabel::NearDuplicate
    } else {
        FolderLabel::PartialOverlap
    };

    let group_uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, canonical.path.as_bytes());
    let group_id = format!("g_{}", &group_uuid.simple().to_string()[..8]);

    let divergences = if label == FolderLabel::Identical || members.len() < 2 {
        Vec::new()
    } else {
        let left = &fingerprints[&members[0].relative_path].file_weights;
        let right = &fingerprints[&members[1].relative_path].file_weights;
        compute_divergences(left, right, config.max_divergences)
    };

    GroupRecord {
        group_id,
        label,
        canonical_path: canonical.path,
        members,
        pairwise_similarity: group.similarity_pairs.clone(),
        divergences,
        suppressed_descendants: false,
    }
}

/// Top-`top_k` identities by symmetric absolute byte delta between two
/// weight maps, reported with their equality token stripped.
///
/// Splits `:` identities at the *first* colon (see
/// [`crate::scanner::aggregator::identity_to_path`] for the rsplit
/// counterpart used elsewhere).
#[must_use]
pub fn compute_divergences(
    a: &BTreeMap<String, u64>,
    b: &BTreeMap<String, u64>,
    top_k: usize,
) -> Vec<DivergenceRecord> {
    let mut keys: HashSet<&String> = HashSet::new();
    keys.extend(a.keys());
    keys.extend(b.keys());

    let mut deltas: Vec<(String, u64)> = keys
        .into_iter()
        .filter_map(|key| {
            let left = a.get(key).copied().unwrap_or(0);
            let right = b.get(key).copied().unwrap_or(0);
            let delta = left.abs_diff(right);
            (delta > 0).then(|| (key.clone(), delta))
        })
        .collect();

    deltas.sort_by(|x, y| y.1.cmp(&x.1).then_with(|| x.0.cmp(&y.0)));
    deltas.truncate(top_k);

    deltas
        .into_iter()
        .map(|(identity, delta_bytes)| DivergenceRecord {
            path_a: divergence_path(&identity).to_string(),
            path_b: divergence_path(&identity).to_string(),
            delta_bytes,
        })
        .collect()
}

fn divergence_path(identity: &str) -> &str {
    if let Some(idx) = identity.find('#') {
        &identity[..idx]
    } else if let Some(idx) = identity.find(':') {
        &identity[..idx]
    } else {
        identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn identical_maps_have_similarity_one() {
        let a = weights(&[("x:1", 1), ("y:2", 2)]);
        let b = a.clone();
        assert_eq!(weighted_jaccard(&a, &b), 1.0);
    }

    #[test]
    fn disjoint_maps_have_similarity_zero() {
        let a = weights(&[("x:1", 1)]);
        let b = weights(&[("y:2", 2)]);
        assert_eq!(weighted_jaccard(&a, &b), 0.0);
    }

    #[test]
    fn empty_maps_have_similarity_zero() {
        let a: BTreeMap<String, u64> = BTreeMap::new();
        let b: BTreeMap<String, u64> = BTreeMap::new();
        assert_eq!(weighted_jaccard(&a, &b), 0.0);
    }

    #[test]
    fn adding_unique_file_decreases_similarity() {
        let a = weights(&[("x:1", 1), ("y:2", 2)]);
        let b = a.clone();
        let baseline = weighted_jaccard(&a, &b);

        let mut c = b.clone();
        c.insert("z:3".to_string(), 3);
        let reduced = weighted_jaccard(&a, &c);

        assert!(reduced < baseline);
    }

    #[test]
    fn ancestor_descendant_pairs_detected() {
        assert!(is_ancestor_descendant_pair(".", "a"));
        assert!(is_ancestor_descendant_pair("a", "a/b"));
        assert!(is_ancestor_descendant_pair("a/b", "a"));
        assert!(!is_ancestor_descendant_pair("a", "b"));
        assert!(!is_ancestor_descendant_pair("a", "a"));
        assert!(!is_ancestor_descendant_pair("ab", "a"));
    }

    #[test]
    fn compute_divergences_keeps_top_k_by_delta() {
        let a = weights(&[("x:10", 10), ("y:1", 1), ("z:5", 5)]);
        let b = weights(&[("x:10", 10), ("y:1", 1), ("z:50", 50)]);
        let divergences = compute_divergences(&a, &b, 1);
        assert_eq!(divergences.len(), 1);
        assert_eq!(divergences[0].path_a, "z");
        assert_eq!(divergences[0].delta_bytes, 45);
    }

    #[test]
    fn total_candidate_pairs_matches_per_bucket_combinations() {
        use crate::scanner::types::FolderInfo;

        let make_fp = |path: &str, total_bytes: u64| DirectoryFingerprint {
            folder: FolderInfo {
                path: path.to_string(),
                relative_path: path.to_string(),
                total_bytes,
                file_count: 1,
                unstable: false,
            },
            file_weights: BTreeMap::new(),
        };

        let mut fingerprints = BTreeMap::new();
        fingerprints.insert("a".to_string(), make_fp("a", 100));
        fingerprints.insert("b".to_string(), make_fp("b", 100));
        fingerprints.insert("c".to_string(), make_fp("c", 100));
        fingerprints.insert("d".to_string(), make_fp("d", 9_999_999));

        let config = SimilarityConfig {
            size_bucket_bytes: 10,
            ..SimilarityConfig::default()
        };
        // Three folders share a bucket (3 choose 2 = 3 pairs); the fourth is alone.
        assert_eq!(total_candidate_pairs(&fingerprints, &config), 3);
    }

    #[test]
    fn group_id_is_deterministic_for_fixed_canonical_path() {
        let first = Uuid::new_v5(&Uuid::NAMESPACE_URL, b"/root/X");
        let second = Uuid::new_v5(&Uuid::NAMESPACE_URL, b"/root/X");
        assert_eq!(first, second);
    }
}
