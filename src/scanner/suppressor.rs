//! Descendant Suppressor: drops groups whose every member is already a
//! filesystem descendant of some previously-kept group's members.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::Path;

use crate::scanner::types::GroupRecord;

/// Filter `records`, keeping a group only if it is not fully subsumed by an
/// already-kept group.
///
/// Processing order is by minimum member depth alone (shallowest first);
/// the returned list is re-sorted by `(min_depth, canonical_path)` so
/// callers see a stable, path-ordered result distinct from the order
/// suppression decisions were made in.
#[must_use]
pub fn suppress_descendant_groups(records: Vec<GroupRecord>) -> Vec<GroupRecord> {
    let mut ordered = records;
    ordered.sort_by_key(min_member_depth);

    let mut kept: Vec<GroupRecord> = Vec::new();
    let mut ancestor_sets: Vec<HashSet<String>> = Vec::new();

    for candidate in ordered {
        let member_paths: Vec<&str> = candidate.members.iter().map(|m| m.path.as_str()).collect();
        let suppressed = ancestor_sets
            .iter()
            .any(|ancestors| all_members_descend(&member_paths, ancestors));

        if suppressed {
            continue;
        }

        ancestor_sets.push(member_paths.iter().map(|p| (*p).to_string()).collect());
        kept.push(candidate);
    }

    kept.sort_by(|a, b| {
        (min_member_depth(a), a.canonical_path.as_str())
            .cmp(&(min_member_depth(b), b.canonical_path.as_str()))
    });
    kept
}

fn all_members_descend(members: &[&str], ancestors: &HashSet<String>) -> bool {
    members
        .iter()
        .all(|member| ancestors.iter().any(|ancestor| is_descendant_path(member, ancestor)))
}

fn is_descendant_path(child: &str, parent: &str) -> bool {
    Path::new(child).strip_prefix(Path::new(parent)).is_ok()
}

fn min_member_depth(record: &GroupRecord) -> usize {
    record
        .members
        .iter()
        .map(|member| relative_depth(&member.relative_path))
        .min()
        .unwrap_or(0)
}

fn relative_depth(relative_path: &str) -> usize {
    if relative_path == "." {
        0
    } else {
        relative_path.split('/').count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::types::{FolderInfo, FolderLabel};

    fn folder(path: &str, relative_path: &str) -> FolderInfo {
        FolderInfo {
            path: path.to_string(),
            relative_path: relative_path.to_string(),
            total_bytes: 10,
            file_count: 1,
            unstable: false,
        }
    }

    fn record(id: &str, canonical: &str, members: Vec<FolderInfo>) -> GroupRecord {
        GroupRecord {
            group_id: id.to_string(),
            label: FolderLabel::Identical,
            canonical_path: canonical.to_string(),
            members,
            pairwise_similarity: Vec::new(),
            divergences: Vec::new(),
            suppressed_descendants: false,
        }
    }

    #[test]
    fn parent_group_suppresses_descendant_group() {
        let parent = record(
            "g_parent",
            "/root/X",
            vec![
                folder("/root/X", "X"),
                folder("/root/Y", "Y"),
            ],
        );
        let child = record(
            "g_child",
            "/root/X/media",
            vec![
                folder("/root/X/media", "X/media"),
                folder("/root/Y/media", "Y/media"),
            ],
        );

        let kept = suppress_descendant_groups(vec![child, parent]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].canonical_path, "/root/X");
    }

    #[test]
    fn unrelated_groups_both_survive() {
        let a = record("g_a", "/root/A", vec![folder("/root/A", "A"), folder("/root/B", "B")]);
        let c = record("g_c", "/root/C", vec![folder("/root/C", "C"), folder("/root/D", "D")]);

        let kept = suppress_descendant_groups(vec![a, c]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn output_is_sorted_by_depth_then_canonical_path() {
        let deep = record(
            "g_deep",
            "/root/Z/nested",
            vec![folder("/root/Z/nested", "Z/nested"), folder("/root/W/nested", "W/nested")],
        );
        let shallow = record("g_shallow", "/root/A", vec![folder("/root/A", "A"), folder("/root/Q", "Q")]);

        let kept = suppress_descendant_groups(vec![deep, shallow]);
        assert_eq!(kept[0].canonical_path, "/root/A");
        assert_eq!(kept[1].canonical_path, "/root/Z/nested");
    }
}
