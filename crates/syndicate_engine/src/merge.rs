//! Order-preserving three-way merge for ordered reference lists.

use std::collections::HashSet;

/// The four lists a merge reconciles, all as shared-id strings.
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a> {
    /// The list the remote sends now, in remote order.
    pub remote_order: &'a [String],
    /// The list the last import wrote locally.
    pub previous_imported: &'a [String],
    /// Everything the remote offered last time, including entries the
    /// import could not resolve then.
    pub previous_overwrite: &'a [String],
    /// The list currently stored locally, in local order.
    pub current_local: &'a [String],
}

/// Merges a remote ordered reference list into a locally edited one.
///
/// The local order is the base. Two passes:
///
/// 1. Keep every local entry that is loadable and either still offered by
///    the remote, locally sourced, or not written by the last import (a
///    local addition).
/// 2. Insert every remote entry that is not kept and was not offered in the
///    previous overwrite (an entry the local side removed on purpose stays
///    removed). Each insertion lands after the nearest kept predecessor in
///    remote order, or at the front if none is kept.
///
/// Returns `None` when the merged list equals the current local list, so
/// callers can skip a pointless entity save.
pub fn merge_ordered_references(
    input: &MergeInput<'_>,
    mut is_loadable: impl FnMut(&str) -> bool,
    mut is_locally_sourced: impl FnMut(&str) -> bool,
) -> Option<Vec<String>> {
    let remote: HashSet<&str> = input.remote_order.iter().map(String::as_str).collect();
    let offered_before: HashSet<&str> =
        input.previous_overwrite.iter().map(String::as_str).collect();
    let last_imported: HashSet<&str> =
        input.previous_imported.iter().map(String::as_str).collect();

    let mut merged: Vec<String> = input
        .current_local
        .iter()
        .filter(|id| {
            is_loadable(id)
                && (remote.contains(id.as_str())
                    || is_locally_sourced(id)
                    || !last_imported.contains(id.as_str()))
        })
        .cloned()
        .collect();

    for (index, id) in input.remote_order.iter().enumerate() {
        if merged.iter().any(|kept| kept == id) {
            continue;
        }
        if offered_before.contains(id.as_str()) {
            continue;
        }
        let position = input.remote_order[..index]
            .iter()
            .rev()
            .find_map(|predecessor| merged.iter().position(|kept| kept == predecessor))
            .map(|p| p + 1)
            .unwrap_or(0);
        merged.insert(position, id.clone());
    }

    if merged == input.current_local {
        None
    } else {
        Some(merged)
    }
}
