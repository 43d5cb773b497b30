//! Snapshot comparison.
//!
//! Compares the previously fetched collection with a fresh one and yields the
//! records that are new or carry a strictly newer modification timestamp.

use crate::record::SyncRecord;
use std::collections::HashMap;

/// A record that differs from the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change<'a, T> {
    pub record: &'a T,
    /// True if the record was absent from the previous snapshot.
    pub is_new: bool,
}

/// Records of `new` that are absent from `old` or strictly newer than their
/// counterpart there. Results keep the order of `new`.
pub fn detect_changes<'a, T: SyncRecord>(old: &[T], new: &'a [T]) -> Vec<Change<'a, T>> {
    let mut previous: HashMap<&str, u64> = HashMap::with_capacity(old.len());
    for record in old {
        // First occurrence wins, matching a front-to-back lookup.
        previous.entry(record.id()).or_insert(record.modified_at());
    }

    new.iter()
        .filter_map(|record| match previous.get(record.id()) {
            None => Some(Change { record, is_new: true }),
            Some(&modified_at) if record.modified_at() > modified_at => {
                Some(Change { record, is_new: false })
            }
            Some(_) => None,
        })
        .collect()
}
