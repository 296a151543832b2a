//! Indexing of Redmine time entries by the Harvest entry they were copied from, and clean-up
//! of entries that were copied more than once.

use std::collections::BTreeMap;

use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use sumac_api::{HasCustomFields, TimeEntry};

use crate::text::redact_log_details;
use crate::tracker::TargetTracker;

static COMMENT_MARKER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[Harvest ID:\s*([0-9]+)\]").expect("invalid comment marker regex")
});

/// Source id → target entry ids, each list sorted ascending.
pub type DuplicateGroups = BTreeMap<u64, Vec<u64>>;

/// Text appended to a target comment so the source entry can be recognised again.
pub fn comment_marker(source_id: u64) -> String {
    format!("[Harvest ID: {}]", source_id)
}

/// Source entry id embedded in a target entry: the custom field when set, otherwise the
/// comment marker.
pub fn source_id_of(entry: &TimeEntry, field_id: u64) -> Option<u64> {
    if let Some(value) = entry.custom_field_by_id(field_id).and_then(|field| field.text()) {
        return value.parse().ok();
    }
    entry
        .comments
        .as_deref()
        .and_then(|comments| COMMENT_MARKER_REGEX.captures(comments))
        .and_then(|capture| capture[1].parse().ok())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateIndex {
    groups: DuplicateGroups,
}

impl DuplicateIndex {
    /// Groups target entry ids by embedded source id. Entries without one are skipped.
    pub fn index(records: &[TimeEntry], field_id: u64) -> Self {
        let mut groups = DuplicateGroups::new();
        for record in records {
            if let Some(source_id) = source_id_of(record, field_id) {
                groups.entry(source_id).or_default().push(record.id);
            }
        }
        for ids in groups.values_mut() {
            ids.sort_unstable();
            ids.dedup();
        }
        Self { groups }
    }

    /// Target entries claiming `source_id`, ascending.
    pub fn ids(&self, source_id: u64) -> &[u64] {
        self.groups
            .get(&source_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, source_id: u64) -> bool {
        self.groups.contains_key(&source_id)
    }

    pub fn source_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.groups.keys().copied()
    }

    /// `(source id, target id)` for every indexed entry.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.groups
            .iter()
            .flat_map(|(source_id, ids)| ids.iter().map(move |id| (*source_id, *id)))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &DuplicateGroups {
        &self.groups
    }
}

/// Groups with more than one member. The last (highest) id in each list is the newest entry.
pub fn find_duplicate_groups(index: &DuplicateIndex) -> DuplicateGroups {
    index
        .groups
        .iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(source_id, ids)| (*source_id, ids.clone()))
        .collect()
}

/// Every member of every group except the numerically greatest, ascending.
pub fn plan_removal(groups: &DuplicateGroups) -> Vec<u64> {
    let mut doomed: Vec<u64> = groups
        .values()
        .flat_map(|ids| {
            let newest = ids.iter().copied().max();
            ids.iter().copied().filter(move |id| Some(*id) != newest)
        })
        .collect();
    doomed.sort_unstable();
    doomed.dedup();
    doomed
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemovalOutcome {
    pub removed: Vec<u64>,
    /// Already gone when we got to them.
    pub missing: Vec<u64>,
    pub failed: Vec<(u64, String)>,
}

impl RemovalOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Deletes `ids` one by one; a failure is recorded and the rest still run.
pub async fn remove_duplicates(target: &dyn TargetTracker, ids: &[u64]) -> RemovalOutcome {
    let mut outcome = RemovalOutcome::default();
    for &id in ids {
        match target.delete_time_entry(id).await {
            Ok(true) => {
                info!("Removed duplicate time entry {}", id);
                outcome.removed.push(id);
            }
            Ok(false) => {
                warn!("Time entry {} was already removed", id);
                outcome.missing.push(id);
            }
            Err(err) => {
                let details = redact_log_details(&err.to_string());
                warn!("Failed to remove time entry {}: {}", id, details);
                outcome.failed.push((id, details));
            }
        }
    }
    outcome
}
