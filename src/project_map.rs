//! Source project id → target projects, read from a custom field on every Redmine project.

use std::collections::BTreeMap;

use log::{debug, warn};
use sumac_api::{HasCustomFields, Project};

use crate::error::{MapKind, Result, SyncError};

/// Values admins put in the custom field to mean "not linked".
const UNSET_PLACEHOLDERS: &[&str] = &["", "0", "-", "none", "n/a", "null"];

/// How a source project constrains the target issue an entry may land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectConstraint<'a> {
    /// The source project is not in the map at all.
    Unknown,
    /// The source project is mapped; the issue must belong to one of these target projects.
    /// An empty set means nothing matches.
    Targets(&'a BTreeMap<u64, String>),
}

impl ProjectConstraint<'_> {
    pub fn allows(&self, target_project_id: u64) -> bool {
        match self {
            ProjectConstraint::Unknown => true,
            ProjectConstraint::Targets(targets) => targets.contains_key(&target_project_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectMap {
    entries: BTreeMap<u64, BTreeMap<u64, String>>,
}

impl ProjectMap {
    /// Builds the map from every target project's `field_name` custom field.
    ///
    /// Fails with [`SyncError::EmptyMap`] when no project carries a usable source id.
    pub fn build(projects: &[Project], field_name: &str) -> Result<Self> {
        let mut map = ProjectMap::default();
        for project in projects {
            let Some(raw) = project.custom_field_named(field_name).and_then(|field| field.text())
            else {
                continue;
            };
            for value in raw.split(',').map(str::trim) {
                if is_unset(value) {
                    continue;
                }
                match value.parse::<u64>() {
                    Ok(source_id) => map.insert(source_id, project.id, &project.name),
                    Err(_) => warn!(
                        "Ignoring non-numeric source project id `{}` on Redmine project {}",
                        value, project.id
                    ),
                }
            }
        }

        if map.is_empty() {
            return Err(SyncError::EmptyMap(MapKind::Project));
        }
        debug!("Project map holds {} source projects", map.len());
        Ok(map)
    }

    pub fn insert(&mut self, source_id: u64, target_id: u64, target_name: &str) {
        self.entries
            .entry(source_id)
            .or_default()
            .insert(target_id, target_name.to_string());
    }

    /// Declares a source project with no target projects, so every issue is a mismatch.
    pub fn insert_empty(&mut self, source_id: u64) {
        self.entries.entry(source_id).or_default();
    }

    /// Target projects for `source_id`; empty when unknown. Use [`ProjectMap::constraint`] when
    /// "unknown" and "known but empty" have to be told apart.
    pub fn lookup(&self, source_id: u64) -> Vec<(u64, &str)> {
        self.entries
            .get(&source_id)
            .map(|targets| {
                targets
                    .iter()
                    .map(|(id, name)| (*id, name.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn constraint(&self, source_id: u64) -> ProjectConstraint<'_> {
        match self.entries.get(&source_id) {
            Some(targets) => ProjectConstraint::Targets(targets),
            None => ProjectConstraint::Unknown,
        }
    }

    pub fn contains(&self, source_id: u64) -> bool {
        self.entries.contains_key(&source_id)
    }

    pub fn source_project_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    /// Comma-joined target project names, for messages.
    pub fn target_names(&self, source_id: u64) -> String {
        self.lookup(source_id)
            .into_iter()
            .map(|(_, name)| name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_unset(value: &str) -> bool {
    UNSET_PLACEHOLDERS
        .iter()
        .any(|placeholder| value.eq_ignore_ascii_case(placeholder))
}
