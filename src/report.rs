//! Outcome of a run: per-entry problems, non-fatal annotations and successes.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::SourceEntry;
use crate::text::{pad, truncate_text};

/// The slice of a source entry that messages refer to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryRef {
    pub source_id: u64,
    pub user_id: u64,
    pub project_id: u64,
    pub spent_on: NaiveDate,
    pub hours: f64,
    pub notes: String,
}

impl From<&SourceEntry> for EntryRef {
    fn from(entry: &SourceEntry) -> Self {
        Self {
            source_id: entry.id,
            user_id: entry.user_id,
            project_id: entry.project_id,
            spent_on: entry.spent_on,
            hours: entry.hours,
            notes: entry.notes.clone(),
        }
    }
}

impl EntryRef {
    fn describe(&self) -> String {
        format!(
            "{} {}h \"{}\" (Harvest entry {})",
            self.spent_on,
            self.hours,
            truncate_text(&self.notes, 60),
            self.source_id
        )
    }
}

/// Who has to act on a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Recipient {
    /// The Harvest user who logged the entry.
    User(u64),
    Operator,
}

/// A classified per-entry failure. The run records it and moves on to the next entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncProblem {
    NoIssueReference {
        entry: EntryRef,
    },
    IssueNotFound {
        entry: EntryRef,
        issue_id: u64,
    },
    ProjectMismatch {
        entry: EntryRef,
        issue_id: u64,
        issue_project: String,
        expected: Vec<String>,
    },
    UnmappedProject {
        entry: EntryRef,
    },
    UserNotMapped {
        entry: EntryRef,
    },
    DuplicateTargetEntries {
        entry: EntryRef,
        target_ids: Vec<u64>,
    },
    SubmissionFailed {
        entry: EntryRef,
        issue_id: u64,
        details: String,
    },
    SubmissionNotPersisted {
        entry: EntryRef,
        issue_id: u64,
    },
    RemovalFailed {
        target_id: u64,
        details: String,
    },
}

impl SyncProblem {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncProblem::NoIssueReference { .. } => "no issue reference",
            SyncProblem::IssueNotFound { .. } => "issue not found",
            SyncProblem::ProjectMismatch { .. } => "project mismatch",
            SyncProblem::UnmappedProject { .. } => "unmapped project",
            SyncProblem::UserNotMapped { .. } => "user not mapped",
            SyncProblem::DuplicateTargetEntries { .. } => "duplicate target entries",
            SyncProblem::SubmissionFailed { .. } => "submission failed",
            SyncProblem::SubmissionNotPersisted { .. } => "submission not persisted",
            SyncProblem::RemovalFailed { .. } => "removal failed",
        }
    }

    pub fn entry(&self) -> Option<&EntryRef> {
        match self {
            SyncProblem::NoIssueReference { entry }
            | SyncProblem::IssueNotFound { entry, .. }
            | SyncProblem::ProjectMismatch { entry, .. }
            | SyncProblem::UnmappedProject { entry }
            | SyncProblem::UserNotMapped { entry }
            | SyncProblem::DuplicateTargetEntries { entry, .. }
            | SyncProblem::SubmissionFailed { entry, .. }
            | SyncProblem::SubmissionNotPersisted { entry, .. } => Some(entry),
            SyncProblem::RemovalFailed { .. } => None,
        }
    }

    /// Data-integrity faults go to the operator; everything else to the entry's author.
    pub fn recipient(&self) -> Recipient {
        match self {
            SyncProblem::DuplicateTargetEntries { .. } | SyncProblem::RemovalFailed { .. } => {
                Recipient::Operator
            }
            other => other
                .entry()
                .map(|entry| Recipient::User(entry.user_id))
                .unwrap_or(Recipient::Operator),
        }
    }

    pub fn format(&self) -> String {
        match self {
            SyncProblem::NoIssueReference { entry } => format!(
                "{}: no Redmine issue reference found, add `#<issue number>` to the notes",
                entry.describe()
            ),
            SyncProblem::IssueNotFound { entry, issue_id } => format!(
                "{}: Redmine issue #{} does not exist or is not visible",
                entry.describe(),
                issue_id
            ),
            SyncProblem::ProjectMismatch {
                entry,
                issue_id,
                issue_project,
                expected,
            } => {
                let expected = if expected.is_empty() {
                    "no Redmine project".to_string()
                } else {
                    expected.join(", ")
                };
                format!(
                    "{}: issue #{} belongs to {} but the Harvest project is linked to {}",
                    entry.describe(),
                    issue_id,
                    issue_project,
                    expected
                )
            }
            SyncProblem::UnmappedProject { entry } => format!(
                "{}: Harvest project {} is not linked to any Redmine project",
                entry.describe(),
                entry.project_id
            ),
            SyncProblem::UserNotMapped { entry } => format!(
                "{}: Harvest user {} has no Redmine account",
                entry.describe(),
                entry.user_id
            ),
            SyncProblem::DuplicateTargetEntries { entry, target_ids } => format!(
                "{}: already copied to several Redmine time entries {:?}, run remove-duplicates",
                entry.describe(),
                target_ids
            ),
            SyncProblem::SubmissionFailed {
                entry,
                issue_id,
                details,
            } => format!(
                "{}: could not log time on #{}: {}",
                entry.describe(),
                issue_id,
                details
            ),
            SyncProblem::SubmissionNotPersisted { entry, issue_id } => format!(
                "{}: Redmine accepted the time on #{} but it is not there now",
                entry.describe(),
                issue_id
            ),
            SyncProblem::RemovalFailed { target_id, details } => {
                format!("could not remove Redmine time entry {}: {}", target_id, details)
            }
        }
    }
}

/// Something worth telling the author that does not stop the entry from syncing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    Misspelled {
        entry: EntryRef,
        words: Vec<String>,
    },
    Rounded {
        entry: EntryRef,
        source_hours: f64,
        target_hours: f64,
    },
}

impl Annotation {
    pub fn entry(&self) -> &EntryRef {
        match self {
            Annotation::Misspelled { entry, .. } | Annotation::Rounded { entry, .. } => entry,
        }
    }

    pub fn format(&self) -> String {
        match self {
            Annotation::Misspelled { entry, words } => format!(
                "{}: possible misspellings: {}",
                entry.describe(),
                words.join(", ")
            ),
            Annotation::Rounded {
                entry,
                source_hours,
                target_hours,
            } => format!(
                "{}: {}h rounded up to {}h",
                entry.describe(),
                source_hours,
                target_hours
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitAction {
    Created,
    Updated,
    WouldCreate,
    WouldUpdate,
}

impl SubmitAction {
    pub fn label(&self) -> &'static str {
        match self {
            SubmitAction::Created => "created",
            SubmitAction::Updated => "updated",
            SubmitAction::WouldCreate => "would create",
            SubmitAction::WouldUpdate => "would update",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, SubmitAction::Created | SubmitAction::Updated)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSuccess {
    pub entry: EntryRef,
    pub issue_id: u64,
    pub target_entry_id: Option<u64>,
    pub hours: f64,
    pub action: SubmitAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub problems: Vec<SyncProblem>,
    pub annotations: Vec<Annotation>,
    pub successes: Vec<SyncSuccess>,
    /// Entries already present in Redmine and left alone.
    pub unchanged: usize,
    /// Entries in spell-check-only projects.
    pub checked_only: usize,
}

impl RunReport {
    pub fn has_errors(&self) -> bool {
        !self.problems.is_empty()
    }

    pub fn writes(&self) -> usize {
        self.successes.iter().filter(|s| s.action.is_write()).count()
    }

    /// Source users with at least one problem of their own. Annotations alone do not count.
    pub fn affected_users(&self) -> BTreeSet<u64> {
        self.problems
            .iter()
            .filter_map(|problem| match problem.recipient() {
                Recipient::User(user_id) => Some(user_id),
                Recipient::Operator => None,
            })
            .collect()
    }

    pub fn problems_for(&self, recipient: Recipient) -> impl Iterator<Item = &SyncProblem> + '_ {
        self.problems
            .iter()
            .filter(move |problem| problem.recipient() == recipient)
    }

    /// Message for one user holding only their own items, or `None` when they have none.
    pub fn user_message(&self, user_id: u64) -> Option<String> {
        let problems: Vec<String> = self
            .problems_for(Recipient::User(user_id))
            .map(|problem| format!("• {}", problem.format()))
            .collect();
        let notes: Vec<String> = self
            .annotations
            .iter()
            .filter(|annotation| annotation.entry().user_id == user_id)
            .map(|annotation| format!("• {}", annotation.format()))
            .collect();
        if problems.is_empty() && notes.is_empty() {
            return None;
        }

        let mut message = String::new();
        if !problems.is_empty() {
            message.push_str("These Harvest entries could not be copied to Redmine:\n");
            message.push_str(&problems.join("\n"));
        }
        if !notes.is_empty() {
            if !message.is_empty() {
                message.push_str("\n\n");
            }
            message.push_str("Please double-check these entries:\n");
            message.push_str(&notes.join("\n"));
        }
        Some(message)
    }

    /// Console summary: one row per success, then one per problem.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {} {} {} {}",
            pad("STATUS", 14),
            pad("DATE", 10),
            pad("HARVEST", 10),
            pad("ISSUE", 7),
            "DETAILS"
        );
        for success in &self.successes {
            let _ = writeln!(
                out,
                "{} {} {} {} {}h {}",
                pad(success.action.label(), 14),
                success.entry.spent_on,
                pad(&success.entry.source_id.to_string(), 10),
                pad(&format!("#{}", success.issue_id), 7),
                success.hours,
                truncate_text(&success.entry.notes, 50)
            );
        }
        for problem in &self.problems {
            let (date, source) = problem
                .entry()
                .map(|entry| (entry.spent_on.to_string(), entry.source_id.to_string()))
                .unwrap_or_else(|| ("-".into(), "-".into()));
            let _ = writeln!(
                out,
                "{} {} {} {} {}",
                pad(problem.kind(), 14),
                pad(&date, 10),
                pad(&source, 10),
                pad("", 7),
                truncate_text(&problem.format(), 120)
            );
        }
        let _ = write!(
            out,
            "{} written, {} unchanged, {} spell-check only, {} problems, {} notes",
            self.writes(),
            self.unchanged,
            self.checked_only,
            self.problems.len(),
            self.annotations.len()
        );
        out
    }
}
