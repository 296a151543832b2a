//! Resolution of a source entry to the Redmine issue its time belongs on.

use log::{debug, warn};
use sumac_api::Issue;

use crate::model::SourceEntry;
use crate::project_map::{ProjectConstraint, ProjectMap};
use crate::reference::parse_issue_reference;
use crate::text::redact_log_details;
use crate::tracker::TargetTracker;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Matched(Issue),
    /// The notes carry no `#<digits>` reference.
    NoReferenceFound,
    /// A reference was found but Redmine has no usable issue with that id.
    IssueNotFound(u64),
    /// The issue lives outside every Redmine project linked to the entry's source project.
    ProjectMismatch {
        issue_id: u64,
        issue_project: String,
        expected: Vec<(u64, String)>,
    },
    /// Strict mode only: the source project is not linked to any Redmine project.
    UnmappedProject(u64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Reject entries whose source project is missing from the project map instead of
    /// accepting any issue for them.
    pub strict: bool,
}

pub struct EntryMatcher<'a> {
    target: &'a dyn TargetTracker,
    projects: &'a ProjectMap,
    policy: MatchPolicy,
}

impl<'a> EntryMatcher<'a> {
    pub fn new(target: &'a dyn TargetTracker, projects: &'a ProjectMap, policy: MatchPolicy) -> Self {
        Self {
            target,
            projects,
            policy,
        }
    }

    pub async fn match_entry(&self, entry: &SourceEntry) -> MatchResult {
        match parse_issue_reference(&entry.notes) {
            Some(issue_id) => self.resolve_issue(entry, issue_id).await,
            None => MatchResult::NoReferenceFound,
        }
    }

    /// Fetches `issue_id` and checks it against the entry's project. Also used for fallback
    /// issues, which get the same validation as parsed references.
    pub async fn resolve_issue(&self, entry: &SourceEntry, issue_id: u64) -> MatchResult {
        let constraint = self.projects.constraint(entry.project_id);
        if self.policy.strict && constraint == ProjectConstraint::Unknown {
            return MatchResult::UnmappedProject(entry.project_id);
        }

        let issue = match self.target.get_issue(issue_id).await {
            Ok(Some(issue)) => issue,
            Ok(None) => return MatchResult::IssueNotFound(issue_id),
            Err(err) => {
                warn!(
                    "Could not fetch issue #{} for entry {}: {}",
                    issue_id,
                    entry.id,
                    redact_log_details(&err.to_string())
                );
                return MatchResult::IssueNotFound(issue_id);
            }
        };
        let Some(project) = issue.project.clone() else {
            return MatchResult::IssueNotFound(issue_id);
        };

        if !constraint.allows(project.id) {
            return MatchResult::ProjectMismatch {
                issue_id,
                issue_project: project.name.unwrap_or_else(|| project.id.to_string()),
                expected: self
                    .projects
                    .lookup(entry.project_id)
                    .into_iter()
                    .map(|(id, name)| (id, name.to_string()))
                    .collect(),
            };
        }
        if constraint == ProjectConstraint::Unknown {
            debug!(
                "Source project {} is not linked; accepting issue #{} unchecked",
                entry.project_id, issue_id
            );
        }
        MatchResult::Matched(issue)
    }
}
