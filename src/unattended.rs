//! Issues opened from outside the team that nobody on the team has answered yet.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use serde::Serialize;
use sumac_api::Issue;

use crate::config::UnattendedSettings;
use crate::error::{ConfigError, Result};
use crate::model::DateRange;
use crate::notify::Notifier;
use crate::text::redact_log_details;
use crate::tracker::TargetTracker;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnattendedIssue {
    pub id: u64,
    pub subject: String,
    pub project: String,
    pub author: String,
}

impl From<&Issue> for UnattendedIssue {
    fn from(issue: &Issue) -> Self {
        let name = |reference: Option<&sumac_api::NamedRef>| {
            reference
                .and_then(|reference| reference.name.clone())
                .unwrap_or_else(|| "unknown".to_string())
        };
        Self {
            id: issue.id,
            subject: issue.subject.clone().unwrap_or_default(),
            project: name(issue.project.as_ref()),
            author: name(issue.author.as_ref()),
        }
    }
}

/// Redmine user ids of the team: members of the configured group plus the extra ids.
pub async fn internal_team(
    target: &dyn TargetTracker,
    settings: &UnattendedSettings,
) -> Result<BTreeSet<u64>> {
    let group_id = settings
        .group_id
        .ok_or(ConfigError::Missing("unattended.group_id"))?;
    let mut team: BTreeSet<u64> = target
        .list_group_members(group_id)
        .await?
        .iter()
        .map(|user| user.id)
        .collect();
    if team.is_empty() {
        warn!("Redmine group {} has no active members", group_id);
    }
    team.extend(settings.extra_user_ids.iter().copied());
    Ok(team)
}

/// Issues created in `range` by someone outside `team` that carry no comment from anyone on it.
///
/// Issues without an author count as external. When an issue's history cannot be loaded it is
/// listed, since nobody can tell it was answered.
pub async fn find_unattended(
    target: &dyn TargetTracker,
    team: &BTreeSet<u64>,
    range: DateRange,
) -> Result<Vec<UnattendedIssue>> {
    let issues = target.list_issues_created(range).await?;
    let mut unattended = Vec::new();
    for issue in &issues {
        let author = issue.author.as_ref().map(|author| author.id);
        if author.is_some_and(|id| team.contains(&id)) {
            continue;
        }
        let answered = match target.issue_journals(issue.id).await {
            Ok(journals) => journals.iter().any(|journal| {
                journal.has_comment() && journal.user_id().is_some_and(|id| team.contains(&id))
            }),
            Err(err) => {
                warn!(
                    "Could not load the history of issue #{}: {}",
                    issue.id,
                    redact_log_details(&err.to_string())
                );
                false
            }
        };
        if answered {
            debug!("Issue #{} already has a reply from the team", issue.id);
            continue;
        }
        unattended.push(UnattendedIssue::from(issue));
    }
    info!(
        "{} of {} issues created {} are unattended",
        unattended.len(),
        issues.len(),
        range
    );
    Ok(unattended)
}

/// Slack escaping for text placed inside `<link|text>`.
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn summary_message(range: DateRange, issues: &[UnattendedIssue], redmine_url: &str) -> String {
    let base = redmine_url.trim_end_matches('/');
    let mut message = format!(
        "The following tasks were created by someone outside the team between {} and {} and \
         have not been answered yet. They may need our attention:\n\n",
        range.from, range.to
    );
    for issue in issues {
        message.push_str(&format!(
            "Project: *{}* Author: *{}* Link: *<{}/issues/{}|{} ({})>*\n",
            escape(&issue.project),
            escape(&issue.author),
            base,
            issue.id,
            escape(&issue.subject),
            issue.id
        ));
    }
    message
}

/// Posts the summary to the team channel. `Ok(false)` when there was nothing to post.
pub async fn announce(
    notifier: &dyn Notifier,
    range: DateRange,
    issues: &[UnattendedIssue],
    redmine_url: &str,
) -> Result<bool> {
    if issues.is_empty() {
        info!("No unattended issues; nothing posted");
        return Ok(false);
    }
    notifier
        .announce(&summary_message(range, issues, redmine_url))
        .await?;
    info!("Posted {} unattended issues to the team channel", issues.len());
    Ok(true)
}
