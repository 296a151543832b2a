//! What each CLI command does, written against the tracker ports so it can run on fakes.

use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};
use serde::Serialize;
use sumac_api::TimeEntryFilter;

use crate::config::{SpellcheckSettings, Settings};
use crate::duplicates::{
    find_duplicate_groups, plan_removal, remove_duplicates, source_id_of, DuplicateGroups,
    DuplicateIndex, RemovalOutcome,
};
use crate::engine::{ReconciliationEngine, RunContext, SyncOptions};
use crate::error::{Result, SyncError};
use crate::model::{DateRange, SourceEntry};
use crate::notify::{dispatch, Notifier};
use crate::report::{Recipient, RunReport, SyncProblem};
use crate::spelling::WordList;
use crate::text::redact_log_details;
use crate::tracker::{SourceTracker, TargetTracker};
use crate::unattended::{announce, find_unattended, internal_team, UnattendedIssue};

/// Merges the local word list and the wiki dictionary. `None` when neither is configured.
///
/// An unreadable word list is fatal; an unreachable wiki page only loses those words.
pub async fn load_dictionary(
    target: &dyn TargetTracker,
    settings: &SpellcheckSettings,
) -> Result<Option<WordList>> {
    if !settings.is_enabled() {
        return Ok(None);
    }
    let mut words = match &settings.word_list {
        Some(path) => WordList::from_file(path)?,
        None => WordList::default(),
    };
    if let Some((project, page)) = settings.wiki() {
        match target.wiki_page_text(project, page).await {
            Ok(text) => words.extend_from_text(&text),
            Err(err) => warn!(
                "Could not load dictionary page {}/{}: {}",
                project,
                page,
                redact_log_details(&err.to_string())
            ),
        }
    }
    info!("Spell-checking against {} words", words.len());
    Ok(Some(words))
}

/// The full reconciliation run, including optional notifications.
pub async fn sync(
    source: &dyn SourceTracker,
    target: &dyn TargetTracker,
    settings: &Settings,
    options: &SyncOptions,
    notifier: Option<&dyn Notifier>,
) -> Result<RunReport> {
    let mut ctx = RunContext::build(target, &settings.map_fields(), options).await?;
    if let Some(words) = load_dictionary(target, &settings.spellcheck).await? {
        ctx = ctx.with_dictionary(Box::new(words));
    }

    let report = ReconciliationEngine::new(source, target, options)
        .run(&ctx)
        .await?;

    for problem in report.problems_for(Recipient::Operator) {
        warn!("{}", problem.format());
    }
    if let Some(notifier) = notifier.filter(|_| report.has_errors()) {
        let summary = dispatch(&report, &ctx.users, notifier).await;
        info!(
            "Sent {} notifications ({} failed, {} users without a chat handle)",
            summary.sent,
            summary.failed,
            summary.unreachable.len()
        );
    }
    Ok(report)
}

async fn index_target(
    target: &dyn TargetTracker,
    field_id: u64,
    range: Option<DateRange>,
) -> Result<DuplicateIndex> {
    let filter = range
        .map(|range| TimeEntryFilter::spent_between(range.from, range.to))
        .unwrap_or_default();
    let entries = target.list_time_entries(&filter).await?;
    Ok(DuplicateIndex::index(&entries, field_id))
}

/// Source ids claimed by more than one target entry, with all their target ids.
pub async fn find_duplicates(
    target: &dyn TargetTracker,
    field_id: u64,
    range: Option<DateRange>,
) -> Result<DuplicateGroups> {
    let index = index_target(target, field_id, range).await?;
    let groups = find_duplicate_groups(&index);
    info!(
        "{} of {} synced Harvest entries have duplicates",
        groups.len(),
        index.len()
    );
    Ok(groups)
}

/// Parses `{"<source id>": [<target id>, ...]}` as printed by `find-duplicates`.
pub fn parse_groups(json: &str) -> Result<DuplicateGroups> {
    let raw: BTreeMap<String, Vec<u64>> = serde_json::from_str(json)
        .map_err(|err| SyncError::InvalidInput(format!("duplicate groups: {}", err)))?;
    raw.into_iter()
        .map(|(source_id, mut ids)| {
            let source_id = source_id.trim().parse::<u64>().map_err(|_| {
                SyncError::InvalidInput(format!("`{}` is not a Harvest entry id", source_id))
            })?;
            ids.sort_unstable();
            Ok((source_id, ids))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemovalReport {
    pub planned: Vec<u64>,
    pub outcome: RemovalOutcome,
    pub problems: Vec<SyncProblem>,
}

/// Deletes all but the newest entry of each group; computes the groups when none are given.
pub async fn remove_duplicate_entries(
    target: &dyn TargetTracker,
    field_id: u64,
    groups: Option<DuplicateGroups>,
) -> Result<RemovalReport> {
    let groups = match groups {
        Some(groups) => groups,
        None => find_duplicates(target, field_id, None).await?,
    };
    let planned = plan_removal(&groups);
    info!("Removing {} duplicate time entries", planned.len());
    let outcome = remove_duplicates(target, &planned).await;
    let problems = outcome
        .failed
        .iter()
        .map(|(target_id, details)| SyncProblem::RemovalFailed {
            target_id: *target_id,
            details: details.clone(),
        })
        .collect();
    Ok(RemovalReport {
        planned,
        outcome,
        problems,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Orphan {
    pub source_id: u64,
    pub target_id: u64,
}

/// Target entries whose Harvest entry has been deleted.
pub async fn find_orphans(
    source: &dyn SourceTracker,
    target: &dyn TargetTracker,
    field_id: u64,
    range: Option<DateRange>,
) -> Result<Vec<Orphan>> {
    let index = index_target(target, field_id, range).await?;
    let mut orphans = Vec::new();
    for source_id in index.source_ids() {
        match source.get_entry(source_id).await {
            Ok(Some(_)) => {}
            Ok(None) => orphans.extend(index.ids(source_id).iter().map(|target_id| Orphan {
                source_id,
                target_id: *target_id,
            })),
            Err(err) => warn!(
                "Could not check Harvest entry {}: {}",
                source_id,
                redact_log_details(&err.to_string())
            ),
        }
    }
    info!("{} orphaned time entries", orphans.len());
    Ok(orphans)
}

pub async fn check_source_id(source: &dyn SourceTracker, source_id: u64) -> Result<Option<SourceEntry>> {
    Ok(source.get_entry(source_id).await?)
}

/// Target entries carrying `source_id`, for diagnostics.
pub async fn target_entries_for(
    target: &dyn TargetTracker,
    field_id: u64,
    source_id: u64,
    range: DateRange,
) -> Result<Vec<u64>> {
    let entries = target
        .list_time_entries(&TimeEntryFilter::spent_between(range.from, range.to))
        .await?;
    Ok(entries
        .iter()
        .filter(|entry| source_id_of(entry, field_id) == Some(source_id))
        .map(|entry| entry.id)
        .collect())
}

/// External issues created in `range` that the team has not answered, posted to the team channel
/// when a notifier is given.
pub async fn find_unattended_tasks(
    target: &dyn TargetTracker,
    settings: &Settings,
    range: DateRange,
    notifier: Option<&dyn Notifier>,
) -> Result<Vec<UnattendedIssue>> {
    let team = internal_team(target, &settings.unattended).await?;
    let issues = find_unattended(target, &team, range).await?;
    if let Some(notifier) = notifier {
        announce(notifier, range, &issues, &settings.auth.redmine.url).await?;
    }
    Ok(issues)
}

/// Writes default settings to `path`, refusing to overwrite an existing file.
pub fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(SyncError::InvalidInput(format!(
            "{} already exists",
            path.display()
        )));
    }
    crate::config::ConfigManager::at(path).save(&Settings::default())?;
    Ok(())
}
