//! The reconciliation run: Harvest entries in, Redmine time entries out.
//!
//! A run builds a [`RunContext`] once (project map, user map, index of what Redmine already
//! holds) and then walks the source entries one at a time. Each entry either ends up in Redmine,
//! is left alone because it is already there, or produces a [`SyncProblem`]; nothing an
//! individual entry does can abort the batch. After the batch the target is read back to catch
//! writes that were acknowledged but never stored.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use sumac_api::{CustomFieldValue, Issue, TimeEntryFilter, TimeEntryPayload};

use crate::duplicates::{comment_marker, source_id_of, DuplicateIndex};
use crate::error::Result;
use crate::matcher::{EntryMatcher, MatchPolicy, MatchResult};
use crate::model::{DateRange, SourceEntry};
use crate::project_map::ProjectMap;
use crate::report::{Annotation, EntryRef, RunReport, SubmitAction, SyncProblem, SyncSuccess};
use crate::spelling::{misspelled_words, Dictionary};
use crate::text::redact_log_details;
use crate::tracker::{SourceTracker, TargetTracker};
use crate::user_map::UserMap;

/// Rounds up to the next quarter hour.
pub fn round_to_quarter_hour(hours: f64) -> f64 {
    (hours * 4.0).ceil() / 4.0
}

/// Comment written on the target entry; ends with the marker naming the source entry.
pub fn target_comment(entry: &SourceEntry) -> String {
    let notes = entry.notes.trim();
    if notes.is_empty() {
        comment_marker(entry.id)
    } else {
        format!("{} {}", notes, comment_marker(entry.id))
    }
}

/// Custom field names used to link Redmine records to Harvest.
#[derive(Debug, Clone, PartialEq)]
pub struct MapFields {
    pub project_source_ids: String,
    pub user_source_id: String,
    pub user_chat_handle: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub range: DateRange,
    /// Rewrite entries that already exist instead of skipping them.
    pub update: bool,
    pub dry_run: bool,
    pub strict: bool,
    pub billable_only: bool,
    pub activity_id: Option<u64>,
    /// Id of the time entry custom field holding the source entry id.
    pub source_id_field: u64,
    pub excluded_projects: BTreeSet<u64>,
    pub spell_check_only: BTreeSet<u64>,
    /// When non-empty, the only source projects processed.
    pub debug_projects: BTreeSet<u64>,
    pub dont_spell_check_clients: BTreeSet<u64>,
    /// Source project → issue used when the notes carry no reference.
    pub fallback_issues: BTreeMap<u64, u64>,
}

impl SyncOptions {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            update: false,
            dry_run: false,
            strict: false,
            billable_only: false,
            activity_id: None,
            source_id_field: 20,
            excluded_projects: BTreeSet::new(),
            spell_check_only: BTreeSet::new(),
            debug_projects: BTreeSet::new(),
            dont_spell_check_clients: BTreeSet::new(),
            fallback_issues: BTreeMap::new(),
        }
    }
}

/// Everything a run reads from Redmine up front. Built once, read-only afterwards.
pub struct RunContext {
    pub projects: ProjectMap,
    pub users: UserMap,
    pub existing: DuplicateIndex,
    pub dictionary: Option<Box<dyn Dictionary>>,
}

impl RunContext {
    /// Fails when either map comes back empty; no entry is looked at in that case.
    pub async fn build(
        target: &dyn TargetTracker,
        fields: &MapFields,
        options: &SyncOptions,
    ) -> Result<Self> {
        let projects = ProjectMap::build(&target.list_projects().await?, &fields.project_source_ids)?;
        let users = UserMap::build(
            &target.list_users(true).await?,
            &fields.user_source_id,
            fields.user_chat_handle.as_deref(),
        )?;
        let existing = load_index(target, options).await?;
        info!(
            "Loaded {} linked projects, {} linked users, {} synced entries",
            projects.len(),
            users.len(),
            existing.len()
        );
        Ok(Self {
            projects,
            users,
            existing,
            dictionary: None,
        })
    }

    pub fn with_dictionary(mut self, dictionary: Box<dyn Dictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }
}

async fn load_index(target: &dyn TargetTracker, options: &SyncOptions) -> Result<DuplicateIndex> {
    let filter = TimeEntryFilter::spent_between(options.range.from, options.range.to);
    let entries = target.list_time_entries(&filter).await?;
    Ok(DuplicateIndex::index(&entries, options.source_id_field))
}

/// A write the engine believes went through.
#[derive(Debug, Clone)]
struct Submitted {
    entry: EntryRef,
    issue_id: u64,
}

pub struct ReconciliationEngine<'a> {
    source: &'a dyn SourceTracker,
    target: &'a dyn TargetTracker,
    options: &'a SyncOptions,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(
        source: &'a dyn SourceTracker,
        target: &'a dyn TargetTracker,
        options: &'a SyncOptions,
    ) -> Self {
        Self {
            source,
            target,
            options,
        }
    }

    /// Fetches the run's source entries and reconciles them.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunReport> {
        let entries = self.collect_entries(ctx).await;
        info!("Reconciling {} Harvest entries for {}", entries.len(), self.options.range);
        self.reconcile(ctx, &entries).await
    }

    /// Source entries for every linked (or debug) project, minus exclusions.
    pub async fn collect_entries(&self, ctx: &RunContext) -> Vec<SourceEntry> {
        let project_ids: BTreeSet<u64> = if self.options.debug_projects.is_empty() {
            ctx.projects
                .source_project_ids()
                .chain(self.options.spell_check_only.iter().copied())
                .collect()
        } else {
            self.options.debug_projects.clone()
        };

        let mut entries = Vec::new();
        for project_id in project_ids {
            if self.options.excluded_projects.contains(&project_id) {
                debug!("Skipping excluded Harvest project {}", project_id);
                continue;
            }
            match self.source.get_project(project_id).await {
                Ok(project) => debug!("Harvest project {} ({})", project.id, project.name),
                Err(err) => {
                    warn!(
                        "Skipping Harvest project {}: {}",
                        project_id,
                        redact_log_details(&err.to_string())
                    );
                    continue;
                }
            }
            match self.source.list_entries(project_id, self.options.range).await {
                Ok(found) => entries.extend(
                    found
                        .into_iter()
                        .filter(|entry| !self.options.billable_only || entry.billable),
                ),
                Err(err) => warn!(
                    "Could not list entries of Harvest project {}: {}",
                    project_id,
                    redact_log_details(&err.to_string())
                ),
            }
        }
        entries
    }

    /// Processes `entries` in order, then checks that every write actually landed.
    pub async fn reconcile(&self, ctx: &RunContext, entries: &[SourceEntry]) -> Result<RunReport> {
        let matcher = EntryMatcher::new(
            self.target,
            &ctx.projects,
            MatchPolicy {
                strict: self.options.strict,
            },
        );
        let mut report = RunReport::default();
        let mut submitted = Vec::new();

        for entry in entries {
            if let Some(done) = self.process(ctx, &matcher, entry, &mut report).await {
                submitted.push(done);
            }
        }

        self.verify(&submitted, &mut report).await;
        Ok(report)
    }

    async fn process(
        &self,
        ctx: &RunContext,
        matcher: &EntryMatcher<'_>,
        entry: &SourceEntry,
        report: &mut RunReport,
    ) -> Option<Submitted> {
        let entry_ref = EntryRef::from(entry);
        self.spell_check(ctx, entry, report);
        if self.options.spell_check_only.contains(&entry.project_id) {
            report.checked_only += 1;
            return None;
        }

        let issue = match self.match_entry(matcher, entry).await {
            MatchResult::Matched(issue) => issue,
            other => {
                report.problems.extend(problem_for(entry_ref, other));
                return None;
            }
        };

        let existing = match self.existing_entries(ctx, entry, &issue).await {
            Ok(ids) => ids,
            Err(details) => {
                report.problems.push(SyncProblem::SubmissionFailed {
                    entry: entry_ref,
                    issue_id: issue.id,
                    details,
                });
                return None;
            }
        };
        if existing.len() > 1 {
            report.problems.push(SyncProblem::DuplicateTargetEntries {
                entry: entry_ref,
                target_ids: existing,
            });
            return None;
        }
        let existing = existing.first().copied();
        if existing.is_some() && !self.options.update {
            report.unchanged += 1;
            return None;
        }

        let Some(login) = ctx.users.lookup(entry.user_id) else {
            report.problems.push(SyncProblem::UserNotMapped { entry: entry_ref });
            return None;
        };

        let hours = round_to_quarter_hour(entry.hours);
        if (hours - entry.hours).abs() > f64::EPSILON {
            report.annotations.push(Annotation::Rounded {
                entry: entry_ref.clone(),
                source_hours: entry.hours,
                target_hours: hours,
            });
        }

        let payload = TimeEntryPayload {
            issue_id: issue.id,
            spent_on: entry.spent_on,
            hours,
            activity_id: self.options.activity_id,
            comments: target_comment(entry),
            custom_fields: vec![CustomFieldValue {
                id: self.options.source_id_field,
                value: entry.id.to_string(),
            }],
        };

        let (action, target_entry_id) = if self.options.dry_run {
            let action = match existing {
                Some(_) => SubmitAction::WouldUpdate,
                None => SubmitAction::WouldCreate,
            };
            (action, existing)
        } else {
            let written = match existing {
                Some(id) => self
                    .target
                    .update_time_entry(login, id, &payload)
                    .await
                    .map(|()| (SubmitAction::Updated, Some(id))),
                None => self
                    .target
                    .create_time_entry(login, &payload)
                    .await
                    .map(|created| (SubmitAction::Created, Some(created.id))),
            };
            match written {
                Ok(written) => written,
                Err(err) => {
                    let details = redact_log_details(&err.to_string());
                    warn!("Failed to log Harvest entry {} on #{}: {}", entry.id, issue.id, details);
                    report.problems.push(SyncProblem::SubmissionFailed {
                        entry: entry_ref,
                        issue_id: issue.id,
                        details,
                    });
                    return None;
                }
            }
        };

        info!(
            "{} {}h on #{} as {} for Harvest entry {}",
            action.label(),
            hours,
            issue.id,
            login,
            entry.id
        );
        report.successes.push(SyncSuccess {
            entry: entry_ref.clone(),
            issue_id: issue.id,
            target_entry_id,
            hours,
            action,
        });
        action.is_write().then_some(Submitted {
            entry: entry_ref,
            issue_id: issue.id,
        })
    }

    fn spell_check(&self, ctx: &RunContext, entry: &SourceEntry, report: &mut RunReport) {
        let Some(dictionary) = ctx.dictionary.as_deref() else {
            return;
        };
        if entry
            .client_id
            .is_some_and(|client| self.options.dont_spell_check_clients.contains(&client))
        {
            return;
        }
        let words = misspelled_words(&entry.notes, dictionary);
        if !words.is_empty() {
            report.annotations.push(Annotation::Misspelled {
                entry: EntryRef::from(entry),
                words,
            });
        }
    }

    async fn match_entry(&self, matcher: &EntryMatcher<'_>, entry: &SourceEntry) -> MatchResult {
        match matcher.match_entry(entry).await {
            MatchResult::NoReferenceFound => match self.options.fallback_issues.get(&entry.project_id) {
                Some(&fallback) => {
                    debug!("Harvest entry {} falls back to #{}", entry.id, fallback);
                    matcher.resolve_issue(entry, fallback).await
                }
                None => MatchResult::NoReferenceFound,
            },
            other => other,
        }
    }

    /// Target entries already carrying this source entry. Consults the run index first and
    /// falls back to the issue's own entries for dates outside the run range.
    async fn existing_entries(
        &self,
        ctx: &RunContext,
        entry: &SourceEntry,
        issue: &Issue,
    ) -> std::result::Result<Vec<u64>, String> {
        let indexed = ctx.existing.ids(entry.id);
        if !indexed.is_empty() || self.options.range.contains(entry.spent_on) {
            return Ok(indexed.to_vec());
        }
        let on_issue = self
            .target
            .list_time_entries(&TimeEntryFilter::for_issue(issue.id))
            .await
            .map_err(|err| redact_log_details(&err.to_string()))?;
        let mut ids: Vec<u64> = on_issue
            .iter()
            .filter(|existing| source_id_of(existing, self.options.source_id_field) == Some(entry.id))
            .map(|existing| existing.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn verify(&self, submitted: &[Submitted], report: &mut RunReport) {
        if submitted.is_empty() {
            return;
        }
        let index = match load_index(self.target, self.options).await {
            Ok(index) => index,
            Err(err) => {
                warn!(
                    "Could not re-read Redmine to verify {} writes: {}",
                    submitted.len(),
                    redact_log_details(&err.to_string())
                );
                return;
            }
        };
        for write in submitted {
            if !index.contains(write.entry.source_id) {
                warn!(
                    "Harvest entry {} is missing from Redmine after a successful write",
                    write.entry.source_id
                );
                report.problems.push(SyncProblem::SubmissionNotPersisted {
                    entry: write.entry.clone(),
                    issue_id: write.issue_id,
                });
            }
        }
    }
}

fn problem_for(entry: EntryRef, result: MatchResult) -> Option<SyncProblem> {
    let problem = match result {
        MatchResult::Matched(_) => return None,
        MatchResult::NoReferenceFound => SyncProblem::NoIssueReference { entry },
        MatchResult::IssueNotFound(issue_id) => SyncProblem::IssueNotFound { entry, issue_id },
        MatchResult::ProjectMismatch {
            issue_id,
            issue_project,
            expected,
        } => SyncProblem::ProjectMismatch {
            entry,
            issue_id,
            issue_project,
            expected: expected.into_iter().map(|(_, name)| name).collect(),
        },
        MatchResult::UnmappedProject(_) => SyncProblem::UnmappedProject { entry },
    };
    Some(problem)
}
