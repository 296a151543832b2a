//! In-memory trackers and notifier shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use sumac_api::{
    ApiError, CustomField, HarvestProject, Issue, Journal, NamedRef, Project, TimeEntry,
    TimeEntryFilter, TimeEntryPayload, User,
};

use crate::model::{DateRange, SourceEntry};
use crate::notify::{Notifier, NotifyError};
use crate::tracker::{ApiResult, SourceTracker, TargetTracker};

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn source_entry(id: u64, project_id: u64, user_id: u64, notes: &str, hours: f64) -> SourceEntry {
    SourceEntry {
        id,
        user_id,
        project_id,
        client_id: None,
        notes: notes.to_string(),
        spent_on: day(2024, 3, 1),
        hours,
        billable: true,
    }
}

pub fn issue(id: u64, project_id: u64) -> Issue {
    Issue {
        id,
        project: Some(NamedRef::new(project_id, format!("Project {}", project_id))),
        subject: Some(format!("Issue {}", id)),
        ..Issue::default()
    }
}

pub fn linked_project(id: u64, name: &str, source_ids: &str) -> Project {
    Project {
        id,
        name: name.to_string(),
        identifier: Some(name.to_lowercase()),
        custom_fields: vec![CustomField::new(17, "Harvest Project ID(s)", source_ids)],
    }
}

pub fn linked_user(id: u64, login: &str, source_id: u64) -> User {
    User {
        id,
        login: login.to_string(),
        status: Some(1),
        custom_fields: vec![
            CustomField::new(5, "Harvest ID", source_id.to_string()),
            CustomField::new(6, "Slack Handle", login),
        ],
        ..User::default()
    }
}

/// A target time entry carrying `source_id` in custom field 20.
pub fn target_entry(id: u64, source_id: u64) -> TimeEntry {
    TimeEntry {
        id,
        hours: 1.0,
        spent_on: Some(day(2024, 3, 1)),
        custom_fields: vec![CustomField::new(20, "Harvest ID", source_id.to_string())],
        ..TimeEntry::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Create { acting_as: String, payload: TimeEntryPayload },
    Update { acting_as: String, entry_id: u64, payload: TimeEntryPayload },
    Delete { entry_id: u64 },
}

#[derive(Default)]
struct TargetState {
    projects: Vec<Project>,
    users: Vec<User>,
    issues: BTreeMap<u64, Issue>,
    entries: Vec<TimeEntry>,
    writes: Vec<Write>,
    next_id: u64,
    fail_writes: bool,
    drop_writes: bool,
    fail_deletes: BTreeSet<u64>,
    fail_journals: BTreeSet<u64>,
    wiki: BTreeMap<String, String>,
    groups: BTreeMap<u64, Vec<User>>,
}

/// Redmine stand-in. Created entries become visible to later listings.
#[derive(Default)]
pub struct FakeTarget {
    state: Mutex<TargetState>,
}

impl FakeTarget {
    pub fn new() -> Self {
        let target = Self::default();
        target.state.lock().expect("fake state").next_id = 1000;
        target
    }

    pub fn with_project(self, project: Project) -> Self {
        self.state.lock().expect("fake state").projects.push(project);
        self
    }

    pub fn with_user(self, user: User) -> Self {
        self.state.lock().expect("fake state").users.push(user);
        self
    }

    pub fn with_issue(self, issue: Issue) -> Self {
        self.state
            .lock()
            .expect("fake state")
            .issues
            .insert(issue.id, issue);
        self
    }

    pub fn with_entry(self, entry: TimeEntry) -> Self {
        self.state.lock().expect("fake state").entries.push(entry);
        self
    }

    pub fn with_wiki_page(self, project: &str, page: &str, text: &str) -> Self {
        self.state
            .lock()
            .expect("fake state")
            .wiki
            .insert(format!("{}/{}", project, page), text.to_string());
        self
    }

    pub fn with_group_member(self, group_id: u64, user: User) -> Self {
        self.state
            .lock()
            .expect("fake state")
            .groups
            .entry(group_id)
            .or_default()
            .push(user);
        self
    }

    /// Loading this issue's journals fails with a server error.
    pub fn failing_journals(self, issue_id: u64) -> Self {
        self.state
            .lock()
            .expect("fake state")
            .fail_journals
            .insert(issue_id);
        self
    }

    /// Every create/update fails with a server error.
    pub fn failing_writes(self) -> Self {
        self.state.lock().expect("fake state").fail_writes = true;
        self
    }

    /// Creates report success but nothing is stored.
    pub fn dropping_writes(self) -> Self {
        self.state.lock().expect("fake state").drop_writes = true;
        self
    }

    pub fn failing_delete(self, entry_id: u64) -> Self {
        self.state
            .lock()
            .expect("fake state")
            .fail_deletes
            .insert(entry_id);
        self
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state.lock().expect("fake state").writes.clone()
    }

    pub fn entries(&self) -> Vec<TimeEntry> {
        self.state.lock().expect("fake state").entries.clone()
    }
}

fn entry_from_payload(id: u64, login: &str, payload: &TimeEntryPayload, issue: Option<&Issue>) -> TimeEntry {
    TimeEntry {
        id,
        project: issue.and_then(|issue| issue.project.clone()),
        issue: Some(NamedRef {
            id: payload.issue_id,
            name: None,
        }),
        user: Some(NamedRef::new(0, login)),
        hours: payload.hours,
        comments: Some(payload.comments.clone()),
        spent_on: Some(payload.spent_on),
        custom_fields: payload
            .custom_fields
            .iter()
            .map(|field| CustomField::new(field.id, "", field.value.clone()))
            .collect(),
    }
}

fn server_error() -> ApiError {
    ApiError::http(StatusCode::INTERNAL_SERVER_ERROR, None, "boom")
}

#[async_trait]
impl TargetTracker for FakeTarget {
    async fn list_projects(&self) -> ApiResult<Vec<Project>> {
        Ok(self.state.lock().expect("fake state").projects.clone())
    }

    async fn list_users(&self, include_locked: bool) -> ApiResult<Vec<User>> {
        let state = self.state.lock().expect("fake state");
        Ok(state
            .users
            .iter()
            .filter(|user| include_locked || user.status != Some(3))
            .cloned()
            .collect())
    }

    async fn get_issue(&self, issue_id: u64) -> ApiResult<Option<Issue>> {
        Ok(self
            .state
            .lock()
            .expect("fake state")
            .issues
            .get(&issue_id)
            .cloned())
    }

    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> ApiResult<Vec<TimeEntry>> {
        let state = self.state.lock().expect("fake state");
        Ok(state
            .entries
            .iter()
            .filter(|entry| {
                filter
                    .issue_id
                    .map_or(true, |id| entry.issue.as_ref().map(|issue| issue.id) == Some(id))
            })
            .filter(|entry| match (filter.from, filter.to, entry.spent_on) {
                (Some(from), Some(to), Some(spent)) => from <= spent && spent <= to,
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn list_issues_created(&self, range: DateRange) -> ApiResult<Vec<Issue>> {
        let state = self.state.lock().expect("fake state");
        Ok(state
            .issues
            .values()
            .filter(|issue| {
                issue
                    .created_on
                    .is_some_and(|created| range.contains(created.date_naive()))
            })
            .map(|issue| Issue {
                journals: Vec::new(),
                ..issue.clone()
            })
            .collect())
    }

    async fn issue_journals(&self, issue_id: u64) -> ApiResult<Vec<Journal>> {
        let state = self.state.lock().expect("fake state");
        if state.fail_journals.contains(&issue_id) {
            return Err(server_error());
        }
        state
            .issues
            .get(&issue_id)
            .map(|issue| issue.journals.clone())
            .ok_or_else(|| ApiError::NotFound(format!("issues/{}", issue_id)))
    }

    async fn list_group_members(&self, group_id: u64) -> ApiResult<Vec<User>> {
        let state = self.state.lock().expect("fake state");
        Ok(state.groups.get(&group_id).cloned().unwrap_or_default())
    }

    async fn create_time_entry(
        &self,
        acting_as: &str,
        payload: &TimeEntryPayload,
    ) -> ApiResult<TimeEntry> {
        let mut state = self.state.lock().expect("fake state");
        if state.fail_writes {
            return Err(server_error());
        }
        state.writes.push(Write::Create {
            acting_as: acting_as.to_string(),
            payload: payload.clone(),
        });
        state.next_id += 1;
        let id = state.next_id;
        let entry = entry_from_payload(id, acting_as, payload, state.issues.get(&payload.issue_id));
        if !state.drop_writes {
            state.entries.push(entry.clone());
        }
        Ok(entry)
    }

    async fn update_time_entry(
        &self,
        acting_as: &str,
        entry_id: u64,
        payload: &TimeEntryPayload,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().expect("fake state");
        if state.fail_writes {
            return Err(server_error());
        }
        state.writes.push(Write::Update {
            acting_as: acting_as.to_string(),
            entry_id,
            payload: payload.clone(),
        });
        let updated = entry_from_payload(entry_id, acting_as, payload, state.issues.get(&payload.issue_id));
        if let Some(existing) = state.entries.iter_mut().find(|entry| entry.id == entry_id) {
            *existing = updated;
        }
        Ok(())
    }

    async fn delete_time_entry(&self, entry_id: u64) -> ApiResult<bool> {
        let mut state = self.state.lock().expect("fake state");
        if state.fail_deletes.contains(&entry_id) {
            return Err(server_error());
        }
        state.writes.push(Write::Delete { entry_id });
        let before = state.entries.len();
        state.entries.retain(|entry| entry.id != entry_id);
        Ok(state.entries.len() < before)
    }

    async fn wiki_page_text(&self, project: &str, page: &str) -> ApiResult<String> {
        self.state
            .lock()
            .expect("fake state")
            .wiki
            .get(&format!("{}/{}", project, page))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("{}/{}", project, page)))
    }
}

/// Harvest stand-in.
#[derive(Default)]
pub struct FakeSource {
    projects: BTreeMap<u64, HarvestProject>,
    entries: Vec<SourceEntry>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, entry: SourceEntry) -> Self {
        self.projects
            .entry(entry.project_id)
            .or_insert_with(|| HarvestProject {
                id: entry.project_id,
                name: format!("Harvest {}", entry.project_id),
                is_active: true,
                ..HarvestProject::default()
            });
        self.entries.push(entry);
        self
    }
}

#[async_trait]
impl SourceTracker for FakeSource {
    async fn get_project(&self, project_id: u64) -> ApiResult<HarvestProject> {
        self.projects
            .get(&project_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("projects/{}", project_id)))
    }

    async fn list_entries(
        &self,
        project_id: u64,
        range: DateRange,
    ) -> ApiResult<Vec<SourceEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.project_id == project_id && range.contains(entry.spent_on))
            .cloned()
            .collect())
    }

    async fn get_entry(&self, entry_id: u64) -> ApiResult<Option<SourceEntry>> {
        Ok(self.entries.iter().find(|entry| entry.id == entry_id).cloned())
    }
}

/// Records every message instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
    pub announced: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("notifier state")
            .push((recipient.to_string(), message.to_string()));
        Ok(())
    }

    async fn announce(&self, message: &str) -> Result<(), NotifyError> {
        self.announced
            .lock()
            .expect("notifier state")
            .push(message.to_string());
        Ok(())
    }
}
