//! Ports the sync core talks to, and their implementations over the HTTP clients.

use async_trait::async_trait;
use sumac_api::{
    ApiError, HarvestClient, HarvestProject, Issue, Journal, Project, RedmineClient, TimeEntry,
    TimeEntryFilter, TimeEntryPayload, User,
};

use crate::model::{DateRange, SourceEntry};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Read access to the time tracker the entries come from.
#[async_trait]
pub trait SourceTracker: Send + Sync {
    async fn get_project(&self, project_id: u64) -> ApiResult<HarvestProject>;

    async fn list_entries(&self, project_id: u64, range: DateRange)
        -> ApiResult<Vec<SourceEntry>>;

    /// `Ok(None)` when the entry no longer exists.
    async fn get_entry(&self, entry_id: u64) -> ApiResult<Option<SourceEntry>>;
}

/// The issue tracker time is reconciled into.
///
/// Writes take the login to act as, so impersonation is scoped to exactly one call.
#[async_trait]
pub trait TargetTracker: Send + Sync {
    async fn list_projects(&self) -> ApiResult<Vec<Project>>;

    async fn list_users(&self, include_locked: bool) -> ApiResult<Vec<User>>;

    /// `Ok(None)` when no issue has this id.
    async fn get_issue(&self, issue_id: u64) -> ApiResult<Option<Issue>>;

    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> ApiResult<Vec<TimeEntry>>;

    /// Open issues created within `range`.
    async fn list_issues_created(&self, range: DateRange) -> ApiResult<Vec<Issue>>;

    async fn issue_journals(&self, issue_id: u64) -> ApiResult<Vec<Journal>>;

    async fn list_group_members(&self, group_id: u64) -> ApiResult<Vec<User>>;

    async fn create_time_entry(
        &self,
        acting_as: &str,
        payload: &TimeEntryPayload,
    ) -> ApiResult<TimeEntry>;

    async fn update_time_entry(
        &self,
        acting_as: &str,
        entry_id: u64,
        payload: &TimeEntryPayload,
    ) -> ApiResult<()>;

    /// `Ok(false)` when the entry was already gone.
    async fn delete_time_entry(&self, entry_id: u64) -> ApiResult<bool>;

    async fn wiki_page_text(&self, project: &str, page: &str) -> ApiResult<String>;
}

#[async_trait]
impl SourceTracker for HarvestClient {
    async fn get_project(&self, project_id: u64) -> ApiResult<HarvestProject> {
        HarvestClient::get_project(self, project_id).await
    }

    async fn list_entries(
        &self,
        project_id: u64,
        range: DateRange,
    ) -> ApiResult<Vec<SourceEntry>> {
        let entries = self
            .list_project_entries(project_id, range.from, range.to)
            .await?;
        Ok(entries.into_iter().map(SourceEntry::from).collect())
    }

    async fn get_entry(&self, entry_id: u64) -> ApiResult<Option<SourceEntry>> {
        match HarvestClient::get_entry(self, entry_id).await {
            Ok(entry) => Ok(Some(entry.into())),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl TargetTracker for RedmineClient {
    async fn list_projects(&self) -> ApiResult<Vec<Project>> {
        RedmineClient::list_projects(self).await
    }

    async fn list_users(&self, include_locked: bool) -> ApiResult<Vec<User>> {
        RedmineClient::list_users(self, include_locked).await
    }

    async fn get_issue(&self, issue_id: u64) -> ApiResult<Option<Issue>> {
        match RedmineClient::get_issue(self, issue_id).await {
            Ok(issue) => Ok(Some(issue)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> ApiResult<Vec<TimeEntry>> {
        RedmineClient::list_time_entries(self, filter).await
    }

    async fn list_issues_created(&self, range: DateRange) -> ApiResult<Vec<Issue>> {
        RedmineClient::list_issues_created(self, range.from, range.to).await
    }

    async fn issue_journals(&self, issue_id: u64) -> ApiResult<Vec<Journal>> {
        self.get_issue_journals(issue_id).await
    }

    async fn list_group_members(&self, group_id: u64) -> ApiResult<Vec<User>> {
        self.list_group_users(group_id).await
    }

    async fn create_time_entry(
        &self,
        acting_as: &str,
        payload: &TimeEntryPayload,
    ) -> ApiResult<TimeEntry> {
        self.acting_as(acting_as).create_time_entry(payload).await
    }

    async fn update_time_entry(
        &self,
        acting_as: &str,
        entry_id: u64,
        payload: &TimeEntryPayload,
    ) -> ApiResult<()> {
        self.acting_as(acting_as)
            .update_time_entry(entry_id, payload)
            .await
    }

    async fn delete_time_entry(&self, entry_id: u64) -> ApiResult<bool> {
        RedmineClient::delete_time_entry(self, entry_id).await
    }

    async fn wiki_page_text(&self, project: &str, page: &str) -> ApiResult<String> {
        Ok(self.get_wiki_page(project, page).await?.text)
    }
}
