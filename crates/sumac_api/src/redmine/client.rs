use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderName, USER_AGENT};
use reqwest::{Client as HttpClient, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::RedmineConfig;
use super::models::{Issue, Journal, Project, TimeEntry, TimeEntryFilter, TimeEntryPayload, User, WikiPage};
use crate::error::{ApiError, Result};
use crate::http::{ensure_success, header_value, parse_json, send_paced};
use crate::rate_limiter::RateLimiter;

const API_KEY_HEADER: &str = "x-redmine-api-key";
const SWITCH_USER_HEADER: &str = "x-redmine-switch-user";

/// Typed Redmine REST client.
///
/// Cloning is cheap and clones share the connection pool and rate limiter. Impersonation is
/// expressed as a separate view obtained from [`RedmineClient::acting_as`], so the client used for
/// reads never carries another user's identity.
#[derive(Clone)]
pub struct RedmineClient {
    http: HttpClient,
    config: RedmineConfig,
    limiter: RateLimiter,
    switch_user: Option<String>,
}

impl RedmineClient {
    pub fn new(config: RedmineConfig) -> Result<Self> {
        let http = build_http_client(&config)?;
        let limiter = RateLimiter::new(config.cooldown);
        Ok(Self {
            http,
            config,
            limiter,
            switch_user: None,
        })
    }

    /// Returns a view whose requests are performed as `login`. Requires an admin API key.
    pub fn acting_as(&self, login: &str) -> Self {
        let mut view = self.clone();
        view.switch_user = Some(login.to_string());
        view
    }

    pub fn acting_user(&self) -> Option<&str> {
        self.switch_user.as_deref()
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.get_all("projects.json", "projects", Vec::new()).await
    }

    /// Lists users. Locked accounts are only returned with `include_locked`, which asks for every
    /// status instead of Redmine's active-only default.
    pub async fn list_users(&self, include_locked: bool) -> Result<Vec<User>> {
        let query = if include_locked {
            vec![("status", String::new())]
        } else {
            Vec::new()
        };
        self.get_all("users.json", "users", query).await
    }

    pub async fn get_issue(&self, issue_id: u64) -> Result<Issue> {
        let path = format!("issues/{}.json", issue_id);
        let envelope: IssueEnvelope = self.get(&path, &[]).await?;
        Ok(envelope.issue)
    }

    /// Issues created on any day from `from` to `to` inclusive. Redmine's default status filter
    /// applies, so closed issues are left out.
    pub async fn list_issues_created(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Issue>> {
        let created_on = format!("><{}|{}", from.format("%Y-%m-%d"), to.format("%Y-%m-%d"));
        self.get_all("issues.json", "issues", vec![("created_on", created_on)])
            .await
    }

    pub async fn get_issue_journals(&self, issue_id: u64) -> Result<Vec<Journal>> {
        let path = format!("issues/{}.json", issue_id);
        let query = [("include", "journals".to_string())];
        let envelope: IssueEnvelope = self.get(&path, &query).await?;
        Ok(envelope.issue.journals)
    }

    /// Active members of a group.
    pub async fn list_group_users(&self, group_id: u64) -> Result<Vec<User>> {
        self.get_all("users.json", "users", vec![("group_id", group_id.to_string())])
            .await
    }

    pub async fn list_time_entries(&self, filter: &TimeEntryFilter) -> Result<Vec<TimeEntry>> {
        self.get_all("time_entries.json", "time_entries", filter.to_query())
            .await
    }

    pub async fn create_time_entry(&self, payload: &TimeEntryPayload) -> Result<TimeEntry> {
        let body = TimeEntryRequest {
            time_entry: payload,
        };
        let envelope: TimeEntryEnvelope = self
            .send_json(Method::POST, "time_entries.json", &body)
            .await?;
        Ok(envelope.time_entry)
    }

    pub async fn update_time_entry(&self, entry_id: u64, payload: &TimeEntryPayload) -> Result<()> {
        let path = format!("time_entries/{}.json", entry_id);
        let body = TimeEntryRequest {
            time_entry: payload,
        };
        self.send_expect_empty(Method::PUT, &path, Some(&body)).await
    }

    /// Deletes a time entry; `Ok(false)` when it was already gone.
    pub async fn delete_time_entry(&self, entry_id: u64) -> Result<bool> {
        let path = format!("time_entries/{}.json", entry_id);
        match self
            .send_expect_empty(Method::DELETE, &path, None::<&Value>)
            .await
        {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn get_wiki_page(&self, project: &str, page: &str) -> Result<WikiPage> {
        let path = format!("projects/{}/wiki/{}.json", project, page);
        let envelope: WikiEnvelope = self.get(&path, &[]).await?;
        Ok(envelope.wiki_page)
    }

    async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let what = format!("GET {}", path);
        self.config
            .retry
            .run(&what, move || self.get_once::<T>(path, query))
            .await
    }

    async fn get_once<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        tracing::debug!("GET {}", path);
        let request = self.request(Method::GET, path).query(query);
        let response = send_paced(&self.limiter, request).await?;
        parse_json(response).await
    }

    /// Follows Redmine's `limit`/`offset` pagination until `total_count` is reached.
    async fn get_all<T>(
        &self,
        path: &str,
        key: &str,
        base_query: Vec<(&'static str, String)>,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let limit = u64::from(self.config.page_size.max(1));
        let mut offset = 0u64;
        let mut items = Vec::new();
        loop {
            let mut query = base_query.clone();
            query.push(("limit", limit.to_string()));
            query.push(("offset", offset.to_string()));

            let mut page: Value = self.get(path, &query).await?;
            let raw = page
                .get_mut(key)
                .map(Value::take)
                .ok_or_else(|| ApiError::Serialization(format!("missing `{}` in {}", key, path)))?;
            let batch: Vec<T> = serde_json::from_value(raw)?;
            let total = page.get("total_count").and_then(Value::as_u64);

            let fetched = batch.len() as u64;
            items.extend(batch);
            offset += fetched;

            if fetched < limit || total.is_some_and(|total| offset >= total) {
                break;
            }
        }
        Ok(items)
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        tracing::debug!("{} {}", method, path);
        let request = self.request(method, path).json(body);
        let response = send_paced(&self.limiter, request).await?;
        parse_json(response).await
    }

    async fn send_expect_empty<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        tracing::debug!("{} {}", method, path);
        let mut request = self.request(method, path);
        if let Some(payload) = body {
            request = request.json(payload);
        }
        let response = send_paced(&self.limiter, request).await?;
        ensure_success(response).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.http.request(method, self.url_for(path));
        match &self.switch_user {
            Some(login) => request.header(SWITCH_USER_HEADER, login),
            None => request,
        }
    }

    fn url_for(&self, path: &str) -> String {
        let mut base = self.config.api_root();
        base.push_str(path.trim_start_matches('/'));
        base
    }
}

fn build_http_client(config: &RedmineConfig) -> Result<HttpClient> {
    let mut headers = HeaderMap::new();
    let mut key = header_value(&config.api_key)?;
    key.set_sensitive(true);
    headers.insert(HeaderName::from_static(API_KEY_HEADER), key);
    headers.insert(USER_AGENT, header_value(&config.user_agent)?);

    HttpClient::builder()
        .default_headers(headers)
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .build()
        .map_err(|err| ApiError::Other(err.to_string()))
}

#[derive(Debug, Serialize)]
struct TimeEntryRequest<'a> {
    time_entry: &'a TimeEntryPayload,
}

#[derive(Debug, Deserialize)]
struct TimeEntryEnvelope {
    time_entry: TimeEntry,
}

#[derive(Debug, Deserialize)]
struct IssueEnvelope {
    issue: Issue,
}

#[derive(Debug, Deserialize)]
struct WikiEnvelope {
    wiki_page: WikiPage,
}

#[cfg(test)]
mod tests {
    use super::RedmineClient;
    use crate::redmine::{RedmineConfig, TimeEntryFilter, TimeEntryPayload};
    use crate::retry::RetryPolicy;
    use crate::ApiError;
    use chrono::NaiveDate;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn client_for(server: &Server) -> RedmineClient {
        let config = RedmineConfig::new(server.url(), "secret-key")
            .with_cooldown(Duration::ZERO)
            .with_page_size(2)
            .with_retry(RetryPolicy {
                max_attempts: 2,
                base_backoff: Duration::from_millis(1),
            });
        RedmineClient::new(config).expect("client builds")
    }

    #[tokio::test]
    async fn get_issue_sends_api_key_and_parses_project() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/issues/42.json")
            .match_header("x-redmine-api-key", "secret-key")
            .with_status(200)
            .with_body(r#"{"issue":{"id":42,"project":{"id":10,"name":"Site"},"subject":"Bug"}}"#)
            .create_async()
            .await;

        let issue = client_for(&server).get_issue(42).await.expect("issue loads");

        mock.assert_async().await;
        assert_eq!(issue.project.map(|project| project.id), Some(10));
    }

    #[tokio::test]
    async fn missing_issue_maps_to_not_found() {
        let mut server = Server::new_async().await;
        let _missing = server
            .mock("GET", "/issues/7.json")
            .with_status(404)
            .create_async()
            .await;

        let err = client_for(&server).get_issue(7).await.expect_err("404 expected");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_projects_follows_offset_pagination() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/projects.json")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("limit".into(), "2".into()),
                Matcher::UrlEncoded("offset".into(), "0".into()),
            ]))
            .with_body(
                r#"{"projects":[{"id":1,"name":"A"},{"id":2,"name":"B"}],"total_count":3,"offset":0,"limit":2}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/projects.json")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("limit".into(), "2".into()),
                Matcher::UrlEncoded("offset".into(), "2".into()),
            ]))
            .with_body(r#"{"projects":[{"id":3,"name":"C"}],"total_count":3,"offset":2,"limit":2}"#)
            .create_async()
            .await;

        let projects = client_for(&server).list_projects().await.expect("projects load");

        first.assert_async().await;
        second.assert_async().await;
        let ids: Vec<u64> = projects.iter().map(|project| project.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn list_users_with_locked_requests_every_status() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/users.json")
            .match_query(Matcher::UrlEncoded("status".into(), String::new()))
            .with_body(r#"{"users":[{"id":3,"login":"alice","status":3}],"total_count":1}"#)
            .create_async()
            .await;

        let users = client_for(&server).list_users(true).await.expect("users load");

        mock.assert_async().await;
        assert_eq!(users[0].login, "alice");
    }

    #[tokio::test]
    async fn issues_created_in_range_use_created_on_filter() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/issues.json")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("created_on".into(), "><2024-03-01|2024-03-05".into()),
                Matcher::UrlEncoded("offset".into(), "0".into()),
            ]))
            .with_body(
                r#"{"issues":[{"id":77,"author":{"id":300,"name":"Client"},"created_on":"2024-03-04T09:15:00Z"}],"total_count":1}"#,
            )
            .create_async()
            .await;

        let from = NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date");
        let to = NaiveDate::from_ymd_opt(2024, 3, 5).expect("valid date");
        let issues = client_for(&server)
            .list_issues_created(from, to)
            .await
            .expect("issues load");

        mock.assert_async().await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].author.as_ref().map(|author| author.id), Some(300));
    }

    #[tokio::test]
    async fn issue_journals_are_requested_with_include() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/issues/77.json")
            .match_query(Matcher::UrlEncoded("include".into(), "journals".into()))
            .with_body(
                r#"{"issue":{"id":77,"journals":[{"id":1,"user":{"id":5,"name":"Alice"},"notes":"On it"}]}}"#,
            )
            .create_async()
            .await;

        let journals = client_for(&server)
            .get_issue_journals(77)
            .await
            .expect("journals load");

        mock.assert_async().await;
        assert_eq!(journals.len(), 1);
        assert_eq!(journals[0].notes.as_deref(), Some("On it"));
    }

    #[tokio::test]
    async fn group_users_are_filtered_by_group_id() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/users.json")
            .match_query(Matcher::UrlEncoded("group_id".into(), "95".into()))
            .with_body(r#"{"users":[{"id":5,"login":"alice"}],"total_count":1}"#)
            .create_async()
            .await;

        let users = client_for(&server)
            .list_group_users(95)
            .await
            .expect("users load");

        mock.assert_async().await;
        assert_eq!(users[0].id, 5);
    }

    #[tokio::test]
    async fn transient_read_failures_are_retried() {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("GET", "/time_entries.json")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let result = client_for(&server)
            .list_time_entries(&TimeEntryFilter::for_issue(42))
            .await;

        failing.assert_async().await;
        assert!(matches!(result, Err(ApiError::Http { .. })));
    }

    #[tokio::test]
    async fn impersonated_create_carries_switch_user_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/time_entries.json")
            .match_header("x-redmine-switch-user", "alice")
            .match_body(Matcher::PartialJsonString(
                r#"{"time_entry":{"issue_id":42,"hours":1.5}}"#.into(),
            ))
            .with_status(201)
            .with_body(r#"{"time_entry":{"id":900,"issue":{"id":42},"hours":1.5}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let payload = TimeEntryPayload {
            issue_id: 42,
            spent_on: NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date"),
            hours: 1.5,
            activity_id: Some(9),
            comments: "fixed bug #42 [Harvest ID: 9001]".into(),
            custom_fields: Vec::new(),
        };
        let created = client
            .acting_as("alice")
            .create_time_entry(&payload)
            .await
            .expect("entry created");

        mock.assert_async().await;
        assert_eq!(created.id, 900);
        assert!(client.acting_user().is_none());
    }

    #[tokio::test]
    async fn writes_are_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/time_entries/900.json")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let payload = TimeEntryPayload {
            issue_id: 42,
            spent_on: NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date"),
            hours: 2.0,
            activity_id: None,
            comments: String::new(),
            custom_fields: Vec::new(),
        };
        let result = client_for(&server).update_time_entry(900, &payload).await;

        mock.assert_async().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_reports_already_missing_entries_as_false() {
        let mut server = Server::new_async().await;
        let _deleted = server
            .mock("DELETE", "/time_entries/5.json")
            .with_status(204)
            .create_async()
            .await;
        let _gone = server
            .mock("DELETE", "/time_entries/6.json")
            .with_status(404)
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(client.delete_time_entry(5).await.expect("delete ok"));
        assert!(!client.delete_time_entry(6).await.expect("delete ok"));
    }

    #[tokio::test]
    async fn wiki_page_text_is_returned() {
        let mut server = Server::new_async().await;
        let _page = server
            .mock("GET", "/projects/ops/wiki/Dictionary.json")
            .with_body(r#"{"wiki_page":{"title":"Dictionary","text":"Drupal\nRedmine"}}"#)
            .create_async()
            .await;

        let page = client_for(&server)
            .get_wiki_page("ops", "Dictionary")
            .await
            .expect("page loads");
        assert_eq!(page.text, "Drupal\nRedmine");
    }
}
