//! Delivery of per-user run reports and team announcements to chat.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client as HttpClient, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::report::RunReport;
use crate::text::redact_log_details;
use crate::user_map::UserMap;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook rejected the message with status {0}")]
    Rejected(StatusCode),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// `recipient` is a chat handle without the leading `@`.
    async fn notify(&self, recipient: &str, message: &str) -> Result<(), NotifyError>;

    /// Posts to the channel the webhook belongs to.
    async fn announce(&self, message: &str) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct SlackMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    text: &'a str,
}

/// Posts direct messages through a Slack incoming webhook.
pub struct SlackNotifier {
    http: HttpClient,
    webhook_url: String,
    debug_user: Option<String>,
}

impl SlackNotifier {
    /// With `debug_user` set, every message goes to that handle instead of its recipient.
    pub fn new(
        webhook_url: impl Into<String>,
        debug_user: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
            debug_user: debug_user.filter(|handle| !handle.trim().is_empty()),
        })
    }

    async fn post(&self, body: &SlackMessage<'_>) -> Result<(), NotifyError> {
        let response = self.http.post(&self.webhook_url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status()));
        }
        Ok(())
    }
}

fn direct(handle: &str) -> String {
    format!("@{}", handle.trim_start_matches('@'))
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, recipient: &str, message: &str) -> Result<(), NotifyError> {
        let handle = self.debug_user.as_deref().unwrap_or(recipient);
        let body = SlackMessage {
            channel: Some(direct(handle)),
            text: message,
        };
        self.post(&body).await
    }

    async fn announce(&self, message: &str) -> Result<(), NotifyError> {
        let body = SlackMessage {
            channel: self.debug_user.as_deref().map(direct),
            text: message,
        };
        self.post(&body).await
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchSummary {
    pub sent: usize,
    /// Source users with something to report but no chat handle.
    pub unreachable: Vec<u64>,
    pub failed: usize,
}

/// Sends each user with problems of their own the part of `report` that concerns them. A run
/// without problems sends nothing, however many annotations it collected.
pub async fn dispatch(report: &RunReport, users: &UserMap, notifier: &dyn Notifier) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    if !report.has_errors() {
        debug!("No problems recorded; nobody to notify");
        return summary;
    }
    for user_id in report.affected_users() {
        let Some(message) = report.user_message(user_id) else {
            continue;
        };
        let Some(handle) = users.chat_handle(user_id) else {
            warn!("Harvest user {} has no chat handle; not notified", user_id);
            summary.unreachable.push(user_id);
            continue;
        };
        match notifier.notify(handle, &message).await {
            Ok(()) => {
                info!("Notified @{}", handle);
                summary.sent += 1;
            }
            Err(err) => {
                warn!(
                    "Failed to notify @{}: {}",
                    handle,
                    redact_log_details(&err.to_string())
                );
                summary.failed += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Annotation, EntryRef, SyncProblem};
    use crate::testing::{source_entry, RecordingNotifier};
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn posts_direct_message_to_webhook() {
        let mut server = Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .match_body(Matcher::Json(json!({"channel": "@alice", "text": "hello"})))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let notifier =
            SlackNotifier::new(format!("{}/hook", server.url()), None, Duration::from_secs(5))
                .expect("notifier builds");
        notifier.notify("alice", "hello").await.expect("delivered");
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn debug_user_receives_everything() {
        let mut server = Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .match_body(Matcher::PartialJson(json!({"channel": "@ops"})))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let notifier = SlackNotifier::new(
            format!("{}/hook", server.url()),
            Some("ops".into()),
            Duration::from_secs(5),
        )
        .expect("notifier builds");
        notifier.notify("alice", "hello").await.expect("delivered");
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn announcements_use_the_webhook_channel() {
        let mut server = Server::new_async().await;
        let hook = server
            .mock("POST", "/team")
            .match_body(Matcher::Json(json!({"text": "heads up"})))
            .with_status(200)
            .create_async()
            .await;
        let redirected = server
            .mock("POST", "/debug")
            .match_body(Matcher::Json(json!({"channel": "@ops", "text": "heads up"})))
            .with_status(200)
            .create_async()
            .await;

        let team = SlackNotifier::new(format!("{}/team", server.url()), None, Duration::from_secs(5))
            .expect("notifier builds");
        team.announce("heads up").await.expect("delivered");
        let debug = SlackNotifier::new(
            format!("{}/debug", server.url()),
            Some("ops".into()),
            Duration::from_secs(5),
        )
        .expect("notifier builds");
        debug.announce("heads up").await.expect("delivered");

        hook.assert_async().await;
        redirected.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_webhook_is_an_error() {
        let mut server = Server::new_async().await;
        let _hook = server
            .mock("POST", "/hook")
            .with_status(404)
            .with_body("channel_not_found")
            .create_async()
            .await;

        let notifier =
            SlackNotifier::new(format!("{}/hook", server.url()), None, Duration::from_secs(5))
                .expect("notifier builds");
        let err = notifier.notify("ghost", "hello").await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected(StatusCode::NOT_FOUND)));
    }

    #[tokio::test]
    async fn dispatch_skips_users_without_handles() {
        let report = RunReport {
            problems: vec![
                SyncProblem::NoIssueReference {
                    entry: EntryRef::from(&source_entry(1, 55, 7, "standup", 1.0)),
                },
                SyncProblem::NoIssueReference {
                    entry: EntryRef::from(&source_entry(2, 55, 8, "standup", 1.0)),
                },
            ],
            ..RunReport::default()
        };
        let mut users = UserMap::default();
        users.insert(7, "alice");
        users.insert(8, "bob");
        users.insert_chat_handle("alice", "alice.w");
        let notifier = RecordingNotifier::default();

        let summary = dispatch(&report, &users, &notifier).await;

        assert_eq!(summary.sent, 1);
        assert_eq!(summary.unreachable, vec![8]);
        let sent = notifier.sent.lock().expect("notifier state");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "alice.w");
        assert!(sent[0].1.contains("Harvest entry 1"));
    }

    #[tokio::test]
    async fn clean_run_with_annotations_sends_nothing() {
        let report = RunReport {
            annotations: vec![Annotation::Rounded {
                entry: EntryRef::from(&source_entry(1, 55, 7, "fixed bug #42", 1.3)),
                source_hours: 1.3,
                target_hours: 1.5,
            }],
            ..RunReport::default()
        };
        let mut users = UserMap::default();
        users.insert(7, "alice");
        users.insert_chat_handle("alice", "alice");
        let notifier = RecordingNotifier::default();

        let summary = dispatch(&report, &users, &notifier).await;

        assert_eq!(summary, DispatchSummary::default());
        assert!(notifier.sent.lock().expect("notifier state").is_empty());
    }

    #[tokio::test]
    async fn users_with_only_annotations_are_left_alone() {
        let report = RunReport {
            problems: vec![SyncProblem::NoIssueReference {
                entry: EntryRef::from(&source_entry(1, 55, 7, "standup", 1.0)),
            }],
            annotations: vec![Annotation::Rounded {
                entry: EntryRef::from(&source_entry(2, 55, 8, "#42 review", 1.3)),
                source_hours: 1.3,
                target_hours: 1.5,
            }],
            ..RunReport::default()
        };
        let mut users = UserMap::default();
        users.insert(7, "alice");
        users.insert(8, "bob");
        users.insert_chat_handle("alice", "alice");
        users.insert_chat_handle("bob", "bob");
        let notifier = RecordingNotifier::default();

        let summary = dispatch(&report, &users, &notifier).await;

        assert_eq!(summary.sent, 1);
        let sent = notifier.sent.lock().expect("notifier state");
        assert_eq!(sent[0].0, "alice");
    }
}
