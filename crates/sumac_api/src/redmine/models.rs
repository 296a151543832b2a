//! Redmine resource models and request payloads.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{id, name}` reference embedded in most Redmine resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NamedRef {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
}

impl CustomField {
    pub fn new(id: u64, name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            id,
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Value rendered as text. Multi-value fields are joined with commas; blank values are `None`.
    pub fn text(&self) -> Option<String> {
        let text = match self.value.as_ref()? {
            Value::String(text) => text.trim().to_string(),
            Value::Number(number) => number.to_string(),
            Value::Array(items) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(text) => Some(text.trim().to_string()),
                    Value::Number(number) => Some(number.to_string()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Bool(flag) => flag.to_string(),
            Value::Null | Value::Object(_) => return None,
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Lookup helpers for resources carrying `custom_fields`.
pub trait HasCustomFields {
    fn custom_fields(&self) -> &[CustomField];

    fn custom_field_named(&self, name: &str) -> Option<&CustomField> {
        self.custom_fields().iter().find(|field| field.name == name)
    }

    fn custom_field_by_id(&self, id: u64) -> Option<&CustomField> {
        self.custom_fields().iter().find(|field| field.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    /// 1 = active, 2 = registered, 3 = locked.
    #[serde(default)]
    pub status: Option<u8>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    #[serde(default)]
    pub project: Option<NamedRef>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub spent_hours: Option<f64>,
    #[serde(default)]
    pub author: Option<NamedRef>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
    /// Only present when requested with `include=journals`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub journals: Vec<Journal>,
}

/// One change set on an issue; `notes` holds the comment, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    pub id: u64,
    #[serde(default)]
    pub user: Option<NamedRef>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Journal {
    pub fn has_comment(&self) -> bool {
        self.notes.as_deref().is_some_and(|notes| !notes.trim().is_empty())
    }

    pub fn user_id(&self) -> Option<u64> {
        self.user.as_ref().map(|user| user.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: u64,
    #[serde(default)]
    pub project: Option<NamedRef>,
    #[serde(default)]
    pub issue: Option<NamedRef>,
    #[serde(default)]
    pub user: Option<NamedRef>,
    #[serde(default)]
    pub hours: f64,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub spent_on: Option<NaiveDate>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WikiPage {
    pub title: String,
    #[serde(default)]
    pub text: String,
}

impl HasCustomFields for Project {
    fn custom_fields(&self) -> &[CustomField] {
        &self.custom_fields
    }
}

impl HasCustomFields for User {
    fn custom_fields(&self) -> &[CustomField] {
        &self.custom_fields
    }
}

impl HasCustomFields for Issue {
    fn custom_fields(&self) -> &[CustomField] {
        &self.custom_fields
    }
}

impl HasCustomFields for TimeEntry {
    fn custom_fields(&self) -> &[CustomField] {
        &self.custom_fields
    }
}

/// Custom field assignment as accepted by create/update endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomFieldValue {
    pub id: u64,
    pub value: String,
}

/// Body of `POST /time_entries.json` and `PUT /time_entries/{id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeEntryPayload {
    pub issue_id: u64,
    pub spent_on: NaiveDate,
    pub hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<u64>,
    pub comments: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_fields: Vec<CustomFieldValue>,
}

/// Query for `GET /time_entries.json`; unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeEntryFilter {
    pub issue_id: Option<u64>,
    pub project_id: Option<u64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl TimeEntryFilter {
    pub fn for_issue(issue_id: u64) -> Self {
        Self {
            issue_id: Some(issue_id),
            ..Self::default()
        }
    }

    pub fn spent_between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(issue_id) = self.issue_id {
            query.push(("issue_id", issue_id.to_string()));
        }
        if let Some(project_id) = self.project_id {
            query.push(("project_id", project_id.to_string()));
        }
        if let Some(from) = self.from {
            query.push(("from", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.to {
            query.push(("to", to.format("%Y-%m-%d").to_string()));
        }
        query
    }
}
