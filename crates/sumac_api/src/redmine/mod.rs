//! Redmine (target issue tracker) client.

mod client;
mod config;
mod models;

pub use client::RedmineClient;
pub use config::RedmineConfig;
pub use models::{
    CustomField, CustomFieldValue, HasCustomFields, Issue, Journal, NamedRef, Project, TimeEntry,
    TimeEntryFilter, TimeEntryPayload, User, WikiPage,
};
