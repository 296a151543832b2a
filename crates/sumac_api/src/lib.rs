//! Typed Redmine and Harvest API clients used by the sync tooling.

pub mod error;
pub mod harvest;
mod http;
pub mod rate_limiter;
pub mod redmine;
pub mod retry;

pub use error::{ApiError, Result};
pub use harvest::{DayEntry, HarvestClient, HarvestConfig, HarvestProject, HarvestRef};
pub use rate_limiter::RateLimiter;
pub use redmine::{
    CustomField, CustomFieldValue, HasCustomFields, Issue, Journal, NamedRef, Project, RedmineClient,
    RedmineConfig, TimeEntry, TimeEntryFilter, TimeEntryPayload, User, WikiPage,
};
pub use retry::RetryPolicy;
