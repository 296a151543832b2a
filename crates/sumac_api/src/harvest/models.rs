//! Harvest v2 resource models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestRef {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestProject {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub client: Option<HarvestRef>,
}

/// A Harvest time entry ("day entry" in the v1 API).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayEntry {
    pub id: u64,
    pub spent_date: NaiveDate,
    #[serde(default)]
    pub hours: f64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub billable: bool,
    pub user: HarvestRef,
    pub project: HarvestRef,
    #[serde(default)]
    pub client: Option<HarvestRef>,
    #[serde(default)]
    pub task: Option<HarvestRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DayEntryPage {
    pub time_entries: Vec<DayEntry>,
    #[serde(default)]
    pub next_page: Option<u32>,
}
