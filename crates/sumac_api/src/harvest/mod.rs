//! Harvest (source time tracker) client.

mod client;
mod config;
mod models;

pub use client::HarvestClient;
pub use config::HarvestConfig;
pub use models::{DayEntry, HarvestProject, HarvestRef};
