use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderName, AUTHORIZATION, USER_AGENT};
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;

use super::config::HarvestConfig;
use super::models::{DayEntry, DayEntryPage, HarvestProject};
use crate::error::{ApiError, Result};
use crate::http::{header_value, parse_json, send_paced};
use crate::rate_limiter::RateLimiter;

const ACCOUNT_HEADER: &str = "harvest-account-id";

/// Read-only Harvest v2 client; the sync never writes back to the time tracker.
#[derive(Clone)]
pub struct HarvestClient {
    http: HttpClient,
    config: HarvestConfig,
    limiter: RateLimiter,
}

impl HarvestClient {
    pub fn new(config: HarvestConfig) -> Result<Self> {
        let http = build_http_client(&config)?;
        let limiter = RateLimiter::new(config.cooldown);
        Ok(Self {
            http,
            config,
            limiter,
        })
    }

    pub async fn get_project(&self, project_id: u64) -> Result<HarvestProject> {
        let path = format!("projects/{}", project_id);
        self.get(&path, &[]).await
    }

    /// Time entries logged against a project, inclusive of both dates.
    pub async fn list_project_entries(
        &self,
        project_id: u64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DayEntry>> {
        let mut entries = Vec::new();
        let mut page = 1u32;
        loop {
            let query = [
                ("project_id", project_id.to_string()),
                ("from", from.format("%Y-%m-%d").to_string()),
                ("to", to.format("%Y-%m-%d").to_string()),
                ("page", page.to_string()),
                ("per_page", self.config.per_page.to_string()),
            ];
            let batch: DayEntryPage = self.get("time_entries", &query).await?;
            entries.extend(batch.time_entries);
            match batch.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
        Ok(entries)
    }

    pub async fn get_entry(&self, entry_id: u64) -> Result<DayEntry> {
        let path = format!("time_entries/{}", entry_id);
        self.get(&path, &[]).await
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
        tracing::debug!("GET harvest {}", path);
        let url = format!("{}{}", self.config.api_root(), path.trim_start_matches('/'));
        let response = send_paced(&self.limiter, self.http.get(url).query(query)).await?;
        parse_json(response).await
    }
}

fn build_http_client(config: &HarvestConfig) -> Result<HttpClient> {
    let mut headers = HeaderMap::new();

    let mut auth_value = header_value(&format!("Bearer {}", config.token))?;
    auth_value.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth_value);
    headers.insert(
        HeaderName::from_static(ACCOUNT_HEADER),
        header_value(&config.account_id)?,
    );
    headers.insert(USER_AGENT, header_value(&config.user_agent)?);

    HttpClient::builder()
        .default_headers(headers)
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .build()
        .map_err(|err| ApiError::Other(err.to_string()))
}
