use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "https://api.harvestapp.com";
pub const DEFAULT_USER_AGENT: &str = "sumac (time sync)";
/// Harvest allows 100 requests per 15 seconds.
pub const DEFAULT_COOLDOWN_MS: u64 = 150;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PER_PAGE: u32 = 100;

#[derive(Clone, Debug)]
pub struct HarvestConfig {
    pub base_url: String,
    pub token: String,
    pub account_id: String,
    pub user_agent: String,
    pub cooldown: Duration,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub per_page: u32,
}

impl HarvestConfig {
    pub fn new(token: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            token: token.into(),
            account_id: account_id.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            per_page: DEFAULT_PER_PAGE,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_cooldown(mut self, duration: Duration) -> Self {
        self.cooldown = duration;
        self
    }

    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Harvest only serves v2; everything hangs off `<base>/v2/`.
    pub fn api_root(&self) -> String {
        format!("{}/v2/", self.base_url.trim_end_matches('/'))
    }
}
