//! Sync settings model and file-backed manager.
//!
//! Settings come from a JSON file and are then overridden by `SUMAC_*` environment variables,
//! so credentials can live entirely outside the file.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sumac_api::{HarvestConfig, RedmineConfig, RetryPolicy};

use crate::engine::{MapFields, SyncOptions};
use crate::error::ConfigError;
use crate::model::DateRange;

const CONFIG_FILE_NAME: &str = "config.json";

fn default_project_source_ids_field() -> String {
    "Harvest Project ID(s)".to_string()
}

fn default_user_source_id_field() -> String {
    "Harvest ID".to_string()
}

fn default_user_chat_handle_field() -> Option<String> {
    Some("Slack Handle".to_string())
}

fn default_time_entry_source_id_field() -> u64 {
    20
}

fn default_activity_id() -> Option<u64> {
    Some(9)
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct HarvestAuth {
    pub token: String,
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct RedmineAuth {
    pub url: String,
    pub api_key: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SlackAuth {
    pub webhook_url: Option<String>,
    /// Channel webhook for team-wide announcements such as unattended tasks.
    pub notify_webhook_url: Option<String>,
    /// Receives every notification instead of the real recipients.
    pub debug_user: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AuthSettings {
    pub harvest: HarvestAuth,
    pub redmine: RedmineAuth,
    pub slack: SlackAuth,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ProjectSettings {
    pub exclude: Vec<u64>,
    pub spell_check_only: Vec<u64>,
    pub debug_projects: Vec<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ClientSettings {
    pub dont_spell_check: Vec<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    pub projects: ProjectSettings,
    pub clients: ClientSettings,
    pub strict: bool,
    pub billable_only: bool,
    pub activity_id: Option<u64>,
    /// Harvest project id → Redmine issue for entries without a reference.
    pub fallback_issues: BTreeMap<u64, u64>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            projects: ProjectSettings::default(),
            clients: ClientSettings::default(),
            strict: false,
            billable_only: false,
            activity_id: default_activity_id(),
            fallback_issues: BTreeMap::new(),
        }
    }
}

/// Names (and one id) of the Redmine custom fields linking records to Harvest.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FieldSettings {
    pub project_source_ids: String,
    pub user_source_id: String,
    pub user_chat_handle: Option<String>,
    pub time_entry_source_id: u64,
}

impl Default for FieldSettings {
    fn default() -> Self {
        Self {
            project_source_ids: default_project_source_ids_field(),
            user_source_id: default_user_source_id_field(),
            user_chat_handle: default_user_chat_handle_field(),
            time_entry_source_id: default_time_entry_source_id_field(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SpellcheckSettings {
    /// Redmine project holding the shared dictionary wiki page.
    pub project: Option<String>,
    pub wiki_page: Option<String>,
    pub word_list: Option<PathBuf>,
}

impl SpellcheckSettings {
    pub fn is_enabled(&self) -> bool {
        self.word_list.is_some() || self.wiki().is_some()
    }

    pub fn wiki(&self) -> Option<(&str, &str)> {
        self.project.as_deref().zip(self.wiki_page.as_deref())
    }
}

/// Who counts as the team when looking for issues nobody has answered.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct UnattendedSettings {
    /// Redmine group whose members are the team.
    pub group_id: Option<u64>,
    /// Team accounts outside that group, such as the bot the sync runs as.
    pub extra_user_ids: Vec<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HttpSettings {
    /// Overrides each client's own pacing when set.
    pub cooldown_ms: Option<u64>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            cooldown_ms: None,
            timeout_secs: default_timeout_secs(),
            retry_attempts: sumac_api::retry::DEFAULT_RETRY_ATTEMPTS,
            retry_backoff_ms: sumac_api::retry::DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl HttpSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            base_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub auth: AuthSettings,
    pub sync: SyncSettings,
    pub fields: FieldSettings,
    pub spellcheck: SpellcheckSettings,
    pub unattended: UnattendedSettings,
    pub http: HttpSettings,
}

impl Settings {
    /// Applies `SUMAC_*` overrides; `lookup` is `std::env::var` outside tests.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(token) = non_empty("SUMAC_HARVEST_TOKEN") {
            self.auth.harvest.token = token;
        }
        if let Some(account) = non_empty("SUMAC_HARVEST_ACCOUNT") {
            self.auth.harvest.account_id = account;
        }
        if let Some(url) = non_empty("SUMAC_REDMINE_URL") {
            self.auth.redmine.url = url;
        }
        if let Some(key) = non_empty("SUMAC_REDMINE_APIKEY") {
            self.auth.redmine.api_key = key;
        }
        if let Some(webhook) = non_empty("SUMAC_SLACK_WEBHOOK_URL") {
            self.auth.slack.webhook_url = Some(webhook);
        }
        if let Some(webhook) = non_empty("SUMAC_SLACK_NOTIFY_WEBHOOK_URL") {
            self.auth.slack.notify_webhook_url = Some(webhook);
        }
        if let Some(exclude) = non_empty("SUMAC_SYNC_PROJECTS_EXCLUDE") {
            self.sync.projects.exclude = exclude
                .split(',')
                .filter_map(|id| id.trim().parse().ok())
                .collect();
        }
    }

    /// Fails on the first missing credential.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.auth.harvest.token, "auth.harvest.token"),
            (&self.auth.harvest.account_id, "auth.harvest.account_id"),
            (&self.auth.redmine.url, "auth.redmine.url"),
            (&self.auth.redmine.api_key, "auth.redmine.api_key"),
        ];
        for (value, name) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }
        Ok(())
    }

    pub fn redmine_config(&self) -> RedmineConfig {
        let mut config = RedmineConfig::new(&self.auth.redmine.url, &self.auth.redmine.api_key)
            .with_timeout(self.http.timeout())
            .with_retry(self.http.retry_policy());
        if let Some(cooldown) = self.http.cooldown_ms {
            config = config.with_cooldown(Duration::from_millis(cooldown));
        }
        config
    }

    pub fn harvest_config(&self) -> HarvestConfig {
        let mut config = HarvestConfig::new(&self.auth.harvest.token, &self.auth.harvest.account_id)
            .with_timeout(self.http.timeout())
            .with_retry(self.http.retry_policy());
        if let Some(base_url) = &self.auth.harvest.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(cooldown) = self.http.cooldown_ms {
            config = config.with_cooldown(Duration::from_millis(cooldown));
        }
        config
    }

    pub fn map_fields(&self) -> MapFields {
        MapFields {
            project_source_ids: self.fields.project_source_ids.clone(),
            user_source_id: self.fields.user_source_id.clone(),
            user_chat_handle: self.fields.user_chat_handle.clone(),
        }
    }

    /// Run options from the file; command-line flags are layered on by the caller.
    pub fn sync_options(&self, range: DateRange) -> SyncOptions {
        let set = |ids: &[u64]| ids.iter().copied().collect::<BTreeSet<u64>>();
        let mut options = SyncOptions::new(range);
        options.strict = self.sync.strict;
        options.billable_only = self.sync.billable_only;
        options.activity_id = self.sync.activity_id;
        options.source_id_field = self.fields.time_entry_source_id;
        options.excluded_projects = set(&self.sync.projects.exclude);
        options.spell_check_only = set(&self.sync.projects.spell_check_only);
        options.debug_projects = set(&self.sync.projects.debug_projects);
        options.dont_spell_check_clients = set(&self.sync.clients.dont_spell_check);
        options.fallback_issues = self.sync.fallback_issues.clone();
        options
    }
}

/// Loads and saves [`Settings`] as JSON.
pub struct ConfigManager {
    path: PathBuf,
    explicit: bool,
}

impl ConfigManager {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            explicit: true,
        }
    }

    /// `explicit` when given; otherwise the platform config dir if a file exists there, else
    /// `./config.json`.
    pub fn locate(explicit: Option<PathBuf>) -> Self {
        if let Some(path) = explicit {
            return Self::at(path);
        }
        let platform = platform_config_path();
        let path = match platform {
            Some(path) if path.exists() => path,
            _ => PathBuf::from(CONFIG_FILE_NAME),
        };
        Self {
            path,
            explicit: false,
        }
    }

    /// Platform config path, for writing a fresh config.
    pub fn platform() -> Result<Self, ConfigError> {
        platform_config_path()
            .map(|path| Self {
                path,
                explicit: false,
            })
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file. A missing file is only an error when its path was given explicitly.
    pub fn load(&self) -> Result<Settings, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if self.explicit {
                    return Err(ConfigError::NotFound(self.path.clone()));
                }
                log::debug!("No config file at {}, using defaults", self.path.display());
                return Ok(Settings::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// File settings with environment overrides applied, validated.
    pub fn load_with_env<F>(&self, lookup: F) -> Result<Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = self.load()?;
        settings.apply_env(lookup);
        settings.validate()?;
        Ok(settings)
    }

    /// Persists settings, creating parent directories when needed.
    pub fn save(&self, settings: &Settings) -> Result<(), io::Error> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

fn platform_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "sumac", "sumac")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
