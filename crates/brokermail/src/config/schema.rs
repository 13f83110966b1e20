use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::email::SearchCriteria;
use crate::logging::LogFormat;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Owner of every record this instance writes.
    pub user_id: String,
    /// SQLite file; defaults to `~/.brokermail/data/brokermail.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub log_format: LogFormat,
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    /// Without a classifier, ingested records stay pending.
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    pub username: String,
    #[serde(default)]
    pub auth: MailboxAuth,
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Destination for archive-after-sync; messages are only flagged `\Seen` without one.
    #[serde(default)]
    pub archive_folder: Option<String>,
    /// Only messages on or after this date (`YYYY-MM-DD`).
    #[serde(default)]
    pub since_date: Option<String>,
}

fn default_imap_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

fn default_folder() -> String {
    "INBOX".to_string()
}

impl MailboxConfig {
    pub fn search_criteria(&self) -> Result<SearchCriteria, chrono::ParseError> {
        match self.since_date.as_deref() {
            Some(date) => Ok(SearchCriteria::Since(NaiveDate::parse_from_str(
                date, "%Y-%m-%d",
            )?)),
            None => Ok(SearchCriteria::All),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    Password,
    OAuth2,
}

/// Credential sources, resolved in order: direct value, file, environment variable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailboxAuth {
    #[serde(default, rename = "type")]
    pub auth_type: AuthType,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_file: Option<String>,
    #[serde(default)]
    pub password_env_var: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub access_token_file: Option<String>,
    #[serde(default)]
    pub access_token_env_var: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_messages_per_sync")]
    pub max_messages_per_sync: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub archive_after_sync: bool,
    #[serde(default = "default_chunk_size")]
    pub archive_chunk_size: usize,
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_max_messages_per_sync() -> usize {
    50
}

fn default_chunk_size() -> usize {
    10
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_messages_per_sync: default_max_messages_per_sync(),
            chunk_size: default_chunk_size(),
            archive_after_sync: false,
            archive_chunk_size: default_chunk_size(),
        }
    }
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
}

fn default_min_delay_ms() -> u64 {
    1000
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
        }
    }
}

impl QueueSettings {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_window_ms() -> u64 {
    60_000
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_ms: default_window_ms(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            window: Duration::from_millis(self.window_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// URL the classification request is POSTed to.
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Non-actionable verdicts at or above this confidence are archived unreviewed.
    #[serde(default = "default_auto_archive_confidence")]
    pub auto_archive_confidence: f64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_auto_archive_confidence() -> f64 {
    0.9
}
