use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CSV_PATH: &str = "payments.csv";
pub const DEFAULT_LABEL: &str = "Venmo";
pub const DEFAULT_SENDER: &str = "venmo@venmo.com";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_PROCESSED_IDS_FILE: &str = "processed_messages.json";
pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Csv,
    Sqlite,
}

impl LedgerBackend {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "csv" => Ok(LedgerBackend::Csv),
            "sqlite" => Ok(LedgerBackend::Sqlite),
            _ => Err(ConfigError::UnknownBackend(value.to_string())),
        }
    }
}

/// Immutable settings, built once at startup and passed by reference
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ledger_path: PathBuf,
    pub ledger_backend: LedgerBackend,
    pub label: String,
    pub sender: String,
    pub poll_interval: Duration,
    /// `EnvFilter` directives: `LOG_LEVEL` lowercased, else `RUST_LOG`, else `info`
    pub log_filter: String,
    pub processed_ids_path: PathBuf,
    pub access_token: Option<String>,
    pub api_base: String,
}

impl Config {
    /// Read from the process environment (after `.env` was loaded)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests don't touch the real environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let interval_raw = get("POLL_INTERVAL", &DEFAULT_POLL_INTERVAL_SECS.to_string());
        let interval_secs = interval_raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| ConfigError::InvalidInterval {
                key: "POLL_INTERVAL".to_string(),
                value: interval_raw.clone(),
            })?;

        Ok(Config {
            ledger_path: PathBuf::from(get("CSV_PATH", DEFAULT_CSV_PATH)),
            ledger_backend: LedgerBackend::parse(&get("LEDGER_BACKEND", "csv"))?,
            label: get("GMAIL_LABEL", DEFAULT_LABEL),
            sender: get("GMAIL_SENDER", DEFAULT_SENDER),
            poll_interval: Duration::from_secs(interval_secs),
            log_filter: log_filter(&lookup),
            processed_ids_path: PathBuf::from(get(
                "PROCESSED_IDS_FILE",
                DEFAULT_PROCESSED_IDS_FILE,
            )),
            access_token: lookup("GMAIL_ACCESS_TOKEN").filter(|t| !t.trim().is_empty()),
            api_base: get("GMAIL_API_BASE", DEFAULT_API_BASE),
        })
    }

    pub fn require_access_token(&self) -> Result<&str, ConfigError> {
        self.access_token
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("GMAIL_ACCESS_TOKEN".to_string()))
    }
}

fn log_filter<F>(lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    non_empty("LOG_LEVEL")
        .map(|level| level.to_lowercase())
        .or_else(|| non_empty("RUST_LOG"))
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}
