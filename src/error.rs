use thiserror::Error;

/// Failures talking to the inbox. All of them are transient from the
/// loop's point of view: the next cycle simply tries again.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Inbox API returned {status} for {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("Could not decode message {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("Message not found: {0}")]
    NotFound(String),
}

/// Failures appending to the ledger destination
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Invalid environment-sourced configuration
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{key} must be a positive integer number of seconds, got {value:?}")]
    InvalidInterval { key: String, value: String },

    #[error("Unknown ledger backend {0:?} (expected \"csv\" or \"sqlite\")")]
    UnknownBackend(String),

    #[error("Missing required setting: {0}")]
    Missing(String),
}
