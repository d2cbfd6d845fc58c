// Venmo Ledger - Core Library
// Harvests payment notifications from an inbox into an append-only ledger

pub mod config;
pub mod error;
pub mod extractor;
pub mod gmail;
pub mod ledger;
pub mod payment;
pub mod processed;
pub mod reconcile;
pub mod source;
pub mod timestamp;

// Re-export commonly used types
pub use config::{Config, LedgerBackend};
pub use error::{ConfigError, LedgerError, SourceError};
pub use extractor::{DirectionRule, MemoRule, PaymentExtractor};
pub use gmail::GmailSource;
pub use ledger::{CsvLedger, LedgerRecord, LedgerSink, SqliteLedger, LEDGER_HEADER};
pub use payment::{Direction, OccurredAt, Payment};
pub use processed::{ProcessedIdSet, ProcessedIdStore};
pub use reconcile::{CycleReport, LoopState, ReconciliationLoop, RunMode, RunSummary};
pub use source::{BodyPart, FilterCriteria, FullMessage, MessageSource, MessageStub};
pub use timestamp::resolve_timestamp;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
