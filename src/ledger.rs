// 📒 Ledger Sink - Append-only tabular output
// CSV by default, SQLite as an alternative destination

use crate::error::LedgerError;
use crate::payment::Payment;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Fixed column order, written once when the destination is created
pub const LEDGER_HEADER: [&str; 5] = ["Name", "Amount IN", "Amount OUT", "Date", "Note"];

// ============================================================================
// LEDGER RECORD
// ============================================================================

/// On-disk projection of a Payment: direction is split into two columns,
/// each holding a magnitude. Empty strings stand for "not applicable".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Amount IN")]
    pub amount_in: String,

    #[serde(rename = "Amount OUT")]
    pub amount_out: String,

    #[serde(rename = "Date")]
    pub date: String,

    #[serde(rename = "Note")]
    pub note: String,
}

impl LedgerRecord {
    pub fn as_row(&self) -> [&str; 5] {
        [
            self.name.as_str(),
            self.amount_in.as_str(),
            self.amount_out.as_str(),
            self.date.as_str(),
            self.note.as_str(),
        ]
    }
}

impl From<&Payment> for LedgerRecord {
    fn from(payment: &Payment) -> Self {
        let magnitude = format!("{:.2}", payment.magnitude());
        let (amount_in, amount_out) = if payment.is_outgoing() {
            (String::new(), magnitude)
        } else {
            (magnitude, String::new())
        };

        LedgerRecord {
            name: payment.counterparty_name.clone(),
            amount_in,
            amount_out,
            date: payment.occurred_at.map(|t| t.format()).unwrap_or_default(),
            note: payment.memo.clone().unwrap_or_default(),
        }
    }
}

// ============================================================================
// SINK TRAIT
// ============================================================================

/// LedgerSink - append rows in the given order, never rewrite old ones
pub trait LedgerSink {
    fn append(&mut self, records: &[LedgerRecord]) -> Result<usize, LedgerError>;

    /// Where the rows go, for log lines
    fn describe(&self) -> String;
}

// ============================================================================
// CSV LEDGER
// ============================================================================

pub struct CsvLedger {
    path: PathBuf,
}

impl CsvLedger {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        CsvLedger {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// A zero-length file counts as fresh so it still gets a header
    fn needs_header(&self) -> bool {
        match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        }
    }
}

impl LedgerSink for CsvLedger {
    fn append(&mut self, records: &[LedgerRecord]) -> Result<usize, LedgerError> {
        if records.is_empty() {
            return Ok(0);
        }

        let needs_header = self.needs_header();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer.write_record(LEDGER_HEADER)?;
        }
        for record in records {
            writer.write_record(record.as_row())?;
        }
        writer.flush()?;

        Ok(records.len())
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}

// ============================================================================
// SQLITE LEDGER
// ============================================================================

/// Same append contract on a SQLite table; creating the table plays the
/// role of the header row.
pub struct SqliteLedger {
    conn: Connection,
    label: String,
}

impl SqliteLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let conn = Connection::open(path.as_ref())?;
        Ok(SqliteLedger {
            conn,
            label: format!("sqlite:{}", path.as_ref().display()),
        })
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Ok(SqliteLedger {
            conn: Connection::open_in_memory()?,
            label: "sqlite::memory:".to_string(),
        })
    }

    fn ensure_table(&self) -> Result<(), LedgerError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS payments (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                amount_in TEXT,
                amount_out TEXT,
                date TEXT,
                note TEXT
            )",
            [],
        )?;
        Ok(())
    }

    /// All rows in insertion order
    pub fn rows(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.ensure_table()?;

        let mut stmt = self.conn.prepare(
            "SELECT name, amount_in, amount_out, date, note FROM payments ORDER BY row_id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(LedgerRecord {
                    name: row.get(0)?,
                    amount_in: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    amount_out: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    date: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    note: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl LedgerSink for SqliteLedger {
    fn append(&mut self, records: &[LedgerRecord]) -> Result<usize, LedgerError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.ensure_table()?;

        let tx = self.conn.transaction()?;
        for record in records {
            tx.execute(
                "INSERT INTO payments (name, amount_in, amount_out, date, note)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.name,
                    non_empty(&record.amount_in),
                    non_empty(&record.amount_out),
                    non_empty(&record.date),
                    non_empty(&record.note),
                ],
            )?;
        }
        tx.commit()?;

        Ok(records.len())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

// ============================================================================
// TESTS
// ============================================================================
