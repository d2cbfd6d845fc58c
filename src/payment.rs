// 💸 Payment Model - One reconstructed financial event
// Direction lives in the sign of the amount, nothing else

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Format used for every timestamp that reaches the ledger
pub const LEDGER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// OCCURRED AT
// ============================================================================

/// When a payment happened, as precisely as the message let us know.
///
/// - `Zoned`: parsed from the `Date` header, carries the sender's offset
/// - `Local`: derived from the server receipt time, interpreted in local time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccurredAt {
    Zoned(DateTime<FixedOffset>),
    Local(NaiveDateTime),
}

impl OccurredAt {
    /// Wall-clock time in the instant's own offset
    pub fn wall_clock(&self) -> NaiveDateTime {
        match self {
            OccurredAt::Zoned(dt) => dt.naive_local(),
            OccurredAt::Local(naive) => *naive,
        }
    }

    /// Ledger representation: `2024-03-20 14:05:00`
    pub fn format(&self) -> String {
        self.wall_clock().format(LEDGER_TIME_FORMAT).to_string()
    }
}

// ============================================================================
// DIRECTION
// ============================================================================

/// Read-only view of the amount's sign, used for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

// ============================================================================
// PAYMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub counterparty_name: String,

    /// Positive = received, negative = sent. Never zero.
    pub signed_amount: Decimal,

    pub occurred_at: Option<OccurredAt>,

    pub memo: Option<String>,
}

impl Payment {
    /// Build a payment once both name and amount were identified.
    ///
    /// Returns `None` for an empty name or a zero amount so an invalid
    /// payment can never exist.
    pub fn new(counterparty_name: impl Into<String>, signed_amount: Decimal) -> Option<Self> {
        let counterparty_name = counterparty_name.into();
        if counterparty_name.trim().is_empty() || signed_amount.is_zero() {
            return None;
        }

        Some(Payment {
            counterparty_name,
            signed_amount,
            occurred_at: None,
            memo: None,
        })
    }

    /// Builder pattern: attach a timestamp
    pub fn with_occurred_at(mut self, occurred_at: Option<OccurredAt>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Builder pattern: attach a memo
    pub fn with_memo(mut self, memo: Option<String>) -> Self {
        self.memo = memo;
        self
    }

    pub fn direction(&self) -> Direction {
        if self.signed_amount.is_sign_negative() {
            Direction::Outgoing
        } else {
            Direction::Incoming
        }
    }

    pub fn is_outgoing(&self) -> bool {
        self.direction() == Direction::Outgoing
    }

    /// Magnitude of the amount, regardless of direction
    pub fn magnitude(&self) -> Decimal {
        self.signed_amount.abs()
    }

    /// One-line human summary used in logs
    pub fn summary(&self) -> String {
        let memo = self
            .memo
            .as_ref()
            .map(|m| format!(" - \"{}\"", m))
            .unwrap_or_default();

        match self.direction() {
            Direction::Incoming => format!(
                "{} paid you ${:.2}{}",
                self.counterparty_name,
                self.magnitude(),
                memo
            ),
            Direction::Outgoing => format!(
                "you paid {} ${:.2}{}",
                self.counterparty_name,
                self.magnitude(),
                memo
            ),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
