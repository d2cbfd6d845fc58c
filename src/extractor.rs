// 🔎 Payment Extractor - Free text → typed Payment
// Rules as data: ordered lists, first match wins

use crate::payment::{Direction, Payment};
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;

// Name: one or more capitalized words. Amount: digits with an optional
// two-digit fraction; the trailing group refuses longer fractions and
// thousands separators instead of silently truncating them.
const NAME: &str = r"([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)";
const AMOUNT: &str = r"\$(\d+(?:\.\d{2})?)(?:[^\d.,]|[.,](?:\D|$)|$)";

// ============================================================================
// DIRECTION RULES
// ============================================================================

/// One `(predicate, constructor)` pair: a pattern capturing name and amount,
/// plus the sign to apply when it matches.
#[derive(Debug, Clone)]
pub struct DirectionRule {
    pub id: String,
    pattern: Regex,
    direction: Direction,
}

impl DirectionRule {
    /// Pattern must have the name in group 1 and the amount in group 2
    pub fn new(id: &str, pattern: &str, direction: Direction) -> Result<Self, regex::Error> {
        Ok(DirectionRule {
            id: id.to_string(),
            pattern: Regex::new(pattern)?,
            direction,
        })
    }

    /// Returns a payment only when both name and amount were captured
    pub fn apply(&self, text: &str) -> Option<Payment> {
        let caps = self.pattern.captures(text)?;
        let name = caps.get(1)?.as_str();
        let amount = parse_amount(caps.get(2)?.as_str())?;

        let signed = match self.direction {
            Direction::Incoming => amount,
            Direction::Outgoing => -amount,
        };

        Payment::new(name, signed)
    }
}

/// `"12"` or `"12.50"`; anything else is not an amount
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let (whole, fraction) = match raw.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (raw, None),
    };

    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if let Some(f) = fraction {
        if f.len() != 2 || !f.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }

    Decimal::from_str(raw).ok()
}

// ============================================================================
// MEMO RULES
// ============================================================================

/// A pattern whose first capture group is a memo candidate.
#[derive(Debug, Clone)]
pub struct MemoRule {
    pub id: String,
    pattern: Regex,
}

impl MemoRule {
    pub fn new(id: &str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(MemoRule {
            id: id.to_string(),
            pattern: Regex::new(pattern)?,
        })
    }

    /// First candidate of this rule, if it survives the boilerplate filter
    pub fn apply(&self, text: &str) -> Option<String> {
        let caps = self.pattern.captures(text)?;
        let candidate = caps.get(1)?.as_str().trim();

        if is_plausible_memo(candidate) {
            Some(candidate.to_string())
        } else {
            None
        }
    }
}

fn url_scheme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:[a-z][a-z0-9+.\-]*://|mailto:|www\.)").expect("invalid url regex")
    })
}

/// Empty, one-character and link-looking candidates come from footers
fn is_plausible_memo(candidate: &str) -> bool {
    candidate.chars().count() > 1 && !url_scheme_re().is_match(candidate)
}

// ============================================================================
// EXTRACTOR
// ============================================================================

fn default_direction_rules() -> &'static [DirectionRule] {
    static RULES: OnceLock<Vec<DirectionRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            // Incoming first: quoted replies can contain both phrasings
            DirectionRule::new(
                "incoming",
                &format!(r"{}\s+paid you\s+{}", NAME, AMOUNT),
                Direction::Incoming,
            )
            .expect("invalid incoming regex"),
            DirectionRule::new(
                "outgoing",
                &format!(r"You paid\s+{}\s+{}", NAME, AMOUNT),
                Direction::Outgoing,
            )
            .expect("invalid outgoing regex"),
        ]
    })
}

fn default_memo_rules() -> &'static [MemoRule] {
    static RULES: OnceLock<Vec<MemoRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            MemoRule::new("quoted", "[\"\u{201c}]([^\"\u{201d}]+)[\"\u{201d}]")
                .expect("invalid quoted memo regex"),
            MemoRule::new("dash", "[-\u{2013}\u{2014}]\\s*(.+?)(?:\n|$)")
                .expect("invalid dash memo regex"),
        ]
    })
}

/// PaymentExtractor - deterministic, side-effect free.
///
/// Direction rules are tried in order and the first one producing a
/// payment wins. Memo rules are tried independently, also in order.
#[derive(Debug, Clone)]
pub struct PaymentExtractor {
    direction_rules: Vec<DirectionRule>,
    memo_rules: Vec<MemoRule>,
}

impl PaymentExtractor {
    /// Extractor for the Venmo notification template
    pub fn new() -> Self {
        PaymentExtractor::from_rules(
            default_direction_rules().to_vec(),
            default_memo_rules().to_vec(),
        )
    }

    /// Create extractor from explicit rule lists (order = priority)
    pub fn from_rules(direction_rules: Vec<DirectionRule>, memo_rules: Vec<MemoRule>) -> Self {
        PaymentExtractor {
            direction_rules,
            memo_rules,
        }
    }

    /// Raw message text → zero or one payment, memo attached when found
    pub fn extract(&self, raw_text: &str) -> Option<Payment> {
        let payment = self
            .direction_rules
            .iter()
            .find_map(|rule| rule.apply(raw_text))?;

        Some(payment.with_memo(self.extract_memo(raw_text)))
    }

    pub fn extract_memo(&self, raw_text: &str) -> Option<String> {
        self.memo_rules.iter().find_map(|rule| rule.apply(raw_text))
    }

    pub fn rule_count(&self) -> usize {
        self.direction_rules.len() + self.memo_rules.len()
    }
}

impl Default for PaymentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
