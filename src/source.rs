// 📬 Message Source - What the inbox gives us
// Stubs are cheap listings, full messages are fetched one at a time

use crate::error::SourceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Which messages the source should list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCriteria {
    /// Inbox label name, matched case-insensitively
    pub label: String,

    /// Only messages from this address
    pub sender: String,
}

impl FilterCriteria {
    pub fn new(label: impl Into<String>, sender: impl Into<String>) -> Self {
        FilterCriteria {
            label: label.into(),
            sender: sender.into(),
        }
    }

    /// Search query understood by the inbox API
    pub fn query(&self) -> String {
        format!("from:{}", self.sender)
    }
}

/// Minimal message reference returned by a listing call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStub {
    pub id: String,

    #[serde(default, rename = "threadId")]
    pub thread_id: Option<String>,
}

impl MessageStub {
    pub fn new(id: impl Into<String>) -> Self {
        MessageStub {
            id: id.into(),
            thread_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// A body part with its payload already decoded to text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    pub mime_type: String,
    pub payload: String,
}

impl BodyPart {
    pub fn new(mime_type: impl Into<String>, payload: impl Into<String>) -> Self {
        BodyPart {
            mime_type: mime_type.into(),
            payload: payload.into(),
        }
    }
}

/// Full message content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullMessage {
    pub id: String,
    pub headers: Vec<Header>,
    pub body_parts: Vec<BodyPart>,

    /// Top-level payload, used when the message has no parts
    pub payload: Option<String>,

    pub snippet: String,

    /// Server receipt time, milliseconds since epoch
    pub internal_date: Option<i64>,
}

impl FullMessage {
    pub fn new(id: impl Into<String>) -> Self {
        FullMessage {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Builder pattern: add a header
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(Header {
            name: name.to_string(),
            value: value.to_string(),
        });
        self
    }

    /// Builder pattern: add a body part
    pub fn with_part(mut self, part: BodyPart) -> Self {
        self.body_parts.push(part);
        self
    }

    /// Builder pattern: set top-level payload
    pub fn with_payload(mut self, payload: &str) -> Self {
        self.payload = Some(payload.to_string());
        self
    }

    /// Builder pattern: set snippet
    pub fn with_snippet(mut self, snippet: &str) -> Self {
        self.snippet = snippet.to_string();
        self
    }

    /// Builder pattern: set server receipt time
    pub fn with_internal_date(mut self, millis: i64) -> Self {
        self.internal_date = Some(millis);
        self
    }

    /// Case-insensitive header lookup, first occurrence
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Text the extractor should look at.
    ///
    /// First `text/plain` part if there are parts, the top-level payload if
    /// there are none, and the snippet when neither produced any text.
    pub fn body_text(&self) -> &str {
        let resolved = if self.body_parts.is_empty() {
            self.payload.as_deref().unwrap_or("")
        } else {
            self.body_parts
                .iter()
                .find(|p| p.mime_type.eq_ignore_ascii_case("text/plain") && !p.payload.is_empty())
                .map(|p| p.payload.as_str())
                .unwrap_or("")
        };

        if resolved.is_empty() {
            &self.snippet
        } else {
            resolved
        }
    }
}

// ============================================================================
// SOURCE TRAIT
// ============================================================================

/// MessageSource - the inbox as seen by the reconciliation loop
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// All stubs matching the filter, pagination exhausted, in listing order
    async fn list_stubs(&self, filter: &FilterCriteria) -> Result<Vec<MessageStub>, SourceError>;

    /// Full content of one message
    async fn fetch_full(&self, id: &str) -> Result<FullMessage, SourceError>;
}

// ============================================================================
// TESTS
// ============================================================================
