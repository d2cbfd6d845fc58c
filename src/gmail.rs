// 📡 Gmail Source - REST adapter for the MessageSource trait
// Auth is an opaque bearer token; refreshing it is someone else's job

use crate::error::SourceError;
use crate::source::{BodyPart, FilterCriteria, FullMessage, Header, MessageSource, MessageStub};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageStub>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub snippet: String,
    /// Milliseconds since epoch, sent as a decimal string
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: RawPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPayload {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<RawHeader>,
    #[serde(default)]
    pub body: RawBody,
    #[serde(default)]
    pub parts: Vec<RawPayload>,
}

#[derive(Debug, Deserialize)]
pub struct RawHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawBody {
    pub data: Option<String>,
}

// ============================================================================
// DECODING
// ============================================================================

/// URL-safe base64 with or without padding → text (lossy UTF-8)
pub fn decode_body(id: &str, data: &str) -> Result<String, SourceError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| SourceError::Decode {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// A body that fails to decode counts as empty, so one broken part
/// cannot hide the readable ones from body resolution.
fn decode_optional(id: &str, body: &RawBody) -> Option<String> {
    let data = body.data.as_deref().filter(|d| !d.is_empty())?;
    match decode_body(id, data) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(message_id = %id, error = %e, "Skipping undecodable body");
            None
        }
    }
}

impl RawMessage {
    /// Wire message → FullMessage with decoded payloads
    pub fn into_full_message(self) -> FullMessage {
        let id = self.id;

        let mut body_parts = Vec::with_capacity(self.payload.parts.len());
        for part in &self.payload.parts {
            let payload = decode_optional(&id, &part.body).unwrap_or_default();
            body_parts.push(BodyPart::new(part.mime_type.clone(), payload));
        }

        let payload = decode_optional(&id, &self.payload.body);

        let headers = self
            .payload
            .headers
            .into_iter()
            .map(|h| Header {
                name: h.name,
                value: h.value,
            })
            .collect();

        // An unparseable receipt time is just a missing one
        let internal_date = self
            .internal_date
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok());

        FullMessage {
            id,
            headers,
            body_parts,
            payload,
            snippet: self.snippet,
            internal_date,
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct GmailSource {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
}

impl GmailSource {
    pub fn new(api_base: &str, access_token: &str) -> Self {
        GmailSource {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/gmail/v1/users/me/{}", self.api_base, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let url = self.endpoint(path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                endpoint: path.to_string(),
            });
        }

        Ok(response.json::<T>().await?)
    }

    pub async fn labels(&self) -> Result<Vec<Label>, SourceError> {
        let list: LabelList = self.get_json("labels", &[]).await?;
        Ok(list.labels)
    }

    /// Startup check: credentials work. Fails the process when they don't.
    pub async fn check_access(&self) -> Result<usize, SourceError> {
        Ok(self.labels().await?.len())
    }

    async fn resolve_label_id(&self, label_name: &str) -> Result<Option<String>, SourceError> {
        Ok(find_label_id(&self.labels().await?, label_name))
    }
}

/// Case-insensitive label name → id
pub fn find_label_id(labels: &[Label], label_name: &str) -> Option<String> {
    labels
        .iter()
        .find(|l| l.name.to_lowercase() == label_name.to_lowercase())
        .map(|l| l.id.clone())
}

#[async_trait]
impl MessageSource for GmailSource {
    async fn list_stubs(&self, filter: &FilterCriteria) -> Result<Vec<MessageStub>, SourceError> {
        let label_id = match self.resolve_label_id(&filter.label).await? {
            Some(id) => id,
            None => {
                warn!(label = %filter.label, "Label not found in inbox");
                return Ok(Vec::new());
            }
        };

        let query = filter.query();
        let mut stubs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![("labelIds", label_id.as_str()), ("q", query.as_str())];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let page: MessageList = self.get_json("messages", &params).await?;
            stubs.extend(page.messages);

            match page.next_page_token {
                Some(token) if !token.is_empty() => {
                    debug!(count = stubs.len(), "Fetched page, getting next one");
                    page_token = Some(token);
                }
                _ => break,
            }
        }

        info!(count = stubs.len(), label = %filter.label, "Listed messages");
        Ok(stubs)
    }

    async fn fetch_full(&self, id: &str) -> Result<FullMessage, SourceError> {
        let raw: RawMessage = self
            .get_json(&format!("messages/{}", id), &[("format", "full")])
            .await?;
        Ok(raw.into_full_message())
    }
}

// ============================================================================
// TESTS
// ============================================================================
