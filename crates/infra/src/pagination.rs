//! Opaque compound cursors and page envelopes.
//!
//! Token format: standard base64 of `{"updated_at": RFC3339, "id": string}`.
//! Tokens without an `id`, and bare RFC3339 timestamps, decode as legacy
//! timestamp-only positions.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::store::CursorPosition;

/// Decoded pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub updated_at: DateTime<Utc>,
    pub id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct CursorPayload {
    updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

impl Cursor {
    pub fn new(updated_at: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self {
            updated_at,
            id: Some(id.into()),
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.id.as_deref().is_none_or(str::is_empty)
    }

    pub fn encode(&self) -> String {
        let payload = CursorPayload {
            updated_at: self.updated_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            id: self.id.clone(),
        };
        // serializing two strings cannot fail
        let json = serde_json::to_vec(&payload).unwrap_or_default();
        STANDARD.encode(json)
    }

    pub fn decode(token: &str) -> EngineResult<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(EngineError::invalid_argument("cursor cannot be empty"));
        }

        let from_payload = STANDARD
            .decode(token)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<CursorPayload>(&bytes).ok());

        match from_payload {
            Some(payload) => Ok(Self {
                updated_at: parse_timestamp(&payload.updated_at)?,
                id: payload.id.filter(|id| !id.trim().is_empty()),
            }),
            None => Ok(Self {
                updated_at: parse_timestamp(token)?,
                id: None,
            }),
        }
    }

    pub fn position(&self) -> CursorPosition {
        CursorPosition {
            updated_at: self.updated_at,
            id: self.id.clone(),
        }
    }
}

fn parse_timestamp(raw: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| EngineError::invalid_argument(format!("invalid cursor: {raw}")))
}

/// Allowed page sizes are 15, 25 and 50; anything else means 15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerPage(usize);

impl PerPage {
    pub const DEFAULT: PerPage = PerPage(15);

    pub fn new(requested: Option<usize>) -> Self {
        match requested {
            Some(n @ (15 | 25 | 50)) => PerPage(n),
            _ => Self::DEFAULT,
        }
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for PerPage {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Listing response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub per_page: usize,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl<T> Page<T> {
    pub fn empty(per_page: PerPage) -> Self {
        Self {
            data: Vec::new(),
            per_page: per_page.get(),
            next_cursor: None,
            has_more: false,
            total_count: None,
        }
    }
}
