use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Tag selecting which delivery handler an outbox row goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxKind {
    Book,
    Author,
}

impl OutboxKind {
    pub const ALL: [OutboxKind; 2] = [OutboxKind::Book, OutboxKind::Author];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxKind::Book => "book",
            OutboxKind::Author => "author",
        }
    }
}

impl fmt::Display for OutboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised value `{0}`")]
pub struct ParseTagError(pub String);

impl FromStr for OutboxKind {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "book" => Ok(OutboxKind::Book),
            "author" => Ok(OutboxKind::Author),
            other => Err(ParseTagError(other.to_string())),
        }
    }
}

/// Created -> InProgress -> Success is the only forward path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Created,
    InProgress,
    Success,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Created => "CREATED",
            OutboxStatus::InProgress => "IN_PROGRESS",
            OutboxStatus::Success => "SUCCESS",
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(OutboxStatus::Created),
            "IN_PROGRESS" => Ok(OutboxStatus::InProgress),
            "SUCCESS" => Ok(OutboxStatus::Success),
            other => Err(ParseTagError(other.to_string())),
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct OutboxRow {
    pub idempotency_key: String,
    pub kind: String,
    pub payload: Vec<u8>,
    pub status: String,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted outbox record.
///
/// `kind` is kept as the raw stored tag; resolving it to a handler is the
/// dispatcher's job, and an unknown tag must only fail that one message.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub idempotency_key: String,
    pub kind: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = sqlx::Error;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OutboxStatus>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(OutboxMessage {
            idempotency_key: row.idempotency_key,
            kind: row.kind,
            payload: row.payload,
            status,
            trace_id: row.trace_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A business entity that is announced through the outbox.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: OutboxKind;

    fn id(&self) -> Uuid;

    /// Key for the creation event: `<kind>_<id>`.
    fn creation_key(&self) -> String {
        format!("{}_{}", Self::KIND, self.id())
    }

    /// Key for a change event. The version keeps successive updates from
    /// collapsing into the creation row.
    fn update_key(&self, version: DateTime<Utc>) -> String {
        format!("{}_{}_{}", Self::KIND, self.id(), version.timestamp_micros())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Author {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Author {
    const KIND: OutboxKind = OutboxKind::Author;

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: Uuid,
    pub name: String,
    pub author_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Book {
    const KIND: OutboxKind = OutboxKind::Book;

    fn id(&self) -> Uuid {
        self.id
    }
}
