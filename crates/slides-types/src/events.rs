use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Tables whose row changes are pushed over the realtime feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Presentations,
    Slides,
    PresentationUsers,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Presentations => "presentations",
            Self::Slides => "slides",
            Self::PresentationUsers => "presentation_users",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "presentations" => Some(Self::Presentations),
            "slides" => Some(Self::Slides),
            "presentation_users" => Some(Self::PresentationUsers),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change inside one presentation. Carries no row data: receivers
/// re-fetch the affected collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub presentation_id: Uuid,
}

/// One frame of the Phoenix channel protocol spoken by the realtime service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// Payload of a `postgres_changes` push.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresChangesPayload {
    pub data: PostgresChange,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresChange {
    pub table: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
}

impl PostgresChange {
    /// Presentation the changed row belongs to. Deletes usually carry only
    /// the primary key, so callers pass the subscribed presentation as a
    /// fallback.
    pub fn presentation_id(&self) -> Option<Uuid> {
        [self.record.as_ref(), self.old_record.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|row| row.get("presentation_id"))
            .filter_map(|v| v.as_str())
            .find_map(|s| s.parse().ok())
    }

    pub fn into_event(self, fallback: Uuid) -> Option<ChangeEvent> {
        let table = Table::parse(&self.table)?;
        Some(ChangeEvent {
            table,
            kind: self.kind,
            presentation_id: self.presentation_id().unwrap_or(fallback),
        })
    }
}
