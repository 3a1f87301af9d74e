//! Sync queue rows.
//!
//! The sync queue is the write-ahead record of work owed to the remote API.
//! Every pending local write produces one [`SyncQueueItem`]; the retry
//! executor mutates it on each attempt until it reaches a terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of write a sync queue row carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    /// Record was created locally.
    Create,
    /// Record was updated locally.
    Update,
    /// Record was deleted locally.
    Delete,
}

impl SyncOperation {
    /// Returns the lowercase name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncOperation::Create),
            "update" => Ok(SyncOperation::Update),
            "delete" => Ok(SyncOperation::Delete),
            other => Err(format!("unknown sync operation: {other}")),
        }
    }
}

/// Lifecycle status of a sync queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Waiting to be pushed (possibly after a backoff delay).
    Pending,
    /// Successfully pushed. Terminal.
    Synced,
    /// Retries exhausted or rejected permanently. Terminal.
    Dead,
}

impl SyncStatus {
    /// Returns true for `Synced` and `Dead`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Synced | SyncStatus::Dead)
    }

    /// Returns the lowercase name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "dead" => Ok(SyncStatus::Dead),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// State of client/server identifier reconciliation for a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdNegotiationStatus {
    /// The record's identifier is authoritative (or needs no negotiation).
    Complete,
    /// Waiting for the server to assign an identifier.
    Pending,
    /// The create was rejected permanently; the temporary id remains in use.
    Failed,
}

/// A durable pending or historical sync operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Row identifier, assigned by the store on insert.
    pub id: u64,
    /// Model type name of the record.
    pub model_type: String,
    /// Identifier of the record (temporary until negotiation completes).
    pub model_id: String,
    /// Client-generated id used before the server assigned one.
    pub temporary_client_id: Option<String>,
    /// Identifier negotiation state.
    pub id_negotiation: IdNegotiationStatus,
    /// Serialized record snapshot, or the delete key.
    pub payload: Value,
    /// Kind of write.
    pub operation: SyncOperation,
    /// Number of failed attempts so far.
    pub attempt_count: u32,
    /// Error text of the most recent failure.
    pub last_error: Option<String>,
    /// When the row becomes due again. `None` means ready now (or exhausted).
    pub next_retry_at: Option<DateTime<Utc>>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
    /// When the row was last modified.
    pub updated_at: DateTime<Utc>,
    /// Caller-supplied token, unique across the table.
    pub idempotency_key: Option<String>,
    /// Lifecycle status.
    pub status: SyncStatus,
    /// Request headers preserved across retries.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Adapter-specific extras preserved across retries.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl SyncQueueItem {
    /// Creates a new pending row. The id is assigned by the store.
    pub fn new(
        model_type: impl Into<String>,
        model_id: impl Into<String>,
        operation: SyncOperation,
        payload: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            model_type: model_type.into(),
            model_id: model_id.into(),
            temporary_client_id: None,
            id_negotiation: IdNegotiationStatus::Complete,
            payload,
            operation,
            attempt_count: 0,
            last_error: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
            idempotency_key: None,
            status: SyncStatus::Pending,
            headers: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Marks the row as carrying a temporary client id awaiting negotiation.
    #[must_use]
    pub fn with_temporary_id(mut self, temporary_id: impl Into<String>) -> Self {
        self.temporary_client_id = Some(temporary_id.into());
        self.id_negotiation = IdNegotiationStatus::Pending;
        self
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Sets the preserved request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the preserved extras.
    #[must_use]
    pub fn with_extra(mut self, extra: BTreeMap<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    /// Returns true if the row is pending and due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == SyncStatus::Pending && self.next_retry_at.map_or(true, |at| at <= now)
    }

    /// Returns the key under which the executor submits this row.
    ///
    /// Derived from the record id and operation so that the same logical
    /// write is never in flight twice.
    pub fn task_key(&self) -> String {
        format!("sync:{}:{}:{}", self.model_type, self.model_id, self.operation)
    }
}
