//! Local store trait definition.

use crate::change_feed::{ChangeEvent, ChangeFeed};
use crate::error::StoreResult;
use crate::query::Query;
use crate::sync_queue::{SyncOperation, SyncQueueItem, SyncStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace a record.
    Upsert {
        /// Model type of the record.
        model_type: String,
        /// Record identifier.
        id: String,
        /// Record value.
        value: Value,
    },
    /// Replace an existing record with an authoritative copy, unless a
    /// pending sync row other than `except` still targets it.
    ///
    /// No-op if the record is absent or has local changes waiting.
    Reconcile {
        /// Model type of the record.
        model_type: String,
        /// Record identifier.
        id: String,
        /// Authoritative value.
        value: Value,
        /// Pending row that does not count as a local change.
        except: Option<u64>,
    },
    /// Remove a record (no-op if absent).
    Delete {
        /// Model type of the record.
        model_type: String,
        /// Record identifier.
        id: String,
    },
    /// Insert a sync queue row; the store assigns its id.
    InsertSyncItem(SyncQueueItem),
    /// Replace an existing sync queue row.
    UpdateSyncItem(SyncQueueItem),
    /// Remove a sync queue row (no-op if absent).
    DeleteSyncItem(u64),
    /// Fail the batch with [`crate::StoreError::Conflict`] unless the row
    /// still equals this copy.
    ExpectSyncItem(SyncQueueItem),
}

/// An ordered group of mutations applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record upsert.
    pub fn upsert(&mut self, model_type: impl Into<String>, id: impl Into<String>, value: Value) {
        self.ops.push(WriteOp::Upsert {
            model_type: model_type.into(),
            id: id.into(),
            value,
        });
    }

    /// Adds a guarded record refresh. See [`WriteOp::Reconcile`].
    pub fn reconcile(
        &mut self,
        model_type: impl Into<String>,
        id: impl Into<String>,
        value: Value,
        except: Option<u64>,
    ) {
        self.ops.push(WriteOp::Reconcile {
            model_type: model_type.into(),
            id: id.into(),
            value,
            except,
        });
    }

    /// Adds a record delete.
    pub fn delete(&mut self, model_type: impl Into<String>, id: impl Into<String>) {
        self.ops.push(WriteOp::Delete {
            model_type: model_type.into(),
            id: id.into(),
        });
    }

    /// Adds a sync queue insert.
    pub fn insert_sync_item(&mut self, item: SyncQueueItem) {
        self.ops.push(WriteOp::InsertSyncItem(item));
    }

    /// Adds a sync queue update.
    pub fn update_sync_item(&mut self, item: SyncQueueItem) {
        self.ops.push(WriteOp::UpdateSyncItem(item));
    }

    /// Adds a sync queue delete.
    pub fn delete_sync_item(&mut self, id: u64) {
        self.ops.push(WriteOp::DeleteSyncItem(id));
    }

    /// Requires the row to be unchanged since `item` was read.
    pub fn expect_sync_item(&mut self, item: SyncQueueItem) {
        self.ops.push(WriteOp::ExpectSyncItem(item));
    }

    /// Returns the queued operations.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consumes the batch, returning its operations.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    /// Returns true if the batch has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// A foreign-key field that may point at a renamed record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Model type holding the foreign key.
    pub model_type: String,
    /// Field holding the foreign key.
    pub field: String,
}

/// What to do with the sync row that produced an ID rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleItem {
    /// Sync queue row id.
    pub id: u64,
    /// Keep the row as `Synced` instead of deleting it.
    pub retain: bool,
}

/// Replaces a temporary record identifier with an authoritative one.
///
/// Applied atomically: the record's own key, every listed foreign key in
/// other records, and every sync queue row mentioning the old id are
/// rewritten together, or nothing is.
#[derive(Debug, Clone, PartialEq)]
pub struct IdRewrite {
    /// Model type of the renamed record.
    pub model_type: String,
    /// Field holding the record's own id.
    pub id_field: String,
    /// Temporary identifier.
    pub old_id: String,
    /// Authoritative identifier.
    pub new_id: String,
    /// Authoritative record value to store under `new_id`. Ignored if no
    /// record exists under `old_id`. If a pending sync row other than
    /// `settle` still targets the record, the local value is kept instead,
    /// with its id field rewritten.
    pub record: Value,
    /// Foreign keys to rewrite.
    pub references: Vec<Reference>,
    /// Sync row to settle in the same operation.
    pub settle: Option<SettleItem>,
    /// Fail with [`crate::StoreError::Conflict`], touching nothing, unless
    /// this row is unchanged.
    pub expect: Option<SyncQueueItem>,
}

/// Counts of what an [`IdRewrite`] touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteSummary {
    /// Records whose foreign keys were rewritten.
    pub references_updated: usize,
    /// Sync queue rows rewritten.
    pub sync_items_updated: usize,
    /// The local value was kept because newer local changes are pending.
    pub local_kept: bool,
}

/// Filter for listing sync queue rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncItemFilter {
    /// Only rows with this status.
    pub status: Option<SyncStatus>,
    /// Only rows of this model type.
    pub model_type: Option<String>,
    /// Only rows for this record.
    pub model_id: Option<String>,
    /// Only rows with this operation.
    pub operation: Option<SyncOperation>,
}

impl SyncItemFilter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches pending rows for one record.
    pub fn pending_for(model_type: &str, model_id: &str) -> Self {
        Self {
            status: Some(SyncStatus::Pending),
            model_type: Some(model_type.to_string()),
            model_id: Some(model_id.to_string()),
            operation: None,
        }
    }

    /// Restricts to one status.
    #[must_use]
    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restricts to one model type.
    #[must_use]
    pub fn with_model_type(mut self, model_type: impl Into<String>) -> Self {
        self.model_type = Some(model_type.into());
        self
    }

    /// Returns true if `item` satisfies the filter.
    pub fn matches(&self, item: &SyncQueueItem) -> bool {
        self.status.map_or(true, |s| item.status == s)
            && self
                .model_type
                .as_deref()
                .map_or(true, |t| item.model_type == t)
            && self.model_id.as_deref().map_or(true, |id| item.model_id == id)
            && self.operation.map_or(true, |op| item.operation == op)
    }
}

/// A durable local store of per-model records plus the sync queue table.
///
/// Records are JSON objects keyed by `(model_type, id)`. The sync queue
/// enforces two uniqueness constraints:
/// - at most one non-terminal row per `(model_type, model_id, operation)`
/// - `idempotency_key`, when present, is unique across the table
///
/// Every committed record mutation is published on [`LocalStore::changes`].
///
/// # Implementors
///
/// - [`crate::MemoryStore`] - For testing and ephemeral use
/// - [`crate::FileStore`] - JSON snapshot persisted on every commit
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Gets a record by id.
    async fn get(&self, model_type: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Returns the records of a model type matching `query`.
    async fn query(&self, model_type: &str, query: &Query) -> StoreResult<Vec<Value>>;

    /// Applies a batch atomically.
    ///
    /// Returns the ids assigned to inserted sync queue rows, in batch order.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the store untouched, if any operation
    /// violates a sync queue constraint or references a missing row.
    async fn apply(&self, batch: WriteBatch) -> StoreResult<Vec<u64>>;

    /// Renames a record and every reference to it atomically.
    async fn rewrite_id(&self, rewrite: IdRewrite) -> StoreResult<RewriteSummary>;

    /// Returns the change feed.
    fn changes(&self) -> &ChangeFeed;

    /// Gets a sync queue row by id.
    async fn get_sync_item(&self, id: u64) -> StoreResult<Option<SyncQueueItem>>;

    /// Lists sync queue rows matching `filter`, oldest first.
    async fn sync_items(&self, filter: &SyncItemFilter) -> StoreResult<Vec<SyncQueueItem>>;

    /// Lists pending rows due at `now`, oldest first, up to `limit`.
    async fn due_sync_items(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<SyncQueueItem>> {
        let pending = SyncItemFilter::all().with_status(SyncStatus::Pending);
        let mut items = self.sync_items(&pending).await?;
        items.retain(|item| item.is_due(now));
        items.truncate(limit);
        Ok(items)
    }

    /// Deletes synced rows last updated before `before`.
    async fn prune_synced(&self, before: DateTime<Utc>) -> StoreResult<usize>;

    /// Inserts or replaces a record.
    async fn upsert(&self, model_type: &str, id: &str, value: Value) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.upsert(model_type, id, value);
        self.apply(batch).await.map(|_| ())
    }

    /// Deletes a record. Returns true if it existed.
    async fn delete(&self, model_type: &str, id: &str) -> StoreResult<bool> {
        let existed = self.get(model_type, id).await?.is_some();
        let mut batch = WriteBatch::new();
        batch.delete(model_type, id);
        self.apply(batch).await?;
        Ok(existed)
    }

    /// Inserts a sync queue row, returning it with its assigned id.
    async fn insert_sync_item(&self, mut item: SyncQueueItem) -> StoreResult<SyncQueueItem> {
        let mut batch = WriteBatch::new();
        batch.insert_sync_item(item.clone());
        let ids = self.apply(batch).await?;
        item.id = ids.first().copied().unwrap_or_default();
        Ok(item)
    }

    /// Replaces an existing sync queue row.
    async fn update_sync_item(&self, item: &SyncQueueItem) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.update_sync_item(item.clone());
        self.apply(batch).await.map(|_| ())
    }

    /// Deletes a sync queue row. Returns true if it existed.
    async fn delete_sync_item(&self, id: u64) -> StoreResult<bool> {
        let existed = self.get_sync_item(id).await?.is_some();
        let mut batch = WriteBatch::new();
        batch.delete_sync_item(id);
        self.apply(batch).await?;
        Ok(existed)
    }

    /// Subscribes to change events for one model type.
    fn subscribe(&self, model_type: &str) -> broadcast::Receiver<ChangeEvent> {
        self.changes().subscribe(model_type)
    }
}
