//! In-memory local store for testing and ephemeral use.

use crate::change_feed::{ChangeEvent, ChangeFeed};
use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::store::{
    IdRewrite, LocalStore, RewriteSummary, SyncItemFilter, WriteBatch, WriteOp,
};
use crate::sync_queue::{IdNegotiationStatus, SyncQueueItem, SyncStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Every table of a store, serializable as one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoreState {
    /// Records by model type, then id.
    pub records: BTreeMap<String, BTreeMap<String, Value>>,
    /// Sync queue rows by id.
    pub sync_queue: BTreeMap<u64, SyncQueueItem>,
    /// Next sync queue row id.
    pub next_sync_id: u64,
}

/// Reverts one applied mutation.
enum Undo {
    Record {
        model_type: String,
        id: String,
        previous: Option<Value>,
    },
    SyncItem {
        id: u64,
        previous: Option<SyncQueueItem>,
    },
    NextSyncId(u64),
}

impl StoreState {
    fn record(&self, model_type: &str, id: &str) -> Option<&Value> {
        self.records.get(model_type).and_then(|table| table.get(id))
    }

    fn put_record(&mut self, model_type: &str, id: &str, value: Value) -> Option<Value> {
        self.records
            .entry(model_type.to_string())
            .or_default()
            .insert(id.to_string(), value)
    }

    fn remove_record(&mut self, model_type: &str, id: &str) -> Option<Value> {
        self.records
            .get_mut(model_type)
            .and_then(|table| table.remove(id))
    }

    fn restore_record(&mut self, model_type: &str, id: &str, previous: Option<Value>) {
        match previous {
            Some(value) => {
                self.put_record(model_type, id, value);
            }
            None => {
                self.remove_record(model_type, id);
            }
        }
    }

    /// Returns true if a pending row other than `except` targets the record.
    fn has_pending(&self, model_type: &str, id: &str, except: Option<u64>) -> bool {
        self.sync_queue.values().any(|item| {
            item.status == SyncStatus::Pending
                && Some(item.id) != except
                && item.model_type == model_type
                && item.model_id == id
        })
    }

    /// Fails unless the stored row equals `expected`.
    fn check_expected(&self, expected: &SyncQueueItem) -> StoreResult<()> {
        match self.sync_queue.get(&expected.id) {
            Some(row) if row == expected => Ok(()),
            _ => Err(StoreError::Conflict { id: expected.id }),
        }
    }

    /// Checks the sync queue uniqueness constraints for `item`.
    fn check_unique(&self, item: &SyncQueueItem) -> StoreResult<()> {
        for other in self.sync_queue.values() {
            if other.id == item.id {
                continue;
            }
            if !item.status.is_terminal()
                && !other.status.is_terminal()
                && other.model_type == item.model_type
                && other.model_id == item.model_id
                && other.operation == item.operation
            {
                return Err(StoreError::unique_violation("model_id+operation"));
            }
            if item.idempotency_key.is_some() && other.idempotency_key == item.idempotency_key {
                return Err(StoreError::unique_violation("idempotency_key"));
            }
        }
        Ok(())
    }

    /// Applies one operation, recording how to undo it.
    fn apply_op(
        &mut self,
        op: WriteOp,
        undo: &mut Vec<Undo>,
        events: &mut Vec<ChangeEvent>,
        inserted: &mut Vec<u64>,
    ) -> StoreResult<()> {
        match op {
            WriteOp::Upsert {
                model_type,
                id,
                value,
            } => {
                if !value.is_object() {
                    return Err(StoreError::invalid_record(
                        &model_type,
                        "record must be a JSON object",
                    ));
                }
                let previous = self.put_record(&model_type, &id, value.clone());
                events.push(if previous.is_some() {
                    ChangeEvent::updated(&model_type, &id, value)
                } else {
                    ChangeEvent::created(&model_type, &id, value)
                });
                undo.push(Undo::Record {
                    model_type,
                    id,
                    previous,
                });
            }
            WriteOp::Reconcile {
                model_type,
                id,
                value,
                except,
            } => {
                if !value.is_object() {
                    return Err(StoreError::invalid_record(
                        &model_type,
                        "record must be a JSON object",
                    ));
                }
                if self.record(&model_type, &id).is_none()
                    || self.has_pending(&model_type, &id, except)
                {
                    return Ok(());
                }
                let previous = self.put_record(&model_type, &id, value.clone());
                events.push(ChangeEvent::updated(&model_type, &id, value));
                undo.push(Undo::Record {
                    model_type,
                    id,
                    previous,
                });
            }
            WriteOp::Delete { model_type, id } => {
                let previous = self.remove_record(&model_type, &id);
                if previous.is_some() {
                    events.push(ChangeEvent::deleted(&model_type, &id));
                    undo.push(Undo::Record {
                        model_type,
                        id,
                        previous,
                    });
                }
            }
            WriteOp::InsertSyncItem(mut item) => {
                undo.push(Undo::NextSyncId(self.next_sync_id));
                self.next_sync_id += 1;
                item.id = self.next_sync_id;
                self.check_unique(&item)?;
                inserted.push(item.id);
                undo.push(Undo::SyncItem {
                    id: item.id,
                    previous: None,
                });
                self.sync_queue.insert(item.id, item);
            }
            WriteOp::UpdateSyncItem(mut item) => {
                if !self.sync_queue.contains_key(&item.id) {
                    return Err(StoreError::SyncItemNotFound { id: item.id });
                }
                self.check_unique(&item)?;
                item.updated_at = Utc::now();
                let previous = self.sync_queue.insert(item.id, item.clone());
                undo.push(Undo::SyncItem {
                    id: item.id,
                    previous,
                });
            }
            WriteOp::DeleteSyncItem(id) => {
                if let Some(previous) = self.sync_queue.remove(&id) {
                    undo.push(Undo::SyncItem {
                        id,
                        previous: Some(previous),
                    });
                }
            }
            WriteOp::ExpectSyncItem(expected) => self.check_expected(&expected)?,
        }
        Ok(())
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Record {
                    model_type,
                    id,
                    previous,
                } => self.restore_record(&model_type, &id, previous),
                Undo::SyncItem { id, previous } => match previous {
                    Some(item) => {
                        self.sync_queue.insert(id, item);
                    }
                    None => {
                        self.sync_queue.remove(&id);
                    }
                },
                Undo::NextSyncId(next) => self.next_sync_id = next,
            }
        }
    }

    /// Applies a batch all-or-nothing, returning inserted row ids and events.
    pub(crate) fn apply_batch(
        &mut self,
        batch: WriteBatch,
    ) -> StoreResult<(Vec<u64>, Vec<ChangeEvent>)> {
        let mut undo = Vec::new();
        let mut events = Vec::new();
        let mut inserted = Vec::new();

        for op in batch.into_ops() {
            if let Err(e) = self.apply_op(op, &mut undo, &mut events, &mut inserted) {
                self.rollback(undo);
                return Err(e);
            }
        }

        Ok((inserted, events))
    }

    /// Renames a record and every reference to it.
    ///
    /// Validation happens before any mutation, so failure leaves the state
    /// untouched.
    pub(crate) fn rewrite_id(
        &mut self,
        rewrite: IdRewrite,
    ) -> StoreResult<(RewriteSummary, Vec<ChangeEvent>)> {
        let IdRewrite {
            model_type,
            id_field,
            old_id,
            new_id,
            record,
            references,
            settle,
            expect,
        } = rewrite;

        if !record.is_object() {
            return Err(StoreError::invalid_record(
                &model_type,
                "record must be a JSON object",
            ));
        }
        if let Some(expected) = &expect {
            self.check_expected(expected)?;
        }
        if let Some(settle) = settle {
            if !self.sync_queue.contains_key(&settle.id) {
                return Err(StoreError::SyncItemNotFound { id: settle.id });
            }
        }

        let keep_local = self.has_pending(&model_type, &old_id, settle.map(|s| s.id));
        let mut summary = RewriteSummary::default();
        let mut events = Vec::new();

        // A record deleted locally while its create was in flight stays deleted.
        let local = if old_id != new_id {
            self.remove_record(&model_type, &old_id)
        } else {
            self.record(&model_type, &old_id).cloned()
        };
        if let Some(mut local) = local {
            summary.local_kept = keep_local;
            let value = if keep_local {
                local[&id_field] = Value::String(new_id.clone());
                local
            } else {
                record
            };
            self.put_record(&model_type, &new_id, value.clone());
            let renamed = ChangeEvent::updated(&model_type, &new_id, value);
            events.push(if old_id != new_id {
                renamed.with_previous_id(&old_id)
            } else {
                renamed
            });
        }

        for reference in &references {
            let Some(table) = self.records.get_mut(&reference.model_type) else {
                continue;
            };
            for (id, value) in table.iter_mut() {
                if value.get(&reference.field).and_then(Value::as_str) == Some(old_id.as_str()) {
                    value[&reference.field] = Value::String(new_id.clone());
                    summary.references_updated += 1;
                    events.push(ChangeEvent::updated(
                        &reference.model_type,
                        id,
                        value.clone(),
                    ));
                }
            }
        }

        let now = Utc::now();
        for item in self.sync_queue.values_mut() {
            let mut touched = false;
            if item.model_type == model_type && item.model_id == old_id {
                item.model_id = new_id.clone();
                touched = true;
                match &mut item.payload {
                    Value::String(key) if *key == old_id => *key = new_id.clone(),
                    Value::Object(map) => {
                        if map.get(&id_field).and_then(Value::as_str) == Some(old_id.as_str()) {
                            map.insert(id_field.clone(), Value::String(new_id.clone()));
                        }
                    }
                    _ => {}
                }
            }
            for reference in &references {
                if item.model_type != reference.model_type {
                    continue;
                }
                if let Value::Object(map) = &mut item.payload {
                    if map.get(&reference.field).and_then(Value::as_str) == Some(old_id.as_str())
                    {
                        map.insert(reference.field.clone(), Value::String(new_id.clone()));
                        touched = true;
                    }
                }
            }
            if touched {
                item.updated_at = now;
                summary.sync_items_updated += 1;
            }
        }

        if let Some(settle) = settle {
            if settle.retain {
                if let Some(item) = self.sync_queue.get_mut(&settle.id) {
                    item.status = SyncStatus::Synced;
                    item.id_negotiation = IdNegotiationStatus::Complete;
                    item.next_retry_at = None;
                    item.last_error = None;
                    item.updated_at = now;
                }
            } else {
                self.sync_queue.remove(&settle.id);
            }
        }

        Ok((summary, events))
    }

    pub(crate) fn query(&self, model_type: &str, query: &Query) -> Vec<Value> {
        match self.records.get(model_type) {
            Some(table) => query.apply(table.values().cloned()),
            None => Vec::new(),
        }
    }

    pub(crate) fn sync_items(&self, filter: &SyncItemFilter) -> Vec<SyncQueueItem> {
        let mut items: Vec<SyncQueueItem> = self
            .sync_queue
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.created_at, item.id));
        items
    }

    pub(crate) fn prune_synced(&mut self, before: DateTime<Utc>) -> usize {
        let len = self.sync_queue.len();
        self.sync_queue
            .retain(|_, item| !(item.status == SyncStatus::Synced && item.updated_at < before));
        len - self.sync_queue.len()
    }
}

/// An in-memory local store.
///
/// All tables live behind a single lock, so batches and ID rewrites are
/// trivially atomic. Change events are emitted after the lock is released.
///
/// # Example
///
/// ```rust
/// use driftsync_store::{LocalStore, MemoryStore};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.upsert("todo", "t-1", json!({"id": "t-1", "title": "a"})).await.unwrap();
/// let todo = store.get("todo", "t-1").await.unwrap();
/// assert_eq!(todo.unwrap()["title"], "a");
/// # }
/// ```
pub struct MemoryStore {
    state: RwLock<StoreState>,
    feed: ChangeFeed,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            feed: ChangeFeed::new(),
        }
    }

    /// Returns the number of records of a model type.
    pub fn record_count(&self, model_type: &str) -> usize {
        self.state
            .read()
            .records
            .get(model_type)
            .map_or(0, BTreeMap::len)
    }

    /// Returns the number of sync queue rows.
    pub fn sync_item_count(&self) -> usize {
        self.state.read().sync_queue.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn get(&self, model_type: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self.state.read().record(model_type, id).cloned())
    }

    async fn query(&self, model_type: &str, query: &Query) -> StoreResult<Vec<Value>> {
        Ok(self.state.read().query(model_type, query))
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<Vec<u64>> {
        let (inserted, events) = self.state.write().apply_batch(batch)?;
        self.feed.emit_batch(events);
        Ok(inserted)
    }

    async fn rewrite_id(&self, rewrite: IdRewrite) -> StoreResult<RewriteSummary> {
        let (summary, events) = self.state.write().rewrite_id(rewrite)?;
        self.feed.emit_batch(events);
        Ok(summary)
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }

    async fn get_sync_item(&self, id: u64) -> StoreResult<Option<SyncQueueItem>> {
        Ok(self.state.read().sync_queue.get(&id).cloned())
    }

    async fn sync_items(&self, filter: &SyncItemFilter) -> StoreResult<Vec<SyncQueueItem>> {
        Ok(self.state.read().sync_items(filter))
    }

    async fn prune_synced(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        Ok(self.state.write().prune_synced(before))
    }
}
