//! File-backed local store.

use crate::change_feed::{ChangeEvent, ChangeFeed};
use crate::error::{StoreError, StoreResult};
use crate::memory::StoreState;
use crate::query::Query;
use crate::store::{IdRewrite, LocalStore, RewriteSummary, SyncItemFilter, WriteBatch};
use crate::sync_queue::SyncQueueItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Snapshot file name.
const SNAPSHOT_FILE: &str = "store.json";

/// Lock file name.
const LOCK_FILE: &str = "store.lock";

/// A local store persisted as a JSON snapshot in a directory.
///
/// Every commit is staged on a copy of the state, written to a temporary
/// file, synced, and renamed over the snapshot before it becomes visible.
/// A crash therefore leaves either the old or the new snapshot on disk.
///
/// The directory is locked exclusively while the store is open; a second
/// open from any process fails with [`StoreError::Locked`].
///
/// # Example
///
/// ```no_run
/// use driftsync_store::FileStore;
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("app_data")).unwrap();
/// println!("{} pending rows", store.sync_item_count());
/// ```
pub struct FileStore {
    dir: PathBuf,
    state: RwLock<StoreState>,
    writer: Mutex<()>,
    feed: ChangeFeed,
    _lock_file: File,
}

impl FileStore {
    /// Returns true if `dir` holds a store snapshot.
    pub fn exists(dir: &Path) -> bool {
        dir.join(SNAPSHOT_FILE).is_file()
    }

    /// Opens or creates a store in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, another process
    /// holds the lock, or the snapshot cannot be parsed.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_path = dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked {
                path: lock_path.display().to_string(),
            });
        }

        let snapshot = dir.join(SNAPSHOT_FILE);
        let state = if snapshot.exists() {
            let bytes = fs::read(&snapshot)?;
            serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::Corrupted(format!("{}: {e}", snapshot.display()))
            })?
        } else {
            StoreState::default()
        };

        tracing::debug!(
            dir = %dir.display(),
            sync_items = state.sync_queue.len(),
            "opened file store"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            state: RwLock::new(state),
            writer: Mutex::new(()),
            feed: ChangeFeed::new(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Returns the number of sync queue rows.
    pub fn sync_item_count(&self) -> usize {
        self.state.read().sync_queue.len()
    }

    /// Stages `mutate` on a copy of the state, persists it, then publishes.
    fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut StoreState) -> StoreResult<(T, Vec<ChangeEvent>)>,
    ) -> StoreResult<T> {
        let guard = self.writer.lock();
        let mut next = self.state.read().clone();
        let (out, events) = mutate(&mut next)?;
        self.persist(&next)?;
        *self.state.write() = next;
        drop(guard);

        self.feed.emit_batch(events);
        Ok(out)
    }

    fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let bytes = serde_json::to_vec(state)?;
        let tmp = self.dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(SNAPSHOT_FILE))?;
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("dir", &self.dir).finish()
    }
}

#[async_trait]
impl LocalStore for FileStore {
    async fn get(&self, model_type: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .state
            .read()
            .records
            .get(model_type)
            .and_then(|table| table.get(id))
            .cloned())
    }

    async fn query(&self, model_type: &str, query: &Query) -> StoreResult<Vec<Value>> {
        Ok(self.state.read().query(model_type, query))
    }

    async fn apply(&self, batch: WriteBatch) -> StoreResult<Vec<u64>> {
        self.commit(|state| state.apply_batch(batch))
    }

    async fn rewrite_id(&self, rewrite: IdRewrite) -> StoreResult<RewriteSummary> {
        self.commit(|state| state.rewrite_id(rewrite))
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
        self.commit(|state| Ok((state.prune_synced(before), Vec::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_queue::{SyncOperation, SyncStatus};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn records_and_rows_survive_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(dir.path()).unwrap();
            store
                .upsert("todo", "t-1", json!({"id": "t-1", "title": "persist"}))
                .await
                .unwrap();
            store
                .insert_sync_item(SyncQueueItem::new(
                    "todo",
                    "t-1",
                    SyncOperation::Create,
                    json!({"id": "t-1"}),
                ))
                .await
                .unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        let todo = store.get("todo", "t-1").await.unwrap().unwrap();
        assert_eq!(todo["title"], "persist");
        let rows = store.sync_items(&SyncItemFilter::all()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, SyncStatus::Pending);

        // Row ids continue from the persisted counter.
        let next = store
            .insert_sync_item(SyncQueueItem::new(
                "todo",
                "t-2",
                SyncOperation::Create,
                json!({"id": "t-2"}),
            ))
            .await
            .unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _first = FileStore::open(dir.path()).unwrap();
        let second = FileStore::open(dir.path());
        assert!(matches!(second, Err(StoreError::Locked { .. })));
    }

    #[test]
    fn corrupted_snapshot_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SNAPSHOT_FILE), b"{not json").unwrap();
        let result = FileStore::open(dir.path());
        assert!(matches!(result, Err(StoreError::Corrupted(_))));
    }

    #[tokio::test]
    async fn failed_batch_is_not_persisted() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            let mut batch = WriteBatch::new();
            batch.upsert("todo", "t-1", json!({"id": "t-1"}));
            batch.update_sync_item(SyncQueueItem::new(
                "todo",
                "t-1",
                SyncOperation::Update,
                json!({}),
            ));
            assert!(store.apply(batch).await.is_err());
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.get("todo", "t-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn emits_events_after_commit() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let mut rx = store.subscribe("todo");

        store.upsert("todo", "t-1", json!({"id": "t-1"})).await.unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.model_id, "t-1");
    }
}
