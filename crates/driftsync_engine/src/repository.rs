//! Per-model repositories.
//!
//! A [`Repository`] is the application's entry point for one model type. It
//! applies the configured save and load policies:
//!
//! | Policy                        | Behavior                                           |
//! |-------------------------------|----------------------------------------------------|
//! | `SavePolicy::LocalFirst`      | local write + sync queue row, pushed later         |
//! | `SavePolicy::RemoteFirst`     | foreground request, then local write               |
//! | `LoadPolicy::LocalOnly`       | local read                                         |
//! | `LoadPolicy::LocalThenRemote` | local read, background refresh through load queue  |
//! | `LoadPolicy::RemoteFirst`     | remote read through load queue, then local read    |
//!
//! Local writes of a record are coalesced so the sync queue holds at most
//! one pending row per record and operation.

use crate::error::{SyncError, SyncResult};
use crate::model::{temporary_id, IdStrategy, LoadPolicy, SavePolicy, SyncModel};
use crate::queue::{NetworkTask, QueueManager, QueueType, TaskOperation};
use crate::registry::ModelRegistry;
use crate::retry::RetryExecutor;
use crate::transport::{RemoteApi, RequestOptions};
use driftsync_store::{
    ChangeEvent, IdRewrite, LocalStore, Query, SyncItemFilter, SyncOperation, SyncQueueItem,
    SyncStatus, WriteBatch,
};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Local write attempts before a save gives up on a contended sync row.
const LOCAL_WRITE_ATTEMPTS: usize = 4;

/// Engine services shared by every repository.
#[derive(Clone)]
pub(crate) struct Services {
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) queues: Arc<QueueManager>,
    pub(crate) executor: Arc<RetryExecutor>,
    pub(crate) registry: Arc<ModelRegistry>,
}

/// Policies a repository applies when the caller does not override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Policies {
    pub(crate) save: SavePolicy,
    pub(crate) load: LoadPolicy,
    pub(crate) fallback_to_local: bool,
}

/// Save, load and delete orchestration for one model type.
pub struct Repository<M: SyncModel> {
    services: Services,
    remote: Arc<dyn RemoteApi<M>>,
    policies: Policies,
}

impl<M: SyncModel> Clone for Repository<M> {
    fn clone(&self) -> Self {
        Self {
            services: self.services.clone(),
            remote: Arc::clone(&self.remote),
            policies: self.policies,
        }
    }
}

impl<M: SyncModel> fmt::Debug for Repository<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("model_type", &M::MODEL_TYPE)
            .field("save_policy", &self.policies.save)
            .field("load_policy", &self.policies.load)
            .finish_non_exhaustive()
    }
}

impl<M: SyncModel> Repository<M> {
    pub(crate) fn new(services: Services, remote: Arc<dyn RemoteApi<M>>, policies: Policies) -> Self {
        Self {
            services,
            remote,
            policies,
        }
    }

    /// Returns the default save policy.
    pub fn save_policy(&self) -> SavePolicy {
        self.policies.save
    }

    /// Returns the default load policy.
    pub fn load_policy(&self) -> LoadPolicy {
        self.policies.load
    }

    /// Returns the remote API.
    pub fn remote(&self) -> &Arc<dyn RemoteApi<M>> {
        &self.remote
    }

    fn store(&self) -> &dyn LocalStore {
        self.services.store.as_ref()
    }

    // Saving

    /// Saves `model` with the default save policy.
    ///
    /// An empty id is replaced before saving: with a UUID for client-ID
    /// models, with a temporary id for server-ID models.
    pub async fn save(&self, model: M) -> SyncResult<M> {
        self.save_with(model, self.policies.save, RequestOptions::new())
            .await
    }

    /// Saves `model` with an explicit policy and request options.
    ///
    /// Options are stored with the sync queue row and sent on every attempt.
    pub async fn save_with(
        &self,
        mut model: M,
        policy: SavePolicy,
        options: RequestOptions,
    ) -> SyncResult<M> {
        if model.id().is_empty() {
            model.set_id(match M::ID_STRATEGY {
                IdStrategy::Client => Uuid::new_v4().to_string(),
                IdStrategy::Server => temporary_id(),
            });
        }
        match policy {
            SavePolicy::LocalFirst => self.save_local_first(model, options).await,
            SavePolicy::RemoteFirst => self.save_remote_first(model, options).await,
        }
    }

    async fn save_local_first(&self, model: M, options: RequestOptions) -> SyncResult<M> {
        let id = model.id().to_string();
        let value = serde_json::to_value(&model)?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.write_local(&id, value.clone(), options.clone()).await {
                Ok(()) => break,
                Err(SyncError::Store(e))
                    if (e.is_conflict() || e.is_unique_violation())
                        && attempts < LOCAL_WRITE_ATTEMPTS =>
                {
                    tracing::debug!(model_type = M::MODEL_TYPE, model_id = %id, error = %e, "sync row changed while saving");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(model_type = M::MODEL_TYPE, model_id = %id, "saved locally");
        self.kick();
        Ok(model)
    }

    /// Writes the record and coalesces it into its pending sync rows.
    ///
    /// Rows are rewritten only if unchanged since they were read.
    async fn write_local(&self, id: &str, value: Value, options: RequestOptions) -> SyncResult<()> {
        let exists = self.store().get(M::MODEL_TYPE, id).await?.is_some();
        let pending = self.pending_items(id).await?;

        if pending.iter().any(|r| r.operation == SyncOperation::Delete) {
            return Err(SyncError::InvalidState(format!(
                "{} {id} has a pending delete",
                M::MODEL_TYPE
            )));
        }

        let mut batch = WriteBatch::new();
        batch.upsert(M::MODEL_TYPE, id, value.clone());

        let create = pending.iter().find(|r| r.operation == SyncOperation::Create);
        let update = pending.iter().find(|r| r.operation == SyncOperation::Update);
        match (create, update) {
            (_, Some(update)) => {
                batch.expect_sync_item(update.clone());
                batch.update_sync_item(coalesce(update.clone(), value, options));
            }
            (Some(create), None) if !self.is_in_flight(create) => {
                batch.expect_sync_item(create.clone());
                batch.update_sync_item(coalesce(create.clone(), value, options));
            }
            (Some(_), None) => {
                batch.insert_sync_item(self.new_row(id, SyncOperation::Update, value, options));
            }
            (None, None) => {
                let operation = if exists {
                    SyncOperation::Update
                } else {
                    SyncOperation::Create
                };
                batch.insert_sync_item(self.new_row(id, operation, value, options));
            }
        }

        self.store().apply(batch).await?;
        Ok(())
    }

    async fn save_remote_first(&self, model: M, options: RequestOptions) -> SyncResult<M> {
        let local_id = model.id().to_string();
        let exists = self.store().get(M::MODEL_TYPE, &local_id).await?.is_some();
        let operation = if exists {
            TaskOperation::Update
        } else {
            TaskOperation::Create
        };

        let remote = Arc::clone(&self.remote);
        let sent = model.clone();
        let task = NetworkTask::new(
            format!("save:{}:{local_id}", M::MODEL_TYPE),
            operation,
            M::MODEL_TYPE,
            &local_id,
            async move {
                match operation {
                    TaskOperation::Update => remote.update_one(&sent, &options).await,
                    _ => remote.create_one(&sent, &options).await,
                }
            },
        );
        let saved = self
            .services
            .queues
            .enqueue_task(task, QueueType::Foreground)
            .await?;

        let value = serde_json::to_value(&saved)?;
        if saved.id() != local_id && exists {
            self.store()
                .rewrite_id(IdRewrite {
                    model_type: M::MODEL_TYPE.to_string(),
                    id_field: M::ID_FIELD.to_string(),
                    old_id: local_id.clone(),
                    new_id: saved.id().to_string(),
                    record: value,
                    references: self.services.registry.references_to(M::MODEL_TYPE),
                    settle: None,
                    expect: None,
                })
                .await?;
        } else {
            self.store().upsert(M::MODEL_TYPE, saved.id(), value).await?;
        }
        tracing::debug!(
            model_type = M::MODEL_TYPE,
            model_id = %saved.id(),
            "saved remotely"
        );
        Ok(saved)
    }

    fn new_row(
        &self,
        id: &str,
        operation: SyncOperation,
        payload: Value,
        options: RequestOptions,
    ) -> SyncQueueItem {
        let row = SyncQueueItem::new(M::MODEL_TYPE, id, operation, payload)
            .with_idempotency_key(Uuid::new_v4().to_string())
            .with_headers(options.headers)
            .with_extra(options.extra);
        if operation == SyncOperation::Create && M::ID_STRATEGY == IdStrategy::Server {
            row.with_temporary_id(id)
        } else {
            row
        }
    }

    fn is_in_flight(&self, row: &SyncQueueItem) -> bool {
        self.services
            .queues
            .is_in_flight(QueueType::Background, &row.task_key())
    }

    fn kick(&self) {
        if self.services.queues.is_connected() {
            self.services.executor.kick();
        }
    }

    // Loading

    /// Finds a record with the default load policy.
    pub async fn find(&self, id: &str) -> SyncResult<Option<M>> {
        self.find_with(id, self.policies.load).await
    }

    /// Finds a record with an explicit load policy.
    pub async fn find_with(&self, id: &str, policy: LoadPolicy) -> SyncResult<Option<M>> {
        match policy {
            LoadPolicy::LocalOnly => self.find_local(id).await,
            LoadPolicy::LocalThenRemote => match self.find_local(id).await? {
                Some(model) => {
                    self.spawn_refresh(id);
                    Ok(Some(model))
                }
                None => match self.refresh(id).await {
                    Err(e) if e.is_queue_rejection() => Ok(None),
                    found => found,
                },
            },
            LoadPolicy::RemoteFirst => match self.refresh(id).await {
                Err(e) if self.policies.fallback_to_local => {
                    tracing::debug!(
                        model_type = M::MODEL_TYPE,
                        model_id = %id,
                        error = %e,
                        "remote load failed, using local copy"
                    );
                    self.find_local(id).await
                }
                found => found,
            },
        }
    }

    async fn find_local(&self, id: &str) -> SyncResult<Option<M>> {
        self.store()
            .get(M::MODEL_TYPE, id)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(SyncError::from)
    }

    fn spawn_refresh(&self, id: &str) {
        let this = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            match this.refresh(&id).await {
                Ok(_) => {}
                Err(e) if e.is_queue_rejection() => {
                    tracing::debug!(model_type = M::MODEL_TYPE, model_id = %id, error = %e, "refresh skipped");
                }
                Err(e) => {
                    tracing::warn!(model_type = M::MODEL_TYPE, model_id = %id, error = %e, "refresh failed");
                }
            }
        });
    }

    /// Fetches a record through the load queue and stores it.
    ///
    /// Returns `None` (and purges the local copy) if the server no longer
    /// has the record. A record with pending local writes is left alone and
    /// its local value returned.
    async fn refresh(&self, id: &str) -> SyncResult<Option<M>> {
        let remote = Arc::clone(&self.remote);
        let fetch_id = id.to_string();
        let task = NetworkTask::new(
            format!("fetch:{}:{id}", M::MODEL_TYPE),
            TaskOperation::Fetch,
            M::MODEL_TYPE,
            id,
            async move { remote.find_one(&fetch_id, &RequestOptions::new()).await },
        );
        let fetched = self
            .services
            .queues
            .enqueue_task(task, QueueType::Load)
            .await;

        let has_pending = !self.pending_items(id).await?.is_empty();
        match fetched {
            Ok(_) if has_pending => self.find_local(id).await,
            Ok(model) => {
                self.store()
                    .upsert(M::MODEL_TYPE, id, serde_json::to_value(&model)?)
                    .await?;
                Ok(Some(model))
            }
            Err(e) if e.is_absent() => {
                if !has_pending && self.store().delete(M::MODEL_TYPE, id).await? {
                    tracing::info!(model_type = M::MODEL_TYPE, model_id = %id, "purged record missing on server");
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns local records matching `query`, with the default load policy.
    pub async fn find_all(&self, query: &Query) -> SyncResult<Vec<M>> {
        self.find_all_with(query, self.policies.load).await
    }

    /// Returns records matching `query` with an explicit load policy.
    ///
    /// Remote loads refresh the local copy of every fetched record; the
    /// query always runs against the local store.
    pub async fn find_all_with(&self, query: &Query, policy: LoadPolicy) -> SyncResult<Vec<M>> {
        match policy {
            LoadPolicy::LocalOnly => {}
            LoadPolicy::LocalThenRemote => {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.refresh_all().await {
                        tracing::debug!(model_type = M::MODEL_TYPE, error = %e, "refresh of all records failed");
                    }
                });
            }
            LoadPolicy::RemoteFirst => {
                if let Err(e) = self.refresh_all().await {
                    if !self.policies.fallback_to_local {
                        return Err(e);
                    }
                    tracing::debug!(model_type = M::MODEL_TYPE, error = %e, "remote load failed, using local copies");
                }
            }
        }
        self.query_local(query).await
    }

    async fn query_local(&self, query: &Query) -> SyncResult<Vec<M>> {
        self.store()
            .query(M::MODEL_TYPE, query)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(SyncError::from))
            .collect()
    }

    async fn refresh_all(&self) -> SyncResult<usize> {
        let remote = Arc::clone(&self.remote);
        let task = NetworkTask::new(
            format!("fetch_all:{}", M::MODEL_TYPE),
            TaskOperation::Fetch,
            M::MODEL_TYPE,
            "*",
            async move { remote.find_all(&RequestOptions::new()).await },
        );
        let fetched = self
            .services
            .queues
            .enqueue_task(task, QueueType::Load)
            .await?;

        let pending: HashSet<String> = self
            .store()
            .sync_items(&SyncItemFilter::all().with_status(SyncStatus::Pending))
            .await?
            .into_iter()
            .filter(|row| row.model_type == M::MODEL_TYPE)
            .map(|row| row.model_id)
            .collect();

        let mut batch = WriteBatch::new();
        let mut stored = 0;
        for model in fetched {
            if pending.contains(model.id()) {
                continue;
            }
            batch.upsert(M::MODEL_TYPE, model.id(), serde_json::to_value(&model)?);
            stored += 1;
        }
        if !batch.is_empty() {
            self.store().apply(batch).await?;
        }
        Ok(stored)
    }

    // Deleting

    /// Deletes a record with the default save policy.
    ///
    /// Records of models declaring a cascading relation to this one are
    /// deleted along with it, transitively.
    pub async fn delete(&self, id: &str) -> SyncResult<()> {
        self.delete_with(id, self.policies.save, RequestOptions::new())
            .await
    }

    /// Deletes a record with an explicit policy and request options.
    pub async fn delete_with(
        &self,
        id: &str,
        policy: SavePolicy,
        options: RequestOptions,
    ) -> SyncResult<()> {
        match policy {
            SavePolicy::LocalFirst => self.delete_local_first(id, options).await,
            SavePolicy::RemoteFirst => self.delete_remote_first(id, options).await,
        }
    }

    async fn delete_local_first(&self, id: &str, options: RequestOptions) -> SyncResult<()> {
        let targets = self.cascade_targets(id).await?;
        let mut batch = WriteBatch::new();
        let mut queued = 0;

        for (model_type, model_id) in &targets {
            batch.delete(model_type, model_id);
            let pending = self
                .store()
                .sync_items(&SyncItemFilter::pending_for(model_type, model_id))
                .await?;

            let local_only = pending
                .iter()
                .any(|r| r.operation == SyncOperation::Create && !self.is_in_flight(r));
            if local_only {
                for row in &pending {
                    batch.delete_sync_item(row.id);
                }
                continue;
            }
            for row in &pending {
                if row.operation == SyncOperation::Update && !self.is_in_flight(row) {
                    batch.delete_sync_item(row.id);
                }
            }
            if !pending.iter().any(|r| r.operation == SyncOperation::Delete) {
                let row = SyncQueueItem::new(
                    model_type.as_str(),
                    model_id.as_str(),
                    SyncOperation::Delete,
                    json!(model_id),
                )
                .with_idempotency_key(Uuid::new_v4().to_string())
                .with_headers(options.headers.clone())
                .with_extra(options.extra.clone());
                batch.insert_sync_item(row);
                queued += 1;
            }
        }

        self.store().apply(batch).await?;
        tracing::debug!(
            model_type = M::MODEL_TYPE,
            model_id = %id,
            cascaded = targets.len() - 1,
            queued,
            "deleted locally"
        );
        if queued > 0 {
            self.kick();
        }
        Ok(())
    }

    /// Deletes the cascade on the server, deepest records first, then
    /// removes it locally.
    ///
    /// Children that never reached the server are skipped. A failed remote
    /// delete stops the cascade and leaves the local store untouched.
    async fn delete_remote_first(&self, id: &str, options: RequestOptions) -> SyncResult<()> {
        let targets = self.cascade_targets(id).await?;

        let mut pending_rows = Vec::with_capacity(targets.len());
        for (model_type, model_id) in &targets {
            pending_rows.push(
                self.store()
                    .sync_items(&SyncItemFilter::pending_for(model_type, model_id))
                    .await?,
            );
        }

        for ((model_type, model_id), pending) in targets.iter().zip(&pending_rows).rev() {
            let local_only = pending
                .iter()
                .any(|r| r.operation == SyncOperation::Create && !self.is_in_flight(r));
            if local_only {
                continue;
            }
            let handler = self.services.registry.require_handler(model_type)?;
            let remote_id = model_id.clone();
            let options = options.clone();
            let task = NetworkTask::new(
                format!("delete:{model_type}:{model_id}"),
                TaskOperation::Delete,
                model_type.as_str(),
                model_id.as_str(),
                async move { handler.delete_remote(&remote_id, &options).await },
            );
            match self
                .services
                .queues
                .enqueue_task(task, QueueType::Foreground)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_absent() => {
                    tracing::debug!(model_type = %model_type, model_id = %model_id, "already deleted on server");
                }
                Err(e) => return Err(e),
            }
        }

        let mut batch = WriteBatch::new();
        for ((model_type, model_id), pending) in targets.iter().zip(&pending_rows) {
            batch.delete(model_type, model_id);
            for row in pending.iter().filter(|r| !self.is_in_flight(r)) {
                batch.delete_sync_item(row.id);
            }
        }
        self.store().apply(batch).await?;
        tracing::debug!(
            model_type = M::MODEL_TYPE,
            model_id = %id,
            cascaded = targets.len() - 1,
            "deleted remotely"
        );
        Ok(())
    }

    /// The record plus every record deleted with it, parent first.
    async fn cascade_targets(&self, id: &str) -> SyncResult<Vec<(String, String)>> {
        let root = (M::MODEL_TYPE.to_string(), id.to_string());
        let mut seen = HashSet::from([root.clone()]);
        let mut queue = VecDeque::from([root]);
        let mut targets = Vec::new();

        while let Some((model_type, model_id)) = queue.pop_front() {
            for child in self.services.registry.cascade_children(&model_type) {
                let query = Query::new().where_eq(child.field.as_str(), json!(model_id));
                for record in self.store().query(&child.model_type, &query).await? {
                    let Some(child_id) = record.get(&child.id_field).and_then(Value::as_str) else {
                        continue;
                    };
                    let key = (child.model_type.clone(), child_id.to_string());
                    if seen.insert(key.clone()) {
                        queue.push_back(key);
                    }
                }
            }
            targets.push((model_type, model_id));
        }
        Ok(targets)
    }

    // Observation

    /// Subscribes to change events of this model type.
    pub fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store().subscribe(M::MODEL_TYPE)
    }

    /// Returns the pending sync queue rows of a record, oldest first.
    pub async fn pending_items(&self, id: &str) -> SyncResult<Vec<SyncQueueItem>> {
        self.store()
            .sync_items(&SyncItemFilter::pending_for(M::MODEL_TYPE, id))
            .await
            .map_err(SyncError::from)
    }
}

/// Replaces a pending row's payload with the latest local value.
fn coalesce(mut row: SyncQueueItem, payload: Value, options: RequestOptions) -> SyncQueueItem {
    row.payload = payload;
    row.headers.extend(options.headers);
    row.extra.extend(options.extra);
    row
}
