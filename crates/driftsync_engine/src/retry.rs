//! Retry executor.
//!
//! The executor drains the durable sync queue. Each pass:
//!
//! 1. selects pending rows that are due, keeping only the oldest pending row
//!    of each record so that writes to one record reach the server in order
//! 2. groups them by model level: creates and updates run lowest level
//!    first, deletes highest level first
//! 3. submits each level as a batch of tasks to the background queue and
//!    waits for the batch before starting the next level
//!
//! Each row moves through a small state machine:
//!
//! ```text
//! pending --success--> synced
//! pending --failure, attempts left--> pending (later next_retry_at)
//! pending --attempts exhausted / permanent error--> dead
//! ```

use crate::config::{RetryConfig, SyncConfig};
use crate::dependency::DependencyResolver;
use crate::error::{SyncError, SyncResult};
use crate::model::IdStrategy;
use crate::queue::{NetworkTask, QueueManager, QueueType};
use crate::registry::{ModelRegistry, SyncHandler};
use chrono::Utc;
use driftsync_store::{
    ChangeEvent, IdNegotiationStatus, IdRewrite, LocalStore, SettleItem, SyncItemFilter,
    SyncOperation, SyncQueueItem, SyncStatus, WriteBatch,
};
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the executor's timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorMode {
    /// The app is visible; scan at the foreground interval.
    Foreground,
    /// The app is in the background; scan at the background interval.
    Background,
}

impl fmt::Display for ExecutorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorMode::Foreground => f.write_str("foreground"),
            ExecutorMode::Background => f.write_str("background"),
        }
    }
}

/// What happened to one row during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowOutcome {
    /// Pushed successfully; the row is synced (or removed).
    Synced,
    /// Failed; rescheduled with backoff.
    Retried,
    /// Failed permanently or ran out of attempts.
    Dead,
    /// The server no longer has the record; the local copy was purged.
    Purged,
    /// Pushed, but the row changed meanwhile; queued again with the new data.
    Requeued,
    /// Nothing to do: no handler, or the row settled elsewhere.
    Skipped,
    /// Not attempted: the queue refused the task.
    Deferred,
}

/// Summary of one executor pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// The pass did not run because the queues are disconnected.
    pub offline: bool,
    /// Rows selected for this pass.
    pub scanned: usize,
    /// Rows synced.
    pub synced: usize,
    /// Rows rescheduled.
    pub retried: usize,
    /// Rows that went dead.
    pub dead: usize,
    /// Rows whose record was purged locally.
    pub purged: usize,
    /// Rows queued again with newer data.
    pub requeued: usize,
    /// Rows skipped.
    pub skipped: usize,
    /// Rows not attempted because the queue refused them.
    pub deferred: usize,
    /// Rows whose outcome could not be recorded.
    pub errors: usize,
}

impl ProcessReport {
    fn record(&mut self, outcome: SyncResult<RowOutcome>) {
        match outcome {
            Ok(RowOutcome::Synced) => self.synced += 1,
            Ok(RowOutcome::Retried) => self.retried += 1,
            Ok(RowOutcome::Dead) => self.dead += 1,
            Ok(RowOutcome::Purged) => self.purged += 1,
            Ok(RowOutcome::Requeued) => self.requeued += 1,
            Ok(RowOutcome::Skipped) => self.skipped += 1,
            Ok(RowOutcome::Deferred) => self.deferred += 1,
            Err(_) => self.errors += 1,
        }
    }

    /// Rows that reached the remote API.
    pub fn attempted(&self) -> usize {
        self.synced + self.retried + self.dead + self.purged + self.requeued
    }
}

/// Settling attempts before a row that keeps changing is left to a later pass.
const SETTLE_ATTEMPTS: usize = 8;

/// Applies the result of one push to the store.
struct Settler {
    store: Arc<dyn LocalStore>,
    registry: Arc<ModelRegistry>,
    retry: RetryConfig,
    retain_synced: bool,
}

impl Settler {
    /// Re-reads the row, pushes it and records the outcome.
    async fn run(&self, handler: Arc<dyn SyncHandler>, row_id: u64) -> SyncResult<RowOutcome> {
        let Some(item) = self.store.get_sync_item(row_id).await? else {
            return Ok(RowOutcome::Skipped);
        };
        if !item.is_due(Utc::now()) {
            return Ok(RowOutcome::Skipped);
        }

        let result = handler.push(&item).await;
        self.settle(handler.as_ref(), item, result).await
    }

    /// Records the outcome of a push.
    ///
    /// Every write is guarded by the row as re-read here, so an edit that
    /// lands between the read and the write fails the batch with a conflict
    /// and the outcome is worked out again against the newer row.
    async fn settle(
        &self,
        handler: &dyn SyncHandler,
        pushed: SyncQueueItem,
        result: SyncResult<Option<Value>>,
    ) -> SyncResult<RowOutcome> {
        let mut attempts = 0;
        loop {
            let Some(current) = self.store.get_sync_item(pushed.id).await? else {
                tracing::debug!(row = pushed.id, "row removed while in flight");
                return Ok(RowOutcome::Skipped);
            };

            let outcome = match &result {
                Ok(server) => {
                    self.on_success(handler, &pushed, current, server.clone())
                        .await
                }
                Err(err) if err.is_absent() => self.on_absent(current, err).await,
                Err(err) => self.on_failure(current, err).await,
            };

            attempts += 1;
            match outcome {
                Err(SyncError::Store(e))
                    if (e.is_conflict() || e.is_unique_violation())
                        && attempts < SETTLE_ATTEMPTS =>
                {
                    tracing::debug!(row = pushed.id, error = %e, "row changed while settling");
                }
                other => return other,
            }
        }
    }

    fn finish(&self, batch: &mut WriteBatch, mut item: SyncQueueItem) {
        if self.retain_synced {
            item.status = SyncStatus::Synced;
            item.next_retry_at = None;
            item.last_error = None;
            if item.id_negotiation == IdNegotiationStatus::Pending {
                item.id_negotiation = IdNegotiationStatus::Complete;
            }
            batch.update_sync_item(item);
        } else {
            batch.delete_sync_item(item.id);
        }
    }

    async fn on_success(
        &self,
        handler: &dyn SyncHandler,
        pushed: &SyncQueueItem,
        current: SyncQueueItem,
        server: Option<Value>,
    ) -> SyncResult<RowOutcome> {
        let changed = current.payload != pushed.payload;
        let model_type = current.model_type.clone();

        let server_id = server
            .as_ref()
            .and_then(|v| v.get(handler.id_field()))
            .and_then(Value::as_str)
            .map(str::to_string);
        let renamed = match server_id {
            Some(new_id)
                if current.operation == SyncOperation::Create
                    && handler.id_strategy() == IdStrategy::Server
                    && new_id != current.model_id =>
            {
                Some(new_id)
            }
            _ => None,
        };

        if let Some(new_id) = renamed {
            let old_id = current.model_id.clone();
            let row_id = current.id;
            let summary = self
                .store
                .rewrite_id(IdRewrite {
                    model_type: model_type.clone(),
                    id_field: handler.id_field().to_string(),
                    old_id: old_id.clone(),
                    new_id: new_id.clone(),
                    record: server.unwrap_or(Value::Null),
                    references: self.registry.references_to(&model_type),
                    settle: (!changed).then_some(SettleItem {
                        id: row_id,
                        retain: self.retain_synced,
                    }),
                    expect: Some(current),
                })
                .await?;
            tracing::info!(
                model_type = %model_type,
                old_id = %old_id,
                new_id = %new_id,
                references = summary.references_updated,
                rows = summary.sync_items_updated,
                local_kept = summary.local_kept,
                "negotiated server id"
            );

            if !changed {
                return Ok(RowOutcome::Synced);
            }
            // The create reached the server with stale data: push the rest
            // as an update of the renamed record.
            let row = self
                .store
                .get_sync_item(row_id)
                .await?
                .ok_or(driftsync_store::StoreError::SyncItemNotFound { id: row_id })?;
            return self.requeue_as_update(row).await;
        }

        let mut batch = WriteBatch::new();
        batch.expect_sync_item(current.clone());

        if changed {
            if current.operation == SyncOperation::Create {
                return self.requeue_as_update(current).await;
            }
            let row_id = current.id;
            batch.update_sync_item(SyncQueueItem {
                attempt_count: 0,
                last_error: None,
                next_retry_at: None,
                ..current
            });
            self.store.apply(batch).await?;
            tracing::debug!(row = row_id, "row changed in flight, requeued");
            return Ok(RowOutcome::Requeued);
        }

        if let Some(value) = server.filter(|v| v.is_object()) {
            if current.operation != SyncOperation::Delete {
                batch.reconcile(&model_type, &current.model_id, value, Some(current.id));
            }
        }
        let (model_id, operation) = (current.model_id.clone(), current.operation);
        self.finish(&mut batch, current);
        self.store.apply(batch).await?;
        tracing::debug!(
            model_type = %model_type,
            model_id = %model_id,
            operation = %operation,
            "synced"
        );
        Ok(RowOutcome::Synced)
    }

    /// Settles a create whose payload changed while in flight.
    ///
    /// The newer data goes out as an update, either by turning this row into
    /// one or, if an update row already exists, by leaving it to that row.
    async fn requeue_as_update(&self, row: SyncQueueItem) -> SyncResult<RowOutcome> {
        let filter = SyncItemFilter::pending_for(&row.model_type, &row.model_id);
        let has_update = self
            .store
            .sync_items(&filter)
            .await?
            .iter()
            .any(|other| other.id != row.id && other.operation == SyncOperation::Update);

        let row_id = row.id;
        let mut batch = WriteBatch::new();
        batch.expect_sync_item(row.clone());
        if has_update {
            self.finish(&mut batch, row);
        } else {
            batch.update_sync_item(as_follow_up_update(row));
        }
        self.store.apply(batch).await?;
        tracing::debug!(row = row_id, has_update, "create changed in flight, requeued");
        Ok(RowOutcome::Requeued)
    }

    async fn on_absent(&self, mut item: SyncQueueItem, err: &SyncError) -> SyncResult<RowOutcome> {
        let mut batch = WriteBatch::new();
        batch.expect_sync_item(item.clone());
        let (outcome, failed) = match item.operation {
            SyncOperation::Delete => {
                self.finish(&mut batch, item);
                (RowOutcome::Synced, None)
            }
            SyncOperation::Update => {
                batch.delete(&item.model_type, &item.model_id);
                self.mark_dead(&mut item, err);
                batch.update_sync_item(item.clone());
                (RowOutcome::Purged, Some(item))
            }
            SyncOperation::Create => {
                self.mark_dead(&mut item, err);
                batch.update_sync_item(item.clone());
                (RowOutcome::Dead, Some(item))
            }
        };
        self.store.apply(batch).await?;
        if let Some(item) = failed {
            self.report(&item, err);
        }
        Ok(outcome)
    }

    async fn on_failure(&self, mut item: SyncQueueItem, err: &SyncError) -> SyncResult<RowOutcome> {
        let mut batch = WriteBatch::new();
        batch.expect_sync_item(item.clone());

        item.attempt_count = item.attempt_count.saturating_add(1);
        let outcome = if err.is_permanent() || self.retry.is_exhausted(item.attempt_count) {
            self.mark_dead(&mut item, err);
            RowOutcome::Dead
        } else {
            let delay = self.retry.delay_for_attempt(item.attempt_count);
            item.last_error = Some(err.to_string());
            item.next_retry_at = Some(Utc::now() + to_chrono(delay));
            tracing::warn!(
                model_type = %item.model_type,
                model_id = %item.model_id,
                attempt = item.attempt_count,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "sync failed, retrying later"
            );
            RowOutcome::Retried
        };
        batch.update_sync_item(item.clone());
        self.store.apply(batch).await?;
        self.report(&item, err);
        Ok(outcome)
    }

    fn mark_dead(&self, item: &mut SyncQueueItem, err: &SyncError) {
        item.status = SyncStatus::Dead;
        item.next_retry_at = None;
        item.last_error = Some(err.to_string());
        if item.id_negotiation == IdNegotiationStatus::Pending {
            item.id_negotiation = IdNegotiationStatus::Failed;
        }
    }

    /// Logs a dead row and publishes the failure on the change feed.
    fn report(&self, item: &SyncQueueItem, err: &SyncError) {
        if item.status == SyncStatus::Dead {
            tracing::error!(
                model_type = %item.model_type,
                model_id = %item.model_id,
                operation = %item.operation,
                attempts = item.attempt_count,
                error = %err,
                "sync gave up"
            );
        }
        self.store.changes().emit(ChangeEvent::error(
            &item.model_type,
            &item.model_id,
            err.to_string(),
        ));
    }
}

/// Turns a settled create row into a ready update of the same record.
fn as_follow_up_update(row: SyncQueueItem) -> SyncQueueItem {
    SyncQueueItem {
        operation: SyncOperation::Update,
        id_negotiation: IdNegotiationStatus::Complete,
        status: SyncStatus::Pending,
        attempt_count: 0,
        last_error: None,
        next_retry_at: None,
        ..row
    }
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX)
}

/// Drains the durable sync queue with backoff.
pub struct RetryExecutor {
    store: Arc<dyn LocalStore>,
    queues: Arc<QueueManager>,
    resolver: Arc<DependencyResolver>,
    registry: Arc<ModelRegistry>,
    settler: Arc<Settler>,
    scan_batch_size: usize,
    submit_chunk: usize,
    foreground_interval: Duration,
    background_interval: Duration,
    mode: watch::Sender<ExecutorMode>,
    pass_lock: tokio::sync::Mutex<()>,
    kick_pending: AtomicBool,
    timer: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl RetryExecutor {
    /// Creates a stopped executor in background mode.
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn LocalStore>,
        queues: Arc<QueueManager>,
        resolver: Arc<DependencyResolver>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        let settler = Arc::new(Settler {
            store: Arc::clone(&store),
            registry: Arc::clone(&registry),
            retry: config.retry.clone(),
            retain_synced: config.retain_synced_items,
        });
        let (mode, _) = watch::channel(ExecutorMode::Background);
        Self {
            store,
            queues,
            resolver,
            registry,
            settler,
            scan_batch_size: config.scan_batch_size,
            submit_chunk: config.queues.background.capacity.max(1),
            foreground_interval: config.foreground_poll_interval,
            background_interval: config.background_poll_interval,
            mode,
            pass_lock: tokio::sync::Mutex::new(()),
            kick_pending: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    /// Returns the current mode.
    pub fn mode(&self) -> ExecutorMode {
        *self.mode.borrow()
    }

    /// Returns true while the timer loop runs.
    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Starts the timer loop. Does nothing if it already runs.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self.timer.lock();
        if timer
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
        {
            return;
        }
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(shutdown.clone()));
        *timer = Some((shutdown, handle));
        tracing::info!(mode = %self.mode(), "retry executor started");
    }

    /// Stops the timer loop. A pass in progress finishes first.
    pub async fn stop(&self) {
        let timer = self.timer.lock().take();
        if let Some((shutdown, handle)) = timer {
            shutdown.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "retry executor loop ended abnormally");
            }
            tracing::info!("retry executor stopped");
        }
    }

    /// Switches to the foreground interval and starts the timer.
    ///
    /// With `force_sync`, also runs a pass immediately and returns its report.
    pub async fn enable_foreground_mode(
        self: &Arc<Self>,
        force_sync: bool,
    ) -> SyncResult<Option<ProcessReport>> {
        self.mode.send_replace(ExecutorMode::Foreground);
        self.start();
        if force_sync {
            return self.process_due_tasks_now().await.map(Some);
        }
        Ok(None)
    }

    /// Switches to the background interval and starts the timer.
    pub fn enable_background_mode(self: &Arc<Self>) {
        self.mode.send_replace(ExecutorMode::Background);
        self.start();
    }

    fn interval(&self, mode: ExecutorMode) -> Duration {
        match mode {
            ExecutorMode::Foreground => self.foreground_interval,
            ExecutorMode::Background => self.background_interval,
        }
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut mode = self.mode.subscribe();
        let mut connectivity = self.queues.connectivity();
        loop {
            let interval = self.interval(*mode.borrow_and_update());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => self.scheduled_pass("timer").await,
                changed = mode.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *connectivity.borrow_and_update();
                    if online {
                        self.scheduled_pass("reconnect").await;
                    }
                }
            }
        }
    }

    async fn scheduled_pass(&self, trigger: &'static str) {
        match self.process_due_tasks_now().await {
            Ok(report) if report.scanned > 0 => {
                tracing::info!(trigger, ?report, "sync pass finished");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(trigger, error = %e, "sync pass failed"),
        }
    }

    /// Requests a pass soon without waiting for it.
    ///
    /// Requests made while a pass is queued collapse into that pass.
    pub fn kick(self: &Arc<Self>) {
        if self.kick_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _pass = this.pass_lock.lock().await;
            this.kick_pending.store(false, Ordering::SeqCst);
            if let Err(e) = this.pass().await {
                tracing::warn!(error = %e, "immediate sync pass failed");
            }
        });
    }

    /// Runs one full pass over the due rows.
    ///
    /// Passes are serialized; a call made during a pass waits for it.
    pub async fn process_due_tasks_now(&self) -> SyncResult<ProcessReport> {
        let _pass = self.pass_lock.lock().await;
        self.pass().await
    }

    async fn pass(&self) -> SyncResult<ProcessReport> {
        let mut report = ProcessReport::default();
        if !self.queues.is_connected() {
            tracing::debug!("skipping sync pass while disconnected");
            report.offline = true;
            return Ok(report);
        }

        let due = self.select_due().await?;
        report.scanned = due.len();
        if due.is_empty() {
            return Ok(report);
        }

        let (deletes, writes): (Vec<_>, Vec<_>) = due
            .into_iter()
            .partition(|item| item.operation == SyncOperation::Delete);

        for batch in self.by_level(writes, false) {
            self.run_batch(batch, &mut report).await;
        }
        for batch in self.by_level(deletes, true) {
            self.run_batch(batch, &mut report).await;
        }
        Ok(report)
    }

    /// Oldest pending row of each record, if due.
    async fn select_due(&self) -> SyncResult<Vec<SyncQueueItem>> {
        let now = Utc::now();
        let pending = self
            .store
            .sync_items(&SyncItemFilter::all().with_status(SyncStatus::Pending))
            .await?;

        let mut seen = HashSet::new();
        let mut due = Vec::new();
        for item in pending {
            if !seen.insert((item.model_type.clone(), item.model_id.clone())) {
                continue;
            }
            if item.is_due(now) {
                due.push(item);
                if due.len() >= self.scan_batch_size {
                    break;
                }
            }
        }
        Ok(due)
    }

    fn by_level(&self, items: Vec<SyncQueueItem>, descending: bool) -> Vec<Vec<SyncQueueItem>> {
        let mut levels: BTreeMap<usize, Vec<SyncQueueItem>> = BTreeMap::new();
        for item in items {
            let level = self.resolver.compute_level(&item.model_type);
            levels.entry(level).or_default().push(item);
        }
        if descending {
            levels.into_values().rev().collect()
        } else {
            levels.into_values().collect()
        }
    }

    /// Submits one level, at most a queue's capacity at a time.
    async fn run_batch(&self, batch: Vec<SyncQueueItem>, report: &mut ProcessReport) {
        for chunk in batch.chunks(self.submit_chunk) {
            let outcomes = join_all(chunk.iter().cloned().map(|item| self.submit(item))).await;
            for outcome in outcomes {
                report.record(outcome);
            }
        }
    }

    async fn submit(&self, item: SyncQueueItem) -> SyncResult<RowOutcome> {
        let Some(handler) = self.registry.handler(&item.model_type) else {
            tracing::warn!(
                model_type = %item.model_type,
                row = item.id,
                "no handler registered, skipping row"
            );
            return Ok(RowOutcome::Skipped);
        };

        let settler = Arc::clone(&self.settler);
        let row_id = item.id;
        let task = NetworkTask::new(
            item.task_key(),
            item.operation.into(),
            item.model_type.clone(),
            item.model_id.clone(),
            async move { settler.run(handler, row_id).await },
        );

        match self.queues.enqueue_task(task, QueueType::Background).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_queue_rejection() => {
                tracing::debug!(row = row_id, error = %e, "row deferred");
                Ok(RowOutcome::Deferred)
            }
            Err(e) => {
                tracing::warn!(row = row_id, error = %e, "could not record sync outcome");
                Err(e)
            }
        }
    }

    /// Puts a dead (or pending) row back in line with a fresh attempt budget.
    pub async fn retry_dead(&self, id: u64) -> SyncResult<SyncQueueItem> {
        retry_item(self.store.as_ref(), id).await
    }

    /// Deletes a row without syncing it.
    pub async fn discard(&self, id: u64) -> SyncResult<bool> {
        discard_item(self.store.as_ref(), id).await
    }

    /// Deletes synced rows older than `older_than`.
    pub async fn prune_synced(&self, older_than: Duration) -> SyncResult<usize> {
        prune_synced_items(self.store.as_ref(), older_than).await
    }
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("mode", &self.mode())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Puts a row back in line: pending, ready now, attempts reset.
///
/// # Errors
///
/// Fails if the row does not exist, is already synced, or another pending
/// row holds the same record and operation.
pub async fn retry_item(store: &dyn LocalStore, id: u64) -> SyncResult<SyncQueueItem> {
    let mut item = store
        .get_sync_item(id)
        .await?
        .ok_or(driftsync_store::StoreError::SyncItemNotFound { id })?;
    if item.status == SyncStatus::Synced {
        return Err(SyncError::InvalidState(format!(
            "sync item {id} is already synced"
        )));
    }
    item.status = SyncStatus::Pending;
    item.attempt_count = 0;
    item.next_retry_at = None;
    item.last_error = None;
    if item.id_negotiation == IdNegotiationStatus::Failed {
        item.id_negotiation = IdNegotiationStatus::Pending;
    }
    store.update_sync_item(&item).await?;
    tracing::info!(row = id, "sync item requeued");
    Ok(item)
}

/// Deletes a row. Returns true if it existed.
pub async fn discard_item(store: &dyn LocalStore, id: u64) -> SyncResult<bool> {
    let existed = store.delete_sync_item(id).await?;
    if existed {
        tracing::info!(row = id, "sync item discarded");
    }
    Ok(existed)
}

/// Deletes synced rows last updated more than `older_than` ago.
pub async fn prune_synced_items(store: &dyn LocalStore, older_than: Duration) -> SyncResult<usize> {
    let cutoff = Utc::now() - to_chrono(older_than);
    let pruned = store.prune_synced(cutoff).await?;
    tracing::debug!(pruned, "pruned synced items");
    Ok(pruned)
}
