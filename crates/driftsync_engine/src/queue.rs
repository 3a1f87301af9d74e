//! Bounded request queues.
//!
//! The queue manager runs network tasks in three independent lanes:
//! foreground (a user is waiting), load (remote reads) and background
//! (deferred sync). Each lane has its own concurrency limit, capacity bound,
//! capacity-wait timeout and idempotency-key table.
//!
//! ## Task lifecycle
//!
//! 1. The idempotency key is registered synchronously; a key already present
//!    in the lane fails the enqueue with [`SyncError::DuplicateTask`].
//! 2. The task waits for capacity, polling and woken early whenever a slot
//!    frees, until the lane's capacity timeout elapses.
//! 3. The task waits for a concurrency permit (FIFO), then executes inside
//!    the caller's future.
//! 4. Settlement, success, failure, cancellation or drop, releases the key
//!    and the capacity slot exactly once.
//!
//! Disconnecting cancels every outstanding task and resets all lanes.

use crate::config::QueueConfig;
use crate::error::{SyncError, SyncResult};
use driftsync_store::SyncOperation;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One of the three request queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    /// User-initiated remote-first saves.
    Foreground,
    /// Remote loads and refreshes.
    Load,
    /// Deferred sync of queued writes.
    Background,
}

impl QueueType {
    /// Every queue, in priority order.
    pub const ALL: [QueueType; 3] = [QueueType::Foreground, QueueType::Load, QueueType::Background];

    /// Returns the lowercase name of the queue.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Foreground => "foreground",
            QueueType::Load => "load",
            QueueType::Background => "background",
        }
    }

    fn index(self) -> usize {
        match self {
            QueueType::Foreground => 0,
            QueueType::Load => 1,
            QueueType::Background => 2,
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a network task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskOperation {
    /// Create a record remotely.
    Create,
    /// Update a record remotely.
    Update,
    /// Delete a record remotely.
    Delete,
    /// Read from the remote API.
    Fetch,
}

impl From<SyncOperation> for TaskOperation {
    fn from(op: SyncOperation) -> Self {
        match op {
            SyncOperation::Create => TaskOperation::Create,
            SyncOperation::Update => TaskOperation::Update,
            SyncOperation::Delete => TaskOperation::Delete,
        }
    }
}

/// An ephemeral unit of remote work.
pub struct NetworkTask<T> {
    /// Key deduplicating the task within its queue.
    pub idempotency_key: String,
    /// What the task does.
    pub operation: TaskOperation,
    /// Model type the task concerns.
    pub model_type: String,
    /// Record the task concerns.
    pub model_id: String,
    exec: BoxFuture<'static, SyncResult<T>>,
}

impl<T> NetworkTask<T> {
    /// Creates a task that runs `exec` once admitted.
    pub fn new<F>(
        idempotency_key: impl Into<String>,
        operation: TaskOperation,
        model_type: impl Into<String>,
        model_id: impl Into<String>,
        exec: F,
    ) -> Self
    where
        F: Future<Output = SyncResult<T>> + Send + 'static,
    {
        Self {
            idempotency_key: idempotency_key.into(),
            operation,
            model_type: model_type.into(),
            model_id: model_id.into(),
            exec: Box::pin(exec),
        }
    }
}

impl<T> fmt::Debug for NetworkTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkTask")
            .field("idempotency_key", &self.idempotency_key)
            .field("operation", &self.operation)
            .field("model_type", &self.model_type)
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

/// Snapshot of one queue's load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Admitted tasks, running or waiting for a concurrency slot.
    pub active_and_pending_tasks: usize,
    /// Admitted tasks waiting for a concurrency slot.
    pub pending_tasks: usize,
    /// Tasks executing right now.
    pub running_tasks: usize,
    /// Configured capacity.
    pub capacity: usize,
}

/// Mutable bookkeeping of one lane. Replaced wholesale on disconnect.
struct LaneState {
    generation: u64,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
    keys: HashSet<String>,
    admitted: usize,
    running: usize,
}

impl LaneState {
    fn new(generation: u64, concurrency: usize) -> Self {
        Self {
            generation,
            cancel: CancellationToken::new(),
            permits: Arc::new(Semaphore::new(concurrency)),
            keys: HashSet::new(),
            admitted: 0,
            running: 0,
        }
    }
}

struct Lane {
    queue: QueueType,
    concurrency: usize,
    capacity: usize,
    capacity_timeout: std::time::Duration,
    poll_interval: std::time::Duration,
    state: Mutex<LaneState>,
    freed: Notify,
}

impl Lane {
    fn reset(&self) {
        let mut state = self.state.lock();
        state.cancel.cancel();
        let generation = state.generation + 1;
        *state = LaneState::new(generation, self.concurrency);
        drop(state);
        self.freed.notify_waiters();
    }
}

/// Releases a task's key and slots when the task settles.
struct Admission<'a> {
    lane: &'a Lane,
    key: String,
    generation: u64,
    admitted: bool,
    running: bool,
}

impl Admission<'_> {
    /// Takes a capacity slot if one is free.
    fn try_admit(&mut self) -> SyncResult<bool> {
        let mut state = self.lane.state.lock();
        if state.generation != self.generation {
            return Err(SyncError::QueueCancelled {
                queue: self.lane.queue,
            });
        }
        if state.admitted < self.lane.capacity {
            state.admitted += 1;
            self.admitted = true;
        }
        Ok(self.admitted)
    }

    fn start_running(&mut self) {
        let mut state = self.lane.state.lock();
        if state.generation == self.generation {
            state.running += 1;
            self.running = true;
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        let mut state = self.lane.state.lock();
        if state.generation != self.generation {
            return;
        }
        state.keys.remove(&self.key);
        if self.admitted {
            state.admitted -= 1;
        }
        if self.running {
            state.running -= 1;
        }
        drop(state);
        self.lane.freed.notify_waiters();
    }
}

/// Runs network tasks in three bounded, independently limited queues.
///
/// # Example
///
/// ```rust
/// use driftsync_engine::{NetworkTask, QueueConfig, QueueManager, QueueType, TaskOperation};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queues = QueueManager::new(QueueConfig::default());
/// let task = NetworkTask::new("fetch:todo:t-1", TaskOperation::Fetch, "todo", "t-1", async {
///     Ok(42)
/// });
/// let value = queues.enqueue_task(task, QueueType::Load).await.unwrap();
/// assert_eq!(value, 42);
/// # }
/// ```
pub struct QueueManager {
    lanes: [Lane; 3],
    connected: AtomicBool,
    connectivity: watch::Sender<bool>,
}

impl QueueManager {
    /// Creates a connected queue manager.
    pub fn new(config: QueueConfig) -> Self {
        let lanes = QueueType::ALL.map(|queue| {
            let limits = config.limits(queue);
            Lane {
                queue,
                concurrency: limits.concurrency,
                capacity: limits.capacity,
                capacity_timeout: limits.capacity_timeout,
                poll_interval: limits.poll_interval,
                state: Mutex::new(LaneState::new(0, limits.concurrency)),
                freed: Notify::new(),
            }
        });
        let (connectivity, _) = watch::channel(true);
        Self {
            lanes,
            connected: AtomicBool::new(true),
            connectivity,
        }
    }

    fn lane(&self, queue: QueueType) -> &Lane {
        &self.lanes[queue.index()]
    }

    /// Runs `task` in `queue` and returns its result.
    ///
    /// # Errors
    ///
    /// - [`SyncError::DuplicateTask`] if the task's key is already in the queue
    /// - [`SyncError::CapacityTimeout`] if the queue stays full too long
    /// - [`SyncError::QueueCancelled`] if disconnected, now or before settling
    /// - whatever the task itself returns
    pub async fn enqueue_task<T>(&self, task: NetworkTask<T>, queue: QueueType) -> SyncResult<T> {
        let lane = self.lane(queue);
        let NetworkTask {
            idempotency_key,
            operation,
            model_type,
            model_id,
            exec,
        } = task;

        let (mut admission, cancel, permits) = {
            let mut state = lane.state.lock();
            if !self.is_connected() {
                return Err(SyncError::QueueCancelled { queue });
            }
            if !state.keys.insert(idempotency_key.clone()) {
                tracing::debug!(%queue, key = %idempotency_key, "rejecting duplicate task");
                return Err(SyncError::DuplicateTask {
                    queue,
                    key: idempotency_key,
                });
            }
            let admission = Admission {
                lane,
                key: idempotency_key,
                generation: state.generation,
                admitted: false,
                running: false,
            };
            (admission, state.cancel.clone(), Arc::clone(&state.permits))
        };

        let started = Instant::now();
        let deadline = started + lane.capacity_timeout;
        while !admission.try_admit()? {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    %queue,
                    key = %admission.key,
                    waited_ms = lane.capacity_timeout.as_millis() as u64,
                    "queue capacity wait timed out"
                );
                return Err(SyncError::CapacityTimeout {
                    queue,
                    waited: now - started,
                });
            }
            let nap = lane.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::QueueCancelled { queue }),
                _ = lane.freed.notified() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }

        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::QueueCancelled { queue }),
            permit = permits.acquire_owned() => {
                permit.map_err(|_| SyncError::QueueCancelled { queue })?
            }
        };
        admission.start_running();

        tracing::debug!(
            %queue,
            key = %admission.key,
            ?operation,
            model_type = %model_type,
            model_id = %model_id,
            "running task"
        );

        tokio::select! {
            _ = cancel.cancelled() => Err(SyncError::QueueCancelled { queue }),
            result = exec => result,
        }
    }

    /// Returns a load snapshot of one queue.
    pub fn queue_stats(&self, queue: QueueType) -> QueueStats {
        let lane = self.lane(queue);
        let state = lane.state.lock();
        QueueStats {
            active_and_pending_tasks: state.admitted,
            pending_tasks: state.admitted - state.running,
            running_tasks: state.running,
            capacity: lane.capacity,
        }
    }

    /// Returns load snapshots of every queue.
    pub fn all_stats(&self) -> [(QueueType, QueueStats); 3] {
        QueueType::ALL.map(|queue| (queue, self.queue_stats(queue)))
    }

    /// Returns true if `key` is registered in `queue`.
    pub fn is_in_flight(&self, queue: QueueType, key: &str) -> bool {
        self.lane(queue).state.lock().keys.contains(key)
    }

    /// Returns true unless the queues were cleared for a disconnect.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Subscribes to connectivity changes.
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connectivity.subscribe()
    }

    /// Cancels every outstanding task and refuses new ones until restored.
    ///
    /// Cancelled callers see [`SyncError::QueueCancelled`]. Keys are
    /// released; durable sync queue rows are untouched.
    pub fn clear_queues_on_disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for lane in &self.lanes {
            lane.reset();
        }
        self.connectivity.send_replace(false);
        tracing::info!("request queues cleared on disconnect");
    }

    /// Recreates empty queues and accepts tasks again.
    ///
    /// Connectivity subscribers are notified even if the queues were never
    /// cleared, so a restore always prompts a sync scan.
    pub fn restore_queues_on_connect(&self) {
        if !self.is_connected() {
            for lane in &self.lanes {
                lane.reset();
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        self.connectivity.send_replace(true);
        tracing::info!("request queues restored on connect");
    }
}

impl fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueManager")
            .field("connected", &self.is_connected())
            .field("stats", &self.all_stats())
            .finish()
    }
}
