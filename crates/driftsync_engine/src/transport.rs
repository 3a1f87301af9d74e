//! Remote API abstraction.

use crate::error::{SyncError, SyncResult};
use crate::model::{IdStrategy, SyncModel};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Per-request data preserved across retries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Adapter-specific extras.
    pub extra: BTreeMap<String, Value>,
}

impl RequestOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds an extra.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// CRUD access to the remote copy of one model type.
///
/// Implementations must map remote failures onto the engine's error kinds:
/// [`SyncError::NotFound`] / [`SyncError::Gone`] when the record is absent,
/// [`SyncError::Validation`] when the payload is rejected,
/// [`SyncError::Server`] / [`SyncError::Network`] for transient failures.
#[async_trait]
pub trait RemoteApi<M: SyncModel>: Send + Sync {
    /// Fetches one record.
    async fn find_one(&self, id: &str, options: &RequestOptions) -> SyncResult<M>;

    /// Fetches every record.
    async fn find_all(&self, options: &RequestOptions) -> SyncResult<Vec<M>>;

    /// Creates a record, returning the server's copy.
    async fn create_one(&self, model: &M, options: &RequestOptions) -> SyncResult<M>;

    /// Partially updates a record, returning the server's copy.
    async fn update_one(&self, model: &M, options: &RequestOptions) -> SyncResult<M>;

    /// Replaces a record, returning the server's copy.
    async fn replace_one(&self, model: &M, options: &RequestOptions) -> SyncResult<M>;

    /// Deletes a record.
    async fn delete_one(&self, id: &str, options: &RequestOptions) -> SyncResult<()>;
}

/// A scripted failure for [`MockRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Fails with [`SyncError::Network`].
    Network,
    /// Fails with [`SyncError::Server`] and the given status.
    Server(u16),
    /// Fails with [`SyncError::Validation`].
    Validation,
    /// Fails with [`SyncError::NotFound`].
    NotFound,
    /// Fails with [`SyncError::Gone`].
    Gone,
}

impl MockFailure {
    fn into_error(self, model_type: &str, id: &str) -> SyncError {
        match self {
            MockFailure::Network => SyncError::Network("mock network failure".into()),
            MockFailure::Server(status) => SyncError::server(Some(status), "mock server failure"),
            MockFailure::Validation => SyncError::Validation("mock validation failure".into()),
            MockFailure::NotFound => SyncError::not_found(model_type, id),
            MockFailure::Gone => SyncError::gone(model_type, id),
        }
    }
}

/// Counts of calls a [`MockRemote`] received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    /// `find_one` calls.
    pub find_one: usize,
    /// `find_all` calls.
    pub find_all: usize,
    /// `create_one` calls.
    pub create: usize,
    /// `update_one` and `replace_one` calls.
    pub update: usize,
    /// `delete_one` calls.
    pub delete: usize,
}

/// An in-memory remote API for testing.
///
/// Server-ID models get `srv-<n>` identifiers on create. Failures can be
/// scripted one call at a time, or the whole remote taken offline.
#[derive(Debug)]
pub struct MockRemote<M: SyncModel> {
    records: RwLock<BTreeMap<String, M>>,
    failures: Mutex<VecDeque<MockFailure>>,
    calls: Mutex<MockCalls>,
    offline: AtomicBool,
    latency: Mutex<Duration>,
    next_id: AtomicU64,
}

impl<M: SyncModel> MockRemote<M> {
    /// Creates an empty, online remote.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(MockCalls::default()),
            offline: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            next_id: AtomicU64::new(1),
        }
    }

    /// Seeds a record on the server.
    pub fn insert(&self, model: M) {
        self.records.write().insert(model.id().to_string(), model);
    }

    /// Returns the server's copy of a record.
    pub fn get(&self, id: &str) -> Option<M> {
        self.records.read().get(id).cloned()
    }

    /// Returns every server record.
    pub fn records(&self) -> Vec<M> {
        self.records.read().values().cloned().collect()
    }

    /// Removes a record from the server.
    pub fn remove(&self, id: &str) -> Option<M> {
        self.records.write().remove(id)
    }

    /// Makes the next call fail.
    pub fn fail_next(&self, failure: MockFailure) {
        self.failures.lock().push_back(failure);
    }

    /// Makes the next `n` calls fail.
    pub fn fail_times(&self, n: usize, failure: MockFailure) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat(failure).take(n));
    }

    /// Makes every call fail with a network error while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Returns the call counts.
    pub fn calls(&self) -> MockCalls {
        *self.calls.lock()
    }

    async fn begin(&self, id: &str, count: impl FnOnce(&mut MockCalls)) -> SyncResult<()> {
        count(&mut self.calls.lock());
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(MockFailure::Network.into_error(M::MODEL_TYPE, id));
        }
        let failure = self.failures.lock().pop_front();
        match failure {
            Some(failure) => Err(failure.into_error(M::MODEL_TYPE, id)),
            None => Ok(()),
        }
    }

    fn store(&self, model: &M) -> M {
        let model = model.clone();
        self.records
            .write()
            .insert(model.id().to_string(), model.clone());
        model
    }
}

impl<M: SyncModel> Default for MockRemote<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M: SyncModel> RemoteApi<M> for MockRemote<M> {
    async fn find_one(&self, id: &str, _options: &RequestOptions) -> SyncResult<M> {
        self.begin(id, |c| c.find_one += 1).await?;
        self.get(id)
            .ok_or_else(|| SyncError::not_found(M::MODEL_TYPE, id))
    }

    async fn find_all(&self, _options: &RequestOptions) -> SyncResult<Vec<M>> {
        self.begin("*", |c| c.find_all += 1).await?;
        Ok(self.records())
    }

    async fn create_one(&self, model: &M, _options: &RequestOptions) -> SyncResult<M> {
        self.begin(model.id(), |c| c.create += 1).await?;
        let mut created = model.clone();
        if M::ID_STRATEGY == IdStrategy::Server {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            created.set_id(format!("srv-{n}"));
        }
        Ok(self.store(&created))
    }

    async fn update_one(&self, model: &M, _options: &RequestOptions) -> SyncResult<M> {
        self.begin(model.id(), |c| c.update += 1).await?;
        if !self.records.read().contains_key(model.id()) {
            return Err(SyncError::not_found(M::MODEL_TYPE, model.id()));
        }
        Ok(self.store(model))
    }

    async fn replace_one(&self, model: &M, _options: &RequestOptions) -> SyncResult<M> {
        self.begin(model.id(), |c| c.update += 1).await?;
        Ok(self.store(model))
    }

    async fn delete_one(&self, id: &str, _options: &RequestOptions) -> SyncResult<()> {
        self.begin(id, |c| c.delete += 1).await?;
        match self.records.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(SyncError::not_found(M::MODEL_TYPE, id)),
        }
    }
}
