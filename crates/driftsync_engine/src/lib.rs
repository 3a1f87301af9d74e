//! # Driftsync Engine
//!
//! Offline-first synchronization between a local store and a remote API.
//!
//! Applications read and write through per-model [`Repository`] handles.
//! Writes land in the local store together with a durable sync queue row;
//! the [`RetryExecutor`] later pushes those rows to the server, parents
//! before children, with exponential backoff on failure. All network work
//! runs through the [`QueueManager`]'s three bounded queues.
//!
//! ## Components
//!
//! - [`QueueManager`] - foreground, load and background queues with
//!   concurrency limits, capacity backpressure and idempotency keys
//! - [`DependencyResolver`] - model-level ordering from declared relations
//! - [`RetryExecutor`] - scans due rows, submits them level by level
//! - [`Repository`] - save/load policies, coalescing, ID negotiation,
//!   cascade delete
//! - [`SyncContext`] - owns all of the above for one store
//!
//! ## Example
//!
//! ```rust
//! use driftsync_engine::{MockRemote, SyncConfig, SyncContext, SyncModel};
//! use driftsync_store::MemoryStore;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Task {
//!     id: String,
//!     title: String,
//! }
//!
//! impl SyncModel for Task {
//!     const MODEL_TYPE: &'static str = "task";
//!
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//!
//!     fn set_id(&mut self, id: String) {
//!         self.id = id;
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> driftsync_engine::SyncResult<()> {
//! let context = SyncContext::new(SyncConfig::default(), Arc::new(MemoryStore::new()))?;
//! let remote = Arc::new(MockRemote::<Task>::new());
//! let tasks = context.register::<Task>(remote.clone())?;
//!
//! let task = tasks
//!     .save(Task { id: String::new(), title: "write docs".into() })
//!     .await?;
//! context.process_background_sync_tasks().await?;
//! assert!(remote.get(&task.id).is_some());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod dependency;
mod error;
mod http;
mod model;
mod queue;
mod registry;
mod repository;
mod retry;
mod transport;

pub use config::{QueueConfig, QueueLimits, RetryConfig, SyncConfig};
pub use context::SyncContext;
pub use dependency::DependencyResolver;
pub use error::{SyncError, SyncResult};
pub use http::{
    HeaderBuilder, HttpClient, HttpMethod, HttpRequest, HttpResponse, RestAdapter, RestUrls,
    StaticHeaders, UrlBuilder,
};
pub use model::{
    is_temporary_id, temporary_id, IdStrategy, LoadPolicy, Relation, SavePolicy, SyncModel,
    TEMP_ID_PREFIX,
};
pub use queue::{NetworkTask, QueueManager, QueueStats, QueueType, TaskOperation};
pub use registry::{CascadeChild, ModelRegistry, RemoteHandler, SyncHandler, IDEMPOTENCY_HEADER};
pub use repository::Repository;
pub use retry::{
    discard_item, prune_synced_items, retry_item, ExecutorMode, ProcessReport, RetryExecutor,
    RowOutcome,
};
pub use transport::{MockCalls, MockFailure, MockRemote, RemoteApi, RequestOptions};
