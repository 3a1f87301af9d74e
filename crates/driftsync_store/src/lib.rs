//! # Driftsync Store
//!
//! Local store trait and implementations for driftsync.
//!
//! This crate owns everything that lives on the device: per-model records,
//! the durable sync queue table, and the change feed that reports committed
//! mutations. It knows nothing about remote APIs or scheduling.
//!
//! ## Design Principles
//!
//! - Records are JSON objects keyed by `(model_type, id)`
//! - Multi-step writes go through [`WriteBatch`] and commit all-or-nothing
//! - Temporary-to-server ID replacement is a single atomic [`IdRewrite`]
//! - Change events are emitted only after a commit succeeds
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and ephemeral use
//! - [`FileStore`] - JSON snapshot in a locked directory
//!
//! ## Example
//!
//! ```rust
//! use driftsync_store::{LocalStore, MemoryStore, SyncOperation, SyncQueueItem};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = MemoryStore::new();
//! let row = store
//!     .insert_sync_item(SyncQueueItem::new(
//!         "todo",
//!         "t-1",
//!         SyncOperation::Create,
//!         json!({"id": "t-1"}),
//!     ))
//!     .await
//!     .unwrap();
//! assert_eq!(row.id, 1);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod error;
mod file;
mod memory;
mod query;
mod store;
mod sync_queue;

pub use change_feed::{ChangeEvent, ChangeFeed, ChangeKind};
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use query::{Filter, FilterOp, Query, SortKey};
pub use store::{
    IdRewrite, LocalStore, Reference, RewriteSummary, SettleItem, SyncItemFilter, WriteBatch,
    WriteOp,
};
pub use sync_queue::{IdNegotiationStatus, SyncOperation, SyncQueueItem, SyncStatus};
