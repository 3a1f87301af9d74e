//! Change feed for observing committed record mutations.
//!
//! The feed emits one event per committed local mutation, per model type,
//! enabling reactive UI updates and test assertions. Background sync failures
//! are reported on the same stream as `Error` events.
//!
//! # Usage
//!
//! ```rust
//! use driftsync_store::{ChangeEvent, ChangeFeed, ChangeKind};
//! use serde_json::json;
//!
//! let feed = ChangeFeed::new();
//! let mut todos = feed.subscribe("todo");
//!
//! feed.emit(ChangeEvent::created("todo", "t-1", json!({"id": "t-1"})));
//!
//! let event = todos.try_recv().unwrap();
//! assert_eq!(event.kind, ChangeKind::Created);
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Per-model channel buffer. Slow receivers observe `Lagged` past this.
const CHANNEL_CAPACITY: usize = 256;

/// Kind of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Record was inserted (no previous version existed).
    Created,
    /// Record was replaced.
    Updated,
    /// Record was removed.
    Deleted,
    /// A background sync of the record failed.
    Error,
}

/// A single change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Feed-assigned sequence number (0 until emitted).
    pub sequence: u64,
    /// Model type of the record.
    pub model_type: String,
    /// Identifier of the record.
    pub model_id: String,
    /// Kind of change.
    pub kind: ChangeKind,
    /// New record value for `Created`/`Updated`.
    pub payload: Option<Value>,
    /// Former identifier when ID negotiation renamed the record.
    pub previous_id: Option<String>,
    /// Error text for `Error` events.
    pub message: Option<String>,
}

impl ChangeEvent {
    fn new(model_type: &str, model_id: &str, kind: ChangeKind) -> Self {
        Self {
            sequence: 0,
            model_type: model_type.to_string(),
            model_id: model_id.to_string(),
            kind,
            payload: None,
            previous_id: None,
            message: None,
        }
    }

    /// Creates a `Created` event.
    pub fn created(model_type: &str, model_id: &str, payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(model_type, model_id, ChangeKind::Created)
        }
    }

    /// Creates an `Updated` event.
    pub fn updated(model_type: &str, model_id: &str, payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(model_type, model_id, ChangeKind::Updated)
        }
    }

    /// Creates a `Deleted` event.
    pub fn deleted(model_type: &str, model_id: &str) -> Self {
        Self::new(model_type, model_id, ChangeKind::Deleted)
    }

    /// Creates an `Error` event.
    pub fn error(model_type: &str, model_id: &str, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(model_type, model_id, ChangeKind::Error)
        }
    }

    /// Records the identifier this record had before ID negotiation.
    #[must_use]
    pub fn with_previous_id(mut self, previous_id: impl Into<String>) -> Self {
        self.previous_id = Some(previous_id.into());
        self
    }
}

/// A change feed that fans events out per model type.
///
/// The feed:
/// - Preserves emit order per model type
/// - Supports any number of subscribers per model type, plus global ones
/// - Keeps a bounded history for catch-up polling
/// - Is thread-safe
pub struct ChangeFeed {
    channels: RwLock<HashMap<String, broadcast::Sender<ChangeEvent>>>,
    all: broadcast::Sender<ChangeEvent>,
    history: RwLock<VecDeque<ChangeEvent>>,
    max_history: usize,
    sequence: AtomicU64,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a change feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        let (all, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            channels: RwLock::new(HashMap::new()),
            all,
            history: RwLock::new(VecDeque::new()),
            max_history,
            sequence: AtomicU64::new(0),
        }
    }

    /// Subscribes to events for one model type.
    pub fn subscribe(&self, model_type: &str) -> broadcast::Receiver<ChangeEvent> {
        if let Some(tx) = self.channels.read().get(model_type) {
            return tx.subscribe();
        }
        self.channels
            .write()
            .entry(model_type.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribes to events for every model type.
    pub fn subscribe_all(&self) -> broadcast::Receiver<ChangeEvent> {
        self.all.subscribe()
    }

    /// Emits a change event, assigning its sequence number.
    pub fn emit(&self, mut event: ChangeEvent) {
        event.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut history = self.history.write();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        // Sending fails only when nobody listens, which is fine.
        if let Some(tx) = self.channels.read().get(&event.model_type) {
            let _ = tx.send(event.clone());
        }
        let _ = self.all.send(event);
    }

    /// Emits multiple events from a single commit.
    pub fn emit_batch(&self, events: Vec<ChangeEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Returns events with sequence > cursor, up to limit.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<ChangeEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the latest assigned sequence number.
    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Returns the number of live subscribers for a model type.
    pub fn subscriber_count(&self, model_type: &str) -> usize {
        self.channels
            .read()
            .get(model_type)
            .map_or(0, |tx| tx.receiver_count())
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("latest_sequence", &self.latest_sequence())
            .field("max_history", &self.max_history)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emit_and_receive() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe("todo");

        feed.emit(ChangeEvent::created("todo", "t-1", json!({"id": "t-1"})));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, ChangeKind::Created);
        assert_eq!(received.model_id, "t-1");
        assert_eq!(received.sequence, 1);
    }

    #[test]
    fn events_are_routed_per_model_type() {
        let feed = ChangeFeed::new();
        let mut todos = feed.subscribe("todo");
        let mut projects = feed.subscribe("project");

        feed.emit(ChangeEvent::deleted("project", "p-1"));

        assert!(todos.try_recv().is_err());
        assert_eq!(projects.try_recv().unwrap().kind, ChangeKind::Deleted);
    }

    #[test]
    fn global_subscriber_sees_everything() {
        let feed = ChangeFeed::new();
        let mut all = feed.subscribe_all();

        feed.emit(ChangeEvent::deleted("project", "p-1"));
        feed.emit(ChangeEvent::error("todo", "t-1", "boom"));

        assert_eq!(all.try_recv().unwrap().model_type, "project");
        let err = all.try_recv().unwrap();
        assert_eq!(err.kind, ChangeKind::Error);
        assert_eq!(err.message.as_deref(), Some("boom"));
    }

    #[test]
    fn poll_from_cursor() {
        let feed = ChangeFeed::new();
        for i in 1..=5 {
            feed.emit(ChangeEvent::deleted("todo", &format!("t-{i}")));
        }

        let events = feed.poll(2, 10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 3);
        assert_eq!(feed.latest_sequence(), 5);
    }

    #[test]
    fn history_truncation() {
        let feed = ChangeFeed::with_max_history(3);
        for i in 1..=10 {
            feed.emit(ChangeEvent::deleted("todo", &format!("t-{i}")));
        }

        let events = feed.poll(0, 100);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 8);
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let feed = ChangeFeed::new();
        assert_eq!(feed.subscriber_count("todo"), 0);
        let rx = feed.subscribe("todo");
        assert_eq!(feed.subscriber_count("todo"), 1);
        drop(rx);
        assert_eq!(feed.subscriber_count("todo"), 0);
    }
}
