//! Model trait and per-model policies.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of client-generated identifiers awaiting server assignment.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Returns a fresh temporary identifier.
pub fn temporary_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Returns true if `id` was produced by [`temporary_id`].
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Who assigns a model's identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// The client picks final identifiers (e.g. UUIDs).
    Client,
    /// The server assigns identifiers; creates go through ID negotiation.
    Server,
}

/// A foreign key declared by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relation {
    /// Field holding the referenced record's id.
    pub field: &'static str,
    /// Model type of the referenced record.
    pub target: &'static str,
    /// Delete this record when the referenced record is deleted.
    pub cascade_delete: bool,
}

impl Relation {
    /// Declares a plain foreign key.
    pub const fn new(field: &'static str, target: &'static str) -> Self {
        Self {
            field,
            target,
            cascade_delete: false,
        }
    }

    /// Declares a foreign key whose owner is deleted with its target.
    pub const fn cascading(field: &'static str, target: &'static str) -> Self {
        Self {
            field,
            target,
            cascade_delete: true,
        }
    }
}

/// A record type that can be stored locally and synced remotely.
///
/// Records are persisted as JSON objects; the id lives in [`Self::ID_FIELD`].
///
/// # Example
///
/// ```rust
/// use driftsync_engine::{IdStrategy, Relation, SyncModel};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Note {
///     id: String,
///     folder_id: String,
///     body: String,
/// }
///
/// impl SyncModel for Note {
///     const MODEL_TYPE: &'static str = "note";
///
///     fn id(&self) -> &str {
///         &self.id
///     }
///
///     fn set_id(&mut self, id: String) {
///         self.id = id;
///     }
///
///     fn relations() -> Vec<Relation> {
///         vec![Relation::cascading("folder_id", "folder")]
///     }
/// }
///
/// assert_eq!(Note::ID_STRATEGY, IdStrategy::Client);
/// ```
pub trait SyncModel: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Unique model type name; keys local tables and sync queue rows.
    const MODEL_TYPE: &'static str;

    /// JSON field holding the identifier.
    const ID_FIELD: &'static str = "id";

    /// Who assigns identifiers.
    const ID_STRATEGY: IdStrategy = IdStrategy::Client;

    /// Returns the record identifier.
    fn id(&self) -> &str;

    /// Replaces the record identifier.
    fn set_id(&mut self, id: String);

    /// Returns the foreign keys of this model.
    fn relations() -> Vec<Relation> {
        Vec::new()
    }
}

/// Where a save goes first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavePolicy {
    /// Write locally and queue the remote write.
    #[default]
    LocalFirst,
    /// Write remotely, then persist the server's answer.
    RemoteFirst,
}

/// Where a load reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Read the local store only.
    LocalOnly,
    /// Return the local value and refresh it in the background.
    #[default]
    LocalThenRemote,
    /// Fetch remotely, then persist.
    RemoteFirst,
}

impl fmt::Display for SavePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SavePolicy::LocalFirst => f.write_str("local_first"),
            SavePolicy::RemoteFirst => f.write_str("remote_first"),
        }
    }
}

impl fmt::Display for LoadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadPolicy::LocalOnly => f.write_str("local_only"),
            LoadPolicy::LocalThenRemote => f.write_str("local_then_remote"),
            LoadPolicy::RemoteFirst => f.write_str("remote_first"),
        }
    }
}
