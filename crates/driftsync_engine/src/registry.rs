//! Registered models.
//!
//! Application code reaches repositories by type ([`ModelRegistry::repository`]).
//! Sync queue rows only carry a model type name, so the retry executor
//! reaches the same models through type-erased [`SyncHandler`]s keyed by name.

use crate::error::{SyncError, SyncResult};
use crate::model::{IdStrategy, Relation, SyncModel};
use crate::repository::Repository;
use crate::transport::{RemoteApi, RequestOptions};
use async_trait::async_trait;
use driftsync_store::{Reference, SyncOperation, SyncQueueItem};
use parking_lot::RwLock;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Header carrying a sync queue row's idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Type-erased access to one model's remote API.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Model type name.
    fn model_type(&self) -> &'static str;

    /// JSON field holding the identifier.
    fn id_field(&self) -> &'static str;

    /// Who assigns identifiers.
    fn id_strategy(&self) -> IdStrategy;

    /// Foreign keys declared by the model.
    fn relations(&self) -> Vec<Relation>;

    /// Sends a queued write to the remote API.
    ///
    /// Returns the server's copy of the record for creates and updates.
    async fn push(&self, item: &SyncQueueItem) -> SyncResult<Option<Value>>;

    /// Deletes a record on the remote API without going through the sync queue.
    async fn delete_remote(&self, id: &str, options: &RequestOptions) -> SyncResult<()>;
}

/// [`SyncHandler`] over a typed [`RemoteApi`].
pub struct RemoteHandler<M: SyncModel> {
    remote: Arc<dyn RemoteApi<M>>,
}

impl<M: SyncModel> RemoteHandler<M> {
    /// Wraps a remote API.
    pub fn new(remote: Arc<dyn RemoteApi<M>>) -> Self {
        Self { remote }
    }
}

/// Rebuilds the request options a row was queued with.
pub(crate) fn options_for(item: &SyncQueueItem) -> RequestOptions {
    let mut options = RequestOptions {
        headers: item.headers.clone(),
        extra: item.extra.clone(),
    };
    if let Some(key) = &item.idempotency_key {
        options
            .headers
            .entry(IDEMPOTENCY_HEADER.to_string())
            .or_insert_with(|| key.clone());
    }
    options
}

#[async_trait]
impl<M: SyncModel> SyncHandler for RemoteHandler<M> {
    fn model_type(&self) -> &'static str {
        M::MODEL_TYPE
    }

    fn id_field(&self) -> &'static str {
        M::ID_FIELD
    }

    fn id_strategy(&self) -> IdStrategy {
        M::ID_STRATEGY
    }

    fn relations(&self) -> Vec<Relation> {
        M::relations()
    }

    async fn push(&self, item: &SyncQueueItem) -> SyncResult<Option<Value>> {
        let options = options_for(item);
        match item.operation {
            SyncOperation::Create => {
                let model: M = serde_json::from_value(item.payload.clone())?;
                let created = self.remote.create_one(&model, &options).await?;
                Ok(Some(serde_json::to_value(created)?))
            }
            SyncOperation::Update => {
                let model: M = serde_json::from_value(item.payload.clone())?;
                let updated = self.remote.update_one(&model, &options).await?;
                Ok(Some(serde_json::to_value(updated)?))
            }
            SyncOperation::Delete => {
                let id = item.payload.as_str().unwrap_or(&item.model_id);
                self.delete_remote(id, &options).await?;
                Ok(None)
            }
        }
    }

    async fn delete_remote(&self, id: &str, options: &RequestOptions) -> SyncResult<()> {
        self.remote.delete_one(id, options).await
    }
}

/// A model whose records are deleted along with a parent record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeChild {
    /// Child model type.
    pub model_type: String,
    /// Child field referencing the parent.
    pub field: String,
    /// Child identifier field.
    pub id_field: String,
}

/// Typed repositories plus name-keyed sync handlers.
#[derive(Default)]
pub struct ModelRegistry {
    handlers: RwLock<BTreeMap<String, Arc<dyn SyncHandler>>>,
    repositories: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler of a model type, replacing any previous one.
    pub fn register_handler(&self, handler: Arc<dyn SyncHandler>) {
        self.handlers
            .write()
            .insert(handler.model_type().to_string(), handler);
    }

    /// Returns the handler of a model type.
    pub fn handler(&self, model_type: &str) -> Option<Arc<dyn SyncHandler>> {
        self.handlers.read().get(model_type).cloned()
    }

    /// Returns the handler of a model type or an error.
    pub fn require_handler(&self, model_type: &str) -> SyncResult<Arc<dyn SyncHandler>> {
        self.handler(model_type)
            .ok_or_else(|| SyncError::UnknownModelType(model_type.to_string()))
    }

    /// Returns every registered model type name.
    pub fn model_types(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    pub(crate) fn insert_repository<M: SyncModel>(&self, repository: Arc<Repository<M>>) {
        self.repositories
            .write()
            .insert(TypeId::of::<M>(), repository);
    }

    /// Returns the repository of `M`, if registered.
    pub fn repository<M: SyncModel>(&self) -> Option<Arc<Repository<M>>> {
        let any = self.repositories.read().get(&TypeId::of::<M>()).cloned()?;
        any.downcast::<Repository<M>>().ok()
    }

    /// Returns every foreign key, in any registered model, that targets
    /// `model_type`.
    pub fn references_to(&self, model_type: &str) -> Vec<Reference> {
        self.handlers
            .read()
            .values()
            .flat_map(|handler| {
                let owner = handler.model_type();
                handler
                    .relations()
                    .into_iter()
                    .filter(move |rel| rel.target == model_type)
                    .map(move |rel| Reference {
                        model_type: owner.to_string(),
                        field: rel.field.to_string(),
                    })
            })
            .collect()
    }

    /// Returns the models deleted along with a `model_type` record.
    pub fn cascade_children(&self, model_type: &str) -> Vec<CascadeChild> {
        self.handlers
            .read()
            .values()
            .flat_map(|handler| {
                let owner = handler.model_type();
                let id_field = handler.id_field();
                handler
                    .relations()
                    .into_iter()
                    .filter(move |rel| rel.cascade_delete && rel.target == model_type)
                    .map(move |rel| CascadeChild {
                        model_type: owner.to_string(),
                        field: rel.field.to_string(),
                        id_field: id_field.to_string(),
                    })
            })
            .collect()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("model_types", &self.model_types())
            .finish()
    }
}
