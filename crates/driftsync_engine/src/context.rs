//! The sync context.
//!
//! One [`SyncContext`] is built at startup and owns the engine's shared
//! services: the local store, the request queues, the dependency resolver,
//! the model registry and the retry executor. Models are registered once
//! with their remote API; the context then hands out typed repositories.

use crate::config::SyncConfig;
use crate::dependency::DependencyResolver;
use crate::error::{SyncError, SyncResult};
use crate::model::{LoadPolicy, SavePolicy, SyncModel};
use crate::queue::{QueueManager, QueueStats, QueueType};
use crate::registry::{ModelRegistry, RemoteHandler};
use crate::repository::{Policies, Repository, Services};
use crate::retry::{ProcessReport, RetryExecutor};
use crate::transport::RemoteApi;
use driftsync_store::{ChangeEvent, LocalStore, SyncItemFilter, SyncQueueItem};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Engine services for one local store.
///
/// # Example
///
/// ```no_run
/// use driftsync_engine::{SyncConfig, SyncContext};
/// use driftsync_store::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn demo() -> driftsync_engine::SyncResult<()> {
/// let context = SyncContext::new(SyncConfig::default(), Arc::new(MemoryStore::new()))?;
/// context.enable_foreground_mode(true).await?;
/// # Ok(())
/// # }
/// ```
pub struct SyncContext {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    queues: Arc<QueueManager>,
    resolver: Arc<DependencyResolver>,
    registry: Arc<ModelRegistry>,
    executor: Arc<RetryExecutor>,
}

impl SyncContext {
    /// Creates a context over `store`.
    ///
    /// The retry executor is created stopped; call [`Self::start`] or one
    /// of the mode methods to run it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if `config` is inconsistent.
    pub fn new(config: SyncConfig, store: Arc<dyn LocalStore>) -> SyncResult<Self> {
        config.validate()?;
        let queues = Arc::new(QueueManager::new(config.queues.clone()));
        let resolver = Arc::new(DependencyResolver::new());
        let registry = Arc::new(ModelRegistry::new());
        let executor = Arc::new(RetryExecutor::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&queues),
            Arc::clone(&resolver),
            Arc::clone(&registry),
        ));
        Ok(Self {
            config,
            store,
            queues,
            resolver,
            registry,
            executor,
        })
    }

    /// Registers a model with the default policies.
    pub fn register<M: SyncModel>(
        &self,
        remote: Arc<dyn RemoteApi<M>>,
    ) -> SyncResult<Arc<Repository<M>>> {
        self.register_with(
            remote,
            self.config.default_save_policy,
            self.config.default_load_policy,
        )
    }

    /// Registers a model with its own default policies.
    ///
    /// The model's relations become dependency edges. Registering a model
    /// again replaces its remote API and policies.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DependencyCycle`] if a relation would make the
    /// model graph cyclic. Self-references are allowed and ignored.
    pub fn register_with<M: SyncModel>(
        &self,
        remote: Arc<dyn RemoteApi<M>>,
        save_policy: SavePolicy,
        load_policy: LoadPolicy,
    ) -> SyncResult<Arc<Repository<M>>> {
        let targets: Vec<&str> = M::relations()
            .iter()
            .map(|relation| relation.target)
            .filter(|target| *target != M::MODEL_TYPE)
            .collect();
        self.resolver.register_dependencies(M::MODEL_TYPE, targets)?;

        self.registry
            .register_handler(Arc::new(RemoteHandler::new(Arc::clone(&remote))));
        let repository = Arc::new(Repository::new(
            self.services(),
            remote,
            Policies {
                save: save_policy,
                load: load_policy,
                fallback_to_local: self.config.fallback_to_local,
            },
        ));
        self.registry.insert_repository(Arc::clone(&repository));
        tracing::info!(
            model_type = M::MODEL_TYPE,
            level = self.resolver.compute_level(M::MODEL_TYPE),
            %save_policy,
            %load_policy,
            "registered model"
        );
        Ok(repository)
    }

    fn services(&self) -> Services {
        Services {
            store: Arc::clone(&self.store),
            queues: Arc::clone(&self.queues),
            executor: Arc::clone(&self.executor),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Returns the repository of `M`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownModelType`] if `M` was never registered.
    pub fn repository<M: SyncModel>(&self) -> SyncResult<Arc<Repository<M>>> {
        self.registry
            .repository::<M>()
            .ok_or_else(|| SyncError::UnknownModelType(M::MODEL_TYPE.to_string()))
    }

    /// Runs one sync pass. Entry point for platform background schedulers.
    pub async fn process_background_sync_tasks(&self) -> SyncResult<ProcessReport> {
        self.executor.process_due_tasks_now().await
    }

    /// Cancels all queued network work after connectivity is lost.
    pub fn clear_queues_on_disconnect(&self) {
        self.queues.clear_queues_on_disconnect();
    }

    /// Accepts network work again and syncs everything due.
    pub async fn restore_queues_on_connect(&self) -> SyncResult<ProcessReport> {
        self.queues.restore_queues_on_connect();
        self.executor.process_due_tasks_now().await
    }

    /// Starts the retry executor's timer in its current mode.
    pub fn start(&self) {
        self.executor.start();
    }

    /// Switches the executor to the foreground interval.
    pub async fn enable_foreground_mode(
        &self,
        force_sync: bool,
    ) -> SyncResult<Option<ProcessReport>> {
        self.executor.enable_foreground_mode(force_sync).await
    }

    /// Switches the executor to the background interval.
    pub fn enable_background_mode(&self) {
        self.executor.enable_background_mode();
    }

    /// Stops the executor and cancels queued network work.
    ///
    /// Sync queue rows stay in the store for the next start.
    pub async fn shutdown(&self) {
        self.executor.stop().await;
        self.queues.clear_queues_on_disconnect();
        tracing::info!("sync context shut down");
    }

    /// Returns a load snapshot of one queue.
    pub fn queue_stats(&self, queue: QueueType) -> QueueStats {
        self.queues.queue_stats(queue)
    }

    /// Lists sync queue rows, oldest first.
    pub async fn sync_items(&self, filter: &SyncItemFilter) -> SyncResult<Vec<SyncQueueItem>> {
        self.store.sync_items(filter).await.map_err(SyncError::from)
    }

    /// Puts a dead row back in line.
    pub async fn retry_item(&self, id: u64) -> SyncResult<SyncQueueItem> {
        self.executor.retry_dead(id).await
    }

    /// Deletes a row without syncing it.
    pub async fn discard_item(&self, id: u64) -> SyncResult<bool> {
        self.executor.discard(id).await
    }

    /// Deletes synced rows older than `older_than`.
    pub async fn prune_synced(&self, older_than: Duration) -> SyncResult<usize> {
        self.executor.prune_synced(older_than).await
    }

    /// Subscribes to change events of every model type.
    pub fn subscribe_all(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store.changes().subscribe_all()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Returns the request queues.
    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    /// Returns the dependency resolver.
    pub fn resolver(&self) -> &Arc<DependencyResolver> {
        &self.resolver
    }

    /// Returns the model registry.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Returns the retry executor.
    pub fn executor(&self) -> &Arc<RetryExecutor> {
        &self.executor
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("registry", &self.registry)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IdStrategy, Relation};
    use crate::transport::MockRemote;
    use driftsync_store::MemoryStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Folder {
        id: String,
        parent_id: Option<String>,
    }

    impl SyncModel for Folder {
        const MODEL_TYPE: &'static str = "folder";
        const ID_STRATEGY: IdStrategy = IdStrategy::Server;

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }

        fn relations() -> Vec<Relation> {
            vec![Relation::cascading("parent_id", "folder")]
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct File {
        id: String,
        folder_id: String,
    }

    impl SyncModel for File {
        const MODEL_TYPE: &'static str = "file";

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }

        fn relations() -> Vec<Relation> {
            vec![Relation::cascading("folder_id", "folder")]
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Label {
        id: String,
        owner_id: String,
        file_id: String,
    }

    impl SyncModel for Label {
        const MODEL_TYPE: &'static str = "label";

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }

        fn relations() -> Vec<Relation> {
            vec![
                Relation::new("owner_id", "owner"),
                Relation::new("file_id", "file"),
            ]
        }
    }

    fn context() -> SyncContext {
        SyncContext::new(SyncConfig::default(), Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SyncConfig::default().with_scan_batch_size(0);
        let result = SyncContext::new(config, Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn registration_builds_levels_and_repositories() {
        let ctx = context();
        assert!(matches!(
            ctx.repository::<Folder>(),
            Err(SyncError::UnknownModelType(_))
        ));

        ctx.register::<Folder>(Arc::new(MockRemote::<Folder>::new())).unwrap();
        ctx.register_with::<File>(
            Arc::new(MockRemote::<File>::new()),
            SavePolicy::RemoteFirst,
            LoadPolicy::LocalOnly,
        )
        .unwrap();

        assert_eq!(ctx.resolver().compute_level("folder"), 0);
        assert_eq!(ctx.resolver().compute_level("file"), 1);
        assert_eq!(
            ctx.repository::<File>().unwrap().save_policy(),
            SavePolicy::RemoteFirst
        );
        assert_eq!(ctx.registry().model_types(), vec!["file", "folder"]);
    }

    #[tokio::test]
    async fn cyclic_registration_records_nothing() {
        let ctx = context();
        ctx.register::<File>(Arc::new(MockRemote::<File>::new())).unwrap();
        ctx.resolver().register_dependency("file", "label").unwrap();

        let result = ctx.register::<Label>(Arc::new(MockRemote::<Label>::new()));
        assert!(matches!(result, Err(SyncError::DependencyCycle { .. })));

        assert!(ctx.resolver().dependencies_of("label").is_empty());
        assert!(ctx.resolver().dependents_of("owner").is_empty());
        assert!(ctx.registry().handler("label").is_none());
        assert_eq!(ctx.resolver().compute_level("file"), 1);
    }

    #[tokio::test]
    async fn restore_runs_a_pass() {
        let ctx = context();
        ctx.clear_queues_on_disconnect();
        let offline = ctx.process_background_sync_tasks().await.unwrap();
        assert!(offline.offline);

        let report = ctx.restore_queues_on_connect().await.unwrap();
        assert!(!report.offline);
        assert_eq!(report.scanned, 0);
    }

    #[tokio::test]
    async fn shutdown_stops_executor() {
        let ctx = context();
        ctx.enable_background_mode();
        assert!(ctx.executor().is_running());
        ctx.shutdown().await;
        assert!(!ctx.executor().is_running());
        assert!(!ctx.queues().is_connected());
    }
}
