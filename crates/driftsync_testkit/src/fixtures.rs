//! Fixture models and a ready-made sync context.
//!
//! The fixture schema is a small task tracker:
//!
//! ```text
//! project (server ids) <- todo.project_id (cascade) <- comment.todo_id (cascade)
//! ```

use driftsync_engine::{
    IdStrategy, MockRemote, ProcessReport, QueueConfig, QueueLimits, Relation, RemoteApi,
    Repository, RetryConfig, SyncConfig, SyncContext, SyncModel,
};
use driftsync_store::{FileStore, LocalStore, MemoryStore, SyncItemFilter, SyncQueueItem, SyncStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A project. Identifiers are assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Identifier (temporary until synced).
    pub id: String,
    /// Display name.
    pub name: String,
}

impl SyncModel for Project {
    const MODEL_TYPE: &'static str = "project";
    const ID_STRATEGY: IdStrategy = IdStrategy::Server;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// A todo inside a project. Identifiers are client-generated UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    /// Identifier.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Title.
    pub title: String,
    /// Completion flag.
    pub done: bool,
}

impl SyncModel for Todo {
    const MODEL_TYPE: &'static str = "todo";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::cascading("project_id", "project")]
    }
}

/// A comment on a todo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Identifier.
    pub id: String,
    /// Commented todo.
    pub todo_id: String,
    /// Text.
    pub body: String,
}

impl SyncModel for Comment {
    const MODEL_TYPE: &'static str = "comment";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::cascading("todo_id", "todo")]
    }
}

/// Returns an unsaved project.
pub fn project(name: &str) -> Project {
    Project {
        id: String::new(),
        name: name.to_string(),
    }
}

/// Returns an unsaved todo.
pub fn todo(project_id: &str, title: &str) -> Todo {
    Todo {
        id: String::new(),
        project_id: project_id.to_string(),
        title: title.to_string(),
        done: false,
    }
}

/// Returns an unsaved comment.
pub fn comment(todo_id: &str, body: &str) -> Comment {
    Comment {
        id: String::new(),
        todo_id: todo_id.to_string(),
        body: body.to_string(),
    }
}

/// Configuration for tests: three attempts, no backoff, short queue waits.
///
/// The executor's timer intervals are long so that only explicit passes run.
pub fn fast_config() -> SyncConfig {
    let limits = |concurrency| {
        QueueLimits::new(concurrency, 16, Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(10))
    };
    SyncConfig::new()
        .with_queues(QueueConfig {
            foreground: limits(4),
            load: limits(3),
            background: limits(2),
        })
        .with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::ZERO)
                .with_min_delay(Duration::ZERO)
                .with_jitter_percent(0.0),
        )
        .with_poll_intervals(Duration::from_secs(3600), Duration::from_secs(3600))
}

/// A sync context over the fixture schema with mock remotes.
pub struct TestHarness {
    /// The context.
    pub context: SyncContext,
    /// The local store behind the context.
    pub store: Arc<dyn LocalStore>,
    /// Remote holding projects.
    pub project_remote: Arc<MockRemote<Project>>,
    /// Remote holding todos.
    pub todo_remote: Arc<MockRemote<Todo>>,
    /// Remote holding comments.
    pub comment_remote: Arc<MockRemote<Comment>>,
    /// Project repository.
    pub projects: Arc<Repository<Project>>,
    /// Todo repository.
    pub todos: Arc<Repository<Todo>>,
    /// Comment repository.
    pub comments: Arc<Repository<Comment>>,
    _temp_dir: Option<TempDir>,
}

impl TestHarness {
    /// Creates a harness over a memory store with [`fast_config`].
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    /// Creates a harness over a memory store.
    pub fn with_config(config: SyncConfig) -> Self {
        Self::build(config, Arc::new(MemoryStore::new()), None)
    }

    /// Creates a harness over a file store in a temporary directory.
    pub fn on_disk() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        Self::build(fast_config(), Arc::new(store), Some(temp_dir))
    }

    fn build(config: SyncConfig, store: Arc<dyn LocalStore>, temp_dir: Option<TempDir>) -> Self {
        let context =
            SyncContext::new(config, Arc::clone(&store)).expect("Failed to create sync context");
        let project_remote = Arc::new(MockRemote::<Project>::new());
        let todo_remote = Arc::new(MockRemote::<Todo>::new());
        let comment_remote = Arc::new(MockRemote::<Comment>::new());

        let projects = context
            .register::<Project>(Arc::clone(&project_remote) as Arc<dyn RemoteApi<Project>>)
            .expect("Failed to register projects");
        let todos = context
            .register::<Todo>(Arc::clone(&todo_remote) as Arc<dyn RemoteApi<Todo>>)
            .expect("Failed to register todos");
        let comments = context
            .register::<Comment>(Arc::clone(&comment_remote) as Arc<dyn RemoteApi<Comment>>)
            .expect("Failed to register comments");

        Self {
            context,
            store,
            project_remote,
            todo_remote,
            comment_remote,
            projects,
            todos,
            comments,
            _temp_dir: temp_dir,
        }
    }

    /// Runs one sync pass.
    pub async fn sync(&self) -> ProcessReport {
        self.context
            .process_background_sync_tasks()
            .await
            .expect("Sync pass failed")
    }

    /// Runs passes until nothing due is left, at most `max_passes` times.
    pub async fn sync_until_idle(&self, max_passes: usize) -> Vec<ProcessReport> {
        let mut reports = Vec::new();
        for _ in 0..max_passes {
            let report = self.sync().await;
            reports.push(report);
            if report.scanned == 0 {
                break;
            }
        }
        reports
    }

    /// Returns every sync queue row with `status`.
    pub async fn rows(&self, status: SyncStatus) -> Vec<SyncQueueItem> {
        self.store
            .sync_items(&SyncItemFilter::all().with_status(status))
            .await
            .expect("Failed to list sync items")
    }

    /// Goes offline: queues refuse work until [`Self::go_online`].
    pub fn go_offline(&self) {
        self.context.clear_queues_on_disconnect();
    }

    /// Comes back online and syncs everything due.
    pub async fn go_online(&self) -> ProcessReport {
        self.context
            .restore_queues_on_connect()
            .await
            .expect("Restore pass failed")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_config_is_valid() {
        assert!(fast_config().validate().is_ok());
    }

    #[tokio::test]
    async fn harness_registers_fixture_schema() {
        let h = TestHarness::new();
        let resolver = h.context.resolver();
        assert_eq!(resolver.compute_level("project"), 0);
        assert_eq!(resolver.compute_level("todo"), 1);
        assert_eq!(resolver.compute_level("comment"), 2);
        assert!(h.context.repository::<Todo>().is_ok());
    }

    #[tokio::test]
    async fn on_disk_harness_persists_rows() {
        let h = TestHarness::on_disk();
        h.go_offline();
        h.todos.save(todo("p-1", "write")).await.unwrap();
        assert_eq!(h.rows(SyncStatus::Pending).await.len(), 1);
    }
}
