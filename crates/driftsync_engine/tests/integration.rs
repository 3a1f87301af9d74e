//! Integration tests for the sync engine against mock remotes.

use async_trait::async_trait;
use driftsync_engine::{
    LoadPolicy, MockFailure, MockRemote, NetworkTask, QueueType, Relation, RemoteApi,
    RequestOptions, SavePolicy, SyncError, SyncModel, SyncResult, TaskOperation,
};
use driftsync_store::{ChangeKind, IdNegotiationStatus, LocalStore, SyncOperation, SyncStatus};
use driftsync_testkit::prelude::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Waits until `check` holds, for at most one second of (possibly paused) time.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// Queue manager

#[tokio::test]
async fn duplicate_key_rejected_while_first_runs() {
    let h = TestHarness::new();
    h.todo_remote.set_latency(Duration::from_millis(100));

    let todo = Todo {
        id: "t-1".into(),
        ..todo("p-1", "first")
    };
    let first = {
        let todos = Arc::clone(&h.todos);
        let todo = todo.clone();
        tokio::spawn(async move {
            todos
                .save_with(todo, SavePolicy::RemoteFirst, RequestOptions::new())
                .await
        })
    };
    let queues = Arc::clone(h.context.queues());
    eventually(|| {
        let queues = Arc::clone(&queues);
        async move { queues.is_in_flight(QueueType::Foreground, "save:todo:t-1") }
    })
    .await;

    let second = h
        .todos
        .save_with(todo, SavePolicy::RemoteFirst, RequestOptions::new())
        .await;
    assert!(matches!(second, Err(SyncError::DuplicateTask { .. })));

    assert!(first.await.unwrap().is_ok());
    assert_eq!(h.todo_remote.calls().create, 1);
    assert!(!queues.is_in_flight(QueueType::Foreground, "save:todo:t-1"));
}

#[tokio::test(start_paused = true)]
async fn full_queue_times_out() {
    let h = TestHarness::new();
    let queues = Arc::clone(h.context.queues());
    let limits = h.context.config().queues.load;

    let mut blockers = Vec::new();
    for i in 0..limits.capacity {
        let queues = Arc::clone(&queues);
        blockers.push(tokio::spawn(async move {
            let task = NetworkTask::new(
                format!("block-{i}"),
                TaskOperation::Fetch,
                "todo",
                "t",
                futures::future::pending::<SyncResult<()>>(),
            );
            queues.enqueue_task(task, QueueType::Load).await
        }));
    }
    eventually(|| {
        let queues = Arc::clone(&queues);
        async move { queues.queue_stats(QueueType::Load).active_and_pending_tasks == limits.capacity }
    })
    .await;

    let overflow = NetworkTask::new("overflow", TaskOperation::Fetch, "todo", "t", async {
        Ok::<_, SyncError>(())
    });
    let err = queues
        .enqueue_task(overflow, QueueType::Load)
        .await
        .unwrap_err();
    match err {
        SyncError::CapacityTimeout { queue, waited } => {
            assert_eq!(queue, QueueType::Load);
            assert!(waited >= limits.capacity_timeout);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Other queues are unaffected.
    assert_eq!(queues.queue_stats(QueueType::Background).active_and_pending_tasks, 0);

    h.go_offline();
    for blocker in blockers {
        assert!(matches!(
            blocker.await.unwrap(),
            Err(SyncError::QueueCancelled { .. })
        ));
    }
    assert_eq!(queues.queue_stats(QueueType::Load).active_and_pending_tasks, 0);
}

// Retry executor

#[tokio::test]
async fn failing_rows_back_off_then_go_dead() {
    let h = TestHarness::new();
    h.todo_remote.set_offline(true);
    let mut events = h.todos.watch();

    let saved = h.todos.save(todo("p-1", "unsent")).await.unwrap();
    assert_eq!(events.recv().await.unwrap().kind, ChangeKind::Created);

    h.sync_until_idle(10).await;

    let dead = h.rows(SyncStatus::Dead).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].model_id, saved.id);
    assert_eq!(dead[0].attempt_count, 3);
    assert!(dead[0].next_retry_at.is_none());
    assert!(dead[0].last_error.as_deref().unwrap().contains("network"));
    assert_eq!(h.todo_remote.calls().create, 3);

    let errors = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| e.kind == ChangeKind::Error)
        .count();
    assert_eq!(errors, 3);

    // The local record is still there, and can be retried by hand.
    assert!(h.todos.find(&saved.id).await.unwrap().is_some());
    h.todo_remote.set_offline(false);
    h.context.retry_item(dead[0].id).await.unwrap();
    h.sync().await;
    assert!(h.todo_remote.get(&saved.id).is_some());
    assert_eq!(h.rows(SyncStatus::Synced).await.len(), 1);
}

proptest! {
    #[test]
    fn retry_delay_stays_within_bounds(
        config in retry_config_strategy(),
        attempt in 1u32..40,
    ) {
        let delay = config.delay_for_attempt(attempt);
        prop_assert!(delay <= config.delay_upper_bound());
        prop_assert!(delay >= config.min_delay);
    }
}

// Dependency resolution

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Egg {
    id: String,
    chicken_id: String,
}

impl SyncModel for Egg {
    const MODEL_TYPE: &'static str = "egg";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::new("chicken_id", "chicken")]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Chicken {
    id: String,
    egg_id: String,
}

impl SyncModel for Chicken {
    const MODEL_TYPE: &'static str = "chicken";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn relations() -> Vec<Relation> {
        vec![Relation::new("egg_id", "egg")]
    }
}

#[tokio::test]
async fn cyclic_relations_are_rejected() {
    let h = TestHarness::new();
    h.context
        .register::<Egg>(Arc::new(MockRemote::<Egg>::new()))
        .unwrap();
    let err = h
        .context
        .register::<Chicken>(Arc::new(MockRemote::<Chicken>::new()))
        .unwrap_err();
    assert!(matches!(err, SyncError::DependencyCycle { .. }));
    assert!(h.context.repository::<Chicken>().is_err());
    assert_eq!(h.context.resolver().compute_level("egg"), 1);
}

#[tokio::test]
async fn children_are_pushed_after_parents() {
    let h = TestHarness::new();
    h.go_offline();

    // Saved child-first so that queue order alone would be wrong.
    let project_id = driftsync_engine::temporary_id();
    let t = h.todos.save(todo(&project_id, "child")).await.unwrap();
    let c = h.comments.save(comment(&t.id, "grandchild")).await.unwrap();
    h.projects
        .save(Project {
            id: project_id.clone(),
            name: "parent".into(),
        })
        .await
        .unwrap();

    let report = h.go_online().await;
    assert_eq!(report.synced, 3);
    assert_eq!(h.todo_remote.get(&t.id).unwrap().project_id, "srv-1");
    assert!(h.comment_remote.get(&c.id).is_some());
}

// ID negotiation

#[tokio::test]
async fn server_id_replaces_temporary_id_everywhere() {
    let h = TestHarness::new();
    let mut all_events = h.context.subscribe_all();
    h.go_offline();

    let p = h.projects.save(project("inbox")).await.unwrap();
    assert!(driftsync_engine::is_temporary_id(&p.id));
    let t = h.todos.save(todo(&p.id, "write tests")).await.unwrap();

    let rows = h.projects.pending_items(&p.id).await.unwrap();
    assert_eq!(rows[0].id_negotiation, IdNegotiationStatus::Pending);
    assert_eq!(rows[0].temporary_client_id.as_deref(), Some(p.id.as_str()));

    h.go_online().await;

    assert!(h.projects.find(&p.id).await.unwrap().is_none());
    let renamed = h.projects.find("srv-1").await.unwrap().unwrap();
    assert_eq!(renamed.name, "inbox");
    assert_eq!(h.todos.find(&t.id).await.unwrap().unwrap().project_id, "srv-1");
    assert_eq!(h.todo_remote.get(&t.id).unwrap().project_id, "srv-1");

    let synced = h.rows(SyncStatus::Synced).await;
    assert_eq!(synced.len(), 2);
    let project_row = synced.iter().find(|r| r.model_type == "project").unwrap();
    assert_eq!(project_row.model_id, "srv-1");
    assert_eq!(project_row.id_negotiation, IdNegotiationStatus::Complete);

    let renamed_event = std::iter::from_fn(|| all_events.try_recv().ok())
        .find(|e| e.previous_id.is_some())
        .unwrap();
    assert_eq!(renamed_event.model_id, "srv-1");
    assert_eq!(renamed_event.previous_id.as_deref(), Some(p.id.as_str()));
}

#[tokio::test]
async fn rejected_create_keeps_temporary_record() {
    let h = TestHarness::new();
    h.go_offline();
    let p = h.projects.save(project("")).await.unwrap();
    h.project_remote.fail_next(MockFailure::Validation);

    h.go_online().await;

    let dead = h.rows(SyncStatus::Dead).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id_negotiation, IdNegotiationStatus::Failed);
    assert_eq!(dead[0].attempt_count, 1);
    assert!(h.projects.find(&p.id).await.unwrap().is_some());
}

#[tokio::test]
async fn edit_during_create_is_pushed_as_update() {
    let h = TestHarness::new();
    h.project_remote.set_latency(Duration::from_millis(50));
    h.go_offline();
    let p = h.projects.save(project("draft")).await.unwrap();
    h.context.queues().restore_queues_on_connect();

    let pass = {
        let executor = Arc::clone(h.context.executor());
        tokio::spawn(async move { executor.process_due_tasks_now().await })
    };
    let queues = Arc::clone(h.context.queues());
    eventually(|| {
        let queues = Arc::clone(&queues);
        async move { queues.queue_stats(QueueType::Background).running_tasks == 1 }
    })
    .await;

    let mut events = h.projects.watch();
    h.projects
        .save(Project {
            name: "final".into(),
            ..p.clone()
        })
        .await
        .unwrap();
    pass.await.unwrap().unwrap();

    // The server copy of the create never replaces the newer local edit.
    assert_eq!(h.projects.find("srv-1").await.unwrap().unwrap().name, "final");
    let renamed = std::iter::from_fn(|| events.try_recv().ok())
        .find(|e| e.previous_id.is_some())
        .unwrap();
    assert_eq!(renamed.kind, ChangeKind::Updated);
    assert_eq!(renamed.payload.unwrap()["name"], "final");

    h.sync_until_idle(5).await;

    let remote = h.project_remote.get("srv-1").unwrap();
    assert_eq!(remote.name, "final");
    assert_eq!(h.project_remote.calls().create, 1);
    assert_eq!(h.projects.find("srv-1").await.unwrap().unwrap().name, "final");
    assert!(h.rows(SyncStatus::Pending).await.is_empty());
}

#[tokio::test]
async fn sync_pass_publishes_updates_to_watchers() {
    let h = TestHarness::new();
    h.go_offline();
    let p = h.projects.save(project("inbox")).await.unwrap();
    let t = h.todos.save(todo(&p.id, "child")).await.unwrap();
    let mut project_events = h.projects.watch();
    let mut todo_events = h.todos.watch();

    let report = h.go_online().await;
    assert_eq!(report.synced, 2);

    let project_events: Vec<_> = std::iter::from_fn(|| project_events.try_recv().ok()).collect();
    let renamed = project_events
        .iter()
        .find(|e| e.kind == ChangeKind::Updated && e.model_id == "srv-1")
        .unwrap();
    assert_eq!(renamed.previous_id.as_deref(), Some(p.id.as_str()));
    assert_eq!(renamed.payload.as_ref().unwrap()["id"], "srv-1");

    let todo_updates: Vec<_> = std::iter::from_fn(|| todo_events.try_recv().ok())
        .filter(|e| e.kind == ChangeKind::Updated && e.model_id == t.id)
        .collect();
    assert!(!todo_updates.is_empty());
    assert!(todo_updates
        .iter()
        .all(|e| e.payload.as_ref().unwrap()["project_id"] == "srv-1"));
}

#[tokio::test]
async fn server_copy_never_overwrites_newer_local_edit() {
    let h = TestHarness::new();
    h.todo_remote.set_latency(Duration::from_millis(50));
    h.go_offline();
    let t = h.todos.save(todo("p-1", "v1")).await.unwrap();
    h.context.queues().restore_queues_on_connect();

    let pass = {
        let executor = Arc::clone(h.context.executor());
        tokio::spawn(async move { executor.process_due_tasks_now().await })
    };
    let queues = Arc::clone(h.context.queues());
    eventually(|| {
        let queues = Arc::clone(&queues);
        async move { queues.queue_stats(QueueType::Background).running_tasks == 1 }
    })
    .await;

    let mut events = h.todos.watch();
    h.todos
        .save(Todo {
            title: "v2".into(),
            ..t.clone()
        })
        .await
        .unwrap();
    pass.await.unwrap().unwrap();

    let local = h.store.get("todo", &t.id).await.unwrap().unwrap();
    assert_eq!(local["title"], "v2");
    let reverted = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| e.payload)
        .any(|payload| payload["title"] == "v1");
    assert!(!reverted);

    h.sync_until_idle(5).await;
    assert_eq!(h.todo_remote.get(&t.id).unwrap().title, "v2");
    let local = h.store.get("todo", &t.id).await.unwrap().unwrap();
    assert_eq!(local["title"], "v2");
    assert!(h.rows(SyncStatus::Pending).await.is_empty());
}

// Save policies

#[tokio::test]
async fn local_first_save_works_offline() {
    let h = TestHarness::new();
    h.go_offline();

    let saved = h.todos.save(todo("p-1", "offline")).await.unwrap();
    assert_eq!(h.todos.find(&saved.id).await.unwrap(), Some(saved.clone()));
    assert_eq!(h.todo_remote.calls().create, 0);

    let pending = h.rows(SyncStatus::Pending).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].operation, SyncOperation::Create);

    let report = h.go_online().await;
    assert_eq!(report.synced, 1);
    assert_eq!(h.todo_remote.get(&saved.id), Some(saved));
}

#[tokio::test]
async fn local_first_save_syncs_immediately_when_online() {
    let h = TestHarness::new();
    let saved = h.todos.save(todo("p-1", "online")).await.unwrap();
    let remote = Arc::clone(&h.todo_remote);
    eventually(|| {
        let found = remote.get(&saved.id).is_some();
        async move { found }
    })
    .await;
}

#[tokio::test]
async fn edits_coalesce_before_sync() {
    let h = TestHarness::new();
    h.go_offline();

    let mut t = h.todos.save(todo("p-1", "one")).await.unwrap();
    t.title = "two".into();
    h.todos.save(t.clone()).await.unwrap();
    t.done = true;
    h.todos.save(t.clone()).await.unwrap();

    assert_eq!(h.rows(SyncStatus::Pending).await.len(), 1);
    h.go_online().await;
    assert_eq!(h.todo_remote.get(&t.id), Some(t));
    assert_eq!(h.todo_remote.calls().create, 1);
    assert_eq!(h.todo_remote.calls().update, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_remote_first_saves() {
    let h = TestHarness::new();
    h.project_remote.set_latency(Duration::from_millis(20));

    let saves = (0..12).map(|i| {
        let projects = Arc::clone(&h.projects);
        async move {
            projects
                .save_with(
                    project(&format!("p{i}")),
                    SavePolicy::RemoteFirst,
                    RequestOptions::new(),
                )
                .await
        }
    });
    let results = futures::future::join_all(saves).await;

    let mut ids: Vec<String> = results.into_iter().map(|r| r.unwrap().id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 12);
    assert!(ids.iter().all(|id| id.starts_with("srv-")));
    assert_eq!(h.project_remote.records().len(), 12);
    for id in &ids {
        assert!(h.projects.find(id).await.unwrap().is_some());
    }
    assert!(h.rows(SyncStatus::Pending).await.is_empty());
    assert_eq!(
        h.context
            .queue_stats(QueueType::Foreground)
            .active_and_pending_tasks,
        0
    );
}

#[tokio::test]
async fn remote_first_failure_leaves_store_untouched() {
    let h = TestHarness::new();
    h.project_remote.fail_next(MockFailure::Validation);
    let err = h
        .projects
        .save_with(project("bad"), SavePolicy::RemoteFirst, RequestOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_permanent());
    assert!(h
        .store
        .query("project", &driftsync_store::Query::new())
        .await
        .unwrap()
        .is_empty());
}

// Connectivity

#[tokio::test]
async fn disconnect_cancels_in_flight_work_but_keeps_rows() {
    let h = TestHarness::new();
    h.go_offline();
    let queued = h.todos.save(todo("p-1", "queued")).await.unwrap();
    h.context.queues().restore_queues_on_connect();
    h.project_remote.set_latency(Duration::from_secs(5));

    // Four saves run, a fifth waits for a concurrency slot.
    let in_flight: Vec<_> = (0..5)
        .map(|i| {
            let projects = Arc::clone(&h.projects);
            tokio::spawn(async move {
                projects
                    .save_with(
                        project(&format!("slow {i}")),
                        SavePolicy::RemoteFirst,
                        RequestOptions::new(),
                    )
                    .await
            })
        })
        .collect();
    let queues = Arc::clone(h.context.queues());
    eventually(|| {
        let stats = queues.queue_stats(QueueType::Foreground);
        async move { stats.running_tasks == 4 && stats.pending_tasks == 1 }
    })
    .await;

    h.go_offline();
    for save in in_flight {
        assert!(matches!(
            save.await.unwrap(),
            Err(SyncError::QueueCancelled { .. })
        ));
    }
    let stats = h.context.queue_stats(QueueType::Foreground);
    assert_eq!(stats.active_and_pending_tasks, 0);
    assert_eq!(stats.pending_tasks, 0);
    assert_eq!(stats.running_tasks, 0);
    assert!(h
        .store
        .query("project", &driftsync_store::Query::new())
        .await
        .unwrap()
        .is_empty());

    let offline_save = h
        .projects
        .save_with(project("later"), SavePolicy::RemoteFirst, RequestOptions::new())
        .await;
    assert!(matches!(offline_save, Err(SyncError::QueueCancelled { .. })));
    assert!(h.sync().await.offline);

    // The durable row survived and goes out on reconnect.
    assert_eq!(h.rows(SyncStatus::Pending).await.len(), 1);
    h.go_online().await;
    assert!(h.todo_remote.get(&queued.id).is_some());
}

// Cascade delete

/// Wraps a mock remote and logs deletes in a shared journal.
struct Journaled<M: SyncModel> {
    inner: MockRemote<M>,
    journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl<M: SyncModel> RemoteApi<M> for Journaled<M> {
    async fn find_one(&self, id: &str, options: &RequestOptions) -> SyncResult<M> {
        self.inner.find_one(id, options).await
    }

    async fn find_all(&self, options: &RequestOptions) -> SyncResult<Vec<M>> {
        self.inner.find_all(options).await
    }

    async fn create_one(&self, model: &M, options: &RequestOptions) -> SyncResult<M> {
        self.inner.create_one(model, options).await
    }

    async fn update_one(&self, model: &M, options: &RequestOptions) -> SyncResult<M> {
        self.inner.update_one(model, options).await
    }

    async fn replace_one(&self, model: &M, options: &RequestOptions) -> SyncResult<M> {
        self.inner.replace_one(model, options).await
    }

    async fn delete_one(&self, id: &str, options: &RequestOptions) -> SyncResult<()> {
        self.journal.lock().push(M::MODEL_TYPE.to_string());
        self.inner.delete_one(id, options).await
    }
}

#[tokio::test]
async fn cascade_delete_removes_children_first() {
    let store: Arc<dyn LocalStore> = Arc::new(driftsync_store::MemoryStore::new());
    let context = driftsync_engine::SyncContext::new(fast_config(), Arc::clone(&store)).unwrap();
    let journal = Arc::new(Mutex::new(Vec::new()));
    let projects = context
        .register::<Project>(Arc::new(Journaled {
            inner: MockRemote::new(),
            journal: Arc::clone(&journal),
        }))
        .unwrap();
    let todos = context
        .register::<Todo>(Arc::new(Journaled {
            inner: MockRemote::new(),
            journal: Arc::clone(&journal),
        }))
        .unwrap();
    let comments = context
        .register::<Comment>(Arc::new(Journaled {
            inner: MockRemote::new(),
            journal: Arc::clone(&journal),
        }))
        .unwrap();

    context.clear_queues_on_disconnect();
    let p = projects.save(project("doomed")).await.unwrap();
    let t1 = todos.save(todo(&p.id, "a")).await.unwrap();
    let t2 = todos.save(todo(&p.id, "b")).await.unwrap();
    let c = comments.save(comment(&t1.id, "note")).await.unwrap();
    let other = todos.save(todo("elsewhere", "kept")).await.unwrap();
    context.restore_queues_on_connect().await.unwrap();

    let p = projects.find("srv-1").await.unwrap().unwrap();
    projects.delete(&p.id).await.unwrap();

    for id in [&t1.id, &t2.id] {
        assert!(todos.find(id).await.unwrap().is_none());
    }
    assert!(comments.find(&c.id).await.unwrap().is_none());
    assert!(projects.find(&p.id).await.unwrap().is_none());
    assert!(todos.find(&other.id).await.unwrap().is_some());

    context.process_background_sync_tasks().await.unwrap();
    let order = journal.lock().clone();
    assert_eq!(order, vec!["comment", "todo", "todo", "project"]);
}

#[tokio::test]
async fn remote_first_cascade_deletes_children_on_server_first() {
    let store: Arc<dyn LocalStore> = Arc::new(driftsync_store::MemoryStore::new());
    let context = driftsync_engine::SyncContext::new(fast_config(), Arc::clone(&store)).unwrap();
    let journal = Arc::new(Mutex::new(Vec::new()));
    let project_remote = Arc::new(Journaled {
        inner: MockRemote::<Project>::new(),
        journal: Arc::clone(&journal),
    });
    let todo_remote = Arc::new(Journaled {
        inner: MockRemote::<Todo>::new(),
        journal: Arc::clone(&journal),
    });
    let comment_remote = Arc::new(Journaled {
        inner: MockRemote::<Comment>::new(),
        journal: Arc::clone(&journal),
    });
    let projects = context.register::<Project>(project_remote.clone()).unwrap();
    let todos = context.register::<Todo>(todo_remote.clone()).unwrap();
    let comments = context.register::<Comment>(comment_remote.clone()).unwrap();

    context.clear_queues_on_disconnect();
    let p = projects.save(project("doomed")).await.unwrap();
    let t = todos.save(todo(&p.id, "synced")).await.unwrap();
    let gone = todos.save(todo(&p.id, "removed elsewhere")).await.unwrap();
    let c = comments.save(comment(&t.id, "synced")).await.unwrap();
    context.restore_queues_on_connect().await.unwrap();
    assert!(todo_remote.inner.remove(&gone.id).is_some());

    // Saved while offline and never pushed.
    context.clear_queues_on_disconnect();
    let draft = comments.save(comment(&t.id, "draft")).await.unwrap();
    context.queues().restore_queues_on_connect();

    projects
        .delete_with("srv-1", SavePolicy::RemoteFirst, RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(journal.lock().clone(), vec!["comment", "todo", "todo", "project"]);
    assert!(comment_remote.inner.get(&c.id).is_none());
    assert!(todo_remote.inner.get(&t.id).is_none());
    assert!(project_remote.inner.get("srv-1").is_none());

    assert!(projects.find("srv-1").await.unwrap().is_none());
    assert!(todos.find(&t.id).await.unwrap().is_none());
    assert!(todos.find(&gone.id).await.unwrap().is_none());
    assert!(comments.find(&c.id).await.unwrap().is_none());
    assert!(comments.find(&draft.id).await.unwrap().is_none());
    assert_eq!(comment_remote.inner.calls().create, 1);
    assert!(store
        .sync_items(&driftsync_store::SyncItemFilter::all().with_status(SyncStatus::Pending))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn deleting_unsynced_tree_never_reaches_server() {
    let h = TestHarness::new();
    h.go_offline();
    let p = h.projects.save(project("scratch")).await.unwrap();
    let t = h.todos.save(todo(&p.id, "scratch")).await.unwrap();
    h.comments.save(comment(&t.id, "scratch")).await.unwrap();

    h.projects.delete(&p.id).await.unwrap();
    assert!(h.rows(SyncStatus::Pending).await.is_empty());

    let report = h.go_online().await;
    assert_eq!(report.scanned, 0);
    assert_eq!(h.project_remote.calls().create, 0);
    assert_eq!(h.project_remote.calls().delete, 0);
}

// Load policies

#[tokio::test]
async fn local_then_remote_fetches_missing_records() {
    let h = TestHarness::new();
    h.todo_remote.insert(Todo {
        id: "t-9".into(),
        ..todo("p-1", "from server")
    });

    let found = h
        .todos
        .find_with("t-9", LoadPolicy::LocalThenRemote)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.title, "from server");
    assert!(h.store.get("todo", "t-9").await.unwrap().is_some());

    assert!(h
        .todos
        .find_with("t-missing", LoadPolicy::LocalThenRemote)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn local_then_remote_refreshes_in_background() {
    let h = TestHarness::new();
    h.store
        .upsert(
            "todo",
            "t-1",
            serde_json::json!({"id": "t-1", "project_id": "p", "title": "stale", "done": false}),
        )
        .await
        .unwrap();
    h.todo_remote.insert(Todo {
        id: "t-1".into(),
        ..todo("p", "fresh")
    });

    let first = h
        .todos
        .find_with("t-1", LoadPolicy::LocalThenRemote)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.title, "stale");

    let store = Arc::clone(&h.store);
    eventually(|| {
        let store = Arc::clone(&store);
        async move {
            store.get("todo", "t-1").await.unwrap().unwrap()["title"] == "fresh"
        }
    })
    .await;
}

#[tokio::test]
async fn remote_first_load_purges_records_gone_from_server() {
    let h = TestHarness::new();
    h.store
        .upsert(
            "todo",
            "t-1",
            serde_json::json!({"id": "t-1", "project_id": "p", "title": "old", "done": false}),
        )
        .await
        .unwrap();
    h.todo_remote.fail_next(MockFailure::Gone);

    let mut events = h.todos.watch();
    assert!(h
        .todos
        .find_with("t-1", LoadPolicy::RemoteFirst)
        .await
        .unwrap()
        .is_none());
    assert!(h.todos.find_with("t-1", LoadPolicy::LocalOnly).await.unwrap().is_none());
    assert_eq!(events.try_recv().unwrap().kind, ChangeKind::Deleted);
}

// Convergence

async fn apply_offline_then_sync(actions: Vec<TodoAction>) {
    let h = TestHarness::new();
    h.go_offline();

    let mut saved: Vec<Option<Todo>> = Vec::new();
    for action in actions {
        match action {
            TodoAction::Create(title) => {
                saved.push(Some(h.todos.save(todo("p-1", &title)).await.unwrap()));
            }
            TodoAction::Rename(i, title) if !saved.is_empty() => {
                let n = saved.len();
                if let Some(t) = saved[i % n].as_mut() {
                    t.title = title;
                    h.todos.save(t.clone()).await.unwrap();
                }
            }
            TodoAction::Toggle(i) if !saved.is_empty() => {
                let n = saved.len();
                if let Some(t) = saved[i % n].as_mut() {
                    t.done = !t.done;
                    h.todos.save(t.clone()).await.unwrap();
                }
            }
            TodoAction::Delete(i) if !saved.is_empty() => {
                let n = saved.len();
                if let Some(t) = saved[i % n].take() {
                    h.todos.delete(&t.id).await.unwrap();
                }
            }
            _ => {}
        }
    }

    h.go_online().await;
    h.sync_until_idle(5).await;

    let alive: Vec<&Todo> = saved.iter().flatten().collect();
    assert_eq!(h.todo_remote.records().len(), alive.len());
    for t in alive {
        assert_eq!(h.todo_remote.get(&t.id).as_ref(), Some(t));
        assert_eq!(h.todos.find(&t.id).await.unwrap().as_ref(), Some(t));
    }
    assert_eq!(h.todo_remote.calls().update, 0);
    assert_eq!(h.todo_remote.calls().delete, 0);
    assert!(h.rows(SyncStatus::Pending).await.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn offline_workload_converges_with_one_create_per_record(
        actions in todo_workload_strategy(16),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(apply_offline_then_sync(actions));
    }
}
