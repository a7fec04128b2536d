use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use planner_core::coordinator::{Connectivity, MutationCoordinator};
use planner_core::dnd::{DragSession, DropTarget, MoveProposal, commit_move};
use planner_core::errors::MutationError;
use planner_core::filters::{Choice, FilterState};
use planner_core::identity::{IdentityProvider, LocalIdentity};
use planner_core::notify::{RecordingNotifier, Severity};
use planner_core::state::{AppState, Selection};
use planner_core::store::{JsonlRowStore, RowQuery, RowStore};
use planner_core::task::{Status, Task, TaskPatch, TaskPayload, TaskType};
use planner_core::views::ViewKind;
use tempfile::{TempDir, tempdir};
use uuid::Uuid;

/// Wraps the file store to count calls, inject failures and hold responses.
struct ProbeStore {
    inner: JsonlRowStore,
    calls: AtomicUsize,
    fail_writes: AtomicBool,
    update_delay: Duration,
}

impl ProbeStore {
    fn new(inner: JsonlRowStore) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            update_delay: Duration::ZERO,
        }
    }

    fn write_guard(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset by peer");
        }
        Ok(())
    }
}

#[async_trait]
impl RowStore for ProbeStore {
    async fn select(&self, query: &RowQuery) -> anyhow::Result<Vec<Task>> {
        self.inner.select(query).await
    }

    async fn insert(&self, user_id: &str, payload: &TaskPayload) -> anyhow::Result<Task> {
        self.write_guard()?;
        self.inner.insert(user_id, payload).await
    }

    async fn update(&self, user_id: &str, id: Uuid, patch: &TaskPatch) -> anyhow::Result<Task> {
        self.write_guard()?;
        let row = self.inner.update(user_id, id, patch).await?;
        if !self.update_delay.is_zero() {
            tokio::time::sleep(self.update_delay).await;
        }
        Ok(row)
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> anyhow::Result<()> {
        self.write_guard()?;
        self.inner.delete(user_id, id).await
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<ProbeStore>,
    notifier: Arc<RecordingNotifier>,
    coordinator: MutationCoordinator<Arc<ProbeStore>>,
}

fn harness_with(update_delay: Duration) -> Harness {
    let dir = tempdir().expect("tempdir");
    let inner = JsonlRowStore::open(dir.path()).expect("open store");
    let mut probe = ProbeStore::new(inner);
    probe.update_delay = update_delay;
    let store = Arc::new(probe);

    let identity = LocalIdentity::open(dir.path()).expect("open identity");
    identity.sign_in("user-1", Some("me@example.com")).expect("sign in");

    let notifier = Arc::new(RecordingNotifier::default());
    let coordinator = MutationCoordinator::new(
        store.clone(),
        Arc::new(identity),
        notifier.clone(),
        Connectivity::default(),
    );

    Harness {
        _dir: dir,
        store,
        notifier,
        coordinator,
    }
}

fn harness() -> Harness {
    harness_with(Duration::ZERO)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[tokio::test]
async fn created_row_is_the_stores_normalized_row() {
    let h = harness();
    let payload = TaskPayload {
        project: Some("  Home  ".to_string()),
        note: Some("   ".to_string()),
        ..TaskPayload::titled("  Water plants ")
    };

    let row = h.coordinator.create(payload).await.expect("create");
    assert_eq!(row.title, "Water plants");
    assert_eq!(row.project.as_deref(), Some("Home"));
    assert_eq!(row.note, None);
    assert_eq!(row.user_id, "user-1");
    assert_eq!(row.kind, TaskType::Normal);
    assert_eq!(row.status, Status::Todo);
    assert_eq!(h.coordinator.tasks(), vec![row]);
}

#[tokio::test]
async fn reschedule_round_trip_and_clear() {
    let h = harness();
    let task = h
        .coordinator
        .create(TaskPayload::titled("Write report"))
        .await
        .expect("create");

    let moved = h
        .coordinator
        .reschedule(task.id, Some(date(2025, 3, 14)))
        .await
        .expect("reschedule")
        .expect("known task");
    assert_eq!(moved.scheduled_date, Some(date(2025, 3, 14)));
    assert!(moved.updated_at >= task.updated_at);

    let cleared = h
        .coordinator
        .reschedule(task.id, None)
        .await
        .expect("clear")
        .expect("known task");
    assert!(cleared.is_backlog());
    assert_eq!(h.coordinator.get(task.id), Some(cleared));
}

#[tokio::test]
async fn offline_mutations_never_reach_the_store() {
    let h = harness();
    let task = h
        .coordinator
        .create(TaskPayload::titled("Call bank"))
        .await
        .expect("create");
    let calls_before = h.store.calls.load(Ordering::SeqCst);

    h.coordinator.connectivity().set_offline(true);
    let before = h.coordinator.tasks();

    assert!(matches!(
        h.coordinator.create(TaskPayload::titled("other")).await,
        Err(MutationError::Offline)
    ));
    assert!(matches!(
        h.coordinator.mark_done(task.id).await,
        Err(MutationError::Offline)
    ));
    assert!(matches!(
        h.coordinator.remove(task.id).await,
        Err(MutationError::Offline)
    ));

    assert_eq!(h.store.calls.load(Ordering::SeqCst), calls_before);
    assert_eq!(h.coordinator.tasks(), before);
    assert_eq!(h.notifier.last().map(|(severity, _)| severity), Some(Severity::Error));

    h.coordinator.connectivity().set_offline(false);
    assert!(h.coordinator.mark_done(task.id).await.expect("online again").is_some());
}

#[tokio::test]
async fn remote_failure_leaves_local_state_untouched() {
    let h = harness();
    let task = h
        .coordinator
        .create(TaskPayload::titled("Pay rent"))
        .await
        .expect("create");
    let before = h.coordinator.tasks();

    h.store.fail_writes.store(true, Ordering::SeqCst);
    let err = h
        .coordinator
        .update(task.id, TaskPatch::status(Status::Doing))
        .await
        .expect_err("remote failure");
    match &err {
        MutationError::Remote { op, message } => {
            assert_eq!(*op, "update");
            assert!(message.contains("connection reset"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.coordinator.remove(task.id).await.is_err());
    assert_eq!(h.coordinator.tasks(), before);

    let (severity, message) = h.notifier.last().expect("error notified");
    assert_eq!(severity, Severity::Error);
    assert!(message.contains("delete"));
}

#[tokio::test]
async fn invalid_progress_is_rejected_locally() {
    let h = harness();
    let task = h
        .coordinator
        .create(TaskPayload::titled("Read book"))
        .await
        .expect("create");
    let calls_before = h.store.calls.load(Ordering::SeqCst);

    let patch = TaskPatch {
        progress: Some(140),
        ..TaskPatch::default()
    };
    assert!(matches!(
        h.coordinator.update(task.id, patch).await,
        Err(MutationError::Validation(_))
    ));
    assert_eq!(h.store.calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test]
async fn concurrent_updates_reconcile_independently() {
    let h = harness();
    let first = h
        .coordinator
        .create(TaskPayload::titled("first"))
        .await
        .expect("create first");
    let second = h
        .coordinator
        .create(TaskPayload::titled("second"))
        .await
        .expect("create second");

    let (a, b) = tokio::join!(
        h.coordinator.mark_done(first.id),
        h.coordinator.reschedule(second.id, Some(date(2025, 3, 11)))
    );
    a.expect("done");
    b.expect("reschedule");

    let first_now = h.coordinator.get(first.id).expect("first present");
    let second_now = h.coordinator.get(second.id).expect("second present");
    assert_eq!(first_now.status, Status::Done);
    assert_eq!(first_now.progress, 100);
    assert_eq!(second_now.scheduled_date, Some(date(2025, 3, 11)));
    assert_eq!(h.coordinator.tasks().len(), 2);
}

#[tokio::test]
async fn response_for_task_deleted_in_flight_is_not_reinserted() {
    let h = harness_with(Duration::from_millis(50));
    let task = h
        .coordinator
        .create(TaskPayload::titled("ephemeral"))
        .await
        .expect("create");

    let (updated, removed) = tokio::join!(
        h.coordinator.mark_done(task.id),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.coordinator.remove(task.id).await
        }
    );

    assert!(updated.expect("update resolves").is_some());
    assert!(removed.expect("remove resolves"));
    assert!(h.coordinator.tasks().is_empty());
}

#[tokio::test]
async fn stale_references_are_silent_no_ops() {
    let h = harness();
    let task = h
        .coordinator
        .create(TaskPayload::titled("gone soon"))
        .await
        .expect("create");
    assert!(h.coordinator.remove(task.id).await.expect("remove"));
    let notified = h.notifier.messages().len();

    assert_eq!(h.coordinator.reschedule(task.id, None).await.expect("stale"), None);
    assert!(!h.coordinator.remove(task.id).await.expect("stale"));
    assert_eq!(h.notifier.messages().len(), notified);
}

#[tokio::test]
async fn deleting_last_task_of_project_heals_filter() {
    let h = harness();
    let garden = h
        .coordinator
        .create(TaskPayload {
            project: Some("garden".to_string()),
            ..TaskPayload::titled("Prune roses")
        })
        .await
        .expect("create garden");
    h.coordinator
        .create(TaskPayload {
            project: Some("home".to_string()),
            ..TaskPayload::titled("Fix sink")
        })
        .await
        .expect("create home");

    let mut state = AppState::new(h.coordinator.tasks(), ViewKind::All).with_filters(FilterState {
        project: Choice::Only("garden".to_string()),
        ..FilterState::default()
    });
    let now = Utc.with_ymd_and_hms(2025, 3, 12, 15, 0, 0).single().expect("now");
    assert_eq!(state.select(now).len(), 1);

    h.coordinator.remove(garden.id).await.expect("remove");
    state.replace_tasks(h.coordinator.tasks());

    assert!(state.filters.project.is_all());
    match state.select(now) {
        Selection::All(tasks) => {
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].title, "Fix sink");
        }
        other => panic!("unexpected selection: {other:?}"),
    }
}

#[tokio::test]
async fn drag_to_another_day_commits_only_when_confirmed() {
    let h = harness();
    let task = h
        .coordinator
        .create(TaskPayload {
            scheduled_date: Some(date(2025, 3, 10)),
            ..TaskPayload::titled("Dentist")
        })
        .await
        .expect("create");

    let mut drag = DragSession::default();
    assert!(drag.start(task.id, h.coordinator.connectivity().is_offline()));
    let MoveProposal::Confirm(pending) =
        drag.drop_on(&h.coordinator.tasks(), DropTarget::Day(date(2025, 3, 12)))
    else {
        panic!("expected a confirmation");
    };
    assert_eq!(pending.prompt, "Move \"Dentist\" to 2025-03-12?");

    let declined = commit_move(&h.coordinator, pending.clone(), false)
        .await
        .expect("declined");
    assert_eq!(declined, None);
    assert_eq!(
        h.coordinator.get(task.id).and_then(|task| task.scheduled_date),
        Some(date(2025, 3, 10))
    );

    let moved = commit_move(&h.coordinator, pending, true)
        .await
        .expect("confirmed")
        .expect("known task");
    assert_eq!(moved.scheduled_date, Some(date(2025, 3, 12)));

    assert!(drag.start(task.id, false));
    let MoveProposal::Confirm(to_backlog) = drag.drop_on(&h.coordinator.tasks(), DropTarget::Unscheduled)
    else {
        panic!("expected a confirmation");
    };
    commit_move(&h.coordinator, to_backlog, true)
        .await
        .expect("unschedule");
    assert_eq!(h.coordinator.get(task.id).and_then(|task| task.scheduled_date), None);
}

#[tokio::test]
async fn session_scopes_loaded_rows() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(JsonlRowStore::open(dir.path()).expect("open store"));
    let identity = Arc::new(LocalIdentity::open(dir.path()).expect("open identity"));
    let notifier = Arc::new(RecordingNotifier::default());
    let coordinator = MutationCoordinator::new(
        store.clone(),
        identity.clone(),
        notifier.clone(),
        Connectivity::default(),
    );

    assert!(matches!(coordinator.refresh().await, Err(MutationError::NoSession)));

    identity.sign_in("alice", None).expect("alice");
    coordinator
        .create(TaskPayload::titled("alice's task"))
        .await
        .expect("create");

    identity.sign_in("bob", None).expect("bob");
    assert_eq!(coordinator.refresh().await.expect("refresh"), 0);

    identity.sign_in("alice", None).expect("alice again");
    assert_eq!(coordinator.refresh().await.expect("refresh"), 1);
}
