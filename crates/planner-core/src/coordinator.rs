use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::MutationError;
use crate::identity::IdentityProvider;
use crate::notify::{Notifier, Severity};
use crate::store::{RowQuery, RowStore};
use crate::task::{StatusCycle, Task, TaskPatch, TaskPayload};

/// Shared online/offline flag. Cloning hands out another view of the same
/// flag.
#[derive(Debug, Clone, Default)]
pub struct Connectivity {
    offline: Arc<AtomicBool>,
}

impl Connectivity {
    pub fn new(offline: bool) -> Self {
        Self {
            offline: Arc::new(AtomicBool::new(offline)),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        let previous = self.offline.swap(offline, Ordering::SeqCst);
        if previous != offline {
            info!(offline, "connectivity changed");
        }
    }
}

/// Owns the in-memory task collection and is the only writer to it.
///
/// Every mutation follows the same protocol: reject when offline, validate,
/// resolve the session, call the row store, then reconcile the single
/// affected entry with the row the store returned. The collection lock is
/// never held across a store call, so independent mutations may overlap.
pub struct MutationCoordinator<S> {
    store: S,
    identity: Arc<dyn IdentityProvider>,
    notifier: Arc<dyn Notifier>,
    connectivity: Connectivity,
    cycle: StatusCycle,
    tasks: Mutex<Vec<Task>>,
}

impl<S: RowStore> MutationCoordinator<S> {
    pub fn new(
        store: S,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn Notifier>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            store,
            identity,
            notifier,
            connectivity,
            cycle: StatusCycle::default(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_status_cycle(mut self, cycle: StatusCycle) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn status_cycle(&self) -> &StatusCycle {
        &self.cycle
    }

    /// Copy of the collection in its current order.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.lock().iter().find(|task| task.id == id).cloned()
    }

    /// Drops every local row, e.g. after sign-out.
    pub fn clear(&self) {
        self.tasks.lock().clear();
    }

    /// Replaces the collection with the signed-in user's rows. Reads are
    /// not gated on connectivity.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize, MutationError> {
        let user_id = self.user_id()?;

        let rows = match self.store.select(&RowQuery::for_user(&user_id)).await {
            Ok(rows) => rows,
            Err(err) => return Err(self.fail(MutationError::remote("select", &err))),
        };

        let count = rows.len();
        *self.tasks.lock() = rows;
        debug!(count, user_id = %user_id, "loaded tasks");
        Ok(count)
    }

    /// Inserts a task; the stored row goes to the front of the collection.
    #[tracing::instrument(skip(self, payload), fields(title = %payload.title))]
    pub async fn create(&self, payload: TaskPayload) -> Result<Task, MutationError> {
        if self.connectivity.is_offline() {
            return Err(self.fail(MutationError::Offline));
        }
        if let Err(err) = payload.validate() {
            return Err(self.fail(err.into()));
        }
        let user_id = self.user_id()?;

        let row = match self.store.insert(&user_id, &payload).await {
            Ok(row) => row,
            Err(err) => return Err(self.fail(MutationError::remote("insert", &err))),
        };

        self.tasks.lock().insert(0, row.clone());
        info!(id = %row.id, "created task");
        self.notifier.notify("Task created.", Severity::Normal);
        Ok(row)
    }

    /// Applies a partial update. Resolves to `Ok(None)` when the id is not
    /// in the collection.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Option<Task>, MutationError> {
        self.apply(id, patch, "Task updated.").await
    }

    /// Sets status to done and progress to 100.
    pub async fn mark_done(&self, id: Uuid) -> Result<Option<Task>, MutationError> {
        self.apply(id, TaskPatch::done(), "Task marked done.").await
    }

    /// Advances the status one step along the configured cycle.
    pub async fn cycle_status(&self, id: Uuid) -> Result<Option<Task>, MutationError> {
        let Some(current) = self.get(id).map(|task| task.status) else {
            if self.connectivity.is_offline() {
                return Err(self.fail(MutationError::Offline));
            }
            debug!(%id, "cycle for unknown task ignored");
            return Ok(None);
        };
        let next = self.cycle.next(current);
        debug!(%id, from = %current, to = %next, "cycling status");
        self.apply(id, TaskPatch::status(next), "Status updated.")
            .await
    }

    /// Sets or clears `scheduled_date`.
    pub async fn reschedule(
        &self,
        id: Uuid,
        date: Option<NaiveDate>,
    ) -> Result<Option<Task>, MutationError> {
        let message = if date.is_some() {
            "Task rescheduled."
        } else {
            "Task moved to unscheduled."
        };
        self.apply(id, TaskPatch::schedule(date), message).await
    }

    /// Deletes a task. Resolves to `Ok(false)` when the id is not in the
    /// collection.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, id: Uuid) -> Result<bool, MutationError> {
        if self.connectivity.is_offline() {
            return Err(self.fail(MutationError::Offline));
        }
        if self.get(id).is_none() {
            debug!(%id, "delete for unknown task ignored");
            return Ok(false);
        }
        let user_id = self.user_id()?;

        if let Err(err) = self.store.delete(&user_id, id).await {
            return Err(self.fail(MutationError::remote("delete", &err)));
        }

        self.tasks.lock().retain(|task| task.id != id);
        info!(%id, "deleted task");
        self.notifier.notify("Task deleted.", Severity::Normal);
        Ok(true)
    }

    async fn apply(
        &self,
        id: Uuid,
        patch: TaskPatch,
        message: &str,
    ) -> Result<Option<Task>, MutationError> {
        if self.connectivity.is_offline() {
            return Err(self.fail(MutationError::Offline));
        }
        if let Err(err) = patch.validate() {
            return Err(self.fail(err.into()));
        }
        if self.get(id).is_none() {
            debug!(%id, "update for unknown task ignored");
            return Ok(None);
        }
        let user_id = self.user_id()?;

        let row = match self.store.update(&user_id, id, &patch).await {
            Ok(row) => row,
            Err(err) => return Err(self.fail(MutationError::remote("update", &err))),
        };

        {
            let mut tasks = self.tasks.lock();
            match tasks.iter_mut().find(|task| task.id == id) {
                Some(slot) => *slot = row.clone(),
                None => debug!(%id, "task removed while update was in flight; dropping response"),
            }
        }

        info!(%id, status = %row.status, "updated task");
        self.notifier.notify(message, Severity::Normal);
        Ok(Some(row))
    }

    fn user_id(&self) -> Result<String, MutationError> {
        self.identity
            .session()
            .map(|session| session.user_id)
            .ok_or_else(|| self.fail(MutationError::NoSession))
    }

    fn fail(&self, err: MutationError) -> MutationError {
        match &err {
            MutationError::Remote { op, .. } => error!(op = %op, error = %err, "row store call failed"),
            _ => warn!(error = %err, "mutation rejected"),
        }
        self.notifier.notify(&err.to_string(), Severity::Error);
        err
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::errors::ValidationError;
    use crate::identity::LocalIdentity;
    use crate::notify::RecordingNotifier;
    use crate::store::JsonlRowStore;
    use crate::task::Status;

    struct Fixture {
        _dir: TempDir,
        notifier: Arc<RecordingNotifier>,
        coordinator: MutationCoordinator<JsonlRowStore>,
    }

    fn fixture(signed_in: bool) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonlRowStore::open(dir.path()).expect("open store");
        let identity = LocalIdentity::open(dir.path()).expect("open identity");
        if signed_in {
            identity.sign_in("u-1", None).expect("sign in");
        }
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = MutationCoordinator::new(
            store,
            Arc::new(identity),
            notifier.clone(),
            Connectivity::default(),
        );
        Fixture {
            _dir: dir,
            notifier,
            coordinator,
        }
    }

    #[tokio::test]
    async fn create_prepends_store_row() {
        let fx = fixture(true);
        fx.coordinator
            .create(TaskPayload::titled("first"))
            .await
            .expect("create first");
        let second = fx
            .coordinator
            .create(TaskPayload::titled("second"))
            .await
            .expect("create second");

        let tasks = fx.coordinator.tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, second.id);
        assert_eq!(tasks[0].user_id, "u-1");
        assert_eq!(
            fx.notifier.last(),
            Some((Severity::Normal, "Task created.".to_string()))
        );
    }

    #[tokio::test]
    async fn blank_title_is_rejected_before_the_store() {
        let fx = fixture(true);
        let err = fx
            .coordinator
            .create(TaskPayload::titled("   "))
            .await
            .expect_err("blank title");
        assert!(matches!(
            err,
            MutationError::Validation(ValidationError::BlankTitle)
        ));
        assert!(fx.coordinator.tasks().is_empty());
        assert_eq!(
            fx.notifier.last(),
            Some((Severity::Error, "title is required".to_string()))
        );
    }

    #[tokio::test]
    async fn missing_session_is_reported() {
        let fx = fixture(false);
        let err = fx
            .coordinator
            .create(TaskPayload::titled("orphan"))
            .await
            .expect_err("no session");
        assert!(matches!(err, MutationError::NoSession));
    }

    #[tokio::test]
    async fn cycle_follows_configured_order() {
        let mut fx = fixture(true);
        fx.coordinator = fx
            .coordinator
            .with_status_cycle("todo,done".parse().expect("cycle"));
        let task = fx
            .coordinator
            .create(TaskPayload::titled("flip"))
            .await
            .expect("create");

        let done = fx
            .coordinator
            .cycle_status(task.id)
            .await
            .expect("cycle")
            .expect("known task");
        assert_eq!(done.status, Status::Done);

        let back = fx
            .coordinator
            .cycle_status(task.id)
            .await
            .expect("cycle")
            .expect("known task");
        assert_eq!(back.status, Status::Todo);
    }

    #[tokio::test]
    async fn unknown_ids_are_silent_no_ops() {
        let fx = fixture(true);
        let ghost = Uuid::new_v4();
        assert_eq!(fx.coordinator.mark_done(ghost).await.expect("done"), None);
        assert_eq!(fx.coordinator.cycle_status(ghost).await.expect("cycle"), None);
        assert!(!fx.coordinator.remove(ghost).await.expect("remove"));
        assert!(fx.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn refresh_loads_rows_for_the_session_user() {
        let fx = fixture(true);
        fx.coordinator
            .create(TaskPayload::titled("persisted"))
            .await
            .expect("create");
        fx.coordinator.clear();
        assert!(fx.coordinator.tasks().is_empty());

        assert_eq!(fx.coordinator.refresh().await.expect("refresh"), 1);
        assert_eq!(fx.coordinator.tasks()[0].title, "persisted");
    }
}
