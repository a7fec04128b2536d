use std::cmp::Ordering;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::task::{Task, TaskPatch, TaskPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Priority,
    ScheduledDate,
    DueAt,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
    pub nulls_first: bool,
}

impl SortKey {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            descending: false,
            nulls_first: false,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            descending: true,
            nulls_first: false,
        }
    }
}

/// `select` arguments: rows owned by `user_id`, in `order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    pub user_id: String,
    pub order: Vec<SortKey>,
}

impl RowQuery {
    /// Ordering used when a session loads its collection.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            order: vec![
                SortKey::desc(SortField::Priority),
                SortKey::asc(SortField::ScheduledDate),
                SortKey::asc(SortField::DueAt),
            ],
        }
    }
}

/// Generic CRUD over the `tasks` collection. Every call is scoped to one
/// user; returned rows are authoritative.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn select(&self, query: &RowQuery) -> anyhow::Result<Vec<Task>>;

    async fn insert(&self, user_id: &str, payload: &TaskPayload) -> anyhow::Result<Task>;

    async fn update(&self, user_id: &str, id: Uuid, patch: &TaskPatch) -> anyhow::Result<Task>;

    async fn delete(&self, user_id: &str, id: Uuid) -> anyhow::Result<()>;
}

#[async_trait]
impl<S: RowStore + ?Sized> RowStore for Arc<S> {
    async fn select(&self, query: &RowQuery) -> anyhow::Result<Vec<Task>> {
        (**self).select(query).await
    }

    async fn insert(&self, user_id: &str, payload: &TaskPayload) -> anyhow::Result<Task> {
        (**self).insert(user_id, payload).await
    }

    async fn update(&self, user_id: &str, id: Uuid, patch: &TaskPatch) -> anyhow::Result<Task> {
        (**self).update(user_id, id, patch).await
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> anyhow::Result<()> {
        (**self).delete(user_id, id).await
    }
}

pub fn compare_rows(a: &Task, b: &Task, order: &[SortKey]) -> Ordering {
    for key in order {
        let ordering = match key.field {
            SortField::Priority => directed(a.priority.cmp(&b.priority), key),
            SortField::CreatedAt => directed(a.created_at.cmp(&b.created_at), key),
            SortField::ScheduledDate => compare_nullable(a.scheduled_date, b.scheduled_date, key),
            SortField::DueAt => compare_nullable(a.due_at, b.due_at, key),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn directed(ordering: Ordering, key: &SortKey) -> Ordering {
    if key.descending {
        ordering.reverse()
    } else {
        ordering
    }
}

// Null placement does not flip with `descending`.
fn compare_nullable<T: Ord>(a: Option<T>, b: Option<T>, key: &SortKey) -> Ordering {
    match (a, b) {
        (Some(left), Some(right)) => directed(left.cmp(&right), key),
        (None, None) => Ordering::Equal,
        (None, Some(_)) if key.nulls_first => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) if key.nulls_first => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
    }
}

/// File-backed row store: one JSON row per line in `tasks.data`.
#[derive(Debug)]
pub struct JsonlRowStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlRowStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        if !tasks_path.exists() {
            fs::write(&tasks_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            "opened row store"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            lock: Mutex::new(()),
        })
    }

    fn load(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.tasks_path).context("failed to load tasks.data")
    }

    fn save(&self, rows: &[Task]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tasks_path, rows).context("failed to save tasks.data")
    }
}

#[async_trait]
impl RowStore for JsonlRowStore {
    #[tracing::instrument(skip(self), fields(user_id = %query.user_id))]
    async fn select(&self, query: &RowQuery) -> anyhow::Result<Vec<Task>> {
        let _guard = self.lock.lock();
        let mut rows: Vec<Task> = self
            .load()?
            .into_iter()
            .filter(|row| row.user_id == query.user_id)
            .collect();
        rows.sort_by(|a, b| compare_rows(a, b, &query.order));
        debug!(count = rows.len(), "selected rows");
        Ok(rows)
    }

    #[tracing::instrument(skip(self, payload))]
    async fn insert(&self, user_id: &str, payload: &TaskPayload) -> anyhow::Result<Task> {
        let _guard = self.lock.lock();
        let now = Utc::now();
        let title = normalize_text(Some(payload.title.clone()))
            .ok_or_else(|| anyhow!("title cannot be blank"))?;

        let row = Task {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            title,
            note: normalize_text(payload.note.clone()),
            project: normalize_text(payload.project.clone()),
            kind: payload.kind.unwrap_or_default(),
            status: payload.status.unwrap_or_default(),
            priority: payload.priority.unwrap_or_default(),
            estimate_blocks: to_estimate(payload.estimate_blocks.unwrap_or(0))?,
            progress: to_progress(payload.progress.unwrap_or(0))?,
            target_date: payload.target_date,
            scheduled_date: payload.scheduled_date,
            due_at: payload.due_at,
            created_at: now,
            updated_at: now,
        };

        let mut rows = self.load()?;
        rows.push(row.clone());
        self.save(&rows)?;
        debug!(id = %row.id, "inserted row");
        Ok(row)
    }

    #[tracing::instrument(skip(self, patch))]
    async fn update(&self, user_id: &str, id: Uuid, patch: &TaskPatch) -> anyhow::Result<Task> {
        let _guard = self.lock.lock();
        let mut rows = self.load()?;
        let row = rows
            .iter_mut()
            .find(|row| row.id == id && row.user_id == user_id)
            .ok_or_else(|| anyhow!("task not found: {id}"))?;

        apply_patch(row, patch)?;
        row.updated_at = Utc::now();
        let updated = row.clone();

        self.save(&rows)?;
        debug!(id = %id, "updated row");
        Ok(updated)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, user_id: &str, id: Uuid) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut rows = self.load()?;
        let before = rows.len();
        rows.retain(|row| !(row.id == id && row.user_id == user_id));
        if rows.len() == before {
            return Err(anyhow!("task not found: {id}"));
        }
        self.save(&rows)?;
        debug!(id = %id, "deleted row");
        Ok(())
    }
}

fn apply_patch(row: &mut Task, patch: &TaskPatch) -> anyhow::Result<()> {
    if let Some(title) = patch.title.as_ref() {
        row.title =
            normalize_text(Some(title.clone())).ok_or_else(|| anyhow!("title cannot be blank"))?;
    }
    if let Some(note) = patch.note.as_ref() {
        row.note = normalize_text(note.clone());
    }
    if let Some(project) = patch.project.as_ref() {
        row.project = normalize_text(project.clone());
    }
    if let Some(kind) = patch.kind {
        row.kind = kind;
    }
    if let Some(status) = patch.status {
        row.status = status;
    }
    if let Some(priority) = patch.priority {
        row.priority = priority;
    }
    if let Some(estimate) = patch.estimate_blocks {
        row.estimate_blocks = to_estimate(estimate)?;
    }
    if let Some(progress) = patch.progress {
        row.progress = to_progress(progress)?;
    }
    if let Some(target_date) = patch.target_date {
        row.target_date = target_date;
    }
    if let Some(scheduled_date) = patch.scheduled_date {
        row.scheduled_date = scheduled_date;
    }
    if let Some(due_at) = patch.due_at {
        row.due_at = due_at;
    }
    Ok(())
}

fn normalize_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn to_estimate(value: i64) -> anyhow::Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("estimate_blocks out of range: {value}"))
}

fn to_progress(value: i64) -> anyhow::Result<u8> {
    u8::try_from(value)
        .ok()
        .filter(|progress| *progress <= 100)
        .ok_or_else(|| anyhow!("progress out of range: {value}"))
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Task>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let row: Task = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(row);
    }

    debug!(count = out.len(), "loaded rows from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, rows))]
fn save_jsonl_atomic(path: &Path, rows: &[Task]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = rows.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for row in rows {
        let serialized = serde_json::to_string(row)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
