use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::lenient_timestamp;
use crate::errors::ValidationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Todo,
    Doing,
    Done,
    Blocked,
}

impl Status {
    pub const ALL: [Status; 4] = [Status::Todo, Status::Doing, Status::Done, Status::Blocked];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::Doing => "doing",
            Status::Done => "done",
            Status::Blocked => "blocked",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(Status::Todo),
            "doing" => Ok(Status::Doing),
            "done" => Ok(Status::Done),
            "blocked" => Ok(Status::Blocked),
            other => Err(anyhow!(
                "unknown status: {other} (expected todo, doing, done or blocked)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Quick,
    #[default]
    Normal,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Quick => "quick",
            TaskType::Normal => "normal",
        }
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(TaskType::Quick),
            "normal" => Ok(TaskType::Normal),
            other => Err(anyhow!("unknown task type: {other} (expected quick or normal)")),
        }
    }
}

/// Ordinal priority; serialized as the bare integer `0`, `1` or `2`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Medium),
            2 => Ok(Priority::High),
            other => Err(format!("priority must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        match value {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "l" | "low" => Ok(Priority::Low),
            "1" | "m" | "med" | "medium" => Ok(Priority::Medium),
            "2" | "h" | "high" => Ok(Priority::High),
            other => Err(anyhow!("unknown priority: {other} (expected 0-2 or low/medium/high)")),
        }
    }
}

/// Order in which `cycle` advances a task's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCycle(Vec<Status>);

impl Default for StatusCycle {
    fn default() -> Self {
        Self(vec![Status::Todo, Status::Doing, Status::Blocked, Status::Done])
    }
}

impl StatusCycle {
    pub fn new(order: Vec<Status>) -> anyhow::Result<Self> {
        if order.len() < 2 {
            return Err(anyhow!("status cycle needs at least two statuses"));
        }
        for (idx, status) in order.iter().enumerate() {
            if order[..idx].contains(status) {
                return Err(anyhow!("status cycle repeats {status}"));
            }
        }
        Ok(Self(order))
    }

    /// Status after `current`; statuses outside the cycle restart it.
    pub fn next(&self, current: Status) -> Status {
        match self.0.iter().position(|status| *status == current) {
            Some(idx) => self.0[(idx + 1) % self.0.len()],
            None => self.0[0],
        }
    }

    pub fn statuses(&self) -> &[Status] {
        &self.0
    }
}

impl FromStr for StatusCycle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let order = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect::<anyhow::Result<Vec<Status>>>()?;
        Self::new(order)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,

    pub user_id: String,

    pub title: String,

    #[serde(default)]
    pub note: Option<String>,

    #[serde(default)]
    pub project: Option<String>,

    #[serde(rename = "type", default)]
    pub kind: TaskType,

    #[serde(default)]
    pub status: Status,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub estimate_blocks: u32,

    #[serde(default)]
    pub progress: u8,

    #[serde(default)]
    pub target_date: Option<NaiveDate>,

    #[serde(default)]
    pub scheduled_date: Option<NaiveDate>,

    #[serde(default, with = "lenient_timestamp")]
    pub due_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_backlog(&self) -> bool {
        self.scheduled_date.is_none()
    }

    /// First eight characters of the id, used when listing tasks.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

/// Fields submitted when creating a task. Everything but the title is
/// defaulted by the row store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskPayload {
    pub title: String,
    pub note: Option<String>,
    pub project: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<TaskType>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub estimate_blocks: Option<i64>,
    pub progress: Option<i64>,
    pub target_date: Option<NaiveDate>,
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default, with = "lenient_timestamp")]
    pub due_at: Option<DateTime<Utc>>,
}

impl TaskPayload {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)?;
        validate_numbers(self.estimate_blocks, self.progress)
    }
}

/// A partial update. `None` leaves a field alone; for nullable fields
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub note: Option<Option<String>>,
    pub project: Option<Option<String>>,
    pub kind: Option<TaskType>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub estimate_blocks: Option<i64>,
    pub progress: Option<i64>,
    pub target_date: Option<Option<NaiveDate>>,
    pub scheduled_date: Option<Option<NaiveDate>>,
    pub due_at: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            status: Some(Status::Done),
            progress: Some(100),
            ..Self::default()
        }
    }

    pub fn schedule(date: Option<NaiveDate>) -> Self {
        Self {
            scheduled_date: Some(date),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = self.title.as_deref() {
            validate_title(title)?;
        }
        validate_numbers(self.estimate_blocks, self.progress)
    }
}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::BlankTitle);
    }
    Ok(())
}

fn validate_numbers(
    estimate_blocks: Option<i64>,
    progress: Option<i64>,
) -> Result<(), ValidationError> {
    if let Some(estimate) = estimate_blocks
        && (estimate < 0 || estimate > i64::from(u32::MAX))
    {
        return Err(ValidationError::EstimateOutOfRange(estimate));
    }
    if let Some(progress) = progress
        && !(0..=100).contains(&progress)
    {
        return Err(ValidationError::ProgressOutOfRange(progress));
    }
    Ok(())
}
