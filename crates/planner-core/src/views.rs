use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::trace;

use crate::datetime::{canonical_date, day_key, week_days};
use crate::filters::FilterState;
use crate::task::{Task, TaskType};
use crate::urgency::classify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewKind {
    #[default]
    Today,
    Week,
    All,
}

impl FromStr for ViewKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(ViewKind::Today),
            "week" => Ok(ViewKind::Week),
            "all" => Ok(ViewKind::All),
            other => Err(anyhow!("unknown view: {other} (expected today, week or all)")),
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViewKind::Today => "today",
            ViewKind::Week => "week",
            ViewKind::All => "all",
        })
    }
}

/// Scheduled for today, or a quick task that has not been scheduled.
pub fn is_due_today(task: &Task, today: NaiveDate) -> bool {
    match task.scheduled_date {
        Some(date) => date == today,
        None => task.kind == TaskType::Quick,
    }
}

/// Priority descending, then urgency band, then earliest due (absent last).
pub fn compare_for_today(a: &Task, b: &Task, now: DateTime<Utc>) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| {
            classify(a.due_at, now)
                .rank()
                .cmp(&classify(b.due_at, now).rank())
        })
        .then_with(|| match (a.due_at, b.due_at) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

#[tracing::instrument(skip(tasks, now), fields(total = tasks.len()))]
pub fn today_view(tasks: &[Task], now: DateTime<Utc>) -> Vec<&Task> {
    let today = canonical_date(now);
    let mut selected: Vec<&Task> = tasks.iter().filter(|task| is_due_today(task, today)).collect();
    selected.sort_by(|a, b| compare_for_today(a, b, now));
    trace!(selected = selected.len(), today = %today, "computed today view");
    selected
}

#[derive(Debug, Clone)]
pub struct DayBucket<'a> {
    pub date: NaiveDate,
    pub key: String,
    pub is_today: bool,
    pub tasks: Vec<&'a Task>,
}

#[derive(Debug, Clone)]
pub struct WeekView<'a> {
    pub days: Vec<DayBucket<'a>>,
    pub unscheduled: Vec<&'a Task>,
}

/// Seven Monday-first day buckets plus the backlog. Tasks scheduled outside
/// the week appear nowhere. Collection order is kept inside each bucket.
#[tracing::instrument(skip(tasks, now), fields(total = tasks.len()))]
pub fn week_view(tasks: &[Task], now: DateTime<Utc>) -> WeekView<'_> {
    let today = canonical_date(now);
    let mut days: Vec<DayBucket<'_>> = week_days(now)
        .into_iter()
        .map(|date| DayBucket {
            date,
            key: day_key(date),
            is_today: date == today,
            tasks: Vec::new(),
        })
        .collect();
    let mut unscheduled = Vec::new();

    for task in tasks {
        match task.scheduled_date {
            None => unscheduled.push(task),
            Some(date) => {
                if let Some(bucket) = days.iter_mut().find(|bucket| bucket.date == date) {
                    bucket.tasks.push(task);
                }
            }
        }
    }

    WeekView { days, unscheduled }
}

/// Filtered tasks, newest first.
#[tracing::instrument(skip(tasks, filters), fields(total = tasks.len()))]
pub fn all_view<'a>(tasks: &'a [Task], filters: &FilterState) -> Vec<&'a Task> {
    let mut selected: Vec<&Task> = tasks.iter().filter(|task| filters.matches(task)).collect();
    selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    selected
}
