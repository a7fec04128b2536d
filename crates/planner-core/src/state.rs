use chrono::{DateTime, Utc};
use tracing::debug;

use crate::filters::{FilterState, project_facets};
use crate::task::Task;
use crate::views::{ViewKind, WeekView, all_view, today_view, week_view};

/// What the active view selected from the collection.
#[derive(Debug)]
pub enum Selection<'a> {
    Today(Vec<&'a Task>),
    Week(WeekView<'a>),
    All(Vec<&'a Task>),
}

impl Selection<'_> {
    pub fn len(&self) -> usize {
        match self {
            Selection::Today(tasks) | Selection::All(tasks) => tasks.len(),
            Selection::Week(week) => {
                week.unscheduled.len()
                    + week.days.iter().map(|day| day.tasks.len()).sum::<usize>()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Snapshot of everything the views read: the collection, the active view
/// and the transient filters.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub tasks: Vec<Task>,
    pub view: ViewKind,
    pub filters: FilterState,
}

impl AppState {
    pub fn new(tasks: Vec<Task>, view: ViewKind) -> Self {
        Self {
            tasks,
            view,
            ..Self::default()
        }
    }

    pub fn with_filters(mut self, filters: FilterState) -> Self {
        self.filters = filters;
        self
    }

    /// Replaces the collection and re-validates the filters against it.
    pub fn replace_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
        if self.filters.heal(&self.tasks) {
            debug!("project filter reset after collection change");
        }
    }

    pub fn projects(&self) -> Vec<String> {
        project_facets(&self.tasks)
    }

    /// Derives the active view. Filters only apply to the All view.
    pub fn select(&mut self, now: DateTime<Utc>) -> Selection<'_> {
        self.filters.heal(&self.tasks);
        match self.view {
            ViewKind::Today => Selection::Today(today_view(&self.tasks, now)),
            ViewKind::Week => Selection::Week(week_view(&self.tasks, now)),
            ViewKind::All => Selection::All(all_view(&self.tasks, &self.filters)),
        }
    }
}
