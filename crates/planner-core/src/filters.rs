use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use tracing::{
  debug,
  trace
};

use crate::task::{
  Priority,
  Status,
  Task
};

/// A single filter slot: either
/// unrestricted or pinned to a value.
#[derive(
  Debug, Clone, PartialEq, Eq, Default,
)]
pub enum Choice<T> {
  #[default]
  All,
  Only(T)
}

impl<T> Choice<T> {
  pub fn is_all(&self) -> bool {
    matches!(self, Choice::All)
  }

  pub fn as_only(&self) -> Option<&T> {
    match self {
      | Choice::All => None,
      | Choice::Only(value) => Some(value)
    }
  }
}

impl<T> FromStr for Choice<T>
where
  T: FromStr,
  anyhow::Error: From<T::Err>
{
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    if trimmed.is_empty()
      || trimmed
        .eq_ignore_ascii_case("all")
    {
      return Ok(Choice::All);
    }
    Ok(Choice::Only(trimmed.parse()?))
  }
}

impl<T: fmt::Display> fmt::Display
  for Choice<T>
{
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | Choice::All => f.write_str("all"),
      | Choice::Only(value) => {
        value.fmt(f)
      }
    }
  }
}

/// Transient predicate behind the All
/// view. Not persisted.
#[derive(
  Debug, Clone, PartialEq, Eq, Default,
)]
pub struct FilterState {
  pub search:   String,
  pub status:   Choice<Status>,
  pub project:  Choice<String>,
  pub priority: Choice<Priority>
}

impl FilterState {
  /// Conjunction of every active slot.
  /// Search is a case-insensitive
  /// substring over title and note.
  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    if let Some(status) =
      self.status.as_only()
      && task.status != *status
    {
      return false;
    }

    if let Some(priority) =
      self.priority.as_only()
      && task.priority != *priority
    {
      return false;
    }

    if let Some(project) =
      self.project.as_only()
      && task.project.as_deref()
        != Some(project.as_str())
    {
      return false;
    }

    let needle =
      self.search.trim().to_lowercase();
    if !needle.is_empty() {
      let haystack = format!(
        "{} {}",
        task.title,
        task.note.as_deref().unwrap_or("")
      )
      .to_lowercase();
      if !haystack.contains(&needle) {
        trace!(id = %task.id, "search term did not match");
        return false;
      }
    }

    true
  }

  /// Resets a project filter whose value
  /// no task carries anymore. Returns
  /// whether anything changed.
  #[tracing::instrument(skip(
    self, tasks
  ))]
  pub fn heal(
    &mut self,
    tasks: &[Task]
  ) -> bool {
    let Some(project) =
      self.project.as_only()
    else {
      return false;
    };

    let still_used = tasks.iter().any(
      |task| {
        task.project.as_deref()
          == Some(project.as_str())
      }
    );
    if still_used {
      return false;
    }

    debug!(
      project = %project,
      "project filter no longer matches any task; resetting"
    );
    self.project = Choice::All;
    true
  }
}

/// Distinct non-empty projects, sorted.
pub fn project_facets(
  tasks: &[Task]
) -> Vec<String> {
  tasks
    .iter()
    .filter_map(|task| {
      task.project.as_deref()
    })
    .map(str::trim)
    .filter(|project| !project.is_empty())
    .map(ToString::to_string)
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect()
}
