//! Drag-to-reschedule protocol for the week board.
//!
//! A drag starts on a task, ends on a drop target, and turns into a
//! [`MoveProposal`]. Nothing is written until the proposal is confirmed and
//! handed to [`commit_move`].

use std::fmt;

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use crate::coordinator::MutationCoordinator;
use crate::datetime::day_key;
use crate::errors::MutationError;
use crate::store::RowStore;
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    Day(NaiveDate),
    Unscheduled,
}

impl DropTarget {
    /// The `scheduled_date` a task would carry after the move.
    pub fn scheduled_date(self) -> Option<NaiveDate> {
        match self {
            DropTarget::Day(date) => Some(date),
            DropTarget::Unscheduled => None,
        }
    }
}

impl fmt::Display for DropTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropTarget::Day(date) => f.write_str(&day_key(*date)),
            DropTarget::Unscheduled => f.write_str("unscheduled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        task_id: Uuid,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    NotDragging,
    UnknownTask,
    SameBucket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub task_id: Uuid,
    pub target: DropTarget,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveProposal {
    NoOp(NoOpReason),
    Confirm(PendingMove),
}

/// Decides what dropping `task_id` on `target` would do.
pub fn propose_move(tasks: &[Task], task_id: Uuid, target: DropTarget) -> MoveProposal {
    let Some(task) = tasks.iter().find(|task| task.id == task_id) else {
        return MoveProposal::NoOp(NoOpReason::UnknownTask);
    };

    if task.scheduled_date == target.scheduled_date() {
        return MoveProposal::NoOp(NoOpReason::SameBucket);
    }

    let prompt = match target {
        DropTarget::Day(date) => format!("Move \"{}\" to {}?", task.title, day_key(date)),
        DropTarget::Unscheduled => {
            format!("Remove the scheduled date from \"{}\"?", task.title)
        }
    };

    MoveProposal::Confirm(PendingMove {
        task_id,
        target,
        prompt,
    })
}

/// Tracks a single drag gesture.
#[derive(Debug, Default)]
pub struct DragSession {
    state: DragState,
}

impl DragSession {
    pub fn state(&self) -> DragState {
        self.state
    }

    /// Begins dragging. Refused while offline.
    pub fn start(&mut self, task_id: Uuid, offline: bool) -> bool {
        if offline {
            debug!(%task_id, "drag refused while offline");
            return false;
        }
        self.state = DragState::Dragging { task_id };
        true
    }

    pub fn cancel(&mut self) {
        self.state = DragState::Idle;
    }

    /// Ends the gesture on `target`; the session is idle afterwards.
    pub fn drop_on(&mut self, tasks: &[Task], target: DropTarget) -> MoveProposal {
        let state = std::mem::take(&mut self.state);
        match state {
            DragState::Idle => MoveProposal::NoOp(NoOpReason::NotDragging),
            DragState::Dragging { task_id } => {
                let proposal = propose_move(tasks, task_id, target);
                debug!(%task_id, %target, ?proposal, "drop");
                proposal
            }
        }
    }
}

/// Applies a confirmed move. A declined move changes nothing.
pub async fn commit_move<S: RowStore>(
    coordinator: &MutationCoordinator<S>,
    pending: PendingMove,
    confirmed: bool,
) -> Result<Option<Task>, MutationError> {
    if !confirmed {
        debug!(task_id = %pending.task_id, "move declined");
        return Ok(None);
    }
    coordinator
        .reschedule(pending.task_id, pending.target.scheduled_date())
        .await
}
