use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cli::{Command, FieldArgs, FilterArgs};
use crate::config::Config;
use crate::coordinator::{Connectivity, MutationCoordinator};
use crate::datetime::{current_reference_instant, parse_date_input, parse_timestamp_input};
use crate::dnd::{DragSession, DropTarget, MoveProposal, NoOpReason, commit_move};
use crate::errors::MutationError;
use crate::filters::FilterState;
use crate::identity::{IdentityProvider, LocalIdentity};
use crate::notify::{ConsoleNotifier, Notifier, Severity};
use crate::render::Renderer;
use crate::state::{AppState, Selection};
use crate::store::JsonlRowStore;
use crate::task::{Task, TaskPatch, TaskPayload};
use crate::views::ViewKind;

#[instrument(skip(cfg, data_dir, renderer, command))]
pub async fn dispatch(
    cfg: &Config,
    data_dir: &Path,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let now = current_reference_instant().with_timezone(&Utc);
    let identity = Arc::new(LocalIdentity::open(data_dir)?);
    identity.on_session_change(Box::new(|session| match session {
        Some(session) => debug!(user_id = %session.user_id, "session started"),
        None => debug!("session ended"),
    }));
    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier::new(renderer.color()));
    let connectivity = Connectivity::new(cfg.offline()?);
    let store = JsonlRowStore::open(data_dir)
        .with_context(|| format!("failed to open row store at {}", data_dir.display()))?;
    let coordinator =
        MutationCoordinator::new(store, identity.clone(), notifier.clone(), connectivity)
            .with_status_cycle(cfg.status_cycle()?);

    match &command {
        Command::Login { user, email } => {
            let session = identity.sign_in(user, email.as_deref())?;
            notifier.notify(&format!("Signed in as {}.", session.user_id), Severity::Normal);
            return Ok(());
        }
        Command::Signup { user, email } => {
            let session = identity.sign_up(user, email.as_deref())?;
            notifier.notify(
                &format!("Account created; signed in as {}.", session.user_id),
                Severity::Normal,
            );
            return Ok(());
        }
        Command::Logout => {
            identity.sign_out()?;
            coordinator.clear();
            notifier.notify("Signed out.", Severity::Normal);
            return Ok(());
        }
        Command::Whoami => return renderer.print_session(identity.session().as_ref()),
        _ => {}
    }

    if identity.session().is_none() {
        return Err(anyhow!(
            "no active session; run `planner login <user>` first"
        ));
    }
    coordinator.refresh().await.map_err(|err| failed("load", err))?;

    match command {
        Command::Today => show_view(&coordinator, renderer, ViewKind::Today, None, now),
        Command::Week => show_view(&coordinator, renderer, ViewKind::Week, None, now),
        Command::All(args) => {
            let filters = parse_filters(&args)?;
            show_view(&coordinator, renderer, ViewKind::All, Some(filters), now)
        }
        Command::Projects => {
            let state = AppState::new(coordinator.tasks(), ViewKind::All);
            renderer.print_projects(&state.projects())
        }
        Command::Info { id } => {
            let tasks = coordinator.tasks();
            let id = resolve_task_id(&tasks, &id)?;
            match tasks.iter().find(|task| task.id == id) {
                Some(task) => renderer.print_task_info(task, now),
                None => Err(anyhow!("task {id} not found")),
            }
        }
        Command::Add { title, fields } => {
            let payload = build_payload(title.join(" "), &fields, now)?;
            coordinator
                .create(payload)
                .await
                .map_err(|err| failed("add", err))?;
            Ok(())
        }
        Command::Edit { id, title, fields } => {
            let id = resolve_task_id(&coordinator.tasks(), &id)?;
            let patch = build_patch(title, &fields, now)?;
            if patch.is_empty() {
                warn!(%id, "edit without any field changes");
                return Err(anyhow!("nothing to change; pass at least one field"));
            }
            coordinator
                .update(id, patch)
                .await
                .map_err(|err| failed("edit", err))?;
            Ok(())
        }
        Command::Done { id } => {
            let id = resolve_task_id(&coordinator.tasks(), &id)?;
            coordinator
                .mark_done(id)
                .await
                .map_err(|err| failed("done", err))?;
            Ok(())
        }
        Command::Cycle { id } => {
            let id = resolve_task_id(&coordinator.tasks(), &id)?;
            coordinator
                .cycle_status(id)
                .await
                .map_err(|err| failed("cycle", err))?;
            Ok(())
        }
        Command::Move { id, target, yes } => {
            let tasks = coordinator.tasks();
            let id = resolve_task_id(&tasks, &id)?;
            let target = parse_drop_target(&target, now)?;

            let mut drag = DragSession::default();
            if !drag.start(id, coordinator.connectivity().is_offline()) {
                notifier.notify(&MutationError::Offline.to_string(), Severity::Error);
                return Err(anyhow!("move failed"));
            }
            match drag.drop_on(&tasks, target) {
                MoveProposal::NoOp(NoOpReason::SameBucket) => {
                    notifier.notify("Task is already there.", Severity::Normal);
                    Ok(())
                }
                MoveProposal::NoOp(reason) => {
                    debug!(?reason, "move ignored");
                    Ok(())
                }
                MoveProposal::Confirm(pending) => {
                    let confirmed = confirm(&pending.prompt, yes)?;
                    commit_move(&coordinator, pending, confirmed)
                        .await
                        .map_err(|err| failed("move", err))?;
                    Ok(())
                }
            }
        }
        Command::Delete { id, yes } => {
            let tasks = coordinator.tasks();
            let id = resolve_task_id(&tasks, &id)?;
            let Some(prompt) = delete_prompt(&tasks, id) else {
                debug!(%id, "delete of unknown task ignored");
                return Ok(());
            };
            if !confirm(&prompt, yes)? {
                info!(%id, "delete declined");
                return Ok(());
            }
            coordinator
                .remove(id)
                .await
                .map_err(|err| failed("delete", err))?;
            Ok(())
        }
        Command::Login { .. } | Command::Signup { .. } | Command::Logout | Command::Whoami => {
            Ok(())
        }
    }
}

fn show_view(
    coordinator: &MutationCoordinator<JsonlRowStore>,
    renderer: &Renderer,
    view: ViewKind,
    filters: Option<FilterState>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    if coordinator.connectivity().is_offline() {
        warn!("offline: showing tasks read-only");
    }
    let mut state = AppState::new(coordinator.tasks(), view);
    if let Some(filters) = filters {
        state = state.with_filters(filters);
    }

    match state.select(now) {
        Selection::Today(tasks) | Selection::All(tasks) => renderer.print_task_table(&tasks, now),
        Selection::Week(week) => renderer.print_week(&week, now),
    }
}

/// Confirmation text for deleting `id`, or `None` when the collection no
/// longer holds it.
fn delete_prompt(tasks: &[Task], id: Uuid) -> Option<String> {
    tasks
        .iter()
        .find(|task| task.id == id)
        .map(|task| format!("Delete \"{}\"?", task.title))
}

/// The coordinator already told the user why; the error only names the
/// command for the exit status.
fn failed(command: &str, err: MutationError) -> anyhow::Error {
    debug!(command, error = %err, "command failed");
    anyhow!("{command} failed")
}

fn parse_filters(args: &FilterArgs) -> anyhow::Result<FilterState> {
    Ok(FilterState {
        search: args.search.clone(),
        status: args.status.parse().context("invalid --status")?,
        project: args.project.parse().context("invalid --project")?,
        priority: args.priority.parse().context("invalid --priority")?,
    })
}

/// Full UUID, or a prefix of the hyphen-less form matching exactly one task.
pub fn resolve_task_id(tasks: &[Task], token: &str) -> anyhow::Result<Uuid> {
    let token = token.trim();
    if let Ok(id) = Uuid::parse_str(token) {
        return Ok(id);
    }

    let needle = token.replace('-', "").to_ascii_lowercase();
    if needle.is_empty() {
        return Err(anyhow!("task id cannot be empty"));
    }

    let mut matches = tasks
        .iter()
        .filter(|task| task.id.simple().to_string().starts_with(&needle));
    match (matches.next(), matches.next()) {
        (Some(task), None) => Ok(task.id),
        (Some(_), Some(_)) => Err(anyhow!("task id {token} is ambiguous")),
        (None, _) => Err(anyhow!("no task matches id {token}")),
    }
}

fn parse_drop_target(raw: &str, now: DateTime<Utc>) -> anyhow::Result<DropTarget> {
    if is_clear(raw) || raw.trim().eq_ignore_ascii_case("unscheduled") {
        return Ok(DropTarget::Unscheduled);
    }
    Ok(DropTarget::Day(parse_date_input(raw, now)?))
}

fn is_clear(raw: &str) -> bool {
    let raw = raw.trim();
    raw.is_empty() || raw.eq_ignore_ascii_case("none")
}

/// Nullable text for `edit`: empty or `none` clears it.
fn clearable_text(raw: &Option<String>) -> Option<Option<String>> {
    raw.as_ref()
        .map(|value| (!is_clear(value)).then(|| value.clone()))
}

fn build_payload(title: String, fields: &FieldArgs, now: DateTime<Utc>) -> anyhow::Result<TaskPayload> {
    Ok(TaskPayload {
        title,
        note: fields.note.clone(),
        project: fields.project.clone(),
        kind: fields.kind.as_deref().map(str::parse).transpose()?,
        status: fields.status.as_deref().map(str::parse).transpose()?,
        priority: fields.priority.as_deref().map(str::parse).transpose()?,
        estimate_blocks: fields.estimate,
        progress: fields.progress,
        target_date: fields
            .target
            .as_deref()
            .map(|raw| parse_date_input(raw, now))
            .transpose()?,
        scheduled_date: fields
            .scheduled
            .as_deref()
            .map(|raw| parse_date_input(raw, now))
            .transpose()?,
        due_at: fields
            .due
            .as_deref()
            .map(|raw| parse_timestamp_input(raw, now))
            .transpose()?,
    })
}

fn build_patch(
    title: Option<String>,
    fields: &FieldArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<TaskPatch> {
    let date = |raw: &Option<String>| -> anyhow::Result<_> {
        raw.as_deref()
            .map(|value| {
                if is_clear(value) {
                    Ok(None)
                } else {
                    parse_date_input(value, now).map(Some)
                }
            })
            .transpose()
    };

    Ok(TaskPatch {
        title,
        note: clearable_text(&fields.note),
        project: clearable_text(&fields.project),
        kind: fields.kind.as_deref().map(str::parse).transpose()?,
        status: fields.status.as_deref().map(str::parse).transpose()?,
        priority: fields.priority.as_deref().map(str::parse).transpose()?,
        estimate_blocks: fields.estimate,
        progress: fields.progress,
        target_date: date(&fields.target)?,
        scheduled_date: date(&fields.scheduled)?,
        due_at: fields
            .due
            .as_deref()
            .map(|value| {
                if is_clear(value) {
                    Ok(None)
                } else {
                    parse_timestamp_input(value, now).map(Some)
                }
            })
            .transpose()?,
    })
}

/// `--yes` skips the prompt; without a terminal the answer is no.
fn confirm(prompt: &str, assume_yes: bool) -> anyhow::Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    if !io::stdin().is_terminal() {
        warn!(prompt, "no terminal to confirm on; pass --yes");
        return Ok(false);
    }

    let mut out = io::stdout().lock();
    write!(out, "{prompt} [y/N] ")?;
    out.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};

    use super::*;
    use crate::task::{Priority, Status, TaskType};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, 15, 0, 0)
            .single()
            .expect("valid now")
    }

    fn task_with_id(id: &str) -> Task {
        Task {
            id: Uuid::parse_str(id).expect("valid uuid"),
            user_id: "u-1".to_string(),
            title: "t".to_string(),
            note: None,
            project: None,
            kind: TaskType::Normal,
            status: Status::Todo,
            priority: Priority::Low,
            estimate_blocks: 0,
            progress: 0,
            target_date: None,
            scheduled_date: None,
            due_at: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn resolves_unique_id_prefixes() {
        let tasks = vec![
            task_with_id("a1b2c3d4-0000-4000-8000-000000000001"),
            task_with_id("a1b2ffff-0000-4000-8000-000000000002"),
        ];
        assert_eq!(
            resolve_task_id(&tasks, "a1b2c").expect("unique"),
            tasks[0].id
        );
        assert!(resolve_task_id(&tasks, "a1b2").is_err());
        assert!(resolve_task_id(&tasks, "ffff").is_err());
        assert_eq!(
            resolve_task_id(&tasks, "a1b2ffff-0000-4000-8000-000000000002").expect("full"),
            tasks[1].id
        );
    }

    #[test]
    fn delete_prompt_skips_unknown_tasks() {
        let mut known = task_with_id("a1b2c3d4-0000-4000-8000-000000000001");
        known.title = "Pay rent".to_string();
        let tasks = vec![known];
        let missing = Uuid::parse_str("ffffffff-0000-4000-8000-000000000009").expect("uuid");

        assert_eq!(
            delete_prompt(&tasks, tasks[0].id).as_deref(),
            Some("Delete \"Pay rent\"?")
        );
        assert_eq!(delete_prompt(&tasks, missing), None);
        assert_eq!(resolve_task_id(&tasks, &missing.to_string()).expect("full id"), missing);
    }

    #[test]
    fn edit_fields_clear_with_none() {
        let fields = FieldArgs {
            project: Some("none".to_string()),
            note: Some("call back".to_string()),
            scheduled: Some("".to_string()),
            target: Some("2025-03-20".to_string()),
            priority: Some("high".to_string()),
            ..FieldArgs::default()
        };
        let patch = build_patch(None, &fields, now()).expect("patch");
        assert_eq!(patch.project, Some(None));
        assert_eq!(patch.note, Some(Some("call back".to_string())));
        assert_eq!(patch.scheduled_date, Some(None));
        assert_eq!(patch.target_date, Some(NaiveDate::from_ymd_opt(2025, 3, 20)));
        assert_eq!(patch.priority, Some(Priority::High));
        assert_eq!(patch.due_at, None);
    }

    #[test]
    fn add_fields_parse_user_dates() {
        let fields = FieldArgs {
            kind: Some("quick".to_string()),
            scheduled: Some("tomorrow".to_string()),
            ..FieldArgs::default()
        };
        let payload = build_payload("Call mom".to_string(), &fields, now()).expect("payload");
        assert_eq!(payload.kind, Some(TaskType::Quick));
        assert_eq!(payload.scheduled_date, NaiveDate::from_ymd_opt(2025, 3, 13));
        assert!(build_payload(
            "x".to_string(),
            &FieldArgs {
                status: Some("paused".to_string()),
                ..FieldArgs::default()
            },
            now()
        )
        .is_err());
    }

    #[test]
    fn drop_targets_accept_none_and_dates() {
        assert_eq!(
            parse_drop_target("none", now()).expect("none"),
            DropTarget::Unscheduled
        );
        assert_eq!(
            parse_drop_target("2025-03-14", now()).expect("date"),
            DropTarget::Day(NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date"))
        );
    }
}
