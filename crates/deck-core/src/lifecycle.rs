//! Claim and lifecycle transitions for tasks, plus the epic closure gate.
//!
//! Claims are advisory: `assignee`/`claimed_at`/`claim_note` mark who is
//! working on a task and survive merges as small JSON diffs. There is no
//! lock; `--force` exists precisely because another actor may need to take
//! over abandoned work.

use crate::entity::{self, StoreError};
use crate::ids::{EpicId, TaskId};
use crate::specdoc::{self, SpecDocError, DONE_SUMMARY_HEADING, EVIDENCE_HEADING};
use crate::storage::{self, LoadError, WriteError};
use crate::types::{now_iso, Epic, EpicStatus, Evidence, Task, TaskStatus};
use crate::workspace::Workspace;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot start task {id}: status is 'done'")]
    StartDone { id: TaskId },
    #[error("cannot start task {id}: status is 'blocked'. Use --force to override.")]
    StartBlocked { id: TaskId },
    #[error("cannot start task {id}: status is '{status}', expected 'todo'. Use --force to override.")]
    StartWrongStatus { id: TaskId, status: &'static str },
    #[error("cannot start task {id}: dependency {dep} is '{status}', not 'done'. Complete dependencies first or use --force to override.")]
    DependencyNotDone {
        id: TaskId,
        dep: TaskId,
        status: &'static str,
    },
    #[error("cannot {op} task {id}: claimed by '{owner}'. Use --force to override.")]
    ClaimConflict {
        id: TaskId,
        owner: String,
        op: &'static str,
    },
    #[error("cannot complete task {id}: status is '{status}', expected 'in_progress'. Use --force to override.")]
    DoneWrongStatus { id: TaskId, status: &'static str },
    #[error("cannot block task {id}: status is 'done'")]
    BlockDone { id: TaskId },
    #[error("block reason is empty")]
    EmptyReason,
    #[error("cannot close epic: incomplete tasks - {}", .tasks.join(", "))]
    IncompleteTasks { epic: EpicId, tasks: Vec<String> },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Spec(#[from] SpecDocError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Start (or resume) a task as `actor`.
///
/// Guards, all bypassed by `force`: every dependency `done`, task not
/// claimed by someone else, status `todo` (or own `in_progress` resume).
/// A `done` task can never be started. The first successful claim stamps
/// `assignee`/`claimed_at`; a forced takeover re-stamps them and, when no
/// explicit note is given, records who the task was taken from.
pub fn start(
    ws: &Workspace,
    id: TaskId,
    actor: &str,
    force: bool,
    note: Option<&str>,
) -> Result<Task, LifecycleError> {
    let mut task = entity::load_task(ws, id)?;

    if task.status == TaskStatus::Done {
        return Err(LifecycleError::StartDone { id });
    }
    if task.status == TaskStatus::Blocked && !force {
        return Err(LifecycleError::StartBlocked { id });
    }

    let prior = task.assignee.clone();
    let taken_over = prior.as_deref().is_some_and(|owner| owner != actor);

    if !force {
        if let Some(owner) = prior.as_deref() {
            if owner != actor {
                return Err(LifecycleError::ClaimConflict {
                    id,
                    owner: owner.to_string(),
                    op: "start",
                });
            }
        }
        let resuming = task.status == TaskStatus::InProgress && task.claimed_by(actor);
        if task.status != TaskStatus::Todo && !resuming {
            return Err(LifecycleError::StartWrongStatus {
                id,
                status: task.status.as_str(),
            });
        }
        for dep in &task.depends_on {
            let dep_task = entity::load_task(ws, *dep)?;
            if dep_task.status != TaskStatus::Done {
                return Err(LifecycleError::DependencyNotDone {
                    id,
                    dep: *dep,
                    status: dep_task.status.as_str(),
                });
            }
        }
    }

    let now = now_iso();
    task.status = TaskStatus::InProgress;
    if force && taken_over {
        task.assignee = Some(actor.to_string());
        task.claimed_at = Some(now.clone());
        task.claim_note = note.map_or_else(
            || format!("Taken over from {}", prior.as_deref().unwrap_or("unknown")),
            str::to_string,
        );
    } else {
        if task.assignee.is_none() {
            task.assignee = Some(actor.to_string());
            task.claimed_at = Some(now.clone());
        }
        if let Some(note) = note {
            task.claim_note = note.to_string();
        }
    }
    task.updated_at = now;

    entity::save_task(ws, &task)?;
    Ok(task)
}

/// Complete a task: patch the summary and evidence into the spec, then
/// flip the JSON to `done` with the evidence object attached.
///
/// The spec is written first so a `done` status is never observable
/// without its evidence.
pub fn complete(
    ws: &Workspace,
    id: TaskId,
    actor: &str,
    summary: &str,
    evidence: Evidence,
    force: bool,
) -> Result<Task, LifecycleError> {
    let mut task = entity::load_task(ws, id)?;

    if !force && task.status != TaskStatus::InProgress {
        return Err(LifecycleError::DoneWrongStatus {
            id,
            status: task.status.as_str(),
        });
    }
    if !force {
        if let Some(owner) = task.assignee.as_deref() {
            if owner != actor {
                return Err(LifecycleError::ClaimConflict {
                    id,
                    owner: owner.to_string(),
                    op: "complete",
                });
            }
        }
    }

    let spec = storage::read_text(&ws.task_spec_path(id))?;
    let patched = specdoc::patch_section(&spec, DONE_SUMMARY_HEADING, summary)?;
    let patched = specdoc::patch_section(&patched, EVIDENCE_HEADING, &evidence.to_markdown())?;

    storage::write_atomic(&ws.task_spec_path(id), &patched)?;

    task.status = TaskStatus::Done;
    task.evidence = Some(evidence);
    task.updated_at = now_iso();
    entity::save_task(ws, &task)?;
    Ok(task)
}

/// Block a task with a reason. The reason is appended to the Done-summary
/// body (replacing a `TBD` placeholder), so the history of blockages is
/// preserved across retries.
pub fn block(ws: &Workspace, id: TaskId, reason: &str) -> Result<Task, LifecycleError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LifecycleError::EmptyReason);
    }

    let mut task = entity::load_task(ws, id)?;
    if task.status == TaskStatus::Done {
        return Err(LifecycleError::BlockDone { id });
    }

    let spec = storage::read_text(&ws.task_spec_path(id))?;
    let summary = specdoc::section(&spec, DONE_SUMMARY_HEADING).unwrap_or_default();
    let new_summary = if summary.is_empty() || summary.eq_ignore_ascii_case("tbd") {
        format!("Blocked:\n{reason}")
    } else {
        format!("{summary}\n\nBlocked:\n{reason}")
    };
    let patched = specdoc::patch_section(&spec, DONE_SUMMARY_HEADING, &new_summary)?;

    storage::write_atomic(&ws.task_spec_path(id), &patched)?;

    task.status = TaskStatus::Blocked;
    task.updated_at = now_iso();
    entity::save_task(ws, &task)?;
    Ok(task)
}

/// Close an epic. Refuses while any task under it is not `done`, listing
/// every offender with its status. Closing an already-closed epic
/// succeeds (the operation is idempotent).
pub fn close_epic(ws: &Workspace, id: EpicId) -> Result<Epic, LifecycleError> {
    let mut epic = entity::load_epic(ws, id)?;

    let incomplete: Vec<String> = entity::epic_tasks(ws, id)?
        .values()
        .filter(|t| t.status != TaskStatus::Done)
        .map(|t| format!("{} ({})", t.id, t.status.as_str()))
        .collect();
    if !incomplete.is_empty() {
        return Err(LifecycleError::IncompleteTasks {
            epic: id,
            tasks: incomplete,
        });
    }

    epic.status = EpicStatus::Done;
    epic.updated_at = now_iso();
    entity::save_epic(ws, &epic)?;
    Ok(epic)
}
