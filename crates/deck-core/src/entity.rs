//! Entity store: CRUD for epics and tasks.
//!
//! Writes follow "read, mutate, persist atomically"; reads never mutate.
//! Task mutations do not touch the parent epic JSON, so task activity on
//! parallel branches cannot contend on a shared epic record.

use crate::ids::{self, EpicId, IdError, TaskId};
use crate::specdoc::{self, SpecDocError};
use crate::storage::{self, LoadError, WriteError};
use crate::types::{now_iso, Epic, EpicStatus, PlanReviewStatus, Task, TaskStatus};
use crate::workspace::Workspace;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("epic {0} not found")]
    EpicNotFound(EpicId),
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    #[error("refusing to overwrite existing files for {id}: {} already present", .path.display())]
    IdCollision { id: String, path: PathBuf },
    #[error("dependency {dep} must be within the same epic ({epic})")]
    CrossEpicDependency { dep: TaskId, epic: EpicId },
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Spec(#[from] SpecDocError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Load an epic record, mapping a missing file to `EpicNotFound`.
pub fn load_epic(ws: &Workspace, id: EpicId) -> Result<Epic, StoreError> {
    storage::read_json(&ws.epic_json_path(id)).map_err(|e| {
        if e.is_missing() {
            StoreError::EpicNotFound(id)
        } else {
            e.into()
        }
    })
}

/// Load a task record, mapping a missing file to `TaskNotFound`.
pub fn load_task(ws: &Workspace, id: TaskId) -> Result<Task, StoreError> {
    storage::read_json(&ws.task_json_path(id)).map_err(|e| {
        if e.is_missing() {
            StoreError::TaskNotFound(id)
        } else {
            e.into()
        }
    })
}

pub(crate) fn save_epic(ws: &Workspace, epic: &Epic) -> Result<(), StoreError> {
    storage::write_json_atomic(&ws.epic_json_path(epic.id), epic)?;
    Ok(())
}

pub(crate) fn save_task(ws: &Workspace, task: &Task) -> Result<(), StoreError> {
    storage::write_json_atomic(&ws.task_json_path(task.id), task)?;
    Ok(())
}

/// Create a new epic with a scan-allocated id and a plan stub.
pub fn create_epic(ws: &Workspace, title: &str, branch: Option<&str>) -> Result<Epic, StoreError> {
    let number = ids::next_epic_number(&ws.epics_dir())?;
    let id = EpicId::new(number);

    // A collision after scanning means orphaned files; report, never
    // overwrite.
    for path in [ws.epic_json_path(id), ws.epic_spec_path(id)] {
        if path.exists() {
            return Err(StoreError::IdCollision {
                id: id.to_string(),
                path,
            });
        }
    }

    let now = now_iso();
    let epic = Epic {
        id,
        title: title.to_string(),
        status: EpicStatus::Open,
        plan_review_status: PlanReviewStatus::Unknown,
        plan_reviewed_at: None,
        branch_name: Some(branch.map_or_else(|| id.to_string(), str::to_string)),
        depends_on_epics: Vec::new(),
        spec_path: ws.epic_spec_rel(id),
        next_task: Some(1),
        created_at: now.clone(),
        updated_at: now,
    };

    save_epic(ws, &epic)?;
    storage::write_atomic(
        &ws.epic_spec_path(id),
        &specdoc::epic_plan_template(id, title),
    )?;
    Ok(epic)
}

/// Create a new task under an epic, with optional dependencies, priority,
/// and initial acceptance text.
pub fn create_task(
    ws: &Workspace,
    epic: EpicId,
    title: &str,
    deps: &[TaskId],
    priority: Option<i64>,
    acceptance: Option<&str>,
) -> Result<Task, StoreError> {
    load_epic(ws, epic)?;

    for dep in deps {
        if dep.epic() != epic {
            return Err(StoreError::CrossEpicDependency { dep: *dep, epic });
        }
    }

    let number = ids::next_task_number(&ws.tasks_dir(), epic)?;
    let id = TaskId::new(epic, number);

    for path in [ws.task_json_path(id), ws.task_spec_path(id)] {
        if path.exists() {
            return Err(StoreError::IdCollision {
                id: id.to_string(),
                path,
            });
        }
    }

    let now = now_iso();
    let task = Task {
        id,
        epic,
        title: title.to_string(),
        status: TaskStatus::Todo,
        priority,
        depends_on: deps.to_vec(),
        assignee: None,
        claimed_at: None,
        claim_note: String::new(),
        spec_path: ws.task_spec_rel(id),
        evidence: None,
        created_at: now.clone(),
        updated_at: now,
    };

    save_task(ws, &task)?;
    storage::write_atomic(
        &ws.task_spec_path(id),
        &specdoc::task_spec_template(id, title, acceptance),
    )?;
    Ok(task)
}

/// Append a dependency to a task. Re-adding an existing dependency is a
/// no-op that does not bump `updated_at`.
pub fn add_dependency(ws: &Workspace, task_id: TaskId, dep: TaskId) -> Result<Task, StoreError> {
    if dep.epic() != task_id.epic() {
        return Err(StoreError::CrossEpicDependency {
            dep,
            epic: task_id.epic(),
        });
    }

    let mut task = load_task(ws, task_id)?;
    if !task.depends_on.contains(&dep) {
        task.depends_on.push(dep);
        task.updated_at = now_iso();
        save_task(ws, &task)?;
    }
    Ok(task)
}

/// Overwrite an epic's plan document and bump its `updated_at`.
pub fn set_epic_plan(ws: &Workspace, id: EpicId, content: &str) -> Result<Epic, StoreError> {
    let mut epic = load_epic(ws, id)?;
    storage::write_atomic(&ws.epic_spec_path(id), content)?;
    epic.updated_at = now_iso();
    save_epic(ws, &epic)?;
    Ok(epic)
}

pub fn set_plan_review_status(
    ws: &Workspace,
    id: EpicId,
    status: PlanReviewStatus,
) -> Result<Epic, StoreError> {
    let mut epic = load_epic(ws, id)?;
    let now = now_iso();
    epic.plan_review_status = status;
    epic.plan_reviewed_at = Some(now.clone());
    epic.updated_at = now;
    save_epic(ws, &epic)?;
    Ok(epic)
}

pub fn set_epic_branch(ws: &Workspace, id: EpicId, branch: &str) -> Result<Epic, StoreError> {
    let mut epic = load_epic(ws, id)?;
    epic.branch_name = Some(branch.to_string());
    epic.updated_at = now_iso();
    save_epic(ws, &epic)?;
    Ok(epic)
}

/// Patch one section of a task's spec and bump the task's `updated_at`.
/// The spec is written first; the JSON bump follows.
pub fn set_task_section(
    ws: &Workspace,
    id: TaskId,
    heading: &str,
    content: &str,
) -> Result<Task, StoreError> {
    let mut task = load_task(ws, id)?;
    let spec = storage::read_text(&ws.task_spec_path(id))?;
    let patched = specdoc::patch_section(&spec, heading, content)?;

    storage::write_atomic(&ws.task_spec_path(id), &patched)?;
    task.updated_at = now_iso();
    save_task(ws, &task)?;
    Ok(task)
}

/// All epic ids present in the store, in numeric order.
pub fn list_epic_ids(ws: &Workspace) -> Result<Vec<EpicId>, StoreError> {
    let mut ids = Vec::new();
    let dir = ws.epics_dir();
    if dir.exists() {
        for entry in std::fs::read_dir(&dir)? {
            let name = entry?.file_name();
            if let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                if let Ok(id) = stem.parse::<EpicId>() {
                    ids.push(id);
                }
            }
        }
    }
    ids.sort();
    Ok(ids)
}

/// All epics, in numeric order.
pub fn list_epics(ws: &Workspace) -> Result<Vec<Epic>, StoreError> {
    list_epic_ids(ws)?
        .into_iter()
        .map(|id| load_epic(ws, id))
        .collect()
}

/// All tasks belonging to an epic, keyed by id (so iteration is in task
/// order). JSON files in the tasks directory that are not task records
/// are skipped rather than treated as corruption.
pub fn epic_tasks(ws: &Workspace, epic: EpicId) -> Result<BTreeMap<TaskId, Task>, StoreError> {
    let mut tasks = BTreeMap::new();
    let dir = ws.tasks_dir();
    if !dir.exists() {
        return Ok(tasks);
    }
    for entry in std::fs::read_dir(&dir)? {
        let name = entry?.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
            continue;
        };
        let Ok(id) = stem.parse::<TaskId>() else {
            continue;
        };
        if id.epic() != epic {
            continue;
        }
        if let Some(task) = read_task_record(ws, id)? {
            tasks.insert(id, task);
        }
    }
    Ok(tasks)
}

/// All tasks, optionally filtered by epic and status, ordered by
/// (epic number, task number).
pub fn list_tasks(
    ws: &Workspace,
    epic: Option<EpicId>,
    status: Option<TaskStatus>,
) -> Result<Vec<Task>, StoreError> {
    let mut ids = Vec::new();
    let dir = ws.tasks_dir();
    if dir.exists() {
        for entry in std::fs::read_dir(&dir)? {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            let Ok(id) = stem.parse::<TaskId>() else {
                continue;
            };
            if epic.is_some_and(|e| id.epic() != e) {
                continue;
            }
            ids.push(id);
        }
    }
    ids.sort();

    let mut tasks = Vec::new();
    for id in ids {
        if let Some(task) = read_task_record(ws, id)? {
            if status.is_none_or(|s| task.status == s) {
                tasks.push(task);
            }
        }
    }
    Ok(tasks)
}

/// Read a task file, returning `None` for JSON that is not a task record
/// (no `id` field).
fn read_task_record(ws: &Workspace, id: TaskId) -> Result<Option<Task>, StoreError> {
    let path = ws.task_json_path(id);
    let value: serde_json::Value = storage::read_json(&path)?;
    if value.get("id").is_none() {
        return Ok(None);
    }
    let task: Task = serde_json::from_value(value).map_err(|source| LoadError::InvalidJson {
        path,
        source,
    })?;
    Ok(Some(task))
}

/// Per-epic task progress, for listings.
pub fn task_progress(ws: &Workspace, epic: EpicId) -> Result<(usize, usize), StoreError> {
    let tasks = epic_tasks(ws, epic)?;
    let done = tasks
        .values()
        .filter(|t| t.status == TaskStatus::Done)
        .count();
    Ok((tasks.len(), done))
}
