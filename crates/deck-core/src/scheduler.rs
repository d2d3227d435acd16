//! Dependency-aware readiness and work selection.
//!
//! Pure with respect to the store: both queries read entity records and
//! never write.

use crate::entity::{self, StoreError};
use crate::ids::{EpicId, TaskId};
use crate::types::{EpicStatus, PlanReviewStatus, Task, TaskStatus};
use crate::workspace::Workspace;
use std::collections::BTreeMap;

/// A task that cannot run yet, with what holds it back: missing or
/// unfinished dependency ids, or the `status=blocked` sentinel.
#[derive(Debug, Clone)]
pub struct BlockedTask {
    pub task: Task,
    pub blocked_by: Vec<String>,
}

/// Partition of an epic's tasks for `ready`.
#[derive(Debug, Clone)]
pub struct ReadyReport {
    pub epic: EpicId,
    pub ready: Vec<Task>,
    pub in_progress: Vec<Task>,
    pub blocked: Vec<BlockedTask>,
}

/// Outcome of `next`: at most one unit of work across an epic ordering.
#[derive(Debug, Clone)]
pub enum NextUnit {
    /// The epic's plan needs review before its tasks are worked.
    Plan { epic: EpicId },
    /// The actor already has an in-progress task here; resume it.
    Resume { epic: EpicId, task: TaskId },
    /// First ready task in the first epic that has one.
    Ready { epic: EpicId, task: TaskId },
    /// Nothing to do; any epics held back by epic-level dependencies are
    /// reported.
    Idle {
        blocked_epics: BTreeMap<EpicId, Vec<EpicId>>,
    },
}

/// Partition an epic's tasks into ready / in-progress / blocked, each
/// sorted by `(priority, task number, title)`.
pub fn ready(ws: &Workspace, epic: EpicId) -> Result<ReadyReport, StoreError> {
    entity::load_epic(ws, epic)?;
    let tasks = entity::epic_tasks(ws, epic)?;

    let mut ready = Vec::new();
    let mut in_progress = Vec::new();
    let mut blocked = Vec::new();

    for task in tasks.values() {
        match task.status {
            TaskStatus::InProgress => in_progress.push(task.clone()),
            TaskStatus::Done => {}
            TaskStatus::Blocked => blocked.push(BlockedTask {
                task: task.clone(),
                blocked_by: vec!["status=blocked".to_string()],
            }),
            TaskStatus::Todo => {
                let blockers = unmet_dependencies(task, &tasks);
                if blockers.is_empty() {
                    ready.push(task.clone());
                } else {
                    blocked.push(BlockedTask {
                        task: task.clone(),
                        blocked_by: blockers,
                    });
                }
            }
        }
    }

    ready.sort_by(|a, b| a.schedule_key().cmp(&b.schedule_key()));
    in_progress.sort_by(|a, b| a.schedule_key().cmp(&b.schedule_key()));
    blocked.sort_by(|a, b| a.task.schedule_key().cmp(&b.task.schedule_key()));

    Ok(ReadyReport {
        epic,
        ready,
        in_progress,
        blocked,
    })
}

/// Dependencies that are missing or not yet `done`.
fn unmet_dependencies(task: &Task, tasks: &BTreeMap<TaskId, Task>) -> Vec<String> {
    task.depends_on
        .iter()
        .filter(|dep| !tasks.get(dep).is_some_and(|t| t.status == TaskStatus::Done))
        .map(ToString::to_string)
        .collect()
}

/// Select at most one unit of work across `order` (explicit caller list)
/// or, when `order` is `None`, all epics in numeric order.
///
/// Per epic, skipping those already `done`: epics with open epic-level
/// dependencies are recorded as blocked and passed over; an un-shipped
/// plan yields a plan unit when review is required; otherwise the actor's
/// own in-progress task wins, then the first ready task.
pub fn next(
    ws: &Workspace,
    order: Option<&[EpicId]>,
    actor: &str,
    require_plan_review: bool,
) -> Result<NextUnit, StoreError> {
    let explicit = order.is_some();
    let epic_ids = match order {
        Some(ids) => ids.to_vec(),
        None => entity::list_epic_ids(ws)?,
    };

    let mut blocked_epics = BTreeMap::new();

    for epic_id in epic_ids {
        let epic = match entity::load_epic(ws, epic_id) {
            Ok(epic) => epic,
            // A discovered listing can race with deletion-free history
            // rewrites; only an explicit ordering treats absence as fatal.
            Err(StoreError::EpicNotFound(_)) if !explicit => continue,
            Err(e) => return Err(e),
        };
        if epic.status == EpicStatus::Done {
            continue;
        }

        let open_deps = open_epic_dependencies(ws, &epic)?;
        if !open_deps.is_empty() {
            blocked_epics.insert(epic_id, open_deps);
            continue;
        }

        if require_plan_review && epic.plan_review_status != PlanReviewStatus::Ship {
            return Ok(NextUnit::Plan { epic: epic_id });
        }

        let tasks = entity::epic_tasks(ws, epic_id)?;

        let mut own_in_progress: Vec<&Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::InProgress && t.claimed_by(actor))
            .collect();
        own_in_progress.sort_by(|a, b| a.schedule_key().cmp(&b.schedule_key()));
        if let Some(task) = own_in_progress.first() {
            return Ok(NextUnit::Resume {
                epic: epic_id,
                task: task.id,
            });
        }

        let mut ready: Vec<&Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Todo && unmet_dependencies(t, &tasks).is_empty())
            .collect();
        ready.sort_by(|a, b| a.schedule_key().cmp(&b.schedule_key()));
        if let Some(task) = ready.first() {
            return Ok(NextUnit::Ready {
                epic: epic_id,
                task: task.id,
            });
        }
    }

    Ok(NextUnit::Idle { blocked_epics })
}

/// Epic-level dependencies that do not resolve to a `done` epic.
/// Self-references are ignored; the validator reports them.
fn open_epic_dependencies(
    ws: &Workspace,
    epic: &crate::types::Epic,
) -> Result<Vec<EpicId>, StoreError> {
    let mut open = Vec::new();
    for dep in &epic.depends_on_epics {
        if *dep == epic.id {
            continue;
        }
        match entity::load_epic(ws, *dep) {
            Ok(dep_epic) => {
                if dep_epic.status != EpicStatus::Done {
                    open.push(*dep);
                }
            }
            Err(StoreError::EpicNotFound(_)) => open.push(*dep),
            Err(e) => return Err(e),
        }
    }
    Ok(open)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{create_epic, create_task, load_epic, save_epic, set_plan_review_status};
    use crate::lifecycle;
    use crate::types::Evidence;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::at(dir.path());
        ws.init().unwrap();
        (dir, ws)
    }

    fn finish(ws: &Workspace, id: TaskId) {
        lifecycle::start(ws, id, "tester", false, None).unwrap();
        lifecycle::complete(ws, id, "tester", "done", Evidence::default(), false).unwrap();
    }

    #[test]
    fn ready_partitions_by_dependency_chain() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        let t1 = create_task(&ws, epic.id, "one", &[], None, None).unwrap();
        let t2 = create_task(&ws, epic.id, "two", &[t1.id], None, None).unwrap();
        let t3 = create_task(&ws, epic.id, "three", &[t2.id], None, None).unwrap();
        finish(&ws, t1.id);

        let report = ready(&ws, epic.id).unwrap();
        let ready_ids: Vec<String> = report.ready.iter().map(|t| t.id.to_string()).collect();
        assert_eq!(ready_ids, vec![t2.id.to_string()]);
        assert!(report.in_progress.is_empty());
        assert_eq!(report.blocked.len(), 1);
        assert_eq!(report.blocked[0].task.id, t3.id);
        assert_eq!(report.blocked[0].blocked_by, vec![t2.id.to_string()]);
    }

    #[test]
    fn ready_reports_missing_dependency_as_blocker() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        let t1 = create_task(&ws, epic.id, "one", &[], None, None).unwrap();
        // Point at a dependency that was never created.
        let mut task = entity::load_task(&ws, t1.id).unwrap();
        task.depends_on = vec!["E-1.9".parse().unwrap()];
        entity::save_task(&ws, &task).unwrap();

        let report = ready(&ws, epic.id).unwrap();
        assert!(report.ready.is_empty());
        assert_eq!(report.blocked[0].blocked_by, vec!["E-1.9".to_string()]);
    }

    #[test]
    fn ready_separates_in_progress_and_status_blocked() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        let t1 = create_task(&ws, epic.id, "one", &[], None, None).unwrap();
        let t2 = create_task(&ws, epic.id, "two", &[], None, None).unwrap();
        lifecycle::start(&ws, t1.id, "alice", false, None).unwrap();
        lifecycle::block(&ws, t2.id, "waiting").unwrap();

        let report = ready(&ws, epic.id).unwrap();
        assert!(report.ready.is_empty());
        assert_eq!(report.in_progress[0].id, t1.id);
        assert_eq!(report.blocked[0].blocked_by, vec!["status=blocked".to_string()]);
    }

    #[test]
    fn ready_sorts_by_priority_then_number() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        create_task(&ws, epic.id, "default", &[], None, None).unwrap();
        create_task(&ws, epic.id, "urgent", &[], Some(1), None).unwrap();
        create_task(&ws, epic.id, "soon", &[], Some(5), None).unwrap();

        let report = ready(&ws, epic.id).unwrap();
        let titles: Vec<&str> = report.ready.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["urgent", "soon", "default"]);
    }

    #[test]
    fn next_resumes_own_work_first() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        let t1 = create_task(&ws, epic.id, "one", &[], None, None).unwrap();
        create_task(&ws, epic.id, "two", &[], None, None).unwrap();
        lifecycle::start(&ws, t1.id, "alice", false, None).unwrap();

        match next(&ws, None, "alice", false).unwrap() {
            NextUnit::Resume { task, .. } => assert_eq!(task, t1.id),
            other => panic!("expected resume, got {other:?}"),
        }

        // A different actor gets the ready task instead.
        match next(&ws, None, "bob", false).unwrap() {
            NextUnit::Ready { task, .. } => assert_eq!(task.to_string(), "E-1.2"),
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn next_requires_plan_review_when_asked() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        create_task(&ws, epic.id, "one", &[], None, None).unwrap();

        match next(&ws, None, "alice", true).unwrap() {
            NextUnit::Plan { epic: e } => assert_eq!(e, epic.id),
            other => panic!("expected plan, got {other:?}"),
        }

        set_plan_review_status(&ws, epic.id, PlanReviewStatus::Ship).unwrap();
        assert!(matches!(
            next(&ws, None, "alice", true).unwrap(),
            NextUnit::Ready { .. }
        ));
    }

    #[test]
    fn next_skips_epics_blocked_by_epic_deps() {
        let (_dir, ws) = workspace();
        let first = create_epic(&ws, "Platform", None).unwrap();
        let second = create_epic(&ws, "Feature", None).unwrap();
        create_task(&ws, first.id, "base", &[], None, None).unwrap();
        create_task(&ws, second.id, "feat", &[], None, None).unwrap();

        let mut blocked = load_epic(&ws, second.id).unwrap();
        blocked.depends_on_epics = vec![first.id];
        save_epic(&ws, &blocked).unwrap();

        // First epic wins; second is viable only once the first closes.
        match next(&ws, None, "alice", false).unwrap() {
            NextUnit::Ready { epic, .. } => assert_eq!(epic, first.id),
            other => panic!("expected ready, got {other:?}"),
        }

        // With only the blocked epic in the ordering, the report names it.
        match next(&ws, Some(&[second.id]), "alice", false).unwrap() {
            NextUnit::Idle { blocked_epics } => {
                assert_eq!(blocked_epics.get(&second.id), Some(&vec![first.id]));
            }
            other => panic!("expected idle, got {other:?}"),
        }
    }

    #[test]
    fn next_follows_caller_ordering() {
        let (_dir, ws) = workspace();
        let e1 = create_epic(&ws, "one", None).unwrap();
        let e2 = create_epic(&ws, "two", None).unwrap();
        create_task(&ws, e1.id, "a", &[], None, None).unwrap();
        create_task(&ws, e2.id, "b", &[], None, None).unwrap();

        match next(&ws, Some(&[e2.id, e1.id]), "alice", false).unwrap() {
            NextUnit::Ready { epic, .. } => assert_eq!(epic, e2.id),
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn next_with_explicit_missing_epic_errors() {
        let (_dir, ws) = workspace();
        let missing: EpicId = "E-7".parse().unwrap();
        assert!(matches!(
            next(&ws, Some(&[missing]), "alice", false),
            Err(StoreError::EpicNotFound(_))
        ));
    }

    #[test]
    fn next_is_idle_when_everything_is_done() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        let t1 = create_task(&ws, epic.id, "one", &[], None, None).unwrap();
        finish(&ws, t1.id);
        lifecycle::close_epic(&ws, epic.id).unwrap();

        match next(&ws, None, "alice", false).unwrap() {
            NextUnit::Idle { blocked_epics } => assert!(blocked_epics.is_empty()),
            other => panic!("expected idle, got {other:?}"),
        }
    }

    #[test]
    fn next_never_mutates_the_store() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        let task = create_task(&ws, epic.id, "one", &[], None, None).unwrap();
        let before = std::fs::read_to_string(ws.task_json_path(task.id)).unwrap();

        next(&ws, None, "alice", false).unwrap();
        ready(&ws, epic.id).unwrap();

        let after = std::fs::read_to_string(ws.task_json_path(task.id)).unwrap();
        assert_eq!(before, after);
    }
}
