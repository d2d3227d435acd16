//! Structural validation for the store.
//!
//! Validation never mutates and never aborts on the first problem: each
//! check contributes human-readable diagnostics and the caller decides
//! the exit code.

use crate::entity::{self, StoreError};
use crate::ids::{EpicId, TaskId};
use crate::specdoc;
use crate::storage;
use crate::types::{EpicStatus, Task, TaskStatus};
use crate::workspace::{
    self, Workspace, EPICS_DIR, MEMORY_DIR, META_FILE, SPECS_DIR, TASKS_DIR,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Validation result for a single epic.
#[derive(Debug, Clone, Serialize)]
pub struct EpicReport {
    pub epic: EpicId,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub task_count: usize,
}

/// Validation result for the whole store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreReport {
    pub valid: bool,
    pub root_errors: Vec<String>,
    pub epics: Vec<EpicReport>,
    pub total_epics: usize,
    pub total_tasks: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
}

/// Root invariants: metadata present with a supported schema, required
/// subdirectories in place.
pub fn validate_root(ws: &Workspace) -> Vec<String> {
    let mut errors = Vec::new();

    match storage::read_json::<workspace::Meta>(&ws.meta_path()) {
        Ok(meta) => {
            if !workspace::is_supported_schema(meta.schema_version) {
                errors.push(format!(
                    "schema_version unsupported in {META_FILE} (expected 1 or 2, got {})",
                    meta.schema_version
                ));
            }
        }
        Err(e) => errors.push(format!("{META_FILE} {e}")),
    }

    for subdir in [EPICS_DIR, SPECS_DIR, TASKS_DIR, MEMORY_DIR] {
        if !ws.dir().join(subdir).exists() {
            errors.push(format!("Required directory missing: {subdir}/"));
        }
    }

    errors
}

/// Validate one epic and everything under it.
pub fn validate_epic(ws: &Workspace, epic_id: EpicId) -> EpicReport {
    let mut errors = Vec::new();
    let warnings = Vec::new();

    let epic = match entity::load_epic(ws, epic_id) {
        Ok(epic) => Some(epic),
        Err(StoreError::EpicNotFound(_)) => {
            errors.push(format!("Epic {epic_id} not found"));
            None
        }
        Err(e) => {
            errors.push(format!("Epic {epic_id}: {e}"));
            None
        }
    };

    let Some(epic) = epic else {
        return EpicReport {
            epic: epic_id,
            valid: false,
            errors,
            warnings,
            task_count: 0,
        };
    };

    if !ws.epic_spec_path(epic_id).exists() {
        errors.push(format!(
            "Epic spec missing: {}",
            ws.epic_spec_path(epic_id).display()
        ));
    }

    for dep in &epic.depends_on_epics {
        if *dep == epic_id {
            errors.push(format!("Epic {epic_id}: depends_on_epics cannot include itself"));
        } else if !ws.epic_json_path(*dep).exists() {
            errors.push(format!("Epic {epic_id}: depends_on_epics missing epic {dep}"));
        }
    }

    let tasks = match entity::epic_tasks(ws, epic_id) {
        Ok(tasks) => tasks,
        Err(e) => {
            errors.push(format!("Epic {epic_id}: {e}"));
            BTreeMap::new()
        }
    };

    for (task_id, task) in &tasks {
        let spec_path = ws.task_spec_path(*task_id);
        match storage::read_text(&spec_path) {
            Ok(content) => {
                for heading_error in specdoc::heading_errors(&content) {
                    errors.push(format!("Task {task_id}: {heading_error}"));
                }
            }
            Err(e) if e.is_missing() => {
                errors.push(format!("Task spec missing: {}", spec_path.display()));
            }
            Err(e) => errors.push(format!("Task {task_id}: spec {e}")),
        }

        for dep in &task.depends_on {
            if !tasks.contains_key(dep) {
                errors.push(format!("Task {task_id}: dependency {dep} not found"));
            }
            if dep.epic() != epic_id {
                errors.push(format!(
                    "Task {task_id}: dependency {dep} is outside epic {epic_id}"
                ));
            }
        }
    }

    if let Some(cycle) = find_cycle(&tasks) {
        let chain: Vec<String> = cycle.iter().map(ToString::to_string).collect();
        errors.push(format!("Dependency cycle detected: {}", chain.join(" -> ")));
    }

    if epic.status == EpicStatus::Done {
        for (task_id, task) in &tasks {
            if task.status != TaskStatus::Done {
                errors.push(format!(
                    "Epic marked done but task {task_id} is {}",
                    task.status.as_str()
                ));
            }
        }
    }

    EpicReport {
        epic: epic_id,
        valid: errors.is_empty(),
        errors,
        warnings,
        task_count: tasks.len(),
    }
}

/// Validate the root and every epic in the store.
pub fn validate_all(ws: &Workspace) -> Result<StoreReport, StoreError> {
    let root_errors = validate_root(ws);
    let epic_ids = entity::list_epic_ids(ws)?;

    let mut epics = Vec::new();
    let mut total_tasks = 0;
    let mut total_errors = root_errors.len();
    let mut total_warnings = 0;

    for epic_id in &epic_ids {
        let report = validate_epic(ws, *epic_id);
        total_tasks += report.task_count;
        total_errors += report.errors.len();
        total_warnings += report.warnings.len();
        epics.push(report);
    }

    Ok(StoreReport {
        valid: total_errors == 0,
        root_errors,
        total_epics: epic_ids.len(),
        total_tasks,
        total_errors,
        total_warnings,
        epics,
    })
}

/// First dependency cycle among an epic's tasks, as the chain of ids
/// that closes it. Depth-first traversal with a recursion set; edges to
/// tasks outside the map are ignored (reported separately as missing
/// dependencies).
pub fn find_cycle(tasks: &BTreeMap<TaskId, Task>) -> Option<Vec<TaskId>> {
    fn visit(
        id: TaskId,
        tasks: &BTreeMap<TaskId, Task>,
        visited: &mut BTreeSet<TaskId>,
        stack: &mut BTreeSet<TaskId>,
    ) -> Option<Vec<TaskId>> {
        visited.insert(id);
        stack.insert(id);

        if let Some(task) = tasks.get(&id) {
            for dep in &task.depends_on {
                if !visited.contains(dep) {
                    if let Some(mut chain) = visit(*dep, tasks, visited, stack) {
                        chain.insert(0, id);
                        return Some(chain);
                    }
                } else if stack.contains(dep) {
                    return Some(vec![id, *dep]);
                }
            }
        }

        stack.remove(&id);
        None
    }

    let mut visited = BTreeSet::new();
    for id in tasks.keys() {
        if !visited.contains(id) {
            let mut stack = BTreeSet::new();
            if let Some(chain) = visit(*id, tasks, &mut visited, &mut stack) {
                return Some(chain);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{create_epic, create_task, load_epic, load_task, save_epic, save_task};
    use crate::types::now_iso;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::at(dir.path());
        ws.init().unwrap();
        (dir, ws)
    }

    #[test]
    fn clean_store_validates() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        let t1 = create_task(&ws, epic.id, "one", &[], None, None).unwrap();
        create_task(&ws, epic.id, "two", &[t1.id], None, None).unwrap();

        let report = validate_epic(&ws, epic.id);
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
        assert_eq!(report.task_count, 2);

        let store = validate_all(&ws).unwrap();
        assert!(store.valid);
        assert_eq!(store.total_epics, 1);
        assert_eq!(store.total_tasks, 2);
    }

    #[test]
    fn root_validation_flags_missing_pieces() {
        let (_dir, ws) = workspace();
        std::fs::remove_file(ws.meta_path()).unwrap();
        std::fs::remove_dir(ws.specs_dir()).unwrap();

        let errors = validate_root(&ws);
        assert!(errors.iter().any(|e| e.contains("meta.json")));
        assert!(errors.iter().any(|e| e.contains("specs/")));
    }

    #[test]
    fn missing_epic_spec_is_an_error() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        std::fs::remove_file(ws.epic_spec_path(epic.id)).unwrap();

        let report = validate_epic(&ws, epic.id);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("Epic spec missing")));
    }

    #[test]
    fn self_and_missing_epic_deps_are_errors() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        let mut record = load_epic(&ws, epic.id).unwrap();
        record.depends_on_epics = vec![epic.id, "E-9".parse().unwrap()];
        save_epic(&ws, &record).unwrap();

        let report = validate_epic(&ws, epic.id);
        assert!(report.errors.iter().any(|e| e.contains("cannot include itself")));
        assert!(report.errors.iter().any(|e| e.contains("missing epic E-9")));
    }

    #[test]
    fn task_spec_heading_violations_are_reported() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        let task = create_task(&ws, epic.id, "one", &[], None, None).unwrap();
        storage::write_atomic(&ws.task_spec_path(task.id), "# free-form\nno headings\n").unwrap();

        let report = validate_epic(&ws, epic.id);
        assert_eq!(
            report
                .errors
                .iter()
                .filter(|e| e.contains("Missing required heading"))
                .count(),
            4
        );
    }

    #[test]
    fn unresolved_and_foreign_deps_are_reported() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        let task = create_task(&ws, epic.id, "one", &[], None, None).unwrap();
        let mut record = load_task(&ws, task.id).unwrap();
        record.depends_on = vec!["E-1.9".parse().unwrap(), "E-2.1".parse().unwrap()];
        save_task(&ws, &record).unwrap();

        let report = validate_epic(&ws, epic.id);
        assert!(report.errors.iter().any(|e| e.contains("dependency E-1.9 not found")));
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("dependency E-2.1 is outside epic E-1")));
    }

    #[test]
    fn cycle_is_reported_with_its_chain() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        let t1 = create_task(&ws, epic.id, "one", &[], None, None).unwrap();
        let t2 = create_task(&ws, epic.id, "two", &[t1.id], None, None).unwrap();
        let t3 = create_task(&ws, epic.id, "three", &[t2.id], None, None).unwrap();
        // Close the loop: one depends on three.
        let mut record = load_task(&ws, t1.id).unwrap();
        record.depends_on = vec![t3.id];
        save_task(&ws, &record).unwrap();

        let report = validate_epic(&ws, epic.id);
        let cycle_error = report
            .errors
            .iter()
            .find(|e| e.contains("Dependency cycle detected"))
            .expect("cycle not reported");
        for id in ["E-1.1", "E-1.2", "E-1.3"] {
            assert!(cycle_error.contains(id), "{cycle_error} missing {id}");
        }
    }

    #[test]
    fn done_epic_with_open_tasks_is_inconsistent() {
        let (_dir, ws) = workspace();
        let epic = create_epic(&ws, "Auth", None).unwrap();
        create_task(&ws, epic.id, "one", &[], None, None).unwrap();
        let mut record = load_epic(&ws, epic.id).unwrap();
        record.status = EpicStatus::Done;
        save_epic(&ws, &record).unwrap();

        let report = validate_epic(&ws, epic.id);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("Epic marked done but task E-1.1 is todo")));
    }

    fn task_with_deps(id: TaskId, deps: Vec<TaskId>) -> Task {
        Task {
            id,
            epic: id.epic(),
            title: format!("task {id}"),
            status: TaskStatus::Todo,
            priority: None,
            depends_on: deps,
            assignee: None,
            claimed_at: None,
            claim_note: String::new(),
            spec_path: String::new(),
            evidence: None,
            created_at: now_iso(),
            updated_at: now_iso(),
        }
    }

    /// Reference acyclicity check: repeatedly strip tasks whose deps are
    /// all stripped already (Kahn-style). Anything left is on a cycle.
    fn has_cycle_reference(tasks: &BTreeMap<TaskId, Task>) -> bool {
        let mut remaining: BTreeSet<TaskId> = tasks.keys().copied().collect();
        loop {
            let removable: Vec<TaskId> = remaining
                .iter()
                .filter(|id| {
                    tasks[id]
                        .depends_on
                        .iter()
                        .all(|dep| !remaining.contains(dep))
                })
                .copied()
                .collect();
            if removable.is_empty() {
                return !remaining.is_empty();
            }
            for id in removable {
                remaining.remove(&id);
            }
        }
    }

    proptest! {
        // Random graphs of up to 10 tasks: the DFS agrees with the
        // reference check on every instance.
        #[test]
        fn cycle_detection_matches_reference(edges in proptest::collection::vec((0u32..10, 0u32..10), 0..25)) {
            let epic: EpicId = "E-1".parse().unwrap();
            let mut deps: BTreeMap<u32, Vec<TaskId>> = BTreeMap::new();
            for (from, to) in edges {
                deps.entry(from + 1).or_default().push(TaskId::new(epic, to + 1));
            }
            let mut tasks = BTreeMap::new();
            for n in 1..=10u32 {
                let id = TaskId::new(epic, n);
                let mut d = deps.remove(&n).unwrap_or_default();
                d.sort();
                d.dedup();
                tasks.insert(id, task_with_deps(id, d));
            }
            prop_assert_eq!(find_cycle(&tasks).is_some(), has_cycle_reference(&tasks));
        }
    }
}
