//! Human-readable output for deckctl.
//!
//! The structured (`--json`) shapes live next to the command handlers;
//! everything here is terminal text.

use deck_core::scheduler::{NextUnit, ReadyReport};
use deck_core::validate::{EpicReport, StoreReport};
use deck_core::workspace::Detection;
use deck_core::{Epic, Task};

pub fn print_detection(detection: &Detection) {
    if detection.exists && detection.valid {
        if let Some(path) = &detection.path {
            println!(".deck/ exists and is valid at {path}");
        }
    } else if detection.exists {
        if let Some(path) = &detection.path {
            println!(".deck/ exists but has issues at {path}:");
        }
        for issue in &detection.issues {
            println!("  - {issue}");
        }
    } else {
        println!(".deck/ does not exist");
    }
}

/// One epic per line with task progress, e.g. `[open] E-1: Auth (2/3 tasks done)`.
pub fn print_epic_list(epics: &[(Epic, usize, usize)]) {
    if epics.is_empty() {
        println!("No epics found.");
        return;
    }
    println!("Epics ({}):\n", epics.len());
    for (epic, total, done) in epics {
        println!(
            "  [{}] {}: {} ({done}/{total} tasks done)",
            epic.status.as_str(),
            epic.id,
            epic.title
        );
    }
}

fn deps_suffix(task: &Task) -> String {
    if task.depends_on.is_empty() {
        String::new()
    } else {
        let deps: Vec<String> = task.depends_on.iter().map(ToString::to_string).collect();
        format!(" (deps: {})", deps.join(", "))
    }
}

pub fn print_task_list(tasks: &[Task], scope: Option<&str>) {
    if tasks.is_empty() {
        let scope = scope.map_or_else(String::new, |s| format!(" for {s}"));
        println!("No tasks found{scope}.");
        return;
    }
    let scope = scope.map_or_else(String::new, |s| format!(" for {s}"));
    println!("Tasks{scope} ({}):\n", tasks.len());
    for task in tasks {
        println!(
            "  [{}] {}: {}{}",
            task.status.as_str(),
            task.id,
            task.title,
            deps_suffix(task)
        );
    }
}

/// Whole-store overview: every epic with its tasks indented beneath it.
pub fn print_overview(epics: &[(Epic, Vec<Task>)]) {
    if epics.is_empty() {
        println!("No epics or tasks found.");
        return;
    }

    let total_tasks: usize = epics.iter().map(|(_, tasks)| tasks.len()).sum();
    let total_done: usize = epics
        .iter()
        .flat_map(|(_, tasks)| tasks.iter())
        .filter(|t| t.status == deck_core::TaskStatus::Done)
        .count();
    println!(
        "Deck status: {} epics, {total_tasks} tasks ({total_done} done)\n",
        epics.len()
    );

    for (epic, tasks) in epics {
        let done = tasks
            .iter()
            .filter(|t| t.status == deck_core::TaskStatus::Done)
            .count();
        println!(
            "[{}] {}: {} ({done}/{} done)",
            epic.status.as_str(),
            epic.id,
            epic.title,
            tasks.len()
        );
        for task in tasks {
            println!(
                "    [{}] {}: {}{}",
                task.status.as_str(),
                task.id,
                task.title,
                deps_suffix(task)
            );
        }
        println!();
    }
}

pub fn print_show_epic(epic: &Epic, tasks: &[Task]) {
    println!("Epic: {}", epic.id);
    println!("Title: {}", epic.title);
    println!("Status: {}", epic.status.as_str());
    println!("Spec: {}", epic.spec_path);
    println!("\nTasks ({}):", tasks.len());
    for task in tasks {
        println!(
            "  [{}] {}: {}{}",
            task.status.as_str(),
            task.id,
            task.title,
            deps_suffix(task)
        );
    }
}

pub fn print_show_task(task: &Task) {
    println!("Task: {}", task.id);
    println!("Epic: {}", task.epic);
    println!("Title: {}", task.title);
    println!("Status: {}", task.status.as_str());
    let deps: Vec<String> = task.depends_on.iter().map(ToString::to_string).collect();
    println!(
        "Depends on: {}",
        if deps.is_empty() {
            "none".to_string()
        } else {
            deps.join(", ")
        }
    );
    println!("Spec: {}", task.spec_path);
}

pub fn print_ready(report: &ReadyReport, actor: &str) {
    println!("Ready tasks for {} (actor: {actor}):", report.epic);
    if report.ready.is_empty() {
        println!("  (none)");
    } else {
        for task in &report.ready {
            println!("  {}: {}", task.id, task.title);
        }
    }
    if !report.in_progress.is_empty() {
        println!("\nIn progress:");
        for task in &report.in_progress {
            let assignee = task.assignee.as_deref().unwrap_or("unknown");
            let marker = if assignee == actor { " (you)" } else { "" };
            println!("  {}: {} [{assignee}]{marker}", task.id, task.title);
        }
    }
    if !report.blocked.is_empty() {
        println!("\nBlocked:");
        for blocked in &report.blocked {
            println!(
                "  {}: {} (by: {})",
                blocked.task.id,
                blocked.task.title,
                blocked.blocked_by.join(", ")
            );
        }
    }
}

pub fn print_next(unit: &NextUnit) {
    match unit {
        NextUnit::Plan { epic } => println!("plan {epic} needs_plan_review"),
        NextUnit::Resume { task, .. } => println!("work {task} resume_in_progress"),
        NextUnit::Ready { task, .. } => println!("work {task} ready_task"),
        NextUnit::Idle { blocked_epics } => {
            if blocked_epics.is_empty() {
                println!("none");
            } else {
                println!("none blocked_by_epic_deps");
                for (epic, deps) in blocked_epics {
                    let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
                    println!("  {epic}: {}", deps.join(", "));
                }
            }
        }
    }
}

pub fn print_epic_validation(report: &EpicReport) {
    println!("Validation for {}:", report.epic);
    println!("  Tasks: {}", report.task_count);
    println!("  Valid: {}", report.valid);
    print_diagnostics(&report.errors, &report.warnings);
}

pub fn print_store_validation(report: &StoreReport) {
    println!("Validation for all epics:");
    println!("  Epics: {}", report.total_epics);
    println!("  Tasks: {}", report.total_tasks);
    println!("  Valid: {}", report.valid);
    let errors: Vec<String> = report
        .root_errors
        .iter()
        .cloned()
        .chain(report.epics.iter().flat_map(|e| e.errors.iter().cloned()))
        .collect();
    let warnings: Vec<String> = report
        .epics
        .iter()
        .flat_map(|e| e.warnings.iter().cloned())
        .collect();
    print_diagnostics(&errors, &warnings);
}

fn print_diagnostics(errors: &[String], warnings: &[String]) {
    if !errors.is_empty() {
        println!("  Errors:");
        for error in errors {
            println!("    - {error}");
        }
    }
    if !warnings.is_empty() {
        println!("  Warnings:");
        for warning in warnings {
            println!("    - {warning}");
        }
    }
}
