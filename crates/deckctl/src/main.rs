//! deckctl - CLI controller for the `.deck/` task store.
//!
//! All epic/task state lives in JSON files under `.deck/`; Markdown specs
//! hold the narrative. Agents drive every mutation through this binary,
//! never by editing the store directly. Each command opens the workspace,
//! validates, writes atomically, and exits.

mod render;

use clap::{Parser, Subcommand};
use deck_core::types::{Evidence, PlanReviewStatus, TaskStatus};
use deck_core::workspace::InitOutcome;
use deck_core::{
    actor, config, entity, lifecycle, review, scheduler, storage, validate, EpicId, Ident,
    LifecycleError, NextUnit, ReviewError, StoreError, Task, TaskId, Workspace, WorkspaceError,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Controller for the `.deck/` epic and task store.
#[derive(Parser)]
#[command(name = "deckctl")]
#[command(about = "CLI for the .deck/ task tracking store")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the .deck/ directory
    Init,

    /// Check whether .deck/ exists and is valid
    Detect,

    /// Config commands
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Epic commands
    Epic {
        #[command(subcommand)]
        command: EpicCommand,
    },

    /// Task commands
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Dependency commands
    Dep {
        #[command(subcommand)]
        command: DepCommand,
    },

    /// Show epic or task details
    Show {
        /// Epic ID (E-N) or task ID (E-N.M)
        id: String,
    },

    /// List all epics
    Epics,

    /// List tasks
    Tasks {
        /// Filter to one epic
        #[arg(long)]
        epic: Option<String>,

        /// Filter by status (todo, in_progress, blocked, done)
        #[arg(long, value_parser = parse_task_status)]
        status: Option<TaskStatus>,
    },

    /// List all epics and their tasks
    List,

    /// Print the markdown spec for an epic or task
    Cat {
        /// Epic ID (E-N) or task ID (E-N.M)
        id: String,
    },

    /// Partition an epic's tasks into ready/in-progress/blocked
    Ready {
        /// Epic ID (E-N)
        #[arg(long)]
        epic: String,
    },

    /// Select the next plan or work unit across epics
    Next {
        /// JSON file with an explicit epic ordering: {"epics": ["E-2", …]}
        #[arg(long)]
        epics_file: Option<PathBuf>,

        /// Surface plan work for epics whose plan is not shipped
        #[arg(long)]
        require_plan_review: bool,
    },

    /// Validate store structure
    Validate {
        /// Epic ID (E-N)
        #[arg(long)]
        epic: Option<String>,

        /// Validate every epic plus root invariants
        #[arg(long)]
        all: bool,
    },

    /// External review agent commands
    Review {
        #[command(subcommand)]
        command: ReviewCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Get a config value
    Get {
        /// Config key (e.g., memory.enabled)
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key (e.g., memory.enabled)
        key: String,
        /// Config value
        value: String,
    },
}

#[derive(Subcommand)]
enum EpicCommand {
    /// Create a new epic
    Create {
        /// Epic title
        #[arg(long)]
        title: String,

        /// Branch name to store on the epic (defaults to the epic id)
        #[arg(long)]
        branch: Option<String>,
    },

    /// Overwrite an epic's plan from a file
    SetPlan {
        /// Epic ID (E-N)
        id: String,

        /// Markdown file
        #[arg(long)]
        file: PathBuf,
    },

    /// Set the plan review status
    SetPlanReviewStatus {
        /// Epic ID (E-N)
        id: String,

        /// Review status: ship, needs_work, or unknown
        #[arg(long, value_parser = parse_plan_review_status)]
        status: PlanReviewStatus,
    },

    /// Set the epic branch name
    SetBranch {
        /// Epic ID (E-N)
        id: String,

        /// Branch name
        #[arg(long)]
        branch: String,
    },

    /// Close an epic (all tasks must be done)
    Close {
        /// Epic ID (E-N)
        id: String,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Create a new task under an epic
    Create {
        /// Parent epic ID (E-N)
        #[arg(long)]
        epic: String,

        /// Task title
        #[arg(long)]
        title: String,

        /// Comma-separated dependency task IDs within the same epic
        #[arg(long)]
        deps: Option<String>,

        /// File with initial acceptance criteria
        #[arg(long)]
        acceptance_file: Option<PathBuf>,

        /// Priority (lower runs earlier; unset sorts last)
        #[arg(long)]
        priority: Option<i64>,
    },

    /// Replace the Description section of a task spec
    SetDescription {
        /// Task ID (E-N.M)
        id: String,

        /// Markdown file
        #[arg(long)]
        file: PathBuf,
    },

    /// Replace the Acceptance section of a task spec
    SetAcceptance {
        /// Task ID (E-N.M)
        id: String,

        /// Markdown file
        #[arg(long)]
        file: PathBuf,
    },

    /// Start (or resume) a task
    Start {
        /// Task ID (E-N.M)
        id: String,

        /// Bypass dependency, status, and claim guards
        #[arg(long)]
        force: bool,

        /// Claim note recorded on the task
        #[arg(long)]
        note: Option<String>,
    },

    /// Complete a task with a summary and structured evidence
    Done {
        /// Task ID (E-N.M)
        id: String,

        /// File with the done summary
        #[arg(long)]
        summary_file: PathBuf,

        /// JSON file with {commits, tests, prs}
        #[arg(long)]
        evidence_json: PathBuf,

        /// Bypass claimant and status guards
        #[arg(long)]
        force: bool,
    },

    /// Block a task with a reason
    Block {
        /// Task ID (E-N.M)
        id: String,

        /// File with the block reason
        #[arg(long)]
        reason_file: PathBuf,
    },
}

#[derive(Subcommand)]
enum DepCommand {
    /// Add a dependency to a task
    Add {
        /// Task ID (E-N.M)
        task: String,

        /// Task it depends on (same epic)
        depends_on: String,
    },
}

#[derive(Subcommand)]
enum ReviewCommand {
    /// Check whether the review agent is available
    Check,

    /// Run an implementation review
    Impl {
        /// Task ID (E-N.M); omit to review the whole branch
        #[arg(long)]
        task: Option<String>,

        /// Base branch to diff against
        #[arg(long, default_value = "main")]
        base: String,

        /// Focus areas for the reviewer
        #[arg(long)]
        focus: Option<String>,

        /// File with context hints for the reviewer
        #[arg(long)]
        context_file: Option<PathBuf>,

        /// Receipt file to write (and resume a prior session from)
        #[arg(long)]
        receipt: Option<PathBuf>,
    },

    /// Run a plan review for an epic
    Plan {
        /// Epic ID (E-N)
        #[arg(long)]
        epic: String,

        /// File with context hints for the reviewer
        #[arg(long)]
        context_file: Option<PathBuf>,

        /// Receipt file to write (and resume a prior session from)
        #[arg(long)]
        receipt: Option<PathBuf>,
    },
}

fn parse_task_status(s: &str) -> Result<TaskStatus, String> {
    match s {
        "todo" => Ok(TaskStatus::Todo),
        "in_progress" => Ok(TaskStatus::InProgress),
        "blocked" => Ok(TaskStatus::Blocked),
        "done" => Ok(TaskStatus::Done),
        _ => Err(format!(
            "invalid status '{s}', expected: todo, in_progress, blocked, done"
        )),
    }
}

fn parse_plan_review_status(s: &str) -> Result<PlanReviewStatus, String> {
    match s {
        "ship" => Ok(PlanReviewStatus::Ship),
        "needs_work" => Ok(PlanReviewStatus::NeedsWork),
        "unknown" => Ok(PlanReviewStatus::Unknown),
        _ => Err(format!(
            "invalid status '{s}', expected: ship, needs_work, unknown"
        )),
    }
}

/// A failed command: exit code plus the message to surface. Validation
/// failures print their own report and carry no message.
#[derive(Debug)]
struct CliError {
    code: i32,
    message: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            code: 1,
            message: Some(message.into()),
        }
    }

    fn silent(code: i32) -> Self {
        Self {
            code,
            message: None,
        }
    }
}

macro_rules! cli_error_from {
    ($($ty:ty),+) => {
        $(impl From<$ty> for CliError {
            fn from(e: $ty) -> Self {
                Self::new(e.to_string())
            }
        })+
    };
}

cli_error_from!(
    WorkspaceError,
    StoreError,
    LifecycleError,
    deck_core::IdError,
    deck_core::LoadError,
    deck_core::WriteError,
    deck_core::config::ConfigError,
    std::io::Error
);

impl From<ReviewError> for CliError {
    fn from(e: ReviewError) -> Self {
        let code = match &e {
            ReviewError::AgentMissing | ReviewError::AgentFailed(_) => 2,
            ReviewError::AgentTimeout(_) => 3,
            ReviewError::Store(_) | ReviewError::Load(_) | ReviewError::Write(_) => 1,
        };
        Self {
            code,
            message: Some(e.to_string()),
        }
    }
}

fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command, cli.json) {
        if let Some(message) = e.message {
            if cli.json {
                emit_json(json!({ "success": false, "error": message }));
            } else {
                eprintln!("Error: {message}");
            }
        }
        std::process::exit(e.code);
    }
}

fn emit_json(value: Value) {
    match serde_json::to_string_pretty(&value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Error: failed to encode output: {e}"),
    }
}

/// Merge `success: true` into a payload and print it.
fn emit_ok(payload: Value) {
    let mut map = serde_json::Map::new();
    map.insert("success".to_string(), Value::Bool(true));
    if let Value::Object(fields) = payload {
        map.extend(fields);
    }
    emit_json(Value::Object(map));
}

fn parse_epic_id(s: &str) -> Result<EpicId, CliError> {
    s.parse().map_err(CliError::from)
}

fn parse_task_id(s: &str) -> Result<TaskId, CliError> {
    s.parse().map_err(CliError::from)
}

fn read_input(path: &Path, what: &str) -> Result<String, CliError> {
    storage::read_text(path).map_err(|e| CliError::new(format!("{what} {e}")))
}

fn task_summary(task: &Task) -> Value {
    json!({
        "id": task.id,
        "epic": task.epic,
        "title": task.title,
        "status": task.status,
        "priority": task.priority,
        "depends_on": task.depends_on,
    })
}

fn run(command: Command, json: bool) -> Result<(), CliError> {
    match command {
        Command::Init => cmd_init(json),
        Command::Detect => cmd_detect(json),
        Command::Config { command } => cmd_config(command, json),
        Command::Epic { command } => cmd_epic(command, json),
        Command::Task { command } => cmd_task(command, json),
        Command::Dep { command } => cmd_dep(command, json),
        Command::Show { id } => cmd_show(&id, json),
        Command::Epics => cmd_epics(json),
        Command::Tasks { epic, status } => cmd_tasks(epic.as_deref(), status, json),
        Command::List => cmd_list(json),
        Command::Cat { id } => cmd_cat(&id),
        Command::Ready { epic } => cmd_ready(&epic, json),
        Command::Next {
            epics_file,
            require_plan_review,
        } => cmd_next(epics_file.as_deref(), require_plan_review, json),
        Command::Validate { epic, all } => cmd_validate(epic.as_deref(), all, json),
        Command::Review { command } => cmd_review(command, json),
    }
}

fn cmd_init(json: bool) -> Result<(), CliError> {
    let ws = Workspace::locate()?;
    let outcome = ws.init()?;
    let message = match outcome {
        InitOutcome::Created => ".deck/ initialized",
        InitOutcome::AlreadyExists => ".deck/ already exists",
    };
    if json {
        emit_ok(json!({ "message": message, "path": ws.dir().display().to_string() }));
    } else {
        println!("{message} at {}", ws.dir().display());
    }
    Ok(())
}

fn cmd_detect(json: bool) -> Result<(), CliError> {
    let ws = Workspace::locate()?;
    let detection = ws.detect();
    if json {
        let mut payload = json!({
            "exists": detection.exists,
            "valid": detection.valid,
            "path": detection.path,
        });
        if !detection.issues.is_empty() {
            payload["issues"] = json!(detection.issues);
        }
        emit_ok(payload);
    } else {
        render::print_detection(&detection);
    }
    Ok(())
}

fn cmd_config(command: ConfigCommand, json: bool) -> Result<(), CliError> {
    let ws = Workspace::open()?;
    match command {
        ConfigCommand::Get { key } => {
            let value = config::get(&ws, &key);
            if json {
                emit_ok(json!({ "key": key, "value": value }));
            } else {
                match value {
                    None => println!("{key}: (not set)"),
                    Some(Value::Bool(b)) => println!("{key}: {b}"),
                    Some(Value::String(s)) => println!("{key}: {s}"),
                    Some(other) => println!("{key}: {other}"),
                }
            }
        }
        ConfigCommand::Set { key, value } => {
            let stored = config::set(&ws, &key, &value)?;
            if json {
                emit_ok(json!({ "key": key, "value": stored, "message": format!("{key} set") }));
            } else {
                println!("{key} set to {stored}");
            }
        }
    }
    Ok(())
}

fn cmd_epic(command: EpicCommand, json: bool) -> Result<(), CliError> {
    let ws = Workspace::open()?;
    match command {
        EpicCommand::Create { title, branch } => {
            let epic = entity::create_epic(&ws, &title, branch.as_deref())?;
            if json {
                emit_ok(json!({
                    "id": epic.id,
                    "title": epic.title,
                    "spec_path": epic.spec_path,
                    "message": format!("Epic {} created", epic.id),
                }));
            } else {
                println!("Epic {} created: {}", epic.id, epic.title);
            }
        }
        EpicCommand::SetPlan { id, file } => {
            let id = parse_epic_id(&id)?;
            let content = read_input(&file, "Input file")?;
            let epic = entity::set_epic_plan(&ws, id, &content)?;
            if json {
                emit_ok(json!({
                    "id": id,
                    "spec_path": epic.spec_path,
                    "message": format!("Epic {id} plan updated"),
                }));
            } else {
                println!("Epic {id} plan updated");
            }
        }
        EpicCommand::SetPlanReviewStatus { id, status } => {
            let id = parse_epic_id(&id)?;
            let epic = entity::set_plan_review_status(&ws, id, status)?;
            if json {
                emit_ok(json!({
                    "id": id,
                    "plan_review_status": epic.plan_review_status,
                    "plan_reviewed_at": epic.plan_reviewed_at,
                    "message": format!("Epic {id} plan review status set to {}", status.as_str()),
                }));
            } else {
                println!("Epic {id} plan review status set to {}", status.as_str());
            }
        }
        EpicCommand::SetBranch { id, branch } => {
            let id = parse_epic_id(&id)?;
            let epic = entity::set_epic_branch(&ws, id, &branch)?;
            if json {
                emit_ok(json!({
                    "id": id,
                    "branch_name": epic.branch_name,
                    "message": format!("Epic {id} branch_name set to {branch}"),
                }));
            } else {
                println!("Epic {id} branch_name set to {branch}");
            }
        }
        EpicCommand::Close { id } => {
            let id = parse_epic_id(&id)?;
            let epic = lifecycle::close_epic(&ws, id)?;
            if json {
                emit_ok(json!({
                    "id": id,
                    "status": epic.status,
                    "message": format!("Epic {id} closed"),
                }));
            } else {
                println!("Epic {id} closed");
            }
        }
    }
    Ok(())
}

fn cmd_task(command: TaskCommand, json: bool) -> Result<(), CliError> {
    let ws = Workspace::open()?;
    match command {
        TaskCommand::Create {
            epic,
            title,
            deps,
            acceptance_file,
            priority,
        } => {
            let epic = parse_epic_id(&epic)?;
            let mut dep_ids = Vec::new();
            if let Some(deps) = deps {
                for dep in deps.split(',') {
                    dep_ids.push(parse_task_id(dep.trim())?);
                }
            }
            let acceptance = acceptance_file
                .map(|path| read_input(&path, "Acceptance file"))
                .transpose()?;
            let task = entity::create_task(
                &ws,
                epic,
                &title,
                &dep_ids,
                priority,
                acceptance.as_deref(),
            )?;
            if json {
                emit_ok(json!({
                    "id": task.id,
                    "epic": task.epic,
                    "title": task.title,
                    "depends_on": task.depends_on,
                    "spec_path": task.spec_path,
                    "message": format!("Task {} created", task.id),
                }));
            } else {
                println!("Task {} created: {}", task.id, task.title);
            }
        }
        TaskCommand::SetDescription { id, file } => {
            set_task_section(&ws, &id, deck_core::specdoc::DESCRIPTION_HEADING, &file, json)?;
        }
        TaskCommand::SetAcceptance { id, file } => {
            set_task_section(&ws, &id, deck_core::specdoc::ACCEPTANCE_HEADING, &file, json)?;
        }
        TaskCommand::Start { id, force, note } => {
            let id = parse_task_id(&id)?;
            let current_actor = actor::resolve(ws.root());
            let task = lifecycle::start(&ws, id, &current_actor, force, note.as_deref())?;
            if json {
                emit_ok(json!({
                    "id": id,
                    "status": task.status,
                    "assignee": task.assignee,
                    "message": format!("Task {id} started"),
                }));
            } else {
                println!("Task {id} started");
            }
        }
        TaskCommand::Done {
            id,
            summary_file,
            evidence_json,
            force,
        } => {
            let id = parse_task_id(&id)?;
            let summary = read_input(&summary_file, "Summary file")?;
            let evidence_raw = read_input(&evidence_json, "Evidence file")?;
            let evidence: Evidence = serde_json::from_str(&evidence_raw)
                .map_err(|e| CliError::new(format!("Evidence file invalid JSON: {e}")))?;
            let current_actor = actor::resolve(ws.root());
            let task = lifecycle::complete(&ws, id, &current_actor, &summary, evidence, force)?;
            if json {
                emit_ok(json!({
                    "id": id,
                    "status": task.status,
                    "message": format!("Task {id} completed"),
                }));
            } else {
                println!("Task {id} completed");
            }
        }
        TaskCommand::Block { id, reason_file } => {
            let id = parse_task_id(&id)?;
            let reason = read_input(&reason_file, "Reason file")?;
            let task = lifecycle::block(&ws, id, &reason)?;
            if json {
                emit_ok(json!({
                    "id": id,
                    "status": task.status,
                    "message": format!("Task {id} blocked"),
                }));
            } else {
                println!("Task {id} blocked");
            }
        }
    }
    Ok(())
}

fn set_task_section(
    ws: &Workspace,
    id: &str,
    heading: &str,
    file: &Path,
    json: bool,
) -> Result<(), CliError> {
    let id = parse_task_id(id)?;
    let content = read_input(file, "Input file")?;
    entity::set_task_section(ws, id, heading, &content)?;
    if json {
        emit_ok(json!({
            "id": id,
            "section": heading,
            "message": format!("Task {id} {heading} updated"),
        }));
    } else {
        println!("Task {id} {heading} updated");
    }
    Ok(())
}

fn cmd_dep(command: DepCommand, json: bool) -> Result<(), CliError> {
    let ws = Workspace::open()?;
    match command {
        DepCommand::Add { task, depends_on } => {
            let task = parse_task_id(&task)?;
            let dep = parse_task_id(&depends_on)?;
            let updated = entity::add_dependency(&ws, task, dep)?;
            if json {
                emit_ok(json!({
                    "task": task,
                    "depends_on": updated.depends_on,
                    "message": format!("Dependency {dep} added to {task}"),
                }));
            } else {
                println!("Dependency {dep} added to {task}");
            }
        }
    }
    Ok(())
}

fn cmd_show(id: &str, json: bool) -> Result<(), CliError> {
    let ws = Workspace::open()?;
    match id.parse::<Ident>()? {
        Ident::Epic(id) => {
            let epic = entity::load_epic(&ws, id)?;
            let tasks: Vec<Task> = entity::epic_tasks(&ws, id)?.into_values().collect();
            if json {
                let mut payload = serde_json::to_value(&epic)
                    .map_err(|e| CliError::new(e.to_string()))?;
                payload["tasks"] = Value::Array(tasks.iter().map(task_summary).collect());
                emit_ok(payload);
            } else {
                render::print_show_epic(&epic, &tasks);
            }
        }
        Ident::Task(id) => {
            let task = entity::load_task(&ws, id)?;
            if json {
                let payload = serde_json::to_value(&task)
                    .map_err(|e| CliError::new(e.to_string()))?;
                emit_ok(payload);
            } else {
                render::print_show_task(&task);
            }
        }
    }
    Ok(())
}

fn cmd_epics(json: bool) -> Result<(), CliError> {
    let ws = Workspace::open()?;
    let mut rows = Vec::new();
    for epic in entity::list_epics(&ws)? {
        let (total, done) = entity::task_progress(&ws, epic.id)?;
        rows.push((epic, total, done));
    }
    if json {
        let epics: Vec<Value> = rows
            .iter()
            .map(|(epic, total, done)| {
                json!({
                    "id": epic.id,
                    "title": epic.title,
                    "status": epic.status,
                    "tasks": total,
                    "done": done,
                })
            })
            .collect();
        emit_ok(json!({ "epics": epics, "count": epics.len() }));
    } else {
        render::print_epic_list(&rows);
    }
    Ok(())
}

fn cmd_tasks(epic: Option<&str>, status: Option<TaskStatus>, json: bool) -> Result<(), CliError> {
    let ws = Workspace::open()?;
    let epic = epic.map(parse_epic_id).transpose()?;
    let tasks = entity::list_tasks(&ws, epic, status)?;
    if json {
        let rows: Vec<Value> = tasks.iter().map(task_summary).collect();
        emit_ok(json!({ "tasks": rows, "count": rows.len() }));
    } else {
        let scope = epic.map(|e| e.to_string());
        render::print_task_list(&tasks, scope.as_deref());
    }
    Ok(())
}

fn cmd_list(json: bool) -> Result<(), CliError> {
    let ws = Workspace::open()?;
    let mut grouped = Vec::new();
    for epic in entity::list_epics(&ws)? {
        let tasks: Vec<Task> = entity::epic_tasks(&ws, epic.id)?.into_values().collect();
        grouped.push((epic, tasks));
    }
    if json {
        let epics: Vec<Value> = grouped
            .iter()
            .map(|(epic, tasks)| {
                let done = tasks.iter().filter(|t| t.status == TaskStatus::Done).count();
                json!({
                    "id": epic.id,
                    "title": epic.title,
                    "status": epic.status,
                    "tasks": tasks.len(),
                    "done": done,
                })
            })
            .collect();
        let tasks: Vec<Value> = grouped
            .iter()
            .flat_map(|(_, tasks)| tasks.iter().map(task_summary))
            .collect();
        emit_ok(json!({
            "epics": epics,
            "tasks": tasks,
            "epic_count": epics.len(),
            "task_count": tasks.len(),
        }));
    } else {
        render::print_overview(&grouped);
    }
    Ok(())
}

fn cmd_cat(id: &str) -> Result<(), CliError> {
    let ws = Workspace::open()?;
    let path = match id.parse::<Ident>()? {
        Ident::Epic(id) => ws.epic_spec_path(id),
        Ident::Task(id) => ws.task_spec_path(id),
    };
    let content = read_input(&path, "Spec")?;
    print!("{content}");
    Ok(())
}

fn cmd_ready(epic: &str, json: bool) -> Result<(), CliError> {
    let ws = Workspace::open()?;
    let epic = parse_epic_id(epic)?;
    let current_actor = actor::resolve(ws.root());
    let report = scheduler::ready(&ws, epic)?;
    if json {
        emit_ok(json!({
            "epic": report.epic,
            "actor": current_actor,
            "ready": report.ready.iter().map(|t| json!({
                "id": t.id, "title": t.title, "depends_on": t.depends_on,
            })).collect::<Vec<_>>(),
            "in_progress": report.in_progress.iter().map(|t| json!({
                "id": t.id, "title": t.title, "assignee": t.assignee,
            })).collect::<Vec<_>>(),
            "blocked": report.blocked.iter().map(|b| json!({
                "id": b.task.id, "title": b.task.title, "blocked_by": b.blocked_by,
            })).collect::<Vec<_>>(),
        }));
    } else {
        render::print_ready(&report, &current_actor);
    }
    Ok(())
}

#[derive(serde::Deserialize)]
struct EpicsFile {
    epics: Vec<String>,
}

fn cmd_next(epics_file: Option<&Path>, require_plan_review: bool, json: bool) -> Result<(), CliError> {
    let ws = Workspace::open()?;

    let order: Option<Vec<EpicId>> = epics_file
        .map(|path| -> Result<Vec<EpicId>, CliError> {
            let file: EpicsFile = storage::read_json(path).map_err(|e| {
                CliError::new(format!("Epics file {e}"))
            })?;
            file.epics
                .iter()
                .map(|id| {
                    id.parse().map_err(|_| {
                        CliError::new(format!("Invalid epic ID in epics file: {id}"))
                    })
                })
                .collect()
        })
        .transpose()?;

    let current_actor = actor::resolve(ws.root());
    let unit = scheduler::next(&ws, order.as_deref(), &current_actor, require_plan_review)?;

    if json {
        let payload = match &unit {
            NextUnit::Plan { epic } => json!({
                "status": "plan", "epic": epic, "task": null, "reason": "needs_plan_review",
            }),
            NextUnit::Resume { epic, task } => json!({
                "status": "work", "epic": epic, "task": task, "reason": "resume_in_progress",
            }),
            NextUnit::Ready { epic, task } => json!({
                "status": "work", "epic": epic, "task": task, "reason": "ready_task",
            }),
            NextUnit::Idle { blocked_epics } if blocked_epics.is_empty() => json!({
                "status": "none", "epic": null, "task": null, "reason": "none",
            }),
            NextUnit::Idle { blocked_epics } => json!({
                "status": "none", "epic": null, "task": null,
                "reason": "blocked_by_epic_deps",
                "blocked_epics": blocked_epics,
            }),
        };
        emit_ok(payload);
    } else {
        render::print_next(&unit);
    }
    Ok(())
}

fn cmd_validate(epic: Option<&str>, all: bool, json: bool) -> Result<(), CliError> {
    let ws = Workspace::open()?;

    if all {
        let report = validate::validate_all(&ws)?;
        if json {
            let mut payload = serde_json::to_value(&report)
                .map_err(|e| CliError::new(e.to_string()))?;
            payload["success"] = Value::Bool(report.valid);
            emit_json(payload);
        } else {
            render::print_store_validation(&report);
        }
        if !report.valid {
            return Err(CliError::silent(1));
        }
        return Ok(());
    }

    let Some(epic) = epic else {
        return Err(CliError::new("Must specify --epic or --all"));
    };
    let epic = parse_epic_id(epic)?;
    let report = validate::validate_epic(&ws, epic);
    if json {
        let mut payload = serde_json::to_value(&report)
            .map_err(|e| CliError::new(e.to_string()))?;
        payload["success"] = Value::Bool(report.valid);
        emit_json(payload);
    } else {
        render::print_epic_validation(&report);
    }
    if !report.valid {
        return Err(CliError::silent(1));
    }
    Ok(())
}

fn cmd_review(command: ReviewCommand, json: bool) -> Result<(), CliError> {
    match command {
        ReviewCommand::Check => {
            let available = review::agent_available();
            let version = available.then(review::agent_version).flatten();
            if json {
                emit_ok(json!({ "available": available, "version": version }));
            } else if available {
                println!(
                    "{} available: {}",
                    review::AGENT_BIN,
                    version.as_deref().unwrap_or("unknown version")
                );
            } else {
                println!("{} not available", review::AGENT_BIN);
            }
            Ok(())
        }
        ReviewCommand::Impl {
            task,
            base,
            focus,
            context_file,
            receipt,
        } => {
            let ws = Workspace::open()?;
            let task = task.as_deref().map(parse_task_id).transpose()?;
            let hints = context_file
                .map(|path| read_input(&path, "Context file"))
                .transpose()?
                .unwrap_or_default();
            tracing::debug!(base = %base, task = ?task, "running implementation review");
            let receipt = review::impl_review(
                &ws,
                task,
                &base,
                focus.as_deref(),
                &hints,
                receipt.as_deref(),
            )?;
            print_review(&receipt, json);
            Ok(())
        }
        ReviewCommand::Plan {
            epic,
            context_file,
            receipt,
        } => {
            let ws = Workspace::open()?;
            let epic = parse_epic_id(&epic)?;
            let hints = context_file
                .map(|path| read_input(&path, "Context file"))
                .transpose()?
                .unwrap_or_default();
            tracing::debug!(epic = %epic, "running plan review");
            let receipt = review::plan_review(&ws, epic, &hints, receipt.as_deref())?;
            print_review(&receipt, json);
            Ok(())
        }
    }
}

fn print_review(receipt: &review::Receipt, json: bool) {
    if json {
        emit_ok(json!({
            "type": receipt.review_type,
            "id": receipt.id,
            "verdict": receipt.verdict,
            "session_id": receipt.session_id,
            "mode": receipt.mode,
            "review": receipt.review,
            "timestamp": receipt.timestamp,
        }));
    } else {
        println!("{}", receipt.review);
        println!(
            "\nVERDICT={}",
            receipt.verdict.map_or("UNKNOWN", review::Verdict::as_str)
        );
    }
}
