//! Bridge to the external review agent.
//!
//! The agent is an opaque subprocess: we assemble a prompt from the
//! entity's spec plus context, run it with a timeout, parse the terminal
//! `<verdict>…</verdict>` tag, and record a receipt JSON that later
//! invocations use to resume the same agent session. Resume failures fall
//! back silently to a fresh session; a malformed receipt just means "no
//! prior session".

use crate::entity::StoreError;
use crate::ids::{EpicId, TaskId};
use crate::storage::{self, LoadError, WriteError};
use crate::types::now_iso;
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Binary name of the external review agent.
pub const AGENT_BIN: &str = "codex";
/// Model override for new agent sessions.
pub const MODEL_ENV: &str = "DECK_REVIEW_MODEL";
/// Subprocess timeout override, integer seconds.
pub const TIMEOUT_ENV: &str = "DECK_REVIEW_TIMEOUT";

const DEFAULT_MODEL: &str = "gpt-5.2";
const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("{AGENT_BIN} not found in PATH")]
    AgentMissing,
    #[error("{AGENT_BIN} failed: {0}")]
    AgentFailed(String),
    #[error("{AGENT_BIN} timed out after {0}s")]
    AgentTimeout(u64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "SHIP")]
    Ship,
    #[serde(rename = "NEEDS_WORK")]
    NeedsWork,
    #[serde(rename = "MAJOR_RETHINK")]
    MajorRethink,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ship => "SHIP",
            Self::NeedsWork => "NEEDS_WORK",
            Self::MajorRethink => "MAJOR_RETHINK",
        }
    }

    /// The last `<verdict>…</verdict>` tag in the agent output, if any.
    pub fn parse(output: &str) -> Option<Self> {
        let start = output.rfind("<verdict>")?;
        let rest = &output[start + "<verdict>".len()..];
        let end = rest.find("</verdict>")?;
        match &rest[..end] {
            "SHIP" => Some(Self::Ship),
            "NEEDS_WORK" => Some(Self::NeedsWork),
            "MAJOR_RETHINK" => Some(Self::MajorRethink),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewType {
    #[serde(rename = "impl_review")]
    Impl,
    #[serde(rename = "plan_review")]
    Plan,
}

/// Durable record of one review run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "type")]
    pub review_type: ReviewType,
    /// Subject: task id, epic id, or `branch` for standalone reviews.
    pub id: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    pub verdict: Option<Verdict>,
    pub session_id: Option<String>,
    pub timestamp: String,
    pub review: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
}

/// Session id from a prior receipt, tolerating absent or malformed files.
pub fn prior_session(path: &Path) -> Option<String> {
    let value: serde_json::Value = storage::read_json(path).ok()?;
    value.get("session_id")?.as_str().map(str::to_string)
}

pub fn write_receipt(path: &Path, receipt: &Receipt) -> Result<(), WriteError> {
    storage::write_json_atomic(path, receipt)
}

/// Whether the agent binary is on the search path.
pub fn agent_available() -> bool {
    which::which(AGENT_BIN).is_ok()
}

/// Agent version string, when the binary is present and answers.
pub fn agent_version() -> Option<String> {
    let bin = which::which(AGENT_BIN).ok()?;
    let output = Command::new(bin).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn timeout_secs() -> u64 {
    std::env::var(TIMEOUT_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
}

fn effective_model(model: Option<&str>) -> String {
    std::env::var(MODEL_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| model.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

/// Result of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub output: String,
    pub session_id: Option<String>,
}

/// Run the review agent. With a prior session id, a resume is attempted
/// first and any resume failure falls through to a fresh session.
pub fn run_agent(
    prompt: &str,
    session: Option<&str>,
    model: Option<&str>,
) -> Result<AgentRun, ReviewError> {
    let bin = which::which(AGENT_BIN).map_err(|_| ReviewError::AgentMissing)?;
    let timeout = timeout_secs();

    if let Some(session_id) = session {
        let mut cmd = Command::new(&bin);
        cmd.args(["exec", "resume", session_id, prompt]);
        if let Ok(output) = run_with_timeout(cmd, timeout) {
            return Ok(AgentRun {
                output,
                session_id: Some(session_id.to_string()),
            });
        }
    }

    let model = effective_model(model);
    let mut cmd = Command::new(&bin);
    cmd.args([
        "exec",
        "--model",
        model.as_str(),
        "-c",
        "model_reasoning_effort=\"high\"",
        "--sandbox",
        "read-only",
        "--json",
        prompt,
    ]);
    let output = run_with_timeout(cmd, timeout)?;
    let session_id = parse_session_id(&output);
    Ok(AgentRun { output, session_id })
}

/// Run a command with piped output and a wall-clock deadline. Reader
/// threads drain the pipes so a chatty child cannot deadlock on a full
/// pipe buffer.
fn run_with_timeout(mut cmd: Command, timeout: u64) -> Result<String, ReviewError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| ReviewError::AgentFailed(e.to_string()))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = std::thread::spawn(move || drain(stdout));
    let stderr_reader = std::thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + Duration::from_secs(timeout);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ReviewError::AgentTimeout(timeout));
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                let _ = child.kill();
                return Err(ReviewError::AgentFailed(e.to_string()));
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        let message = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(ReviewError::AgentFailed(message));
    }
    Ok(stdout)
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut buffer = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buffer);
    }
    buffer
}

/// Session id from the agent's JSON event stream:
/// `{"type":"thread.started","thread_id":"…"}`.
fn parse_session_id(output: &str) -> Option<String> {
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if value.get("type").and_then(|t| t.as_str()) == Some("thread.started") {
            if let Some(id) = value.get("thread_id").and_then(|t| t.as_str()) {
                return Some(id.to_string());
            }
        }
    }
    None
}

/// `git diff --stat <base>` at the repo root; empty when git is unhappy.
pub fn diff_summary(repo_root: &Path, base: &str) -> String {
    Command::new("git")
        .args(["diff", "--stat", base])
        .current_dir(repo_root)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

const IMPL_CRITERIA: &str = "\
Conduct an exacting review of this implementation.

## Review Criteria

1. **Correctness** - Matches spec? Logic errors?
2. **Simplicity** - Simplest solution? Over-engineering?
3. **DRY** - Duplicated logic? Existing patterns?
4. **Architecture** - Data flow? Clear boundaries?
5. **Edge Cases** - Failure modes? Race conditions?
6. **Tests** - Adequate coverage? Testing behavior?
7. **Security** - Injection? Auth gaps?

## Output Format

For each issue found:
- **Severity**: Critical / Major / Minor / Nitpick
- **File:Line**: Exact location
- **Problem**: What's wrong
- **Suggestion**: How to fix

Be critical. Find real issues.

**REQUIRED**: End your response with exactly one verdict tag:
<verdict>SHIP</verdict> - Ready to merge
<verdict>NEEDS_WORK</verdict> - Has issues that must be fixed
<verdict>MAJOR_RETHINK</verdict> - Fundamental approach problems

Do NOT skip this tag. The automation depends on it.";

const PLAN_CRITERIA: &str = "\
Conduct an exacting review of this plan.

## Review Criteria

1. **Completeness** - All requirements covered? Missing edge cases?
2. **Feasibility** - Technically sound? Dependencies clear?
3. **Clarity** - Specs unambiguous? Acceptance criteria testable?
4. **Architecture** - Right abstractions? Clean boundaries?
5. **Risks** - Blockers identified? Security gaps? Mitigation?
6. **Scope** - Right-sized? Over/under-engineering?
7. **Testability** - How will we verify this works?

## Output Format

For each issue found:
- **Severity**: Critical / Major / Minor / Nitpick
- **Location**: Which task or section
- **Problem**: What's wrong
- **Suggestion**: How to fix

Be critical. Find real issues.

**REQUIRED**: End your response with exactly one verdict tag:
<verdict>SHIP</verdict> - Plan is solid, ready to implement
<verdict>NEEDS_WORK</verdict> - Plan has gaps that need addressing
<verdict>MAJOR_RETHINK</verdict> - Fundamental approach problems

Do NOT skip this tag. The automation depends on it.";

const CONTEXT_PREAMBLE: &str = "\
## Context Gathering (do this first)

Before reviewing, explore the codebase to understand the full impact:

**Cross-boundary checks:**
- Frontend change? Check the backend API it calls
- Backend change? Check frontend consumers and other callers
- Schema/type change? Find all usages across the codebase
- Config change? Check what reads it

**Related context:**
- Similar features elsewhere (patterns to follow or break)
- Tests covering this area (are they sufficient?)
- Shared utilities/hooks this code should use
- Error handling patterns in adjacent code

The context_hints below are a starting point. Read additional files as
needed - a thorough review requires understanding the system, not just
the diff.";

/// Prompt for an entity-scoped review: spec text plus caller context
/// hints and a diff summary, in tagged blocks.
pub fn review_prompt(
    review_type: ReviewType,
    spec_content: &str,
    context_hints: &str,
    diff: &str,
) -> String {
    let criteria = match review_type {
        ReviewType::Impl => IMPL_CRITERIA,
        ReviewType::Plan => PLAN_CRITERIA,
    };
    let mut parts = Vec::new();
    if !context_hints.is_empty() {
        parts.push(format!("<context_hints>\n{context_hints}\n</context_hints>"));
    }
    if !diff.is_empty() {
        parts.push(format!("<diff_summary>\n{diff}\n</diff_summary>"));
    }
    parts.push(format!("<spec>\n{spec_content}\n</spec>"));
    parts.push(format!(
        "<review_instructions>\n{CONTEXT_PREAMBLE}\n\n{criteria}\n</review_instructions>"
    ));
    parts.join("\n\n")
}

/// Prompt for a standalone branch review with no task context.
pub fn branch_review_prompt(base: &str, focus: Option<&str>, diff: &str) -> String {
    let focus_section = focus.map_or_else(String::new, |focus| {
        format!("\n## Focus Areas\n{focus}\n\nPay special attention to these areas during review.\n")
    });
    format!(
        "# Implementation Review: Branch Changes vs {base}\n\
         \n\
         Review all changes on the current branch compared to {base}.\n\
         {focus_section}\n\
         ## Diff Summary\n\
         ```\n\
         {diff}\n\
         ```\n\
         \n\
         {IMPL_CRITERIA}"
    )
}

/// Run an implementation review for a task (or the whole branch when no
/// task is given) and record a receipt at `receipt_path` when provided.
pub fn impl_review(
    ws: &Workspace,
    task: Option<TaskId>,
    base: &str,
    focus: Option<&str>,
    context_hints: &str,
    receipt_path: Option<&Path>,
) -> Result<Receipt, ReviewError> {
    let diff = diff_summary(ws.root(), base);
    let prompt = match task {
        Some(task) => {
            let spec = storage::read_text(&ws.task_spec_path(task))?;
            review_prompt(ReviewType::Impl, &spec, context_hints, &diff)
        }
        None => branch_review_prompt(base, focus, &diff),
    };

    let session = receipt_path.and_then(prior_session);
    let run = run_agent(&prompt, session.as_deref(), None)?;

    let receipt = Receipt {
        review_type: ReviewType::Impl,
        id: task.map_or_else(|| "branch".to_string(), |t| t.to_string()),
        mode: AGENT_BIN.to_string(),
        base: Some(base.to_string()),
        verdict: Verdict::parse(&run.output),
        session_id: run.session_id,
        timestamp: now_iso(),
        review: run.output,
        focus: focus.map(str::to_string),
    };
    if let Some(path) = receipt_path {
        write_receipt(path, &receipt)?;
    }
    Ok(receipt)
}

/// Run a plan review for an epic and record a receipt when asked.
pub fn plan_review(
    ws: &Workspace,
    epic: EpicId,
    context_hints: &str,
    receipt_path: Option<&Path>,
) -> Result<Receipt, ReviewError> {
    let spec = storage::read_text(&ws.epic_spec_path(epic))?;
    let prompt = review_prompt(ReviewType::Plan, &spec, context_hints, "");

    let session = receipt_path.and_then(prior_session);
    let run = run_agent(&prompt, session.as_deref(), None)?;

    let receipt = Receipt {
        review_type: ReviewType::Plan,
        id: epic.to_string(),
        mode: AGENT_BIN.to_string(),
        base: None,
        verdict: Verdict::parse(&run.output),
        session_id: run.session_id,
        timestamp: now_iso(),
        review: run.output,
        focus: None,
    };
    if let Some(path) = receipt_path {
        write_receipt(path, &receipt)?;
    }
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn verdict_parses_known_tags() {
        assert_eq!(Verdict::parse("… <verdict>SHIP</verdict>"), Some(Verdict::Ship));
        assert_eq!(
            Verdict::parse("<verdict>NEEDS_WORK</verdict>\n"),
            Some(Verdict::NeedsWork)
        );
        assert_eq!(
            Verdict::parse("<verdict>MAJOR_RETHINK</verdict>"),
            Some(Verdict::MajorRethink)
        );
        assert_eq!(Verdict::parse("no tag here"), None);
        assert_eq!(Verdict::parse("<verdict>MAYBE</verdict>"), None);
    }

    #[test]
    fn verdict_takes_the_terminal_tag() {
        let output = "example: <verdict>SHIP</verdict> … final: <verdict>NEEDS_WORK</verdict>";
        assert_eq!(Verdict::parse(output), Some(Verdict::NeedsWork));
    }

    #[test]
    fn receipt_roundtrips_with_wire_names() {
        let receipt = Receipt {
            review_type: ReviewType::Impl,
            id: "E-1.2".to_string(),
            mode: AGENT_BIN.to_string(),
            base: Some("main".to_string()),
            verdict: Some(Verdict::Ship),
            session_id: Some("thread-1".to_string()),
            timestamp: now_iso(),
            review: "looks good\n<verdict>SHIP</verdict>".to_string(),
            focus: None,
        };

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("receipt.json");
        write_receipt(&path, &receipt).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"type\": \"impl_review\""));
        assert!(text.contains("\"verdict\": \"SHIP\""));

        assert_eq!(prior_session(&path).as_deref(), Some("thread-1"));
    }

    #[test]
    fn prior_session_tolerates_junk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("receipt.json");
        assert_eq!(prior_session(&path), None);
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(prior_session(&path), None);
        std::fs::write(&path, "{\"session_id\": 7}").unwrap();
        assert_eq!(prior_session(&path), None);
    }

    #[test]
    fn session_id_comes_from_thread_started_event() {
        let output = "\
{\"type\":\"turn.started\"}
not json
{\"type\":\"thread.started\",\"thread_id\":\"abc-123\"}
{\"type\":\"turn.completed\"}";
        assert_eq!(parse_session_id(output).as_deref(), Some("abc-123"));
        assert_eq!(parse_session_id("{\"type\":\"other\"}"), None);
    }

    #[test]
    fn prompts_carry_spec_and_context_blocks() {
        let prompt = review_prompt(ReviewType::Plan, "# plan body", "hint", "1 file changed");
        assert!(prompt.contains("<context_hints>\nhint\n</context_hints>"));
        assert!(prompt.contains("<diff_summary>\n1 file changed\n</diff_summary>"));
        assert!(prompt.contains("<spec>\n# plan body\n</spec>"));
        assert!(prompt.contains("<verdict>SHIP</verdict>"));

        let bare = review_prompt(ReviewType::Impl, "spec", "", "");
        assert!(!bare.contains("<context_hints>"));
        assert!(!bare.contains("<diff_summary>"));
    }

    #[test]
    fn branch_prompt_includes_focus_when_given() {
        let prompt = branch_review_prompt("main", Some("error handling"), "diffstat");
        assert!(prompt.contains("## Focus Areas"));
        assert!(prompt.contains("error handling"));
        assert!(branch_review_prompt("main", None, "d").contains("Branch Changes vs main"));
    }

    #[test]
    fn run_with_timeout_kills_slow_children() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = Instant::now();
        let err = run_with_timeout(cmd, 1).unwrap_err();
        assert!(matches!(err, ReviewError::AgentTimeout(1)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn run_with_timeout_collects_output() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let output = run_with_timeout(cmd, 5).unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[test]
    fn run_with_timeout_reports_failure_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken >&2; exit 3"]);
        let err = run_with_timeout(cmd, 5).unwrap_err();
        match err {
            ReviewError::AgentFailed(message) => assert_eq!(message, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
