//! Core entity types for the task store.
//!
//! JSON records are the machine-readable source of truth; the paired
//! Markdown specs carry narrative. Optional fields default on
//! deserialization so records written by older versions satisfy the same
//! invariants as fresh ones.

use crate::ids::{EpicId, TaskId};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Current UTC timestamp, ISO-8601 with a trailing `Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Priority rank used for scheduling; unset priority sorts last.
pub const UNSET_PRIORITY_RANK: i64 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    #[default]
    Open,
    Done,
}

impl EpicStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Blocked,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanReviewStatus {
    #[default]
    Unknown,
    Ship,
    NeedsWork,
}

impl PlanReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ship => "ship",
            Self::NeedsWork => "needs_work",
        }
    }
}

/// Structured completion evidence. Scalar strings coerce to
/// single-element lists and missing keys to empty lists, so hand-written
/// payloads stay accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default, deserialize_with = "string_or_list")]
    pub commits: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub tests: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub prs: Vec<String>,
}

impl Evidence {
    /// The three labeled lines written into a spec's Evidence section.
    pub fn to_markdown(&self) -> String {
        format!(
            "{}\n{}\n{}",
            labeled_line("Commits", &self.commits),
            labeled_line("Tests", &self.tests),
            labeled_line("PRs", &self.prs),
        )
    }
}

fn labeled_line(label: &str, items: &[String]) -> String {
    if items.is_empty() {
        format!("- {label}:")
    } else {
        format!("- {label}: {}", items.join(", "))
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        None,
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::None => Vec::new(),
    })
}

/// A container for related tasks, with a narrative plan document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: EpicId,
    pub title: String,
    pub status: EpicStatus,
    #[serde(default)]
    pub plan_review_status: PlanReviewStatus,
    #[serde(default)]
    pub plan_reviewed_at: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub depends_on_epics: Vec<EpicId>,
    pub spec_path: String,
    /// Retained for older records; allocation scans files instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_task: Option<u32>,
    pub created_at: String,
    pub updated_at: String,
}

/// A unit of work under exactly one epic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub epic: EpicId,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<String>,
    #[serde(default)]
    pub claim_note: String,
    pub spec_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
    pub created_at: String,
    pub updated_at: String,
}

impl Task {
    pub fn priority_rank(&self) -> i64 {
        self.priority.unwrap_or(UNSET_PRIORITY_RANK)
    }

    /// Scheduling order: priority first (unset last), then task number,
    /// then title.
    pub fn schedule_key(&self) -> (i64, u32, &str) {
        (self.priority_rank(), self.id.number(), &self.title)
    }

    pub fn claimed_by(&self, actor: &str) -> bool {
        self.assignee.as_deref() == Some(actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_utc_with_z_suffix() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&PlanReviewStatus::NeedsWork).unwrap(),
            "\"needs_work\""
        );
        assert_eq!(serde_json::to_string(&EpicStatus::Open).unwrap(), "\"open\"");
    }

    #[test]
    fn evidence_coerces_scalars_and_missing_keys() {
        let evidence: Evidence =
            serde_json::from_str(r#"{"commits": "abc123", "tests": ["unit", "e2e"]}"#).unwrap();
        assert_eq!(evidence.commits, vec!["abc123"]);
        assert_eq!(evidence.tests, vec!["unit", "e2e"]);
        assert!(evidence.prs.is_empty());
    }

    #[test]
    fn evidence_rejects_non_objects() {
        assert!(serde_json::from_str::<Evidence>("[1, 2]").is_err());
    }

    #[test]
    fn evidence_markdown_has_three_labeled_lines() {
        let evidence = Evidence {
            commits: vec!["abc".to_string(), "def".to_string()],
            tests: vec!["suite passed".to_string()],
            prs: Vec::new(),
        };
        assert_eq!(
            evidence.to_markdown(),
            "- Commits: abc, def\n- Tests: suite passed\n- PRs:"
        );
    }

    #[test]
    fn older_task_records_are_normalized() {
        // A minimal record as written before claim fields existed.
        let task: Task = serde_json::from_str(
            r#"{
                "id": "E-1.1",
                "epic": "E-1",
                "title": "old task",
                "status": "todo",
                "spec_path": ".deck/tasks/E-1.1.md",
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(task.priority, None);
        assert!(task.depends_on.is_empty());
        assert_eq!(task.assignee, None);
        assert_eq!(task.claim_note, "");
        assert_eq!(task.priority_rank(), UNSET_PRIORITY_RANK);
    }

    #[test]
    fn older_epic_records_are_normalized() {
        let epic: Epic = serde_json::from_str(
            r#"{
                "id": "E-1",
                "title": "old epic",
                "status": "open",
                "spec_path": ".deck/specs/E-1.md",
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(epic.plan_review_status, PlanReviewStatus::Unknown);
        assert_eq!(epic.plan_reviewed_at, None);
        assert_eq!(epic.branch_name, None);
        assert!(epic.depends_on_epics.is_empty());
    }

    #[test]
    fn schedule_key_orders_unset_priority_last() {
        let mk = |id: &str, priority: Option<i64>| Task {
            id: id.parse().unwrap(),
            epic: "E-1".parse().unwrap(),
            title: "t".to_string(),
            status: TaskStatus::Todo,
            priority,
            depends_on: Vec::new(),
            assignee: None,
            claimed_at: None,
            claim_note: String::new(),
            spec_path: String::new(),
            evidence: None,
            created_at: now_iso(),
            updated_at: now_iso(),
        };
        let low = mk("E-1.9", Some(1));
        let unset = mk("E-1.1", None);
        assert!(low.schedule_key() < unset.schedule_key());
    }
}
