//! Markdown spec parsing and surgical section patching.
//!
//! Task specs carry four required H2 sections; epic plans are free-form.
//! Patching replaces exactly one section body and leaves every other line
//! untouched, so concurrent edits to different sections merge cleanly.

use crate::ids::{EpicId, TaskId};
use thiserror::Error;

pub const DESCRIPTION_HEADING: &str = "## Description";
pub const ACCEPTANCE_HEADING: &str = "## Acceptance";
pub const DONE_SUMMARY_HEADING: &str = "## Done summary";
pub const EVIDENCE_HEADING: &str = "## Evidence";

/// Headings every task spec must contain exactly once, in any order.
pub const REQUIRED_HEADINGS: [&str; 4] = [
    DESCRIPTION_HEADING,
    ACCEPTANCE_HEADING,
    DONE_SUMMARY_HEADING,
    EVIDENCE_HEADING,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecDocError {
    #[error("section '{0}' not found in task spec")]
    MissingHeading(String),
    #[error("cannot patch: duplicate heading '{heading}' found ({count} times)")]
    DuplicateHeading { heading: String, count: usize },
}

fn is_heading_line(line: &str, heading: &str) -> bool {
    line.starts_with("## ") && line.trim_end() == heading
}

fn heading_count(content: &str, heading: &str) -> usize {
    content
        .lines()
        .filter(|line| is_heading_line(line, heading))
        .count()
}

/// Body between a heading and the next H2 (or end of file), trimmed.
/// `None` when the heading is absent.
pub fn section(content: &str, heading: &str) -> Option<String> {
    let mut in_target = false;
    let mut collected: Vec<&str> = Vec::new();
    for line in content.lines() {
        if line.starts_with("## ") {
            if is_heading_line(line, heading) {
                in_target = true;
                continue;
            }
            if in_target {
                break;
            }
        }
        if in_target {
            collected.push(line);
        }
    }
    in_target.then(|| collected.join("\n").trim().to_string())
}

/// Replace the body under `heading` with `body`, byte-preserving every
/// other section. Fails rather than guessing when the heading is missing
/// or appears more than once.
pub fn patch_section(content: &str, heading: &str, body: &str) -> Result<String, SpecDocError> {
    match heading_count(content, heading) {
        0 => return Err(SpecDocError::MissingHeading(heading.to_string())),
        1 => {}
        count => {
            return Err(SpecDocError::DuplicateHeading {
                heading: heading.to_string(),
                count,
            })
        }
    }

    // Split keeps a trailing empty element, so the original trailing
    // newline survives the rebuild.
    let mut out: Vec<String> = Vec::new();
    let mut in_target = false;
    for line in content.split('\n') {
        if line.starts_with("## ") {
            if is_heading_line(line, heading) {
                in_target = true;
                out.push(line.to_string());
                out.push(body.trim_end().to_string());
                continue;
            }
            in_target = false;
        }
        if !in_target {
            out.push(line.to_string());
        }
    }
    Ok(out.join("\n"))
}

/// Diagnostics for required-heading violations: missing headings and
/// duplicates, one message per offence.
pub fn heading_errors(content: &str) -> Vec<String> {
    let mut errors = Vec::new();
    for heading in REQUIRED_HEADINGS {
        match heading_count(content, heading) {
            0 => errors.push(format!("Missing required heading: {heading}")),
            1 => {}
            count => errors.push(format!("Duplicate heading: {heading} (found {count} times)")),
        }
    }
    errors
}

/// Initial plan document for a new epic. Free-form; sections are a
/// starting point, not a schema.
pub fn epic_plan_template(id: EpicId, title: &str) -> String {
    format!(
        "# {id} {title}\n\
         \n\
         ## Overview\n\
         TBD\n\
         \n\
         ## Scope\n\
         TBD\n\
         \n\
         ## Approach\n\
         TBD\n\
         \n\
         ## Quick commands\n\
         <!-- Required: at least one smoke command for the repo -->\n\
         - `# e.g., cargo test, npm test, make test`\n\
         \n\
         ## Acceptance\n\
         - [ ] TBD\n\
         \n\
         ## References\n\
         - TBD\n"
    )
}

/// Initial spec for a new task, containing each required heading exactly
/// once. The Evidence section is pre-seeded with the three labeled lines
/// that `done` fills in.
pub fn task_spec_template(id: TaskId, title: &str, acceptance: Option<&str>) -> String {
    let acceptance = acceptance.unwrap_or("- [ ] TBD");
    format!(
        "# {id} {title}\n\
         \n\
         {DESCRIPTION_HEADING}\n\
         TBD\n\
         \n\
         {ACCEPTANCE_HEADING}\n\
         {acceptance}\n\
         \n\
         {DONE_SUMMARY_HEADING}\n\
         TBD\n\
         \n\
         {EVIDENCE_HEADING}\n\
         - Commits:\n\
         - Tests:\n\
         - PRs:\n"
    )
}
