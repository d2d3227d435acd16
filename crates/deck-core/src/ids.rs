//! Epic and task identifiers.
//!
//! Canonical forms are `E-<N>` for epics and `E-<N>.<M>` for tasks, with
//! both numbers starting at 1. New numbers are allocated by scanning the
//! files already on disk rather than trusting a stored counter: two actors
//! working on divergent branches only collide when their scans saw the
//! same maximum, which is strictly less likely than sharing a counter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Identifier prefix used throughout the workspace.
pub const ID_PREFIX: &str = "E-";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("invalid epic ID: {0}. Expected format: {ID_PREFIX}N")]
    InvalidEpic(String),
    #[error("invalid task ID: {0}. Expected format: {ID_PREFIX}N.M")]
    InvalidTask(String),
    #[error("invalid ID: {0}. Expected format: {ID_PREFIX}N (epic) or {ID_PREFIX}N.M (task)")]
    Invalid(String),
}

/// An epic identifier (`E-N`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EpicId(u32);

impl EpicId {
    pub fn new(number: u32) -> Self {
        Self(number)
    }

    pub fn number(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EpicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ID_PREFIX}{}", self.0)
    }
}

impl FromStr for EpicId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_epic(s).ok_or_else(|| IdError::InvalidEpic(s.to_string()))
    }
}

impl TryFrom<String> for EpicId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EpicId> for String {
    fn from(id: EpicId) -> Self {
        id.to_string()
    }
}

/// A task identifier (`E-N.M`). The epic component always names the
/// task's parent epic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId {
    epic: u32,
    task: u32,
}

impl TaskId {
    pub fn new(epic: EpicId, task: u32) -> Self {
        Self {
            epic: epic.number(),
            task,
        }
    }

    pub fn epic(self) -> EpicId {
        EpicId(self.epic)
    }

    pub fn number(self) -> u32 {
        self.task
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ID_PREFIX}{}.{}", self.epic, self.task)
    }
}

impl FromStr for TaskId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_task(s).ok_or_else(|| IdError::InvalidTask(s.to_string()))
    }
}

impl TryFrom<String> for TaskId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.to_string()
    }
}

/// Either kind of identifier, for commands that accept both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ident {
    Epic(EpicId),
    Task(TaskId),
}

impl FromStr for Ident {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(epic) = parse_epic(s) {
            return Ok(Self::Epic(epic));
        }
        if let Some(task) = parse_task(s) {
            return Ok(Self::Task(task));
        }
        Err(IdError::Invalid(s.to_string()))
    }
}

fn parse_number(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u32 = s.parse().ok()?;
    (n >= 1).then_some(n)
}

fn parse_epic(s: &str) -> Option<EpicId> {
    let rest = s.strip_prefix(ID_PREFIX)?;
    parse_number(rest).map(EpicId)
}

fn parse_task(s: &str) -> Option<TaskId> {
    let rest = s.strip_prefix(ID_PREFIX)?;
    let (epic, task) = rest.split_once('.')?;
    Some(TaskId {
        epic: parse_number(epic)?,
        task: parse_number(task)?,
    })
}

/// Next epic number: one past the highest `E-N.json` in the epics
/// directory, or 1 when none exist. Holes left by merges are never
/// refilled, so identifiers stay unique across branch history.
pub fn next_epic_number(epics_dir: &Path) -> std::io::Result<u32> {
    let mut max = 0;
    for entry in read_dir_or_empty(epics_dir)? {
        let entry = entry?;
        if let Some(id) = json_stem(&entry.file_name()).and_then(parse_epic) {
            max = max.max(id.number());
        }
    }
    Ok(max + 1)
}

/// Next task number under an epic: one past the highest `E-N.M.json`
/// whose epic component matches, or 1 when none exist.
pub fn next_task_number(tasks_dir: &Path, epic: EpicId) -> std::io::Result<u32> {
    let mut max = 0;
    for entry in read_dir_or_empty(tasks_dir)? {
        let entry = entry?;
        if let Some(id) = json_stem(&entry.file_name()).and_then(parse_task) {
            if id.epic() == epic {
                max = max.max(id.number());
            }
        }
    }
    Ok(max + 1)
}

fn read_dir_or_empty(
    dir: &Path,
) -> std::io::Result<Box<dyn Iterator<Item = std::io::Result<std::fs::DirEntry>>>> {
    match std::fs::read_dir(dir) {
        Ok(entries) => Ok(Box::new(entries)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Box::new(std::iter::empty())),
        Err(e) => Err(e),
    }
}

/// The `E-N` / `E-N.M` part of a `*.json` filename, if any.
fn json_stem(name: &std::ffi::OsStr) -> Option<&str> {
    name.to_str()?.strip_suffix(".json")
}
