//! Workspace location and layout.
//!
//! All state lives under `.deck/` at the repository root:
//!
//! ```text
//! .deck/
//!   meta.json        schema version (+ a legacy counter, never consulted)
//!   config.json      hierarchical config
//!   epics/E-N.json   epic records
//!   specs/E-N.md     epic plans
//!   tasks/E-N.M.json task records
//!   tasks/E-N.M.md   task specs
//!   memory/          narrative notes
//! ```
//!
//! The directory is owned exclusively by this tool; agents mutate it
//! through commands, never by editing files directly.

use crate::ids::{EpicId, TaskId};
use crate::storage::{self, LoadError, WriteError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

pub const WORKSPACE_DIR: &str = ".deck";
pub const META_FILE: &str = "meta.json";
pub const CONFIG_FILE: &str = "config.json";
pub const EPICS_DIR: &str = "epics";
pub const SPECS_DIR: &str = "specs";
pub const TASKS_DIR: &str = "tasks";
pub const MEMORY_DIR: &str = "memory";

pub const SCHEMA_VERSION: u32 = 2;
pub const SUPPORTED_SCHEMA_VERSIONS: [u32; 2] = [1, 2];

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("{WORKSPACE_DIR}/ does not exist. Run 'deckctl init' first.")]
    NotInitialized,
    #[error("unsupported schema_version {found} in {META_FILE} (supported: 1, 2)")]
    UnsupportedSchema { found: u32 },
    #[error("{META_FILE} {0}")]
    Meta(#[from] LoadError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Root record of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub schema_version: u32,
    /// Retained for older workspaces; allocation scans files instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_epic: Option<u32>,
}

pub fn is_supported_schema(version: u32) -> bool {
    SUPPORTED_SCHEMA_VERSIONS.contains(&version)
}

/// Result of `deckctl init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Created,
    AlreadyExists,
}

/// Result of `deckctl detect`.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub exists: bool,
    pub valid: bool,
    pub path: Option<String>,
    pub issues: Vec<String>,
}

/// A located workspace: the repository root plus the `.deck/` directory
/// under it. Constructing one does not touch the filesystem.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    dir: PathBuf,
}

impl Workspace {
    /// Workspace rooted at an explicit repository root.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let dir = root.join(WORKSPACE_DIR);
        Self { root, dir }
    }

    /// Locate the workspace from the current directory: the git toplevel
    /// when available, the current directory otherwise.
    pub fn locate() -> std::io::Result<Self> {
        Ok(Self::at(repo_root()?))
    }

    /// Locate the workspace and require it to be initialized with a
    /// supported schema.
    pub fn open() -> Result<Self, WorkspaceError> {
        let ws = Self::locate()?;
        if !ws.exists() {
            return Err(WorkspaceError::NotInitialized);
        }
        let meta: Meta = storage::read_json(&ws.meta_path())?;
        if !is_supported_schema(meta.schema_version) {
            return Err(WorkspaceError::UnsupportedSchema {
                found: meta.schema_version,
            });
        }
        Ok(ws)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.exists()
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn epics_dir(&self) -> PathBuf {
        self.dir.join(EPICS_DIR)
    }

    pub fn specs_dir(&self) -> PathBuf {
        self.dir.join(SPECS_DIR)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.dir.join(TASKS_DIR)
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.dir.join(MEMORY_DIR)
    }

    pub fn epic_json_path(&self, id: EpicId) -> PathBuf {
        self.epics_dir().join(format!("{id}.json"))
    }

    pub fn epic_spec_path(&self, id: EpicId) -> PathBuf {
        self.specs_dir().join(format!("{id}.md"))
    }

    /// Relative spec path as stored inside epic JSON.
    pub fn epic_spec_rel(&self, id: EpicId) -> String {
        format!("{WORKSPACE_DIR}/{SPECS_DIR}/{id}.md")
    }

    pub fn task_json_path(&self, id: TaskId) -> PathBuf {
        self.tasks_dir().join(format!("{id}.json"))
    }

    pub fn task_spec_path(&self, id: TaskId) -> PathBuf {
        self.tasks_dir().join(format!("{id}.md"))
    }

    /// Relative spec path as stored inside task JSON.
    pub fn task_spec_rel(&self, id: TaskId) -> String {
        format!("{WORKSPACE_DIR}/{TASKS_DIR}/{id}.md")
    }

    /// Create the directory layout, `meta.json`, and default config.
    /// A second call is a no-op.
    pub fn init(&self) -> Result<InitOutcome, WorkspaceError> {
        if self.exists() {
            return Ok(InitOutcome::AlreadyExists);
        }

        std::fs::create_dir_all(self.epics_dir())?;
        std::fs::create_dir_all(self.specs_dir())?;
        std::fs::create_dir_all(self.tasks_dir())?;
        std::fs::create_dir_all(self.memory_dir())?;

        let meta = Meta {
            schema_version: SCHEMA_VERSION,
            next_epic: Some(1),
        };
        storage::write_json_atomic(&self.meta_path(), &meta)?;
        storage::write_json_atomic(&self.config_path(), &crate::config::default_config())?;

        Ok(InitOutcome::Created)
    }

    /// Report presence and schema validity without failing.
    pub fn detect(&self) -> Detection {
        let exists = self.exists();
        let mut issues = Vec::new();

        if exists {
            match storage::read_json::<Meta>(&self.meta_path()) {
                Ok(meta) => {
                    if !is_supported_schema(meta.schema_version) {
                        issues.push(format!(
                            "schema_version unsupported (expected 1 or 2, got {})",
                            meta.schema_version
                        ));
                    }
                }
                Err(e) if e.is_missing() => issues.push(format!("{META_FILE} missing")),
                Err(e) => issues.push(format!("{META_FILE} {e}")),
            }

            for subdir in [EPICS_DIR, SPECS_DIR, TASKS_DIR, MEMORY_DIR] {
                if !self.dir.join(subdir).exists() {
                    issues.push(format!("{subdir}/ missing"));
                }
            }
        }

        Detection {
            exists,
            valid: exists && issues.is_empty(),
            path: exists.then(|| self.dir.display().to_string()),
            issues,
        }
    }
}

/// Git toplevel of the current directory, falling back to the current
/// directory outside a repository.
fn repo_root() -> std::io::Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .output();
    if let Ok(output) = output {
        if output.status.success() {
            if let Ok(path) = String::from_utf8(output.stdout) {
                let trimmed = path.trim();
                if !trimmed.is_empty() {
                    return Ok(PathBuf::from(trimmed));
                }
            }
        }
    }
    std::env::current_dir()
}
