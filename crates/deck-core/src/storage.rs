//! Atomic file persistence for the workspace.
//!
//! Every write goes through a temp file in the target's directory followed
//! by a rename, so outside observers only ever see the old content or the
//! new content. JSON is written with sorted keys and a trailing newline to
//! keep textual diffs minimal.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Why a file could not be loaded. Callers decide which categories to
/// surface and which to treat as "not there yet".
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("missing: {}", .path.display())]
    Missing { path: PathBuf },
    #[error("unreadable: {} ({source})", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid JSON: {} ({source})", .path.display())]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Missing { path } | Self::Unreadable { path, .. } | Self::InvalidJson { path, .. } => {
                path
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read a file as UTF-8 text.
pub fn read_text(path: &Path) -> Result<String, LoadError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(LoadError::Missing {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(LoadError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Read and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let content = read_text(path)?;
    serde_json::from_str(&content).map_err(|source| LoadError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a file atomically: temp file in the target's directory, full
/// content, flush, rename. A failed write never leaves a partial target;
/// the temp file is cleaned up on drop.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), WriteError> {
    let io_err = |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(content.as_bytes()).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Serialize a value and write it atomically as pretty JSON.
///
/// The value is routed through `serde_json::Value` first; its map type
/// keeps keys sorted, which pins the on-disk key order regardless of
/// struct field order.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), WriteError> {
    let ser_err = |source| WriteError::Serialize {
        path: path.to_path_buf(),
        source,
    };
    let tree = serde_json::to_value(value).map_err(ser_err)?;
    let mut content = serde_json::to_string_pretty(&tree).map_err(ser_err)?;
    content.push('\n');
    write_atomic(path, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Record {
        zebra: String,
        apple: u32,
    }

    #[test]
    fn read_missing_file_is_categorized() {
        let dir = TempDir::new().unwrap();
        let err = read_text(&dir.path().join("nope.txt")).unwrap_err();
        assert!(err.is_missing());
    }

    #[test]
    fn read_invalid_json_is_categorized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        let err = read_json::<Record>(&path).unwrap_err();
        assert!(matches!(err, LoadError::InvalidJson { .. }));
        assert_eq!(err.path(), path);
    }

    #[test]
    fn write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/file.txt");
        write_atomic(&path, "one").unwrap();
        write_atomic(&path, "two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    }

    #[test]
    fn write_atomic_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        write_atomic(&path, "content").unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("file.txt")]);
    }

    #[test]
    fn json_keys_are_sorted_with_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rec.json");
        let rec = Record {
            zebra: "z".to_string(),
            apple: 1,
        };
        write_json_atomic(&path, &rec).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with('\n'));
        let apple = content.find("\"apple\"").unwrap();
        let zebra = content.find("\"zebra\"").unwrap();
        assert!(apple < zebra);
        assert_eq!(read_json::<Record>(&path).unwrap(), rec);
    }

    #[test]
    fn rewrite_keeps_old_content_until_rename() {
        // The rename is the commit point; a reader opening the path mid-write
        // sees either the old or the new file, never a truncated one.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, "{\"v\": 1}\n").unwrap();
        let before = fs::read_to_string(&path).unwrap();
        write_atomic(&path, "{\"v\": 2}\n").unwrap();
        let after = fs::read_to_string(&path).unwrap();
        assert_eq!(before, "{\"v\": 1}\n");
        assert_eq!(after, "{\"v\": 2}\n");
    }
}
