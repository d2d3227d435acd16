//! Actor identity for soft-claim attribution.
//!
//! Resolution never fails; the weakest fallback is the literal `unknown`.

use std::path::Path;
use std::process::Command;

/// Environment override for the actor identity.
pub const ACTOR_ENV: &str = "DECK_ACTOR";

/// Resolve the current actor. Priority:
///
/// 1. `DECK_ACTOR` env var
/// 2. `git config user.email`
/// 3. `git config user.name`
/// 4. `USER` env var
/// 5. `"unknown"`
pub fn resolve(repo_root: &Path) -> String {
    if let Some(actor) = nonempty_env(ACTOR_ENV) {
        return actor;
    }
    if let Some(email) = git_config(repo_root, "user.email") {
        return email;
    }
    if let Some(name) = git_config(repo_root, "user.name") {
        return name;
    }
    if let Some(user) = nonempty_env("USER") {
        return user;
    }
    "unknown".to_string()
}

fn nonempty_env(key: &str) -> Option<String> {
    let value = std::env::var(key).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn git_config(repo_root: &Path, key: &str) -> Option<String> {
    let output = Command::new("git")
        .args(["config", key])
        .current_dir(repo_root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8(output.stdout).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
