//! Hierarchical key/value configuration.
//!
//! The tree lives in `config.json` and is addressed by dotted paths like
//! `memory.enabled`. Reads are lenient: a missing or corrupt file behaves
//! like the defaults, and unknown keys fall back to the caller's default.

use crate::storage::{self, WriteError};
use crate::workspace::Workspace;
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Default configuration written at init.
pub fn default_config() -> Value {
    json!({ "memory": { "enabled": false } })
}

/// The whole config tree, falling back to defaults when the file is
/// missing or unreadable.
pub fn load(ws: &Workspace) -> Value {
    match storage::read_json::<Value>(&ws.config_path()) {
        Ok(Value::Object(map)) => Value::Object(map),
        _ => default_config(),
    }
}

/// Value at a dotted path, or `None` when any segment is absent.
pub fn get(ws: &Workspace, key: &str) -> Option<Value> {
    let mut current = load(ws);
    for part in key.split('.') {
        current = current.get(part)?.clone();
    }
    Some(current)
}

/// Set a dotted path, creating intermediate objects as needed, and
/// persist the whole tree atomically. Returns the stored value.
///
/// String inputs of `true`/`false` or all digits are coerced to the
/// typed value.
pub fn set(ws: &Workspace, key: &str, raw: &str) -> Result<Value, ConfigError> {
    let value = coerce(raw);
    let mut config = match load(ws) {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    {
        let mut current = &mut config;
        let mut parts = key.split('.').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                current.insert(part.to_string(), value.clone());
                break;
            }
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(map) = entry else { break };
            current = map;
        }
    }

    storage::write_json_atomic(&ws.config_path(), &Value::Object(config))?;
    Ok(value)
}

fn coerce(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = raw.parse::<u64>() {
            return json!(n);
        }
    }
    Value::String(raw.to_string())
}
