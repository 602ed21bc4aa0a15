use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line: `{id, method, params}`. Params default to null so
/// parameterless calls can omit the field.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon state: the selected workspace directory and its open database.
/// Both are `None` until `workspace.select` succeeds.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
        }
    }
}
