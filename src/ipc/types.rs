use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(id: impl Into<String>, method: &str, params: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            workspace: None,
            db: None,
        }
    }
}
