//! Layered configuration: defaults, then `retiros.toml`, then `RETIROS_*`
//! environment variables.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "retiros.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Directory holding `retiros.sqlite3`. IPC clients may pick one later
    /// with `workspace.select`; `serve` requires it.
    #[serde(default)]
    pub workspace: Option<PathBuf>,

    /// `tracing` filter directive, used when `RUST_LOG` is unset.
    #[serde(default = "default_log")]
    pub log: String,

    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Worker threads; each owns its own database connection.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log: default_log(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            workers: default_workers(),
        }
    }
}

fn default_log() -> String {
    "info".into()
}
fn default_bind() -> String {
    "127.0.0.1:8000".into()
}
fn default_workers() -> usize {
    4
}

pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RETIROS_").split("__"))
}

/// Load configuration from `path` (or `retiros.toml`) and the environment.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let config: Config = figment(path).extract()?;
    if config.http.workers == 0 {
        anyhow::bail!("http.workers must be at least 1");
    }
    Ok(config)
}
