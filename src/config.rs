use std::env;
use std::path::PathBuf;

use anyhow::Result;

use crate::activity::{AggregatorConfig, UserId, DEFAULT_PREVIEW_LIMIT};

/// Which document store backend to use.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    /// SQLite file at `db_path` (default)
    Sqlite,
    /// In-process store; nothing survives the process. Useful with `replay`.
    Memory,
}

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// The signed-in user (VISIO_USER_ID). Commands that act "as" someone need it.
    pub user_id: Option<UserId>,
    /// Max message previews per summary. Counts are never capped.
    pub preview_limit: usize,
    pub backend: StoreBackend,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything has a default except the user id, which is only checked by
    /// commands that need one.
    pub fn load() -> Result<Self> {
        let backend = match env::var("VISIO_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("sqlite") | Err(_) => StoreBackend::Sqlite,
            Ok(other) => anyhow::bail!(
                "Unknown VISIO_BACKEND '{other}'. Expected 'sqlite' or 'memory'."
            ),
        };

        let preview_limit = match env::var("VISIO_PREVIEW_LIMIT") {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|_| {
                anyhow::anyhow!("VISIO_PREVIEW_LIMIT must be a non-negative integer, got '{raw}'")
            })?,
            Err(_) => DEFAULT_PREVIEW_LIMIT,
        };

        let user_id = env::var("VISIO_USER_ID")
            .ok()
            .map(UserId::new)
            .filter(|u| !u.is_empty());

        Ok(Self {
            db_path: env::var("VISIO_DB_PATH").unwrap_or_else(|_| default_db_path()),
            user_id,
            preview_limit,
            backend,
        })
    }

    /// The configured user, or an error telling how to set one.
    /// An explicit `--user` flag wins over the environment.
    pub fn require_user(&self, explicit: Option<&str>) -> Result<UserId> {
        if let Some(user) = explicit.map(UserId::from).filter(|u| !u.is_empty()) {
            user.validate()?;
            return Ok(user);
        }
        match &self.user_id {
            Some(user) => {
                user.validate()
                    .map_err(|e| anyhow::anyhow!("VISIO_USER_ID is not usable: {e}"))?;
                Ok(user.clone())
            }
            None => anyhow::bail!(
                "No user given. Pass --user or set VISIO_USER_ID in your .env file."
            ),
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            preview_limit: self.preview_limit,
        }
    }
}

/// `<data dir>/visio/visio.db`, or `./visio.db` when the platform has no data dir.
fn default_db_path() -> String {
    dirs::data_dir()
        .map(|dir| dir.join("visio").join("visio.db"))
        .unwrap_or_else(|| PathBuf::from("./visio.db"))
        .to_string_lossy()
        .into_owned()
}
