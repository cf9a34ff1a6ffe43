//! Orchestrator configuration.
//!
//! Limits default to the documented product caps (10 simultaneous workers,
//! 100 queued tasks) but are ordinary policy constants loaded from
//! `~/.convoy/convoy.toml` when present.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::{clog_debug, Error, Result};

fn default_max_concurrent() -> usize {
    10
}

fn default_max_queued() -> usize {
    100
}

fn default_max_recursion_depth() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hard cap on simultaneously running tasks (worker slots).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Cap on admitted-but-not-terminal tasks across all batches.
    /// Submissions that would exceed it are rejected outright.
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
    /// Maximum nesting depth for child batches submitted by workers.
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: usize,
    /// Default per-task execution limit in seconds; tasks may override.
    /// None means no limit.
    pub default_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queued: default_max_queued(),
            max_recursion_depth: default_max_recursion_depth(),
            default_timeout_secs: None,
        }
    }
}

impl Config {
    pub fn convoy_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".convoy"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::convoy_dir()?.join("convoy.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        clog_debug!(
            "Config loaded: max_concurrent={}, max_queued={}, max_recursion_depth={}",
            config.max_concurrent,
            config.max_queued,
            config.max_recursion_depth
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let convoy_dir = Self::convoy_dir()?;
        if !convoy_dir.exists() {
            fs::create_dir_all(&convoy_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        clog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Config with explicit limits, for embedding and tests.
    pub fn with_limits(max_concurrent: usize, max_queued: usize) -> Self {
        Self {
            max_concurrent,
            max_queued,
            ..Self::default()
        }
    }
}
