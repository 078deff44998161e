//! Persisted engine settings: load/save/normalize against an XDG config
//! path, plus resolving the XDG state dir `snapshot.rs` persists job
//! snapshots under.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
    #[serde(default = "default_max_thread_workers")]
    pub max_thread_workers: usize,
    #[serde(default)]
    pub distributed_endpoint: Option<String>,
    #[serde(default = "default_tick_ms")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    /// Log a failed job's error via `tracing::error!` when it terminates.
    #[serde(default = "default_print_traceback")]
    pub print_traceback: bool,
}

fn default_max_jobs() -> usize {
    EngineConfig::DEFAULT_MAX_JOBS
}

fn default_max_thread_workers() -> usize {
    EngineConfig::DEFAULT_MAX_THREAD_WORKERS
}

fn default_tick_ms() -> u64 {
    EngineConfig::DEFAULT_TICK_INTERVAL.as_millis() as u64
}

fn default_print_traceback() -> bool {
    EngineConfig::DEFAULT_PRINT_TRACEBACK
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_jobs: default_max_jobs(),
            max_thread_workers: default_max_thread_workers(),
            distributed_endpoint: None,
            tick_interval_ms: default_tick_ms(),
            snapshot_dir: None,
            print_traceback: default_print_traceback(),
        }
    }
}

impl Settings {
    fn normalize(&mut self) {
        if self.max_jobs == 0 {
            self.max_jobs = default_max_jobs();
        }
        if self.max_thread_workers == 0 {
            self.max_thread_workers = default_max_thread_workers();
        }
        self.distributed_endpoint = self
            .distributed_endpoint
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
    }

    /// Apply `JOBQ_*` environment variable overrides on top of a loaded or
    /// default config, mirroring the override-after-load shape common in
    /// the pack's config loaders.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("JOBQ_MAX_JOBS") {
            if let Ok(n) = v.parse() {
                self.max_jobs = n;
            }
        }
        if let Ok(v) = std::env::var("JOBQ_MAX_THREAD_WORKERS") {
            if let Ok(n) = v.parse() {
                self.max_thread_workers = n;
            }
        }
        if let Ok(v) = std::env::var("JOBQ_DISTRIBUTED_ENDPOINT") {
            self.distributed_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("JOBQ_PRINT_TRACEBACK") {
            if let Ok(b) = v.parse() {
                self.print_traceback = b;
            }
        }
        self.normalize();
    }

    pub fn into_engine_config(self) -> EngineConfig {
        EngineConfig {
            max_jobs: self.max_jobs,
            max_jobs_per_kind: std::collections::HashMap::new(),
            max_thread_workers: self.max_thread_workers,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            distributed_endpoint: self.distributed_endpoint,
            distributed_poll_interval: EngineConfig::DEFAULT_DISTRIBUTED_POLL_INTERVAL,
            print_traceback: self.print_traceback,
        }
    }

    pub fn snapshot_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.snapshot_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(xdg_state_home()?.join("jobq").join("snapshots")),
        }
    }
}

fn xdg_config_home() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        let dir = PathBuf::from(dir);
        if dir.as_os_str().is_empty() {
            anyhow::bail!("XDG_CONFIG_HOME is set but empty");
        }
        return Ok(dir);
    }
    let home = std::env::var_os("HOME").ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(home).join(".config"))
}

fn xdg_state_home() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_STATE_HOME") {
        let dir = PathBuf::from(dir);
        if dir.as_os_str().is_empty() {
            anyhow::bail!("XDG_STATE_HOME is set but empty");
        }
        return Ok(dir);
    }
    let home = std::env::var_os("HOME").ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(home).join(".local").join("state"))
}

pub fn settings_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_home()?.join("jobq").join("config.json"))
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let path = settings_path()?;
    if !path.exists() {
        let mut settings = Settings::default();
        settings.apply_env_overrides();
        return Ok(settings);
    }
    let raw = std::fs::read_to_string(&path)?;
    let mut settings: Settings = serde_json::from_str(&raw)?;
    settings.normalize();
    settings.apply_env_overrides();
    Ok(settings)
}

pub fn save_settings(settings: &Settings) -> anyhow::Result<()> {
    let path = settings_path()?;
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid settings path: {}", path.display()))?;
    std::fs::create_dir_all(dir)?;

    let mut settings = settings.clone();
    settings.normalize();

    let json = serde_json::to_string_pretty(&settings)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_pool_sizes_fall_back_to_defaults() {
        let mut settings = Settings {
            max_jobs: 0,
            max_thread_workers: 0,
            ..Settings::default()
        };
        settings.normalize();
        assert_eq!(settings.max_jobs, default_max_jobs());
        assert_eq!(settings.max_thread_workers, default_max_thread_workers());
    }

    #[test]
    fn blank_distributed_endpoint_normalizes_to_none() {
        let mut settings = Settings {
            distributed_endpoint: Some("   ".to_string()),
            ..Settings::default()
        };
        settings.normalize();
        assert_eq!(settings.distributed_endpoint, None);
    }
}
