//! Operational configuration for the cycle orchestrator and query engine.
//!
//! Grounded on `core::config::Config`: a top-level struct of sub-configs,
//! each with a `Default` impl, loaded from TOML with environment overrides
//! and validated once at startup.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cycle orchestrator tuning.
    pub cycle: CycleConfig,
    /// Query engine tuning.
    pub query: QueryConfig,
}

/// Cycle orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// `"wall_clock"` or `"fixed_step"`. Fixed-step is for deterministic
    /// tests and demos; production use wants wall-clock.
    pub version_minting_mode: String,
    /// Starting version for a fixed-step minter.
    pub fixed_step_start: u64,
}

/// Query engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Worker count for the parallel scan variant (0 = auto-detect).
    pub worker_count: usize,
    /// Ordinals per work-stealing chunk.
    pub chunk_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self { cycle: CycleConfig::default(), query: QueryConfig::default() }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self { version_minting_mode: "wall_clock".to_string(), fixed_step_start: 1 }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { worker_count: 0, chunk_size: crate::query::CHUNK_SIZE }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults if `path` is
    /// `None` or doesn't exist, then applying environment overrides.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) if Path::new(p).exists() => {
                let loaded = Self::from_file(p)?;
                tracing::info!("loaded configuration from {}", p);
                loaded
            }
            Some(p) => {
                tracing::warn!("config file {} not found, using defaults", p);
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::config(format!("failed to parse config file: {}", e)))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(mode) = std::env::var("COLONNADE_VERSION_MINTING_MODE") {
            self.cycle.version_minting_mode = mode;
        }
        if let Ok(workers) = std::env::var("COLONNADE_QUERY_WORKERS") {
            self.query.worker_count = workers.parse().map_err(|_| Error::config("invalid COLONNADE_QUERY_WORKERS"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        match self.cycle.version_minting_mode.as_str() {
            "wall_clock" | "fixed_step" => {}
            other => return Err(Error::config(format!("unknown version minting mode: {}", other))),
        }
        if self.query.chunk_size == 0 {
            return Err(Error::config("query.chunk_size must be nonzero"));
        }
        Ok(())
    }

    /// Resolved worker count, auto-detecting from available parallelism when
    /// `worker_count` is zero.
    pub fn resolved_worker_count(&self) -> usize {
        if self.query.worker_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.query.worker_count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert_eq!(config.cycle.version_minting_mode, "wall_clock");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_or_default(Some("/nonexistent/colonnade.toml")).unwrap();
        assert_eq!(config.query.chunk_size, crate::query::CHUNK_SIZE);
    }

    #[test]
    fn bad_mode_rejected() {
        let mut config = Config::default();
        config.cycle.version_minting_mode = "nonsense".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colonnade.toml");
        std::fs::write(&path, "[cycle]\nversion_minting_mode = \"fixed_step\"\nfixed_step_start = 7\n\n[query]\nworker_count = 4\nchunk_size = 512\n").unwrap();

        let config = Config::load_or_default(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.cycle.version_minting_mode, "fixed_step");
        assert_eq!(config.cycle.fixed_step_start, 7);
        assert_eq!(config.query.worker_count, 4);
    }
}
