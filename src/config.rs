//! Feed configuration.
//!
//! Constants of the pool and prefetch pipeline, loaded from JSON. Missing
//! fields fall back to the defaults of the mobile clients.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::edge_scroll::Axis;
use crate::error::ConfigError;

/// Environment variable naming a JSON config file
pub const CONFIG_ENV: &str = "REELPOOL_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Number of native players (N)
    pub pool_capacity: usize,
    /// Slots prefetch may never occupy
    pub visible_slots_reserved: usize,
    pub thumbnail_lookahead: usize,
    pub media_lookahead: usize,
    /// Positions behind the current one whose prefetched handles survive
    pub trailing_keep: usize,
    /// Concurrent prefetch loads (1 = strictly serial queue)
    pub max_inflight_prefetch: usize,
    pub thumbnail_cache_size: usize,
    /// Deferred event queue bound of the event bus
    pub event_queue_limit: usize,
    pub axis: Axis,
    /// Restart the visible item from zero when it ends
    pub loop_playback: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 3,
            visible_slots_reserved: 1,
            thumbnail_lookahead: 4,
            media_lookahead: 4,
            trailing_keep: 4,
            max_inflight_prefetch: 4,
            thumbnail_cache_size: 64,
            event_queue_limit: 1000,
            axis: Axis::Vertical,
            loop_playback: true,
        }
    }
}

impl FeedConfig {
    /// Check structural constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_capacity == 0 {
            return Err(ConfigError::Invalid("pool_capacity must be >= 1".into()));
        }
        if self.visible_slots_reserved == 0 {
            return Err(ConfigError::Invalid("visible_slots_reserved must be >= 1".into()));
        }
        if self.visible_slots_reserved > self.pool_capacity {
            return Err(ConfigError::Invalid(format!(
                "visible_slots_reserved ({}) exceeds pool_capacity ({})",
                self.visible_slots_reserved, self.pool_capacity
            )));
        }
        if self.max_inflight_prefetch == 0 {
            return Err(ConfigError::Invalid("max_inflight_prefetch must be >= 1".into()));
        }
        if self.thumbnail_cache_size == 0 {
            return Err(ConfigError::Invalid("thumbnail_cache_size must be >= 1".into()));
        }
        if self.visible_slots_reserved == self.pool_capacity {
            info!(
                "FeedConfig: all {} slots reserved for visible playback, media prefetch disabled",
                self.pool_capacity
            );
        }
        Ok(())
    }

    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        debug!("FeedConfig: loaded {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: FeedConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve config from CLI path, then `REELPOOL_CONFIG`, then defaults.
    pub fn from_env_and_cli(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_ENV).ok();
        Self::resolve(cli_path, env_path)
    }

    /// Same as `from_env_and_cli` with the environment value passed in.
    pub fn resolve(cli_path: Option<PathBuf>, env_path: Option<String>) -> Result<Self, ConfigError> {
        let path = cli_path.or_else(|| env_path.filter(|p| !p.is_empty()).map(PathBuf::from));
        match path {
            Some(path) => Self::load(&path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }
}
