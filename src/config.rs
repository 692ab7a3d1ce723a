//! Economy tuning knobs.
//!
//! Defaults carry the hand-tuned values the engine ships with; deployments
//! override them from a JSON profile.

use serde::Deserialize;
use thiserror::Error;

use crate::types::{FRAMES_PER_SEC, Frame};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid economy config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid economy config: {0}")]
    Invalid(&'static str),
}

/// Tunables for demand maintenance, assignment and the watchdog.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EconomyConfig {
    /// Low-tier generator count above which solar demand stops.
    pub solar_cap: u32,
    /// Mid-tier generator count above which fusion demand stops.
    pub fusion_cap: u32,
    /// Open solar tasks when `metal > ratio * energy`.
    pub solar_income_ratio: f32,
    /// Open fusion tasks when `metal > ratio * energy`.
    pub fusion_income_ratio: f32,
    /// Open production tasks while `builder_power < ratio * metal_income`.
    pub production_income_ratio: f32,
    /// Outstanding-demand gate: open tasks stay below `workers * this`.
    pub open_task_multiplier: usize,
    /// Factory production bucket stays below `factories * this`.
    pub factory_task_multiplier: usize,
    /// Assist turrets a factory is staffed with before a new one is wanted.
    pub nanos_per_factory: usize,
    /// Solar tasks opened at random fallback positions when no spot is left.
    pub fallback_solar_count: usize,
    /// Radius for the standard outward build-site search.
    pub site_search_radius: f32,
    /// Frames between maintenance evaluations.
    pub maintenance_interval: Frame,
    /// Seconds between watchdog sweeps.
    pub watchdog_period_sec: Frame,
    /// Seconds an assist fallback may run before the watchdog frees the
    /// worker.
    pub assist_timeout_sec: Frame,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            solar_cap: 16,
            fusion_cap: 5,
            solar_income_ratio: 0.8,
            fusion_income_ratio: 0.2,
            production_income_ratio: 1.5,
            open_task_multiplier: 2,
            factory_task_multiplier: 2,
            nanos_per_factory: 4,
            fallback_solar_count: 2,
            site_search_radius: 800.0,
            maintenance_interval: 4,
            watchdog_period_sec: 8,
            assist_timeout_sec: 20,
        }
    }
}

impl EconomyConfig {
    /// Parse a JSON profile; absent fields keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.open_task_multiplier == 0 {
            return Err(ConfigError::Invalid("open_task_multiplier must be > 0"));
        }
        if self.maintenance_interval <= 0 {
            return Err(ConfigError::Invalid("maintenance_interval must be > 0"));
        }
        if self.watchdog_period_sec <= 0 {
            return Err(ConfigError::Invalid("watchdog_period_sec must be > 0"));
        }
        if self.site_search_radius <= 0.0 {
            return Err(ConfigError::Invalid("site_search_radius must be > 0"));
        }
        Ok(())
    }

    /// Assist fallback timeout in frames.
    pub fn assist_timeout_frames(&self) -> Frame {
        self.assist_timeout_sec * FRAMES_PER_SEC
    }

    /// Watchdog sweep interval in frames.
    pub fn watchdog_period_frames(&self) -> Frame {
        self.watchdog_period_sec * FRAMES_PER_SEC
    }
}
