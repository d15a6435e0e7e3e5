//! # Engine Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! file is a valid configuration.
//!
//! ```toml
//! barrier_timeout_ms = 500
//! halt_on_system_error = false
//! frame_budget_ms = 16.6
//!
//! [timestep]
//! mode = "fixed"
//! tick_rate = 60
//! max_catch_up = 5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Highest fixed tick rate. The step is kept in whole microseconds.
pub const MAX_TICK_RATE: u32 = 1_000_000;

/// How the frame delta is produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimestepConfig {
    /// Constant step; falling behind runs up to `max_catch_up` steps at once.
    Fixed {
        /// Steps per second.
        tick_rate: u32,
        /// Most steps run back to back before excess time is dropped.
        max_catch_up: u32,
    },
    /// One step per frame with the measured delta.
    Variable {
        /// Upper clamp for the measured delta.
        max_delta_ms: u64,
    },
}

impl Default for TimestepConfig {
    fn default() -> Self {
        Self::Fixed {
            tick_rate: 60,
            max_catch_up: 5,
        }
    }
}

/// Frame scheduler configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timestep policy.
    pub timestep: TimestepConfig,
    /// Longest wait for concurrent Systems at the end of a frame.
    /// `None` waits forever.
    pub barrier_timeout_ms: Option<u64>,
    /// Stop `run` on the first frame with a System failure.
    pub halt_on_system_error: bool,
    /// Frames slower than this are logged. `None` disables the check.
    pub frame_budget_ms: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timestep: TimestepConfig::default(),
            barrier_timeout_ms: None,
            halt_on_system_error: false,
            frame_budget_ms: None,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on parse failure or an out-of-range value.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read or is invalid.
    pub fn load_from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> EngineResult<()> {
        match self.timestep {
            TimestepConfig::Fixed { tick_rate: 0, .. } => {
                return Err(EngineError::InvalidConfig("timestep.tick_rate must be > 0".into()));
            }
            TimestepConfig::Fixed { tick_rate, .. } if tick_rate > MAX_TICK_RATE => {
                return Err(EngineError::InvalidConfig(format!(
                    "timestep.tick_rate must be <= {MAX_TICK_RATE}, got {tick_rate}"
                )));
            }
            TimestepConfig::Fixed { max_catch_up: 0, .. } => {
                return Err(EngineError::InvalidConfig("timestep.max_catch_up must be > 0".into()));
            }
            TimestepConfig::Variable { max_delta_ms: 0 } => {
                return Err(EngineError::InvalidConfig("timestep.max_delta_ms must be > 0".into()));
            }
            _ => {}
        }
        if self.barrier_timeout_ms == Some(0) {
            return Err(EngineError::InvalidConfig("barrier_timeout_ms must be > 0".into()));
        }
        if let Some(budget) = self.frame_budget_ms {
            if !(budget.is_finite() && budget > 0.0) {
                return Err(EngineError::InvalidConfig("frame_budget_ms must be a positive number".into()));
            }
        }
        Ok(())
    }

    /// Barrier timeout as a duration.
    #[must_use]
    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout_ms.map(Duration::from_millis)
    }

    /// Frame budget as a duration.
    #[must_use]
    pub fn frame_budget(&self) -> Option<Duration> {
        self.frame_budget_ms.map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }
}
