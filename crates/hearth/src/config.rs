//! Demo configuration: engine and task pool settings in one TOML file.
//!
//! ```toml
//! frames = 600
//! orbiters = 8
//!
//! [engine]
//! barrier_timeout_ms = 250
//!
//! [engine.timestep]
//! mode = "fixed"
//! tick_rate = 60
//! max_catch_up = 5
//!
//! [tasks]
//! workers = 2
//! ```

use std::path::Path;

use hearth_core::{EngineConfig, EngineError};
use hearth_tasks::{TaskError, TaskSchedulerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that end the demo.
#[derive(Error, Debug)]
pub enum DemoError {
    /// The config file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was requested.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`DemoConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Bad command line.
    #[error("{0}")]
    Usage(String),

    /// Engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Task pool failure.
    #[error(transparent)]
    Tasks(#[from] TaskError),
}

/// Top-level demo settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Frames to run before exiting.
    pub frames: u64,
    /// Orbiting entities in the scene.
    pub orbiters: u32,
    /// Frame scheduler settings.
    pub engine: EngineConfig,
    /// Task pool settings.
    pub tasks: TaskSchedulerConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frames: 300,
            orbiters: 6,
            engine: EngineConfig::default(),
            tasks: TaskSchedulerConfig::default(),
        }
    }
}

impl DemoConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, DemoError> {
        let config: Self = toml::from_str(text)?;
        config.engine.validate()?;
        config.tasks.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, DemoError> {
        let text = std::fs::read_to_string(path).map_err(|source| DemoError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::TimestepConfig;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(DemoConfig::from_toml_str("").unwrap(), DemoConfig::default());
    }

    #[test]
    fn test_nested_sections() {
        let config = DemoConfig::from_toml_str(
            r#"
            frames = 10

            [engine.timestep]
            mode = "variable"
            max_delta_ms = 40

            [tasks]
            workers = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.frames, 10);
        assert_eq!(config.engine.timestep, TimestepConfig::Variable { max_delta_ms: 40 });
        assert_eq!(config.tasks.workers, Some(2));
    }

    #[test]
    fn test_invalid_sections_rejected() {
        assert!(matches!(
            DemoConfig::from_toml_str("[tasks]\nworkers = 0"),
            Err(DemoError::Tasks(TaskError::InvalidConfig(_)))
        ));
        assert!(matches!(
            DemoConfig::from_toml_str("[engine]\nbarrier_timeout_ms = 0"),
            Err(DemoError::Engine(EngineError::InvalidConfig(_)))
        ));
        assert!(matches!(DemoConfig::from_toml_str("frames = \"x\""), Err(DemoError::Parse(_))));
    }
}
