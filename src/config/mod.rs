// Layered settings for the command line tool
use serde::Deserialize;
use std::path::{Path, PathBuf};
use config::{Config, ConfigError, Environment, File};

use crate::llm::backend::{DeviceSet, DeviceSpec};
use crate::llm::engine::SamplingParams;
use crate::llm::placement::{PlacementPolicy, PlacementStrategy};
use crate::llm::tensor::DType;

/// Configuration for how the model is materialised
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Element type weights are stored in (f16, bf16 or f32)
    pub dtype: DType,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { dtype: DType::F16 }
    }
}

/// Configuration for device placement
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PlacementConfig {
    /// auto, balanced or single:N
    pub strategy: String,
    /// Devices in fill order; empty means a single unbounded CPU device
    pub devices: Vec<DeviceSpec>,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self { strategy: "auto".to_string(), devices: Vec::new() }
    }
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Directory for the daily rolling log file
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), directory: PathBuf::from("logs") }
    }
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Sampling defaults for generation
    pub inference: SamplingParams,
    pub model: ModelConfig,
    pub placement: PlacementConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Loads settings in the following order of precedence (highest to lowest):
    /// 1. Environment variables prefixed with LLAMA_ (sections separated by `__`)
    /// 2. `local.toml` in the config directory, if present
    /// 3. `default.toml` in the config directory, if present
    /// 4. Built-in defaults
    pub fn load(config_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let config_dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()
                .map_err(|e| ConfigError::Message(format!("Failed to get current directory: {}", e)))?
                .join("config"),
        };

        let default_config = config_dir.join("default.toml");
        let local_config = config_dir.join("local.toml");

        let settings = Config::builder()
            .add_source(File::from(default_config).required(false))
            .add_source(File::from(local_config).required(false))
            .add_source(
                Environment::with_prefix("LLAMA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.inference
            .validate()
            .map_err(|e| ConfigError::Message(format!("[inference] {}", e)))?;

        self.strategy()?;

        if self.placement.devices.iter().any(|d| d.name.trim().is_empty()) {
            return Err(ConfigError::Message("Every placement device needs a name".to_string()));
        }
        if let Some(d) = self.placement.devices.iter().find(|d| d.max_memory_mb == Some(0)) {
            return Err(ConfigError::Message(format!(
                "Device '{}' has a zero memory budget",
                d.name
            )));
        }

        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(format!(
                "Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                self.logging.level
            ))),
        }
    }

    pub fn strategy(&self) -> Result<PlacementStrategy, ConfigError> {
        self.placement
            .strategy
            .parse()
            .map_err(|e| ConfigError::Message(format!("[placement] {}", e)))
    }

    pub fn placement_policy(&self) -> Result<Box<dyn PlacementPolicy>, ConfigError> {
        Ok(self.strategy()?.into_policy())
    }

    pub fn device_set(&self) -> DeviceSet {
        DeviceSet::from_specs(&self.placement.devices)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_defaults_without_files() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(Some(dir.path())).unwrap();

        assert_eq!(settings.inference, SamplingParams::default());
        assert_eq!(settings.model.dtype, DType::F16);
        assert_eq!(settings.placement.strategy, "auto");
        assert_eq!(settings.device_set().len(), 1);
    }

    #[test]
    fn test_local_overrides_default() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
[inference]
temperature = 0.6
max_gen_len = 64

[placement]
strategy = "balanced"

[[placement.devices]]
name = "cpu0"
max_memory_mb = 2048

[[placement.devices]]
name = "cpu1"
"#,
        )
        .unwrap();
        fs::write(dir.path().join("local.toml"), "[inference]\nmax_gen_len = 32\nseed = 7\n").unwrap();

        let settings = Settings::load(Some(dir.path())).unwrap();
        assert_eq!(settings.inference.max_gen_len, 32);
        assert_eq!(settings.inference.seed, Some(7));
        assert!((settings.inference.temperature - 0.6).abs() < 1e-6);
        assert_eq!(settings.strategy().unwrap(), PlacementStrategy::Balanced);

        let devices = settings.device_set().infos();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].memory_limit, Some(2048 * 1024 * 1024));
        assert_eq!(devices[1].memory_limit, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "[inference]\ntop_p = 1.5\n").unwrap();
        assert!(Settings::load(Some(dir.path())).is_err());

        fs::write(dir.path().join("default.toml"), "[placement]\nstrategy = \"spread\"\n").unwrap();
        assert!(Settings::load(Some(dir.path())).is_err());

        fs::write(dir.path().join("default.toml"), "[logging]\nlevel = \"loud\"\n").unwrap();
        assert!(Settings::load(Some(dir.path())).is_err());
    }
}
