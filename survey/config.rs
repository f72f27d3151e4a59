//! Run configuration.
//!
//! Every field has a default, so an empty TOML file (or no file at all)
//! reproduces the standard analysis. Command-line flags override the paths
//! and the seed after loading.

use crate::outliers::OutlierPolicy;
use crate::schema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub data_path: PathBuf,
    pub plot_path: PathBuf,
    /// Countries kept by the loader, in factor level order.
    pub countries: Vec<String>,
    /// Neighbours used by the imputer.
    pub neighbours: usize,
    /// Seed of the imputer's tie-breaking generator.
    pub seed: u64,
    /// Coefficient whose sign the outlier rule protects.
    pub focal_coefficient: String,
    pub plot_width: u32,
    pub plot_height: u32,
    // Last, so the TOML table follows the plain values.
    pub outlier_policy: OutlierPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data/survey.csv"),
            plot_path: PathBuf::from("output/residuals_by_motivation.png"),
            countries: schema::DEFAULT_COUNTRIES.iter().map(|c| c.to_string()).collect(),
            neighbours: 5,
            seed: 1234,
            focal_coefficient: format!("{}1", schema::REP_BINARY),
            plot_width: 2000,
            plot_height: 1400,
            outlier_policy: OutlierPolicy::Rule,
        }
    }
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.countries.len() < 2 {
            return Err(ConfigError::Invalid(
                "at least two countries are needed for country weights and clustering".to_string(),
            ));
        }
        if self.neighbours == 0 {
            return Err(ConfigError::Invalid("neighbours must be at least 1".to_string()));
        }
        if self.plot_width == 0 || self.plot_height == 0 {
            return Err(ConfigError::Invalid("plot size must be positive".to_string()));
        }
        Ok(())
    }
}
