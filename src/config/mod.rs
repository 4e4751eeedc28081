//! Configuration module for swingscope.
//!
//! This module provides structured configuration loading from environment variables,
//! organized by concern: Aggregation, Detection, Pipeline and Storage.

mod detection_config;
mod pipeline_config;

pub use detection_config::{DetectionEnvConfig, DoublePatternConfig, PivotConfig, VcpConfig};
pub use pipeline_config::{AggregationConfig, PipelineEnvConfig, StorageEnvConfig};

use anyhow::{Context, Result};

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub aggregation: AggregationConfig,
    pub detection: DetectionEnvConfig,
    pub pipeline: PipelineEnvConfig,
    pub storage: StorageEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let aggregation =
            AggregationConfig::from_env().context("Failed to load aggregation config")?;
        let config = Self {
            aggregation,
            detection: DetectionEnvConfig::from_env(),
            pipeline: PipelineEnvConfig::from_env(),
            storage: StorageEnvConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.aggregation
            .validate()
            .context("Invalid aggregation config")?;
        self.detection
            .validate()
            .context("Invalid detection config")?;
        self.pipeline.validate().context("Invalid pipeline config")?;
        Ok(())
    }
}
