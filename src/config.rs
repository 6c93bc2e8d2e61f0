use std::path::Path;

use anyhow::Context;
use config::{Config, Environment, File};
use sc_detection::DetectionConfig;
use sc_pipeline::{DisplayConfig, InferenceConfig, PipelineConfig, PlatformConfig, SourceConfig};
use sc_smart_record::SmartRecordConfig;
use serde::Deserialize;

/// Prefix of environment variables that override the config file, e.g.
/// `SMARTCAM_RECORD__COOLDOWN_SEC=30`.
pub const ENV_PREFIX: &str = "SMARTCAM";

#[derive(Clone, Debug, Deserialize)]
pub struct SmartcamConfig {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub platform: PlatformConfig,

    pub inference: InferenceConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub record: SmartRecordConfig,

    #[serde(default)]
    pub display: DisplayConfig,
}

impl SmartcamConfig {
    pub fn read_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut c = Config::new();

        c.merge(File::from(path.as_ref()))
            .context("failed to read config file")?;
        c.merge(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .context("failed to read config from environment")?;

        let config: Self = c.try_into().context("invalid config")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.pipeline().validate()?;
        self.record.validate()
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            source: self.source.clone(),
            platform: self.platform.clone(),
            inference: self.inference.clone(),
            detection: self.detection.clone(),
            display: self.display.clone(),
        }
    }
}
