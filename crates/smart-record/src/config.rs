use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use sc_deepstream::ContainerType;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Mkv,
}

impl From<Container> for ContainerType {
    fn from(container: Container) -> Self {
        match container {
            Container::Mp4 => ContainerType::Mp4,
            Container::Mkv => ContainerType::Mkv,
        }
    }
}

/// H.264 settings for the branch that feeds the recordbin.
#[derive(Clone, Debug, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    #[serde(default = "default_iframe_interval")]
    pub iframe_interval: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            bitrate: default_bitrate(),
            iframe_interval: default_iframe_interval(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SmartRecordConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Where clips are written. Relative paths are resolved against the
    /// working directory at startup.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Clip names start with `{file_prefix}{source_id}_`.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Seconds of encoded video kept in the ring buffer.
    #[serde(default = "default_cache_sec")]
    pub cache_sec: u32,

    /// Seconds before the trigger included in a clip.
    #[serde(default = "default_back_sec")]
    pub back_sec: u32,

    /// Seconds after the trigger included in a clip.
    #[serde(default = "default_front_sec")]
    pub front_sec: u32,

    /// Minimum time between two accepted starts for the same source. Zero
    /// disables the cooldown.
    #[serde(default = "default_cooldown_sec")]
    pub cooldown_sec: f64,

    /// Clip length used when a recording is started without a duration.
    #[serde(default = "default_duration_sec")]
    pub default_duration_sec: u32,

    #[serde(default)]
    pub container: Container,

    /// Start a clip automatically when a target becomes visible.
    #[serde(default = "default_true")]
    pub auto_trigger: bool,

    /// Write a `.json` file with the trigger label and timing next to each
    /// finished clip.
    #[serde(default = "default_true")]
    pub metadata: bool,

    #[serde(default)]
    pub encoder: EncoderConfig,
}

fn default_true() -> bool {
    true
}

fn default_dir() -> PathBuf {
    PathBuf::from("SmartRecDir")
}

fn default_file_prefix() -> String {
    "cam".to_owned()
}

fn default_cache_sec() -> u32 {
    60
}

fn default_back_sec() -> u32 {
    10
}

fn default_front_sec() -> u32 {
    10
}

fn default_cooldown_sec() -> f64 {
    60.0
}

fn default_duration_sec() -> u32 {
    10
}

fn default_bitrate() -> u32 {
    8_000_000
}

fn default_iframe_interval() -> u32 {
    30
}

impl Default for SmartRecordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_dir(),
            file_prefix: default_file_prefix(),
            cache_sec: default_cache_sec(),
            back_sec: default_back_sec(),
            front_sec: default_front_sec(),
            cooldown_sec: default_cooldown_sec(),
            default_duration_sec: default_duration_sec(),
            container: Container::default(),
            auto_trigger: true,
            metadata: true,
            encoder: EncoderConfig::default(),
        }
    }
}

impl SmartRecordConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache_sec == 0 {
            bail!("record.cache_sec must be greater than zero");
        }

        if self.back_sec > self.cache_sec {
            bail!(
                "record.back_sec ({}) cannot exceed record.cache_sec ({})",
                self.back_sec,
                self.cache_sec
            );
        }

        if self.front_sec == 0 {
            bail!("record.front_sec must be greater than zero");
        }

        if !self.cooldown_sec.is_finite() || self.cooldown_sec < 0.0 {
            bail!("record.cooldown_sec must be a non-negative number");
        }

        if self.file_prefix.contains('/') {
            bail!("record.file_prefix cannot contain '/'");
        }

        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_sec.max(0.0))
    }

    pub fn prefix_for(&self, source_id: u32) -> String {
        format!("{}{}_", self.file_prefix, source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_demo() {
        let config = SmartRecordConfig::default();

        assert_eq!(config.dir, PathBuf::from("SmartRecDir"));
        assert_eq!(config.cache_sec, 60);
        assert_eq!(config.back_sec, 10);
        assert_eq!(config.front_sec, 10);
        assert_eq!(config.cooldown(), Duration::from_secs(60));
        assert_eq!(config.encoder.bitrate, 8_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn prefix_includes_source() {
        let config = SmartRecordConfig::default();
        assert_eq!(config.prefix_for(0), "cam0_");
        assert_eq!(config.prefix_for(12), "cam12_");
    }

    #[test]
    fn back_longer_than_cache_is_rejected() {
        let config = SmartRecordConfig {
            cache_sec: 5,
            back_sec: 10,
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("back_sec"));
    }

    #[test]
    fn zero_front_is_rejected() {
        let config = SmartRecordConfig {
            front_sec: 0,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_cooldown_is_rejected() {
        let config = SmartRecordConfig {
            cooldown_sec: -1.0,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn container_maps_to_native() {
        assert_eq!(ContainerType::from(Container::Mp4), ContainerType::Mp4);
        assert_eq!(ContainerType::from(Container::Mkv), ContainerType::Mkv);
    }
}
