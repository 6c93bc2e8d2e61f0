use std::path::PathBuf;

use anyhow::{bail, Context};
use sc_detection::DetectionConfig;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// V4L2 camera, decoded with `nvv4l2decoder`.
    #[default]
    Usb,
    /// Anything `nvurisrcbin` can open (rtsp, file, http).
    Uri,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,

    #[serde(default = "default_device")]
    pub device: String,

    /// Required when `kind` is `uri`.
    #[serde(default)]
    pub uri: Option<String>,

    /// Capture size for USB cameras and the muxer output size for every
    /// source.
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Request MJPEG from the camera and decode it on the GPU.
    #[serde(default = "default_true")]
    pub mjpeg: bool,
}

fn default_device() -> String {
    "/dev/video0".to_owned()
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_fps() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Usb,
            device: default_device(),
            uri: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            mjpeg: true,
        }
    }
}

impl SourceConfig {
    /// Whether the source produces frames in real time, which the muxer needs
    /// to know to avoid waiting for full batches.
    pub fn is_live(&self) -> bool {
        match self.kind {
            SourceKind::Usb => true,
            SourceKind::Uri => self.uri.as_deref().map(is_live_uri).unwrap_or(false),
        }
    }

    /// Name used for the source in logs and clip status.
    pub fn display_name(&self) -> String {
        match self.kind {
            SourceKind::Usb => self.device.clone(),
            SourceKind::Uri => self.uri.clone().unwrap_or_default(),
        }
    }
}

pub fn is_live_uri(uri: &str) -> bool {
    let scheme = uri.split("://").next().unwrap_or_default().to_ascii_lowercase();
    matches!(
        scheme.as_str(),
        "rtsp" | "rtsps" | "rtmp" | "udp" | "srt" | "http" | "https"
    )
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlatformConfig {
    /// Jetson boards upload with `nvvidconv` and need `nvegltransform` in
    /// front of the EGL sink.
    #[serde(default = "default_true")]
    pub jetson: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self { jetson: true }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct InferenceConfig {
    /// nvinfer configuration file (model, labels, thresholds).
    pub config_file: PathBuf,

    #[serde(default = "default_unique_id")]
    pub unique_id: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_unique_id() -> u32 {
    1
}

fn default_batch_size() -> u32 {
    1
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Egl,
    Fake,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub sink: SinkKind,

    #[serde(default)]
    pub sync: bool,
}

/// Everything needed to build the GStreamer graph, apart from recording.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub platform: PlatformConfig,
    pub inference: InferenceConfig,
    pub detection: DetectionConfig,
    pub display: DisplayConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let source = &self.source;

        if source.width == 0 || source.height == 0 {
            bail!("source.width and source.height must be greater than zero");
        }

        if source.fps == 0 {
            bail!("source.fps must be greater than zero");
        }

        if source.kind == SourceKind::Uri {
            let uri = source.uri.as_deref().context("source.uri is required for uri sources")?;
            if !uri.contains("://") {
                bail!("source.uri '{uri}' has no scheme");
            }
        }

        if self.inference.config_file.as_os_str().is_empty() {
            bail!("inference.config_file is required");
        }

        if self.inference.batch_size == 0 {
            bail!("inference.batch_size must be greater than zero");
        }

        let confidence = self.detection.min_confidence;
        if !(0.0..=1.0).contains(&confidence) {
            bail!("detection.min_confidence must be within [0, 1], got {confidence}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig {
            source: SourceConfig::default(),
            platform: PlatformConfig::default(),
            inference: InferenceConfig {
                config_file: PathBuf::from("pgie_config.txt"),
                unique_id: 1,
                batch_size: 1,
            },
            detection: DetectionConfig::default(),
            display: DisplayConfig::default(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn rejects_zero_fps() {
        let mut config = config();
        config.source.fps = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn uri_source_needs_uri() {
        let mut config = config();
        config.source.kind = SourceKind::Uri;
        assert!(config.validate().is_err());

        config.source.uri = Some("/tmp/clip.mp4".to_owned());
        assert!(config.validate().is_err());

        config.source.uri = Some("file:///tmp/clip.mp4".to_owned());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let mut config = config();
        config.detection.min_confidence = 1.5;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_confidence"));
    }

    #[test]
    fn liveness_follows_scheme() {
        assert!(is_live_uri("rtsp://10.0.0.2/stream"));
        assert!(is_live_uri("RTSP://10.0.0.2/stream"));
        assert!(!is_live_uri("file:///videos/a.mp4"));
        assert!(!is_live_uri("no-scheme"));

        let mut source = SourceConfig::default();
        assert!(source.is_live());

        source.kind = SourceKind::Uri;
        source.uri = Some("file:///videos/a.mp4".to_owned());
        assert!(!source.is_live());
    }
}
