mod filter;
mod trigger;

pub use filter::*;
pub use trigger::*;

use serde::Deserialize;

/// Which detections count as targets and how they are drawn.
#[derive(Clone, Debug, Deserialize)]
pub struct DetectionConfig {
    /// Label written on visible boxes, also matched (case-insensitively)
    /// against the label reported by the detector.
    #[serde(default = "default_target_label")]
    pub target_label: String,

    /// Detector class ids that count as targets regardless of their label.
    #[serde(default = "default_target_class_ids")]
    pub target_class_ids: Vec<i32>,

    /// Targets below this confidence are hidden and do not trigger recording.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    #[serde(default = "default_border_width")]
    pub border_width: u32,
}

fn default_target_label() -> String {
    "person".to_owned()
}

fn default_target_class_ids() -> Vec<i32> {
    vec![0]
}

fn default_min_confidence() -> f32 {
    0.35
}

fn default_border_width() -> u32 {
    3
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            target_label: default_target_label(),
            target_class_ids: default_target_class_ids(),
            min_confidence: default_min_confidence(),
            border_width: default_border_width(),
        }
    }
}
