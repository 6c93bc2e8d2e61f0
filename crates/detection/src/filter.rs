use std::borrow::Cow;

use sc_deepstream::ObjectMeta;

use crate::DetectionConfig;

/// One detected object as seen by the on-screen display.
pub trait Detection {
    fn class_id(&self) -> i32;
    fn label(&self) -> Cow<'_, str>;
    fn confidence(&self) -> f32;

    /// Draw the box with the given border and caption.
    fn show(&mut self, border_width: u32, text: &str);

    /// Remove both the box and the caption.
    fn hide(&mut self);
}

impl<'a> Detection for ObjectMeta<'a> {
    fn class_id(&self) -> i32 {
        ObjectMeta::class_id(self)
    }

    fn label(&self) -> Cow<'_, str> {
        ObjectMeta::label(self)
    }

    fn confidence(&self) -> f32 {
        ObjectMeta::confidence(self)
    }

    fn show(&mut self, border_width: u32, text: &str) {
        self.set_border_width(border_width);
        self.set_display_text(text);
    }

    fn hide(&mut self) {
        self.set_border_width(0);
        self.clear_display_text();
    }
}

/// What the filter saw in one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameSummary {
    pub objects: usize,
    pub visible: usize,
    pub best_confidence: Option<f32>,
}

impl FrameSummary {
    pub fn saw_target(&self) -> bool {
        self.visible > 0
    }

    /// Folds the summary of another frame of the same batch into this one.
    pub fn merge(&mut self, other: FrameSummary) {
        self.objects += other.objects;
        self.visible += other.visible;
        self.best_confidence = match (self.best_confidence, other.best_confidence) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Hides every detection except confident targets, and captions those with
/// their confidence.
#[derive(Clone, Debug)]
pub struct OverlayFilter {
    label: String,
    class_ids: Vec<i32>,
    min_confidence: f32,
    border_width: u32,
}

impl OverlayFilter {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            label: config.target_label.trim().to_lowercase(),
            class_ids: config.target_class_ids.clone(),
            min_confidence: config.min_confidence,
            border_width: config.border_width,
        }
    }

    pub fn is_target(&self, detection: &impl Detection) -> bool {
        self.class_ids.contains(&detection.class_id())
            || detection.label().trim().to_lowercase() == self.label
    }

    /// A negative confidence means the detector did not report one, which
    /// never passes.
    pub fn is_visible(&self, detection: &impl Detection) -> bool {
        let confidence = detection.confidence();
        self.is_target(detection) && confidence >= 0.0 && confidence >= self.min_confidence
    }

    pub fn caption(&self, confidence: f32) -> String {
        format!("{} {:.1}%", self.label, confidence * 100.0)
    }

    pub fn apply<D, I>(&self, detections: I) -> FrameSummary
    where
        D: Detection,
        I: IntoIterator<Item = D>,
    {
        let mut summary = FrameSummary::default();

        for mut detection in detections {
            summary.objects += 1;

            if self.is_visible(&detection) {
                let confidence = detection.confidence();
                let caption = self.caption(confidence);
                detection.show(self.border_width, &caption);

                summary.visible += 1;
                summary.best_confidence =
                    Some(summary.best_confidence.map_or(confidence, |c| c.max(confidence)));
            } else {
                detection.hide();
            }
        }

        summary
    }
}
