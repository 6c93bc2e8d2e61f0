use std::sync::Mutex;
use std::time::Instant;

use gst::prelude::*;
use log::*;
use sc_deepstream::MetaApi;
use sc_detection::{AutoTrigger, FrameSummary, OverlayFilter};
use sc_smart_record::{lock_recorder, SharedRecorder, StartOutcome, Trigger};

/// Starts a clip on the first source whenever the overlay filter lets a
/// target through, rate limited by an [`AutoTrigger`].
pub struct AutoRecord {
    gate: AutoTrigger,
    recorder: SharedRecorder,
    source_id: u32,
    label: String,
}

impl AutoRecord {
    pub fn new(recorder: SharedRecorder, source_id: u32, label: impl Into<String>) -> anyhow::Result<Self> {
        let cooldown = lock_recorder(&recorder)?.config().cooldown();

        Ok(Self {
            gate: AutoTrigger::new(cooldown),
            recorder,
            source_id,
            label: label.into(),
        })
    }

    /// Returns what the recorder said, if the gate let the frame through.
    pub fn on_frame(&mut self, summary: &FrameSummary, now: Instant) -> Option<StartOutcome> {
        if !self.gate.poll(now, summary.saw_target()) {
            return None;
        }

        let mut recorder = match lock_recorder(&self.recorder) {
            Ok(recorder) => recorder,
            Err(err) => {
                error!("{err:#}");
                return None;
            }
        };

        let trigger = Trigger::new(recorder.config(), self.label.as_str());
        let outcome = recorder.start(self.source_id, &trigger, now);

        match &outcome {
            StartOutcome::Started { .. } => info!(
                "auto trigger: {} at {:.1}%",
                self.label,
                summary.best_confidence.unwrap_or_default() * 100.0
            ),
            StartOutcome::CoolingDown { remaining } => debug!(
                "auto trigger: recorder cooling down for another {:.1}s",
                remaining.as_secs_f64()
            ),
            StartOutcome::UnknownSource => debug!("auto trigger: no recorder attached"),
            StartOutcome::Failed { reason } => warn!("auto trigger: {reason}"),
        }

        Some(outcome)
    }
}

/// Where the detections of a buffer come from.
pub trait DetectionSource: Send + 'static {
    /// Runs `filter` over every frame attached to `buffer`. `None` when the
    /// buffer carries no batch metadata.
    fn filter_batch(&self, buffer: &gst::BufferRef, filter: &OverlayFilter) -> Option<FrameSummary>;
}

impl DetectionSource for MetaApi {
    fn filter_batch(&self, buffer: &gst::BufferRef, filter: &OverlayFilter) -> Option<FrameSummary> {
        let mut batch = self.batch_meta(buffer)?;

        let mut summary = FrameSummary::default();
        for mut frame in batch.frames() {
            summary.merge(filter.apply(frame.objects()));
        }

        Some(summary)
    }
}

/// Buffer probe on the `nvdsosd` sink pad.
pub struct OsdProbe<S = MetaApi> {
    source: S,
    filter: OverlayFilter,
    auto_record: Option<AutoRecord>,
    batches: u64,
}

impl<S: DetectionSource> OsdProbe<S> {
    pub fn new(source: S, filter: OverlayFilter, auto_record: Option<AutoRecord>) -> Self {
        Self {
            source,
            filter,
            auto_record,
            batches: 0,
        }
    }

    fn process(&mut self, buffer: &gst::BufferRef) {
        let summary = match self.source.filter_batch(buffer, &self.filter) {
            Some(summary) => summary,
            None => return,
        };

        self.batches += 1;
        if self.batches % 300 == 0 {
            trace!(
                "{} batches, last had {} objects ({} shown)",
                self.batches,
                summary.objects,
                summary.visible
            );
        }

        if let Some(auto_record) = &mut self.auto_record {
            auto_record.on_frame(&summary, Instant::now());
        }
    }

    /// The probe always passes the buffer on.
    pub fn install(self, pad: &gst::Pad) -> Option<gst::PadProbeId> {
        let probe = Mutex::new(self);

        pad.add_probe(gst::PadProbeType::BUFFER, move |_pad, info| {
            if let Some(gst::PadProbeData::Buffer(ref buffer)) = info.data {
                match probe.lock() {
                    Ok(mut probe) => probe.process(buffer),
                    Err(_) => error!("osd probe state poisoned"),
                }
            }

            gst::PadProbeReturn::Ok
        })
    }
}
