mod manual;
mod source_bin;

pub use manual::*;
pub use source_bin::*;

use std::sync::Mutex;

use log::*;
use sc_deepstream::RecordingInfo;

use crate::RecordingEvent;

/// One way of asking DeepStream to write a clip for a single source.
pub trait RecordBackend: Send {
    fn kind(&self) -> &'static str;

    fn start(&mut self, back_sec: u32, front_sec: u32, label: &str) -> anyhow::Result<()>;

    fn stop(&mut self) -> anyhow::Result<()>;

    /// Ring buffer size reported by the backend itself, if it has one that may
    /// differ from the configured value.
    fn cache_sec(&self) -> Option<u32> {
        None
    }
}

/// State shared with the native completion callback of one source.
pub(crate) struct Completion {
    source_id: u32,
    label: Mutex<String>,
    events: flume::Sender<RecordingEvent>,
}

impl Completion {
    pub(crate) fn new(source_id: u32, events: flume::Sender<RecordingEvent>) -> Self {
        Self {
            source_id,
            label: Mutex::new(String::new()),
            events,
        }
    }

    pub(crate) fn set_label(&self, label: &str) {
        let mut current = match self.label.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        label.clone_into(&mut current);
    }

    fn label(&self) -> String {
        match self.label.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Called from a DeepStream thread once a clip is closed.
    pub(crate) fn finish(&self, info: RecordingInfo) {
        let event = RecordingEvent {
            source_id: self.source_id,
            session_id: info.session_id,
            label: self.label(),
            file: info.file_name,
            dir: info.dir_path.into(),
            duration_ms: info.duration_ms,
        };

        debug!(
            "source {} finished clip {:?} ({} ms)",
            event.source_id, event.file, event.duration_ms
        );

        if self.events.send(event).is_err() {
            warn!("recording event dropped, nobody is listening");
        }
    }
}
