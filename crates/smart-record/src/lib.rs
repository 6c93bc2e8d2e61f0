//! Event-triggered clip recording on top of DeepStream Smart Record.
//!
//! [`SmartRecorder`] owns one [`RecordBackend`] per source and enforces the
//! per-source cooldown; the backends only know how to poke DeepStream.

mod backend;
mod config;
mod metadata;
mod recorder;

pub mod command;
pub mod task;

pub use backend::*;
pub use command::*;
pub use config::*;
pub use metadata::*;
pub use recorder::*;
pub use task::*;

use std::path::PathBuf;

use serde::Serialize;

/// A request for one clip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trigger {
    pub back_sec: u32,
    pub front_sec: u32,
    pub label: String,
}

impl Trigger {
    /// A trigger using the configured window.
    pub fn new(config: &SmartRecordConfig, label: impl Into<String>) -> Self {
        Self {
            back_sec: config.back_sec,
            front_sec: config.front_sec,
            label: label.into(),
        }
    }
}

/// A clip that DeepStream has finished writing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordingEvent {
    pub source_id: u32,
    pub session_id: u32,
    pub label: String,
    pub file: String,
    pub dir: PathBuf,
    pub duration_ms: u64,
}

impl RecordingEvent {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file)
    }
}
