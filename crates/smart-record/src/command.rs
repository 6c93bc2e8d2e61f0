use clap::{AppSettings, Subcommand};
use serde::Serialize;

use crate::{SourceStatus, StartOutcome};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
#[clap(setting(AppSettings::NoBinaryName))]
#[clap(rename_all = "kebab-case")]
pub enum RecordRequest {
    /// Start a clip now
    Start {
        /// Label stored with the clip
        #[clap(short, long, default_value = "manual")]
        label: String,

        /// Seconds before now to include (defaults to record.back_sec)
        #[clap(long)]
        back: Option<u32>,

        /// Seconds after now to include (defaults to record.front_sec)
        #[clap(long)]
        front: Option<u32>,

        #[clap(long, default_value_t = 0)]
        source: u32,
    },

    /// Stop the clip being written
    Stop {
        #[clap(long, default_value_t = 0)]
        source: u32,
    },

    /// Show recording counters
    Status,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RecordResponse {
    Started(StartOutcome),
    Stopped,
    Status(Vec<SourceStatus>),
}
