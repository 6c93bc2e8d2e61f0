use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use log::*;
use tokio::io::AsyncWriteExt;

use crate::RecordingEvent;

pub const ISO_8601_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%:z";

/// Writes `event` next to its clip, with the clip's extension replaced by
/// `.json`.
pub async fn write_metadata(event: &RecordingEvent) -> anyhow::Result<PathBuf> {
    let path = event.path().with_extension("json");

    debug!("writing clip metadata to file '{}'", path.to_string_lossy());

    let bytes = serde_json::to_vec(&serde_json::json!({
        "clip": event,
        "saved_at": Local::now().format(ISO_8601_FORMAT).to_string(),
    }))
    .context("failed to serialize clip metadata to JSON")?;

    let mut file = tokio::fs::File::create(&path)
        .await
        .context("failed to create metadata file")?;

    file.write_all(&bytes[..])
        .await
        .context("failed to write clip metadata to file")?;

    Ok(path)
}
