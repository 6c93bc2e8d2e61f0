use std::ffi::c_void;
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use anyhow::Context;
use log::*;
use sc_deepstream::{InitParams, NvDsSRRecordingInfo, RecordingInfo, SmartRecordApi, SrContext};

use super::{Completion, RecordBackend};
use crate::{RecordingEvent, SmartRecordConfig};

/// Smart record through an explicitly created NvDsSR context, for sources
/// whose bins cannot record by themselves (V4L2 cameras). The context's
/// recordbin has to be linked after the encoder branch.
pub struct ManualBackend {
    // Dropped first so that the native context is gone before the callback
    // state it points at.
    context: SrContext,
    completion: Arc<Completion>,
    session: Option<u32>,
    name: String,
}

impl ManualBackend {
    pub fn attach(
        api: Arc<SmartRecordApi>,
        config: &SmartRecordConfig,
        dir: &Path,
        source_id: u32,
        name: &str,
        events: flume::Sender<RecordingEvent>,
    ) -> anyhow::Result<Self> {
        let params = InitParams {
            container: config.container.into(),
            width: 0,
            height: 0,
            file_name_prefix: config.prefix_for(source_id),
            dir_path: dir.to_owned(),
            default_duration: config.default_duration_sec,
            cache_size: config.cache_sec,
        };

        let context = SrContext::create(api, &params, Some(on_clip_done))
            .with_context(|| format!("failed to create smart record context for {name}"))?;

        info!(
            "smart record ready for {name}: {}s cache, clips in {}",
            config.cache_sec,
            dir.display()
        );

        Ok(Self {
            context,
            completion: Arc::new(Completion::new(source_id, events)),
            session: None,
            name: name.to_owned(),
        })
    }

    pub fn recordbin(&self) -> anyhow::Result<gst::Element> {
        self.context.recordbin()
    }
}

impl RecordBackend for ManualBackend {
    fn kind(&self) -> &'static str {
        "nvdssr"
    }

    fn start(&mut self, back_sec: u32, front_sec: u32, label: &str) -> anyhow::Result<()> {
        self.completion.set_label(label);

        let duration = clip_duration(back_sec, front_sec)?;
        let user_data = Arc::as_ptr(&self.completion) as *mut c_void;
        let session = self
            .context
            .start(back_sec, duration, user_data)
            .with_context(|| format!("failed to start recording {}", self.name))?;

        trace!("{} recording in session {session}", self.name);
        self.session = Some(session);

        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        let session = self.session.take().unwrap_or(0);

        self.context
            .stop(session)
            .with_context(|| format!("failed to stop recording {}", self.name))
    }
}

/// `NvDsSRStart` counts the duration from the start of the pre-roll.
fn clip_duration(back_sec: u32, front_sec: u32) -> anyhow::Result<u32> {
    back_sec
        .checked_add(front_sec)
        .with_context(|| format!("clip of -{back_sec}s/+{front_sec}s is too long"))
}

unsafe extern "C" fn on_clip_done(
    info: *mut NvDsSRRecordingInfo,
    user_data: *mut c_void,
) -> *mut c_void {
    // user_data is the Completion passed to start(), kept alive by the
    // backend that owns the context
    let completion = match (user_data as *const Completion).as_ref() {
        Some(completion) => completion,
        None => {
            warn!("clip finished without a recording context");
            return ptr::null_mut();
        }
    };

    match RecordingInfo::from_raw(info) {
        Some(info) => completion.finish(info),
        None => warn!("clip finished without recording info"),
    }

    ptr::null_mut()
}
