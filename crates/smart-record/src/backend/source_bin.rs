use std::ffi::{c_uint, c_void};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use gst::glib;
use gst::prelude::*;
use log::*;
use sc_deepstream::element::{has_property, set_optional, set_optional_from_str, signal_arity};
use sc_deepstream::{ContainerType, NvDsSRRecordingInfo, RecordingInfo};

use super::{Completion, RecordBackend};
use crate::{RecordingEvent, SmartRecordConfig};

/// `smart-record` value that enables both cloud and local triggers.
const SMART_RECORD_MULTI: &str = "2";

/// Smart record built into `nvurisrcbin`, driven through its `start-sr` and
/// `stop-sr` action signals.
pub struct SourceBinBackend {
    element: gst::Element,
    completion: Arc<Completion>,
    // written by start-sr
    session: Box<c_uint>,
    done_handler: Option<glib::SignalHandlerId>,
}

impl SourceBinBackend {
    pub fn attach(
        element: &gst::Element,
        config: &SmartRecordConfig,
        dir: &Path,
        source_id: u32,
        events: flume::Sender<RecordingEvent>,
    ) -> anyhow::Result<Self> {
        if signal_arity(element, "start-sr").is_none() {
            bail!("{} has no smart record support", element.name());
        }

        set_optional_from_str(element, "smart-record", SMART_RECORD_MULTI);
        set_optional(element, "smart-rec-dir-path", dir.to_string_lossy().into_owned());
        set_optional(element, "smart-rec-cache", config.cache_sec);
        set_optional(element, "smart-rec-file-prefix", config.prefix_for(source_id));
        set_optional(element, "smart-rec-default-duration", config.default_duration_sec);

        if has_property(element, "smart-rec-container") {
            let container = ContainerType::from(config.container).as_raw();
            set_optional_from_str(element, "smart-rec-container", &container.to_string());
        }

        let completion = Arc::new(Completion::new(source_id, events));

        let done_handler = if signal_arity(element, "sr-done").is_some() {
            let completion = completion.clone();
            Some(element.connect("sr-done", false, move |args| {
                let info = args
                    .get(1)
                    .and_then(|value| value.get::<glib::Pointer>().ok())
                    .and_then(|ptr| unsafe {
                        RecordingInfo::from_raw(ptr as *const NvDsSRRecordingInfo)
                    });

                match info {
                    Some(info) => completion.finish(info),
                    None => warn!("sr-done emitted without recording info"),
                }

                None
            }))
        } else {
            warn!("{} does not report finished clips", element.name());
            None
        };

        info!(
            "smart record enabled on {}: {}s cache, clips in {}",
            element.name(),
            config.cache_sec,
            dir.display()
        );

        Ok(Self {
            element: element.clone(),
            completion,
            session: Box::new(0),
            done_handler,
        })
    }
}

impl RecordBackend for SourceBinBackend {
    fn kind(&self) -> &'static str {
        "nvurisrcbin"
    }

    fn start(&mut self, back_sec: u32, front_sec: u32, label: &str) -> anyhow::Result<()> {
        self.completion.set_label(label);

        let session = &mut *self.session as *mut c_uint as glib::Pointer;
        let user_data = Arc::as_ptr(&self.completion) as *mut c_void as glib::Pointer;

        match signal_arity(&self.element, "start-sr") {
            Some(4) => self.element.emit_by_name::<()>(
                "start-sr",
                &[&session, &back_sec, &front_sec, &user_data],
            ),
            Some(3) => self
                .element
                .emit_by_name::<()>("start-sr", &[&session, &back_sec, &front_sec]),
            Some(n) => bail!("unsupported start-sr signature ({n} arguments)"),
            None => bail!("{} has no start-sr signal", self.element.name()),
        }

        trace!("{} recording in session {}", self.element.name(), self.session);

        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        match signal_arity(&self.element, "stop-sr") {
            Some(1) => self.element.emit_by_name::<()>("stop-sr", &[&0u32]),
            Some(0) => self.element.emit_by_name::<()>("stop-sr", &[]),
            Some(n) => bail!("unsupported stop-sr signature ({n} arguments)"),
            None => bail!("{} has no stop-sr signal", self.element.name()),
        }

        Ok(())
    }

    fn cache_sec(&self) -> Option<u32> {
        if !has_property(&self.element, "smart-rec-cache") {
            return None;
        }

        self.element
            .property_value("smart-rec-cache")
            .transform::<u32>()
            .context("smart-rec-cache is not numeric")
            .and_then(|value| value.get::<u32>().context("smart-rec-cache is not numeric"))
            .ok()
    }
}

impl Drop for SourceBinBackend {
    fn drop(&mut self) {
        if let Some(handler) = self.done_handler.take() {
            self.element.disconnect(handler);
        }
    }
}
