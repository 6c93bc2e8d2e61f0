//! Manual Smart Record contexts, for sources whose bins have no built-in
//! smart record support (USB/V4L2 cameras).
//!
//! A context owns a `recordbin` that caches encoded video; `NvDsSRStart`
//! writes a clip starting `start_time` seconds in the past.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::path::PathBuf;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use anyhow::{bail, Context};
use gst::glib;
use glib::translate::FromGlibPtrNone;
use libloading::Library;
use log::*;

use crate::open_library;

pub const SMART_RECORD_LIBRARY: &str = "libnvdsgst_smartrecord.so";

/// Signature of the completion callback handed to `NvDsSRCreate`.
pub type SrCallback =
    unsafe extern "C" fn(info: *mut NvDsSRRecordingInfo, user_data: *mut c_void) -> *mut c_void;

#[repr(C)]
pub(crate) struct NvDsSRInitParams {
    pub callback: Option<SrCallback>,
    pub container_type: c_int,
    pub width: c_uint,
    pub height: c_uint,
    pub file_name_prefix: *const c_char,
    pub dirpath: *const c_char,
    pub default_duration: c_uint,
    pub cache_size: c_uint,
    /// Room for fields appended by newer releases; always zero.
    pub reserved: [u64; 8],
}

#[allow(dead_code)]
#[repr(C)]
pub(crate) struct NvDsSRContext {
    pub recordbin: *mut gst::ffi::GstElement,
    pub record_que: *mut gst::ffi::GstElement,
    pub encodebin: *mut gst::ffi::GstElement,
    pub filesink: *mut gst::ffi::GstElement,
    pub got_key_frame: glib::ffi::gboolean,
    pub record_on: glib::ffi::gboolean,
    pub reset_done: glib::ffi::gboolean,
    pub is_playing: glib::ffi::gboolean,
}

#[allow(dead_code)]
#[repr(C)]
pub struct NvDsSRRecordingInfo {
    ctx: *mut NvDsSRContext,
    session_id: c_uint,
    filename: *mut c_char,
    dirpath: *mut c_char,
    duration: u64,
    container_type: c_int,
    width: c_uint,
    height: c_uint,
}

type CreateFn = unsafe extern "C" fn(*mut *mut NvDsSRContext, *mut NvDsSRInitParams) -> c_int;
type StartFn =
    unsafe extern "C" fn(*mut NvDsSRContext, *mut c_uint, c_uint, c_uint, *mut c_void) -> c_int;
type StopFn = unsafe extern "C" fn(*mut NvDsSRContext, c_uint) -> c_int;
type DestroyFn = unsafe extern "C" fn(*mut NvDsSRContext) -> c_int;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContainerType {
    #[default]
    Mp4,
    Mkv,
}

impl ContainerType {
    /// Value of `NvDsSRContainerType`, also accepted by the
    /// `smart-rec-container` property.
    pub fn as_raw(self) -> c_int {
        match self {
            ContainerType::Mp4 => 0,
            ContainerType::Mkv => 1,
        }
    }
}

/// Turns an `NvDsSRStatus` into a result.
pub fn check_status(status: c_int, call: &'static str) -> anyhow::Result<()> {
    let name = match status {
        0 => return Ok(()),
        1 => "invalid value",
        2 => "invalid operation",
        3 => "error",
        4 => "not implemented",
        _ => "unknown status",
    };

    bail!("{call} failed: {name} ({status})")
}

/// Handle on `libnvdsgst_smartrecord.so`.
pub struct SmartRecordApi {
    _lib: Library,
    create: CreateFn,
    start: StartFn,
    stop: StopFn,
    destroy: DestroyFn,
}

impl SmartRecordApi {
    pub fn load() -> anyhow::Result<Arc<Self>> {
        let lib = open_library(SMART_RECORD_LIBRARY)?;

        unsafe {
            let create = *lib
                .get::<CreateFn>(b"NvDsSRCreate\0")
                .context("failed to resolve NvDsSRCreate")?;
            let start = *lib
                .get::<StartFn>(b"NvDsSRStart\0")
                .context("failed to resolve NvDsSRStart")?;
            let stop = *lib
                .get::<StopFn>(b"NvDsSRStop\0")
                .context("failed to resolve NvDsSRStop")?;
            let destroy = *lib
                .get::<DestroyFn>(b"NvDsSRDestroy\0")
                .context("failed to resolve NvDsSRDestroy")?;

            Ok(Arc::new(Self {
                _lib: lib,
                create,
                start,
                stop,
                destroy,
            }))
        }
    }
}

unsafe impl Send for SmartRecordApi {}
unsafe impl Sync for SmartRecordApi {}

#[derive(Clone, Debug)]
pub struct InitParams {
    pub container: ContainerType,
    /// Zero keeps the source resolution.
    pub width: u32,
    pub height: u32,
    pub file_name_prefix: String,
    pub dir_path: PathBuf,
    pub default_duration: u32,
    pub cache_size: u32,
}

pub struct SrContext {
    api: Arc<SmartRecordApi>,
    raw: NonNull<NvDsSRContext>,
    // NvDsSR keeps the pointers from the init params
    _prefix: CString,
    _dir: CString,
}

impl SrContext {
    pub fn create(
        api: Arc<SmartRecordApi>,
        params: &InitParams,
        callback: Option<SrCallback>,
    ) -> anyhow::Result<Self> {
        let prefix =
            CString::new(params.file_name_prefix.as_str()).context("invalid file name prefix")?;
        let dir = CString::new(params.dir_path.to_string_lossy().into_owned())
            .context("invalid recording directory")?;

        let mut init = NvDsSRInitParams {
            callback,
            container_type: params.container.as_raw(),
            width: params.width,
            height: params.height,
            file_name_prefix: prefix.as_ptr(),
            dirpath: dir.as_ptr(),
            default_duration: params.default_duration,
            cache_size: params.cache_size,
            reserved: [0; 8],
        };

        let mut raw = ptr::null_mut();
        let status = unsafe { (api.create)(&mut raw, &mut init) };
        check_status(status, "NvDsSRCreate")?;

        let raw = NonNull::new(raw).context("NvDsSRCreate returned no context")?;

        debug!(
            "created smart record context (prefix {:?}, dir {:?}, cache {}s)",
            params.file_name_prefix, params.dir_path, params.cache_size
        );

        Ok(Self {
            api,
            raw,
            _prefix: prefix,
            _dir: dir,
        })
    }

    /// The bin that must be linked downstream of the encoder branch.
    pub fn recordbin(&self) -> anyhow::Result<gst::Element> {
        let bin = unsafe { self.raw.as_ref().recordbin };

        if bin.is_null() {
            bail!("smart record context has no recordbin");
        }

        Ok(unsafe { gst::Element::from_glib_none(bin) })
    }

    /// Starts a clip `start_time` seconds in the past lasting `duration`
    /// seconds. Returns the session id.
    pub fn start(&self, start_time: u32, duration: u32, user_data: *mut c_void) -> anyhow::Result<u32> {
        let mut session: c_uint = 0;
        let status =
            unsafe { (self.api.start)(self.raw.as_ptr(), &mut session, start_time, duration, user_data) };
        check_status(status, "NvDsSRStart")?;

        Ok(session)
    }

    pub fn stop(&self, session: u32) -> anyhow::Result<()> {
        let status = unsafe { (self.api.stop)(self.raw.as_ptr(), session) };
        check_status(status, "NvDsSRStop")
    }
}

impl Drop for SrContext {
    fn drop(&mut self) {
        let status = unsafe { (self.api.destroy)(self.raw.as_ptr()) };

        if let Err(err) = check_status(status, "NvDsSRDestroy") {
            error!("failed to destroy smart record context: {err:?}");
        }
    }
}

// NvDsSR serialises access internally; the handle is only moved between the
// streaming thread and the record task, never shared without a lock.
unsafe impl Send for SrContext {}

/// A finished clip, copied out of `NvDsSRRecordingInfo`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingInfo {
    pub session_id: u32,
    pub file_name: String,
    pub dir_path: String,
    pub duration_ms: u64,
    pub width: u32,
    pub height: u32,
}

impl RecordingInfo {
    /// # Safety
    ///
    /// `info` must be null or point to a live `NvDsSRRecordingInfo`, as
    /// passed to the completion callback or the `sr-done` signal.
    pub unsafe fn from_raw(info: *const NvDsSRRecordingInfo) -> Option<Self> {
        let info = info.as_ref()?;

        Some(Self {
            session_id: info.session_id,
            file_name: lossy(info.filename),
            dir_path: lossy(info.dirpath),
            duration_ms: info.duration,
            width: info.width,
            height: info.height,
        })
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.dir_path).join(&self.file_name)
    }
}

unsafe fn lossy(s: *const c_char) -> String {
    if s.is_null() {
        return String::new();
    }

    CStr::from_ptr(s).to_string_lossy().into_owned()
}
