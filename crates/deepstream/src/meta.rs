//! Access to `NvDsBatchMeta` attached to buffers by `nvstreammux`/`nvinfer`.
//!
//! Only the leading fields of each vendor struct are declared. The structs are
//! never allocated on the Rust side, only reached through pointers handed out
//! by DeepStream, so trailing fields can be left off. Layouts follow
//! `nvdsmeta.h` and `nvll_osd_struct.h` from DeepStream 6.x/7.x.

// the vendor structs are mirrored field by field, most fields are never read
#![allow(dead_code)]

use std::borrow::Cow;
use std::ffi::{c_char, c_int, c_uint, c_void, CString};
use std::marker::PhantomData;
use std::ptr::NonNull;

use anyhow::Context;
use gst::glib;
use glib::ffi::GList;
use libloading::Library;

use crate::open_library;

pub const META_LIBRARY: &str = "libnvdsgst_meta.so";

const MAX_LABEL_SIZE: usize = 128;

#[repr(C)]
pub(crate) struct NvDsBaseMeta {
    pub batch_meta: *mut NvDsBatchMeta,
    pub meta_type: c_int,
    pub u_context: *mut c_void,
    pub copy_func: *mut c_void,
    pub release_func: *mut c_void,
}

#[repr(C)]
pub(crate) struct NvDsBatchMeta {
    pub base_meta: NvDsBaseMeta,
    pub max_frames_in_batch: c_uint,
    pub num_frames_in_batch: c_uint,
    pub frame_meta_pool: *mut c_void,
    pub obj_meta_pool: *mut c_void,
    pub classifier_meta_pool: *mut c_void,
    pub display_meta_pool: *mut c_void,
    pub user_meta_pool: *mut c_void,
    pub label_info_meta_pool: *mut c_void,
    pub frame_meta_list: *mut GList,
}

#[repr(C)]
pub(crate) struct NvDsFrameMeta {
    pub base_meta: NvDsBaseMeta,
    pub pad_index: c_uint,
    pub batch_id: c_uint,
    pub frame_num: c_int,
    pub buf_pts: u64,
    pub ntp_timestamp: u64,
    pub source_id: c_uint,
    pub num_surfaces_per_frame: c_int,
    pub source_frame_width: c_uint,
    pub source_frame_height: c_uint,
    pub surface_type: c_uint,
    pub surface_index: c_uint,
    pub num_obj_meta: c_uint,
    pub infer_done: c_int,
    pub obj_meta_list: *mut GList,
}

#[repr(C)]
pub(crate) struct BboxCoords {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

#[repr(C)]
pub(crate) struct NvDsCompBboxInfo {
    pub org_bbox_coords: BboxCoords,
}

#[repr(C)]
pub(crate) struct NvOsdColorParams {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

#[repr(C)]
pub(crate) struct NvOsdRectParams {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub border_width: c_uint,
    pub border_color: NvOsdColorParams,
    pub has_bg_color: c_uint,
    pub reserved: c_uint,
    pub bg_color: NvOsdColorParams,
    pub has_color_info: c_int,
    pub color_id: c_int,
}

#[repr(C)]
pub(crate) struct NvOsdMaskParams {
    pub data: *mut f32,
    pub size: c_uint,
    pub threshold: f32,
    pub width: c_uint,
    pub height: c_uint,
}

#[repr(C)]
pub(crate) struct NvOsdFontParams {
    pub font_name: *mut c_char,
    pub font_size: c_uint,
    pub font_color: NvOsdColorParams,
}

#[repr(C)]
pub(crate) struct NvOsdTextParams {
    pub display_text: *mut c_char,
    pub x_offset: c_uint,
    pub y_offset: c_uint,
    pub font_params: NvOsdFontParams,
    pub set_bg_clr: c_int,
    pub text_bg_clr: NvOsdColorParams,
}

#[repr(C)]
pub(crate) struct NvDsObjectMeta {
    pub base_meta: NvDsBaseMeta,
    pub parent: *mut NvDsObjectMeta,
    pub unique_component_id: c_int,
    pub class_id: c_int,
    pub object_id: u64,
    pub detector_bbox_info: NvDsCompBboxInfo,
    pub tracker_bbox_info: NvDsCompBboxInfo,
    pub confidence: f32,
    pub tracker_confidence: f32,
    pub rect_params: NvOsdRectParams,
    pub mask_params: NvOsdMaskParams,
    pub text_params: NvOsdTextParams,
    pub obj_label: [c_char; MAX_LABEL_SIZE],
}

type GetBatchMetaFn = unsafe extern "C" fn(*mut gst::ffi::GstBuffer) -> *mut NvDsBatchMeta;

/// Handle on `libnvdsgst_meta.so`.
pub struct MetaApi {
    _lib: Library,
    get_batch_meta: GetBatchMetaFn,
}

impl MetaApi {
    pub fn load() -> anyhow::Result<Self> {
        let lib = open_library(META_LIBRARY)?;

        let get_batch_meta = unsafe {
            *lib.get::<GetBatchMetaFn>(b"gst_buffer_get_nvds_batch_meta\0")
                .context("failed to resolve gst_buffer_get_nvds_batch_meta")?
        };

        Ok(Self {
            _lib: lib,
            get_batch_meta,
        })
    }

    /// Returns the batch metadata attached to `buffer`, if any.
    ///
    /// The metadata is edited in place, the same way DeepStream's own pad
    /// probes do it; the buffer's memory is never touched.
    pub fn batch_meta<'a>(&self, buffer: &'a gst::BufferRef) -> Option<BatchMeta<'a>> {
        let raw = unsafe { (self.get_batch_meta)(buffer.as_ptr() as *mut gst::ffi::GstBuffer) };

        NonNull::new(raw).map(|raw| BatchMeta {
            raw,
            _buffer: PhantomData,
        })
    }
}

// the library handle and a plain function pointer
unsafe impl Send for MetaApi {}
unsafe impl Sync for MetaApi {}

pub struct BatchMeta<'a> {
    raw: NonNull<NvDsBatchMeta>,
    _buffer: PhantomData<&'a gst::BufferRef>,
}

impl<'a> BatchMeta<'a> {
    pub fn frames(&mut self) -> Frames<'_> {
        Frames {
            node: unsafe { self.raw.as_ref().frame_meta_list },
            _batch: PhantomData,
        }
    }
}

pub struct Frames<'a> {
    node: *mut GList,
    _batch: PhantomData<&'a mut NvDsBatchMeta>,
}

impl<'a> Iterator for Frames<'a> {
    type Item = FrameMeta<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        next_data::<NvDsFrameMeta>(&mut self.node).map(|raw| FrameMeta {
            raw,
            _batch: PhantomData,
        })
    }
}

pub struct FrameMeta<'a> {
    raw: NonNull<NvDsFrameMeta>,
    _batch: PhantomData<&'a mut NvDsBatchMeta>,
}

impl<'a> FrameMeta<'a> {
    fn raw(&self) -> &NvDsFrameMeta {
        unsafe { self.raw.as_ref() }
    }

    pub fn objects(&mut self) -> Objects<'_> {
        Objects {
            node: self.raw().obj_meta_list,
            _frame: PhantomData,
        }
    }
}

pub struct Objects<'a> {
    node: *mut GList,
    _frame: PhantomData<&'a mut NvDsFrameMeta>,
}

impl<'a> Iterator for Objects<'a> {
    type Item = ObjectMeta<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        next_data::<NvDsObjectMeta>(&mut self.node).map(|raw| ObjectMeta {
            raw,
            _frame: PhantomData,
        })
    }
}

/// Advances a `GList` cursor to the next node carrying non-null data.
fn next_data<T>(node: &mut *mut GList) -> Option<NonNull<T>> {
    while let Some(current) = NonNull::new(*node) {
        let current = unsafe { current.as_ref() };
        *node = current.next;

        if let Some(data) = NonNull::new(current.data as *mut T) {
            return Some(data);
        }
    }

    None
}

pub struct ObjectMeta<'a> {
    raw: NonNull<NvDsObjectMeta>,
    _frame: PhantomData<&'a mut NvDsFrameMeta>,
}

impl<'a> ObjectMeta<'a> {
    fn raw(&self) -> &NvDsObjectMeta {
        unsafe { self.raw.as_ref() }
    }

    fn raw_mut(&mut self) -> &mut NvDsObjectMeta {
        unsafe { self.raw.as_mut() }
    }

    pub fn class_id(&self) -> i32 {
        self.raw().class_id
    }

    /// Detector confidence; negative when the component did not report one.
    pub fn confidence(&self) -> f32 {
        self.raw().confidence
    }

    pub fn label(&self) -> Cow<'_, str> {
        let label = &self.raw().obj_label;
        let bytes = unsafe { std::slice::from_raw_parts(label.as_ptr() as *const u8, label.len()) };
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());

        String::from_utf8_lossy(&bytes[..end])
    }

    pub fn set_border_width(&mut self, width: u32) {
        self.raw_mut().rect_params.border_width = width;
    }

    /// Replaces the OSD text. nvdsosd releases the string with `g_free`, so
    /// it has to come from the GLib allocator.
    pub fn set_display_text(&mut self, text: &str) {
        let text = CString::new(text.replace('\0', "")).unwrap_or_default();
        let params = &mut self.raw_mut().text_params;

        unsafe {
            if !params.display_text.is_null() {
                glib::ffi::g_free(params.display_text as glib::ffi::gpointer);
            }
            params.display_text = glib::ffi::g_strdup(text.as_ptr());
        }
    }

    pub fn clear_display_text(&mut self) {
        self.set_display_text("");
    }
}
