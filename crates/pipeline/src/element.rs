pub use sc_deepstream::element::*;

use anyhow::Context;
use gst::prelude::*;
use log::*;

pub fn make_queue(name: &str, leaky: bool, max_buffers: u32) -> anyhow::Result<gst::Element> {
    let queue = make("queue", name)?;

    set_required(&queue, "max-size-buffers", max_buffers)?;
    set_required(&queue, "max-size-bytes", 0u32)?;
    set_required(&queue, "max-size-time", 0u64)?;

    if leaky {
        set_optional_from_str(&queue, "leaky", "downstream");
    }

    Ok(queue)
}

pub fn make_capsfilter(name: &str, caps: &gst::Caps) -> anyhow::Result<gst::Element> {
    let filter = make("capsfilter", name)?;
    set_required(&filter, "caps", caps)?;
    Ok(filter)
}

/// Makes the first factory that is installed.
pub fn make_first(factories: &[&str], name: &str) -> anyhow::Result<gst::Element> {
    let mut last_err = None;

    for factory in factories {
        match make(factory, name) {
            Ok(element) => return Ok(element),
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no factory given for '{name}'")))
}

pub fn request_tee_src(tee: &gst::Element) -> anyhow::Result<gst::Pad> {
    tee.request_pad_simple("src_%u")
        .with_context(|| format!("could not request a src pad from {}", tee.name()))
}

pub fn static_pad(element: &gst::Element, name: &str) -> anyhow::Result<gst::Pad> {
    element
        .static_pad(name)
        .with_context(|| format!("{} has no {name} pad", element.name()))
}

fn pad_name(pad: &gst::Pad) -> String {
    match pad.parent_element() {
        Some(parent) => format!("{}.{}", parent.name(), pad.name()),
        None => pad.name().to_string(),
    }
}

pub fn link_pads(src: &gst::Pad, sink: &gst::Pad) -> anyhow::Result<()> {
    src.link(sink)
        .with_context(|| format!("failed to link {} -> {}", pad_name(src), pad_name(sink)))?;
    Ok(())
}

/// Links each element to the next one.
pub fn link_chain(elements: &[&gst::Element]) -> anyhow::Result<()> {
    for pair in elements.windows(2) {
        pair[0]
            .link(pair[1])
            .with_context(|| format!("failed to link {} -> {}", pair[0].name(), pair[1].name()))?;
    }

    Ok(())
}

/// Adds `branch` to `pipeline`, links a new `tee` src pad to its head and
/// links the branch in order. On failure the tee pad is released and every
/// branch element is taken out of the pipeline again.
pub fn attach_branch(
    pipeline: &gst::Pipeline,
    tee: &gst::Element,
    branch: &[gst::Element],
) -> anyhow::Result<()> {
    let head = branch.first().context("cannot attach an empty branch")?;

    if let Err(err) = pipeline.add_many(branch) {
        remove_all(pipeline, branch);
        return Err(err).context("failed to add branch elements");
    }

    let tee_src = match request_tee_src(tee) {
        Ok(pad) => pad,
        Err(err) => {
            remove_all(pipeline, branch);
            return Err(err);
        }
    };

    let linked = static_pad(head, "sink")
        .and_then(|sink| link_pads(&tee_src, &sink))
        .and_then(|()| link_chain(&branch.iter().collect::<Vec<_>>()));

    if let Err(err) = linked {
        if let Some(peer) = tee_src.peer() {
            let _ = tee_src.unlink(&peer);
        }
        tee.release_request_pad(&tee_src);
        remove_all(pipeline, branch);
        return Err(err);
    }

    Ok(())
}

fn remove_all(pipeline: &gst::Pipeline, elements: &[gst::Element]) {
    for element in elements {
        if element.parent().as_ref() == Some(pipeline.upcast_ref::<gst::Object>()) {
            if let Err(err) = pipeline.remove(element) {
                debug!("could not remove {}: {err}", element.name());
            }
        }
    }
}

pub fn mjpeg_caps(width: u32, height: u32, fps: u32) -> gst::Caps {
    gst::Caps::builder("image/jpeg")
        .field("width", width as i32)
        .field("height", height as i32)
        .field("framerate", gst::Fraction::new(fps as i32, 1))
        .build()
}

pub fn raw_caps(width: u32, height: u32, fps: u32) -> gst::Caps {
    gst::Caps::builder("video/x-raw")
        .field("width", width as i32)
        .field("height", height as i32)
        .field("framerate", gst::Fraction::new(fps as i32, 1))
        .build()
}

/// `video/x-raw(memory:NVMM)` with an optional format and size.
pub fn nvmm_caps(format: Option<&str>, size: Option<(u32, u32, u32)>) -> gst::Caps {
    let mut builder = gst::Caps::builder("video/x-raw").features(["memory:NVMM"]);

    if let Some(format) = format {
        builder = builder.field("format", format);
    }

    if let Some((width, height, fps)) = size {
        builder = builder
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", gst::Fraction::new(fps as i32, 1));
    }

    builder.build()
}

/// `batched-push-timeout` for the muxer: one frame interval, in microseconds.
pub fn push_timeout_us(fps: u32) -> i32 {
    (1_000_000 / fps.max(1)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        gst::init().unwrap();
    }

    #[test]
    fn push_timeout() {
        assert_eq!(push_timeout_us(30), 33_333);
        assert_eq!(push_timeout_us(1), 1_000_000);
        assert_eq!(push_timeout_us(0), 1_000_000);
    }

    #[test]
    fn nvmm_caps_strings() {
        init();

        let caps = nvmm_caps(Some("NV12"), None);
        let s = caps.structure(0).unwrap();
        assert_eq!(s.name().as_str(), "video/x-raw");
        assert_eq!(s.get::<&str>("format").unwrap(), "NV12");
        assert!(caps.features(0).unwrap().contains("memory:NVMM"));

        let caps = nvmm_caps(Some("RGBA"), Some((1280, 720, 30)));
        let s = caps.structure(0).unwrap();
        assert_eq!(s.get::<i32>("width").unwrap(), 1280);
        assert_eq!(s.get::<gst::Fraction>("framerate").unwrap(), gst::Fraction::new(30, 1));
    }

    #[test]
    fn mjpeg_caps_fields() {
        init();

        let caps = mjpeg_caps(640, 480, 15);
        let s = caps.structure(0).unwrap();
        assert_eq!(s.name().as_str(), "image/jpeg");
        assert_eq!(s.get::<i32>("height").unwrap(), 480);
    }

    #[test]
    fn queue_settings() {
        init();

        let queue = make_queue("q_main", true, 1).unwrap();
        assert_eq!(queue.property::<u32>("max-size-buffers"), 1);
        assert_eq!(queue.property::<u64>("max-size-time"), 0);
    }

    #[test]
    fn first_available_factory() {
        init();

        let element = make_first(&["smartcam-missing-enc", "identity"], "enc").unwrap();
        assert_eq!(element.name(), "enc");

        assert!(make_first(&["smartcam-missing-enc"], "enc").is_err());
    }

    #[test]
    fn tee_pads_and_chain() {
        init();

        let pipeline = gst::Pipeline::new();
        let tee = make("tee", "tee").unwrap();
        let queue = make_queue("q", false, 30).unwrap();
        let sink = make("fakesink", "sink").unwrap();
        pipeline.add_many([&tee, &queue, &sink]).unwrap();

        let src = request_tee_src(&tee).unwrap();
        link_pads(&src, &static_pad(&queue, "sink").unwrap()).unwrap();
        link_chain(&[&queue, &sink]).unwrap();

        assert!(src.is_linked());
        assert!(static_pad(&sink, "src").is_err());
    }

    #[test]
    fn branch_is_attached_to_tee() {
        init();

        let pipeline = gst::Pipeline::new();
        let tee = make("tee", "tee").unwrap();
        pipeline.add(&tee).unwrap();

        let branch = [
            make_queue("q_sr", false, 30).unwrap(),
            make("identity", "sr_conv").unwrap(),
            make("fakesink", "recordbin").unwrap(),
        ];
        attach_branch(&pipeline, &tee, &branch).unwrap();

        assert_eq!(pipeline.children().len(), 4);
        assert!(static_pad(&branch[0], "sink").unwrap().is_linked());
        assert!(static_pad(&branch[2], "sink").unwrap().is_linked());
    }

    #[test]
    fn failed_branch_is_taken_out_again() {
        init();

        let pipeline = gst::Pipeline::new();
        let tee = make("tee", "tee").unwrap();
        pipeline.add(&tee).unwrap();

        // fakesink has no src pad, so the chain breaks after it
        let branch = [
            make_queue("q_sr", false, 30).unwrap(),
            make("fakesink", "sr_enc").unwrap(),
            make("identity", "recordbin").unwrap(),
        ];
        let err = attach_branch(&pipeline, &tee, &branch).unwrap_err();

        assert!(err.to_string().contains("sr_enc"));
        assert_eq!(pipeline.children().len(), 1);
        assert!(tee.src_pads().is_empty());
        assert!(branch.iter().all(|element| element.parent().is_none()));
        assert!(attach_branch(&pipeline, &tee, &[]).is_err());
    }
}
