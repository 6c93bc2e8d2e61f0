use anyhow::{bail, Context};
use gst::prelude::*;
use log::*;
use sc_deepstream::{MetaApi, SmartRecordApi};
use sc_detection::OverlayFilter;
use sc_smart_record::{
    lock_recorder, EncoderConfig, ManualBackend, RecordingEvent, SharedRecorder, SourceBinBackend,
};

use crate::element::*;
use crate::probe::{AutoRecord, OsdProbe};
use crate::{PipelineConfig, SinkKind, SourceKind};

/// Makes nvstreammux forward frames as they arrive instead of waiting for
/// full batches.
pub const ADAPTIVE_BATCHING_ENV: &str = "NVSTREAMMUX_ADAPTIVE_BATCHING";

/// Source id of the only camera.
const SOURCE_ID: u32 = 0;

/// Recording hooks handed to the builder.
#[derive(Clone)]
pub struct Recording {
    pub recorder: SharedRecorder,
    pub events: flume::Sender<RecordingEvent>,
    /// Start clips automatically when a target shows up.
    pub auto_trigger: bool,
}

pub struct CameraPipeline {
    pub pipeline: gst::Pipeline,
    /// Whether a smart record backend was attached.
    pub recording: bool,
}

pub fn build(config: &PipelineConfig, recording: Option<&Recording>) -> anyhow::Result<CameraPipeline> {
    std::env::set_var(ADAPTIVE_BATCHING_ENV, "yes");

    match config.source.kind {
        SourceKind::Usb => build_usb(config, recording),
        SourceKind::Uri => build_uri(config, recording),
    }
}

/// Elements of the display branch that the source side links to.
struct DisplayBranch {
    mux: gst::Element,
    osd: gst::Element,
}

fn build_display(pipeline: &gst::Pipeline, config: &PipelineConfig) -> anyhow::Result<DisplayBranch> {
    let source = &config.source;
    let size = Some((source.width, source.height, source.fps));

    let mux = make("nvstreammux", "mux")?;
    let caps_post_mux = make_capsfilter("caps_post_mux", &nvmm_caps(None, size))?;
    let pgie = make("nvinfer", "pgie")?;
    let conv_rgba = make("nvvideoconvert", "conv_rgba")?;
    let caps_rgba = make_capsfilter("caps_rgba", &nvmm_caps(Some("RGBA"), size))?;
    let osd = make("nvdsosd", "osd")?;

    set_required(&mux, "batch-size", config.inference.batch_size)?;
    set_required(&mux, "width", source.width)?;
    set_required(&mux, "height", source.height)?;
    set_required(&mux, "batched-push-timeout", push_timeout_us(source.fps))?;
    set_optional(&mux, "live-source", source.is_live());
    set_optional(&mux, "sync-inputs", false);

    set_required(
        &pgie,
        "config-file-path",
        config.inference.config_file.to_string_lossy().into_owned(),
    )?;
    set_required(&pgie, "unique-id", config.inference.unique_id)?;
    set_optional(&pgie, "batch-size", config.inference.batch_size);

    let mut chain = vec![mux.clone(), caps_post_mux, pgie, conv_rgba, caps_rgba, osd.clone()];

    let sink = match config.display.sink {
        SinkKind::Egl => {
            if config.platform.jetson {
                chain.push(make("nvegltransform", "egltrans")?);
            }
            make("nveglglessink", "sink")?
        }
        SinkKind::Fake => make("fakesink", "sink")?,
    };

    set_optional(&sink, "sync", config.display.sync);
    set_optional(&sink, "qos", true);
    set_optional(&sink, "force-aspect-ratio", true);
    chain.push(sink);

    pipeline
        .add_many(&chain)
        .context("failed to add display elements")?;
    link_chain(&chain.iter().collect::<Vec<_>>())?;

    Ok(DisplayBranch { mux, osd })
}

fn install_probe(
    config: &PipelineConfig,
    osd: &gst::Element,
    recording: Option<&Recording>,
    attached: bool,
) -> anyhow::Result<()> {
    let meta = MetaApi::load().context("failed to load DeepStream metadata library")?;
    let filter = OverlayFilter::new(&config.detection);

    let auto_record = match recording {
        Some(recording) if attached && recording.auto_trigger => Some(AutoRecord::new(
            recording.recorder.clone(),
            SOURCE_ID,
            config.detection.target_label.trim().to_lowercase(),
        )?),
        _ => None,
    };

    OsdProbe::new(meta, filter, auto_record)
        .install(&static_pad(osd, "sink")?)
        .context("failed to install osd probe")?;

    Ok(())
}

fn make_encoder(config: &EncoderConfig) -> anyhow::Result<gst::Element> {
    let encoder = make_first(&["nvv4l2h264enc", "openh264enc"], "sr_enc")
        .context("no H.264 encoder available")?;

    if let Some(factory) = encoder.factory() {
        debug!("encoding clips with {}", factory.name());
    }

    set_optional(&encoder, "bitrate", config.bitrate);
    set_optional(&encoder, "insert-sps-pps", true);
    set_optional(&encoder, "iframeinterval", config.iframe_interval);

    Ok(encoder)
}

/// `tee -> queue -> convert -> encode -> parse -> recordbin`. Leaves the
/// pipeline untouched on failure.
fn build_record_branch(
    pipeline: &gst::Pipeline,
    tee: &gst::Element,
    recording: &Recording,
    recordbin: gst::Element,
) -> anyhow::Result<()> {
    let encoder_config = lock_recorder(&recording.recorder)?.config().encoder.clone();

    let branch = [
        make_queue("q_sr", false, 30)?,
        make("nvvideoconvert", "sr_conv")?,
        make_encoder(&encoder_config)?,
        make("h264parse", "sr_parse")?,
        recordbin,
    ];

    attach_branch(pipeline, tee, &branch)
}

/// Creates a manual smart record context for the camera and returns its
/// recordbin. Recording is optional, so failures are logged and swallowed.
fn attach_manual(recording: &Recording, name: &str) -> Option<gst::Element> {
    let attach = || -> anyhow::Result<gst::Element> {
        let api = SmartRecordApi::load()?;
        let mut recorder = lock_recorder(&recording.recorder)?;

        let backend = ManualBackend::attach(
            api,
            recorder.config(),
            recorder.dir(),
            SOURCE_ID,
            name,
            recording.events.clone(),
        )?;
        let recordbin = backend.recordbin()?;

        recorder.attach(SOURCE_ID, name, Box::new(backend));
        Ok(recordbin)
    };

    match attach() {
        Ok(recordbin) => Some(recordbin),
        Err(err) => {
            warn!("recording disabled, smart record is not available: {err:#}");
            None
        }
    }
}

pub fn build_usb(config: &PipelineConfig, recording: Option<&Recording>) -> anyhow::Result<CameraPipeline> {
    let source = &config.source;
    let pipeline = gst::Pipeline::with_name("smartcam-usb");

    let v4l2 = make("v4l2src", "v4l2src")?;
    set_required(&v4l2, "device", source.device.as_str())?;

    let mut decode = vec![v4l2];

    if source.mjpeg {
        let caps = make_capsfilter("caps_mjpg", &mjpeg_caps(source.width, source.height, source.fps))?;
        let decoder = make("nvv4l2decoder", "mjpeg_dec")?;
        set_optional(&decoder, "mjpeg", true);
        decode.push(caps);
        decode.push(decoder);
    } else {
        decode.push(make_capsfilter(
            "caps_raw",
            &raw_caps(source.width, source.height, source.fps),
        )?);
    }

    let upload = if config.platform.jetson { "nvvidconv" } else { "nvvideoconvert" };
    decode.push(make(upload, "nvvidconv")?);
    decode.push(make_capsfilter("caps_nvmm", &nvmm_caps(Some("NV12"), None))?);

    let tee = make("tee", "tee")?;
    set_required(&tee, "allow-not-linked", true)?;
    decode.push(tee.clone());

    pipeline
        .add_many(&decode)
        .context("failed to add source elements")?;
    link_chain(&decode.iter().collect::<Vec<_>>())?;

    // display branch: tee -> leaky queue -> mux.sink_0 -> ... -> sink
    let q_main = make_queue("q_main", true, 1)?;
    pipeline.add(&q_main).context("failed to add q_main")?;
    link_pads(&request_tee_src(&tee)?, &static_pad(&q_main, "sink")?)?;

    let display = build_display(&pipeline, config)?;
    let mux_sink = display
        .mux
        .request_pad_simple("sink_0")
        .context("could not request mux.sink_0")?;
    link_pads(&static_pad(&q_main, "src")?, &mux_sink)?;

    let recordbin = match recording {
        Some(recording) => attach_manual(recording, &source.display_name()),
        None => None,
    };

    let attached = match (recordbin, recording) {
        (Some(recordbin), Some(recording)) => {
            match build_record_branch(&pipeline, &tee, recording, recordbin) {
                Ok(()) => {
                    info!("smart record linked for {}", source.display_name());
                    true
                }
                Err(err) => {
                    warn!("recording disabled, could not link the recordbin: {err:#}");
                    match lock_recorder(&recording.recorder) {
                        Ok(mut recorder) => {
                            recorder.detach(SOURCE_ID);
                        }
                        Err(err) => error!("{err:#}"),
                    }
                    false
                }
            }
        }
        _ => false,
    };

    install_probe(config, &display.osd, recording, attached)?;

    Ok(CameraPipeline {
        pipeline,
        recording: attached,
    })
}

pub fn build_uri(config: &PipelineConfig, recording: Option<&Recording>) -> anyhow::Result<CameraPipeline> {
    let source = &config.source;
    let uri = match source.uri.as_deref() {
        Some(uri) => uri,
        None => bail!("uri source without a uri"),
    };

    let pipeline = gst::Pipeline::with_name("smartcam-uri");

    let src = make("nvurisrcbin", "uri_src")?;
    set_required(&src, "uri", uri)?;
    pipeline.add(&src).context("failed to add nvurisrcbin")?;

    let display = build_display(&pipeline, config)?;
    let mux_sink = display
        .mux
        .request_pad_simple("sink_0")
        .context("could not request mux.sink_0")?;

    src.connect_pad_added(move |_src, pad| {
        let is_video = pad
            .current_caps()
            .unwrap_or_else(|| pad.query_caps(None))
            .structure(0)
            .map(|s| s.name().starts_with("video/"))
            .unwrap_or(false);

        if !is_video || mux_sink.is_linked() {
            trace!("ignoring pad {}", pad.name());
            return;
        }

        match link_pads(pad, &mux_sink) {
            Ok(()) => debug!("linked {} to the muxer", pad.name()),
            Err(err) => error!("{err:#}"),
        }
    });

    let attached = match recording {
        Some(recording) => {
            let attach = || -> anyhow::Result<()> {
                let mut recorder = lock_recorder(&recording.recorder)?;
                let backend = SourceBinBackend::attach(
                    &src,
                    recorder.config(),
                    recorder.dir(),
                    SOURCE_ID,
                    recording.events.clone(),
                )?;
                recorder.attach(SOURCE_ID, uri, Box::new(backend));
                Ok(())
            };

            match attach() {
                Ok(()) => true,
                Err(err) => {
                    warn!("recording disabled for {uri}: {err:#}");
                    false
                }
            }
        }
        None => false,
    };

    install_probe(config, &display.osd, recording, attached)?;

    Ok(CameraPipeline {
        pipeline,
        recording: attached,
    })
}
