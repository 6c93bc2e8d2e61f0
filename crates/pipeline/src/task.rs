use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::StreamExt;
use gst::prelude::*;
use log::*;
use sc_client::Task;
use sc_smart_record::SharedRecorder;
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::CameraPipeline;

pub struct PipelineTask {
    pipeline: gst::Pipeline,
    recorder: Option<SharedRecorder>,
}

pub fn create_task(camera: CameraPipeline, recorder: Option<SharedRecorder>) -> PipelineTask {
    PipelineTask {
        pipeline: camera.pipeline,
        recorder,
    }
}

fn shutdown(pipeline: &gst::Pipeline, recorder: Option<&SharedRecorder>) {
    debug!("setting pipeline to null state");

    if let Err(err) = pipeline.set_state(gst::State::Null) {
        error!("failed to stop pipeline: {err:?}");
    }

    let (result, state, _) = pipeline.state(gst::ClockTime::NONE);
    if let Err(err) = result {
        error!("pipeline did not reach null state: {err:?}");
    } else {
        trace!("pipeline is {state:?}");
    }

    // smart record contexts must outlive the streaming threads, and must be
    // released even if a holder of the lock panicked
    if let Some(recorder) = recorder {
        let mut recorder = match recorder.lock() {
            Ok(recorder) => recorder,
            Err(poisoned) => {
                warn!("smart recorder lock poisoned, releasing recorders anyway");
                poisoned.into_inner()
            }
        };
        recorder.cleanup();
    }
}

#[async_trait]
impl Task for PipelineTask {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let Self { pipeline, recorder } = *self;

        let bus = pipeline.bus().context("pipeline has no bus")?;
        let mut messages = bus.stream();

        if let Err(err) = pipeline.set_state(gst::State::Playing) {
            tokio::task::block_in_place(|| shutdown(&pipeline, recorder.as_ref()));
            return Err(err).context("failed to start the pipeline");
        }

        info!("pipeline started");

        let result = loop {
            select! {
                _ = cancel.cancelled() => {
                    break Ok(());
                }
                msg = messages.next() => {
                    use gst::MessageView;

                    let msg = match msg {
                        Some(msg) => msg,
                        None => break Ok(()),
                    };

                    match msg.view() {
                        MessageView::Eos(_) => {
                            info!("end of stream");
                            cancel.cancel();
                            break Ok(());
                        }
                        MessageView::Error(err) => {
                            break Err(anyhow!(
                                "error from {}: {} ({})",
                                err.src().map(|s| s.path_string().to_string()).unwrap_or_default(),
                                err.error(),
                                err.debug().map(|d| d.to_string()).unwrap_or_default()
                            ));
                        }
                        MessageView::Warning(warning) => {
                            warn!(
                                "warning from {}: {}",
                                warning.src().map(|s| s.path_string().to_string()).unwrap_or_default(),
                                warning.error()
                            );
                        }
                        MessageView::StateChanged(change) => {
                            if change.src() == Some(pipeline.upcast_ref::<gst::Object>()) {
                                debug!("pipeline {:?} -> {:?}", change.old(), change.current());
                            }
                        }
                        msg => trace!("bus: {msg:?}"),
                    }
                }
            }
        };

        tokio::task::block_in_place(|| shutdown(&pipeline, recorder.as_ref()));

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use sc_smart_record::{RecordBackend, SmartRecordConfig, SmartRecorder};

    use super::*;

    struct IdleBackend;

    impl RecordBackend for IdleBackend {
        fn kind(&self) -> &'static str {
            "idle"
        }

        fn start(&mut self, _: u32, _: u32, _: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn camera(desc: &str) -> CameraPipeline {
        gst::init().unwrap();

        let pipeline = gst::parse_launch(desc)
            .unwrap()
            .downcast::<gst::Pipeline>()
            .unwrap();
        assert!(pipeline.by_name("sink").is_some());

        CameraPipeline {
            pipeline,
            recording: false,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn eos_stops_the_service_and_releases_recorders() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = SmartRecorder::new(SmartRecordConfig {
            dir: tmp.path().to_owned(),
            ..Default::default()
        })
        .unwrap();
        recorder.attach(0, "cam0", Box::new(IdleBackend));
        let recorder = Arc::new(Mutex::new(recorder));

        let task = create_task(
            camera("videotestsrc num-buffers=5 ! fakesink name=sink"),
            Some(recorder.clone()),
        );
        let cancel = CancellationToken::new();

        tokio::time::timeout(Duration::from_secs(10), Box::new(task).run(cancel.clone()))
            .await
            .unwrap()
            .unwrap();

        assert!(cancel.is_cancelled());
        assert!(recorder.lock().unwrap().status().is_empty());
    }

    #[test]
    fn shutdown_releases_recorders_after_a_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = SmartRecorder::new(SmartRecordConfig {
            dir: tmp.path().to_owned(),
            ..Default::default()
        })
        .unwrap();
        recorder.attach(0, "cam0", Box::new(IdleBackend));
        let recorder = Arc::new(Mutex::new(recorder));

        let poisoner = recorder.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("recorder holder died");
        })
        .join();
        assert!(recorder.is_poisoned());

        let camera = camera("videotestsrc ! fakesink name=sink");
        shutdown(&camera.pipeline, Some(&recorder));

        let status = match recorder.lock() {
            Ok(recorder) => recorder.status(),
            Err(poisoned) => poisoned.into_inner().status(),
        };
        assert!(status.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_stops_a_live_pipeline() {
        let task = create_task(
            camera("videotestsrc is-live=true ! fakesink name=sink"),
            None,
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Box::new(task).run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn element_error_fails_the_task() {
        let task = create_task(
            camera("filesrc location=/nonexistent/smartcam.h264 ! fakesink name=sink"),
            None,
        );

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            Box::new(task).run(CancellationToken::new()),
        )
        .await
        .unwrap();

        // filesrc fails either while changing state or on the bus
        assert!(result.is_err());
    }
}
