use std::time::Instant;

use anyhow::bail;
use async_trait::async_trait;
use log::*;
use sc_client::{command_channel, ChannelCommandSink, ChannelCommandSource, Task};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::*;

pub struct RecordTask {
    recorder: SharedRecorder,
    events: flume::Receiver<RecordingEvent>,
    cmd_tx: ChannelCommandSink<RecordRequest, RecordResponse>,
    cmd_rx: ChannelCommandSource<RecordRequest, RecordResponse>,
}

pub fn create_task(recorder: SharedRecorder, events: flume::Receiver<RecordingEvent>) -> RecordTask {
    let (cmd_tx, cmd_rx) = command_channel();

    RecordTask {
        recorder,
        events,
        cmd_tx,
        cmd_rx,
    }
}

impl RecordTask {
    pub fn cmd(&self) -> ChannelCommandSink<RecordRequest, RecordResponse> {
        self.cmd_tx.clone()
    }
}

fn handle(recorder: &SharedRecorder, request: RecordRequest) -> anyhow::Result<RecordResponse> {
    let mut recorder = lock_recorder(recorder)?;

    match request {
        RecordRequest::Start {
            label,
            back,
            front,
            source,
        } => {
            if front == Some(0) {
                bail!("--front must be at least one second");
            }

            let config = recorder.config();
            let trigger = Trigger {
                back_sec: back.unwrap_or(config.back_sec),
                front_sec: front.unwrap_or(config.front_sec),
                label,
            };

            Ok(RecordResponse::Started(recorder.start(
                source,
                &trigger,
                Instant::now(),
            )))
        }
        RecordRequest::Stop { source } => {
            recorder.stop(source)?;
            Ok(RecordResponse::Stopped)
        }
        RecordRequest::Status => Ok(RecordResponse::Status(recorder.status())),
    }
}

#[async_trait]
impl Task for RecordTask {
    fn name(&self) -> &'static str {
        "smart-record"
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let Self {
            recorder,
            events,
            cmd_rx,
            ..
        } = *self;

        let mut events_open = true;

        loop {
            select! {
                _ = cancel.cancelled() => {
                    break;
                }
                event = events.recv_async(), if events_open => {
                    let event = match event {
                        Ok(event) => event,
                        Err(_) => {
                            // every backend is gone, keep serving status
                            events_open = false;
                            continue;
                        }
                    };

                    info!(
                        "saved '{}' clip {} ({:.1}s)",
                        event.label,
                        event.path().display(),
                        event.duration_ms as f64 / 1000.0
                    );

                    let metadata = {
                        let mut recorder = lock_recorder(&recorder)?;
                        recorder.record_completed(&event);
                        recorder.config().metadata
                    };

                    if metadata {
                        if let Err(err) = write_metadata(&event).await {
                            warn!("could not write metadata for {}: {err:#}", event.file);
                        }
                    }
                }
                cmd = cmd_rx.recv_async() => {
                    let (request, ret_tx) = match cmd {
                        Ok(cmd) => cmd,
                        Err(_) => break,
                    };

                    let result = tokio::task::block_in_place(|| handle(&recorder, request));
                    let _ = ret_tx.send(result);
                }
            }
        }

        debug!("record task stopped");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use sc_client::CommandSink;

    use super::*;

    struct NullBackend;

    impl RecordBackend for NullBackend {
        fn kind(&self) -> &'static str {
            "null"
        }

        fn start(&mut self, _back_sec: u32, _front_sec: u32, _label: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn shared(dir: &std::path::Path) -> SharedRecorder {
        let mut recorder = SmartRecorder::new(SmartRecordConfig {
            dir: dir.to_owned(),
            back_sec: 8,
            front_sec: 4,
            ..Default::default()
        })
        .unwrap();
        recorder.attach(0, "cam0", Box::new(NullBackend));

        Arc::new(Mutex::new(recorder))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_start_uses_configured_window() {
        let tmp = tempfile::tempdir().unwrap();
        let (_events_tx, events_rx) = flume::unbounded();
        let task = create_task(shared(tmp.path()), events_rx);
        let cmd = task.cmd();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Box::new(task).run(cancel.clone()));

        let response = cmd
            .command(RecordRequest::Start {
                label: "manual".to_owned(),
                back: None,
                front: None,
                source: 0,
            })
            .await
            .unwrap();

        match response {
            RecordResponse::Started(outcome) => assert_eq!(
                outcome,
                StartOutcome::Started {
                    back_sec: 8,
                    front_sec: 4
                }
            ),
            other => panic!("unexpected response {other:?}"),
        }

        // second start falls inside the cooldown
        match cmd
            .command(RecordRequest::Start {
                label: "manual".to_owned(),
                back: Some(1),
                front: Some(1),
                source: 0,
            })
            .await
            .unwrap()
        {
            RecordResponse::Started(StartOutcome::CoolingDown { .. }) => {}
            other => panic!("unexpected response {other:?}"),
        }

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completion_events_reach_status() {
        let tmp = tempfile::tempdir().unwrap();
        let (events_tx, events_rx) = flume::unbounded();
        let task = create_task(shared(tmp.path()), events_rx);
        let cmd = task.cmd();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Box::new(task).run(cancel.clone()));

        events_tx
            .send(RecordingEvent {
                source_id: 0,
                session_id: 0,
                label: "person".to_owned(),
                file: "cam0_1.mp4".to_owned(),
                dir: tmp.path().to_owned(),
                duration_ms: 12_000,
            })
            .unwrap();

        // commands and events are served by the same loop, so poll until the
        // event has been folded in
        let mut completed = 0;
        for _ in 0..50 {
            match cmd.command(RecordRequest::Status).await.unwrap() {
                RecordResponse::Status(status) => completed = status[0].completed,
                other => panic!("unexpected response {other:?}"),
            }
            if completed == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(completed, 1);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bad_windows_are_rejected_without_killing_the_task() {
        let tmp = tempfile::tempdir().unwrap();
        let (_events_tx, events_rx) = flume::unbounded();
        let task = create_task(shared(tmp.path()), events_rx);
        let cmd = task.cmd();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Box::new(task).run(cancel.clone()));

        let err = cmd
            .command(RecordRequest::Start {
                label: "manual".to_owned(),
                back: None,
                front: Some(0),
                source: 0,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--front"));

        // the backend sees the full window; nothing overflows on the way
        match cmd
            .command(RecordRequest::Start {
                label: "manual".to_owned(),
                back: Some(8),
                front: Some(u32::MAX),
                source: 0,
            })
            .await
            .unwrap()
        {
            RecordResponse::Started(outcome) => assert_eq!(
                outcome,
                StartOutcome::Started {
                    back_sec: 8,
                    front_sec: u32::MAX
                }
            ),
            other => panic!("unexpected response {other:?}"),
        }

        // the recorder lock is still usable
        assert!(matches!(
            cmd.command(RecordRequest::Status).await.unwrap(),
            RecordResponse::Status(_)
        ));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_of_unknown_source_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (_events_tx, events_rx) = flume::unbounded();
        let task = create_task(shared(tmp.path()), events_rx);
        let cmd = task.cmd();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Box::new(task).run(cancel.clone()));

        assert!(cmd.command(RecordRequest::Stop { source: 4 }).await.is_err());
        assert!(cmd.command(RecordRequest::Stop { source: 0 }).await.is_ok());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn parses_console_arguments() {
        use clap::Parser;

        #[derive(Parser, Debug)]
        #[clap(setting(clap::AppSettings::NoBinaryName))]
        struct Line {
            #[clap(subcommand)]
            request: RecordRequest,
        }

        let line = Line::try_parse_from(["start", "-l", "door", "--back", "5"]).unwrap();
        assert_eq!(
            line.request,
            RecordRequest::Start {
                label: "door".to_owned(),
                back: Some(5),
                front: None,
                source: 0,
            }
        );

        let line = Line::try_parse_from(["start"]).unwrap();
        assert!(matches!(line.request, RecordRequest::Start { ref label, .. } if label == "manual"));

        assert!(Line::try_parse_from(["rewind"]).is_err());
    }
}
