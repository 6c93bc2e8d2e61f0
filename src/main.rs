use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use ctrlc;
use rustyline_async::{Readline, SharedWriter};
use sc_pipeline::{Recording, SinkKind};
use sc_smart_record::SmartRecorder;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::cli::args::MainArgs;
use crate::cli::interactive::{run_interactive_cli, PROMPT};
use crate::config::SmartcamConfig;

#[macro_use]
extern crate tracing;

mod cli;
mod config;

/// Targets written to the log files at debug level.
const FILE_LOG_TARGETS: &[&str] = &[
    "smartcam",
    "sc_client",
    "sc_deepstream",
    "sc_detection",
    "sc_pipeline",
    "sc_smart_record",
];

fn console_targets() -> anyhow::Result<Targets> {
    let mut targets = Targets::new();

    match std::env::var("RUST_LOG") {
        Ok(directives) => {
            for directive in directives.split(',') {
                if let Some((target, level)) = directive.split_once('=') {
                    targets = targets.with_target(
                        target,
                        level.parse::<LevelFilter>().context("invalid log level")?,
                    );
                } else {
                    targets = targets.with_default(
                        directive
                            .parse::<LevelFilter>()
                            .context("invalid log level")?,
                    );
                }
            }
        }
        Err(_) => targets = targets.with_default(LevelFilter::INFO),
    }

    Ok(targets)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // setup colorful backtraces
    color_backtrace::install();

    // set up logging and interactive line editor
    let (editor, stdout) =
        Readline::new(PROMPT.into()).context("failed to create interactive editor")?;

    let (writer, _guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::hourly("logs", "smartcam"));

    let reg = tracing_subscriber::registry();

    #[cfg(tokio_unstable)]
    let reg = reg.with(console_subscriber::spawn());

    reg
        // writer that outputs to console
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer({
                    let stdout = stdout.clone();
                    move || stdout.clone()
                })
                .with_filter(console_targets()?),
        )
        // writer that outputs to files
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(Targets::new().with_targets(
                    FILE_LOG_TARGETS
                        .iter()
                        .map(|target| (*target, LevelFilter::DEBUG)),
                )),
        )
        .init();

    let main_args = MainArgs::parse();

    debug!("reading config from {:?}", &main_args.config);
    let mut config =
        SmartcamConfig::read_from_path(&main_args.config).context("failed to read config file")?;

    if main_args.headless {
        config.display.sink = SinkKind::Fake;
    }

    run_tasks(config, main_args, editor, stdout).await
}

async fn run_tasks(
    config: SmartcamConfig,
    main_args: MainArgs,
    editor: Readline,
    stdout: SharedWriter,
) -> anyhow::Result<()> {
    let cancellation_token = CancellationToken::new();

    ctrlc::set_handler({
        let cancellation_token = cancellation_token.clone();
        move || {
            info!("received interrupt, shutting down");
            cancellation_token.cancel();
        }
    })
    .expect("could not set ctrl+c handler");

    gst::init().context("failed to init gstreamer")?;

    let mut tasks = Vec::<Box<dyn sc_client::Task>>::new();

    let recorder = if config.record.enabled {
        debug!("initializing smart recorder");
        let recorder = SmartRecorder::new(config.record.clone())
            .context("failed to initialize smart recorder")?;
        Some(Arc::new(Mutex::new(recorder)))
    } else {
        info!("recording is disabled");
        None
    };

    let (events_tx, events_rx) = flume::unbounded();
    let recording = recorder.as_ref().map(|recorder| Recording {
        recorder: recorder.clone(),
        events: events_tx,
        auto_trigger: config.record.auto_trigger,
    });

    debug!("building pipeline");
    let camera = sc_pipeline::build(&config.pipeline(), recording.as_ref())
        .context("failed to build pipeline")?;
    // backends hold their own senders
    drop(recording);

    if camera.recording {
        info!("smart record is armed");
    } else if recorder.is_some() {
        warn!("no smart record backend attached, clips cannot be recorded");
    }

    let record_cmd_tx = recorder.clone().map(|recorder| {
        let record_task = sc_smart_record::create_task(recorder, events_rx);
        let record_cmd_tx = record_task.cmd();
        tasks.push(Box::new(record_task));
        record_cmd_tx
    });

    tasks.push(Box::new(sc_pipeline::create_task(camera, recorder)));

    let mut join_set = JoinSet::new();

    join_set.spawn(run_interactive_cli(
        editor,
        stdout,
        main_args.script,
        record_cmd_tx,
        cancellation_token.clone(),
    ));

    for task in tasks {
        debug!("starting {} task", task.name());
        join_set.spawn(task.run(cancellation_token.clone()));
    }

    let mut result = Ok(());

    // keep draining after a failure so that the pipeline task can bring the
    // pipeline down before the recorder is released
    while let Some(res) = join_set.join_next().await {
        // if task panicked, then will be Some(Err)
        // if task terminated w/ error, then will be Some(Ok(Err))
        // need to propagate errors in both cases

        let err = match res {
            Err(err) => anyhow::Error::from(err).context("task failed"),
            Ok(Err(err)) => err.context("task terminated with error"),
            Ok(Ok(())) => {
                info!("exited task");
                continue;
            }
        };

        cancellation_token.cancel();

        if result.is_ok() {
            result = Err(err);
        } else {
            error!("{err:#}");
        }
    }

    result
}
