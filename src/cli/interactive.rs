use std::path::Path;

use anyhow::Context;
use clap::Parser;
use futures::{AsyncWriteExt, FutureExt};
use prettytable::{row, Table};
use rustyline_async::{Readline, ReadlineEvent, SharedWriter};
use sc_client::{ChannelCommandSink, CommandSink};
use sc_smart_record::{RecordRequest, RecordResponse, SourceStatus};
use tokio::select;
use tokio_util::sync::CancellationToken;

pub const PROMPT: &str = "sc> ";

#[derive(Parser, Debug)]
#[clap(setting(clap::AppSettings::NoBinaryName))]
#[clap(rename_all = "kebab-case")]
enum Commands {
    #[clap(subcommand)]
    Record(RecordRequest),
    Exit,
}

pub type RecordSink = ChannelCommandSink<RecordRequest, RecordResponse>;

fn status_table(status: &[SourceStatus]) -> String {
    if status.is_empty() {
        return "no recorders attached\n".to_owned();
    }

    let mut table = Table::new();
    table.set_titles(row![
        "source", "name", "backend", "started", "saved", "failed", "last trigger", "last clip"
    ]);

    for source in status {
        let last_trigger = match (&source.last_label, &source.last_started_at) {
            (Some(label), Some(at)) => format!("{label} @ {}", at.format("%H:%M:%S")),
            (Some(label), None) => label.clone(),
            _ => "-".to_owned(),
        };
        let last_clip = source
            .last_clip
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_owned());

        table.add_row(row![
            source.source_id,
            source.name,
            source.backend,
            source.started,
            source.completed,
            source.failed,
            last_trigger,
            last_clip
        ]);
    }

    table.to_string()
}

fn render(response: &RecordResponse) -> String {
    match response {
        RecordResponse::Started(outcome) => format!("{outcome}\n"),
        RecordResponse::Stopped => "recording stopped\n".to_owned(),
        RecordResponse::Status(status) => status_table(status),
    }
}

/// Runs one console line. Returns `false` once the operator asked to exit.
async fn execute(
    line: &str,
    stdout: &mut SharedWriter,
    record_cmd_tx: Option<&RecordSink>,
) -> anyhow::Result<bool> {
    let request: Result<Commands, _> = Parser::try_parse_from(line.split_ascii_whitespace());

    let request = match request {
        Ok(request) => request,
        Err(err) => {
            stdout.write_all(err.to_string().as_bytes()).await?;
            return Ok(true);
        }
    };

    match request {
        Commands::Record(request) => match record_cmd_tx {
            Some(record_cmd_tx) => match record_cmd_tx.command(request).await {
                Ok(response) => stdout.write_all(render(&response).as_bytes()).await?,
                Err(err) => error!("{err:#}"),
            },
            None => error!("recording is disabled"),
        },
        Commands::Exit => {
            info!("exiting");
            return Ok(false);
        }
    }

    Ok(true)
}

/// Executes every non-empty line of `path` that is not a `#` comment.
pub async fn run_script(
    path: &Path,
    stdout: &mut SharedWriter,
    record_cmd_tx: Option<&RecordSink>,
) -> anyhow::Result<bool> {
    let script = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read script {}", path.display()))?;

    for line in script.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        stdout
            .write_all(format!("{PROMPT}{line}\n").as_bytes())
            .await?;

        if !execute(line, stdout, record_cmd_tx).await? {
            return Ok(false);
        }
    }

    Ok(true)
}

pub async fn run_interactive_cli(
    mut editor: Readline,
    mut stdout: SharedWriter,
    script: Option<std::path::PathBuf>,
    record_cmd_tx: Option<RecordSink>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    if let Some(script) = script {
        if !run_script(&script, &mut stdout, record_cmd_tx.as_ref()).await? {
            cancellation_token.cancel();
            return Ok(());
        }
    }

    loop {
        select! {
            _ = cancellation_token.cancelled() => {
                break;
            }
            result = editor.readline().fuse() => {
                match result {
                    Ok(ReadlineEvent::Line(line)) => {
                        let line = line.trim().to_owned();
                        if line.is_empty() {
                            continue;
                        }

                        stdout.write_all(format!("{PROMPT}{line}\n").as_bytes()).await?;
                        editor.add_history_entry(line.clone());

                        if !execute(&line, &mut stdout, record_cmd_tx.as_ref()).await? {
                            break;
                        }
                    }
                    Ok(ReadlineEvent::Eof) | Ok(ReadlineEvent::Interrupted) => {
                        info!("received interrupt, shutting down");
                        break;
                    }
                    Err(err) => {
                        error!("interactive error: {:#?}", err);
                        break;
                    }
                };
            }
        }
    }

    cancellation_token.cancel();
    editor.flush().context("failed to flush console")?;

    Ok(())
}
