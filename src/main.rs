use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use prose2voice::config::Config;
use prose2voice::setup;
use prose2voice::sink::{NullSink, PlaybackSink, WavFileSink};
use prose2voice::state::PipelineEvent;
use prose2voice::tts::create_tts_client;
use prose2voice::workflow::{Notification, PlaybackManager};
use std::io::Read;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = Config::load()?;
    config.validate()?;

    let (input_path, external_names) = parse_args()?;
    let text = read_input(input_path.as_deref())?;
    if text.trim().is_empty() {
        return Err(anyhow!("No input text; pass a file path or pipe text on stdin"));
    }

    let tts = create_tts_client(&config)?;
    setup::run_setup(&mut config, tts.as_ref()).await?;

    // The file sink needs finalizing after the run, so it is kept concrete.
    let (sink, file_sink): (Arc<dyn PlaybackSink>, Option<Arc<WavFileSink>>) =
        match config.audio.sink.as_str() {
            "file" => {
                let file = Arc::new(WavFileSink::new(config.audio.output_path.clone()));
                (file.clone(), Some(file))
            }
            "null" => (Arc::new(NullSink), None),
            #[cfg(feature = "playback")]
            "rodio" => (Arc::new(prose2voice::sink::RodioSink::new()?), None),
            other => return Err(anyhow!("Unknown playback sink: {}", other)),
        };

    let manager = PlaybackManager::new(config, tts, sink);
    let mut updates = manager.subscribe();
    let session_id = manager.play(&text, external_names.as_deref()).await?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    loop {
        match updates.recv().await {
            Ok(Notification::Pipeline { session_id: id, event }) if id == session_id => {
                match event {
                    PipelineEvent::ChunkQueued { .. } => bar.set_length(bar.length().unwrap_or(0) + 1),
                    PipelineEvent::ChunkStarted { speaker, .. } => {
                        bar.set_message(speaker.unwrap_or_default());
                    }
                    PipelineEvent::ChunkFinished { .. } => bar.inc(1),
                    PipelineEvent::ChunkFailed { block_index, chunk_index, message } => {
                        bar.println(format!(
                            "generation failed for block {block_index} chunk {chunk_index}: {message}"
                        ));
                    }
                    PipelineEvent::PlaybackFailed { index, message } => {
                        bar.inc(1);
                        bar.println(format!("playback failed at unit {index}: {message}"));
                    }
                    _ => {}
                }
            }
            Ok(Notification::StatusChanged { session_id: id, status, detail }) if id == session_id => {
                use prose2voice::state::Status;
                match status {
                    Status::Complete => {
                        bar.finish_with_message("done");
                        break;
                    }
                    Status::Error => {
                        bar.abandon_with_message("failed");
                        return Err(anyhow!(detail.unwrap_or_else(|| "session failed".into())));
                    }
                    Status::Idle => {
                        bar.abandon_with_message("stopped");
                        break;
                    }
                    _ => {}
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    if let Some(file) = file_sink {
        file.finalize().await?;
        println!("Audio written to {}", file.path().display());
    }

    Ok(())
}

/// CLI shape: `prose2voice [--characters a,b,c] [input.txt]`. Without a
/// path, text is read from stdin.
fn parse_args() -> Result<(Option<String>, Option<String>)> {
    let mut input_path = None;
    let mut names = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--characters" => {
                names = Some(
                    args.next()
                        .ok_or_else(|| anyhow!("--characters needs a comma-joined name list"))?,
                );
            }
            "--help" | "-h" => {
                println!("Usage: prose2voice [--characters NAME,NAME,...] [input.txt]");
                std::process::exit(0);
            }
            path if input_path.is_none() => input_path = Some(path.to_string()),
            extra => return Err(anyhow!("Unexpected argument: {}", extra)),
        }
    }
    Ok((input_path, names))
}

fn read_input(path: Option<&str>) -> Result<String> {
    match path {
        Some(path) => {
            std::fs::read_to_string(path).map_err(|e| anyhow!("Failed to read {}: {}", path, e))
        }
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}
