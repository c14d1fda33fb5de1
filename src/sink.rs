//! Playback sinks.
//!
//! A sink plays one [`PlayableUnit`] to completion at a time and can cancel
//! whatever is in flight. Sinks without their own speech engine reject
//! `Deferred` units; that surfaces as a non-fatal playback error.

use crate::tts::PlayableUnit;
use crate::utils::audio::WavAssembler;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Plays the unit to completion.
    async fn play(&self, unit: &PlayableUnit) -> Result<()>;
    /// Cancels any in-flight playback.
    fn cancel(&self);
}

/// Discards every unit immediately. Useful for dry runs and tests.
pub struct NullSink;

#[async_trait]
impl PlaybackSink for NullSink {
    async fn play(&self, _unit: &PlayableUnit) -> Result<()> {
        Ok(())
    }

    fn cancel(&self) {}
}

/// Renders the session into one contiguous WAV file. "Playing" a buffer
/// appends it to the stream; [`WavFileSink::finalize`] writes the file.
pub struct WavFileSink {
    path: PathBuf,
    assembler: Mutex<WavAssembler>,
}

impl WavFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            assembler: Mutex::new(WavAssembler::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the assembled audio out. A session with no successful units
    /// produces no file.
    pub async fn finalize(&self) -> Result<()> {
        let bytes = {
            let assembler = self.assembler.lock().unwrap();
            if assembler.is_empty() {
                info!("no audio was generated; skipping {}", self.path.display());
                return Ok(());
            }
            assembler.finish()?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        info!("wrote {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl PlaybackSink for WavFileSink {
    async fn play(&self, unit: &PlayableUnit) -> Result<()> {
        match unit {
            PlayableUnit::Buffer { data, .. } => self.assembler.lock().unwrap().append(data),
            PlayableUnit::Deferred { .. } => {
                bail!("the file sink cannot render deferred speech requests")
            }
        }
    }

    fn cancel(&self) {}
}

#[cfg(feature = "playback")]
pub use live::RodioSink;

#[cfg(feature = "playback")]
mod live {
    use super::*;
    use anyhow::anyhow;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    enum Command {
        Play(Vec<u8>, tokio::sync::oneshot::Sender<Result<()>>),
    }

    /// Live audio output. The rodio output stream is not `Send`, so a
    /// dedicated thread owns it and takes buffers over a channel.
    pub struct RodioSink {
        commands: mpsc::Sender<Command>,
        cancelled: std::sync::Arc<AtomicBool>,
    }

    impl RodioSink {
        pub fn new() -> Result<Self> {
            let (commands, receiver) = mpsc::channel::<Command>();
            let cancelled = std::sync::Arc::new(AtomicBool::new(false));
            let flag = cancelled.clone();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

            std::thread::spawn(move || {
                let (stream, handle) = match rodio::OutputStream::try_default() {
                    Ok(pair) => {
                        let _ = ready_tx.send(Ok(()));
                        pair
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(anyhow!("no audio output device: {e}")));
                        return;
                    }
                };
                let _stream = stream;

                while let Ok(Command::Play(data, done)) = receiver.recv() {
                    let result = play_buffer(&handle, data, &flag);
                    let _ = done.send(result);
                }
            });

            ready_rx
                .recv()
                .map_err(|_| anyhow!("audio thread exited during startup"))??;
            Ok(Self {
                commands,
                cancelled,
            })
        }
    }

    fn play_buffer(
        handle: &rodio::OutputStreamHandle,
        data: Vec<u8>,
        cancelled: &AtomicBool,
    ) -> Result<()> {
        let sink = rodio::Sink::try_new(handle).map_err(|e| anyhow!("audio sink error: {e}"))?;
        let source = rodio::Decoder::new(Cursor::new(data))
            .map_err(|e| anyhow!("undecodable audio unit: {e}"))?;
        sink.append(source);

        while !sink.empty() {
            if cancelled.load(Ordering::SeqCst) {
                sink.stop();
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    }

    #[async_trait]
    impl PlaybackSink for RodioSink {
        async fn play(&self, unit: &PlayableUnit) -> Result<()> {
            let data = match unit {
                PlayableUnit::Buffer { data, .. } => data.clone(),
                PlayableUnit::Deferred { .. } => {
                    bail!("the live sink cannot render deferred speech requests")
                }
            };

            self.cancelled.store(false, Ordering::SeqCst);
            let (done_tx, done_rx) = tokio::sync::oneshot::channel();
            self.commands
                .send(Command::Play(data, done_tx))
                .map_err(|_| anyhow!("audio thread is gone"))?;
            done_rx
                .await
                .map_err(|_| anyhow!("audio thread dropped the playback"))?
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::audio::dummy_wav;

    #[tokio::test]
    async fn file_sink_assembles_buffers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.wav");
        let sink = WavFileSink::new(&path);

        for _ in 0..3 {
            sink.play(&PlayableUnit::Buffer {
                data: dummy_wav(16, 24000),
                media_type: "audio/wav".into(),
            })
            .await?;
        }
        sink.finalize().await?;

        let written = std::fs::read(&path)?;
        assert_eq!(&written[0..4], b"RIFF");
        assert!(written.len() > 44);
        Ok(())
    }

    #[tokio::test]
    async fn file_sink_rejects_deferred_units() {
        let dir = tempfile::tempdir().unwrap();
        let sink = WavFileSink::new(dir.path().join("x.wav"));
        let unit = PlayableUnit::Deferred {
            text: "hi".into(),
            voice_id: None,
        };
        assert!(sink.play(&unit).await.is_err());
    }

    #[tokio::test]
    async fn finalize_without_audio_writes_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.wav");
        let sink = WavFileSink::new(&path);
        sink.finalize().await?;
        assert!(!path.exists());
        Ok(())
    }
}
