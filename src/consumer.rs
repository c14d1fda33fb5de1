//! Ordered playback of the generated audio stream.
//!
//! Drains the queue in append order, playing each unit to completion. The
//! loop ends when the producer has dropped its sender and every queued item
//! has been played; a cancelled token or a directly set stop flag ends it
//! within one poll interval.

use crate::sink::PlaybackSink;
use crate::state::{AudioQueueItem, ConsumerState, PipelineEvent};
use anyhow::Result;
use log::{debug, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct AudioConsumer {
    sink: Arc<dyn PlaybackSink>,
    state: Arc<ConsumerState>,
    poll_interval: Duration,
}

impl AudioConsumer {
    pub fn new(sink: Arc<dyn PlaybackSink>, state: Arc<ConsumerState>, poll_interval: Duration) -> Self {
        Self {
            sink,
            state,
            poll_interval,
        }
    }

    /// Runs until the stream is exhausted or the session stops. Returns the
    /// number of units played.
    pub async fn run(
        &self,
        mut queue: mpsc::UnboundedReceiver<AudioQueueItem>,
        events: mpsc::UnboundedSender<PipelineEvent>,
        token: CancellationToken,
    ) -> Result<usize> {
        loop {
            if self.state.is_stopped() {
                self.shut_down(&mut queue);
                break;
            }

            let received = tokio::select! {
                _ = token.cancelled() => {
                    self.shut_down(&mut queue);
                    break;
                }
                received = tokio::time::timeout(self.poll_interval, queue.recv()) => received,
            };

            let item = match received {
                Ok(Some(item)) => item,
                // Producer done and queue exhausted.
                Ok(None) => break,
                // Idle poll tick; re-check the stop flag.
                Err(_) => continue,
            };

            self.play_item(&item, &events, &token).await;

            if token.is_cancelled() {
                self.shut_down(&mut queue);
                break;
            }
        }

        let played = self.state.played();
        self.state.is_playing.store(false, Ordering::SeqCst);
        if !self.state.is_stopped() {
            let _ = events.send(PipelineEvent::PlaybackFinished { played });
        }
        Ok(played)
    }

    async fn play_item(
        &self,
        item: &AudioQueueItem,
        events: &mpsc::UnboundedSender<PipelineEvent>,
        token: &CancellationToken,
    ) {
        let index = self.state.played();
        self.state.is_playing.store(true, Ordering::SeqCst);
        let _ = events.send(PipelineEvent::ChunkStarted {
            index,
            speaker: item.speaker.clone(),
        });

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                self.sink.cancel();
                None
            }
            result = self.sink.play(&item.unit) => Some(result),
        };

        match outcome {
            None => {
                debug!("playback cancelled at index {index}");
                self.state.is_playing.store(false, Ordering::SeqCst);
                return;
            }
            Some(Ok(())) => {
                let _ = events.send(PipelineEvent::ChunkFinished { index });
            }
            Some(Err(e)) => {
                warn!("playback of unit {index} failed: {e:#}");
                let _ = events.send(PipelineEvent::PlaybackFailed {
                    index,
                    message: format!("{e:#}"),
                });
            }
        }

        // Failed units still advance the cursor; playback is best-effort.
        self.state.current_index.fetch_add(1, Ordering::SeqCst);
        self.state.is_playing.store(false, Ordering::SeqCst);
    }

    /// Stop path: drop whatever is still queued and mark the state.
    fn shut_down(&self, queue: &mut mpsc::UnboundedReceiver<AudioQueueItem>) {
        self.sink.cancel();
        let mut discarded = 0usize;
        while queue.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("discarded {discarded} queued unit(s) on stop");
        }
        self.state.is_stopped.store(true, Ordering::SeqCst);
        self.state.is_playing.store(false, Ordering::SeqCst);
    }
}
