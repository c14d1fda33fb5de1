//! Streaming audio generation.
//!
//! Walks the annotated blocks in order, splits each into bounded chunks,
//! and synthesizes them strictly sequentially, appending every finished
//! unit to the queue immediately so playback can begin long before the
//! script is done.

use crate::script::ScriptBlock;
use crate::state::{AudioQueueItem, PipelineEvent, ProducerState};
use crate::tts::{CredentialError, TtsClient};
use crate::utils::text::split_into_chunks;
use anyhow::Result;
use log::{debug, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct AudioProducer {
    tts: Arc<dyn TtsClient>,
    state: Arc<ProducerState>,
    max_chunk_length: usize,
}

impl AudioProducer {
    pub fn new(tts: Arc<dyn TtsClient>, state: Arc<ProducerState>, max_chunk_length: usize) -> Self {
        Self {
            tts,
            state,
            max_chunk_length,
        }
    }

    /// Generates speech for every block, streaming finished units into
    /// `queue`. Chunk-level provider failures are reported and skipped;
    /// configuration failures abort the run. Dropping `queue` on return is
    /// the consumer's done signal.
    pub async fn generate(
        &self,
        blocks: Vec<ScriptBlock>,
        queue: mpsc::UnboundedSender<AudioQueueItem>,
        events: mpsc::UnboundedSender<PipelineEvent>,
        token: CancellationToken,
    ) -> Result<()> {
        self.state.total_blocks.store(blocks.len(), Ordering::SeqCst);
        self.state.generated_count.store(0, Ordering::SeqCst);
        self.state.is_generating.store(true, Ordering::SeqCst);

        let result = self.run(&blocks, &queue, &events, &token).await;

        self.state.is_generating.store(false, Ordering::SeqCst);
        if result.is_ok() && !token.is_cancelled() {
            let _ = events.send(PipelineEvent::GenerationFinished {
                generated: self.state.generated(),
            });
        }
        result
    }

    async fn run(
        &self,
        blocks: &[ScriptBlock],
        queue: &mpsc::UnboundedSender<AudioQueueItem>,
        events: &mpsc::UnboundedSender<PipelineEvent>,
        token: &CancellationToken,
    ) -> Result<()> {
        for (block_index, block) in blocks.iter().enumerate() {
            if token.is_cancelled() {
                debug!("generation cancelled before block {block_index}");
                return Ok(());
            }
            self.state.current_block.store(block_index, Ordering::SeqCst);

            let chunks = split_into_chunks(&block.text, self.max_chunk_length);
            let total_chunks = chunks.len();

            for (chunk_index, chunk) in chunks.into_iter().enumerate() {
                let synthesized = tokio::select! {
                    _ = token.cancelled() => {
                        debug!("generation cancelled mid-block {block_index}");
                        return Ok(());
                    }
                    result = self.tts.synthesize(&chunk, block.voice_id.as_deref()) => result,
                };

                match synthesized {
                    Ok(unit) => {
                        let item = AudioQueueItem {
                            unit,
                            voice_id: block.voice_id.clone().unwrap_or_default(),
                            text: chunk,
                            speaker: block.speaker.clone(),
                            kind: block.kind,
                            block_index,
                            chunk_index,
                            total_chunks,
                        };
                        if queue.send(item).is_err() {
                            debug!("queue closed; stopping generation");
                            return Ok(());
                        }
                        self.state.generated_count.fetch_add(1, Ordering::SeqCst);
                        let _ = events.send(PipelineEvent::ChunkQueued {
                            block_index,
                            chunk_index,
                            total_chunks,
                        });
                    }
                    Err(e) if e.downcast_ref::<CredentialError>().is_some() => {
                        return Err(e.context("speech provider configuration error"));
                    }
                    Err(e) => {
                        warn!(
                            "chunk {}/{} of block {} failed: {:#}",
                            chunk_index + 1,
                            total_chunks,
                            block_index,
                            e
                        );
                        let _ = events.send(PipelineEvent::ChunkFailed {
                            block_index,
                            chunk_index,
                            message: format!("{e:#}"),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
