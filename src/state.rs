//! Shared pipeline state, queue items, and events.
//!
//! The producer appends to the queue and writes [`ProducerState`]; the
//! consumer advances through the queue and writes [`ConsumerState`]. With a
//! single writer per side, plain atomics are all the synchronization the
//! flags need.

use crate::script::BlockKind;
use crate::tts::PlayableUnit;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// One generated speech unit, queued for ordered playback. Never reordered
/// or mutated after creation.
#[derive(Debug, Clone)]
pub struct AudioQueueItem {
    pub unit: PlayableUnit,
    pub voice_id: String,
    pub text: String,
    pub speaker: Option<String>,
    pub kind: BlockKind,
    pub block_index: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Default)]
pub struct ProducerState {
    pub is_generating: AtomicBool,
    pub generated_count: AtomicUsize,
    pub total_blocks: AtomicUsize,
    pub current_block: AtomicUsize,
}

impl ProducerState {
    pub fn is_generating(&self) -> bool {
        self.is_generating.load(Ordering::SeqCst)
    }

    pub fn generated(&self) -> usize {
        self.generated_count.load(Ordering::SeqCst)
    }

    pub fn total_blocks(&self) -> usize {
        self.total_blocks.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct ConsumerState {
    pub is_playing: AtomicBool,
    pub current_index: AtomicUsize,
    pub is_stopped: AtomicBool,
}

impl ConsumerState {
    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::SeqCst)
    }

    pub fn played(&self) -> usize {
        self.current_index.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.is_stopped.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a playback session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Status {
    #[default]
    Idle,
    Parsing,
    Generating,
    Playing,
    Complete,
    Error,
}

/// Fine-grained pipeline notifications emitted by the producer and the
/// consumer, relayed to subscribers by the session supervisor.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ChunkQueued {
        block_index: usize,
        chunk_index: usize,
        total_chunks: usize,
    },
    ChunkStarted {
        index: usize,
        speaker: Option<String>,
    },
    ChunkFinished {
        index: usize,
    },
    ChunkFailed {
        block_index: usize,
        chunk_index: usize,
        message: String,
    },
    PlaybackFailed {
        index: usize,
        message: String,
    },
    GenerationFinished {
        generated: usize,
    },
    PlaybackFinished {
        played: usize,
    },
}
