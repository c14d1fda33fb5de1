//! Session orchestration.
//!
//! [`PlaybackManager`] owns at most one playback session at a time: it runs
//! the analysis phases, spawns the producer/consumer pair, relays their
//! events to subscribers, and classifies fatal errors before resetting
//! state. Starting a new session implicitly stops the previous one.

use crate::casting::VoiceCaster;
use crate::characters::extract_characters;
use crate::config::Config;
use crate::consumer::AudioConsumer;
use crate::producer::AudioProducer;
use crate::script::segment;
use crate::sink::PlaybackSink;
use crate::speaker::resolve_speakers;
use crate::state::{ConsumerState, PipelineEvent, ProducerState, Status};
use crate::tts::{CredentialError, QuotaError, TtsClient};
use anyhow::Result;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// User-facing buckets for fatal session errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    MissingCredentials,
    Network,
    RateLimited,
    Unknown,
}

pub fn classify_error(err: &anyhow::Error) -> ErrorCategory {
    if err.downcast_ref::<CredentialError>().is_some() {
        return ErrorCategory::MissingCredentials;
    }
    if err.downcast_ref::<QuotaError>().is_some() {
        return ErrorCategory::RateLimited;
    }
    for cause in err.chain() {
        if let Some(req) = cause.downcast_ref::<reqwest::Error>() {
            if req.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
                return ErrorCategory::RateLimited;
            }
            if req.is_timeout() || req.is_connect() {
                return ErrorCategory::Network;
            }
        }
    }
    ErrorCategory::Unknown
}

/// One update pushed to subscribers.
#[derive(Debug, Clone)]
pub enum Notification {
    StatusChanged {
        session_id: u64,
        status: Status,
        detail: Option<String>,
    },
    Pipeline {
        session_id: u64,
        event: PipelineEvent,
    },
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub status: Status,
    pub session_id: Option<u64>,
    pub total_blocks: usize,
    pub generated: usize,
    pub played: usize,
}

struct ActiveSession {
    id: u64,
    token: CancellationToken,
    supervisor: JoinHandle<()>,
    producer_state: Arc<ProducerState>,
    consumer_state: Arc<ConsumerState>,
}

#[derive(Default)]
struct Inner {
    status: Status,
    session: Option<ActiveSession>,
}

/// Shared between the manager and the detached session supervisor so the
/// supervisor can report terminal status after the manager call returns.
#[derive(Clone)]
struct Shared {
    inner: Arc<Mutex<Inner>>,
    updates: broadcast::Sender<Notification>,
}

impl Shared {
    fn set_status(&self, session_id: u64, status: Status, detail: Option<String>) {
        self.inner.lock().unwrap().status = status;
        let _ = self.updates.send(Notification::StatusChanged {
            session_id,
            status,
            detail,
        });
    }
}

pub struct PlaybackManager {
    config: Config,
    tts: Arc<dyn TtsClient>,
    sink: Arc<dyn PlaybackSink>,
    shared: Shared,
}

impl PlaybackManager {
    pub fn new(config: Config, tts: Arc<dyn TtsClient>, sink: Arc<dyn PlaybackSink>) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            config,
            tts,
            sink,
            shared: Shared {
                inner: Arc::new(Mutex::new(Inner::default())),
                updates,
            },
        }
    }

    /// Subscribes to status and pipeline notifications. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.shared.updates.subscribe()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.shared.inner.lock().unwrap();
        let (session_id, total_blocks, generated, played) = match &inner.session {
            Some(s) => (
                Some(s.id),
                s.producer_state.total_blocks(),
                s.producer_state.generated(),
                s.consumer_state.played(),
            ),
            None => (None, 0, 0, 0),
        };
        StateSnapshot {
            status: inner.status,
            session_id,
            total_blocks,
            generated,
            played,
        }
    }

    /// Parses and casts `text`, then starts the streaming pipeline.
    /// Returns the new session id once generation and playback are running;
    /// completion is reported through [`subscribe`](Self::subscribe).
    pub async fn play(&self, text: &str, external_names: Option<&str>) -> Result<u64> {
        self.stop().await;

        let session_id = rand::random::<u64>();
        info!("starting playback session {session_id}");
        self.shared.set_status(session_id, Status::Parsing, None);

        let mut blocks = segment(text);
        let names = extract_characters(text, external_names, &self.config.extractor_config());
        resolve_speakers(&mut blocks, &names, &self.config.resolver_config());

        let lexicon = self.config.casting.load_lexicon()?;
        let mut caster = VoiceCaster::new(
            lexicon,
            self.config.casting.pools.clone(),
            self.config.audio.narrator_voice.clone(),
        )?;
        let registry = caster.build_registry(&names, text, &HashMap::new());
        caster.attach_voices(&mut blocks, &registry);
        info!(
            "session {session_id}: {} block(s), {} character(s)",
            blocks.len(),
            registry.len()
        );

        if blocks.is_empty() {
            self.shared.set_status(session_id, Status::Complete, None);
            return Ok(session_id);
        }

        let producer_state = Arc::new(ProducerState::default());
        let consumer_state = Arc::new(ConsumerState::default());
        let token = CancellationToken::new();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        self.shared.set_status(session_id, Status::Generating, None);

        let producer = AudioProducer::new(
            self.tts.clone(),
            producer_state.clone(),
            self.config.pipeline.max_chunk_length,
        );
        let producer_events = event_tx.clone();
        let producer_token = token.clone();
        let producer_task = tokio::spawn(async move {
            producer
                .generate(blocks, queue_tx, producer_events, producer_token)
                .await
        });

        let consumer = AudioConsumer::new(
            self.sink.clone(),
            consumer_state.clone(),
            Duration::from_millis(self.config.pipeline.poll_interval_ms),
        );
        let consumer_token = token.clone();
        let consumer_task =
            tokio::spawn(async move { consumer.run(queue_rx, event_tx, consumer_token).await });

        let supervisor = tokio::spawn(supervise(
            session_id,
            event_rx,
            producer_task,
            consumer_task,
            token.clone(),
            self.shared.clone(),
        ));

        let mut inner = self.shared.inner.lock().unwrap();
        inner.session = Some(ActiveSession {
            id: session_id,
            token,
            supervisor,
            producer_state,
            consumer_state,
        });
        Ok(session_id)
    }

    /// Tears down the active session, if any, and resets status to Idle.
    pub async fn stop(&self) {
        let session = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.session.take()
        };
        let Some(session) = session else {
            return;
        };

        info!("stopping session {}", session.id);
        session.token.cancel();
        self.sink.cancel();
        if let Err(e) = session.supervisor.await {
            warn!("session {} supervisor ended abnormally: {e}", session.id);
        }
        self.shared.set_status(session.id, Status::Idle, None);
    }

    /// Waits until the current session reaches a terminal status. Intended
    /// for callers that just started a session and have nothing else to do.
    pub async fn wait(&self, session_id: u64) {
        let mut updates = self.subscribe();
        if self.session_finished(session_id) {
            return;
        }
        loop {
            match updates.recv().await {
                Ok(Notification::StatusChanged {
                    session_id: id,
                    status,
                    ..
                }) if id == session_id
                    && matches!(status, Status::Complete | Status::Error | Status::Idle) =>
                {
                    return;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.session_finished(session_id) {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    fn session_finished(&self, session_id: u64) -> bool {
        let inner = self.shared.inner.lock().unwrap();
        let current = inner.session.as_ref().map(|s| s.id);
        current != Some(session_id)
            || matches!(inner.status, Status::Complete | Status::Error | Status::Idle)
    }
}

async fn supervise(
    session_id: u64,
    mut event_rx: mpsc::UnboundedReceiver<PipelineEvent>,
    mut producer_task: JoinHandle<Result<()>>,
    consumer_task: JoinHandle<Result<usize>>,
    token: CancellationToken,
    shared: Shared,
) {
    let mut producer_result: Option<Result<()>> = None;
    let mut playing = false;

    // The event channel closes once the producer and the consumer have both
    // finished and dropped their senders.
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                if matches!(event, PipelineEvent::ChunkStarted { .. }) && !playing {
                    playing = true;
                    shared.set_status(session_id, Status::Playing, None);
                }
                let _ = shared.updates.send(Notification::Pipeline { session_id, event });
            }
            joined = &mut producer_task, if producer_result.is_none() => {
                let result = joined
                    .unwrap_or_else(|e| Err(anyhow::anyhow!("producer task panicked: {e}")));
                if result.is_err() {
                    // Fatal generation error; halt playback too.
                    token.cancel();
                }
                producer_result = Some(result);
            }
        }
    }

    if producer_result.is_none() {
        producer_result = Some(
            producer_task
                .await
                .unwrap_or_else(|e| Err(anyhow::anyhow!("producer task panicked: {e}"))),
        );
    }
    if let Err(e) = consumer_task.await {
        warn!("consumer task panicked: {e}");
    }

    match producer_result {
        Some(Err(e)) => {
            let category = classify_error(&e);
            error!("session {session_id} failed ({category:?}): {e:#}");
            shared.set_status(
                session_id,
                Status::Error,
                Some(format!("{category:?}: {e:#}")),
            );
        }
        _ if token.is_cancelled() => {
            // User-initiated stop; stop() reports Idle itself.
        }
        _ => {
            info!("session {session_id} complete");
            shared.set_status(session_id, Status::Complete, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_credential_errors() {
        let err = anyhow::Error::new(CredentialError("no key".into())).context("wrapped");
        assert_eq!(classify_error(&err), ErrorCategory::MissingCredentials);
    }

    #[test]
    fn classifies_quota_errors() {
        let err = anyhow::Error::new(QuotaError("slow down".into()));
        assert_eq!(classify_error(&err), ErrorCategory::RateLimited);
    }

    #[test]
    fn unrecognized_errors_are_unknown() {
        let err = anyhow::anyhow!("something else entirely");
        assert_eq!(classify_error(&err), ErrorCategory::Unknown);
    }
}
