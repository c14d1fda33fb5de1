//! End-to-end pipeline tests with mock provider and sink.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use prose2voice::casting::VoicePools;
use prose2voice::config::Config;
use prose2voice::consumer::AudioConsumer;
use prose2voice::producer::AudioProducer;
use prose2voice::script::segment;
use prose2voice::sink::PlaybackSink;
use prose2voice::state::{ConsumerState, PipelineEvent, ProducerState, Status};
use prose2voice::tts::{CredentialError, PlayableUnit, TtsClient, Voice};
use prose2voice::workflow::{Notification, PlaybackManager};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct MockTts {
    calls: Mutex<Vec<(String, Option<String>)>>,
    fail_calls: HashSet<usize>,
    credential_failure: bool,
    delay: Duration,
}

impl MockTts {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_calls: HashSet::new(),
            credential_failure: false,
            delay: Duration::ZERO,
        }
    }

    fn failing_on(mut self, calls: &[usize]) -> Self {
        self.fail_calls = calls.iter().copied().collect();
        self
    }

    fn without_credentials(mut self) -> Self {
        self.credential_failure = true;
        self
    }

    fn synthesized(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TtsClient for MockTts {
    async fn list_voices(&self) -> Result<Vec<Voice>> {
        Ok(vec![])
    }

    async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<PlayableUnit> {
        if self.credential_failure {
            return Err(anyhow::Error::new(CredentialError(
                "api key is not configured".into(),
            )));
        }
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((text.to_string(), voice_id.map(str::to_string)));
            calls.len()
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_calls.contains(&call_number) {
            return Err(anyhow!("transient synthesis failure"));
        }
        Ok(PlayableUnit::Buffer {
            data: text.as_bytes().to_vec(),
            media_type: "audio/wav".into(),
        })
    }
}

#[derive(Default)]
struct MockSink {
    played: Mutex<Vec<String>>,
    cancelled: AtomicBool,
    delay: Duration,
}

impl MockSink {
    fn new() -> Self {
        Self::default()
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlaybackSink for MockSink {
    async fn play(&self, unit: &PlayableUnit) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let rendered = match unit {
            PlayableUnit::Buffer { data, .. } => String::from_utf8_lossy(data).to_string(),
            PlayableUnit::Deferred { text, .. } => format!("deferred:{text}"),
        };
        self.played.lock().unwrap().push(rendered);
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.unattended = true;
    config.casting.pools = VoicePools {
        male: vec!["male_voice_1".into(), "male_voice_2".into()],
        female: vec!["female_voice_1".into(), "female_voice_2".into()],
        neutral: vec!["neutral_voice".into()],
        narrator: "narrator_voice".into(),
        fallback: "fallback_voice".into(),
    };
    config
}

fn collect_notifications(
    manager: &PlaybackManager,
) -> (Arc<Mutex<Vec<Notification>>>, tokio::task::JoinHandle<()>) {
    let mut updates = manager.subscribe();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let task = tokio::spawn(async move {
        while let Ok(notification) = updates.recv().await {
            sink.lock().unwrap().push(notification);
        }
    });
    (log, task)
}

#[tokio::test]
async fn end_to_end_two_speaker_scene() {
    let tts = Arc::new(MockTts::new());
    let sink = Arc::new(MockSink::new());
    let manager = PlaybackManager::new(test_config(), tts.clone(), sink.clone());
    let (_log, _task) = collect_notifications(&manager);

    let text = "Jack stood up. \"Hello everyone!\" Emily smiled. \"Hi Jack!\"";
    let session = manager.play(text, None).await.unwrap();
    manager.wait(session).await;

    let calls = tts.synthesized();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0].1.as_deref(), Some("narrator_voice"));
    assert_eq!(calls[1].1.as_deref(), Some("male_voice_1"));
    assert_eq!(calls[2].1.as_deref(), Some("narrator_voice"));
    assert_eq!(calls[3].1.as_deref(), Some("female_voice_1"));

    assert_eq!(
        sink.played(),
        vec![
            "Jack stood up.",
            "Hello everyone!",
            "Emily smiled.",
            "Hi Jack!"
        ]
    );

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.status, Status::Complete);
    assert_eq!(snapshot.generated, 4);
    assert_eq!(snapshot.played, 4);
}

#[tokio::test]
async fn playback_order_matches_generation_order() {
    let tts = Arc::new(MockTts::new());
    let sink = Arc::new(MockSink::new());
    let mut config = test_config();
    config.pipeline.max_chunk_length = 24;
    let manager = PlaybackManager::new(config, tts.clone(), sink.clone());
    let (log, _task) = collect_notifications(&manager);

    let text = "Mara looked at the horizon. The sun was setting slowly over the hills. \
                \"We should head back before dark,\" Mara said quietly into the wind.";
    let session = manager.play(text, Some("Mara")).await.unwrap();
    manager.wait(session).await;

    // Every generated chunk is played, in exactly the order it was produced.
    let generated: Vec<String> = tts.synthesized().into_iter().map(|(t, _)| t).collect();
    assert!(generated.len() > 2);
    assert_eq!(sink.played(), generated);

    // Queue positions observed through events are strictly non-decreasing.
    let mut queued = Vec::new();
    for notification in log.lock().unwrap().iter() {
        if let Notification::Pipeline {
            event: PipelineEvent::ChunkQueued {
                block_index,
                chunk_index,
                ..
            },
            ..
        } = notification
        {
            queued.push((*block_index, *chunk_index));
        }
    }
    let mut sorted = queued.clone();
    sorted.sort();
    assert_eq!(queued, sorted);
}

#[tokio::test]
async fn failed_chunk_is_skipped_not_fatal() {
    // Three sentences, sized to one chunk each; the middle one fails.
    let tts = Arc::new(MockTts::new().failing_on(&[2]));
    let sink = Arc::new(MockSink::new());
    let mut config = test_config();
    config.pipeline.max_chunk_length = 14;
    let manager = PlaybackManager::new(config, tts.clone(), sink.clone());
    let (log, _task) = collect_notifications(&manager);

    let session = manager
        .play("aaaa bbb ccc. dddd eee fff. gggg hhh iii.", None)
        .await
        .unwrap();
    manager.wait(session).await;

    assert_eq!(tts.synthesized().len(), 3);
    assert_eq!(sink.played().len(), 2);

    let failures = log
        .lock()
        .unwrap()
        .iter()
        .filter(|n| {
            matches!(
                n,
                Notification::Pipeline {
                    event: PipelineEvent::ChunkFailed { .. },
                    ..
                }
            )
        })
        .count();
    assert_eq!(failures, 1);
    assert_eq!(manager.snapshot().status, Status::Complete);
}

#[tokio::test]
async fn missing_credentials_fail_the_session() {
    let tts = Arc::new(MockTts::new().without_credentials());
    let sink = Arc::new(MockSink::new());
    let manager = PlaybackManager::new(test_config(), tts, sink.clone());
    let (log, _task) = collect_notifications(&manager);

    let session = manager.play("Some narration to speak.", None).await.unwrap();
    manager.wait(session).await;

    assert_eq!(manager.snapshot().status, Status::Error);
    assert!(sink.played().is_empty());

    let detail = log
        .lock()
        .unwrap()
        .iter()
        .find_map(|n| match n {
            Notification::StatusChanged {
                status: Status::Error,
                detail,
                ..
            } => detail.clone(),
            _ => None,
        })
        .unwrap_or_default();
    assert!(detail.contains("MissingCredentials"), "detail: {detail}");
}

#[tokio::test]
async fn stop_cancels_promptly_and_clears_the_queue() {
    let mut tts = MockTts::new();
    tts.delay = Duration::from_millis(5);
    let tts = Arc::new(tts);
    let sink = Arc::new(MockSink::slow(Duration::from_secs(30)));
    let manager = PlaybackManager::new(test_config(), tts, sink.clone());

    let long_text = "The caravan moved on through the night. ".repeat(40);
    let mut updates = manager.subscribe();
    let _session = manager.play(&long_text, None).await.unwrap();

    // Wait for playback of the first unit to begin.
    loop {
        match updates.recv().await.unwrap() {
            Notification::Pipeline {
                event: PipelineEvent::ChunkStarted { .. },
                ..
            } => break,
            _ => {}
        }
    }

    let started = std::time::Instant::now();
    manager.stop().await;
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "stop() should not wait for the 30s playback"
    );
    assert!(sink.cancelled.load(Ordering::SeqCst));
    assert_eq!(manager.snapshot().status, Status::Idle);
    assert!(manager.snapshot().session_id.is_none());
}

#[tokio::test]
async fn empty_input_completes_without_audio() {
    let tts = Arc::new(MockTts::new());
    let sink = Arc::new(MockSink::new());
    let manager = PlaybackManager::new(test_config(), tts.clone(), sink.clone());

    let session = manager.play("   \n  ", None).await.unwrap();
    manager.wait(session).await;

    assert_eq!(manager.snapshot().status, Status::Complete);
    assert!(tts.synthesized().is_empty());
    assert!(sink.played().is_empty());
}

#[tokio::test]
async fn new_session_replaces_the_previous_one() {
    let tts = Arc::new(MockTts::new());
    let sink = Arc::new(MockSink::slow(Duration::from_millis(50)));
    let manager = PlaybackManager::new(test_config(), tts, sink.clone());

    let first = manager
        .play(&"A long passage of narration. ".repeat(30), None)
        .await
        .unwrap();
    let second = manager.play("Short closing line.", None).await.unwrap();
    assert_ne!(first, second);

    manager.wait(second).await;
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.status, Status::Complete);
    assert_eq!(snapshot.session_id, Some(second));
}

#[tokio::test]
async fn deferred_units_reach_the_sink_unchanged() {
    struct DeferredTts;

    #[async_trait]
    impl TtsClient for DeferredTts {
        async fn list_voices(&self) -> Result<Vec<Voice>> {
            Ok(vec![])
        }
        async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<PlayableUnit> {
            Ok(PlayableUnit::Deferred {
                text: text.to_string(),
                voice_id: voice_id.map(str::to_string),
            })
        }
    }

    let sink = Arc::new(MockSink::new());
    let manager = PlaybackManager::new(test_config(), Arc::new(DeferredTts), sink.clone());

    let session = manager.play("A single narrated line.", None).await.unwrap();
    manager.wait(session).await;

    assert_eq!(sink.played(), vec!["deferred:A single narrated line."]);
}

/// Direct producer/consumer wiring, asserting the shared-state invariants
/// the manager does not expose.
#[tokio::test]
async fn consumer_state_clears_within_one_poll_interval_on_stop() {
    let producer_state = Arc::new(ProducerState::default());
    let consumer_state = Arc::new(ConsumerState::default());
    let token = CancellationToken::new();
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut blocks = segment(&"Watchers on the wall stood ready. ".repeat(20));
    for block in &mut blocks {
        block.voice_id = Some("narrator_voice".into());
    }

    let tts = Arc::new(MockTts::new());
    let producer = AudioProducer::new(tts, producer_state.clone(), 60);
    let producer_token = token.clone();
    let producer_events = event_tx.clone();
    let producer_task = tokio::spawn(async move {
        producer
            .generate(blocks, queue_tx, producer_events, producer_token)
            .await
    });

    let sink = Arc::new(MockSink::slow(Duration::from_secs(30)));
    let consumer = AudioConsumer::new(sink.clone(), consumer_state.clone(), Duration::from_millis(100));
    let consumer_token = token.clone();
    let consumer_task =
        tokio::spawn(async move { consumer.run(queue_rx, event_tx, consumer_token).await });

    // Wait for the first unit to start playing.
    loop {
        match event_rx.recv().await {
            Some(PipelineEvent::ChunkStarted { .. }) => break,
            Some(_) => {}
            None => panic!("pipeline ended before playback started"),
        }
    }
    assert!(consumer_state.is_playing());

    token.cancel();
    let played = consumer_task.await.unwrap().unwrap();
    producer_task.await.unwrap().unwrap();

    assert!(!consumer_state.is_playing());
    assert!(consumer_state.is_stopped());
    assert!(sink.cancelled.load(Ordering::SeqCst));
    // The cancelled unit never completed.
    assert_eq!(played, 0);
    assert!(!producer_state.is_generating());
}

#[tokio::test]
async fn consumer_terminates_only_when_stream_is_exhausted() {
    let producer_state = Arc::new(ProducerState::default());
    let consumer_state = Arc::new(ConsumerState::default());
    let token = CancellationToken::new();
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let (event_tx, _event_rx) = mpsc::unbounded_channel();

    let sink = Arc::new(MockSink::new());
    let consumer = AudioConsumer::new(sink.clone(), consumer_state.clone(), Duration::from_millis(20));
    let consumer_task = tokio::spawn({
        let token = token.clone();
        async move { consumer.run(queue_rx, event_tx, token).await }
    });

    // With the sender alive the consumer keeps polling.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!consumer_task.is_finished());

    let mut blocks = segment("One line. \"Two lines.\"");
    for block in &mut blocks {
        block.voice_id = Some("v".into());
    }
    let tts = Arc::new(MockTts::new());
    let producer = AudioProducer::new(tts, producer_state.clone(), 900);
    producer
        .generate(blocks, queue_tx, mpsc::unbounded_channel().0, token)
        .await
        .unwrap();

    // Sender dropped inside generate(); the consumer drains and exits.
    let played = consumer_task.await.unwrap().unwrap();
    assert_eq!(played, 2);
    assert_eq!(consumer_state.played(), 2);
    assert!(!producer_state.is_generating());
}
