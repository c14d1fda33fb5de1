//! Speech-generation providers.

use crate::config::Config;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const CHROMIUM_MAJOR_VERSION: &str = "143";

/// One voice offered by a provider.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct Voice {
    pub name: String,
    pub short_name: String,
    pub gender: String,
    pub locale: String,
    pub friendly_name: Option<String>,
}

/// Opaque handle to one generated piece of speech.
///
/// `Buffer` carries decoded audio ready for any sink; `Deferred` is a lazy
/// request for sinks that own their own speech engine. The union keeps the
/// consumer free of provider-specific branches.
#[derive(Debug, Clone)]
pub enum PlayableUnit {
    Deferred {
        text: String,
        voice_id: Option<String>,
    },
    Buffer {
        data: Vec<u8>,
        media_type: String,
    },
}

/// Provider configuration failure (missing or rejected credential). Fatal:
/// generation stops and the error propagates to the session supervisor.
#[derive(Debug)]
pub struct CredentialError(pub String);

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "credential error: {}", self.0)
    }
}

impl std::error::Error for CredentialError {}

/// Provider-side quota/rate-limit rejection (HTTP 429).
#[derive(Debug)]
pub struct QuotaError(pub String);

impl fmt::Display for QuotaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "quota exceeded: {}", self.0)
    }
}

impl std::error::Error for QuotaError {}

#[async_trait]
pub trait TtsClient: Send + Sync {
    async fn list_voices(&self) -> Result<Vec<Voice>>;
    async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<PlayableUnit>;
}

pub fn create_tts_client(config: &Config) -> Result<Arc<dyn TtsClient>> {
    match config.audio.provider.as_str() {
        "remote" => Ok(Arc::new(RemoteTtsClient::new(config)?)),
        "local" => Ok(Arc::new(LocalSpeechClient::new())),
        other => Err(anyhow!("Unknown TTS provider: {}", other)),
    }
}

fn get_user_agent() -> String {
    format!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{}.0.0.0 Safari/537.36 Edg/{}.0.0.0",
        CHROMIUM_MAJOR_VERSION, CHROMIUM_MAJOR_VERSION
    )
}

fn default_headers() -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert("User-Agent", HeaderValue::from_str(&get_user_agent())?);
    headers.insert("Accept", HeaderValue::from_static("*/*"));
    headers.insert(
        "Accept-Language",
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    Ok(headers)
}

/// HTTP speech gateway client: `GET /voices` for the catalog, `POST /tts`
/// for synthesis, returning complete WAV buffers.
pub struct RemoteTtsClient {
    base_url: Url,
    api_key: Option<String>,
    requires_auth: bool,
    retry_count: usize,
    retry_delay: Duration,
    client: reqwest::Client,
}

impl RemoteTtsClient {
    pub fn new(config: &Config) -> Result<Self> {
        let remote = config.audio.remote.clone().unwrap_or_default();
        let base_url = Url::parse(&remote.base_url)
            .map_err(|e| anyhow!("invalid audio.remote.base_url {:?}: {}", remote.base_url, e))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(remote.timeout_seconds))
            .build()?;
        Ok(Self {
            base_url,
            api_key: remote.api_key,
            requires_auth: remote.requires_auth,
            retry_count: remote.retry_count,
            retry_delay: Duration::from_secs(remote.retry_delay_seconds),
            client,
        })
    }

    fn credentials(&self) -> Result<Option<&str>> {
        match (&self.api_key, self.requires_auth) {
            (Some(key), _) => Ok(Some(key.as_str())),
            (None, false) => Ok(None),
            (None, true) => Err(anyhow::Error::new(CredentialError(
                "audio.remote.api_key is not set; add it to config.yml or disable \
                 audio.remote.requires_auth"
                    .to_string(),
            ))),
        }
    }

    async fn request_audio(&self, text: &str, voice_id: Option<&str>) -> Result<PlayableUnit> {
        let key = self.credentials()?;
        let url = self.base_url.join("tts")?;
        let body = serde_json::json!({
            "text": text,
            "voice_id": voice_id,
            "media_type": "wav",
        });

        let mut request = self.client.post(url).headers(default_headers()?).json(&body);
        if let Some(key) = key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(anyhow::Error::new(CredentialError(format!(
                "speech gateway rejected the credentials ({status})"
            ))));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow::Error::new(QuotaError(detail)));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("speech gateway error {status}: {detail}");
        }

        let mut stream = response.bytes_stream();
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        if data.is_empty() {
            bail!("speech gateway returned an empty body");
        }

        debug!("synthesized {} bytes for voice {:?}", data.len(), voice_id);
        Ok(PlayableUnit::Buffer {
            data,
            media_type: "audio/wav".to_string(),
        })
    }
}

#[async_trait]
impl TtsClient for RemoteTtsClient {
    async fn list_voices(&self) -> Result<Vec<Voice>> {
        let url = self.base_url.join("voices")?;
        let mut request = self.client.get(url).headers(default_headers()?);
        if let Some(key) = self.credentials()? {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            bail!("failed to list voices: {}", response.status());
        }
        let voices: Vec<Voice> = response.json().await?;
        Ok(voices)
    }

    async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<PlayableUnit> {
        let mut attempt = 0usize;
        loop {
            match self.request_audio(text, voice_id).await {
                Ok(unit) => return Ok(unit),
                Err(e) => {
                    let fatal = e.downcast_ref::<CredentialError>().is_some();
                    if fatal || attempt >= self.retry_count {
                        return Err(e);
                    }
                    attempt += 1;
                    warn!(
                        "synthesis attempt {}/{} failed, retrying: {:#}",
                        attempt, self.retry_count, e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

/// Provider for sinks that carry their own speech engine: synthesis is a
/// no-op and every unit is a deferred request played lazily by the sink.
pub struct LocalSpeechClient {
    voices: Vec<Voice>,
}

impl LocalSpeechClient {
    pub fn new() -> Self {
        let voice = |short_name: &str, gender: &str| Voice {
            name: format!("Local {short_name}"),
            short_name: short_name.to_string(),
            gender: gender.to_string(),
            locale: "en-US".to_string(),
            friendly_name: None,
        };
        Self {
            voices: vec![
                voice("local-male-1", "Male"),
                voice("local-female-1", "Female"),
                voice("local-neutral-1", "Neutral"),
            ],
        }
    }
}

impl Default for LocalSpeechClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsClient for LocalSpeechClient {
    async fn list_voices(&self) -> Result<Vec<Voice>> {
        Ok(self.voices.clone())
    }

    async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<PlayableUnit> {
        Ok(PlayableUnit::Deferred {
            text: text.to_string(),
            voice_id: voice_id.map(str::to_string),
        })
    }
}
