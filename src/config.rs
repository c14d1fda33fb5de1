use crate::casting::{GenderLexicon, VoicePools};
use crate::characters::ExtractorConfig;
use crate::speaker::ResolverConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use url::Url;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub unattended: bool,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub casting: CastingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_chunk_length")]
    pub max_chunk_length: usize,

    #[serde(default = "default_lookback_window")]
    pub lookback_window: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_sticky_speaker")]
    pub sticky_speaker: bool,

    #[serde(default = "default_min_name_occurrences")]
    pub min_name_occurrences: usize,

    #[serde(default = "default_short_text_threshold")]
    pub short_text_threshold: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_length: default_max_chunk_length(),
            lookback_window: default_lookback_window(),
            poll_interval_ms: default_poll_interval_ms(),
            sticky_speaker: default_sticky_speaker(),
            min_name_occurrences: default_min_name_occurrences(),
            short_text_threshold: default_short_text_threshold(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    /// Speech-generation provider: "remote" or "local".
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    /// Playback sink: "file", "null", or "rodio" (needs the playback feature).
    #[serde(default = "default_sink")]
    pub sink: String,

    /// Locale prefix used to filter the voice catalog during setup.
    #[serde(default = "default_language")]
    pub language: String,

    /// Narrator voice override, applied before casting runs.
    pub narrator_voice: Option<String>,

    #[serde(default = "default_output_path")]
    pub output_path: String,

    pub remote: Option<RemoteTtsConfig>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            sink: default_sink(),
            language: default_language(),
            narrator_voice: None,
            output_path: default_output_path(),
            remote: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RemoteTtsConfig {
    #[serde(default = "default_remote_base_url")]
    pub base_url: String,

    pub api_key: Option<String>,

    /// When set, synthesis without an api_key fails fast as a
    /// configuration error instead of an opaque HTTP rejection.
    #[serde(default)]
    pub requires_auth: bool,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_retry_count")]
    pub retry_count: usize,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

impl Default for RemoteTtsConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_base_url(),
            api_key: None,
            requires_auth: false,
            timeout_seconds: default_timeout_seconds(),
            retry_count: default_retry_count(),
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct CastingConfig {
    #[serde(default)]
    pub pools: VoicePools,

    /// Optional YAML file replacing the built-in gender lexicon.
    pub lexicon_path: Option<String>,
}

impl CastingConfig {
    pub fn load_lexicon(&self) -> Result<GenderLexicon> {
        match &self.lexicon_path {
            Some(path) => GenderLexicon::from_file(path),
            None => Ok(GenderLexicon::default()),
        }
    }
}

fn default_max_chunk_length() -> usize {
    900
}
fn default_lookback_window() -> usize {
    3
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_sticky_speaker() -> bool {
    true
}
fn default_min_name_occurrences() -> usize {
    2
}
fn default_short_text_threshold() -> usize {
    300
}
fn default_tts_provider() -> String {
    "remote".to_string()
}
fn default_sink() -> String {
    "file".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_output_path() -> String {
    "output/session.wav".to_string()
}
fn default_remote_base_url() -> String {
    "http://127.0.0.1:9880/".to_string()
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_retry_count() -> usize {
    3
}
fn default_retry_delay() -> u64 {
    10
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.yml")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("{} not found; using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_chunk_length == 0 {
            bail!("pipeline.max_chunk_length must be at least 1");
        }
        if self.pipeline.poll_interval_ms == 0 {
            bail!("pipeline.poll_interval_ms must be at least 1");
        }
        if self.audio.provider == "remote" {
            let remote = self.audio.remote.clone().unwrap_or_default();
            Url::parse(&remote.base_url).with_context(|| {
                format!("audio.remote.base_url {:?} is not a valid URL", remote.base_url)
            })?;
        }
        Ok(())
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            min_occurrences: self.pipeline.min_name_occurrences,
            short_text_threshold: self.pipeline.short_text_threshold,
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            lookback_window: self.pipeline.lookback_window,
            sticky_speaker: self.pipeline.sticky_speaker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.pipeline.max_chunk_length, 900);
        assert_eq!(config.pipeline.lookback_window, 3);
        assert_eq!(config.pipeline.poll_interval_ms, 100);
        assert_eq!(config.pipeline.min_name_occurrences, 2);
        assert_eq!(config.pipeline.short_text_threshold, 300);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: Config = serde_yaml_ng::from_str(
            "pipeline:\n  max_chunk_length: 120\naudio:\n  provider: local\n",
        )
        .unwrap();
        assert_eq!(config.pipeline.max_chunk_length, 120);
        assert_eq!(config.pipeline.lookback_window, 3);
        assert_eq!(config.audio.provider, "local");
        assert_eq!(config.audio.sink, "file");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let mut config = Config::default();
        config.audio.remote = Some(RemoteTtsConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = Config::load_from("definitely/not/here.yml").unwrap();
        assert_eq!(config.audio.provider, "remote");
    }
}
