//! Interactive first-run voice selection.

use crate::config::Config;
use crate::tts::{TtsClient, Voice};
use anyhow::{anyhow, Result};
use inquire::Select;

/// Prompts for a narrator voice when none is configured, then persists the
/// choice. Skipped entirely in unattended mode.
pub async fn run_setup(config: &mut Config, tts: &dyn TtsClient) -> Result<()> {
    if config.unattended || config.audio.narrator_voice.is_some() {
        return Ok(());
    }

    println!("Fetching voice catalog...");
    let voices = tts.list_voices().await?;
    let lang = config.audio.language.clone();
    let filtered: Vec<Voice> = voices
        .into_iter()
        .filter(|v| v.locale.starts_with(&lang))
        .collect();
    if filtered.is_empty() {
        return Err(anyhow!("No voices found for language: {}", lang));
    }

    config.audio.narrator_voice = Some(select_voice("Select Narrator Voice:", &filtered)?);
    config.save()?;
    Ok(())
}

fn select_voice(prompt: &str, voices: &[Voice]) -> Result<String> {
    let options: Vec<String> = voices
        .iter()
        .map(|v| format!("{} ({})", v.short_name, v.gender))
        .collect();

    let selection = Select::new(prompt, options.clone()).prompt()?;
    let index = options
        .iter()
        .position(|o| *o == selection)
        .ok_or_else(|| anyhow!("Invalid selection"))?;
    Ok(voices[index].short_name.clone())
}
