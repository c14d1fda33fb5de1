//! Dialogue speaker attribution.

use crate::characters::NARRATOR;
use crate::script::{BlockKind, ScriptBlock};
use log::{debug, warn};
use regex::Regex;

/// Attribution tuning. The sticky last-speaker memory never expires, which
/// can misattribute dialogue after an unmarked scene change; that matches
/// the source behavior and is why it can be switched off here.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How many immediately preceding narration blocks form the context
    /// window for a dialogue block.
    pub lookback_window: usize,
    /// Whether unattributed dialogue inherits the previous speaker.
    pub sticky_speaker: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lookback_window: 3,
            sticky_speaker: true,
        }
    }
}

/// Assigns a speaker to every dialogue block.
///
/// For each dialogue block the most recently mentioned known name in the
/// preceding narration window wins; with no mention the previous speaker is
/// inherited; with neither the block falls to the narrator. Narration
/// blocks pass through untouched.
pub fn resolve_speakers(blocks: &mut [ScriptBlock], names: &[String], cfg: &ResolverConfig) {
    let patterns: Vec<(&str, Regex)> = names
        .iter()
        .filter_map(|name| {
            let pattern = format!(r"\b{}\b", regex::escape(name));
            match Regex::new(&pattern) {
                Ok(re) => Some((name.as_str(), re)),
                Err(e) => {
                    warn!("skipping unmatchable character name {name:?}: {e}");
                    None
                }
            }
        })
        .collect();

    let mut last_speaker: Option<String> = None;

    for i in 0..blocks.len() {
        if blocks[i].kind != BlockKind::Dialogue {
            continue;
        }

        let window = context_window(blocks, i, cfg.lookback_window);
        let mut best: Option<(usize, &str)> = None;
        for (name, re) in &patterns {
            if let Some(m) = re.find_iter(&window).last() {
                if best.is_none_or(|(offset, _)| m.start() > offset) {
                    best = Some((m.start(), name));
                }
            }
        }

        let resolved = match best {
            Some((_, name)) => name.to_string(),
            None => match (cfg.sticky_speaker, &last_speaker) {
                (true, Some(prev)) => prev.clone(),
                _ => NARRATOR.to_string(),
            },
        };

        debug!("block {i} attributed to {resolved}");
        blocks[i].speaker = Some(resolved.clone());
        last_speaker = Some(resolved);
    }
}

/// Concatenates the contiguous run of narration blocks directly before
/// block `i`, most recent last, capped at `lookback` blocks. A dialogue
/// block ends the run.
fn context_window(blocks: &[ScriptBlock], i: usize, lookback: usize) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut j = i;
    while j > 0 && parts.len() < lookback {
        j -= 1;
        if blocks[j].kind == BlockKind::Narration {
            parts.push(&blocks[j].text);
        } else {
            break;
        }
    }
    parts.reverse();
    parts.join("\n")
}
