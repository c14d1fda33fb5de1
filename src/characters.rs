//! Character discovery and the per-session character registry.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Synthetic speaker for everything that is not quoted dialogue.
pub const NARRATOR: &str = "Narrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Neutral,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterEntry {
    pub name: String,
    pub gender: Gender,
    pub voice_id: String,
}

/// Characters known to the current session, keyed by name. Built once per
/// session by the caster and immutable afterwards; always holds a
/// [`NARRATOR`] entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterRegistry {
    pub characters: HashMap<String, CharacterEntry>,
}

impl CharacterRegistry {
    pub fn get(&self, name: &str) -> Option<&CharacterEntry> {
        self.characters.get(name)
    }

    pub fn insert(&mut self, entry: CharacterEntry) {
        self.characters.insert(entry.name.clone(), entry);
    }

    pub fn narrator_voice(&self) -> Option<&str> {
        self.get(NARRATOR).map(|e| e.voice_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

/// Frequency thresholds for name extraction. The numbers mirror the source
/// behavior; they are configuration rather than constants so callers can
/// tune them.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Minimum occurrences for a token to count as a character name.
    pub min_occurrences: usize,
    /// Inputs shorter than this many characters relax the minimum to one.
    pub short_text_threshold: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 2,
            short_text_threshold: 300,
        }
    }
}

/// Pronouns, articles, dialogue verbs, interjections, and honorifics that
/// never name a character. Compared lowercased.
const STOP_WORDS: &[&str] = &[
    // pronouns
    "he", "him", "his", "himself", "she", "her", "hers", "herself", "it", "its", "itself", "they",
    "them", "their", "theirs", "themselves", "you", "your", "yours", "yourself", "we", "us", "our",
    "ours", "ourselves", "me", "my", "mine", "myself", "who", "whom", "whose", "someone",
    "anyone", "everyone", "nobody", "somebody", "anybody", "everybody",
    // articles, determiners, conjunctions, prepositions
    "the", "and", "but", "for", "nor", "yet", "this", "that", "these", "those", "there", "then",
    "than", "with", "from", "into", "onto", "over", "under", "after", "before", "about", "again",
    "because", "while", "where", "when", "what", "which", "how", "why", "not", "all", "any",
    "both", "each", "few", "more", "most", "other", "some", "such", "only", "own", "same", "very",
    // common verbs and dialogue tags
    "was", "were", "been", "being", "have", "has", "had", "having", "does", "did", "doing",
    "will", "would", "could", "should", "shall", "may", "might", "must", "can", "said", "says",
    "asked", "replied", "answered", "shouted", "whispered", "exclaimed", "muttered", "continued",
    "added", "began", "thought", "looked", "turned", "walked", "smiled", "laughed", "nodded",
    // interjections
    "oh", "ah", "hey", "yes", "no", "well", "okay", "alright", "hmm", "huh", "wow", "ouch",
    "please", "thanks", "thank", "sorry", "hello", "goodbye", "bye",
    // honorifics
    "mr", "mrs", "ms", "miss", "mister", "sir", "madam", "lady", "lord", "dr", "doctor",
    "professor", "captain", "general", "officer", "father", "mother", "uncle", "aunt",
];

/// Labels that look like names but never are.
const NON_NAMES: &[&str] = &[
    "narrator", "voice", "system", "user", "assistant", "admin", "moderator", "bot", "chapter",
    "prologue", "epilogue", "author", "unknown",
];

fn is_stop_word(token: &str) -> bool {
    let lower = token.to_lowercase();
    STOP_WORDS.contains(&lower.as_str())
}

fn is_known_non_name(token: &str) -> bool {
    let lower = token.to_lowercase();
    NON_NAMES.contains(&lower.as_str())
}

fn strip_possessive(token: &str) -> &str {
    for suffix in ["'s", "\u{2019}s"] {
        if let Some(stripped) = token.strip_suffix(suffix) {
            return stripped;
        }
    }
    if token.ends_with("s'") || token.ends_with("s\u{2019}") {
        return &token[..token.len() - 1];
    }
    token
}

fn is_all_caps(token: &str) -> bool {
    token
        .chars()
        .filter(|c| c.is_alphabetic())
        .all(|c| c.is_uppercase())
}

fn looks_like_proper_name(entry: &str) -> bool {
    let words: Vec<&str> = entry.split_whitespace().collect();
    if words.is_empty() || words.len() > 3 {
        return false;
    }
    words.iter().all(|word| {
        let mut chars = word.chars();
        let leading_upper = matches!(chars.next(), Some(c) if c.is_uppercase());
        leading_upper
            && word.chars().count() >= 2
            && !is_all_caps(word)
            && word
                .chars()
                .all(|c| c.is_alphabetic() || c == '\'' || c == '\u{2019}' || c == '-')
    })
}

/// Derives the candidate character list for a text.
///
/// An external comma-joined list wins when a majority of its entries look
/// like proper names; otherwise candidates are mined from the text itself by
/// frequency. The result is deduplicated and sorted.
pub fn extract_characters(
    raw_text: &str,
    external: Option<&str>,
    cfg: &ExtractorConfig,
) -> Vec<String> {
    if let Some(list) = external {
        if let Some(names) = names_from_external(list) {
            debug!("using {} externally supplied character names", names.len());
            return names;
        }
    }
    names_from_text(raw_text, cfg)
}

fn names_from_external(list: &str) -> Option<Vec<String>> {
    let entries: Vec<&str> = list
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .collect();
    if entries.is_empty() {
        return None;
    }

    let plausible: Vec<&str> = entries
        .iter()
        .copied()
        .filter(|e| looks_like_proper_name(e))
        .collect();
    if plausible.len() * 2 <= entries.len() {
        return None;
    }

    let mut names: Vec<String> = plausible
        .into_iter()
        .filter(|n| !is_known_non_name(n))
        .map(String::from)
        .collect();
    names.sort();
    names.dedup();
    (!names.is_empty()).then_some(names)
}

fn names_from_text(raw_text: &str, cfg: &ExtractorConfig) -> Vec<String> {
    let threshold = if raw_text.chars().count() < cfg.short_text_threshold {
        1
    } else {
        cfg.min_occurrences
    };

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for raw_token in
        raw_text.split(|c: char| !(c.is_alphabetic() || c == '\'' || c == '\u{2019}'))
    {
        let token = strip_possessive(raw_token).trim_matches(['\'', '\u{2019}']);
        if token.chars().count() < 3 {
            continue;
        }
        if !token.chars().next().is_some_and(|c| c.is_uppercase()) {
            continue;
        }
        if is_all_caps(token) || is_stop_word(token) || is_known_non_name(token) {
            continue;
        }
        *counts.entry(token).or_insert(0) += 1;
    }

    let mut names: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .map(|(name, _)| name.to_string())
        .collect();
    names.sort();
    names
}
