//! Gender casting and voice assignment.

use crate::characters::{CharacterEntry, CharacterRegistry, Gender, NARRATOR};
use crate::script::{BlockKind, ScriptBlock};
use anyhow::{Context, Result};
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Name and pronoun tables driving gender detection. The built-in defaults
/// cover common English names; the whole table can be replaced from a YAML
/// file for other locales or smarter classifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenderLexicon {
    pub male_names: Vec<String>,
    pub female_names: Vec<String>,
    pub unisex_names: Vec<String>,
    pub masculine_pronouns: Vec<String>,
    pub feminine_pronouns: Vec<String>,
}

impl Default for GenderLexicon {
    fn default() -> Self {
        fn list(words: &[&str]) -> Vec<String> {
            words.iter().map(|w| w.to_string()).collect()
        }
        Self {
            male_names: list(&[
                "james", "john", "robert", "michael", "william", "david", "richard", "joseph",
                "thomas", "charles", "daniel", "matthew", "anthony", "mark", "steven", "paul",
                "andrew", "joshua", "kevin", "brian", "george", "edward", "ronald", "timothy",
                "jason", "jeffrey", "ryan", "jacob", "gary", "nicholas", "eric", "jonathan",
                "stephen", "larry", "justin", "scott", "brandon", "benjamin", "samuel", "frank",
                "gregory", "raymond", "jack", "dennis", "jerry", "tyler", "aaron", "henry",
                "peter", "adam", "zachary", "nathan", "walter", "harold", "kyle", "ethan",
                "oliver", "liam", "noah", "lucas", "oscar", "victor", "leo", "max", "tom",
            ]),
            female_names: list(&[
                "mary", "patricia", "jennifer", "linda", "elizabeth", "barbara", "susan",
                "jessica", "sarah", "karen", "nancy", "lisa", "betty", "margaret", "sandra",
                "ashley", "kimberly", "emily", "donna", "michelle", "dorothy", "carol", "amanda",
                "melissa", "deborah", "stephanie", "rebecca", "sharon", "laura", "cynthia",
                "kathleen", "amy", "shirley", "angela", "helen", "anna", "brenda", "pamela",
                "nicole", "emma", "samantha", "katherine", "christine", "debra", "rachel",
                "catherine", "carolyn", "janet", "ruth", "maria", "heather", "diane", "julie",
                "olivia", "sophia", "isabella", "mia", "charlotte", "amelia", "grace", "chloe",
                "lily", "hannah", "alice", "lucy", "ella", "zoe", "eva", "clara",
            ]),
            unisex_names: list(&[
                "alex", "sam", "jordan", "taylor", "casey", "riley", "morgan", "jamie", "avery",
                "quinn", "skyler", "charlie", "robin", "dana", "leslie", "kim",
            ]),
            masculine_pronouns: list(&["he", "him", "his", "himself"]),
            feminine_pronouns: list(&["she", "her", "hers", "herself"]),
        }
    }
}

impl GenderLexicon {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read gender lexicon {}", path.display()))?;
        serde_yaml_ng::from_str(&content)
            .with_context(|| format!("failed to parse gender lexicon {}", path.display()))
    }

    fn lookup(&self, name: &str) -> Option<Gender> {
        let lower = name.to_lowercase();
        if self.male_names.contains(&lower) {
            Some(Gender::Male)
        } else if self.female_names.contains(&lower) {
            Some(Gender::Female)
        } else if self.unisex_names.contains(&lower) {
            Some(Gender::Neutral)
        } else {
            None
        }
    }
}

/// Fixed voice inventories per gender category plus the dedicated narrator
/// voice and the fallback for unregistered speakers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicePools {
    pub male: Vec<String>,
    pub female: Vec<String>,
    pub neutral: Vec<String>,
    pub narrator: String,
    pub fallback: String,
}

impl Default for VoicePools {
    fn default() -> Self {
        fn list(ids: &[&str]) -> Vec<String> {
            ids.iter().map(|v| v.to_string()).collect()
        }
        Self {
            male: list(&[
                "en-US-GuyNeural",
                "en-US-DavisNeural",
                "en-US-TonyNeural",
                "en-US-JasonNeural",
            ]),
            female: list(&[
                "en-US-JennyNeural",
                "en-US-AriaNeural",
                "en-US-MichelleNeural",
                "en-US-SaraNeural",
            ]),
            neutral: list(&["en-US-AnaNeural", "en-GB-LibbyNeural"]),
            narrator: "en-US-ChristopherNeural".to_string(),
            fallback: "en-US-JennyNeural".to_string(),
        }
    }
}

fn male_assertion() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bis\s+a\s+(?:male|man|boy|guy)\b").expect("static assertion pattern")
    })
}

fn female_assertion() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bis\s+a\s+(?:female|woman|girl|lady)\b").expect("static assertion pattern")
    })
}

/// Casts characters to voices: detects a gender per name and deals voices
/// out of the pools with per-gender round-robin cursors, so assignment is
/// cyclic and deterministic in registration order.
pub struct VoiceCaster {
    lexicon: GenderLexicon,
    pools: VoicePools,
    narrator_override: Option<String>,
    masculine: Regex,
    feminine: Regex,
    male_cursor: usize,
    female_cursor: usize,
    neutral_cursor: usize,
    unknown_cursor: usize,
}

impl VoiceCaster {
    pub fn new(
        lexicon: GenderLexicon,
        pools: VoicePools,
        narrator_override: Option<String>,
    ) -> Result<Self> {
        let masculine = word_list_pattern(&lexicon.masculine_pronouns)
            .context("invalid masculine pronoun list")?;
        let feminine = word_list_pattern(&lexicon.feminine_pronouns)
            .context("invalid feminine pronoun list")?;
        Ok(Self {
            lexicon,
            pools,
            narrator_override,
            masculine,
            feminine,
            male_cursor: 0,
            female_cursor: 0,
            neutral_cursor: 0,
            unknown_cursor: 0,
        })
    }

    /// Detects a gender for `name`: profile assertion, then name tables,
    /// then pronoun scoring over sentences mentioning the name, then a
    /// trailing-vowel guess.
    pub fn detect_gender(&self, name: &str, text: &str, profile: Option<&str>) -> Gender {
        if name == NARRATOR {
            return Gender::Neutral;
        }

        if let Some(profile) = profile {
            if female_assertion().is_match(profile) {
                return Gender::Female;
            }
            if male_assertion().is_match(profile) {
                return Gender::Male;
            }
        }

        if let Some(gender) = self.lexicon.lookup(name) {
            return gender;
        }

        if let Some(gender) = self.pronoun_score(name, text) {
            return gender;
        }

        trailing_vowel_guess(name)
    }

    fn pronoun_score(&self, name: &str, text: &str) -> Option<Gender> {
        let name_re = Regex::new(&format!(r"\b{}\b", regex::escape(name))).ok()?;
        let mut masculine = 0usize;
        let mut feminine = 0usize;

        for sentence in text.split(['.', '!', '?', '\n']) {
            if !name_re.is_match(sentence) {
                continue;
            }
            masculine += self.masculine.find_iter(sentence).count();
            feminine += self.feminine.find_iter(sentence).count();
        }

        if masculine > feminine {
            Some(Gender::Male)
        } else if feminine > masculine {
            Some(Gender::Female)
        } else {
            None
        }
    }

    /// Builds the session registry: a narrator entry plus one cast entry per
    /// character, in the order the names are given.
    pub fn build_registry(
        &mut self,
        names: &[String],
        text: &str,
        profiles: &HashMap<String, String>,
    ) -> CharacterRegistry {
        let mut registry = CharacterRegistry::default();

        let narrator_voice = self
            .narrator_override
            .clone()
            .unwrap_or_else(|| self.pools.narrator.clone());
        registry.insert(CharacterEntry {
            name: NARRATOR.to_string(),
            gender: Gender::Neutral,
            voice_id: narrator_voice,
        });

        for name in names {
            if name == NARRATOR || registry.get(name).is_some() {
                continue;
            }
            let gender = self.detect_gender(name, text, profiles.get(name).map(String::as_str));
            let voice_id = self.next_voice(gender);
            debug!("cast {name} as {gender:?} with voice {voice_id}");
            registry.insert(CharacterEntry {
                name: name.clone(),
                gender,
                voice_id,
            });
        }

        info!("cast {} character(s)", registry.len());
        registry
    }

    fn next_voice(&mut self, gender: Gender) -> String {
        match gender {
            Gender::Male => cycle(&self.pools.male, &mut self.male_cursor, &self.pools.fallback),
            Gender::Female => cycle(
                &self.pools.female,
                &mut self.female_cursor,
                &self.pools.fallback,
            ),
            Gender::Neutral => cycle(
                &self.pools.neutral,
                &mut self.neutral_cursor,
                &self.pools.fallback,
            ),
            Gender::Unknown => {
                // Alternate pools so unknown characters do not collapse onto
                // one voice; the shared cursor halves into a per-pool index.
                let turn = self.unknown_cursor;
                self.unknown_cursor += 1;
                let pool = if turn % 2 == 0 {
                    &self.pools.male
                } else {
                    &self.pools.female
                };
                if pool.is_empty() {
                    self.pools.fallback.clone()
                } else {
                    pool[(turn / 2) % pool.len()].clone()
                }
            }
        }
    }

    /// Copies each owning character's voice onto its blocks: narration gets
    /// the narrator voice, dialogue gets its speaker's voice, unregistered
    /// speakers get the fallback voice.
    pub fn attach_voices(&self, blocks: &mut [ScriptBlock], registry: &CharacterRegistry) {
        let narrator_voice = registry
            .narrator_voice()
            .unwrap_or(self.pools.narrator.as_str())
            .to_string();

        for block in blocks {
            block.voice_id = Some(match block.kind {
                BlockKind::Narration => narrator_voice.clone(),
                BlockKind::Dialogue => block
                    .speaker
                    .as_deref()
                    .and_then(|speaker| registry.get(speaker))
                    .map(|entry| entry.voice_id.clone())
                    .unwrap_or_else(|| self.pools.fallback.clone()),
            });
        }
    }
}

fn cycle(pool: &[String], cursor: &mut usize, fallback: &str) -> String {
    if pool.is_empty() {
        return fallback.to_string();
    }
    let voice = pool[*cursor % pool.len()].clone();
    *cursor += 1;
    voice
}

fn word_list_pattern(words: &[String]) -> Result<Regex> {
    let alternatives: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|"))).map_err(Into::into)
}

fn trailing_vowel_guess(name: &str) -> Gender {
    match name
        .chars()
        .rev()
        .find(|c| c.is_alphabetic())
        .map(|c| c.to_ascii_lowercase())
    {
        Some('a') | Some('e') => Gender::Female,
        _ => Gender::Unknown,
    }
}
