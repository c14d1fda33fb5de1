use serde::{Deserialize, Serialize};

/// Classification of a contiguous span of prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Narration,
    Dialogue,
}

/// One ordered unit of the parsed script. Created by [`segment`], enriched
/// in place by speaker resolution and voice casting, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptBlock {
    pub kind: BlockKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

impl ScriptBlock {
    pub fn narration(text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Narration,
            text: text.into(),
            speaker: None,
            voice_id: None,
        }
    }

    pub fn dialogue(text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Dialogue,
            text: text.into(),
            speaker: None,
            voice_id: None,
        }
    }
}

/// Splits raw prose into ordered narration/dialogue blocks.
///
/// Text outside quotes becomes Narration, text inside becomes Dialogue, in
/// strict left-to-right order. Straight `"…"` and curly `“…”` quoting are
/// recognized. Blocks are trimmed; empty spans are dropped. An unterminated
/// quote degrades to trailing Narration.
pub fn segment(raw: &str) -> Vec<ScriptBlock> {
    let mut blocks = Vec::new();
    let mut buf = String::new();
    let mut closer: Option<char> = None;

    for ch in raw.chars() {
        match closer {
            None => match ch {
                '"' => {
                    flush(&mut blocks, &mut buf, BlockKind::Narration);
                    closer = Some('"');
                }
                '“' => {
                    flush(&mut blocks, &mut buf, BlockKind::Narration);
                    closer = Some('”');
                }
                _ => buf.push(ch),
            },
            Some(close) => {
                if ch == close {
                    flush(&mut blocks, &mut buf, BlockKind::Dialogue);
                    closer = None;
                } else {
                    buf.push(ch);
                }
            }
        }
    }

    // Anything left over, quoted or not, is trailing narration.
    flush(&mut blocks, &mut buf, BlockKind::Narration);
    blocks
}

fn flush(blocks: &mut Vec<ScriptBlock>, buf: &mut String, kind: BlockKind) {
    let text = buf.trim();
    if !text.is_empty() {
        blocks.push(match kind {
            BlockKind::Narration => ScriptBlock::narration(text),
            BlockKind::Dialogue => ScriptBlock::dialogue(text),
        });
    }
    buf.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_blocks() {
        assert!(segment("").is_empty());
        assert!(segment("   \n\t ").is_empty());
    }

    #[test]
    fn splits_narration_and_dialogue_in_order() {
        let blocks = segment("Jack stood up. \"Hello everyone!\" Emily smiled. \"Hi Jack!\"");
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].kind, BlockKind::Narration);
        assert_eq!(blocks[0].text, "Jack stood up.");
        assert_eq!(blocks[1].kind, BlockKind::Dialogue);
        assert_eq!(blocks[1].text, "Hello everyone!");
        assert_eq!(blocks[2].kind, BlockKind::Narration);
        assert_eq!(blocks[2].text, "Emily smiled.");
        assert_eq!(blocks[3].kind, BlockKind::Dialogue);
        assert_eq!(blocks[3].text, "Hi Jack!");
    }

    #[test]
    fn curly_quotes_are_recognized() {
        let blocks = segment("She paused. “Are you sure?”");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].kind, BlockKind::Dialogue);
        assert_eq!(blocks[1].text, "Are you sure?");
    }

    #[test]
    fn empty_quotes_are_dropped() {
        let blocks = segment("He said \"\" and left. \"  \" Done.");
        assert!(blocks.iter().all(|b| !b.text.is_empty()));
        assert!(blocks.iter().all(|b| b.kind == BlockKind::Narration));
    }

    #[test]
    fn unterminated_quote_becomes_trailing_narration() {
        let blocks = segment("He began, \"I was going to say");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].kind, BlockKind::Narration);
        assert_eq!(blocks[1].kind, BlockKind::Narration);
        assert_eq!(blocks[1].text, "I was going to say");
    }

    #[test]
    fn content_is_preserved() {
        let input = "Jack stood up. \"Hello!\" Then silence. “Really?” The end.";
        let joined: String = segment(input).iter().map(|b| b.text.as_str()).collect();
        let strip = |s: &str| {
            s.chars()
                .filter(|c| !c.is_whitespace() && *c != '"' && *c != '“' && *c != '”')
                .collect::<String>()
        };
        assert_eq!(strip(&joined), strip(input));
    }

    #[test]
    fn segmentation_is_deterministic() {
        let input = "Anna waved. \"Over here!\" Ben ran. \"Coming!\"";
        let a = segment(input);
        let b = segment(input);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.kind, y.kind);
            assert_eq!(x.text, y.text);
        }
    }
}
