//! Boundary-preferring text chunking for speech synthesis payloads.

/// Splits `text` into chunks of at most `max_len` characters, cutting at the
/// most natural boundary available: sentence end, then paragraph break, then
/// line break, then comma/semicolon, then plain whitespace. A boundary in the
/// first half of the window is only used when nothing better exists; with no
/// boundary at all the cut is hard. Chunks are trimmed and never empty.
pub fn split_into_chunks(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        while start < chars.len() && chars[start].is_whitespace() {
            start += 1;
        }
        if start >= chars.len() {
            break;
        }

        let remaining = chars.len() - start;
        if remaining <= max_len {
            push_chunk(&mut chunks, &chars[start..]);
            break;
        }

        let window = &chars[start..start + max_len];
        let cut = find_cut(window).unwrap_or(max_len);
        push_chunk(&mut chunks, &window[..cut]);
        start += cut;
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<String>, chars: &[char]) {
    let chunk: String = chars.iter().collect();
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_string());
    }
}

/// Cut position (exclusive index into the window) after the best boundary,
/// or None when the window contains no boundary at all.
fn find_cut(window: &[char]) -> Option<usize> {
    let min_cut = window.len() / 2;
    let finders: [fn(&[char]) -> Option<usize>; 5] = [
        last_sentence_end,
        last_paragraph_break,
        last_line_break,
        last_clause_break,
        last_whitespace,
    ];

    for find in &finders {
        if let Some(cut) = find(window) {
            if cut >= min_cut {
                return Some(cut);
            }
        }
    }
    // Nothing past the halfway mark; settle for the best early boundary.
    finders.iter().find_map(|find| find(window))
}

fn last_sentence_end(window: &[char]) -> Option<usize> {
    (0..window.len()).rev().find_map(|i| {
        let terminal = matches!(window[i], '.' | '!' | '?');
        let at_edge = i + 1 == window.len() || window[i + 1].is_whitespace();
        (terminal && at_edge).then_some(i + 1)
    })
}

fn last_paragraph_break(window: &[char]) -> Option<usize> {
    (1..window.len())
        .rev()
        .find(|&i| window[i] == '\n' && window[i - 1] == '\n')
        .map(|i| i + 1)
}

fn last_line_break(window: &[char]) -> Option<usize> {
    (0..window.len())
        .rev()
        .find(|&i| window[i] == '\n')
        .map(|i| i + 1)
}

fn last_clause_break(window: &[char]) -> Option<usize> {
    (0..window.len())
        .rev()
        .find(|&i| matches!(window[i], ',' | ';'))
        .map(|i| i + 1)
}

fn last_whitespace(window: &[char]) -> Option<usize> {
    (0..window.len())
        .rev()
        .find(|&i| window[i].is_whitespace())
        .map(|i| i + 1)
}
