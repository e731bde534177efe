//! Snippet construction and term highlighting.
//!
//! Hits carry a short excerpt of the matched line with query terms wrapped
//! in `<b>` tags. Matching runs over the normalized text; the highlight
//! spans are projected back onto the nikud-bearing text through the index
//! map, so the displayed snippet keeps its diacritics.

use crate::hebrew::{is_diacritic, strip_diacritics_with_map};

/// Window of neighbor lines pulled in when a matched line is too short on
/// its own.
pub const NEIGHBOR_WINDOW: i64 = 4;
/// Minimum snippet source length in characters.
pub const MIN_SOURCE_CHARS: usize = 280;
/// Context window, in normalized characters, scanned around the anchor.
const CONTEXT_CHARS: usize = 200;

/// Remove HTML tags, replacing each tag with a space so adjacent words do
/// not fuse. Trivial sanitization only; no entity handling.
pub fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            _ => out.push(ch),
        }
    }
    out
}

/// A rendered snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    /// Display text with `<b>` highlight tags, possibly `...`-trimmed.
    pub html: String,
    /// Number of distinct highlight terms present in the window.
    pub matched_terms: usize,
}

/// One whole-word match in the normalized text: `[start, end)` char
/// ordinals plus the index of the matching term.
#[derive(Debug, Clone, Copy)]
struct TermMatch {
    start: usize,
    end: usize,
    term: usize,
}

/// Find whole-word occurrences of each term in the normalized text.
fn find_matches(plain: &str, terms: &[String]) -> Vec<TermMatch> {
    let words: Vec<(usize, &str)> = {
        // (char offset, word) pairs over the space-separated plain text.
        let mut out = Vec::new();
        let mut char_pos = 0usize;
        for word in plain.split(' ') {
            if !word.is_empty() {
                out.push((char_pos, word));
            }
            char_pos += word.chars().count() + 1;
        }
        out
    };

    let mut matches = Vec::new();
    for (offset, word) in words {
        for (term_idx, term) in terms.iter().enumerate() {
            if word == term {
                matches.push(TermMatch {
                    start: offset,
                    end: offset + word.chars().count(),
                    term: term_idx,
                });
                break;
            }
        }
    }
    matches
}

/// Choose the anchor maximizing the count of distinct terms inside the
/// context window starting at a match.
fn best_anchor(matches: &[TermMatch], term_count: usize) -> usize {
    let mut best = 0usize;
    let mut best_distinct = 0usize;
    for (i, anchor) in matches.iter().enumerate() {
        let mut seen = vec![false; term_count];
        let mut distinct = 0usize;
        for m in matches[i..]
            .iter()
            .take_while(|m| m.start < anchor.start + CONTEXT_CHARS)
        {
            if !seen[m.term] {
                seen[m.term] = true;
                distinct += 1;
            }
        }
        if distinct > best_distinct {
            best_distinct = distinct;
            best = i;
        }
    }
    best
}

/// Extend a byte offset in `display` past any combining diacritics, so a
/// closing tag never splits a letter from its points.
fn extend_past_diacritics(display: &str, mut at: usize) -> usize {
    while at < display.len() {
        let Some(ch) = display[at..].chars().next() else {
            break;
        };
        if is_diacritic(ch as u32) {
            at += ch.len_utf8();
        } else {
            break;
        }
    }
    at
}

/// Build a highlighted snippet from raw HTML-bearing source text.
///
/// `terms` must already be normalized. Only whole words are wrapped; a
/// `<b>` never opens inside a letter or digit run. Returns `None` when no
/// term occurs in the source.
pub fn build_snippet(raw: &str, terms: &[String]) -> Option<Snippet> {
    if terms.is_empty() {
        return None;
    }
    let display = strip_html(raw);
    let (plain, map) = strip_diacritics_with_map(&display);
    if plain.is_empty() {
        return None;
    }

    let matches = find_matches(&plain, terms);
    if matches.is_empty() {
        return None;
    }

    let anchor_idx = best_anchor(&matches, terms.len());
    let anchor = matches[anchor_idx];

    // Window in plain char ordinals, then snapped to word boundaries.
    let plain_len = plain.chars().count();
    let lead = CONTEXT_CHARS / 4;
    let mut window_start = anchor.start.saturating_sub(lead);
    let mut window_end = (anchor.start + CONTEXT_CHARS).min(plain_len);
    let plain_chars: Vec<char> = plain.chars().collect();
    while window_start > 0 && plain_chars[window_start - 1] != ' ' {
        window_start -= 1;
    }
    while window_end < plain_len && plain_chars[window_end - 1] != ' ' {
        window_end += 1;
    }

    let in_window: Vec<TermMatch> = matches
        .iter()
        .copied()
        .filter(|m| m.start >= window_start && m.end <= window_end)
        .collect();
    let matched_terms = {
        let mut seen = vec![false; terms.len()];
        in_window.iter().for_each(|m| seen[m.term] = true);
        seen.iter().filter(|&&s| s).count()
    };

    // Project char ordinals onto display byte offsets.
    let byte_at = |char_pos: usize| -> usize {
        if char_pos < map.len() {
            map[char_pos]
        } else {
            display.len()
        }
    };
    let end_byte_at = |char_end: usize| -> usize {
        // Last char of the span, extended over its own trailing marks.
        let last = byte_at(char_end - 1);
        let ch_len = display[last..].chars().next().map_or(0, char::len_utf8);
        extend_past_diacritics(&display, last + ch_len)
    };

    let snippet_start = byte_at(window_start);
    let snippet_end = if window_end == 0 {
        0
    } else {
        end_byte_at(window_end)
    };

    let mut html = String::new();
    if window_start > 0 {
        html.push_str("...");
    }
    let mut cursor = snippet_start;
    for m in &in_window {
        let start = byte_at(m.start);
        let end = end_byte_at(m.end);
        if start < cursor {
            continue;
        }
        html.push_str(&display[cursor..start]);
        html.push_str("<b>");
        html.push_str(&display[start..end]);
        html.push_str("</b>");
        cursor = end;
    }
    html.push_str(&display[cursor..snippet_end]);
    if window_end < plain_len {
        html.push_str("...");
    }

    Some(Snippet {
        html,
        matched_terms,
    })
}
