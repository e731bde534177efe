//! Citation parsing and canonicalization.
//!
//! Citations arrive as free-form strings such as `"Genesis 1:1"`,
//! `"Beit Yosef, Orach Chayim 325:34:1"` or `"Shabbat 45b:3"`. Parsing
//! splits them into a book title, an optional section, and a list of
//! integer references; canonicalization produces the lookup keys used by
//! the link resolver.

use crate::hebrew::to_gematria;

/// A parsed citation. `refs` are the positional integers after the section
/// name; a section-only citation has an empty `refs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub book_title: String,
    pub section: Option<String>,
    pub refs: Vec<u32>,
}

impl Citation {
    /// The citation without its trailing positional refs, e.g.
    /// `"Tur, Orach Chayim"` for `"Tur, Orach Chayim 1:1"`.
    pub fn base(&self) -> String {
        match &self.section {
            Some(section) => format!("{}, {}", self.book_title, section),
            None => self.book_title.clone(),
        }
    }

    /// True when the citation names a section (or the whole book) without
    /// positional refs.
    pub fn is_section_only(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Parse a single numeric ref token. Plain integers parse as-is; a Talmud
/// daf token `N{a|b}` converts to `2N-1` for side a and `2N` for side b.
fn parse_ref_token(token: &str) -> Option<u32> {
    if token.is_empty() {
        return None;
    }
    if let Ok(n) = token.parse::<u32>() {
        return Some(n);
    }
    let (digits, side) = token.split_at(token.len().saturating_sub(1));
    let n: u32 = digits.parse().ok()?;
    match side {
        "a" => Some(n * 2 - 1),
        "b" => Some(n * 2),
        _ => None,
    }
}

/// Returns true when `token` is a positional ref tail: colon-separated
/// integers, each optionally carrying a daf side letter.
fn is_ref_tail(token: &str) -> bool {
    !token.is_empty()
        && token.split(':').all(|part| {
            !part.is_empty()
                && part.chars().next().is_some_and(|c| c.is_ascii_digit())
                && parse_ref_token(part).is_some()
        })
}

/// Parse a free-form citation string.
///
/// Returns `None` for empty or structurally impossible input. Unknown book
/// names are not an error here; resolution against the corpus happens in
/// the link resolver. Range citations (`"X 1:1-5"`) reduce to their start.
pub fn parse(input: &str) -> Option<Citation> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut tokens: Vec<&str> = trimmed.split_whitespace().collect();
    let last = *tokens.last()?;

    // A range reduces to its start before ref parsing.
    let last_owned;
    let last = if let Some((start, _)) = last.split_once('-') {
        last_owned = start.to_string();
        last_owned.as_str()
    } else {
        last
    };

    let refs = if is_ref_tail(last) {
        tokens.pop();
        last.split(':')
            .map(parse_ref_token)
            .collect::<Option<Vec<u32>>>()?
    } else {
        Vec::new()
    };

    let name_part = tokens.join(" ");
    let name_part = name_part.trim().trim_end_matches(',').trim();
    if name_part.is_empty() {
        return None;
    }

    let (book_title, section) = match name_part.split_once(',') {
        Some((head, tail)) => {
            let tail = tail.trim();
            let section = if tail.is_empty() {
                None
            } else {
                Some(tail.to_string())
            };
            (head.trim().to_string(), section)
        }
        None => (name_part.to_string(), None),
    };
    if book_title.is_empty() {
        return None;
    }

    Some(Citation {
        book_title,
        section,
        refs,
    })
}

/// Canonical form of a citation string: lowercased, commas removed,
/// whitespace runs collapsed. Used as a lookup key.
pub fn canonical(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for ch in s.chars() {
        if ch == ',' {
            continue;
        }
        if ch.is_whitespace() {
            if !out.is_empty() {
                pending_space = true;
            }
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        for lower in ch.to_lowercase() {
            out.push(lower);
        }
    }
    out
}

/// Canonical form with trailing positional refs dropped, e.g.
/// `"tur orach chayim"` for `"Tur, Orach Chayim 1:1"`. Also reduces a
/// trailing range to its start before dropping it.
pub fn canonical_base(s: &str) -> String {
    let canon = canonical(s);
    let mut tokens: Vec<&str> = canon.split(' ').collect();
    while let Some(&last) = tokens.last() {
        let head = last.split_once('-').map(|(a, _)| a).unwrap_or(last);
        if is_ref_tail(head) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}

/// Format the positional refs of a citation in Hebrew, joined by `:`.
pub fn refs_to_hebrew(refs: &[u32]) -> String {
    refs.iter()
        .map(|&n| to_gematria(n))
        .collect::<Vec<_>>()
        .join(":")
}
