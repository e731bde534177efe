//! Hebrew text normalization and numeral formatting.
//!
//! The normalizer is the hot path of indexing: every line of every book is
//! stripped of nikud and teamim before it reaches the tokenizer, and the
//! same transform runs again on each query string.

/// Maqaf (Hebrew hyphen), normalized to a plain space.
pub const MAQAF: char = '\u{05BE}';
/// Geresh, stripped during normalization.
pub const GERESH: char = '\u{05F3}';
/// Gershayim, stripped during normalization.
pub const GERSHAYIM: char = '\u{05F4}';

/// Returns true for code points removed during normalization: cantillation
/// marks (U+0591..U+05AF) and vowel points (U+05B0..U+05BD, U+05C1, U+05C2,
/// U+05C7).
pub fn is_diacritic(cp: u32) -> bool {
    matches!(cp, 0x0591..=0x05AF | 0x05B0..=0x05BD | 0x05C1 | 0x05C2 | 0x05C7)
}

/// Map a final-form letter to its base form, or return the input unchanged.
pub fn final_to_base(ch: char) -> char {
    match ch {
        'ך' => 'כ',
        'ם' => 'מ',
        'ן' => 'נ',
        'ף' => 'פ',
        'ץ' => 'צ',
        other => other,
    }
}

/// Replace every final-form letter in `s` with its base form.
pub fn replace_finals_with_base(s: &str) -> String {
    s.chars().map(final_to_base).collect()
}

/// Normalize a Hebrew string for indexing and lookup.
///
/// Applies, in order: diacritic stripping, maqaf to space, geresh and
/// gershayim removal, final-letter folding, whitespace-run collapsing, and
/// trimming. Pure and allocation-light; one output `String` per call.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    for ch in input.chars() {
        if is_diacritic(ch as u32) || ch == GERESH || ch == GERSHAYIM {
            continue;
        }
        let ch = if ch == MAQAF { ' ' } else { ch };
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
        out.push(final_to_base(ch));
    }
    out
}

/// Normalize `input` and return the byte offset (into `input`) of each
/// surviving character.
///
/// `map[i]` is the position in the original string of the i-th character of
/// the plain string, so highlight spans computed over the plain text can be
/// projected back onto the original HTML-bearing text. A collapsed
/// whitespace run is represented by the offset of its first character.
pub fn strip_diacritics_with_map(input: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(input.len());
    let mut map = Vec::with_capacity(input.len());
    let mut pending_space: Option<usize> = None;
    for (offset, ch) in input.char_indices() {
        if is_diacritic(ch as u32) || ch == GERESH || ch == GERSHAYIM {
            continue;
        }
        let ch = if ch == MAQAF { ' ' } else { ch };
        if ch.is_whitespace() {
            if !out.is_empty() && pending_space.is_none() {
                pending_space = Some(offset);
            }
            continue;
        }
        if let Some(space_at) = pending_space.take() {
            out.push(' ');
            map.push(space_at);
        }
        out.push(final_to_base(ch));
        map.push(offset);
    }
    (out, map)
}

const GEMATRIA_ONES: [char; 9] = ['א', 'ב', 'ג', 'ד', 'ה', 'ו', 'ז', 'ח', 'ט'];
const GEMATRIA_TENS: [char; 9] = ['י', 'כ', 'ל', 'מ', 'נ', 'ס', 'ע', 'פ', 'צ'];
const GEMATRIA_HUNDREDS: [char; 4] = ['ק', 'ר', 'ש', 'ת'];

/// Format `n` in Hebrew numeral notation.
///
/// Uses the conventional letter values with the טו/טז special cases for 15
/// and 16, and a thousands prefix for values of 1000 and above. Returns an
/// empty string for 0.
pub fn to_gematria(n: u32) -> String {
    let mut out = String::new();
    let mut n = n;
    if n >= 1000 {
        out.push_str(&to_gematria(n / 1000));
        out.push(GERESH);
        n %= 1000;
        if n == 0 {
            return out;
        }
    }
    while n >= 400 {
        out.push('ת');
        n -= 400;
    }
    if n >= 100 {
        out.push(GEMATRIA_HUNDREDS[(n / 100) as usize - 1]);
        n %= 100;
    }
    // 15 and 16 avoid spelling out letter pairs reserved for the divine name.
    if n == 15 {
        out.push_str("טו");
        return out;
    }
    if n == 16 {
        out.push_str("טז");
        return out;
    }
    if n >= 10 {
        out.push(GEMATRIA_TENS[(n / 10) as usize - 1]);
        n %= 10;
    }
    if n >= 1 {
        out.push(GEMATRIA_ONES[n as usize - 1]);
    }
    out
}

/// Returns true if `ch` is a Hebrew letter (including final forms).
pub fn is_hebrew_letter(ch: char) -> bool {
    ('\u{05D0}'..='\u{05EA}').contains(&ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_nikud() {
        assert_eq!(normalize("בְּרֵאשִׁית"), "בראשית");
    }

    #[test]
    fn test_strip_teamim() {
        // U+0596 (tipeha) and U+05A5 (merkha) are cantillation marks
        assert_eq!(normalize("בָּרָ֣א אֱלֹהִ֑ים"), "ברא אלהים");
    }

    #[test]
    fn test_final_letters_folded() {
        assert_eq!(normalize("שלום רבן"), "שלומ רבנ");
        assert_eq!(replace_finals_with_base("ךםןףץ"), "כמנפצ");
    }

    #[test]
    fn test_maqaf_becomes_space() {
        assert_eq!(normalize("בני־ישראל"), "בני ישראל");
    }

    #[test]
    fn test_geresh_and_gershayim_stripped() {
        assert_eq!(normalize("ה׳"), "ה");
        assert_eq!(normalize("רמב״ם"), "רמבמ");
    }

    #[test]
    fn test_whitespace_collapsed_and_trimmed() {
        assert_eq!(normalize("  א   ב  "), "א ב");
    }

    #[test]
    fn test_no_diacritics_survive() {
        let input = "וַיֹּ֥אמֶר אֱלֹהִ֖ים יְהִ֣י א֑וֹר";
        let plain = normalize(input);
        assert!(plain.chars().all(|c| !is_diacritic(c as u32)));
        assert!(!plain.contains(['ך', 'ם', 'ן', 'ף', 'ץ']));
    }

    #[test]
    fn test_index_map_projects_back() {
        let input = "בְּרֵאשִׁית בָּרָא";
        let (plain, map) = strip_diacritics_with_map(input);
        assert_eq!(plain.chars().count(), map.len());
        // Each mapped offset must point at a character that normalizes to
        // the surviving character (modulo final folding and maqaf).
        for (i, ch) in plain.chars().enumerate() {
            let orig = input[map[i]..].chars().next().unwrap();
            if orig.is_whitespace() || orig == MAQAF {
                assert_eq!(ch, ' ');
            } else {
                assert_eq!(final_to_base(orig), ch);
            }
        }
    }

    #[test]
    fn test_index_map_collapsed_run() {
        let (plain, map) = strip_diacritics_with_map("אב   גד");
        assert_eq!(plain, "אב גד");
        // The single space maps to the first whitespace byte of the run.
        assert_eq!(map[2], "אב".len());
    }

    #[test]
    fn test_gematria_basics() {
        assert_eq!(to_gematria(1), "א");
        assert_eq!(to_gematria(9), "ט");
        assert_eq!(to_gematria(10), "י");
        assert_eq!(to_gematria(11), "יא");
        assert_eq!(to_gematria(100), "ק");
        assert_eq!(to_gematria(123), "קכג");
        assert_eq!(to_gematria(400), "ת");
        assert_eq!(to_gematria(499), "תצט");
        assert_eq!(to_gematria(900), "תתק");
    }

    #[test]
    fn test_gematria_special_cases() {
        assert_eq!(to_gematria(15), "טו");
        assert_eq!(to_gematria(16), "טז");
        assert_eq!(to_gematria(115), "קטו");
        assert_eq!(to_gematria(216), "רטז");
    }

    #[test]
    fn test_gematria_thousands() {
        assert_eq!(to_gematria(1000), "א׳");
        assert_eq!(to_gematria(5784), "ה׳תשפד");
    }
}
