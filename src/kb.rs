use std::collections::HashSet;

use once_cell::sync::Lazy;

// Force recompilation when KB files change (hash set by build.rs).
#[allow(dead_code)]
const _KB_HASH: &str = env!("KB_HASH");

static GIVEN_NAMES_KB: &str = include_str!("../kbs/given-names.kb");
static SECTION_KEYWORDS_KB: &str = include_str!("../kbs/section-keywords.kb");

/// Known given names, uppercased for case-insensitive lookup.
pub static GIVEN_NAMES: Lazy<HashSet<String>> = Lazy::new(|| {
    GIVEN_NAMES_KB
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            Some(line.to_uppercase())
        })
        .collect()
});

/// Canonical section names ("ABSTRACT", "RELATED WORK", ...), uppercased.
/// Sorted by length descending for longest-match-first lookup.
pub static SECTION_KEYWORDS: Lazy<Vec<String>> = Lazy::new(|| {
    let mut entries: Vec<String> = SECTION_KEYWORDS_KB
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            Some(line.to_uppercase())
        })
        .collect();
    entries.sort_by(|a, b| b.len().cmp(&a.len()));
    entries
});

/// True when the token is a known given name, ignoring case and
/// surrounding punctuation.
pub fn is_given_name(token: &str) -> bool {
    let trimmed = token.trim_matches(|c: char| !c.is_alphabetic());
    if trimmed.is_empty() {
        return false;
    }
    GIVEN_NAMES.contains(&trimmed.to_uppercase())
}

/// True when the text names a canonical paper section, optionally behind
/// a numbering prefix ("3. Results", "IV. METHOD", "Appendix A").
pub fn is_section_keyword(text: &str) -> bool {
    let stripped = strip_numbering(text.trim());
    let normalized = stripped
        .trim_end_matches([':', '.'])
        .trim()
        .to_uppercase();
    if normalized.is_empty() {
        return false;
    }
    SECTION_KEYWORDS.iter().any(|kw| *kw == normalized)
}

/// Drop a leading "1.", "2.3", "IV.", or "A." numbering token.
pub fn strip_numbering(text: &str) -> &str {
    let Some((first, rest)) = text.split_once(' ') else {
        return text;
    };
    let token = first.trim_end_matches(['.', ')']);
    if token.is_empty() {
        return text;
    }
    let arabic = token.chars().all(|c| c.is_ascii_digit() || c == '.');
    let roman = token.chars().all(|c| "IVXLCDM".contains(c));
    let single_letter = token.len() == 1 && token.chars().all(|c| c.is_ascii_uppercase());
    if arabic || roman || single_letter {
        rest.trim_start()
    } else {
        text
    }
}
