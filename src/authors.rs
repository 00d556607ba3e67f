use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::kb;
use crate::types::PageBlocks;

/// "First Last" or "First M. Last" shapes.
static AUTHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][a-zA-Z]*\s(?:[A-Z]\.\s)?[A-Z][a-zA-Z]*\b").unwrap()
});

/// Affiliation and contact markers that disqualify a line.
static NON_NAME_MARKERS: &[&str] = &[
    "university",
    "institute",
    "department",
    "laboratory",
    "school of",
    "college",
    "center for",
    "centre for",
    "research group",
    "et al",
    "email",
    "@",
];

/// Footnote daggers PDF author lists hang off names.
const FOOTNOTE_MARKS: &[char] = &['*', '\u{2020}', '\u{2021}', '\u{00a7}'];

/// Extract author names from the first page.
///
/// Candidate lines come from the front matter above the first section
/// heading. With `name_filter` on, a candidate passes when it starts
/// with a known given name, or when it sits on an author-list shaped
/// line that some known given name anchors.
pub fn extract(pages: &[PageBlocks], name_filter: bool) -> Vec<String> {
    let Some(first) = pages.first() else {
        return Vec::new();
    };
    from_lines(&first.line_texts(), name_filter)
}

pub fn from_lines(lines: &[String], name_filter: bool) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();

    for line in lines.iter().take(30) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Author blocks never continue past the first section heading.
        if kb::is_section_keyword(line) {
            break;
        }
        let lower = line.to_lowercase();
        if NON_NAME_MARKERS.iter().any(|m| lower.contains(m)) {
            continue;
        }

        let candidates: Vec<&str> = AUTHOR_RE
            .find_iter(line)
            .map(|m| m.as_str().trim())
            .collect();
        // A known given name vouches for every name on a list-shaped
        // line, so co-authors missing from the dictionary still pass.
        let anchored = author_list_line(line)
            && candidates.iter().any(|c| starts_with_given_name(c));

        for candidate in candidates {
            if !name_filter || anchored || starts_with_given_name(candidate) {
                names.push(candidate.to_string());
            }
        }
    }

    dedup_ordered(names)
}

fn starts_with_given_name(candidate: &str) -> bool {
    candidate
        .split_whitespace()
        .next()
        .is_some_and(kb::is_given_name)
}

/// Lines that read like "A. Author, B. Author and C. Author" or carry
/// footnote daggers next to capitalized words.
fn author_list_line(line: &str) -> bool {
    if let Some((before, after)) = line.split_once(" and ") {
        if capitalized_words(before) >= 1 && capitalized_words(after) >= 1 {
            return true;
        }
    }

    let name_like_parts = line
        .split(',')
        .filter(|part| {
            let part = part.trim();
            part.len() > 2 && capitalized_words(part) >= 1
        })
        .count();
    if name_like_parts >= 2 {
        return true;
    }

    line.contains(FOOTNOTE_MARKS) && capitalized_words(line) >= 2
}

fn capitalized_words(text: &str) -> usize {
    text.split_whitespace()
        .filter(|word| {
            word.len() > 1
                && word.chars().next().is_some_and(|c| c.is_uppercase())
        })
        .count()
}

/// Case-insensitive dedup preserving first-occurrence order.
fn dedup_ordered(names: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.to_lowercase()))
        .collect()
}
