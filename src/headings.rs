use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::kb;
use crate::types::{Heading, PageBlocks};

/// Multi-level decimals ("2.1 Data"), bare numbers ("3 Results"),
/// roman numerals ("IV. Scope"), or alpha enumerations ("A. Proofs").
static NUMBERED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?:\d+\.)+\d*|\d+[\.)]?|[IVXLCDM]+[\.)]|[A-Z][\.)])\s+\S").unwrap()
});

/// All-caps section lines like "RELATED WORK".
static ALL_CAPS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z\s\-]{2,}$").unwrap());

/// Extract section headings from every page.
///
/// The layout pass keeps short blocks set oversized or bold relative to
/// the body font, plus exact section-keyword lines. When a document has
/// no usable font variation the pattern pass takes over, keeping lines
/// that look like numbered or all-caps sections.
pub fn extract(pages: &[PageBlocks], body_font: f32, title: Option<&str>) -> Vec<Heading> {
    let mut headings = from_layout(pages, body_font);
    if headings.is_empty() {
        headings = from_patterns(pages);
    }

    if let Some(title_key) = title.map(normalized) {
        headings.retain(|h| normalized(&h.text) != title_key);
    }

    dedup_ordered(headings)
}

fn from_layout(pages: &[PageBlocks], body_font: f32) -> Vec<Heading> {
    let mut headings = Vec::new();

    for page in pages {
        for block in &page.blocks {
            // Headings run one line, two at most when wrapped.
            if block.lines.is_empty() || block.lines.len() > 2 {
                continue;
            }
            let text = collapse(&block.text());
            if !plausible(&text) {
                continue;
            }
            let font = block
                .lines
                .iter()
                .map(|l| l.font_size)
                .fold(0.0f32, f32::max);
            let oversized = font >= body_font * 1.15;
            let emphasized = block.is_bold() && font >= body_font * 0.95;
            if oversized || emphasized || kb::is_section_keyword(&text) {
                headings.push(Heading { text, page: Some(page.page_num) });
            }
        }
    }
    headings
}

fn from_patterns(pages: &[PageBlocks]) -> Vec<Heading> {
    let mut headings = Vec::new();

    for page in pages {
        for line in page.line_texts() {
            let text = collapse(&line);
            if !plausible(&text) {
                continue;
            }
            if NUMBERED_RE.is_match(&text)
                || ALL_CAPS_RE.is_match(&text)
                || kb::is_section_keyword(&text)
            {
                headings.push(Heading { text, page: Some(page.page_num) });
            }
        }
    }
    headings
}

fn plausible(text: &str) -> bool {
    if text.len() < 3 || text.len() > 120 {
        return false;
    }
    if !text.chars().any(|c| c.is_alphabetic()) {
        return false;
    }
    // Sentence endings mean prose; colons are fine ("Background:").
    if text.ends_with(['.', ',', ';']) {
        return false;
    }
    if text.contains('@') {
        return false;
    }
    !has_dot_leaders(text)
}

/// Detect dot-leader patterns used in tables of contents, e.g.:
///   "References . . . . . . . ."  (space-separated dots)
///   "References..........."       (consecutive dots)
///   "References … … …"            (ellipsis characters)
/// Three or more dots (consecutive or space-separated) signals a TOC entry.
pub(crate) fn has_dot_leaders(text: &str) -> bool {
    if text.contains("...") {
        return true;
    }
    if text.contains("\u{2026}\u{2026}\u{2026}") {
        return true;
    }
    let chars: Vec<char> = text.chars().collect();
    let mut dot_run = 0usize;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '.' || chars[i] == '\u{2026}' {
            dot_run += 1;
            if dot_run >= 3 {
                return true;
            }
            i += 1;
        } else if chars[i] == ' '
            && i + 1 < chars.len()
            && (chars[i + 1] == '.' || chars[i + 1] == '\u{2026}')
        {
            // Space before another dot: keep the run going
            i += 1;
        } else {
            dot_run = 0;
            i += 1;
        }
    }
    false
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalized(text: &str) -> String {
    collapse(text).to_uppercase()
}

fn dedup_ordered(headings: Vec<Heading>) -> Vec<Heading> {
    let mut seen: HashSet<String> = HashSet::new();
    headings
        .into_iter()
        .filter(|h| seen.insert(normalized(&h.text)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Block, Line, Word};

    fn block(page_lines: &[&str], y: f32, font_size: f32, bold: bool) -> Block {
        let lines: Vec<Line> = page_lines
            .iter()
            .enumerate()
            .map(|(li, lt)| {
                let ly = y - li as f32 * font_size * 1.2;
                let words: Vec<Word> = lt
                    .split_whitespace()
                    .enumerate()
                    .map(|(i, w)| Word {
                        text: w.to_string(),
                        x: 50.0 + i as f32 * 40.0,
                        y: ly,
                        width: 35.0,
                        font_size,
                        bold,
                    })
                    .collect();
                let x_end = words.last().map(|w| w.x + w.width).unwrap_or(50.0);
                Line { words, y: ly, x_start: 50.0, x_end, font_size }
            })
            .collect();
        Block {
            x: 50.0,
            y,
            width: 400.0,
            height: font_size * lines.len() as f32,
            font_size,
            lines,
        }
    }

    fn single(text: &str, y: f32, font_size: f32, bold: bool) -> Block {
        block(&[text], y, font_size, bold)
    }

    fn page(num: usize, blocks: Vec<Block>) -> PageBlocks {
        PageBlocks { page_num: num, height: 792.0, blocks }
    }

    #[test]
    fn oversized_and_bold_blocks_are_headings() {
        let pages = vec![page(
            1,
            vec![
                single("1. Introduction", 700.0, 14.0, true),
                single(
                    "We describe a method for extracting structure from papers",
                    660.0,
                    10.0,
                    false,
                ),
                single("2.1 Data Collection", 600.0, 10.0, true),
            ],
        )];
        let headings = extract(&pages, 10.0, None);
        let texts: Vec<&str> = headings.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["1. Introduction", "2.1 Data Collection"]);
        assert_eq!(headings[0].page, Some(1));
    }

    #[test]
    fn section_keyword_counts_even_at_body_size() {
        let pages = vec![page(
            3,
            vec![
                single("References", 700.0, 10.0, false),
                single("Some regular paragraph text that runs on", 660.0, 10.0, false),
            ],
        )];
        let headings = extract(&pages, 10.0, None);
        assert_eq!(headings.len(), 1);
        assert_eq!(headings[0].text, "References");
        assert_eq!(headings[0].page, Some(3));
    }

    #[test]
    fn long_blocks_and_toc_lines_are_rejected() {
        let pages = vec![page(
            1,
            vec![
                block(
                    &[
                        "This bold callout paragraph spans",
                        "three separate layout lines and so",
                        "cannot be a section heading at all",
                    ],
                    700.0,
                    12.0,
                    true,
                ),
                single("References . . . . . . . . 12", 600.0, 14.0, true),
                single("Conclusion and Future Work", 500.0, 14.0, true),
            ],
        )];
        let headings = extract(&pages, 10.0, None);
        let texts: Vec<&str> = headings.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["Conclusion and Future Work"]);
    }

    #[test]
    fn pattern_pass_handles_flat_fonts() {
        // No font variation, no bold, no section keywords: the layout
        // pass finds nothing and the pattern pass takes over.
        let pages = vec![page(
            1,
            vec![
                single("3. Proposed Architecture", 700.0, 10.0, false),
                single("Our approach builds on earlier systems", 660.0, 10.0, false),
                single("EXPERIMENTAL PIPELINE", 600.0, 10.0, false),
            ],
        )];
        let headings = extract(&pages, 10.0, None);
        let texts: Vec<&str> = headings.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["3. Proposed Architecture", "EXPERIMENTAL PIPELINE"]);
    }

    #[test]
    fn title_is_excluded_from_headings() {
        let pages = vec![page(
            1,
            vec![
                single("Attention Is All You Need", 750.0, 18.0, false),
                single("1. Introduction", 650.0, 13.0, true),
            ],
        )];
        let headings = extract(&pages, 10.0, Some("Attention Is All You Need"));
        let texts: Vec<&str> = headings.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["1. Introduction"]);
    }

    #[test]
    fn repeated_headings_keep_first_page() {
        let pages = vec![
            page(1, vec![single("Methods", 700.0, 14.0, true)]),
            page(2, vec![single("Methods", 700.0, 14.0, true)]),
        ];
        let headings = extract(&pages, 10.0, None);
        assert_eq!(headings.len(), 1);
        assert_eq!(headings[0].page, Some(1));
    }

    #[test]
    fn dot_leader_detection() {
        assert!(has_dot_leaders("References....... 12"));
        assert!(has_dot_leaders("References . . . . 12"));
        assert!(has_dot_leaders("Intro \u{2026} \u{2026} \u{2026} 3"));
        assert!(!has_dot_leaders("References"));
        assert!(!has_dot_leaders("e.g. some text"));
    }
}
