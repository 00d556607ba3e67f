use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{Block, PageBlocks};

/// Front-matter noise that disqualifies a line as a title candidate.
static SKIP_MARKERS: &[&str] = &[
    "arxiv:",
    "doi:",
    "http",
    "www.",
    "preprint",
    "submitted",
    "accepted",
    "published",
    "received",
    "copyright",
    "all rights reserved",
    "proceedings of",
    "journal of",
    "vol.",
    "keywords:",
    "abstract",
];

/// Capitalized line made of letters, spaces, and hyphens only.
/// The crudest title shape, used as the last fallback.
static TITLE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[A-Z][A-Za-z\s\-]+$").unwrap());

/// Extract the paper title from the first page.
///
/// Prefers the top-of-page block with the largest oversized font, then
/// falls back to the first plausible text line, then to a bare
/// capitalized-line pattern over the whole document.
pub fn extract(pages: &[PageBlocks], body_font: f32) -> Option<String> {
    let first = pages.first()?;
    from_layout(first, body_font)
        .or_else(|| from_first_lines(first))
        .or_else(|| from_pattern(&crate::layout::document_text(pages)))
}

/// Largest-font block in the upper half of the first page.
fn from_layout(page: &PageBlocks, body_font: f32) -> Option<String> {
    let mut best: Option<(f32, &Block)> = None;

    for block in &page.blocks {
        // PDF y grows upward; keep to the upper half of the page.
        if block.y < page.height * 0.45 {
            continue;
        }
        let font = block
            .lines
            .iter()
            .map(|l| l.font_size)
            .fold(0.0f32, f32::max);
        if font < body_font * 1.1 {
            continue;
        }
        let text = collapse_spaces(&block.text());
        if !plausible(&text) {
            continue;
        }
        let better = match best {
            Some((best_font, _)) => font > best_font,
            None => true,
        };
        if better {
            best = Some((font, block));
        }
    }

    best.map(|(_, block)| clean(&block.text()))
}

/// First line on the page with more than five characters.
fn from_first_lines(page: &PageBlocks) -> Option<String> {
    page.line_texts()
        .iter()
        .take(10)
        .map(|line| line.trim())
        .find(|line| line.len() > 5)
        .map(clean)
}

/// First capitalized letters-only line anywhere in the text.
fn from_pattern(text: &str) -> Option<String> {
    TITLE_LINE_RE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .find(|cand| plausible(&collapse_spaces(cand)))
        .map(clean)
}

fn plausible(text: &str) -> bool {
    if text.len() <= 5 || text.len() > 300 {
        return false;
    }
    let lower = text.to_lowercase();
    if lower.contains('@') {
        return false;
    }
    !SKIP_MARKERS.iter().any(|m| lower.contains(m))
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize whitespace and strip trailing punctuation.
fn clean(text: &str) -> String {
    let mut result = collapse_spaces(text);
    while result.ends_with(['.', ',', ';']) {
        result.pop();
    }
    result
}
