use once_cell::sync::Lazy;
use regex::Regex;

use crate::headings::has_dot_leaders;
use crate::kb;
use crate::types::{Block, PageBlocks, Reference};

/// Line marker patterns: [1], (1), 1., 1), [Author+Year] at the start of a line.
/// Numeric variants are limited to 1-3 digits to avoid matching years
/// ("[2017]" on a wrapped line, "2024." at a line start).
/// Bare variants also require trailing whitespace/EOL to reject decimals like "0.01".
/// Author-year markers: [Aal+12], [ABG14], [Kim+15a].
static LINE_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:\[(\d{1,3})\]|\((\d{1,3})\)|(\d{1,3})[.\)](?:\s|$)|\[([A-Z][\p{L}+]{0,7}\d{2}[a-z]?)\])\s*",
    )
    .unwrap()
});

/// Check if text contains citation-like content (years, venues, identifiers).
fn has_citation_content(text: &str) -> bool {
    static CITATION_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?:(?:19|20)\d{2}|arXiv|doi:|DOI:|https?://|et al|pp\.|[Vv]ol\.|Phys\.|Rev\.|Lett\.|Trans\.|Proc\.|IEEE|ACM|Springer|Press|Journal|Conference|Proceedings)",
        )
        .unwrap()
    });
    CITATION_RE.is_match(text)
}

/// Extract the bibliography from laid-out pages.
///
/// Looks for a verified "References" heading first; without one, falls
/// back to scanning for clusters of marker-led citation blocks.
pub fn extract(pages: &[PageBlocks]) -> Vec<Reference> {
    match find_reference_heading(pages) {
        Some(loc) => {
            let blocks = gather_section(pages, &loc);
            split_references(&blocks)
        }
        None => from_marker_blocks(pages),
    }
}

/// Strip a leading line marker, returning it alongside the remainder.
pub(crate) fn strip_marker(line: &str) -> (Option<String>, String) {
    match LINE_MARKER_RE.captures(line) {
        Some(caps) => {
            let marker = extract_marker(&caps);
            let rest = LINE_MARKER_RE.replace(line, "").trim().to_string();
            (marker, rest)
        }
        None => (None, line.trim().to_string()),
    }
}

// ── Heading discovery ──────────────────────────────────────────────────

/// Location of a reference heading: page index, block index, and
/// optionally the line index when the heading sits inside a larger block.
struct RefHeadingLoc {
    page_idx: usize,
    block_idx: usize,
    line_idx: Option<usize>,
}

/// Does this text name the bibliography section?
fn is_refs_heading(text: &str) -> bool {
    if has_dot_leaders(text) {
        return false;
    }
    let upper = text.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    let trimmed = upper.trim_end_matches([':', '.']).trim();
    if trimmed.len() >= 30 {
        return false;
    }
    matches!(
        kb::strip_numbering(trimmed),
        "REFERENCES" | "BIBLIOGRAPHY" | "REFERENCES AND NOTES" | "LITERATURE CITED" | "WORKS CITED"
    )
}

/// First reference heading verified by citation content after it.
/// Standalone heading blocks win over heading lines embedded in blocks.
fn find_reference_heading(pages: &[PageBlocks]) -> Option<RefHeadingLoc> {
    for (page_idx, page) in pages.iter().enumerate() {
        for (block_idx, block) in page.blocks.iter().enumerate() {
            if is_refs_heading(&block.text())
                && has_refs_after(pages, page_idx, block_idx)
            {
                return Some(RefHeadingLoc { page_idx, block_idx, line_idx: None });
            }
        }
    }
    for (page_idx, page) in pages.iter().enumerate() {
        for (block_idx, block) in page.blocks.iter().enumerate() {
            for (line_idx, line) in block.lines.iter().enumerate() {
                if is_refs_heading(&line.text())
                    && has_refs_after(pages, page_idx, block_idx)
                {
                    return Some(RefHeadingLoc {
                        page_idx,
                        block_idx,
                        line_idx: Some(line_idx),
                    });
                }
            }
        }
    }
    None
}

/// Verify a heading by checking if blocks after it contain citation-like
/// content. Works for both numbered ([1] Author...) and author-date refs,
/// and keeps TOC entries like "References . . . 12" from matching.
fn has_refs_after(pages: &[PageBlocks], page_idx: usize, block_idx: usize) -> bool {
    let mut checked = 0;
    let mut citation_score = 0;

    // Check remaining blocks on the same page, then the next page.
    // Capped because two-column layouts can split every line into its
    // own block.
    let mut candidates: Vec<&Block> = pages[page_idx].blocks[block_idx + 1..].iter().collect();
    if let Some(next) = pages.get(page_idx + 1) {
        candidates.extend(next.blocks.iter());
    }

    for block in candidates {
        citation_score += score_citation_block(block);
        if citation_score >= 4 {
            return true;
        }
        checked += 1;
        if checked >= 15 {
            break;
        }
    }
    false
}

/// Score a block for citation content. Lines with markers + citations
/// score 2, lines with just citation content score 1.
fn score_citation_block(block: &Block) -> usize {
    block
        .lines
        .iter()
        .map(|l| {
            let text = l.text();
            if let Some(m) = LINE_MARKER_RE.find(&text) {
                if has_citation_content(&text[m.end()..]) { 2 } else { 0 }
            } else if has_citation_content(&text) {
                1
            } else {
                0
            }
        })
        .sum()
}

// ── Section gathering ──────────────────────────────────────────────────

/// Block text with one layout line per string line, so markers stay at
/// line starts for the splitter.
fn block_lines_text(block: &Block) -> String {
    block
        .lines
        .iter()
        .map(|l| l.text())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A short block naming some other section ("Appendix", "Acknowledgments")
/// that ends the bibliography.
fn is_section_stop(block: &Block) -> bool {
    if block.lines.len() > 2 {
        return false;
    }
    let text = block.text();
    if is_refs_heading(&text) || text.len() >= 40 {
        return false;
    }
    kb::is_section_keyword(&text) || text.trim().to_uppercase().starts_with("APPENDIX")
}

fn gather_section(pages: &[PageBlocks], loc: &RefHeadingLoc) -> Vec<(String, usize)> {
    let mut ref_blocks = Vec::new();
    let heading_page = &pages[loc.page_idx];

    // Heading embedded mid-block: keep that block's remaining lines.
    if let Some(line_idx) = loc.line_idx {
        let block = &heading_page.blocks[loc.block_idx];
        let remaining = block.lines[line_idx + 1..]
            .iter()
            .map(|l| l.text())
            .collect::<Vec<_>>()
            .join("\n");
        if !remaining.is_empty() {
            ref_blocks.push((remaining, heading_page.page_num));
        }
    }

    for block in &heading_page.blocks[loc.block_idx + 1..] {
        if is_section_stop(block) {
            return ref_blocks;
        }
        ref_blocks.push((block_lines_text(block), heading_page.page_num));
    }

    let has_markers = ref_blocks
        .iter()
        .any(|(text, _)| count_markers_in_text(text) > 0);

    gather_subsequent_pages(pages, loc.page_idx, &mut ref_blocks, has_markers);
    ref_blocks
}

fn gather_subsequent_pages(
    pages: &[PageBlocks],
    start_page: usize,
    ref_blocks: &mut Vec<(String, usize)>,
    use_markers: bool,
) {
    let mut pages_without_refs = 0;
    for page in &pages[start_page + 1..] {
        let mut page_has_refs = false;
        let mut page_blocks_buf = Vec::new();
        let mut page_citation_lines = 0;
        let mut page_total_lines = 0;
        for block in &page.blocks {
            // A fresh section heading ends the bibliography; keep what
            // this page contributed before it.
            if is_refs_heading(&block.text()) || is_section_stop(block) {
                ref_blocks.extend(page_blocks_buf);
                return;
            }
            if use_markers {
                if has_any_marker(block) {
                    page_has_refs = true;
                }
            } else {
                // Accumulate citation density across the page
                for line in &block.lines {
                    page_total_lines += 1;
                    if has_citation_content(&line.text()) {
                        page_citation_lines += 1;
                    }
                }
            }
            page_blocks_buf.push((block_lines_text(block), page.page_num));
        }
        // Author-date mode: page counts when half its lines cite something
        if !use_markers
            && page_citation_lines >= 3
            && page_total_lines > 0
            && page_citation_lines * 2 >= page_total_lines
        {
            page_has_refs = true;
        }
        if page_has_refs {
            ref_blocks.extend(page_blocks_buf);
            pages_without_refs = 0;
        } else {
            pages_without_refs += 1;
            if pages_without_refs >= 2 {
                return;
            }
            // Allow one page without refs (continuation lines)
            ref_blocks.extend(page_blocks_buf);
        }
    }
}

// ── Marker-based fallback ──────────────────────────────────────────────

/// No heading found: look for dense marker blocks, then for a trailing
/// cluster of marker blocks at the end of the document.
fn from_marker_blocks(pages: &[PageBlocks]) -> Vec<Reference> {
    let mut lines = collect_dense_marker_blocks(pages);
    if lines.is_empty() {
        lines = collect_trailing_marker_blocks(pages);
    }
    if lines.is_empty() {
        return Vec::new();
    }
    split_references(&lines)
}

/// Blocks with 3+ markers AND citation content — dense reference lists.
/// The citation requirement keeps numbered TOC/list entries out.
fn collect_dense_marker_blocks(pages: &[PageBlocks]) -> Vec<(String, usize)> {
    let mut blocks = Vec::new();
    for page in pages {
        for block in &page.blocks {
            if count_markers_in_block(block) >= 3 && score_citation_block(block) >= 4 {
                blocks.push((block_lines_text(block), page.page_num));
            }
        }
    }
    blocks
}

/// Scan backwards from the end of the document for blocks with markers.
/// Requires 5+ total markers to avoid false positives from numbered lists.
/// If a cluster doesn't meet the threshold, resets and keeps scanning.
fn collect_trailing_marker_blocks(pages: &[PageBlocks]) -> Vec<(String, usize)> {
    let mut blocks = Vec::new();
    let mut pages_without_markers = 0;

    for page in pages.iter().rev() {
        let mut page_has_markers = false;
        let mut page_blocks_collected = Vec::new();
        // Blocks go in back-to-front so the final reverse restores
        // document order within each page too.
        for block in page.blocks.iter().rev() {
            if has_any_marker(block) {
                page_has_markers = true;
            }
            page_blocks_collected.push((block_lines_text(block), page.page_num));
        }
        if page_has_markers {
            blocks.extend(page_blocks_collected);
            pages_without_markers = 0;
        } else {
            pages_without_markers += 1;
            if !blocks.is_empty() && pages_without_markers >= 2 {
                if is_valid_trailing_cluster(&blocks) {
                    break;
                }
                blocks.clear();
                pages_without_markers = 0;
            }
        }
    }

    let total_markers: usize = blocks
        .iter()
        .map(|(text, _)| count_markers_in_text(text))
        .sum();
    if total_markers < 5 {
        return Vec::new();
    }

    blocks.reverse();
    blocks
}

/// A valid trailing cluster needs 5+ markers AND citation content in the
/// marker lines.
fn is_valid_trailing_cluster(blocks: &[(String, usize)]) -> bool {
    let mut total_markers = 0;
    let mut citation_lines = 0;
    for (text, _) in blocks {
        for line in text.lines() {
            if LINE_MARKER_RE.is_match(line) {
                total_markers += 1;
                let after = LINE_MARKER_RE.replace(line, "");
                if has_citation_content(after.trim()) {
                    citation_lines += 1;
                }
            }
        }
    }
    total_markers >= 5 && citation_lines >= 3
}

fn count_markers_in_block(block: &Block) -> usize {
    block
        .lines
        .iter()
        .filter(|l| LINE_MARKER_RE.is_match(&l.text()))
        .count()
}

fn has_any_marker(block: &Block) -> bool {
    block
        .lines
        .iter()
        .any(|l| LINE_MARKER_RE.is_match(&l.text()))
}

fn count_markers_in_text(text: &str) -> usize {
    text.lines().filter(|l| LINE_MARKER_RE.is_match(l)).count()
}

// ── Splitting ──────────────────────────────────────────────────────────

/// Split concatenated text blocks into individual references by line
/// markers, folding continuation lines into the current entry.
fn split_references(blocks: &[(String, usize)]) -> Vec<Reference> {
    let mut refs = Vec::new();
    let mut current_text = String::new();
    let mut current_marker: Option<String> = None;
    let mut current_page = 0;

    for (text, page_num) in blocks {
        for line in text.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(caps) = LINE_MARKER_RE.captures(line) {
                flush_reference(&mut refs, &mut current_text, &current_marker, current_page);
                current_marker = extract_marker(&caps);
                current_text = LINE_MARKER_RE.replace(line, "").trim().to_string();
                current_page = *page_num;
            } else if !current_text.is_empty() {
                // Wrapped text or a year line like "(2011)." — append to current ref
                current_text.push(' ');
                current_text.push_str(line);
            } else {
                current_text = line.to_string();
                current_page = *page_num;
            }
        }
    }
    flush_reference(&mut refs, &mut current_text, &current_marker, current_page);
    split_author_date_blobs(&mut refs);
    refs
}

fn extract_marker(caps: &regex::Captures) -> Option<String> {
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .or_else(|| caps.get(4))
        .map(|m| m.as_str().to_string())
}

fn flush_reference(
    refs: &mut Vec<Reference>,
    text: &mut String,
    marker: &Option<String>,
    page_num: usize,
) {
    let trimmed = text.trim().to_string();
    // Fragments shorter than a plausible citation are noise.
    if trimmed.len() > 5 {
        refs.push(Reference {
            text: trimmed,
            marker: marker.clone(),
            page: Some(page_num),
        });
    }
    text.clear();
}

// ── Author-date blob splitting ─────────────────────────────────────────

/// Match "Surname, I." or "Surname, FirstName" starting an author-date
/// reference. Allows compound surnames (up to 2 extra words) and a PDF
/// artifact char between comma and initial.
static AUTHOR_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[A-Z][^\s,.:;\[\]()]+(?:\s[A-Z][^\s,.:;\[\]()]+){0,2}, (?:[^A-Za-z0-9\s]? ?[A-Z](?:\.|\s|,)|[A-Z][a-z]{2,})",
    )
    .unwrap()
});

/// Match "Surname I." pattern (no comma between surname and initial).
static AUTHOR_START_NOCOMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z][a-z]{2,}(?:[\s-][A-Z][a-z]+)* [A-Z]\.").unwrap());

/// Post-process: split long unmarked refs that are actually concatenated
/// author-date references.
fn split_author_date_blobs(refs: &mut Vec<Reference>) {
    let mut i = 0;
    while i < refs.len() {
        if refs[i].marker.is_none() && refs[i].text.len() > 200 {
            let splits = split_author_date_text(&refs[i].text);
            if splits.len() >= 2 {
                let page = refs[i].page;
                let new_refs: Vec<Reference> = splits
                    .into_iter()
                    .map(|t| Reference { text: t, marker: None, page })
                    .collect();
                refs.splice(i..i + 1, new_refs);
                // Re-check from the same position in case the first
                // split part is itself a blob
                continue;
            }
        }
        i += 1;
    }
}

fn split_author_date_text(text: &str) -> Vec<String> {
    let split_positions = find_author_split_positions(text);

    if split_positions.is_empty() {
        return vec![text.to_string()];
    }

    let mut refs = Vec::new();
    let mut last = 0;
    for &pos in &split_positions {
        let ref_text = text[last..pos].trim().to_string();
        if !ref_text.is_empty() {
            refs.push(ref_text);
        }
        last = pos;
    }
    if last < text.len() {
        let ref_text = text[last..].trim().to_string();
        if !ref_text.is_empty() {
            refs.push(ref_text);
        }
    }
    refs
}

fn find_author_split_positions(text: &str) -> Vec<usize> {
    let mut positions: Vec<usize> = Vec::new();

    for m in AUTHOR_START_RE.find_iter(text) {
        if let Some(pos) = validate_split_position(text, m.start()) {
            positions.push(pos);
        }
    }
    for m in AUTHOR_START_NOCOMMA_RE.find_iter(text) {
        if let Some(pos) = validate_split_position(text, m.start()) {
            if !positions.contains(&pos) {
                positions.push(pos);
            }
        }
    }

    positions.sort_unstable();
    positions
}

fn validate_split_position(text: &str, author_pos: usize) -> Option<usize> {
    if author_pos == 0 {
        return None;
    }
    let before = text[..author_pos].trim_end();
    if before.is_empty() {
        return None;
    }
    if is_ref_boundary(before) { Some(author_pos) } else { None }
}

/// Does the text before a split point look like the end of a reference?
/// Accepts: period after non-initial, closing bracket/paren, digit.
fn is_ref_boundary(before: &str) -> bool {
    let last = match before.chars().last() {
        Some(c) => c,
        None => return false,
    };
    match last {
        '.' => is_ref_ending_period(before),
        ']' | ')' => true,
        c if c.is_ascii_digit() => true,
        _ => false,
    }
}

/// The period ends a reference unless it closes a single-letter initial
/// like "J." or "F.-K.".
fn is_ref_ending_period(before: &str) -> bool {
    let without_period = before[..before.len() - 1].trim_end();
    if without_period.is_empty() {
        return false;
    }
    let last_char = match without_period.chars().last() {
        Some(c) => c,
        None => return false,
    };
    if matches!(last_char, ']' | ')') || last_char.is_ascii_digit() {
        return true;
    }
    let last_token = without_period.split_whitespace().last().unwrap_or("");
    let clean = last_token.trim_end_matches(',');
    !is_initial_token(clean)
}

fn is_initial_token(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    token.split('-').all(|part| {
        let trimmed = part.trim_end_matches('.');
        trimmed.len() == 1 && trimmed.chars().all(|c| c.is_ascii_uppercase())
    })
}
