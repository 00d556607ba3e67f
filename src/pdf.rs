use std::path::Path;

use anyhow::{Context, Result};
use pdfium_render::prelude::*;

use crate::types::{PageChars, PdfChar};

/// Load a PDF and extract characters with positions from every page.
pub fn extract_chars(pdfium: &Pdfium, path: &Path) -> Result<Vec<PageChars>> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("Failed to load PDF: {}", path.display()))?;

    document
        .pages()
        .iter()
        .enumerate()
        .map(|(idx, page)| extract_page_chars(idx, &page))
        .collect()
}

fn extract_page_chars(page_idx: usize, page: &PdfPage) -> Result<PageChars> {
    let text_page = page
        .text()
        .with_context(|| format!("Failed to load text for page {}", page_idx + 1))?;

    let chars: Vec<PdfChar> = text_page
        .chars()
        .iter()
        .filter_map(|ch| convert_text_char(&ch))
        .collect();

    Ok(PageChars {
        page_num: page_idx + 1,
        width: page.width().value,
        height: page.height().value,
        chars,
    })
}

fn convert_text_char(ch: &PdfPageTextChar) -> Option<PdfChar> {
    let unicode = ch.unicode_char()?;
    if unicode.is_control() && unicode != ' ' {
        return None;
    }

    // Skip zero-size font characters (watermarks, hidden text)
    let font_size = ch.scaled_font_size().value;
    if font_size < 0.5 {
        return None;
    }

    let (x, y, width) = char_bounds(ch)?;

    Some(PdfChar {
        ch: unicode,
        x,
        y,
        width,
        font_size,
        bold: is_bold_font(&ch.font_name()),
    })
}

fn char_bounds(ch: &PdfPageTextChar) -> Option<(f32, f32, f32)> {
    let rect = ch.loose_bounds().or_else(|_| ch.tight_bounds()).ok()?;
    Some((
        rect.left().value,
        rect.bottom().value,
        (rect.right().value - rect.left().value).abs(),
    ))
}

/// Boldness comes from the font name; PDF text objects carry no style flag
/// we can rely on across producers.
pub fn is_bold_font(font_name: &str) -> bool {
    let lower = font_name.to_lowercase();
    lower.contains("bold")
        || lower.contains("black")
        || lower.contains("heavy")
        || lower.contains("demi")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_font_names() {
        assert!(is_bold_font("Times-Bold"));
        assert!(is_bold_font("NimbusSanL-BoldItal"));
        assert!(is_bold_font("ACaslonPro-Semibold"));
        assert!(is_bold_font("Roboto-Black"));
        assert!(is_bold_font("HelveticaNeue-Heavy"));
        assert!(is_bold_font("FranklinGothic-DemiCond"));
    }

    #[test]
    fn regular_font_names() {
        assert!(!is_bold_font("Times-Roman"));
        assert!(!is_bold_font("CMR10"));
        assert!(!is_bold_font("Arial-ItalicMT"));
        assert!(!is_bold_font(""));
    }
}
