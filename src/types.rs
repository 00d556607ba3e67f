use clap::ValueEnum;
use serde::Serialize;

/// A character extracted from a PDF page with position and font info.
#[derive(Debug, Clone)]
pub struct PdfChar {
    pub ch: char,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub font_size: f32,
    pub bold: bool,
}

/// All characters on a single PDF page.
#[derive(Debug)]
pub struct PageChars {
    pub page_num: usize,
    pub width: f32,
    pub height: f32,
    pub chars: Vec<PdfChar>,
}

/// A word: sequence of characters forming a unit.
#[derive(Debug, Clone)]
pub struct Word {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub font_size: f32,
    pub bold: bool,
}

/// A line of text: sequence of words on the same baseline.
#[derive(Debug, Clone)]
pub struct Line {
    pub words: Vec<Word>,
    pub y: f32,
    pub x_start: f32,
    pub x_end: f32,
    pub font_size: f32,
}

impl Line {
    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// A line counts as bold when most of its words are bold.
    pub fn is_bold(&self) -> bool {
        if self.words.is_empty() {
            return false;
        }
        let bold = self.words.iter().filter(|w| w.bold).count();
        bold * 2 > self.words.len()
    }
}

/// A block: group of consecutive lines forming a paragraph.
#[derive(Debug, Clone)]
pub struct Block {
    pub lines: Vec<Line>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub font_size: f32,
}

impl Block {
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_bold(&self) -> bool {
        !self.lines.is_empty() && self.lines.iter().all(|l| l.is_bold())
    }
}

/// All layout blocks on a single page, in reading order.
#[derive(Debug)]
pub struct PageBlocks {
    pub page_num: usize,
    pub height: f32,
    pub blocks: Vec<Block>,
}

impl PageBlocks {
    /// Page text with one block per line, in reading order.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Individual layout lines of the page, in reading order.
    pub fn line_texts(&self) -> Vec<String> {
        self.blocks
            .iter()
            .flat_map(|b| b.lines.iter().map(|l| l.text()))
            .collect()
    }
}

/// Which extraction engine produced the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Layout and regex heuristics, local only.
    Heuristic,
    /// Hosted text-generation endpoint over HTTP.
    Remote,
}

/// A section heading. `page` is unknown for remote extractions.
#[derive(Debug, Clone, Serialize)]
pub struct Heading {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

/// A single bibliography entry. The raw text is kept verbatim; a leading
/// line marker like `[7]` is stripped into `marker`.
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

/// Extracted document metadata, ready for display or JSON output.
///
/// Missing fields stay `None`/empty here; placeholder wording lives in
/// the report renderer only.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub headings: Vec<Heading>,
    pub references: Vec<Reference>,
    pub pages: usize,
    pub engine: Engine,
}
