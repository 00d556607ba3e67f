use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use crate::types::{DocumentMetadata, Heading, Reference};

/// Render the human-readable report. Missing fields become explicit
/// "not found" placeholders here and nowhere else.
pub fn render_report(meta: &DocumentMetadata) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Title");
    match &meta.title {
        Some(title) => {
            let _ = writeln!(out, "  {title}");
        }
        None => {
            let _ = writeln!(out, "  Title not found");
        }
    }

    let _ = writeln!(out, "\nAuthors");
    if meta.authors.is_empty() {
        let _ = writeln!(out, "  No authors found.");
    } else {
        let _ = writeln!(out, "  {}", meta.authors.join(", "));
    }

    let _ = writeln!(out, "\nHeadings");
    if meta.headings.is_empty() {
        let _ = writeln!(out, "  No headings found.");
    } else {
        for heading in &meta.headings {
            let _ = writeln!(out, "  - {}", format_heading(heading));
        }
    }

    let _ = writeln!(out, "\nReferences");
    if meta.references.is_empty() {
        let _ = writeln!(out, "  No references found.");
    } else {
        for reference in &meta.references {
            let _ = writeln!(out, "  - {}", format_reference(reference));
        }
    }

    out
}

fn format_heading(heading: &Heading) -> String {
    match heading.page {
        Some(page) => format!("{} (p. {page})", heading.text),
        None => heading.text.clone(),
    }
}

fn format_reference(reference: &Reference) -> String {
    let mut line = match &reference.marker {
        Some(marker) => format!("[{marker}] {}", reference.text),
        None => reference.text.clone(),
    };
    if let Some(page) = reference.page {
        let _ = write!(line, " (p. {page})");
    }
    line
}

/// Write the plain-text report to a file.
pub fn write_report(path: &Path, meta: &DocumentMetadata) -> Result<()> {
    std::fs::write(path, render_report(meta))
        .with_context(|| format!("Failed to write report to: {}", path.display()))
}

pub fn render_json(meta: &DocumentMetadata, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(meta)?
    } else {
        serde_json::to_string(meta)?
    };
    Ok(json)
}
