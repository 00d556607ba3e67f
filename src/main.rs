mod authors;
mod headings;
mod inference;
mod kb;
mod layout;
mod pdf;
mod refs;
mod report;
mod title;
mod types;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pdfium_render::prelude::*;

use inference::{InferenceCache, RemoteConfig};
use types::{DocumentMetadata, Engine};

#[derive(Parser)]
#[command(
    name = "papermeta",
    about = "Extract title, authors, headings, and references from research-paper PDFs"
)]
struct Cli {
    /// PDF file to process
    file: PathBuf,

    /// Extraction engine
    #[arg(long, value_enum, default_value = "heuristic")]
    engine: Engine,

    /// Hosted inference endpoint URL (remote engine)
    #[arg(long, env = "PAPERMETA_ENDPOINT")]
    endpoint: Option<String>,

    /// Bearer token for the inference endpoint
    #[arg(long, env = "PAPERMETA_API_TOKEN")]
    api_token: Option<String>,

    /// Emit JSON instead of the plain report
    #[arg(long)]
    json: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Write the plain-text report to a file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Keep every regex author candidate (skip the given-name filter)
    #[arg(long)]
    no_name_filter: bool,

    /// Do not read or write the remote response cache
    #[arg(long)]
    no_cache: bool,

    /// Retry attempts for transient endpoint failures
    #[arg(long, default_value_t = 4)]
    max_retries: u32,

    /// Show the block layout per page (debug)
    #[arg(long)]
    debug_layout: bool,

    /// Override pdfium library path
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_path: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let pdfium = bind_pdfium(&cli.pdfium_path)?;
    let page_chars = pdf::extract_chars(&pdfium, &cli.file)?;
    let pages = layout::build_pages(&page_chars);

    if cli.debug_layout {
        print_debug_layout(&pages);
        return Ok(());
    }

    let meta = match cli.engine {
        Engine::Heuristic => run_heuristics(&pages, !cli.no_name_filter),
        Engine::Remote => run_remote(&cli, &pages)?,
    };

    print_output(&cli, &meta)
}

fn bind_pdfium(pdfium_path: &Option<String>) -> Result<Pdfium> {
    let bindings = if let Some(path) = pdfium_path {
        Pdfium::bind_to_library(path)
            .with_context(|| format!("Failed to load pdfium from: {path}"))?
    } else {
        Pdfium::bind_to_system_library()
            .context("Failed to find pdfium. Install pdfium-binaries or use --pdfium-path")?
    };
    Ok(Pdfium::new(bindings))
}

fn run_heuristics(pages: &[types::PageBlocks], name_filter: bool) -> DocumentMetadata {
    let body_font = layout::body_font_size(pages);
    let title = title::extract(pages, body_font);
    let authors = authors::extract(pages, name_filter);
    let headings = headings::extract(pages, body_font, title.as_deref());
    let references = refs::extract(pages);
    DocumentMetadata {
        title,
        authors,
        headings,
        references,
        pages: pages.len(),
        engine: Engine::Heuristic,
    }
}

fn run_remote(cli: &Cli, pages: &[types::PageBlocks]) -> Result<DocumentMetadata> {
    let endpoint = cli
        .endpoint
        .clone()
        .context("Remote engine needs --endpoint or PAPERMETA_ENDPOINT")?;
    let config = RemoteConfig {
        endpoint,
        token: cli.api_token.clone(),
        max_retries: cli.max_retries,
    };
    let cache = if cli.no_cache {
        None
    } else {
        match InferenceCache::open() {
            Ok(cache) => Some(cache),
            Err(e) => {
                eprintln!("Response cache unavailable: {e:#}");
                None
            }
        }
    };
    let doc_text = layout::document_text(pages);
    inference::extract_remote(&doc_text, pages.len(), &config, cache.as_ref())
}

fn print_output(cli: &Cli, meta: &DocumentMetadata) -> Result<()> {
    if let Some(path) = &cli.output {
        report::write_report(path, meta)?;
        eprintln!("Report written to {}", path.display());
    }
    if cli.json {
        println!("{}", report::render_json(meta, cli.pretty)?);
    } else if cli.output.is_none() {
        print!("{}", report::render_report(meta));
    }
    Ok(())
}

fn print_debug_layout(pages: &[types::PageBlocks]) {
    let body_font = layout::body_font_size(pages);
    println!("body font: {body_font:.1}");
    for page in pages {
        for block in &page.blocks {
            let text = block.text();
            let preview: String = text.chars().take(80).collect();
            let bold = if block.is_bold() { " bold" } else { "" };
            println!(
                "p{} [{:>2} lines{}] y={:6.1} fs={:4.1} | {}",
                page.page_num,
                block.lines.len(),
                bold,
                block.y,
                block.font_size,
                preview
            );
        }
    }
}
