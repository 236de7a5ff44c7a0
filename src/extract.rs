//! Per-kind text extraction and coarse sectioning.
//!
//! Each [`DocumentKind`] is served by a [`TextExtractor`] registered in an
//! [`ExtractorTable`]. An extractor turns a file into plain UTF-8 text and
//! splits that text into ordered sections (markdown headings, word-document
//! headings or paragraphs, PDF pages) that the chunker windows independently.
//!
//! Malformed input yields an [`ExtractError`] and the indexer skips the
//! document.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use quick_xml::events::Event;
use thiserror::Error;

use crate::models::DocumentKind;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Marker prefix written before each PDF page.
const PAGE_MARKER: &str = "[[PAGE ";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 text: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// Capability set for one document kind.
pub trait TextExtractor: Send + Sync {
    fn kind(&self) -> DocumentKind;

    /// Read the file and return its plain text.
    fn extract_text(&self, path: &Path) -> Result<String, ExtractError>;

    /// Split extracted text into ordered coarse sections. Positions in the
    /// returned list become locators; short sections are left for the
    /// chunker to drop.
    fn presection(&self, text: &str) -> Vec<String>;
}

/// Explicit dispatch table from document kind to extractor.
#[derive(Clone, Default)]
pub struct ExtractorTable {
    extractors: HashMap<DocumentKind, Arc<dyn TextExtractor>>,
}

impl ExtractorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the markdown, docx, and PDF extractors.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table.register(Arc::new(MarkdownExtractor));
        table.register(Arc::new(DocxExtractor));
        table.register(Arc::new(PdfExtractor));
        table
    }

    /// Register (or replace) the extractor for its kind.
    pub fn register(&mut self, extractor: Arc<dyn TextExtractor>) {
        self.extractors.insert(extractor.kind(), extractor);
    }

    pub fn get(&self, kind: DocumentKind) -> Option<Arc<dyn TextExtractor>> {
        self.extractors.get(&kind).cloned()
    }
}

// ============ Markdown ============

pub struct MarkdownExtractor;

impl TextExtractor for MarkdownExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Markdown
    }

    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path)?;
        Ok(String::from_utf8(bytes)?)
    }

    fn presection(&self, text: &str) -> Vec<String> {
        split_at_headings(text)
    }
}

/// True for ATX heading lines: one to six `#` followed by whitespace.
fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes)
        && line[hashes..]
            .chars()
            .next()
            .map(char::is_whitespace)
            .unwrap_or(false)
}

/// Start a new section at every heading line; text before the first heading
/// is its own section.
fn split_at_headings(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if is_heading(line) && !current.is_empty() {
            sections.push(current.join("\n").trim().to_string());
            current.clear();
        }
        current.push(line);
    }
    if !current.is_empty() {
        sections.push(current.join("\n").trim().to_string());
    }
    sections.retain(|s| !s.is_empty());
    sections
}

// ============ Word (OOXML) ============

pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::WordDoc
    }

    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path)?;
        extract_docx(&bytes)
    }

    fn presection(&self, text: &str) -> Vec<String> {
        if text.lines().any(is_heading) {
            split_at_headings(text)
        } else {
            text.split("\n\n")
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        }
    }
}

/// Extract paragraphs from a .docx, one per `w:p`, separated by blank
/// lines. Paragraphs styled `Heading*` or `Title` become `## ` lines.
pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Ooxml(format!("word/document.xml: {}", e)))?;
    let mut doc_xml = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut doc_xml)?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    let paragraphs = extract_paragraphs(&doc_xml)?;
    Ok(paragraphs.join("\n\n"))
}

fn extract_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut heading = false;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    current.clear();
                    heading = false;
                }
                b"t" => in_text = true,
                b"pStyle" => heading |= is_heading_style(&e),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"pStyle" => heading |= is_heading_style(&e),
                b"tab" | b"br" => current.push(' '),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = current.trim();
                    if !text.is_empty() {
                        if heading {
                            paragraphs.push(format!("## {}", text));
                        } else {
                            paragraphs.push(text.to_string());
                        }
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn is_heading_style(e: &quick_xml::events::BytesStart<'_>) -> bool {
    e.attributes().flatten().any(|a| {
        a.key.local_name().as_ref() == b"val"
            && (a.value.starts_with(b"Heading") || a.value.as_ref() == b"Title")
    })
}

// ============ PDF ============

pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Pdf
    }

    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path)?;
        extract_pdf(&bytes)
    }

    /// One section per page marker; pages stay in place even when empty so
    /// that `page-N` locators match the page number. A marker-shaped line
    /// is only a page break when it carries the next page number.
    fn presection(&self, text: &str) -> Vec<String> {
        let mut pages = Vec::new();
        let mut current: Option<Vec<&str>> = None;
        for line in text.lines() {
            let next_page = pages.len() + usize::from(current.is_some()) + 1;
            if page_marker(line) == Some(next_page) {
                if let Some(page) = current.take() {
                    pages.push(page.join("\n").trim().to_string());
                }
                current = Some(Vec::new());
            } else if let Some(page) = current.as_mut() {
                page.push(line);
            }
        }
        if let Some(page) = current {
            pages.push(page.join("\n").trim().to_string());
        }
        pages
    }
}

fn page_marker(line: &str) -> Option<usize> {
    line.trim_end()
        .strip_prefix(PAGE_MARKER)?
        .strip_suffix("]]")?
        .parse()
        .ok()
}

/// Extract text page by page, prefixing each page with `[[PAGE n]]`.
pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let mut out = String::new();
    for (i, page) in pages.iter().enumerate() {
        out.push_str(&format!("{}{}]]\n{}\n", PAGE_MARKER, i + 1, page.trim()));
    }
    Ok(out)
}
