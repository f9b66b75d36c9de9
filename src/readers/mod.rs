//! File readers: turn a document on disk into chunks.
//!
//! Readers are selected from a static extension registry. Every reader funnels its
//! extracted text through the same screening steps: secret detection (which blocks the
//! whole document) and PII anonymization (which rewrites it and flags the result).

mod formats;
mod layout;
mod markdown;
mod tabular;

pub use layout::{HttpLayoutConverter, LayoutChunk, LayoutConverter};

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ReaderError;
use crate::models::{Chunk, ChunkMetadata, ChunksResult, Document, IndexingConfig};
use crate::services::SentenceSplitter;
use crate::utils::{PiiAnonymizer, SecretScanner, read_file_bytes};

/// Screening policy applied to every document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderConfig {
    pub block_secrets: bool,
    pub anonymize_pii: bool,
}

impl From<&IndexingConfig> for ReaderConfig {
    fn from(config: &IndexingConfig) -> Self {
        Self {
            block_secrets: config.block_secrets,
            anonymize_pii: config.anonymize_pii,
        }
    }
}

/// Reader variants, one per supported family of formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderKind {
    PlainText,
    Markdown,
    Pdf,
    Docx,
    Pptx,
    Csv,
    Json,
    Spreadsheet,
    Html,
}

const READERS: &[(&str, ReaderKind)] = &[
    (".txt", ReaderKind::PlainText),
    (".md", ReaderKind::Markdown),
    (".pdf", ReaderKind::Pdf),
    (".docx", ReaderKind::Docx),
    (".pptx", ReaderKind::Pptx),
    (".pptm", ReaderKind::Pptx),
    (".csv", ReaderKind::Csv),
    (".json", ReaderKind::Json),
    (".xlsx", ReaderKind::Spreadsheet),
    (".xlsb", ReaderKind::Spreadsheet),
    (".xlsm", ReaderKind::Spreadsheet),
    (".xls", ReaderKind::Spreadsheet),
    (".ods", ReaderKind::Spreadsheet),
];

/// Formats routed through the layout-aware pipeline when enhanced parsing is on.
const LAYOUT_READERS: &[(&str, ReaderKind)] = &[(".pdf", ReaderKind::Pdf), (".html", ReaderKind::Html)];

impl ReaderKind {
    /// Look up the reader for a lowercased extension such as `.pdf`.
    pub fn for_extension(extension: &str, enhanced_parsing: bool) -> Result<Self, ReaderError> {
        let extension = extension.to_lowercase();
        let layout = if enhanced_parsing { LAYOUT_READERS } else { &[] };
        layout
            .iter()
            .chain(READERS.iter())
            .find(|(ext, _)| *ext == extension)
            .map(|(_, kind)| *kind)
            .ok_or(ReaderError::UnsupportedFormat(extension))
    }

    /// All extensions accepted with the given parsing mode.
    pub fn supported_extensions(enhanced_parsing: bool) -> Vec<&'static str> {
        let mut extensions: Vec<&'static str> = READERS.iter().map(|(ext, _)| *ext).collect();
        if enhanced_parsing {
            for (ext, _) in LAYOUT_READERS {
                if !extensions.contains(ext) {
                    extensions.push(ext);
                }
            }
        }
        extensions
    }

    fn supports_layout(self) -> bool {
        LAYOUT_READERS.iter().any(|(_, kind)| *kind == self)
    }
}

/// Text of one logical unit (a page, a slide, the whole file) with its page label.
#[derive(Debug, Clone)]
pub(crate) struct Section {
    pub text: String,
    pub page_label: Option<String>,
}

impl Section {
    pub fn unpaged(text: String) -> Self {
        Self {
            text,
            page_label: None,
        }
    }
}

/// Maps character offsets in the joined document text back to page labels.
pub(crate) struct PageTracker {
    labels: Vec<Option<String>>,
    starts: Vec<usize>,
}

impl PageTracker {
    /// Sections are joined with a single `\n`, so each start is the previous start plus
    /// the previous length plus one.
    pub fn new(sections: &[Section]) -> Self {
        let mut starts = Vec::with_capacity(sections.len());
        let mut offset = 0;
        for section in sections {
            starts.push(offset);
            offset += section.text.chars().count() + 1;
        }
        Self {
            labels: sections.iter().map(|s| s.page_label.clone()).collect(),
            starts,
        }
    }

    pub fn page_for(&self, char_offset: usize) -> Option<String> {
        let idx = self.starts.partition_point(|&start| start <= char_offset);
        idx.checked_sub(1).and_then(|i| self.labels[i].clone())
    }
}

/// Reads documents into chunks according to their extension.
#[derive(Clone)]
pub struct DocumentReader {
    splitter: SentenceSplitter,
    config: ReaderConfig,
    max_file_size: u64,
    enhanced_parsing: bool,
    layout: Option<Arc<dyn LayoutConverter>>,
    scanner: SecretScanner,
    anonymizer: PiiAnonymizer,
}

impl DocumentReader {
    pub fn new(indexing: &IndexingConfig) -> Self {
        Self {
            splitter: SentenceSplitter::new(indexing),
            config: ReaderConfig::from(indexing),
            max_file_size: indexing.max_file_size,
            enhanced_parsing: indexing.enhanced_parsing,
            layout: None,
            scanner: SecretScanner::new(),
            anonymizer: PiiAnonymizer::new(),
        }
    }

    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_layout_converter(mut self, converter: Arc<dyn LayoutConverter>) -> Self {
        self.layout = Some(converter);
        self
    }

    pub fn config(&self) -> ReaderConfig {
        self.config
    }

    /// Resolve the reader for a document without reading it.
    pub fn reader_for(&self, document: &Document) -> Result<ReaderKind, ReaderError> {
        ReaderKind::for_extension(&document.extension(), self.enhanced_parsing)
    }

    /// Read a document into chunks, applying secret blocking and PII anonymization.
    pub async fn load_chunks(&self, document: &Document) -> Result<ChunksResult, ReaderError> {
        let kind = self.reader_for(document)?;

        if self.enhanced_parsing && kind.supports_layout() {
            match self.load_with_layout(document).await {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => debug!(file = %document.file_name, "layout pipeline unavailable, using default reader"),
                Err(e) => warn!(file = %document.file_name, error = %e, "layout conversion failed, using default reader"),
            }
        }

        let bytes = read_file_bytes(&document.path, self.max_file_size)?;
        match kind {
            ReaderKind::PlainText => {
                let text = formats::decode_text(&bytes);
                Ok(self.chunk_sections(document, vec![Section::unpaged(text)], "text"))
            }
            ReaderKind::Json => {
                let text = formats::extract_json(&bytes)?;
                Ok(self.chunk_sections(document, vec![Section::unpaged(text)], "json"))
            }
            ReaderKind::Html => {
                let text = formats::extract_html(&bytes);
                Ok(self.chunk_sections(document, vec![Section::unpaged(text)], "text"))
            }
            ReaderKind::Docx => {
                let text = formats::extract_docx(&bytes)?;
                Ok(self.chunk_sections(document, vec![Section::unpaged(text)], "text"))
            }
            ReaderKind::Pptx => {
                let slides = formats::extract_pptx(&bytes)?;
                Ok(self.chunk_sections(document, slides, "text"))
            }
            ReaderKind::Pdf => {
                let pages = formats::extract_pdf_pages(&bytes)?;
                Ok(self.chunk_sections(document, pages, "text"))
            }
            ReaderKind::Markdown => {
                let text = formats::decode_text(&bytes);
                Ok(markdown::load_chunks(self, document, text))
            }
            ReaderKind::Csv => {
                let workbook = tabular::read_csv(&bytes, &document.file_name)?;
                Ok(tabular::load_chunks(self, document, workbook))
            }
            ReaderKind::Spreadsheet => {
                let workbook = tabular::read_spreadsheet(&bytes)?;
                Ok(tabular::load_chunks(self, document, workbook))
            }
        }
    }

    async fn load_with_layout(&self, document: &Document) -> Result<Option<ChunksResult>, ReaderError> {
        let Some(converter) = self.layout.as_ref() else {
            return Ok(None);
        };
        let layout_chunks = converter.convert(&document.path).await?;

        if let Some(secret_types) = self.detect_secrets(layout_chunks.iter().map(|c| c.text.as_str())) {
            return Ok(Some(ChunksResult::SecretsDetected { secret_types }));
        }

        let mut pii_found = false;
        let chunks = layout_chunks
            .into_iter()
            .enumerate()
            .map(|(i, layout_chunk)| {
                let (text, changed) = self.anonymize(layout_chunk.text);
                pii_found |= changed;
                let mut metadata = self.metadata(document, i as u32, "markdown");
                metadata.page_number = layout_chunk.page_number;
                Chunk::new(text, metadata)
            })
            .collect();
        Ok(Some(ChunksResult::Chunks { chunks, pii_found }))
    }

    /// Shared pipeline for formats that reduce to running text.
    fn chunk_sections(&self, document: &Document, sections: Vec<Section>, chunk_format: &str) -> ChunksResult {
        let joined = join_sections(&sections);
        let spans = self.splitter.split(&joined);

        if let Some(secret_types) = self.detect_secrets(spans.iter().map(|s| s.text.as_str())) {
            return ChunksResult::SecretsDetected { secret_types };
        }

        let mut pii_found = false;
        let sections: Vec<Section> = sections
            .into_iter()
            .map(|section| {
                let (text, changed) = self.anonymize(section.text);
                pii_found |= changed;
                Section {
                    text,
                    page_label: section.page_label,
                }
            })
            .collect();

        let spans = if pii_found {
            self.splitter.split(&join_sections(&sections))
        } else {
            spans
        };

        let tracker = PageTracker::new(&sections);
        let chunks = spans
            .into_iter()
            .enumerate()
            .map(|(i, span)| {
                let mut metadata = self.metadata(document, i as u32, chunk_format);
                metadata.page_number = tracker.page_for(span.start);
                Chunk::new(span.text, metadata)
            })
            .collect();

        ChunksResult::Chunks { chunks, pii_found }
    }

    /// Returns the secret categories found, or `None` when blocking is off or nothing matched.
    pub(crate) fn detect_secrets<'a>(&self, candidates: impl IntoIterator<Item = &'a str>) -> Option<BTreeSet<String>> {
        if !self.config.block_secrets {
            return None;
        }
        let found = self.scanner.scan(candidates);
        (!found.is_empty()).then_some(found)
    }

    pub(crate) fn anonymize(&self, text: String) -> (String, bool) {
        if !self.config.anonymize_pii {
            return (text, false);
        }
        match self.anonymizer.anonymize(&text) {
            Some(rewritten) => (rewritten, true),
            None => (text, false),
        }
    }

    pub(crate) fn splitter(&self) -> &SentenceSplitter {
        &self.splitter
    }

    pub(crate) fn metadata(&self, document: &Document, chunk_number: u32, chunk_format: &str) -> ChunkMetadata {
        ChunkMetadata {
            file_name: document.file_name.clone(),
            document_id: document.document_id.clone(),
            knowledge_base_id: document.knowledge_base_id,
            chunk_number,
            chunk_format: chunk_format.to_string(),
            page_number: None,
            extra: Default::default(),
        }
    }
}

fn join_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
