//! Markdown reader: blind sentence split, then each piece is broken on section headings.

use crate::models::{Chunk, ChunksResult, Document};

use super::DocumentReader;

pub(crate) fn load_chunks(reader: &DocumentReader, document: &Document, content: String) -> ChunksResult {
    if let Some(secret_types) = reader.detect_secrets([content.as_str()]) {
        return ChunksResult::SecretsDetected { secret_types };
    }

    let (content, pii_found) = reader.anonymize(content);

    let mut chunks = Vec::new();
    for span in reader.splitter().split(&content) {
        for (heading, section) in split_sections(&span.text) {
            let mut metadata = reader.metadata(document, chunks.len() as u32, "markdown");
            if let Some(heading) = heading {
                metadata.extra.insert("header".to_string(), heading);
            }
            chunks.push(Chunk::new(section, metadata));
        }
    }

    ChunksResult::Chunks { chunks, pii_found }
}

/// Break text at ATX headings outside fenced code blocks.
fn split_sections(text: &str) -> Vec<(Option<String>, String)> {
    let mut sections: Vec<(Option<String>, String)> = Vec::new();
    let mut heading: Option<String> = None;
    let mut current = String::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        if !in_fence && is_heading(trimmed) {
            if !current.trim().is_empty() {
                sections.push((heading.take(), current.trim().to_string()));
            }
            current.clear();
            heading = Some(trimmed.trim_start_matches('#').trim().to_string());
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push((heading, current.trim().to_string()));
    }
    sections
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndexingConfig;

    #[test]
    fn test_split_sections() {
        let text = "Intro line\n# Setup\nInstall it.\n```\n# not a heading\n```\n## Usage\nRun it.\n";
        let sections = split_sections(text);

        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0], (None, "Intro line".to_string()));
        assert_eq!(sections[1].0.as_deref(), Some("Setup"));
        assert!(sections[1].1.contains("# not a heading"));
        assert_eq!(sections[2].0.as_deref(), Some("Usage"));
    }

    #[test]
    fn test_hashtag_is_not_heading() {
        assert!(!is_heading("#hashtag"));
        assert!(is_heading("### Title"));
        assert!(!is_heading("####### too deep"));
    }

    #[test]
    fn test_markdown_chunks_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.md");
        std::fs::write(&path, "").unwrap();
        let document = Document::new("md-1", 1, &path);
        let reader = DocumentReader::new(&IndexingConfig::default());

        let result = load_chunks(&reader, &document, "# A\nalpha\n# B\nbeta\n".to_string());
        let chunks = result.chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].metadata.chunk_number, 1);
        assert_eq!(chunks[1].metadata.chunk_format, "markdown");
        assert_eq!(chunks[1].metadata.extra.get("header").map(String::as_str), Some("B"));
    }
}
