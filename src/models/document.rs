use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One uploaded file belonging to a knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub knowledge_base_id: i64,
    pub file_name: String,
    pub path: PathBuf,
}

impl Document {
    /// Derive a stable document id from a file path when the caller supplies none.
    pub fn generate_id(path: &Path) -> String {
        use sha2::{Digest, Sha256};
        let hash = Sha256::digest(path.to_string_lossy().as_bytes());
        hex::encode(&hash[..16])
    }

    pub fn new(document_id: impl Into<String>, knowledge_base_id: i64, path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            document_id: document_id.into(),
            knowledge_base_id,
            file_name,
            path: path.to_path_buf(),
        }
    }

    /// Lowercased extension including the leading dot, e.g. `.pdf`.
    pub fn extension(&self) -> String {
        file_extension(&self.path)
    }
}

pub fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_name: String,
    pub document_id: String,
    pub knowledge_base_id: i64,
    pub chunk_number: u32,
    #[serde(default = "default_chunk_format")]
    pub chunk_format: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub page_number: Option<String>,
    /// Reader-specific fields such as `sheet_name` or `row_number`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub extra: BTreeMap<String, String>,
}

fn default_chunk_format() -> String {
    "text".to_string()
}

/// A bounded slice of document text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub embedding: Option<Vec<f32>>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn generate_id(document_id: &str, chunk_number: u32) -> String {
        use uuid::Uuid;
        let name = format!("{}:{}", document_id, chunk_number);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    pub fn new(text: String, metadata: ChunkMetadata) -> Self {
        Self {
            id: Self::generate_id(&metadata.document_id, metadata.chunk_number),
            text,
            embedding: None,
            metadata,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.metadata.document_id
    }
}

/// Outcome of reading a document.
///
/// Secret detection wins over chunking: when secrets are found no chunk is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunksResult {
    Chunks { chunks: Vec<Chunk>, pii_found: bool },
    SecretsDetected { secret_types: BTreeSet<String> },
}

impl ChunksResult {
    pub fn chunks(&self) -> &[Chunk] {
        match self {
            ChunksResult::Chunks { chunks, .. } => chunks,
            ChunksResult::SecretsDetected { .. } => &[],
        }
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        match self {
            ChunksResult::Chunks { chunks, .. } => chunks,
            ChunksResult::SecretsDetected { .. } => Vec::new(),
        }
    }

    pub fn secret_types(&self) -> Option<&BTreeSet<String>> {
        match self {
            ChunksResult::SecretsDetected { secret_types } => Some(secret_types),
            ChunksResult::Chunks { .. } => None,
        }
    }

    pub fn pii_found(&self) -> bool {
        matches!(self, ChunksResult::Chunks { pii_found: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_generate_id() {
        let id = Document::generate_id(Path::new("/path/to/file.pdf"));
        assert_eq!(id.len(), 32);
    }

    #[test]
    fn test_document_extension_lowercased() {
        let doc = Document::new("doc-1", 3, Path::new("/tmp/Report.PDF"));
        assert_eq!(doc.extension(), ".pdf");
        assert_eq!(doc.file_name, "Report.PDF");
    }

    #[test]
    fn test_chunk_generate_id() {
        let id = Chunk::generate_id("abc123", 5);
        assert_eq!(id.len(), 36);
        assert_eq!(id, Chunk::generate_id("abc123", 5));
        assert_ne!(id, Chunk::generate_id("abc123", 6));
    }

    #[test]
    fn test_chunks_result_accessors() {
        let secrets = ChunksResult::SecretsDetected {
            secret_types: BTreeSet::from(["AWS Access Key".to_string()]),
        };
        assert!(secrets.chunks().is_empty());
        assert!(!secrets.pii_found());
        assert_eq!(secrets.secret_types().map(|s| s.len()), Some(1));

        let chunks = ChunksResult::Chunks {
            chunks: vec![],
            pii_found: true,
        };
        assert!(chunks.pii_found());
        assert!(chunks.secret_types().is_none());
    }
}
