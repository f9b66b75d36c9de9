//! Document → chunk → embedding → vector store write path.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::models::{Chunk, ChunksResult, Document, IndexingConfig};
use crate::readers::DocumentReader;
use crate::services::{EmbeddingModel, VectorStore};

/// What happened to one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexReport {
    pub chunks: usize,
    pub pii_found: bool,
    /// Set when the document was blocked for containing secrets.
    pub secret_types: Option<BTreeSet<String>>,
}

/// Writes a document's chunks, with embeddings, into a knowledge base's chunk collection.
pub struct EmbeddingIndexer {
    reader: DocumentReader,
    store: Arc<dyn VectorStore>,
    embedding: Arc<dyn EmbeddingModel>,
    embed_batch_size: usize,
    max_concurrent_batches: usize,
    write_batch_size: usize,
}

impl EmbeddingIndexer {
    pub fn new(reader: DocumentReader, store: Arc<dyn VectorStore>, config: &IndexingConfig) -> Self {
        let embedding = store.embedding_model();
        Self {
            reader,
            store,
            embedding,
            embed_batch_size: config.embed_batch_size.max(1),
            max_concurrent_batches: config.max_concurrent_batches.max(1),
            write_batch_size: config.write_batch_size.max(1),
        }
    }

    pub fn reader(&self) -> &DocumentReader {
        &self.reader
    }

    /// Read, embed and store a document, replacing any chunks from a previous run.
    pub async fn index_file(&self, document: &Document) -> Result<IndexReport, IndexError> {
        let result = self.reader.load_chunks(document).await?;
        self.index_chunks(document, result).await
    }

    /// Embed and store chunks that were already read.
    pub async fn index_chunks(&self, document: &Document, result: ChunksResult) -> Result<IndexReport, IndexError> {
        let pii_found = result.pii_found();
        if let Some(secret_types) = result.secret_types() {
            warn!(
                document_id = %document.document_id,
                secrets = ?secret_types,
                "secrets detected, document not indexed"
            );
            self.store.delete_document(&document.document_id).await?;
            return Ok(IndexReport {
                secret_types: Some(secret_types.clone()),
                ..Default::default()
            });
        }

        let chunks = result.into_chunks();
        if chunks.is_empty() {
            warn!(document_id = %document.document_id, file = %document.file_name, "no chunks produced");
            self.store.delete_document(&document.document_id).await?;
            return Ok(IndexReport {
                pii_found,
                ..Default::default()
            });
        }

        let chunks = self.embed_chunks(chunks).await?;
        let count = chunks.len();

        self.store.delete_document(&document.document_id).await?;
        self.write_chunks(chunks).await?;

        info!(
            kb_id = document.knowledge_base_id,
            document_id = %document.document_id,
            chunks = count,
            "document indexed"
        );
        Ok(IndexReport {
            chunks: count,
            pii_found,
            secret_types: None,
        })
    }

    /// Compute embeddings in concurrent batches, keeping each embedding paired with its chunk.
    ///
    /// Any failed batch fails the whole call.
    pub async fn embed_chunks(&self, mut chunks: Vec<Chunk>) -> Result<Vec<Chunk>, IndexError> {
        let batches: Vec<(usize, Vec<String>)> = chunks
            .chunks(self.embed_batch_size)
            .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
            .enumerate()
            .collect();
        let batch_count = batches.len();

        let mut results: Vec<(usize, Vec<Vec<f32>>)> = stream::iter(batches)
            .map(|(index, texts)| {
                let embedding = self.embedding.clone();
                async move {
                    let expected = texts.len();
                    let vectors = embedding.embed_batch(texts).await?;
                    if vectors.len() != expected {
                        return Err(IndexError::EmbeddingCountMismatch {
                            expected,
                            actual: vectors.len(),
                        });
                    }
                    debug!(batch = index, size = expected, "embedding batch complete");
                    Ok((index, vectors))
                }
            })
            .buffer_unordered(self.max_concurrent_batches)
            .collect::<Vec<Result<_, IndexError>>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;

        if results.len() != batch_count {
            return Err(IndexError::EmbeddingCountMismatch {
                expected: batch_count,
                actual: results.len(),
            });
        }
        results.sort_by_key(|(index, _)| *index);

        let embeddings = results.into_iter().flat_map(|(_, vectors)| vectors);
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = Some(embedding);
        }
        Ok(chunks)
    }

    async fn write_chunks(&self, chunks: Vec<Chunk>) -> Result<(), IndexError> {
        let mut chunks = chunks.into_iter().peekable();
        while chunks.peek().is_some() {
            let batch: Vec<Chunk> = chunks.by_ref().take(self.write_batch_size).collect();
            self.store.add(batch).await?;
        }
        Ok(())
    }
}
