//! In-memory vector store backend with exact cosine search.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{VectorQuery, VectorStore, require_embedding};
use crate::error::VectorStoreError;
use crate::models::{Chunk, RetrievedChunk};
use crate::services::EmbeddingModel;

/// Chunks keyed by id. `BTreeMap` keeps scans deterministic.
type Collection = BTreeMap<String, Chunk>;

/// Collections shared by every backend opened from the same registry.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl MemoryRegistry {
    fn read<T>(&self, f: impl FnOnce(&HashMap<String, Collection>) -> T) -> Result<T, VectorStoreError> {
        let guard = self
            .collections
            .read()
            .map_err(|_| VectorStoreError::ConnectionError("memory registry poisoned".to_string()))?;
        Ok(f(&guard))
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<String, Collection>) -> T) -> Result<T, VectorStoreError> {
        let mut guard = self
            .collections
            .write()
            .map_err(|_| VectorStoreError::ConnectionError("memory registry poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub struct MemoryBackend {
    registry: MemoryRegistry,
    collection: String,
    embedding: Arc<dyn EmbeddingModel>,
}

impl MemoryBackend {
    pub fn new(registry: MemoryRegistry, collection: String, embedding: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            registry,
            collection,
            embedding,
        }
    }
}

#[async_trait]
impl VectorStore for MemoryBackend {
    async fn size(&self) -> Result<Option<u64>, VectorStoreError> {
        self.registry
            .read(|c| c.get(&self.collection).map(|points| points.len() as u64))
    }

    async fn create_collection(&self) -> Result<(), VectorStoreError> {
        self.registry.write(|c| {
            c.entry(self.collection.clone()).or_default();
        })
    }

    async fn add(&self, chunks: Vec<Chunk>) -> Result<(), VectorStoreError> {
        for chunk in &chunks {
            require_embedding(chunk)?;
        }
        self.registry.write(|c| {
            let points = c.entry(self.collection.clone()).or_default();
            for chunk in chunks {
                points.insert(chunk.id.clone(), chunk);
            }
        })
    }

    async fn search(&self, query: &VectorQuery) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
        self.registry.read(|c| {
            let Some(points) = c.get(&self.collection) else {
                return Vec::new();
            };
            let mut scored: Vec<RetrievedChunk> = points
                .values()
                .filter(|chunk| {
                    query
                        .document_ids
                        .as_ref()
                        .is_none_or(|ids| ids.iter().any(|id| id == chunk.document_id()))
                })
                .map(|chunk| RetrievedChunk {
                    score: chunk
                        .embedding
                        .as_deref()
                        .map_or(0.0, |e| cosine_similarity(e, &query.embedding)),
                    chunk: chunk.clone(),
                })
                .collect();
            scored.sort_by(|a, b| b.score.total_cmp(&a.score));
            scored.truncate(query.top_k);
            scored
        })
    }

    async fn delete(&self) -> Result<(), VectorStoreError> {
        self.registry.write(|c| {
            c.remove(&self.collection);
        })
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), VectorStoreError> {
        self.registry.write(|c| {
            if let Some(points) = c.get_mut(&self.collection) {
                points.retain(|_, chunk| chunk.document_id() != document_id);
            }
        })
    }

    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, VectorStoreError> {
        let mut chunks = self.registry.read(|c| {
            c.get(&self.collection)
                .map(|points| {
                    points
                        .values()
                        .filter(|chunk| chunk.document_id() == document_id)
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        })?;
        chunks.sort_by_key(|chunk| chunk.metadata.chunk_number);
        Ok(chunks)
    }

    async fn sample(&self, limit: usize) -> Result<Vec<(Vec<f32>, String)>, VectorStoreError> {
        self.registry.read(|c| {
            c.get(&self.collection)
                .map(|points| {
                    points
                        .values()
                        .filter_map(|chunk| {
                            chunk
                                .embedding
                                .clone()
                                .map(|e| (e, chunk.metadata.file_name.clone()))
                        })
                        .take(limit)
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    fn embedding_model(&self) -> Arc<dyn EmbeddingModel> {
        self.embedding.clone()
    }

    fn collection(&self) -> &str {
        &self.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use crate::services::HashingEmbedding;

    fn backend(registry: &MemoryRegistry) -> MemoryBackend {
        MemoryBackend::new(
            registry.clone(),
            "index_1".to_string(),
            Arc::new(HashingEmbedding::new(32)),
        )
    }

    fn embedded(document_id: &str, n: u32, embedding: Vec<f32>) -> Chunk {
        let metadata = ChunkMetadata {
            document_id: document_id.to_string(),
            file_name: "f.txt".to_string(),
            chunk_number: n,
            ..Default::default()
        };
        let mut chunk = Chunk::new(format!("{}-{}", document_id, n), metadata);
        chunk.embedding = Some(embedding);
        chunk
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_absent_collection_reads_empty() {
        let store = backend(&MemoryRegistry::default());
        assert_eq!(store.size().await.unwrap(), None);
        assert!(!store.exists().await.unwrap());
        assert!(store.search(&VectorQuery::new(vec![1.0], 3)).await.unwrap().is_empty());
        store.delete().await.unwrap();
        store.delete_document("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_search_orders_and_filters() {
        let store = backend(&MemoryRegistry::default());
        store
            .add(vec![
                embedded("a", 0, vec![1.0, 0.0]),
                embedded("a", 1, vec![0.7, 0.7]),
                embedded("b", 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = store.search(&VectorQuery::new(vec![1.0, 0.0], 2)).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.text, "a-0");
        assert!(results[0].score >= results[1].score);

        let filtered = store
            .search(&VectorQuery::new(vec![1.0, 0.0], 5).with_document_ids(vec!["b".to_string()]))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk.document_id(), "b");

        let none = store
            .search(&VectorQuery::new(vec![1.0, 0.0], 5).with_document_ids(vec![]))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_and_delete_document() {
        let store = backend(&MemoryRegistry::default());
        store.add(vec![embedded("a", 0, vec![1.0]), embedded("b", 0, vec![1.0])]).await.unwrap();
        store.add(vec![embedded("a", 0, vec![0.5])]).await.unwrap();
        assert_eq!(store.size().await.unwrap(), Some(2));

        store.delete_document("a").await.unwrap();
        assert!(store.get_document_chunks("a").await.unwrap().is_empty());
        assert_eq!(store.get_document_chunks("b").await.unwrap().len(), 1);

        store.delete().await.unwrap();
        assert_eq!(store.size().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_requires_embedding() {
        let store = backend(&MemoryRegistry::default());
        let chunk = Chunk::new("x".to_string(), ChunkMetadata::default());
        assert!(store.add(vec![chunk]).await.is_err());
        assert_eq!(store.size().await.unwrap(), None);
    }
}
