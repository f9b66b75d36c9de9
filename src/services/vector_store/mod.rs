//! Vector store abstraction layer.
//!
//! Every knowledge base owns a chunks collection (`index_{kb}`) and a summaries
//! collection (`summary_index_{kb}`). Backends differ in native mechanics (Qdrant
//! collections, PostgreSQL tables, OpenSearch indices, an in-memory map) but behave the
//! same at this interface: reads against an absent collection yield empty results and
//! deletes are idempotent.

mod memory;
mod opensearch;
mod pgvector;
mod projection;
mod qdrant;

pub use memory::{MemoryBackend, MemoryRegistry};
pub use opensearch::OpenSearchBackend;
pub use pgvector::PgVectorBackend;
pub use projection::{MAX_VISUALIZATION_SAMPLES, QUERY_LABEL, project_2d};
pub use qdrant::QdrantBackend;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::OnceCell;

use crate::error::VectorStoreError;
use crate::models::{Chunk, RetrievedChunk, VectorDriver, VectorStoreConfig, VisualizationPoint};
use crate::services::EmbeddingModel;

/// Collection holding a knowledge base's chunks.
pub fn chunks_collection_name(knowledge_base_id: i64) -> String {
    format!("index_{}", knowledge_base_id)
}

/// Collection holding a knowledge base's per-document summaries.
pub fn summaries_collection_name(knowledge_base_id: i64) -> String {
    format!("summary_index_{}", knowledge_base_id)
}

/// Similarity search request.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub embedding: Vec<f32>,
    pub top_k: usize,
    /// Restrict results to these documents. `Some(vec![])` matches nothing.
    pub document_ids: Option<Vec<String>>,
}

impl VectorQuery {
    pub fn new(embedding: Vec<f32>, top_k: usize) -> Self {
        Self {
            embedding,
            top_k,
            document_ids: None,
        }
    }

    pub fn with_document_ids(mut self, document_ids: Vec<String>) -> Self {
        self.document_ids = Some(document_ids);
        self
    }
}

/// Abstract trait for vector store operations.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Number of stored vectors, or `None` when the collection does not exist.
    async fn size(&self) -> Result<Option<u64>, VectorStoreError>;

    async fn exists(&self) -> Result<bool, VectorStoreError> {
        Ok(self.size().await?.is_some())
    }

    /// Create the collection if it doesn't exist.
    async fn create_collection(&self) -> Result<(), VectorStoreError>;

    /// Insert or replace embedded chunks, creating the collection on first write.
    async fn add(&self, chunks: Vec<Chunk>) -> Result<(), VectorStoreError>;

    async fn search(&self, query: &VectorQuery) -> Result<Vec<RetrievedChunk>, VectorStoreError>;

    /// Drop the whole collection. Idempotent.
    async fn delete(&self) -> Result<(), VectorStoreError>;

    /// Remove every chunk of a document. Idempotent.
    async fn delete_document(&self, document_id: &str) -> Result<(), VectorStoreError>;

    /// Chunks of a document ordered by chunk number.
    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, VectorStoreError>;

    /// Up to `limit` stored vectors with their file-name labels.
    async fn sample(&self, limit: usize) -> Result<Vec<(Vec<f32>, String)>, VectorStoreError>;

    fn embedding_model(&self) -> Arc<dyn EmbeddingModel>;

    /// Get the collection/table name.
    fn collection(&self) -> &str;

    /// 2D projection of stored vectors, plus the embedded query when given.
    ///
    /// Empty when fewer than three vectors are stored.
    async fn visualize(&self, query: Option<&str>) -> Result<Vec<VisualizationPoint>, VectorStoreError> {
        let mut samples = self.sample(MAX_VISUALIZATION_SAMPLES).await?;
        if samples.len() < 3 {
            return Ok(Vec::new());
        }
        if let Some(query) = query {
            let embedding = self.embedding_model().embed_query(query).await?;
            samples.push((embedding, QUERY_LABEL.to_string()));
        }
        Ok(project_2d(&samples))
    }
}

/// Fail when a chunk reaches a backend without its embedding.
pub(crate) fn require_embedding(chunk: &Chunk) -> Result<&[f32], VectorStoreError> {
    chunk
        .embedding
        .as_deref()
        .ok_or_else(|| VectorStoreError::UpsertError(format!("chunk {} has no embedding", chunk.id)))
}

/// Opens collections for knowledge bases on the configured backend.
#[derive(Clone)]
pub struct VectorStoreFactory {
    config: VectorStoreConfig,
    embedding: Arc<dyn EmbeddingModel>,
    memory: MemoryRegistry,
    pg_pool: Arc<OnceCell<PgPool>>,
}

impl VectorStoreFactory {
    pub fn new(config: VectorStoreConfig, embedding: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            config,
            embedding,
            memory: MemoryRegistry::default(),
            pg_pool: Arc::new(OnceCell::new()),
        }
    }

    /// In-memory factory; collections live as long as the factory and its clones.
    pub fn in_memory(embedding: Arc<dyn EmbeddingModel>) -> Self {
        Self::new(
            VectorStoreConfig {
                driver: VectorDriver::Memory,
                ..Default::default()
            },
            embedding,
        )
    }

    pub fn driver(&self) -> VectorDriver {
        self.config.driver
    }

    pub fn embedding_model(&self) -> Arc<dyn EmbeddingModel> {
        self.embedding.clone()
    }

    pub async fn for_chunks(&self, knowledge_base_id: i64) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
        self.open(chunks_collection_name(knowledge_base_id)).await
    }

    pub async fn for_summaries(&self, knowledge_base_id: i64) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
        self.open(summaries_collection_name(knowledge_base_id)).await
    }

    async fn open(&self, collection: String) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
        match self.config.driver {
            VectorDriver::Qdrant => Ok(Arc::new(QdrantBackend::new(
                &self.config,
                collection,
                self.embedding.clone(),
            )?)),
            VectorDriver::PostgreSQL => {
                let pool = self
                    .pg_pool
                    .get_or_try_init(|| self.connect_postgres())
                    .await?
                    .clone();
                Ok(Arc::new(PgVectorBackend::with_pool(
                    pool,
                    &self.config,
                    collection,
                    self.embedding.clone(),
                )))
            }
            VectorDriver::OpenSearch => Ok(Arc::new(OpenSearchBackend::new(
                &self.config,
                collection,
                self.embedding.clone(),
            )?)),
            VectorDriver::Memory => Ok(Arc::new(MemoryBackend::new(
                self.memory.clone(),
                collection,
                self.embedding.clone(),
            ))),
        }
    }

    async fn connect_postgres(&self) -> Result<PgPool, VectorStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.config.pool_max)
            .acquire_timeout(std::time::Duration::from_secs(
                self.config.pool_acquire_timeout.into(),
            ))
            .connect(&self.config.url)
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
        PgVectorBackend::prepare(&pool, self.config.schema.as_deref()).await?;
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use crate::services::HashingEmbedding;

    fn factory() -> VectorStoreFactory {
        VectorStoreFactory::in_memory(Arc::new(HashingEmbedding::new(16)))
    }

    fn chunk(document_id: &str, n: u32, text: &str, model: &HashingEmbedding) -> Chunk {
        let metadata = ChunkMetadata {
            file_name: format!("{}.txt", document_id),
            document_id: document_id.to_string(),
            knowledge_base_id: 1,
            chunk_number: n,
            ..Default::default()
        };
        let mut chunk = Chunk::new(text.to_string(), metadata);
        chunk.embedding = Some(model.embed_text(text));
        chunk
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(chunks_collection_name(3), "index_3");
        assert_eq!(summaries_collection_name(3), "summary_index_3");
    }

    #[tokio::test]
    async fn test_factory_shares_memory_collections() {
        let factory = factory();
        let model = HashingEmbedding::new(16);
        let store = factory.for_chunks(1).await.unwrap();
        store.add(vec![chunk("a", 0, "alpha", &model)]).await.unwrap();

        let reopened = factory.clone().for_chunks(1).await.unwrap();
        assert_eq!(reopened.size().await.unwrap(), Some(1));
        assert_eq!(factory.for_summaries(1).await.unwrap().size().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_visualize_needs_three_vectors() {
        let factory = factory();
        let model = HashingEmbedding::new(16);
        let store = factory.for_chunks(9).await.unwrap();
        store
            .add(vec![chunk("a", 0, "alpha one", &model), chunk("a", 1, "beta two", &model)])
            .await
            .unwrap();
        assert!(store.visualize(None).await.unwrap().is_empty());

        store.add(vec![chunk("b", 0, "gamma three", &model)]).await.unwrap();
        let points = store.visualize(Some("alpha")).await.unwrap();
        assert_eq!(points.len(), 4);
        assert_eq!(points.last().map(|p| p.label.as_str()), Some(QUERY_LABEL));
    }

    #[test]
    fn test_require_embedding() {
        let chunk = Chunk::new("x".to_string(), ChunkMetadata::default());
        assert!(matches!(require_embedding(&chunk), Err(VectorStoreError::UpsertError(_))));
    }
}
