//! Qdrant vector store backend implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_output::VectorsOptions;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointId,
    PointStruct, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value,
    VectorParamsBuilder, VectorsOutput,
};
use tracing::debug;

use super::{VectorQuery, VectorStore, require_embedding};
use crate::error::VectorStoreError;
use crate::models::{Chunk, ChunkMetadata, RetrievedChunk, VectorStoreConfig};
use crate::services::EmbeddingModel;

const SCROLL_PAGE: u32 = 256;

/// Another writer created the collection between the existence check and ours.
fn is_already_exists(message: &str) -> bool {
    message.contains("already exists")
}

/// Qdrant vector store backend, one collection per knowledge base and purpose.
pub struct QdrantBackend {
    client: Qdrant,
    collection: String,
    embedding: Arc<dyn EmbeddingModel>,
}

impl QdrantBackend {
    pub fn new(
        config: &VectorStoreConfig,
        collection: String,
        embedding: Arc<dyn EmbeddingModel>,
    ) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            collection,
            embedding,
        })
    }

    fn document_filter(document_ids: &[String]) -> Filter {
        Filter::must([Condition::matches("document_id", document_ids.to_vec())])
    }

    fn to_payload(chunk: Chunk) -> HashMap<String, Value> {
        let meta = chunk.metadata;
        let mut payload: HashMap<String, Value> = HashMap::new();
        payload.insert("text".to_string(), chunk.text.into());
        payload.insert("document_id".to_string(), meta.document_id.into());
        payload.insert("knowledge_base_id".to_string(), meta.knowledge_base_id.into());
        payload.insert("file_name".to_string(), meta.file_name.into());
        payload.insert("chunk_number".to_string(), i64::from(meta.chunk_number).into());
        payload.insert("chunk_format".to_string(), meta.chunk_format.into());
        if let Some(page) = meta.page_number {
            payload.insert("page_number".to_string(), page.into());
        }
        if !meta.extra.is_empty() {
            let extra = serde_json::to_string(&meta.extra).unwrap_or_default();
            payload.insert("extra".to_string(), extra.into());
        }
        payload
    }

    fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
        payload.get(key).and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
    }

    fn payload_int(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
        payload.get(key).and_then(|v| match &v.kind {
            Some(Kind::IntegerValue(n)) => Some(*n),
            _ => None,
        })
    }

    fn point_id(id: Option<&PointId>) -> String {
        use qdrant_client::qdrant::point_id::PointIdOptions;
        match id.and_then(|id| id.point_id_options.as_ref()) {
            Some(PointIdOptions::Uuid(uuid)) => uuid.clone(),
            Some(PointIdOptions::Num(num)) => num.to_string(),
            None => String::new(),
        }
    }

    #[allow(deprecated)]
    fn dense_vector(vectors: Option<VectorsOutput>) -> Option<Vec<f32>> {
        match vectors?.vectors_options? {
            VectorsOptions::Vector(v) => Some(v.data),
            _ => None,
        }
    }

    fn from_payload(id: String, payload: &HashMap<String, Value>, embedding: Option<Vec<f32>>) -> Chunk {
        let extra: BTreeMap<String, String> = Self::payload_str(payload, "extra")
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Chunk {
            id,
            text: Self::payload_str(payload, "text").unwrap_or_default(),
            embedding,
            metadata: ChunkMetadata {
                file_name: Self::payload_str(payload, "file_name").unwrap_or_default(),
                document_id: Self::payload_str(payload, "document_id").unwrap_or_default(),
                knowledge_base_id: Self::payload_int(payload, "knowledge_base_id").unwrap_or_default(),
                chunk_number: Self::payload_int(payload, "chunk_number").unwrap_or_default() as u32,
                chunk_format: Self::payload_str(payload, "chunk_format")
                    .unwrap_or_else(|| "text".to_string()),
                page_number: Self::payload_str(payload, "page_number"),
                extra,
            },
        }
    }

    /// Scroll through points, optionally filtered, until `limit` points are collected.
    async fn scroll(&self, filter: Option<Filter>, limit: usize, with_vectors: bool) -> Result<Vec<Chunk>, VectorStoreError> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }

        let mut chunks = Vec::new();
        let mut offset: Option<PointId> = None;
        while chunks.len() < limit {
            let page = SCROLL_PAGE.min((limit - chunks.len()) as u32);
            let mut scroll_builder = ScrollPointsBuilder::new(&self.collection)
                .limit(page)
                .with_payload(true)
                .with_vectors(with_vectors);
            if let Some(ref f) = filter {
                scroll_builder = scroll_builder.filter(f.clone());
            }
            if let Some(off) = offset {
                scroll_builder = scroll_builder.offset(off);
            }

            let response = self
                .client
                .scroll(scroll_builder)
                .await
                .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

            if response.result.is_empty() {
                break;
            }
            for point in response.result {
                let id = Self::point_id(point.id.as_ref());
                let embedding = Self::dense_vector(point.vectors);
                chunks.push(Self::from_payload(id, &point.payload, embedding));
            }

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }
        Ok(chunks)
    }
}

#[async_trait]
impl VectorStore for QdrantBackend {
    async fn size(&self) -> Result<Option<u64>, VectorStoreError> {
        match self.client.collection_info(&self.collection).await {
            Ok(info) => Ok(Some(info.result.map_or(0, |r| r.points_count.unwrap_or(0)))),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("not found") || msg.contains("doesn't exist") {
                    Ok(None)
                } else {
                    Err(VectorStoreError::CollectionError(msg))
                }
            }
        }
    }

    async fn create_collection(&self) -> Result<(), VectorStoreError> {
        if self.exists().await? {
            return Ok(());
        }

        let dimension = self.embedding.dimension() as u64;
        let create_collection = CreateCollectionBuilder::new(&self.collection)
            .vectors_config(VectorParamsBuilder::new(dimension, Distance::Cosine));

        match self.client.create_collection(create_collection).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let msg = e.to_string();
                if is_already_exists(&msg) {
                    debug!(collection = %self.collection, "collection created concurrently");
                    Ok(())
                } else {
                    Err(VectorStoreError::CollectionError(msg))
                }
            }
        }
    }

    async fn add(&self, chunks: Vec<Chunk>) -> Result<(), VectorStoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.create_collection().await?;

        let mut points = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = require_embedding(&chunk)?.to_vec();
            let id = chunk.id.clone();
            points.push(PointStruct::new(id, vector, Self::to_payload(chunk)));
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        Ok(())
    }

    async fn search(&self, query: &VectorQuery) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
        if matches!(query.document_ids, Some(ref ids) if ids.is_empty()) || !self.exists().await? {
            return Ok(Vec::new());
        }

        let mut search_builder =
            SearchPointsBuilder::new(&self.collection, query.embedding.clone(), query.top_k as u64)
                .with_payload(true);
        if let Some(ref ids) = query.document_ids {
            search_builder = search_builder.filter(Self::document_filter(ids));
        }

        let results = self
            .client
            .search_points(search_builder)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        Ok(results
            .result
            .into_iter()
            .map(|point| RetrievedChunk {
                chunk: Self::from_payload(Self::point_id(point.id.as_ref()), &point.payload, None),
                score: point.score,
            })
            .collect())
    }

    async fn delete(&self) -> Result<(), VectorStoreError> {
        if !self.exists().await? {
            return Ok(());
        }

        self.client
            .delete_collection(&self.collection)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), VectorStoreError> {
        if !self.exists().await? {
            return Ok(());
        }

        let delete = DeletePointsBuilder::new(&self.collection)
            .points(Self::document_filter(&[document_id.to_string()]))
            .wait(true);

        self.client
            .delete_points(delete)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(())
    }

    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, VectorStoreError> {
        let filter = Self::document_filter(&[document_id.to_string()]);
        let mut chunks = self.scroll(Some(filter), usize::MAX, false).await?;
        chunks.sort_by_key(|c| c.metadata.chunk_number);
        Ok(chunks)
    }

    async fn sample(&self, limit: usize) -> Result<Vec<(Vec<f32>, String)>, VectorStoreError> {
        Ok(self
            .scroll(None, limit, true)
            .await?
            .into_iter()
            .filter_map(|c| c.embedding.map(|e| (e, c.metadata.file_name)))
            .collect())
    }

    fn embedding_model(&self) -> Arc<dyn EmbeddingModel> {
        self.embedding.clone()
    }

    fn collection(&self) -> &str {
        &self.collection
    }
}
