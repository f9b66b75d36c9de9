//! OpenSearch k-NN backend over the REST API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{VectorQuery, VectorStore, require_embedding};
use crate::error::VectorStoreError;
use crate::models::{Chunk, ChunkMetadata, RetrievedChunk, VectorStoreConfig};
use crate::services::EmbeddingModel;

/// Upper bound on hits returned by a single non-k-NN search.
const MAX_RESULT_WINDOW: usize = 10_000;

#[derive(Debug, Serialize, Deserialize)]
struct StoredChunk {
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    embedding: Option<Vec<f32>>,
    metadata: ChunkMetadata,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f32>,
    #[serde(rename = "_source")]
    source: StoredChunk,
}

impl Hit {
    fn into_chunk(self) -> (Chunk, f32) {
        let chunk = Chunk {
            id: self.id,
            text: self.source.text,
            embedding: self.source.embedding,
            metadata: self.source.metadata,
        };
        (chunk, self.score.unwrap_or_default())
    }
}

/// One OpenSearch index per collection.
pub struct OpenSearchBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    embedding: Arc<dyn EmbeddingModel>,
}

impl OpenSearchBackend {
    pub fn new(
        config: &VectorStoreConfig,
        collection: String,
        embedding: Arc<dyn EmbeddingModel>,
    ) -> Result<Self, VectorStoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.pool_acquire_timeout.into()))
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            collection,
            embedding,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}{}", self.base_url, self.collection, path)
    }

    /// `user:password` credentials use basic auth, anything else is sent as an API key.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) => match key.split_once(':') {
                Some((user, password)) => request.basic_auth(user, Some(password)),
                None => request.header("Authorization", format!("ApiKey {}", key)),
            },
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<(StatusCode, String), VectorStoreError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;
        Ok((status, body))
    }

    fn index_mapping(dimension: usize) -> Value {
        json!({
            "settings": { "index": { "knn": true } },
            "mappings": {
                "properties": {
                    "text": { "type": "text" },
                    "embedding": {
                        "type": "knn_vector",
                        "dimension": dimension,
                        "method": { "name": "hnsw", "space_type": "cosinesimil", "engine": "lucene" }
                    },
                    "metadata": {
                        "properties": {
                            "document_id": { "type": "keyword" },
                            "file_name": { "type": "keyword" },
                            "chunk_number": { "type": "integer" }
                        }
                    }
                }
            }
        })
    }

    fn knn_query(query: &VectorQuery) -> Value {
        let mut knn = json!({ "vector": query.embedding, "k": query.top_k });
        if let Some(ref ids) = query.document_ids {
            knn["filter"] = json!({ "terms": { "metadata.document_id": ids } });
        }
        json!({
            "size": query.top_k,
            "_source": { "excludes": ["embedding"] },
            "query": { "knn": { "embedding": knn } }
        })
    }

    fn bulk_body(&self, chunks: Vec<Chunk>) -> Result<String, VectorStoreError> {
        let mut body = String::new();
        for chunk in chunks {
            let embedding = require_embedding(&chunk)?.to_vec();
            let action = json!({ "index": { "_index": self.collection, "_id": chunk.id } });
            let document = StoredChunk {
                text: chunk.text,
                embedding: Some(embedding),
                metadata: chunk.metadata,
            };
            let document = serde_json::to_string(&document)
                .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&document);
            body.push('\n');
        }
        Ok(body)
    }

    async fn search_hits(&self, body: Value) -> Result<Vec<Hit>, VectorStoreError> {
        let (status, text) = self
            .send(self.client.post(self.url("/_search")).json(&body))
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(VectorStoreError::SearchError(format!("status {}: {}", status, text)));
        }
        let parsed: SearchResponse =
            serde_json::from_str(&text).map_err(|e| VectorStoreError::SearchError(e.to_string()))?;
        Ok(parsed.hits.hits)
    }
}

#[async_trait]
impl VectorStore for OpenSearchBackend {
    async fn size(&self) -> Result<Option<u64>, VectorStoreError> {
        let (status, body) = self.send(self.client.get(self.url("/_count"))).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(VectorStoreError::CollectionError(format!("status {}: {}", status, body)));
        }
        let parsed: Value =
            serde_json::from_str(&body).map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        Ok(Some(parsed["count"].as_u64().unwrap_or(0)))
    }

    async fn create_collection(&self) -> Result<(), VectorStoreError> {
        if self.exists().await? {
            return Ok(());
        }
        let mapping = Self::index_mapping(self.embedding.dimension());
        let (status, body) = self.send(self.client.put(self.url("")).json(&mapping)).await?;
        if !status.is_success() && !body.contains("resource_already_exists_exception") {
            return Err(VectorStoreError::CollectionError(format!("status {}: {}", status, body)));
        }
        Ok(())
    }

    async fn add(&self, chunks: Vec<Chunk>) -> Result<(), VectorStoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.create_collection().await?;

        let body = self.bulk_body(chunks)?;
        let request = self
            .client
            .post(format!("{}/_bulk?refresh=true", self.base_url))
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        let (status, text) = self.send(request).await?;
        if !status.is_success() {
            return Err(VectorStoreError::UpsertError(format!("status {}: {}", status, text)));
        }
        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;
        if parsed["errors"].as_bool().unwrap_or(false) {
            return Err(VectorStoreError::UpsertError(format!(
                "bulk request reported item errors for {}",
                self.collection
            )));
        }
        Ok(())
    }

    async fn search(&self, query: &VectorQuery) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
        if matches!(query.document_ids, Some(ref ids) if ids.is_empty()) {
            return Ok(Vec::new());
        }
        Ok(self
            .search_hits(Self::knn_query(query))
            .await?
            .into_iter()
            .map(|hit| {
                let (chunk, score) = hit.into_chunk();
                RetrievedChunk { chunk, score }
            })
            .collect())
    }

    async fn delete(&self) -> Result<(), VectorStoreError> {
        let (status, body) = self.send(self.client.delete(self.url(""))).await?;
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(VectorStoreError::DeleteError(format!("status {}: {}", status, body)));
        }
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), VectorStoreError> {
        let query = json!({ "query": { "term": { "metadata.document_id": document_id } } });
        let request = self
            .client
            .post(self.url("/_delete_by_query?refresh=true"))
            .json(&query);
        let (status, body) = self.send(request).await?;
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(VectorStoreError::DeleteError(format!("status {}: {}", status, body)));
        }
        Ok(())
    }

    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, VectorStoreError> {
        let body = json!({
            "size": MAX_RESULT_WINDOW,
            "_source": { "excludes": ["embedding"] },
            "query": { "term": { "metadata.document_id": document_id } },
            "sort": [{ "metadata.chunk_number": "asc" }]
        });
        Ok(self
            .search_hits(body)
            .await?
            .into_iter()
            .map(|hit| hit.into_chunk().0)
            .collect())
    }

    async fn sample(&self, limit: usize) -> Result<Vec<(Vec<f32>, String)>, VectorStoreError> {
        let body = json!({
            "size": limit.min(MAX_RESULT_WINDOW),
            "query": { "match_all": {} }
        });
        Ok(self
            .search_hits(body)
            .await?
            .into_iter()
            .filter_map(|hit| {
                let (chunk, _) = hit.into_chunk();
                chunk.embedding.map(|e| (e, chunk.metadata.file_name))
            })
            .collect())
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
    use crate::services::HashingEmbedding;

    fn backend() -> OpenSearchBackend {
        let config = VectorStoreConfig {
            url: "http://localhost:9200/".to_string(),
            ..Default::default()
        };
        OpenSearchBackend::new(&config, "index_5".to_string(), Arc::new(HashingEmbedding::new(8))).unwrap()
    }

    #[test]
    fn test_urls() {
        let backend = backend();
        assert_eq!(backend.url("/_count"), "http://localhost:9200/index_5/_count");
    }

    #[test]
    fn test_knn_query_with_filter() {
        let query = VectorQuery::new(vec![0.5; 2], 3).with_document_ids(vec!["d1".to_string()]);
        let body = OpenSearchBackend::knn_query(&query);
        assert_eq!(body["size"], 3);
        assert_eq!(body["query"]["knn"]["embedding"]["k"], 3);
        assert_eq!(
            body["query"]["knn"]["embedding"]["filter"]["terms"]["metadata.document_id"][0],
            "d1"
        );
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let backend = backend();
        let mut chunk = Chunk::new(
            "hello".to_string(),
            ChunkMetadata {
                document_id: "d1".to_string(),
                ..Default::default()
            },
        );
        chunk.embedding = Some(vec![1.0, 0.0]);
        let body = backend.bulk_body(vec![chunk]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "index_5");
        let source: StoredChunk = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(source.metadata.document_id, "d1");
    }

    #[test]
    fn test_hit_parsing() {
        let hit: Hit = serde_json::from_str(
            r#"{"_id":"abc","_score":0.9,"_source":{"text":"t","metadata":{"file_name":"f","document_id":"d","knowledge_base_id":1,"chunk_number":2}}}"#,
        )
        .unwrap();
        let (chunk, score) = hit.into_chunk();
        assert_eq!(chunk.id, "abc");
        assert_eq!(chunk.metadata.chunk_number, 2);
        assert_eq!(chunk.metadata.chunk_format, "text");
        assert!((score - 0.9).abs() < 1e-6);
    }
}
