//! Second-pass ordering of retrieved chunks.
//!
//! - `SimpleReranker`: sort by retrieval score and truncate
//! - `ModelReranker`: score with a cross-encoder served at `{rerank_url}/rerank`
//!
//! Both collapse duplicate chunks (the same chunk can be retrieved twice when the
//! summary filter is on), keeping the highest score.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::QueryError;
use crate::models::{QueryConfiguration, RetrievedChunk};

#[async_trait]
pub trait Reranker: Send + Sync {
    /// At most `top_n` chunks, best first, without duplicate chunk ids.
    async fn rerank(
        &self,
        query: &str,
        results: Vec<RetrievedChunk>,
        top_n: usize,
    ) -> Result<Vec<RetrievedChunk>, QueryError>;
}

/// Pick the reranker a query asks for.
pub fn create_reranker(
    configuration: &QueryConfiguration,
    rerank_url: Option<&str>,
) -> Result<Arc<dyn Reranker>, QueryError> {
    match (&configuration.rerank_model_name, rerank_url) {
        (None, _) => Ok(Arc::new(SimpleReranker)),
        (Some(model), Some(url)) => Ok(Arc::new(ModelReranker::new(url, model)?)),
        (Some(model), None) => Err(QueryError::Rerank(format!(
            "rerank model {} requested but query.rerank_url is not configured",
            model
        ))),
    }
}

/// Collapse repeated chunk ids, keeping the first position and the highest score.
pub fn dedup_by_chunk_id(results: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<RetrievedChunk> = Vec::with_capacity(results.len());
    for result in results {
        match positions.get(&result.chunk.id) {
            Some(&i) => {
                if result.score > unique[i].score {
                    unique[i].score = result.score;
                }
            }
            None => {
                positions.insert(result.chunk.id.clone(), unique.len());
                unique.push(result);
            }
        }
    }
    unique
}

fn sort_and_truncate(mut results: Vec<RetrievedChunk>, top_n: usize) -> Vec<RetrievedChunk> {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(top_n);
    results
}

pub struct SimpleReranker;

#[async_trait]
impl Reranker for SimpleReranker {
    async fn rerank(
        &self,
        _query: &str,
        results: Vec<RetrievedChunk>,
        top_n: usize,
    ) -> Result<Vec<RetrievedChunk>, QueryError> {
        Ok(sort_and_truncate(dedup_by_chunk_id(results), top_n))
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<&'a str>,
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    #[serde(alias = "score")]
    relevance_score: f32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RerankResponse {
    Wrapped { results: Vec<RerankHit> },
    Bare(Vec<RerankHit>),
}

impl RerankResponse {
    fn into_hits(self) -> Vec<RerankHit> {
        match self {
            RerankResponse::Wrapped { results } => results,
            RerankResponse::Bare(hits) => hits,
        }
    }
}

/// Cross-encoder reranking over HTTP.
pub struct ModelReranker {
    client: Client,
    base_url: String,
    model: String,
}

impl ModelReranker {
    pub fn new(base_url: &str, model: &str) -> Result<Self, QueryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| QueryError::Rerank(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Reranker for ModelReranker {
    async fn rerank(
        &self,
        query: &str,
        results: Vec<RetrievedChunk>,
        top_n: usize,
    ) -> Result<Vec<RetrievedChunk>, QueryError> {
        let results = dedup_by_chunk_id(results);
        if results.is_empty() {
            return Ok(results);
        }

        let request = RerankRequest {
            model: &self.model,
            query,
            documents: results.iter().map(|r| r.chunk.text.as_str()).collect(),
            top_n,
        };
        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| QueryError::Rerank(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Rerank(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let hits = response
            .json::<RerankResponse>()
            .await
            .map_err(|e| QueryError::Rerank(format!("invalid response: {}", e)))?
            .into_hits();
        debug!(model = %self.model, candidates = results.len(), hits = hits.len(), "reranked");

        let mut scored: Vec<Option<f32>> = vec![None; results.len()];
        for hit in hits {
            if let Some(slot) = scored.get_mut(hit.index) {
                *slot = Some(hit.relevance_score);
            }
        }
        // Chunks the model left unscored are dropped.
        let reranked: Vec<RetrievedChunk> = results
            .into_iter()
            .zip(scored)
            .filter_map(|(mut result, score)| {
                result.score = score?;
                Some(result)
            })
            .collect();
        Ok(sort_and_truncate(reranked, top_n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata};

    fn hit(document_id: &str, n: u32, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk::new(
                format!("{} {}", document_id, n),
                ChunkMetadata {
                    document_id: document_id.to_string(),
                    chunk_number: n,
                    ..Default::default()
                },
            ),
            score,
        }
    }

    #[tokio::test]
    async fn test_simple_reranker_sorts_and_truncates() {
        let results = vec![hit("a", 0, 0.2), hit("a", 1, 0.9), hit("b", 0, 0.5)];
        let reranked = SimpleReranker.rerank("q", results, 2).await.unwrap();
        let scores: Vec<f32> = reranked.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.9, 0.5]);
    }

    #[tokio::test]
    async fn test_reranked_output_has_no_duplicates() {
        let mut results = Vec::new();
        for round in 0..3 {
            for n in 0..4 {
                results.push(hit("doc", n, n as f32 * 0.1 + round as f32 * 0.01));
            }
        }

        let reranked = SimpleReranker.rerank("q", results, 10).await.unwrap();
        let mut ids: Vec<&str> = reranked.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(reranked.len(), 4);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert!((reranked[0].score - 0.32).abs() < 1e-6);
    }

    #[test]
    fn test_dedup_keeps_first_position() {
        let unique = dedup_by_chunk_id(vec![hit("a", 0, 0.1), hit("b", 0, 0.3), hit("a", 0, 0.7)]);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].chunk.metadata.document_id, "a");
        assert_eq!(unique[0].score, 0.7);
    }

    #[test]
    fn test_rerank_response_shapes() {
        let wrapped: RerankResponse =
            serde_json::from_str(r#"{"results":[{"index":1,"relevance_score":0.8}]}"#).unwrap();
        assert_eq!(wrapped.into_hits()[0].index, 1);

        let bare: RerankResponse = serde_json::from_str(r#"[{"index":0,"score":0.4}]"#).unwrap();
        assert_eq!(bare.into_hits()[0].relevance_score, 0.4);
    }

    #[test]
    fn test_create_reranker_requires_url_for_model() {
        let config = QueryConfiguration::default().with_rerank_model("bge-reranker");
        assert!(create_reranker(&config, None).is_err());
        assert!(create_reranker(&config, Some("http://localhost:8080")).is_ok());
        assert!(create_reranker(&QueryConfiguration::default(), None).is_ok());
    }
}
