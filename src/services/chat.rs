//! Chat over knowledge bases, degrading to plain LLM chat when there is nothing to retrieve.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::QueryError;
use crate::knowledge_base::KnowledgeEngine;
use crate::models::{ChatTurn, QueryConfiguration, QueryResponse};
use crate::services::{ChatMessage, LanguageModel, StreamEvent};

/// Turns of history replayed to the model when chatting without retrieval.
pub const DIRECT_CHAT_HISTORY_TURNS: usize = 10;

pub struct ChatService {
    engine: KnowledgeEngine,
}

/// How a chat message will be answered.
enum Route {
    Direct,
    Retrieval(i64),
}

impl ChatService {
    pub fn new(engine: KnowledgeEngine) -> Self {
        Self { engine }
    }

    fn model_for(&self, configuration: &QueryConfiguration) -> Arc<dyn LanguageModel> {
        let llm = self.engine.llm();
        match configuration.model_name.as_deref() {
            Some(model) => llm.with_model(model),
            None => llm,
        }
    }

    async fn route(&self, knowledge_base_ids: &[i64], configuration: &QueryConfiguration) -> Result<Route, QueryError> {
        if configuration.exclude_knowledge_base || knowledge_base_ids.is_empty() {
            return Ok(Route::Direct);
        }

        let mut total_size = 0;
        for &id in knowledge_base_ids {
            let store = self.engine.factory().for_chunks(id).await?;
            total_size += store.size().await?.unwrap_or(0);
        }
        if total_size == 0 {
            debug!(knowledge_bases = ?knowledge_base_ids, "knowledge bases are empty, chatting directly");
            return Ok(Route::Direct);
        }

        match knowledge_base_ids {
            [id] => Ok(Route::Retrieval(*id)),
            ids => Err(QueryError::TooManyDataSources(ids.len())),
        }
    }

    pub async fn chat(
        &self,
        knowledge_base_ids: &[i64],
        query: &str,
        configuration: &QueryConfiguration,
        history: &[ChatTurn],
    ) -> Result<QueryResponse, QueryError> {
        let Route::Retrieval(id) = self.route(knowledge_base_ids, configuration).await? else {
            return self.direct_chat(query, configuration, history, None).await;
        };

        let source = self.engine.data_source(id).await?;
        match source.query(query, configuration, history).await {
            Ok(response) => Ok(without_trivial_condensing(response, query)),
            Err(QueryError::NoKnowledgeAvailable) => {
                info!(kb_id = id, "no knowledge available, chatting directly");
                self.direct_chat(query, configuration, history, None).await
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`ChatService::chat`], forwarding the answer over `tx` as it streams.
    pub async fn stream_chat(
        &self,
        knowledge_base_ids: &[i64],
        query: &str,
        configuration: &QueryConfiguration,
        history: &[ChatTurn],
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<QueryResponse, QueryError> {
        let Route::Retrieval(id) = self.route(knowledge_base_ids, configuration).await? else {
            return self.direct_chat(query, configuration, history, Some(tx)).await;
        };

        let source = self.engine.data_source(id).await?;
        match source
            .querier()
            .stream_query(query, configuration, history, tx.clone())
            .await
        {
            Ok(response) => Ok(without_trivial_condensing(response, query)),
            Err(QueryError::NoKnowledgeAvailable) => {
                self.direct_chat(query, configuration, history, Some(tx)).await
            }
            Err(e) => Err(e),
        }
    }

    async fn direct_chat(
        &self,
        query: &str,
        configuration: &QueryConfiguration,
        history: &[ChatTurn],
        tx: Option<mpsc::Sender<StreamEvent>>,
    ) -> Result<QueryResponse, QueryError> {
        let llm = self.model_for(configuration);
        let messages = direct_messages(query, history);
        let answer = match tx {
            Some(tx) => llm.stream_chat(&messages, tx).await?,
            None => llm.chat(&messages).await?,
        };
        Ok(QueryResponse {
            answer,
            condensed_question: None,
            source_nodes: Vec::new(),
        })
    }
}

fn direct_messages(query: &str, history: &[ChatTurn]) -> Vec<ChatMessage> {
    let recent = &history[history.len().saturating_sub(DIRECT_CHAT_HISTORY_TURNS)..];
    let mut messages: Vec<ChatMessage> = recent
        .iter()
        .flat_map(|turn| {
            [
                ChatMessage::user(turn.user.clone()),
                ChatMessage::assistant(turn.assistant.clone()),
            ]
        })
        .collect();
    messages.push(ChatMessage::user(query));
    messages
}

fn without_trivial_condensing(mut response: QueryResponse, query: &str) -> QueryResponse {
    if response
        .condensed_question
        .as_deref()
        .is_some_and(|q| q.trim() == query.trim())
    {
        response.condensed_question = None;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata, IndexingConfig, QueryDefaults};
    use crate::services::testing::ScriptedModel;
    use crate::services::{HashingEmbedding, Role, VectorStoreFactory};

    fn service(llm: ScriptedModel) -> (ChatService, VectorStoreFactory) {
        let factory = VectorStoreFactory::in_memory(Arc::new(HashingEmbedding::new(32)));
        let engine = KnowledgeEngine::new(
            IndexingConfig::default(),
            QueryDefaults::default(),
            factory.clone(),
            Arc::new(llm),
            None,
        );
        (ChatService::new(engine), factory)
    }

    async fn seed(factory: &VectorStoreFactory, kb: i64, text: &str) {
        let mut chunk = Chunk::new(
            text.to_string(),
            ChunkMetadata {
                document_id: "doc".to_string(),
                knowledge_base_id: kb,
                ..Default::default()
            },
        );
        chunk.embedding = Some(HashingEmbedding::new(32).embed_text(text));
        factory.for_chunks(kb).await.unwrap().add(vec![chunk]).await.unwrap();
    }

    fn config() -> QueryConfiguration {
        QueryConfiguration::default()
            .with_question_condensing(false)
            .with_summary_filter(false)
    }

    #[tokio::test]
    async fn test_empty_knowledge_base_falls_back_to_direct_chat() {
        let llm = ScriptedModel::new("direct answer");
        let (service, _factory) = service(llm.clone());
        let history: Vec<ChatTurn> = (0..12).map(|i| ChatTurn::new(format!("q{}", i), format!("a{}", i))).collect();

        let response = service.chat(&[7], "hello", &config(), &history).await.unwrap();
        assert_eq!(response.answer, "direct answer");
        assert!(response.source_nodes.is_empty());

        let messages = &llm.calls()[0];
        assert_eq!(messages.len(), 2 * DIRECT_CHAT_HISTORY_TURNS + 1);
        assert_eq!(messages[0].content, "q2");
        assert_eq!(messages.last().map(|m| m.role), Some(Role::User));
    }

    #[tokio::test]
    async fn test_excluded_knowledge_base_skips_retrieval() {
        let (service, factory) = service(ScriptedModel::new("direct"));
        seed(&factory, 1, "rust ownership").await;
        let response = service
            .chat(&[1], "rust", &config().excluding_knowledge_base(), &[])
            .await
            .unwrap();
        assert!(response.source_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_chat_returns_sources() {
        let (service, factory) = service(ScriptedModel::new("grounded"));
        seed(&factory, 1, "rust ownership").await;
        let response = service.chat(&[1], "rust", &config(), &[]).await.unwrap();
        assert_eq!(response.answer, "grounded");
        assert_eq!(response.source_nodes.len(), 1);
        assert_eq!(response.condensed_question, None);
    }

    #[tokio::test]
    async fn test_multiple_knowledge_bases_rejected() {
        let (service, factory) = service(ScriptedModel::new("x"));
        seed(&factory, 1, "one").await;
        seed(&factory, 2, "two").await;
        assert!(matches!(
            service.chat(&[1, 2], "q", &config(), &[]).await,
            Err(QueryError::TooManyDataSources(2))
        ));
    }

    #[tokio::test]
    async fn test_condensed_question_equal_to_query_is_dropped() {
        let llm = ScriptedModel::new("answer").with_rule("<Standalone question>", "  rust  ");
        let (service, factory) = service(llm);
        seed(&factory, 1, "rust ownership").await;
        let history = vec![ChatTurn::new("hi", "hello")];

        let response = service
            .chat(&[1], "rust", &config().with_question_condensing(true), &history)
            .await
            .unwrap();
        assert_eq!(response.condensed_question, None);
    }

    #[tokio::test]
    async fn test_stream_chat_direct() {
        let (service, _factory) = service(ScriptedModel::new("streamed"));
        let (tx, mut rx) = mpsc::channel(4);
        let response = service.stream_chat(&[], "hi", &config(), &[], tx).await.unwrap();
        assert_eq!(response.answer, "streamed");
        assert_eq!(rx.recv().await, Some(StreamEvent::Delta("streamed".to_string())));
    }
}
