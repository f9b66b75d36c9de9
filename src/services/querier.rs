//! Retrieval orchestration: condense → HyDE → vector search → summary filter → rerank → answer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::QueryError;
use crate::models::{ChatTurn, QueryConfiguration, QueryResponse, RetrievedChunk};
use crate::services::reranker::create_reranker;
use crate::services::summary::SummaryQueryEngine;
use crate::services::{ChatMessage, LanguageModel, StreamEvent, VectorQuery, VectorStore};

pub const CONDENSE_QUESTION_TEMPLATE: &str = "Given a conversation (between Human and Assistant) and a follow up message from Human, \
rewrite the message to be a standalone question that captures all relevant context from the conversation. \
Just provide the question, not any description of it.\n\n\
<Chat History>\n{chat_history}\n\n\
<Follow Up Message>\n{question}\n\n\
<Standalone question>\n";

pub const HYDE_TEMPLATE: &str = "You are an expert. You are asked: {question}. \
Produce a brief document that would hypothetically answer this question.";

const ANSWER_TEMPLATE: &str = "Context information is below.\n\
---------------------\n\
{context}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {question}\n\
Answer: ";

/// Context gathered for a question, before any answer is written.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// The question retrieval ran with: the condensed form when condensing applied.
    pub question: String,
    /// Set only when condensing changed the question.
    pub condensed_question: Option<String>,
    pub source_nodes: Vec<RetrievedChunk>,
}

/// Answers questions against one knowledge base's chunks collection.
pub struct Querier {
    chunks: Arc<dyn VectorStore>,
    llm: Arc<dyn LanguageModel>,
    summary_engine: Option<SummaryQueryEngine>,
    rerank_url: Option<String>,
    history_turns: usize,
}

impl Querier {
    pub fn new(chunks: Arc<dyn VectorStore>, llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            chunks,
            llm,
            summary_engine: None,
            rerank_url: None,
            history_turns: 10,
        }
    }

    /// Enables summary-guided retrieval for queries that ask for it.
    pub fn with_summary_engine(mut self, engine: SummaryQueryEngine) -> Self {
        self.summary_engine = Some(engine);
        self
    }

    pub fn with_rerank_url(mut self, url: Option<String>) -> Self {
        self.rerank_url = url;
        self
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    fn model_for(&self, configuration: &QueryConfiguration) -> Arc<dyn LanguageModel> {
        match configuration.model_name.as_deref() {
            Some(model) => self.llm.with_model(model),
            None => self.llm.clone(),
        }
    }

    /// Fails with `NoKnowledgeAvailable` when the collection is missing or empty.
    pub async fn ensure_knowledge(&self) -> Result<u64, QueryError> {
        match self.chunks.size().await? {
            Some(size) if size > 0 => Ok(size),
            _ => Err(QueryError::NoKnowledgeAvailable),
        }
    }

    /// Rewrite a follow-up into a standalone question using recent turns.
    pub async fn condense_question(
        &self,
        llm: &dyn LanguageModel,
        question: &str,
        history: &[ChatTurn],
    ) -> Result<String, QueryError> {
        if history.is_empty() {
            return Ok(question.to_string());
        }
        let recent = &history[history.len().saturating_sub(self.history_turns)..];
        let chat_history = recent
            .iter()
            .map(|turn| format!("Human: {}\nAssistant: {}", turn.user, turn.assistant))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = CONDENSE_QUESTION_TEMPLATE
            .replace("{chat_history}", &chat_history)
            .replace("{question}", question);

        let condensed = llm.complete(&prompt).await?.trim().to_string();
        if condensed.is_empty() {
            return Ok(question.to_string());
        }
        Ok(condensed)
    }

    pub async fn hypothetical(&self, llm: &dyn LanguageModel, question: &str) -> Result<String, QueryError> {
        let prompt = HYDE_TEMPLATE.replace("{question}", question);
        Ok(llm.complete(&prompt).await?)
    }

    pub async fn retrieve(
        &self,
        query: &str,
        configuration: &QueryConfiguration,
        history: &[ChatTurn],
    ) -> Result<Retrieval, QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::InvalidQuery("query is empty".to_string()));
        }
        self.ensure_knowledge().await?;
        self.retrieve_with(&*self.model_for(configuration), query, configuration, history)
            .await
    }

    async fn retrieve_with(
        &self,
        llm: &dyn LanguageModel,
        query: &str,
        configuration: &QueryConfiguration,
        history: &[ChatTurn],
    ) -> Result<Retrieval, QueryError> {
        let top_k = configuration.top_k.max(1);

        let question = if configuration.use_question_condensing {
            let condensed = self.condense_question(llm, query, history).await?;
            info!(question = %condensed, "querying with condensed question");
            condensed
        } else {
            query.to_string()
        };

        let embedding_text = if configuration.use_hyde {
            let hypothetical = self.hypothetical(llm, &question).await?;
            debug!(document = %hypothetical, "hypothetical document");
            hypothetical
        } else {
            question.clone()
        };

        let embedding = self
            .chunks
            .embedding_model()
            .embed_query(&embedding_text)
            .await?;
        let mut nodes = self
            .chunks
            .search(&VectorQuery::new(embedding.clone(), top_k))
            .await?;

        if configuration.use_summary_filter
            && let Some(engine) = &self.summary_engine
        {
            match engine.retrieve_document_ids(&question).await {
                Ok(document_ids) if !document_ids.is_empty() => {
                    debug!(documents = ?document_ids, "summary filter matched");
                    let filtered = VectorQuery::new(embedding, top_k).with_document_ids(document_ids);
                    nodes.extend(self.chunks.search(&filtered).await?);
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "summary filter unavailable, retrieving without it"),
            }
        }

        let reranker = create_reranker(configuration, self.rerank_url.as_deref())?;
        let source_nodes = reranker.rerank(&question, nodes, top_k).await?;

        let condensed_question = (question.trim() != query.trim()).then(|| question.clone());
        Ok(Retrieval {
            question,
            condensed_question,
            source_nodes,
        })
    }

    pub async fn query(
        &self,
        query: &str,
        configuration: &QueryConfiguration,
        history: &[ChatTurn],
    ) -> Result<QueryResponse, QueryError> {
        let llm = self.model_for(configuration);
        let retrieval = self.retrieve(query, configuration, history).await?;
        let answer = llm.chat(&answer_messages(&retrieval)).await?;
        Ok(QueryResponse {
            answer,
            condensed_question: retrieval.condensed_question,
            source_nodes: retrieval.source_nodes,
        })
    }

    /// Like [`Querier::query`], streaming the answer over `tx` as it is produced.
    pub async fn stream_query(
        &self,
        query: &str,
        configuration: &QueryConfiguration,
        history: &[ChatTurn],
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<QueryResponse, QueryError> {
        let llm = self.model_for(configuration);
        let retrieval = self.retrieve(query, configuration, history).await?;
        let answer = llm.stream_chat(&answer_messages(&retrieval), tx).await?;
        Ok(QueryResponse {
            answer,
            condensed_question: retrieval.condensed_question,
            source_nodes: retrieval.source_nodes,
        })
    }
}

fn answer_messages(retrieval: &Retrieval) -> Vec<ChatMessage> {
    let context = retrieval
        .source_nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let meta = &node.chunk.metadata;
            match &meta.page_number {
                Some(page) => format!("[{}] {} (page {})\n{}", i + 1, meta.file_name, page, node.chunk.text),
                None => format!("[{}] {}\n{}", i + 1, meta.file_name, node.chunk.text),
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let prompt = ANSWER_TEMPLATE
        .replace("{context}", &context)
        .replace("{question}", &retrieval.question);
    vec![ChatMessage::user(prompt)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata};
    use crate::services::testing::ScriptedModel;
    use crate::services::{EmbeddingModel, HashingEmbedding, VectorStoreFactory};

    async fn store_with(texts: &[(&str, &str)]) -> (VectorStoreFactory, Arc<dyn VectorStore>) {
        let model = HashingEmbedding::new(64);
        let factory = VectorStoreFactory::in_memory(Arc::new(model.clone()));
        let store = factory.for_chunks(1).await.unwrap();
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, (document_id, text))| {
                let mut chunk = Chunk::new(
                    text.to_string(),
                    ChunkMetadata {
                        file_name: format!("{}.txt", document_id),
                        document_id: document_id.to_string(),
                        knowledge_base_id: 1,
                        chunk_number: i as u32,
                        ..Default::default()
                    },
                );
                chunk.embedding = Some(model.embed_text(text));
                chunk
            })
            .collect();
        if !chunks.is_empty() {
            store.add(chunks).await.unwrap();
        }
        (factory, store)
    }

    fn plain() -> QueryConfiguration {
        QueryConfiguration::default()
            .with_top_k(5)
            .with_hyde(false)
            .with_question_condensing(false)
            .with_summary_filter(false)
    }

    #[tokio::test]
    async fn test_missing_collection_is_no_knowledge() {
        let (_factory, store) = store_with(&[]).await;
        let querier = Querier::new(store, Arc::new(ScriptedModel::new("answer")));
        let err = querier.query("anything", &plain(), &[]).await.unwrap_err();
        assert!(matches!(err, QueryError::NoKnowledgeAvailable));
    }

    #[tokio::test]
    async fn test_query_answers_from_context() {
        let (_factory, store) = store_with(&[
            ("rust", "rust ownership and borrowing rules"),
            ("cook", "bake the bread at high heat"),
        ])
        .await;
        let llm = ScriptedModel::new("grounded answer");
        let querier = Querier::new(store, Arc::new(llm.clone()));

        let response = querier
            .query("rust borrowing", &plain().with_top_k(1), &[])
            .await
            .unwrap();
        assert_eq!(response.answer, "grounded answer");
        assert_eq!(response.condensed_question, None);
        assert_eq!(response.source_nodes.len(), 1);
        assert_eq!(response.source_nodes[0].chunk.metadata.document_id, "rust");
        assert!(llm.prompts()[0].contains("rust ownership"));
    }

    #[tokio::test]
    async fn test_condensing_uses_recent_history() {
        let (_factory, store) = store_with(&[("rust", "rust ownership and borrowing rules")]).await;
        let llm = ScriptedModel::new("answer").with_rule("<Standalone question>", "What are rust borrowing rules?");
        let querier = Querier::new(store, Arc::new(llm.clone())).with_history_turns(1);
        let history = vec![
            ChatTurn::new("old topic", "old reply"),
            ChatTurn::new("tell me about rust", "rust is a language"),
        ];

        let response = querier
            .query("and borrowing?", &plain().with_question_condensing(true), &history)
            .await
            .unwrap();
        assert_eq!(response.condensed_question.as_deref(), Some("What are rust borrowing rules?"));
        let condense_prompt = &llm.prompts()[0];
        assert!(condense_prompt.contains("Human: tell me about rust"));
        assert!(!condense_prompt.contains("old topic"));
    }

    #[tokio::test]
    async fn test_condensing_skipped_without_history() {
        let (_factory, store) = store_with(&[("rust", "rust ownership")]).await;
        let llm = ScriptedModel::new("answer");
        let querier = Querier::new(store, Arc::new(llm.clone()));
        querier
            .query("rust", &plain().with_question_condensing(true), &[])
            .await
            .unwrap();
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_hyde_embeds_hypothetical_document() {
        let (_factory, store) = store_with(&[
            ("rust", "rust ownership and borrowing rules"),
            ("cook", "bake the bread at high heat"),
        ])
        .await;
        let llm = ScriptedModel::new("answer").with_rule("hypothetically", "bread baking heat oven");
        let querier = Querier::new(store, Arc::new(llm.clone()));

        let retrieval = querier
            .retrieve("what should I know?", &plain().with_top_k(1).with_hyde(true), &[])
            .await
            .unwrap();
        assert_eq!(retrieval.source_nodes[0].chunk.metadata.document_id, "cook");
        assert!(llm.prompts()[0].starts_with("You are an expert. You are asked: what should I know?"));
    }

    #[tokio::test]
    async fn test_summary_filter_unions_without_duplicates_after_rerank() {
        let (factory, store) = store_with(&[
            ("rust", "rust ownership and borrowing rules"),
            ("rust", "rust lifetimes and borrowing"),
            ("cook", "bake the bread at high heat"),
        ])
        .await;
        let summaries = factory.for_summaries(1).await.unwrap();
        let model = HashingEmbedding::new(64);
        let mut summary = Chunk::new(
            "rust borrowing".to_string(),
            ChunkMetadata {
                document_id: "rust".to_string(),
                ..Default::default()
            },
        );
        summary.embedding = Some(model.embed_query("rust borrowing").await.unwrap());
        summaries.add(vec![summary]).await.unwrap();

        let querier = Querier::new(store, Arc::new(ScriptedModel::new("answer")))
            .with_summary_engine(SummaryQueryEngine::new(summaries));
        let retrieval = querier
            .retrieve("rust borrowing", &plain().with_top_k(3).with_summary_filter(true), &[])
            .await
            .unwrap();

        let mut ids: Vec<&str> = retrieval.source_nodes.iter().map(|n| n.chunk.id.as_str()).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (_factory, store) = store_with(&[("rust", "rust")]).await;
        let querier = Querier::new(store, Arc::new(ScriptedModel::new("answer")));
        assert!(matches!(
            querier.query("   ", &plain(), &[]).await,
            Err(QueryError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_query_forwards_events() {
        let (_factory, store) = store_with(&[("rust", "rust ownership")]).await;
        let querier = Querier::new(store, Arc::new(ScriptedModel::new("streamed")));
        let (tx, mut rx) = mpsc::channel(8);

        let response = querier.stream_query("rust", &plain(), &[], tx).await.unwrap();
        assert_eq!(response.answer, "streamed");
        assert_eq!(rx.recv().await, Some(StreamEvent::Delta("streamed".to_string())));
        assert_eq!(rx.recv().await, Some(StreamEvent::Done));
    }
}
