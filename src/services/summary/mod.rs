//! Per-document and per-knowledge-base summaries.
//!
//! Each knowledge base keeps a store of document summaries (`doc_summary_index_{kb}`),
//! and the summaries are also embedded into `summary_index_{kb}` so queries can be
//! narrowed to the most relevant documents. A single global store
//! (`doc_summary_index_global`) holds one executive summary per knowledge base, rebuilt
//! from the per-document summaries whenever a document is added or removed.
//!
//! Persistence is not transactional, so every mutation runs under one process-wide lock
//! held from the first read to the last write.

mod persistence;
mod s3;
mod store;

pub use persistence::{LocalPersistence, SummaryPersistence, create_persistence};
pub use s3::{AwsCredentials, S3Persistence};
pub use store::{
    DOCSTORE_FILE, DocumentSummary, GLOBAL_STORE, GlobalSummaries, GlobalSummaryEntry,
    KnowledgeBaseSummaries, docstore_key, kb_store_name,
};

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{LlmError, SummaryError};
use crate::models::{Chunk, ChunkMetadata, Document, RetrievedChunk};
use crate::services::{LanguageModel, VectorQuery, VectorStore};
use store::{load_store, save_store};

pub const SUMMARY_PROMPT: &str = "Summarize the contents into less than 100 words.";

pub const GLOBAL_SUMMARY_PROMPT: &str = "I have summarized a list of documents that may or may not be related to each other. \
Please provide an overview of the document corpus as an executive summary. \
Do not start with \"Here is...\". The summary should be concise and not be frivolous";

/// Characters of context packed into one summarization request.
pub const DEFAULT_CONTEXT_CHARS: usize = 12_000;

/// Summarization requests in flight at once for a single level of the tree.
pub const MAX_CONCURRENT_SUMMARIES: usize = 4;

static SUMMARY_WRITE_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Tree summarization: texts are packed into context-sized groups, each group is
/// summarized, and the partial summaries are summarized again until one remains.
#[derive(Clone)]
pub struct Summarizer {
    llm: Arc<dyn LanguageModel>,
    context_chars: usize,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            context_chars: DEFAULT_CONTEXT_CHARS,
        }
    }

    pub fn with_context_chars(mut self, context_chars: usize) -> Self {
        self.context_chars = context_chars.max(1);
        self
    }

    pub async fn summarize(&self, texts: &[String], query: &str) -> Result<String, LlmError> {
        let mut level: Vec<String> = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect();
        if level.is_empty() {
            return Ok(String::new());
        }

        loop {
            let groups = self.pack(&level);
            debug!(texts = level.len(), groups = groups.len(), "summarizing level");
            let summaries = stream::iter(groups.iter().map(|group| self.summarize_group(group, query)))
                .buffered(MAX_CONCURRENT_SUMMARIES)
                .collect::<Vec<Result<String, LlmError>>>()
                .await
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            if summaries.len() == 1 {
                return Ok(summaries.into_iter().next().unwrap_or_default());
            }
            level = summaries;
        }
    }

    /// Every group holds at least two texts when more than one is left, so each level shrinks.
    fn pack<'a>(&self, texts: &'a [String]) -> Vec<Vec<&'a str>> {
        let mut groups: Vec<Vec<&str>> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0;

        for text in texts {
            if current.len() >= 2 && current_len + text.len() > self.context_chars {
                groups.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current_len += text.len();
            current.push(text);
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    async fn summarize_group(&self, group: &[&str], query: &str) -> Result<String, LlmError> {
        let prompt = format!(
            "Context information from multiple sources is below.\n\
             ---------------------\n\
             {}\n\
             ---------------------\n\
             Given the information from multiple sources and not prior knowledge, answer the query.\n\
             Query: {}\n\
             Answer: ",
            group.join("\n\n"),
            query
        );
        Ok(self.llm.complete(&prompt).await?.trim().to_string())
    }
}

/// Maps a query to the documents whose summaries are closest to it.
#[derive(Clone)]
pub struct SummaryQueryEngine {
    store: Arc<dyn VectorStore>,
    similarity_top_k: usize,
}

impl SummaryQueryEngine {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            similarity_top_k: 1,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.similarity_top_k = top_k.max(1);
        self
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>, SummaryError> {
        if !self.store.exists().await? {
            return Ok(Vec::new());
        }
        let embedding = self.store.embedding_model().embed_query(query).await?;
        Ok(self
            .store
            .search(&VectorQuery::new(embedding, self.similarity_top_k))
            .await?)
    }

    /// Distinct document ids of the retrieved summaries, best match first.
    pub async fn retrieve_document_ids(&self, query: &str) -> Result<Vec<String>, SummaryError> {
        let mut ids: Vec<String> = Vec::new();
        for hit in self.retrieve(query).await? {
            let id = hit.chunk.metadata.document_id;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

/// Maintains a knowledge base's document summaries and its entry in the global store.
pub struct SummaryIndexer {
    knowledge_base_id: i64,
    summarizer: Summarizer,
    persistence: Arc<dyn SummaryPersistence>,
    vectors: Arc<dyn VectorStore>,
}

impl SummaryIndexer {
    /// `vectors` is the knowledge base's summaries collection.
    pub fn new(
        knowledge_base_id: i64,
        llm: Arc<dyn LanguageModel>,
        persistence: Arc<dyn SummaryPersistence>,
        vectors: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            knowledge_base_id,
            summarizer: Summarizer::new(llm),
            persistence,
            vectors,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn knowledge_base_id(&self) -> i64 {
        self.knowledge_base_id
    }

    fn store_name(&self) -> String {
        kb_store_name(self.knowledge_base_id)
    }

    /// Summarize a document from its chunks and replace any earlier summary.
    pub async fn index_file(&self, document: &Document, chunks: &[Chunk]) -> Result<(), SummaryError> {
        if chunks.is_empty() {
            warn!(document_id = %document.document_id, "no chunks to summarize");
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let summary = self.summarizer.summarize(&texts, SUMMARY_PROMPT).await?;
        let summary_chunk = self.embed_summary(document, &summary).await?;

        let _guard = SUMMARY_WRITE_LOCK.lock().await;
        let store_name = self.store_name();
        let mut store = self.load_kb_store().await?;
        store.documents.insert(
            document.document_id.clone(),
            DocumentSummary {
                file_name: document.file_name.clone(),
                summary,
                updated_at: Utc::now(),
            },
        );
        save_store(self.persistence.as_ref(), &store_name, &store).await?;

        self.vectors.delete_document(&document.document_id).await?;
        self.vectors.add(vec![summary_chunk]).await?;

        self.reconcile_global(&store, None).await?;
        info!(
            kb_id = self.knowledge_base_id,
            document_id = %document.document_id,
            "document summary stored"
        );
        Ok(())
    }

    pub async fn get_summary(&self, document_id: &str) -> Result<Option<String>, SummaryError> {
        let _guard = SUMMARY_WRITE_LOCK.lock().await;
        let store = self.load_kb_store().await?;
        Ok(store.summary(document_id).map(str::to_string))
    }

    /// Executive summary of the whole knowledge base.
    pub async fn get_full_summary(&self) -> Result<Option<String>, SummaryError> {
        let _guard = SUMMARY_WRITE_LOCK.lock().await;
        let global: GlobalSummaries = load_store(self.persistence.as_ref(), GLOBAL_STORE).await?;
        Ok(global
            .find(self.knowledge_base_id)
            .map(|entry| entry.summary.clone()))
    }

    /// Document ids with a stored summary.
    pub async fn summarized_documents(&self) -> Result<Vec<String>, SummaryError> {
        let _guard = SUMMARY_WRITE_LOCK.lock().await;
        let store = self.load_kb_store().await?;
        Ok(store.documents.into_keys().collect())
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<(), SummaryError> {
        let _guard = SUMMARY_WRITE_LOCK.lock().await;
        let mut store = self.load_kb_store().await?;
        self.reconcile_global(&store, Some(document_id)).await?;

        if store.documents.remove(document_id).is_some() {
            save_store(self.persistence.as_ref(), &self.store_name(), &store).await?;
        }
        self.vectors.delete_document(document_id).await?;
        debug!(kb_id = self.knowledge_base_id, document_id, "document summary deleted");
        Ok(())
    }

    /// Drop the summaries collection and store, then the knowledge base's global entry.
    pub async fn delete_data_source(&self) -> Result<(), SummaryError> {
        let _guard = SUMMARY_WRITE_LOCK.lock().await;
        self.vectors.delete().await?;
        self.persistence.delete_tree(&self.store_name()).await?;

        let mut global: GlobalSummaries = match load_store(self.persistence.as_ref(), GLOBAL_STORE).await {
            Ok(global) => global,
            Err(e) => {
                debug!(kb_id = self.knowledge_base_id, error = %e, "global summary store unavailable");
                return Ok(());
            }
        };
        if global.remove(self.knowledge_base_id)
            && let Err(e) = save_store(self.persistence.as_ref(), GLOBAL_STORE, &global).await
        {
            debug!(kb_id = self.knowledge_base_id, error = %e, "failed to remove global summary");
        }
        info!(kb_id = self.knowledge_base_id, "summary index deleted");
        Ok(())
    }

    pub fn as_query_engine(&self) -> SummaryQueryEngine {
        SummaryQueryEngine::new(self.vectors.clone())
    }

    async fn load_kb_store(&self) -> Result<KnowledgeBaseSummaries, SummaryError> {
        let mut store: KnowledgeBaseSummaries =
            load_store(self.persistence.as_ref(), &self.store_name()).await?;
        store.knowledge_base_id = self.knowledge_base_id;
        Ok(store)
    }

    async fn embed_summary(&self, document: &Document, summary: &str) -> Result<Chunk, SummaryError> {
        let metadata = ChunkMetadata {
            file_name: document.file_name.clone(),
            document_id: document.document_id.clone(),
            knowledge_base_id: self.knowledge_base_id,
            chunk_number: 0,
            chunk_format: "summary".to_string(),
            ..Default::default()
        };
        let mut chunk = Chunk::new(summary.to_string(), metadata);
        let embedding = self
            .vectors
            .embedding_model()
            .embed_batch(vec![summary.to_string()])
            .await?
            .into_iter()
            .next();
        chunk.embedding = embedding;
        Ok(chunk)
    }

    /// Rebuild this knowledge base's global entry from every document in `store`,
    /// leaving out `deleted`.
    ///
    /// The old entry's document list is never consulted, so a reset global store or an
    /// earlier failed rebuild is repaired by the next one. The stale entry is removed
    /// before the rebuilt one is inserted; no entry remains once no documents do.
    /// Must be called with `SUMMARY_WRITE_LOCK` held.
    async fn reconcile_global(
        &self,
        store: &KnowledgeBaseSummaries,
        deleted: Option<&str>,
    ) -> Result<(), SummaryError> {
        let mut global: GlobalSummaries = load_store(self.persistence.as_ref(), GLOBAL_STORE).await?;

        let (document_ids, summaries): (Vec<String>, Vec<String>) = store
            .documents
            .iter()
            .filter(|(id, _)| deleted.is_none_or(|deleted| deleted != id.as_str()))
            .map(|(id, document)| (id.clone(), document.summary.clone()))
            .unzip();

        global.remove(self.knowledge_base_id);
        if !summaries.is_empty() {
            let summary = self
                .summarizer
                .summarize(&summaries, GLOBAL_SUMMARY_PROMPT)
                .await?;
            global.insert(GlobalSummaryEntry {
                knowledge_base_id: self.knowledge_base_id,
                document_ids,
                summary,
            });
        }
        save_store(self.persistence.as_ref(), GLOBAL_STORE, &global).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::ScriptedModel;
    use crate::services::{ChatMessage, HashingEmbedding, VectorStoreFactory};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Sleeps on every call and records the peak number of calls in flight.
    #[derive(Default)]
    struct SlowModel {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        prompts: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
            self.prompts.lock().unwrap().push(last.to_string());
            let delay = if last.contains("alpha") { 40 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let reply = if last.contains("alpha") {
                "FIRST"
            } else if last.contains("gamma") {
                "SECOND"
            } else {
                "overall"
            };
            Ok(reply.to_string())
        }

        fn with_model(&self, _model: &str) -> Arc<dyn LanguageModel> {
            Arc::new(SlowModel::default())
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    async fn indexer(dir: &TempDir, kb: i64, llm: Arc<ScriptedModel>) -> SummaryIndexer {
        let factory = VectorStoreFactory::in_memory(Arc::new(HashingEmbedding::new(32)));
        let vectors = factory.for_summaries(kb).await.unwrap();
        SummaryIndexer::new(kb, llm, Arc::new(LocalPersistence::new(dir.path())), vectors)
    }

    fn chunks(document: &Document, texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                Chunk::new(
                    text.to_string(),
                    ChunkMetadata {
                        document_id: document.document_id.clone(),
                        knowledge_base_id: document.knowledge_base_id,
                        chunk_number: i as u32,
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_tree_summarization_reduces_to_one() {
        let llm = Arc::new(ScriptedModel::new("partial"));
        let summarizer = Summarizer::new(llm.clone()).with_context_chars(10);
        let texts: Vec<String> = (0..7).map(|i| format!("chunk number {}", i)).collect();

        let summary = summarizer.summarize(&texts, SUMMARY_PROMPT).await.unwrap();
        assert_eq!(summary, "partial");
        assert!(llm.call_count() > 1);
        assert!(llm.prompts().iter().all(|p| p.contains(SUMMARY_PROMPT)));
    }

    #[tokio::test]
    async fn test_summarization_fan_out_is_bounded() {
        let llm = Arc::new(SlowModel::default());
        let summarizer = Summarizer::new(llm.clone()).with_context_chars(10);
        let texts: Vec<String> = (0..24).map(|i| format!("text {:02}", i)).collect();

        let summary = summarizer.summarize(&texts, SUMMARY_PROMPT).await.unwrap();
        assert_eq!(summary, "overall");
        assert!(llm.calls.load(Ordering::SeqCst) > MAX_CONCURRENT_SUMMARIES);
        assert_eq!(llm.peak.load(Ordering::SeqCst), MAX_CONCURRENT_SUMMARIES);
    }

    #[tokio::test]
    async fn test_partial_summaries_keep_input_order() {
        let llm = Arc::new(SlowModel::default());
        let summarizer = Summarizer::new(llm.clone()).with_context_chars(10);
        let texts: Vec<String> = ["alpha", "beta", "gamma", "delta"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let summary = summarizer.summarize(&texts, SUMMARY_PROMPT).await.unwrap();
        assert_eq!(summary, "overall");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);

        let prompts = llm.prompts.lock().unwrap();
        let last = prompts.last().unwrap();
        assert!(last.find("FIRST").unwrap() < last.find("SECOND").unwrap());
    }

    #[tokio::test]
    async fn test_summarize_nothing_skips_model() {
        let llm = Arc::new(ScriptedModel::new("unused"));
        let summary = Summarizer::new(llm.clone()).summarize(&[], SUMMARY_PROMPT).await.unwrap();
        assert!(summary.is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_index_then_delete_document() {
        let dir = TempDir::new().unwrap();
        let indexer = indexer(&dir, 11, Arc::new(ScriptedModel::new("a short summary"))).await;
        let document = Document::new("doc-a", 11, Path::new("/tmp/a.txt"));

        assert_eq!(indexer.get_full_summary().await.unwrap(), None);
        indexer
            .index_file(&document, &chunks(&document, &["alpha text", "more alpha"]))
            .await
            .unwrap();

        assert_eq!(indexer.get_summary("doc-a").await.unwrap().as_deref(), Some("a short summary"));
        assert!(indexer.get_full_summary().await.unwrap().is_some());
        assert_eq!(indexer.as_query_engine().retrieve_document_ids("alpha").await.unwrap(), vec!["doc-a"]);

        indexer.delete_document("doc-a").await.unwrap();
        assert_eq!(indexer.get_summary("doc-a").await.unwrap(), None);
        assert_eq!(indexer.get_full_summary().await.unwrap(), None);
        assert!(indexer.as_query_engine().retrieve_document_ids("alpha").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_global_entry_tracks_documents() {
        let dir = TempDir::new().unwrap();
        let indexer = indexer(&dir, 12, Arc::new(ScriptedModel::new("summary"))).await;
        for id in ["one", "two", "one"] {
            let document = Document::new(id, 12, Path::new("/tmp/x.txt"));
            indexer.index_file(&document, &chunks(&document, &["text"])).await.unwrap();
        }

        let global: GlobalSummaries = load_store(&LocalPersistence::new(dir.path()), GLOBAL_STORE)
            .await
            .unwrap();
        assert_eq!(global.entries.len(), 1);
        assert_eq!(global.find(12).unwrap().document_ids, vec!["one", "two"]);

        indexer.delete_document("one").await.unwrap();
        let global: GlobalSummaries = load_store(&LocalPersistence::new(dir.path()), GLOBAL_STORE)
            .await
            .unwrap();
        assert_eq!(global.find(12).unwrap().document_ids, vec!["two"]);
    }

    #[tokio::test]
    async fn test_global_entry_rebuilt_after_corrupt_global_store() {
        let dir = TempDir::new().unwrap();
        let indexer = indexer(&dir, 15, Arc::new(ScriptedModel::new("summary"))).await;

        let a = Document::new("a", 15, Path::new("/tmp/a.txt"));
        indexer.index_file(&a, &chunks(&a, &["first text"])).await.unwrap();

        std::fs::write(dir.path().join(docstore_key(GLOBAL_STORE)), "{not json").unwrap();

        let b = Document::new("b", 15, Path::new("/tmp/b.txt"));
        indexer.index_file(&b, &chunks(&b, &["second text"])).await.unwrap();

        let global: GlobalSummaries = load_store(&LocalPersistence::new(dir.path()), GLOBAL_STORE)
            .await
            .unwrap();
        assert_eq!(global.find(15).unwrap().document_ids, vec!["a", "b"]);
        assert_eq!(indexer.get_full_summary().await.unwrap().as_deref(), Some("summary"));
    }

    #[tokio::test]
    async fn test_empty_chunks_store_nothing() {
        let dir = TempDir::new().unwrap();
        let llm = Arc::new(ScriptedModel::new("summary"));
        let indexer = indexer(&dir, 13, llm.clone()).await;
        let document = Document::new("empty", 13, Path::new("/tmp/e.txt"));

        indexer.index_file(&document, &[]).await.unwrap();
        assert_eq!(indexer.get_summary("empty").await.unwrap(), None);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_data_source_tolerates_absence() {
        let dir = TempDir::new().unwrap();
        let indexer = indexer(&dir, 14, Arc::new(ScriptedModel::new("summary"))).await;
        indexer.delete_data_source().await.unwrap();

        let document = Document::new("doc", 14, Path::new("/tmp/d.txt"));
        indexer.index_file(&document, &chunks(&document, &["text"])).await.unwrap();
        indexer.delete_data_source().await.unwrap();

        assert_eq!(indexer.get_summary("doc").await.unwrap(), None);
        assert_eq!(indexer.get_full_summary().await.unwrap(), None);
        assert!(!dir.path().join(kb_store_name(14)).exists());
    }
}
