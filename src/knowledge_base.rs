//! Knowledge base facade.
//!
//! [`KnowledgeEngine`] holds the collaborators shared by every knowledge base (vector
//! store factory, language model, summary persistence). [`DataSource`] binds them to
//! one knowledge base and exposes indexing, summaries and querying.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{AppError, IndexError, QueryError, SummaryError, VectorStoreError};
use crate::models::{
    Chunk, ChatTurn, Config, Document, IndexingConfig, QueryConfiguration, QueryDefaults,
    QueryResponse, VisualizationPoint,
};
use crate::readers::{DocumentReader, HttpLayoutConverter, LayoutConverter};
use crate::services::summary::{SummaryIndexer, SummaryPersistence, SummaryQueryEngine, create_persistence};
use crate::services::{
    EmbeddingIndexer, IndexReport, LanguageModel, Querier, VectorStore, VectorStoreFactory,
    create_embedding_model, create_language_model,
};

/// Collaborators shared by all knowledge bases.
#[derive(Clone)]
pub struct KnowledgeEngine {
    indexing: IndexingConfig,
    query: QueryDefaults,
    factory: VectorStoreFactory,
    llm: Arc<dyn LanguageModel>,
    persistence: Option<Arc<dyn SummaryPersistence>>,
    layout: Option<Arc<dyn LayoutConverter>>,
}

impl KnowledgeEngine {
    /// Summarization is disabled when `persistence` is `None`.
    pub fn new(
        indexing: IndexingConfig,
        query: QueryDefaults,
        factory: VectorStoreFactory,
        llm: Arc<dyn LanguageModel>,
        persistence: Option<Arc<dyn SummaryPersistence>>,
    ) -> Self {
        Self {
            indexing,
            query,
            factory,
            llm,
            persistence,
            layout: None,
        }
    }

    /// Build every collaborator from configuration.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let embedding = create_embedding_model(&config.embedding)?;
        let llm = create_language_model(&config.llm)?;
        let factory = VectorStoreFactory::new(config.vector_store.clone(), embedding);
        let persistence = if config.summary.enabled {
            Some(create_persistence(&config.summary)?)
        } else {
            None
        };

        let mut engine = Self::new(
            config.indexing.clone(),
            config.query.clone(),
            factory,
            llm,
            persistence,
        );
        if config.indexing.enhanced_parsing
            && let Some(url) = &config.indexing.layout_url
        {
            let converter = HttpLayoutConverter::new(url, config.llm.timeout_secs)?;
            engine = engine.with_layout_converter(Arc::new(converter));
        }
        Ok(engine)
    }

    pub fn with_layout_converter(mut self, converter: Arc<dyn LayoutConverter>) -> Self {
        self.layout = Some(converter);
        self
    }

    pub fn factory(&self) -> &VectorStoreFactory {
        &self.factory
    }

    pub fn llm(&self) -> Arc<dyn LanguageModel> {
        self.llm.clone()
    }

    pub fn query_defaults(&self) -> &QueryDefaults {
        &self.query
    }

    pub fn summarization_enabled(&self) -> bool {
        self.persistence.is_some()
    }

    pub fn summary_location(&self) -> Option<String> {
        self.persistence.as_ref().map(|p| p.location())
    }

    pub async fn data_source(&self, knowledge_base_id: i64) -> Result<DataSource, VectorStoreError> {
        let chunks = self.factory.for_chunks(knowledge_base_id).await?;

        let mut reader = DocumentReader::new(&self.indexing);
        if let Some(layout) = &self.layout {
            reader = reader.with_layout_converter(layout.clone());
        }
        let indexer = EmbeddingIndexer::new(reader, chunks.clone(), &self.indexing);

        let summary = match &self.persistence {
            Some(persistence) => Some(SummaryIndexer::new(
                knowledge_base_id,
                self.llm.clone(),
                persistence.clone(),
                self.factory.for_summaries(knowledge_base_id).await?,
            )),
            None => None,
        };

        Ok(DataSource {
            knowledge_base_id,
            chunks,
            indexer,
            summary,
            llm: self.llm.clone(),
            rerank_url: self.query.rerank_url.clone(),
            history_turns: self.query.history_turns,
        })
    }
}

/// One knowledge base: its chunks collection plus its summary index.
pub struct DataSource {
    knowledge_base_id: i64,
    chunks: Arc<dyn VectorStore>,
    indexer: EmbeddingIndexer,
    summary: Option<SummaryIndexer>,
    llm: Arc<dyn LanguageModel>,
    rerank_url: Option<String>,
    history_turns: usize,
}

impl DataSource {
    pub fn knowledge_base_id(&self) -> i64 {
        self.knowledge_base_id
    }

    pub fn chunks(&self) -> &Arc<dyn VectorStore> {
        &self.chunks
    }

    pub fn summary_indexer(&self) -> Option<&SummaryIndexer> {
        self.summary.as_ref()
    }

    /// Stored chunk count, `None` when nothing was ever indexed.
    pub async fn size(&self) -> Result<Option<u64>, VectorStoreError> {
        self.chunks.size().await
    }

    /// Index a document's chunks and summary, replacing earlier versions of both.
    ///
    /// The file is read once and the same chunks feed both indexes. A document that
    /// yields no chunks (including one blocked for secrets) loses its earlier summary.
    pub async fn index_file(&self, document: &Document) -> Result<IndexReport, IndexError> {
        let result = self.indexer.reader().load_chunks(document).await?;
        let chunks = result.chunks().to_vec();
        let report = self.indexer.index_chunks(document, result).await?;

        if let Some(summary) = &self.summary {
            if chunks.is_empty() {
                summary.delete_document(&document.document_id).await?;
            } else {
                summary.index_file(document, &chunks).await?;
            }
        }
        Ok(report)
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<(), IndexError> {
        self.chunks.delete_document(document_id).await?;
        if let Some(summary) = &self.summary {
            summary.delete_document(document_id).await?;
        }
        info!(kb_id = self.knowledge_base_id, document_id, "document deleted");
        Ok(())
    }

    /// Drop every chunk and summary of the knowledge base.
    pub async fn delete_data_source(&self) -> Result<(), IndexError> {
        self.chunks.delete().await?;
        if let Some(summary) = &self.summary {
            summary.delete_data_source().await?;
        }
        info!(kb_id = self.knowledge_base_id, "knowledge base deleted");
        Ok(())
    }

    pub async fn get_summary(&self, document_id: &str) -> Result<Option<String>, SummaryError> {
        match &self.summary {
            Some(summary) => summary.get_summary(document_id).await,
            None => Ok(None),
        }
    }

    pub async fn get_full_summary(&self) -> Result<Option<String>, SummaryError> {
        match &self.summary {
            Some(summary) => summary.get_full_summary().await,
            None => Ok(None),
        }
    }

    /// `None` when summarization is disabled.
    pub fn as_query_engine(&self) -> Option<SummaryQueryEngine> {
        self.summary.as_ref().map(SummaryIndexer::as_query_engine)
    }

    pub fn querier(&self) -> Querier {
        let querier = Querier::new(self.chunks.clone(), self.llm.clone())
            .with_rerank_url(self.rerank_url.clone())
            .with_history_turns(self.history_turns);
        match self.as_query_engine() {
            Some(engine) => querier.with_summary_engine(engine),
            None => querier,
        }
    }

    pub async fn query(
        &self,
        query: &str,
        configuration: &QueryConfiguration,
        history: &[ChatTurn],
    ) -> Result<QueryResponse, QueryError> {
        debug!(kb_id = self.knowledge_base_id, top_k = configuration.top_k, "query");
        self.querier().query(query, configuration, history).await
    }

    pub async fn visualize(&self, query: Option<&str>) -> Result<Vec<VisualizationPoint>, VectorStoreError> {
        self.chunks.visualize(query).await
    }

    /// Stored chunks of a document in order; not-found when there are none.
    pub async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, IndexError> {
        let chunks = self.chunks.get_document_chunks(document_id).await?;
        if chunks.is_empty() {
            return Err(IndexError::DocumentNotFound(document_id.to_string()));
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::HashingEmbedding;
    use crate::services::summary::LocalPersistence;
    use crate::services::testing::ScriptedModel;
    use std::path::Path;
    use tempfile::TempDir;

    fn engine(dir: &TempDir, summaries: bool) -> KnowledgeEngine {
        let factory = VectorStoreFactory::in_memory(Arc::new(HashingEmbedding::new(32)));
        let persistence = summaries.then(|| {
            Arc::new(LocalPersistence::new(&dir.path().join("summaries"))) as Arc<dyn SummaryPersistence>
        });
        KnowledgeEngine::new(
            IndexingConfig::default(),
            QueryDefaults::default(),
            factory,
            Arc::new(ScriptedModel::new("a brief summary")),
            persistence,
        )
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> Document {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        Document::new(name, 1, &path)
    }

    #[tokio::test]
    async fn test_index_feeds_both_indexes() {
        let dir = TempDir::new().unwrap();
        let source = engine(&dir, true).data_source(1).await.unwrap();
        let document = write(&dir, "notes.txt", "The quick brown fox jumps over the lazy dog.");

        let report = source.index_file(&document).await.unwrap();
        assert_eq!(report.chunks, 1);
        assert_eq!(source.size().await.unwrap(), Some(1));
        assert_eq!(source.get_summary("notes.txt").await.unwrap().as_deref(), Some("a brief summary"));
        assert!(source.get_full_summary().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_summaries_disabled() {
        let dir = TempDir::new().unwrap();
        let source = engine(&dir, false).data_source(2).await.unwrap();
        let document = write(&dir, "notes.txt", "Some text worth indexing.");

        source.index_file(&document).await.unwrap();
        assert!(source.as_query_engine().is_none());
        assert_eq!(source.get_summary("notes.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_document_chunks_not_found_after_delete() {
        let dir = TempDir::new().unwrap();
        let source = engine(&dir, true).data_source(3).await.unwrap();
        let document = write(&dir, "notes.txt", "Some text worth indexing.");
        source.index_file(&document).await.unwrap();
        assert_eq!(source.document_chunks("notes.txt").await.unwrap().len(), 1);

        source.delete_document("notes.txt").await.unwrap();
        assert!(matches!(
            source.document_chunks("notes.txt").await,
            Err(IndexError::DocumentNotFound(_))
        ));
        assert_eq!(source.get_summary("notes.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unsupported_format_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let source = engine(&dir, true).data_source(4).await.unwrap();
        let document = Document::new("bin", 4, Path::new("/tmp/program.exe"));
        assert!(matches!(
            source.index_file(&document).await,
            Err(IndexError::Reader(crate::error::ReaderError::UnsupportedFormat(_)))
        ));
    }
}
