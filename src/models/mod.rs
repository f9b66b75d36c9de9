mod config;
mod document;
mod query;

pub use config::{
    Config, DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_URL, DEFAULT_LLM_MODEL,
    DEFAULT_LLM_URL, DEFAULT_QDRANT_URL, ENV_ENHANCED_PDF_PROCESSING, ENV_VECTOR_DB_PROVIDER,
    EmbeddingConfig, EmbeddingProvider, IndexingConfig,
    LlmConfig, OutputConfig, QueryDefaults, SummaryConfig, SummaryStorage, VectorDriver,
    VectorStoreConfig,
};
pub use document::{Chunk, ChunkMetadata, ChunksResult, Document, file_extension};
pub use query::{
    ChatTurn, OutputFormat, QueryConfiguration, QueryResponse, RetrievedChunk, VisualizationPoint,
};
