//! Error types for the RAG knowledge engine.

use thiserror::Error;

/// Errors raised while turning a file into chunks.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("unsupported file extension: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse {format} document: {message}")]
    Parse { format: String, message: String },

    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("layout conversion failed: {0}")]
    LayoutConversion(String),
}

impl ReaderError {
    pub fn parse(format: &str, message: impl std::fmt::Display) -> Self {
        ReaderError::Parse {
            format: format.to_string(),
            message: message.to_string(),
        }
    }
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding timeout")]
    Timeout,
}

/// Errors returned by the language model provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("failed to reach language model: {0}")]
    ConnectionError(String),

    #[error("invalid language model response: {0}")]
    InvalidResponse(String),

    #[error("language model timeout")]
    Timeout,

    #[error("missing API key: set {0}")]
    MissingApiKey(String),
}

impl LlmError {
    /// HTTP status to surface to callers, when the provider supplied one.
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Provider { status, .. } => Some(*status),
            LlmError::Timeout => Some(504),
            _ => None,
        }
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("delete error: {0}")]
    DeleteError(String),

    #[error("PostgreSQL error: {0}")]
    PostgresError(String),

    #[error("pgvector extension error: {0}")]
    PgVectorExtensionError(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Errors related to summary persistence backends.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store returned HTTP {status}: {message}")]
    ObjectStore { status: u16, message: String },

    #[error("object store request failed: {0}")]
    Request(String),

    #[error("missing credentials: {0}")]
    Credentials(String),
}

/// Errors related to the summary index.
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("language model error: {0}")]
    Llm(#[from] LlmError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("corrupt summary store {store}: {message}")]
    CorruptState { store: String, message: String },
}

/// Errors related to indexing operations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("embedding error: {0}")]
    EmbeddingError(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStoreError(#[from] VectorStoreError),

    #[error("summary error: {0}")]
    Summary(#[from] SummaryError),

    #[error("embedding count mismatch: expected {expected}, got {actual}")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("document not found: {0}")]
    DocumentNotFound(String),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Errors related to query and chat operations.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no knowledge available for this query")]
    NoKnowledgeAvailable,

    #[error("only one knowledge base can be queried at a time (got {0})")]
    TooManyDataSources(usize),

    #[error("embedding error: {0}")]
    EmbeddingError(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStoreError(#[from] VectorStoreError),

    #[error("language model error: {0}")]
    Llm(#[from] LlmError),

    #[error("rerank error: {0}")]
    Rerank(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("summary error: {0}")]
    Summary(#[from] SummaryError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("language model error: {0}")]
    Llm(#[from] LlmError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("{0}")]
    Other(String),
}
