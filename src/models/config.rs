use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::query::OutputFormat;

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11411";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1024;
pub const DEFAULT_LLM_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_RAG_DATABASES_DIR: &str = "databases";

pub const ENV_VECTOR_DB_PROVIDER: &str = "RAGSTUDIO_VECTOR_DB_PROVIDER";
pub const ENV_ENHANCED_PDF_PROCESSING: &str = "RAGSTUDIO_ENHANCED_PDF_PROCESSING";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub summary: SummaryConfig,

    #[serde(default)]
    pub query: QueryDefaults,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ragstudio").join("config.toml"))
    }

    /// Load the config file (defaults when absent), then apply environment overrides.
    pub fn load() -> Result<Self, crate::error::ConfigError> {
        let mut config = Self::default();
        if let Some(path) = Self::config_path()
            && path.exists()
        {
            let content = std::fs::read_to_string(&path)?;
            config = toml::from_str(&content)?;
        }
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), crate::error::ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            crate::error::ConfigError::PathError("could not determine config directory".to_string())
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), crate::error::ConfigError> {
        if let Ok(driver) = std::env::var(ENV_VECTOR_DB_PROVIDER) {
            self.vector_store.driver = driver
                .parse()
                .map_err(crate::error::ConfigError::ValidationError)?;
        }
        if let Ok(flag) = std::env::var(ENV_ENHANCED_PDF_PROCESSING) {
            self.indexing.enhanced_parsing = matches!(flag.to_lowercase().as_str(), "1" | "true");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Remote `/embed` server
    #[default]
    Http,
    /// Local feature-hashing model, no server required
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimension")]
    pub dimension: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_embedding_model() -> String {
    "default".to_string()
}

fn default_dimension() -> u32 {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_timeout() -> u64 {
    120
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            url: default_embedding_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_llm_url() -> String {
    DEFAULT_LLM_URL.to_string()
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout(),
            temperature: None,
        }
    }
}

/// Vector store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    #[default]
    Qdrant,
    #[serde(alias = "postgres", alias = "pgvector")]
    PostgreSQL,
    OpenSearch,
    Memory,
}

impl std::str::FromStr for VectorDriver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(VectorDriver::Qdrant),
            "postgresql" | "postgres" | "pgvector" => Ok(VectorDriver::PostgreSQL),
            "opensearch" => Ok(VectorDriver::OpenSearch),
            "memory" => Ok(VectorDriver::Memory),
            _ => Err(format!("unknown vector store driver: {}", s)),
        }
    }
}

impl std::fmt::Display for VectorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorDriver::Qdrant => write!(f, "qdrant"),
            VectorDriver::PostgreSQL => write!(f, "postgresql"),
            VectorDriver::OpenSearch => write!(f, "opensearch"),
            VectorDriver::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub driver: VectorDriver,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_pool_max")]
    pub pool_max: u32,

    #[serde(default = "default_pool_acquire_timeout")]
    pub pool_acquire_timeout: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_pool_max() -> u32 {
    10
}

fn default_pool_acquire_timeout() -> u32 {
    30
}

impl VectorStoreConfig {
    /// Table name qualified with the configured schema, if any.
    pub fn qualified_table_name(&self, table: &str) -> String {
        match self.schema {
            Some(ref schema) => format!("{}.{}", schema, table),
            None => table.to_string(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            url: default_qdrant_url(),
            api_key: None,
            pool_max: default_pool_max(),
            pool_acquire_timeout: default_pool_acquire_timeout(),
            schema: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Chunk size in tokens
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Overlap between consecutive chunks, as a percentage of `chunk_size`
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,

    #[serde(default)]
    pub block_secrets: bool,

    #[serde(default)]
    pub anonymize_pii: bool,

    #[serde(default)]
    pub enhanced_parsing: bool,

    /// Document conversion service used when `enhanced_parsing` is on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_url: Option<String>,

    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
        "**/.venv/**".to_string(),
        "**/.DS_Store".to_string(),
    ]
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_chunk_size() -> u32 {
    512
}

fn default_chunk_overlap() -> u32 {
    10
}

fn default_embed_batch_size() -> usize {
    100
}

fn default_max_concurrent_batches() -> usize {
    20
}

fn default_write_batch_size() -> usize {
    1000
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: default_exclude_patterns(),
            max_file_size: default_max_file_size(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            block_secrets: false,
            anonymize_pii: false,
            enhanced_parsing: false,
            layout_url: None,
            embed_batch_size: default_embed_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            write_batch_size: default_write_batch_size(),
        }
    }
}

/// Where summary stores are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStorage {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub storage: SummaryStorage,

    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<String>,

    #[serde(default)]
    pub s3_prefix: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_endpoint: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_local_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("ragstudio").join(DEFAULT_RAG_DATABASES_DIR))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RAG_DATABASES_DIR))
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: SummaryStorage::default(),
            local_dir: default_local_dir(),
            s3_bucket: None,
            s3_prefix: String::new(),
            s3_region: default_s3_region(),
            s3_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryDefaults {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_true")]
    pub use_question_condensing: bool,

    #[serde(default)]
    pub use_hyde: bool,

    #[serde(default = "default_true")]
    pub use_summary_filter: bool,

    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_url: Option<String>,
}

fn default_top_k() -> usize {
    5
}

fn default_history_turns() -> usize {
    10
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            use_question_condensing: true,
            use_hyde: false,
            use_summary_filter: true,
            history_turns: default_history_turns(),
            rerank_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub default_format: OutputFormat,
}
