//! Query-related models: configuration, chat history and results.

use serde::{Deserialize, Serialize};

use super::config::QueryDefaults;
use super::document::Chunk;

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
    /// Documentation-friendly Markdown format
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// Per-query retrieval options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfiguration {
    /// Number of chunks to retrieve and keep after reranking
    pub top_k: usize,

    /// Chat model override; the configured model is used when absent
    pub model_name: Option<String>,

    /// Reranking model; a score sort is used when absent
    pub rerank_model_name: Option<String>,

    pub use_question_condensing: bool,

    pub use_hyde: bool,

    pub use_summary_filter: bool,

    /// Answer from the language model alone, without retrieval
    pub exclude_knowledge_base: bool,
}

impl Default for QueryConfiguration {
    fn default() -> Self {
        Self::from_defaults(&QueryDefaults::default())
    }
}

impl QueryConfiguration {
    pub fn from_defaults(defaults: &QueryDefaults) -> Self {
        Self {
            top_k: defaults.top_k,
            model_name: None,
            rerank_model_name: None,
            use_question_condensing: defaults.use_question_condensing,
            use_hyde: defaults.use_hyde,
            use_summary_filter: defaults.use_summary_filter,
            exclude_knowledge_base: false,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_hyde(mut self, enabled: bool) -> Self {
        self.use_hyde = enabled;
        self
    }

    pub fn with_question_condensing(mut self, enabled: bool) -> Self {
        self.use_question_condensing = enabled;
        self
    }

    pub fn with_summary_filter(mut self, enabled: bool) -> Self {
        self.use_summary_filter = enabled;
        self
    }

    pub fn with_rerank_model(mut self, model: impl Into<String>) -> Self {
        self.rerank_model_name = Some(model.into());
        self
    }

    pub fn excluding_knowledge_base(mut self) -> Self {
        self.exclude_knowledge_base = true;
        self
    }
}

/// One exchange of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub user: String,
    pub assistant: String,
}

impl ChatTurn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

/// A chunk returned from retrieval with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Answer plus the context it was grounded on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    /// Standalone rewrite of the question, when it differs from the input
    pub condensed_question: Option<String>,
    pub source_nodes: Vec<RetrievedChunk>,
}

/// A stored vector projected to 2D, labelled with its source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationPoint {
    pub x: f32,
    pub y: f32,
    pub label: String,
}
