mod chat;
mod chunker;
mod embedding;
mod indexer;
mod llm;
mod querier;
pub mod reranker;
pub mod summary;
#[cfg(test)]
pub(crate) mod testing;
pub mod vector_store;

pub use chat::{ChatService, DIRECT_CHAT_HISTORY_TURNS};
pub use chunker::{SentenceSplitter, TextSpan};
pub use embedding::{
    EmbeddingClient, EmbeddingModel, HashingEmbedding, InstructionType, create_embedding_model,
};
pub use indexer::{EmbeddingIndexer, IndexReport};
pub use llm::{
    ChatMessage, LanguageModel, OpenAiCompatible, Role, StreamEvent, create_language_model,
    parse_http_error,
};
pub use querier::{CONDENSE_QUESTION_TEMPLATE, HYDE_TEMPLATE, Querier, Retrieval};
pub use reranker::{ModelReranker, Reranker, SimpleReranker, create_reranker};
pub use summary::{SummaryIndexer, SummaryQueryEngine, Summarizer};
pub use vector_store::{VectorQuery, VectorStore, VectorStoreFactory};
