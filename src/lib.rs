pub mod cli;
pub mod error;
pub mod knowledge_base;
pub mod models;
pub mod readers;
pub mod services;
pub mod utils;

pub use cli::{Cli, Commands};
pub use error::AppError;
pub use knowledge_base::{DataSource, KnowledgeEngine};
pub use models::{Config, OutputFormat};
