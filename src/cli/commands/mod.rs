mod chat;
mod config;
mod delete;
mod index;
mod query;
mod status;
mod summary;
mod visualize;

use anyhow::{Context, Result};

use crate::knowledge_base::KnowledgeEngine;
use crate::models::Config;

pub use chat::ChatArgs;
pub use config::ConfigCommand;
pub use index::IndexCommand;
pub use query::QueryArgs;
pub use status::StatusArgs;
pub use summary::SummaryCommand;
pub use visualize::VisualizeArgs;

pub use chat::handle_chat;
pub use config::handle_config;
pub use index::handle_index;
pub use query::handle_query;
pub use status::handle_status;
pub use summary::handle_summary;
pub use visualize::handle_visualize;

fn load_engine() -> Result<(Config, KnowledgeEngine)> {
    let config = Config::load().context("failed to load configuration")?;
    let engine = KnowledgeEngine::from_config(&config).context("failed to initialize knowledge engine")?;
    Ok((config, engine))
}

/// Ask on stdout and read a yes/no answer from stdin.
fn confirm(prompt: &str) -> Result<bool> {
    println!("{} [y/N]", prompt);
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
