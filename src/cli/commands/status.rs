use anyhow::Result;
use clap::Args;

use super::load_engine;
use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{OutputFormat, VectorDriver};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Knowledge base id
    #[arg(default_value_t = 1)]
    pub kb: i64,
}

pub async fn handle_status(args: StatusArgs, format: OutputFormat, _verbose: bool) -> Result<()> {
    let (config, engine) = load_engine()?;
    let formatter = get_formatter(format);

    let (vector_store_connected, chunks, summaries, has_full_summary) = match engine.data_source(args.kb).await {
        Ok(source) => match source.size().await {
            Ok(chunks) => {
                let summaries = match source.summary_indexer() {
                    Some(indexer) => indexer.summarized_documents().await.ok().map(|d| d.len() as u64),
                    None => None,
                };
                let has_full_summary = source.get_full_summary().await.ok().flatten().is_some();
                (true, chunks, summaries, has_full_summary)
            }
            Err(_) => (false, None, None, false),
        },
        Err(_) => (false, None, None, false),
    };

    let status = StatusInfo {
        knowledge_base_id: args.kb,
        vector_store_driver: config.vector_store.driver.to_string(),
        vector_store_url: config.vector_store.url.clone(),
        vector_store_connected,
        embedding_model: config.embedding.model.clone(),
        llm_model: config.llm.model.clone(),
        chunks,
        summaries,
        summary_location: engine.summary_location(),
        has_full_summary,
    };

    print!("{}", formatter.format_status(&status));

    if !vector_store_connected {
        eprintln!();
        match config.vector_store.driver {
            VectorDriver::Qdrant => {
                eprintln!("Warning: Qdrant not running. Start with: docker-compose up -d qdrant");
            }
            VectorDriver::PostgreSQL => {
                eprintln!("Warning: PostgreSQL not accessible. Check connection settings.");
            }
            VectorDriver::OpenSearch => {
                eprintln!("Warning: OpenSearch not accessible. Check vector_store.url.");
            }
            VectorDriver::Memory => {}
        }
    } else if chunks.is_none() {
        eprintln!();
        eprintln!(
            "Hint: knowledge base {} is empty. Index documents with: ragstudio index add {} <path>",
            args.kb, args.kb
        );
    }

    Ok(())
}
