use anyhow::Result;
use clap::Subcommand;

use super::load_engine;
use crate::cli::output::{SummaryView, get_formatter};
use crate::models::OutputFormat;

#[derive(Debug, Subcommand)]
pub enum SummaryCommand {
    /// Show a document summary, or the knowledge base summary when no document is given
    Show {
        kb: i64,

        document_id: Option<String>,
    },
}

pub async fn handle_summary(cmd: SummaryCommand, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);
    let (_config, engine) = load_engine()?;

    match cmd {
        SummaryCommand::Show { kb, document_id } => {
            if !engine.summarization_enabled() {
                eprintln!("Hint: summarization is disabled ([summary] enabled = false).");
            }
            let source = engine.data_source(kb).await?;
            let summary = match document_id {
                Some(ref id) => source.get_summary(id).await?,
                None => source.get_full_summary().await?,
            };
            print!(
                "{}",
                formatter.format_summary(&SummaryView {
                    knowledge_base_id: kb,
                    document_id,
                    summary,
                })
            );
        }
    }
    Ok(())
}
