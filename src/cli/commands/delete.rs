use anyhow::Result;

use super::{confirm, load_engine};
use crate::cli::output::get_formatter;
use crate::models::OutputFormat;

pub(super) async fn handle_delete(kb: i64, document_id: &str, force: bool, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    if !force
        && !confirm(&format!(
            "This will delete document '{}' from knowledge base {}. Continue?",
            document_id, kb
        ))?
    {
        println!("{}", formatter.format_message("Cancelled."));
        return Ok(());
    }

    let (_config, engine) = load_engine()?;
    engine.data_source(kb).await?.delete_document(document_id).await?;

    println!(
        "{}",
        formatter.format_message(&format!("Deleted document '{}' from knowledge base {}", document_id, kb))
    );
    Ok(())
}

pub(super) async fn handle_drop(kb: i64, force: bool, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    if !force
        && !confirm(&format!(
            "This will delete ALL documents and summaries of knowledge base {}. Continue?",
            kb
        ))?
    {
        println!("{}", formatter.format_message("Cancelled."));
        return Ok(());
    }

    let (_config, engine) = load_engine()?;
    engine.data_source(kb).await?.delete_data_source().await?;

    println!(
        "{}",
        formatter.format_message(&format!("Knowledge base {} has been deleted.", kb))
    );
    Ok(())
}
