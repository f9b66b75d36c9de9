use anyhow::Result;
use clap::Args;

use super::load_engine;
use crate::cli::output::get_formatter;
use crate::models::OutputFormat;

#[derive(Debug, Args)]
pub struct VisualizeArgs {
    pub kb: i64,

    /// Also project this query, labelled USER_QUERY
    #[arg(long, short = 'q')]
    pub query: Option<String>,
}

pub async fn handle_visualize(args: VisualizeArgs, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);
    let (_config, engine) = load_engine()?;

    let points = engine
        .data_source(args.kb)
        .await?
        .visualize(args.query.as_deref())
        .await?;

    if points.is_empty() {
        println!(
            "{}",
            formatter.format_message("Not enough vectors to project; index at least three chunks.")
        );
        return Ok(());
    }

    print!("{}", formatter.format_points(&points));
    Ok(())
}
