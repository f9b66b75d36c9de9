//! CLI module for the RAG knowledge engine.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Index documents into knowledge bases, summarize them and ask questions about them.
#[derive(Debug, Parser)]
#[command(name = "ragstudio")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Add, delete or drop documents in a knowledge base
    #[command(subcommand)]
    Index(commands::IndexCommand),

    /// Show document or knowledge base summaries
    #[command(subcommand)]
    Summary(commands::SummaryCommand),

    /// Ask a single question against a knowledge base
    Query(commands::QueryArgs),

    /// Interactive chat with history
    Chat(commands::ChatArgs),

    /// Project stored vectors to 2D
    Visualize(commands::VisualizeArgs),

    /// Show knowledge base and backend status
    Status(commands::StatusArgs),

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query_flags() {
        let cli = Cli::try_parse_from([
            "ragstudio", "-f", "json", "query", "3", "what is rust?", "--top-k", "8", "--hyde",
            "--no-condense",
        ])
        .unwrap();
        assert_eq!(cli.format, Some(OutputFormat::Json));
        let Commands::Query(args) = cli.command else {
            panic!("expected query command");
        };
        assert_eq!(args.kb, 3);
        assert_eq!(args.top_k, Some(8));
        assert!(args.hyde);
        assert!(args.no_condense);
        assert!(!args.no_summary_filter);
    }

    #[test]
    fn test_parse_index_add() {
        let cli = Cli::try_parse_from(["ragstudio", "index", "add", "1", "./docs", "--document-id", "guide"]).unwrap();
        assert!(matches!(cli.command, Commands::Index(commands::IndexCommand::Add { kb: 1, .. })));
    }
}
