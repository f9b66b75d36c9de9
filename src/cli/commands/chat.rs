use std::io::Write;

use anyhow::Result;
use clap::Args;
use console::Style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::load_engine;
use crate::cli::output::get_formatter;
use crate::error::QueryError;
use crate::models::{ChatTurn, OutputFormat, QueryConfiguration};
use crate::services::{ChatService, StreamEvent};

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Knowledge bases to chat over (none for plain chat)
    pub kb: Vec<i64>,

    /// Number of chunks to retrieve
    #[arg(long, short = 'k')]
    pub top_k: Option<usize>,

    /// Embed a hypothetical answer instead of the question
    #[arg(long)]
    pub hyde: bool,

    /// Answer without the knowledge base
    #[arg(long)]
    pub no_kb: bool,

    /// Chat model override
    #[arg(long, short = 'm')]
    pub model: Option<String>,
}

impl ChatArgs {
    fn configuration(&self, configuration: QueryConfiguration) -> QueryConfiguration {
        let mut configuration = match self.top_k {
            Some(top_k) => configuration.with_top_k(top_k),
            None => configuration,
        };
        if self.hyde {
            configuration = configuration.with_hyde(true);
        }
        if self.no_kb {
            configuration = configuration.excluding_knowledge_base();
        }
        configuration.model_name = self.model.clone();
        configuration
    }
}

pub async fn handle_chat(args: ChatArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);
    let (_config, engine) = load_engine()?;
    let configuration = args.configuration(QueryConfiguration::from_defaults(engine.query_defaults()));
    let service = ChatService::new(engine);

    let prompt_style = Style::new().cyan().bold();
    let dim = Style::new().dim();
    println!("{}", dim.apply_to("Type a question, or 'exit' to quit."));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut history: Vec<ChatTurn> = Vec::new();

    loop {
        print!("{} ", prompt_style.apply_to(">"));
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "exit" | "quit") {
            break;
        }

        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Delta(text) => {
                        print!("{}", text);
                        let _ = std::io::stdout().flush();
                    }
                    StreamEvent::Done => break,
                }
            }
            println!();
        });

        let result = service
            .stream_chat(&args.kb, query, &configuration, &history, tx)
            .await;
        let _ = printer.await;

        match result {
            Ok(response) => {
                if verbose {
                    if let Some(ref condensed) = response.condensed_question {
                        println!("{}", dim.apply_to(format!("(condensed: {})", condensed)));
                    }
                    for node in &response.source_nodes {
                        println!(
                            "{}",
                            dim.apply_to(format!(
                                "  [{:.3}] {} #{}",
                                node.score, node.chunk.metadata.file_name, node.chunk.metadata.chunk_number
                            ))
                        );
                    }
                }
                history.push(ChatTurn::new(query, response.answer));
            }
            Err(QueryError::TooManyDataSources(n)) => {
                eprintln!("{}", formatter.format_error(&format!("chat supports one knowledge base, got {}", n)));
                break;
            }
            Err(e) => eprintln!("{}", formatter.format_error(&e.to_string())),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryDefaults;

    #[test]
    fn test_no_kb_excludes_knowledge_base() {
        let args = ChatArgs {
            kb: vec![1],
            top_k: None,
            hyde: false,
            no_kb: true,
            model: None,
        };
        let configuration = args.configuration(QueryConfiguration::from_defaults(&QueryDefaults::default()));
        assert!(configuration.exclude_knowledge_base);
        assert_eq!(configuration.top_k, QueryDefaults::default().top_k);
    }
}
