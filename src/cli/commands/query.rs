use anyhow::Result;
use clap::Args;

use super::load_engine;
use crate::cli::output::get_formatter;
use crate::error::QueryError;
use crate::models::{OutputFormat, QueryConfiguration, QueryDefaults};

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Knowledge base id
    pub kb: i64,

    pub question: String,

    /// Number of chunks to retrieve
    #[arg(long, short = 'k')]
    pub top_k: Option<usize>,

    /// Embed a hypothetical answer instead of the question
    #[arg(long)]
    pub hyde: bool,

    /// Skip question condensing
    #[arg(long)]
    pub no_condense: bool,

    /// Skip summary-guided retrieval
    #[arg(long)]
    pub no_summary_filter: bool,

    /// Rerank with this model (requires query.rerank_url)
    #[arg(long)]
    pub rerank_model: Option<String>,

    /// Chat model override
    #[arg(long, short = 'm')]
    pub model: Option<String>,
}

impl QueryArgs {
    pub fn configuration(&self, defaults: &QueryDefaults) -> QueryConfiguration {
        let mut configuration = QueryConfiguration::from_defaults(defaults);
        if let Some(top_k) = self.top_k {
            configuration = configuration.with_top_k(top_k);
        }
        if self.hyde {
            configuration = configuration.with_hyde(true);
        }
        if self.no_condense {
            configuration = configuration.with_question_condensing(false);
        }
        if self.no_summary_filter {
            configuration = configuration.with_summary_filter(false);
        }
        if let Some(ref model) = self.rerank_model {
            configuration = configuration.with_rerank_model(model.clone());
        }
        configuration.model_name = self.model.clone();
        configuration
    }
}

pub async fn handle_query(args: QueryArgs, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);
    let (_config, engine) = load_engine()?;
    let configuration = args.configuration(engine.query_defaults());

    let source = engine.data_source(args.kb).await?;
    match source.query(&args.question, &configuration, &[]).await {
        Ok(response) => {
            print!("{}", formatter.format_query_response(&args.question, &response));
            Ok(())
        }
        Err(QueryError::NoKnowledgeAvailable) => {
            println!(
                "{}",
                formatter.format_error(&format!(
                    "knowledge base {} has no indexed documents. Add some with: ragstudio index add {} <path>",
                    args.kb, args.kb
                ))
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = QueryArgs {
            kb: 1,
            question: "q".to_string(),
            top_k: Some(9),
            hyde: true,
            no_condense: true,
            no_summary_filter: false,
            rerank_model: None,
            model: Some("gpt-4o".to_string()),
        };
        let configuration = args.configuration(&QueryDefaults::default());
        assert_eq!(configuration.top_k, 9);
        assert!(configuration.use_hyde);
        assert!(!configuration.use_question_condensing);
        assert!(configuration.use_summary_filter);
        assert_eq!(configuration.model_name.as_deref(), Some("gpt-4o"));
    }
}
