use std::fmt::Write as FmtWrite;

use serde::Serialize;

use crate::models::{OutputFormat, QueryResponse, VisualizationPoint};

pub trait Formatter {
    fn format_query_response(&self, question: &str, response: &QueryResponse) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_index_stats(&self, stats: &IndexStats) -> String;
    fn format_summary(&self, summary: &SummaryView) -> String;
    fn format_points(&self, points: &[VisualizationPoint]) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub knowledge_base_id: i64,
    pub vector_store_driver: String,
    pub vector_store_url: String,
    pub vector_store_connected: bool,
    pub embedding_model: String,
    pub llm_model: String,
    /// `None` when the collection does not exist
    pub chunks: Option<u64>,
    pub summaries: Option<u64>,
    pub summary_location: Option<String>,
    pub has_full_summary: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub files_scanned: u64,
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub files_blocked: u64,
    pub files_with_pii: u64,
    pub chunks_created: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryView {
    pub knowledge_base_id: i64,
    /// `None` for the knowledge base summary
    pub document_id: Option<String>,
    pub summary: Option<String>,
}

fn preview(text: &str, limit: usize) -> String {
    let head: String = text.chars().take(limit).collect();
    if text.chars().count() > limit {
        format!("{}...", head)
    } else {
        head
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_query_response(&self, _question: &str, response: &QueryResponse) -> String {
        let mut output = String::new();
        if let Some(ref condensed) = response.condensed_question {
            writeln!(output, "(searched for: {})\n", condensed).unwrap();
        }
        writeln!(output, "{}", response.answer.trim()).unwrap();

        if !response.source_nodes.is_empty() {
            writeln!(output, "\nSources").unwrap();
            writeln!(output, "-------").unwrap();
        }
        for (i, node) in response.source_nodes.iter().enumerate() {
            let meta = &node.chunk.metadata;
            write!(output, "{}. [Score: {:.3}] {}", i + 1, node.score, meta.file_name).unwrap();
            if let Some(ref page) = meta.page_number {
                write!(output, " (page {})", page).unwrap();
            }
            writeln!(output).unwrap();
            for line in preview(&node.chunk.text, 200).lines() {
                writeln!(output, "   {}", line).unwrap();
            }
        }
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        writeln!(output, "Knowledge Base {}", status.knowledge_base_id).unwrap();
        writeln!(output, "------------------").unwrap();

        let vector_status = if status.vector_store_connected {
            "[CONNECTED]"
        } else {
            "[DISCONNECTED]"
        };
        writeln!(
            output,
            "Vector Store:  {} ({})",
            status.vector_store_driver, vector_status
        )
        .unwrap();
        writeln!(output, "  URL:         {}", status.vector_store_url).unwrap();
        writeln!(output, "  Chunks:      {}", count_or_missing(status.chunks)).unwrap();
        writeln!(output, "  Summaries:   {}", count_or_missing(status.summaries)).unwrap();
        writeln!(output).unwrap();
        writeln!(output, "Embedding:     {}", status.embedding_model).unwrap();
        writeln!(output, "LLM:           {}", status.llm_model).unwrap();
        match status.summary_location {
            Some(ref location) => writeln!(output, "Summary Store: {}", location).unwrap(),
            None => writeln!(output, "Summary Store: [DISABLED]").unwrap(),
        }
        writeln!(
            output,
            "Full Summary:  {}",
            if status.has_full_summary { "yes" } else { "no" }
        )
        .unwrap();
        output
    }

    fn format_index_stats(&self, stats: &IndexStats) -> String {
        let mut output = String::new();
        writeln!(output, "Indexing Complete").unwrap();
        writeln!(output, "-----------------").unwrap();
        writeln!(output, "Files scanned: {}", stats.files_scanned).unwrap();
        writeln!(output, "Files indexed: {}", stats.files_indexed).unwrap();
        writeln!(output, "Files skipped: {}", stats.files_skipped).unwrap();
        if stats.files_blocked > 0 {
            writeln!(output, "Blocked (secrets): {}", stats.files_blocked).unwrap();
        }
        if stats.files_with_pii > 0 {
            writeln!(output, "PII anonymized: {}", stats.files_with_pii).unwrap();
        }
        writeln!(output, "Chunks created: {}", stats.chunks_created).unwrap();
        writeln!(output, "Duration: {}ms", stats.duration_ms).unwrap();
        output
    }

    fn format_summary(&self, summary: &SummaryView) -> String {
        let subject = match summary.document_id {
            Some(ref id) => format!("Document {}", id),
            None => format!("Knowledge base {}", summary.knowledge_base_id),
        };
        match summary.summary {
            Some(ref text) => format!("{}\n\n{}\n", subject, text.trim()),
            None => format!("{}: no summary available\n", subject),
        }
    }

    fn format_points(&self, points: &[VisualizationPoint]) -> String {
        if points.is_empty() {
            return "Not enough vectors to visualize (need at least 3).\n".to_string();
        }
        let mut output = String::new();
        for point in points {
            writeln!(output, "{:>10.4} {:>10.4}  {}", point.x, point.y, point.label).unwrap();
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}", error)
    }
}

fn count_or_missing(count: Option<u64>) -> String {
    count.map_or_else(|| "(none)".to_string(), |c| c.to_string())
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let result = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        result.unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}

impl Formatter for JsonFormatter {
    fn format_query_response(&self, question: &str, response: &QueryResponse) -> String {
        self.render(&serde_json::json!({
            "question": question,
            "answer": response.answer,
            "condensed_question": response.condensed_question,
            "source_nodes": response.source_nodes,
        }))
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.render(status)
    }

    fn format_index_stats(&self, stats: &IndexStats) -> String {
        self.render(stats)
    }

    fn format_summary(&self, summary: &SummaryView) -> String {
        self.render(summary)
    }

    fn format_points(&self, points: &[VisualizationPoint]) -> String {
        self.render(points)
    }

    fn format_message(&self, message: &str) -> String {
        self.render(&serde_json::json!({ "message": message }))
    }

    fn format_error(&self, error: &str) -> String {
        self.render(&serde_json::json!({ "error": error }))
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_query_response(&self, question: &str, response: &QueryResponse) -> String {
        let mut output = String::new();
        writeln!(output, "## {}\n", question).unwrap();
        if let Some(ref condensed) = response.condensed_question {
            writeln!(output, "_Searched for: {}_\n", condensed).unwrap();
        }
        writeln!(output, "{}\n", response.answer.trim()).unwrap();

        if !response.source_nodes.is_empty() {
            writeln!(output, "### Sources\n").unwrap();
            writeln!(output, "| # | Score | File | Page |").unwrap();
            writeln!(output, "|---|-------|------|------|").unwrap();
        }
        for (i, node) in response.source_nodes.iter().enumerate() {
            let meta = &node.chunk.metadata;
            writeln!(
                output,
                "| {} | {:.3} | `{}` | {} |",
                i + 1,
                node.score,
                meta.file_name,
                meta.page_number.as_deref().unwrap_or("-")
            )
            .unwrap();
        }
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        writeln!(output, "## Knowledge Base {}\n", status.knowledge_base_id).unwrap();
        writeln!(output, "| Component | Value |").unwrap();
        writeln!(output, "|-----------|-------|").unwrap();
        writeln!(
            output,
            "| Vector Store | {} ({}) |",
            status.vector_store_driver,
            if status.vector_store_connected { "connected" } else { "disconnected" }
        )
        .unwrap();
        writeln!(output, "| Chunks | {} |", count_or_missing(status.chunks)).unwrap();
        writeln!(output, "| Summaries | {} |", count_or_missing(status.summaries)).unwrap();
        writeln!(output, "| Embedding | `{}` |", status.embedding_model).unwrap();
        writeln!(output, "| LLM | `{}` |", status.llm_model).unwrap();
        writeln!(
            output,
            "| Summary Store | {} |",
            status.summary_location.as_deref().unwrap_or("disabled")
        )
        .unwrap();
        output
    }

    fn format_index_stats(&self, stats: &IndexStats) -> String {
        let mut output = String::new();
        writeln!(output, "## Indexing Complete\n").unwrap();
        writeln!(output, "- **Files scanned:** {}", stats.files_scanned).unwrap();
        writeln!(output, "- **Files indexed:** {}", stats.files_indexed).unwrap();
        writeln!(output, "- **Files skipped:** {}", stats.files_skipped).unwrap();
        writeln!(output, "- **Blocked (secrets):** {}", stats.files_blocked).unwrap();
        writeln!(output, "- **Chunks created:** {}", stats.chunks_created).unwrap();
        writeln!(output, "- **Duration:** {}ms", stats.duration_ms).unwrap();
        output
    }

    fn format_summary(&self, summary: &SummaryView) -> String {
        let title = match summary.document_id {
            Some(ref id) => format!("## Summary of `{}`", id),
            None => format!("## Knowledge Base {} Summary", summary.knowledge_base_id),
        };
        format!(
            "{}\n\n{}\n",
            title,
            summary.summary.as_deref().unwrap_or("_No summary available._")
        )
    }

    fn format_points(&self, points: &[VisualizationPoint]) -> String {
        let mut output = String::new();
        writeln!(output, "| x | y | label |").unwrap();
        writeln!(output, "|---|---|-------|").unwrap();
        for point in points {
            writeln!(output, "| {:.4} | {:.4} | `{}` |", point.x, point.y, point.label).unwrap();
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> **Error:** {}", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata, RetrievedChunk};

    fn response() -> QueryResponse {
        QueryResponse {
            answer: "Ownership moves values.".to_string(),
            condensed_question: Some("What is ownership in Rust?".to_string()),
            source_nodes: vec![RetrievedChunk {
                chunk: Chunk::new(
                    "Each value has an owner.".to_string(),
                    ChunkMetadata {
                        file_name: "book.pdf".to_string(),
                        page_number: Some("4".to_string()),
                        ..Default::default()
                    },
                ),
                score: 0.87,
            }],
        }
    }

    #[test]
    fn test_text_query_response() {
        let output = TextFormatter.format_query_response("ownership?", &response());
        assert!(output.contains("Ownership moves values."));
        assert!(output.contains("book.pdf (page 4)"));
        assert!(output.contains("searched for: What is ownership in Rust?"));
    }

    #[test]
    fn test_json_query_response_is_valid() {
        let output = JsonFormatter::new(false).format_query_response("ownership?", &response());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["question"], "ownership?");
        assert_eq!(value["source_nodes"][0]["chunk"]["metadata"]["file_name"], "book.pdf");
    }

    #[test]
    fn test_missing_summary_text() {
        let view = SummaryView {
            knowledge_base_id: 2,
            document_id: None,
            summary: None,
        };
        assert_eq!(TextFormatter.format_summary(&view), "Knowledge base 2: no summary available\n");
    }

    #[test]
    fn test_points_need_three_vectors() {
        assert!(TextFormatter.format_points(&[]).contains("at least 3"));
    }
}
