//! Layout-aware conversion for PDF and HTML documents.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::ReaderError;

/// One hierarchical chunk produced by a layout converter, already rendered as markdown.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LayoutChunk {
    pub text: String,
    #[serde(default, deserialize_with = "page_label")]
    pub page_number: Option<String>,
}

/// Page numbers arrive as integers or strings depending on the converter.
fn page_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    })
}

/// Converts a document into layout-aware chunks.
#[async_trait]
pub trait LayoutConverter: Send + Sync {
    async fn convert(&self, path: &Path) -> Result<Vec<LayoutChunk>, ReaderError>;
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    chunks: Vec<LayoutChunk>,
}

/// Client for a document conversion service exposing `POST /convert`.
#[derive(Debug, Clone)]
pub struct HttpLayoutConverter {
    client: Client,
    base_url: String,
}

impl HttpLayoutConverter {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ReaderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ReaderError::LayoutConversion(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LayoutConverter for HttpLayoutConverter {
    async fn convert(&self, path: &Path) -> Result<Vec<LayoutChunk>, ReaderError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let response = self
            .client
            .post(format!("{}/convert", self.base_url))
            .query(&[("filename", file_name.as_str())])
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| ReaderError::LayoutConversion(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReaderError::LayoutConversion(format!(
                "status {}: {}",
                status, body
            )));
        }

        let parsed: ConvertResponse = response
            .json()
            .await
            .map_err(|e| ReaderError::LayoutConversion(e.to_string()))?;
        Ok(parsed
            .chunks
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect())
    }
}
