//! Persisted summary stores.
//!
//! A knowledge base's store maps document ids to their summaries. The global store
//! holds one aggregate entry per knowledge base, listing the documents it was built from.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::persistence::SummaryPersistence;
use crate::error::{PersistenceError, SummaryError};

pub const GLOBAL_STORE: &str = "doc_summary_index_global";
pub const DOCSTORE_FILE: &str = "docstore.json";

/// Store directory for one knowledge base.
pub fn kb_store_name(knowledge_base_id: i64) -> String {
    format!("doc_summary_index_{}", knowledge_base_id)
}

pub fn docstore_key(store: &str) -> String {
    format!("{}/{}", store, DOCSTORE_FILE)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub file_name: String,
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseSummaries {
    pub knowledge_base_id: i64,
    #[serde(default)]
    pub documents: BTreeMap<String, DocumentSummary>,
}

impl KnowledgeBaseSummaries {
    pub fn new(knowledge_base_id: i64) -> Self {
        Self {
            knowledge_base_id,
            documents: BTreeMap::new(),
        }
    }

    pub fn summary(&self, document_id: &str) -> Option<&str> {
        self.documents.get(document_id).map(|d| d.summary.as_str())
    }
}

/// Aggregate summary of one knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSummaryEntry {
    pub knowledge_base_id: i64,
    pub document_ids: Vec<String>,
    pub summary: String,
}

/// Insertion appends, so an entry must be removed before its replacement goes in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSummaries {
    #[serde(default)]
    pub entries: Vec<GlobalSummaryEntry>,
}

impl GlobalSummaries {
    pub fn find(&self, knowledge_base_id: i64) -> Option<&GlobalSummaryEntry> {
        self.entries
            .iter()
            .find(|e| e.knowledge_base_id == knowledge_base_id)
    }

    /// Remove every entry for the knowledge base; returns whether anything was removed.
    pub fn remove(&mut self, knowledge_base_id: i64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.knowledge_base_id != knowledge_base_id);
        self.entries.len() != before
    }

    pub fn insert(&mut self, entry: GlobalSummaryEntry) {
        self.entries.push(entry);
    }
}

/// Load a store, falling back to an empty one when it is missing or unreadable.
pub(crate) async fn load_store<T>(persistence: &dyn SummaryPersistence, store: &str) -> Result<T, PersistenceError>
where
    T: DeserializeOwned + Default,
{
    let Some(bytes) = persistence.read(&docstore_key(store)).await? else {
        return Ok(T::default());
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(store, error = %e, "summary store is corrupt, reinitializing");
            Ok(T::default())
        }
    }
}

pub(crate) async fn save_store<T: Serialize>(
    persistence: &dyn SummaryPersistence,
    store: &str,
    value: &T,
) -> Result<(), SummaryError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| SummaryError::CorruptState {
        store: store.to_string(),
        message: e.to_string(),
    })?;
    persistence.write(&docstore_key(store), bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::summary::LocalPersistence;
    use tempfile::TempDir;

    fn entry(kb: i64, ids: &[&str]) -> GlobalSummaryEntry {
        GlobalSummaryEntry {
            knowledge_base_id: kb,
            document_ids: ids.iter().map(|s| s.to_string()).collect(),
            summary: format!("kb {}", kb),
        }
    }

    #[test]
    fn test_store_names() {
        assert_eq!(kb_store_name(4), "doc_summary_index_4");
        assert_eq!(docstore_key(GLOBAL_STORE), "doc_summary_index_global/docstore.json");
    }

    #[test]
    fn test_global_remove_then_insert() {
        let mut global = GlobalSummaries::default();
        global.insert(entry(1, &["a"]));
        global.insert(entry(2, &["b"]));

        assert!(global.remove(1));
        assert!(!global.remove(1));
        global.insert(entry(1, &["a", "c"]));

        assert_eq!(global.entries.len(), 2);
        assert_eq!(global.find(1).unwrap().document_ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let persistence = LocalPersistence::new(dir.path());
        let store: KnowledgeBaseSummaries = load_store(&persistence, &kb_store_name(1)).await.unwrap();
        assert!(store.documents.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_store_reinitializes() {
        let dir = TempDir::new().unwrap();
        let persistence = LocalPersistence::new(dir.path());
        persistence
            .write(&docstore_key(GLOBAL_STORE), b"{not json".to_vec())
            .await
            .unwrap();

        let global: GlobalSummaries = load_store(&persistence, GLOBAL_STORE).await.unwrap();
        assert!(global.entries.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let persistence = LocalPersistence::new(dir.path());
        let mut store = KnowledgeBaseSummaries::new(7);
        store.documents.insert(
            "doc".to_string(),
            DocumentSummary {
                file_name: "doc.txt".to_string(),
                summary: "short".to_string(),
                updated_at: Utc::now(),
            },
        );
        save_store(&persistence, &kb_store_name(7), &store).await.unwrap();

        let reloaded: KnowledgeBaseSummaries = load_store(&persistence, &kb_store_name(7)).await.unwrap();
        assert_eq!(reloaded, store);
        assert_eq!(reloaded.summary("doc"), Some("short"));
    }
}
