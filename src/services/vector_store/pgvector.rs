use std::sync::Arc;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use tracing::debug;

use super::{VectorQuery, VectorStore, require_embedding};
use crate::error::VectorStoreError;
use crate::models::{Chunk, ChunkMetadata, RetrievedChunk, VectorStoreConfig};
use crate::services::EmbeddingModel;

/// SQLSTATEs raised when a concurrent `IF NOT EXISTS` statement created the object first.
const CONCURRENT_DDL_CODES: [&str; 3] = ["23505", "42P07", "42710"];

fn is_concurrent_ddl(code: Option<&str>) -> bool {
    code.is_some_and(|code| CONCURRENT_DDL_CODES.contains(&code))
}

/// Run a DDL statement, treating a lost creation race as success.
async fn execute_ddl(pool: &PgPool, sql: &str) -> Result<(), VectorStoreError> {
    match sqlx::query(sql).execute(pool).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let code = e
                .as_database_error()
                .and_then(|db| db.code())
                .map(|code| code.into_owned());
            if is_concurrent_ddl(code.as_deref()) {
                debug!(code = ?code, "table or index created concurrently");
                Ok(())
            } else {
                Err(VectorStoreError::CollectionError(e.to_string()))
            }
        }
    }
}

const COLUMNS: &str =
    "id::text AS id, text, document_id, knowledge_base_id, file_name, chunk_number, chunk_format, page_number, extra";

/// PostgreSQL/pgvector backend, one table per collection.
pub struct PgVectorBackend {
    pool: PgPool,
    table_name: String,
    collection: String,
    embedding: Arc<dyn EmbeddingModel>,
}

impl PgVectorBackend {
    pub fn with_pool(
        pool: PgPool,
        config: &VectorStoreConfig,
        collection: String,
        embedding: Arc<dyn EmbeddingModel>,
    ) -> Self {
        Self {
            pool,
            table_name: config.qualified_table_name(&collection),
            collection,
            embedding,
        }
    }

    /// Verify the pgvector extension and create the configured schema.
    pub async fn prepare(pool: &PgPool, schema: Option<&str>) -> Result<(), VectorStoreError> {
        let result: Option<(String,)> =
            sqlx::query_as("SELECT extname FROM pg_extension WHERE extname = 'vector'")
                .fetch_optional(pool)
                .await
                .map_err(|e| VectorStoreError::PostgresError(e.to_string()))?;

        if result.is_none() {
            return Err(VectorStoreError::PgVectorExtensionError(
                "pgvector extension is not installed. Run: CREATE EXTENSION vector;".to_string(),
            ));
        }

        if let Some(schema) = schema {
            let query = format!("CREATE SCHEMA IF NOT EXISTS {}", schema);
            sqlx::query(&query)
                .execute(pool)
                .await
                .map_err(|e| VectorStoreError::PostgresError(e.to_string()))?;
        }

        Ok(())
    }

    fn chunk_from_row(row: &PgRow, with_embedding: bool) -> Chunk {
        let extra: Option<String> = row.get("extra");
        let chunk_number: i32 = row.get("chunk_number");
        let embedding = with_embedding.then(|| row.get::<Vector, _>("embedding").to_vec());
        Chunk {
            id: row.get("id"),
            text: row.get("text"),
            embedding,
            metadata: ChunkMetadata {
                file_name: row.get("file_name"),
                document_id: row.get("document_id"),
                knowledge_base_id: row.get("knowledge_base_id"),
                chunk_number: chunk_number as u32,
                chunk_format: row.get("chunk_format"),
                page_number: row.get("page_number"),
                extra: extra
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or_default(),
            },
        }
    }
}

#[async_trait]
impl VectorStore for PgVectorBackend {
    async fn size(&self) -> Result<Option<u64>, VectorStoreError> {
        let (exists,): (Option<String>,) = sqlx::query_as("SELECT to_regclass($1)::text")
            .bind(&self.table_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VectorStoreError::PostgresError(e.to_string()))?;

        if exists.is_none() {
            return Ok(None);
        }

        let query = format!("SELECT COUNT(*) as count FROM {}", self.table_name);
        let row: (i64,) = sqlx::query_as(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| VectorStoreError::PostgresError(e.to_string()))?;

        Ok(Some(row.0 as u64))
    }

    async fn create_collection(&self) -> Result<(), VectorStoreError> {
        if self.exists().await? {
            return Ok(());
        }

        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id UUID PRIMARY KEY,
                text TEXT NOT NULL,
                embedding vector({}) NOT NULL,
                document_id TEXT NOT NULL,
                knowledge_base_id BIGINT NOT NULL,
                file_name TEXT NOT NULL,
                chunk_number INTEGER NOT NULL,
                chunk_format TEXT NOT NULL,
                page_number TEXT,
                extra TEXT
            )
            "#,
            self.table_name,
            self.embedding.dimension()
        );

        execute_ddl(&self.pool, &create_table).await?;

        let indices = [
            format!(
                "CREATE INDEX IF NOT EXISTS {}_embedding_idx ON {} USING hnsw (embedding vector_cosine_ops)",
                self.collection, self.table_name
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {}_document_id_idx ON {} (document_id)",
                self.collection, self.table_name
            ),
        ];

        for index_sql in &indices {
            execute_ddl(&self.pool, index_sql).await?;
        }

        Ok(())
    }

    async fn add(&self, chunks: Vec<Chunk>) -> Result<(), VectorStoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.create_collection().await?;

        let query = format!(
            r#"
            INSERT INTO {} (id, text, embedding, document_id, knowledge_base_id, file_name,
                            chunk_number, chunk_format, page_number, extra)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                text = EXCLUDED.text,
                embedding = EXCLUDED.embedding,
                document_id = EXCLUDED.document_id,
                knowledge_base_id = EXCLUDED.knowledge_base_id,
                file_name = EXCLUDED.file_name,
                chunk_number = EXCLUDED.chunk_number,
                chunk_format = EXCLUDED.chunk_format,
                page_number = EXCLUDED.page_number,
                extra = EXCLUDED.extra
            "#,
            self.table_name
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        for chunk in &chunks {
            let id = uuid::Uuid::parse_str(&chunk.id)
                .map_err(|e| VectorStoreError::UpsertError(format!("Invalid UUID: {}", e)))?;
            let embedding = Vector::from(require_embedding(chunk)?.to_vec());
            let meta = &chunk.metadata;
            let extra = (!meta.extra.is_empty())
                .then(|| serde_json::to_string(&meta.extra).unwrap_or_default());

            sqlx::query(&query)
                .bind(id)
                .bind(&chunk.text)
                .bind(&embedding)
                .bind(&meta.document_id)
                .bind(meta.knowledge_base_id)
                .bind(&meta.file_name)
                .bind(meta.chunk_number as i32)
                .bind(&meta.chunk_format)
                .bind(&meta.page_number)
                .bind(extra)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        Ok(())
    }

    async fn search(&self, query: &VectorQuery) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
        if matches!(query.document_ids, Some(ref ids) if ids.is_empty()) || !self.exists().await? {
            return Ok(Vec::new());
        }

        let embedding = Vector::from(query.embedding.clone());
        let where_clause = if query.document_ids.is_some() {
            "WHERE document_id = ANY($2)"
        } else {
            ""
        };

        let sql = format!(
            r#"
            SELECT {}, 1 - (embedding <=> $1) AS score
            FROM {}
            {}
            ORDER BY embedding <=> $1
            LIMIT {}
            "#,
            COLUMNS, self.table_name, where_clause, query.top_k
        );

        let mut query_builder = sqlx::query(&sql).bind(&embedding);
        if let Some(ref ids) = query.document_ids {
            query_builder = query_builder.bind(ids.as_slice());
        }

        let rows = query_builder
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| {
                let score: f64 = row.get("score");
                RetrievedChunk {
                    chunk: Self::chunk_from_row(row, false),
                    score: score as f32,
                }
            })
            .collect())
    }

    async fn delete(&self) -> Result<(), VectorStoreError> {
        let query = format!("DROP TABLE IF EXISTS {}", self.table_name);
        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), VectorStoreError> {
        if !self.exists().await? {
            return Ok(());
        }

        let query = format!("DELETE FROM {} WHERE document_id = $1", self.table_name);
        sqlx::query(&query)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(())
    }

    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, VectorStoreError> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT {} FROM {} WHERE document_id = $1 ORDER BY chunk_number",
            COLUMNS, self.table_name
        );
        let rows = sqlx::query(&query)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        Ok(rows.iter().map(|row| Self::chunk_from_row(row, false)).collect())
    }

    async fn sample(&self, limit: usize) -> Result<Vec<(Vec<f32>, String)>, VectorStoreError> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT {}, embedding FROM {} LIMIT {}",
            COLUMNS, self.table_name, limit
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let chunk = Self::chunk_from_row(row, true);
                chunk.embedding.map(|e| (e, chunk.metadata.file_name))
            })
            .collect())
    }

    fn embedding_model(&self) -> Arc<dyn EmbeddingModel> {
        self.embedding.clone()
    }

    fn collection(&self) -> &str {
        &self.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lost_creation_race_is_tolerated() {
        assert!(is_concurrent_ddl(Some("23505")));
        assert!(is_concurrent_ddl(Some("42P07")));
        assert!(!is_concurrent_ddl(Some("42501")));
        assert!(!is_concurrent_ddl(None));
    }
}
