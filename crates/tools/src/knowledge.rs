//! Knowledge-base search: embed the query, then run a pgvector cosine
//! ANN query scoped to the caller's knowledge bases.

use pgvector::Vector;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::sync::Arc;
use std::time::Instant;

use cl_domain::tool::{error_kind, ToolResult};
use cl_providers::{EmbeddingsRequest, LlmProvider};

use crate::registry::Tool;

/// Only chunks with cosine distance ≤ this (similarity ≥ 0.5) qualify.
const DISTANCE_THRESHOLD: f64 = 0.5;

/// One ranked chunk as returned to the agent and the bridge.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchChunk {
    pub chunk_id: i64,
    pub document_id: i64,
    pub kb_id: i64,
    pub content: String,
    pub similarity: f64,
    pub document_name: String,
    pub kb_name: String,
}

pub struct KnowledgeSearchTool {
    pool: PgPool,
    embedder: Arc<dyn LlmProvider>,
    user_id: i64,
}

impl KnowledgeSearchTool {
    pub fn new(pool: PgPool, embedder: Arc<dyn LlmProvider>, user_id: i64) -> Self {
        Self {
            pool,
            embedder,
            user_id,
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ToolResult> {
        let resp = self
            .embedder
            .embeddings(EmbeddingsRequest {
                input: vec![query.to_string()],
                model: None,
            })
            .await
            .map_err(|e| {
                ToolResult::fail(
                    format!("Could not embed the query: {e}"),
                    "embedding_failed",
                )
            })?;

        resp.embeddings.into_iter().next().filter(|v| !v.is_empty()).ok_or_else(|| {
            ToolResult::fail("Embedding service returned no vector", "embedding_failed")
        })
    }

    async fn kb_ids(&self) -> Result<Vec<i64>, ToolResult> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM knowledge_bases WHERE user_id = $1")
            .bind(self.user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                ToolResult::fail(
                    format!("Knowledge base lookup failed: {e}"),
                    error_kind::TOOL_EXTERNAL,
                )
            })
    }

    async fn search(
        &self,
        embedding: Vec<f32>,
        kb_ids: &[i64],
        top_k: i64,
    ) -> Result<Vec<SearchChunk>, ToolResult> {
        let vector = Vector::from(embedding);
        let rows = sqlx::query(
            r#"
            SELECT
                dc.id AS chunk_id,
                dc.document_id,
                dc.knowledge_base_id AS kb_id,
                dc.content,
                1 - (dc.embedding <=> $1) AS similarity,
                d.original_filename AS document_name,
                kb.name AS kb_name
            FROM document_chunks dc
            JOIN documents d ON dc.document_id = d.id
            JOIN knowledge_bases kb ON dc.knowledge_base_id = kb.id
            WHERE dc.knowledge_base_id = ANY($2)
                AND dc.embedding IS NOT NULL
                AND (dc.embedding <=> $1) <= $3
            ORDER BY dc.embedding <=> $1
            LIMIT $4
            "#,
        )
        .bind(&vector)
        .bind(kb_ids)
        .bind(DISTANCE_THRESHOLD)
        .bind(top_k)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            ToolResult::fail(
                format!("Vector search failed: {e}"),
                error_kind::TOOL_EXTERNAL,
            )
        })?;

        Ok(rows
            .iter()
            .map(|row| SearchChunk {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                kb_id: row.get("kb_id"),
                content: row.get("content"),
                similarity: row.get::<f64, _>("similarity"),
                document_name: row
                    .try_get::<Option<String>, _>("document_name")
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "unknown".into()),
                kb_name: row
                    .try_get::<Option<String>, _>("kb_name")
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "unknown".into()),
            })
            .collect())
    }
}

fn format_chunks(chunks: &[SearchChunk], elapsed_ms: f64) -> String {
    let mut parts = vec![format!("Found {} relevant result(s):\n", chunks.len())];
    for (i, chunk) in chunks.iter().enumerate() {
        let preview: String = chunk.content.chars().take(500).collect();
        let ellipsis = if chunk.content.chars().count() > 500 {
            "..."
        } else {
            ""
        };
        parts.push(format!(
            "\n[Result {}] (similarity: {:.1}%)\nSource: {} / {}\nContent: {preview}{ellipsis}",
            i + 1,
            chunk.similarity * 100.0,
            chunk.kb_name,
            chunk.document_name,
        ));
    }
    parts.push(format!("\n\n(search took {elapsed_ms:.2}ms)"));
    parts.concat()
}

#[async_trait::async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        "knowledge_search"
    }

    fn description(&self) -> &str {
        "Search the user's knowledge bases for passages relevant to a query. \
         Use when the question concerns their uploaded documents or papers."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "keywords or a phrase related to the question"
                },
                "top_k": {
                    "type": "integer",
                    "description": "number of results to return",
                    "default": 5,
                },
            },
            "required": ["query"],
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return ToolResult::fail("Missing 'query' argument", error_kind::INVALID_INPUT);
        };
        let top_k = args
            .get("top_k")
            .and_then(Value::as_i64)
            .unwrap_or(5)
            .clamp(1, 50);

        let started = Instant::now();

        let embedding = match self.embed_query(query).await {
            Ok(v) => v,
            Err(failure) => return failure,
        };

        let kb_ids = match self.kb_ids().await {
            Ok(ids) => ids,
            Err(failure) => return failure,
        };
        if kb_ids.is_empty() {
            return ToolResult::ok_with_data(
                "The user has no knowledge bases yet; there is nothing to search. \
                 Suggest uploading documents first.",
                serde_json::json!({"results": [], "total": 0}),
            );
        }

        let chunks = match self.search(embedding, &kb_ids, top_k).await {
            Ok(c) => c,
            Err(failure) => return failure,
        };

        if chunks.is_empty() {
            return ToolResult::ok_with_data(
                "No relevant content found. The knowledge base may not cover this \
                 topic, or different keywords might match better.",
                serde_json::json!({"results": [], "total": 0}),
            );
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let output = format_chunks(&chunks, elapsed_ms);
        let data = serde_json::json!({
            "results": chunks,
            "total": chunks.len(),
            "search_time_ms": elapsed_ms,
        });
        ToolResult::ok_with_data(output, data)
    }
}
