//! C5 Vector Index.
//!
//! Grounded on `examples/other_examples/e22c7cd3_nvisycom-server__.../
//! document_chunk.rs.rs` for the chunk+vector+metadata row shape and on
//! `pgvector` (sqlx feature) as the vector-index-extension dependency (see
//! DESIGN.md for the manifest citations). Deliberately inverts the
//! teacher's own `memory.rs::SqliteMemoryStore::search` anti-pattern: that
//! implementation filters `similarity >= threshold` inside the scan, before
//! truncating to `limit` — which defeats an ANN index, since the index
//! should return the K nearest neighbours unconditionally and let the
//! caller decide what to do with low-similarity results. `search` here
//! applies only the `run_scope` filter inside the SQL predicate; any
//! similarity floor is left entirely to the caller.

use crate::db::models::{AccessLevel, Chunk, ScoredChunk};
use crate::error::Result;
use pgvector::Vector as PgVector;
use sqlx::PgPool;
use uuid::Uuid;

/// Server-side cap on K regardless of what the caller requests (spec §4.5).
pub const MAX_K: usize = 200;

pub struct VectorIndex {
    pool: PgPool,
}

impl VectorIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write a chunk's embedding (and its provenance metadata) into the
    /// index. Chunks are immutable after this call (spec §3 lifecycle).
    pub async fn upsert(
        &self,
        document_id: Uuid,
        run_id: Uuid,
        chunk_key: &str,
        content: &str,
        embedding: &[f32],
        metadata: serde_json::Value,
        embedding_model: &str,
        embedding_provider: &str,
        access_level: AccessLevel,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let vector = PgVector::from(embedding.to_vec());

        sqlx::query(
            r#"
            INSERT INTO document_chunks
                (id, document_id, run_id, chunk_key, content, embedding,
                 metadata, embedding_model, embedding_provider,
                 embedding_created_at, access_level)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), $10)
            ON CONFLICT (document_id, run_id, chunk_key) DO UPDATE SET
                content = EXCLUDED.content,
                embedding = EXCLUDED.embedding,
                metadata = EXCLUDED.metadata,
                embedding_model = EXCLUDED.embedding_model,
                embedding_provider = EXCLUDED.embedding_provider,
                embedding_created_at = now()
            "#,
        )
        .bind(id)
        .bind(document_id)
        .bind(run_id)
        .bind(chunk_key)
        .bind(content)
        .bind(vector)
        .bind(metadata)
        .bind(embedding_model)
        .bind(embedding_provider)
        .bind(access_level)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// `match_chunks` RPC (spec §6): returns the K nearest neighbours by
    /// cosine similarity, ordered ascending by distance (≡ descending
    /// similarity) with ties broken by `chunk_key` (spec §5 ordering
    /// guarantee). Applies `run_scope` inside the predicate; never applies
    /// a similarity floor here — that is the caller's job, after this
    /// returns (spec §4.5).
    pub async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        run_scope: Option<Uuid>,
    ) -> Result<Vec<ScoredChunk>> {
        let k = k.min(MAX_K);
        let vector = PgVector::from(query_embedding.to_vec());

        const COLUMNS: &str = r#"
            id, document_id, run_id, chunk_key, content, embedding, metadata,
            embedding_model, embedding_provider, embedding_created_at,
            access_level, created_at, (embedding <=> $1) AS distance
        "#;

        let rows: Vec<ChunkWithDistance> = if let Some(run_id) = run_scope {
            let query = format!(
                "SELECT {COLUMNS} FROM document_chunks \
                 WHERE run_id = $2 AND embedding IS NOT NULL \
                 ORDER BY embedding <=> $1 ASC, chunk_key ASC LIMIT $3"
            );
            sqlx::query_as::<_, ChunkWithDistance>(&query)
                .bind(&vector)
                .bind(run_id)
                .bind(k as i64)
                .fetch_all(&self.pool)
                .await?
        } else {
            let query = format!(
                "SELECT {COLUMNS} FROM document_chunks \
                 WHERE embedding IS NOT NULL \
                 ORDER BY embedding <=> $1 ASC, chunk_key ASC LIMIT $2"
            );
            sqlx::query_as::<_, ChunkWithDistance>(&query)
                .bind(&vector)
                .bind(k as i64)
                .fetch_all(&self.pool)
                .await?
        };

        Ok(rows
            .into_iter()
            .map(ChunkWithDistance::into_scored_chunk)
            .collect())
    }
}

/// Explicit column projection matching `Chunk` plus the computed `distance`
/// column; `sqlx`'s `FromRow` derive has no nested-struct flattening, so
/// this lists every field itself rather than composing `Chunk`.
#[derive(sqlx::FromRow)]
struct ChunkWithDistance {
    id: Uuid,
    document_id: Uuid,
    run_id: Uuid,
    chunk_key: String,
    content: String,
    embedding: Option<PgVector>,
    metadata: serde_json::Value,
    embedding_model: Option<String>,
    embedding_provider: Option<String>,
    embedding_created_at: Option<chrono::DateTime<chrono::Utc>>,
    access_level: AccessLevel,
    created_at: chrono::DateTime<chrono::Utc>,
    distance: f32,
}

impl ChunkWithDistance {
    fn into_scored_chunk(self) -> ScoredChunk {
        let chunk = Chunk {
            id: self.id,
            document_id: self.document_id,
            run_id: self.run_id,
            chunk_key: self.chunk_key,
            content: self.content,
            embedding: self.embedding,
            metadata: self.metadata,
            embedding_model: self.embedding_model,
            embedding_provider: self.embedding_provider,
            embedding_created_at: self.embedding_created_at,
            access_level: self.access_level,
            created_at: self.created_at,
        };
        // pgvector's `<=>` is cosine *distance* (1 - cosine similarity).
        ScoredChunk {
            chunk,
            similarity: 1.0 - self.distance,
        }
    }
}

/// Applies `retrieval.similarity_floor` as a post-filter (spec §4.5, §4.12
/// step 2, §9 "Vector-search pitfall"). Never call this before `search`
/// truncates to K — only after.
pub fn apply_similarity_floor(results: Vec<ScoredChunk>, floor: Option<f32>) -> Vec<ScoredChunk> {
    match floor {
        Some(floor) => results.into_iter().filter(|r| r.similarity >= floor).collect(),
        None => results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Chunk, RunStatus};
    use chrono::Utc;

    fn sample_chunk(similarity: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: Uuid::new_v4(),
                document_id: Uuid::new_v4(),
                run_id: Uuid::new_v4(),
                chunk_key: "doc-0001".to_string(),
                content: "text".to_string(),
                embedding: None,
                metadata: serde_json::json!({}),
                embedding_model: None,
                embedding_provider: None,
                embedding_created_at: None,
                access_level: AccessLevel::Private,
                created_at: Utc::now(),
            },
            similarity,
        }
    }

    #[test]
    fn similarity_floor_is_applied_after_retrieval_not_before() {
        let results = vec![sample_chunk(0.9), sample_chunk(0.1), sample_chunk(0.5)];
        let filtered = apply_similarity_floor(results, Some(0.3));
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|r| r.similarity >= 0.3));
    }

    #[test]
    fn no_floor_returns_everything() {
        let results = vec![sample_chunk(0.9), sample_chunk(0.01)];
        let filtered = apply_similarity_floor(results, None);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn k_is_capped_server_side() {
        assert_eq!(MAX_K, 200);
    }

    /// Spec §8: "∀ chunk c with vector v: dim(v) == 1024". Exercised here
    /// against randomized vectors rather than one fixed example, since a
    /// conversion bug that only shows up for certain values (e.g. NaN,
    /// zero) wouldn't be caught by a single hand-picked vector.
    #[test]
    fn pgvector_conversion_preserves_dimensionality_for_arbitrary_embeddings() {
        use rand::Rng;
        let mut rng = rand::rng();
        for _ in 0..20 {
            let embedding: Vec<f32> = (0..1024).map(|_| rng.random_range(-1.0f32..1.0)).collect();
            let vector = PgVector::from(embedding.clone());
            let round_tripped = vector.to_vec();
            assert_eq!(round_tripped.len(), 1024);
            assert_eq!(round_tripped, embedding);
        }
    }

    // Avoid unused-import warning for RunStatus in this module's test scope
    // while keeping the import available for future row-shape assertions.
    #[allow(dead_code)]
    fn _touch(_: RunStatus) {}
}
