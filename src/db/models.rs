//! Row types for the relational store (spec §3, §6 "Persisted state
//! layout"). These mirror the `document_chunks`-style row shape grounded on
//! `examples/other_examples/e22c7cd3_nvisycom-server__.../document_chunk.rs.rs`,
//! adapted from `diesel` to `sqlx` to match the teacher's database layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Forward-only status machine shared by Documents, Indexing Runs and
/// Checklist Analysis Runs (spec §3 invariant iii).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Whether `next` is a legal forward transition from `self`.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Running)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Public,
    Auth,
    Owner,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UploadType {
    Anonymous,
    UserProject,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub filename: String,
    pub byte_size: i64,
    pub page_count: Option<i32>,
    pub status: RunStatus,
    pub storage_path: String,
    pub access_level: AccessLevel,
    pub expires_at: Option<DateTime<Utc>>,
    /// Per-step result snapshot, a nested map keyed by step name (spec §3).
    pub step_results: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct IndexingRun {
    pub id: Uuid,
    pub upload_type: UploadType,
    pub user_id: Option<Uuid>,
    pub access_level: AccessLevel,
    pub project_id: Option<Uuid>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Non-null only once the Run has completed (spec §3 invariant: "every
    /// completed Run has a configuration snapshot"); populated at Run start
    /// in practice since the Resolver runs before any step does.
    pub config_snapshot: serde_json::Value,
    pub step_results: serde_json::Value,
    pub current_step: i32,
    pub total_steps: i32,
    pub error_message: Option<String>,
    pub notification_email: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunDocument {
    pub run_id: Uuid,
    pub document_id: Uuid,
}

/// A retrievable unit of content (spec §3). Immutable once written by C10.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub run_id: Uuid,
    /// Stable, monotonic within (document_id, run_id) (spec §5 ordering
    /// guarantee).
    pub chunk_key: String,
    pub content: String,
    #[sqlx(default)]
    pub embedding: Option<pgvector::Vector>,
    pub metadata: serde_json::Value,
    pub embedding_model: Option<String>,
    pub embedding_provider: Option<String>,
    pub embedding_created_at: Option<DateTime<Utc>>,
    pub access_level: AccessLevel,
    pub created_at: DateTime<Utc>,
}

/// A chunk paired with a similarity score, returned from C5 `search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`, higher is more similar.
    pub similarity: f32,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueryRun {
    pub id: Uuid,
    pub indexing_run_id: Uuid,
    pub original_query: String,
    pub variations: serde_json::Value,
    pub results: serde_json::Value,
    pub response: Option<String>,
    pub step_timings: serde_json::Value,
    pub metrics: serde_json::Value,
    pub access_level: AccessLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ChecklistAnalysisRun {
    pub id: Uuid,
    pub indexing_run_id: Uuid,
    pub user_id: Option<Uuid>,
    pub checklist_text: String,
    pub checklist_name: String,
    pub model: String,
    pub status: RunStatus,
    pub current_step: i32,
    pub total_steps: i32,
    pub raw_analysis: Option<String>,
    pub access_level: AccessLevel,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChecklistVerdict {
    Found,
    Missing,
    Risk,
    Conditions,
    PendingClarification,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ChecklistResult {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub item_number: i32,
    pub item_name: String,
    pub verdict: ChecklistVerdict,
    pub description: String,
    pub confidence: Option<f32>,
    pub primary_source_document: Option<Uuid>,
    pub primary_source_page: Option<i32>,
    pub primary_source_excerpt: Option<String>,
    /// Authoritative source list (spec §9 open question decision); the
    /// `primary_source_*` fields above are a convenience projection of
    /// `all_sources[0]`.
    pub all_sources: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_forward_only() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Running));
    }
}
