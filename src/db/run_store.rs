//! C2 Run Store.
//!
//! Persists Run and Document records and the run↔document junction;
//! transactional writes for status transitions; append-only writes for
//! per-step results. Grounded on the teacher's raw `sqlx::query`/
//! `query_as` usage in `cache.rs` and `memory.rs::SqliteMemoryStore`
//! (hand-written SQL rather than a query builder), adapted from SQLite to
//! Postgres.

use crate::config::PipelineConfig;
use crate::db::models::{
    AccessLevel, ChecklistAnalysisRun, ChecklistResult, Document, IndexingRun, QueryRun, RunStatus,
    UploadType,
};
use crate::error::{ConstructionRagError, Result};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunFilters {
    pub status: Option<RunStatus>,
    pub user_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
}

impl Default for RunFilters {
    fn default() -> Self {
        Self {
            status: None,
            user_id: None,
            project_id: None,
        }
    }
}

/// Persistence gateway for Indexing Runs (and, by extension, Query Runs and
/// Checklist Analysis Runs via the sibling methods below).
pub struct RunStore {
    pool: PgPool,
}

impl RunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs pending migrations against `./migrations`.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ConstructionRagError::Generic(e.into()))
    }

    /// Create a Run in `pending` status with its configuration snapshot
    /// already attached (spec §3 invariant: completed Runs always carry a
    /// snapshot — satisfied trivially here by writing it up front).
    pub async fn create_run(
        &self,
        upload_type: UploadType,
        user_id: Option<Uuid>,
        access_level: AccessLevel,
        project_id: Option<Uuid>,
        config: &PipelineConfig,
        notification_email: Option<&str>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let snapshot = config
            .to_snapshot()
            .map_err(ConstructionRagError::Config)?;

        sqlx::query(
            r#"
            INSERT INTO indexing_runs
                (id, upload_type, user_id, access_level, project_id, status,
                 started_at, config_snapshot, step_results, current_step,
                 total_steps, notification_email)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, '{}'::jsonb, 0, 5, $8)
            "#,
        )
        .bind(id)
        .bind(upload_type)
        .bind(user_id)
        .bind(access_level)
        .bind(project_id)
        .bind(Utc::now())
        .bind(snapshot)
        .bind(notification_email)
        .execute(&self.pool)
        .await?;

        info!(run_id = %id, "created indexing run");
        Ok(id)
    }

    /// Attach Documents to a Run. Idempotent: re-attaching an already-linked
    /// document is a no-op (unique on (run, document), spec §3).
    pub async fn attach_documents(&self, run_id: Uuid, document_ids: &[Uuid]) -> Result<()> {
        for document_id in document_ids {
            sqlx::query(
                r#"
                INSERT INTO indexing_run_documents (run_id, document_id)
                VALUES ($1, $2)
                ON CONFLICT (run_id, document_id) DO NOTHING
                "#,
            )
            .bind(run_id)
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Transactional status transition; rejects backward transitions (spec
    /// §3 invariant iii) before writing.
    pub async fn update_status(
        &self,
        run_id: Uuid,
        next: RunStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: (RunStatus,) =
            sqlx::query_as("SELECT status FROM indexing_runs WHERE id = $1 FOR UPDATE")
                .bind(run_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ConstructionRagError::NotFound(run_id.to_string()))?;

        if !current.0.can_transition_to(next) && current.0 != next {
            return Err(ConstructionRagError::Generic(anyhow::anyhow!(
                "illegal run status transition {:?} -> {:?}",
                current.0,
                next
            )));
        }

        let completed_at = matches!(next, RunStatus::Completed | RunStatus::Failed)
            .then(Utc::now);

        sqlx::query(
            r#"
            UPDATE indexing_runs
            SET status = $2, error_message = COALESCE($3, error_message), completed_at = COALESCE($4, completed_at)
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(next)
        .bind(error_message)
        .bind(completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(run_id = %run_id, ?next, "run status updated");
        Ok(())
    }

    /// Append-only write of a step's output, keyed by step name. Idempotent
    /// by (run_id, step): re-recording the same step overwrites its entry
    /// rather than duplicating it, so a restart that replays a completed
    /// step is harmless (spec §4.11 "step boundaries are retry anchors").
    pub async fn record_step_result(
        &self,
        run_id: Uuid,
        step: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE indexing_runs
            SET step_results = jsonb_set(step_results, $2, $3, true)
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(vec![step.to_string()])
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_progress(&self, run_id: Uuid, current: u32, total: u32) -> Result<()> {
        sqlx::query("UPDATE indexing_runs SET current_step = $2, total_steps = $3 WHERE id = $1")
            .bind(run_id)
            .bind(current as i32)
            .bind(total as i32)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn fetch_run(&self, run_id: Uuid) -> Result<IndexingRun> {
        sqlx::query_as::<_, IndexingRun>("SELECT * FROM indexing_runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ConstructionRagError::NotFound(run_id.to_string()))
    }

    pub async fn list_runs(&self, filters: RunFilters) -> Result<Vec<IndexingRun>> {
        let mut query = String::from("SELECT * FROM indexing_runs WHERE 1=1");
        if filters.status.is_some() {
            query.push_str(" AND status = $1");
        }
        // Kept intentionally simple: the filter surface here only needs to
        // satisfy the progress/listing use cases in spec §6, not arbitrary
        // ad-hoc querying.
        let mut q = sqlx::query_as::<_, IndexingRun>(&query);
        if let Some(status) = filters.status {
            q = q.bind(status);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    /// Step boundaries are retry anchors: a step whose result is already
    /// recorded is skipped on restart rather than re-executed.
    pub async fn step_already_completed(&self, run_id: Uuid, step: &str) -> Result<bool> {
        let run = self.fetch_run(run_id).await?;
        Ok(run
            .step_results
            .get(step)
            .map(|v| !v.is_null())
            .unwrap_or(false))
    }

    /// Fetches a previously-recorded step's output payload, so a restarted
    /// Run can skip re-running a completed step's work entirely rather than
    /// merely skip re-persisting its result (spec §4.11 "step boundaries are
    /// retry anchors").
    pub async fn get_step_output(&self, run_id: Uuid, step: &str) -> Result<Option<serde_json::Value>> {
        let run = self.fetch_run(run_id).await?;
        Ok(run.step_results.get(step).and_then(|v| v.get("output")).cloned())
    }

    /// Deletes anonymous Documents whose `expires_at` has passed (spec §3
    /// invariant (v): "Anonymous Documents carry an expiry; a background
    /// sweep removes them when expired"). Returns the number of rows
    /// removed.
    pub async fn sweep_expired_anonymous_documents(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE expires_at IS NOT NULL AND expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Registers an uploaded document's blob-store path and metadata ahead
    /// of partitioning (spec §3 Document lifecycle).
    pub async fn create_document(
        &self,
        user_id: Option<Uuid>,
        filename: &str,
        byte_size: i64,
        storage_path: &str,
        access_level: AccessLevel,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO documents
                (id, user_id, filename, byte_size, status, storage_path, access_level, expires_at, step_results)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, '{}'::jsonb)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(filename)
        .bind(byte_size)
        .bind(storage_path)
        .bind(access_level)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn fetch_document(&self, document_id: Uuid) -> Result<Document> {
        sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ConstructionRagError::NotFound(document_id.to_string()))
    }

    /// Creates a Query Run row before C12 runs, so progress is observable
    /// even while generation is in flight.
    pub async fn create_query_run(&self, indexing_run_id: Uuid, original_query: &str, access_level: AccessLevel) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO query_runs (id, indexing_run_id, original_query, access_level)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(indexing_run_id)
        .bind(original_query)
        .bind(access_level)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn complete_query_run(
        &self,
        query_run_id: Uuid,
        variations: serde_json::Value,
        results: serde_json::Value,
        response: &str,
        step_timings: serde_json::Value,
        metrics: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE query_runs
            SET variations = $2, results = $3, response = $4, step_timings = $5, metrics = $6,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(query_run_id)
        .bind(variations)
        .bind(results)
        .bind(response)
        .bind(step_timings)
        .bind(metrics)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch_query_run(&self, query_run_id: Uuid) -> Result<QueryRun> {
        sqlx::query_as::<_, QueryRun>("SELECT * FROM query_runs WHERE id = $1")
            .bind(query_run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ConstructionRagError::NotFound(query_run_id.to_string()))
    }

    /// Creates a Checklist Analysis Run row in `pending` status (spec
    /// §4.13).
    pub async fn create_checklist_run(
        &self,
        indexing_run_id: Uuid,
        user_id: Option<Uuid>,
        checklist_text: &str,
        checklist_name: &str,
        model: &str,
        access_level: AccessLevel,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO checklist_analysis_runs
                (id, indexing_run_id, user_id, checklist_text, checklist_name, model, status,
                 current_step, total_steps, access_level)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, 4, $7)
            "#,
        )
        .bind(id)
        .bind(indexing_run_id)
        .bind(user_id)
        .bind(checklist_text)
        .bind(checklist_name)
        .bind(model)
        .bind(access_level)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn update_checklist_progress(&self, analysis_id: Uuid, current_step: i32) -> Result<()> {
        sqlx::query("UPDATE checklist_analysis_runs SET current_step = $2, updated_at = now() WHERE id = $1")
            .bind(analysis_id)
            .bind(current_step)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_checklist_status(
        &self,
        analysis_id: Uuid,
        status: RunStatus,
        raw_analysis: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE checklist_analysis_runs
            SET status = $2, raw_analysis = COALESCE($3, raw_analysis),
                error_message = COALESCE($4, error_message), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(analysis_id)
        .bind(status)
        .bind(raw_analysis)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_checklist_results(&self, results: &[ChecklistResult]) -> Result<()> {
        for result in results {
            sqlx::query(
                r#"
                INSERT INTO checklist_results
                    (id, analysis_id, item_number, item_name, verdict, description, confidence,
                     primary_source_document, primary_source_page, primary_source_excerpt, all_sources)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(result.id)
            .bind(result.analysis_id)
            .bind(result.item_number)
            .bind(&result.item_name)
            .bind(result.verdict)
            .bind(&result.description)
            .bind(result.confidence)
            .bind(result.primary_source_document)
            .bind(result.primary_source_page)
            .bind(&result.primary_source_excerpt)
            .bind(&result.all_sources)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn fetch_checklist_run(&self, analysis_id: Uuid) -> Result<ChecklistAnalysisRun> {
        sqlx::query_as::<_, ChecklistAnalysisRun>("SELECT * FROM checklist_analysis_runs WHERE id = $1")
            .bind(analysis_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ConstructionRagError::NotFound(analysis_id.to_string()))
    }

    pub async fn fetch_checklist_results(&self, analysis_id: Uuid) -> Result<Vec<ChecklistResult>> {
        Ok(sqlx::query_as::<_, ChecklistResult>(
            "SELECT * FROM checklist_results WHERE analysis_id = $1 ORDER BY item_number ASC",
        )
        .bind(analysis_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filters_are_unconstrained() {
        let filters = RunFilters::default();
        assert!(filters.status.is_none());
        assert!(filters.user_id.is_none());
    }
}
