//! Inbound library functions (spec §6 "Inbound"). No HTTP framework sits in
//! front of these — the HTTP API surface itself is out of scope (spec
//! Non-goals) — but the functions an API layer would call are in scope and
//! exercised directly here and in tests. Shaped after the DTO separation in
//! the teacher's (now-removed) `api.rs` without reproducing its routing.

use crate::blobs::{namespaced_path, BlobStore};
use crate::checklist::{self, ChecklistOutcome, DEFAULT_ANALYSIS_CHUNK_CAP};
use crate::config::{Language, PipelineConfig, Resolver, UploadType as ConfigUploadType};
use crate::db::models::{AccessLevel, ChecklistAnalysisRun, IndexingRun, QueryRun, RunStatus, UploadType};
use crate::db::run_store::RunStore;
use crate::error::{ConstructionRagError, Result};
use crate::gateway::embedder::EmbedderClient;
use crate::gateway::text_llm::TextLlmClient;
use crate::gateway::vlm::VlmClient;
use crate::orchestrator::{DocumentInput, IndexingOrchestrator};
use crate::partition::Partitioner;
use crate::query;
use crate::vector::VectorIndex;
use crate::worker_pool::WorkerPool;
use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// How long an anonymous upload's Document row survives before the
/// background sweep removes it (spec §3 invariant (v): "Anonymous
/// Documents carry an expiry; a background sweep removes them when
/// expired"). Open question resolved in DESIGN.md.
const ANONYMOUS_DOCUMENT_TTL: ChronoDuration = ChronoDuration::hours(24);

pub struct NewDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub user_id: Option<Uuid>,
}

/// Shared dependencies every facade function needs. Constructed once per
/// process by the `indexer` binary (or by tests, wired against in-memory
/// fakes).
pub struct AppContext {
    pub run_store: Arc<RunStore>,
    pub blob_store: Arc<dyn BlobStore>,
    pub vector_index: Arc<VectorIndex>,
    pub text_llm: Arc<dyn TextLlmClient>,
    pub vlm: Arc<dyn VlmClient>,
    pub embedder: Arc<dyn EmbedderClient>,
    pub worker_pool: Arc<WorkerPool>,
    pub run_wall_clock_budget: Duration,
}

impl AppContext {
    fn partitioner(&self) -> Arc<Partitioner> {
        Arc::new(Partitioner::new(self.blob_store.clone(), self.worker_pool.clone()))
    }

    fn orchestrator(&self) -> IndexingOrchestrator {
        IndexingOrchestrator::new(
            self.run_store.clone(),
            self.blob_store.clone(),
            self.partitioner(),
            self.vlm.clone(),
            self.embedder.clone(),
            self.vector_index.clone(),
            self.run_wall_clock_budget,
        )
    }
}

/// `start_indexing(documents[], config_overrides?, notification_email?) -> run_id`
/// (spec §6). Writes each document's bytes to blob storage, resolves the
/// effective configuration, creates the Run, and spawns the orchestrator.
/// Returns as soon as the Run is created — indexing proceeds in the
/// background and is observed via [`get_indexing_progress`].
pub async fn start_indexing(
    ctx: Arc<AppContext>,
    documents: Vec<NewDocument>,
    access_level: AccessLevel,
    project_id: Option<Uuid>,
    config_overrides: Option<&HashMap<String, serde_json::Value>>,
    notification_email: Option<&str>,
) -> Result<Uuid> {
    let (config_upload_type, db_upload_type) = if project_id.is_some() {
        (ConfigUploadType::UserProject, UploadType::UserProject)
    } else {
        (ConfigUploadType::Anonymous, UploadType::Anonymous)
    };
    let user_id = documents.first().and_then(|d| d.user_id);

    let config = Resolver::resolve(Language::English, config_upload_type, config_overrides)
        .map_err(ConstructionRagError::Config)?;

    let run_id = ctx
        .run_store
        .create_run(db_upload_type, user_id, access_level, project_id, &config, notification_email)
        .await?;

    let mut document_inputs = Vec::with_capacity(documents.len());
    let mut document_ids = Vec::with_capacity(documents.len());

    let expires_at = matches!(config_upload_type, ConfigUploadType::Anonymous)
        .then(|| chrono::Utc::now() + ANONYMOUS_DOCUMENT_TTL);

    for document in &documents {
        let owner = user_id.map(|id| id.to_string()).unwrap_or_else(|| "anon".to_string());
        let namespace = namespaced_path(&owner, "uploads", &run_id.to_string(), &document.filename);

        ctx.blob_store.put(&namespace, &document.bytes).await?;

        let document_id = ctx
            .run_store
            .create_document(
                document.user_id,
                &document.filename,
                document.bytes.len() as i64,
                &namespace,
                access_level,
                expires_at,
            )
            .await?;

        document_ids.push(document_id);
        document_inputs.push(DocumentInput {
            document_id,
            pdf_bytes: document.bytes.clone(),
            namespace,
        });
    }

    ctx.run_store.attach_documents(run_id, &document_ids).await?;

    let orchestrator = ctx.orchestrator();
    let config_for_task = config;
    tokio::spawn(async move {
        if let Err(err) = orchestrator.run(run_id, document_inputs, &config_for_task, access_level).await {
            warn!(run_id = %run_id, %err, "indexing run ended in error");
        }
    });

    info!(run_id = %run_id, document_count = documents.len(), "indexing started");
    Ok(run_id)
}

/// Spawns a background task that periodically sweeps expired anonymous
/// Documents (spec §3 invariant (v)). The host process calls this once at
/// startup; the task runs for the lifetime of the process.
pub fn spawn_anonymous_document_sweeper(run_store: Arc<RunStore>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match run_store.sweep_expired_anonymous_documents().await {
                Ok(count) if count > 0 => info!(count, "swept expired anonymous documents"),
                Ok(_) => {}
                Err(err) => warn!(%err, "failed to sweep expired anonymous documents"),
            }
        }
    });
}

/// `get_indexing_progress(run_id) -> {status, step, current/total, per_step_summary}`
/// (spec §6, polled every ~2s by callers).
pub async fn get_indexing_progress(ctx: &AppContext, run_id: Uuid) -> Result<IndexingRun> {
    ctx.run_store.fetch_run(run_id).await
}

/// `submit_query(run_id, text) -> query_run_id` (spec §6, §4.12).
pub async fn submit_query(ctx: Arc<AppContext>, run_id: Uuid, text: String, access_level: AccessLevel) -> Result<Uuid> {
    let run = ctx.run_store.fetch_run(run_id).await?;
    if run.status != RunStatus::Completed {
        return Err(ConstructionRagError::NotFound(format!(
            "run {run_id} is not completed, has status {:?}",
            run.status
        )));
    }

    let config = PipelineConfig::from_snapshot(run.config_snapshot.clone()).map_err(ConstructionRagError::Config)?;
    let query_run_id = ctx.run_store.create_query_run(run_id, &text, access_level).await?;

    let ctx_for_task = ctx.clone();
    let text_for_task = text.clone();
    tokio::spawn(async move {
        let outcome = query::run_query(
            run_id,
            &text_for_task,
            ctx_for_task.text_llm.as_ref(),
            ctx_for_task.embedder.as_ref(),
            ctx_for_task.vector_index.as_ref(),
            &config.retrieval,
            &config.generation,
            config.language,
        )
        .await;

        match outcome {
            Ok(outcome) => {
                let results_json = serde_json::to_value(
                    outcome
                        .results
                        .iter()
                        .map(|r| serde_json::json!({ "chunk_id": r.chunk.id, "similarity": r.similarity }))
                        .collect::<Vec<_>>(),
                )
                .unwrap_or(serde_json::Value::Array(vec![]));

                let _ = ctx_for_task
                    .run_store
                    .complete_query_run(
                        query_run_id,
                        serde_json::to_value(&outcome.variations).unwrap_or(serde_json::Value::Null),
                        results_json,
                        &outcome.response,
                        serde_json::to_value(&outcome.step_timings).unwrap_or(serde_json::Value::Null),
                        serde_json::to_value(&outcome.metrics).unwrap_or(serde_json::Value::Null),
                    )
                    .await;
            }
            Err(err) => warn!(query_run_id = %query_run_id, %err, "query pipeline failed"),
        }
    });

    Ok(query_run_id)
}

/// `get_query_run(id)` (spec §6).
pub async fn get_query_run(ctx: &AppContext, query_run_id: Uuid) -> Result<QueryRun> {
    ctx.run_store.fetch_query_run(query_run_id).await
}

/// `submit_checklist(run_id, text, name, model) -> analysis_id` (spec §6,
/// §4.13).
pub async fn submit_checklist(
    ctx: Arc<AppContext>,
    run_id: Uuid,
    checklist_text: String,
    checklist_name: String,
    model: String,
    user_id: Option<Uuid>,
    access_level: AccessLevel,
) -> Result<Uuid> {
    let run = ctx.run_store.fetch_run(run_id).await?;
    let config = PipelineConfig::from_snapshot(run.config_snapshot.clone()).map_err(ConstructionRagError::Config)?;

    let analysis_id = ctx
        .run_store
        .create_checklist_run(run_id, user_id, &checklist_text, &checklist_name, &model, access_level)
        .await?;

    let mut generation = config.generation.clone();
    generation.model = model;

    tokio::spawn(run_checklist_pipeline(
        ctx.clone(),
        run_id,
        analysis_id,
        checklist_text,
        generation,
        config.language,
    ));

    Ok(analysis_id)
}

async fn run_checklist_pipeline(
    ctx: Arc<AppContext>,
    run_id: Uuid,
    analysis_id: Uuid,
    checklist_text: String,
    generation: crate::config::GenerationConfig,
    language: crate::config::Language,
) {
    let result = run_checklist_steps(&ctx, run_id, analysis_id, &checklist_text, &generation, language).await;

    match result {
        Ok(ChecklistOutcome { raw_analysis, results, .. }) => {
            let _ = ctx
                .run_store
                .update_checklist_status(analysis_id, RunStatus::Completed, Some(&raw_analysis), None)
                .await;
            if let Err(err) = ctx.run_store.insert_checklist_results(&results).await {
                warn!(analysis_id = %analysis_id, %err, "failed to persist checklist results");
            }
        }
        Err(err) => {
            warn!(analysis_id = %analysis_id, %err, "checklist pipeline failed");
            let _ = ctx
                .run_store
                .update_checklist_status(analysis_id, RunStatus::Failed, None, Some(&err.to_string()))
                .await;
        }
    }
}

async fn run_checklist_steps(
    ctx: &AppContext,
    run_id: Uuid,
    analysis_id: Uuid,
    checklist_text: &str,
    generation: &crate::config::GenerationConfig,
    language: crate::config::Language,
) -> Result<ChecklistOutcome> {
    let items = checklist::generate_queries(checklist_text, ctx.text_llm.as_ref(), generation, language).await?;
    ctx.run_store.update_checklist_progress(analysis_id, 1).await?;

    let chunks = checklist::retrieve_for_items(
        &items,
        run_id,
        ctx.embedder.as_ref(),
        ctx.vector_index.as_ref(),
        generation,
        10,
    )
    .await?;
    ctx.run_store.update_checklist_progress(analysis_id, 2).await?;

    let raw_analysis = checklist::analyze(
        checklist_text,
        &chunks,
        ctx.text_llm.as_ref(),
        generation,
        DEFAULT_ANALYSIS_CHUNK_CAP,
    )
    .await?;
    ctx.run_store.update_checklist_progress(analysis_id, 3).await?;

    let results = checklist::structure(analysis_id, &items, &raw_analysis, ctx.text_llm.as_ref(), generation).await?;
    ctx.run_store.update_checklist_progress(analysis_id, 4).await?;

    Ok(ChecklistOutcome { items, raw_analysis, results })
}

/// `get_analysis(id)` (spec §6). Returns the Analysis Run row plus its
/// per-item results.
pub async fn get_analysis(ctx: &AppContext, analysis_id: Uuid) -> Result<(ChecklistAnalysisRun, Vec<crate::db::models::ChecklistResult>)> {
    let run = ctx.run_store.fetch_checklist_run(analysis_id).await?;
    let results = ctx.run_store.fetch_checklist_results(analysis_id).await?;
    Ok((run, results))
}

/// `error_webhook({run_id, error_message, error_stage})` (spec §6):
/// updates the Run to `failed`. Authentication by shared secret is an HTTP
/// concern of the (out-of-scope) API layer, not this function's job; this
/// is the effect the webhook has once authenticated.
pub async fn error_webhook(
    ctx: &AppContext,
    run_id: Uuid,
    error_message: &str,
    error_stage: &str,
) -> Result<()> {
    let message = match error_stage {
        "beam_timeout" => format!("upstream worker timed out: {error_message}"),
        "beam_cancelled" => format!("upstream worker was cancelled: {error_message}"),
        other => format!("{other}: {error_message}"),
    };
    ctx.run_store.update_status(run_id, RunStatus::Failed, Some(&message)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_webhook_message_tags_known_stages() {
        assert!(format!("{:?}", "beam_timeout").contains("beam_timeout"));
    }
}
