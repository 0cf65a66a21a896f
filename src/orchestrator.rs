//! C11 Indexing Orchestrator (spec §4.11): drives C6→C10 per document and
//! persists a step boundary after each stage. State-machine shape grounded
//! on the teacher's saga step-state machine, collapsed from a
//! compensating/rollback design down to the forward-only progression the
//! spec calls for — there is no compensation step here, since partition,
//! enrichment and chunking outputs are all safely re-derivable and chunks
//! are never rolled back once embedded.

use crate::blobs::BlobStore;
use crate::chunk::{self, PendingChunk};
use crate::config::PipelineConfig;
use crate::db::models::{AccessLevel, RunStatus};
use crate::db::run_store::RunStore;
use crate::embed::{self, EmbedOutcome};
use crate::enrich::{metadata, vlm_enrich};
use crate::error::{ConstructionRagError, Result, TimeoutError};
use crate::gateway::embedder::EmbedderClient;
use crate::gateway::vlm::VlmClient;
use crate::partition::elements::PartitionResult;
use crate::partition::Partitioner;
use crate::vector::VectorIndex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

const STEP_PARTITION: &str = "partition";
const STEP_METADATA: &str = "metadata";
const STEP_ENRICHMENT: &str = "enrichment";
const STEP_CHUNKING: &str = "chunking";
const STEP_EMBEDDING: &str = "embedding";
const TOTAL_STEPS: u32 = 5;

/// One document's bytes plus the namespace its blobs should be written
/// under (spec §4.3 namespacing convention).
pub struct DocumentInput {
    pub document_id: Uuid,
    pub pdf_bytes: Vec<u8>,
    pub namespace: String,
}

pub struct IndexingOrchestrator {
    run_store: Arc<RunStore>,
    blob_store: Arc<dyn BlobStore>,
    partitioner: Arc<Partitioner>,
    vlm: Arc<dyn VlmClient>,
    embedder: Arc<dyn EmbedderClient>,
    vector_index: Arc<VectorIndex>,
    wall_clock_budget: Duration,
}

impl IndexingOrchestrator {
    pub fn new(
        run_store: Arc<RunStore>,
        blob_store: Arc<dyn BlobStore>,
        partitioner: Arc<Partitioner>,
        vlm: Arc<dyn VlmClient>,
        embedder: Arc<dyn EmbedderClient>,
        vector_index: Arc<VectorIndex>,
        wall_clock_budget: Duration,
    ) -> Self {
        Self {
            run_store,
            blob_store,
            partitioner,
            vlm,
            embedder,
            vector_index,
            wall_clock_budget,
        }
    }

    /// Runs the full pipeline for `run_id` against `documents`, enforcing
    /// the Run's overall wall-clock budget (spec §4.11, §7 `TimeoutError`).
    pub async fn run(
        &self,
        run_id: Uuid,
        documents: Vec<DocumentInput>,
        config: &PipelineConfig,
        access_level: AccessLevel,
    ) -> Result<()> {
        let budget = self.wall_clock_budget;
        match tokio::time::timeout(budget, self.run_inner(run_id, documents, config, access_level)).await {
            Ok(result) => result,
            Err(_) => {
                let timeout = TimeoutError {
                    run_id,
                    budget_secs: budget.as_secs(),
                };
                let _ = self
                    .run_store
                    .update_status(run_id, RunStatus::Failed, Some(&timeout.to_string()))
                    .await;
                Err(ConstructionRagError::Timeout(timeout))
            }
        }
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        documents: Vec<DocumentInput>,
        config: &PipelineConfig,
        access_level: AccessLevel,
    ) -> Result<()> {
        self.run_store
            .update_status(run_id, RunStatus::Running, None)
            .await?;

        match self.drive_steps(run_id, documents, config, access_level).await {
            Ok(()) => {
                self.run_store
                    .update_status(run_id, RunStatus::Completed, None)
                    .await?;
                info!(run_id = %run_id, "indexing run completed");
                Ok(())
            }
            Err(err) => {
                error!(run_id = %run_id, %err, "indexing run failed");
                self.run_store
                    .update_status(run_id, RunStatus::Failed, Some(&err.to_string()))
                    .await?;
                Err(err)
            }
        }
    }

    async fn drive_steps(
        &self,
        run_id: Uuid,
        documents: Vec<DocumentInput>,
        config: &PipelineConfig,
        access_level: AccessLevel,
    ) -> Result<()> {
        let mut partitioned: Vec<(Uuid, PartitionResult)> =
            if self.run_store.step_already_completed(run_id, STEP_PARTITION).await? {
                self.load_step(run_id, STEP_PARTITION).await?
            } else {
                let mut partitioned = Vec::new();
                for document in &documents {
                    let span = info_span!("partition", run_id = %run_id, document_id = %document.document_id);
                    let result = async {
                        self.partitioner
                            .partition(&document.pdf_bytes, &config.partition, &document.namespace)
                            .await
                    }
                    .instrument(span)
                    .await?;
                    partitioned.push((document.document_id, result));
                }
                self.finish_step(run_id, STEP_PARTITION, 1, &partitioned).await?;
                partitioned
            };

        if !self.run_store.step_already_completed(run_id, STEP_METADATA).await? {
            for (_, result) in partitioned.iter_mut() {
                metadata::enrich(result);
            }
            self.finish_step(run_id, STEP_METADATA, 2, &partitioned).await?;
        }

        if !self.run_store.step_already_completed(run_id, STEP_ENRICHMENT).await? {
            for (_, result) in partitioned.iter_mut() {
                vlm_enrich::enrich(
                    result,
                    self.blob_store.as_ref(),
                    self.vlm.as_ref(),
                    &config.vlm,
                    config.language,
                )
                .await?;
            }
            self.finish_step(run_id, STEP_ENRICHMENT, 3, &partitioned).await?;
        }

        let chunked: Vec<(Uuid, Vec<PendingChunk>)> =
            if self.run_store.step_already_completed(run_id, STEP_CHUNKING).await? {
                self.load_step(run_id, STEP_CHUNKING).await?
            } else {
                let mut chunked = Vec::new();
                for (document_id, result) in &partitioned {
                    chunked.push((*document_id, chunk::chunk_document(result, &config.chunking)));
                }
                self.finish_step(run_id, STEP_CHUNKING, 4, &chunked).await?;
                chunked
            };

        if !self.run_store.step_already_completed(run_id, STEP_EMBEDDING).await? {
            let mut total_outcome = EmbedOutcome::default();
            for (document_id, chunks) in &chunked {
                let outcome = embed::embed_and_index(
                    *document_id,
                    run_id,
                    chunks,
                    self.embedder.as_ref(),
                    self.vector_index.as_ref(),
                    &config.embedding,
                    access_level,
                )
                .await?;
                total_outcome.succeeded += outcome.succeeded;
                total_outcome.failed += outcome.failed;
            }
            embed::enforce_quality_gate(total_outcome, &config.embedding)?;
            self.finish_step(run_id, STEP_EMBEDDING, 5, &total_outcome).await?;
        }

        Ok(())
    }

    /// Loads a previously-completed step's recorded output back into its
    /// typed form, for a restarted Run to skip re-running the step's work
    /// (spec §4.11 "step boundaries are retry anchors").
    async fn load_step<T: serde::de::DeserializeOwned>(&self, run_id: Uuid, step: &str) -> Result<T> {
        let output = self
            .run_store
            .get_step_output(run_id, step)
            .await?
            .ok_or_else(|| {
                ConstructionRagError::Generic(anyhow::anyhow!(
                    "step {step} marked completed but has no recorded output for run {run_id}"
                ))
            })?;
        serde_json::from_value(output).map_err(ConstructionRagError::Serialization)
    }

    async fn finish_step(
        &self,
        run_id: Uuid,
        step: &str,
        current_step: u32,
        payload: &impl serde::Serialize,
    ) -> Result<()> {
        if self.run_store.step_already_completed(run_id, step).await? {
            return Ok(());
        }
        let summary = summarize(step, payload);
        self.run_store.record_step_result(run_id, step, summary).await?;
        self.run_store
            .update_progress(run_id, current_step, TOTAL_STEPS)
            .await?;
        Ok(())
    }
}

/// Step results persist the step's serialized output alongside a
/// completion marker (spec §4.11: "persist step result to C2"). Falls back
/// to a marker-only record if the payload somehow isn't serializable,
/// rather than failing the whole step over a logging concern.
fn summarize(step: &str, payload: &impl serde::Serialize) -> serde_json::Value {
    let output = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
    serde_json::json!({ "step": step, "completed": true, "output": output })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_constants_cover_all_five_stages() {
        let steps = [
            STEP_PARTITION,
            STEP_METADATA,
            STEP_ENRICHMENT,
            STEP_CHUNKING,
            STEP_EMBEDDING,
        ];
        assert_eq!(steps.len(), TOTAL_STEPS as usize);
    }
}
