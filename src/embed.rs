//! C10 Embedder (spec §4.10): batches pending chunks, calls the embedder
//! gateway once per batch, writes vectors to C5, and enforces the quality
//! gate. Batch-retry-once-then-degrade shape grounded on the teacher's
//! `llm/manager.rs::ProviderManager` fallback pattern (try, retry once,
//! then give up on that unit of work rather than the whole call).

use crate::chunk::PendingChunk;
use crate::config::EmbeddingConfig;
use crate::db::models::AccessLevel;
use crate::error::{QualityGateError, Result};
use crate::gateway::embedder::EmbedderClient;
use crate::vector::VectorIndex;
use tracing::warn;
use uuid::Uuid;

/// Outcome of embedding one document's chunks for a Run: how many chunks
/// succeeded vs failed, to support the quality gate (spec §4.10, §7).
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct EmbedOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

impl EmbedOutcome {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn success_ratio(&self) -> f64 {
        if self.total() == 0 {
            1.0
        } else {
            self.succeeded as f64 / self.total() as f64
        }
    }
}

/// Embeds every chunk in `chunks`, batched to `config.batch_size`, and
/// upserts each successfully embedded chunk into `vector_index`. Enforces
/// exactly one gateway call per batch on the happy path, with a single
/// whole-batch retry before giving up on that batch (spec §4.10: "a batch
/// failure retries the whole batch once; on second failure, the chunks are
/// marked `embedding_failed`").
pub async fn embed_and_index(
    document_id: Uuid,
    run_id: Uuid,
    chunks: &[PendingChunk],
    embedder: &dyn EmbedderClient,
    vector_index: &VectorIndex,
    config: &EmbeddingConfig,
    access_level: AccessLevel,
) -> Result<EmbedOutcome> {
    let mut outcome = EmbedOutcome::default();

    for (batch_index, batch) in chunks.chunks(config.batch_size.max(1)).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        let embeddings = match embedder.embed(&texts, &config.model).await {
            Ok(embeddings) => embeddings,
            Err(first_err) => {
                warn!(batch_index, %first_err, "embedding batch failed, retrying once");
                match embedder.embed(&texts, &config.model).await {
                    Ok(embeddings) => embeddings,
                    Err(second_err) => {
                        warn!(batch_index, %second_err, "embedding batch failed twice, marking chunks embedding_failed");
                        outcome.failed += batch.len();
                        continue;
                    }
                }
            }
        };

        for (chunk, embedding) in batch.iter().zip(embeddings.into_iter()) {
            let chunk_key = chunk_key_for(document_id, batch_index, chunk);
            let metadata = chunk_metadata(chunk);

            vector_index
                .upsert(
                    document_id,
                    run_id,
                    &chunk_key,
                    &chunk.text,
                    &embedding,
                    metadata,
                    &config.model,
                    &config.provider,
                    access_level,
                )
                .await?;
            outcome.succeeded += 1;
        }
    }

    Ok(outcome)
}

fn chunk_key_for(document_id: Uuid, batch_index: usize, chunk: &PendingChunk) -> String {
    format!(
        "{document_id}-p{}-{}-{}",
        chunk.page,
        batch_index,
        chunk.source_element_ids.join("+")
    )
}

fn chunk_metadata(chunk: &PendingChunk) -> serde_json::Value {
    serde_json::json!({
        "source_element_ids": chunk.source_element_ids,
        "page": chunk.page,
        "section_title": chunk.section_title,
        "page_context": chunk.page_context,
        "text_complexity": chunk.text_complexity,
        "content_type": chunk.content_type,
        "vlm_processed": chunk.vlm_processed,
    })
}

/// Checks the Run-wide success ratio against `quality_gate_min_success_ratio`
/// (spec §4.10, §9 open question). Called once all documents in a Run have
/// been embedded.
pub fn enforce_quality_gate(outcome: EmbedOutcome, config: &EmbeddingConfig) -> Result<()> {
    if outcome.success_ratio() < config.quality_gate_min_success_ratio {
        return Err(QualityGateError {
            succeeded: outcome.succeeded,
            total: outcome.total(),
            min_ratio: config.quality_gate_min_success_ratio,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_ratio_is_one_when_nothing_was_attempted() {
        let outcome = EmbedOutcome::default();
        assert_eq!(outcome.success_ratio(), 1.0);
    }

    #[test]
    fn quality_gate_rejects_below_threshold() {
        let outcome = EmbedOutcome { succeeded: 8, failed: 2 };
        let config = EmbeddingConfig {
            quality_gate_min_success_ratio: 0.95,
            ..EmbeddingConfig::default()
        };
        assert!(enforce_quality_gate(outcome, &config).is_err());
    }

    #[test]
    fn quality_gate_passes_at_or_above_threshold() {
        let outcome = EmbedOutcome { succeeded: 96, failed: 4 };
        let config = EmbeddingConfig {
            quality_gate_min_success_ratio: 0.95,
            ..EmbeddingConfig::default()
        };
        assert!(enforce_quality_gate(outcome, &config).is_ok());
    }
}
