//! C12 Query Pipeline (spec §4.12): query-variation, retrieval, generation,
//! each timed and recorded under `step_timings`. No direct teacher
//! analogue; shaped after the timed-call pattern in the teacher's
//! `llm/manager.rs` (wrap each provider call, record latency) paired with
//! the dedup-then-rank pattern from `memory.rs`'s `SearchResult` handling.

use crate::config::{GenerationConfig, Language, RetrievalConfig};
use crate::db::models::{Chunk, ScoredChunk};
use crate::error::Result;
use crate::gateway::embedder::EmbedderClient;
use crate::gateway::text_llm::{CompletionRequest, CompletionResponse, TextLlmClient};
use crate::vector::{self, VectorIndex};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize)]
pub struct StepTiming {
    pub step: &'static str,
    pub millis: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryMetrics {
    pub top_similarity: f32,
    pub count: usize,
    pub average_similarity: f32,
}

pub struct QueryOutcome {
    pub variations: Vec<String>,
    pub results: Vec<ScoredChunk>,
    pub response: String,
    pub step_timings: Vec<StepTiming>,
    pub metrics: QueryMetrics,
}

/// Runs the three sub-steps in order against an Indexing Run's scope (spec
/// §4.12).
pub async fn run_query(
    run_scope: Uuid,
    query: &str,
    text_llm: &dyn TextLlmClient,
    embedder: &dyn EmbedderClient,
    vector_index: &VectorIndex,
    retrieval: &RetrievalConfig,
    generation: &GenerationConfig,
    language: Language,
) -> Result<QueryOutcome> {
    let mut timings = Vec::new();

    let (variations, variation_ms) = time(|| generate_variations(query, text_llm, generation, language)).await?;
    timings.push(StepTiming { step: "query_variation", millis: variation_ms });

    let (results, retrieval_ms) =
        time(|| retrieve(run_scope, &variations, embedder, vector_index, retrieval, generation)).await?;
    timings.push(StepTiming { step: "retrieval", millis: retrieval_ms });

    let (response, generation_ms) = time(|| generate_answer(query, &results, text_llm, generation)).await?;
    timings.push(StepTiming { step: "generation", millis: generation_ms });

    let metrics = compute_metrics(&results);

    Ok(QueryOutcome {
        variations,
        results,
        response,
        step_timings: timings,
        metrics,
    })
}

async fn time<F, Fut, T>(f: F) -> Result<(T, u64)>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let started = Instant::now();
    let value = f().await?;
    Ok((value, started.elapsed().as_millis() as u64))
}

/// Step 1: asks the LLM for three variants of `query` in the Run's language
/// (spec §4.12 step 1: "a semantic paraphrase, a hypothetical-answer
/// rewrite, and a formal-register rewrite").
async fn generate_variations(
    query: &str,
    text_llm: &dyn TextLlmClient,
    generation: &GenerationConfig,
    language: Language,
) -> Result<Vec<String>> {
    let prompt = variation_prompt(query, language);
    let response = text_llm
        .complete(CompletionRequest {
            prompt: &prompt,
            model: &generation.model,
            max_tokens: generation.max_tokens,
            language_hint: language,
        })
        .await?;

    let variants: Vec<String> = response
        .text
        .lines()
        .map(|l| l.trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')').trim().to_string())
        .filter(|l| !l.is_empty())
        .take(3)
        .collect();

    if variants.is_empty() {
        Ok(vec![query.to_string()])
    } else {
        Ok(variants)
    }
}

fn variation_prompt(query: &str, language: Language) -> String {
    match language {
        Language::English => format!(
            "Produce exactly three rewrites of this query, one per line, no numbering: \
             (1) a semantic paraphrase, (2) a hypothetical-answer rewrite, (3) a formal-register \
             rewrite.\n\nQuery: {query}"
        ),
        Language::Danish => format!(
            "Lav præcis tre omskrivninger af denne forespørgsel, én pr. linje, uden nummerering: \
             (1) en semantisk omskrivning, (2) en hypotetisk-svar-omskrivning, (3) en formel \
             omskrivning.\n\nForespørgsel: {query}"
        ),
    }
}

/// Step 2: embeds all variants in one batched call, runs K-NN per variant,
/// unions and deduplicates by chunk id, sorts by similarity descending, and
/// keeps `top_k` — applying `similarity_floor` only after all of that (spec
/// §4.12 step 2, §4.5, §9).
async fn retrieve(
    run_scope: Uuid,
    variations: &[String],
    embedder: &dyn EmbedderClient,
    vector_index: &VectorIndex,
    retrieval: &RetrievalConfig,
    generation: &GenerationConfig,
) -> Result<Vec<ScoredChunk>> {
    let embeddings = embedder.embed(variations, &generation.model).await?;

    let mut by_chunk_id: HashMap<Uuid, ScoredChunk> = HashMap::new();
    for embedding in &embeddings {
        let matches = vector_index.search(embedding, retrieval.top_k, Some(run_scope)).await?;
        for scored in matches {
            by_chunk_id
                .entry(scored.chunk.id)
                .and_modify(|existing| {
                    if scored.similarity > existing.similarity {
                        *existing = scored.clone();
                    }
                })
                .or_insert(scored);
        }
    }

    let mut merged: Vec<ScoredChunk> = by_chunk_id.into_values().collect();
    merged.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(retrieval.top_k);

    Ok(vector::apply_similarity_floor(merged, retrieval.similarity_floor))
}

/// Step 3: asks the LLM to answer `query` grounded in the retrieved chunks,
/// instructed to cite `(document_short_id, page)` (spec §4.12 step 3).
async fn generate_answer(
    query: &str,
    results: &[ScoredChunk],
    text_llm: &dyn TextLlmClient,
    generation: &GenerationConfig,
) -> Result<String> {
    let context = results
        .iter()
        .map(|r| format!("[{}, p.{}] {}", short_id(r.chunk.document_id), page_of(&r.chunk), r.chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "Answer the question using only the provided sources. Cite every claim as \
         (document_short_id, page).\n\nSources:\n{context}\n\nQuestion: {query}"
    );

    let response = text_llm
        .complete(CompletionRequest {
            prompt: &prompt,
            model: &generation.model,
            max_tokens: generation.max_tokens,
            language_hint: Language::English,
        })
        .await?;

    Ok(response.text)
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn page_of(chunk: &Chunk) -> i64 {
    chunk
        .metadata
        .get("page")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

fn compute_metrics(results: &[ScoredChunk]) -> QueryMetrics {
    if results.is_empty() {
        return QueryMetrics { top_similarity: 0.0, count: 0, average_similarity: 0.0 };
    }
    let top_similarity = results.iter().map(|r| r.similarity).fold(f32::MIN, f32::max);
    let average_similarity = results.iter().map(|r| r.similarity).sum::<f32>() / results.len() as f32;
    QueryMetrics {
        top_similarity,
        count: results.len(),
        average_similarity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::gateway::text_llm::MockTextLlmClient;

    #[test]
    fn metrics_are_zeroed_for_empty_results() {
        let metrics = compute_metrics(&[]);
        assert_eq!(metrics.count, 0);
        assert_eq!(metrics.top_similarity, 0.0);
    }

    #[test]
    fn short_id_is_eight_hex_characters() {
        let id = Uuid::new_v4();
        assert_eq!(short_id(id).len(), 8);
    }

    #[tokio::test]
    async fn generate_variations_parses_three_lines_per_spec_step_1() {
        let mut mock = MockTextLlmClient::new();
        mock.expect_complete().returning(|_| {
            Ok(CompletionResponse {
                text: "1. What is the curing duration?\n2. Assume curing takes X hours, what is X?\n\
                       3. State the required concrete curing time."
                    .to_string(),
                tokens_used: Some(42),
            })
        });
        let generation = GenerationConfig::default();
        let variants = generate_variations("What is the curing time?", &mock, &generation, Language::English)
            .await
            .unwrap();
        assert_eq!(variants.len(), 3);
        assert!(variants[0].starts_with("What is the curing duration"));
    }

    #[tokio::test]
    async fn generate_variations_falls_back_to_original_query_when_unparseable() {
        let mut mock = MockTextLlmClient::new();
        mock.expect_complete()
            .returning(|_| Ok(CompletionResponse { text: "   \n  ".to_string(), tokens_used: None }));
        let generation = GenerationConfig::default();
        let variants = generate_variations("What is the curing time?", &mock, &generation, Language::English)
            .await
            .unwrap();
        assert_eq!(variants, vec!["What is the curing time?".to_string()]);
    }

    #[tokio::test]
    async fn generate_answer_forwards_llm_text_verbatim() {
        let mut mock = MockTextLlmClient::new();
        mock.expect_complete()
            .returning(|_| Ok(CompletionResponse { text: "Curing takes 28 days (doc1, p.4).".to_string(), tokens_used: Some(12) }));
        let generation = GenerationConfig::default();
        let answer = generate_answer("What is the curing time?", &[], &mock, &generation).await.unwrap();
        assert_eq!(answer, "Curing takes 28 days (doc1, p.4).");
    }
}
