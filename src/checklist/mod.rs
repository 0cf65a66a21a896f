//! C13 Checklist Pipeline (spec §4.13): four steps run against an existing
//! Indexing Run's scope, producing one structured result per checklist
//! item. Same linear step-state-machine shape as C11; the structuring
//! step's tiered JSON recovery lives in [`parse`].

pub mod parse;

use crate::config::{GenerationConfig, Language};
use crate::db::models::{ChecklistResult, ChecklistVerdict, ScoredChunk};
use crate::error::{ConstructionRagError, ParseError, Result};
use crate::gateway::embedder::EmbedderClient;
use crate::gateway::text_llm::{CompletionRequest, TextLlmClient};
use crate::vector::VectorIndex;
use std::collections::HashMap;
use uuid::Uuid;

/// Cap on unique chunks handed to the analysis step (spec §4.13 step 3:
/// "up to a configured cap (e.g. 50) of unique chunks").
pub const DEFAULT_ANALYSIS_CHUNK_CAP: usize = 50;

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ChecklistItem {
    pub number: i32,
    pub name: String,
    pub description: String,
    pub queries: Vec<String>,
}

pub struct ChecklistOutcome {
    pub items: Vec<ChecklistItem>,
    pub raw_analysis: String,
    pub results: Vec<ChecklistResult>,
}

/// Step 1: parses the checklist text into items and emits 1-3 search
/// queries per item (spec §4.13 step 1).
pub async fn generate_queries(
    checklist_text: &str,
    text_llm: &dyn TextLlmClient,
    generation: &GenerationConfig,
    language: Language,
) -> Result<Vec<ChecklistItem>> {
    let prompt = format!(
        "Parse this checklist into numbered items. For each item, emit 1 to 3 search \
         queries that would find evidence of compliance in a construction document set. \
         Respond as a JSON array of objects with fields: number, name, description, queries \
         (array of strings).\n\nChecklist:\n{checklist_text}"
    );

    let response = text_llm
        .complete(CompletionRequest {
            prompt: &prompt,
            model: &generation.model,
            max_tokens: generation.max_tokens,
            language_hint: language,
        })
        .await?;

    let value = parse::parse_structured_output(&response.text)?;
    serde_json::from_value(value).map_err(|e| ConstructionRagError::Parse(ParseError::Strict(e.to_string())))
}

/// Step 2: embeds all items' queries in one batched call, runs K-NN per
/// query against the parent Run's scope, and unions/deduplicates chunks by
/// id (spec §4.13 step 2).
pub async fn retrieve_for_items(
    items: &[ChecklistItem],
    run_scope: Uuid,
    embedder: &dyn EmbedderClient,
    vector_index: &VectorIndex,
    generation: &GenerationConfig,
    top_k_per_query: usize,
) -> Result<Vec<ScoredChunk>> {
    let all_queries: Vec<String> = items.iter().flat_map(|i| i.queries.clone()).collect();
    if all_queries.is_empty() {
        return Ok(Vec::new());
    }

    let embeddings = embedder.embed(&all_queries, &generation.model).await?;

    let mut by_chunk_id: HashMap<Uuid, ScoredChunk> = HashMap::new();
    for embedding in &embeddings {
        let matches = vector_index.search(embedding, top_k_per_query, Some(run_scope)).await?;
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
    Ok(merged)
}

/// Step 3: asks the LLM for a free-text analysis grounded in document
/// references, capped to `chunk_cap` unique chunks (spec §4.13 step 3).
pub async fn analyze(
    checklist_text: &str,
    chunks: &[ScoredChunk],
    text_llm: &dyn TextLlmClient,
    generation: &GenerationConfig,
    chunk_cap: usize,
) -> Result<String> {
    let capped = &chunks[..chunks.len().min(chunk_cap)];
    let context = capped
        .iter()
        .map(|c| format!("[{}, p.{}] {}", short_id(c.chunk.document_id), page_of(c), c.chunk.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "Analyze this checklist against the provided sources. Ground every claim in a \
         document reference (document_short_id, page).\n\nChecklist:\n{checklist_text}\n\n\
         Sources:\n{context}"
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

/// Step 4: converts the raw analysis into one [`ChecklistResult`] per
/// checklist item (spec §4.13 step 4). `all_sources` is authoritative;
/// `primary_source_*` is filled from `all_sources[0]` as a derived
/// convenience projection (DESIGN.md open-question decision).
pub async fn structure(
    analysis_id: Uuid,
    items: &[ChecklistItem],
    raw_analysis: &str,
    text_llm: &dyn TextLlmClient,
    generation: &GenerationConfig,
) -> Result<Vec<ChecklistResult>> {
    let prompt = format!(
        "Convert this analysis into a JSON array, one object per checklist item, with fields: \
         item_number, item_name, verdict (one of: found, missing, risk, conditions, \
         pending_clarification), description, confidence (0.0-1.0 or null), and all_sources \
         (array of objects with document_short_id, page, excerpt).\n\nItems:\n{items:?}\n\n\
         Analysis:\n{raw_analysis}"
    );

    let response = text_llm
        .complete(CompletionRequest {
            prompt: &prompt,
            model: &generation.model,
            max_tokens: generation.max_tokens,
            language_hint: Language::English,
        })
        .await?;

    let value = parse::parse_structured_output(&response.text)?;
    let rows: Vec<StructuredRow> = serde_json::from_value(value)
        .map_err(|e| ConstructionRagError::Parse(ParseError::Strict(e.to_string())))?;

    Ok(rows
        .into_iter()
        .map(|row| row.into_checklist_result(analysis_id))
        .collect())
}

#[derive(serde::Deserialize)]
struct StructuredRow {
    item_number: i32,
    item_name: String,
    verdict: ChecklistVerdict,
    description: String,
    confidence: Option<f32>,
    all_sources: Vec<SourceRef>,
}

#[derive(serde::Deserialize, serde::Serialize, Clone)]
struct SourceRef {
    document_short_id: String,
    page: i32,
    excerpt: Option<String>,
}

impl StructuredRow {
    fn into_checklist_result(self, analysis_id: Uuid) -> ChecklistResult {
        let primary = self.all_sources.first().cloned();
        ChecklistResult {
            id: Uuid::new_v4(),
            analysis_id,
            item_number: self.item_number,
            item_name: self.item_name,
            verdict: self.verdict,
            description: self.description,
            confidence: self.confidence,
            primary_source_document: primary.as_ref().map(|s| s.document_short_id.clone()),
            primary_source_page: primary.as_ref().map(|s| s.page),
            primary_source_excerpt: primary.and_then(|s| s.excerpt),
            all_sources: serde_json::to_value(&self.all_sources).unwrap_or(serde_json::Value::Array(vec![])),
        }
    }
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn page_of(chunk: &ScoredChunk) -> i64 {
    chunk
        .chunk
        .metadata
        .get("page")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::text_llm::{CompletionResponse, MockTextLlmClient};

    #[test]
    fn analysis_chunk_cap_default_matches_spec_example() {
        assert_eq!(DEFAULT_ANALYSIS_CHUNK_CAP, 50);
    }

    #[tokio::test]
    async fn generate_queries_parses_llm_json_into_items() {
        let mut mock = MockTextLlmClient::new();
        mock.expect_complete().returning(|_| {
            Ok(CompletionResponse {
                text: r#"[{"number":1,"name":"Fire rating","description":"90-minute rating required","queries":["fire rating minutes","fire resistance door"]}]"#
                    .to_string(),
                tokens_used: Some(30),
            })
        });
        let generation = crate::config::GenerationConfig::default();
        let items = generate_queries("1. Fire rating: 90 minutes", &mock, &generation, Language::English)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].number, 1);
        assert_eq!(items[0].queries.len(), 2);
    }

    #[tokio::test]
    async fn generate_queries_recovers_json_wrapped_in_prose_via_tiered_parsing() {
        let mut mock = MockTextLlmClient::new();
        mock.expect_complete().returning(|_| {
            Ok(CompletionResponse {
                text: "Sure, here are the items:\n[{\"number\":1,\"name\":\"X\",\"description\":\"Y\",\"queries\":[\"z\"]}]\nLet me know if that helps!"
                    .to_string(),
                tokens_used: None,
            })
        });
        let generation = crate::config::GenerationConfig::default();
        let items = generate_queries("checklist", &mock, &generation, Language::English).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "X");
    }

    #[tokio::test]
    async fn analyze_grounds_prompt_in_checklist_and_caps_chunks() {
        let mut mock = MockTextLlmClient::new();
        mock.expect_complete()
            .returning(|_| Ok(CompletionResponse { text: "Fire rating confirmed at (doc1, p.2).".to_string(), tokens_used: Some(50) }));
        let generation = crate::config::GenerationConfig::default();
        let analysis = analyze("1. Fire rating", &[], &mock, &generation, DEFAULT_ANALYSIS_CHUNK_CAP)
            .await
            .unwrap();
        assert_eq!(analysis, "Fire rating confirmed at (doc1, p.2).");
    }

    #[tokio::test]
    async fn structure_converts_raw_analysis_into_one_result_per_item() {
        let mut mock = MockTextLlmClient::new();
        mock.expect_complete().returning(|_| {
            Ok(CompletionResponse {
                text: r#"[{"item_number":1,"item_name":"Fire rating","verdict":"found","description":"90 minutes confirmed","confidence":0.9,"all_sources":[{"document_short_id":"abc12345","page":2,"excerpt":"90-minute rating"}]}]"#
                    .to_string(),
                tokens_used: None,
            })
        });
        let generation = crate::config::GenerationConfig::default();
        let items = vec![ChecklistItem {
            number: 1,
            name: "Fire rating".to_string(),
            description: "90-minute rating required".to_string(),
            queries: vec!["fire rating".to_string()],
        }];
        let results = structure(Uuid::new_v4(), &items, "raw analysis text", &mock, &generation)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].verdict, ChecklistVerdict::Found);
        assert_eq!(results[0].primary_source_page, Some(2));
    }

    #[test]
    fn structured_row_derives_primary_source_from_first_entry() {
        let row = StructuredRow {
            item_number: 1,
            item_name: "Fire rating".to_string(),
            verdict: ChecklistVerdict::Found,
            description: "Rated at 90 minutes.".to_string(),
            confidence: Some(0.8),
            all_sources: vec![SourceRef {
                document_short_id: "abc12345".to_string(),
                page: 4,
                excerpt: Some("90-minute fire rating".to_string()),
            }],
        };
        let result = row.into_checklist_result(Uuid::new_v4());
        assert_eq!(result.primary_source_page, Some(4));
        assert_eq!(
            result.primary_source_excerpt.as_deref(),
            Some("90-minute fire rating")
        );
    }
}
