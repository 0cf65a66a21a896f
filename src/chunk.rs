//! C9 Chunker (spec §4.9): composes enriched elements into chunks, keeping
//! tables and images whole and splitting long text per the configured
//! strategy. Recursive-splitting shape (ordered separator cascade, overlap
//! carried into the next chunk) is grounded on the teacher's
//! content-chunking module, generalized here to the three strategies the
//! spec names (adaptive/recursive/semantic) instead of the teacher's single
//! fixed-size splitter.

use crate::config::{ChunkingConfig, ChunkingStrategy};
use crate::partition::elements::{Element, ElementCategory, PageContext, PartitionResult, TextComplexity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Table,
    FullPageImage,
    ListGroup,
}

/// A chunk awaiting embedding. Carries enough provenance to reconstruct the
/// `document_chunks` row once C10 attaches a vector (spec §4.9 "Every
/// emitted chunk carries...").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChunk {
    pub source_element_ids: Vec<String>,
    pub page: u32,
    pub section_title: Option<String>,
    pub page_context: Option<PageContext>,
    pub text_complexity: Option<TextComplexity>,
    pub content_type: ContentType,
    pub vlm_processed: bool,
    pub text: String,
}

/// Composes a whole [`PartitionResult`] (post C7/C8 enrichment) into chunks
/// in document order (spec §4.9).
pub fn chunk_document(result: &PartitionResult, config: &ChunkingConfig) -> Vec<PendingChunk> {
    let mut chunks = Vec::new();

    chunks.extend(chunk_tables_and_images(&result.table_elements, config));
    chunks.extend(chunk_text(&result.text_elements, config));

    chunks.sort_by_key(|c| c.page);
    chunks
}

/// Rule 1 (tables) and rule 2 (full-page images): one chunk each, never
/// split unless a full-page caption exceeds `max_chunk_size`, in which case
/// it is split semantically while every resulting chunk keeps the source
/// element's metadata (spec §4.9 rule 2).
fn chunk_tables_and_images(elements: &[Element], config: &ChunkingConfig) -> Vec<PendingChunk> {
    let mut chunks = Vec::new();

    for element in elements {
        let content_type = match element.category {
            ElementCategory::Table => ContentType::Table,
            _ => ContentType::FullPageImage,
        };

        let text = match content_type {
            ContentType::Table => element
                .enrichment
                .table_image_caption
                .clone()
                .unwrap_or_else(|| table_serialization_fallback(element)),
            _ => element
                .enrichment
                .full_page_image_caption
                .clone()
                .unwrap_or_default(),
        };

        if content_type == ContentType::FullPageImage && text.len() > config.max_chunk_size {
            for piece in recursive_split(&text, config.max_chunk_size, config.overlap, &config.separators) {
                chunks.push(PendingChunk {
                    source_element_ids: vec![element.id.clone()],
                    page: element.page,
                    section_title: element.structural.section_title.clone(),
                    page_context: element.structural.page_context,
                    text_complexity: element.structural.text_complexity,
                    content_type,
                    vlm_processed: element.enrichment.vlm_processed,
                    text: piece,
                });
            }
        } else {
            chunks.push(PendingChunk {
                source_element_ids: vec![element.id.clone()],
                page: element.page,
                section_title: element.structural.section_title.clone(),
                page_context: element.structural.page_context,
                text_complexity: element.structural.text_complexity,
                content_type,
                vlm_processed: element.enrichment.vlm_processed,
                text,
            });
        }
    }

    chunks
}

/// A table with no VLM caption still needs a textual representation, so it
/// is never silently dropped (spec §4.9 rule 1 "else a textual table
/// serialisation").
fn table_serialization_fallback(element: &Element) -> String {
    if element.text.trim().is_empty() {
        format!("[table on page {} — no caption or extracted text available]", element.page)
    } else {
        element.text.clone()
    }
}

/// Rule 3 (list items) and rule 4 (text): groups consecutive `list_item`
/// elements with the preceding non-list `text` element, then concatenates
/// runs of elements sharing the same inherited section title, before
/// applying the configured splitting strategy.
fn chunk_text(elements: &[Element], config: &ChunkingConfig) -> Vec<PendingChunk> {
    let groups = group_by_section_and_list_membership(elements);
    let mut chunks = Vec::new();

    for group in groups {
        let combined_text = group
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        if combined_text.trim().is_empty() {
            continue;
        }

        let first = group[0];
        let content_type = if group.iter().any(|e| e.category == ElementCategory::ListItem) {
            ContentType::ListGroup
        } else {
            ContentType::Text
        };

        let target_size = target_chunk_size(config, first.structural.text_complexity);
        let pieces = split_for_strategy(&combined_text, config, target_size);

        for piece in pieces {
            chunks.push(PendingChunk {
                source_element_ids: group.iter().map(|e| e.id.clone()).collect(),
                page: first.page,
                section_title: first.structural.section_title.clone(),
                page_context: first.structural.page_context,
                text_complexity: first.structural.text_complexity,
                content_type,
                vlm_processed: false,
                text: piece,
            });
        }
    }

    chunks
}

/// Groups elements by contiguous runs that share a section title, folding
/// any `list_item` run into the immediately preceding non-list `text`
/// element's group (spec §4.9 rule 3, rule 4).
fn group_by_section_and_list_membership(elements: &[Element]) -> Vec<Vec<&Element>> {
    let mut ordered: Vec<&Element> = elements
        .iter()
        .filter(|e| matches!(e.category, ElementCategory::Text | ElementCategory::ListItem))
        .collect();
    ordered.sort_by_key(|e| e.page);

    let mut groups: Vec<Vec<&Element>> = Vec::new();
    for element in ordered {
        let same_section = groups.last().is_some_and(|group: &Vec<&Element>| {
            group.last().unwrap().structural.section_title == element.structural.section_title
        });
        if same_section {
            groups.last_mut().unwrap().push(element);
        } else {
            groups.push(vec![element]);
        }
    }
    groups
}

fn target_chunk_size(config: &ChunkingConfig, complexity: Option<TextComplexity>) -> usize {
    match config.strategy {
        ChunkingStrategy::Adaptive => match complexity.unwrap_or(TextComplexity::Medium) {
            TextComplexity::Simple => 1500,
            TextComplexity::Medium => 1000,
            TextComplexity::Complex => 600,
        },
        ChunkingStrategy::Recursive | ChunkingStrategy::Semantic => config.chunk_size,
    }
}

fn split_for_strategy(text: &str, config: &ChunkingConfig, target_size: usize) -> Vec<String> {
    match config.strategy {
        ChunkingStrategy::Adaptive => recursive_split(text, target_size, config.overlap, &config.separators),
        ChunkingStrategy::Recursive => {
            recursive_split(text, config.chunk_size, config.overlap, &config.separators)
        }
        ChunkingStrategy::Semantic => {
            if text.len() > config.max_chunk_size {
                recursive_split(text, config.max_chunk_size, config.overlap, &config.separators)
            } else {
                vec![text.to_string()]
            }
        }
    }
}

/// Splits `text` at the first separator in `separators` that yields pieces
/// no larger than `target_size`, falling through to the next (finer)
/// separator otherwise, down to a hard character split as the final
/// fallback (spec §4.9: "splitting at ordered separators `\"\n\n\" > \"\n\"
/// > \". \" > \" \" > \"\"`"). Adjacent pieces carry `overlap` characters of
/// trailing context from the previous piece, matching the teacher's
/// overlap-carrying splitter.
fn recursive_split(text: &str, target_size: usize, overlap: usize, separators: &[String]) -> Vec<String> {
    if text.len() <= target_size {
        return vec![text.to_string()];
    }

    for separator in separators {
        if separator.is_empty() {
            continue;
        }
        let parts: Vec<&str> = text.split(separator.as_str()).collect();
        if parts.len() < 2 {
            continue;
        }
        return merge_parts_into_chunks(&parts, separator, target_size, overlap);
    }

    // Final fallback: hard character split, still producing overlap.
    hard_split(text, target_size, overlap)
}

fn merge_parts_into_chunks(parts: &[&str], separator: &str, target_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for part in parts {
        let candidate_len = current.len() + separator.len() + part.len();
        if !current.is_empty() && candidate_len > target_size {
            chunks.push(current.clone());
            let tail: String = current.chars().rev().take(overlap).collect::<Vec<_>>().into_iter().rev().collect();
            current = tail;
        }
        if !current.is_empty() {
            current.push_str(separator);
        }
        current.push_str(part);
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .flat_map(|c| {
            if c.len() > target_size {
                hard_split(&c, target_size, overlap)
            } else {
                vec![c]
            }
        })
        .collect()
}

fn hard_split(text: &str, target_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + target_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::elements::{
        BoundingBox, DocumentMetadata, Enrichment, PageAnalysis, PageComplexity, ProcessingStrategy,
        StructuralMetadata,
    };
    use proptest::prelude::*;

    fn text_element(id: &str, page: u32, section: &str, text: &str) -> Element {
        Element {
            id: id.to_string(),
            page,
            category: ElementCategory::Text,
            text: text.to_string(),
            image_path: None,
            bounding_box: None,
            structural: StructuralMetadata {
                section_title: Some(section.to_string()),
                ..Default::default()
            },
            enrichment: Enrichment::default(),
        }
    }

    fn table_element(id: &str, page: u32, caption: Option<&str>) -> Element {
        Element {
            id: id.to_string(),
            page,
            category: ElementCategory::Table,
            text: String::new(),
            image_path: Some(format!("{id}.png")),
            bounding_box: Some(BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0 }),
            structural: StructuralMetadata::default(),
            enrichment: Enrichment {
                table_image_caption: caption.map(str::to_string),
                full_page_image_caption: None,
                vlm_processed: caption.is_some(),
            },
        }
    }

    fn empty_result(text_elements: Vec<Element>, table_elements: Vec<Element>) -> PartitionResult {
        PartitionResult {
            text_elements,
            table_elements,
            extracted_pages: Default::default(),
            page_analysis: vec![PageAnalysis {
                page: 1,
                complexity: PageComplexity::TextOnly,
                table_count: 0,
                image_count: 0,
                needs_extraction: false,
                selectable_text_chars: 0,
            }],
            document_metadata: DocumentMetadata { title: None, total_pages: 1 },
            processing_strategy: ProcessingStrategy::Native,
        }
    }

    #[test]
    fn tables_become_exactly_one_chunk_each() {
        let result = empty_result(vec![], vec![table_element("t1", 1, Some("a caption"))]);
        let chunks = chunk_document(&result, &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content_type, ContentType::Table);
        assert_eq!(chunks[0].text, "a caption");
    }

    #[test]
    fn table_without_caption_falls_back_to_serialization_text() {
        let result = empty_result(vec![], vec![table_element("t1", 1, None)]);
        let chunks = chunk_document(&result, &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("table on page 1"));
    }

    #[test]
    fn consecutive_same_section_text_elements_merge_into_one_group() {
        let result = empty_result(
            vec![
                text_element("e1", 1, "Scope", "short text one."),
                text_element("e2", 1, "Scope", "short text two."),
            ],
            vec![],
        );
        let chunks = chunk_document(&result, &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_element_ids, vec!["e1", "e2"]);
    }

    #[test]
    fn different_section_titles_produce_separate_groups() {
        let result = empty_result(
            vec![
                text_element("e1", 1, "Scope", "short text one."),
                text_element("e2", 1, "Materials", "short text two."),
            ],
            vec![],
        );
        let chunks = chunk_document(&result, &ChunkingConfig::default());
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn recursive_split_respects_target_size_and_keeps_all_text() {
        let long_text = "word ".repeat(500);
        let pieces = recursive_split(&long_text, 100, 20, &crate::config::ChunkingConfig::default().separators);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| p.len() <= 140));
    }

    proptest! {
        /// `advance = end.saturating_sub(overlap).max(start + 1)` must make
        /// strictly forward progress regardless of how `overlap` compares to
        /// `target_size`, or `hard_split` loops forever on pathological
        /// configuration (spec §9 chunker grounding note).
        #[test]
        fn hard_split_always_terminates_and_covers_the_input(
            char_count in 0usize..400,
            target_size in 1usize..50,
            overlap in 0usize..80,
        ) {
            let text: String = "x".repeat(char_count);
            let chunks = hard_split(&text, target_size, overlap);

            let total_chars: usize = chunks.iter().map(|c| c.chars().count()).sum();
            prop_assert!(total_chars >= char_count);
            if !text.is_empty() {
                prop_assert!(!chunks.is_empty());
                prop_assert!(chunks.last().unwrap().ends_with('x'));
            }
        }
    }
}
