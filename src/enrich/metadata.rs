//! C7 Metadata Enricher (spec §4.7): a pure, deterministic pass over a
//! [`PartitionResult`] that fills in `section_title` (inherited from the
//! nearest preceding heading), `page_context`, and `text_complexity`. No
//! teacher module does this directly; shaped after the teacher's general
//! preference for small synchronous transform functions over a trait
//! (visible in `config.rs`'s plain validation functions) since there is no
//! I/O here to abstract behind a trait.

use crate::partition::elements::{
    Element, ElementCategory, PageContext, PartitionResult, TextComplexity,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\s{0,3}(\d+(\.\d+)*\.?\s+[A-Z][^\n]{0,80}|[A-Z][A-Z0-9 ,/&-]{4,80})\s*$")
            .expect("heading pattern is a valid regex")
    })
}

/// Enriches every element in place: inherits section titles forward from
/// the most recent heading seen at or before an element's page, and derives
/// `page_context`/`text_complexity` from the element mix already recorded
/// in `page_analysis` (spec §4.7 "Section-title inheritance",
/// "`page_context` derivation").
pub fn enrich(result: &mut PartitionResult) {
    let section_titles = infer_section_titles(&result.text_elements);
    let page_context_by_page = derive_page_context(result);

    for element in result
        .text_elements
        .iter_mut()
        .chain(result.table_elements.iter_mut())
    {
        element.structural.section_title = section_titles.get(&element.page).cloned();
        element.structural.page_context = page_context_by_page.get(&element.page).copied();
        if matches!(element.category, ElementCategory::Text | ElementCategory::ListItem) {
            element.structural.text_complexity = Some(classify_text_complexity(&element.text));
        }
    }

    for page_analysis in &result.page_analysis {
        let has_tables = page_analysis.table_count > 0;
        let has_images = page_analysis.image_count > 0;
        for element in result
            .text_elements
            .iter_mut()
            .chain(result.table_elements.iter_mut())
        {
            if element.page == page_analysis.page {
                element.structural.has_tables_on_page = has_tables;
                element.structural.has_images_on_page = has_images;
            }
        }
    }
}

/// Walks elements in page order and records, for every page, the most
/// recent heading-shaped line of text seen so far (spec §4.7: "a section
/// title carries forward to every element until the next heading is seen,
/// including across pages with no heading of their own").
fn infer_section_titles(text_elements: &[Element]) -> HashMap<u32, String> {
    let mut ordered: Vec<&Element> = text_elements.iter().collect();
    ordered.sort_by_key(|e| e.page);

    let mut current_title: Option<String> = None;
    let mut titles = HashMap::new();

    for element in ordered {
        if let Some(captures) = heading_pattern().captures(&element.text) {
            current_title = Some(captures[1].trim().to_string());
        }
        titles.insert(element.page, current_title.clone().unwrap_or_default());
    }

    titles.retain(|_, title| !title.is_empty());
    titles
}

fn derive_page_context(result: &PartitionResult) -> HashMap<u32, PageContext> {
    result
        .page_analysis
        .iter()
        .map(|page| {
            let context = match (page.table_count > 0, page.image_count > 0) {
                (true, true) => PageContext::Mixed,
                (true, false) => PageContext::TablePage,
                (false, true) => PageContext::ImagePage,
                (false, false) => PageContext::TextOnly,
            };
            (page.page, context)
        })
        .collect()
}

/// Rough heuristic on sentence length and technical-token density (spec
/// §4.7: "`text_complexity` informs chunking's adaptive strategy, not
/// retrieval"). Not meant to be precise, only directionally useful.
fn classify_text_complexity(text: &str) -> TextComplexity {
    let word_count = text.split_whitespace().count();
    if word_count == 0 {
        return TextComplexity::Simple;
    }

    let avg_word_len: f64 =
        text.split_whitespace().map(|w| w.len()).sum::<usize>() as f64 / word_count as f64;
    let numeric_token_ratio = text
        .split_whitespace()
        .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
        .count() as f64
        / word_count as f64;

    if avg_word_len > 7.0 || numeric_token_ratio > 0.25 {
        TextComplexity::Complex
    } else if avg_word_len > 5.0 {
        TextComplexity::Medium
    } else {
        TextComplexity::Simple
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::elements::{
        DocumentMetadata, Enrichment, PageAnalysis, PageComplexity, ProcessingStrategy,
        StructuralMetadata,
    };

    fn text_element(page: u32, text: &str) -> Element {
        Element {
            id: format!("p{page}-text-0"),
            page,
            category: ElementCategory::Text,
            text: text.to_string(),
            image_path: None,
            bounding_box: None,
            structural: StructuralMetadata::default(),
            enrichment: Enrichment::default(),
        }
    }

    fn sample_result(text_elements: Vec<Element>) -> PartitionResult {
        let page_analysis = (1..=3)
            .map(|page| PageAnalysis {
                page,
                complexity: PageComplexity::TextOnly,
                table_count: 0,
                image_count: 0,
                needs_extraction: false,
                selectable_text_chars: 100,
            })
            .collect();

        PartitionResult {
            text_elements,
            table_elements: Vec::new(),
            extracted_pages: Default::default(),
            page_analysis,
            document_metadata: DocumentMetadata {
                title: None,
                total_pages: 3,
            },
            processing_strategy: ProcessingStrategy::Native,
        }
    }

    #[test]
    fn section_title_carries_forward_across_pages_without_a_heading() {
        let mut result = sample_result(vec![
            text_element(1, "1. INTRODUCTION\nSome body text here."),
            text_element(2, "More body text with no heading on this page."),
        ]);
        enrich(&mut result);
        assert_eq!(
            result.text_elements[0].structural.section_title.as_deref(),
            Some("1. INTRODUCTION")
        );
        assert_eq!(
            result.text_elements[1].structural.section_title.as_deref(),
            Some("1. INTRODUCTION")
        );
    }

    #[test]
    fn page_context_is_text_only_when_no_tables_or_images() {
        let mut result = sample_result(vec![text_element(1, "plain body text")]);
        enrich(&mut result);
        assert_eq!(
            result.text_elements[0].structural.page_context,
            Some(PageContext::TextOnly)
        );
    }

    #[test]
    fn highly_numeric_text_is_classified_complex() {
        let complexity = classify_text_complexity("Beam B12 spans 4500mm at 203kg/m3 load 1024.5kN");
        assert_eq!(complexity, TextComplexity::Complex);
    }
}
