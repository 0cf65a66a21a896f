//! Transient element model produced by C6 and consumed by C7-C9 (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementCategory {
    Text,
    Table,
    FullPageImage,
    ListItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageComplexity {
    TextOnly,
    Simple,
    Complex,
    Fragmented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageContext {
    TextOnly,
    ImagePage,
    TablePage,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextComplexity {
    Simple,
    Medium,
    Complex,
}

/// One element of the document: a text block, a table region, a full
/// rendered page, or a list item. Carries structural metadata from C6 and,
/// after C7/C8, enrichment from the metadata and VLM enrichers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub page: u32,
    pub category: ElementCategory,
    /// Empty for `table`/`full_page_image` elements until a VLM caption is
    /// attached (spec §4.6 Stage 3/4).
    pub text: String,
    /// Path to the rendered PNG for `table`/`full_page_image` elements.
    pub image_path: Option<String>,
    pub bounding_box: Option<BoundingBox>,
    pub structural: StructuralMetadata,
    pub enrichment: Enrichment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Metadata attached during partitioning, before any enrichment pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuralMetadata {
    pub section_title: Option<String>,
    pub page_context: Option<PageContext>,
    pub text_complexity: Option<TextComplexity>,
    pub has_tables_on_page: bool,
    pub has_images_on_page: bool,
    /// Page had `needs_extraction = true`; its text was deliberately
    /// skipped in favour of a VLM caption (spec §4.6 Stage 2/Scanned-path).
    pub needs_extraction: bool,
}

/// Populated by C8, the VLM Enricher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Enrichment {
    pub full_page_image_caption: Option<String>,
    pub table_image_caption: Option<String>,
    /// True when this element's text originates from a VLM caption rather
    /// than extracted/OCR'd text (spec §8 testable property: "no emitted
    /// text chunk has p as sole source page unless ... tag
    /// `vlm_processed=true`").
    pub vlm_processed: bool,
}

/// Per-page analysis produced once by Stage 1 and threaded through both the
/// native and scanned paths (DESIGN.md open-question decision: a single
/// shared artefact rather than re-deriving it independently per path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub page: u32,
    pub complexity: PageComplexity,
    pub table_count: usize,
    pub image_count: usize,
    pub needs_extraction: bool,
    pub selectable_text_chars: usize,
}

/// Map of page number -> rendered extraction artefact (spec §4.6 output
/// contract: "extracted_pages (map of page -> image path + DPI +
/// complexity)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub image_path: String,
    pub dpi: u32,
    pub complexity: PageComplexity,
}

/// The uniform output of C6 regardless of native/scanned path (spec §4.6
/// "Output contract").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionResult {
    pub text_elements: Vec<Element>,
    pub table_elements: Vec<Element>,
    pub extracted_pages: HashMap<u32, ExtractedPage>,
    pub page_analysis: Vec<PageAnalysis>,
    pub document_metadata: DocumentMetadata,
    pub processing_strategy: ProcessingStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStrategy {
    Native,
    Scanned,
    ScannedFallbackToNative,
}
