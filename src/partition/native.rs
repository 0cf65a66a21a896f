//! Native-path pipeline: a document with selectable text (spec §4.6
//! "Native-path pipeline"). Structural analysis walks `lopdf`'s object tree
//! directly (page/image enumeration, content-stream table detection) the
//! way `examples/bzsanti-oxidizePdf` walks its own parsed page tree;
//! rendering is delegated to [`super::raster`].

use super::elements::{
    BoundingBox, DocumentMetadata, Element, ElementCategory, ExtractedPage, PageAnalysis,
    PageComplexity, PartitionResult, ProcessingStrategy, StructuralMetadata,
};
use super::raster;
use crate::blobs::BlobStore;
use crate::config::PartitionConfig;
use crate::error::{PartitionError, Result};
use crate::worker_pool::WorkerPool;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// Minimum number of aligned rectangles before a cluster is treated as a
/// table grid rather than incidental box-drawing (borders, logos).
const MIN_TABLE_RECTS: usize = 3;
/// Tolerance, in PDF points, for two rectangles to be considered
/// column-aligned (same `x`) or row-aligned (same `width`).
const TABLE_ALIGNMENT_TOLERANCE: f32 = 2.0;

/// Raw per-page facts extracted from the PDF structure, before any
/// complexity classification.
struct RawPage {
    page: u32,
    selectable_text: String,
    image_areas: Vec<u64>,
    image_hashes: Vec<String>,
    table_boxes: Vec<BoundingBox>,
}

fn load_structure(pdf_bytes: &[u8]) -> Result<(Document, u32)> {
    let doc = Document::load_mem(pdf_bytes).map_err(|e| PartitionError::UnreadablePdf {
        path: "<in-memory>".to_string(),
        reason: e.to_string(),
    })?;
    let total_pages = doc.get_pages().len() as u32;
    Ok((doc, total_pages))
}

/// Stage 1: structural analysis. Classifies each page's complexity and
/// decides `needs_extraction` (spec §4.6 Stage 1).
fn stage1_structural_analysis(pages: &[RawPage], config: &PartitionConfig) -> Vec<PageAnalysis> {
    let mut seen_image_hashes: HashSet<String> = HashSet::new();

    pages
        .iter()
        .map(|page| {
            let (complexity, image_count, needs_extraction) = classify_page(
                &page.image_areas,
                &page.image_hashes,
                page.table_boxes.len(),
                page.selectable_text.trim().is_empty(),
                &mut seen_image_hashes,
                config,
            );

            PageAnalysis {
                page: page.page,
                complexity,
                table_count: page.table_boxes.len(),
                image_count,
                needs_extraction,
                selectable_text_chars: page.selectable_text.chars().count(),
            }
        })
        .collect()
}

/// Shared classification rule (spec §4.6 Stage 1), reused by the scanned
/// path so both paths apply "the same contract" the spec calls for.
pub(crate) fn classify_page(
    image_areas: &[u64],
    image_hashes: &[String],
    table_count: usize,
    selectable_text_is_empty: bool,
    seen_image_hashes: &mut HashSet<String>,
    config: &PartitionConfig,
) -> (PageComplexity, usize, bool) {
    let meaningful_image_count = image_areas
        .iter()
        .zip(image_hashes.iter())
        .filter(|(area, hash)| **area >= config.meaningful_image_min as u64 && seen_image_hashes.insert((*hash).clone()))
        .count();

    let fragmented = meaningful_image_count >= 4;
    let complexity = if fragmented {
        PageComplexity::Fragmented
    } else if table_count > 0 || meaningful_image_count > 0 {
        PageComplexity::Complex
    } else if !selectable_text_is_empty {
        PageComplexity::TextOnly
    } else {
        PageComplexity::Simple
    };

    let needs_extraction = table_count >= 1 || matches!(complexity, PageComplexity::Complex | PageComplexity::Fragmented);
    (complexity, meaningful_image_count, needs_extraction)
}

/// Stage 2: text extraction, skipped entirely on pages flagged
/// `needs_extraction` (spec §4.6 Stage 2 — the "intentional quality
/// contract").
fn stage2_text_extraction(pages: &[RawPage], analysis: &[PageAnalysis]) -> Vec<Element> {
    let mut elements = Vec::new();
    for (page, page_analysis) in pages.iter().zip(analysis.iter()) {
        if page_analysis.needs_extraction {
            continue;
        }
        if page.selectable_text.trim().is_empty() {
            continue;
        }
        elements.push(Element {
            id: format!("p{}-text-0", page.page),
            page: page.page,
            category: ElementCategory::Text,
            text: page.selectable_text.clone(),
            image_path: None,
            bounding_box: None,
            structural: StructuralMetadata {
                needs_extraction: false,
                ..Default::default()
            },
            enrichment: Default::default(),
        });
    }
    elements
}

/// Stage 3: table extraction. Renders each detected table region to PNG and
/// emits a `table` element with empty text per region (spec §4.6 Stage 3).
async fn stage3_table_extraction(
    pdf_bytes: &[u8],
    pages: &[RawPage],
    analysis: &[PageAnalysis],
    blob_store: &dyn BlobStore,
    worker_pool: &WorkerPool,
    namespace: &str,
    dpi: u32,
) -> Result<(Vec<Element>, HashMap<u32, ExtractedPage>)> {
    let mut elements = Vec::new();
    let mut extracted = HashMap::new();

    for (page, page_analysis) in pages.iter().zip(analysis.iter()) {
        for (idx, bbox) in page.table_boxes.iter().enumerate() {
            let page_bytes = pdf_bytes.to_vec();
            let page_number = page.page;
            let bbox = *bbox;
            let png_bytes = worker_pool
                .run_blocking(move || raster::render_table_crop(&page_bytes, page_number, dpi, &bbox))
                .await??;

            let path = format!("{namespace}/tables/page-{:04}-{idx}.png", page.page);
            blob_store.put(&path, &png_bytes).await?;

            extracted.insert(
                page.page,
                ExtractedPage {
                    image_path: path.clone(),
                    dpi,
                    complexity: page_analysis.complexity,
                },
            );

            elements.push(Element {
                id: format!("p{}-table-{idx}", page.page),
                page: page.page,
                category: ElementCategory::Table,
                text: String::new(),
                image_path: Some(path),
                bounding_box: Some(bbox),
                structural: StructuralMetadata {
                    needs_extraction: true,
                    has_tables_on_page: true,
                    ..Default::default()
                },
                enrichment: Default::default(),
            });
        }
    }

    Ok((elements, extracted))
}

/// Stage 4: full-page image extraction for pages flagged `needs_extraction`
/// that were not already fully handled as a pure table (spec §4.6 Stage 4).
/// DPI is scaled by complexity: fragmented > complex > simple.
async fn stage4_full_page_images(
    pdf_bytes: &[u8],
    pages: &[RawPage],
    analysis: &[PageAnalysis],
    blob_store: &dyn BlobStore,
    worker_pool: &WorkerPool,
    namespace: &str,
) -> Result<(Vec<Element>, HashMap<u32, ExtractedPage>)> {
    let mut elements = Vec::new();
    let mut extracted = HashMap::new();

    for (page, page_analysis) in pages.iter().zip(analysis.iter()) {
        if !page_analysis.needs_extraction {
            continue;
        }
        let is_pure_table_page =
            page_analysis.table_count > 0 && page.image_areas.len() <= page_analysis.table_count;
        if is_pure_table_page {
            continue;
        }

        let dpi = dpi_for_complexity(page_analysis.complexity);
        let page_bytes = pdf_bytes.to_vec();
        let page_number = page.page;
        let png_bytes = worker_pool
            .run_blocking(move || raster::render_full_page(&page_bytes, page_number, dpi))
            .await??;

        let path = format!("{namespace}/pages/page-{:04}.png", page.page);
        blob_store.put(&path, &png_bytes).await?;

        extracted.insert(
            page.page,
            ExtractedPage {
                image_path: path.clone(),
                dpi,
                complexity: page_analysis.complexity,
            },
        );

        elements.push(Element {
            id: format!("p{}-full-page", page.page),
            page: page.page,
            category: ElementCategory::FullPageImage,
            text: String::new(),
            image_path: Some(path),
            bounding_box: None,
            structural: StructuralMetadata {
                needs_extraction: true,
                has_images_on_page: true,
                ..Default::default()
            },
            enrichment: Default::default(),
        });
    }

    Ok((elements, extracted))
}

fn dpi_for_complexity(complexity: PageComplexity) -> u32 {
    match complexity {
        PageComplexity::Fragmented => 300,
        PageComplexity::Complex => 200,
        PageComplexity::Simple => 150,
        PageComplexity::TextOnly => 150,
    }
}

pub fn hash_image_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Resolves an indirect reference, passing a direct object through
/// unchanged.
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Walks page dict -> `/Resources` -> `/XObject` to find the dictionary
/// mapping resource names to image/form XObjects painted on this page.
fn page_xobjects<'a>(doc: &'a Document, page_id: ObjectId) -> Option<&'a Dictionary> {
    let page = doc.get_object(page_id).ok()?.as_dict().ok()?;
    let resources = resolve(doc, page.get(b"Resources").ok()?)?.as_dict().ok()?;
    let xobjects = resolve(doc, resources.get(b"XObject").ok()?)?.as_dict().ok()?;
    Some(xobjects)
}

fn as_u64(obj: Option<&Object>) -> u64 {
    match obj {
        Some(Object::Integer(i)) => (*i).max(0) as u64,
        Some(Object::Real(r)) => r.max(0.0) as u64,
        _ => 0,
    }
}

/// Enumerates the image XObjects actually painted on this page (via `Do`
/// operator invocations in its content stream), returning each one's pixel
/// area and a content hash used for cross-page dedup (spec §4.6 "meaningful
/// image" / logo-suppression). Enumerating through the object tree rather
/// than guessing from the resource dictionary alone means a declared-but-
/// unused XObject is never counted.
pub(crate) fn enumerate_images(doc: &Document, page_id: ObjectId, content: &Content) -> (Vec<u64>, Vec<String>) {
    let Some(xobjects) = page_xobjects(doc, page_id) else {
        return (Vec::new(), Vec::new());
    };

    let mut seen_names: HashSet<Vec<u8>> = HashSet::new();
    let mut areas = Vec::new();
    let mut hashes = Vec::new();

    for operation in &content.operations {
        if operation.operator != "Do" {
            continue;
        }
        let Some(Object::Name(name)) = operation.operands.first() else {
            continue;
        };
        if !seen_names.insert(name.clone()) {
            continue;
        }
        let Ok(entry) = xobjects.get(name.as_slice()) else {
            continue;
        };
        let Some(Object::Stream(stream)) = resolve(doc, entry) else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .ok()
            .map(|s| matches!(s, Object::Name(n) if n == b"Image"))
            .unwrap_or(false);
        if !is_image {
            continue;
        }

        let width = as_u64(stream.dict.get(b"Width").ok());
        let height = as_u64(stream.dict.get(b"Height").ok());
        areas.push(width * height);
        hashes.push(hash_image_bytes(&stream.content));
    }

    (areas, hashes)
}

fn as_f32(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Detects table-like regions from the page's vector graphics: a table
/// border is drawn as a grid of `re` (rectangle) operators sharing a
/// column (`x`) or row (`width`), the same signal
/// `examples/bzsanti-oxidizePdf`'s `text::table_detection` builds from
/// vector-line extraction, adapted here to `lopdf`'s content-stream
/// operator model instead of that crate's own parser.
pub(crate) fn detect_table_regions(content: &Content) -> Vec<BoundingBox> {
    let mut rects = Vec::new();
    for operation in &content.operations {
        if operation.operator == "re" && operation.operands.len() == 4 {
            if let (Some(x), Some(y), Some(w), Some(h)) = (
                as_f32(&operation.operands[0]),
                as_f32(&operation.operands[1]),
                as_f32(&operation.operands[2]),
                as_f32(&operation.operands[3]),
            ) {
                if w > 1.0 && h > 1.0 {
                    rects.push(BoundingBox { x, y, width: w, height: h });
                }
            }
        }
    }
    group_into_table_regions(rects)
}

fn group_into_table_regions(mut rects: Vec<BoundingBox>) -> Vec<BoundingBox> {
    rects.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));

    let mut used = vec![false; rects.len()];
    let mut regions = Vec::new();
    for i in 0..rects.len() {
        if used[i] {
            continue;
        }
        let mut group = vec![i];
        for (j, candidate) in rects.iter().enumerate().skip(i + 1) {
            if used[j] {
                continue;
            }
            if (candidate.x - rects[i].x).abs() <= TABLE_ALIGNMENT_TOLERANCE
                || (candidate.width - rects[i].width).abs() <= TABLE_ALIGNMENT_TOLERANCE
            {
                group.push(j);
            }
        }
        if group.len() >= MIN_TABLE_RECTS {
            for &idx in &group {
                used[idx] = true;
            }
            let min_x = group.iter().map(|&idx| rects[idx].x).fold(f32::MAX, f32::min);
            let min_y = group.iter().map(|&idx| rects[idx].y).fold(f32::MAX, f32::min);
            let max_x = group.iter().map(|&idx| rects[idx].x + rects[idx].width).fold(f32::MIN, f32::max);
            let max_y = group.iter().map(|&idx| rects[idx].y + rects[idx].height).fold(f32::MIN, f32::max);
            regions.push(BoundingBox {
                x: min_x,
                y: min_y,
                width: max_x - min_x,
                height: max_y - min_y,
            });
        }
    }
    regions
}

/// Extracts the raw per-page facts needed by Stage 1: selectable text via
/// `pdf-extract`'s per-page API, and image/table structure by decoding
/// each page's own content stream rather than the whole document's.
fn extract_raw_pages(pdf_bytes: &[u8], doc: &Document, total_pages: u32) -> Vec<RawPage> {
    let page_texts = pdf_extract::extract_text_from_mem_by_pages(pdf_bytes).unwrap_or_default();
    let page_ids = doc.get_pages();

    let mut pages = Vec::with_capacity(total_pages as usize);
    for page_number in 1..=total_pages {
        let selectable_text = page_texts
            .get((page_number - 1) as usize)
            .cloned()
            .unwrap_or_default();

        let page_id = page_ids.get(&page_number).copied();
        let content = page_id
            .and_then(|id| doc.get_page_content(id).ok())
            .and_then(|bytes| Content::decode(&bytes).ok());

        let (image_areas, image_hashes) = match (page_id, &content) {
            (Some(id), Some(content)) => enumerate_images(doc, id, content),
            _ => (Vec::new(), Vec::new()),
        };

        let table_boxes = content.as_ref().map(detect_table_regions).unwrap_or_default();

        pages.push(RawPage {
            page: page_number,
            selectable_text,
            image_areas,
            image_hashes,
            table_boxes,
        });
    }

    pages
}

/// Runs the full native pipeline (Stages 1-4) and produces the
/// partitioner's uniform output contract (spec §4.6).
pub async fn partition_native(
    pdf_bytes: &[u8],
    config: &PartitionConfig,
    blob_store: Arc<dyn BlobStore>,
    worker_pool: Arc<WorkerPool>,
    namespace: &str,
) -> Result<PartitionResult> {
    let (doc, total_pages) = load_structure(pdf_bytes)?;
    let pages = extract_raw_pages(pdf_bytes, &doc, total_pages);
    let page_analysis = stage1_structural_analysis(&pages, config);

    let text_elements = stage2_text_extraction(&pages, &page_analysis);

    let (table_elements, mut extracted_pages) = stage3_table_extraction(
        pdf_bytes,
        &pages,
        &page_analysis,
        blob_store.as_ref(),
        worker_pool.as_ref(),
        namespace,
        150,
    )
    .await?;

    let (full_page_elements, more_extracted) = stage4_full_page_images(
        pdf_bytes,
        &pages,
        &page_analysis,
        blob_store.as_ref(),
        worker_pool.as_ref(),
        namespace,
    )
    .await?;
    extracted_pages.extend(more_extracted);

    let mut all_table_elements = table_elements;
    all_table_elements.extend(full_page_elements);

    if pages.iter().any(|p| p.selectable_text.trim().is_empty()) {
        warn!("some pages produced no selectable text on the native path");
    }

    Ok(PartitionResult {
        text_elements,
        table_elements: all_table_elements,
        extracted_pages,
        page_analysis,
        document_metadata: DocumentMetadata {
            title: None,
            total_pages,
        },
        processing_strategy: ProcessingStrategy::Native,
    })
}
