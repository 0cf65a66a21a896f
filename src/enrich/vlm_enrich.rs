//! C8 VLM Enricher (spec §4.8): captions every `table` and `full_page_image`
//! element's rendered PNG, bounded to `vlm.max_concurrent_calls` in flight at
//! once via `futures::stream::buffer_unordered` over the rendered-image set.

use crate::blobs::BlobStore;
use crate::config::{Language, VlmConfig};
use crate::error::Result;
use crate::gateway::vlm::VlmClient;
use crate::partition::elements::{Element, ElementCategory, PartitionResult};
use futures::stream::{self, StreamExt};
use tracing::warn;

fn table_prompt(language: Language) -> &'static str {
    match language {
        Language::English => {
            "Describe this table's structure and contents precisely, preserving row and \
             column relationships. Do not summarize or omit values."
        }
        Language::Danish => {
            "Beskriv denne tabels struktur og indhold præcist, og bevar relationerne mellem \
             rækker og kolonner. Undlad at opsummere eller udelade værdier."
        }
    }
}

fn full_page_prompt(language: Language) -> &'static str {
    match language {
        Language::English => {
            "Describe everything visible on this construction document page: drawings, \
             diagrams, annotations, dimensions, and any text that is part of a figure."
        }
        Language::Danish => {
            "Beskriv alt synligt på denne side fra et byggedokument: tegninger, diagrammer, \
             annoteringer, mål og al tekst, der er en del af en figur."
        }
    }
}

/// Captions every table/full-page-image element that has a rendered image,
/// writing the result into `enrichment.table_image_caption` /
/// `enrichment.full_page_image_caption` and setting `vlm_processed = true`
/// (spec §8 testable property) on success. An element whose caption call
/// fails after the gateway's own retries keeps `vlm_processed = false` and
/// an empty caption; it is not fatal to the Run (spec §4.8 "Failures").
pub async fn enrich(
    result: &mut PartitionResult,
    blob_store: &dyn BlobStore,
    vlm: &dyn VlmClient,
    config: &VlmConfig,
    language: Language,
) -> Result<()> {
    let indices: Vec<usize> = result
        .table_elements
        .iter()
        .enumerate()
        .filter(|(_, e)| e.image_path.is_some())
        .map(|(i, _)| i)
        .collect();

    let captions = stream::iter(indices.into_iter().map(|index| {
        let image_path = result.table_elements[index].image_path.clone().unwrap();
        let category = result.table_elements[index].category;
        let prompt = match category {
            ElementCategory::Table => table_prompt(language),
            _ => full_page_prompt(language),
        };
        caption_one(blob_store, vlm, &config.model, image_path, prompt, index)
    }))
    .buffer_unordered(config.max_concurrent_calls.max(1))
    .collect::<Vec<_>>()
    .await;

    for outcome in captions {
        match outcome {
            Ok((index, caption)) => {
                let element = &mut result.table_elements[index];
                match element.category {
                    ElementCategory::Table => element.enrichment.table_image_caption = Some(caption.clone()),
                    _ => element.enrichment.full_page_image_caption = Some(caption.clone()),
                }
                element.text = caption;
                element.enrichment.vlm_processed = true;
            }
            Err((index, err)) => {
                let element_id = result.table_elements[index].id.clone();
                warn!(element_id, %err, "VLM captioning failed for element, leaving it unprocessed");
            }
        }
    }

    Ok(())
}

async fn caption_one(
    blob_store: &dyn BlobStore,
    vlm: &dyn VlmClient,
    model: &str,
    image_path: String,
    prompt: &'static str,
    index: usize,
) -> std::result::Result<(usize, String), (usize, crate::error::ConstructionRagError)> {
    async {
        let bytes = blob_store.get(&image_path).await?;
        let caption = vlm.caption(&bytes, prompt, model).await?;
        Ok(caption)
    }
    .await
    .map(|caption| (index, caption))
    .map_err(|err| (index, err))
}

/// Convenience accessor mirroring the spec's wording that captions "attach
/// to the element they describe", used by the chunker to decide whether an
/// element has VLM-sourced text (spec §4.9).
pub fn is_vlm_sourced(element: &Element) -> bool {
    element.enrichment.vlm_processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::InMemoryBlobStore;
    use crate::partition::elements::{
        BoundingBox, DocumentMetadata, Enrichment, PageAnalysis, PageComplexity,
        ProcessingStrategy, StructuralMetadata,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubVlm {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl VlmClient for StubVlm {
        async fn caption(&self, _image_bytes: &[u8], _prompt: &str, _model: &str) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok("a caption".to_string())
        }
    }

    fn table_element(id: &str, image_path: &str) -> Element {
        Element {
            id: id.to_string(),
            page: 1,
            category: ElementCategory::Table,
            text: String::new(),
            image_path: Some(image_path.to_string()),
            bounding_box: Some(BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
            }),
            structural: StructuralMetadata::default(),
            enrichment: Enrichment::default(),
        }
    }

    #[tokio::test]
    async fn tags_captioned_elements_as_vlm_processed() {
        let blob_store = InMemoryBlobStore::new();
        blob_store.put("img/0.png", b"fake png").await.unwrap();

        let mut result = PartitionResult {
            text_elements: Vec::new(),
            table_elements: vec![table_element("p1-table-0", "img/0.png")],
            extracted_pages: Default::default(),
            page_analysis: vec![PageAnalysis {
                page: 1,
                complexity: PageComplexity::Complex,
                table_count: 1,
                image_count: 0,
                needs_extraction: true,
                selectable_text_chars: 0,
            }],
            document_metadata: DocumentMetadata {
                title: None,
                total_pages: 1,
            },
            processing_strategy: ProcessingStrategy::Native,
        };

        let vlm = StubVlm { calls: Mutex::new(0) };
        let config = VlmConfig::default();
        enrich(&mut result, &blob_store, &vlm, &config, Language::English)
            .await
            .unwrap();

        assert!(result.table_elements[0].enrichment.vlm_processed);
        assert_eq!(result.table_elements[0].enrichment.table_image_caption.as_deref(), Some("a caption"));
        assert_eq!(*vlm.calls.lock().unwrap(), 1);
    }

    struct FailingVlm;

    #[async_trait]
    impl VlmClient for FailingVlm {
        async fn caption(&self, _image_bytes: &[u8], _prompt: &str, _model: &str) -> Result<String> {
            Err(crate::error::ConstructionRagError::Model(crate::error::ModelError::ClientError {
                service: "vlm",
                status: 400,
                message: "bad request".to_string(),
            }))
        }
    }

    #[tokio::test]
    async fn a_failed_caption_does_not_fail_the_run() {
        let blob_store = InMemoryBlobStore::new();
        blob_store.put("img/0.png", b"fake png").await.unwrap();

        let mut result = PartitionResult {
            text_elements: Vec::new(),
            table_elements: vec![table_element("p1-table-0", "img/0.png")],
            extracted_pages: Default::default(),
            page_analysis: Vec::new(),
            document_metadata: DocumentMetadata {
                title: None,
                total_pages: 1,
            },
            processing_strategy: ProcessingStrategy::Native,
        };

        let vlm = FailingVlm;
        let config = VlmConfig::default();
        enrich(&mut result, &blob_store, &vlm, &config, Language::English)
            .await
            .expect("a per-element VLM failure must not fail the enrichment step");

        assert!(!result.table_elements[0].enrichment.vlm_processed);
        assert!(result.table_elements[0].enrichment.table_image_caption.is_none());
    }
}
