//! C6 Partitioner: detects whether a document is native or scanned and
//! dispatches to the matching pipeline, producing the uniform
//! [`elements::PartitionResult`] contract either way (spec §4.6).

pub mod elements;
pub mod native;
mod raster;
pub mod scanned;

use crate::blobs::BlobStore;
use crate::config::PartitionConfig;
use crate::error::{PartitionError, Result};
use crate::worker_pool::WorkerPool;
use elements::PartitionResult;
use std::sync::Arc;
use tracing::info;

pub struct Partitioner {
    blob_store: Arc<dyn BlobStore>,
    worker_pool: Arc<WorkerPool>,
}

impl Partitioner {
    pub fn new(blob_store: Arc<dyn BlobStore>, worker_pool: Arc<WorkerPool>) -> Self {
        Self {
            blob_store,
            worker_pool,
        }
    }

    /// Runs detection, then the matching path (spec §4.6 "Detection"). The
    /// detector samples the first `scanned_detection.sample_pages` pages and
    /// flags the document scanned when their combined selectable-text length
    /// is below `scanned_detection.text_threshold`.
    pub async fn partition(
        &self,
        pdf_bytes: &[u8],
        config: &PartitionConfig,
        namespace: &str,
    ) -> Result<PartitionResult> {
        let strategy = detect_strategy(pdf_bytes, config)?;

        info!(?strategy, "partitioner selected strategy");

        match strategy {
            Detection::Native => {
                native::partition_native(
                    pdf_bytes,
                    config,
                    self.blob_store.clone(),
                    self.worker_pool.clone(),
                    namespace,
                )
                .await
            }
            Detection::Scanned => {
                scanned::partition_scanned(
                    pdf_bytes,
                    config,
                    self.blob_store.clone(),
                    self.worker_pool.clone(),
                    namespace,
                )
                .await
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detection {
    Native,
    Scanned,
}

/// Samples the first N pages' selectable text length to decide which path
/// to run (spec §4.6 "Detection": "a document is treated as scanned when the
/// combined selectable text across the sampled pages falls below
/// `scanned_detection.text_threshold`"). When `hybrid_mode` is disabled the
/// document is always treated as native.
fn detect_strategy(pdf_bytes: &[u8], config: &PartitionConfig) -> Result<Detection> {
    if !config.hybrid_mode {
        return Ok(Detection::Native);
    }

    let text = pdf_extract::extract_text_from_mem(pdf_bytes).map_err(|e| {
        PartitionError::UnreadablePdf {
            path: "<in-memory>".to_string(),
            reason: e.to_string(),
        }
    })?;

    let sample_len: usize = text
        .lines()
        .take(config.scanned_detection.sample_pages.max(1) * 20)
        .map(|line| line.trim().len())
        .sum();

    if sample_len < config.scanned_detection.text_threshold {
        Ok(Detection::Scanned)
    } else {
        Ok(Detection::Native)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_is_native_when_hybrid_mode_disabled() {
        let mut config = PartitionConfig::default();
        config.hybrid_mode = false;
        let strategy = detect_strategy(b"irrelevant bytes", &config).unwrap();
        assert_eq!(strategy, Detection::Native);
    }
}
