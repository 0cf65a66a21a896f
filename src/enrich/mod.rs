//! C7 Metadata Enricher and C8 VLM Enricher (spec §4.7, §4.8).

pub mod metadata;
pub mod vlm_enrich;
