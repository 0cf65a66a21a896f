//! C1 Config Resolver.
//!
//! Loads defaults, applies user overrides, and produces an immutable,
//! validated configuration snapshot for a single indexing Run. Never reads
//! mutable process state once constructed.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Target language for prompt templates (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Danish,
}

impl Default for Language {
    fn default() -> Self {
        Language::English
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    Adaptive,
    Recursive,
    Semantic,
}

impl Default for ChunkingStrategy {
    fn default() -> Self {
        ChunkingStrategy::Adaptive
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannedDetectionConfig {
    pub text_threshold: usize,
    pub sample_pages: usize,
}

impl Default for ScannedDetectionConfig {
    fn default() -> Self {
        Self {
            text_threshold: default_text_threshold(),
            sample_pages: default_sample_pages(),
        }
    }
}

fn default_text_threshold() -> usize {
    200
}
fn default_sample_pages() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub hybrid_mode: bool,
    pub scanned_detection: ScannedDetectionConfig,
    /// Minimum raster area (in pixels) for an image to count as "meaningful"
    /// (spec §4.6). Open question resolved in DESIGN.md: exposed here rather
    /// than hardcoded.
    pub meaningful_image_min: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            hybrid_mode: true,
            scanned_detection: ScannedDetectionConfig::default(),
            meaningful_image_min: default_meaningful_image_min(),
        }
    }
}

fn default_meaningful_image_min() -> usize {
    40_000 // ~200x200px
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkingStrategy,
    pub chunk_size: usize,
    pub overlap: usize,
    pub max_chunk_size: usize,
    pub prioritize_vlm_captions: bool,
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::default(),
            chunk_size: 1000,
            overlap: 200,
            max_chunk_size: 1800,
            prioritize_vlm_captions: true,
            separators: default_separators(),
        }
    }
}

fn default_separators() -> Vec<String> {
    vec![
        "\n\n".to_string(),
        "\n".to_string(),
        ". ".to_string(),
        " ".to_string(),
        "".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub provider: String,
    pub dimension: usize,
    pub batch_size: usize,
    /// Fraction of chunks in a Run that must embed successfully for the Run
    /// to complete rather than fail with `QualityGateError` (spec §4.10,
    /// §9 open question).
    pub quality_gate_min_success_ratio: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "multilingual-e5-large".to_string(),
            provider: "default".to_string(),
            dimension: 1024,
            batch_size: 32,
            quality_gate_min_success_ratio: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Applied by the caller after retrieval, never inside the vector query
    /// (spec §4.5).
    pub similarity_floor: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            similarity_floor: Some(0.2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub max_concurrent_calls: usize,
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 2000,
            max_concurrent_calls: 4,
        }
    }
}

/// The immutable, validated effective configuration for one Run. Produced
/// by [`Resolver::resolve`]; there is no mutation path after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub language: Language,
    pub partition: PartitionConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub vlm: VlmConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: Language::default(),
            partition: PartitionConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig::default(),
            vlm: VlmConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Fails fast with `ConfigError` on any invalid combination (spec §4.1).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(self.chunking.chunk_size));
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                overlap: self.chunking.overlap,
                chunk_size: self.chunking.chunk_size,
            });
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding.dimension,
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(self.embedding.batch_size));
        }
        if self.retrieval.top_k == 0 || self.retrieval.top_k > 200 {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }
        if let Some(floor) = self.retrieval.similarity_floor {
            if !(0.0..=1.0).contains(&floor) {
                return Err(ConfigError::InvalidSimilarityFloor(floor));
            }
        }
        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::MissingModel {
                field: "embedding.model",
            });
        }
        if self.generation.model.trim().is_empty() {
            return Err(ConfigError::MissingModel {
                field: "generation.model",
            });
        }
        if self.vlm.model.trim().is_empty() {
            return Err(ConfigError::MissingModel { field: "vlm.model" });
        }
        Ok(())
    }

    /// Serialize to the JSON snapshot persisted alongside a Run (spec §3:
    /// "every completed Run has a configuration snapshot").
    pub fn to_snapshot(&self) -> Result<serde_json::Value, ConfigError> {
        serde_json::to_value(self).map_err(|e| ConfigError::LoadFailed {
            path: "<snapshot>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_snapshot(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_value(value).map_err(|e| ConfigError::LoadFailed {
            path: "<snapshot>".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// Upload type, used only to steer defaults (e.g. retention/expiry is a
/// Document-level concern handled by the Run Store, not the Resolver
/// itself) — carried through for symmetry with spec §4.1's input list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadType {
    Anonymous,
    UserProject,
}

/// Resolves defaults plus user overrides into a [`PipelineConfig`].
///
/// A user-overrides map is a sparse JSON object using the same dotted
/// recognized-option names enumerated in spec §4.1 (e.g.
/// `{"chunking.chunk_size": 800}`); unrecognized keys are rejected rather
/// than silently ignored, so a typo in an override surfaces as a
/// `ConfigError` at Run start instead of silently falling back to a
/// default.
pub struct Resolver;

impl Resolver {
    /// Produce the effective configuration for a Run. `overrides` is merged
    /// over [`PipelineConfig::default()`] and the result is validated
    /// before being returned.
    pub fn resolve(
        language: Language,
        _upload_type: UploadType,
        overrides: Option<&HashMap<String, serde_json::Value>>,
    ) -> Result<PipelineConfig, ConfigError> {
        let mut config = PipelineConfig::default();
        config.language = language;

        if let Some(overrides) = overrides {
            apply_overrides(&mut config, overrides)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn apply_overrides(
    config: &mut PipelineConfig,
    overrides: &HashMap<String, serde_json::Value>,
) -> Result<(), ConfigError> {
    for (key, value) in overrides {
        apply_one(config, key, value)?;
    }
    Ok(())
}

fn apply_one(
    config: &mut PipelineConfig,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), ConfigError> {
    macro_rules! as_usize {
        () => {
            value.as_u64().ok_or_else(|| ConfigError::LoadFailed {
                path: key.to_string(),
                reason: "expected an unsigned integer".to_string(),
            })? as usize
        };
    }
    macro_rules! as_bool {
        () => {
            value.as_bool().ok_or_else(|| ConfigError::LoadFailed {
                path: key.to_string(),
                reason: "expected a boolean".to_string(),
            })?
        };
    }
    macro_rules! as_f32 {
        () => {
            value.as_f64().ok_or_else(|| ConfigError::LoadFailed {
                path: key.to_string(),
                reason: "expected a number".to_string(),
            })? as f32
        };
    }
    macro_rules! as_string {
        () => {
            value
                .as_str()
                .ok_or_else(|| ConfigError::LoadFailed {
                    path: key.to_string(),
                    reason: "expected a string".to_string(),
                })?
                .to_string()
        };
    }

    match key {
        "partition.hybrid_mode" => config.partition.hybrid_mode = as_bool!(),
        "partition.scanned_detection.text_threshold" => {
            config.partition.scanned_detection.text_threshold = as_usize!()
        }
        "partition.scanned_detection.sample_pages" => {
            config.partition.scanned_detection.sample_pages = as_usize!()
        }
        "partition.meaningful_image_min" => config.partition.meaningful_image_min = as_usize!(),
        "chunking.strategy" => {
            config.chunking.strategy = match as_string!().as_str() {
                "adaptive" => ChunkingStrategy::Adaptive,
                "recursive" => ChunkingStrategy::Recursive,
                "semantic" => ChunkingStrategy::Semantic,
                other => return Err(ConfigError::UnknownChunkingStrategy(other.to_string())),
            }
        }
        "chunking.chunk_size" => config.chunking.chunk_size = as_usize!(),
        "chunking.overlap" => config.chunking.overlap = as_usize!(),
        "chunking.max_chunk_size" => config.chunking.max_chunk_size = as_usize!(),
        "chunking.prioritize_vlm_captions" => config.chunking.prioritize_vlm_captions = as_bool!(),
        "chunking.separators" => {
            config.chunking.separators = value
                .as_array()
                .ok_or_else(|| ConfigError::LoadFailed {
                    path: key.to_string(),
                    reason: "expected an array of strings".to_string(),
                })?
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| ConfigError::LoadFailed {
                        path: key.to_string(),
                        reason: "expected an array of strings".to_string(),
                    })
                })
                .collect::<std::result::Result<Vec<String>, ConfigError>>()?
        }
        "embedding.model" => config.embedding.model = as_string!(),
        "embedding.provider" => config.embedding.provider = as_string!(),
        "embedding.dimension" => config.embedding.dimension = as_usize!(),
        "embedding.batch_size" => config.embedding.batch_size = as_usize!(),
        "retrieval.top_k" => config.retrieval.top_k = as_usize!(),
        "retrieval.similarity_floor" => config.retrieval.similarity_floor = Some(as_f32!()),
        "generation.model" => config.generation.model = as_string!(),
        "generation.max_tokens" => config.generation.max_tokens = as_usize!() as u32,
        "vlm.model" => config.vlm.model = as_string!(),
        "vlm.max_tokens" => config.vlm.max_tokens = as_usize!() as u32,
        other => {
            return Err(ConfigError::LoadFailed {
                path: other.to_string(),
                reason: "unrecognized configuration key".to_string(),
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let mut config = PipelineConfig::default();
        config.chunking.chunk_size = 100;
        config.chunking.overlap = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OverlapTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_unrecognized_override_key() {
        let mut overrides = HashMap::new();
        overrides.insert("bogus.key".to_string(), serde_json::json!(true));
        let result = Resolver::resolve(Language::English, UploadType::Anonymous, Some(&overrides));
        assert!(result.is_err());
    }

    #[test]
    fn resolve_with_override_changes_chunk_size() {
        let mut overrides = HashMap::new();
        overrides.insert("chunking.chunk_size".to_string(), serde_json::json!(500));
        let config =
            Resolver::resolve(Language::English, UploadType::Anonymous, Some(&overrides)).unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
    }

    #[test]
    fn same_inputs_yield_byte_equal_snapshots() {
        let a = Resolver::resolve(Language::English, UploadType::Anonymous, None).unwrap();
        let b = Resolver::resolve(Language::English, UploadType::Anonymous, None).unwrap();
        assert_eq!(
            serde_json::to_string(&a.to_snapshot().unwrap()).unwrap(),
            serde_json::to_string(&b.to_snapshot().unwrap()).unwrap()
        );
    }

    #[test]
    fn rejects_invalid_top_k() {
        let mut config = PipelineConfig::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());
        config.retrieval.top_k = 500;
        assert!(config.validate().is_err());
    }
}
