//! Construction RAG
//!
//! Ingestion, indexing and retrieval pipeline for construction-domain PDF
//! documents: partitions native and scanned PDFs, enriches and chunks their
//! content, embeds and indexes it for vector search, and answers queries and
//! compliance checklists grounded in the indexed set.
//!
//! # Example
//!
//! ```rust,no_run
//! use construction_rag::facade::{self, AppContext, NewDocument};
//! use construction_rag::db::models::AccessLevel;
//! use std::sync::Arc;
//!
//! # async fn run(ctx: Arc<AppContext>) -> anyhow::Result<()> {
//! let run_id = facade::start_indexing(
//!     ctx,
//!     vec![NewDocument { filename: "spec.pdf".into(), bytes: vec![], user_id: None }],
//!     AccessLevel::Private,
//!     None,
//!     None,
//!     None,
//! )
//! .await?;
//! println!("started run {run_id}");
//! # Ok(())
//! # }
//! ```

pub mod blobs;
pub mod checklist;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embed;
pub mod enrich;
pub mod error;
pub mod facade;
pub mod gateway;
pub mod orchestrator;
pub mod partition;
pub mod query;
pub mod telemetry;
pub mod vector;
pub mod worker_pool;

pub use config::{PipelineConfig, Resolver};
pub use error::{ConstructionRagError, Result};
pub use facade::{AppContext, NewDocument};
pub use orchestrator::IndexingOrchestrator;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
