//! Structured logging setup.
//!
//! Mirrors the teacher's `tracing` + `tracing-subscriber` usage: one
//! process-wide subscriber, `RUST_LOG`-driven filtering, spans carrying
//! `run_id`/`step`/`document_id` fields rather than interpolating them into
//! message strings. Per spec §4.4's cross-cutting logging contract, prompt
//! and completion bodies are only ever logged at `trace`; everything else
//! (model name, latency, token usage) is safe at `debug`/`info`.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global subscriber. Safe to call more than once in tests;
/// subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("construction_rag=info,warn"));

    let _ = fmt().with_env_filter(filter).try_init();
}
