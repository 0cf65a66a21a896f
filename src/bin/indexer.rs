//! Sample CLI driving the facade end to end: submits one or more PDFs to
//! `start_indexing`, polls `get_indexing_progress` until terminal, and
//! optionally runs a query or a checklist against the resulting Run. Wires
//! the real `HttpTextLlmClient`/`HttpVlmClient`/`HttpEmbedderClient` and
//! `FilesystemBlobStore`, shaped after the teacher's `bin/example.rs`
//! (build config, construct, report status with `println!`, propagate
//! errors via `anyhow`).

use construction_rag::blobs::FilesystemBlobStore;
use construction_rag::db::run_store::RunStore;
use construction_rag::db::{self, models::{AccessLevel, RunStatus}};
use construction_rag::facade::{self, AppContext, NewDocument};
use construction_rag::gateway::embedder::HttpEmbedderClient;
use construction_rag::gateway::text_llm::HttpTextLlmClient;
use construction_rag::gateway::vlm::HttpVlmClient;
use construction_rag::telemetry;
use construction_rag::vector::VectorIndex;
use construction_rag::worker_pool::WorkerPool;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

async fn build_context() -> anyhow::Result<Arc<AppContext>> {
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set to a Postgres connection string"))?;
    let pool = db::connect(&database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let blob_root = env_or("CONSTRUCTION_RAG_BLOB_ROOT", "./blobs");
    let timeout = Duration::from_secs(60);

    Ok(Arc::new(AppContext {
        run_store: Arc::new(RunStore::new(pool.clone())),
        blob_store: Arc::new(FilesystemBlobStore::new(blob_root)),
        vector_index: Arc::new(VectorIndex::new(pool)),
        text_llm: Arc::new(HttpTextLlmClient::new(
            env_or("TEXT_LLM_ENDPOINT", "http://localhost:8081/v1/complete"),
            timeout,
        )),
        vlm: Arc::new(HttpVlmClient::new(
            env_or("VLM_ENDPOINT", "http://localhost:8082/v1/caption"),
            timeout,
        )),
        embedder: Arc::new(HttpEmbedderClient::new(
            env_or("EMBEDDER_ENDPOINT", "http://localhost:8083/v1/embed"),
            timeout,
        )),
        worker_pool: Arc::new(WorkerPool::new(num_cpus_fallback())),
        run_wall_clock_budget: Duration::from_secs(30 * 60),
    }))
}

/// The teacher's worker pool sizing reads `std::thread::available_parallelism`
/// directly rather than pulling in a `num_cpus` dependency; matched here.
fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: indexer <pdf-path> [more-pdf-paths...]");
        std::process::exit(2);
    };
    let mut paths = vec![path];
    paths.extend(args);

    println!("construction-rag indexer — {} document(s)", paths.len());

    let ctx = build_context().await?;
    facade::spawn_anonymous_document_sweeper(ctx.run_store.clone(), Duration::from_secs(60 * 60));

    let mut documents = Vec::with_capacity(paths.len());
    for path in &paths {
        let bytes = tokio::fs::read(path).await?;
        let filename = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        documents.push(NewDocument { filename, bytes, user_id: None });
    }

    let run_id = facade::start_indexing(ctx.clone(), documents, AccessLevel::Private, None, None, None).await?;
    println!("started run {run_id}");

    loop {
        let run = facade::get_indexing_progress(&ctx, run_id).await?;
        println!(
            "  status={:?} step={}/{}",
            run.status, run.current_step, run.total_steps
        );
        match run.status {
            RunStatus::Completed => {
                println!("indexing completed");
                break;
            }
            RunStatus::Failed => {
                let message = run.error_message.unwrap_or_else(|| "unknown error".to_string());
                anyhow::bail!("indexing run {run_id} failed: {message}");
            }
            RunStatus::Pending | RunStatus::Running => {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }

    info!(run_id = %run_id, "run finished");
    Ok(())
}
