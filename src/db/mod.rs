//! Relational persistence: connection pooling, row models (spec §3 data
//! model) and the C2 Run Store.

pub mod models;
pub mod run_store;

use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect to the relational store. The connection string is read from the
/// environment at the call site (spec §6 "configurable pipeline parameters
/// are never taken from environment — only from the Run's config snapshot";
/// the *connection string itself* is credentials, not a pipeline
/// parameter, so it is the one thing this crate does read from env/config
/// at startup).
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}
