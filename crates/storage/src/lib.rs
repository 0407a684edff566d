// Storage layer for the restoration pipeline
//
// Implementations of the timeglow-core collaborator traits:
// - InMemoryStore: jobs, results, usage, images and credit accounts in one
//   process-local map (tests and dev mode)
// - PgStore / PgCreditLedger: the same contracts over PostgreSQL with sqlx
// - InMemoryObjectStore / FsObjectStore: blob storage for image bytes

pub mod ledger;
pub mod memory;
pub mod models;
pub mod objects;
pub mod postgres;

pub use memory::{FailPoint, InMemoryStore};
pub use objects::{extension_for_content_type, FsObjectStore, InMemoryObjectStore};
pub use ledger::PgCreditLedger;
pub use postgres::PgStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Open a connection pool
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Apply the pipeline and checkpoint-log migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
