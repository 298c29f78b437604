/// Database abstraction layer
///
/// The engine talks to storage only through [`Repository`]. Two backends are
/// provided: an in-process [`MemoryRepository`] and the libsql backed
/// [`LibsqlRepository`].
pub mod migrations;
pub mod repository;
pub mod sql;

pub use repository::{MemoryRepository, Repository};
pub use sql::LibsqlRepository;

use anyhow::Result;
use deadpool::managed::PoolConfig;

use crate::pool::{LibsqlManager, LibsqlPool};

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Open (or create) a local database file, migrate it and return a pool
pub async fn open_local_pool(path: &str, max_connections: usize) -> Result<LibsqlPool> {
    let database = libsql::Builder::new_local(path).build().await?;
    let pool = LibsqlPool::builder(LibsqlManager::new(database))
        .config(PoolConfig::new(max_connections.max(1)))
        .build()?;

    let conn = pool.get().await.map_err(|e| anyhow::anyhow!("Failed to get database connection: {}", e))?;
    initialize_database(&*conn).await?;
    Ok(pool)
}

/// Repository selected by the `[database]` config section
pub async fn open_repository(config: &crate::config::Database) -> Result<std::sync::Arc<dyn Repository>> {
    match &config.path {
        Some(path) => {
            let pool = open_local_pool(path, config.max_connections).await?;
            tracing::info!("Using libsql database at {}", path);
            Ok(std::sync::Arc::new(LibsqlRepository::new_from_pool(pool)))
        }
        None => {
            tracing::warn!("No database path configured, state is kept in memory only");
            Ok(std::sync::Arc::new(MemoryRepository::new()))
        }
    }
}
