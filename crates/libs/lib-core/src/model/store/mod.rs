//! # Database Store
//!
//! Connection pool setup and the append-only message log.

// region: --- Modules
pub mod message_repository;
pub mod models;
// endregion: --- Modules

// region: --- Re-exports
pub use message_repository::MessageStore;
pub use models::Message;
// endregion: --- Re-exports

// region: --- Types and Functions
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Type alias for SQLite connection pool.
pub type DbPool = SqlitePool;

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a new SQLite connection pool for `database_url`.
///
/// An in-memory URL (`sqlite::memory:`) gets a single long-lived connection,
/// since every SQLite connection would otherwise see its own empty database.
pub async fn create_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let in_memory = database_url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT);

    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new().connect_with(options).await?
    };

    Ok(pool)
}
// endregion: --- Types and Functions
