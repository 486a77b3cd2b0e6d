pub mod cache;
pub mod sqlite;

pub use cache::{DurableCache, NoCache, SqliteDurableCache};
pub use sqlite::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Cache connection lock poisoned")]
    LockPoisoned,
}
