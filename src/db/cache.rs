//! Durable cache: client-local mirror of aggregated case results.
//!
//! Best-effort by contract: `save` never fails from the caller's point of
//! view and `load` treats every storage or decode problem as a miss. The
//! cache only ever seeds a session; it is never authoritative once the
//! backend has answered.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;
use crate::models::{CacheKind, CrossVerificationResult, ValidationState};

/// Write-through mirror keyed by (case id, kind).
pub trait DurableCache: Send + Sync {
    /// Store `payload`, overwriting any previous entry. Failures are logged.
    fn save(&self, case_id: &str, kind: CacheKind, payload: &serde_json::Value);

    /// Last saved payload, or `None` when absent or unreadable.
    fn load(&self, case_id: &str, kind: CacheKind) -> Option<serde_json::Value>;
}

/// Cache that stores nothing; every load is a miss.
pub struct NoCache;

impl DurableCache for NoCache {
    fn save(&self, _case_id: &str, _kind: CacheKind, _payload: &serde_json::Value) {}

    fn load(&self, _case_id: &str, _kind: CacheKind) -> Option<serde_json::Value> {
        None
    }
}

/// Serialize and save a typed payload.
pub fn save_typed<T: Serialize>(cache: &dyn DurableCache, case_id: &str, kind: CacheKind, value: &T) {
    match serde_json::to_value(value) {
        Ok(payload) => cache.save(case_id, kind, &payload),
        Err(e) => tracing::warn!(case_id, kind = %kind, error = %e, "Cache payload not serializable"),
    }
}

/// Load and decode a typed payload; undecodable entries count as absent.
pub fn load_typed<T: DeserializeOwned>(
    cache: &dyn DurableCache,
    case_id: &str,
    kind: CacheKind,
) -> Option<T> {
    let payload = cache.load(case_id, kind)?;
    match serde_json::from_value(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(case_id, kind = %kind, error = %e, "Discarding undecodable cache entry");
            None
        }
    }
}

pub fn save_validation(cache: &dyn DurableCache, case_id: &str, state: &ValidationState) {
    save_typed(cache, case_id, CacheKind::Validation, state);
}

pub fn load_validation(cache: &dyn DurableCache, case_id: &str) -> Option<ValidationState> {
    load_typed(cache, case_id, CacheKind::Validation)
}

pub fn save_cross_verification(
    cache: &dyn DurableCache,
    case_id: &str,
    result: &CrossVerificationResult,
) {
    save_typed(cache, case_id, CacheKind::CrossVerification, result);
}

pub fn load_cross_verification(
    cache: &dyn DurableCache,
    case_id: &str,
) -> Option<CrossVerificationResult> {
    load_typed(cache, case_id, CacheKind::CrossVerification)
}

/// SQLite-backed durable cache.
pub struct SqliteDurableCache {
    conn: Mutex<Connection>,
}

impl SqliteDurableCache {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(open_database(path)?),
        })
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(open_memory_database()?),
        })
    }

    fn try_save(
        &self,
        case_id: &str,
        kind: CacheKind,
        payload: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let text = serde_json::to_string(payload)?;
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO cache_entries (case_id, kind, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(case_id, kind) DO UPDATE SET payload = ?3, updated_at = ?4",
            params![case_id, kind.as_str(), text, now],
        )?;
        Ok(())
    }

    fn try_load(
        &self,
        case_id: &str,
        kind: CacheKind,
    ) -> Result<Option<serde_json::Value>, DatabaseError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let text: Option<String> = conn
            .query_row(
                "SELECT payload FROM cache_entries WHERE case_id = ?1 AND kind = ?2",
                params![case_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match text {
            Some(t) => Ok(Some(serde_json::from_str(&t)?)),
            None => Ok(None),
        }
    }
}

impl DurableCache for SqliteDurableCache {
    fn save(&self, case_id: &str, kind: CacheKind, payload: &serde_json::Value) {
        match self.try_save(case_id, kind, payload) {
            Ok(()) => tracing::debug!(case_id, kind = %kind, "Cache entry written"),
            Err(e) => tracing::warn!(case_id, kind = %kind, error = %e, "Cache write failed"),
        }
    }

    fn load(&self, case_id: &str, kind: CacheKind) -> Option<serde_json::Value> {
        match self.try_load(case_id, kind) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(case_id, kind = %kind, error = %e, "Cache read failed");
                None
            }
        }
    }
}
