use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub const MAX_PREFIX_LENGTH: usize = 64;

/// Byte-oriented key-value storage supplied by the host.
///
/// Browser local storage, an on-disk SQLite table and the in-memory store used
/// by tests all sit behind this trait. Writes are last-writer-wins; there is no
/// transaction spanning several keys.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

    fn remove(&self, key: &str) -> Result<(), KvError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &S {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        (**self).remove(key)
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("storage quota exceeded while writing '{key}'")]
    QuotaExceeded { key: String },

    #[error("storage error: {message} (code: {code:?})")]
    Storage {
        code: StorageErrorCode,
        message: String,
    },

    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value for '{key}' cannot be stored: {message}")]
    Encoding { key: String, message: String },
}

impl KvError {
    pub fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        Self::Storage {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorCode {
    Unknown,
    Unavailable,
    Corrupted,
    PermissionDenied,
    Busy,
    Locked,
    IoError,
}

// ============================================================================
// Keys
// ============================================================================

/// The five keys the planner persists under, derived from one prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageKeys {
    pub data: String,
    pub meta: String,
    pub collapsed_sections: String,
    pub theme: String,
    pub weight_unit: String,
}

impl StorageKeys {
    pub fn new(prefix: &str) -> Result<Self, KvError> {
        validate_prefix(prefix)?;
        Ok(Self {
            data: format!("{prefix}_data"),
            meta: format!("{prefix}_meta"),
            collapsed_sections: format!("{prefix}_collapsedSections"),
            theme: format!("{prefix}_theme"),
            weight_unit: format!("{prefix}_weightUnit"),
        })
    }

    #[must_use]
    pub fn all(&self) -> [&str; 5] {
        [
            &self.data,
            &self.meta,
            &self.collapsed_sections,
            &self.theme,
            &self.weight_unit,
        ]
    }
}

pub fn validate_prefix(prefix: &str) -> Result<(), KvError> {
    let invalid = |reason: String| KvError::InvalidKey {
        key: prefix.to_string(),
        reason,
    };

    if prefix.is_empty() {
        return Err(invalid("prefix cannot be empty".to_string()));
    }
    if prefix.len() > MAX_PREFIX_LENGTH {
        return Err(invalid(format!(
            "prefix exceeds maximum length of {MAX_PREFIX_LENGTH} bytes"
        )));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid("prefix contains invalid characters".to_string()));
    }
    Ok(())
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, Vec<u8>>,
    quota_bytes: Option<usize>,
    writes: usize,
}

impl MemoryInner {
    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

/// Shared in-memory store. Clones see the same entries, so a test can keep a
/// handle while the planner owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects any write that would take keys plus values over `quota_bytes`.
    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        let store = Self::default();
        store.lock().quota_bytes = Some(quota_bytes);
        store
    }

    pub fn set_quota(&self, quota_bytes: Option<usize>) {
        self.lock().quota_bytes = quota_bytes;
    }

    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().entries.get(key).cloned()
    }

    #[must_use]
    pub fn raw_string(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Writes directly, bypassing the quota and the write counter.
    pub fn insert_raw(&self, key: &str, value: impl Into<Vec<u8>>) {
        self.lock().entries.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.lock().entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let mut inner = self.lock();
        if let Some(quota) = inner.quota_bytes {
            if inner.used_bytes_without(key) + key.len() + value.len() > quota {
                return Err(KvError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }
        inner.entries.insert(key.to_string(), value.to_vec());
        inner.writes += 1;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        let mut inner = self.lock();
        inner.entries.remove(key);
        inner.writes += 1;
        Ok(())
    }
}

// ============================================================================
// SQLite store (native hosts)
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteStore;

#[cfg(not(target_arch = "wasm32"))]
mod sqlite {
    use super::{KeyValueStore, KvError, StorageErrorCode};
    use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
    use std::path::Path;
    use tracing::debug;

    pub struct SqliteStore {
        conn: Connection,
    }

    impl SqliteStore {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
            let conn = Connection::open(path).map_err(|e| map_sqlite_error("", e))?;
            Self::init(conn)
        }

        pub fn open_in_memory() -> Result<Self, KvError> {
            let conn = Connection::open_in_memory().map_err(|e| map_sqlite_error("", e))?;
            Self::init(conn)
        }

        fn init(conn: Connection) -> Result<Self, KvError> {
            conn.execute_batch(
                r"
                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                ",
            )
            .map_err(|e| map_sqlite_error("", e))?;
            debug!("sqlite key-value store ready");
            Ok(Self { conn })
        }
    }

    impl KeyValueStore for SqliteStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
            self.conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get::<_, Vec<u8>>(0)
                })
                .optional()
                .map_err(|e| map_sqlite_error(key, e))
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
            let now_ms = i64::try_from(crate::get_current_time_ms()).unwrap_or(i64::MAX);
            self.conn
                .execute(
                    r"
                    INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE
                        SET value = excluded.value, updated_at = excluded.updated_at
                    ",
                    params![key, value, now_ms],
                )
                .map_err(|e| map_sqlite_error(key, e))?;
            Ok(())
        }

        fn remove(&self, key: &str) -> Result<(), KvError> {
            self.conn
                .execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(|e| map_sqlite_error(key, e))?;
            Ok(())
        }
    }

    fn map_sqlite_error(key: &str, error: rusqlite::Error) -> KvError {
        let code = match &error {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DiskFull => {
                    return KvError::QuotaExceeded {
                        key: key.to_string(),
                    }
                }
                ErrorCode::DatabaseBusy => StorageErrorCode::Busy,
                ErrorCode::DatabaseLocked => StorageErrorCode::Locked,
                ErrorCode::PermissionDenied | ErrorCode::ReadOnly => {
                    StorageErrorCode::PermissionDenied
                }
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => StorageErrorCode::Corrupted,
                ErrorCode::CannotOpen => StorageErrorCode::Unavailable,
                ErrorCode::SystemIoFailure => StorageErrorCode::IoError,
                _ => StorageErrorCode::Unknown,
            },
            _ => StorageErrorCode::Unknown,
        };
        KvError::storage(code, error.to_string())
    }
}
