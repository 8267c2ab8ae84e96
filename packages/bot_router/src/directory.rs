//! Session directory lookup
//!
//! The directory is an external key→JSON hash owned by whatever creates the
//! terminal sessions. Keys are opaque session ids; every value must carry at
//! least a `bot_name` string. The router only ever reads it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

/// Failure to read the directory as a whole.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to fetch session directory: {0}")]
    Fetch(String),
}

impl From<redis::RedisError> for DirectoryError {
    fn from(e: redis::RedisError) -> Self {
        DirectoryError::Fetch(e.to_string())
    }
}

/// Why a single directory entry was rejected.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("value is not valid JSON: {0}")]
    Malformed(serde_json::Error),
    #[error("value does not match the session schema: {0}")]
    Schema(serde_json::Error),
}

/// Validated shape of a directory value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub bot_name: String,
    /// Fields the router does not interpret
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A directory entry with its key
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    pub bot_name: String,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Parse one raw directory value. Bytes that are not UTF-8 JSON are malformed.
pub fn parse_entry(session_id: &str, raw: impl AsRef<[u8]>) -> Result<SessionRecord, EntryError> {
    let value: serde_json::Value =
        serde_json::from_slice(raw.as_ref()).map_err(EntryError::Malformed)?;
    let info: SessionInfo = serde_json::from_value(value).map_err(EntryError::Schema)?;
    Ok(SessionRecord {
        session_id: session_id.to_string(),
        bot_name: info.bot_name,
        extra: info.extra,
    })
}

/// Raw access to the key→JSON mapping.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Fetch every entry as raw bytes. Ordering is whatever the backing
    /// store returns.
    async fn entries(&self) -> Result<HashMap<String, Vec<u8>>, DirectoryError>;
}

// =============================================================================
// Redis-backed store
// =============================================================================

/// Reads the directory from a Redis hash with `HGETALL`.
///
/// The connection is opened on first use, then reconnects on its own.
pub struct RedisDirectory {
    client: redis::Client,
    key: String,
    conn: OnceCell<redis::aio::ConnectionManager>,
}

impl RedisDirectory {
    pub fn open(url: &str, key: impl Into<String>) -> Result<Self, DirectoryError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            key: key.into(),
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, DirectoryError> {
        let conn = self
            .conn
            .get_or_try_init(|| redis::aio::ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl DirectoryStore for RedisDirectory {
    async fn entries(&self) -> Result<HashMap<String, Vec<u8>>, DirectoryError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        // Bytes, so one bad value cannot fail the whole reply
        let raw: HashMap<Vec<u8>, Vec<u8>> = conn.hgetall(&self.key).await?;
        debug!("Fetched {} directory entries from {}", raw.len(), self.key);
        Ok(raw
            .into_iter()
            .map(|(key, value)| (String::from_utf8_lossy(&key).into_owned(), value))
            .collect())
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Directory held in process memory.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw value under `session_id`, replacing any previous one.
    pub async fn insert(&self, session_id: impl Into<String>, raw: impl Into<Vec<u8>>) {
        self.entries
            .write()
            .await
            .insert(session_id.into(), raw.into());
    }

    /// Store a well-formed record for `bot_name`.
    pub async fn insert_session(&self, session_id: impl Into<String>, bot_name: &str) {
        let raw = serde_json::json!({ "bot_name": bot_name }).to_string();
        self.insert(session_id, raw).await;
    }

    pub async fn remove(&self, session_id: &str) -> Option<Vec<u8>> {
        self.entries.write().await.remove(session_id)
    }

    /// Make every subsequent fetch fail, as if the backing store were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectory {
    async fn entries(&self) -> Result<HashMap<String, Vec<u8>>, DirectoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Fetch("directory store unavailable".into()));
        }
        Ok(self.entries.read().await.clone())
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Read-only lookups over a [`DirectoryStore`].
#[derive(Clone)]
pub struct SessionDirectory {
    store: Arc<dyn DirectoryStore>,
}

impl SessionDirectory {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self { store }
    }

    /// First entry whose `bot_name` matches. Bad entries are skipped.
    pub async fn find(&self, bot_name: &str) -> Result<Option<SessionRecord>, DirectoryError> {
        let entries = self.store.entries().await?;
        Ok(valid_records(entries).find(|record| record.bot_name == bot_name))
    }

    /// Every valid entry.
    pub async fn snapshot(&self) -> Result<Vec<SessionRecord>, DirectoryError> {
        let entries = self.store.entries().await?;
        Ok(valid_records(entries).collect())
    }
}

fn valid_records(entries: HashMap<String, Vec<u8>>) -> impl Iterator<Item = SessionRecord> {
    entries
        .into_iter()
        .filter_map(|(session_id, raw)| match parse_entry(&session_id, &raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping directory entry {}: {}", session_id, e);
                None
            }
        })
}
