//! Key-value storage backend with native expiry.
//!
//! Each session is a single key holding the serialized record, written with a
//! time-to-live equal to the session lifetime so the store expires abandoned
//! sessions by itself. Garbage collection is therefore a no-op.
//!
//! The store is reached through the [`KeyValueClient`] trait, implemented for
//! [`RedisKeyValueClient`] and for the in-process [`MemoryKeyValueClient`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use redis::Commands;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::{session_key, SessionHandler};
use crate::storage::types::GcOutcome;

/// Single-key operations the key-value backend needs from its store.
pub trait KeyValueClient: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Sets `key`, expiring it after `ttl_secs` seconds; `0` means no expiry.
    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StorageError>;

    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Deletes `key`, returning the number of keys removed.
    fn del(&self, key: &str) -> Result<usize, StorageError>;
}

/// Redis client that keeps one connection open between calls.
///
/// The connection is opened lazily and dropped after an I/O or
/// connection-loss error, so the next call reconnects.
pub struct RedisKeyValueClient {
    client: redis::Client,
    conn: Mutex<Option<redis::Connection>>,
}

impl RedisKeyValueClient {
    /// Opens a client for `url` and checks the server answers.
    pub fn open(url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url).map_err(|e| {
            error!("Invalid Redis URL {}: {}", url, e);
            StorageError::SetupFailed(e.to_string())
        })?;
        let conn = client.get_connection().map_err(|e| {
            error!("Redis server at {} unreachable: {}", url, e);
            StorageError::SetupFailed(e.to_string())
        })?;
        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_connection<T>(
        &self,
        command: &str,
        key: &str,
        failure: StorageError,
        op: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, StorageError> {
        let mut guard = self.conn.lock().map_err(|_| StorageError::ConnectionFailed)?;
        if guard.is_none() {
            let conn = self.client.get_connection().map_err(|e| {
                error!("Redis connection failed: {}", e);
                StorageError::ConnectionFailed
            })?;
            debug!("Redis connection re-established");
            *guard = Some(conn);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(StorageError::ConnectionFailed);
        };
        match op(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                error!("Redis {} {} failed: {}", command, key, e);
                if e.is_connection_dropped() || e.is_io_error() {
                    *guard = None;
                }
                Err(failure)
            }
        }
    }
}

impl KeyValueClient for RedisKeyValueClient {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_connection("GET", key, StorageError::ReadFailed, |con| con.get(key))
    }

    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StorageError> {
        self.with_connection("SET", key, StorageError::WriteFailed, |con| {
            if ttl_secs == 0 {
                con.set(key, value)
            } else {
                con.set_ex(key, value, ttl_secs)
            }
        })
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.with_connection("EXISTS", key, StorageError::ReadFailed, |con| con.exists(key))
    }

    fn del(&self, key: &str) -> Result<usize, StorageError> {
        self.with_connection("DEL", key, StorageError::DeleteFailed, |con| con.del(key))
    }
}

/// In-process key-value store honouring expiry on read.
///
/// Every write also drops whatever has expired, so keys that are never read
/// again do not accumulate.
#[derive(Default)]
pub struct MemoryKeyValueClient {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryKeyValueClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time-to-live of `key`, `None` if absent or without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().ok()?;
        let (_, expires_at) = entries.get(key)?;
        expires_at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Removes every expired key, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        match self.entries.lock() {
            Ok(mut entries) => Self::purge(&mut entries),
            Err(_) => 0,
        }
    }

    fn purge(entries: &mut HashMap<String, (String, Option<Instant>)>) -> usize {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| expires_at.map_or(true, |at| at > now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!("Purged {} expired key(s)", purged);
        }
        purged
    }

    fn live<'a>(
        entries: &'a mut HashMap<String, (String, Option<Instant>)>,
        key: &str,
    ) -> Option<&'a String> {
        let expired = matches!(entries.get(key), Some((_, Some(at))) if *at <= Instant::now());
        if expired {
            entries.remove(key);
        }
        entries.get(key).map(|(value, _)| value)
    }
}

impl KeyValueClient for MemoryKeyValueClient {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(Self::live(&mut entries, key).cloned())
    }

    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::WriteFailed)?;
        Self::purge(&mut entries);
        let expires_at = (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs));
        entries.insert(key.to_owned(), (value.to_owned(), expires_at));
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::ReadFailed)?;
        Ok(Self::live(&mut entries, key).is_some())
    }

    fn del(&self, key: &str) -> Result<usize, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::DeleteFailed)?;
        Ok(usize::from(entries.remove(key).is_some()))
    }
}

/// Session handler over a [`KeyValueClient`].
///
/// Keys are `<namespace>sess_<id>`. A non-empty namespace is normalised to
/// end with exactly one `:`, so `"app"`, `"app:"` and `"app::"` all give
/// `app:sess_<id>`.
pub struct KeyValueStorage<C: KeyValueClient> {
    client: C,
    max_lifetime: u64,
    namespace: String,
}

impl KeyValueStorage<RedisKeyValueClient> {
    /// Connects to the Redis server at `url`.
    pub fn connect_redis(url: &str, max_lifetime: u64, key_prefix: &str) -> Result<Self, StorageError> {
        let client = RedisKeyValueClient::open(url)?;
        info!("KeyValueStorage connected to {}", url);
        Ok(Self::new(client, max_lifetime, key_prefix))
    }
}

impl<C: KeyValueClient> KeyValueStorage<C> {
    pub fn new(client: C, max_lifetime: u64, key_prefix: &str) -> Self {
        Self {
            client,
            max_lifetime,
            namespace: normalize_namespace(key_prefix),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn key_for(&self, session_id: &str) -> String {
        format!("{}{}", self.namespace, session_key(session_id))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if !self.client.exists(key)? {
            return Ok(());
        }
        let removed = self.client.del(key)?;
        if removed != 1 {
            error!("Key-value store reported {} key(s) removed for {}", removed, key);
            return Err(StorageError::DeleteFailed);
        }
        debug!("Deleted {}", key);
        Ok(())
    }
}

fn normalize_namespace(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }
    format!("{}:", prefix.trim_end_matches(':'))
}

impl<C: KeyValueClient> SessionHandler for KeyValueStorage<C> {
    fn open(&self, _save_path: &str, _session_name: &str) -> bool {
        true
    }

    fn close(&self) -> bool {
        true
    }

    fn read(&self, session_id: &str) -> String {
        self.client
            .get(&self.key_for(session_id))
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    fn write(&self, session_id: &str, data: &str) -> bool {
        self.client
            .set_ex(&self.key_for(session_id), data, self.max_lifetime)
            .is_ok()
    }

    fn destroy(&self, session_id: &str) -> bool {
        self.remove(&self.key_for(session_id)).is_ok()
    }

    fn gc(&self, _max_lifetime: u64) -> GcOutcome {
        GcOutcome::NotApplicable
    }
}
