//! Storage subsystem
//!
//! Session records are persisted through the [`SessionHandler`] contract.
//! Backends:
//! - `file_storage`: one file per session in a local directory.
//! - `database_storage`: SeaORM over SQLite, entity in `db_entities`.
//! - `key_value_storage`: Redis or in-process store, expiring keys natively.
//! - `adapter_storage`: files on an abstract [`adapter_storage::Filesystem`].
//!
//! [`build_handler`] picks and constructs the backend named by the
//! configuration.

pub mod adapter_storage;
pub mod database_storage;
pub mod db_entities;
pub mod file_storage;
pub mod key_value_storage;
pub mod storage_trait;
pub mod types;

use std::sync::Arc;

use log::info;

use crate::configuration::{Config, StorageConfig};
use crate::error_handling::types::StorageError;

pub use adapter_storage::{AdapterStorage, Filesystem, LocalFilesystem, MemoryFilesystem};
pub use database_storage::DatabaseStorage;
pub use file_storage::FileStorage;
pub use key_value_storage::{KeyValueClient, KeyValueStorage, MemoryKeyValueClient, RedisKeyValueClient};
pub use storage_trait::{session_key, SessionHandler, SESSION_KEY_PREFIX};
pub use types::GcOutcome;

/// Constructs the backend selected by `config.storage`.
///
/// The key-value backend takes its time-to-live from `sess_lifetime`.
pub fn build_handler(config: &Config) -> Result<Arc<dyn SessionHandler>, StorageError> {
    let handler: Arc<dyn SessionHandler> = match &config.storage {
        StorageConfig::File { path } => Arc::new(FileStorage::new(path)?),
        StorageConfig::Database { path: Some(path), url: None, table } => {
            Arc::new(DatabaseStorage::new_file(path, table)?)
        }
        StorageConfig::Database { path: None, url: Some(url), table } => {
            Arc::new(DatabaseStorage::connect(url, table)?)
        }
        StorageConfig::Database { .. } => {
            return Err(StorageError::SetupFailed(
                "database storage needs exactly one of `path` or `url`".to_string(),
            ))
        }
        StorageConfig::KeyValue { url: Some(url), key_prefix } => Arc::new(
            KeyValueStorage::connect_redis(url, config.session.sess_lifetime, key_prefix)?,
        ),
        StorageConfig::KeyValue { url: None, key_prefix } => Arc::new(KeyValueStorage::new(
            MemoryKeyValueClient::new(),
            config.session.sess_lifetime,
            key_prefix,
        )),
        StorageConfig::Adapter { path: Some(path), root } => {
            Arc::new(AdapterStorage::local(path, root)?)
        }
        StorageConfig::Adapter { path: None, root } => {
            Arc::new(AdapterStorage::new(MemoryFilesystem::new(), root))
        }
    };
    info!("Storage backend ready: {}", backend_name(&config.storage));
    Ok(handler)
}

fn backend_name(storage: &StorageConfig) -> &'static str {
    match storage {
        StorageConfig::File { .. } => "file",
        StorageConfig::Database { .. } => "database",
        StorageConfig::KeyValue { url: Some(_), .. } => "key_value (redis)",
        StorageConfig::KeyValue { url: None, .. } => "key_value (memory)",
        StorageConfig::Adapter { path: Some(_), .. } => "adapter (local)",
        StorageConfig::Adapter { path: None, .. } => "adapter (memory)",
    }
}
