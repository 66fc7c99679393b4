//! Session Handler Trait
//!
//! This module defines the `SessionHandler` trait, the uniform contract every
//! session storage backend supplies to the lifecycle manager.
//!
//! Implementors are responsible for:
//! - Preparing and releasing the backend (`open` / `close`)
//! - Moving whole serialized records in and out (`read` / `write`)
//! - Removing single entries (`destroy`)
//! - Sweeping stale entries when the medium does not expire them itself (`gc`)
//!
//! Transient backend faults never cross this boundary: they are logged by the
//! implementation and reported as `false`, an empty string or
//! [`GcOutcome::Failed`]. Only construction can fail with an error, through
//! `StorageError::SetupFailed`.

use crate::storage::types::GcOutcome;

/// Prefix placed in front of every raw session identifier to form its
/// storage key.
pub const SESSION_KEY_PREFIX: &str = "sess_";

/// Builds the storage key for a session identifier. The identifier is used
/// verbatim.
pub fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, session_id)
}

/// The `SessionHandler` trait defines the interface for session storage
/// backends.
///
/// Handlers are shared between request contexts, so every method takes
/// `&self`; concurrent writes to the same identifier are only as atomic as
/// the underlying medium makes them.
pub trait SessionHandler: Send + Sync {
    /// Prepares the backend for use. Repeated calls are harmless.
    ///
    /// - `save_path` - location hint from the session configuration.
    /// - `session_name` - name of the identifier cookie.
    fn open(&self, save_path: &str, session_name: &str) -> bool;

    /// Releases per-request handle state.
    fn close(&self) -> bool;

    /// Returns the serialized record for `session_id`, or an empty string
    /// when there is none (absent, expired or unreadable).
    fn read(&self, session_id: &str) -> String;

    /// Stores `data` under `session_id`, replacing any previous content.
    fn write(&self, session_id: &str, data: &str) -> bool;

    /// Removes the entry for `session_id`. Removing an entry that does not
    /// exist succeeds.
    fn destroy(&self, session_id: &str) -> bool;

    /// Removes entries last modified more than `max_lifetime` seconds ago.
    fn gc(&self, max_lifetime: u64) -> GcOutcome;
}
