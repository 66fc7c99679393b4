use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use regex::Regex;
use serde_json::{Map, Value};

use super::clock::{Clock, SystemClock};
use super::cookie::SessionCookie;
use super::flash::FlashData;
use super::id_generator::{IdGenerator, UuidIdGenerator};
use super::record::{is_reserved, SessionRecord};
use super::SessionState;
use crate::configuration::SessionConfig;
use crate::error_handling::types::SessionError;
use crate::storage::storage_trait::SessionHandler;

fn session_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9,-]{1,128}$").expect("session id pattern is valid"))
}

/// Whether `id` may be used as a session identifier.
pub fn is_valid_session_id(id: &str) -> bool {
    session_id_pattern().is_match(id)
}

/// The structure driving one visitor's session through a request.
///
/// A manager is created per request context, started with the identifier
/// the client presented, used to read and mutate the record, and saved at
/// the end of the request.
///
/// # Fields Overview
///
/// - `handler`: backend the record is loaded from and saved to
/// - `config`: lifetime, rotation, GC and cookie settings
/// - `clock` / `id_generator`: time and identifier sources
/// - `state`: where the session is in its lifecycle
/// - `id`: current identifier, `None` before start and after destroy
/// - `record`: working copy of the stored record
/// - `flash`: flash values readable during this request
pub struct SessionManager {
    handler: Arc<dyn SessionHandler>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    id_generator: Arc<dyn IdGenerator>,
    state: SessionState,
    id: Option<String>,
    record: SessionRecord,
    flash: FlashData,
}

impl SessionManager {
    pub fn new(handler: Arc<dyn SessionHandler>, config: SessionConfig) -> Self {
        Self {
            handler,
            config,
            clock: Arc::new(SystemClock),
            id_generator: Arc::new(UuidIdGenerator),
            state: SessionState::NotStarted,
            id: None,
            record: SessionRecord::new(),
            flash: FlashData::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Starts or resumes the session for `incoming_id`.
    ///
    /// Calling this while the session is active does nothing. An invalid or
    /// missing identifier, and any start following a destroy, begin a new
    /// session under a generated identifier.
    pub fn start(&mut self, incoming_id: Option<&str>) -> Result<SessionState, SessionError> {
        if self.state == SessionState::Active {
            debug!("Session already active");
            return Ok(self.state);
        }
        if !self.handler.open(&self.config.save_path, &self.config.cookie_name) {
            error!("Session handler could not be opened");
            return Err(SessionError::HandlerUnavailable);
        }

        let resumable = match (self.state, incoming_id) {
            (SessionState::NotStarted, Some(id)) if is_valid_session_id(id) => Some(id.to_owned()),
            (SessionState::NotStarted, Some(_)) => {
                warn!("Discarding malformed session identifier");
                None
            }
            _ => None,
        };
        let id = resumable.unwrap_or_else(|| self.id_generator.generate());

        self.load(id);
        self.collect_garbage();
        self.apply_lifecycle_rules(true);
        Ok(self.state)
    }

    /// Destroys the current session and starts a fresh one.
    pub fn start_new(&mut self) -> Result<SessionState, SessionError> {
        self.destroy();
        self.start(None)
    }

    fn load(&mut self, id: String) {
        let blob = self.handler.read(&id);
        self.record = SessionRecord::from_blob(&blob);
        self.flash.clear();
        debug!(
            "Loaded session {} ({})",
            id,
            if blob.is_empty() { "new" } else { "existing" }
        );
        self.id = Some(id);
        self.state = SessionState::Active;
    }

    fn collect_garbage(&self) {
        let probability = self.config.sess_gc_probability;
        let divisor = self.config.sess_gc_divisor;
        if probability == 0 || divisor == 0 || self.config.sess_lifetime == 0 {
            return;
        }
        if fastrand::u32(1..=divisor) > probability {
            return;
        }
        let outcome = self.handler.gc(self.config.sess_lifetime);
        info!("Session garbage collection: {}", outcome);
    }

    fn apply_lifecycle_rules(&mut self, may_restart: bool) {
        let now = self.clock.now();

        if self.record.last_regenerate().is_none() {
            self.record.set_last_regenerate(Some(now));
        }

        let interval = self.config.sess_regenerate_duration;
        if interval > 0 {
            let since = self.record.last_regenerate().map_or(0, |at| now.saturating_sub(at));
            if since >= interval_secs(interval) {
                if let Err(e) = self.regenerate(true) {
                    warn!("Scheduled identifier rotation failed, keeping current id: {}", e);
                }
            }
        }

        let lifetime = self.config.sess_lifetime;
        if may_restart && lifetime > 0 {
            if let Some(last_active) = self.record.last_active() {
                let idle = now.saturating_sub(last_active);
                if idle >= interval_secs(lifetime) {
                    info!("Session expired after {}s of inactivity", idle);
                    self.destroy();
                    let id = self.id_generator.generate();
                    self.load(id);
                    self.apply_lifecycle_rules(false);
                    return;
                }
            }
        }

        self.record.set_last_active(now);
        self.flash = FlashData::from_staged(self.record.take_staged_flash());
    }

    /// Moves the active session to a new identifier.
    ///
    /// The record is written under the new identifier before anything else
    /// changes. If that write fails the session keeps its old identifier and
    /// regenerate time. When `delete_old` is set, the old entry is removed
    /// afterwards.
    pub fn regenerate(&mut self, delete_old: bool) -> Result<(), SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::NotActive);
        }
        let Some(old_id) = self.id.clone() else {
            return Err(SessionError::NotActive);
        };

        let new_id = self.id_generator.generate();
        let previous_stamp = self.record.last_regenerate();
        self.record.set_last_regenerate(Some(self.clock.now()));

        if !self.handler.write(&new_id, &self.record.to_blob()) {
            error!("Could not persist session under its new identifier; rolling back");
            self.record.set_last_regenerate(previous_stamp);
            return Err(SessionError::RegenerateFailed);
        }
        self.id = Some(new_id);
        info!("Session identifier regenerated");
        debug!("Session {} is now {:?}", old_id, self.id);

        if delete_old && !self.handler.destroy(&old_id) {
            warn!("Old session entry {} could not be removed", old_id);
        }
        Ok(())
    }

    /// Ends the session and removes its stored entry.
    ///
    /// Only an active session is destroyed; otherwise this only clears the
    /// in-memory data.
    pub fn destroy(&mut self) {
        self.record.clear();
        self.flash.clear();
        if self.state != SessionState::Active {
            debug!("Destroy on a session that is not active");
            return;
        }
        if let Some(id) = self.id.take() {
            if !self.handler.destroy(&id) {
                warn!("Stored entry for session {} could not be removed", id);
            }
            debug!("Destroyed session {}", id);
        }
        self.state = SessionState::Destroyed;
        info!("Session destroyed");
    }

    /// Persists the record under the current identifier.
    ///
    /// A session that is not active writes nothing.
    pub fn save(&self) -> Result<(), SessionError> {
        let (SessionState::Active, Some(id)) = (self.state, self.id.as_deref()) else {
            debug!("No active session to save");
            return Ok(());
        };
        let written = self.handler.write(id, &self.record.to_blob());
        self.handler.close();
        if !written {
            error!("Session {} could not be saved", id);
            return Err(SessionError::WriteFailed);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        if is_reserved(key) {
            return None;
        }
        self.record.get(key)
    }

    pub fn get_all(&self) -> Map<String, Value> {
        self.record.public_view()
    }

    pub fn has(&self, key: &str) -> bool {
        !is_reserved(key) && self.record.has(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        if is_reserved(key) {
            warn!("Ignoring write to reserved session key {}", key);
        } else {
            self.record.set(key, value.into());
        }
        self
    }

    pub fn forget(&mut self, key: &str) -> &mut Self {
        if is_reserved(key) {
            warn!("Ignoring removal of reserved session key {}", key);
        } else {
            self.record.forget(key);
        }
        self
    }

    /// Makes `value` readable now and during the next request.
    pub fn flash(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        self.record.stage_flash(key, value.clone());
        self.flash.set(key, value);
        self
    }

    pub fn get_flash(&self, key: &str) -> Option<&Value> {
        self.flash.get(key)
    }

    pub fn get_flash_all(&self) -> &Map<String, Value> {
        self.flash.all()
    }

    pub fn has_flash(&self, key: &str) -> bool {
        self.flash.has(key)
    }

    /// Carries the given flash keys over to the next request.
    pub fn keep_flash(&mut self, keys: &[&str]) -> &mut Self {
        for key in keys {
            if let Some(value) = self.flash.get(key).cloned() {
                self.flash(key, value);
            }
        }
        self
    }

    /// Carries every flash value over to the next request.
    pub fn reflash(&mut self) -> &mut Self {
        for (key, value) in self.flash.all().clone() {
            self.flash(&key, value);
        }
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_active(&self) -> Option<DateTime<Utc>> {
        self.record
            .last_active()
            .and_then(|at| DateTime::from_timestamp(at, 0))
    }

    pub fn last_regenerate(&self) -> Option<DateTime<Utc>> {
        self.record
            .last_regenerate()
            .and_then(|at| DateTime::from_timestamp(at, 0))
    }

    /// Cookie the host should send, if any.
    pub fn cookie(&self) -> Option<SessionCookie> {
        match (self.state, self.id.as_deref()) {
            (SessionState::Active, Some(id)) => {
                Some(SessionCookie::issue(&self.config, id, self.clock.now()))
            }
            (SessionState::Destroyed, _) => Some(SessionCookie::removal(&self.config)),
            _ => None,
        }
    }
}

fn interval_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}
