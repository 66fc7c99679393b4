use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::DateTime;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::configuration::SessionConfig;
use crate::error_handling::types::SessionError;
use crate::session_management::{IdGenerator, ManualClock, SessionManager, SessionState};
use crate::storage::{FileStorage, GcOutcome, SessionHandler};

const T0: i64 = 1_700_000_000;

// In-memory handler with switchable failures
#[derive(Default)]
struct MemoryHandler {
    entries: Mutex<HashMap<String, String>>,
    fail_open: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    gc_calls: Mutex<Vec<u64>>,
}

impl MemoryHandler {
    fn contains(&self, id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(id)
    }

    fn stored(&self, id: &str) -> Option<Value> {
        let entries = self.entries.lock().unwrap();
        entries.get(id).map(|blob| serde_json::from_str(blob).unwrap())
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl SessionHandler for MemoryHandler {
    fn open(&self, _save_path: &str, _session_name: &str) -> bool {
        !self.fail_open.load(Ordering::SeqCst)
    }

    fn close(&self) -> bool {
        true
    }

    fn read(&self, session_id: &str) -> String {
        if self.fail_reads.load(Ordering::SeqCst) {
            return String::new();
        }
        self.entries
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    fn write(&self, session_id: &str, data: &str) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            return false;
        }
        self.entries
            .lock()
            .unwrap()
            .insert(session_id.to_string(), data.to_string());
        true
    }

    fn destroy(&self, session_id: &str) -> bool {
        self.entries.lock().unwrap().remove(session_id);
        true
    }

    fn gc(&self, max_lifetime: u64) -> GcOutcome {
        self.gc_calls.lock().unwrap().push(max_lifetime);
        GcOutcome::Removed(0)
    }
}

// Deterministic ids: id-1, id-2, ...
#[derive(Default)]
struct SequenceIds(AtomicUsize);

impl IdGenerator for SequenceIds {
    fn generate(&self) -> String {
        format!("id-{}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

struct Fixture {
    handler: Arc<MemoryHandler>,
    clock: Arc<ManualClock>,
    ids: Arc<SequenceIds>,
    config: SessionConfig,
}

impl Fixture {
    fn new(config: SessionConfig) -> Self {
        Self {
            handler: Arc::new(MemoryHandler::default()),
            clock: Arc::new(ManualClock::new(T0)),
            ids: Arc::new(SequenceIds::default()),
            config,
        }
    }

    fn manager(&self) -> SessionManager {
        SessionManager::new(self.handler.clone(), self.config.clone())
            .with_clock(self.clock.clone())
            .with_id_generator(self.ids.clone())
    }

    /// Runs one request that starts with `id`, applies `body` and saves.
    fn request(&self, id: Option<&str>, body: impl FnOnce(&mut SessionManager)) -> SessionManager {
        let mut manager = self.manager();
        manager.start(id).unwrap();
        body(&mut manager);
        manager.save().unwrap();
        manager
    }
}

fn config(lifetime: u64, regenerate: u64) -> SessionConfig {
    SessionConfig {
        sess_lifetime: lifetime,
        sess_regenerate_duration: regenerate,
        sess_gc_probability: 0,
        ..SessionConfig::default()
    }
}

fn at(secs: i64) -> Option<DateTime<chrono::Utc>> {
    DateTime::from_timestamp(secs, 0)
}

#[test]
fn test_fresh_start_stamps_both_times() {
    let fx = Fixture::new(config(3600, 300));
    let mut manager = fx.manager();
    assert_eq!(manager.state(), SessionState::NotStarted);
    assert_eq!(manager.start(None), Ok(SessionState::Active));
    assert_eq!(manager.id(), Some("id-1"));
    assert_eq!(manager.last_active(), at(T0));
    assert_eq!(manager.last_regenerate(), at(T0));
    assert!(manager.get_all().is_empty());
    assert!(!manager.cookie().unwrap().is_removal());
}

#[test]
fn test_start_is_idempotent() {
    let fx = Fixture::new(config(3600, 300));
    let mut manager = fx.manager();
    manager.start(Some("client-id")).unwrap();
    fx.clock.advance(10);
    assert_eq!(manager.start(Some("other-id")), Ok(SessionState::Active));
    assert_eq!(manager.id(), Some("client-id"));
    assert_eq!(manager.last_active(), at(T0));
}

#[test]
fn test_record_survives_between_requests() {
    let fx = Fixture::new(config(3600, 300));
    let first = fx.request(None, |m| {
        m.set("user.name", "ada").set("cart.items", json!([1, 2]));
    });
    let id = first.id().unwrap().to_string();

    fx.clock.advance(30);
    let second = fx.request(Some(id.as_str()), |_| {});
    assert_eq!(second.id(), Some(id.as_str()));
    assert_eq!(second.get("user.name"), Some(&json!("ada")));
    assert_eq!(second.get("cart.items"), Some(&json!([1, 2])));
    assert_eq!(second.last_active(), at(T0 + 30));
    assert_eq!(second.last_regenerate(), at(T0));
    assert_eq!(fx.handler.stored(&id).unwrap()["__sess"]["last_active"], json!(T0 + 30));
}

#[test]
fn test_expired_session_restarts_with_new_identity() {
    let fx = Fixture::new(config(60, 300));
    fx.request(None, |m| {
        m.set("user", "ada");
    });
    assert!(fx.handler.contains("id-1"));

    fx.clock.advance(61);
    let mut manager = fx.manager();
    assert_eq!(manager.start(Some("id-1")), Ok(SessionState::Active));
    assert_eq!(manager.id(), Some("id-2"));
    assert!(!fx.handler.contains("id-1"));
    assert!(manager.get_all().is_empty());
    assert_eq!(manager.last_active(), at(T0 + 61));
    assert_eq!(manager.last_regenerate(), at(T0 + 61));
}

#[test]
fn test_session_within_lifetime_is_kept() {
    let fx = Fixture::new(config(60, 300));
    fx.request(None, |m| {
        m.set("user", "ada");
    });
    fx.clock.advance(59);
    let manager = fx.request(Some("id-1"), |_| {});
    assert_eq!(manager.id(), Some("id-1"));
    assert_eq!(manager.get("user"), Some(&json!("ada")));
}

#[test]
fn test_due_regeneration_rotates_identifier() {
    let fx = Fixture::new(config(3600, 300));
    fx.request(None, |m| {
        m.set("user.id", 7);
    });

    fx.clock.advance(301);
    let mut manager = fx.manager();
    manager.start(Some("id-1")).unwrap();
    assert_eq!(manager.id(), Some("id-2"));
    assert!(!fx.handler.contains("id-1"));
    assert!(fx.handler.contains("id-2"));
    assert_eq!(manager.get("user.id"), Some(&json!(7)));
    assert_eq!(manager.last_regenerate(), at(T0 + 301));
    assert_eq!(fx.handler.stored("id-2").unwrap()["user"]["id"], json!(7));
}

#[test]
fn test_expiry_wins_when_both_are_due() {
    let fx = Fixture::new(config(60, 30));
    fx.request(None, |m| {
        m.set("user", "ada");
    });

    fx.clock.advance(61);
    let mut manager = fx.manager();
    manager.start(Some("id-1")).unwrap();
    assert_eq!(manager.id(), Some("id-3"));
    assert_eq!(fx.handler.len(), 0);
    assert!(manager.get_all().is_empty());
    assert_eq!(manager.last_active(), at(T0 + 61));
}

#[test]
fn test_flash_is_visible_for_one_extra_request() {
    let fx = Fixture::new(config(3600, 300));
    fx.request(None, |m| {
        m.flash("notice", "saved");
        assert_eq!(m.get_flash("notice"), Some(&json!("saved")));
        assert!(m.has_flash("notice"));
        assert!(m.get_all().is_empty());
    });

    fx.request(Some("id-1"), |m| {
        assert_eq!(m.get_flash("notice"), Some(&json!("saved")));
        assert_eq!(m.get_flash_all().len(), 1);
    });

    fx.request(Some("id-1"), |m| {
        assert_eq!(m.get_flash("notice"), None);
        assert!(m.get_flash_all().is_empty());
    });
}

#[test]
fn test_keep_flash_extends_selected_keys() {
    let fx = Fixture::new(config(3600, 300));
    fx.request(None, |m| {
        m.flash("a", 1).flash("b", 2);
    });
    fx.request(Some("id-1"), |m| {
        m.keep_flash(&["a", "missing"]);
    });
    fx.request(Some("id-1"), |m| {
        assert_eq!(m.get_flash("a"), Some(&json!(1)));
        assert!(!m.has_flash("b"));
        assert!(!m.has_flash("missing"));
    });
    fx.request(Some("id-1"), |m| {
        assert!(!m.has_flash("a"));
    });
}

#[test]
fn test_reflash_keeps_every_value() {
    let fx = Fixture::new(config(3600, 300));
    fx.request(None, |m| {
        m.flash("a", 1).flash("form.errors.name", "required");
    });
    fx.request(Some("id-1"), |m| {
        m.reflash();
    });
    fx.request(Some("id-1"), |m| {
        assert_eq!(m.get_flash("a"), Some(&json!(1)));
        assert_eq!(m.get_flash("form.errors"), Some(&json!({"name": "required"})));
    });
}

#[test]
fn test_destroyed_session_is_not_resurrected() {
    let fx = Fixture::new(config(3600, 300));
    let mut manager = fx.request(None, |m| {
        m.set("user", "ada");
    });
    assert!(fx.handler.contains("id-1"));

    manager.destroy();
    assert_eq!(manager.state(), SessionState::Destroyed);
    assert_eq!(manager.id(), None);
    assert!(manager.get_all().is_empty());
    assert_eq!(manager.save(), Ok(()));
    assert!(!fx.handler.contains("id-1"));
    assert!(manager.cookie().unwrap().is_removal());

    assert_eq!(manager.start(Some("id-1")), Ok(SessionState::Active));
    assert_eq!(manager.id(), Some("id-2"));
    assert!(manager.get("user").is_none());
}

#[test]
fn test_start_new_replaces_session() {
    let fx = Fixture::new(config(3600, 300));
    let mut manager = fx.request(None, |m| {
        m.set("user", "ada");
    });
    assert_eq!(manager.start_new(), Ok(SessionState::Active));
    assert_eq!(manager.id(), Some("id-2"));
    assert!(!fx.handler.contains("id-1"));
    assert!(!manager.has("user"));
}

#[test]
fn test_failed_regenerate_rolls_back() {
    let fx = Fixture::new(config(3600, 300));
    let mut manager = fx.request(None, |m| {
        m.set("user", "ada");
    });
    fx.clock.advance(10);

    fx.handler.fail_writes.store(true, Ordering::SeqCst);
    assert_eq!(manager.regenerate(true), Err(SessionError::RegenerateFailed));
    assert_eq!(manager.id(), Some("id-1"));
    assert_eq!(manager.last_regenerate(), at(T0));
    assert!(fx.handler.contains("id-1"));

    fx.handler.fail_writes.store(false, Ordering::SeqCst);
    assert_eq!(manager.regenerate(false), Ok(()));
    assert_eq!(manager.id(), Some("id-3"));
    assert_eq!(manager.last_regenerate(), at(T0 + 10));
    assert!(fx.handler.contains("id-1"));
    assert!(fx.handler.contains("id-3"));
}

#[test]
fn test_rotation_failure_during_start_keeps_old_identifier() {
    let fx = Fixture::new(config(3600, 300));
    fx.request(None, |m| {
        m.set("user", "ada");
    });
    fx.clock.advance(301);
    fx.handler.fail_writes.store(true, Ordering::SeqCst);

    let mut manager = fx.manager();
    assert_eq!(manager.start(Some("id-1")), Ok(SessionState::Active));
    assert_eq!(manager.id(), Some("id-1"));
    assert_eq!(manager.last_regenerate(), at(T0));
    assert_eq!(manager.get("user"), Some(&json!("ada")));
    assert_eq!(manager.save(), Err(SessionError::WriteFailed));
}

#[test]
fn test_unavailable_handler_leaves_session_unstarted() {
    let fx = Fixture::new(config(3600, 300));
    fx.handler.fail_open.store(true, Ordering::SeqCst);
    let mut manager = fx.manager();
    assert_eq!(manager.start(None), Err(SessionError::HandlerUnavailable));
    assert_eq!(manager.state(), SessionState::NotStarted);
    assert_eq!(manager.id(), None);
    assert!(manager.cookie().is_none());
}

#[test]
fn test_malformed_identifiers_are_replaced() {
    let fx = Fixture::new(config(3600, 300));
    let mut manager = fx.manager();
    manager.start(Some("../etc/passwd")).unwrap();
    assert_eq!(manager.id(), Some("id-1"));

    let mut manager = fx.manager();
    let long = "a".repeat(129);
    manager.start(Some(long.as_str())).unwrap();
    assert_eq!(manager.id(), Some("id-2"));

    let mut manager = fx.manager();
    manager.start(Some("abc,DEF-123")).unwrap();
    assert_eq!(manager.id(), Some("abc,DEF-123"));
}

#[test]
fn test_reserved_keys_are_hidden() {
    let fx = Fixture::new(config(3600, 300));
    let mut manager = fx.manager();
    manager.start(None).unwrap();
    manager
        .set("visible", true)
        .set("__sess.last_active", 0)
        .forget("__sess");
    assert_eq!(manager.last_active(), at(T0));
    assert!(!manager.has("__sess"));
    assert_eq!(manager.get("__sess.last_active"), None);
    let all = manager.get_all();
    assert_eq!(all.len(), 1);
    assert_eq!(all.get("visible"), Some(&json!(true)));

    manager.forget("visible");
    assert!(manager.get_all().is_empty());
}

#[test]
fn test_operations_before_start() {
    let fx = Fixture::new(config(3600, 300));
    let mut manager = fx.manager();
    assert_eq!(manager.regenerate(false), Err(SessionError::NotActive));
    assert_eq!(manager.save(), Ok(()));
    manager.destroy();
    assert_eq!(manager.state(), SessionState::NotStarted);
    assert_eq!(fx.handler.len(), 0);
}

#[test]
fn test_gc_follows_probability() {
    let certain = SessionConfig {
        sess_gc_probability: 1,
        sess_gc_divisor: 1,
        sess_lifetime: 120,
        ..SessionConfig::default()
    };
    let fx = Fixture::new(certain.clone());
    fx.manager().start(None).unwrap();
    assert_eq!(*fx.handler.gc_calls.lock().unwrap(), vec![120]);

    let never = Fixture::new(config(120, 300));
    never.manager().start(None).unwrap();
    assert!(never.handler.gc_calls.lock().unwrap().is_empty());

    let no_lifetime = Fixture::new(SessionConfig {
        sess_lifetime: 0,
        ..certain
    });
    no_lifetime.manager().start(None).unwrap();
    assert!(no_lifetime.handler.gc_calls.lock().unwrap().is_empty());
}

#[test]
fn test_zero_lifetime_never_expires() {
    let fx = Fixture::new(config(0, 0));
    fx.request(None, |m| {
        m.set("user", "ada");
    });
    fx.clock.advance(10 * 365 * 24 * 3600);
    let manager = fx.request(Some("id-1"), |_| {});
    assert_eq!(manager.id(), Some("id-1"));
    assert_eq!(manager.get("user"), Some(&json!("ada")));
    assert_eq!(manager.cookie().unwrap().max_age, None);
}

#[test]
fn test_corrupt_record_starts_empty_under_same_identifier() {
    let fx = Fixture::new(config(3600, 300));
    fx.handler
        .entries
        .lock()
        .unwrap()
        .insert("client-id".to_string(), "{not json".to_string());
    let mut manager = fx.manager();
    manager.start(Some("client-id")).unwrap();
    assert_eq!(manager.id(), Some("client-id"));
    assert!(manager.get_all().is_empty());
    assert_eq!(manager.last_active(), at(T0));
}

#[test]
fn test_out_of_range_stamps_expire_instead_of_overflowing() {
    let fx = Fixture::new(config(60, 30));
    let blob = json!({
        "user": "ada",
        "__sess": {"last_active": i64::MIN, "last_regenerate": i64::MIN}
    });
    fx.handler
        .entries
        .lock()
        .unwrap()
        .insert("id-x".to_string(), blob.to_string());

    let mut manager = fx.manager();
    assert_eq!(manager.start(Some("id-x")), Ok(SessionState::Active));
    assert_eq!(manager.id(), Some("id-2"));
    assert!(manager.get_all().is_empty());
    assert_eq!(fx.handler.len(), 0);
    assert_eq!(manager.last_active(), at(T0));
}

#[test]
fn test_future_stamps_are_not_due() {
    let fx = Fixture::new(config(60, 30));
    let blob = json!({
        "user": "ada",
        "__sess": {"last_active": i64::MAX, "last_regenerate": i64::MAX}
    });
    fx.handler
        .entries
        .lock()
        .unwrap()
        .insert("id-y".to_string(), blob.to_string());

    let mut manager = fx.manager();
    assert_eq!(manager.start(Some("id-y")), Ok(SessionState::Active));
    assert_eq!(manager.id(), Some("id-y"));
    assert_eq!(manager.get("user"), Some(&json!("ada")));
    assert_eq!(manager.last_active(), at(T0));
}

#[test]
fn test_failed_read_starts_fresh_record() {
    let fx = Fixture::new(config(3600, 300));
    fx.request(None, |m| {
        m.set("user", "ada").flash("notice", "saved");
    });
    assert!(fx.handler.contains("id-1"));

    fx.clock.advance(10);
    fx.handler.fail_reads.store(true, Ordering::SeqCst);
    let mut manager = fx.manager();
    assert_eq!(manager.start(Some("id-1")), Ok(SessionState::Active));
    assert_eq!(manager.id(), Some("id-1"));
    assert!(manager.get_all().is_empty());
    assert!(manager.get_flash_all().is_empty());
    assert_eq!(manager.last_active(), at(T0 + 10));
    assert_eq!(manager.last_regenerate(), at(T0 + 10));

    fx.handler.fail_reads.store(false, Ordering::SeqCst);
    manager.save().unwrap();
    assert_eq!(fx.handler.stored("id-1").unwrap().get("user"), None);
}

#[test]
fn test_lifecycle_over_file_storage() {
    let dir = TempDir::new().unwrap();
    let handler = Arc::new(FileStorage::new(dir.path()).unwrap());
    let clock = Arc::new(ManualClock::new(T0));
    let ids = Arc::new(SequenceIds::default());
    let manager = || {
        SessionManager::new(handler.clone(), config(60, 300))
            .with_clock(clock.clone())
            .with_id_generator(ids.clone())
    };

    let mut first = manager();
    first.start(None).unwrap();
    first.set("user", "ada");
    first.save().unwrap();
    assert!(dir.path().join("sess_id-1").is_file());

    clock.advance(61);
    let mut second = manager();
    second.start(Some("id-1")).unwrap();
    assert_eq!(second.id(), Some("id-2"));
    assert!(!dir.path().join("sess_id-1").exists());
    second.save().unwrap();
    assert!(dir.path().join("sess_id-2").is_file());
}
