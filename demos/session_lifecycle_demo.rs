//! Walks one visitor through several requests against a file-backed store.
//!
//! Run with `cargo run --example session_lifecycle_demo`.

use std::sync::Arc;

use log::info;
use session_keeper::session_management::{Clock, ManualClock, SessionManager, SystemClock};
use session_keeper::storage::file_storage::FileStorage;
use session_keeper::{SessionConfig, SessionHandler};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let dir = std::env::temp_dir().join("session-keeper-demo");
    let handler: Arc<dyn SessionHandler> = Arc::new(FileStorage::new(&dir)?);
    let clock = Arc::new(ManualClock::new(SystemClock.now()));
    let config = SessionConfig {
        sess_lifetime: 60,
        sess_regenerate_duration: 30,
        ..SessionConfig::default()
    };
    let manager = || {
        SessionManager::new(handler.clone(), config.clone()).with_clock(clock.clone())
    };

    // Request 1: log in and flash a greeting.
    let mut session = manager();
    session.start(None)?;
    session.set("user.name", "ada").flash("notice", "Welcome back");
    session.save()?;
    let id = session.id().unwrap_or_default().to_string();
    info!("Set-Cookie: {}", session.cookie().map(|c| c.to_string()).unwrap_or_default());

    // Request 2, ten seconds later: the flash is still readable.
    clock.advance(10);
    let mut session = manager();
    session.start(Some(id.as_str()))?;
    info!("user = {:?}, notice = {:?}", session.get("user.name"), session.get_flash("notice"));
    session.save()?;

    // Request 3, thirty-one seconds later: the identifier rotates.
    clock.advance(31);
    let mut session = manager();
    session.start(Some(id.as_str()))?;
    info!("rotated: {}, notice = {:?}", session.id() != Some(id.as_str()), session.get_flash("notice"));
    let id = session.id().unwrap_or_default().to_string();
    session.save()?;

    // Request 4, after a minute of silence: the session has expired.
    clock.advance(61);
    let mut session = manager();
    session.start(Some(id.as_str()))?;
    info!("expired, new record is empty: {}", session.get_all().is_empty());
    session.destroy();
    info!("Set-Cookie: {}", session.cookie().map(|c| c.to_string()).unwrap_or_default());

    info!("gc: {}", handler.gc(0));
    Ok(())
}
