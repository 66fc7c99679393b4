//! Session management core module.
//!
//! [`SessionManager`] runs the session lifecycle over a storage handler:
//! loading, expiring, rotating and destroying sessions, and the flash data
//! channel on top of the record.

use std::fmt;

pub mod clock;
pub mod cookie;
pub mod flash;
pub mod id_generator;
pub mod record;
pub mod session_manager;

#[cfg(test)]
pub mod tests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cookie::SessionCookie;
pub use flash::FlashData;
pub use id_generator::{IdGenerator, UuidIdGenerator};
pub use record::SessionRecord;
pub use session_manager::{is_valid_session_id, SessionManager};

/// Lifecycle state of a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    NotStarted,
    Active,
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::NotStarted => write!(f, "not started"),
            SessionState::Active => write!(f, "active"),
            SessionState::Destroyed => write!(f, "destroyed"),
        }
    }
}
