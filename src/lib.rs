pub mod configuration;
pub use configuration::{Config, SameSite, SessionConfig, StorageConfig};

pub mod error_handling;
pub use error_handling::{ConfigError, SessionError, StorageError};

pub mod session_management;
pub use session_management::{SessionManager, SessionState};

pub mod storage;
pub use storage::{build_handler, GcOutcome, SessionHandler};
