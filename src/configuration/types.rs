use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `SameSite` attribute emitted on the identifier cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    None,
    #[default]
    Lax,
    Strict,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::None => write!(f, "None"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::Strict => write!(f, "Strict"),
        }
    }
}

/// Lifecycle settings for a `SessionManager`.
///
/// Every field has a default so a configuration file only needs to name the
/// options it changes. Durations are whole seconds.
///
/// - `sess_lifetime = 0` keeps a session until the host session ends; no
///   expiration check is made and the cookie carries no `Max-Age`.
/// - `sess_regenerate_duration = 0` disables periodic identifier rotation.
/// - A garbage collection sweep runs on a given start with probability
///   `sess_gc_probability / sess_gc_divisor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub cookie_path: String,
    pub cookie_domain: String,
    pub cookie_secure: bool,
    pub cookie_http_only: bool,
    pub cookie_same_site: SameSite,
    pub sess_regenerate_duration: u64,
    pub sess_lifetime: u64,
    pub sess_gc_probability: u32,
    pub sess_gc_divisor: u32,
    /// Location hint handed to `SessionHandler::open`.
    pub save_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            cookie_path: "/".to_string(),
            cookie_domain: String::new(),
            cookie_secure: true,
            cookie_http_only: true,
            cookie_same_site: SameSite::Lax,
            sess_regenerate_duration: 300,
            sess_lifetime: 3600,
            sess_gc_probability: 1,
            sess_gc_divisor: 100,
            save_path: String::new(),
        }
    }
}

/// Storage backend selection, tagged by `backend` in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// One `sess_<id>` file per session under `path`.
    File { path: PathBuf },
    /// SQLite database, either a file `path` or a full connection `url`,
    /// keeping sessions in `table`.
    Database {
        path: Option<PathBuf>,
        url: Option<String>,
        #[serde(default = "default_session_table")]
        table: String,
    },
    /// Redis server at `url`, or an in-process store when `url` is absent.
    KeyValue {
        url: Option<String>,
        #[serde(default)]
        key_prefix: String,
    },
    /// Filesystem adapter rooted at `root`, over a local directory `path` or
    /// an in-process filesystem when `path` is absent.
    Adapter {
        path: Option<PathBuf>,
        #[serde(default)]
        root: String,
    },
}

fn default_session_table() -> String {
    "sessions".to_string()
}
