use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::*;
use crate::error_handling::types::ConfigError;
use crate::storage::database_storage::is_valid_table_name;

/// Complete runtime configuration, as read from a TOML file.
///
/// ```toml
/// [session]
/// cookie_name = "session"
/// sess_lifetime = 3600
///
/// [storage]
/// backend = "file"
/// path = "/var/lib/session-keeper"
/// ```
///
/// The `[session]` table may be omitted entirely, in which case the
/// defaults of [`SessionConfig`] apply. The `[storage]` table is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    pub storage: StorageConfig,
}

fn cookie_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // RFC 6265 cookie-name token characters
    PATTERN.get_or_init(|| {
        Regex::new(r"^[!#$%&'*+\-.^_`|~0-9A-Za-z]+$").expect("cookie name pattern is valid")
    })
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config = Self::from_toml(&raw)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parses and validates configuration text.
    pub fn from_toml(raw: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;

        match &self.storage {
            StorageConfig::Database { path: None, url: None, .. } => Err(ConfigError::InvalidValue(
                "database storage needs either `path` or `url`".to_string(),
            )),
            StorageConfig::Database { path: Some(_), url: Some(_), .. } => {
                Err(ConfigError::InvalidValue(
                    "database storage takes `path` or `url`, not both".to_string(),
                ))
            }
            StorageConfig::Database { table, .. } if !is_valid_table_name(table) => {
                Err(ConfigError::InvalidValue(format!(
                    "table {:?} is not a plain SQL identifier",
                    table
                )))
            }
            _ => Ok(()),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !cookie_name_pattern().is_match(&self.cookie_name) {
            return Err(ConfigError::InvalidValue(format!(
                "cookie_name {:?} is not a valid cookie name",
                self.cookie_name
            )));
        }
        if self.sess_gc_divisor == 0 {
            return Err(ConfigError::NotInRange(
                "sess_gc_divisor must be greater than 0".to_string(),
            ));
        }
        if self.sess_gc_probability > self.sess_gc_divisor {
            return Err(ConfigError::NotInRange(format!(
                "sess_gc_probability ({}) must not exceed sess_gc_divisor ({})",
                self.sess_gc_probability, self.sess_gc_divisor
            )));
        }
        if self.cookie_same_site == SameSite::None && !self.cookie_secure {
            warn!("cookie_same_site = None without cookie_secure is rejected by most browsers");
        }
        Ok(())
    }
}
