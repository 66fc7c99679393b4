use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    NotInRange(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

/// Failures raised by storage backends.
///
/// `SetupFailed` is only produced while a backend is being constructed and
/// means the backend is unusable for the rest of the process. The other
/// variants describe transient faults; the `SessionHandler` implementations
/// log them and fold them into the contract's boolean / empty results.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
    DeleteFailed,
    SetupFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
            StorageError::DeleteFailed => write!(f, "Storage delete failed"),
            StorageError::SetupFailed(e) => write!(f, "Storage setup failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    HandlerUnavailable,
    NotActive,
    RegenerateFailed,
    WriteFailed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::HandlerUnavailable => write!(f, "Session handler could not be opened"),
            SessionError::NotActive => write!(f, "No active session"),
            SessionError::RegenerateFailed => {
                write!(f, "Session could not be persisted under a new identifier")
            }
            SessionError::WriteFailed => write!(f, "Session write failed"),
        }
    }
}

impl std::error::Error for SessionError {}
