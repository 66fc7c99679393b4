use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::configuration::{SameSite, SessionConfig};

/// The identifier cookie the host should send with its response.
///
/// Renders as a `Set-Cookie` header value through [`fmt::Display`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub max_age: Option<u64>,
    pub expires: Option<DateTime<Utc>>,
}

impl SessionCookie {
    /// Cookie carrying `session_id`, issued at Unix time `now`.
    pub fn issue(config: &SessionConfig, session_id: &str, now: i64) -> Self {
        let lifetime = config.sess_lifetime;
        let expires = (lifetime > 0)
            .then(|| DateTime::from_timestamp(now, 0))
            .flatten()
            .and_then(|at| {
                let secs = Duration::try_seconds(i64::try_from(lifetime).ok()?)?;
                at.checked_add_signed(secs)
            });
        Self {
            max_age: (lifetime > 0).then_some(lifetime),
            expires,
            ..Self::base(config, session_id)
        }
    }

    /// Cookie telling the client to drop its identifier.
    pub fn removal(config: &SessionConfig) -> Self {
        Self {
            max_age: Some(0),
            expires: Some(DateTime::UNIX_EPOCH),
            ..Self::base(config, "")
        }
    }

    fn base(config: &SessionConfig, value: &str) -> Self {
        Self {
            name: config.cookie_name.clone(),
            value: value.to_owned(),
            path: config.cookie_path.clone(),
            domain: config.cookie_domain.clone(),
            secure: config.cookie_secure,
            http_only: config.cookie_http_only,
            same_site: config.cookie_same_site,
            max_age: None,
            expires: None,
        }
    }

    pub fn is_removal(&self) -> bool {
        self.max_age == Some(0)
    }
}

impl fmt::Display for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if !self.path.is_empty() {
            write!(f, "; Path={}", self.path)?;
        }
        if !self.domain.is_empty() {
            write!(f, "; Domain={}", self.domain)?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age)?;
        }
        if let Some(expires) = self.expires {
            write!(f, "; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT"))?;
        }
        if self.secure {
            write!(f, "; Secure")?;
        }
        if self.http_only {
            write!(f, "; HttpOnly")?;
        }
        write!(f, "; SameSite={}", self.same_site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_cookie_header() {
        let config = SessionConfig {
            cookie_domain: "example.com".to_string(),
            sess_lifetime: 60,
            ..SessionConfig::default()
        };
        let cookie = SessionCookie::issue(&config, "abc123", 0);
        assert_eq!(
            cookie.to_string(),
            "session=abc123; Path=/; Domain=example.com; Max-Age=60; \
             Expires=Thu, 01 Jan 1970 00:01:00 GMT; Secure; HttpOnly; SameSite=Lax"
        );
        assert!(!cookie.is_removal());
    }

    #[test]
    fn test_session_only_cookie_has_no_expiry() {
        let config = SessionConfig {
            sess_lifetime: 0,
            cookie_secure: false,
            cookie_same_site: SameSite::Strict,
            ..SessionConfig::default()
        };
        let cookie = SessionCookie::issue(&config, "abc", 1_700_000_000);
        assert_eq!(cookie.max_age, None);
        assert_eq!(cookie.to_string(), "session=abc; Path=/; HttpOnly; SameSite=Strict");
    }

    #[test]
    fn test_removal_cookie() {
        let cookie = SessionCookie::removal(&SessionConfig::default());
        assert!(cookie.is_removal());
        assert_eq!(
            cookie.to_string(),
            "session=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; \
             Secure; HttpOnly; SameSite=Lax"
        );
    }
}
