//! Cookie parsing and `Set-Cookie` values.

use std::time::Duration;

use axum::http::{HeaderMap, header::COOKIE};

/// Cookie carrying the session id.
pub const SESSION_COOKIE: &str = "teller_session";
/// Cookie carrying the remember-me token.
pub const REMEMBER_COOKIE: &str = "remember_token";

/// Find a cookie value in the request headers.
#[must_use]
pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Builds `Set-Cookie` header values.
#[derive(Debug, Clone, Copy)]
pub struct CookieJar {
    secure: bool,
    session_max_age: Duration,
}

impl CookieJar {
    /// Create a cookie builder.
    #[must_use]
    pub const fn new(secure: bool, session_max_age: Duration) -> Self {
        Self {
            secure,
            session_max_age,
        }
    }

    /// Session cookie for an id.
    #[must_use]
    pub fn session(&self, id: &str) -> String {
        self.build(SESSION_COOKIE, id, self.session_max_age, "Strict")
    }

    /// Remember-me cookie.
    #[must_use]
    pub fn remember(&self, value: &str, max_age: Duration) -> String {
        self.build(REMEMBER_COOKIE, value, max_age, "Lax")
    }

    /// Expire a cookie immediately.
    #[must_use]
    pub fn clear(&self, name: &str) -> String {
        self.build(name, "", Duration::ZERO, "Strict")
    }

    fn build(&self, name: &str, value: &str, max_age: Duration, same_site: &str) -> String {
        let secure = if self.secure { "; Secure" } else { "" };
        format!(
            "{name}={value}; Path=/; Max-Age={}; HttpOnly; SameSite={same_site}{secure}",
            max_age.as_secs()
        )
    }
}
