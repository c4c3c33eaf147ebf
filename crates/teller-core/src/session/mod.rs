//! Server-side session lifecycle.
//!
//! A session moves `Anonymous → Active → (Expired | Destroyed)`. Expiry is
//! idle-based: a session whose last activity is older than the configured
//! lifetime is expired, and is destroyed the next time it is resolved.

mod store;

pub use store::SessionStore;

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::types::Identity;

/// Random session identifier carried in the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    const BYTES: usize = 32;

    /// Generate a new random session ID.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; Self::BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Accept a client-supplied id only if it has the generated shape.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let well_formed = raw.len() == Self::BYTES * 2
            && raw.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(raw.to_string()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No identity attached.
    Anonymous,
    /// Authenticated and within its idle lifetime.
    Active,
    /// Authenticated but idle for longer than the lifetime.
    Expired,
    /// Explicitly destroyed.
    Destroyed,
}

/// Anti-forgery token held by a session.
#[derive(Clone, Serialize, Deserialize)]
pub struct CsrfState {
    /// Token value.
    pub token: String,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
}

impl std::fmt::Debug for CsrfState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfState")
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

/// Flash message style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    /// Confirmation.
    Success,
    /// Error.
    Danger,
}

/// One-time notice shown on the next page after a redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    /// Style.
    #[serde(rename = "type")]
    pub kind: FlashKind,
    /// Text.
    pub message: String,
}

impl Flash {
    /// Create a success notice.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Success,
            message: message.into(),
        }
    }

    /// Create an error notice.
    #[must_use]
    pub fn danger(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Danger,
            message: message.into(),
        }
    }
}

/// Server-side session state for one caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    identity: Option<Identity>,
    last_activity: DateTime<Utc>,
    #[serde(default)]
    pub(crate) csrf: Option<CsrfState>,
    #[serde(default)]
    flash: Option<Flash>,
    #[serde(skip)]
    destroyed: bool,
}

impl Session {
    /// Create an anonymous session with a fresh id.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            id: SessionId::generate(),
            identity: None,
            last_activity: Utc::now(),
            csrf: None,
            flash: None,
            destroyed: false,
        }
    }

    /// Create an authenticated session with a fresh id.
    #[must_use]
    pub fn authenticated(identity: Identity) -> Self {
        let last_activity = identity.authenticated_at;
        Self {
            id: SessionId::generate(),
            identity: Some(identity),
            last_activity,
            csrf: None,
            flash: None,
            destroyed: false,
        }
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Identity snapshot, if authenticated.
    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Time of the last authenticated request.
    #[must_use]
    pub const fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Whether the session has been destroyed.
    #[must_use]
    pub const fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Queue a flash message, replacing any pending one.
    pub fn set_flash(&mut self, flash: Flash) {
        self.flash = Some(flash);
    }

    /// Remove and return the pending flash message.
    pub fn take_flash(&mut self) -> Option<Flash> {
        self.flash.take()
    }

    /// Pending flash message, if any.
    #[must_use]
    pub const fn flash(&self) -> Option<&Flash> {
        self.flash.as_ref()
    }
}

/// Applies the idle-expiry policy to sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionManager {
    lifetime: Duration,
}

impl SessionManager {
    /// Create a manager with the given idle lifetime.
    #[must_use]
    pub const fn new(lifetime: Duration) -> Self {
        Self { lifetime }
    }

    /// Idle lifetime.
    #[must_use]
    pub const fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self, session: &Session) -> SessionState {
        self.state_at(session, Utc::now())
    }

    fn state_at(&self, session: &Session, now: DateTime<Utc>) -> SessionState {
        if session.destroyed {
            SessionState::Destroyed
        } else if session.identity.is_none() {
            SessionState::Anonymous
        } else if self.is_expired_at(session, now) {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    /// Whether the session holds a live identity.
    #[must_use]
    pub fn is_authenticated(&self, session: &Session) -> bool {
        self.state(session) == SessionState::Active
    }

    /// Identity of a live session.
    #[must_use]
    pub fn current_identity<'a>(&self, session: &'a Session) -> Option<&'a Identity> {
        if self.is_authenticated(session) {
            session.identity.as_ref()
        } else {
            None
        }
    }

    /// Mark activity now.
    pub fn touch(&self, session: &mut Session) {
        session.last_activity = Utc::now();
    }

    /// True if idle for strictly longer than the lifetime.
    #[must_use]
    pub fn is_expired(&self, session: &Session) -> bool {
        self.is_expired_at(session, Utc::now())
    }

    fn is_expired_at(&self, session: &Session, now: DateTime<Utc>) -> bool {
        let idle = now.signed_duration_since(session.last_activity);
        // A clock that moved backwards counts as no idle time.
        idle.to_std().is_ok_and(|idle| idle > self.lifetime)
    }

    /// Clear all session state. The id is kept only so the caller can drop it from storage.
    pub fn destroy(&self, session: &mut Session) {
        session.identity = None;
        session.csrf = None;
        session.flash = None;
        session.destroyed = true;
    }

    /// Apply the lifecycle at the start of a request.
    ///
    /// Expired sessions are destroyed and reported as `Expired`; live ones are
    /// touched once. An anonymous session idle past the lifetime is destroyed
    /// and reported as `Expired` too.
    pub fn resolve(&self, session: &mut Session) -> SessionState {
        match self.state(session) {
            SessionState::Expired => {
                tracing::debug!(session = %session.id, "Session expired");
                self.destroy(session);
                SessionState::Expired
            }
            SessionState::Anonymous if self.is_expired(session) => {
                tracing::debug!(session = %session.id, "Anonymous session idle");
                self.destroy(session);
                SessionState::Expired
            }
            SessionState::Active => {
                self.touch(session);
                SessionState::Active
            }
            state => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, Role};
    use pretty_assertions::assert_eq;

    fn identity() -> Identity {
        Identity {
            account_id: AccountId(42),
            name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
            role: Role::Admin,
            authenticated_at: Utc::now(),
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(Duration::from_secs(1800))
    }

    fn idle_for(session: &mut Session, secs: i64) {
        session.last_activity = Utc::now() - chrono::Duration::seconds(secs);
    }

    #[test]
    fn test_session_id_shape() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 64);
        assert_eq!(SessionId::parse(id.as_str()), Some(id));
        assert_eq!(SessionId::parse("../../etc/passwd"), None);
        assert_eq!(SessionId::parse(&"A".repeat(64)), None);
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_anonymous_session() {
        let manager = manager();
        let session = Session::anonymous();
        assert_eq!(manager.state(&session), SessionState::Anonymous);
        assert!(!manager.is_authenticated(&session));
        assert!(manager.current_identity(&session).is_none());
    }

    #[test]
    fn test_authenticated_session() {
        let manager = manager();
        let session = Session::authenticated(identity());
        assert_eq!(manager.state(&session), SessionState::Active);
        assert_eq!(
            manager.current_identity(&session).map(|i| i.role),
            Some(Role::Admin)
        );
    }

    #[test]
    fn test_expiry_boundary() {
        let manager = manager();
        let mut session = Session::authenticated(identity());
        let now = Utc::now();

        session.last_activity = now - chrono::Duration::seconds(1800);
        assert!(!manager.is_expired_at(&session, now));

        session.last_activity = now - chrono::Duration::seconds(1801);
        assert!(manager.is_expired_at(&session, now));
        assert_eq!(manager.state_at(&session, now), SessionState::Expired);
    }

    #[test]
    fn test_touch_resets_clock() {
        let manager = manager();
        let mut session = Session::authenticated(identity());
        idle_for(&mut session, 4000);
        assert!(manager.is_expired(&session));

        manager.touch(&mut session);
        assert!(!manager.is_expired(&session));
    }

    #[test]
    fn test_resolve_destroys_expired() {
        let manager = manager();
        let mut session = Session::authenticated(identity());
        session.set_flash(Flash::success("hello"));
        idle_for(&mut session, 1801);

        assert_eq!(manager.resolve(&mut session), SessionState::Expired);
        assert!(session.is_destroyed());
        assert!(session.identity().is_none());
        assert!(session.flash().is_none());
        assert!(!manager.is_authenticated(&session));
        assert_eq!(manager.state(&session), SessionState::Destroyed);
    }

    #[test]
    fn test_resolve_touches_active() {
        let manager = manager();
        let mut session = Session::authenticated(identity());
        idle_for(&mut session, 600);
        let before = session.last_activity();

        assert_eq!(manager.resolve(&mut session), SessionState::Active);
        assert!(session.last_activity() > before);
    }

    #[test]
    fn test_resolve_drops_idle_anonymous() {
        let manager = manager();
        let mut fresh = Session::anonymous();
        assert_eq!(manager.resolve(&mut fresh), SessionState::Anonymous);
        assert!(!fresh.is_destroyed());

        let mut idle = Session::anonymous();
        idle.set_flash(Flash::danger("Invalid request method."));
        idle_for(&mut idle, 1801);
        assert_eq!(manager.resolve(&mut idle), SessionState::Expired);
        assert!(idle.is_destroyed());
        assert!(idle.flash().is_none());
    }

    #[test]
    fn test_destroy_is_repeatable() {
        let manager = manager();
        let mut session = Session::authenticated(identity());
        manager.destroy(&mut session);
        manager.destroy(&mut session);
        assert_eq!(manager.state(&session), SessionState::Destroyed);
    }

    #[test]
    fn test_flash_is_one_time() {
        let mut session = Session::anonymous();
        session.set_flash(Flash::danger("Invalid username or password."));
        assert_eq!(
            session.take_flash(),
            Some(Flash::danger("Invalid username or password."))
        );
        assert_eq!(session.take_flash(), None);
    }
}
