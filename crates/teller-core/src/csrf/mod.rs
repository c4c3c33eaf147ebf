//! Per-session anti-forgery tokens.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;

use crate::auth::AuthError;
use crate::session::{CsrfState, Session};

const TOKEN_BYTES: usize = 32;

/// Issues and checks the CSRF token held by each session.
#[derive(Debug, Clone, Copy)]
pub struct CsrfGuard {
    lifetime: Duration,
}

impl CsrfGuard {
    /// Create a guard whose tokens expire after `lifetime`.
    #[must_use]
    pub const fn new(lifetime: Duration) -> Self {
        Self { lifetime }
    }

    /// Return the session's token, minting a new one if none is live.
    pub fn issue_token(&self, session: &mut Session) -> String {
        let now = Utc::now();
        if let Some(state) = &session.csrf {
            if self.is_fresh(state.issued_at, now) {
                return state.token.clone();
            }
        }

        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        session.csrf = Some(CsrfState {
            token: token.clone(),
            issued_at: now,
        });
        token
    }

    /// Check a supplied token against the session's live token.
    #[must_use]
    pub fn verify(&self, session: &Session, supplied: &str) -> bool {
        self.verify_at(session, supplied, Utc::now())
    }

    fn verify_at(&self, session: &Session, supplied: &str, now: DateTime<Utc>) -> bool {
        let Some(state) = &session.csrf else {
            return false;
        };
        let matches = constant_time_eq(state.token.as_bytes(), supplied.as_bytes());
        matches && self.is_fresh(state.issued_at, now)
    }

    /// Forget the session's token so the next form gets a new one.
    pub fn reset(&self, session: &mut Session) {
        session.csrf = None;
    }

    /// Verify then reset, for a state-changing request.
    ///
    /// The token is spent whether or not it matched.
    ///
    /// # Errors
    ///
    /// Returns `CsrfRejected` if the token is missing, wrong or expired.
    pub fn consume(&self, session: &mut Session, supplied: &str) -> Result<(), AuthError> {
        let ok = self.verify(session, supplied);
        self.reset(session);
        if ok {
            Ok(())
        } else {
            tracing::warn!(session = %session.id(), "CSRF token rejected");
            Err(AuthError::CsrfRejected)
        }
    }

    fn is_fresh(&self, issued_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(issued_at)
            .to_std()
            .map_or(true, |age| age <= self.lifetime)
    }
}

/// Compare two byte strings without stopping at the first difference.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
