//! Session persistence on the `sessions` sled tree.

use super::{Session, SessionId, SessionManager};
use crate::store::StoreError;

const SESSIONS: &str = "sessions";

/// Keeps session state between requests, keyed by session id.
#[derive(Debug, Clone)]
pub struct SessionStore {
    tree: sled::Tree,
}

impl SessionStore {
    /// Open the session tree in an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if the tree cannot be opened.
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            tree: db.open_tree(SESSIONS)?,
        })
    }

    /// Load a session.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails or the record cannot be decoded.
    pub fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        match self.tree.get(id.as_str().as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Save a session. Destroyed sessions are removed instead.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        if session.is_destroyed() {
            return self.remove(session.id());
        }
        let value = serde_json::to_vec(session)?;
        self.tree.insert(session.id().as_str().as_bytes(), value)?;
        Ok(())
    }

    /// Remove a session.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn remove(&self, id: &SessionId) -> Result<(), StoreError> {
        self.tree.remove(id.as_str().as_bytes())?;
        Ok(())
    }

    /// Drop sessions idle past the lifetime and records that no longer decode.
    ///
    /// Anonymous sessions carrying only a flash or CSRF token age out the same way.
    ///
    /// Returns the number of sessions removed.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn purge_expired(&self, manager: &SessionManager) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let stale = match serde_json::from_slice::<Session>(&value) {
                Ok(session) => manager.is_expired(&session),
                Err(_) => true,
            };
            if stale {
                self.tree.remove(key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Purged expired sessions");
        }
        Ok(removed)
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
