//! Authentication and the single-session lock.
//!
//! Token validation delegates to the persistent store; on top of that this
//! module enforces that at most one streaming session is active per process
//! and that the active session's own token cannot be revoked out from
//! under it.

use crate::token_store::{StoreError, StoredToken, TokenStore};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// The currently authenticated streaming session.
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// Stored hash of the session's token.
    pub token_hash: String,
    pub client_name: String,
    pub is_admin: bool,
    pub connected_at: f64,
}

impl AuthSession {
    fn from_stored(stored: &StoredToken) -> AuthSession {
        AuthSession {
            token_hash: stored.token.clone(),
            client_name: stored.client_name.clone(),
            is_admin: stored.is_admin,
            connected_at: now(),
        }
    }
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Validates tokens and owns the process-wide session slot.
#[derive(Debug)]
pub struct AuthManager {
    store: TokenStore,
    active: Mutex<Option<AuthSession>>,
}

impl AuthManager {
    pub fn new(store: TokenStore) -> Self {
        AuthManager {
            store,
            active: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn validate(&self, plaintext: &str) -> Result<Option<StoredToken>, StoreError> {
        self.store.validate(plaintext)
    }

    pub fn is_admin(&self, plaintext: &str) -> Result<bool, StoreError> {
        self.store.is_admin(plaintext)
    }

    /// Try to take the session slot. Succeeds when the slot is free or when
    /// the same token already holds it (which refreshes the timestamp).
    pub fn acquire(&self, stored: &StoredToken) -> bool {
        let Ok(mut active) = self.active.lock() else {
            return false;
        };
        match active.as_mut() {
            Some(session) if session.token_hash == stored.token => {
                debug!(client = %session.client_name, "session reacquired by same client");
                session.connected_at = now();
                true
            }
            Some(session) => {
                warn!(
                    active = %session.client_name,
                    denied = %stored.client_name,
                    "session lock denied: another user is active"
                );
                false
            }
            None => {
                info!(client = %stored.client_name, "session acquired");
                *active = Some(AuthSession::from_stored(stored));
                true
            }
        }
    }

    /// Release the slot. Only the holder's token releases it; a stale
    /// release (already free) succeeds.
    pub fn release(&self, token_hash: &str) -> bool {
        let Ok(mut active) = self.active.lock() else {
            return false;
        };
        match active.as_ref() {
            None => true,
            Some(session) if session.token_hash == token_hash => {
                info!(client = %session.client_name, "session released");
                *active = None;
                true
            }
            Some(_) => {
                warn!("cannot release session: token mismatch");
                false
            }
        }
    }

    pub fn is_session_active(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    pub fn active_session(&self) -> Option<AuthSession> {
        self.active.lock().ok().and_then(|a| a.clone())
    }

    pub fn active_client_name(&self) -> Option<String> {
        self.active_session().map(|s| s.client_name)
    }

    /// Admin escape hatch: drop the slot regardless of holder.
    pub fn force_release(&self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(session) = active.take() {
                warn!(client = %session.client_name, "force releasing session");
            }
        }
    }

    /// Revoke by plaintext, refusing to cut off the active session.
    pub fn revoke(&self, plaintext: &str) -> Result<bool, StoreError> {
        let hash = crate::token_store::hash_token(plaintext);
        if self.is_active_token_hash(&hash) {
            warn!("cannot revoke token of active session");
            return Ok(false);
        }
        self.store.revoke(plaintext)
    }

    /// Revoke by non-secret id, refusing to cut off the active session.
    pub fn revoke_by_id(&self, token_id: &str) -> Result<bool, StoreError> {
        if let Some(stored) = self.store.get_by_id(token_id)? {
            if self.is_active_token_hash(&stored.token) {
                warn!(client = %stored.client_name, "cannot revoke token of active session");
                return Ok(false);
            }
        }
        self.store.revoke_by_id(token_id)
    }

    fn is_active_token_hash(&self, token_hash: &str) -> bool {
        self.active_session()
            .map(|s| s.token_hash == token_hash)
            .unwrap_or(false)
    }

    pub fn list_tokens(&self) -> Result<Vec<StoredToken>, StoreError> {
        self.store.list()
    }
}
