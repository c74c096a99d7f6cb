//! Password hashing and the server-side session store.
//!
//! A session is an opaque random token (the cookie value) mapped to a
//! [`SessionRecord`] in the `sessions` tree. The record carries a typed
//! [`SessionState`] rather than a loose attribute map, and an expiry that
//! mirrors the cookie max-age.

use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sled::Tree;
use tracing::debug;
use uuid::Uuid;

use crate::ids::Id;
use crate::models::Role;
use crate::storage::{Storage, StorageError, StorageResult};

/// Name of the cookie that carries the session token.
pub const SESSION_COOKIE: &str = "barangay_session";

const SESSIONS_TREE: &str = "sessions";

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password, cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

/// Who is making the request, resolved from the session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: Id,
    pub role: Role,
    pub barangay_id: Id,
    pub barangay_name: String,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum SessionState {
    Anonymous,
    Authenticated(Identity),
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Authenticated(identity) => Some(identity),
            SessionState::Anonymous => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct SessionRecord {
    state: SessionState,
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionStore {
    tree: Tree,
    ttl: Duration,
}

impl SessionStore {
    pub fn open(storage: &Storage, ttl: Duration) -> StorageResult<Self> {
        Ok(Self {
            tree: storage.open_tree(SESSIONS_TREE)?,
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Marks a new session authenticated for `identity` and returns its token.
    ///
    /// Every login issues a fresh token. The `existing` session, if any, is
    /// removed so a token planted before login never becomes authenticated.
    pub fn login(&self, existing: Option<&str>, identity: Identity) -> StorageResult<String> {
        let expires_at = Utc::now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| StorageError::Constraint("session expiry out of range".to_string()))?;
        if let Some(old) = existing {
            self.tree.remove(old.as_bytes())?;
        }
        let token = Uuid::new_v4().simple().to_string();
        let record = SessionRecord {
            state: SessionState::Authenticated(identity),
            expires_at,
        };
        self.tree.insert(token.as_bytes(), serde_json::to_vec(&record)?)?;
        Ok(token)
    }

    /// Current state behind a token. Unknown and expired tokens are anonymous.
    pub fn resolve(&self, token: &str) -> StorageResult<SessionState> {
        Ok(self
            .load(token)?
            .map(|record| record.state)
            .unwrap_or(SessionState::Anonymous))
    }

    /// Drops every attribute of the session. Clearing an unknown token is fine.
    pub fn logout(&self, token: &str) -> StorageResult<()> {
        self.tree.remove(token.as_bytes())?;
        Ok(())
    }

    fn load(&self, token: &str) -> StorageResult<Option<SessionRecord>> {
        let Some(bytes) = self.tree.get(token.as_bytes())? else {
            return Ok(None);
        };
        let record: SessionRecord = serde_json::from_slice(&bytes)?;
        if record.expires_at <= Utc::now() {
            debug!("purging expired session");
            self.tree.remove(token.as_bytes())?;
            return Ok(None);
        }
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_BCRYPT_COST;

    fn identity() -> Identity {
        Identity {
            user_id: Id::new(3).unwrap(),
            role: Role::Resident,
            barangay_id: Id::new(1).unwrap(),
            barangay_name: "San Isidro".to_string(),
        }
    }

    fn sessions(ttl: Duration) -> SessionStore {
        let storage = Storage::temporary().expect("temporary storage");
        SessionStore::open(&storage, ttl).expect("session store")
    }

    #[test]
    fn passwords_hash_and_verify() {
        let hashed = hash_password("s3cret-pass", MIN_BCRYPT_COST).unwrap();
        assert_ne!(hashed, "s3cret-pass");
        assert!(verify_password("s3cret-pass", &hashed).unwrap());
        assert!(!verify_password("wrong", &hashed).unwrap());
    }

    #[test]
    fn login_then_logout() {
        let store = sessions(Duration::hours(1));
        let token = store.login(None, identity()).unwrap();

        let state = store.resolve(&token).unwrap();
        let resolved = state.identity().expect("authenticated");
        assert_eq!(resolved.user_id.get(), 3);
        assert_eq!(resolved.barangay_id.get(), 1);
        assert_eq!(resolved.role, Role::Resident);

        store.logout(&token).unwrap();
        assert_eq!(store.resolve(&token).unwrap(), SessionState::Anonymous);
    }

    #[test]
    fn relogin_issues_a_fresh_token() {
        let store = sessions(Duration::hours(1));
        let token = store.login(None, identity()).unwrap();

        let mut admin = identity();
        admin.role = Role::Admin;
        let again = store.login(Some(&token), admin).unwrap();

        assert_ne!(token, again);
        assert_eq!(store.resolve(&token).unwrap(), SessionState::Anonymous);
        assert!(store.resolve(&again).unwrap().identity().unwrap().is_admin());
    }

    #[test]
    fn planted_token_is_never_authenticated() {
        let store = sessions(Duration::hours(1));
        let planted = store.login(None, identity()).unwrap();
        store.logout(&planted).unwrap();

        let token = store.login(Some(&planted), identity()).unwrap();
        assert_ne!(token, planted);
        assert_eq!(store.resolve(&planted).unwrap(), SessionState::Anonymous);
    }

    #[test]
    fn unrepresentable_expiry_is_an_error() {
        let store = sessions(Duration::MAX);
        let err = store.login(None, identity()).unwrap_err();
        assert!(matches!(err, StorageError::Constraint(_)));
    }

    #[test]
    fn unknown_token_gets_a_fresh_session() {
        let store = sessions(Duration::hours(1));
        let token = store.login(Some("forged"), identity()).unwrap();
        assert_ne!(token, "forged");
        assert_eq!(store.resolve("forged").unwrap(), SessionState::Anonymous);
    }

    #[test]
    fn expired_sessions_are_anonymous() {
        let store = sessions(Duration::seconds(-1));
        let token = store.login(None, identity()).unwrap();
        assert_eq!(store.resolve(&token).unwrap(), SessionState::Anonymous);
    }
}
