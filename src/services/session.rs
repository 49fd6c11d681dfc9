//! Session creation, validation, expiry, and revocation.
//!
//! Sessions live server-side in a [`SessionStore`]; the client only ever
//! holds the opaque token. Expiry is checked lazily on every access; there
//! is no background sweep to race against. A session dies by expiring or by
//! being revoked (logout, password change invalidating siblings, admin lock
//! or delete cascading); an expired session never comes back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::store::user::PublicUser;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub username: String,
    /// Synchronizer token bound to this session, echoed by the client on
    /// state-changing requests.
    pub csrf_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Server-side session persistence seam. The in-memory implementation is the
/// production default; tests use the same one.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, token: &str) -> Option<Session>;
    async fn insert(&self, session: Session);
    async fn remove(&self, token: &str) -> Option<Session>;
    /// Removes every session belonging to `user_id` except `keep`.
    /// Returns how many were removed.
    async fn remove_for_user(&self, user_id: &str, keep: Option<&str>) -> usize;
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, token: &str) -> Option<Session> {
        self.sessions.read().await.get(token).cloned()
    }

    async fn insert(&self, session: Session) {
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session);
    }

    async fn remove(&self, token: &str) -> Option<Session> {
        self.sessions.write().await.remove(token)
    }

    async fn remove_for_user(&self, user_id: &str, keep: Option<&str>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|token, session| {
            session.user_id != user_id || keep.is_some_and(|k| k == token.as_str())
        });
        before - sessions.len()
    }
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl_minutes: u32) -> Self {
        Self {
            store,
            ttl: Duration::minutes(i64::from(ttl_minutes)),
        }
    }

    /// Creates a fresh session for the user and returns it with its token
    /// and CSRF secret.
    pub async fn create(&self, user: &PublicUser) -> Session {
        let now = Utc::now();
        let session = Session {
            token: generate_token(),
            user_id: user.id.clone(),
            username: user.username.clone(),
            csrf_token: generate_token(),
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.store.insert(session.clone()).await;
        session
    }

    /// Resolves a token to a live session. An expired session is dropped on
    /// touch and reported as absent.
    pub async fn authenticate(&self, token: &str) -> Option<Session> {
        self.authenticate_at(token, Utc::now()).await
    }

    async fn authenticate_at(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        let session = self.store.get(token).await?;
        if session.expires_at <= now {
            self.store.remove(token).await;
            return None;
        }
        Some(session)
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.store.remove(token).await.is_some()
    }

    /// Invalidates every other session of the user, keeping `keep` alive.
    /// Used on password change: the session that authenticated the change
    /// survives, its siblings do not.
    pub async fn revoke_others(&self, user_id: &str, keep: &str) -> usize {
        self.store.remove_for_user(user_id, Some(keep)).await
    }

    pub async fn revoke_all_for_user(&self, user_id: &str) -> usize {
        self.store.remove_for_user(user_id, None).await
    }
}

/// 32 random bytes, hex-encoded: 256 bits of entropy per token.
pub(crate) fn generate_token() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
