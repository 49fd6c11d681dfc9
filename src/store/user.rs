//! User records, credential verification, and lockout tracking.
//!
//! Users persist as one JSON document (`users.json`) with a schema-version
//! envelope. Every mutation runs under the store's write lock and flushes
//! through the atomic writer before the lock is released, so concurrent
//! requests are applied one at a time and the on-disk document always holds a
//! complete state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::constants::auth::DEFAULT_ADMIN_USERNAME;
use crate::constants::limits::{USERNAME_MAX_CHARS, USERNAME_MIN_CHARS};
use crate::services::password::{PasswordError, PasswordService, validate_strength};
use crate::store::file::{load_json, write_json_atomic};

const SCHEMA_VERSION: u32 = 1;
const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub role: Role,
    pub password_hash: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub password_changed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub must_change_password: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_login_attempts: u32,
}

/// User shape handed out of the store: everything except the hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub must_change_password: bool,
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub failed_login_attempts: u32,
}

impl From<&UserRecord> for PublicUser {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            created_at: user.created_at,
            updated_at: user.updated_at,
            last_login_at: user.last_login_at,
            password_changed_at: user.password_changed_at,
            must_change_password: user.must_change_password,
            locked: user.locked,
            locked_at: user.locked_at,
            failed_login_attempts: user.failed_login_attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub created_by: Option<String>,
    pub must_change_password: bool,
    pub locked: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub role: Option<Role>,
    pub locked: Option<bool>,
    pub must_change_password: Option<bool>,
}

/// Outcome of a credential check. `Locked` is reported separately so the
/// lockout rules stay testable; the HTTP layer collapses it into the same
/// 401 as `Invalid`.
#[derive(Debug)]
pub enum CredentialCheck {
    Ok(PublicUser),
    Invalid,
    Locked,
}

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("Username is already taken")]
    UsernameTaken,
    #[error("Password is too weak")]
    WeakPassword(Vec<String>),
    #[error("{0}")]
    InvalidUsername(String),
    #[error("User not found")]
    NotFound,
    #[error("password hashing failed: {0}")]
    Password(#[from] PasswordError),
    #[error("failed to persist user store: {0}")]
    Persistence(#[from] std::io::Error),
}

#[derive(Serialize)]
struct Snapshot<'a> {
    version: u32,
    users: Vec<&'a UserRecord>,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    users: Vec<serde_json::Value>,
}

#[derive(Default)]
struct Inner {
    /// id -> record
    users: HashMap<String, UserRecord>,
    /// normalized username -> id
    by_name: HashMap<String, String>,
}

impl Inner {
    fn index(&mut self, user: UserRecord) {
        self.by_name.insert(user.username.clone(), user.id.clone());
        self.users.insert(user.id.clone(), user);
    }
}

pub struct UserStore {
    path: PathBuf,
    passwords: Arc<PasswordService>,
    max_failed_attempts: u32,
    inner: RwLock<Inner>,
}

impl UserStore {
    /// Opens the store, loading and indexing the persisted document.
    /// Individual malformed records are skipped with a warning; only an
    /// unreadable document is fatal.
    pub async fn open(
        path: PathBuf,
        passwords: Arc<PasswordService>,
        max_failed_attempts: u32,
    ) -> Result<Self, UserStoreError> {
        let mut inner = Inner::default();

        if let Some(document) = load_json::<RawDocument>(&path).await? {
            for entry in document.users {
                match serde_json::from_value::<UserRecord>(entry) {
                    Ok(mut user) => {
                        if user.id.is_empty() || user.password_hash.is_empty() {
                            warn!("skipping user record with missing id or password hash");
                            continue;
                        }
                        match normalize_username(&user.username) {
                            Ok(normalized) => user.username = normalized,
                            Err(err) => {
                                warn!(username = %user.username, "skipping user record: {err}");
                                continue;
                            }
                        }
                        inner.index(user);
                    }
                    Err(err) => warn!("skipping malformed user record: {err}"),
                }
            }
        }

        let max_failed_attempts = if (3..=10).contains(&max_failed_attempts) {
            max_failed_attempts
        } else {
            DEFAULT_MAX_FAILED_ATTEMPTS
        };

        Ok(Self {
            path,
            passwords,
            max_failed_attempts,
            inner: RwLock::new(inner),
        })
    }

    /// Guarantees a working administrator account.
    ///
    /// With no admin-role user present one is synthesized from the configured
    /// default password. An existing `admin` account is rebuilt when its
    /// stored hash is structurally invalid, or when it is still flagged
    /// `must_change_password` but no longer verifies against the default
    /// password. This recovers from manual file corruption without ever
    /// resetting an admin who has chosen their own password.
    ///
    /// Returns `true` when an account was created or rebuilt.
    pub async fn ensure_default_admin(
        &self,
        default_password: &str,
    ) -> Result<bool, UserStoreError> {
        let (has_admin, builtin) = {
            let inner = self.inner.read().await;
            let has_admin = inner.users.values().any(|u| u.role == Role::Admin);
            let builtin = inner
                .by_name
                .get(DEFAULT_ADMIN_USERNAME)
                .and_then(|id| inner.users.get(id))
                .map(|u| (u.password_hash.clone(), u.must_change_password));
            (has_admin, builtin)
        };

        let rebuild_reason = if !has_admin {
            Some("no administrator account present")
        } else if let Some((hash, must_change)) = &builtin {
            if !PasswordService::is_valid_hash(hash) {
                Some("stored credential is structurally invalid")
            } else if *must_change && !self.passwords.verify(default_password, hash).await {
                Some("default credential no longer verifies")
            } else {
                None
            }
        } else {
            None
        };

        let Some(reason) = rebuild_reason else {
            return Ok(false);
        };

        let password_hash = self.passwords.hash(default_password).await?;
        let now = Utc::now();

        let mut inner = self.inner.write().await;
        if let Some(id) = inner.by_name.get(DEFAULT_ADMIN_USERNAME).cloned() {
            if let Some(user) = inner.users.get_mut(&id) {
                user.role = Role::Admin;
                user.password_hash = password_hash;
                user.must_change_password = true;
                user.locked = false;
                user.locked_at = None;
                user.failed_login_attempts = 0;
                user.updated_at = now;
            }
        } else {
            inner.index(UserRecord {
                id: Uuid::new_v4().to_string(),
                username: DEFAULT_ADMIN_USERNAME.to_string(),
                role: Role::Admin,
                password_hash,
                created_at: now,
                updated_at: now,
                created_by: None,
                updated_by: None,
                last_login_at: None,
                password_changed_at: None,
                must_change_password: true,
                locked: false,
                locked_at: None,
                failed_login_attempts: 0,
            });
        }
        self.persist(&inner).await?;

        warn!("default administrator '{DEFAULT_ADMIN_USERNAME}' initialized ({reason}); change the password immediately");
        Ok(true)
    }

    pub async fn create_user(&self, new: NewUser) -> Result<PublicUser, UserStoreError> {
        let username = normalize_username(&new.username)?;
        validate_strength(&new.password).map_err(UserStoreError::WeakPassword)?;

        let mut inner = self.inner.write().await;
        if inner.by_name.contains_key(&username) {
            return Err(UserStoreError::UsernameTaken);
        }

        let password_hash = self.passwords.hash(&new.password).await?;
        let now = Utc::now();
        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            username,
            role: new.role,
            password_hash,
            created_at: now,
            updated_at: now,
            created_by: new.created_by.clone(),
            updated_by: new.created_by,
            last_login_at: None,
            password_changed_at: None,
            must_change_password: new.must_change_password,
            locked: new.locked,
            locked_at: new.locked.then_some(now),
            failed_login_attempts: 0,
        };

        let public = PublicUser::from(&user);
        inner.index(user);
        self.persist(&inner).await?;
        Ok(public)
    }

    /// Checks a username/password pair and updates lockout state.
    ///
    /// An unknown (or unparseable) username still burns one dummy hash
    /// comparison before reporting `Invalid`. A locked account is reported
    /// without touching the hash or the counters.
    pub async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<CredentialCheck, UserStoreError> {
        let mut inner = self.inner.write().await;

        let user_id = normalize_username(username)
            .ok()
            .and_then(|n| inner.by_name.get(&n).cloned());
        let Some(user_id) = user_id else {
            drop(inner);
            self.passwords.verify_dummy(password).await;
            return Ok(CredentialCheck::Invalid);
        };

        let (hash, locked) = match inner.users.get(&user_id) {
            Some(user) => (user.password_hash.clone(), user.locked),
            None => return Ok(CredentialCheck::Invalid),
        };
        if locked {
            return Ok(CredentialCheck::Locked);
        }

        let matches = self.passwords.verify(password, &hash).await;
        let now = Utc::now();

        let check = {
            let Some(user) = inner.users.get_mut(&user_id) else {
                return Ok(CredentialCheck::Invalid);
            };
            if matches {
                user.failed_login_attempts = 0;
                user.locked = false;
                user.locked_at = None;
                user.last_login_at = Some(now);
                user.updated_at = now;
                CredentialCheck::Ok(PublicUser::from(&*user))
            } else {
                user.failed_login_attempts += 1;
                user.updated_at = now;
                if user.failed_login_attempts >= self.max_failed_attempts {
                    user.locked = true;
                    user.locked_at = Some(now);
                    warn!(
                        username = %user.username,
                        attempts = user.failed_login_attempts,
                        "account locked after repeated failed logins"
                    );
                    CredentialCheck::Locked
                } else {
                    CredentialCheck::Invalid
                }
            }
        };

        self.persist(&inner).await?;
        Ok(check)
    }

    /// Compares a password against a specific user's stored hash without
    /// touching lockout counters. Used for re-authentication flows.
    pub async fn verify_password(
        &self,
        user_id: &str,
        password: &str,
    ) -> Result<bool, UserStoreError> {
        let hash = {
            let inner = self.inner.read().await;
            inner
                .users
                .get(user_id)
                .map(|u| u.password_hash.clone())
                .ok_or(UserStoreError::NotFound)?
        };
        Ok(self.passwords.verify(password, &hash).await)
    }

    /// Rehashes the user's password. A successful reset also clears the
    /// lockout state: a password reset is an implicit unlock.
    pub async fn set_password(
        &self,
        user_id: &str,
        password: &str,
        must_change_password: bool,
        updated_by: Option<String>,
    ) -> Result<PublicUser, UserStoreError> {
        validate_strength(password).map_err(UserStoreError::WeakPassword)?;

        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(user_id) {
            return Err(UserStoreError::NotFound);
        }

        let password_hash = self.passwords.hash(password).await?;
        let now = Utc::now();
        let public = {
            let Some(user) = inner.users.get_mut(user_id) else {
                return Err(UserStoreError::NotFound);
            };
            user.password_hash = password_hash;
            user.password_changed_at = Some(now);
            user.updated_at = now;
            user.updated_by = updated_by;
            user.must_change_password = must_change_password;
            user.failed_login_attempts = 0;
            user.locked = false;
            user.locked_at = None;
            PublicUser::from(&*user)
        };

        self.persist(&inner).await?;
        Ok(public)
    }

    /// Applies a partial patch. A patch that changes nothing does not bump
    /// `updated_at` and is not persisted.
    pub async fn update_user(
        &self,
        user_id: &str,
        patch: UserPatch,
        updated_by: Option<String>,
    ) -> Result<PublicUser, UserStoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let (public, changed) = {
            let Some(user) = inner.users.get_mut(user_id) else {
                return Err(UserStoreError::NotFound);
            };

            let mut changed = false;

            if let Some(role) = patch.role
                && user.role != role
            {
                user.role = role;
                changed = true;
            }

            if let Some(must_change) = patch.must_change_password
                && user.must_change_password != must_change
            {
                user.must_change_password = must_change;
                changed = true;
            }

            match patch.locked {
                Some(true) if !user.locked => {
                    user.locked = true;
                    user.locked_at = Some(now);
                    changed = true;
                }
                Some(false) if user.locked => {
                    user.locked = false;
                    user.locked_at = None;
                    user.failed_login_attempts = 0;
                    changed = true;
                }
                _ => {}
            }

            if changed {
                user.updated_at = now;
                user.updated_by = updated_by;
            }

            (PublicUser::from(&*user), changed)
        };

        if changed {
            self.persist(&inner).await?;
        }
        Ok(public)
    }

    pub async fn remove_user(&self, user_id: &str) -> Result<PublicUser, UserStoreError> {
        let mut inner = self.inner.write().await;
        let Some(user) = inner.users.remove(user_id) else {
            return Err(UserStoreError::NotFound);
        };
        inner.by_name.remove(&user.username);

        let public = PublicUser::from(&user);
        self.persist(&inner).await?;
        Ok(public)
    }

    pub async fn get_by_id(&self, user_id: &str) -> Option<PublicUser> {
        let inner = self.inner.read().await;
        inner.users.get(user_id).map(PublicUser::from)
    }

    pub async fn get_by_username(&self, username: &str) -> Option<PublicUser> {
        let normalized = normalize_username(username).ok()?;
        let inner = self.inner.read().await;
        inner
            .by_name
            .get(&normalized)
            .and_then(|id| inner.users.get(id))
            .map(PublicUser::from)
    }

    pub async fn list_users(&self) -> Vec<PublicUser> {
        let inner = self.inner.read().await;
        let mut users: Vec<PublicUser> = inner.users.values().map(PublicUser::from).collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    pub async fn count_admins(&self) -> usize {
        let inner = self.inner.read().await;
        inner
            .users
            .values()
            .filter(|u| u.role == Role::Admin)
            .count()
    }

    async fn persist(&self, inner: &Inner) -> Result<(), UserStoreError> {
        let mut users: Vec<&UserRecord> = inner.users.values().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        write_json_atomic(
            &self.path,
            &Snapshot {
                version: SCHEMA_VERSION,
                users,
            },
        )
        .await?;
        Ok(())
    }
}

/// Trims, lowercases, and checks the username against the allowed length and
/// character set. Rejects rather than repairs.
pub fn normalize_username(username: &str) -> Result<String, UserStoreError> {
    let trimmed = username.trim().to_lowercase();
    let chars = trimmed.chars().count();
    if !(USERNAME_MIN_CHARS..=USERNAME_MAX_CHARS).contains(&chars) {
        return Err(UserStoreError::InvalidUsername(format!(
            "Username must be between {USERNAME_MIN_CHARS} and {USERNAME_MAX_CHARS} characters"
        )));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    {
        return Err(UserStoreError::InvalidUsername(
            "Username may only contain a-z, 0-9, dot, underscore, and hyphen".to_string(),
        ));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;

    const GOOD_PASSWORD: &str = "Tr4gfest-Anker9";

    fn password_service() -> Arc<PasswordService> {
        let config = SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
            ..SecurityConfig::default()
        };
        Arc::new(PasswordService::new(&config).unwrap())
    }

    async fn open_store(dir: &std::path::Path) -> UserStore {
        UserStore::open(dir.join("users.json"), password_service(), 5)
            .await
            .unwrap()
    }

    fn new_user(username: &str, role: Role) -> NewUser {
        NewUser {
            username: username.to_string(),
            password: GOOD_PASSWORD.to_string(),
            role,
            created_by: None,
            must_change_password: false,
            locked: false,
        }
    }

    #[tokio::test]
    async fn test_username_collision_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store.create_user(new_user("Alice", Role::User)).await.unwrap();
        let err = store
            .create_user(new_user("alice", Role::User))
            .await
            .unwrap_err();
        assert!(matches!(err, UserStoreError::UsernameTaken));
    }

    #[tokio::test]
    async fn test_weak_password_reports_all_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let mut user = new_user("alice", Role::User);
        user.password = "short".to_string();
        let err = store.create_user(user).await.unwrap_err();
        let UserStoreError::WeakPassword(errors) = err else {
            panic!("expected WeakPassword");
        };
        assert!(errors.len() >= 3);
    }

    #[tokio::test]
    async fn test_lockout_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store.create_user(new_user("alice", Role::User)).await.unwrap();

        for _ in 0..4 {
            let check = store.verify_credentials("alice", "Wrong-Pass1!").await.unwrap();
            assert!(matches!(check, CredentialCheck::Invalid));
        }

        // The fifth failure trips the lock and already reports it.
        let check = store.verify_credentials("alice", "Wrong-Pass1!").await.unwrap();
        assert!(matches!(check, CredentialCheck::Locked));
        let user = store.get_by_username("alice").await.unwrap();
        assert!(user.locked);
        assert_eq!(user.failed_login_attempts, 5);

        // Locked short-circuits: no counter movement, even with the right
        // password.
        let check = store.verify_credentials("alice", GOOD_PASSWORD).await.unwrap();
        assert!(matches!(check, CredentialCheck::Locked));
        let user = store.get_by_username("alice").await.unwrap();
        assert_eq!(user.failed_login_attempts, 5);
    }

    #[tokio::test]
    async fn test_successful_login_resets_counter() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store.create_user(new_user("alice", Role::User)).await.unwrap();

        store.verify_credentials("alice", "Wrong-Pass1!").await.unwrap();
        let check = store.verify_credentials("alice", GOOD_PASSWORD).await.unwrap();
        let CredentialCheck::Ok(user) = check else {
            panic!("expected successful login");
        };
        assert_eq!(user.failed_login_attempts, 0);
        assert!(user.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_username_is_invalid_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let check = store.verify_credentials("ghost", "whatever").await.unwrap();
        assert!(matches!(check, CredentialCheck::Invalid));

        // Unparseable usernames go down the same path.
        let check = store.verify_credentials("!!", "whatever").await.unwrap();
        assert!(matches!(check, CredentialCheck::Invalid));
    }

    #[tokio::test]
    async fn test_set_password_unlocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let created = store.create_user(new_user("alice", Role::User)).await.unwrap();

        for _ in 0..5 {
            store.verify_credentials("alice", "Wrong-Pass1!").await.unwrap();
        }
        assert!(store.get_by_username("alice").await.unwrap().locked);

        let updated = store
            .set_password(&created.id, "Neu-Vergeben44!", false, None)
            .await
            .unwrap();
        assert!(!updated.locked);
        assert_eq!(updated.failed_login_attempts, 0);
        assert!(updated.password_changed_at.is_some());

        let check = store.verify_credentials("alice", "Neu-Vergeben44!").await.unwrap();
        assert!(matches!(check, CredentialCheck::Ok(_)));
    }

    #[tokio::test]
    async fn test_noop_patch_does_not_bump_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let created = store.create_user(new_user("alice", Role::User)).await.unwrap();

        let patch = UserPatch {
            role: Some(Role::User),
            locked: Some(false),
            must_change_password: Some(false),
        };
        let updated = store
            .update_user(&created.id, patch, Some("root".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.updated_at, created.updated_at);
    }

    #[tokio::test]
    async fn test_unlock_patch_resets_counter() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let created = store.create_user(new_user("alice", Role::User)).await.unwrap();

        for _ in 0..5 {
            store.verify_credentials("alice", "Wrong-Pass1!").await.unwrap();
        }

        let patch = UserPatch {
            locked: Some(false),
            ..UserPatch::default()
        };
        let updated = store.update_user(&created.id, patch, None).await.unwrap();
        assert!(!updated.locked);
        assert_eq!(updated.failed_login_attempts, 0);
        assert!(updated.locked_at.is_none());
    }

    #[tokio::test]
    async fn test_default_admin_created_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        assert!(store.ensure_default_admin("Admin123!Test").await.unwrap());
        let check = store.verify_credentials("admin", "Admin123!Test").await.unwrap();
        let CredentialCheck::Ok(admin) = check else {
            panic!("expected default admin login to succeed");
        };
        assert_eq!(admin.role, Role::Admin);
        assert!(admin.must_change_password);

        // A second pass is a no-op.
        assert!(!store.ensure_default_admin("Admin123!Test").await.unwrap());
    }

    #[tokio::test]
    async fn test_default_admin_rebuilt_on_invalid_hash() {
        let dir = tempfile::tempdir().unwrap();
        let document = serde_json::json!({
            "version": 1,
            "users": [{
                "id": "admin-id",
                "username": "admin",
                "role": "admin",
                "passwordHash": "deadbeef",
                "createdAt": "2025-01-01T00:00:00Z",
                "updatedAt": "2025-01-01T00:00:00Z",
                "mustChangePassword": true
            }]
        });
        tokio::fs::write(
            dir.path().join("users.json"),
            serde_json::to_vec_pretty(&document).unwrap(),
        )
        .await
        .unwrap();

        let store = open_store(dir.path()).await;
        assert!(store.ensure_default_admin("Admin123!Test").await.unwrap());

        let check = store.verify_credentials("admin", "Admin123!Test").await.unwrap();
        let CredentialCheck::Ok(admin) = check else {
            panic!("expected repaired admin login to succeed");
        };
        assert!(admin.must_change_password);
    }

    #[tokio::test]
    async fn test_default_admin_rebuilt_when_pending_password_diverges() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        // Valid hash of some other password, but still flagged as pending.
        let mut admin = new_user("admin", Role::Admin);
        admin.password = "Somebody-Else5!".to_string();
        admin.must_change_password = true;
        store.create_user(admin).await.unwrap();

        assert!(store.ensure_default_admin("Admin123!Test").await.unwrap());
        let check = store.verify_credentials("admin", "Admin123!Test").await.unwrap();
        assert!(matches!(check, CredentialCheck::Ok(_)));
    }

    #[tokio::test]
    async fn test_default_admin_with_own_password_is_never_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let mut admin = new_user("admin", Role::Admin);
        admin.password = "My-Own-Choice8!".to_string();
        admin.must_change_password = false;
        store.create_user(admin).await.unwrap();

        assert!(!store.ensure_default_admin("Admin123!Test").await.unwrap());
        let check = store.verify_credentials("admin", "My-Own-Choice8!").await.unwrap();
        assert!(matches!(check, CredentialCheck::Ok(_)));
        let check = store.verify_credentials("admin", "Admin123!Test").await.unwrap();
        assert!(matches!(check, CredentialCheck::Invalid));
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let document = serde_json::json!({
            "version": 1,
            "users": [
                {"id": "", "username": "noid", "passwordHash": "x"},
                {"garbage": true},
                {
                    "id": "ok-id",
                    "username": "alice",
                    "role": "user",
                    "passwordHash": "$argon2id$fake",
                    "createdAt": "2025-01-01T00:00:00Z",
                    "updatedAt": "2025-01-01T00:00:00Z"
                }
            ]
        });
        tokio::fs::write(
            dir.path().join("users.json"),
            serde_json::to_vec_pretty(&document).unwrap(),
        )
        .await
        .unwrap();

        let store = open_store(dir.path()).await;
        let users = store.list_users().await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");
    }

    #[tokio::test]
    async fn test_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(dir.path()).await;
            store.create_user(new_user("alice", Role::User)).await.unwrap();
            store.create_user(new_user("bob", Role::Admin)).await.unwrap();
        }

        let store = open_store(dir.path()).await;
        let users = store.list_users().await;
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].username, "alice");
        assert_eq!(users[1].username, "bob");
        assert_eq!(store.count_admins().await, 1);
    }
}
