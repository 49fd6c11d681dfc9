//! Invitation lifecycle: create, consume, expire, delete.
//!
//! Invites persist as one JSON document (`invites.json`). A code is
//! single-use forever: once `used_at` is set, consumption fails for every
//! later attempt, including after the consuming user has been deleted.
//! Expiry is derived from `expires_at` at read time, never stored as a flag.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

use crate::store::file::{load_json, write_json_atomic};
use crate::store::user::Role;

const SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_EXPIRES_IN_HOURS: u32 = 72;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub code: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub used_by: Option<String>,
}

impl Invite {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

/// Listing shape: the invite plus its `expired` state derived at read time.
#[derive(Debug, Clone, Serialize)]
pub struct InviteDetails {
    #[serde(flatten)]
    pub invite: Invite,
    pub expired: bool,
}

#[derive(Debug, Clone)]
pub struct NewInvite {
    pub role: Role,
    pub created_by: Option<String>,
    /// Hours until expiry; `0` means the invite never expires.
    pub expires_in_hours: u32,
    pub note: String,
}

#[derive(Debug, Error)]
pub enum InviteError {
    #[error("Invite code is invalid")]
    InvalidInvite,
    #[error("Invite code has already been used")]
    InviteUsed,
    #[error("Invite code has expired")]
    InviteExpired,
    #[error("Invite code not found")]
    NotFound,
    #[error("failed to persist invite store: {0}")]
    Persistence(#[from] std::io::Error),
}

#[derive(Serialize)]
struct Snapshot<'a> {
    version: u32,
    invites: Vec<&'a Invite>,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    invites: Vec<serde_json::Value>,
}

pub struct InviteStore {
    path: PathBuf,
    inner: RwLock<HashMap<String, Invite>>,
}

impl InviteStore {
    pub async fn open(path: PathBuf) -> Result<Self, InviteError> {
        let mut invites = HashMap::new();

        if let Some(document) = load_json::<RawDocument>(&path).await? {
            for entry in document.invites {
                match serde_json::from_value::<Invite>(entry) {
                    Ok(invite) if !invite.code.is_empty() => {
                        invites.insert(invite.code.clone(), invite);
                    }
                    Ok(_) => warn!("skipping invite record with empty code"),
                    Err(err) => warn!("skipping malformed invite record: {err}"),
                }
            }
        }

        Ok(Self {
            path,
            inner: RwLock::new(invites),
        })
    }

    /// Creates an invite with a collision-checked high-entropy code.
    pub async fn create_invite(&self, new: NewInvite) -> Result<InviteDetails, InviteError> {
        let mut invites = self.inner.write().await;

        let mut code = generate_code();
        while invites.contains_key(&code) {
            code = generate_code();
        }

        let now = Utc::now();
        let invite = Invite {
            code: code.clone(),
            role: new.role,
            created_at: now,
            created_by: new.created_by,
            note: new.note,
            expires_at: (new.expires_in_hours > 0)
                .then(|| now + Duration::hours(i64::from(new.expires_in_hours))),
            used_at: None,
            used_by: None,
        };
        invites.insert(code.clone(), invite.clone());

        self.persist(&invites).await?;
        Ok(InviteDetails {
            expired: false,
            invite,
        })
    }

    pub async fn get_invite(&self, code: &str) -> Option<Invite> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        self.inner.read().await.get(code).cloned()
    }

    /// Checks that a code could be consumed right now, without consuming it.
    pub async fn peek(&self, code: &str) -> Result<Invite, InviteError> {
        let invites = self.inner.read().await;
        let invite = lookup(&invites, code)?;
        check_consumable(invite, Utc::now())?;
        Ok(invite.clone())
    }

    /// Consumes a code for `username`. Check-and-set under the write lock:
    /// of two concurrent consumers of the same code, exactly one wins.
    pub async fn consume(&self, code: &str, username: &str) -> Result<InviteDetails, InviteError> {
        self.consume_at(code, username, Utc::now()).await
    }

    async fn consume_at(
        &self,
        code: &str,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<InviteDetails, InviteError> {
        let mut invites = self.inner.write().await;

        let invite = {
            let invite = lookup_mut(&mut invites, code)?;
            check_consumable(invite, now)?;
            invite.used_at = Some(now);
            invite.used_by = Some(username.to_string());
            invite.clone()
        };

        self.persist(&invites).await?;
        Ok(InviteDetails {
            expired: invite.is_expired(now),
            invite,
        })
    }

    pub async fn delete_invite(&self, code: &str) -> Result<(), InviteError> {
        let mut invites = self.inner.write().await;
        if invites.remove(code.trim()).is_none() {
            return Err(InviteError::NotFound);
        }
        self.persist(&invites).await?;
        Ok(())
    }

    /// Newest-first listing. With `include_expired` off, used and expired
    /// invites are filtered out.
    pub async fn list_invites(&self, include_expired: bool) -> Vec<InviteDetails> {
        let now = Utc::now();
        let invites = self.inner.read().await;

        let mut list: Vec<InviteDetails> = invites
            .values()
            .filter(|invite| {
                include_expired || (invite.used_at.is_none() && !invite.is_expired(now))
            })
            .map(|invite| InviteDetails {
                expired: invite.is_expired(now),
                invite: invite.clone(),
            })
            .collect();
        list.sort_by(|a, b| b.invite.created_at.cmp(&a.invite.created_at));
        list
    }

    async fn persist(&self, invites: &HashMap<String, Invite>) -> Result<(), InviteError> {
        let mut list: Vec<&Invite> = invites.values().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        write_json_atomic(
            &self.path,
            &Snapshot {
                version: SCHEMA_VERSION,
                invites: list,
            },
        )
        .await?;
        Ok(())
    }
}

fn lookup<'a>(invites: &'a HashMap<String, Invite>, code: &str) -> Result<&'a Invite, InviteError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(InviteError::InvalidInvite);
    }
    invites.get(code).ok_or(InviteError::InvalidInvite)
}

fn lookup_mut<'a>(
    invites: &'a mut HashMap<String, Invite>,
    code: &str,
) -> Result<&'a mut Invite, InviteError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(InviteError::InvalidInvite);
    }
    invites.get_mut(code).ok_or(InviteError::InvalidInvite)
}

fn check_consumable(invite: &Invite, now: DateTime<Utc>) -> Result<(), InviteError> {
    if invite.used_at.is_some() {
        return Err(InviteError::InviteUsed);
    }
    if invite.is_expired(now) {
        return Err(InviteError::InviteExpired);
    }
    Ok(())
}

/// 12 random bytes, hex-encoded: 96 bits of entropy per code.
fn generate_code() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 12] = rng.random();

    bytes.iter().fold(String::with_capacity(24), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
