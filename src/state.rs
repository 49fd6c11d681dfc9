use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::warn;

use crate::api::CsrfGuard;
use crate::config::Config;
use crate::constants::{INVITES_FILE, USERS_FILE};
use crate::services::{AuditLog, MemorySessionStore, PasswordService, SessionManager};
use crate::store::{InviteStore, UserStore};
use crate::tariff::{FileTableProvider, TableProvider};

/// All owned stores and services, built once at startup and injected into
/// the request handlers. There is no module-level state: every component
/// lives here with an explicit constructor.
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub passwords: Arc<PasswordService>,

    pub users: Arc<UserStore>,

    pub invites: Arc<InviteStore>,

    pub sessions: Arc<SessionManager>,

    pub csrf: Arc<CsrfGuard>,

    pub audit: Arc<AuditLog>,

    pub tables: Arc<dyn TableProvider>,
}

impl SharedState {
    /// Builds every store and service. A failure to initialize the default
    /// administrator is fatal: the system must never start unrecoverable.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let data_dir = PathBuf::from(&config.general.data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let passwords = Arc::new(
            PasswordService::new(&config.security).context("failed to set up password hashing")?,
        );

        let users = Arc::new(
            UserStore::open(
                data_dir.join(USERS_FILE),
                passwords.clone(),
                config.security.resolved_max_failed_attempts(),
            )
            .await
            .context("failed to load user store")?,
        );

        let (admin_password, is_fallback) = config.security.resolved_admin_password();
        if is_fallback {
            warn!(
                "no DEFAULT_ADMIN_PASSWORD configured; the built-in fallback guards the '{}' account. Set one before exposing this server",
                crate::constants::auth::DEFAULT_ADMIN_USERNAME
            );
        }
        users
            .ensure_default_admin(&admin_password)
            .await
            .context("default administrator initialization failed")?;

        let invites = Arc::new(
            InviteStore::open(data_dir.join(INVITES_FILE))
                .await
                .context("failed to load invite store")?,
        );

        let sessions = Arc::new(SessionManager::new(
            Arc::new(MemorySessionStore::default()),
            config.security.session_ttl_minutes,
        ));

        if !config.security.csrf_enabled {
            warn!("CSRF protection is DISABLED by configuration; test setups only, never production");
        }
        let csrf = Arc::new(CsrfGuard::new(config.security.csrf_enabled));

        let audit = Arc::new(AuditLog::new(&data_dir));

        let tables: Arc<dyn TableProvider> = Arc::new(
            FileTableProvider::load(&data_dir, &config.tables.order)
                .await
                .context("failed to load tariff tables")?,
        );

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            passwords,
            users,
            invites,
            sessions,
            csrf,
            audit,
            tables,
        })
    }
}
