use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::constants::auth::FALLBACK_ADMIN_PASSWORD;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub security: SecurityConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub tables: TableConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the store documents, the tariff tables, and the
    /// audit log.
    pub data_dir: String,

    pub log_level: String,

    /// Number of tokio worker threads (default: 2).
    /// Set to 0 to use the number of CPU cores.
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            log_level: "info".to_string(),
            worker_threads: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,

    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on the CSRF cookie.
    /// Default: true for production safety. Set to false for local
    /// development without HTTPS.
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 3001,
            cors_allowed_origins: vec![
                "http://localhost:3001".to_string(),
                "http://127.0.0.1:3001".to_string(),
            ],
            secure_cookies: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Argon2 memory cost in KiB (default: 8192 = 8MB).
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations) - higher = more CPU work.
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (default: 1).
    pub argon2_parallelism: u32,

    /// Consecutive failed logins before an account locks. Accepted range
    /// 3-10; anything else falls back to 5.
    pub max_failed_attempts: u32,

    pub session_ttl_minutes: u32,

    /// Disabling the CSRF guard is for test setups only; startup warns
    /// loudly whenever this is off.
    pub csrf_enabled: bool,

    /// Bootstrap password for the built-in administrator. The
    /// `DEFAULT_ADMIN_PASSWORD` environment variable takes precedence.
    pub default_admin_password: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2_memory_cost_kib: 8192,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
            max_failed_attempts: 5,
            session_ttl_minutes: 60,
            csrf_enabled: true,
            default_admin_password: None,
        }
    }
}

impl SecurityConfig {
    /// Resolved bootstrap password for the built-in administrator, and
    /// whether it is the compile-time fallback nobody configured.
    #[must_use]
    pub fn resolved_admin_password(&self) -> (String, bool) {
        if let Ok(password) = std::env::var("DEFAULT_ADMIN_PASSWORD")
            && !password.is_empty()
        {
            return (password, false);
        }
        if let Some(password) = &self.default_admin_password
            && !password.is_empty()
        {
            return (password.clone(), false);
        }
        (FALLBACK_ADMIN_PASSWORD.to_string(), true)
    }

    /// Lockout threshold with the `AUTH_MAX_FAILED_ATTEMPTS` environment
    /// override. Values outside 3-10 fall back to the default.
    #[must_use]
    pub fn resolved_max_failed_attempts(&self) -> u32 {
        if let Ok(raw) = std::env::var("AUTH_MAX_FAILED_ATTEMPTS")
            && let Ok(parsed) = raw.parse::<u32>()
            && (3..=10).contains(&parsed)
        {
            return parsed;
        }
        if (3..=10).contains(&self.max_failed_attempts) {
            self.max_failed_attempts
        } else {
            5
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Preferred ordering for table keys in listings; keys not named here
    /// sort lexicographically after the named ones.
    pub order: Vec<String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            order: vec![
                "mai2024".to_string(),
                "april2025".to_string(),
                "april2026".to_string(),
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            observability: ObservabilityConfig::default(),
            tables: TableConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("tarifrechner").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".tarifrechner").join("config.toml"));
        }

        paths
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = PathBuf::from("config.toml");
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.data_dir.is_empty() {
            anyhow::bail!("data_dir cannot be empty");
        }

        if self.security.session_ttl_minutes == 0 {
            anyhow::bail!("session_ttl_minutes must be > 0");
        }

        Ok(())
    }
}
