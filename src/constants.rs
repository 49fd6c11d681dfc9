pub const USERS_FILE: &str = "users.json";

pub const INVITES_FILE: &str = "invites.json";

pub const AUDIT_LOG_FILE: &str = "audit.log";

pub mod auth {
    /// Bootstrap password of last resort for the built-in administrator.
    /// Only used when neither `DEFAULT_ADMIN_PASSWORD` nor the config value
    /// is set; startup warns loudly when this is what guards the account.
    pub const FALLBACK_ADMIN_PASSWORD: &str = "Admin123!Test";

    pub const DEFAULT_ADMIN_USERNAME: &str = "admin";

    pub const CSRF_HEADER: &str = "x-csrf-token";

    pub const CSRF_COOKIE: &str = "__Host-csrf";
}

pub mod limits {
    pub const USERNAME_MIN_CHARS: usize = 3;

    pub const USERNAME_MAX_CHARS: usize = 32;

    pub const PASSWORD_MIN_CHARS: usize = 12;

    pub const PASSWORD_MAX_CHARS: usize = 128;
}
