//! Append-only audit trail.
//!
//! One JSON object per line in `audit.log`, owner-readable only. Writing is
//! best-effort: a failed append is logged and never fails the request that
//! triggered it. There is no query interface.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tracing::error;

use crate::constants::AUDIT_LOG_FILE;

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(AUDIT_LOG_FILE),
        }
    }

    /// Appends one event line. `details` should be a JSON object; its fields
    /// are merged next to `timestamp` and `event`.
    pub async fn record(&self, event: &str, details: Value) {
        let mut entry = serde_json::Map::new();
        entry.insert("timestamp".to_string(), json!(Utc::now()));
        entry.insert("event".to_string(), json!(event));
        if let Value::Object(fields) = details {
            entry.extend(fields);
        }

        let mut line = Value::Object(entry).to_string();
        line.push('\n');

        if let Err(err) = self.append(line.as_bytes()).await {
            error!("failed to write audit log: {err}");
        }
    }

    async fn append(&self, line: &[u8]) -> std::io::Result<()> {
        let mut options = tokio::fs::OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path).await?;
        file.write_all(line).await?;
        file.flush().await
    }
}
