//! Versioned tariff tables.
//!
//! The calculation core only ever sees the [`TableProvider`] seam; the
//! file-backed implementation loads every `*.json` in the data directory
//! (except the store documents) once at startup. A table file is either a
//! bare table object or an envelope `{ "table": ..., "atMin": ... }`.

pub mod calc;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::constants::{INVITES_FILE, USERS_FILE};

/// Pay group -> (stufe or `"salary"`) -> monthly euro amount at 35 hours.
pub type TariffTable = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Clone, Serialize)]
pub struct TableEntry {
    pub table: TariffTable,
    #[serde(rename = "atMin")]
    pub at_min: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMeta {
    pub modified: Option<DateTime<Utc>>,
    pub bytes: u64,
}

pub trait TableProvider: Send + Sync {
    /// Exact lookup with fallback to the `current` table for unknown keys.
    fn entry(&self, key: &str) -> Option<&TableEntry>;

    fn table(&self, key: &str) -> Option<&TariffTable> {
        self.entry(key).map(|e| &e.table)
    }

    /// Keys in listing order: the configured tariff order first, everything
    /// else lexicographically after it.
    fn keys(&self) -> Vec<String>;

    fn meta(&self) -> &BTreeMap<String, TableMeta>;
}

pub struct FileTableProvider {
    entries: BTreeMap<String, TableEntry>,
    meta: BTreeMap<String, TableMeta>,
    order: Vec<String>,
}

impl FileTableProvider {
    pub async fn load(data_dir: &Path, order: &[String]) -> anyhow::Result<Self> {
        let mut entries = BTreeMap::new();
        let mut meta = BTreeMap::new();

        tokio::fs::create_dir_all(data_dir).await?;
        let mut dir = tokio::fs::read_dir(data_dir).await?;

        while let Some(file) = dir.next_entry().await? {
            let name = file.file_name().to_string_lossy().to_string();
            if !name.ends_with(".json") || name == USERS_FILE || name == INVITES_FILE {
                continue;
            }
            let key = name.trim_end_matches(".json").to_string();

            match parse_table_file(&file.path()).await {
                Ok(entry) => {
                    let file_meta = file.metadata().await.ok();
                    meta.insert(
                        key.clone(),
                        TableMeta {
                            modified: file_meta
                                .as_ref()
                                .and_then(|m| m.modified().ok())
                                .map(DateTime::<Utc>::from),
                            bytes: file_meta.map_or(0, |m| m.len()),
                        },
                    );
                    entries.insert(key, entry);
                }
                Err(err) => error!("failed to load table file {name}: {err}"),
            }
        }

        if entries.is_empty() {
            warn!("no tariff tables found in {}", data_dir.display());
        } else {
            info!(
                "tables loaded: {}",
                entries.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        Ok(Self {
            entries,
            meta,
            order: order.to_vec(),
        })
    }

    /// Builds a provider from in-memory entries. Mainly for tests of the
    /// calculation core.
    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, TableEntry>, order: Vec<String>) -> Self {
        Self {
            entries,
            meta: BTreeMap::new(),
            order,
        }
    }
}

impl TableProvider for FileTableProvider {
    fn entry(&self, key: &str) -> Option<&TableEntry> {
        self.entries
            .get(key)
            .or_else(|| self.entries.get("current"))
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort_by(|a, b| {
            let ia = self.order.iter().position(|k| k == a);
            let ib = self.order.iter().position(|k| k == b);
            match (ia, ib) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => a.cmp(b),
            }
        });
        keys
    }

    fn meta(&self) -> &BTreeMap<String, TableMeta> {
        &self.meta
    }
}

async fn parse_table_file(path: &Path) -> anyhow::Result<TableEntry> {
    let raw = tokio::fs::read(path).await?;
    let value: serde_json::Value = serde_json::from_slice(&raw)?;

    let serde_json::Value::Object(mut object) = value else {
        anyhow::bail!("table document must be a JSON object");
    };

    let (table_value, at_min) = if object.get("table").is_some_and(serde_json::Value::is_object) {
        let table = object.remove("table").unwrap_or_default();
        let at_min = match object.remove("atMin") {
            Some(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        (table, at_min)
    } else {
        (serde_json::Value::Object(object), serde_json::Map::new())
    };

    let table: TariffTable = serde_json::from_value(table_value)?;
    Ok(TableEntry { table, at_min })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_load_skips_store_documents_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("april2025.json"),
            r#"{"EG05": {"A": 3000.0, "B": 3100.0}}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("users.json"), r#"{"version":1,"users":[]}"#)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("broken.json"), "not json")
            .await
            .unwrap();

        let provider = FileTableProvider::load(dir.path(), &[]).await.unwrap();
        assert_eq!(provider.keys(), vec!["april2025".to_string()]);
        assert!(provider.table("april2025").is_some());
        assert!(provider.meta().contains_key("april2025"));
    }

    #[tokio::test]
    async fn test_envelope_and_bare_formats() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("bare.json"),
            r#"{"EG01": {"salary": 2500.0}}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("wrapped.json"),
            r#"{"table": {"EG01": {"salary": 2600.0}}, "atMin": {"EG11": 5000.0}}"#,
        )
        .await
        .unwrap();

        let provider = FileTableProvider::load(dir.path(), &[]).await.unwrap();
        let bare = provider.entry("bare").unwrap();
        assert!(bare.at_min.is_empty());
        let wrapped = provider.entry("wrapped").unwrap();
        assert_eq!(wrapped.table["EG01"]["salary"], 2600.0);
        assert_eq!(wrapped.at_min["EG11"], 5000.0);
    }

    #[test]
    fn test_key_order_prefers_tariff_order() {
        let order = vec![
            "mai2024".to_string(),
            "april2025".to_string(),
            "april2026".to_string(),
        ];
        let mut entries = BTreeMap::new();
        for key in ["april2026", "aaa", "mai2024", "zzz", "april2025"] {
            entries.insert(
                key.to_string(),
                TableEntry {
                    table: BTreeMap::from([("EG01".to_string(), group(&[("salary", 1.0)]))]),
                    at_min: serde_json::Map::new(),
                },
            );
        }
        let provider = FileTableProvider::from_entries(entries, order);
        assert_eq!(
            provider.keys(),
            vec!["mai2024", "april2025", "april2026", "aaa", "zzz"]
        );
    }

    #[test]
    fn test_current_fallback() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "current".to_string(),
            TableEntry {
                table: BTreeMap::from([("EG01".to_string(), group(&[("salary", 1.0)]))]),
                at_min: serde_json::Map::new(),
            },
        );
        let provider = FileTableProvider::from_entries(entries, vec![]);
        assert!(provider.entry("does-not-exist").is_some());
    }
}
