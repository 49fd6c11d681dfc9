//! Crash-safe JSON persistence primitive shared by all stores.
//!
//! Documents are serialized to a uniquely named temporary file beside the
//! target and atomically renamed over the live file, so a crash mid-write
//! never corrupts the document and readers never observe a partial write.

use std::io;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Writes `value` as pretty-printed JSON to `path` through a temp file plus
/// atomic rename. The file is created with owner-only permissions.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    tokio::fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp_path = dir.join(format!("{}.{}.tmp", file_name, Uuid::new_v4()));

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp_path).await?;
    let result = async {
        file.write_all(&json).await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    tokio::fs::rename(&tmp_path, path).await
}

/// Loads a JSON document. A missing file is `Ok(None)`; an unparseable file
/// is an error the caller must decide about.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        version: u32,
        entries: Vec<String>,
    }

    #[tokio::test]
    async fn test_write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        let doc = Doc {
            version: 1,
            entries: vec!["a".into(), "b".into()],
        };
        write_json_atomic(&path, &doc).await.unwrap();

        let loaded: Option<Doc> = load_json(&path).await.unwrap();
        assert_eq!(loaded, Some(doc));
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        for round in 0..3u32 {
            let doc = Doc {
                version: round,
                entries: vec![],
            };
            write_json_atomic(&path, &doc).await.unwrap();
        }

        let mut names = vec![];
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["doc.json".to_string()]);

        let loaded: Option<Doc> = load_json(&path).await.unwrap();
        assert_eq!(loaded.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Doc> = load_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(loaded.is_none());
    }
}
