use crate::error::VersionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

const PROMPT_PREVIEW_CHARS: usize = 100;

/// Metadata of one saved generation. Never modified after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    #[serde(alias = "timestamp")]
    pub id: String,
    pub tag: String,
    pub prompt: String,
    #[serde(default)]
    pub prompt_type: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewVersion {
    pub code: String,
    pub prompt: String,
    pub prompt_type: Option<String>,
    pub template: Option<String>,
    pub model: Option<String>,
    pub run_id: Option<String>,
}

fn preview(prompt: &str) -> String {
    if prompt.chars().count() > PROMPT_PREVIEW_CHARS {
        let head: String = prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        prompt.to_string()
    }
}

fn valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Writes the code file, then publishes the metadata with a rename. A failed
/// metadata write removes the code file again.
async fn write_pair(
    code_path: &Path,
    meta_path: &Path,
    code: &[u8],
    meta: &[u8],
) -> Result<(), VersionError> {
    tokio::fs::write(code_path, code).await?;

    let tmp = meta_path.with_extension("json.tmp");
    let published = match tokio::fs::write(&tmp, meta).await {
        Ok(()) => tokio::fs::rename(&tmp, meta_path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = published {
        warn!("Failed to write version metadata {}: {}", meta_path.display(), e);
        let _ = tokio::fs::remove_file(&tmp).await;
        let _ = tokio::fs::remove_file(code_path).await;
        return Err(e.into());
    }
    Ok(())
}

/// Generated code snapshots stored as `<id>.json` plus `<id>.html`.
pub struct VersionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl VersionStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, VersionError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn code_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.html", id))
    }

    /// Picks a timestamp id not used yet, bumping it on collision.
    async fn next_id(&self, now: DateTime<Utc>) -> Result<String, VersionError> {
        let mut candidate: u128 = now
            .format("%Y%m%d%H%M%S%6f")
            .to_string()
            .parse()
            .unwrap_or_default();
        loop {
            let id = format!("{:020}", candidate);
            if !tokio::fs::try_exists(self.meta_path(&id)).await? {
                return Ok(id);
            }
            candidate += 1;
        }
    }

    pub async fn save(&self, new: NewVersion) -> Result<Version, VersionError> {
        let _guard = self.write_lock.lock().await;
        let created_at = Utc::now();
        let id = self.next_id(created_at).await?;

        let version = Version {
            tag: format!("v{}", id),
            prompt: preview(&new.prompt),
            prompt_type: new.prompt_type,
            template: new.template,
            model: new.model,
            run_id: new.run_id,
            created_at,
            id,
        };

        let meta = serde_json::to_vec_pretty(&version)?;
        write_pair(
            &self.code_path(&version.id),
            &self.meta_path(&version.id),
            new.code.as_bytes(),
            &meta,
        )
        .await?;
        info!(version = %version.id, "Saved version");
        Ok(version)
    }

    /// All versions, newest first. Unreadable entries are skipped.
    pub async fn list(&self) -> Result<Vec<Version>, VersionError> {
        let mut versions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<Version>(&bytes).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(version) => versions.push(version),
                Err(e) => warn!("Skipping unreadable version {}: {}", path.display(), e),
            }
        }
        versions.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(versions)
    }

    pub async fn get(&self, id: &str) -> Result<(Version, String), VersionError> {
        if !valid_id(id) {
            return Err(VersionError::NotFound(id.to_string()));
        }
        let meta = match tokio::fs::read(self.meta_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VersionError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let code = match tokio::fs::read_to_string(self.code_path(id)).await {
            Ok(code) => code,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VersionError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok((serde_json::from_slice(&meta)?, code))
    }

    /// Reads a version back for editing. Other versions are left as they are.
    pub async fn restore(&self, id: &str) -> Result<(Version, String), VersionError> {
        let restored = self.get(id).await?;
        info!(version = %id, "Restored version");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_version(prompt: &str, code: &str) -> NewVersion {
        NewVersion {
            code: code.to_string(),
            prompt: prompt.to_string(),
            prompt_type: Some("web_app".into()),
            template: None,
            model: Some("llama3-70b-8192".into()),
            run_id: Some("run-1".into()),
        }
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let dir = tempdir().unwrap();
        let store = VersionStore::open(dir.path()).await.unwrap();
        let saved = store.save(new_version("hello", "<p>hi</p>")).await.unwrap();

        assert_eq!(saved.id.len(), 20);
        assert_eq!(saved.tag, format!("v{}", saved.id));

        let (version, code) = store.get(&saved.id).await.unwrap();
        assert_eq!(version, saved);
        assert_eq!(code, "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_prompt_is_truncated() {
        let dir = tempdir().unwrap();
        let store = VersionStore::open(dir.path()).await.unwrap();
        let long = "x".repeat(150);
        let saved = store.save(new_version(&long, "")).await.unwrap();
        assert_eq!(saved.prompt, format!("{}...", "x".repeat(100)));

        let short = store.save(new_version("short", "")).await.unwrap();
        assert_eq!(short.prompt, "short");
    }

    #[tokio::test]
    async fn test_list_newest_first_and_restore_keeps_all() {
        let dir = tempdir().unwrap();
        let store = VersionStore::open(dir.path()).await.unwrap();
        let first = store.save(new_version("one", "1")).await.unwrap();
        let second = store.save(new_version("two", "2")).await.unwrap();
        let third = store.save(new_version("three", "3")).await.unwrap();

        let ids = |versions: Vec<Version>| versions.into_iter().map(|v| v.id).collect::<Vec<_>>();
        let before = ids(store.list().await.unwrap());
        assert_eq!(before, vec![third.id.clone(), second.id.clone(), first.id.clone()]);

        let (restored, code) = store.restore(&first.id).await.unwrap();
        assert_eq!(restored.prompt, "one");
        assert_eq!(code, "1");
        assert_eq!(ids(store.list().await.unwrap()), before);
    }

    #[tokio::test]
    async fn test_unknown_and_unsafe_ids() {
        let dir = tempdir().unwrap();
        let store = VersionStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.get("20240101000000000000").await,
            Err(VersionError::NotFound(_))
        ));
        assert!(matches!(
            store.get("../secrets").await,
            Err(VersionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_metadata_write_leaves_no_code_file() {
        let dir = tempdir().unwrap();
        let code = dir.path().join("1.html");
        let meta = dir.path().join("missing").join("1.json");

        assert!(write_pair(&code, &meta, b"<html/>", b"{}").await.is_err());
        assert!(!code.exists());

        let store = VersionStore::open(dir.path()).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_files() {
        let dir = tempdir().unwrap();
        let store = VersionStore::open(dir.path()).await.unwrap();
        store.save(new_version("ok", "")).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{not json")
            .await
            .unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
