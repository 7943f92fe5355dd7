pub mod embedding;

use crate::error::MemoryError;
use crate::events::Turn;
use async_trait::async_trait;
use embedding::{EmbeddingProvider, cosine_similarity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub use embedding::{HashingEmbedding, OpenAIEmbedding};

/// Per-session conversation history with similarity recall.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Chronological history. Unknown keys yield an empty history.
    async fn load(&self, key: &str) -> Result<Vec<Turn>, MemoryError>;

    /// Appends to the end of the history. Duplicates are kept.
    async fn append(&self, key: &str, turn: Turn) -> Result<(), MemoryError> {
        self.append_many(key, vec![turn]).await
    }

    /// Appends all `turns` or none of them.
    async fn append_many(&self, key: &str, turns: Vec<Turn>) -> Result<(), MemoryError>;

    /// Up to `k` turns most similar to `query`, best first. Ties keep the
    /// earlier-recorded turn first.
    async fn recall(&self, key: &str, query: &str, k: usize) -> Result<Vec<Turn>, MemoryError>;

    /// Drops the whole history. Returns false when there was nothing stored.
    async fn clear(&self, key: &str) -> Result<bool, MemoryError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTurn {
    #[serde(flatten)]
    turn: Turn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    embedding: Option<Vec<f32>>,
}

/// Memory kept in a process-local cache and mirrored to one JSON file per
/// session under `dir`. Without a directory it is purely in-memory.
pub struct FileMemoryStore {
    dir: Option<PathBuf>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    sessions: RwLock<HashMap<String, Vec<StoredTurn>>>,
}

impl FileMemoryStore {
    pub async fn open(
        dir: impl AsRef<Path>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self, MemoryError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir: Some(dir),
            embedder,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn in_memory(embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            dir: None,
            embedder,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn session_path(&self, key: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", encode_key(key))))
    }

    async fn read_file(&self, key: &str) -> Result<Vec<StoredTurn>, MemoryError> {
        let Some(path) = self.session_path(key) else {
            return Ok(Vec::new());
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, key: &str, turns: &[StoredTurn]) -> Result<(), MemoryError> {
        let Some(path) = self.session_path(key) else {
            return Ok(());
        };
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(turns)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn stored(&self, key: &str) -> Result<Vec<StoredTurn>, MemoryError> {
        if let Some(turns) = self.sessions.read().await.get(key) {
            return Ok(turns.clone());
        }

        let loaded = self.read_file(key).await?;
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(key.to_string()).or_insert(loaded);
        Ok(entry.clone())
    }
}

/// Maps a session key onto a safe file stem by percent-encoding every byte
/// outside `[A-Za-z0-9_-]`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn load(&self, key: &str) -> Result<Vec<Turn>, MemoryError> {
        Ok(self.stored(key).await?.into_iter().map(|s| s.turn).collect())
    }

    async fn append_many(&self, key: &str, turns: Vec<Turn>) -> Result<(), MemoryError> {
        let mut added = Vec::with_capacity(turns.len());
        for turn in turns {
            let embedding = match &self.embedder {
                Some(embedder) => Some(embedder.embed(&turn.text).await?),
                None => None,
            };
            added.push(StoredTurn { turn, embedding });
        }

        let loaded = if self.sessions.read().await.contains_key(key) {
            None
        } else {
            Some(self.read_file(key).await?)
        };

        // The cache is replaced only after the file write succeeds.
        let mut sessions = self.sessions.write().await;
        let mut next = match sessions.get(key) {
            Some(existing) => existing.clone(),
            None => loaded.unwrap_or_default(),
        };
        next.extend(added);
        self.write_file(key, &next).await?;
        debug!(session = %key, turns = next.len(), "Appended memory turns");
        sessions.insert(key.to_string(), next);
        Ok(())
    }

    async fn recall(&self, key: &str, query: &str, k: usize) -> Result<Vec<Turn>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let stored = self.stored(key).await?;
        if stored.is_empty() {
            return Ok(Vec::new());
        }

        let Some(embedder) = &self.embedder else {
            let skip = stored.len().saturating_sub(k);
            return Ok(stored.into_iter().skip(skip).map(|s| s.turn).collect());
        };

        let query = embedder.embed(query).await?;
        let mut scored: Vec<(f32, Turn)> = stored
            .into_iter()
            .map(|s| {
                let score = s
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(&query, e))
                    .unwrap_or(f32::MIN);
                (score, s.turn)
            })
            .collect();
        // Stable sort keeps recording order among equal scores.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, t)| t).collect())
    }

    async fn clear(&self, key: &str) -> Result<bool, MemoryError> {
        let cached = self.sessions.write().await.remove(key);
        let mut existed = cached.is_some_and(|t| !t.is_empty());

        if let Some(path) = self.session_path(key) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => existed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(session = %key, "Failed to remove memory file: {}", e);
                    return Err(e.into());
                }
            }
        }
        Ok(existed)
    }
}

/// A memory store bound to one session key.
#[derive(Clone)]
pub struct SessionMemory {
    store: Arc<dyn MemoryStore>,
    key: String,
}

impl SessionMemory {
    pub fn new(store: Arc<dyn MemoryStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load(&self) -> Result<Vec<Turn>, MemoryError> {
        self.store.load(&self.key).await
    }

    pub async fn append(&self, turn: Turn) -> Result<(), MemoryError> {
        self.store.append(&self.key, turn).await
    }

    pub async fn append_many(&self, turns: Vec<Turn>) -> Result<(), MemoryError> {
        self.store.append_many(&self.key, turns).await
    }

    pub async fn recall(&self, query: &str, k: usize) -> Result<Vec<Turn>, MemoryError> {
        self.store.recall(&self.key, query, k).await
    }

    pub async fn clear(&self) -> Result<bool, MemoryError> {
        self.store.clear(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Role;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_unknown_key_is_empty() {
        let store = FileMemoryStore::in_memory(None);
        assert!(store.load("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_then_load_grows_by_one() {
        let store = FileMemoryStore::in_memory(None);
        store.append("s", Turn::user("first")).await.unwrap();
        let before = store.load("s").await.unwrap().len();

        let turn = Turn::assistant("second");
        store.append("s", turn.clone()).await.unwrap();
        let after = store.load("s").await.unwrap();

        assert_eq!(after.len(), before + 1);
        assert_eq!(after.last(), Some(&turn));
    }

    #[tokio::test]
    async fn test_duplicate_appends_are_kept() {
        let store = FileMemoryStore::in_memory(None);
        let turn = Turn::user("same");
        store.append("s", turn.clone()).await.unwrap();
        store.append("s", turn.clone()).await.unwrap();
        assert_eq!(store.load("s").await.unwrap(), vec![turn.clone(), turn]);
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileMemoryStore::open(dir.path(), None).await.unwrap();
            store.append("user/42", Turn::user("hello")).await.unwrap();
            store.append("user/42", Turn::assistant("hi")).await.unwrap();
        }

        let store = FileMemoryStore::open(dir.path(), None).await.unwrap();
        let turns = store.load("user/42").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].text, "hi");
        assert!(dir.path().join("user%2F42.json").exists());
    }

    #[tokio::test]
    async fn test_recall_without_embedder_returns_latest() {
        let store = FileMemoryStore::in_memory(None);
        for text in ["one", "two", "three"] {
            store.append("s", Turn::user(text)).await.unwrap();
        }
        let recalled = store.recall("s", "anything", 2).await.unwrap();
        let texts: Vec<_> = recalled.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn test_recall_ranks_by_similarity_with_stable_ties() {
        let store = FileMemoryStore::in_memory(Some(Arc::new(HashingEmbedding::default())));
        store.append("s", Turn::user("bake bread")).await.unwrap();
        store.append("s", Turn::user("react dashboard")).await.unwrap();
        store.append("s", Turn::user("react dashboard")).await.unwrap();
        store.append("s", Turn::user("garden tools")).await.unwrap();

        let recalled = store.recall("s", "react dashboard", 2).await.unwrap();
        assert_eq!(recalled.len(), 2);
        assert!(recalled.iter().all(|t| t.text == "react dashboard"));
        assert!(recalled[0].timestamp <= recalled[1].timestamp);

        assert!(store.recall("s", "x", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_reports_whether_anything_existed() {
        let dir = tempdir().unwrap();
        let store = FileMemoryStore::open(dir.path(), None).await.unwrap();
        assert!(!store.clear("s").await.unwrap());

        store.append("s", Turn::user("x")).await.unwrap();
        assert!(store.clear("s").await.unwrap());
        assert!(store.load("s").await.unwrap().is_empty());
        assert!(!dir.path().join("s.json").exists());
    }

    struct RejectingEmbedding;

    #[async_trait]
    impl EmbeddingProvider for RejectingEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
            if text.contains("reject") {
                return Err(MemoryError::Embedding("rejected".to_string()));
            }
            HashingEmbedding::default().embed(text).await
        }

        fn model_name(&self) -> &str {
            "rejecting"
        }
    }

    #[tokio::test]
    async fn test_append_many_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        let store = FileMemoryStore::open(dir.path(), Some(Arc::new(RejectingEmbedding)))
            .await
            .unwrap();
        store.append("s", Turn::user("kept")).await.unwrap();

        let err = store
            .append_many("s", vec![Turn::user("fine"), Turn::assistant("reject me")])
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Embedding(_)));
        let texts: Vec<_> = store.load("s").await.unwrap().into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["kept"]);

        store
            .append_many("s", vec![Turn::user("q"), Turn::assistant("a")])
            .await
            .unwrap();
        let reopened = FileMemoryStore::open(dir.path(), None).await.unwrap();
        assert_eq!(reopened.load("s").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_session_memory_is_scoped() {
        let store: Arc<dyn MemoryStore> = Arc::new(FileMemoryStore::in_memory(None));
        let a = SessionMemory::new(store.clone(), "a");
        let b = SessionMemory::new(store, "b");
        a.append(Turn::user("only a")).await.unwrap();
        assert_eq!(a.load().await.unwrap().len(), 1);
        assert!(b.load().await.unwrap().is_empty());
    }
}
