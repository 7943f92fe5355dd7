use crate::error::FeedbackError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub run_id: String,
    pub score: u8,
    #[serde(default)]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only JSON-lines log of ratings.
pub struct FeedbackStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FeedbackStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FeedbackError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Validates and records a rating. Nothing is written when validation
    /// fails.
    pub async fn submit(
        &self,
        run_id: &str,
        score: i64,
        comment: Option<String>,
    ) -> Result<FeedbackRecord, FeedbackError> {
        if !(1..=5).contains(&score) {
            return Err(FeedbackError::InvalidScore(score));
        }
        if run_id.trim().is_empty() {
            return Err(FeedbackError::EmptyRunId);
        }

        let record = FeedbackRecord {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.trim().to_string(),
            score: score as u8,
            comment: comment.filter(|c| !c.trim().is_empty()),
            created_at: Utc::now(),
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        info!(run_id = %record.run_id, score = record.score, "Recorded feedback");
        Ok(record)
    }

    /// Records in submission order. Unparsable lines are skipped.
    pub async fn list(&self) -> Result<Vec<FeedbackRecord>, FeedbackError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping feedback line {}: {}", n + 1, e),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_out_of_range_score_is_not_recorded() {
        let dir = tempdir().unwrap();
        let store = FeedbackStore::open(dir.path().join("feedback.jsonl"))
            .await
            .unwrap();

        for score in [0, 6, -1] {
            assert!(matches!(
                store.submit("run", score, None).await,
                Err(FeedbackError::InvalidScore(s)) if s == score
            ));
        }
        assert!(matches!(
            store.submit("  ", 3, None).await,
            Err(FeedbackError::EmptyRunId)
        ));
        assert!(store.list().await.unwrap().is_empty());
        assert!(!dir.path().join("feedback.jsonl").exists());
    }

    #[tokio::test]
    async fn test_records_are_appended_in_order() {
        let dir = tempdir().unwrap();
        let store = FeedbackStore::open(dir.path().join("nested/feedback.jsonl"))
            .await
            .unwrap();

        store.submit("run-1", 5, Some("great".into())).await.unwrap();
        store.submit("run-2", 1, Some("   ".into())).await.unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].run_id, "run-1");
        assert_eq!(records[0].comment.as_deref(), Some("great"));
        assert_eq!(records[1].score, 1);
        assert_eq!(records[1].comment, None);
    }
}
