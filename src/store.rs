//! Durable storage for resumable sessions and the transfer history log.
//!
//! [`SessionStore`] holds one JSON record per session under a caller-chosen
//! directory. It is an explicitly constructed handle passed to whoever needs
//! it — there is no global connection and no lazy initialization; callers
//! open it at startup and drop it on shutdown.
//!
//! Records are written with a write-then-rename so a crash mid-save leaves
//! the previous complete record in place, never a torn one.
//!
//! [`HistoryStore`] is the simple append-only sink for finished transfers:
//! one JSON line per record.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TransferError;
use crate::session::SessionState;

// ── Session store ────────────────────────────────────────────────────────────

/// File-backed store of [`SessionState`] records, keyed by session ID.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn record_path(&self, session_id: Uuid) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    /// Idempotent upsert of one session record.
    ///
    /// Called after every chunk and every pause/resume toggle. The write
    /// lands in a temp file first and is renamed into place, so the latest
    /// complete record survives a crash that occurs after the corresponding
    /// chunk was transmitted.
    pub async fn save(&self, state: &SessionState) -> Result<(), TransferError> {
        let path = self.record_path(state.session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(state)?;

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Load a session record, `None` when no record exists for the ID.
    pub async fn load(&self, session_id: Uuid) -> Result<Option<SessionState>, TransferError> {
        let path = self.record_path(session_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a session record. Deleting a missing record is not an error.
    pub async fn delete(&self, session_id: Uuid) -> Result<(), TransferError> {
        match fs::remove_file(self.record_path(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every record whose `lastUpdateTime` is older than `max_age`.
    ///
    /// Intended to run once per process start, not continuously. Unreadable
    /// records are skipped with a warning rather than aborting the sweep.
    pub async fn sweep_expired(&self, max_age: Duration) -> Result<usize, TransferError> {
        let age = chrono::TimeDelta::from_std(max_age).unwrap_or(chrono::TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut removed = 0usize;

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let state: SessionState = match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(event = "sweep_unreadable_record", path = %path.display(), %e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!(event = "sweep_unreadable_record", path = %path.display(), %e);
                    continue;
                }
            };
            if state.last_update_time < cutoff {
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(event = "sweep_delete_failed", path = %path.display(), %e);
                } else {
                    debug!(
                        event = "session_expired",
                        session_id = %state.session_id,
                        last_update = %state.last_update_time
                    );
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!(event = "session_sweep", removed, "Removed expired session records");
        }
        Ok(removed)
    }
}

// ── History sink ─────────────────────────────────────────────────────────────

/// Direction of a finished transfer, from the local peer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Sent,
    Received,
}

/// Terminal status recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Completed,
    Failed,
    Cancelled,
    Paused,
}

/// One line of the append-only transfer history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: Uuid,
    /// Display name: the single file's name, or the first file's name for
    /// a multi-file transfer.
    pub file_name: String,
    /// Aggregate size across the transfer's files.
    pub file_size: u64,
    pub timestamp: DateTime<Utc>,
    pub direction: TransferDirection,
    pub status: TransferStatus,
    pub file_count: usize,
}

/// Append-only JSON-lines history log.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    /// Open (creating parent directories if needed) the history log at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(Self { path })
    }

    /// Append one record.
    pub async fn append(&self, record: &HistoryRecord) -> Result<(), TransferError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read back all records, oldest first. Malformed lines are skipped.
    pub async fn list(&self) -> Result<Vec<HistoryRecord>, TransferError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

/// Write a session record, downgrading failure to a warning.
///
/// Persistence going away must not corrupt or stop an in-flight transfer;
/// the engine merely loses resumability across restarts.
pub(crate) async fn save_best_effort(store: Option<&SessionStore>, state: &SessionState) {
    if let Some(store) = store {
        if let Err(e) = store.save(state).await {
            warn!(event = "session_save_failed", session_id = %state.session_id, %e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FileManifestEntry;

    fn manifest() -> Vec<FileManifestEntry> {
        vec![FileManifestEntry::new("report.pdf", 4096, "application/pdf")]
    }

    #[tokio::test]
    async fn save_load_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).await.unwrap();

        let mut state = SessionState::new(&manifest());
        state.mark_chunk_sent(0);
        store.save(&state).await.unwrap();

        let loaded = store.load(state.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.session_id, state.session_id);
        assert_eq!(loaded.files[0].completed_chunks, 1);

        store.delete(state.session_id).await.unwrap();
        assert!(store.load(state.session_id).await.unwrap().is_none());
        // Idempotent delete.
        store.delete(state.session_id).await.unwrap();
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).await.unwrap();

        let mut state = SessionState::new(&manifest());
        store.save(&state).await.unwrap();
        state.mark_chunk_sent(0);
        store.save(&state).await.unwrap();

        let loaded = store.load(state.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.files[0].completed_chunks, 1);
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).await.unwrap();

        let fresh = SessionState::new(&manifest());
        store.save(&fresh).await.unwrap();

        let mut stale = SessionState::new(&manifest());
        stale.last_update_time = Utc::now() - chrono::TimeDelta::days(2);
        store.save(&stale).await.unwrap();

        let removed = store
            .sweep_expired(Duration::from_secs(24 * 3600))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.load(fresh.session_id).await.unwrap().is_some());
        assert!(store.load(stale.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_appends_and_lists_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryStore::open(dir.path().join("history.jsonl"))
            .await
            .unwrap();
        assert!(history.list().await.unwrap().is_empty());

        for (i, status) in [TransferStatus::Completed, TransferStatus::Failed]
            .into_iter()
            .enumerate()
        {
            history
                .append(&HistoryRecord {
                    id: Uuid::new_v4(),
                    file_name: format!("f{i}"),
                    file_size: 10,
                    timestamp: Utc::now(),
                    direction: TransferDirection::Sent,
                    status,
                    file_count: 1,
                })
                .await
                .unwrap();
        }

        let records = history.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].file_name, "f0");
        assert_eq!(records[1].status, TransferStatus::Failed);
    }
}
