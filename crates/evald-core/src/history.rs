//! Versioned history seam.
//!
//! Every state-mutating evaluation becomes an addressable point in a linear,
//! append-only history. The storage mechanics live behind [`HistoryStore`];
//! the core only relies on {commit, log, checkout}. A disk-backed
//! implementation lives in the `evald-store` crate; [`MemoryHistoryStore`]
//! here backs tests and ephemeral deployments.

use crate::error::{EvaldError, Result};
use crate::session::SessionSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// An immutable, ordered record of a state-affecting operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Opaque stable identifier; collision-resistant, unique per commit
    /// even for identical content committed at different times.
    pub commit_id: String,
    pub author: String,
    pub message: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

/// Append-only, linearly ordered snapshot history.
///
/// Implementations guard their own interior so `log` may run concurrently
/// with an in-flight `commit` and still observe a consistent sequence.
/// All methods are synchronous; per the concurrency model they execute
/// within the session lock's scope (commit/checkout) or lock-free (log).
pub trait HistoryStore: Send + Sync {
    /// Appends a snapshot to the history and returns the new entry.
    fn commit(
        &self,
        snapshot: &SessionSnapshot,
        author: &str,
        message: &str,
    ) -> Result<HistoryEntry>;

    /// Returns the most recent `limit` entries, newest first.
    ///
    /// Newest-first ordering is a hard contract: index 0 is current.
    fn log(&self, limit: usize) -> Result<Vec<HistoryEntry>>;

    /// Reads the snapshot recorded at `commit_id`.
    ///
    /// Fails with [`EvaldError::UnknownCommit`] when no entry matches.
    /// Does not move the history head.
    fn checkout(&self, commit_id: &str) -> Result<SessionSnapshot>;

    /// The newest entry, if any history exists.
    fn head(&self) -> Result<Option<HistoryEntry>>;
}

/// In-memory history store.
///
/// Commit ids are random UUIDs, so identical content committed twice still
/// gets distinct ids.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    entries: RwLock<Vec<(HistoryEntry, SessionSnapshot)>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_poisoned() -> EvaldError {
        EvaldError::storage("history lock poisoned")
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn commit(
        &self,
        snapshot: &SessionSnapshot,
        author: &str,
        message: &str,
    ) -> Result<HistoryEntry> {
        let entry = HistoryEntry {
            commit_id: uuid::Uuid::new_v4().simple().to_string(),
            author: author.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };

        let mut entries = self.entries.write().map_err(|_| Self::lock_poisoned())?;
        entries.push((entry.clone(), snapshot.clone()));
        Ok(entry)
    }

    fn log(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let entries = self.entries.read().map_err(|_| Self::lock_poisoned())?;
        Ok(entries
            .iter()
            .rev()
            .take(limit)
            .map(|(entry, _)| entry.clone())
            .collect())
    }

    fn checkout(&self, commit_id: &str) -> Result<SessionSnapshot> {
        let entries = self.entries.read().map_err(|_| Self::lock_poisoned())?;
        entries
            .iter()
            .find(|(entry, _)| entry.commit_id == commit_id)
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or_else(|| EvaldError::unknown_commit(commit_id))
    }

    fn head(&self) -> Result<Option<HistoryEntry>> {
        let entries = self.entries.read().map_err(|_| Self::lock_poisoned())?;
        Ok(entries.last().map(|(entry, _)| entry.clone()))
    }
}
