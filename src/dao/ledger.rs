//! Per-device record of cast votes and the remembered captain display name.

use std::{
    collections::BTreeMap,
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::{debug, info, warn};

use crate::dao::models::JamSongId;

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LedgerFile {
    votes: BTreeMap<JamSongId, bool>,
    display_name: Option<String>,
}

/// Vote markers keyed by jam song id, optionally persisted as JSON.
///
/// The ledger has no server cross-reference: the same person voting from two
/// devices is counted twice.
#[derive(Debug)]
pub struct VoteLedger {
    path: Option<PathBuf>,
    data: Mutex<LedgerFile>,
}

impl VoteLedger {
    /// Ledger kept in memory only.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(LedgerFile::default()),
        }
    }

    /// Load the ledger stored at `path`; a missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<LedgerFile>(&contents) {
                Ok(data) => {
                    info!(path = %path.display(), votes = data.votes.len(), "loaded vote ledger");
                    data
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to parse vote ledger; starting empty");
                    LedgerFile::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no vote ledger yet");
                LedgerFile::default()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read vote ledger; starting empty");
                LedgerFile::default()
            }
        };

        Self {
            path: Some(path),
            data: Mutex::new(data),
        }
    }

    /// File backing the ledger, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether this device voted for the entry.
    pub fn has_voted(&self, id: &JamSongId) -> bool {
        self.read(|data| data.votes.get(id).copied().unwrap_or(false))
    }

    /// Record a vote for the entry.
    pub fn mark_voted(&self, id: &JamSongId) {
        self.update(|data| data.votes.insert(id.clone(), true) != Some(true));
    }

    /// Forget the vote for the entry.
    pub fn clear_vote(&self, id: &JamSongId) {
        self.update(|data| data.votes.remove(id).is_some());
    }

    /// Name used for the last captain signup on this device.
    pub fn display_name(&self) -> Option<String> {
        self.read(|data| data.display_name.clone())
    }

    /// Store the trimmed name for later captain signups.
    pub fn remember_display_name(&self, name: &str) {
        let name = name.trim().to_owned();
        self.update(|data| {
            if data.display_name.as_deref() == Some(name.as_str()) {
                false
            } else {
                data.display_name = Some(name);
                true
            }
        });
    }

    fn read<R>(&self, read: impl FnOnce(&LedgerFile) -> R) -> R {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        read(&data)
    }

    fn update(&self, change: impl FnOnce(&mut LedgerFile) -> bool) {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        if !change(&mut data) {
            return;
        }
        if let Some(path) = &self.path {
            if let Err(err) = persist(path, &data) {
                warn!(path = %path.display(), error = %err, "failed to persist vote ledger");
            }
        }
    }
}

fn persist(path: &Path, data: &LedgerFile) -> io::Result<()> {
    let contents = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn votes_and_name_survive_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("ledger.json");

        let ledger = VoteLedger::open(&path);
        ledger.mark_voted(&JamSongId::from("js-1"));
        ledger.mark_voted(&JamSongId::from("js-2"));
        ledger.clear_vote(&JamSongId::from("js-2"));
        ledger.remember_display_name("  Robin ");

        let reopened = VoteLedger::open(&path);
        assert!(reopened.has_voted(&JamSongId::from("js-1")));
        assert!(!reopened.has_voted(&JamSongId::from("js-2")));
        assert_eq!(reopened.display_name().as_deref(), Some("Robin"));
    }

    #[test]
    fn malformed_file_starts_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("ledger.json");
        fs::write(&path, "not json").expect("writes");

        let ledger = VoteLedger::open(&path);
        assert!(!ledger.has_voted(&JamSongId::from("js-1")));
        assert_eq!(ledger.display_name(), None);
    }

    #[test]
    fn in_memory_ledger_writes_nothing() {
        let ledger = VoteLedger::in_memory();
        ledger.mark_voted(&JamSongId::from("js-1"));
        assert!(ledger.has_voted(&JamSongId::from("js-1")));
        assert!(ledger.path().is_none());
    }
}
