use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{TimerError, TimerResult};
use crate::timer::session::{PendingFlush, Phase, SessionState};

/// On-disk record of an unfinished session. Not part of the task store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionJournal {
    pub task_id: i64,
    pub state: SessionState,
    pub banked_millis: u64,
    pub phase: Phase,
    /// A stop that had started writing to the store when the journal was saved.
    #[serde(default)]
    pub pending: Option<PendingFlush>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JournalFile {
    path: PathBuf,
}

impl JournalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes to a sibling temp file first so a crash never leaves half a journal.
    pub fn save(&self, journal: &SessionJournal) -> TimerResult<()> {
        let json = serde_json::to_string_pretty(journal).map_err(|e| TimerError::Journal(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| TimerError::Journal(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| TimerError::Journal(e.to_string()))?;
        log::debug!("Session journal written to {}", self.path.display());
        Ok(())
    }

    pub fn load(&self) -> TimerResult<Option<SessionJournal>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TimerError::Journal(e.to_string())),
        };
        let journal = serde_json::from_str(&raw).map_err(|e| {
            TimerError::Journal(format!("{} is corrupt: {}", self.path.display(), e))
        })?;
        Ok(Some(journal))
    }

    pub fn clear(&self) -> TimerResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::debug!("Session journal cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TimerError::Journal(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_journal_loads_as_none() {
        let dir = tempdir().unwrap();
        let file = JournalFile::new(dir.path().join("session.json"));
        assert!(file.load().unwrap().is_none());
        file.clear().unwrap();
    }

    #[test]
    fn test_save_load_clear() {
        let dir = tempdir().unwrap();
        let file = JournalFile::new(dir.path().join("session.json"));
        let journal = SessionJournal {
            task_id: 7,
            state: SessionState::Active,
            banked_millis: 12_500,
            phase: Phase::Work,
            pending: None,
            saved_at: Utc::now(),
        };

        file.save(&journal).unwrap();
        assert_eq!(file.load().unwrap(), Some(journal));
        assert!(!dir.path().join("session.tmp").exists());

        file.clear().unwrap();
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn test_loads_journal_without_pending_flush() {
        let dir = tempdir().unwrap();
        let file = JournalFile::new(dir.path().join("session.json"));
        fs::write(
            file.path(),
            r#"{"task_id":4,"state":"Paused","banked_millis":3000,"phase":"Break","saved_at":"2026-01-05T10:00:00Z"}"#,
        )
        .unwrap();

        let journal = file.load().unwrap().unwrap();
        assert_eq!(journal.task_id, 4);
        assert_eq!(journal.pending, None);
    }

    #[test]
    fn test_corrupt_journal_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{ not json").unwrap();
        let err = JournalFile::new(&path).load().unwrap_err();
        assert!(matches!(err, TimerError::Journal(_)));
    }
}
