use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RepackError;

pub const PROGRESS_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Interrupted,
    Error,
}

/// Persisted per-source-file state. `output_files` is non-empty only when
/// the status is `completed`; a file reaches `completed` only after all of
/// its derived containers have been fully written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProgress {
    pub file_path: String,
    pub status: FileStatus,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub session_name: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub total_files: usize,
    pub processed_files: usize,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_files: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProgressDocument {
    version: String,
    created_at: String,
    last_updated: String,
    sessions: Vec<Session>,
    current_session: Option<Session>,
    files: BTreeMap<String, FileProgress>,
    statistics: Statistics,
}

impl ProgressDocument {
    fn new() -> Self {
        let now = iso_timestamp();
        Self {
            version: PROGRESS_VERSION.to_string(),
            created_at: now.clone(),
            last_updated: now,
            sessions: Vec::new(),
            current_session: None,
            files: BTreeMap::new(),
            statistics: Statistics::default(),
        }
    }
}

/// Detailed per-file state machine, persisted as a single JSON document.
/// Durability discipline: every save writes a temp file and atomically
/// renames it over the real path, so a reader never observes a partial
/// document. This tracker is the sole writer of its document.
pub struct ProgressTracker {
    path: Utf8PathBuf,
    doc: ProgressDocument,
}

impl ProgressTracker {
    /// Loads an existing progress document or starts a fresh one. A corrupt
    /// document is not fatal: it is replaced with a clean one after a
    /// warning, which is the defined recovery.
    pub fn open(path: Utf8PathBuf) -> Result<Self, RepackError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| RepackError::Persistence(err.to_string()))?;
        }

        let doc = if path.as_std_path().exists() {
            let content = fs::read_to_string(path.as_std_path())
                .map_err(|err| RepackError::Persistence(err.to_string()))?;
            match serde_json::from_str::<ProgressDocument>(&content) {
                Ok(doc) => doc,
                Err(err) => {
                    warn!(path = %path, error = %err, "progress document unreadable, reinitializing");
                    ProgressDocument::new()
                }
            }
        } else {
            ProgressDocument::new()
        };

        Ok(Self { path, doc })
    }

    pub fn start_session(&mut self, total_files: usize, name: Option<&str>) -> String {
        let session_id = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let session = Session {
            session_id: session_id.clone(),
            session_name: name
                .map(|name| name.to_string())
                .unwrap_or_else(|| format!("Session_{session_id}")),
            started_at: iso_timestamp(),
            completed_at: None,
            total_files,
            processed_files: 0,
            status: SessionStatus::Running,
        };
        self.doc.sessions.push(session.clone());
        self.doc.current_session = Some(session);
        session_id
    }

    /// Registers files as `pending`. Re-adding a known path is a no-op.
    pub fn add_files<'a>(&mut self, paths: impl IntoIterator<Item = &'a str>) {
        for path in paths {
            if self.doc.files.contains_key(path) {
                continue;
            }
            self.doc.files.insert(
                path.to_string(),
                FileProgress {
                    file_path: path.to_string(),
                    status: FileStatus::Pending,
                    started_at: None,
                    completed_at: None,
                    error: None,
                    output_files: Vec::new(),
                    retry_count: 0,
                },
            );
            self.doc.statistics.total_files += 1;
            self.doc.statistics.pending += 1;
        }
    }

    pub fn start_processing(&mut self, path: &str) {
        let Some(file) = self.doc.files.get_mut(path) else {
            return;
        };
        match file.status {
            FileStatus::Pending => self.doc.statistics.pending -= 1,
            FileStatus::Failed => self.doc.statistics.failed -= 1,
            FileStatus::Processing => self.doc.statistics.processing -= 1,
            FileStatus::Completed => self.doc.statistics.completed -= 1,
        }
        file.status = FileStatus::Processing;
        file.started_at = Some(iso_timestamp());
        self.doc.statistics.processing += 1;
    }

    pub fn mark_completed(&mut self, path: &str, output_files: Vec<String>) {
        let Some(file) = self.doc.files.get_mut(path) else {
            return;
        };
        file.status = FileStatus::Completed;
        file.completed_at = Some(iso_timestamp());
        file.output_files = output_files;
        file.error = None;
        self.doc.statistics.processing = self.doc.statistics.processing.saturating_sub(1);
        self.doc.statistics.completed += 1;
        self.bump_session_processed();
    }

    pub fn mark_failed(&mut self, path: &str, error: &str) {
        let Some(file) = self.doc.files.get_mut(path) else {
            return;
        };
        file.status = FileStatus::Failed;
        file.completed_at = Some(iso_timestamp());
        file.error = Some(error.to_string());
        file.retry_count += 1;
        self.doc.statistics.processing = self.doc.statistics.processing.saturating_sub(1);
        self.doc.statistics.failed += 1;
        self.bump_session_processed();
    }

    /// Finalizes the current session exactly once.
    pub fn end_session(&mut self, status: SessionStatus) {
        let Some(mut session) = self.doc.current_session.take() else {
            return;
        };
        session.completed_at = Some(iso_timestamp());
        session.status = status;
        if let Some(stored) = self
            .doc
            .sessions
            .iter_mut()
            .find(|stored| stored.session_id == session.session_id)
        {
            *stored = session;
        }
    }

    pub fn is_file_processed(&self, path: &str) -> bool {
        self.doc
            .files
            .get(path)
            .map(|file| file.status == FileStatus::Completed)
            .unwrap_or(false)
    }

    pub fn file(&self, path: &str) -> Option<&FileProgress> {
        self.doc.files.get(path)
    }

    /// Failed files still under the retry bound.
    pub fn failed_files(&self, max_retries: u32) -> Vec<String> {
        self.doc
            .files
            .values()
            .filter(|file| file.status == FileStatus::Failed && file.retry_count < max_retries)
            .map(|file| file.file_path.clone())
            .collect()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.doc.statistics
    }

    pub fn sessions(&self) -> &[Session] {
        &self.doc.sessions
    }

    /// Durably persists the document via temp-file-then-atomic-rename.
    pub fn save(&mut self) -> Result<(), RepackError> {
        self.doc.last_updated = iso_timestamp();
        let content = serde_json::to_vec_pretty(&self.doc)
            .map_err(|err| RepackError::Persistence(err.to_string()))?;
        write_atomic(&self.path, &content)
    }

    fn bump_session_processed(&mut self) {
        if let Some(session) = self.doc.current_session.as_mut() {
            session.processed_files += 1;
            let session_id = session.session_id.clone();
            let processed = session.processed_files;
            if let Some(stored) = self
                .doc
                .sessions
                .iter_mut()
                .find(|stored| stored.session_id == session_id)
            {
                stored.processed_files = processed;
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CompletedDocument {
    started_at: Option<String>,
    last_updated: Option<String>,
    total_completed: usize,
    completed: Vec<String>,
}

/// Minimal tracker: a durable set of completed source files. Keyed by full
/// path, unlike the detailed tracker's predecessor tooling which keyed by
/// bare filename and conflated same-named archives in different
/// directories.
pub struct CompletedSet {
    path: Utf8PathBuf,
    started_at: Option<String>,
    completed: BTreeSet<String>,
}

impl CompletedSet {
    pub fn open(path: Utf8PathBuf) -> Result<Self, RepackError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| RepackError::Persistence(err.to_string()))?;
        }

        let mut set = Self {
            path,
            started_at: None,
            completed: BTreeSet::new(),
        };
        if set.path.as_std_path().exists() {
            let content = fs::read_to_string(set.path.as_std_path())
                .map_err(|err| RepackError::Persistence(err.to_string()))?;
            match serde_json::from_str::<CompletedDocument>(&content) {
                Ok(doc) => {
                    set.completed = doc.completed.into_iter().collect();
                    set.started_at = doc.started_at;
                }
                Err(err) => {
                    warn!(path = %set.path, error = %err, "completed-set unreadable, reinitializing");
                }
            }
        }
        Ok(set)
    }

    pub fn is_completed(&self, path: &str) -> bool {
        self.completed.contains(path)
    }

    /// Inserts and persists immediately; completion must survive a crash
    /// that happens right after this call returns.
    pub fn mark_completed(&mut self, path: &str) -> Result<(), RepackError> {
        self.completed.insert(path.to_string());
        self.save()
    }

    pub fn total_completed(&self) -> usize {
        self.completed.len()
    }

    fn save(&mut self) -> Result<(), RepackError> {
        let now = iso_timestamp();
        if self.started_at.is_none() {
            self.started_at = Some(now.clone());
        }
        let doc = CompletedDocument {
            started_at: self.started_at.clone(),
            last_updated: Some(now),
            total_completed: self.completed.len(),
            completed: self.completed.iter().cloned().collect(),
        };
        let content = serde_json::to_vec_pretty(&doc)
            .map_err(|err| RepackError::Persistence(err.to_string()))?;
        write_atomic(&self.path, &content)
    }
}

fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), RepackError> {
    let tmp_path = path.with_extension("json.tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| RepackError::Persistence(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| RepackError::Persistence(err.to_string()))?;
    Ok(())
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_in(dir: &std::path::Path) -> ProgressTracker {
        let path = Utf8PathBuf::from_path_buf(dir.join("progress.json")).unwrap();
        ProgressTracker::open(path).unwrap()
    }

    #[test]
    fn add_files_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(temp.path());
        tracker.add_files(["a.rar", "b.rar"]);
        tracker.add_files(["a.rar"]);

        assert_eq!(tracker.statistics().total_files, 2);
        assert_eq!(tracker.statistics().pending, 2);
    }

    #[test]
    fn counters_follow_transitions() {
        let temp = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(temp.path());
        tracker.add_files(["a.rar", "b.rar"]);

        tracker.start_processing("a.rar");
        assert_eq!(tracker.statistics().pending, 1);
        assert_eq!(tracker.statistics().processing, 1);

        tracker.mark_completed("a.rar", vec!["a v01.cbz".to_string()]);
        assert_eq!(tracker.statistics().processing, 0);
        assert_eq!(tracker.statistics().completed, 1);

        tracker.start_processing("b.rar");
        tracker.mark_failed("b.rar", "boom");
        assert_eq!(tracker.statistics().failed, 1);
        assert_eq!(tracker.file("b.rar").unwrap().retry_count, 1);
    }

    #[test]
    fn failed_files_respect_retry_bound() {
        let temp = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(temp.path());
        tracker.add_files(["a.rar"]);
        for _ in 0..3 {
            tracker.start_processing("a.rar");
            tracker.mark_failed("a.rar", "boom");
        }

        assert!(tracker.failed_files(3).is_empty());
        assert_eq!(tracker.failed_files(4), vec!["a.rar".to_string()]);
    }

    #[test]
    fn crash_between_start_and_complete_leaves_file_reprocessable() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("progress.json")).unwrap();

        let mut tracker = ProgressTracker::open(path.clone()).unwrap();
        tracker.add_files(["a.rar"]);
        tracker.start_processing("a.rar");
        tracker.save().unwrap();
        drop(tracker);

        let reloaded = ProgressTracker::open(path).unwrap();
        assert!(!reloaded.is_file_processed("a.rar"));
        assert_eq!(
            reloaded.file("a.rar").unwrap().status,
            FileStatus::Processing
        );
    }

    #[test]
    fn completed_survives_reload() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("progress.json")).unwrap();

        let mut tracker = ProgressTracker::open(path.clone()).unwrap();
        tracker.add_files(["a.rar"]);
        tracker.start_processing("a.rar");
        tracker.mark_completed("a.rar", vec!["out.cbz".to_string()]);
        tracker.save().unwrap();

        let reloaded = ProgressTracker::open(path).unwrap();
        assert!(reloaded.is_file_processed("a.rar"));
        assert_eq!(
            reloaded.file("a.rar").unwrap().output_files,
            vec!["out.cbz".to_string()]
        );
    }

    #[test]
    fn corrupt_document_reinitializes() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("progress.json")).unwrap();
        std::fs::write(path.as_std_path(), b"{ not json").unwrap();

        let tracker = ProgressTracker::open(path).unwrap();
        assert_eq!(tracker.statistics().total_files, 0);
    }

    #[test]
    fn session_lifecycle() {
        let temp = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(temp.path());
        tracker.start_session(5, Some("run"));
        tracker.add_files(["a.rar"]);
        tracker.start_processing("a.rar");
        tracker.mark_completed("a.rar", vec!["out.cbz".to_string()]);
        tracker.end_session(SessionStatus::Interrupted);

        let sessions = tracker.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Interrupted);
        assert_eq!(sessions[0].processed_files, 1);
        assert!(sessions[0].completed_at.is_some());
    }

    #[test]
    fn completed_set_keys_by_full_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("completed.json")).unwrap();

        let mut set = CompletedSet::open(path.clone()).unwrap();
        set.mark_completed("/library/a/series.rar").unwrap();

        assert!(set.is_completed("/library/a/series.rar"));
        assert!(!set.is_completed("/library/b/series.rar"));

        let reloaded = CompletedSet::open(path).unwrap();
        assert!(reloaded.is_completed("/library/a/series.rar"));
        assert_eq!(reloaded.total_completed(), 1);
    }
}
