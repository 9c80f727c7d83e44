//! On-disk state under `data_dir`.
//!
//! ```text
//! data/
//!   job_status.json
//!   forms/<form_id>/submissions_page_0001.jsonl
//!   forms/<form_id>/deduped_submissions.jsonl
//!   forms/<form_id>/cursor.json        snapshot offset for batch runs
//!   forms/<form_id>/live_cursor.json   continuation token for live runs
//! ```
//!
//! Every write goes to a temporary sibling first and is renamed into place, so
//! a crash never leaves a half-written cursor or snapshot behind.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::domain::entities::Submission;
use crate::domain::job_state::{Cursor, JobState};
use crate::domain::services::DedupedEntry;
use crate::infrastructure::sync_error::{SyncError, SyncResult};

const PAGE_PREFIX: &str = "submissions_page_";
const DEDUPED_FILE: &str = "deduped_submissions.jsonl";
const CURSOR_FILE: &str = "cursor.json";
const LEGACY_CURSOR_FILE: &str = "cursor.txt";
const LIVE_CURSOR_FILE: &str = "live_cursor.json";
const JOB_STATUS_FILE: &str = "job_status.json";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { root: data_dir.into() }
    }

    /// Directory for one form. Characters outside `[A-Za-z0-9_-]` are replaced
    /// so a form id can never escape the data directory.
    pub fn form_dir(&self, form_id: &str) -> PathBuf {
        let safe: String = form_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join("forms").join(safe)
    }

    pub fn page_path(&self, form_id: &str, index: usize) -> PathBuf {
        self.form_dir(form_id).join(format!("{PAGE_PREFIX}{index:04}.jsonl"))
    }

    pub fn deduped_path(&self, form_id: &str) -> PathBuf {
        self.form_dir(form_id).join(DEDUPED_FILE)
    }

    pub fn job_status_path(&self) -> PathBuf {
        self.root.join(JOB_STATUS_FILE)
    }

    /// Remove page files left by an earlier prepare. Returns how many were deleted.
    pub async fn reset_pages(&self, form_id: &str) -> SyncResult<usize> {
        let mut removed = 0;
        for path in self.page_files(form_id).await? {
            fs::remove_file(&path).await?;
            removed += 1;
        }
        if removed > 0 {
            debug!("🧹 Removed {} stale page file(s) for form {}", removed, form_id);
        }
        Ok(removed)
    }

    pub async fn write_page(&self, form_id: &str, index: usize, submissions: &[Submission]) -> SyncResult<PathBuf> {
        let path = self.page_path(form_id, index);
        write_jsonl(&path, submissions).await?;
        info!("💾 Saved page {} ({} submissions) → {:?}", index, submissions.len(), path);
        Ok(path)
    }

    /// Every stored page, in page order.
    pub async fn read_pages(&self, form_id: &str) -> SyncResult<Vec<Submission>> {
        let files = self.page_files(form_id).await?;
        if files.is_empty() {
            return Err(SyncError::SnapshotMissing(self.form_dir(form_id)));
        }
        let mut all = Vec::new();
        for path in files {
            all.extend(read_jsonl::<Submission>(&path).await?);
        }
        Ok(all)
    }

    /// Store the winning raw submission of each deduped entry, one per line.
    pub async fn write_deduped(&self, form_id: &str, entries: &[DedupedEntry]) -> SyncResult<PathBuf> {
        let path = self.deduped_path(form_id);
        let submissions: Vec<&Submission> = entries.iter().map(|e| &e.submission).collect();
        write_jsonl(&path, &submissions).await?;
        info!("💾 Saved {} deduped submission(s) → {:?}", entries.len(), path);
        Ok(path)
    }

    pub async fn read_deduped(&self, form_id: &str) -> SyncResult<Vec<Submission>> {
        let path = self.deduped_path(form_id);
        if !fs::try_exists(&path).await? {
            return Err(SyncError::SnapshotMissing(path));
        }
        read_jsonl(&path).await
    }

    pub async fn has_deduped(&self, form_id: &str) -> bool {
        fs::try_exists(self.deduped_path(form_id)).await.unwrap_or(false)
    }

    /// Snapshot offset cursor. Falls back to the plain-text `cursor.txt`
    /// written by older runs.
    pub async fn load_cursor(&self, form_id: &str) -> SyncResult<Option<Cursor>> {
        let dir = self.form_dir(form_id);
        for name in [CURSOR_FILE, LEGACY_CURSOR_FILE] {
            if let Some(text) = read_optional(&dir.join(name)).await? {
                return Ok(Cursor::parse(&text));
            }
        }
        Ok(None)
    }

    pub async fn save_cursor(&self, form_id: &str, cursor: &Cursor) -> SyncResult<()> {
        write_json(&self.form_dir(form_id).join(CURSOR_FILE), cursor).await
    }

    /// Forget the snapshot offset (a fresh prepare starts from zero).
    pub async fn clear_cursor(&self, form_id: &str) -> SyncResult<()> {
        let dir = self.form_dir(form_id);
        for name in [CURSOR_FILE, LEGACY_CURSOR_FILE] {
            remove_if_exists(&dir.join(name)).await?;
        }
        Ok(())
    }

    pub async fn load_live_cursor(&self, form_id: &str) -> SyncResult<Option<Cursor>> {
        let path = self.form_dir(form_id).join(LIVE_CURSOR_FILE);
        Ok(read_optional(&path).await?.and_then(|text| Cursor::parse(&text)))
    }

    pub async fn save_live_cursor(&self, form_id: &str, cursor: Option<&Cursor>) -> SyncResult<()> {
        let path = self.form_dir(form_id).join(LIVE_CURSOR_FILE);
        match cursor {
            Some(cursor) => write_json(&path, cursor).await,
            None => remove_if_exists(&path).await,
        }
    }

    pub async fn save_job_state(&self, state: &JobState) -> SyncResult<()> {
        write_json(&self.job_status_path(), state).await
    }

    pub async fn load_job_state(&self) -> SyncResult<Option<JobState>> {
        match read_optional(&self.job_status_path()).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn page_files(&self, form_id: &str) -> SyncResult<Vec<PathBuf>> {
        let dir = self.form_dir(form_id);
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(PAGE_PREFIX) && name.ends_with(".jsonl") {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> SyncResult<()> {
    let text = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &text).await
}

async fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> SyncResult<()> {
    let mut out = Vec::new();
    for item in items {
        serde_json::to_writer(&mut out, item)?;
        out.push(b'\n');
    }
    write_atomic(path, &out).await
}

async fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> SyncResult<Vec<T>> {
    let text = fs::read_to_string(path).await?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| SyncError::Decode(format!("{}:{}: {e}", path.display(), n + 1)))
        })
        .collect()
}

async fn read_optional(path: &Path) -> SyncResult<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> SyncResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
