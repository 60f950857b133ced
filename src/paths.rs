//! Target directory layout, file name sanitizing and collision-free reservation

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs::OpenOptions;
use tracing::debug;

use crate::models::OwnerLabel;
use crate::servicenow::SnowError;

/// Characters removed from every file name and directory component
pub const DENYLIST: &[char] = &[
    '&', '/', '\\', '#', ',', '+', '(', ')', '$', '~', '%', '\'', '"', ':', '*', '?', '<', '>',
    '{', '}',
];

/// Strip denylisted punctuation, control characters and all non-ASCII characters.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && !DENYLIST.contains(c))
        .collect()
}

/// Sanitized name, or `fallback` when nothing usable is left
fn sanitize_component(name: &str, fallback: &str) -> String {
    let cleaned = sanitize_file_name(name);
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        sanitize_file_name(fallback)
    } else {
        trimmed.to_string()
    }
}

/// Return `path` if nothing exists there, else the first free `name[k].ext` for k = 1, 2, ...
pub fn uniquify(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_os_string());

    let mut k: u64 = 1;
    loop {
        let mut name = OsString::from(&stem);
        name.push(format!("[{}]", k));
        if let Some(ext) = &extension {
            name.push(".");
            name.push(ext);
        }
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
        k += 1;
    }
}

/// Resolves and reserves target paths below a fixed base directory.
///
/// Reservations for the same directory are serialized so two concurrent
/// downloads with the same file name never receive the same path.
#[derive(Debug)]
pub struct PathResolver {
    base_dir: PathBuf,
    dir_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            dir_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create `relative` (and parents) under the base directory; existing directories are fine.
    pub async fn ensure_directory(&self, relative: &Path) -> Result<PathBuf, SnowError> {
        let dir = self.base_dir.join(relative);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SnowError::filesystem(&dir, e))?;
        Ok(dir)
    }

    /// Relative directory for an owner table
    pub fn table_dir(&self, table: &str) -> PathBuf {
        PathBuf::from(sanitize_component(table, "unknown_table"))
    }

    /// Relative `table/label` directory for an owner record
    pub fn owner_dir(&self, table: &str, label: &OwnerLabel) -> PathBuf {
        self.table_dir(table)
            .join(sanitize_component(label.as_str(), "unknown_record"))
    }

    /// Pick a free name for `file_name` inside `dir` and create it empty.
    ///
    /// The created file is the reservation; `attachment_id` names the file when
    /// sanitizing leaves nothing.
    pub async fn reserve_file(
        &self,
        dir: &Path,
        file_name: &str,
        attachment_id: &str,
    ) -> Result<PathBuf, SnowError> {
        let name = sanitize_component(file_name, &format!("attachment-{}", attachment_id));
        let lock = self.dir_lock(dir);
        let reserved = {
            let _guard = lock.lock().await;
            create_unique(dir, &name).await
        };
        self.release_dir_lock(dir, lock);
        reserved
    }

    fn dir_lock(&self, dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .dir_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the registry entry once no other reservation holds or awaits it
    fn release_dir_lock(&self, dir: &Path, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .dir_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(dir);
        }
    }
}

/// Create the first free `uniquify` candidate for `name` in `dir`
async fn create_unique(dir: &Path, name: &str) -> Result<PathBuf, SnowError> {
    loop {
        let candidate = uniquify(&dir.join(name));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => {
                debug!("Reserved {}", candidate.display());
                return Ok(candidate);
            }
            // Created outside this process between the check and the open
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(SnowError::filesystem(&candidate, e)),
        }
    }
}
