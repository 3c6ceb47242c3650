use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{MappingStatus, MatchMapping, StoreError, StoreResult, io_error};

/// Environment variable that overrides the mapping file location.
pub const MATCH_MAPPING_PATH_ENV: &str = "MATCH_MAPPING_PATH";

pub type MappingTable = BTreeMap<String, MatchMapping>;

/// Resolve the mapping file: `$MATCH_MAPPING_PATH`, else
/// `<user data dir>/linera_orchestrator/match_mapping.json`.
pub fn default_mapping_path() -> PathBuf {
    if let Some(path) = std::env::var_os(MATCH_MAPPING_PATH_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    let base = directories::BaseDirs::new()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("linera_orchestrator").join("match_mapping.json")
}

/// File-backed mapping table.
///
/// Every mutation runs under one store-wide lock and persists the whole
/// table before the lock is released, so the file never lags the memory
/// view by more than the operation in progress.
pub struct MatchMappingStore {
    path: PathBuf,
    table: Mutex<MappingTable>,
}

impl fmt::Debug for MatchMappingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchMappingStore")
            .field("path", &self.path)
            .field("entries", &self.lock().len())
            .finish()
    }
}

impl MatchMappingStore {
    /// Empty store bound to `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: Mutex::new(MappingTable::new()),
        }
    }

    /// Bind to `path` and load whatever is there.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self::new(path);
        store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, MappingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, match_id: &str) -> Option<MatchMapping> {
        if match_id.trim().is_empty() {
            return None;
        }
        self.lock().get(match_id).cloned()
    }

    /// Snapshot of the whole table.
    pub fn get_all(&self) -> MappingTable {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Record a fresh allocation. Overwrites any previous entry for `key`.
    pub fn upsert_created(&self, key: &str, chain_id: &str, app_id: &str) -> bool {
        let mut table = self.lock();
        table.insert(key.to_string(), MatchMapping::created(chain_id, app_id));
        debug!(key, chain_id, app_id, "mapping created");
        self.persist_locked(&table)
    }

    /// Atomically claim `key` for submission.
    ///
    /// Returns `false` when the match is already submitted or a submission is
    /// in flight. Otherwise the entry is created or updated with the given
    /// chain/app and moved to `submitting`.
    pub fn try_begin_submission(&self, key: &str, chain_id: &str, app_id: &str) -> bool {
        let mut table = self.lock();
        match table.get_mut(key) {
            Some(existing) if !existing.status.accepts_submission() => {
                debug!(key, status = %existing.status, "submission rejected");
                return false;
            }
            Some(existing) => {
                existing.chain_id = chain_id.to_string();
                existing.app_id = app_id.to_string();
                existing.status = MappingStatus::Submitting;
            }
            None => {
                let mut mapping = MatchMapping::created(chain_id, app_id);
                mapping.status = MappingStatus::Submitting;
                table.insert(key.to_string(), mapping);
            }
        }
        if !self.persist_locked(&table) {
            warn!(key, "submission claim not persisted");
        }
        true
    }

    /// Mark `key` submitted. Returns whether the new state reached disk.
    pub fn complete_submission(&self, key: &str, op_id: Option<&str>) -> bool {
        let mut table = self.lock();
        let Some(mapping) = table.get_mut(key) else {
            warn!(key, "complete_submission on unknown key");
            return false;
        };
        mapping.status = MappingStatus::Submitted;
        mapping.submitted_op_id = op_id.filter(|id| !id.trim().is_empty()).map(str::to_string);
        mapping.submitted_at = Some(Utc::now());
        self.persist_locked(&table)
    }

    /// Mark `key` failed. Chain and app ids are left as they are.
    pub fn fail_submission(&self, key: &str) -> bool {
        let mut table = self.lock();
        let Some(mapping) = table.get_mut(key) else {
            return false;
        };
        mapping.status = MappingStatus::Failed;
        mapping.submitted_at = Some(Utc::now());
        self.persist_locked(&table)
    }

    /// Write the table to disk. Never panics or errors; `false` means the
    /// write did not complete.
    pub fn persist(&self) -> bool {
        let table = self.lock();
        self.persist_locked(&table)
    }

    fn persist_locked(&self, table: &MappingTable) -> bool {
        match write_table(&self.path, table) {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to save match mapping: {err}");
                false
            }
        }
    }

    /// Replace the in-memory table with the file contents.
    ///
    /// A missing, empty or unreadable file yields an empty table. Entries
    /// left in `submitting` by an interrupted run are demoted to `failed`
    /// so they can be retried.
    pub fn load(&self) {
        let mut table = self.lock();
        let loaded = match read_table(&self.path) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                info!(path = %self.path.display(), "no match mapping file; starting empty");
                MappingTable::new()
            }
            Err(err) => {
                warn!("failed to load match mapping: {err}; starting empty");
                MappingTable::new()
            }
        };
        *table = loaded;

        let mut demoted = 0usize;
        for (key, mapping) in table.iter_mut() {
            if mapping.status == MappingStatus::Submitting {
                warn!(key = key.as_str(), "interrupted submission marked failed");
                mapping.status = MappingStatus::Failed;
                mapping.submitted_at = Some(Utc::now());
                demoted += 1;
            }
        }
        if demoted > 0 {
            self.persist_locked(&table);
        }
        info!("loaded {} match mapping(s)", table.len());
    }
}

fn write_table(path: &Path, table: &MappingTable) -> StoreResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let json = serde_json::to_vec_pretty(table).map_err(|e| StoreError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    let tmp = tmp_path(path);
    fs::write(&tmp, &json).map_err(|e| io_error(&tmp, e))?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_error(path, err));
    }
    Ok(())
}

/// Read the mapping file as-is, without demoting in-flight entries. A missing
/// or blank file is an empty table.
pub fn read_snapshot(path: impl AsRef<Path>) -> StoreResult<MappingTable> {
    read_table(path.as_ref()).map(Option::unwrap_or_default)
}

fn read_table(path: &Path) -> StoreResult<Option<MappingTable>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(path, err)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Json {
            path: path.to_path_buf(),
            source: e,
        })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
