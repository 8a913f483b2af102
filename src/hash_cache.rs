use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, trace, warn};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::OrphanSweepError;
use crate::hash::{Hash, HashAlgorithm};

/// Mtime drift tolerated before a cached hash is considered stale.
/// Filesystems round mtimes differently; two seconds absorbs that.
pub const MTIME_TOLERANCE_SECS: f64 = 2.0;

/// Cache file name used by the flat-file backend, one per scanned folder.
pub const JSON_CACHE_FILE: &str = ".orphansweep_cache.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub algorithm: HashAlgorithm,
    pub mtime: f64,
    pub size: u64,
}

/// A cached hash is reused only when the file's mtime is within tolerance
/// and the entry was computed with the configured algorithm. A legacy md5
/// entry under an xxh64 configuration misses exactly once, forcing a
/// re-hash that persists the new digest/algorithm pair.
pub fn is_cache_hit(entry: &CacheEntry, current_mtime: f64, algorithm: HashAlgorithm) -> bool {
    (entry.mtime - current_mtime).abs() <= MTIME_TOLERANCE_SECS && entry.algorithm == algorithm
}

/// Persistent `(folder, relative_path) -> (hash, algorithm, mtime, size)`
/// store. The two backends are behaviorally interchangeable.
pub trait HashCache {
    fn load(&mut self, folder: &Path) -> Result<HashMap<String, CacheEntry>, OrphanSweepError>;

    fn upsert(
        &mut self,
        folder: &Path,
        relative_path: &str,
        entry: CacheEntry,
    ) -> Result<(), OrphanSweepError>;

    /// Persist any batched writes. Guaranteed to be called on normal scan
    /// completion; backends also flush periodically to bound loss on
    /// interruption.
    fn flush(&mut self) -> Result<(), OrphanSweepError>;

    /// Remove entries whose file no longer exists on disk. Returns the
    /// number of entries removed.
    fn clean(&mut self, folder: &Path) -> Result<usize, OrphanSweepError>;
}

/// Validate a stored digest against its claimed algorithm; rows that fail
/// are treated as cache misses, never trusted blindly.
fn accept_entry(relative_path: &str, hash: &str, algorithm: Option<&str>) -> Option<HashAlgorithm> {
    let algorithm = match algorithm.and_then(HashAlgorithm::from_str) {
        Some(algo) => algo,
        // Rows predating the algorithm column: infer from digest length.
        None => match HashAlgorithm::infer(hash) {
            Ok(algo) => algo,
            Err(_) => {
                warn!(
                    "Rejecting cache entry for '{}': unrecognized digest length {}",
                    relative_path,
                    hash.len()
                );
                return None;
            }
        },
    };

    if Hash::validate(hash, algorithm).is_err() {
        warn!(
            "Rejecting cache entry for '{}': digest length {} does not match claimed algorithm {}",
            relative_path,
            hash.len(),
            algorithm
        );
        return None;
    }

    Some(algorithm)
}

// ---------------------------------------------------------------------------
// Relational backend
// ---------------------------------------------------------------------------

pub struct SqliteHashCache<'a> {
    conn: &'a Connection,
    batch: Vec<(String, String, CacheEntry)>,
    flush_interval: usize,
}

impl<'a> SqliteHashCache<'a> {
    pub fn new(conn: &'a Connection, flush_interval: usize) -> Self {
        Self {
            conn,
            batch: Vec::new(),
            flush_interval: flush_interval.max(1),
        }
    }
}

impl HashCache for SqliteHashCache<'_> {
    fn load(&mut self, folder: &Path) -> Result<HashMap<String, CacheEntry>, OrphanSweepError> {
        let mut cache = HashMap::new();

        let mut stmt = self.conn.prepare(
            "SELECT relative_path, file_hash, hash_algorithm, mtime, file_size
             FROM file_hashes
             WHERE folder_path = ?",
        )?;
        let rows = stmt.query_map(params![folder.to_string_lossy()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        for row in rows {
            let (relative_path, hash, algorithm, mtime, size) = row?;
            if let Some(algorithm) = accept_entry(&relative_path, &hash, algorithm.as_deref()) {
                cache.insert(
                    relative_path,
                    CacheEntry {
                        hash,
                        algorithm,
                        mtime,
                        size: size.max(0) as u64,
                    },
                );
            }
        }

        trace!(
            "Loaded {} cache entries for {} from SQLite",
            cache.len(),
            folder.display()
        );
        Ok(cache)
    }

    fn upsert(
        &mut self,
        folder: &Path,
        relative_path: &str,
        entry: CacheEntry,
    ) -> Result<(), OrphanSweepError> {
        self.batch.push((
            folder.to_string_lossy().to_string(),
            relative_path.to_string(),
            entry,
        ));
        if self.batch.len() >= self.flush_interval {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OrphanSweepError> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO file_hashes
                 (file_hash, hash_algorithm, folder_path, relative_path, mtime, file_size)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            for (folder, relative_path, entry) in self.batch.drain(..) {
                stmt.execute(params![
                    entry.hash,
                    entry.algorithm.as_str(),
                    folder,
                    relative_path,
                    entry.mtime,
                    entry.size as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn clean(&mut self, folder: &Path) -> Result<usize, OrphanSweepError> {
        self.flush()?;

        let folder_str = folder.to_string_lossy().to_string();
        let mut stale: Vec<String> = Vec::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT relative_path FROM file_hashes WHERE folder_path = ?")?;
            let rows = stmt.query_map(params![folder_str], |row| row.get::<_, String>(0))?;
            for row in rows {
                let relative_path = row?;
                if !folder.join(&relative_path).exists() {
                    stale.push(relative_path);
                }
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "DELETE FROM file_hashes WHERE folder_path = ? AND relative_path = ?",
            )?;
            for relative_path in &stale {
                stmt.execute(params![folder.to_string_lossy(), relative_path])?;
            }
        }
        tx.commit()?;

        if !stale.is_empty() {
            info!(
                "Removed {} stale cache entries for {}",
                stale.len(),
                folder.display()
            );
        }
        Ok(stale.len())
    }
}

// ---------------------------------------------------------------------------
// Flat-file backend
// ---------------------------------------------------------------------------

pub struct JsonHashCache {
    folders: HashMap<PathBuf, HashMap<String, CacheEntry>>,
    dirty: usize,
    flush_interval: usize,
}

impl JsonHashCache {
    pub fn new(flush_interval: usize) -> Self {
        Self {
            folders: HashMap::new(),
            dirty: 0,
            flush_interval: flush_interval.max(1),
        }
    }

    fn cache_file(folder: &Path) -> PathBuf {
        folder.join(JSON_CACHE_FILE)
    }

    fn write_folder(
        folder: &Path,
        entries: &HashMap<String, CacheEntry>,
    ) -> Result<(), OrphanSweepError> {
        let cache_file = Self::cache_file(folder);
        debug!(
            "Saving {} entries to hash cache {}",
            entries.len(),
            cache_file.display()
        );
        let json = serde_json::to_string(entries)
            .map_err(|e| OrphanSweepError::Error(format!("Error serializing cache: {}", e)))?;
        fs::write(&cache_file, json)?;
        Ok(())
    }
}

impl HashCache for JsonHashCache {
    fn load(&mut self, folder: &Path) -> Result<HashMap<String, CacheEntry>, OrphanSweepError> {
        let cache_file = Self::cache_file(folder);
        let mut cache: HashMap<String, CacheEntry> = HashMap::new();

        if cache_file.exists() {
            match fs::read_to_string(&cache_file) {
                Ok(contents) => match serde_json::from_str::<HashMap<String, CacheEntry>>(&contents)
                {
                    Ok(parsed) => {
                        for (relative_path, entry) in parsed {
                            if accept_entry(
                                &relative_path,
                                &entry.hash,
                                Some(entry.algorithm.as_str()),
                            )
                            .is_some()
                            {
                                cache.insert(relative_path, entry);
                            }
                        }
                    }
                    Err(e) => warn!("Error parsing cache {}: {}", cache_file.display(), e),
                },
                Err(e) => warn!("Error reading cache {}: {}", cache_file.display(), e),
            }
        } else {
            debug!("Cache file not found: {}", cache_file.display());
        }

        self.folders.insert(folder.to_path_buf(), cache.clone());
        Ok(cache)
    }

    fn upsert(
        &mut self,
        folder: &Path,
        relative_path: &str,
        entry: CacheEntry,
    ) -> Result<(), OrphanSweepError> {
        self.folders
            .entry(folder.to_path_buf())
            .or_default()
            .insert(relative_path.to_string(), entry);
        self.dirty += 1;
        if self.dirty >= self.flush_interval {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OrphanSweepError> {
        if self.dirty == 0 {
            return Ok(());
        }
        for (folder, entries) in &self.folders {
            Self::write_folder(folder, entries)?;
        }
        self.dirty = 0;
        Ok(())
    }

    fn clean(&mut self, folder: &Path) -> Result<usize, OrphanSweepError> {
        let mut entries = self.load(folder)?;
        let before = entries.len();
        entries.retain(|relative_path, _| folder.join(relative_path).exists());
        let removed = before - entries.len();

        Self::write_folder(folder, &entries)?;
        self.folders.insert(folder.to_path_buf(), entries);
        if removed > 0 {
            info!(
                "Removed {} stale cache entries for {}",
                removed,
                folder.display()
            );
        }
        Ok(removed)
    }
}
