use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::error::OrphanSweepError;
use crate::hash::{Hash, HashAlgorithm};
use crate::hash_cache::{is_cache_hit, CacheEntry, HashCache, JSON_CACHE_FILE};

/// Path fragments marking sample/extra content. Matched against the
/// lowercased, '/'-normalized relative path.
const SAMPLE_MARKERS: [&str; 5] = ["/sample", "/featurettes", "/extras", ".sample", "-sample"];

#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub hash: String,
    pub size: u64,
}

/// One scanned folder: `relative_path -> (hash, size)`.
#[derive(Debug, Clone)]
pub struct FolderScan {
    pub folder: PathBuf,
    pub files: HashMap<String, FileInfo>,
}

/// Inclusion/exclusion policy applied to every candidate file, plus the
/// hash algorithm scans are performed with.
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    min_file_size: u64,
    extensions_blacklist: Vec<String>,
    subfolders_blacklist: Vec<String>,
    algorithm: HashAlgorithm,
}

impl ScanPolicy {
    pub fn from_config(scan: &ScanConfig) -> Self {
        ScanPolicy {
            min_file_size: scan.min_file_size_bytes(),
            extensions_blacklist: scan.extensions_blacklist.clone(),
            subfolders_blacklist: scan
                .subfolders_blacklist
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            algorithm: scan.hash_algorithm(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    #[cfg(test)]
    pub fn for_tests(subfolders_blacklist: &[&str]) -> Self {
        ScanPolicy {
            min_file_size: 0,
            extensions_blacklist: Vec::new(),
            subfolders_blacklist: subfolders_blacklist
                .iter()
                .map(|s| s.to_string())
                .collect(),
            algorithm: HashAlgorithm::Xxh64,
        }
    }

    /// True when a top-level directory name is blacklisted. The walk
    /// prunes these subtrees before any of their files are stat'd.
    pub fn is_blacklisted_subfolder(&self, name: &str) -> bool {
        self.subfolders_blacklist
            .contains(&name.to_ascii_lowercase())
    }

    /// True when a relative path's first component is blacklisted.
    pub fn under_blacklisted_subfolder(&self, relative_path: &str) -> bool {
        match relative_path.replace('\\', "/").split('/').next() {
            Some(first) => self.is_blacklisted_subfolder(first),
            None => false,
        }
    }

    /// Policy checks in order: extension/filename blacklist, sample
    /// markers, minimum size. All string matching is case-insensitive.
    pub fn excludes(&self, relative_path: &str, size: u64) -> bool {
        let normalized = relative_path.replace('\\', "/").to_ascii_lowercase();

        let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);
        for entry in &self.extensions_blacklist {
            if (entry.starts_with('.') && file_name.ends_with(entry.as_str()))
                || file_name == entry.as_str()
            {
                return true;
            }
        }

        if SAMPLE_MARKERS.iter().any(|m| normalized.contains(m)) {
            return true;
        }

        size < self.min_file_size
    }
}

struct Candidate {
    relative_path: String,
    absolute_path: PathBuf,
    size: u64,
    mtime: f64,
}

pub struct Scanner<'a> {
    policy: ScanPolicy,
    cache: &'a mut dyn HashCache,
    show_progress: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(policy: ScanPolicy, cache: &'a mut dyn HashCache, show_progress: bool) -> Self {
        Self {
            policy,
            cache,
            show_progress,
        }
    }

    /// Walk `folder`, apply policy, and produce `relative_path -> (hash,
    /// size)` with cache-assisted hashing. Files vanishing between listing
    /// and hashing are logged and skipped.
    pub fn scan_folder(&mut self, folder: &Path) -> Result<FolderScan, OrphanSweepError> {
        info!("Scanning {}", folder.display());

        let candidates = self.collect_candidates(folder)?;
        info!(
            "{} files eligible for hashing in {}",
            candidates.len(),
            folder.display()
        );

        let cached = self.cache.load(folder)?;

        let bar = if self.show_progress {
            let bar = ProgressBar::new(candidates.len() as u64);
            bar.set_style(
                ProgressStyle::with_template(
                    "{bar:40.cyan/blue} {pos}/{len} ({eta}) {wide_msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        let mut files = HashMap::new();
        let mut hashed = 0usize;

        for candidate in candidates {
            bar.set_message(candidate.relative_path.clone());

            let hit = cached.get(&candidate.relative_path).and_then(|entry| {
                if is_cache_hit(entry, candidate.mtime, self.policy.algorithm)
                    && entry.size == candidate.size
                {
                    Some(entry.hash.clone())
                } else {
                    None
                }
            });

            let hash = match hit {
                Some(hash) => hash,
                None => {
                    match Hash::compute(&candidate.absolute_path, self.policy.algorithm, None) {
                        Ok(hash) => {
                            self.cache.upsert(
                                folder,
                                &candidate.relative_path,
                                CacheEntry {
                                    hash: hash.clone(),
                                    algorithm: self.policy.algorithm,
                                    mtime: candidate.mtime,
                                    size: candidate.size,
                                },
                            )?;
                            hashed += 1;
                            hash
                        }
                        Err(OrphanSweepError::IoError(e)) => {
                            warn!(
                                "Skipping {}: {}",
                                candidate.absolute_path.display(),
                                e
                            );
                            bar.inc(1);
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            };

            files.insert(
                candidate.relative_path,
                FileInfo {
                    hash,
                    size: candidate.size,
                },
            );
            bar.inc(1);
        }

        bar.finish_and_clear();
        self.cache.flush()?;

        info!(
            "Scanned {}: {} files ({} newly hashed)",
            folder.display(),
            files.len(),
            hashed
        );
        Ok(FolderScan {
            folder: folder.to_path_buf(),
            files,
        })
    }

    /// First pass: list and stat every file surviving the policy.
    /// Blacklisted top-level subtrees are pruned before descent.
    fn collect_candidates(&self, folder: &Path) -> Result<Vec<Candidate>, OrphanSweepError> {
        let policy = &self.policy;
        let mut candidates = Vec::new();

        let walker = WalkDir::new(folder).into_iter().filter_entry(|entry| {
            if entry.depth() == 1 && entry.file_type().is_dir() {
                let name = entry.file_name().to_string_lossy();
                if policy.is_blacklisted_subfolder(&name) {
                    debug!("Pruning blacklisted subfolder {}", entry.path().display());
                    return false;
                }
            }
            true
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", folder.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy() == JSON_CACHE_FILE {
                continue;
            }

            let relative_path = match entry.path().strip_prefix(folder) {
                Ok(rel) => rel.to_string_lossy().to_string(),
                Err(_) => continue,
            };

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            if policy.excludes(&relative_path, metadata.len()) {
                continue;
            }

            let mtime = match metadata.modified() {
                Ok(mtime) => mtime
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0),
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            candidates.push(Candidate {
                relative_path,
                absolute_path: entry.path().to_path_buf(),
                size: metadata.len(),
                mtime,
            });
        }

        Ok(candidates)
    }
}
