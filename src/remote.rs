use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::OrphanSweepError;

/// Flat view of the remote daemon's torrent table, keyed by relative
/// payload path.
#[derive(Debug, Clone, Default)]
pub struct RemoteListing {
    pub files: HashSet<String>,
    pub labels: HashMap<String, String>,
    pub torrent_ids: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RemoteTorrent {
    pub name: String,
    pub label: String,
    /// Payload paths relative to the remote base folder.
    pub files: Vec<String>,
}

/// Boundary to the remote torrent daemon. `list`/`all_torrents` feed the
/// comparator and the cross-seed grouper; `torrent_exists`/`set_label` are
/// used only by the pending-action executor.
pub trait RemoteLister {
    fn list(&self) -> Result<RemoteListing, OrphanSweepError>;

    fn all_torrents(&self) -> Result<HashMap<String, RemoteTorrent>, OrphanSweepError>;

    fn torrent_exists(&self, torrent_id: &str) -> Result<bool, OrphanSweepError>;

    fn set_label(&mut self, torrent_id: &str, label: &str) -> Result<(), OrphanSweepError>;
}

/// Any remote boundary doubles as the pending-action executor's relabel
/// seam.
impl<T: RemoteLister> crate::actions::Relabeler for T {
    fn torrent_exists(&self, torrent_id: &str) -> Result<bool, OrphanSweepError> {
        RemoteLister::torrent_exists(self, torrent_id)
    }

    fn set_label(&mut self, torrent_id: &str, label: &str) -> Result<(), OrphanSweepError> {
        RemoteLister::set_label(self, torrent_id, label)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotTorrent {
    name: String,
    #[serde(default)]
    label: String,
    files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    torrents: HashMap<String, SnapshotTorrent>,
}

/// `RemoteLister` backed by a JSON export of the daemon's torrent table.
/// The export is produced out of band; label changes are written back into
/// the snapshot file so later runs (and the operator's import tooling) see
/// them.
pub struct SnapshotLister {
    path: PathBuf,
    base_folder: String,
    snapshot: Snapshot,
}

impl SnapshotLister {
    /// An unreadable or malformed snapshot is `RemoteUnavailable`: the run
    /// aborts before any lifecycle mutation rather than treating "no
    /// answer" as "everything is orphaned".
    pub fn load(path: &Path, base_folder: &str) -> Result<Self, OrphanSweepError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            OrphanSweepError::RemoteUnavailable(format!(
                "cannot read snapshot {}: {}",
                path.display(),
                e
            ))
        })?;
        let snapshot: Snapshot = serde_json::from_str(&contents).map_err(|e| {
            OrphanSweepError::RemoteUnavailable(format!(
                "cannot parse snapshot {}: {}",
                path.display(),
                e
            ))
        })?;

        info!(
            "Loaded snapshot {}: {} torrents",
            path.display(),
            snapshot.torrents.len()
        );
        Ok(SnapshotLister {
            path: path.to_path_buf(),
            base_folder: base_folder.trim_end_matches('/').to_string(),
            snapshot,
        })
    }

    /// Normalize a daemon-reported path to a relative path under the base
    /// folder. Paths escaping the base are refused.
    fn normalize(&self, raw: &str) -> Option<String> {
        let mut path = raw.replace('\\', "/");
        if let Some(stripped) = path.strip_prefix(&self.base_folder) {
            path = stripped.to_string();
        }
        let path = path.trim_start_matches('/').to_string();

        if path.split('/').any(|component| component == "..") {
            warn!("Refusing remote path escaping base folder: {}", raw);
            return None;
        }
        if path.is_empty() {
            return None;
        }
        Some(path)
    }

    fn persist(&self) -> Result<(), OrphanSweepError> {
        let json = serde_json::to_string_pretty(&self.snapshot)
            .map_err(|e| OrphanSweepError::Error(format!("Error serializing snapshot: {}", e)))?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl RemoteLister for SnapshotLister {
    fn list(&self) -> Result<RemoteListing, OrphanSweepError> {
        let mut listing = RemoteListing::default();
        for (torrent_id, torrent) in &self.snapshot.torrents {
            for raw in &torrent.files {
                if let Some(path) = self.normalize(raw) {
                    listing.files.insert(path.clone());
                    listing.labels.insert(path.clone(), torrent.label.clone());
                    listing.torrent_ids.insert(path, torrent_id.clone());
                }
            }
        }
        Ok(listing)
    }

    fn all_torrents(&self) -> Result<HashMap<String, RemoteTorrent>, OrphanSweepError> {
        Ok(self
            .snapshot
            .torrents
            .iter()
            .map(|(torrent_id, torrent)| {
                (
                    torrent_id.clone(),
                    RemoteTorrent {
                        name: torrent.name.clone(),
                        label: torrent.label.clone(),
                        files: torrent
                            .files
                            .iter()
                            .filter_map(|raw| self.normalize(raw))
                            .collect(),
                    },
                )
            })
            .collect())
    }

    fn torrent_exists(&self, torrent_id: &str) -> Result<bool, OrphanSweepError> {
        Ok(self.snapshot.torrents.contains_key(torrent_id))
    }

    fn set_label(&mut self, torrent_id: &str, label: &str) -> Result<(), OrphanSweepError> {
        match self.snapshot.torrents.get_mut(torrent_id) {
            Some(torrent) => {
                torrent.label = label.to_string();
                self.persist()
            }
            None => Err(OrphanSweepError::Error(format!(
                "torrent {} not present in snapshot",
                torrent_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as IoWrite;
    use tempfile::NamedTempFile;

    const SNAPSHOT: &str = r#"{
        "torrents": {
            "abc123": {
                "name": "Some.Movie.2020",
                "label": "movies",
                "files": ["/downloads/Some.Movie.2020/movie.mkv"]
            },
            "def456": {
                "name": "escape",
                "label": "othercat",
                "files": ["/downloads/../etc/passwd", "relative/file.mkv"]
            }
        }
    }"#;

    fn lister() -> (NamedTempFile, SnapshotLister) {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(SNAPSHOT.as_bytes()).unwrap();
        let lister = SnapshotLister::load(f.path(), "/downloads").unwrap();
        (f, lister)
    }

    #[test]
    fn test_list_normalizes_against_base() {
        let (_f, lister) = lister();
        let listing = lister.list().unwrap();
        assert!(listing.files.contains("Some.Movie.2020/movie.mkv"));
        assert_eq!(
            listing.labels["Some.Movie.2020/movie.mkv"],
            "movies".to_string()
        );
        assert_eq!(
            listing.torrent_ids["Some.Movie.2020/movie.mkv"],
            "abc123".to_string()
        );
        // Already-relative paths pass through.
        assert!(listing.files.contains("relative/file.mkv"));
        // Escaping paths are refused.
        assert!(!listing.files.iter().any(|p| p.contains("..")));
    }

    #[test]
    fn test_missing_snapshot_is_remote_unavailable() {
        let result = SnapshotLister::load(Path::new("/nonexistent/snapshot.json"), "/downloads");
        assert!(matches!(
            result,
            Err(OrphanSweepError::RemoteUnavailable(_))
        ));
    }

    #[test]
    fn test_malformed_snapshot_is_remote_unavailable() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"not json").unwrap();
        let result = SnapshotLister::load(f.path(), "/downloads");
        assert!(matches!(
            result,
            Err(OrphanSweepError::RemoteUnavailable(_))
        ));
    }

    #[test]
    fn test_set_label_persists() {
        let (f, mut lister) = lister();
        assert!(lister.torrent_exists("abc123").unwrap());
        lister.set_label("abc123", "othercat.cross-seed").unwrap();

        let reloaded = SnapshotLister::load(f.path(), "/downloads").unwrap();
        let torrents = reloaded.all_torrents().unwrap();
        assert_eq!(torrents["abc123"].label, "othercat.cross-seed");
    }

    #[test]
    fn test_set_label_unknown_torrent_fails() {
        let (_f, mut lister) = lister();
        assert!(!lister.torrent_exists("zzz").unwrap());
        assert!(lister.set_label("zzz", "x").is_err());
    }
}
