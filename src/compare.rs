use std::collections::{HashMap, HashSet};

use log::info;

use crate::scanner::{FolderScan, ScanPolicy};

/// One file flagged by the comparator. `label` and `torrent_id` are only
/// populated for torrent-side results, where the remote daemon knows the
/// owning torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareEntry {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub label: String,
    pub torrent_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CompareOutcome {
    /// Torrent-folder paths the remote daemon does not account for.
    pub orphaned_in_torrent_folder: Vec<CompareEntry>,
    /// Content present on the torrent side but not mirrored in media.
    pub only_in_torrents: Vec<CompareEntry>,
    /// Content present in media with no torrent-side counterpart.
    pub only_in_media: Vec<CompareEntry>,
}

/// Sort bucket for torrent-side results: labels starting with "other"
/// collapse into a bucket that sorts after everything else.
fn label_bucket(label: &str) -> String {
    let lowered = label.to_ascii_lowercase();
    if lowered.starts_with("other") {
        "a".to_string()
    } else {
        lowered
    }
}

/// Pure three-way reconciliation. Orphan detection is path-based against
/// the remote file set; the torrents/media differences are hash-based so a
/// renamed but content-identical file is never flagged. With no media scan
/// (media check skipped) the hash-diff categories stay empty — a missing
/// side never means "everything mismatches".
pub fn compare(
    remote_files: &HashSet<String>,
    remote_labels: &HashMap<String, String>,
    remote_torrent_ids: &HashMap<String, String>,
    torrent_scan: &FolderScan,
    media_scan: Option<&FolderScan>,
    policy: &ScanPolicy,
) -> CompareOutcome {
    let mut orphaned: Vec<CompareEntry> = torrent_scan
        .files
        .iter()
        .filter(|(path, _)| !remote_files.contains(*path))
        .map(|(path, info)| CompareEntry {
            path: path.clone(),
            hash: info.hash.clone(),
            size: info.size,
            label: remote_labels.get(path).cloned().unwrap_or_default(),
            torrent_id: remote_torrent_ids.get(path).cloned(),
        })
        .collect();
    orphaned.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));

    let media_scan = match media_scan {
        Some(scan) => scan,
        None => {
            info!(
                "Comparison (torrent folder only): {} orphaned in torrent folder",
                orphaned.len()
            );
            return CompareOutcome {
                orphaned_in_torrent_folder: orphaned,
                ..CompareOutcome::default()
            };
        }
    };

    // hash -> representative path, blacklisted subtrees excluded on both
    // sides so one-way collections never count as mismatches.
    let torrent_hashes: HashMap<&str, &str> = torrent_scan
        .files
        .iter()
        .filter(|(path, _)| !policy.under_blacklisted_subfolder(path))
        .map(|(path, info)| (info.hash.as_str(), path.as_str()))
        .collect();
    let media_hashes: HashMap<&str, &str> = media_scan
        .files
        .iter()
        .filter(|(path, _)| !policy.under_blacklisted_subfolder(path))
        .map(|(path, info)| (info.hash.as_str(), path.as_str()))
        .collect();

    let mut only_in_torrents: Vec<CompareEntry> = torrent_hashes
        .iter()
        .filter(|(hash, _)| !media_hashes.contains_key(*hash))
        .map(|(hash, path)| {
            let path = path.to_string();
            CompareEntry {
                hash: hash.to_string(),
                size: torrent_scan.files[&path].size,
                label: remote_labels
                    .get(&path)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                torrent_id: remote_torrent_ids.get(&path).cloned(),
                path,
            }
        })
        .collect();
    only_in_torrents.sort_by(|a, b| {
        label_bucket(&b.label)
            .cmp(&label_bucket(&a.label))
            .then(b.size.cmp(&a.size))
            .then_with(|| a.path.cmp(&b.path))
    });

    let mut only_in_media: Vec<CompareEntry> = media_hashes
        .iter()
        .filter(|(hash, _)| !torrent_hashes.contains_key(*hash))
        .map(|(hash, path)| {
            let path = path.to_string();
            CompareEntry {
                hash: hash.to_string(),
                size: media_scan.files[&path].size,
                label: String::new(),
                torrent_id: None,
                path,
            }
        })
        .collect();
    only_in_media.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));

    info!(
        "Comparison: {} orphaned in torrent folder, {} only in torrents, {} only in media",
        orphaned.len(),
        only_in_torrents.len(),
        only_in_media.len()
    );

    CompareOutcome {
        orphaned_in_torrent_folder: orphaned,
        only_in_torrents,
        only_in_media,
    }
}
