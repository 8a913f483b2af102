use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::info;

use crate::actions::{self, ActionType, NewAction};
use crate::database::Database;
use crate::error::OrphanSweepError;
use crate::remote::RemoteTorrent;

const CROSS_SEED_MARKER: &str = "cross-seed";

/// Normalized content key: parent-directory name plus filename stem,
/// extension-insensitive. Two torrents whose payloads collapse to the
/// same key are assumed to carry the same content.
pub fn content_key(path: &str) -> String {
    let normalized = path.replace('\\', "/").to_ascii_lowercase();
    let mut parts = normalized.rsplitn(2, '/');
    let file_name = parts.next().unwrap_or("");
    let parent = parts
        .next()
        .map(|p| p.rsplit('/').next().unwrap_or(p))
        .unwrap_or("");
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    format!("{}/{}", parent, stem)
}

/// One torrents-source orphan from the latest scan with no target label
/// yet; read from the autoremove-candidates projection.
#[derive(Debug, Clone)]
pub struct AutoremoveCandidate {
    pub file_id: i64,
    pub file_path: String,
    pub current_label: Option<String>,
    pub torrent_id: String,
    pub file_size: i64,
    pub size_human: String,
}

pub fn autoremove_candidates(db: &Database) -> Result<Vec<AutoremoveCandidate>, OrphanSweepError> {
    let mut candidates = Vec::new();
    let mut stmt = db.conn().prepare(
        "SELECT file_id, file_path, current_label, torrent_id, file_size, size_human
         FROM vw_autoremove_candidates_latest_scan",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(AutoremoveCandidate {
            file_id: row.get(0)?,
            file_path: row.get(1)?,
            current_label: row.get(2)?,
            torrent_id: row.get(3)?,
            file_size: row.get(4)?,
            size_human: row.get(5)?,
        })
    })?;
    for row in rows {
        candidates.push(row?);
    }
    Ok(candidates)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRelabel {
    pub torrent_id: String,
    pub file_path: String,
    pub current_label: String,
    /// True when this torrent was pulled in as a cross-seed sibling
    /// rather than being a candidate itself.
    pub cross_seed_sibling: bool,
}

/// Decide which torrents need relabeling. Every candidate's own torrent is
/// planned; when the candidate's content key groups with other live
/// torrents (or any member already carries a cross-seed marker), the whole
/// group is planned so no mislabeled sibling can re-acquire deleted
/// content later.
pub fn plan_relabels(
    candidates: &[AutoremoveCandidate],
    torrents: &HashMap<String, RemoteTorrent>,
) -> Vec<PlannedRelabel> {
    // content key -> torrent id -> a representative payload path
    let mut by_key: HashMap<String, HashMap<&str, &str>> = HashMap::new();
    for (torrent_id, torrent) in torrents {
        for file in &torrent.files {
            by_key
                .entry(content_key(file))
                .or_default()
                .insert(torrent_id.as_str(), file.as_str());
        }
    }

    let mut planned: Vec<PlannedRelabel> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for candidate in candidates {
        if seen.insert(candidate.torrent_id.clone()) {
            planned.push(PlannedRelabel {
                torrent_id: candidate.torrent_id.clone(),
                file_path: candidate.file_path.clone(),
                current_label: candidate.current_label.clone().unwrap_or_default(),
                cross_seed_sibling: false,
            });
        }

        let key = content_key(&candidate.file_path);
        let group = match by_key.get(&key) {
            Some(group) => group,
            None => continue,
        };

        let has_cross_seeds = group.len() > 1
            || group.keys().any(|torrent_id| {
                torrents
                    .get(*torrent_id)
                    .map(|t| t.label.to_ascii_lowercase().contains(CROSS_SEED_MARKER))
                    .unwrap_or(false)
            });
        if !has_cross_seeds {
            continue;
        }

        for (torrent_id, file_path) in group {
            if *torrent_id == candidate.torrent_id || !seen.insert(torrent_id.to_string()) {
                continue;
            }
            let label = torrents
                .get(*torrent_id)
                .map(|t| t.label.clone())
                .unwrap_or_default();
            planned.push(PlannedRelabel {
                torrent_id: torrent_id.to_string(),
                file_path: file_path.to_string(),
                current_label: label,
                cross_seed_sibling: true,
            });
        }
    }

    planned
}

/// Register a deferred relabel for every planned torrent. Returns the
/// number of distinct pending actions after dedup.
pub fn register_relabels(
    db: &Database,
    planned: &[PlannedRelabel],
    target_label: &str,
    wait_days: i64,
    scan_id: i64,
    now: DateTime<Utc>,
) -> Result<usize, OrphanSweepError> {
    let mut ids = HashSet::new();
    for relabel in planned {
        let id = actions::register(
            db,
            &NewAction {
                file_path: &relabel.file_path,
                action: ActionType::Relabel,
                action_details: Some(target_label),
                torrent_id: Some(&relabel.torrent_id),
                current_label: if relabel.current_label.is_empty() {
                    None
                } else {
                    Some(&relabel.current_label)
                },
                source: Some("torrents"),
                file_size: None,
                orphaned_file_id: None,
                scan_id,
                wait_days,
            },
            now,
        )?;
        ids.insert(id);
    }
    info!(
        "Cross-seed planning: {} torrents -> {} pending relabels",
        planned.len(),
        ids.len()
    );
    Ok(ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent(name: &str, label: &str, files: &[&str]) -> RemoteTorrent {
        RemoteTorrent {
            name: name.to_string(),
            label: label.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn candidate(path: &str, torrent_id: &str, label: &str) -> AutoremoveCandidate {
        AutoremoveCandidate {
            file_id: 1,
            file_path: path.to_string(),
            current_label: Some(label.to_string()),
            torrent_id: torrent_id.to_string(),
            file_size: 200_000_000,
            size_human: "190.73 MB".to_string(),
        }
    }

    #[test]
    fn test_content_key_is_extension_insensitive() {
        assert_eq!(content_key("Some.Movie/Some.Movie.mkv"), "some.movie/some.movie");
        assert_eq!(content_key("Some.Movie/Some.Movie.mp4"), "some.movie/some.movie");
        assert_eq!(content_key("a/b/Some.Movie/file.mkv"), "some.movie/file");
        assert_eq!(content_key("bare.mkv"), "/bare");
    }

    #[test]
    fn test_identical_content_groups_siblings() {
        let mut torrents = HashMap::new();
        torrents.insert("t1".to_string(), torrent("m", "movies", &["Movie/Movie.mkv"]));
        torrents.insert("t2".to_string(), torrent("m", "seeds", &["Movie/Movie.mkv"]));

        let planned = plan_relabels(&[candidate("Movie/Movie.mkv", "t1", "movies")], &torrents);
        assert_eq!(planned.len(), 2);
        let sibling = planned.iter().find(|p| p.torrent_id == "t2").unwrap();
        assert!(sibling.cross_seed_sibling);
        assert!(!planned.iter().find(|p| p.torrent_id == "t1").unwrap().cross_seed_sibling);
    }

    #[test]
    fn test_cross_seed_label_flags_single_member_group() {
        // Only one torrent holds the content, but its label already carries
        // the cross-seed marker: still a flagged group.
        let mut torrents = HashMap::new();
        torrents.insert(
            "t1".to_string(),
            torrent("m", "foo.cross-seed", &["Movie/Movie.mkv"]),
        );

        let planned = plan_relabels(&[candidate("Movie/Movie.mkv", "t1", "foo.cross-seed")], &torrents);
        // Its own relabel is planned; the flag changes nothing else here
        // since there are no siblings.
        assert_eq!(planned.len(), 1);
    }

    #[test]
    fn test_unrelated_content_is_not_grouped() {
        let mut torrents = HashMap::new();
        torrents.insert("t1".to_string(), torrent("m", "movies", &["Movie/Movie.mkv"]));
        torrents.insert("t2".to_string(), torrent("x", "movies", &["Other/Other.mkv"]));

        let planned = plan_relabels(&[candidate("Movie/Movie.mkv", "t1", "movies")], &torrents);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].torrent_id, "t1");
    }

    #[test]
    fn test_register_relabels_dedupes() {
        let db = Database::open_in_memory().unwrap();
        let planned = vec![
            PlannedRelabel {
                torrent_id: "t1".to_string(),
                file_path: "Movie/Movie.mkv".to_string(),
                current_label: "movies".to_string(),
                cross_seed_sibling: false,
            };
            2
        ];
        let now = Utc::now();
        let registered = register_relabels(&db, &planned, "othercat", 7, 1, now).unwrap();
        assert_eq!(registered, 1);
    }
}
