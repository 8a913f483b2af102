use std::collections::HashSet;

use log::{debug, info};
use rusqlite::{params, OptionalExtension, Transaction};

use crate::compare::{CompareEntry, CompareOutcome};
use crate::database::Database;
use crate::error::OrphanSweepError;
use crate::utils::Utils;

/// Which collection a lifecycle row was flagged from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Source {
    LocalTorrentFolder,
    Torrents,
    Media,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::LocalTorrentFolder => "local_torrent_folder",
            Source::Torrents => "torrents",
            Source::Media => "media",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OrphanStatus {
    Active,
    MarkedForDeletion,
    Deleted,
    Inactive,
}

impl OrphanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanStatus::Active => "active",
            OrphanStatus::MarkedForDeletion => "marked_for_deletion",
            OrphanStatus::Deleted => "deleted",
            OrphanStatus::Inactive => "inactive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(OrphanStatus::Active),
            "marked_for_deletion" => Some(OrphanStatus::MarkedForDeletion),
            "deleted" => Some(OrphanStatus::Deleted),
            "inactive" => Some(OrphanStatus::Inactive),
            _ => None,
        }
    }
}

/// Torrent-side results below this size, or carrying an "other"/"soft"
/// label, are tracked but excluded from reports.
const REPORT_SIZE_FLOOR: u64 = 100_000_000;

fn include_in_report(entry: &CompareEntry) -> bool {
    let label = entry.label.to_ascii_lowercase();
    entry.size > REPORT_SIZE_FLOOR && !label.starts_with("other") && !label.starts_with("soft")
}

/// Persist one reconciliation pass into the lifecycle store. Returns the
/// new scan id. Each source category is written in its own transaction; a
/// failure rolls back that category and propagates, so a failed run never
/// leaves history rows without their scan record.
pub fn save_scan_results(
    db: &mut Database,
    host: &str,
    base_path: &str,
    scan_start: &str,
    scan_end: &str,
    outcome: &CompareOutcome,
) -> Result<i64, OrphanSweepError> {
    let now = Utils::now_db_timestamp();

    // First category also owns the scan record: if this transaction fails
    // there is no dangling scan_results row.
    let tx = db.conn_mut().transaction()?;
    tx.execute(
        "INSERT INTO scan_results (host, base_path, scan_start, scan_end) VALUES (?, ?, ?, ?)",
        params![host, base_path, scan_start, scan_end],
    )?;
    let scan_id = tx.last_insert_rowid();

    deactivate_unseen(&tx, &outcome.orphaned_in_torrent_folder)?;
    for entry in &outcome.orphaned_in_torrent_folder {
        let file_id = upsert_entry(&tx, Source::LocalTorrentFolder, entry, &now, true, false)?;
        record_history(&tx, scan_id, file_id, Source::LocalTorrentFolder)?;
    }
    tx.commit()?;

    let tx = db.conn_mut().transaction()?;
    for entry in &outcome.only_in_torrents {
        let file_id = upsert_entry(&tx, Source::Torrents, entry, &now, include_in_report(entry), true)?;
        record_history(&tx, scan_id, file_id, Source::Torrents)?;
    }
    tx.commit()?;

    let tx = db.conn_mut().transaction()?;
    for entry in &outcome.only_in_media {
        let file_id = upsert_entry(&tx, Source::Media, entry, &now, true, false)?;
        record_history(&tx, scan_id, file_id, Source::Media)?;
    }
    tx.commit()?;

    info!(
        "Scan {} recorded: {} orphaned, {} only in torrents, {} only in media",
        scan_id,
        outcome.orphaned_in_torrent_folder.len(),
        outcome.only_in_torrents.len(),
        outcome.only_in_media.len()
    );
    Ok(scan_id)
}

/// Active torrent-folder rows not re-detected this scan go `inactive` with
/// their counters reset. The rows persist so history survives a transient
/// remote hiccup.
fn deactivate_unseen(tx: &Transaction, current: &[CompareEntry]) -> Result<(), OrphanSweepError> {
    let seen: HashSet<&str> = current.iter().map(|e| e.path.as_str()).collect();

    let mut unseen_ids: Vec<i64> = Vec::new();
    {
        let mut stmt = tx.prepare(
            "SELECT id, path FROM orphaned_files
             WHERE source = 'local_torrent_folder' AND status = 'active'",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, path) = row?;
            if !seen.contains(path.as_str()) {
                unseen_ids.push(id);
            }
        }
    }

    for id in &unseen_ids {
        tx.execute(
            "UPDATE orphaned_files
             SET status = 'inactive', consecutive_scans = 0, include_in_report = 0
             WHERE id = ?",
            params![id],
        )?;
    }
    if !unseen_ids.is_empty() {
        debug!("Deactivated {} no-longer-seen orphan rows", unseen_ids.len());
    }
    Ok(())
}

/// Insert or re-detect one lifecycle row. Re-detection increments the
/// consecutive-scan counter and re-activates inactive rows. The torrent id
/// is overwritten for torrent-side rows (the daemon is authoritative) but
/// only backfilled for torrent-folder rows.
fn upsert_entry(
    tx: &Transaction,
    source: Source,
    entry: &CompareEntry,
    now: &str,
    include: bool,
    overwrite_torrent_id: bool,
) -> Result<i64, OrphanSweepError> {
    let label = if entry.label.is_empty() {
        None
    } else {
        Some(entry.label.as_str())
    };
    let size_human = Utils::size_human(entry.size);

    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM orphaned_files WHERE path = ? AND source = ?",
            params![entry.path, source.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            let torrent_id_sql = if overwrite_torrent_id {
                "?"
            } else {
                "COALESCE(torrent_id, ?)"
            };
            tx.execute(
                &format!(
                    "UPDATE orphaned_files
                     SET file_hash = ?, size = ?, size_human = ?, label = ?,
                         torrent_id = {}, last_seen_at = ?,
                         consecutive_scans = consecutive_scans + 1,
                         status = 'active', include_in_report = ?
                     WHERE id = ?",
                    torrent_id_sql
                ),
                params![
                    entry.hash,
                    entry.size as i64,
                    size_human,
                    label,
                    entry.torrent_id,
                    now,
                    include,
                    id
                ],
            )?;
            Ok(id)
        }
        None => {
            tx.execute(
                "INSERT INTO orphaned_files
                 (file_hash, path, source, torrent_id, label, size, size_human,
                  first_seen_at, last_seen_at, consecutive_scans, status, include_in_report)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 'active', ?)",
                params![
                    entry.hash,
                    entry.path,
                    source.as_str(),
                    entry.torrent_id,
                    label,
                    entry.size as i64,
                    size_human,
                    now,
                    now,
                    include
                ],
            )?;
            Ok(tx.last_insert_rowid())
        }
    }
}

fn record_history(
    tx: &Transaction,
    scan_id: i64,
    file_id: i64,
    source: Source,
) -> Result<(), OrphanSweepError> {
    tx.execute(
        "INSERT INTO file_scan_history (scan_id, file_id, source) VALUES (?, ?, ?)",
        params![scan_id, file_id, source.as_str()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, hash: &str, size: u64, label: &str, torrent_id: Option<&str>) -> CompareEntry {
        CompareEntry {
            path: path.to_string(),
            hash: hash.to_string(),
            size,
            label: label.to_string(),
            torrent_id: torrent_id.map(|s| s.to_string()),
        }
    }

    fn outcome_with_orphan(path: &str) -> CompareOutcome {
        CompareOutcome {
            orphaned_in_torrent_folder: vec![entry(path, "aaaaaaaaaaaaaaaa", 200_000_000, "", None)],
            ..Default::default()
        }
    }

    fn save(db: &mut Database, outcome: &CompareOutcome) -> i64 {
        save_scan_results(db, "host", "/t", "2026-08-30 10:00:00", "2026-08-30 10:05:00", outcome)
            .unwrap()
    }

    fn row(db: &Database, path: &str) -> (String, i64, i64) {
        db.conn()
            .query_row(
                "SELECT status, consecutive_scans, include_in_report
                 FROM orphaned_files WHERE path = ?",
                params![path],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap()
    }

    #[test]
    fn test_new_detection_inserts_active_row_with_history() {
        let mut db = Database::open_in_memory().unwrap();
        let scan_id = save(&mut db, &outcome_with_orphan("a.mkv"));
        assert!(scan_id > 0);

        let (status, scans, _) = row(&db, "a.mkv");
        assert_eq!(status, "active");
        assert_eq!(scans, 1);

        let history: i64 = db
            .conn()
            .query_row(
                "SELECT count(*) FROM file_scan_history WHERE scan_id = ?",
                params![scan_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(history, 1);
    }

    #[test]
    fn test_rescan_is_idempotent_and_increments_counter() {
        let mut db = Database::open_in_memory().unwrap();
        let outcome = outcome_with_orphan("a.mkv");
        save(&mut db, &outcome);
        save(&mut db, &outcome);

        let (_, scans, _) = row(&db, "a.mkv");
        assert_eq!(scans, 2);
        let rows: i64 = db
            .conn()
            .query_row("SELECT count(*) FROM orphaned_files", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_absence_deactivates_and_redetection_reactivates() {
        let mut db = Database::open_in_memory().unwrap();
        save(&mut db, &outcome_with_orphan("a.mkv"));

        // Scan with the file gone.
        save(&mut db, &CompareOutcome::default());
        let (status, scans, include) = row(&db, "a.mkv");
        assert_eq!(status, "inactive");
        assert_eq!(scans, 0);
        assert_eq!(include, 0);

        // It comes back: counter restarts at 1.
        save(&mut db, &outcome_with_orphan("a.mkv"));
        let (status, scans, _) = row(&db, "a.mkv");
        assert_eq!(status, "active");
        assert_eq!(scans, 1);
    }

    #[test]
    fn test_torrents_report_heuristic() {
        let mut db = Database::open_in_memory().unwrap();
        let outcome = CompareOutcome {
            only_in_torrents: vec![
                entry("big.mkv", "aaaaaaaaaaaaaaaa", 200_000_000, "movies", Some("t1")),
                entry("small.mkv", "bbbbbbbbbbbbbbbb", 5_000_000, "movies", Some("t2")),
                entry("other.mkv", "cccccccccccccccc", 200_000_000, "othercat", Some("t3")),
                entry("soft.mkv", "dddddddddddddddd", 200_000_000, "software", Some("t4")),
            ],
            ..Default::default()
        };
        save(&mut db, &outcome);

        assert_eq!(row(&db, "big.mkv").2, 1);
        assert_eq!(row(&db, "small.mkv").2, 0);
        assert_eq!(row(&db, "other.mkv").2, 0);
        assert_eq!(row(&db, "soft.mkv").2, 0);
    }

    #[test]
    fn test_torrent_id_backfill_for_torrent_folder_rows() {
        let mut db = Database::open_in_memory().unwrap();
        let mut outcome = outcome_with_orphan("a.mkv");
        save(&mut db, &outcome);

        // A later scan learns the owning torrent.
        outcome.orphaned_in_torrent_folder[0].torrent_id = Some("t9".to_string());
        save(&mut db, &outcome);
        let torrent_id: Option<String> = db
            .conn()
            .query_row(
                "SELECT torrent_id FROM orphaned_files WHERE path = 'a.mkv'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(torrent_id.as_deref(), Some("t9"));

        // But an already-known id is never overwritten for this source.
        outcome.orphaned_in_torrent_folder[0].torrent_id = Some("t10".to_string());
        save(&mut db, &outcome);
        let torrent_id: Option<String> = db
            .conn()
            .query_row(
                "SELECT torrent_id FROM orphaned_files WHERE path = 'a.mkv'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(torrent_id.as_deref(), Some("t9"));
    }
}
