use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use rusqlite::params;

use crate::config::RetentionConfig;
use crate::database::Database;
use crate::error::OrphanSweepError;
use crate::utils::Utils;

/// The retention decision itself, kept pure for testing: a torrent-folder
/// orphan is eligible once it has survived enough consecutive scans AND
/// been tracked long enough in wall-clock days.
pub fn is_eligible(consecutive_scans: u32, days_seen: f64, retention: &RetentionConfig) -> bool {
    consecutive_scans >= retention.consecutive_scans_threshold
        && days_seen >= retention.days_threshold as f64
}

#[derive(Debug, Clone)]
pub struct EligibleFile {
    pub file_id: i64,
    pub path: String,
    pub size_human: String,
}

#[derive(Debug, Default)]
pub struct DeletionSummary {
    pub deleted: Vec<String>,
    pub already_missing: Vec<String>,
    pub refused: Vec<String>,
}

/// Dry-run mode: transition newly eligible rows `active ->
/// marked_for_deletion`. Nothing touches the disk. Requires the derived
/// views to be in place.
pub fn mark_eligible(db: &Database) -> Result<Vec<EligibleFile>, OrphanSweepError> {
    let mut eligible = Vec::new();
    {
        let mut stmt = db.conn().prepare(
            "SELECT file_id, file_path, file_size FROM view_files_eligible_for_deletion",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EligibleFile {
                file_id: row.get(0)?,
                path: row.get(1)?,
                size_human: row.get(2)?,
            })
        })?;
        for row in rows {
            eligible.push(row?);
        }
    }

    for file in &eligible {
        db.conn().execute(
            "UPDATE orphaned_files SET status = 'marked_for_deletion'
             WHERE id = ? AND status = 'active'",
            params![file.file_id],
        )?;
        info!("Marked for deletion: {} ({})", file.path, file.size_human);
    }
    Ok(eligible)
}

/// Force mode: delete every currently-active torrent-folder orphan from
/// disk and transition it to `deleted`. A file already gone is treated as
/// resolved. A path resolving outside the base folder is refused and its
/// row left untouched.
pub fn delete_active(db: &Database, base_folder: &Path) -> Result<DeletionSummary, OrphanSweepError> {
    let base = fs::canonicalize(base_folder)?;
    let now = Utils::now_db_timestamp();
    let mut summary = DeletionSummary::default();

    let mut rows: Vec<(i64, String)> = Vec::new();
    {
        let mut stmt = db.conn().prepare(
            "SELECT id, path FROM orphaned_files
             WHERE source = 'local_torrent_folder' AND status = 'active'",
        )?;
        let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        for row in mapped {
            rows.push(row?);
        }
    }

    for (file_id, rel_path) in rows {
        let target = base.join(rel_path.trim_start_matches('/'));
        match resolve_within(&base, &target) {
            Ok(Some(resolved)) => {
                if let Err(e) = fs::remove_file(&resolved) {
                    warn!("Could not delete {}: {}", resolved.display(), e);
                    continue;
                }
                info!("Deleted {}", resolved.display());
                summary.deleted.push(rel_path.clone());
            }
            Ok(None) => {
                // Already gone; resolved from our point of view.
                summary.already_missing.push(rel_path.clone());
            }
            Err(e) => {
                error!("Refusing to delete {}: {}", rel_path, e);
                summary.refused.push(rel_path);
                continue;
            }
        }

        db.conn().execute(
            "UPDATE orphaned_files SET status = 'deleted', deletion_date = ? WHERE id = ?",
            params![now, file_id],
        )?;
    }

    info!(
        "Force deletion: {} deleted, {} already missing, {} refused",
        summary.deleted.len(),
        summary.already_missing.len(),
        summary.refused.len()
    );
    Ok(summary)
}

/// Confine a deletion target to the base folder. Returns the canonical
/// path, `None` if the file no longer exists, or an error if the path
/// escapes the base.
pub(crate) fn resolve_within(
    base: &Path,
    target: &Path,
) -> Result<Option<PathBuf>, OrphanSweepError> {
    match fs::canonicalize(target) {
        Ok(resolved) => {
            if resolved.starts_with(base) {
                Ok(Some(resolved))
            } else {
                Err(OrphanSweepError::PathOutsideBase(resolved))
            }
        }
        Err(_) => {
            // Missing file: still reject lexical traversal outside base.
            if target
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
            {
                Err(OrphanSweepError::PathOutsideBase(target.to_path_buf()))
            } else {
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionConfig;
    use tempfile::TempDir;

    fn retention(scans: u32, days: i64) -> RetentionConfig {
        RetentionConfig {
            consecutive_scans_threshold: scans,
            days_threshold: days,
            relabel_delay_days: 1,
        }
    }

    fn insert_orphan(db: &Database, path: &str, scans: u32, first: &str, last: &str) {
        db.conn()
            .execute(
                "INSERT INTO orphaned_files
                 (file_hash, path, source, size, size_human, first_seen_at, last_seen_at,
                  consecutive_scans, status, include_in_report)
                 VALUES ('aaaaaaaaaaaaaaaa', ?, 'local_torrent_folder', 100, '0.00 MB', ?, ?, ?, 'active', 1)",
                params![path, first, last, scans],
            )
            .unwrap();
    }

    #[test]
    fn test_eligibility_boundary() {
        let r = retention(3, 2);
        assert!(!is_eligible(2, 10.0, &r));
        assert!(!is_eligible(3, 1.9, &r));
        assert!(is_eligible(3, 2.0, &r));
        assert!(is_eligible(4, 5.0, &r));
    }

    #[test]
    fn test_three_daily_scans_example() {
        // daysThreshold=2, consecutiveScansThreshold=3, one scan per day.
        let r = retention(3, 2);
        assert!(!is_eligible(1, 0.0, &r));
        assert!(!is_eligible(2, 1.0, &r));
        assert!(is_eligible(3, 2.0, &r));
    }

    #[test]
    fn test_mark_eligible_transitions_only_qualified_rows() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_views(&retention(3, 2), "othercat").unwrap();

        insert_orphan(&db, "old.mkv", 5, "2026-08-20 00:00:00", "2026-08-28 00:00:00");
        insert_orphan(&db, "young.mkv", 2, "2026-08-27 00:00:00", "2026-08-28 00:00:00");

        let eligible = mark_eligible(&db).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].path, "old.mkv");

        let status: String = db
            .conn()
            .query_row(
                "SELECT status FROM orphaned_files WHERE path = 'old.mkv'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(status, "marked_for_deletion");
        let status: String = db
            .conn()
            .query_row(
                "SELECT status FROM orphaned_files WHERE path = 'young.mkv'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(status, "active");
    }

    #[test]
    fn test_force_deletes_missing_marks_and_refuses_escapes() {
        let db = Database::open_in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("present.mkv"), b"data").unwrap();

        insert_orphan(&db, "present.mkv", 1, "2026-08-28 00:00:00", "2026-08-28 00:00:00");
        insert_orphan(&db, "gone.mkv", 1, "2026-08-28 00:00:00", "2026-08-28 00:00:00");
        insert_orphan(&db, "../escape.mkv", 1, "2026-08-28 00:00:00", "2026-08-28 00:00:00");

        let summary = delete_active(&db, dir.path()).unwrap();
        assert_eq!(summary.deleted, vec!["present.mkv".to_string()]);
        assert_eq!(summary.already_missing, vec!["gone.mkv".to_string()]);
        assert_eq!(summary.refused, vec!["../escape.mkv".to_string()]);

        assert!(!dir.path().join("present.mkv").exists());

        let count_deleted: i64 = db
            .conn()
            .query_row(
                "SELECT count(*) FROM orphaned_files WHERE status = 'deleted' AND deletion_date IS NOT NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count_deleted, 2);

        // Escaping row is left untouched for operator review.
        let status: String = db
            .conn()
            .query_row(
                "SELECT status FROM orphaned_files WHERE path = '../escape.mkv'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(status, "active");
    }
}
