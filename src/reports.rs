use std::fmt::Write as FmtWrite;
use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::path::PathBuf;

use log::info;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::OrphanSweepError;

/// Outbound boundary for finished reports. Implementations know a
/// destination, nothing about the data model.
pub trait Notifier {
    fn notify(&mut self, report: &str) -> Result<(), OrphanSweepError>;
}

/// Writes the report through the logger, one line at a time.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, report: &str) -> Result<(), OrphanSweepError> {
        for line in report.lines() {
            info!("{}", line);
        }
        Ok(())
    }
}

/// Appends reports to a file.
pub struct FileNotifier {
    path: PathBuf,
}

impl FileNotifier {
    pub fn new(path: PathBuf) -> Self {
        FileNotifier { path }
    }
}

impl Notifier for FileNotifier {
    fn notify(&mut self, report: &str) -> Result<(), OrphanSweepError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", report)?;
        Ok(())
    }
}

struct ReportRow {
    path: String,
    label: Option<String>,
    size_human: String,
    source: String,
    consecutive_scans: i64,
}

const SOURCE_TITLES: [(&str, &str); 3] = [
    ("local_torrent_folder", "Orphaned in torrent folder"),
    ("torrents", "Only in torrents"),
    ("media", "Only in media"),
];

/// Format the latest scan's report. Returns `None` when no scan has run
/// yet. Only active rows flagged for reporting appear.
pub fn latest_scan_report(db: &Database) -> Result<Option<String>, OrphanSweepError> {
    scan_report(db, None)
}

/// Format one scan's report, the latest when `scan_id` is `None`.
pub fn scan_report(db: &Database, scan_id: Option<i64>) -> Result<Option<String>, OrphanSweepError> {
    let header: Option<(i64, String, String, String, String)> = db
        .conn()
        .query_row(
            "SELECT id, host, base_path, scan_start, scan_end
             FROM scan_results
             WHERE id = COALESCE(?, (SELECT MAX(id) FROM scan_results))",
            params![scan_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .optional()?;

    let (scan_id, host, base_path, scan_start, scan_end) = match header {
        Some(header) => header,
        None => return Ok(None),
    };

    let mut rows: Vec<ReportRow> = Vec::new();
    {
        let mut stmt = db.conn().prepare(
            "SELECT of.path, of.label, of.size_human, fsh.source, of.consecutive_scans
             FROM file_scan_history fsh
             JOIN orphaned_files of ON fsh.file_id = of.id
             WHERE fsh.scan_id = ?
               AND of.status = 'active' AND of.include_in_report = 1
             ORDER BY fsh.source, of.size DESC, of.path",
        )?;
        let mapped = stmt.query_map(params![scan_id], |row| {
            Ok(ReportRow {
                path: row.get(0)?,
                label: row.get(1)?,
                size_human: row.get(2)?,
                source: row.get(3)?,
                consecutive_scans: row.get(4)?,
            })
        })?;
        for row in mapped {
            rows.push(row?);
        }
    }

    let mut report = String::new();
    let _ = writeln!(
        report,
        "Scan #{} on {} ({})\n  started  {}\n  finished {}",
        scan_id, host, base_path, scan_start, scan_end
    );

    for (source, title) in SOURCE_TITLES {
        let section: Vec<&ReportRow> = rows.iter().filter(|r| r.source == source).collect();
        let _ = writeln!(report, "\n{} ({} files):", title, section.len());
        for row in &section {
            match &row.label {
                Some(label) if !label.is_empty() => {
                    let _ = writeln!(
                        report,
                        "  {} ({}) [{}] seen {}x",
                        row.path, row.size_human, label, row.consecutive_scans
                    );
                }
                _ => {
                    let _ = writeln!(
                        report,
                        "  {} ({}) seen {}x",
                        row.path, row.size_human, row.consecutive_scans
                    );
                }
            }
        }
    }

    Ok(Some(report))
}

/// Format the `count` most recent scans with per-source counts.
pub fn scan_history(db: &Database, count: usize) -> Result<String, OrphanSweepError> {
    let mut history = String::new();
    let mut stmt = db.conn().prepare(
        "SELECT sr.id, sr.scan_start, sr.scan_end,
                SUM(CASE WHEN fsh.source = 'local_torrent_folder' THEN 1 ELSE 0 END),
                SUM(CASE WHEN fsh.source = 'torrents' THEN 1 ELSE 0 END),
                SUM(CASE WHEN fsh.source = 'media' THEN 1 ELSE 0 END)
         FROM scan_results sr
         LEFT JOIN file_scan_history fsh ON fsh.scan_id = sr.id
         GROUP BY sr.id
         ORDER BY sr.id DESC
         LIMIT ?",
    )?;
    let rows = stmt.query_map(params![count as i64], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
        ))
    })?;

    let _ = writeln!(
        history,
        "{:>6}  {:<19}  {:<19}  {:>8}  {:>8}  {:>6}",
        "scan", "start", "end", "orphaned", "torrents", "media"
    );
    for row in rows {
        let (id, start, end, orphaned, torrents, media) = row?;
        let _ = writeln!(
            history,
            "{:>6}  {:<19}  {:<19}  {:>8}  {:>8}  {:>6}",
            id, start, end, orphaned, torrents, media
        );
    }
    Ok(history)
}

/// Format pending actions for operator review.
pub fn pending_actions_report(db: &Database) -> Result<String, OrphanSweepError> {
    let mut report = String::new();
    let mut stmt = db.conn().prepare(
        "SELECT id, proposed_action, file_path, size_human, current_label,
                action_due_at, status, processing_notes
         FROM pending_actions
         WHERE status IN ('pending', 'ready', 'failed')
         ORDER BY action_due_at",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, Option<String>>(7)?,
        ))
    })?;

    let mut total = 0usize;
    for row in rows {
        let (id, action, path, size_human, label, due_at, status, notes) = row?;
        total += 1;
        let _ = writeln!(
            report,
            "#{} {} {} ({}) label={} due={} status={}{}",
            id,
            action,
            path,
            size_human,
            label.as_deref().unwrap_or("-"),
            due_at,
            status,
            notes.map(|n| format!(" [{}]", n)).unwrap_or_default()
        );
    }
    if total == 0 {
        report.push_str("No open pending actions.\n");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{CompareEntry, CompareOutcome};
    use crate::config::RetentionConfig;
    use crate::orphans::save_scan_results;
    use pretty_assertions::assert_eq;

    fn seeded_db() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        db.ensure_views(
            &RetentionConfig {
                consecutive_scans_threshold: 3,
                days_threshold: 2,
                relabel_delay_days: 1,
            },
            "othercat",
        )
        .unwrap();

        let outcome = CompareOutcome {
            orphaned_in_torrent_folder: vec![CompareEntry {
                path: "orphan.mkv".to_string(),
                hash: "aaaaaaaaaaaaaaaa".to_string(),
                size: 200_000_000,
                label: String::new(),
                torrent_id: None,
            }],
            only_in_torrents: vec![
                CompareEntry {
                    path: "torrent.mkv".to_string(),
                    hash: "bbbbbbbbbbbbbbbb".to_string(),
                    size: 300_000_000,
                    label: "movies".to_string(),
                    torrent_id: Some("t1".to_string()),
                },
                // Tracked but below the reporting floor.
                CompareEntry {
                    path: "small.mkv".to_string(),
                    hash: "cccccccccccccccc".to_string(),
                    size: 5_000_000,
                    label: "movies".to_string(),
                    torrent_id: Some("t2".to_string()),
                },
            ],
            only_in_media: vec![],
        };
        save_scan_results(
            &mut db,
            "host",
            "/t",
            "2026-08-30 10:00:00",
            "2026-08-30 10:05:00",
            &outcome,
        )
        .unwrap();
        db
    }

    #[test]
    fn test_report_empty_database() {
        let db = Database::open_in_memory().unwrap();
        assert!(latest_scan_report(&db).unwrap().is_none());
    }

    #[test]
    fn test_report_includes_flagged_rows_only() {
        let db = seeded_db();
        let report = latest_scan_report(&db).unwrap().unwrap();
        assert!(report.contains("Scan #1"));
        assert!(report.contains("orphan.mkv"));
        assert!(report.contains("torrent.mkv"));
        assert!(report.contains("[movies]"));
        // Below the size floor, excluded from the report.
        assert!(!report.contains("small.mkv"));
    }

    #[test]
    fn test_report_by_explicit_scan_id() {
        let db = seeded_db();
        let by_id = scan_report(&db, Some(1)).unwrap().unwrap();
        let latest = latest_scan_report(&db).unwrap().unwrap();
        assert_eq!(by_id, latest);
        assert!(scan_report(&db, Some(99)).unwrap().is_none());
    }

    #[test]
    fn test_history_counts_per_source() {
        let db = seeded_db();
        let history = scan_history(&db, 10).unwrap();
        let data_line = history.lines().nth(1).unwrap();
        let fields: Vec<&str> = data_line.split_whitespace().collect();
        assert_eq!(fields[0], "1");
        // One orphaned, two torrent-side (reporting floor does not affect
        // history), zero media.
        assert_eq!(fields[3], "1");
        assert_eq!(fields[4], "2");
        assert_eq!(fields[5], "0");
    }

    #[test]
    fn test_file_notifier_appends() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.txt");
        let mut notifier = FileNotifier::new(path.clone());
        notifier.notify("first").unwrap();
        notifier.notify("second").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }
}
