use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::OrphanSweepError;
use crate::retention::resolve_within;
use crate::utils::{Utils, DB_TIMESTAMP_FORMAT};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ActionType {
    Delete,
    Relabel,
    ManualReview,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Delete => "delete",
            ActionType::Relabel => "relabel",
            ActionType::ManualReview => "manual_review",
        }
    }

    /// Parse an action name, accepting spellings older rows were written
    /// with.
    pub fn normalize(s: &str) -> Option<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "delete" | "remove" | "purge" => Some(ActionType::Delete),
            "manual_review" | "manual review" | "review" => Some(ActionType::ManualReview),
            _ if lowered.starts_with("relabel") || lowered.starts_with("label") => {
                Some(ActionType::Relabel)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Pending,
    Ready,
    Completed,
    Cancelled,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Ready => "ready",
            ActionStatus::Completed => "completed",
            ActionStatus::Cancelled => "cancelled",
            ActionStatus::Failed => "failed",
        }
    }
}

/// Executor seam for relabeling; implemented by the remote boundary, faked
/// in tests.
pub trait Relabeler {
    fn torrent_exists(&self, torrent_id: &str) -> Result<bool, OrphanSweepError>;
    fn set_label(&mut self, torrent_id: &str, label: &str) -> Result<(), OrphanSweepError>;
}

/// Executor seam for disk deletion.
pub trait Deleter {
    fn delete(&mut self, file_path: &str) -> Result<(), OrphanSweepError>;
}

/// `Deleter` confined to a base folder; refuses anything resolving
/// outside it.
pub struct FsDeleter {
    base: PathBuf,
}

impl FsDeleter {
    pub fn new(base_folder: &Path) -> Result<Self, OrphanSweepError> {
        Ok(FsDeleter {
            base: fs::canonicalize(base_folder)?,
        })
    }
}

impl Deleter for FsDeleter {
    fn delete(&mut self, file_path: &str) -> Result<(), OrphanSweepError> {
        let target = self.base.join(file_path.trim_start_matches('/'));
        match resolve_within(&self.base, &target)? {
            Some(resolved) => {
                fs::remove_file(&resolved)?;
                Ok(())
            }
            // Already gone counts as done.
            None => Ok(()),
        }
    }
}

pub struct NewAction<'a> {
    pub file_path: &'a str,
    pub action: ActionType,
    /// Free text; for relabel, the target label.
    pub action_details: Option<&'a str>,
    pub torrent_id: Option<&'a str>,
    pub current_label: Option<&'a str>,
    pub source: Option<&'a str>,
    pub file_size: Option<u64>,
    pub orphaned_file_id: Option<i64>,
    pub scan_id: i64,
    pub wait_days: i64,
}

/// Register a deferred action, or return the id of an equivalent open one
/// (pending or failed-awaiting-retry). Dedup key is `(file_path,
/// proposed_action, torrent_id)`; an open row whose torrent id was unknown
/// is adopted and backfilled rather than duplicated. Only previously-unset
/// fields are patched.
pub fn register(
    db: &Database,
    new: &NewAction,
    now: DateTime<Utc>,
) -> Result<i64, OrphanSweepError> {
    let existing: Option<(i64, Option<String>)> = db
        .conn()
        .query_row(
            "SELECT id, torrent_id FROM pending_actions
             WHERE file_path = ?1 AND proposed_action = ?2
               AND status IN ('pending', 'failed')
               AND (torrent_id IS ?3 OR torrent_id IS NULL)
             ORDER BY (torrent_id IS ?3) DESC
             LIMIT 1",
            params![new.file_path, new.action.as_str(), new.torrent_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    if let Some((id, existing_torrent_id)) = existing {
        db.conn().execute(
            "UPDATE pending_actions
             SET torrent_id = COALESCE(torrent_id, ?),
                 current_label = COALESCE(current_label, ?),
                 file_size = COALESCE(file_size, ?),
                 source = COALESCE(source, ?),
                 orphaned_file_id = COALESCE(orphaned_file_id, ?),
                 size_human = CASE WHEN size_human = '' THEN ? ELSE size_human END
             WHERE id = ?",
            params![
                new.torrent_id,
                new.current_label,
                new.file_size.map(|s| s as i64),
                new.source,
                new.orphaned_file_id,
                new.file_size.map(Utils::size_human).unwrap_or_default(),
                id
            ],
        )?;
        if existing_torrent_id.is_none() && new.torrent_id.is_some() {
            info!(
                "Adopted pending action {} for {} (torrent id backfilled)",
                id, new.file_path
            );
        }
        return Ok(id);
    }

    let due_at = (now + Duration::days(new.wait_days))
        .format(DB_TIMESTAMP_FORMAT)
        .to_string();
    db.conn().execute(
        "INSERT INTO pending_actions
         (orphaned_file_id, torrent_id, file_path, current_label, proposed_action,
          action_details, size_human, source, file_size, scan_id_identified,
          identified_at, action_due_at, status)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            new.orphaned_file_id,
            new.torrent_id,
            new.file_path,
            new.current_label,
            new.action.as_str(),
            new.action_details,
            new.file_size.map(Utils::size_human).unwrap_or_default(),
            new.source,
            new.file_size.map(|s| s as i64),
            new.scan_id,
            now.format(DB_TIMESTAMP_FORMAT).to_string(),
            due_at,
            ActionStatus::Pending.as_str(),
        ],
    )?;
    let id = db.conn().last_insert_rowid();
    info!(
        "Registered {} action {} for {} (due {})",
        new.action.as_str(),
        id,
        new.file_path,
        due_at
    );
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct PendingAction {
    pub id: i64,
    pub file_path: String,
    pub proposed_action: String,
    pub action_details: Option<String>,
    pub torrent_id: Option<String>,
    pub action_due_at: String,
}

/// All actions whose due date has passed, oldest first. Rows whose last
/// attempt failed are picked up again alongside fresh pending ones.
pub fn due_actions(db: &Database, now: DateTime<Utc>) -> Result<Vec<PendingAction>, OrphanSweepError> {
    let mut actions = Vec::new();
    let mut stmt = db.conn().prepare(
        "SELECT id, file_path, proposed_action, action_details, torrent_id, action_due_at
         FROM pending_actions
         WHERE status IN ('pending', 'failed') AND action_due_at <= ?
         ORDER BY action_due_at",
    )?;
    let rows = stmt.query_map(
        params![now.format(DB_TIMESTAMP_FORMAT).to_string()],
        |row| {
            Ok(PendingAction {
                id: row.get(0)?,
                file_path: row.get(1)?,
                proposed_action: row.get(2)?,
                action_details: row.get(3)?,
                torrent_id: row.get(4)?,
                action_due_at: row.get(5)?,
            })
        },
    )?;
    for row in rows {
        actions.push(row?);
    }
    Ok(actions)
}

#[derive(Debug, Default, PartialEq)]
pub struct ExecutionSummary {
    pub completed: usize,
    pub cancelled: usize,
    pub retried: usize,
    pub previewed: usize,
}

/// Run every due action through its executor. `dry_run` previews without
/// any mutation or status change. Transient failures mark the row `failed`
/// and it is re-attempted at the next due-check; a relabel whose torrent
/// vanished is `cancelled` rather than retried forever.
pub fn execute_due(
    db: &Database,
    relabeler: &mut dyn Relabeler,
    deleter: &mut dyn Deleter,
    scan_id: i64,
    dry_run: bool,
    now: DateTime<Utc>,
) -> Result<ExecutionSummary, OrphanSweepError> {
    let mut summary = ExecutionSummary::default();

    for action in due_actions(db, now)? {
        let action_type = match ActionType::normalize(&action.proposed_action) {
            Some(action_type) => action_type,
            None => {
                warn!(
                    "Unknown action '{}' on row {}; leaving for review",
                    action.proposed_action, action.id
                );
                continue;
            }
        };

        if dry_run {
            info!(
                "[dry run] would {} {} (due {})",
                action_type.as_str(),
                action.file_path,
                action.action_due_at
            );
            summary.previewed += 1;
            continue;
        }

        set_status(db, action.id, ActionStatus::Ready, None, None, None)?;

        match action_type {
            ActionType::Delete => match deleter.delete(&action.file_path) {
                Ok(()) => {
                    finish(db, &mut summary, action.id, scan_id, now, None)?;
                }
                Err(e) => {
                    retry(db, &mut summary, action.id, &format!("delete failed: {}", e))?;
                }
            },
            ActionType::Relabel => {
                // A transient daemon error must not strand the row at
                // 'ready'; push it back to 'pending' like any other failure.
                let exists = match &action.torrent_id {
                    Some(torrent_id) => match relabeler.torrent_exists(torrent_id) {
                        Ok(exists) => exists,
                        Err(e) => {
                            retry(db, &mut summary, action.id, &format!("relabel failed: {}", e))?;
                            continue;
                        }
                    },
                    None => false,
                };
                if !exists {
                    set_status(
                        db,
                        action.id,
                        ActionStatus::Cancelled,
                        Some("Torrent no longer exists"),
                        Some(scan_id),
                        Some(now),
                    )?;
                    summary.cancelled += 1;
                    continue;
                }
                let torrent_id = action.torrent_id.as_deref().unwrap_or_default();
                let target = action.action_details.as_deref().unwrap_or_default();
                match relabeler.set_label(torrent_id, target) {
                    Ok(()) => {
                        finish(db, &mut summary, action.id, scan_id, now, None)?;
                    }
                    Err(e) => {
                        retry(db, &mut summary, action.id, &format!("relabel failed: {}", e))?;
                    }
                }
            }
            // Exists only to surface in reports; nothing to automate.
            ActionType::ManualReview => {
                finish(
                    db,
                    &mut summary,
                    action.id,
                    scan_id,
                    now,
                    Some("surfaced for manual review"),
                )?;
            }
        }
    }

    Ok(summary)
}

fn finish(
    db: &Database,
    summary: &mut ExecutionSummary,
    action_id: i64,
    scan_id: i64,
    now: DateTime<Utc>,
    note: Option<&str>,
) -> Result<(), OrphanSweepError> {
    set_status(db, action_id, ActionStatus::Completed, note, Some(scan_id), Some(now))?;
    summary.completed += 1;
    Ok(())
}

fn retry(
    db: &Database,
    summary: &mut ExecutionSummary,
    action_id: i64,
    note: &str,
) -> Result<(), OrphanSweepError> {
    warn!("Action {}: {}; will retry", action_id, note);
    set_status(db, action_id, ActionStatus::Failed, Some(note), None, None)?;
    summary.retried += 1;
    Ok(())
}

fn set_status(
    db: &Database,
    action_id: i64,
    status: ActionStatus,
    note: Option<&str>,
    scan_id_processed: Option<i64>,
    processed_at: Option<DateTime<Utc>>,
) -> Result<(), OrphanSweepError> {
    db.conn().execute(
        "UPDATE pending_actions
         SET status = ?,
             processing_notes = COALESCE(?, processing_notes),
             scan_id_processed = COALESCE(?, scan_id_processed),
             processed_at = COALESCE(?, processed_at)
         WHERE id = ?",
        params![
            status.as_str(),
            note,
            scan_id_processed,
            processed_at.map(|t| t.format(DB_TIMESTAMP_FORMAT).to_string()),
            action_id
        ],
    )?;
    Ok(())
}
