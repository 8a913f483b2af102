use rusqlite::Connection;
use std::path::Path;

use log::{debug, info};

use crate::config::RetentionConfig;
use crate::error::OrphanSweepError;
use crate::schema::{CREATE_SCHEMA_SQL, MIGRATIONS, SCHEMA_VERSION};

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database and bring the schema up to the
    /// current version. Migration failure is fatal for the whole run.
    pub fn connect(db_path: &Path) -> Result<Self, OrphanSweepError> {
        let conn = Connection::open(db_path)?;
        debug!("Database opened at: {}", db_path.display());

        let mut db = Self { conn };
        db.ensure_schema()?;

        Ok(db)
    }

    /// In-memory database with the full schema, for tests.
    pub fn open_in_memory() -> Result<Self, OrphanSweepError> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.ensure_schema()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn ensure_schema(&mut self) -> Result<(), OrphanSweepError> {
        let meta_exists: bool = self
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='meta'",
                [],
                |row| row.get::<_, i32>(0),
            )
            .map(|count| count > 0)
            .unwrap_or(false);

        if !meta_exists {
            self.conn.execute_batch(CREATE_SCHEMA_SQL)?;
            debug!("Created schema at version {}", SCHEMA_VERSION);
            return Ok(());
        }

        let stored_version: u32 = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .ok()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| OrphanSweepError::Error("Schema version missing".to_string()))?;

        if stored_version > SCHEMA_VERSION {
            return Err(OrphanSweepError::Error(format!(
                "Database schema version {} is newer than this binary supports ({})",
                stored_version, SCHEMA_VERSION
            )));
        }
        // Version 1 is the oldest schema ever shipped; anything lower is a
        // corrupted meta row, not a migratable database.
        if stored_version < 1 {
            return Err(OrphanSweepError::Error(format!(
                "Database schema version {} is not recognized",
                stored_version
            )));
        }

        for version in stored_version..SCHEMA_VERSION {
            let migration = MIGRATIONS[(version - 1) as usize];
            info!("Upgrading schema from version {} to {}", version, version + 1);

            let tx = self.conn.transaction()?;
            if let Some(pre_sql) = migration.pre_sql {
                tx.execute_batch(pre_sql)?;
            }
            if let Some(code_fn) = migration.code_fn {
                code_fn(&tx)?;
            }
            if let Some(post_sql) = migration.post_sql {
                tx.execute_batch(post_sql)?;
            }
            tx.commit()?;
        }

        Ok(())
    }

    /// Recreate the derived read-only projections. Thresholds come from
    /// validated configuration, so interpolation here is safe; SQLite does
    /// not accept parameters in view definitions.
    pub fn ensure_views(
        &self,
        retention: &RetentionConfig,
        autoremove_label: &str,
    ) -> Result<(), OrphanSweepError> {
        self.conn
            .execute_batch("DROP VIEW IF EXISTS vw_latest_scan_report;")?;
        self.conn.execute_batch(
            r#"
            CREATE VIEW vw_latest_scan_report AS
            SELECT
                sr.id AS scan_id,
                sr.host AS scan_host,
                sr.base_path AS scan_base_path,
                sr.scan_start,
                sr.scan_end,
                of.id AS file_id,
                of.path AS file_path,
                of.label AS file_label,
                of.size AS file_size,
                of.size_human AS file_size_human,
                fsh.source AS scan_context_file_source,
                of.status AS file_status,
                of.consecutive_scans AS file_consecutive_scans,
                of.include_in_report,
                of.file_hash
            FROM scan_results sr
            JOIN file_scan_history fsh ON sr.id = fsh.scan_id
            JOIN orphaned_files of ON fsh.file_id = of.id
            WHERE sr.id = (SELECT MAX(id) FROM scan_results);
            "#,
        )?;

        self.conn
            .execute_batch("DROP VIEW IF EXISTS view_files_eligible_for_deletion;")?;
        self.conn.execute_batch(&format!(
            r#"
            CREATE VIEW view_files_eligible_for_deletion AS
            SELECT
                of.id AS file_id,
                of.path AS file_path,
                of.size_human AS file_size,
                of.first_seen_at,
                of.last_seen_at,
                of.consecutive_scans,
                julianday(of.last_seen_at) - julianday(of.first_seen_at) AS days_seen_difference
            FROM orphaned_files of
            WHERE
                of.source = 'local_torrent_folder'
                AND of.status = 'active'
                AND of.consecutive_scans >= {}
                AND (julianday(of.last_seen_at) - julianday(of.first_seen_at)) >= {};
            "#,
            retention.consecutive_scans_threshold, retention.days_threshold
        ))?;

        self.conn
            .execute_batch("DROP VIEW IF EXISTS vw_autoremove_candidates_latest_scan;")?;
        self.conn.execute_batch(&format!(
            r#"
            CREATE VIEW vw_autoremove_candidates_latest_scan AS
            SELECT
                of.id AS file_id,
                of.path AS file_path,
                of.label AS current_label,
                of.torrent_id,
                of.size AS file_size,
                of.size_human
            FROM orphaned_files of
            JOIN file_scan_history fsh ON of.id = fsh.file_id
            JOIN scan_results sr ON fsh.scan_id = sr.id
            WHERE
                sr.id = (SELECT MAX(id) FROM scan_results)
                AND of.source = 'torrents'
                AND of.status = 'active'
                AND of.torrent_id IS NOT NULL
                AND (
                    of.label IS NULL
                    OR NOT INSTR(LOWER(of.label), '{}') > 0
                );
            "#,
            autoremove_label.to_ascii_lowercase().replace('\'', "''")
        ))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn retention() -> RetentionConfig {
        RetentionConfig {
            consecutive_scans_threshold: 3,
            days_threshold: 2,
            relabel_delay_days: 1,
        }
    }

    #[test]
    fn test_fresh_schema_is_current_version() {
        let db = Database::open_in_memory().unwrap();
        let version: String = db
            .conn()
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
    }

    #[test]
    fn test_v1_database_is_migrated() {
        // A version-1 database has file_hashes without hash_algorithm.
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
            INSERT INTO meta (key, value) VALUES ('schema_version', '1');
            CREATE TABLE file_hashes (
                file_hash TEXT NOT NULL,
                folder_path TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                mtime REAL NOT NULL,
                file_size INTEGER NOT NULL,
                PRIMARY KEY (folder_path, relative_path)
            );
            INSERT INTO file_hashes (file_hash, folder_path, relative_path, mtime, file_size)
            VALUES ('900150983cd24fb0d6963f7d28e17f72', '/t', 'a.mkv', 100.0, 5);
            "#,
        )
        .unwrap();

        let mut db = Database { conn };
        db.ensure_schema().unwrap();

        let (version, algorithm): (String, Option<String>) = db
            .conn()
            .query_row(
                "SELECT (SELECT value FROM meta WHERE key = 'schema_version'),
                        (SELECT hash_algorithm FROM file_hashes LIMIT 1)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
        // Existing rows survive the migration with a NULL algorithm.
        assert_eq!(algorithm, None);
    }

    #[test]
    fn test_out_of_range_schema_version_is_rejected() {
        // A zeroed meta row must fail cleanly, not index into the
        // migration table.
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
            INSERT INTO meta (key, value) VALUES ('schema_version', '0');
            "#,
        )
        .unwrap();

        let mut db = Database { conn };
        let err = db.ensure_schema().unwrap_err();
        assert!(err.to_string().contains("not recognized"));
    }

    #[test]
    fn test_views_are_created() {
        let db = Database::open_in_memory().unwrap();
        db.ensure_views(&retention(), "othercat").unwrap();
        let view_count: i64 = db
            .conn()
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='view'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(view_count, 3);
    }
}
