mod base;
mod v1_to_v2;

use crate::error::OrphanSweepError;
use rusqlite::Connection;

/// Function type for migration code that transforms data during schema upgrades.
pub type MigrationFn = fn(&Connection) -> Result<(), OrphanSweepError>;

pub use base::CREATE_SCHEMA_SQL;
use v1_to_v2::UPGRADE_1_TO_2_SQL;

/// Migration descriptor supporting 3-phase migrations:
/// - pre_sql: SQL batch to run before Rust code (optional)
/// - code_fn: Rust function for complex transformations (optional)
/// - post_sql: SQL batch to run after Rust code (optional)
///
/// For simple SQL-only migrations, only pre_sql is needed.
pub struct Migration {
    pub pre_sql: Option<&'static str>,
    pub code_fn: Option<MigrationFn>,
    pub post_sql: Option<&'static str>,
}

impl Migration {
    /// Create a SQL-only migration (no Rust code needed)
    pub const fn sql_only(sql: &'static str) -> Self {
        Self {
            pre_sql: Some(sql),
            code_fn: None,
            post_sql: None,
        }
    }
}

pub const MIGRATION_1_TO_2: Migration = Migration::sql_only(UPGRADE_1_TO_2_SQL);

/// Ordered migration sequence. Index 0 upgrades version 1 to version 2.
pub const MIGRATIONS: [&Migration; 1] = [&MIGRATION_1_TO_2];

/// The schema version produced by `CREATE_SCHEMA_SQL` and by applying every
/// migration in order.
pub const SCHEMA_VERSION: u32 = 2;
