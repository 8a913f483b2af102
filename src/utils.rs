use chrono::{NaiveDateTime, Utc};

/// Timestamp format stored in the database. SQLite's date functions
/// (`julianday`, comparisons in `WHERE` clauses) parse it natively.
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct Utils;

impl Utils {
    /// Current UTC time in the database timestamp format.
    pub fn now_db_timestamp() -> String {
        Utc::now().format(DB_TIMESTAMP_FORMAT).to_string()
    }

    pub fn parse_db_timestamp(s: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(s, DB_TIMESTAMP_FORMAT).ok()
    }

    /// Human-readable size. Reports GB for anything >= 1 GiB, otherwise MB,
    /// matching the strings persisted in `orphaned_files.size_human`.
    pub fn size_human(num_bytes: u64) -> String {
        const GIB: u64 = 1024 * 1024 * 1024;
        const MIB: u64 = 1024 * 1024;
        if num_bytes >= GIB {
            format!("{:.2} GB", num_bytes as f64 / GIB as f64)
        } else {
            format!("{:.2} MB", num_bytes as f64 / MIB as f64)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_human_mb() {
        assert_eq!(Utils::size_human(0), "0.00 MB");
        assert_eq!(Utils::size_human(1024 * 1024), "1.00 MB");
        assert_eq!(Utils::size_human(1024 * 1024 * 1024 - 1), "1024.00 MB");
    }

    #[test]
    fn test_size_human_gb() {
        assert_eq!(Utils::size_human(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(Utils::size_human(3 * 1024 * 1024 * 1024 + 512 * 1024 * 1024), "3.50 GB");
    }

    #[test]
    fn test_db_timestamp_round_trip() {
        let now = Utils::now_db_timestamp();
        assert!(Utils::parse_db_timestamp(&now).is_some());
    }
}
