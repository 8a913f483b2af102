use rusqlite::Error as RusqliteError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrphanSweepError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into OrphanSweepError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("Unable to infer hash algorithm from digest of length {0}")]
    UnknownHashLength(usize),

    #[error("Digest length {got} does not match the {expected} expected for {algorithm}")]
    DigestMismatch {
        algorithm: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("Refusing to touch path outside the base folder: {0}")]
    PathOutsideBase(PathBuf),

    #[error("Remote daemon unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}
