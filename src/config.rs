use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::OrphanSweepError;
use crate::hash::HashAlgorithm;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const DEFAULT_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            level: Self::DEFAULT_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.level.clone();
        self.level = self.level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.level.as_str()) {
            eprintln!(
                "Config error: log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_LEVEL
            );
            self.level = Self::DEFAULT_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RemoteConfig {
    /// JSON snapshot of the daemon's torrent table, exported out of band.
    pub snapshot_file: PathBuf,
    /// Base folder for torrent payloads as the daemon sees it.
    pub base_folder: String,
    /// Identifies the daemon in scan records, e.g. "user@host:port".
    pub host: String,
    /// Label the daemon's auto-remove plugin acts on.
    pub autoremove_label: String,
}

impl RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            snapshot_file: PathBuf::from("daemon_snapshot.json"),
            base_folder: "/downloads".to_string(),
            host: "localhost".to_string(),
            autoremove_label: "othercat".to_string(),
        }
    }

    fn ensure_valid(&mut self) -> Result<(), OrphanSweepError> {
        if self.autoremove_label.trim().is_empty() {
            return Err(OrphanSweepError::ConfigError(
                "remote.autoremove_label must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FoldersConfig {
    pub torrent_folder: PathBuf,
    pub media_folder: PathBuf,
}

impl FoldersConfig {
    fn default() -> Self {
        FoldersConfig {
            torrent_folder: PathBuf::from("/data/torrents"),
            media_folder: PathBuf::from("/data/media"),
        }
    }

    fn ensure_valid(&self) -> Result<(), OrphanSweepError> {
        Self::require_dir("folders.torrent_folder", &self.torrent_folder)?;
        Self::require_dir("folders.media_folder", &self.media_folder)?;
        Ok(())
    }

    fn require_dir(field: &str, path: &Path) -> Result<(), OrphanSweepError> {
        if !path.exists() {
            return Err(OrphanSweepError::ConfigError(format!(
                "{} does not exist: {}",
                field,
                path.display()
            )));
        }
        if !path.is_dir() {
            return Err(OrphanSweepError::ConfigError(format!(
                "{} is not a directory: {}",
                field,
                path.display()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Sqlite,
    Json,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanConfig {
    pub min_file_size_mb: u64,
    pub extensions_blacklist: Vec<String>,
    pub subfolders_blacklist: Vec<String>,
    cache_backend: String,
    pub cache_flush_interval: usize,
    hash: String,
}

impl ScanConfig {
    const CACHE_BACKENDS: [&str; 2] = ["sqlite", "json"];
    const BACKEND_SQLITE: &str = "sqlite";

    const HASH_FUNCS: [&str; 2] = ["xxh64", "md5"];
    const HASH_XXH64: &str = "xxh64";

    pub fn cache_backend(&self) -> CacheBackend {
        match self.cache_backend.as_str() {
            "json" => CacheBackend::Json,
            _ => CacheBackend::Sqlite,
        }
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        // "hash" always holds a validated value; anything unexpected is
        // treated as the current default rather than panicking.
        match self.hash.as_str() {
            "md5" => HashAlgorithm::Md5,
            _ => HashAlgorithm::Xxh64,
        }
    }

    pub fn min_file_size_bytes(&self) -> u64 {
        self.min_file_size_mb * 1024 * 1024
    }

    fn default() -> Self {
        ScanConfig {
            min_file_size_mb: 10,
            extensions_blacklist: [
                ".nfo", ".srt", ".jpg", ".sfv", ".txt", ".png", ".sub", ".torrent",
                ".plexmatch", ".m3u", ".json", ".webp", ".jpeg", ".obj", ".ini",
                ".dtshd", ".invalid",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            subfolders_blacklist: ["music", "ebooks", "courses"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cache_backend: Self::BACKEND_SQLITE.to_owned(),
            cache_flush_interval: 25,
            hash: Self::HASH_XXH64.to_owned(),
        }
    }

    fn ensure_valid(&mut self) {
        let mut str_original = self.cache_backend.clone();
        self.cache_backend = self.cache_backend.trim().to_ascii_lowercase();
        if !Self::CACHE_BACKENDS.contains(&self.cache_backend.as_str()) {
            eprintln!(
                "Config error: cache backend of '{}' is invalid - using default of '{}'",
                str_original,
                Self::BACKEND_SQLITE
            );
            self.cache_backend = Self::BACKEND_SQLITE.to_owned();
        }

        str_original = self.hash.clone();
        self.hash = self.hash.trim().to_ascii_lowercase();
        if !Self::HASH_FUNCS.contains(&self.hash.as_str()) {
            eprintln!(
                "Config error: hash of '{}' is invalid - using default of '{}'",
                str_original,
                Self::HASH_XXH64
            );
            self.hash = Self::HASH_XXH64.to_owned();
        }

        if self.cache_flush_interval == 0 {
            self.cache_flush_interval = 1;
        }

        self.extensions_blacklist = self
            .extensions_blacklist
            .iter()
            .map(|e| e.trim().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self.subfolders_blacklist = self
            .subfolders_blacklist
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReportsConfig {
    /// Optional file the scan report is appended to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl ReportsConfig {
    fn default() -> Self {
        ReportsConfig { file: None }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RetentionConfig {
    pub consecutive_scans_threshold: u32,
    pub days_threshold: i64,
    pub relabel_delay_days: i64,
}

impl RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            consecutive_scans_threshold: 7,
            days_threshold: 7,
            relabel_delay_days: 7,
        }
    }

    fn ensure_valid(&self) -> Result<(), OrphanSweepError> {
        if self.consecutive_scans_threshold == 0 {
            return Err(OrphanSweepError::ConfigError(
                "retention.consecutive_scans_threshold must be at least 1".to_string(),
            ));
        }
        if self.days_threshold < 0 || self.relabel_delay_days < 0 {
            return Err(OrphanSweepError::ConfigError(
                "retention day thresholds must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl DatabaseConfig {
    fn default() -> Self {
        let path = ProjectDirs::from("", "", "orphansweep")
            .map(|dirs| dirs.data_local_dir().join("orphansweep.db"))
            .unwrap_or_else(|| PathBuf::from("orphansweep.db"));
        DatabaseConfig { path }
    }

    fn ensure_valid(&self) -> Result<(), OrphanSweepError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    OrphanSweepError::ConfigError(format!(
                        "cannot create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub remote: RemoteConfig,
    pub folders: FoldersConfig,
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    pub reports: ReportsConfig,
    pub retention: RetentionConfig,
}

impl Config {
    pub fn default_config_path() -> PathBuf {
        ProjectDirs::from("", "", "orphansweep")
            .map(|dirs| dirs.data_local_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    fn defaults() -> Self {
        Config {
            logging: LoggingConfig::default(),
            remote: RemoteConfig::default(),
            folders: FoldersConfig::default(),
            database: DatabaseConfig::default(),
            scan: ScanConfig::default(),
            reports: ReportsConfig::default(),
            retention: RetentionConfig::default(),
        }
    }

    /// Load configuration from a TOML file merged with `ORPHANSWEEP_*`
    /// environment overrides. Writes the default config to disk if no file
    /// exists yet. Validation problems with paths or thresholds are a
    /// single fatal startup error.
    pub fn load(config_path: Option<&Path>) -> Result<Self, OrphanSweepError> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        let default_config = Self::defaults();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        eprintln!(
                            "Failed to create configuration directory {}: {}",
                            parent.display(),
                            e
                        );
                    }
                }
            }
            match toml::to_string_pretty(&default_config) {
                Ok(toml_string) => {
                    if let Err(e) = fs::write(&config_path, toml_string) {
                        eprintln!(
                            "Failed to write default config to {}: {}",
                            config_path.display(),
                            e
                        );
                    }
                }
                Err(_) => eprintln!("Failed to serialize default config."),
            }
        }

        let figment = Figment::from(Serialized::defaults(default_config))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("ORPHANSWEEP_").split("__"));

        let mut config: Config = figment.extract().map_err(|err| {
            OrphanSweepError::ConfigError(format!(
                "could not load config file {}: {}",
                config_path.display(),
                err
            ))
        })?;

        config.ensure_valid()?;

        Ok(config)
    }

    fn ensure_valid(&mut self) -> Result<(), OrphanSweepError> {
        self.logging.ensure_valid();
        self.scan.ensure_valid();
        self.remote.ensure_valid()?;
        self.folders.ensure_valid()?;
        self.database.ensure_valid()?;
        self.retention.ensure_valid()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn write_valid_config(jail: &mut Jail) -> PathBuf {
        jail.create_dir("torrents").unwrap();
        jail.create_dir("media").unwrap();
        jail.create_file(
            "config.toml",
            r#"
                [logging]
                level = "debug"

                [remote]
                snapshot_file = "snapshot.json"
                base_folder = "/downloads"
                host = "deluge@seedbox:58846"
                autoremove_label = "othercat"

                [folders]
                torrent_folder = "torrents"
                media_folder = "media"

                [database]
                path = "orphansweep.db"

                [scan]
                min_file_size_mb = 1
                extensions_blacklist = [".NFO", " .srt "]
                subfolders_blacklist = ["music"]
                cache_backend = "SQLite"
                cache_flush_interval = 5
                hash = "xxh64"

                [retention]
                consecutive_scans_threshold = 3
                days_threshold = 2
                relabel_delay_days = 1
            "#,
        )
        .unwrap();
        PathBuf::from("config.toml")
    }

    #[test]
    fn test_load_valid_config() {
        Jail::expect_with(|jail| {
            let path = write_valid_config(jail);
            let config = Config::load(Some(&path)).expect("config should load");
            assert_eq!(config.logging.level, "debug");
            assert_eq!(config.scan.cache_backend(), CacheBackend::Sqlite);
            assert_eq!(config.scan.hash_algorithm(), HashAlgorithm::Xxh64);
            // blacklist entries are trimmed and lowercased
            assert!(config.scan.extensions_blacklist.contains(&".nfo".to_string()));
            assert!(config.scan.extensions_blacklist.contains(&".srt".to_string()));
            assert_eq!(config.retention.consecutive_scans_threshold, 3);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level_falls_back() {
        Jail::expect_with(|jail| {
            let path = write_valid_config(jail);
            jail.set_env("ORPHANSWEEP_LOGGING__LEVEL", "verbose");
            let config = Config::load(Some(&path)).expect("config should load");
            assert_eq!(config.logging.level, "info");
            Ok(())
        });
    }

    #[test]
    fn test_missing_folder_is_fatal() {
        Jail::expect_with(|jail| {
            let path = write_valid_config(jail);
            jail.set_env("ORPHANSWEEP_FOLDERS__TORRENT_FOLDER", "does-not-exist");
            let result = Config::load(Some(&path));
            assert!(matches!(result, Err(OrphanSweepError::ConfigError(_))));
            Ok(())
        });
    }

    #[test]
    fn test_zero_scan_threshold_is_fatal() {
        Jail::expect_with(|jail| {
            let path = write_valid_config(jail);
            jail.set_env("ORPHANSWEEP_RETENTION__CONSECUTIVE_SCANS_THRESHOLD", "0");
            let result = Config::load(Some(&path));
            assert!(matches!(result, Err(OrphanSweepError::ConfigError(_))));
            Ok(())
        });
    }
}
