use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};
use flexi_logger::{Logger, LoggerHandle};
use log::{info, warn};

use crate::actions::{self, FsDeleter};
use crate::compare;
use crate::config::{CacheBackend, Config};
use crate::cross_seed;
use crate::database::Database;
use crate::error::OrphanSweepError;
use crate::hash_cache::{HashCache, JsonHashCache, SqliteHashCache};
use crate::orphans;
use crate::remote::{RemoteLister, SnapshotLister};
use crate::reports::{self, LogNotifier, Notifier};
use crate::retention;
use crate::scanner::{FolderScan, ScanPolicy, Scanner};
use crate::utils::Utils;

#[derive(Parser)]
#[command(
    name = "orphansweep",
    version,
    about = "Reconciles a torrent client's view of its download folder against the folder itself and a media library"
)]
pub struct Cli {
    /// Configuration file (default: platform data directory)
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one full reconciliation pass and record the results
    Scan {
        /// Skip the media folder (orphan detection only)
        #[arg(long = "skip-media", default_value_t = false)]
        skip_media: bool,

        /// Suppress progress bars (for cron use)
        #[arg(long = "no-progress", default_value_t = false)]
        no_progress: bool,

        /// Delete every active torrent-folder orphan from disk instead of
        /// marking eligible ones
        #[arg(long = "force", default_value_t = false)]
        force: bool,

        /// Execute due pending actions after the scan
        #[arg(long = "execute-actions", default_value_t = false)]
        execute_actions: bool,

        /// Preview retention and pending-action decisions without mutating
        /// anything
        #[arg(long = "dry-run", conflicts_with = "force", default_value_t = false)]
        dry_run: bool,
    },

    /// Print a scan's report (latest by default)
    Report {
        /// Report on a specific scan id
        #[arg(long = "id", short = 'i')]
        id: Option<i64>,
    },

    /// Show recent scans with per-source counts
    History {
        /// Number of scans to show
        #[arg(long = "count", short = 'n', default_value_t = 10)]
        count: usize,
    },

    /// List open pending actions
    Actions,

    /// Drop hash-cache entries whose file no longer exists
    #[command(name = "clean-cache")]
    CleanCache,
}

impl Cli {
    pub fn handle_command_line() -> Result<(), OrphanSweepError> {
        let args = Cli::parse();

        let config = Config::load(args.config.as_deref())?;
        let _logger = init_logging(&config)?;

        match args.command {
            Command::Scan {
                skip_media,
                no_progress,
                force,
                execute_actions,
                dry_run,
            } => run_scan(&config, skip_media, no_progress, force, execute_actions, dry_run),
            Command::Report { id } => run_report(&config, id),
            Command::History { count } => run_history(&config, count),
            Command::Actions => run_actions(&config),
            Command::CleanCache => run_clean_cache(&config),
        }
    }
}

/// RUST_LOG overrides the configured level when set.
fn init_logging(config: &Config) -> Result<LoggerHandle, OrphanSweepError> {
    Logger::try_with_env_or_str(&config.logging.level)
        .map_err(|e| OrphanSweepError::Error(format!("Failed to configure logging: {}", e)))?
        .start()
        .map_err(|e| OrphanSweepError::Error(format!("Failed to start logging: {}", e)))
}

fn open_database(config: &Config) -> Result<Database, OrphanSweepError> {
    let db = Database::connect(&config.database.path)?;
    db.ensure_views(&config.retention, &config.remote.autoremove_label)?;
    Ok(db)
}

fn scan_folders(
    config: &Config,
    db: &Database,
    skip_media: bool,
    no_progress: bool,
) -> Result<(FolderScan, Option<FolderScan>), OrphanSweepError> {
    let policy = ScanPolicy::from_config(&config.scan);
    let flush_interval = config.scan.cache_flush_interval;

    let mut sqlite_cache;
    let mut json_cache;
    let cache: &mut dyn HashCache = match config.scan.cache_backend() {
        CacheBackend::Sqlite => {
            sqlite_cache = SqliteHashCache::new(db.conn(), flush_interval);
            &mut sqlite_cache
        }
        CacheBackend::Json => {
            json_cache = JsonHashCache::new(flush_interval);
            &mut json_cache
        }
    };

    let mut scanner = Scanner::new(policy, cache, !no_progress);
    let torrent_scan = scanner.scan_folder(&config.folders.torrent_folder)?;
    let media_scan = if skip_media {
        info!("Skipping media folder");
        None
    } else {
        Some(scanner.scan_folder(&config.folders.media_folder)?)
    };

    Ok((torrent_scan, media_scan))
}

fn run_scan(
    config: &Config,
    skip_media: bool,
    no_progress: bool,
    force: bool,
    execute_actions: bool,
    dry_run: bool,
) -> Result<(), OrphanSweepError> {
    // Remote listing comes first: if the daemon export is unreadable the
    // run must abort before any lifecycle mutation.
    let mut lister = SnapshotLister::load(
        &config.remote.snapshot_file,
        &config.remote.base_folder,
    )?;
    let listing = lister.list()?;

    let mut db = open_database(config)?;

    let scan_start = Utils::now_db_timestamp();
    let (torrent_scan, media_scan) = scan_folders(config, &db, skip_media, no_progress)?;
    let scan_end = Utils::now_db_timestamp();

    let policy = ScanPolicy::from_config(&config.scan);
    let outcome = compare::compare(
        &listing.files,
        &listing.labels,
        &listing.torrent_ids,
        &torrent_scan,
        media_scan.as_ref(),
        &policy,
    );

    let scan_id = match orphans::save_scan_results(
        &mut db,
        &config.remote.host,
        &config.folders.torrent_folder.to_string_lossy(),
        &scan_start,
        &scan_end,
        &outcome,
    ) {
        Ok(scan_id) => scan_id,
        Err(e) => {
            // Sentinel id 0 marks a failed run for the caller.
            eprintln!("Scan failed (scan id 0): {}", e);
            return Err(e);
        }
    };

    if force {
        let summary = retention::delete_active(&db, &config.folders.torrent_folder)?;
        println!(
            "Force deletion: {} deleted, {} already missing, {} refused",
            summary.deleted.len(),
            summary.already_missing.len(),
            summary.refused.len()
        );
    } else {
        let eligible = retention::mark_eligible(&db)?;
        if !eligible.is_empty() {
            println!("{} file(s) marked for deletion", eligible.len());
        }
    }

    let now = Utc::now();
    // Autoremove candidates are drawn from the torrents/media hash diff,
    // which a media-skipping run never produces.
    let planned = if skip_media {
        Vec::new()
    } else {
        let candidates = cross_seed::autoremove_candidates(&db)?;
        cross_seed::plan_relabels(&candidates, &lister.all_torrents()?)
    };
    if dry_run {
        for relabel in &planned {
            info!(
                "[dry run] would relabel torrent {} ({}) to '{}'",
                relabel.torrent_id, relabel.file_path, config.remote.autoremove_label
            );
        }
    } else if !planned.is_empty() {
        cross_seed::register_relabels(
            &db,
            &planned,
            &config.remote.autoremove_label,
            config.retention.relabel_delay_days,
            scan_id,
            now,
        )?;
    }

    if execute_actions || dry_run {
        let mut deleter = FsDeleter::new(&config.folders.torrent_folder)?;
        let summary =
            actions::execute_due(&db, &mut lister, &mut deleter, scan_id, dry_run, now)?;
        println!(
            "Pending actions: {} completed, {} cancelled, {} retried, {} previewed",
            summary.completed, summary.cancelled, summary.retried, summary.previewed
        );
    }

    if let Some(report) = reports::latest_scan_report(&db)? {
        LogNotifier.notify(&report)?;
        if let Some(path) = &config.reports.file {
            reports::FileNotifier::new(path.clone()).notify(&report)?;
        }
    }
    println!(
        "Scan {} complete: {} orphaned in torrent folder, {} only in torrents, {} only in media",
        scan_id,
        outcome.orphaned_in_torrent_folder.len(),
        outcome.only_in_torrents.len(),
        outcome.only_in_media.len()
    );

    Ok(())
}

fn run_report(config: &Config, id: Option<i64>) -> Result<(), OrphanSweepError> {
    let db = open_database(config)?;
    match reports::scan_report(&db, id)? {
        Some(report) => println!("{}", report),
        None => match id {
            Some(id) => println!("No scan with id {}.", id),
            None => println!("No scans recorded yet."),
        },
    }
    Ok(())
}

fn run_history(config: &Config, count: usize) -> Result<(), OrphanSweepError> {
    let db = open_database(config)?;
    print!("{}", reports::scan_history(&db, count)?);
    Ok(())
}

fn run_actions(config: &Config) -> Result<(), OrphanSweepError> {
    let db = open_database(config)?;
    print!("{}", reports::pending_actions_report(&db)?);
    Ok(())
}

fn run_clean_cache(config: &Config) -> Result<(), OrphanSweepError> {
    let db = open_database(config)?;
    let folders: [&Path; 2] = [&config.folders.torrent_folder, &config.folders.media_folder];

    let mut removed = 0;
    match config.scan.cache_backend() {
        CacheBackend::Sqlite => {
            let mut cache = SqliteHashCache::new(db.conn(), config.scan.cache_flush_interval);
            for folder in folders {
                removed += cache.clean(folder)?;
            }
        }
        CacheBackend::Json => {
            let mut cache = JsonHashCache::new(config.scan.cache_flush_interval);
            for folder in folders {
                removed += cache.clean(folder)?;
            }
        }
    }
    if removed == 0 {
        warn!("No stale cache entries found");
    }
    println!("Removed {} stale cache entries", removed);
    Ok(())
}
