pub const CREATE_SCHEMA_SQL: &str = r#"
BEGIN TRANSACTION;

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', '2');

-- Cached content hashes, keyed by scanned folder + relative path
CREATE TABLE IF NOT EXISTS file_hashes (
    file_hash TEXT NOT NULL,
    hash_algorithm TEXT,               -- 'xxh64' or 'md5'; NULL rows predate the algorithm column
    folder_path TEXT NOT NULL,
    relative_path TEXT NOT NULL,
    mtime REAL NOT NULL,
    file_size INTEGER NOT NULL,
    PRIMARY KEY (folder_path, relative_path)
);

CREATE INDEX IF NOT EXISTS idx_file_hashes_folder_path ON file_hashes (folder_path);

-- One row per reconciliation run
CREATE TABLE IF NOT EXISTS scan_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    host TEXT NOT NULL,
    base_path TEXT NOT NULL,
    scan_start TEXT NOT NULL,
    scan_end TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- Lifecycle entity, unique per (path, source)
CREATE TABLE IF NOT EXISTS orphaned_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_hash TEXT NOT NULL,
    path TEXT NOT NULL,
    source TEXT NOT NULL,              -- 'local_torrent_folder', 'torrents', or 'media'
    torrent_id TEXT,                   -- daemon torrent ID, only for source 'torrents'
    label TEXT,                        -- NULL for files not from torrents
    size INTEGER NOT NULL,
    size_human TEXT NOT NULL,
    first_seen_at TIMESTAMP NOT NULL,
    last_seen_at TIMESTAMP NOT NULL,
    consecutive_scans INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'active',  -- 'active', 'marked_for_deletion', 'deleted', 'inactive'
    deletion_date TIMESTAMP,
    include_in_report BOOLEAN NOT NULL DEFAULT 1,
    UNIQUE (path, source)
);

CREATE INDEX IF NOT EXISTS idx_orphaned_files_source_status ON orphaned_files (source, status);

-- Append-only join linking each scan to the files it (re-)confirmed
CREATE TABLE IF NOT EXISTS file_scan_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id INTEGER NOT NULL,
    file_id INTEGER NOT NULL,
    source TEXT NOT NULL,
    FOREIGN KEY (scan_id) REFERENCES scan_results(id),
    FOREIGN KEY (file_id) REFERENCES orphaned_files(id)
);

CREATE INDEX IF NOT EXISTS idx_fsh_scan_id ON file_scan_history (scan_id);
CREATE INDEX IF NOT EXISTS idx_fsh_file_id ON file_scan_history (file_id);

-- Deferred operations (delete / relabel / manual review)
CREATE TABLE IF NOT EXISTS pending_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    orphaned_file_id INTEGER,
    torrent_id TEXT,
    file_path TEXT NOT NULL,
    current_label TEXT,
    proposed_action TEXT NOT NULL,     -- 'delete', 'relabel', or 'manual_review'
    action_details TEXT,               -- free text, e.g. target label for relabel
    size_human TEXT NOT NULL,
    source TEXT,
    file_size INTEGER,
    scan_id_identified INTEGER NOT NULL,
    identified_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    action_due_at TIMESTAMP NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',  -- 'pending', 'ready', 'completed', 'cancelled', 'failed'
    scan_id_processed INTEGER,
    processed_at TIMESTAMP,
    processing_notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_pending_actions_status ON pending_actions (status);
CREATE INDEX IF NOT EXISTS idx_pending_actions_action_due_at ON pending_actions (action_due_at);
CREATE INDEX IF NOT EXISTS idx_pending_actions_orphaned_file_id ON pending_actions (orphaned_file_id);
CREATE INDEX IF NOT EXISTS idx_pending_actions_scan_id_identified ON pending_actions (scan_id_identified);

COMMIT;
"#;
