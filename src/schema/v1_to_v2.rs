pub const UPGRADE_1_TO_2_SQL: &str = r#"
--
-- Schema Upgrade: Version 1 -> 2
--
-- Version 1 cached hashes without recording which algorithm produced them.
-- This migration adds the hash_algorithm column; existing rows keep a NULL
-- algorithm and have it inferred from digest length when loaded.
--

-- Verify schema version is exactly 1
SELECT 1 / (CASE WHEN (SELECT value FROM meta WHERE key = 'schema_version') = '1' THEN 1 ELSE 0 END);

ALTER TABLE file_hashes ADD COLUMN hash_algorithm TEXT;

-- Update schema version
UPDATE meta SET value = '2' WHERE key = 'schema_version';
"#;
