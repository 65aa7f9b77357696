use log::info;
use rusqlite::{Connection, OptionalExtension};

use crate::error::StoreError;

pub const SCHEMA_VERSION: &str = "2";

pub const CREATE_SCHEMA_SQL: &str = r#"
BEGIN TRANSACTION;

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', '2');

-- One row per scheduled instance ever seen. Rows are overwritten on every
-- sighting and never deleted. Instants are Unix milliseconds (UTC), so a
-- cached row round-trips the millisecond precision of the wire format.
CREATE TABLE IF NOT EXISTS cached_schedules (
    guid TEXT PRIMARY KEY,
    activity_guid TEXT NOT NULL,
    task_identifier TEXT NOT NULL,
    survey_identifier TEXT,
    scheduled_on INTEGER NOT NULL,
    expires_on INTEGER,
    started_on INTEGER,
    finished_on INTEGER,
    persistent BOOLEAN NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT '',
    label TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_cached_task_finished ON cached_schedules (task_identifier, finished_on);
CREATE INDEX IF NOT EXISTS idx_cached_activity_finished ON cached_schedules (activity_guid, finished_on);
CREATE INDEX IF NOT EXISTS idx_cached_survey_finished ON cached_schedules (survey_identifier, finished_on);
CREATE INDEX IF NOT EXISTS idx_cached_scheduled ON cached_schedules (scheduled_on);

COMMIT;
"#;

/// Create the schema on a fresh database, or confirm the stored version.
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    let table_exists: bool = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='meta'",
            [],
            |row| row.get::<_, i32>(0),
        )
        .map(|count| count > 0)?;

    if !table_exists {
        info!("Creating schedule cache schema v{}", SCHEMA_VERSION);
        conn.execute_batch(CREATE_SCHEMA_SQL)?;
        return Ok(());
    }

    let stored_version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match stored_version.as_deref() {
        Some(SCHEMA_VERSION) => Ok(()),
        Some(other) => Err(StoreError::Schema(format!(
            "Schema version mismatch: found {}, expected {}",
            other, SCHEMA_VERSION
        ))),
        None => Err(StoreError::Schema("Schema version missing".to_string())),
    }
}
