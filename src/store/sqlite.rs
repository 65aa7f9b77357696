use std::path::Path;
use std::time::Duration;

use log::debug;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use crate::calendar::{self, Timestamp};
use crate::error::StoreError;
use crate::predicate::Predicate;
use crate::record::{CachedSchedule, ScheduleRecord};

use super::{schema, ScheduleStore};

pub type Pool = R2D2Pool<SqliteConnectionManager>;

const SELECT_COLUMNS: &str = "guid, activity_guid, task_identifier, survey_identifier, \
     scheduled_on, expires_on, started_on, finished_on, persistent, status, label";

/// Schedule cache persisted in a SQLite file.
///
/// Batches are written inside an immediate transaction; readers on other
/// pooled connections only ever see committed batches (WAL mode).
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the schema is current.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path).with_init(|c| {
            c.busy_timeout(Duration::from_secs(5))?;
            c.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            c.execute_batch("PRAGMA synchronous = NORMAL;")
        });

        let pool = R2D2Pool::builder().max_size(4).build(manager)?;

        let conn = pool.get()?;
        schema::ensure_schema(&conn)?;

        debug!("Schedule cache opened at: {}", path.display());
        Ok(Self { pool })
    }

    fn map_row(row: &Row) -> rusqlite::Result<CachedSchedule> {
        Ok(CachedSchedule {
            guid: row.get(0)?,
            activity_guid: row.get(1)?,
            task_identifier: row.get(2)?,
            survey_identifier: row.get(3)?,
            scheduled_on: Self::ts_column(row, 4, "scheduled_on")?.ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(
                    4,
                    "scheduled_on".to_string(),
                    rusqlite::types::Type::Null,
                )
            })?,
            expires_on: Self::ts_column(row, 5, "expires_on")?,
            started_on: Self::ts_column(row, 6, "started_on")?,
            finished_on: Self::ts_column(row, 7, "finished_on")?,
            persistent: row.get(8)?,
            status: row.get(9)?,
            label: row.get(10)?,
        })
    }

    fn ts_column(row: &Row, idx: usize, name: &str) -> rusqlite::Result<Option<Timestamp>> {
        row.get::<_, Option<i64>>(idx)?
            .map(|millis| {
                calendar::from_unix_millis(millis).ok_or_else(|| {
                    rusqlite::Error::InvalidColumnType(
                        idx,
                        name.to_string(),
                        rusqlite::types::Type::Integer,
                    )
                })
            })
            .transpose()
    }
}

impl ScheduleStore for SqliteStore {
    fn upsert_batch(&self, records: &[ScheduleRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.get()?;
        let write_err = |e: rusqlite::Error| StoreError::Write(e.to_string());

        // Dropping the transaction without commit rolls the whole batch back
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(write_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO cached_schedules (
                        guid, activity_guid, task_identifier, survey_identifier,
                        scheduled_on, expires_on, started_on, finished_on,
                        persistent, status, label
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(guid) DO UPDATE SET
                        activity_guid = excluded.activity_guid,
                        task_identifier = excluded.task_identifier,
                        survey_identifier = excluded.survey_identifier,
                        scheduled_on = excluded.scheduled_on,
                        expires_on = excluded.expires_on,
                        started_on = excluded.started_on,
                        finished_on = excluded.finished_on,
                        persistent = excluded.persistent,
                        status = excluded.status,
                        label = excluded.label",
                )
                .map_err(write_err)?;

            for record in records {
                stmt.execute(params![
                    record.guid,
                    record.activity_guid,
                    record.task_identifier,
                    record.survey_identifier,
                    record.scheduled_on.timestamp_millis(),
                    record.expires_on.map(|t| t.timestamp_millis()),
                    record.started_on.map(|t| t.timestamp_millis()),
                    record.finished_on.map(|t| t.timestamp_millis()),
                    record.persistent,
                    record.status,
                    record.label,
                ])
                .map_err(write_err)?;
            }
        }
        tx.commit().map_err(write_err)?;

        debug!("Upserted {} schedules", records.len());
        Ok(())
    }

    fn find_latest_completed(
        &self,
        predicate: &Predicate,
    ) -> Result<Option<CachedSchedule>, StoreError> {
        let conn = self.pool.get()?;
        let (pred_str, pred_vec) = Predicate::Completed.and(predicate.clone()).to_predicate_parts();
        let sql = format!(
            "SELECT {} FROM cached_schedules WHERE {} ORDER BY finished_on DESC, guid DESC LIMIT 1",
            SELECT_COLUMNS, pred_str
        );

        conn.query_row(
            &sql,
            rusqlite::params_from_iter(pred_vec.iter()),
            Self::map_row,
        )
        .optional()
        .map_err(|e| StoreError::Read(e.to_string()))
    }

    fn query(&self, predicate: &Predicate) -> Result<Vec<CachedSchedule>, StoreError> {
        let conn = self.pool.get()?;
        let (pred_str, pred_vec) = predicate.to_predicate_parts();
        let sql = format!(
            "SELECT {} FROM cached_schedules WHERE {} ORDER BY scheduled_on ASC, guid ASC",
            SELECT_COLUMNS, pred_str
        );
        let read_err = |e: rusqlite::Error| StoreError::Read(e.to_string());

        let mut stmt = conn.prepare(&sql).map_err(read_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(pred_vec.iter()), Self::map_row)
            .map_err(read_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(read_err)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let conn = self.pool.get()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM cached_schedules", [], |row| row.get(0))
            .map_err(|e| StoreError::Read(e.to_string()))?;
        Ok(count.max(0) as usize)
    }
}
