//! Local schedule cache.
//!
//! The store remembers every schedule the server has ever sent, keyed by its
//! guid, so completion history survives schedules dropping out of the live
//! server set.

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::predicate::Predicate;
use crate::record::{CachedSchedule, ScheduleRecord};

pub trait ScheduleStore: Send + Sync {
    /// Insert or overwrite every record by guid as one unit of work.
    ///
    /// Either the whole batch becomes visible or none of it does.
    fn upsert_batch(&self, records: &[ScheduleRecord]) -> Result<(), StoreError>;

    /// The completed row with the greatest `finished_on` among those matching
    /// `predicate`.
    fn find_latest_completed(
        &self,
        predicate: &Predicate,
    ) -> Result<Option<CachedSchedule>, StoreError>;

    /// All rows matching `predicate`, ordered by `scheduled_on`.
    fn query(&self, predicate: &Predicate) -> Result<Vec<CachedSchedule>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every store implementation must share.

    use super::*;
    use crate::calendar::Timestamp;
    use crate::predicate::Field;
    use crate::record::test_support;
    use chrono::{Local, TimeDelta, TimeZone};

    fn ts(d: u32, h: u32) -> Timestamp {
        Local.with_ymd_and_hms(2025, 1, d, h, 0, 0).single().unwrap()
    }

    pub fn upsert_overwrites_by_guid(store: &dyn ScheduleStore) {
        let mut record = test_support::record("g-1", "Baseline-Combined", ts(10, 9));
        store.upsert_batch(&[record.clone()]).unwrap();
        assert_eq!(store.len().unwrap(), 1);

        record.finished_on = Some(ts(10, 11));
        record.status = "finished".to_string();
        store.upsert_batch(&[record.clone()]).unwrap();
        assert_eq!(store.len().unwrap(), 1);

        let found = store
            .find_latest_completed(&Predicate::task_in(["Baseline-Combined"]))
            .unwrap()
            .unwrap();
        assert_eq!(found.guid, "g-1");
        assert_eq!(found.status, "finished");
        assert_eq!(found.finished_on, Some(ts(10, 11)));
    }

    pub fn upsert_is_idempotent(store: &dyn ScheduleStore) {
        let batch = vec![
            test_support::record("a", "T", ts(10, 9)),
            test_support::record("b", "T", ts(11, 9)),
        ];
        store.upsert_batch(&batch).unwrap();
        let first = store.query(&Predicate::And(vec![])).unwrap();
        store.upsert_batch(&batch).unwrap();
        let second = store.query(&Predicate::And(vec![])).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.len(), 2);
    }

    pub fn latest_completed_picks_greatest_finished_on(store: &dyn ScheduleStore) {
        let mut older = test_support::record("old", "Ongoing-Combined", ts(1, 9));
        older.finished_on = Some(ts(1, 10));
        let mut newer = test_support::record("new", "Ongoing-Combined", ts(8, 9));
        newer.finished_on = Some(ts(8, 10));
        let mut other_task = test_support::record("other", "PDQ8", ts(9, 9));
        other_task.finished_on = Some(ts(9, 10));
        let pending = test_support::record("pending", "Ongoing-Combined", ts(12, 9));

        store
            .upsert_batch(&[older, newer, other_task, pending])
            .unwrap();

        let found = store
            .find_latest_completed(&Predicate::task_in(["Ongoing-Combined"]))
            .unwrap()
            .unwrap();
        assert_eq!(found.guid, "new");

        let none = store
            .find_latest_completed(&Predicate::task_in(["Missing"]))
            .unwrap();
        assert!(none.is_none());
    }

    pub fn query_orders_by_scheduled_on(store: &dyn ScheduleStore) {
        let mut late = test_support::record("late", "T", ts(20, 9));
        late.expires_on = Some(ts(20, 15));
        let mut early = test_support::record("early", "T", ts(5, 9));
        early.finished_on = Some(ts(5, 10));
        let future = test_support::record("future", "T", ts(25, 9));
        store.upsert_batch(&[late, future, early]).unwrap();

        let history = store
            .query(&Predicate::Completed.or(Predicate::ExpiredBefore(ts(22, 0))))
            .unwrap();
        let guids: Vec<&str> = history.iter().map(|c| c.guid.as_str()).collect();
        assert_eq!(guids, vec!["early", "late"]);
    }

    pub fn negation_over_nullable_field(store: &dyn ScheduleStore) {
        let task = test_support::record("task", "Tapping", ts(10, 9));
        let pdq8 = test_support::survey("pdq8", "PDQ8", ts(11, 9));
        let phq9 = test_support::survey("phq9", "PHQ9", ts(12, 9));
        store.upsert_batch(&[task, pdq8, phq9]).unwrap();

        // Rows without a survey identifier are not PDQ8, so they satisfy the negation
        let rows = store
            .query(&Predicate::survey_identifier("PDQ8").not())
            .unwrap();
        let guids: Vec<&str> = rows.iter().map(|c| c.guid.as_str()).collect();
        assert_eq!(guids, vec!["task", "phq9"]);

        let rows = store
            .query(&Predicate::In(Field::SurveyIdentifier, vec!["PDQ8".into(), "PHQ9".into()]).not())
            .unwrap();
        let guids: Vec<&str> = rows.iter().map(|c| c.guid.as_str()).collect();
        assert_eq!(guids, vec!["task"]);
    }

    pub fn sub_second_instants_round_trip(store: &dyn ScheduleStore) {
        let finished_on = ts(10, 11) + TimeDelta::milliseconds(250);
        let mut record = test_support::record("g-1", "Baseline-Combined", ts(10, 9));
        record.expires_on = Some(finished_on);
        record.finished_on = Some(finished_on);
        store.upsert_batch(&[record]).unwrap();

        let found = store
            .find_latest_completed(&Predicate::task_in(["Baseline-Combined"]))
            .unwrap()
            .unwrap();
        assert_eq!(found.finished_on, Some(finished_on));
        assert_eq!(found.expires_on, Some(finished_on));

        let expired = |at: Timestamp| store.query(&Predicate::ExpiredBefore(at)).unwrap().len();
        assert_eq!(expired(finished_on), 0);
        assert_eq!(expired(finished_on + TimeDelta::milliseconds(1)), 1);
    }
}
