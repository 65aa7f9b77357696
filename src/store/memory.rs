use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use crate::calendar::Timestamp;
use crate::error::StoreError;
use crate::predicate::Predicate;
use crate::record::{CachedSchedule, ScheduleRecord};

use super::ScheduleStore;

/// In-process schedule cache.
///
/// A batch is applied under a single write lock, so readers see either the
/// state before the batch or after it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    rows: HashMap<String, CachedSchedule>,
    // (finished_on, guid) for every completed row, newest last
    completed: BTreeSet<(Timestamp, String)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleStore for MemoryStore {
    fn upsert_batch(&self, records: &[ScheduleRecord]) -> Result<(), StoreError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| StoreError::Write("memory store lock poisoned".to_string()))?;
        let inner = &mut *guard;

        for record in records {
            let row = CachedSchedule::from(record);

            let prev_key = inner
                .rows
                .get(&row.guid)
                .and_then(|prev| prev.finished_on.map(|f| (f, prev.guid.clone())));
            if let Some(key) = prev_key {
                inner.completed.remove(&key);
            }
            if let Some(finished_on) = row.finished_on {
                inner.completed.insert((finished_on, row.guid.clone()));
            }
            inner.rows.insert(row.guid.clone(), row);
        }

        Ok(())
    }

    fn find_latest_completed(
        &self,
        predicate: &Predicate,
    ) -> Result<Option<CachedSchedule>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Read("memory store lock poisoned".to_string()))?;

        let found = inner
            .completed
            .iter()
            .rev()
            .filter_map(|(_, guid)| inner.rows.get(guid))
            .find(|row| predicate.matches(*row))
            .cloned();

        Ok(found)
    }

    fn query(&self, predicate: &Predicate) -> Result<Vec<CachedSchedule>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Read("memory store lock poisoned".to_string()))?;

        let mut rows: Vec<CachedSchedule> = inner
            .rows
            .values()
            .filter(|row| predicate.matches(*row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.scheduled_on
                .cmp(&b.scheduled_on)
                .then_with(|| a.guid.cmp(&b.guid))
        });

        Ok(rows)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Read("memory store lock poisoned".to_string()))?;
        Ok(inner.rows.len())
    }
}
