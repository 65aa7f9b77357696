//! Facade that turns one server response into what the participant sees.
//!
//! An ingest caches the raw records, recomputes and replaces the reminder
//! timeline, then returns the normalized list grouped into sections.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;
use log::{error, info, warn, Level};
use logging_timer::timer;
use serde::Serialize;

use crate::calendar::Timestamp;
use crate::error::StoreError;
use crate::normalize::{normalize, ProtocolRules};
use crate::predicate::Predicate;
use crate::record::{CachedSchedule, ReminderEntry, ScheduleRecord, WireRecord};
use crate::reminders::{compute_reminders, replace_reminders, NotificationSink, ReminderConfig};
use crate::sections::{bucket, ScheduleSection, SectionConfig};
use crate::store::ScheduleStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerConfig {
    pub protocol: ProtocolRules,
    pub reminders: ReminderConfig,
    pub sections: SectionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedResult {
    pub schedules: Vec<ScheduleRecord>,
    pub sections: Vec<ScheduleSection>,
    pub reminders: Vec<ReminderEntry>,
}

pub struct ScheduleManager {
    store: Arc<dyn ScheduleStore>,
    // Also serializes ingests so cancel/schedule pairs never interleave
    notifier: Mutex<Box<dyn NotificationSink>>,
    config: ManagerConfig,
}

impl ScheduleManager {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        notifier: Box<dyn NotificationSink>,
        config: ManagerConfig,
    ) -> Self {
        ScheduleManager {
            store,
            notifier: Mutex::new(notifier),
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn ingest(&self, raw: &[ScheduleRecord]) -> NormalizedResult {
        self.ingest_at(raw, Local::now())
    }

    /// Process one server response as of `now`.
    ///
    /// Store and notification failures are logged and never abort the
    /// ingest: the normalized list is always returned.
    pub fn ingest_at(&self, raw: &[ScheduleRecord], now: Timestamp) -> NormalizedResult {
        let _tmr = timer!(Level::Debug; "ScheduleManager::ingest", "{} records", raw.len());

        let mut notifier = self
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Err(e) = self.store.upsert_batch(raw) {
            error!("Failed to cache {} schedules: {}", raw.len(), e);
        }

        let reminders = compute_reminders(
            raw,
            self.store.as_ref(),
            &self.config.protocol,
            &self.config.reminders,
            now,
        );
        if let Err(e) = replace_reminders(notifier.as_mut(), &reminders) {
            error!("Failed to replace reminders: {}", e);
        }

        let schedules = normalize(raw, self.store.as_ref(), &self.config.protocol, now);
        let sections = bucket(&schedules, &self.config.sections, now);

        info!(
            "Ingested {} schedules: {} shown, {} reminders",
            raw.len(),
            schedules.len(),
            reminders.len()
        );

        NormalizedResult {
            schedules,
            sections,
            reminders,
        }
    }

    /// Decode wire records, skipping malformed ones, then ingest the rest.
    pub fn ingest_wire(&self, wire: Vec<WireRecord>, now: Timestamp) -> NormalizedResult {
        let records = decode_records(wire);
        self.ingest_at(&records, now)
    }

    /// Completed and expired schedules from the local cache, oldest first.
    pub fn history(&self, now: Timestamp) -> Result<Vec<ScheduleRecord>, StoreError> {
        let rows = self
            .store
            .query(&Predicate::Completed.or(Predicate::ExpiredBefore(now)))?;
        Ok(rows.iter().map(CachedSchedule::to_record).collect())
    }
}

/// Convert wire records, logging and dropping the ones that cannot be used.
pub fn decode_records(wire: Vec<WireRecord>) -> Vec<ScheduleRecord> {
    wire.into_iter()
        .filter_map(|w| match ScheduleRecord::try_from(w) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping schedule: {}", e);
                None
            }
        })
        .collect()
}
