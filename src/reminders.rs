//! Local reminder computation and delivery.
//!
//! Two families of reminders are merged into one timeline: a fixed cadence for
//! one-off sessions that are still open, and a recurring cadence anchored on
//! the participant's last completion of an ongoing activity or survey.

use std::collections::{BTreeMap, HashSet};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::calendar::{self, Timestamp};
use crate::config::ensure_in_range;
use crate::error::NotifyError;
use crate::normalize::ProtocolRules;
use crate::predicate::Predicate;
use crate::record::{ReminderEntry, ScheduleRecord};
use crate::store::ScheduleStore;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReminderConfig {
    pub fixed_offset_hours: i64,
    pub fixed_interval_days: i64,
    pub ongoing_cadence_days: i64,
    pub survey_cadence_days: i64,
    pub repeat_days: u32,
    pub notification_hour: u32,
    pub lookahead_days: i64,
    pub session_message: String,
    pub ongoing_message: String,
    pub survey_message: String,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        ReminderConfig {
            fixed_offset_hours: 24,
            fixed_interval_days: 3,
            ongoing_cadence_days: 30,
            survey_cadence_days: 90,
            repeat_days: 3,
            notification_hour: 12,
            lookahead_days: 180,
            session_message: "Your activity session is ready. Please complete it before it expires."
                .to_string(),
            ongoing_message: "It's time for your next activity session.".to_string(),
            survey_message: "Please take a moment to complete your survey.".to_string(),
        }
    }
}

impl ReminderConfig {
    const MAX_OFFSET_HOURS: i64 = 7 * 24;
    const MAX_INTERVAL_DAYS: i64 = 365;
    const MAX_CADENCE_DAYS: i64 = 3650;
    const MAX_REPEAT_DAYS: u32 = 31;
    const MAX_LOOKAHEAD_DAYS: i64 = 3650;

    pub(crate) fn ensure_valid(&mut self) {
        let defaults = Self::default();

        ensure_in_range(
            &mut self.fixed_offset_hours,
            "fixed_offset_hours",
            0..=Self::MAX_OFFSET_HOURS,
            defaults.fixed_offset_hours,
        );
        ensure_in_range(
            &mut self.fixed_interval_days,
            "fixed_interval_days",
            1..=Self::MAX_INTERVAL_DAYS,
            defaults.fixed_interval_days,
        );
        ensure_in_range(
            &mut self.ongoing_cadence_days,
            "ongoing_cadence_days",
            1..=Self::MAX_CADENCE_DAYS,
            defaults.ongoing_cadence_days,
        );
        ensure_in_range(
            &mut self.survey_cadence_days,
            "survey_cadence_days",
            1..=Self::MAX_CADENCE_DAYS,
            defaults.survey_cadence_days,
        );
        ensure_in_range(
            &mut self.repeat_days,
            "repeat_days",
            0..=Self::MAX_REPEAT_DAYS,
            defaults.repeat_days,
        );
        ensure_in_range(
            &mut self.notification_hour,
            "notification_hour",
            0..=23,
            defaults.notification_hour,
        );
        ensure_in_range(
            &mut self.lookahead_days,
            "lookahead_days",
            0..=Self::MAX_LOOKAHEAD_DAYS,
            defaults.lookahead_days,
        );
    }
}

/// Compute the reminder timeline for a raw schedule list.
///
/// Entries are unique by `fire_at`; when both families land on the same
/// instant the fixed-cadence message is kept. Only entries after the start of
/// tomorrow are returned, oldest first. Store lookup failures are logged and
/// treated as "never completed".
pub fn compute_reminders(
    raw: &[ScheduleRecord],
    store: &dyn ScheduleStore,
    rules: &ProtocolRules,
    config: &ReminderConfig,
    now: Timestamp,
) -> Vec<ReminderEntry> {
    let mut timeline: BTreeMap<Timestamp, String> = BTreeMap::new();

    add_fixed_cadence(&mut timeline, raw, rules, config, now);
    add_recurring_cadence(&mut timeline, raw, store, rules, config, now);

    let cutoff = calendar::start_of_tomorrow(&now);
    timeline
        .into_iter()
        .filter(|(fire_at, _)| *fire_at > cutoff)
        .map(|(fire_at, message)| ReminderEntry { fire_at, message })
        .collect()
}

fn add_fixed_cadence(
    timeline: &mut BTreeMap<Timestamp, String>,
    raw: &[ScheduleRecord],
    rules: &ProtocolRules,
    config: &ReminderConfig,
    now: Timestamp,
) {
    let open_sessions = Predicate::task_in([rules.baseline_task.as_str(), rules.training_task.as_str()])
        .and(Predicate::Completed.not());
    let horizon = calendar::add_days(&now, config.lookahead_days);
    let interval = config.fixed_interval_days.max(1);

    for record in raw.iter().filter(|r| open_sessions.matches(*r)) {
        let bound = record.expires_on.unwrap_or(horizon);
        let Some(mut fire_at) =
            calendar::checked_add_hours(&record.scheduled_on, config.fixed_offset_hours)
        else {
            warn!(
                "Reminder offset of {} hours is out of range for {}",
                config.fixed_offset_hours, record.guid
            );
            continue;
        };

        // The first reminder is always added, even past the expiry
        loop {
            timeline
                .entry(fire_at)
                .or_insert_with(|| config.session_message.clone());
            match calendar::checked_add_days(&fire_at, interval) {
                Some(next) if next < bound => fire_at = next,
                _ => break,
            }
        }
    }
}

fn add_recurring_cadence(
    timeline: &mut BTreeMap<Timestamp, String>,
    raw: &[ScheduleRecord],
    store: &dyn ScheduleStore,
    rules: &ProtocolRules,
    config: &ReminderConfig,
    now: Timestamp,
) {
    let mut candidates: Vec<&ScheduleRecord> = raw.iter().collect();
    candidates.sort_by_key(|r| r.scheduled_on);

    let session_family = Predicate::task_in([
        rules.baseline_task.as_str(),
        rules.ongoing_task.as_str(),
        rules.training_task.as_str(),
    ]);
    let horizon = calendar::add_days(&now, config.lookahead_days);

    let mut seen_activities: HashSet<&str> = HashSet::new();
    let mut seen_surveys: HashSet<&str> = HashSet::new();

    for record in candidates {
        let (lookup, cadence_days, message) = if let Some(survey_id) = &record.survey_identifier {
            if !seen_surveys.insert(survey_id.as_str()) {
                continue;
            }
            (
                Predicate::survey_identifier(survey_id.as_str()),
                config.survey_cadence_days,
                &config.survey_message,
            )
        } else if record.task_identifier == rules.ongoing_task {
            if !seen_activities.insert(record.activity_guid.as_str()) {
                continue;
            }
            (
                Predicate::activity_guid(record.activity_guid.as_str()).or(session_family.clone()),
                config.ongoing_cadence_days,
                &config.ongoing_message,
            )
        } else {
            continue;
        };

        let anchor = match store.find_latest_completed(&lookup) {
            Ok(Some(done)) => done
                .finished_on
                .map(|finished_on| calendar::with_time_of(&finished_on, &record.scheduled_on))
                .unwrap_or(record.scheduled_on),
            Ok(None) => record.scheduled_on,
            Err(e) => {
                warn!(
                    "Completion lookup for {} failed, anchoring on its schedule: {}",
                    record.guid, e
                );
                record.scheduled_on
            }
        };
        debug!("Recurring reminders for {} anchored at {}", record.guid, anchor);

        let cadence_days = cadence_days.max(1);
        let mut step: i64 = 1;
        loop {
            let due = match cadence_days
                .checked_mul(step)
                .and_then(|days| calendar::checked_add_days(&anchor, days))
            {
                Some(due) if due <= horizon => due,
                _ => break,
            };
            for offset in 0..config.repeat_days {
                let day = calendar::add_days(&due, i64::from(offset)).date_naive();
                let fire_at = calendar::at_hour(day, config.notification_hour);
                timeline.entry(fire_at).or_insert_with(|| message.clone());
            }
            step += 1;
        }
    }
}

/// The platform's local notification facility.
pub trait NotificationSink: Send {
    fn cancel_all(&mut self) -> Result<(), NotifyError>;
    fn schedule(&mut self, reminders: &[ReminderEntry]) -> Result<(), NotifyError>;
}

/// Cancel everything the sink holds, then hand it the new timeline.
pub fn replace_reminders(
    sink: &mut dyn NotificationSink,
    reminders: &[ReminderEntry],
) -> Result<(), NotifyError> {
    sink.cancel_all()?;
    sink.schedule(reminders)
}

/// Sink that only writes the timeline to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn cancel_all(&mut self) -> Result<(), NotifyError> {
        debug!("Cancelling all pending reminders");
        Ok(())
    }

    fn schedule(&mut self, reminders: &[ReminderEntry]) -> Result<(), NotifyError> {
        info!("Scheduling {} reminders", reminders.len());
        for reminder in reminders {
            debug!("  {} - {}", reminder.fire_at, reminder.message);
        }
        Ok(())
    }
}

/// Sink that keeps the live timeline in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    pending: Vec<ReminderEntry>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &[ReminderEntry] {
        &self.pending
    }
}

impl NotificationSink for MemoryNotifier {
    fn cancel_all(&mut self) -> Result<(), NotifyError> {
        self.pending.clear();
        Ok(())
    }

    fn schedule(&mut self, reminders: &[ReminderEntry]) -> Result<(), NotifyError> {
        self.pending.extend_from_slice(reminders);
        Ok(())
    }
}
