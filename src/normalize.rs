//! Schedule splitter/filter.
//!
//! Turns the raw server list into the list the participant actually sees.
//! Which rules apply depends on the study protocol version selected in
//! [`ProtocolRules`].

use std::collections::HashSet;

use chrono::TimeDelta;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::calendar::{self, Timestamp};
use crate::config::ensure_in_range;
use crate::predicate::Predicate;
use crate::record::ScheduleRecord;
use crate::store::ScheduleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// An outstanding baseline suppresses the ongoing session and is offered
    /// in a daily window.
    BaselineOngoing,
    /// A combined session is offered on several consecutive days.
    ComboSplit,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProtocolRules {
    pub protocol: Protocol,
    pub baseline_task: String,
    pub ongoing_task: String,
    pub training_task: String,
    pub combo_task: String,
    pub combo_days: u32,
    pub baseline_window_hours: i64,
    pub followup_days: i64,
    pub followup_hour: u32,
    pub followup_window_hours: i64,
    pub followup_label: String,
}

impl Default for ProtocolRules {
    fn default() -> Self {
        ProtocolRules {
            protocol: Protocol::BaselineOngoing,
            baseline_task: "Baseline-Combined".to_string(),
            ongoing_task: "Ongoing-Combined".to_string(),
            training_task: "Training-Combined".to_string(),
            combo_task: "1-Combined".to_string(),
            combo_days: 3,
            baseline_window_hours: 6,
            followup_days: 7,
            followup_hour: 10,
            followup_window_hours: 50,
            followup_label: "Activity Session".to_string(),
        }
    }
}

impl ProtocolRules {
    const MAX_COMBO_DAYS: u32 = 31;
    const MAX_WINDOW_HOURS: i64 = 7 * 24;
    const MAX_FOLLOWUP_DAYS: i64 = 365;

    pub(crate) fn ensure_valid(&mut self) {
        let defaults = Self::default();

        ensure_in_range(
            &mut self.combo_days,
            "combo_days",
            1..=Self::MAX_COMBO_DAYS,
            defaults.combo_days,
        );
        ensure_in_range(
            &mut self.baseline_window_hours,
            "baseline_window_hours",
            1..=Self::MAX_WINDOW_HOURS,
            defaults.baseline_window_hours,
        );
        ensure_in_range(
            &mut self.followup_days,
            "followup_days",
            1..=Self::MAX_FOLLOWUP_DAYS,
            defaults.followup_days,
        );
        ensure_in_range(
            &mut self.followup_hour,
            "followup_hour",
            0..=23,
            defaults.followup_hour,
        );
        ensure_in_range(
            &mut self.followup_window_hours,
            "followup_window_hours",
            1..=Self::MAX_WINDOW_HOURS,
            defaults.followup_window_hours,
        );
    }

    /// Unfinished baseline session
    pub fn baseline_pending(&self) -> Predicate {
        Predicate::pending_task(&self.baseline_task)
    }

    /// Unfinished combined session, the only kind that gets split
    pub fn combo_eligible(&self) -> Predicate {
        Predicate::pending_task(&self.combo_task)
    }
}

/// Apply the configured protocol rules to a raw schedule list.
///
/// The input is left untouched. Records produced from a source record take
/// its place in the output, in increasing day order. The store is only read.
pub fn normalize(
    raw: &[ScheduleRecord],
    store: &dyn ScheduleStore,
    rules: &ProtocolRules,
    now: Timestamp,
) -> Vec<ScheduleRecord> {
    match rules.protocol {
        Protocol::BaselineOngoing => apply_baseline_rules(raw, rules, now),
        Protocol::ComboSplit => apply_combo_rules(raw, store, rules, now),
    }
}

fn apply_baseline_rules(
    raw: &[ScheduleRecord],
    rules: &ProtocolRules,
    now: Timestamp,
) -> Vec<ScheduleRecord> {
    let pending = rules.baseline_pending();
    let pending_count = raw.iter().filter(|r| pending.matches(*r)).count();

    if pending_count <= 1 {
        return raw.to_vec();
    }

    debug!(
        "{} baseline sessions pending - hiding '{}' sessions",
        pending_count, rules.ongoing_task
    );

    let Some(window) = TimeDelta::try_hours(rules.baseline_window_hours) else {
        warn!(
            "Baseline window of {} hours is out of range - leaving schedules as sent",
            rules.baseline_window_hours
        );
        return raw.to_vec();
    };
    raw.iter()
        .filter(|r| r.task_identifier != rules.ongoing_task)
        .map(|r| {
            if pending.matches(r) {
                derive_baseline(r, window, now)
            } else {
                r.clone()
            }
        })
        .collect()
}

/// Re-anchor a pending baseline session onto the current day.
///
/// The window opens at the original time of day on the later of today and
/// the original date. A window that has already closed is moved forward by
/// exactly one day, once: input that is still expired after that stays
/// expired.
pub fn derive_baseline(record: &ScheduleRecord, window: TimeDelta, now: Timestamp) -> ScheduleRecord {
    let anchor_day = now.max(record.scheduled_on);
    let mut scheduled_on = calendar::with_time_of(&anchor_day, &record.scheduled_on);
    let mut expires_on = scheduled_on.checked_add_signed(window).unwrap_or(scheduled_on);

    if now > expires_on {
        scheduled_on = calendar::add_days(&scheduled_on, 1);
        expires_on = calendar::add_days(&expires_on, 1);
    }

    ScheduleRecord {
        scheduled_on,
        expires_on: Some(expires_on),
        label_detail: None,
        ..record.clone()
    }
}

fn apply_combo_rules(
    raw: &[ScheduleRecord],
    store: &dyn ScheduleStore,
    rules: &ProtocolRules,
    now: Timestamp,
) -> Vec<ScheduleRecord> {
    // The server sometimes lists the same activity more than once
    let mut seen_activities: HashSet<&str> = HashSet::new();
    let mut schedules = Vec::with_capacity(raw.len());

    for record in raw {
        if !seen_activities.insert(record.activity_guid.as_str()) {
            debug!(
                "Skipping repeated schedule {} for activity {}",
                record.guid, record.activity_guid
            );
            continue;
        }
        schedules.extend(split_schedule(record, rules, now));
    }

    let combo = rules.combo_eligible();
    let training = Predicate::pending_task(&rules.training_task);
    let has_pending = raw.iter().any(|r| combo.matches(r) || training.matches(r));

    if !has_pending {
        if let Some(followup) = synthesize_followup(raw, store, rules) {
            debug!(
                "No pending sessions - adding follow-up {} on {}",
                followup.guid, followup.scheduled_on
            );
            schedules.extend(split_schedule(&followup, rules, now));
        }
    }

    schedules
}

/// Split a combined session into one sibling per day.
///
/// Each sibling keeps the original opening and closing time of day on its
/// own date. Records that are not combo-eligible come back unchanged.
pub fn split_schedule(
    record: &ScheduleRecord,
    rules: &ProtocolRules,
    now: Timestamp,
) -> Vec<ScheduleRecord> {
    if !rules.combo_eligible().matches(record) {
        return vec![record.clone()];
    }

    let Some(expires_on) = record.expires_on else {
        warn!(
            "Combined schedule {} has no expiry and cannot be split",
            record.guid
        );
        return vec![record.clone()];
    };

    (0..rules.combo_days)
        .map(|day| {
            let scheduled_on = calendar::add_days(&record.scheduled_on, i64::from(day));
            let day_expires_on = calendar::combine(scheduled_on.date_naive(), expires_on.time());

            let label_detail = if calendar::is_same_day(&scheduled_on, &now) {
                record.label_detail.clone()
            } else {
                Some(format!(
                    "{} until {}",
                    calendar::format_date(&scheduled_on),
                    calendar::format_time(&day_expires_on)
                ))
            };

            ScheduleRecord {
                guid: format!("{}:{}", record.guid, day + 1),
                scheduled_on,
                expires_on: Some(day_expires_on),
                finished_on: None,
                label_detail,
                ..record.clone()
            }
        })
        .collect()
}

/// Build the next session a week after the last finished one.
///
/// The server only returns a limited window of upcoming sessions, so when
/// nothing is pending the follow-up is derived locally. The source is the
/// last finished combined/training record in `raw`, or failing that the
/// latest one the store remembers.
fn synthesize_followup(
    raw: &[ScheduleRecord],
    store: &dyn ScheduleStore,
    rules: &ProtocolRules,
) -> Option<ScheduleRecord> {
    let session_tasks = Predicate::task_in([rules.combo_task.as_str(), rules.training_task.as_str()]);
    let finished = Predicate::Completed.and(session_tasks.clone());

    let source = match raw.iter().filter(|r| finished.matches(*r)).last() {
        Some(record) => record.clone(),
        None => match store.find_latest_completed(&session_tasks) {
            Ok(found) => found?.to_record(),
            Err(e) => {
                warn!("Could not look up the last finished session: {}", e);
                return None;
            }
        },
    };
    let finished_on = source.finished_on?;

    let (scheduled_on, expires_on) = if source.task_identifier == rules.combo_task {
        let Some(expires_on) = source.expires_on else {
            warn!(
                "Finished session {} has no expiry - skipping follow-up",
                source.guid
            );
            return None;
        };
        (
            calendar::checked_add_days(&source.scheduled_on, rules.followup_days)?,
            calendar::checked_add_days(&expires_on, rules.followup_days)?,
        )
    } else {
        let day = calendar::checked_add_days(&finished_on, rules.followup_days)?.date_naive();
        let scheduled_on = calendar::at_hour(day, rules.followup_hour);
        (
            scheduled_on,
            calendar::checked_add_hours(&scheduled_on, rules.followup_window_hours)?,
        )
    };

    Some(ScheduleRecord {
        guid: format!("{}:followup", source.guid),
        task_identifier: rules.combo_task.clone(),
        scheduled_on,
        expires_on: Some(expires_on),
        started_on: None,
        finished_on: None,
        label: rules.followup_label.clone(),
        label_detail: None,
        ..source
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_support;
    use crate::store::MemoryStore;
    use chrono::{Datelike, Local, TimeZone, Timelike};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    // Wednesday, January 15, 2025, 10:30:00 local time
    fn now() -> Timestamp {
        Local.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).single().unwrap()
    }

    fn ts(d: u32, h: u32) -> Timestamp {
        Local.with_ymd_and_hms(2025, 1, d, h, 0, 0).single().unwrap()
    }

    fn combo_rules() -> ProtocolRules {
        ProtocolRules {
            protocol: Protocol::ComboSplit,
            ..ProtocolRules::default()
        }
    }

    fn combo(guid: &str, scheduled_on: Timestamp) -> ScheduleRecord {
        let mut record = test_support::record(guid, "1-Combined", scheduled_on);
        // Offered over three days, 10:00 to 12:00
        record.expires_on = Some(calendar::add_days(&scheduled_on, 2) + TimeDelta::hours(2));
        record
    }

    #[test]
    fn test_split_into_three_days() {
        let rules = combo_rules();
        let record = combo("c", ts(22, 10));
        let split = split_schedule(&record, &rules, now());

        assert_eq!(split.len(), 3);
        for (i, day) in split.iter().enumerate() {
            assert_eq!(day.scheduled_on, calendar::add_days(&ts(22, 10), i as i64));
            assert_eq!(day.expires_on, Some(calendar::add_days(&ts(22, 12), i as i64)));
            assert_eq!(day.task_identifier, "1-Combined");
            assert_eq!(day.activity_guid, record.activity_guid);
            assert_eq!(day.label, record.label);
            assert!(day.finished_on.is_none());
        }
        let guids: Vec<&str> = split.iter().map(|r| r.guid.as_str()).collect();
        assert_eq!(guids, vec!["c:1", "c:2", "c:3"]);
        assert_eq!(split[0].expires_on.unwrap().hour(), 12);
    }

    #[test]
    fn test_split_crosses_month_boundary() {
        let rules = combo_rules();
        let start = Local.with_ymd_and_hms(2025, 1, 31, 10, 0, 0).single().unwrap();
        let split = split_schedule(&combo("c", start), &rules, now());
        let days: Vec<String> = split
            .iter()
            .map(|r| r.scheduled_on.format("%m-%d %H:%M").to_string())
            .collect();
        assert_eq!(days, vec!["01-31 10:00", "02-01 10:00", "02-02 10:00"]);
    }

    #[test]
    fn test_split_passes_through_non_combo_and_finished() {
        let rules = combo_rules();
        let survey = test_support::survey("s", "PDQ8", ts(15, 9));
        assert_eq!(split_schedule(&survey, &rules, now()), vec![survey.clone()]);

        let mut done = combo("c", ts(15, 10));
        done.finished_on = Some(ts(15, 10));
        assert_eq!(split_schedule(&done, &rules, now()), vec![done.clone()]);
    }

    #[test]
    fn test_split_without_expiry_is_left_alone() {
        let rules = combo_rules();
        let record = test_support::record("c", "1-Combined", ts(20, 10));
        assert_eq!(split_schedule(&record, &rules, now()), vec![record.clone()]);
    }

    #[test]
    fn test_split_label_detail_for_other_days() {
        let rules = combo_rules();
        let split = split_schedule(&combo("c", ts(15, 10)), &rules, now());
        assert!(split[0].label_detail.is_none());
        assert_eq!(
            split[1].label_detail.as_deref(),
            Some("Jan 16, 2025 until 12:00 pm")
        );
    }

    #[test]
    fn test_combo_rules_keep_finished_and_split_pending() {
        let store = MemoryStore::new();
        let rules = combo_rules();

        let pdq8 = test_support::survey("pdq8", "PDQ8", ts(15, 9));
        let mut first = combo("first", ts(8, 10));
        first.finished_on = Some(ts(8, 10));
        let second = combo("second", ts(22, 10));
        let raw = vec![pdq8.clone(), first.clone(), second];

        let schedules = normalize(&raw, &store, &rules, now());
        let sessions: Vec<&ScheduleRecord> = schedules
            .iter()
            .filter(|r| r.task_identifier == "1-Combined")
            .collect();

        assert_eq!(sessions.len(), 4);
        assert_eq!(sessions[0], &first);
        assert_eq!(schedules[0], pdq8);
        let split_days: Vec<u32> = sessions[1..].iter().map(|r| r.scheduled_on.day()).collect();
        assert_eq!(split_days, vec![22, 23, 24]);
    }

    #[test]
    fn test_combo_rules_drop_repeated_activity() {
        let store = MemoryStore::new();
        let rules = combo_rules();
        let survey = test_support::survey("s", "PDQ8", ts(15, 9));
        let mut repeat = survey.clone();
        repeat.guid = "s-again".to_string();

        let schedules = normalize(&[survey.clone(), repeat], &store, &rules, now());
        assert_eq!(schedules, vec![survey]);
    }

    #[test]
    fn test_followup_from_training() {
        let store = MemoryStore::new();
        let rules = combo_rules();
        let mut training = test_support::record("training", "Training-Combined", ts(1, 7));
        training.finished_on = Some(ts(1, 11));

        let schedules = normalize(&[training.clone()], &store, &rules, now());
        assert_eq!(schedules.len(), 4);
        assert_eq!(schedules[0], training);

        let followups = &schedules[1..];
        assert_eq!(followups[0].guid, "training:followup:1");
        assert_eq!(followups[0].scheduled_on, ts(8, 10));
        // 10:00 plus 50 hours closes at 12:00
        assert_eq!(followups[0].expires_on, Some(ts(8, 12)));
        assert_eq!(followups[2].scheduled_on, ts(10, 10));
        for record in followups {
            assert_eq!(record.task_identifier, "1-Combined");
            assert_eq!(record.label, "Activity Session");
            assert!(record.finished_on.is_none());
        }
    }

    #[test]
    fn test_followup_from_cached_combo() {
        let store = MemoryStore::new();
        let rules = combo_rules();
        let mut done = combo("old", ts(1, 10));
        done.finished_on = Some(ts(2, 11));
        store.upsert_batch(&[done]).unwrap();

        // The live list no longer carries the finished session
        let survey = test_support::survey("s", "PDQ8", ts(15, 9));
        let schedules = normalize(&[survey], &store, &rules, now());

        let followups: Vec<&ScheduleRecord> = schedules
            .iter()
            .filter(|r| r.guid.starts_with("old:followup"))
            .collect();
        assert_eq!(followups.len(), 3);
        assert_eq!(followups[0].scheduled_on, ts(8, 10));
        assert_eq!(followups[0].expires_on, Some(ts(8, 12)));
    }

    #[test]
    fn test_no_followup_while_session_pending() {
        let store = MemoryStore::new();
        let rules = combo_rules();
        let mut training = test_support::record("training", "Training-Combined", ts(1, 7));
        training.finished_on = Some(ts(1, 11));
        let pending = test_support::record("next", "Training-Combined", ts(20, 7));

        let schedules = normalize(&[training, pending], &store, &rules, now());
        assert_eq!(schedules.len(), 2);
    }

    #[test]
    fn test_baseline_derivation_moves_to_today() {
        // Pending since three days ago at 09:00, six hour window
        let record = test_support::record("b", "Baseline-Combined", ts(12, 9));
        let derived = derive_baseline(&record, TimeDelta::hours(6), now());
        assert_eq!(derived.scheduled_on, ts(15, 9));
        assert_eq!(derived.expires_on, Some(ts(15, 15)));
        assert!(!derived.is_expired(&now()));
    }

    #[test]
    fn test_baseline_derivation_keeps_future_day() {
        let record = test_support::record("b", "Baseline-Combined", ts(17, 6));
        let derived = derive_baseline(&record, TimeDelta::hours(6), now());
        assert_eq!(derived.scheduled_on, ts(17, 6));
        assert_eq!(derived.expires_on, Some(ts(17, 12)));
    }

    #[test]
    fn test_baseline_derivation_rolls_forward_exactly_once() {
        // Today's window (06:00-08:00) closed before 10:30
        let record = test_support::record("b", "Baseline-Combined", ts(10, 6));
        let derived = derive_baseline(&record, TimeDelta::hours(2), now());
        assert_eq!(derived.scheduled_on, ts(16, 6));
        assert_eq!(derived.expires_on, Some(ts(16, 8)));

        // A single roll, never a second one: the result is today's window plus
        // one day, even though the check is not repeated.
        let today_window = calendar::with_time_of(&now(), &record.scheduled_on);
        assert_eq!(derived.scheduled_on, calendar::add_days(&today_window, 1));
        assert_ne!(derived.scheduled_on, calendar::add_days(&today_window, 2));
    }

    #[test]
    fn test_baseline_rules_need_more_than_one_pending() {
        let store = MemoryStore::new();
        let rules = ProtocolRules::default();
        let baseline = test_support::record("b", "Baseline-Combined", ts(12, 9));
        let ongoing = test_support::record("o", "Ongoing-Combined", ts(22, 9));
        let raw = vec![baseline, ongoing];

        assert_eq!(normalize(&raw, &store, &rules, now()), raw);
    }

    #[test]
    fn test_baseline_rules_drop_ongoing_and_derive() {
        let store = MemoryStore::new();
        let rules = ProtocolRules::default();
        let survey = test_support::survey("s", "PDQ8", ts(15, 9));
        let b1 = test_support::record("b1", "Baseline-Combined", ts(12, 9));
        let ongoing = test_support::record("o", "Ongoing-Combined", ts(22, 9));
        let b2 = test_support::record("b2", "Baseline-Combined", ts(16, 9));
        let mut finished = test_support::record("b0", "Baseline-Combined", ts(5, 9));
        finished.finished_on = Some(ts(5, 10));

        let raw = vec![survey.clone(), b1, ongoing, finished.clone(), b2];
        let schedules = normalize(&raw, &store, &rules, now());

        let guids: Vec<&str> = schedules.iter().map(|r| r.guid.as_str()).collect();
        assert_eq!(guids, vec!["s", "b1", "b0", "b2"]);
        assert_eq!(schedules[0], survey);
        assert_eq!(schedules[1].scheduled_on, ts(15, 9));
        assert_eq!(schedules[2], finished);
        assert_eq!(schedules[3].expires_on, Some(ts(16, 15)));
    }

    #[test]
    fn test_out_of_range_rules_do_not_panic() {
        let store = MemoryStore::new();
        let baseline_rules = ProtocolRules {
            baseline_window_hours: i64::MAX,
            ..ProtocolRules::default()
        };
        let raw = vec![
            test_support::record("b1", "Baseline-Combined", ts(12, 9)),
            test_support::record("b2", "Baseline-Combined", ts(16, 9)),
        ];
        assert_eq!(normalize(&raw, &store, &baseline_rules, now()), raw);

        let followup_rules = ProtocolRules {
            followup_days: 200_000_000_000_000,
            followup_window_hours: i64::MAX,
            ..combo_rules()
        };
        let mut training = test_support::record("training", "Training-Combined", ts(1, 7));
        training.finished_on = Some(ts(1, 11));
        let schedules = normalize(&[training.clone()], &store, &followup_rules, now());
        assert_eq!(schedules, vec![training]);
    }

    #[test]
    fn test_ensure_valid_clamps_out_of_range_values() {
        let mut rules = ProtocolRules {
            combo_days: 400,
            baseline_window_hours: 10_000,
            followup_days: -7,
            followup_hour: 24,
            followup_window_hours: i64::MAX,
            ..ProtocolRules::default()
        };
        rules.ensure_valid();
        assert_eq!(rules, ProtocolRules::default());
    }

    #[test]
    fn test_normalize_is_repeatable() {
        let store = MemoryStore::new();
        for rules in [ProtocolRules::default(), combo_rules()] {
            let raw = vec![
                test_support::record("b1", "Baseline-Combined", ts(12, 9)),
                test_support::record("b2", "Baseline-Combined", ts(16, 9)),
                combo("c", ts(20, 10)),
            ];
            let before = raw.clone();
            let first = normalize(&raw, &store, &rules, now());
            let second = normalize(&raw, &store, &rules, now());
            assert_eq!(first, second);
            assert_eq!(raw, before);
        }
    }

    proptest! {
        #[test]
        fn prop_split_keeps_time_of_day(
            day in 1u32..=28,
            hour in 0u32..=20,
            window in 1i64..=3,
            days in 1u32..=7,
        ) {
            let rules = ProtocolRules { combo_days: days, ..combo_rules() };
            let start = Local.with_ymd_and_hms(2025, 6, day, hour, 0, 0).single().unwrap();
            let mut record = test_support::record("p", "1-Combined", start);
            record.expires_on = Some(start + TimeDelta::hours(window));

            let split = split_schedule(&record, &rules, now());
            prop_assert_eq!(split.len(), days as usize);
            for (i, part) in split.iter().enumerate() {
                prop_assert_eq!(part.scheduled_on, calendar::add_days(&start, i as i64));
                prop_assert_eq!(part.scheduled_on.time(), start.time());
                prop_assert_eq!(part.expires_on.unwrap().time(), record.expires_on.unwrap().time());
                prop_assert!(part.finished_on.is_none());
            }
        }
    }
}
