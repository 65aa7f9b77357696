//! Grouping of normalized schedules into the "today" view sections.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::calendar::{self, Timestamp};
use crate::config::ensure_in_range;
use crate::normalize::ProtocolRules;
use crate::record::ScheduleRecord;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Section {
    ExpiredYesterday,
    Today,
    KeepGoing,
    ComingUp,
    ComingWeek,
}

impl Section {
    pub fn title(self) -> &'static str {
        match self {
            Section::ExpiredYesterday => "Expired Yesterday",
            Section::Today => "Today",
            Section::KeepGoing => "Keep Going!",
            Section::ComingUp => "Coming Up",
            Section::ComingWeek => "Coming This Week",
        }
    }

    fn contains(self, record: &ScheduleRecord, now: &Timestamp, days_ahead: i64) -> bool {
        let start_today = calendar::start_of_day(now);
        let start_tomorrow = calendar::start_of_tomorrow(now);
        let finished_today = record.finished_on.map_or(true, |f| f >= start_today);

        match self {
            Section::ExpiredYesterday => {
                let start_yesterday = calendar::add_days(&start_today, -1);
                record.finished_on.is_none()
                    && record
                        .expires_on
                        .is_some_and(|e| e >= start_yesterday && e < start_today)
            }
            Section::Today => {
                !record.persistent
                    && record.scheduled_on < start_tomorrow
                    && record.expires_on.map_or(true, |e| e >= start_today)
                    && finished_today
            }
            Section::KeepGoing => {
                record.persistent
                    && record.scheduled_on < start_tomorrow
                    && record.expires_on.map_or(true, |e| e >= *now)
                    && finished_today
            }
            Section::ComingUp | Section::ComingWeek => {
                let days = if self == Section::ComingWeek {
                    7
                } else {
                    days_ahead
                };
                let end = calendar::add_days(&start_tomorrow, days);
                record.finished_on.is_none()
                    && record.scheduled_on >= start_tomorrow
                    && record.scheduled_on < end
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SectionConfig {
    pub sections: Vec<Section>,
    pub days_ahead: i64,
}

impl Default for SectionConfig {
    fn default() -> Self {
        SectionConfig {
            sections: vec![
                Section::ExpiredYesterday,
                Section::Today,
                Section::KeepGoing,
                Section::ComingUp,
            ],
            days_ahead: 10,
        }
    }
}

impl SectionConfig {
    const MAX_DAYS_AHEAD: i64 = 3650;

    pub(crate) fn ensure_valid(&mut self) {
        let defaults = Self::default();

        if self.sections.is_empty() {
            eprintln!("Config error: no sections configured - using defaults");
            self.sections = defaults.sections;
        }
        ensure_in_range(
            &mut self.days_ahead,
            "days_ahead",
            1..=Self::MAX_DAYS_AHEAD,
            defaults.days_ahead,
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleSection {
    pub section: Section,
    pub title: String,
    pub schedules: Vec<ScheduleRecord>,
}

/// Place each record in the first configured section whose rule it matches.
///
/// Records matching no section are left out, as are sections with nothing in
/// them. Record order inside a section follows the input.
pub fn bucket(
    schedules: &[ScheduleRecord],
    config: &SectionConfig,
    now: Timestamp,
) -> Vec<ScheduleSection> {
    let mut buckets: Vec<ScheduleSection> = config
        .sections
        .iter()
        .map(|section| ScheduleSection {
            section: *section,
            title: section.title().to_string(),
            schedules: Vec::new(),
        })
        .collect();

    for record in schedules {
        if let Some(bucket) = buckets
            .iter_mut()
            .find(|b| b.section.contains(record, &now, config.days_ahead))
        {
            bucket.schedules.push(record.clone());
        }
    }

    buckets.retain(|b| !b.schedules.is_empty());
    buckets
}

/// Text shown when the participant taps a session that is not open yet.
pub fn unavailable_message(record: &ScheduleRecord, rules: &ProtocolRules) -> String {
    match record.expires_on {
        Some(expires_on) if record.task_identifier == rules.combo_task => format!(
            "This activity is available from {} until {} for {} days. \
             You only need to complete the activity on one of the available days",
            calendar::format_time(&record.scheduled_on),
            calendar::format_time(&expires_on),
            spell_out(rules.combo_days)
        ),
        _ => format!(
            "This activity will be available on {} at {}",
            calendar::format_date(&record.scheduled_on),
            calendar::format_time(&record.scheduled_on)
        ),
    }
}

fn spell_out(n: u32) -> String {
    const WORDS: [&str; 11] = [
        "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    ];
    WORDS
        .get(n as usize)
        .map(|w| w.to_string())
        .unwrap_or_else(|| n.to_string())
}

/// Whether `record` is still ahead of `now` and so cannot be started yet.
pub fn is_upcoming(record: &ScheduleRecord, now: &Timestamp) -> bool {
    record.finished_on.is_none() && record.scheduled_on > *now
}
