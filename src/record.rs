use crate::calendar::{self, Timestamp};
use crate::error::CadenceError;
use serde::{Deserialize, Serialize};

/// One scheduled instance of an activity, as handed over by the sync layer.
///
/// Records are plain values: the splitter copies and rewrites them freely and
/// never touches the caller's list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    pub guid: String,
    pub activity_guid: String,
    pub task_identifier: String,
    pub survey_identifier: Option<String>,
    pub scheduled_on: Timestamp,
    pub expires_on: Option<Timestamp>,
    pub started_on: Option<Timestamp>,
    pub finished_on: Option<Timestamp>,
    pub persistent: bool,
    pub status: String,
    pub label: String,
    pub label_detail: Option<String>,
}

impl ScheduleRecord {
    pub fn is_completed(&self) -> bool {
        self.finished_on.is_some()
    }

    pub fn is_expired(&self, now: &Timestamp) -> bool {
        self.finished_on.is_none() && self.expires_on.is_some_and(|e| e < *now)
    }

    pub fn is_survey(&self) -> bool {
        self.survey_identifier.is_some()
    }
}

/// The record as it arrives on the wire.
///
/// Every field is optional so a single bad row can be reported and skipped
/// instead of failing the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireRecord {
    pub guid: Option<String>,
    pub activity_guid: Option<String>,
    pub task_identifier: Option<String>,
    pub survey_identifier: Option<String>,
    pub scheduled_on: Option<Timestamp>,
    pub expires_on: Option<Timestamp>,
    pub started_on: Option<Timestamp>,
    pub finished_on: Option<Timestamp>,
    pub persistent: Option<bool>,
    pub status: Option<String>,
    pub label: Option<String>,
    pub label_detail: Option<String>,
}

impl TryFrom<WireRecord> for ScheduleRecord {
    type Error = CadenceError;

    fn try_from(wire: WireRecord) -> Result<Self, Self::Error> {
        let guid = wire.guid.ok_or_else(|| CadenceError::MalformedRecord {
            guid: "<none>".to_string(),
            reason: "missing guid".to_string(),
        })?;

        let scheduled_on = wire.scheduled_on.ok_or_else(|| CadenceError::MalformedRecord {
            guid: guid.clone(),
            reason: "missing scheduledOn".to_string(),
        })?;

        // Surveys are referenced by their survey identifier
        let task_identifier = wire
            .task_identifier
            .or_else(|| wire.survey_identifier.clone())
            .ok_or_else(|| CadenceError::MalformedRecord {
                guid: guid.clone(),
                reason: "missing taskIdentifier".to_string(),
            })?;

        Ok(ScheduleRecord {
            activity_guid: wire.activity_guid.unwrap_or_else(|| guid.clone()),
            guid,
            task_identifier,
            survey_identifier: wire.survey_identifier,
            scheduled_on,
            expires_on: wire.expires_on,
            started_on: wire.started_on,
            finished_on: wire.finished_on,
            persistent: wire.persistent.unwrap_or(false),
            status: wire.status.unwrap_or_default(),
            label: wire.label.unwrap_or_default(),
            label_detail: wire.label_detail,
        })
    }
}

/// Row of the local schedule cache.
///
/// Keyed by `guid`; every later sighting of the same guid overwrites the row.
/// Rows are never removed so completions stay visible after the server stops
/// listing them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSchedule {
    pub guid: String,
    pub activity_guid: String,
    pub task_identifier: String,
    pub survey_identifier: Option<String>,
    pub scheduled_on: Timestamp,
    pub expires_on: Option<Timestamp>,
    pub started_on: Option<Timestamp>,
    pub finished_on: Option<Timestamp>,
    pub persistent: bool,
    pub status: String,
    pub label: String,
}

impl From<&ScheduleRecord> for CachedSchedule {
    fn from(record: &ScheduleRecord) -> Self {
        CachedSchedule {
            guid: record.guid.clone(),
            activity_guid: record.activity_guid.clone(),
            task_identifier: record.task_identifier.clone(),
            survey_identifier: record.survey_identifier.clone(),
            scheduled_on: record.scheduled_on,
            expires_on: record.expires_on,
            started_on: record.started_on,
            finished_on: record.finished_on,
            persistent: record.persistent,
            status: record.status.clone(),
            label: record.label.clone(),
        }
    }
}

impl CachedSchedule {
    /// Rebuild a display record, with a detail line describing how the
    /// activity ended.
    pub fn to_record(&self) -> ScheduleRecord {
        let label_detail = match (self.finished_on, self.expires_on) {
            (Some(finished_on), _) => {
                Some(format!("Completed: {}", calendar::format_date_time(&finished_on)))
            }
            (None, Some(expires_on)) => {
                Some(format!("Expired: {}", calendar::format_date_time(&expires_on)))
            }
            (None, None) => None,
        };

        ScheduleRecord {
            guid: self.guid.clone(),
            activity_guid: self.activity_guid.clone(),
            task_identifier: self.task_identifier.clone(),
            survey_identifier: self.survey_identifier.clone(),
            scheduled_on: self.scheduled_on,
            expires_on: self.expires_on,
            started_on: self.started_on,
            finished_on: self.finished_on,
            persistent: self.persistent,
            status: self.status.clone(),
            label: self.label.clone(),
            label_detail,
        }
    }
}

/// A local notification to be delivered at `fire_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderEntry {
    pub fire_at: Timestamp,
    pub message: String,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn record(guid: &str, task: &str, scheduled_on: Timestamp) -> ScheduleRecord {
        ScheduleRecord {
            guid: guid.to_string(),
            activity_guid: format!("{guid}-activity"),
            task_identifier: task.to_string(),
            survey_identifier: None,
            scheduled_on,
            expires_on: None,
            started_on: None,
            finished_on: None,
            persistent: false,
            status: "available".to_string(),
            label: task.to_string(),
            label_detail: None,
        }
    }

    pub fn survey(guid: &str, survey_id: &str, scheduled_on: Timestamp) -> ScheduleRecord {
        ScheduleRecord {
            survey_identifier: Some(survey_id.to_string()),
            ..record(guid, survey_id, scheduled_on)
        }
    }
}
