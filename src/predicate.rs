//! Composable boolean predicates over schedule records and cached rows.
//!
//! A [`Predicate`] is evaluated in-process against anything implementing
//! [`PredicateTarget`], and the SQLite store turns the same value into a
//! parameterized `WHERE` clause with [`Predicate::to_predicate_parts`].

use crate::calendar::Timestamp;
use crate::record::{CachedSchedule, ScheduleRecord};
use rusqlite::ToSql;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Guid,
    ActivityGuid,
    TaskIdentifier,
    SurveyIdentifier,
    Status,
}

impl Field {
    pub fn column(self) -> &'static str {
        match self {
            Field::Guid => "guid",
            Field::ActivityGuid => "activity_guid",
            Field::TaskIdentifier => "task_identifier",
            Field::SurveyIdentifier => "survey_identifier",
            Field::Status => "status",
        }
    }

    /// Whether the stored column can hold NULL
    pub fn is_nullable(self) -> bool {
        matches!(self, Field::SurveyIdentifier)
    }

    // SQL comparisons against NULL yield NULL, and `NOT NULL` is still NULL.
    // Guarding nullable columns keeps `NOT` in step with `matches`, where an
    // absent field simply fails the comparison.
    fn null_guard(self) -> String {
        if self.is_nullable() {
            format!("{} IS NOT NULL AND ", self.column())
        } else {
            String::new()
        }
    }
}

/// Read access used by predicate evaluation.
pub trait PredicateTarget {
    fn field(&self, field: Field) -> Option<&str>;
    fn finished_on(&self) -> Option<Timestamp>;
    fn expires_on(&self) -> Option<Timestamp>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals(Field, String),
    In(Field, Vec<String>),
    /// `finished_on` is set
    Completed,
    /// `expires_on` is set and earlier than the given instant
    ExpiredBefore(Timestamp),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn equals(field: Field, value: impl Into<String>) -> Self {
        Predicate::Equals(field, value.into())
    }

    pub fn task_in<I, S>(tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::In(Field::TaskIdentifier, tasks.into_iter().map(Into::into).collect())
    }

    pub fn activity_guid(guid: impl Into<String>) -> Self {
        Predicate::equals(Field::ActivityGuid, guid)
    }

    pub fn survey_identifier(id: impl Into<String>) -> Self {
        Predicate::equals(Field::SurveyIdentifier, id)
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut preds) => {
                preds.push(other);
                Predicate::And(preds)
            }
            pred => Predicate::And(vec![pred, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut preds) => {
                preds.push(other);
                Predicate::Or(preds)
            }
            pred => Predicate::Or(vec![pred, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// "Not finished yet and tagged `task`"
    pub fn pending_task(task: impl Into<String>) -> Self {
        Predicate::Completed
            .not()
            .and(Predicate::equals(Field::TaskIdentifier, task))
    }

    pub fn matches<T: PredicateTarget + ?Sized>(&self, target: &T) -> bool {
        match self {
            Predicate::Equals(field, value) => target.field(*field) == Some(value.as_str()),
            Predicate::In(field, values) => target
                .field(*field)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Predicate::Completed => target.finished_on().is_some(),
            Predicate::ExpiredBefore(instant) => {
                target.expires_on().is_some_and(|e| e < *instant)
            }
            Predicate::And(preds) => preds.iter().all(|p| p.matches(target)),
            Predicate::Or(preds) => preds.iter().any(|p| p.matches(target)),
            Predicate::Not(pred) => !pred.matches(target),
        }
    }

    /// return predicate text and params
    pub fn to_predicate_parts(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut pred_str = String::new();
        let mut pred_vec: Vec<Box<dyn ToSql>> = Vec::new();
        self.push_parts(&mut pred_str, &mut pred_vec);
        (pred_str, pred_vec)
    }

    fn push_parts(&self, pred_str: &mut String, pred_vec: &mut Vec<Box<dyn ToSql>>) {
        match self {
            Predicate::Equals(field, value) => {
                pred_str.push_str(&format!("({}{} = ?)", field.null_guard(), field.column()));
                pred_vec.push(Box::new(value.clone()));
            }
            Predicate::In(field, values) => {
                if values.is_empty() {
                    // Nothing is a member of the empty set
                    pred_str.push_str("(0)");
                    return;
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                pred_str.push_str(&format!(
                    "({}{} IN ({}))",
                    field.null_guard(),
                    field.column(),
                    placeholders
                ));
                for value in values {
                    pred_vec.push(Box::new(value.clone()));
                }
            }
            Predicate::Completed => pred_str.push_str("(finished_on IS NOT NULL)"),
            Predicate::ExpiredBefore(instant) => {
                pred_str.push_str("(expires_on IS NOT NULL AND expires_on < ?)");
                pred_vec.push(Box::new(instant.timestamp_millis()));
            }
            Predicate::And(preds) => Self::push_joined(preds, " AND ", "(1)", pred_str, pred_vec),
            Predicate::Or(preds) => Self::push_joined(preds, " OR ", "(0)", pred_str, pred_vec),
            Predicate::Not(pred) => {
                pred_str.push_str("(NOT ");
                pred.push_parts(pred_str, pred_vec);
                pred_str.push(')');
            }
        }
    }

    fn push_joined(
        preds: &[Predicate],
        sep: &str,
        empty: &str,
        pred_str: &mut String,
        pred_vec: &mut Vec<Box<dyn ToSql>>,
    ) {
        if preds.is_empty() {
            pred_str.push_str(empty);
            return;
        }

        pred_str.push('(');
        let mut first = true;
        for pred in preds {
            match first {
                true => first = false,
                false => pred_str.push_str(sep),
            }
            pred.push_parts(pred_str, pred_vec);
        }
        pred_str.push(')');
    }
}

impl PredicateTarget for ScheduleRecord {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::Guid => Some(&self.guid),
            Field::ActivityGuid => Some(&self.activity_guid),
            Field::TaskIdentifier => Some(&self.task_identifier),
            Field::SurveyIdentifier => self.survey_identifier.as_deref(),
            Field::Status => Some(&self.status),
        }
    }

    fn finished_on(&self) -> Option<Timestamp> {
        self.finished_on
    }

    fn expires_on(&self) -> Option<Timestamp> {
        self.expires_on
    }
}

impl PredicateTarget for CachedSchedule {
    fn field(&self, field: Field) -> Option<&str> {
        match field {
            Field::Guid => Some(&self.guid),
            Field::ActivityGuid => Some(&self.activity_guid),
            Field::TaskIdentifier => Some(&self.task_identifier),
            Field::SurveyIdentifier => self.survey_identifier.as_deref(),
            Field::Status => Some(&self.status),
        }
    }

    fn finished_on(&self) -> Option<Timestamp> {
        self.finished_on
    }

    fn expires_on(&self) -> Option<Timestamp> {
        self.expires_on
    }
}
