//! Turns server-issued study schedules into the sessions a participant sees
//! and the local reminders that go with them.

pub mod calendar;
pub mod cli;
pub mod config;
pub mod error;
pub mod manager;
pub mod normalize;
pub mod predicate;
pub mod record;
pub mod reminders;
pub mod sections;
pub mod store;

pub use error::{CadenceError, NotifyError, StoreError};
pub use manager::{ManagerConfig, NormalizedResult, ScheduleManager};
pub use record::{ReminderEntry, ScheduleRecord, WireRecord};
pub use store::{MemoryStore, ScheduleStore, SqliteStore};
