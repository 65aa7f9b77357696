use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

/// Failures raised by a [`crate::store::ScheduleStore`].
///
/// Every variant is recoverable: the manager logs it and keeps going with
/// whatever the store already holds.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store write failed: {0}")]
    Write(String),

    #[error("Store read failed: {0}")]
    Read(String),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Database error: {0}")]
    Database(#[from] RusqliteError),

    #[error("Schema error: {0}")]
    Schema(String),
}

#[derive(Error, Debug)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed schedule record '{guid}': {reason}")]
    MalformedRecord { guid: String, reason: String },

    #[error("Error: {0}")]
    Error(String),
}
