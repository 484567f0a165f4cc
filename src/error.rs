//! Error types for availability operations.

use crate::types::TimeOffStatus;
use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use uuid::Uuid;

/// Malformed input, rejected before anything is written. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Day of week must be within 0..=6, got {0}")]
    InvalidDayOfWeek(u8),

    #[error("Start time {start} must be before end time {end}")]
    EmptyWindow { start: NaiveTime, end: NaiveTime },

    #[error("Start date {start} must not be after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Partial-day time off needs both a start and an end time")]
    IncompletePartialDay,

    #[error("Invalid time format, expected HH:MM: {0}")]
    InvalidTimeFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid bulk request: {0}")]
    InvalidBulkRequest(String),

    #[error("Rejected by the availability service: {0}")]
    Rejected(String),
}

/// Main error type of the availability core.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: TimeOffStatus,
        to: TimeOffStatus,
        reason: String,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        CoreError::NotFound { kind, id }
    }

    /// Only transient collaborator failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Network(_))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CoreError::Network(format!("undecodable response: {err}"))
        } else {
            CoreError::Network(err.to_string())
        }
    }
}

/// Result type alias for availability operations.
pub type Result<T> = std::result::Result<T, CoreError>;
