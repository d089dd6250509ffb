//! Error enums shared across crate boundaries (spec.md §7).
//!
//! Component-local faults (`AdmissionError`, `TransientWorkerError`, ...) live
//! next to the component that raises them; only the ones every caller needs
//! to match on live here, mirroring `casparian_protocol::types::JobIdError`
//! being the one error type re-exported from the protocol crate's root.

use thiserror::Error;

/// A lookup by id found nothing (scheduled task, heartbeat job, group).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind} not found: {id}")]
pub struct NotFoundError {
    pub kind: &'static str,
    pub id: String,
}

impl NotFoundError {
    pub fn new(kind: &'static str, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// User-supplied input failed a well-formedness check before reaching a
/// component (cron expression, schedule value, mount path, ...).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_error_message_names_kind_and_id() {
        let err = NotFoundError::new("task", "abc-123");
        assert_eq!(err.to_string(), "task not found: abc-123");
    }

    #[test]
    fn validation_error_message_names_field_and_reason() {
        let err = ValidationError::new("schedule_value", "not a valid cron expression");
        assert_eq!(
            err.to_string(),
            "invalid schedule_value: not a valid cron expression"
        );
    }
}
