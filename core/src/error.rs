//! Error types for resq-core.
//!
//! Every error here is recoverable: the caller (presentation code or the
//! session service) reports it to the user, who corrects the input or refreshes
//! their view and retries. Nothing in the core is fatal to the process.
//!
//! # Error Categories
//!
//! - **Input errors**: `Validation`
//! - **Lookup errors**: `ContactNotFound`, `EventNotFound`
//! - **Policy errors**: `Locked`
//! - **Alert errors**: `InvalidPin`, `NotActive`, `EventClosed`
//!
//! [`LocationError`] is separate from [`Error`]: a failed position request is
//! best-effort and never becomes the error of the operation that triggered it.

use crate::event_log::EventStatus;
use std::fmt;
use uuid::Uuid;

/// Result type alias for resq-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during resq-core operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    // ==================== Input Errors ====================
    /// One or more required fields are missing or malformed.
    ///
    /// Lists every offending field so the form can highlight all of them at once.
    #[error("validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    // ==================== Lookup Errors ====================
    /// The contact id is not (or no longer) in the registry.
    #[error("contact not found: {0}")]
    ContactNotFound(Uuid),

    /// The event id is not in the alert history.
    #[error("event not found: {0}")]
    EventNotFound(Uuid),

    // ==================== Policy Errors ====================
    /// The mutation is forbidden by the safety policy.
    ///
    /// The reason is meant to be shown to the user verbatim: they need to know
    /// why, not just that it failed.
    #[error("locked: {0}")]
    Locked(LockReason),

    // ==================== Alert Errors ====================
    /// The PIN entered to resolve an active alert does not match.
    ///
    /// Repeatable; there is no attempt counter.
    #[error("invalid SOS PIN")]
    InvalidPin,

    /// A resolve was attempted while no alert is active.
    #[error("no active SOS alert")]
    NotActive,

    /// The event already left the `active` status.
    #[error("event {id} is already {status}")]
    EventClosed {
        /// The event that was targeted.
        id: Uuid,
        /// Its current, terminal status.
        status: EventStatus,
    },
}

impl Error {
    /// Shorthand for a single-field validation error.
    pub fn invalid(field: &'static str, problem: FieldProblem) -> Self {
        Error::Validation(vec![FieldError { field, problem }])
    }

    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::ContactNotFound(_) | Error::EventNotFound(_) => "NOT_FOUND",
            Error::Locked(_) => "LOCKED",
            Error::InvalidPin => "INVALID_PIN",
            Error::NotActive => "NOT_ACTIVE",
            Error::EventClosed { .. } => "EVENT_CLOSED",
        }
    }
}

/// A single field that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    /// Field name as presented to callers (`name`, `phone`, `sosPin`, ...).
    pub field: &'static str,
    /// What is wrong with it.
    pub problem: FieldProblem,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.problem)
    }
}

/// Why a field was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldProblem {
    /// Required but empty or absent.
    Missing,
    /// Shorter than the allowed minimum.
    TooShort {
        /// Minimum length in characters.
        min: usize,
    },
    /// Must equal another field (PIN confirmation).
    Mismatch,
    /// Present but not in an accepted form.
    Malformed,
    /// Not one of the accepted values.
    OutOfRange,
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing => write!(f, "is required"),
            FieldProblem::TooShort { min } => write!(f, "must be at least {} characters", min),
            FieldProblem::Mismatch => write!(f, "does not match"),
            FieldProblem::Malformed => write!(f, "is malformed"),
            FieldProblem::OutOfRange => write!(f, "is not an accepted value"),
        }
    }
}

/// Why the safety policy refused a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    /// Best-friend mode is mandatory for a minor's Mother contact.
    MinorSafetyMother,
    /// Individual permissions cannot be edited while best-friend mode forces
    /// every permission on.
    BestFriendPermissions,
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockReason::MinorSafetyMother => {
                write!(f, "Best-Friend mode is locked for Mother (Minor Safety)")
            }
            LockReason::BestFriendPermissions => write!(
                f,
                "permissions are fixed while Best-Friend mode is on; disable it first"
            ),
        }
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure to obtain the device position.
///
/// Never propagated as the failure of an alert trigger; the alert stays sent and
/// its event simply has no location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// The platform has no location capability.
    #[error("location capability unavailable")]
    Unavailable,

    /// The user denied location access.
    #[error("location permission denied")]
    PermissionDenied,

    /// The provider did not answer in time.
    #[error("location request timed out")]
    Timeout,

    /// Any other provider failure.
    #[error("location request failed: {0}")]
    Failed(String),
}
