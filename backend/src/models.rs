//! Request/response models for the RESQ HTTP API.
//!
//! Domain records (contacts, events) are returned as-is; the profile is
//! returned through [`ProfileView`], which never carries the SOS PIN.

use chrono::{Local, NaiveDate};
use resq_core::{
    age_on, policy, AlertState, CancelOutcome, Contact, FieldError, LayoutStyle, LockReason,
    PermissionKey, ResolveOutcome, SafetySettings, SosEvent, TapOutcome, UserProfile,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Quick-dial numbers
// ============================================================================

/// A public emergency service on the quick-dial list
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EmergencyNumber {
    pub service: &'static str,
    pub number: &'static str,
}

/// Quick-dial list shown on the SOS screen
pub static EMERGENCY_NUMBERS: [EmergencyNumber; 4] = [
    EmergencyNumber {
        service: "Police",
        number: "112",
    },
    EmergencyNumber {
        service: "Ambulance",
        number: "108",
    },
    EmergencyNumber {
        service: "Fire",
        number: "101",
    },
    EmergencyNumber {
        service: "Women Helpline",
        number: "181",
    },
];

// === Profile ===

/// Profile as shown to the client (no PIN)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub dob: NaiveDate,
    /// Age in whole years as of today
    pub age: i32,
    pub home_address: String,
    pub character: Option<String>,
    pub layout_style: LayoutStyle,
    pub is_profile_complete: bool,
    pub is_minor: bool,
    pub safety: SafetySettings,
}

impl From<UserProfile> for ProfileView {
    fn from(profile: UserProfile) -> Self {
        Self {
            age: age_on(profile.dob, Local::now().date_naive()),
            name: profile.name,
            email: profile.email,
            phone: profile.phone,
            dob: profile.dob,
            home_address: profile.home_address,
            character: profile.character,
            layout_style: profile.layout_style,
            is_profile_complete: profile.is_profile_complete,
            is_minor: profile.is_minor,
            safety: profile.safety,
        }
    }
}

/// Login request (local stand-in: the stored profile's email)
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

/// Logout response
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

// === Contacts ===

/// Contact plus whether its best-friend mode is locked by policy
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactView {
    #[serde(flatten)]
    pub contact: Contact,
    pub best_friend_locked: bool,
}

impl ContactView {
    pub fn new(contact: Contact, is_minor: bool) -> Self {
        Self {
            best_friend_locked: policy::is_best_friend_locked(is_minor, contact.relationship),
            contact,
        }
    }
}

/// Set one permission of a contact
#[derive(Debug, Deserialize)]
pub struct PermissionUpdateRequest {
    pub permission: PermissionKey,
    pub enabled: bool,
}

// === SOS ===

/// Response to a tap on the SOS button
#[derive(Debug, Serialize)]
pub struct TapResponse {
    /// `armed`, `already_arming` or `pin_required`
    pub outcome: &'static str,
    pub alert: AlertState,
}

impl TapResponse {
    pub fn new(outcome: TapOutcome, alert: AlertState) -> Self {
        let outcome = match outcome {
            TapOutcome::Armed(_) => "armed",
            TapOutcome::AlreadyArming => "already_arming",
            TapOutcome::PinRequired => "pin_required",
        };
        Self { outcome, alert }
    }
}

/// Response to a countdown cancel
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
    /// Present only when cancelled countdowns are audited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_event: Option<SosEvent>,
    pub alert: AlertState,
}

impl CancelResponse {
    pub fn new(outcome: CancelOutcome, alert: AlertState) -> Self {
        match outcome {
            CancelOutcome::Cancelled(audit_event) => Self {
                cancelled: true,
                audit_event,
                alert,
            },
            CancelOutcome::NothingToCancel => Self {
                cancelled: false,
                audit_event: None,
                alert,
            },
        }
    }
}

/// Response to a button press start
#[derive(Debug, Serialize)]
pub struct PressResponse {
    /// Whether a long press is now pending
    pub pending: bool,
}

/// Response to a button release
#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    /// Whether a pending long press was abandoned
    pub released: bool,
}

/// Answer to the PIN prompt; a missing PIN dismisses the prompt
#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub pin: Option<String>,
}

/// Response to a PIN prompt answer
#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    /// `resolved` or `dismissed`
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<SosEvent>,
    pub alert: AlertState,
}

impl ResolveResponse {
    pub fn new(outcome: ResolveOutcome, alert: AlertState) -> Self {
        match outcome {
            ResolveOutcome::Resolved(event) => Self {
                outcome: "resolved",
                event: Some(event),
                alert,
            },
            ResolveOutcome::Dismissed => Self {
                outcome: "dismissed",
                event: None,
                alert,
            },
        }
    }
}

// === Misc ===

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub core_version: &'static str,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    /// Offending fields of a validation error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
    /// Policy reason of a locked mutation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<LockReason>,
}
