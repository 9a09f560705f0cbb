//! Emergency profile of the logged-in user.
//!
//! The profile is created once, when setup completes, and is the only place
//! the user's minor status comes from. `is_minor` is derived from the date of
//! birth at that moment and persisted; it is not recomputed as time passes.

use crate::error::{Error, FieldError, FieldProblem, Result};
use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Minimum SOS PIN length, in characters.
pub const MIN_PIN_LEN: usize = 4;

/// Age below which the minor-safety policy applies.
pub const ADULT_AGE: i32 = 18;

/// Accepted safety check-in intervals, in minutes.
pub const CHECK_IN_INTERVALS: [u32; 4] = [15, 30, 45, 60];

/// Home screen layout (cosmetic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutStyle {
    /// Large SOS button with a contact strip.
    #[default]
    Classic,
    /// SOS button only.
    Minimal,
    /// Contacts as cards around the SOS button.
    Cards,
}

/// The user's emergency profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Display name.
    pub name: String,
    /// Account email.
    pub email: String,
    /// Own phone number, if given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Date of birth.
    pub dob: NaiveDate,
    /// Included in alert messages.
    pub home_address: String,
    /// Compared locally to resolve an alert. Not a credential.
    pub sos_pin: String,
    /// Theme character id (cosmetic, carried opaquely).
    #[serde(default)]
    pub character: Option<String>,
    /// Home screen layout.
    #[serde(default)]
    pub layout_style: LayoutStyle,
    /// Set once setup completes.
    pub is_profile_complete: bool,
    /// Derived from `dob` at setup time and never recomputed.
    pub is_minor: bool,
    /// Automatic-trigger and check-in preferences.
    #[serde(default)]
    pub safety: SafetySettings,
}

impl UserProfile {
    /// Compare a PIN entered at the resolve prompt.
    pub fn verify_pin(&self, candidate: &str) -> bool {
        self.sos_pin == candidate
    }

    /// Apply a settings edit.
    pub fn apply(&mut self, update: ProfileUpdate) -> Result<()> {
        let mut errors = Vec::new();
        if update.name.trim().is_empty() {
            errors.push(missing("name"));
        }
        if update.home_address.trim().is_empty() {
            errors.push(missing("homeAddress"));
        }
        let new_pin = update.sos_pin.filter(|pin| !pin.is_empty());
        if let Some(pin) = &new_pin {
            if pin.chars().count() < MIN_PIN_LEN {
                errors.push(FieldError {
                    field: "sosPin",
                    problem: FieldProblem::TooShort { min: MIN_PIN_LEN },
                });
            }
        }
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        self.name = update.name.trim().to_string();
        self.home_address = update.home_address.trim().to_string();
        if let Some(pin) = new_pin {
            self.sos_pin = pin;
        }
        if let Some(character) = update.character {
            self.character = Some(character).filter(|c| !c.trim().is_empty());
        }
        if let Some(layout_style) = update.layout_style {
            self.layout_style = layout_style;
        }
        Ok(())
    }
}

/// Input collected by the signup and setup steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSetup {
    /// Required.
    #[serde(default)]
    pub name: String,
    /// Required, must contain `@`.
    #[serde(default)]
    pub email: String,
    /// Optional.
    #[serde(default)]
    pub phone: Option<String>,
    /// Required; decides `is_minor`.
    #[serde(default)]
    pub dob: Option<NaiveDate>,
    /// Required.
    #[serde(default)]
    pub home_address: String,
    /// At least [`MIN_PIN_LEN`] characters.
    #[serde(default)]
    pub sos_pin: String,
    /// Must equal `sos_pin`.
    #[serde(default)]
    pub confirm_pin: String,
    /// Theme character id.
    #[serde(default)]
    pub character: Option<String>,
    /// Home screen layout.
    #[serde(default)]
    pub layout_style: LayoutStyle,
}

impl ProfileSetup {
    /// Validate and build the profile, deriving `is_minor` as of `today`.
    pub fn complete(self, today: NaiveDate) -> Result<UserProfile> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(missing("name"));
        }
        if self.email.trim().is_empty() {
            errors.push(missing("email"));
        } else if !self.email.contains('@') {
            errors.push(FieldError {
                field: "email",
                problem: FieldProblem::Malformed,
            });
        }
        match self.dob {
            None => errors.push(missing("dob")),
            Some(dob) if dob > today => errors.push(FieldError {
                field: "dob",
                problem: FieldProblem::OutOfRange,
            }),
            Some(_) => {}
        }
        if self.home_address.trim().is_empty() {
            errors.push(missing("homeAddress"));
        }
        if self.sos_pin.is_empty() {
            errors.push(missing("sosPin"));
        } else if self.sos_pin.chars().count() < MIN_PIN_LEN {
            errors.push(FieldError {
                field: "sosPin",
                problem: FieldProblem::TooShort { min: MIN_PIN_LEN },
            });
        }
        if self.confirm_pin.is_empty() {
            errors.push(missing("confirmPin"));
        } else if self.confirm_pin != self.sos_pin {
            errors.push(FieldError {
                field: "confirmPin",
                problem: FieldProblem::Mismatch,
            });
        }

        let dob = match self.dob {
            Some(dob) if errors.is_empty() => dob,
            _ => return Err(Error::Validation(errors)),
        };

        let is_minor = is_minor_on(dob, today);
        if is_minor {
            tracing::debug!("minor-safety policy active for new profile");
        }

        Ok(UserProfile {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.filter(|p| !p.trim().is_empty()),
            dob,
            home_address: self.home_address.trim().to_string(),
            sos_pin: self.sos_pin,
            character: self.character,
            layout_style: self.layout_style,
            is_profile_complete: true,
            is_minor,
            safety: SafetySettings::default(),
        })
    }
}

/// Settings edit: name and address are required, an empty PIN keeps the old one.
/// Absent cosmetic fields are kept; an empty character clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    /// New display name (required).
    #[serde(default)]
    pub name: String,
    /// New home address (required).
    #[serde(default)]
    pub home_address: String,
    /// New SOS PIN; absent or empty keeps the current one.
    #[serde(default)]
    pub sos_pin: Option<String>,
    /// New theme character id.
    #[serde(default)]
    pub character: Option<String>,
    /// New home screen layout.
    #[serde(default)]
    pub layout_style: Option<LayoutStyle>,
}

/// Automatic-trigger and check-in preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetySettings {
    /// Trigger on a detected fall.
    pub fall_detection: bool,
    /// Trigger on a detected scream.
    pub distress_sound: bool,
    /// Notify contacts when the battery runs low.
    pub low_battery: bool,
    /// Periodic check-in prompts during the unsafe window.
    pub safety_check_in: bool,
    /// Start of the unsafe window, `HH:MM`.
    pub unsafe_start: String,
    /// End of the unsafe window, `HH:MM`. May be earlier than the start
    /// (window spans midnight).
    pub unsafe_end: String,
    /// One of [`CHECK_IN_INTERVALS`].
    pub check_in_interval_minutes: u32,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            fall_detection: true,
            distress_sound: true,
            low_battery: true,
            safety_check_in: true,
            unsafe_start: "18:00".to_string(),
            unsafe_end: "05:00".to_string(),
            check_in_interval_minutes: 30,
        }
    }
}

impl SafetySettings {
    /// Check the window times and the check-in interval.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("unsafeStart", &self.unsafe_start),
            ("unsafeEnd", &self.unsafe_end),
        ] {
            if NaiveTime::parse_from_str(value, "%H:%M").is_err() {
                errors.push(FieldError {
                    field,
                    problem: FieldProblem::Malformed,
                });
            }
        }
        if !CHECK_IN_INTERVALS.contains(&self.check_in_interval_minutes) {
            errors.push(FieldError {
                field: "checkInIntervalMinutes",
                problem: FieldProblem::OutOfRange,
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }
}

/// Whole years between `dob` and `today`, counting today's birthday as had.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

/// Whether someone born on `dob` is under [`ADULT_AGE`] on `today`.
pub fn is_minor_on(dob: NaiveDate, today: NaiveDate) -> bool {
    age_on(dob, today) < ADULT_AGE
}

fn missing(field: &'static str) -> FieldError {
    FieldError {
        field,
        problem: FieldProblem::Missing,
    }
}
