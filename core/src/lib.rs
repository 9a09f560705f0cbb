//! ResQ Core - Domain logic for a personal-safety SOS companion.
//!
//! This library holds every rule of the app that does not depend on a clock,
//! a device, or storage:
//! - The contact registry and its best-friend / permission policy
//! - The minor-safety rule (a minor's Mother is a locked best friend)
//! - The SOS alert state machine (tap countdown, long press, PIN resolve)
//! - The append-only alert history
//! - Profile setup, validation and age derivation
//!
//! # Constraints
//!
//! This library intentionally does NOT:
//! - Spawn tasks or sleep (timers are driven through [`TimerHandle`]s)
//! - Perform file I/O or talk to the network
//! - Access the device position
//! - Log PINs or contact phone numbers
//!
//! # Example: Minor setup and an SOS by long press
//!
//! ```
//! use chrono::{NaiveDate, Utc};
//! use resq_core::{
//!     AlertMachine, ContactDraft, ContactRegistry, EventLog, EventStatus, ProfileSetup,
//!     Relationship, ResolveOutcome,
//! };
//!
//! let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
//! let profile = ProfileSetup {
//!     name: "Asha".into(),
//!     email: "asha@example.com".into(),
//!     dob: NaiveDate::from_ymd_opt(2010, 1, 1),
//!     home_address: "12 Lake Road".into(),
//!     sos_pin: "2468".into(),
//!     confirm_pin: "2468".into(),
//!     ..Default::default()
//! }
//! .complete(today)
//! .unwrap();
//! assert!(profile.is_minor);
//!
//! // Mother is forced to best friend for a minor.
//! let mut contacts = ContactRegistry::new(profile.is_minor);
//! let mom = contacts
//!     .add(ContactDraft::new("Mom", "+15550001", Relationship::Mother))
//!     .unwrap();
//! assert!(mom.is_best_friend);
//!
//! // Long press triggers without a countdown.
//! let mut machine = AlertMachine::default();
//! let mut log = EventLog::new();
//! let press = machine.press_start().unwrap();
//! let trigger = machine.press_elapsed(press, &mut log, Utc::now()).unwrap();
//! assert_eq!(trigger.event.status, EventStatus::Active);
//!
//! // Only the SOS PIN resolves it.
//! let outcome = machine.resolve(Some("2468"), &profile.sos_pin, &mut log).unwrap();
//! assert!(matches!(outcome, ResolveOutcome::Resolved(_)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alert;
pub mod contact;
pub mod error;
pub mod event_log;
pub mod permissions;
pub mod policy;
pub mod profile;

// Re-export main types at crate root
pub use alert::{
    AlertConfig, AlertMachine, AlertState, CancelOutcome, ResolveOutcome, TapOutcome,
    TickOutcome, TimerHandle, TimerKind, Trigger, TriggerPath, DEFAULT_ARMING_SECONDS,
    DEFAULT_LONG_PRESS, TICK_INTERVAL,
};
pub use contact::{Contact, ContactDraft, ContactId, ContactPartial, ContactRegistry, Relationship};
pub use error::{Error, FieldError, FieldProblem, LocationError, LockReason, Result};
pub use event_log::{Coordinates, EventId, EventLog, EventStats, EventStatus, SosEvent};
pub use permissions::{PermissionKey, PermissionSet};
pub use policy::PolicyDecision;
pub use profile::{
    age_on, is_minor_on, LayoutStyle, ProfileSetup, ProfileUpdate, SafetySettings, UserProfile,
    MIN_PIN_LEN,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn setup(dob: NaiveDate) -> ProfileSetup {
        ProfileSetup {
            name: "Asha".into(),
            email: "asha@example.com".into(),
            dob: Some(dob),
            home_address: "12 Lake Road".into(),
            sos_pin: "2468".into(),
            confirm_pin: "2468".into(),
            ..Default::default()
        }
    }

    #[test]
    fn countdown_alert_notifies_only_best_friends() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let profile = setup(NaiveDate::from_ymd_opt(1990, 3, 4).unwrap())
            .complete(today)
            .unwrap();
        assert!(!profile.is_minor);

        let mut contacts = ContactRegistry::new(profile.is_minor);
        let friend = contacts
            .add(ContactDraft::new("Ravi", "+15550002", Relationship::Friend).best_friend(true))
            .unwrap();
        contacts
            .add(ContactDraft::new("Dad", "+15550003", Relationship::Father))
            .unwrap();

        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();
        let handle = match machine.tap() {
            TapOutcome::Armed(handle) => handle,
            other => panic!("unexpected tap outcome: {:?}", other),
        };

        let trigger = loop {
            match machine.tick(handle, &mut log, Utc::now()) {
                TickOutcome::Counting(_) => continue,
                TickOutcome::Triggered(trigger) => break trigger,
                TickOutcome::Stale => panic!("countdown went stale"),
            }
        };

        let notified: Vec<_> = contacts
            .list()
            .iter()
            .filter(|c| policy::should_notify(c))
            .map(|c| c.id)
            .collect();
        assert_eq!(notified, vec![friend.id]);

        log.set_location(trigger.event.id, Coordinates::new(12.97, 77.59))
            .unwrap();
        assert_eq!(
            machine.resolve(Some("0000"), &profile.sos_pin, &mut log),
            Err(Error::InvalidPin)
        );
        machine
            .resolve(Some("2468"), &profile.sos_pin, &mut log)
            .unwrap();

        let event = log.latest().unwrap();
        assert_eq!(event.status, EventStatus::Resolved);
        assert_eq!(event.location, Some(Coordinates::new(12.97, 77.59)));
    }

    #[test]
    fn minor_mother_cannot_be_demoted() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let profile = setup(NaiveDate::from_ymd_opt(2012, 8, 9).unwrap())
            .complete(today)
            .unwrap();
        let mut contacts = ContactRegistry::new(profile.is_minor);
        let mom = contacts
            .add(ContactDraft::new("Mom", "+15550001", Relationship::Mother))
            .unwrap();

        assert_eq!(
            contacts.toggle_best_friend(mom.id),
            Err(Error::Locked(LockReason::MinorSafetyMother))
        );
        assert_eq!(
            contacts.set_permission(mom.id, PermissionKey::Video, false),
            Err(Error::Locked(LockReason::BestFriendPermissions))
        );
        assert_eq!(contacts.get(mom.id).unwrap().permissions, PermissionSet::ALL_ON);
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
