//! Safety policy engine.
//!
//! Pure decision logic, no state, no side effects. This module is the single
//! enforcement point for the rules that tie a contact's best-friend mode to
//! its permissions and to the user's minor status:
//!
//! 1. A best-friend contact always holds [`PermissionSet::ALL_ON`].
//! 2. For a minor, the Mother contact is a best friend and that mode is locked.
//!
//! Every write path in the contact registry (add, edit, best-friend toggle,
//! permission edit, relationship change, records restored from storage) routes
//! through the functions below instead of re-deriving the conditions.

use crate::contact::{Contact, Relationship};
use crate::error::LockReason;
use crate::permissions::PermissionSet;
use serde::Serialize;

/// Outcome of asking whether a contact's best-friend mode may be changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Best-friend mode is mandatory and cannot be turned off.
    Locked(LockReason),
    /// The user may freely toggle best-friend mode.
    Optional,
}

impl PolicyDecision {
    /// Whether the mode is forced.
    pub fn is_locked(&self) -> bool {
        matches!(self, PolicyDecision::Locked(_))
    }
}

/// The trust fields of a contact after policy resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trust {
    /// Effective best-friend flag.
    pub is_best_friend: bool,
    /// Effective permissions; all on whenever `is_best_friend` is.
    pub permissions: PermissionSet,
}

/// True iff best-friend mode is forced on and locked for this relationship.
#[inline]
pub fn is_best_friend_locked(is_minor: bool, relationship: Relationship) -> bool {
    is_minor && relationship == Relationship::Mother
}

/// Tagged form of [`is_best_friend_locked`] carrying the user-facing reason.
pub fn best_friend_decision(is_minor: bool, relationship: Relationship) -> PolicyDecision {
    if is_best_friend_locked(is_minor, relationship) {
        PolicyDecision::Locked(LockReason::MinorSafetyMother)
    } else {
        PolicyDecision::Optional
    }
}

/// Best friends get every permission; everyone else keeps what was requested.
#[inline]
pub fn resolve_permissions(is_best_friend: bool, requested: PermissionSet) -> PermissionSet {
    if is_best_friend {
        PermissionSet::ALL_ON
    } else {
        requested
    }
}

/// Resolve trust fields after a relationship is set (including at creation).
///
/// A minor's Mother is forced to `(true, ALL_ON)` whatever the caller asked
/// for; any other combination passes through [`resolve_permissions`].
pub fn resolve_best_friend_on_relationship_change(
    is_minor: bool,
    new_relationship: Relationship,
    current_best_friend: bool,
    current_permissions: PermissionSet,
) -> Trust {
    if is_best_friend_locked(is_minor, new_relationship) {
        if !current_best_friend {
            tracing::debug!("best-friend mode forced on by minor-safety policy");
        }
        return Trust {
            is_best_friend: true,
            permissions: PermissionSet::ALL_ON,
        };
    }

    Trust {
        is_best_friend: current_best_friend,
        permissions: resolve_permissions(current_best_friend, current_permissions),
    }
}

/// Decide whether an individual permission of this contact may be edited.
pub fn permission_edit_decision(contact: &Contact) -> PolicyDecision {
    if contact.is_best_friend {
        PolicyDecision::Locked(LockReason::BestFriendPermissions)
    } else {
        PolicyDecision::Optional
    }
}

/// Whether a contact is part of the notification set of a triggered alert.
#[inline]
pub fn should_notify(contact: &Contact) -> bool {
    contact.is_best_friend
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionKey;

    const ALL_RELATIONSHIPS: [Relationship; 6] = [
        Relationship::Mother,
        Relationship::Father,
        Relationship::Spouse,
        Relationship::Sibling,
        Relationship::Friend,
        Relationship::Other,
    ];

    #[test]
    fn lock_applies_only_to_minor_mother() {
        for rel in ALL_RELATIONSHIPS {
            assert_eq!(
                is_best_friend_locked(true, rel),
                rel == Relationship::Mother,
                "{:?}",
                rel
            );
            assert!(!is_best_friend_locked(false, rel));
        }
    }

    #[test]
    fn decision_carries_reason() {
        assert_eq!(
            best_friend_decision(true, Relationship::Mother),
            PolicyDecision::Locked(LockReason::MinorSafetyMother)
        );
        assert_eq!(
            best_friend_decision(false, Relationship::Mother),
            PolicyDecision::Optional
        );
        assert!(!best_friend_decision(true, Relationship::Father).is_locked());
    }

    #[test]
    fn best_friend_overrides_requested_permissions() {
        let requested = PermissionSet::ALL_OFF.with(PermissionKey::Calls, true);
        assert_eq!(resolve_permissions(true, requested), PermissionSet::ALL_ON);
        assert_eq!(resolve_permissions(false, requested), requested);
    }

    #[test]
    fn relationship_change_to_mother_forces_lock_for_minor() {
        let trust = resolve_best_friend_on_relationship_change(
            true,
            Relationship::Mother,
            false,
            PermissionSet::ALL_OFF,
        );
        assert_eq!(
            trust,
            Trust {
                is_best_friend: true,
                permissions: PermissionSet::ALL_ON
            }
        );
    }

    #[test]
    fn relationship_change_passes_through_otherwise() {
        let requested = PermissionSet::ALL_OFF.with(PermissionKey::Audio, true);

        let trust =
            resolve_best_friend_on_relationship_change(false, Relationship::Mother, false, requested);
        assert!(!trust.is_best_friend);
        assert_eq!(trust.permissions, requested);

        let trust =
            resolve_best_friend_on_relationship_change(true, Relationship::Friend, true, requested);
        assert!(trust.is_best_friend);
        assert_eq!(trust.permissions, PermissionSet::ALL_ON);
    }

    #[test]
    fn decision_serializes_tagged() {
        let json = serde_json::to_value(PolicyDecision::Locked(LockReason::MinorSafetyMother))
            .unwrap();
        assert_eq!(json["decision"], "locked");
        assert_eq!(json["reason"], "minor_safety_mother");
    }
}
