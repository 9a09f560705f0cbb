//! Trusted contacts and the contact registry.
//!
//! The registry exclusively owns the contact list of the active profile.
//! Every mutation is resolved through [`crate::policy`] before it lands, so
//! the two contact invariants hold after any sequence of operations:
//!
//! - `is_best_friend` implies `permissions == ALL_ON`
//! - for a minor, a Mother contact is a best friend and cannot be toggled off
//!
//! Order is insertion order; nothing sorts the list implicitly.

use crate::error::{Error, FieldError, FieldProblem, Result};
use crate::permissions::{PermissionKey, PermissionSet};
use crate::policy::{self, PolicyDecision};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Opaque contact identifier, assigned at creation and never reused.
pub type ContactId = Uuid;

/// How the contact is related to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relationship {
    /// Locked as a best friend for a minor.
    Mother,
    /// Father.
    Father,
    /// Husband, wife or partner.
    Spouse,
    /// Brother or sister.
    Sibling,
    /// Friend.
    Friend,
    /// Any other relationship.
    Other,
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A trusted contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Assigned at creation, immutable.
    pub id: ContactId,
    /// Display name, never empty.
    pub name: String,
    /// Phone number as entered, never empty.
    pub phone: String,
    /// Drives the minor-safety lock.
    pub relationship: Relationship,
    /// Receives alert notifications; forces every permission on.
    pub is_best_friend: bool,
    /// Capabilities granted to the contact.
    pub permissions: PermissionSet,
}

/// Input for [`ContactRegistry::add`].
///
/// `relationship` is optional only so that a missing selection can be reported
/// alongside the other missing fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDraft {
    /// Required.
    #[serde(default)]
    pub name: String,
    /// Required.
    #[serde(default)]
    pub phone: String,
    /// Required; an empty string counts as missing.
    #[serde(default, deserialize_with = "blank_relationship")]
    pub relationship: Option<Relationship>,
    /// Requested best-friend mode; the policy may force it on.
    #[serde(default)]
    pub is_best_friend: bool,
    /// Requested permissions; ignored for best friends.
    #[serde(default)]
    pub permissions: PermissionSet,
}

impl ContactDraft {
    /// Draft with the three required fields set.
    pub fn new(
        name: impl Into<String>,
        phone: impl Into<String>,
        relationship: Relationship,
    ) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            relationship: Some(relationship),
            ..Self::default()
        }
    }

    /// Request best-friend mode.
    #[must_use]
    pub fn best_friend(mut self, on: bool) -> Self {
        self.is_best_friend = on;
        self
    }
}

/// Partial edit for [`ContactRegistry::update`]; absent fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPartial {
    /// New name; must not be blank.
    pub name: Option<String>,
    /// New phone; must not be blank.
    pub phone: Option<String>,
    /// New relationship; an empty string keeps the current one.
    #[serde(default, deserialize_with = "blank_relationship")]
    pub relationship: Option<Relationship>,
    /// Requested best-friend mode.
    pub is_best_friend: Option<bool>,
    /// Requested permissions; ignored while best-friend mode is on.
    pub permissions: Option<PermissionSet>,
}

/// An unselected relationship arrives as `""`; treat it like an absent one.
fn blank_relationship<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Relationship>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::IntoDeserializer;

    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => Relationship::deserialize(raw.trim().into_deserializer()).map(Some),
    }
}

/// The contact list of the active profile.
#[derive(Debug, Clone, Default)]
pub struct ContactRegistry {
    is_minor: bool,
    contacts: Vec<Contact>,
}

impl ContactRegistry {
    /// Empty registry for a user with the given minor status.
    pub fn new(is_minor: bool) -> Self {
        Self {
            is_minor,
            contacts: Vec::new(),
        }
    }

    /// Rebuild a registry from stored records.
    ///
    /// Records are re-resolved through the policy, so a stored list that
    /// violates an invariant (edited by hand, written by an older build) is
    /// repaired on load rather than trusted.
    pub fn restore(is_minor: bool, records: Vec<Contact>) -> Self {
        let contacts = records
            .into_iter()
            .map(|mut contact| {
                let trust = policy::resolve_best_friend_on_relationship_change(
                    is_minor,
                    contact.relationship,
                    contact.is_best_friend,
                    contact.permissions,
                );
                contact.is_best_friend = trust.is_best_friend;
                contact.permissions = trust.permissions;
                contact
            })
            .collect();

        Self { is_minor, contacts }
    }

    /// Minor status the policy is applied under.
    pub fn is_minor(&self) -> bool {
        self.is_minor
    }

    /// Number of contacts.
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// All contacts in insertion order.
    pub fn list(&self) -> &[Contact] {
        &self.contacts
    }

    /// Look up one contact.
    pub fn get(&self, id: ContactId) -> Result<&Contact> {
        self.contacts
            .iter()
            .find(|c| c.id == id)
            .ok_or(Error::ContactNotFound(id))
    }

    /// Contacts that receive alert notifications.
    pub fn best_friends(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter().filter(|c| policy::should_notify(c))
    }

    /// Whether best-friend mode of this contact may be toggled.
    pub fn best_friend_decision(&self, id: ContactId) -> Result<PolicyDecision> {
        let contact = self.get(id)?;
        Ok(policy::best_friend_decision(
            self.is_minor,
            contact.relationship,
        ))
    }

    /// Add a contact.
    ///
    /// Fails with [`Error::Validation`] naming every missing required field.
    pub fn add(&mut self, draft: ContactDraft) -> Result<Contact> {
        let mut missing = required_text_errors(&draft.name, &draft.phone);
        if draft.relationship.is_none() {
            missing.push(FieldError {
                field: "relationship",
                problem: FieldProblem::Missing,
            });
        }
        let relationship = match draft.relationship {
            Some(rel) if missing.is_empty() => rel,
            _ => return Err(Error::Validation(missing)),
        };

        let trust = policy::resolve_best_friend_on_relationship_change(
            self.is_minor,
            relationship,
            draft.is_best_friend,
            draft.permissions,
        );

        let contact = Contact {
            id: Uuid::new_v4(),
            name: draft.name.trim().to_string(),
            phone: draft.phone.trim().to_string(),
            relationship,
            is_best_friend: trust.is_best_friend,
            permissions: policy::resolve_permissions(trust.is_best_friend, trust.permissions),
        };

        debug!(
            contact_id = %contact.id,
            best_friend = contact.is_best_friend,
            "Added contact"
        );

        self.contacts.push(contact.clone());
        Ok(contact)
    }

    /// Apply a partial edit, re-running the policy on the merged record.
    ///
    /// Changing the relationship to Mother for a minor re-locks best-friend
    /// mode even if the same edit tried to turn it off; the returned contact
    /// shows the override.
    pub fn update(&mut self, id: ContactId, partial: ContactPartial) -> Result<Contact> {
        let is_minor = self.is_minor;
        let contact = self.get_mut(id)?;

        let name = partial.name.unwrap_or_else(|| contact.name.clone());
        let phone = partial.phone.unwrap_or_else(|| contact.phone.clone());
        let missing = required_text_errors(&name, &phone);
        if !missing.is_empty() {
            return Err(Error::Validation(missing));
        }

        let relationship = partial.relationship.unwrap_or(contact.relationship);
        let is_best_friend = partial.is_best_friend.unwrap_or(contact.is_best_friend);
        let permissions = match partial.permissions {
            Some(requested) => requested,
            // Leaving best-friend mode without an explicit set drops everything.
            None if contact.is_best_friend && !is_best_friend => PermissionSet::ALL_OFF,
            None => contact.permissions,
        };

        let trust = policy::resolve_best_friend_on_relationship_change(
            is_minor,
            relationship,
            is_best_friend,
            permissions,
        );

        contact.name = name.trim().to_string();
        contact.phone = phone.trim().to_string();
        contact.relationship = relationship;
        contact.is_best_friend = trust.is_best_friend;
        contact.permissions = trust.permissions;

        debug!(
            contact_id = %id,
            best_friend = contact.is_best_friend,
            "Updated contact"
        );

        Ok(contact.clone())
    }

    /// Remove a contact. No confirmation logic lives here.
    pub fn remove(&mut self, id: ContactId) -> Result<Contact> {
        let index = self
            .contacts
            .iter()
            .position(|c| c.id == id)
            .ok_or(Error::ContactNotFound(id))?;

        debug!(contact_id = %id, "Removed contact");
        Ok(self.contacts.remove(index))
    }

    /// Flip best-friend mode.
    ///
    /// Fails with [`Error::Locked`] (never a silent no-op) when the policy
    /// locks the mode. Turning it on grants every permission, turning it off
    /// revokes every permission.
    pub fn toggle_best_friend(&mut self, id: ContactId) -> Result<Contact> {
        let is_minor = self.is_minor;
        let contact = self.get_mut(id)?;

        if let PolicyDecision::Locked(reason) =
            policy::best_friend_decision(is_minor, contact.relationship)
        {
            return Err(Error::Locked(reason));
        }

        let now_best_friend = !contact.is_best_friend;
        contact.is_best_friend = now_best_friend;
        contact.permissions =
            policy::resolve_permissions(now_best_friend, PermissionSet::uniform(now_best_friend));

        debug!(
            contact_id = %id,
            best_friend = now_best_friend,
            "Toggled best-friend mode"
        );

        Ok(contact.clone())
    }

    /// Change one permission of a non-best-friend contact.
    pub fn set_permission(
        &mut self,
        id: ContactId,
        key: PermissionKey,
        value: bool,
    ) -> Result<Contact> {
        let contact = self.get_mut(id)?;

        if let PolicyDecision::Locked(reason) = policy::permission_edit_decision(contact) {
            return Err(Error::Locked(reason));
        }

        contact.permissions = contact.permissions.with(key, value);
        Ok(contact.clone())
    }

    /// Drop every contact (logout).
    pub fn clear(&mut self) {
        self.contacts.clear();
    }

    fn get_mut(&mut self, id: ContactId) -> Result<&mut Contact> {
        self.contacts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(Error::ContactNotFound(id))
    }
}

fn required_text_errors(name: &str, phone: &str) -> Vec<FieldError> {
    [("name", name), ("phone", phone)]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| FieldError {
            field,
            problem: FieldProblem::Missing,
        })
        .collect()
}
