//! Contact permission bundle.
//!
//! Every contact carries a fully-defined [`PermissionSet`]: five named
//! capabilities, each on or off. There is no partial or unknown state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The five capabilities a trusted contact can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    /// Receives alert notifications.
    pub notifications: bool,
    /// May be called / call during an emergency.
    pub calls: bool,
    /// Sees the live location stream.
    pub live_location: bool,
    /// Receives emergency audio.
    pub audio: bool,
    /// Receives emergency video.
    pub video: bool,
}

impl PermissionSet {
    /// Every capability granted.
    pub const ALL_ON: Self = Self::uniform(true);

    /// No capability granted.
    pub const ALL_OFF: Self = Self::uniform(false);

    /// Set where every flag has the same value.
    #[inline]
    pub const fn uniform(value: bool) -> Self {
        Self {
            notifications: value,
            calls: value,
            live_location: value,
            audio: value,
            video: value,
        }
    }

    /// Read one flag.
    pub const fn get(&self, key: PermissionKey) -> bool {
        match key {
            PermissionKey::Notifications => self.notifications,
            PermissionKey::Calls => self.calls,
            PermissionKey::LiveLocation => self.live_location,
            PermissionKey::Audio => self.audio,
            PermissionKey::Video => self.video,
        }
    }

    /// Copy with one flag changed.
    #[must_use]
    pub fn with(mut self, key: PermissionKey, value: bool) -> Self {
        match key {
            PermissionKey::Notifications => self.notifications = value,
            PermissionKey::Calls => self.calls = value,
            PermissionKey::LiveLocation => self.live_location = value,
            PermissionKey::Audio => self.audio = value,
            PermissionKey::Video => self.video = value,
        }
        self
    }

    /// True if every flag is on.
    pub const fn is_all_on(&self) -> bool {
        self.notifications && self.calls && self.live_location && self.audio && self.video
    }
}

/// Names one flag of a [`PermissionSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionKey {
    /// [`PermissionSet::notifications`].
    Notifications,
    /// [`PermissionSet::calls`].
    Calls,
    /// [`PermissionSet::live_location`].
    LiveLocation,
    /// [`PermissionSet::audio`].
    Audio,
    /// [`PermissionSet::video`].
    Video,
}

impl PermissionKey {
    /// All keys, in display order.
    pub const ALL: [PermissionKey; 5] = [
        PermissionKey::Notifications,
        PermissionKey::Calls,
        PermissionKey::LiveLocation,
        PermissionKey::Audio,
        PermissionKey::Video,
    ];

    /// Wire name, as used in JSON field names.
    pub const fn as_str(self) -> &'static str {
        match self {
            PermissionKey::Notifications => "notifications",
            PermissionKey::Calls => "calls",
            PermissionKey::LiveLocation => "liveLocation",
            PermissionKey::Audio => "audio",
            PermissionKey::Video => "video",
        }
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_values() {
        assert!(PermissionSet::ALL_ON.is_all_on());
        assert!(!PermissionSet::ALL_OFF.is_all_on());
        assert_eq!(PermissionSet::default(), PermissionSet::ALL_OFF);
        for key in PermissionKey::ALL {
            assert!(PermissionSet::ALL_ON.get(key));
            assert!(!PermissionSet::ALL_OFF.get(key));
        }
    }

    #[test]
    fn with_changes_only_one_flag() {
        let set = PermissionSet::ALL_OFF.with(PermissionKey::LiveLocation, true);
        assert!(set.live_location);
        assert!(!set.notifications && !set.calls && !set.audio && !set.video);

        let set = PermissionSet::ALL_ON.with(PermissionKey::Video, false);
        assert!(!set.is_all_on());
        assert!(!set.get(PermissionKey::Video));
    }

    #[test]
    fn serializes_with_stored_field_names() {
        let json = serde_json::to_value(PermissionSet::ALL_ON).unwrap();
        assert_eq!(json["liveLocation"], true);
        assert_eq!(
            serde_json::to_value(PermissionKey::LiveLocation).unwrap(),
            "liveLocation"
        );
    }
}
