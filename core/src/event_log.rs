//! SOS alert history.
//!
//! Append-only, most-recent-first. An event is created `active` the instant an
//! alert triggers and afterwards changes in exactly two ways:
//!
//! - its `location` is filled in place when the position request resolves
//!   (last write wins)
//! - its `status` moves once from `active` to `resolved` or `cancelled`
//!
//! Events are never deleted by normal operation; the whole log is dropped only
//! when the owning profile logs out.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Opaque event identifier.
pub type EventId = Uuid;

/// A geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
}

impl Coordinates {
    /// Position from latitude and longitude.
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Lifecycle status of a recorded alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Raised and not yet resolved.
    Active,
    /// Closed with the SOS PIN.
    Resolved,
    /// Countdown stopped before triggering (audited cancels only).
    Cancelled,
}

impl EventStatus {
    /// `resolved` and `cancelled` are final.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, EventStatus::Active)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventStatus::Active => "active",
            EventStatus::Resolved => "resolved",
            EventStatus::Cancelled => "cancelled",
        })
    }
}

/// One alert in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SosEvent {
    /// Assigned when recorded.
    pub id: EventId,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
    /// Only `active` events ever change status.
    pub status: EventStatus,
    /// Absent while the position request is pending, or if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinates>,
}

/// Counts shown on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    /// All recorded events.
    pub total: usize,
    /// Events still `active`.
    pub active: usize,
    /// Events `resolved`.
    pub resolved: usize,
    /// Events `cancelled`.
    pub cancelled: usize,
}

/// The alert history of the active profile.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    // front = most recent
    events: VecDeque<SosEvent>,
}

impl EventLog {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored records, which are already most-recent-first.
    pub fn restore(records: Vec<SosEvent>) -> Self {
        Self {
            events: records.into(),
        }
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing was ever recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &SosEvent> {
        self.events.iter()
    }

    /// Owned snapshot, most recent first.
    pub fn to_vec(&self) -> Vec<SosEvent> {
        self.events.iter().cloned().collect()
    }

    /// Look up one event.
    pub fn get(&self, id: EventId) -> Result<&SosEvent> {
        self.events
            .iter()
            .find(|e| e.id == id)
            .ok_or(Error::EventNotFound(id))
    }

    /// Most recent event, if any.
    pub fn latest(&self) -> Option<&SosEvent> {
        self.events.front()
    }

    /// Prepend a new `active` event with no location.
    pub fn record_active(&mut self, now: DateTime<Utc>) -> SosEvent {
        self.record(now, EventStatus::Active)
    }

    /// Prepend an event that is already `cancelled` (audited false alarm).
    pub fn record_cancelled(&mut self, now: DateTime<Utc>) -> SosEvent {
        self.record(now, EventStatus::Cancelled)
    }

    fn record(&mut self, now: DateTime<Utc>, status: EventStatus) -> SosEvent {
        let event = SosEvent {
            id: Uuid::new_v4(),
            timestamp: now,
            status,
            location: None,
        };
        debug!(event_id = %event.id, %status, "Recorded SOS event");
        self.events.push_front(event.clone());
        event
    }

    /// Fill the location of an event in place. Last write wins.
    pub fn set_location(&mut self, id: EventId, location: Coordinates) -> Result<SosEvent> {
        let event = self.get_mut(id)?;
        event.location = Some(location);
        Ok(event.clone())
    }

    /// Move an `active` event to a terminal status.
    pub fn transition(&mut self, id: EventId, to: EventStatus) -> Result<SosEvent> {
        let event = self.get_mut(id)?;

        if event.status.is_terminal() {
            return Err(Error::EventClosed {
                id,
                status: event.status,
            });
        }
        if !to.is_terminal() {
            // active -> active is not a transition
            return Ok(event.clone());
        }

        event.status = to;
        debug!(event_id = %id, status = %to, "SOS event status changed");
        Ok(event.clone())
    }

    /// Counts by status for the dashboard.
    pub fn stats(&self) -> EventStats {
        self.events
            .iter()
            .fold(EventStats::default(), |mut stats, event| {
                stats.total += 1;
                match event.status {
                    EventStatus::Active => stats.active += 1,
                    EventStatus::Resolved => stats.resolved += 1,
                    EventStatus::Cancelled => stats.cancelled += 1,
                }
                stats
            })
    }

    /// Drop the whole history (logout).
    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn get_mut(&mut self, id: EventId) -> Result<&mut SosEvent> {
        self.events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(Error::EventNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_events_prepend() {
        let mut log = EventLog::new();
        let t0 = Utc::now();
        let first = log.record_active(t0);
        let second = log.record_active(t0 + Duration::seconds(5));

        let ids: Vec<_> = log.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(log.latest().unwrap().id, second.id);
        assert!(first.location.is_none());
    }

    #[test]
    fn location_is_last_write_wins() {
        let mut log = EventLog::new();
        let event = log.record_active(Utc::now());

        log.set_location(event.id, Coordinates::new(1.0, 2.0)).unwrap();
        let updated = log.set_location(event.id, Coordinates::new(3.0, 4.0)).unwrap();
        assert_eq!(updated.location, Some(Coordinates::new(3.0, 4.0)));
        assert_eq!(updated.status, EventStatus::Active);
    }

    #[test]
    fn transition_only_once() {
        let mut log = EventLog::new();
        let event = log.record_active(Utc::now());

        let resolved = log.transition(event.id, EventStatus::Resolved).unwrap();
        assert_eq!(resolved.status, EventStatus::Resolved);

        let err = log
            .transition(event.id, EventStatus::Cancelled)
            .unwrap_err();
        assert_eq!(
            err,
            Error::EventClosed {
                id: event.id,
                status: EventStatus::Resolved
            }
        );
    }

    #[test]
    fn unknown_event_is_not_found() {
        let mut log = EventLog::new();
        let id = Uuid::new_v4();
        assert_eq!(
            log.set_location(id, Coordinates::new(0.0, 0.0)),
            Err(Error::EventNotFound(id))
        );
        assert_eq!(
            log.transition(id, EventStatus::Resolved),
            Err(Error::EventNotFound(id))
        );
    }

    #[test]
    fn stats_count_by_status() {
        let mut log = EventLog::new();
        let now = Utc::now();
        let a = log.record_active(now);
        log.record_active(now);
        log.record_cancelled(now);
        log.transition(a.id, EventStatus::Resolved).unwrap();

        assert_eq!(
            log.stats(),
            EventStats {
                total: 3,
                active: 1,
                resolved: 1,
                cancelled: 1
            }
        );
    }

    #[test]
    fn restore_keeps_order() {
        let mut log = EventLog::new();
        let now = Utc::now();
        log.record_active(now);
        log.record_active(now);

        let restored = EventLog::restore(log.to_vec());
        assert_eq!(restored.to_vec(), log.to_vec());
    }

    #[test]
    fn event_json_omits_missing_location() {
        let mut log = EventLog::new();
        let event = log.record_active(Utc::now());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "active");
        assert!(json.get("location").is_none());
    }
}
