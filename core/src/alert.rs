//! SOS alert lifecycle.
//!
//! The live machine only ever occupies three states; `resolved` and
//! `cancelled` exist per event in the [`EventLog`]:
//!
//! ```text
//!            tap                 tick (n > 1)
//!   Idle ──────────▶ Arming(3) ◀────────────┐
//!    ▲ ▲                 │ │                │
//!    │ │      cancel     │ └────────────────┘
//!    │ └─────────────────┘
//!    │                   │ tick (n == 1)
//!    │                   ▼
//!    │  correct PIN   Active ◀──── press held ≥ threshold (from Idle or Arming)
//!    └────────────────┘
//! ```
//!
//! # Timers
//!
//! The machine does not own a clock. It hands out [`TimerHandle`]s and the
//! driver (the session service) fires them back in. It keeps at most one live
//! handle per [`TimerKind`]; any transition that makes a timer irrelevant drops
//! its handle, so a late or duplicated firing is recognised as stale and
//! ignored. This is what prevents a double trigger when the countdown and the
//! long press are both armed: entering `Active` from either drops both.
//!
//! # Trigger side effects
//!
//! Entering `Active` records exactly one `active` event in the log and returns
//! a [`Trigger`]. Position lookup and contact notification are the driver's
//! job and can never undo the recorded event.

use crate::error::{Error, Result};
use crate::event_log::{EventId, EventLog, EventStatus, SosEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Countdown length after a tap, in seconds.
pub const DEFAULT_ARMING_SECONDS: u8 = 3;

/// Hold duration that triggers an alert immediately.
pub const DEFAULT_LONG_PRESS: Duration = Duration::from_millis(1500);

/// Countdown granularity.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables of the alert lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertConfig {
    /// Seconds shown when arming starts. Must be at least 1.
    pub arming_seconds: u8,
    /// Sustained press needed for the instant trigger.
    pub long_press: Duration,
    /// Record a `cancelled` event when an armed countdown is cancelled.
    /// Off by default: a false alarm leaves no trace.
    pub audit_cancelled_arming: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            arming_seconds: DEFAULT_ARMING_SECONDS,
            long_press: DEFAULT_LONG_PRESS,
            audit_cancelled_arming: false,
        }
    }
}

/// Current state of the live machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AlertState {
    /// Nothing armed or active.
    Idle,
    /// Countdown running.
    Arming {
        /// Seconds left before the alert triggers.
        seconds_remaining: u8,
    },
    /// An alert is raised and awaits resolution.
    Active {
        /// The alert's event in the history.
        event_id: EventId,
    },
}

/// The two independent timers of a lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// One-second ticks after a tap.
    Countdown,
    /// The hold threshold of a press.
    LongPress,
}

/// A scheduled timer the driver must fire back into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    kind: TimerKind,
    generation: u64,
}

impl TimerHandle {
    /// Which timer this handle schedules.
    pub fn kind(&self) -> TimerKind {
        self.kind
    }
}

/// Which input path raised the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPath {
    /// The tap countdown reached zero.
    Countdown,
    /// The button was held past the threshold.
    LongPress,
}

/// Result of entering `Active`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// The freshly recorded `active` event.
    pub event: SosEvent,
    /// Input path that raised it.
    pub path: TriggerPath,
}

/// Result of a tap on the SOS button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    /// Countdown started; schedule ticks for this handle.
    Armed(TimerHandle),
    /// Already counting down; nothing changed.
    AlreadyArming,
    /// An alert is active; the presentation layer should prompt for the PIN.
    PinRequired,
}

/// Result of firing a countdown handle.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Still arming, with this many seconds left.
    Counting(u8),
    /// The countdown reached zero.
    Triggered(Trigger),
    /// The handle is no longer current; nothing changed.
    Stale,
}

/// Result of a countdown cancel.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The countdown was stopped. Carries the audit event when auditing is on.
    Cancelled(Option<SosEvent>),
    /// Nothing was arming (never armed, already cancelled, or already fired).
    NothingToCancel,
}

/// Answer to the PIN prompt of an active alert.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// PIN matched; the alert's event is now `resolved`.
    Resolved(SosEvent),
    /// The PIN prompt was dismissed; the alert stays active.
    Dismissed,
}

/// The SOS state machine of one session.
#[derive(Debug, Clone)]
pub struct AlertMachine {
    config: AlertConfig,
    state: AlertState,
    countdown: Option<TimerHandle>,
    long_press: Option<TimerHandle>,
    next_generation: u64,
}

impl Default for AlertMachine {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

impl AlertMachine {
    /// Idle machine; `arming_seconds` is raised to at least 1.
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config: AlertConfig {
                arming_seconds: config.arming_seconds.max(1),
                ..config
            },
            state: AlertState::Idle,
            countdown: None,
            long_press: None,
            next_generation: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> AlertState {
        self.state
    }

    /// Tunables in effect.
    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// The live handle of a timer kind, if one is scheduled.
    pub fn pending(&self, kind: TimerKind) -> Option<TimerHandle> {
        match kind {
            TimerKind::Countdown => self.countdown,
            TimerKind::LongPress => self.long_press,
        }
    }

    /// Whether firing this handle would still have an effect.
    pub fn is_current(&self, handle: TimerHandle) -> bool {
        self.pending(handle.kind) == Some(handle)
    }

    /// Short tap on the SOS button.
    pub fn tap(&mut self) -> TapOutcome {
        match self.state {
            AlertState::Idle => {
                let handle = self.issue(TimerKind::Countdown);
                self.countdown = Some(handle);
                self.state = AlertState::Arming {
                    seconds_remaining: self.config.arming_seconds,
                };
                debug!(
                    seconds = self.config.arming_seconds,
                    "SOS arming countdown started"
                );
                TapOutcome::Armed(handle)
            }
            AlertState::Arming { .. } => TapOutcome::AlreadyArming,
            AlertState::Active { .. } => TapOutcome::PinRequired,
        }
    }

    /// One countdown second elapsed.
    pub fn tick(
        &mut self,
        handle: TimerHandle,
        log: &mut EventLog,
        now: DateTime<Utc>,
    ) -> TickOutcome {
        if handle.kind != TimerKind::Countdown || !self.is_current(handle) {
            return TickOutcome::Stale;
        }

        match self.state {
            AlertState::Arming { seconds_remaining } if seconds_remaining > 1 => {
                let left = seconds_remaining - 1;
                self.state = AlertState::Arming {
                    seconds_remaining: left,
                };
                TickOutcome::Counting(left)
            }
            AlertState::Arming { .. } => {
                TickOutcome::Triggered(self.trigger(TriggerPath::Countdown, log, now))
            }
            // A current countdown handle outside Arming cannot happen; treat as stale.
            _ => {
                self.countdown = None;
                TickOutcome::Stale
            }
        }
    }

    /// Explicit cancel of an armed countdown. Idempotent.
    pub fn cancel_arming(&mut self, log: &mut EventLog, now: DateTime<Utc>) -> CancelOutcome {
        if !matches!(self.state, AlertState::Arming { .. }) {
            return CancelOutcome::NothingToCancel;
        }

        self.state = AlertState::Idle;
        self.countdown = None;
        debug!("SOS arming cancelled");

        let audit = self
            .config
            .audit_cancelled_arming
            .then(|| log.record_cancelled(now));
        CancelOutcome::Cancelled(audit)
    }

    /// The button went down. Returns the threshold timer to schedule, or
    /// `None` when an alert is already active.
    ///
    /// A press that starts while a previous one is still pending supersedes it.
    pub fn press_start(&mut self) -> Option<TimerHandle> {
        if matches!(self.state, AlertState::Active { .. }) {
            return None;
        }
        let handle = self.issue(TimerKind::LongPress);
        self.long_press = Some(handle);
        Some(handle)
    }

    /// The button came up. Returns whether a pending long press was abandoned.
    pub fn press_release(&mut self) -> bool {
        self.long_press.take().is_some()
    }

    /// The press threshold elapsed with the button still held.
    pub fn press_elapsed(
        &mut self,
        handle: TimerHandle,
        log: &mut EventLog,
        now: DateTime<Utc>,
    ) -> Option<Trigger> {
        if handle.kind != TimerKind::LongPress || !self.is_current(handle) {
            return None;
        }
        if matches!(self.state, AlertState::Active { .. }) {
            self.long_press = None;
            return None;
        }
        Some(self.trigger(TriggerPath::LongPress, log, now))
    }

    /// Answer to the PIN prompt of an active alert.
    ///
    /// `None` means the prompt was dismissed. A wrong PIN is reported as
    /// [`Error::InvalidPin`] and changes nothing; it can be retried freely.
    pub fn resolve(
        &mut self,
        entered: Option<&str>,
        sos_pin: &str,
        log: &mut EventLog,
    ) -> Result<ResolveOutcome> {
        let event_id = match self.state {
            AlertState::Active { event_id } => event_id,
            _ => return Err(Error::NotActive),
        };

        let entered = match entered {
            Some(pin) => pin,
            None => return Ok(ResolveOutcome::Dismissed),
        };
        if entered != sos_pin {
            debug!("SOS resolve rejected: PIN mismatch");
            return Err(Error::InvalidPin);
        }

        self.state = AlertState::Idle;
        debug!(event_id = %event_id, "SOS alert resolved");
        log.transition(event_id, EventStatus::Resolved)
            .map(ResolveOutcome::Resolved)
    }

    /// Back to `Idle` with no timers, without touching the log (logout).
    pub fn reset(&mut self) {
        self.state = AlertState::Idle;
        self.countdown = None;
        self.long_press = None;
    }

    fn trigger(&mut self, path: TriggerPath, log: &mut EventLog, now: DateTime<Utc>) -> Trigger {
        // Both timers lose relevance the moment the alert is active.
        self.countdown = None;
        self.long_press = None;

        let event = log.record_active(now);
        self.state = AlertState::Active { event_id: event.id };
        debug!(event_id = %event.id, ?path, "SOS alert triggered");

        Trigger { event, path }
    }

    fn issue(&mut self, kind: TimerKind) -> TimerHandle {
        self.next_generation += 1;
        TimerHandle {
            kind,
            generation: self.next_generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIN: &str = "2468";

    fn armed(machine: &mut AlertMachine) -> TimerHandle {
        match machine.tap() {
            TapOutcome::Armed(handle) => handle,
            other => panic!("expected Armed, got {:?}", other),
        }
    }

    fn run_countdown(
        machine: &mut AlertMachine,
        handle: TimerHandle,
        log: &mut EventLog,
    ) -> Trigger {
        loop {
            match machine.tick(handle, log, Utc::now()) {
                TickOutcome::Counting(_) => continue,
                TickOutcome::Triggered(trigger) => return trigger,
                TickOutcome::Stale => panic!("countdown went stale"),
            }
        }
    }

    #[test]
    fn tap_arms_with_three_seconds() {
        let mut machine = AlertMachine::default();
        armed(&mut machine);
        assert_eq!(
            machine.state(),
            AlertState::Arming {
                seconds_remaining: 3
            }
        );
    }

    #[test]
    fn countdown_to_zero_creates_one_active_event() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();
        let handle = armed(&mut machine);

        assert_eq!(
            machine.tick(handle, &mut log, Utc::now()),
            TickOutcome::Counting(2)
        );
        assert_eq!(
            machine.tick(handle, &mut log, Utc::now()),
            TickOutcome::Counting(1)
        );
        let trigger = match machine.tick(handle, &mut log, Utc::now()) {
            TickOutcome::Triggered(trigger) => trigger,
            other => panic!("expected trigger, got {:?}", other),
        };

        assert_eq!(trigger.path, TriggerPath::Countdown);
        assert_eq!(log.len(), 1);
        assert_eq!(log.latest().unwrap().status, EventStatus::Active);
        assert_eq!(
            machine.state(),
            AlertState::Active {
                event_id: trigger.event.id
            }
        );

        // The fired handle is spent.
        assert_eq!(machine.tick(handle, &mut log, Utc::now()), TickOutcome::Stale);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn cancel_at_two_records_nothing() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();
        let handle = armed(&mut machine);
        machine.tick(handle, &mut log, Utc::now());

        assert_eq!(
            machine.cancel_arming(&mut log, Utc::now()),
            CancelOutcome::Cancelled(None)
        );
        assert_eq!(machine.state(), AlertState::Idle);
        assert!(log.is_empty());

        // A tick already in flight lands on a dropped handle.
        assert_eq!(machine.tick(handle, &mut log, Utc::now()), TickOutcome::Stale);
        assert!(log.is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();
        armed(&mut machine);

        assert!(matches!(
            machine.cancel_arming(&mut log, Utc::now()),
            CancelOutcome::Cancelled(_)
        ));
        assert_eq!(
            machine.cancel_arming(&mut log, Utc::now()),
            CancelOutcome::NothingToCancel
        );
        assert_eq!(machine.state(), AlertState::Idle);
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();
        let handle = armed(&mut machine);
        let trigger = run_countdown(&mut machine, handle, &mut log);

        assert_eq!(
            machine.cancel_arming(&mut log, Utc::now()),
            CancelOutcome::NothingToCancel
        );
        assert_eq!(
            machine.state(),
            AlertState::Active {
                event_id: trigger.event.id
            }
        );
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn audited_cancel_records_cancelled_event() {
        let mut machine = AlertMachine::new(AlertConfig {
            audit_cancelled_arming: true,
            ..AlertConfig::default()
        });
        let mut log = EventLog::new();
        armed(&mut machine);

        let outcome = machine.cancel_arming(&mut log, Utc::now());
        match outcome {
            CancelOutcome::Cancelled(Some(event)) => {
                assert_eq!(event.status, EventStatus::Cancelled)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(log.stats().cancelled, 1);

        // Second cancel does not record again.
        machine.cancel_arming(&mut log, Utc::now());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn long_press_triggers_directly() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();

        let handle = machine.press_start().unwrap();
        let trigger = machine.press_elapsed(handle, &mut log, Utc::now()).unwrap();

        assert_eq!(trigger.path, TriggerPath::LongPress);
        assert_eq!(log.len(), 1);
        assert!(matches!(machine.state(), AlertState::Active { .. }));
    }

    #[test]
    fn early_release_cancels_long_press() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();

        let handle = machine.press_start().unwrap();
        assert!(machine.press_release());
        assert!(!machine.press_release());

        assert!(machine.press_elapsed(handle, &mut log, Utc::now()).is_none());
        assert_eq!(machine.state(), AlertState::Idle);
        assert!(log.is_empty());
    }

    #[test]
    fn newer_press_supersedes_older() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();

        let first = machine.press_start().unwrap();
        let second = machine.press_start().unwrap();
        assert_ne!(first, second);
        assert!(machine.press_elapsed(first, &mut log, Utc::now()).is_none());
        assert!(machine.press_elapsed(second, &mut log, Utc::now()).is_some());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn both_timers_armed_trigger_once_via_long_press() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();

        let countdown = armed(&mut machine);
        let press = machine.press_start().unwrap();

        assert!(machine.press_elapsed(press, &mut log, Utc::now()).is_some());
        assert_eq!(machine.pending(TimerKind::Countdown), None);
        for _ in 0..5 {
            assert_eq!(
                machine.tick(countdown, &mut log, Utc::now()),
                TickOutcome::Stale
            );
        }
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn both_timers_armed_trigger_once_via_countdown() {
        let mut machine = AlertMachine::new(AlertConfig {
            arming_seconds: 1,
            ..AlertConfig::default()
        });
        let mut log = EventLog::new();

        let countdown = armed(&mut machine);
        let press = machine.press_start().unwrap();

        assert!(matches!(
            machine.tick(countdown, &mut log, Utc::now()),
            TickOutcome::Triggered(_)
        ));
        assert!(machine.press_elapsed(press, &mut log, Utc::now()).is_none());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn press_while_active_is_ignored() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();
        let handle = machine.press_start().unwrap();
        machine.press_elapsed(handle, &mut log, Utc::now());

        assert!(machine.press_start().is_none());
        assert_eq!(machine.tap(), TapOutcome::PinRequired);
    }

    #[test]
    fn tap_while_arming_does_not_restart() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();
        let handle = armed(&mut machine);
        machine.tick(handle, &mut log, Utc::now());

        assert_eq!(machine.tap(), TapOutcome::AlreadyArming);
        assert_eq!(
            machine.state(),
            AlertState::Arming {
                seconds_remaining: 2
            }
        );
        assert!(machine.is_current(handle));
    }

    #[test]
    fn resolve_with_correct_pin() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();
        let handle = armed(&mut machine);
        let trigger = run_countdown(&mut machine, handle, &mut log);

        let outcome = machine.resolve(Some(PIN), PIN, &mut log).unwrap();
        match outcome {
            ResolveOutcome::Resolved(event) => {
                assert_eq!(event.id, trigger.event.id);
                assert_eq!(event.status, EventStatus::Resolved);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(machine.state(), AlertState::Idle);
        assert_eq!(log.stats().resolved, 1);
        assert_eq!(log.stats().active, 0);
    }

    #[test]
    fn wrong_pin_changes_nothing_and_is_repeatable() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();
        let handle = machine.press_start().unwrap();
        machine.press_elapsed(handle, &mut log, Utc::now());
        let state = machine.state();

        for _ in 0..10 {
            assert_eq!(
                machine.resolve(Some("0000"), PIN, &mut log),
                Err(Error::InvalidPin)
            );
        }
        assert_eq!(machine.state(), state);
        assert_eq!(log.stats().active, 1);

        assert!(machine.resolve(Some(PIN), PIN, &mut log).is_ok());
    }

    #[test]
    fn dismissed_prompt_keeps_alert_active() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();
        let handle = machine.press_start().unwrap();
        machine.press_elapsed(handle, &mut log, Utc::now());
        let state = machine.state();

        assert_eq!(
            machine.resolve(None, PIN, &mut log),
            Ok(ResolveOutcome::Dismissed)
        );
        assert_eq!(machine.state(), state);
    }

    #[test]
    fn resolve_when_idle_is_not_active() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();
        assert_eq!(
            machine.resolve(Some(PIN), PIN, &mut log),
            Err(Error::NotActive)
        );
    }

    #[test]
    fn both_paths_append_exactly_one_event_each() {
        let mut machine = AlertMachine::default();
        let mut log = EventLog::new();

        let handle = armed(&mut machine);
        run_countdown(&mut machine, handle, &mut log);
        machine.resolve(Some(PIN), PIN, &mut log).unwrap();
        assert_eq!(log.len(), 1);

        let handle = machine.press_start().unwrap();
        machine.press_elapsed(handle, &mut log, Utc::now()).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.latest().unwrap().status, EventStatus::Active);
    }

    #[test]
    fn zero_arming_seconds_is_clamped() {
        let mut machine = AlertMachine::new(AlertConfig {
            arming_seconds: 0,
            ..AlertConfig::default()
        });
        let mut log = EventLog::new();
        let handle = armed(&mut machine);
        assert!(matches!(
            machine.tick(handle, &mut log, Utc::now()),
            TickOutcome::Triggered(_)
        ));
    }

    #[test]
    fn state_serializes_tagged() {
        let json = serde_json::to_value(AlertState::Arming {
            seconds_remaining: 2,
        })
        .unwrap();
        assert_eq!(json["state"], "arming");
        assert_eq!(json["seconds_remaining"], 2);
    }
}
