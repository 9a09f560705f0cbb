//! The live session of the logged-in user.
//!
//! A [`Session`] owns everything the app holds in memory for one profile: the
//! profile itself, the contact registry, the alert history, the SOS state
//! machine and the tokio tasks driving its timers. Every operation takes the
//! session lock, applies one transition to completion, then releases it.
//!
//! ## Timers
//!
//! The countdown and the long-press threshold run as spawned tasks that fire
//! their [`TimerHandle`] back into the machine. After each transition the
//! session aborts every task whose handle the machine no longer considers
//! current, so a cancelled countdown stops ticking right away and a released
//! press never fires.
//!
//! ## Trigger side effects
//!
//! When the machine enters `Active` the new event is persisted and broadcast
//! immediately. The position request and the contact notifications run as
//! detached tasks; neither can fail or delay the trigger.
//!
//! ## Persistence
//!
//! Every mutation enqueues a whole-record save on the ordered [`Persister`].
//! Saves are fire-and-forget; [`Session::flush`] waits for them.

use crate::config::Config;
use crate::location::{self, LocationProvider};
use crate::notify::{self, NotificationSink};
use crate::store::{self, Persister, RecordStore, StoreError, StoreKey};
use chrono::{Local, Utc};
use resq_core::{
    AlertConfig, AlertMachine, AlertState, CancelOutcome, Contact, ContactDraft, ContactId,
    ContactPartial, ContactRegistry, Coordinates, EventId, EventLog, EventStats, LocationError,
    PermissionKey, ProfileSetup, ProfileUpdate, ResolveOutcome, SafetySettings, SosEvent,
    TapOutcome, TickOutcome, TimerHandle, Trigger, TriggerPath, UserProfile, TICK_INTERVAL,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Broadcast channel capacity for session events
const BROADCAST_CAPACITY: usize = 256;

/// Session-level errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Domain(#[from] resq_core::Error),

    #[error("no active profile")]
    NoProfile,

    #[error("account not found")]
    AccountNotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Change notifications for live observers (SSE).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The alert machine changed state (including countdown ticks)
    AlertState { alert: AlertState },
    /// An alert was raised
    AlertTriggered {
        event: SosEvent,
        path: TriggerPath,
        notified_contacts: usize,
    },
    /// A recorded event changed (location filled, resolved)
    EventUpdated { event: SosEvent },
    /// The contact list changed
    ContactsChanged { total: usize },
    /// The profile or its settings changed
    ProfileChanged,
    /// The profile was logged out and its records removed
    LoggedOut,
}

/// Tunables of a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub alert: AlertConfig,
    /// Upper bound on each position request
    pub location_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            alert: AlertConfig::default(),
            location_timeout: Duration::from_secs(crate::config::DEFAULT_LOCATION_TIMEOUT_SECS),
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            alert: config.alert(),
            location_timeout: config.location_timeout,
        }
    }
}

struct SessionState {
    profile: Option<UserProfile>,
    contacts: ContactRegistry,
    log: EventLog,
    machine: AlertMachine,
    timers: Vec<(TimerHandle, AbortHandle)>,
}

impl SessionState {
    fn profile(&self) -> Result<&UserProfile, SessionError> {
        self.profile.as_ref().ok_or(SessionError::NoProfile)
    }

    /// Abort timer tasks whose handle the machine has dropped.
    fn reap(&mut self) {
        let machine = &self.machine;
        self.timers.retain(|(handle, task)| {
            if machine.is_current(*handle) {
                true
            } else {
                task.abort();
                false
            }
        });
    }
}

struct Inner {
    state: Mutex<SessionState>,
    store: Arc<dyn RecordStore>,
    persister: Persister,
    location: Arc<dyn LocationProvider>,
    notifier: Arc<dyn NotificationSink>,
    events_tx: broadcast::Sender<SessionEvent>,
    options: SessionOptions,
}

/// Handle to the live session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Open the session, restoring any stored profile and its records.
    pub async fn open(
        store: Arc<dyn RecordStore>,
        location: Arc<dyn LocationProvider>,
        notifier: Arc<dyn NotificationSink>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let profile: Option<UserProfile> = store::load(store.as_ref(), StoreKey::User).await?;
        let (contacts, log) = match &profile {
            Some(profile) => load_records(store.as_ref(), profile.is_minor).await?,
            None => (ContactRegistry::default(), EventLog::new()),
        };

        info!(
            restored_profile = profile.is_some(),
            contacts = contacts.len(),
            events = log.len(),
            "Session opened"
        );

        let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let persister = Persister::start(store.clone());

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState {
                    profile,
                    contacts,
                    log,
                    machine: AlertMachine::new(options.alert),
                    timers: Vec::new(),
                }),
                store,
                persister,
                location,
                notifier,
                events_tx,
                options,
            }),
        })
    }

    /// Subscribe to session change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Wait until every save enqueued so far has reached the store.
    pub async fn flush(&self) -> Result<(), SessionError> {
        self.inner.persister.flush().await?;
        Ok(())
    }

    // === Account ===

    /// Complete signup and setup. Replaces any profile already loaded; the
    /// existing contact list is kept and re-checked against the new minor
    /// status.
    pub async fn setup_profile(&self, setup: ProfileSetup) -> Result<UserProfile, SessionError> {
        let profile = setup.complete(Local::now().date_naive())?;

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let existing = state.contacts.list().to_vec();
        state.contacts = ContactRegistry::restore(profile.is_minor, existing);
        state.profile = Some(profile.clone());

        self.save_profile(state);
        self.save_contacts(state);
        self.emit(SessionEvent::ProfileChanged);

        info!(is_minor = profile.is_minor, "Profile set up");
        Ok(profile)
    }

    /// The active profile.
    pub async fn profile(&self) -> Result<UserProfile, SessionError> {
        let state = self.inner.state.lock().await;
        state.profile().cloned()
    }

    /// Minor status of the active profile.
    pub async fn is_minor(&self) -> Result<bool, SessionError> {
        let state = self.inner.state.lock().await;
        state.profile().map(|p| p.is_minor)
    }

    /// Log in with the email of the stored profile.
    pub async fn login(&self, email: &str) -> Result<UserProfile, SessionError> {
        {
            let state = self.inner.state.lock().await;
            if let Some(current) = &state.profile {
                if same_email(&current.email, email) {
                    return Ok(current.clone());
                }
            }
        }

        // Pending saves must land before the stored profile is read back
        self.inner.persister.flush().await?;
        let stored: Option<UserProfile> =
            store::load(self.inner.store.as_ref(), StoreKey::User).await?;
        let profile = stored.ok_or(SessionError::AccountNotFound)?;
        if !same_email(&profile.email, email) {
            warn!("Login rejected: email does not match stored profile");
            return Err(SessionError::InvalidCredentials);
        }

        let (contacts, log) = load_records(self.inner.store.as_ref(), profile.is_minor).await?;

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.machine.reset();
        state.reap();
        state.profile = Some(profile.clone());
        state.contacts = contacts;
        state.log = log;

        self.emit(SessionEvent::ProfileChanged);
        self.emit_alert_state(state);

        info!(contacts = state.contacts.len(), "Logged in");
        Ok(profile)
    }

    /// Log out: stop timers, drop all in-memory state and remove the stored
    /// records.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        state.machine.reset();
        state.reap();
        state.profile = None;
        state.contacts = ContactRegistry::default();
        state.log.clear();

        for key in StoreKey::ALL {
            self.inner.persister.remove(key);
        }

        self.emit(SessionEvent::LoggedOut);
        self.emit_alert_state(state);

        info!("Logged out");
        Ok(())
    }

    /// Edit name, address and optionally the SOS PIN.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<UserProfile, SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let profile = state.profile.as_mut().ok_or(SessionError::NoProfile)?;
        profile.apply(update)?;
        let profile = profile.clone();

        self.save_profile(state);
        self.emit(SessionEvent::ProfileChanged);

        debug!("Profile updated");
        Ok(profile)
    }

    /// Replace the automatic-trigger and check-in preferences.
    pub async fn update_safety_settings(
        &self,
        settings: SafetySettings,
    ) -> Result<UserProfile, SessionError> {
        settings.validate()?;

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let profile = state.profile.as_mut().ok_or(SessionError::NoProfile)?;
        profile.safety = settings;
        let profile = profile.clone();

        self.save_profile(state);
        self.emit(SessionEvent::ProfileChanged);

        debug!("Safety settings updated");
        Ok(profile)
    }

    // === Contacts ===

    pub async fn contacts(&self) -> Result<Vec<Contact>, SessionError> {
        let state = self.inner.state.lock().await;
        state.profile()?;
        Ok(state.contacts.list().to_vec())
    }

    pub async fn add_contact(&self, draft: ContactDraft) -> Result<Contact, SessionError> {
        self.mutate_contacts(move |contacts| contacts.add(draft))
            .await
    }

    pub async fn update_contact(
        &self,
        id: ContactId,
        partial: ContactPartial,
    ) -> Result<Contact, SessionError> {
        self.mutate_contacts(move |contacts| contacts.update(id, partial))
            .await
    }

    pub async fn remove_contact(&self, id: ContactId) -> Result<Contact, SessionError> {
        self.mutate_contacts(move |contacts| contacts.remove(id))
            .await
    }

    pub async fn toggle_best_friend(&self, id: ContactId) -> Result<Contact, SessionError> {
        self.mutate_contacts(move |contacts| contacts.toggle_best_friend(id))
            .await
    }

    pub async fn set_permission(
        &self,
        id: ContactId,
        key: PermissionKey,
        value: bool,
    ) -> Result<Contact, SessionError> {
        self.mutate_contacts(move |contacts| contacts.set_permission(id, key, value))
            .await
    }

    async fn mutate_contacts<T>(
        &self,
        apply: impl FnOnce(&mut ContactRegistry) -> resq_core::Result<T>,
    ) -> Result<T, SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.profile()?;

        let out = apply(&mut state.contacts)?;

        self.save_contacts(state);
        self.emit(SessionEvent::ContactsChanged {
            total: state.contacts.len(),
        });
        Ok(out)
    }

    // === Alert ===

    pub async fn alert_state(&self) -> AlertState {
        self.inner.state.lock().await.machine.state()
    }

    /// Short tap on the SOS button.
    pub async fn tap(&self) -> Result<TapOutcome, SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.profile()?;

        let outcome = state.machine.tap();
        if let TapOutcome::Armed(handle) = outcome {
            self.spawn_countdown(state, handle);
            self.emit_alert_state(state);
        }
        Ok(outcome)
    }

    /// Cancel an armed countdown. Idempotent.
    pub async fn cancel_arming(&self) -> Result<CancelOutcome, SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.profile()?;

        let outcome = state.machine.cancel_arming(&mut state.log, Utc::now());
        state.reap();

        if let CancelOutcome::Cancelled(audit) = &outcome {
            if audit.is_some() {
                self.save_events(state);
            }
            self.emit_alert_state(state);
            info!(audited = audit.is_some(), "SOS countdown cancelled");
        }
        Ok(outcome)
    }

    /// The SOS button went down. Returns whether a long press is now pending.
    pub async fn press_start(&self) -> Result<bool, SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.profile()?;

        let pending = match state.machine.press_start() {
            Some(handle) => {
                self.spawn_long_press(state, handle);
                true
            }
            None => false,
        };
        state.reap();
        Ok(pending)
    }

    /// The SOS button came up. Returns whether a pending long press was abandoned.
    pub async fn press_release(&self) -> Result<bool, SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        state.profile()?;

        let released = state.machine.press_release();
        state.reap();
        Ok(released)
    }

    /// Answer the PIN prompt of the active alert; `None` dismisses it.
    pub async fn resolve(&self, pin: Option<&str>) -> Result<ResolveOutcome, SessionError> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let sos_pin = state.profile()?.sos_pin.clone();

        let outcome = state.machine.resolve(pin, &sos_pin, &mut state.log)?;

        if let ResolveOutcome::Resolved(event) = &outcome {
            self.save_events(state);
            self.emit(SessionEvent::EventUpdated {
                event: event.clone(),
            });
            self.emit_alert_state(state);
            info!(event_id = %event.id, "SOS alert resolved");
        }
        Ok(outcome)
    }

    // === History ===

    /// Alert history, most recent first.
    pub async fn events(&self) -> Result<Vec<SosEvent>, SessionError> {
        let state = self.inner.state.lock().await;
        state.profile()?;
        Ok(state.log.to_vec())
    }

    pub async fn event(&self, id: EventId) -> Result<SosEvent, SessionError> {
        let state = self.inner.state.lock().await;
        state.profile()?;
        Ok(state.log.get(id)?.clone())
    }

    pub async fn stats(&self) -> Result<EventStats, SessionError> {
        let state = self.inner.state.lock().await;
        state.profile()?;
        Ok(state.log.stats())
    }

    // === Location ===

    /// One-off position request, bounded by the configured timeout.
    pub async fn share_location(&self) -> Result<Coordinates, SessionError> {
        let position = location::locate(
            self.inner.location.as_ref(),
            self.inner.options.location_timeout,
        )
        .await?;
        debug!("Position shared");
        Ok(position)
    }

    // === Timer tasks ===

    fn spawn_countdown(&self, state: &mut SessionState, handle: TimerHandle) {
        let session = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(TICK_INTERVAL).await;
                if !session.countdown_tick(handle).await {
                    break;
                }
            }
        });
        state.timers.push((handle, task.abort_handle()));
    }

    /// Returns whether the countdown keeps running.
    async fn countdown_tick(&self, handle: TimerHandle) -> bool {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let running = match state.machine.tick(handle, &mut state.log, Utc::now()) {
            TickOutcome::Counting(seconds) => {
                debug!(seconds, "SOS countdown tick");
                self.emit_alert_state(state);
                true
            }
            TickOutcome::Triggered(trigger) => {
                self.on_trigger(state, trigger);
                false
            }
            TickOutcome::Stale => false,
        };
        if !running {
            state.reap();
        }
        running
    }

    fn spawn_long_press(&self, state: &mut SessionState, handle: TimerHandle) {
        let session = self.clone();
        let threshold = state.machine.config().long_press;
        let task = tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            session.long_press_elapsed(handle).await;
        });
        state.timers.push((handle, task.abort_handle()));
    }

    async fn long_press_elapsed(&self, handle: TimerHandle) {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        if let Some(trigger) = state.machine.press_elapsed(handle, &mut state.log, Utc::now()) {
            self.on_trigger(state, trigger);
        }
        state.reap();
    }

    // === Trigger side effects ===

    fn on_trigger(&self, state: &mut SessionState, trigger: Trigger) {
        let recipients: Vec<Contact> = state.contacts.best_friends().cloned().collect();
        let event = trigger.event;

        info!(
            event_id = %event.id,
            path = ?trigger.path,
            notified_contacts = recipients.len(),
            "SOS alert triggered"
        );

        self.save_events(state);
        self.emit(SessionEvent::AlertTriggered {
            event: event.clone(),
            path: trigger.path,
            notified_contacts: recipients.len(),
        });
        self.emit_alert_state(state);

        self.spawn_location_fill(event.id);

        let notifier = self.inner.notifier.clone();
        tokio::spawn(async move {
            notify::fan_out(notifier.as_ref(), &recipients, &event).await;
        });
    }

    fn spawn_location_fill(&self, event_id: EventId) {
        let session = self.clone();
        tokio::spawn(async move {
            let result = location::locate(
                session.inner.location.as_ref(),
                session.inner.options.location_timeout,
            )
            .await;

            match result {
                Ok(position) => session.fill_location(event_id, position).await,
                Err(e) => {
                    warn!(event_id = %event_id, error = %e, "SOS event has no position");
                }
            }
        });
    }

    async fn fill_location(&self, event_id: EventId, position: Coordinates) {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        match state.log.set_location(event_id, position) {
            Ok(event) => {
                self.save_events(state);
                self.emit(SessionEvent::EventUpdated { event });
                debug!(event_id = %event_id, "SOS event position filled");
            }
            Err(_) => {
                debug!(event_id = %event_id, "SOS event gone before its position arrived");
            }
        }
    }

    // === Persistence / broadcast helpers ===

    fn save<T: Serialize + ?Sized>(&self, key: StoreKey, value: &T) {
        match serde_json::to_value(value) {
            Ok(value) => self.inner.persister.save(key, value),
            Err(e) => warn!(key = %key, error = %e, "Failed to encode record"),
        }
    }

    fn save_profile(&self, state: &SessionState) {
        if let Some(profile) = &state.profile {
            self.save(StoreKey::User, profile);
        }
    }

    fn save_contacts(&self, state: &SessionState) {
        self.save(StoreKey::Contacts, state.contacts.list());
    }

    fn save_events(&self, state: &SessionState) {
        self.save(StoreKey::SosEvents, &state.log.to_vec());
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events_tx.send(event);
    }

    fn emit_alert_state(&self, state: &SessionState) {
        self.emit(SessionEvent::AlertState {
            alert: state.machine.state(),
        });
    }
}

async fn load_records(
    store: &dyn RecordStore,
    is_minor: bool,
) -> Result<(ContactRegistry, EventLog), StoreError> {
    let contacts: Vec<Contact> = store::load(store, StoreKey::Contacts)
        .await?
        .unwrap_or_default();
    let events: Vec<SosEvent> = store::load(store, StoreKey::SosEvents)
        .await?
        .unwrap_or_default();

    Ok((
        ContactRegistry::restore(is_minor, contacts),
        EventLog::restore(events),
    ))
}

fn same_email(stored: &str, entered: &str) -> bool {
    stored.trim().eq_ignore_ascii_case(entered.trim())
}
