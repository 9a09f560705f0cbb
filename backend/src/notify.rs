//! Alert notification port.
//!
//! When an alert triggers, every best-friend contact is handed to the
//! [`NotificationSink`] together with the alert's event. Delivery is
//! best-effort: failures are logged but not retried, and never touch the
//! recorded event.

use async_trait::async_trait;
use resq_core::{Contact, SosEvent};
use tracing::{debug, info, warn};

/// Delivery failure reported by a sink.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Receiver of alert notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, contact: &Contact, event: &SosEvent) -> Result<(), NotifyError>;
}

/// Sink that only records the notification in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, contact: &Contact, event: &SosEvent) -> Result<(), NotifyError> {
        info!(
            contact_id = %contact.id,
            event_id = %event.id,
            has_location = event.location.is_some(),
            "SOS notification issued"
        );
        Ok(())
    }
}

/// Notify every contact concurrently. Returns how many succeeded.
pub async fn fan_out(sink: &dyn NotificationSink, contacts: &[Contact], event: &SosEvent) -> usize {
    if contacts.is_empty() {
        debug!(event_id = %event.id, "No best-friend contacts to notify");
        return 0;
    }

    let sends = contacts.iter().map(|contact| async move {
        let result = sink.notify(contact, event).await;
        if let Err(e) = &result {
            warn!(contact_id = %contact.id, error = %e, "SOS notification failed");
        }
        result
    });

    let results = futures::future::join_all(sends).await;
    let delivered = results.iter().filter(|r| r.is_ok()).count();

    debug!(
        event_id = %event.id,
        delivered,
        failed = results.len() - delivered,
        "SOS notification batch complete"
    );

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use resq_core::{EventStatus, PermissionSet, Relationship};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct FlakySink {
        seen: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        async fn notify(&self, contact: &Contact, _event: &SosEvent) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(contact.id);
            if contact.name == "Offline" {
                Err(NotifyError::Delivery("unreachable".into()))
            } else {
                Ok(())
            }
        }
    }

    fn contact(name: &str) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            name: name.into(),
            phone: "+15550000".into(),
            relationship: Relationship::Friend,
            is_best_friend: true,
            permissions: PermissionSet::ALL_ON,
        }
    }

    fn event() -> SosEvent {
        SosEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            status: EventStatus::Active,
            location: None,
        }
    }

    #[tokio::test]
    async fn fan_out_counts_successes_and_tries_everyone() {
        let sink = FlakySink::default();
        let contacts = vec![contact("Ravi"), contact("Offline"), contact("Meera")];

        let delivered = fan_out(&sink, &contacts, &event()).await;

        assert_eq!(delivered, 2);
        assert_eq!(sink.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn fan_out_with_no_contacts_is_zero() {
        assert_eq!(fan_out(&LogSink, &[], &event()).await, 0);
    }
}
