//! Device position port.
//!
//! Position requests are best-effort: the session wraps every call in
//! [`locate`], which bounds it with a timeout and never retries.

use crate::config::Config;
use async_trait::async_trait;
use resq_core::{Coordinates, LocationError};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Source of the device's current position.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<Coordinates, LocationError>;
}

/// Always reports the same position.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinates);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Ok(self.0)
    }
}

/// A platform without location capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::Unavailable)
    }
}

/// Pick the provider described by the configuration.
pub fn from_config(config: &Config) -> Arc<dyn LocationProvider> {
    match config.fixed_location {
        Some(position) => Arc::new(FixedLocation(position)),
        None => {
            warn!("No location source configured - alerts will carry no position");
            Arc::new(NoLocation)
        }
    }
}

/// One position request bounded by `timeout`.
pub async fn locate(
    provider: &dyn LocationProvider,
    timeout: Duration,
) -> Result<Coordinates, LocationError> {
    match tokio::time::timeout(timeout, provider.current_position()).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverAnswers;

    #[async_trait]
    impl LocationProvider for NeverAnswers {
        async fn current_position(&self) -> Result<Coordinates, LocationError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn fixed_location_reports_position() {
        let provider = FixedLocation(Coordinates::new(12.97, 77.59));
        assert_eq!(
            locate(&provider, Duration::from_secs(1)).await,
            Ok(Coordinates::new(12.97, 77.59))
        );
    }

    #[tokio::test]
    async fn missing_capability_is_unavailable() {
        assert_eq!(
            locate(&NoLocation, Duration::from_secs(1)).await,
            Err(LocationError::Unavailable)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        assert_eq!(
            locate(&NeverAnswers, Duration::from_secs(10)).await,
            Err(LocationError::Timeout)
        );
    }
}
