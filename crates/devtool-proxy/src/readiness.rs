//! Waiting for a freshly launched proxy to answer on its control API.
//!
//! [`crate::supervisor::ProxySupervisor::start`] returns as soon as the
//! process is spawned. The API listener comes up some time later, so callers
//! poll [`wait_until_ready`] before issuing control-plane calls.

use std::time::Duration;

use devtool_core::ProxyStatus;

use crate::control::ControlClient;
use crate::error::ControlError;

/// Exponential backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Growth factor between consecutive delays.
    pub factor: f64,
    /// Attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(10),
            factor: 2.0,
            max_attempts: None,
        }
    }
}

impl Backoff {
    /// Schedule used while waiting for a new proxy: 100 ms doubling to 2 s,
    /// at most 20 attempts.
    pub fn startup() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
            factor: 2.0,
            max_attempts: Some(20),
        }
    }

    /// Sets the attempt limit.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// Polls `GET /proxy/status` until it succeeds or the schedule is exhausted.
///
/// Returns the last error when every attempt failed.
pub async fn wait_until_ready(
    client: &ControlClient,
    backoff: &Backoff,
) -> Result<ProxyStatus, ControlError> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match client.fetch_status().await {
            Ok(status) => {
                tracing::info!(attempt, enabled = status.enabled, "Proxy control API is ready");
                return Ok(status);
            }
            Err(e) if backoff.allows(attempt) => {
                let delay = backoff.delay(attempt);
                tracing::debug!(attempt, ?delay, "Proxy not ready yet: {}", e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::warn!(attempt, "Proxy did not become ready: {}", e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{unused_port, MockProxy};

    #[test]
    fn default_schedule() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Duration::from_millis(250));
        assert_eq!(backoff.delay(2), Duration::from_millis(500));
        assert_eq!(backoff.delay(3), Duration::from_secs(1));
        assert_eq!(backoff.delay(100), Duration::from_secs(10));
        assert!(backoff.allows(u32::MAX - 1));
    }

    #[test]
    fn attempt_limit() {
        let backoff = Backoff::default().with_max_attempts(3);
        assert!(backoff.allows(1));
        assert!(backoff.allows(2));
        assert!(!backoff.allows(3));
    }

    #[test]
    fn factor_below_one_never_shrinks() {
        let backoff = Backoff {
            factor: 0.5,
            ..Backoff::default()
        };
        assert_eq!(backoff.delay(5), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn ready_immediately() {
        let mock = MockProxy::start().await;
        let status = wait_until_ready(&mock.client(), &Backoff::startup())
            .await
            .unwrap();
        assert!(!status.enabled);
        assert_eq!(mock.status_requests(), 1);
    }

    #[tokio::test]
    async fn retries_until_ready() {
        let mock = MockProxy::start().await;
        mock.fail_with(503);
        let client = mock.client();

        let backoff = Backoff {
            initial: Duration::from_millis(20),
            max: Duration::from_millis(20),
            factor: 1.0,
            max_attempts: Some(50),
        };

        let waiter = tokio::spawn(async move { wait_until_ready(&client, &backoff).await });
        while mock.status_requests() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        mock.recover();

        assert!(waiter.await.unwrap().is_ok());
        assert!(mock.status_requests() >= 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let port = unused_port().await;
        let client = ControlClient::new("127.0.0.1", port).unwrap();
        let backoff = Backoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(5),
            factor: 2.0,
            max_attempts: Some(3),
        };

        let err = wait_until_ready(&client, &backoff).await.unwrap_err();
        assert!(matches!(err, ControlError::InvalidResponse(_)));
    }
}
