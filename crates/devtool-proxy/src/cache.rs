//! Locally cached copies of proxy-owned state.
//!
//! The proxy owns the filter configuration and interception status. The
//! caches here keep the last value returned by the control plane so readers
//! never wait on the network.
//!
//! ## Architecture
//!
//! ```text
//! UI / CLI → FilterCache.snapshot() → Cached Value
//!                   ↓ (refresh / update)
//!            ControlClient → proxy control API
//! ```
//!
//! Round trips are serialized per cache: the mutex is held across the HTTP
//! call, so the value stored is always the one from the call that completed
//! last. Failed calls leave the cached copy untouched.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use devtool_core::{NetworkFilters, ProxyStatus};

use crate::control::ControlClient;
use crate::error::ControlError;

/// Default interval for background polling.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Cached copy of the proxy's filter configuration.
#[derive(Debug)]
pub struct FilterCache {
    client: ControlClient,
    /// Last value returned by the proxy.
    current: RwLock<NetworkFilters>,
    /// Serializes fetch/update round trips.
    writer: Mutex<()>,
    poll_interval: Duration,
}

impl FilterCache {
    /// Creates a cache holding empty filters until the first refresh.
    pub fn new(client: ControlClient) -> Self {
        Self::with_poll_interval(client, DEFAULT_POLL_INTERVAL)
    }

    /// Creates a cache with a custom background poll interval.
    pub fn with_poll_interval(client: ControlClient, poll_interval: Duration) -> Self {
        Self {
            client,
            current: RwLock::new(NetworkFilters::default()),
            writer: Mutex::new(()),
            poll_interval,
        }
    }

    /// Returns the cached filters (no network access).
    pub fn snapshot(&self) -> NetworkFilters {
        self.current.read().clone()
    }

    /// Fetches the filters and replaces the cached copy.
    pub async fn refresh(&self) -> Result<NetworkFilters, ControlError> {
        let _guard = self.writer.lock().await;
        let filters = self.client.fetch_filters().await?;
        *self.current.write() = filters.clone();
        Ok(filters)
    }

    /// Pushes `filters` and caches the value echoed back by the proxy.
    pub async fn update(&self, filters: NetworkFilters) -> Result<NetworkFilters, ControlError> {
        let _guard = self.writer.lock().await;
        let echoed = self.client.update_filters(&filters).await?;
        tracing::info!("Filters updated");
        *self.current.write() = echoed.clone();
        Ok(echoed)
    }

    /// Replaces the proxy's filters with the empty set.
    pub async fn clear(&self) -> Result<NetworkFilters, ControlError> {
        self.update(NetworkFilters::default()).await
    }

    /// Creates a background task that keeps the snapshot in step with
    /// changes made by other clients.
    ///
    /// Returns a future that should be spawned as a background task.
    pub fn start_polling(self: Arc<Self>) -> impl Future<Output = ()> + Send {
        let cache = self;
        async move {
            loop {
                tokio::time::sleep(cache.poll_interval).await;
                if let Err(e) = cache.refresh().await {
                    tracing::debug!("Failed to poll proxy filters: {}", e);
                }
            }
        }
    }
}

/// Cached copy of the proxy's interception status.
#[derive(Debug)]
pub struct StatusCache {
    client: ControlClient,
    current: RwLock<Option<ProxyStatus>>,
    writer: Mutex<()>,
    poll_interval: Duration,
}

impl StatusCache {
    /// Creates a cache with no known status.
    pub fn new(client: ControlClient) -> Self {
        Self::with_poll_interval(client, DEFAULT_POLL_INTERVAL)
    }

    /// Creates a cache with a custom background poll interval.
    pub fn with_poll_interval(client: ControlClient, poll_interval: Duration) -> Self {
        Self {
            client,
            current: RwLock::new(None),
            writer: Mutex::new(()),
            poll_interval,
        }
    }

    /// Last known status, `None` before the first successful round trip.
    pub fn snapshot(&self) -> Option<ProxyStatus> {
        *self.current.read()
    }

    /// Whether interception was enabled at the last successful round trip.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.snapshot().is_some_and(|s| s.enabled)
    }

    /// Fetches the status.
    pub async fn refresh(&self) -> Result<ProxyStatus, ControlError> {
        let _guard = self.writer.lock().await;
        let status = self.client.fetch_status().await?;
        self.store(status);
        Ok(status)
    }

    /// Enables or disables interception.
    pub async fn set_enabled(&self, enabled: bool) -> Result<ProxyStatus, ControlError> {
        let _guard = self.writer.lock().await;
        let status = if enabled {
            self.client.start_proxy().await?
        } else {
            self.client.stop_proxy().await?
        };
        self.store(status);
        Ok(status)
    }

    fn store(&self, status: ProxyStatus) {
        let old = self.current.write().replace(status);
        if old.map(|s| s.enabled) != Some(status.enabled) {
            tracing::info!("Proxy interception enabled: {}", status.enabled);
        }
    }

    /// Creates a background polling task.
    ///
    /// Returns a future that should be spawned as a background task.
    pub fn start_polling(self: Arc<Self>) -> impl Future<Output = ()> + Send {
        let cache = self;
        async move {
            loop {
                tokio::time::sleep(cache.poll_interval).await;
                if let Err(e) = cache.refresh().await {
                    tracing::warn!("Failed to poll proxy status: {}", e);
                }
            }
        }
    }
}
