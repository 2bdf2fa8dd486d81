//! Cached device telemetry
//!
//! [`TelemetrySource`] wraps a backend [`SnapshotFetcher`] with a freshness
//! window, a request timeout and a single retry. Callers that miss the cache
//! at the same time queue on one lock and share the fetch that the first of
//! them performs.

use crate::clock::Clock;
use crate::error::{HestiaError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::model::DeviceSnapshot;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

/// Backend side of telemetry: one uncached read of the device
#[async_trait::async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Read the current device state
    async fn fetch(&self) -> Result<DeviceSnapshot>;

    /// Obtain fresh credentials after `fetch` reported an auth error
    async fn reauthenticate(&self) -> Result<()> {
        Ok(())
    }

    /// Whether the login session has lapsed
    async fn session_expired(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct CacheSlot {
    snapshot: Option<DeviceSnapshot>,
    fetched_at: Option<DateTime<Utc>>,
}

/// TTL cache in front of a [`SnapshotFetcher`]
pub struct TelemetrySource {
    fetcher: Arc<dyn SnapshotFetcher>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    request_timeout: std::time::Duration,
    slot: Mutex<CacheSlot>,
    /// Kept outside the slot so freshness can be read while a fetch runs
    last_success: watch::Sender<Option<DateTime<Utc>>>,
    logger: StructuredLogger,
}

impl TelemetrySource {
    pub fn new(
        fetcher: Arc<dyn SnapshotFetcher>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        request_timeout: std::time::Duration,
    ) -> Self {
        let logger =
            get_logger_with_context(LogContext::new("telemetry").with_backend(fetcher.name()));
        Self {
            fetcher,
            clock,
            ttl,
            request_timeout,
            slot: Mutex::new(CacheSlot::default()),
            last_success: watch::channel(None).0,
            logger,
        }
    }

    /// Current snapshot, from cache when still fresh
    pub async fn get(&self) -> Result<DeviceSnapshot> {
        let mut slot = self.slot.lock().await;

        let now = self.clock.now();
        if let (Some(snapshot), Some(fetched_at)) = (&slot.snapshot, slot.fetched_at)
            && now - fetched_at < self.ttl
        {
            return Ok(snapshot.clone());
        }

        let snapshot = self.fetch_with_retry().await?;
        let fetched_at = self.clock.now();
        slot.snapshot = Some(snapshot.clone());
        slot.fetched_at = Some(fetched_at);
        self.last_success.send_replace(Some(fetched_at));
        Ok(snapshot)
    }

    /// Make the next `get` go to the device
    pub async fn reset(&self) {
        let mut slot = self.slot.lock().await;
        slot.fetched_at = None;
    }

    /// Last snapshot seen, without touching the device
    pub async fn peek(&self) -> Option<DeviceSnapshot> {
        self.slot.lock().await.snapshot.clone()
    }

    /// When the device last answered successfully
    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        *self.last_success.borrow()
    }

    pub async fn session_expired(&self) -> bool {
        self.fetcher.session_expired().await
    }

    pub fn backend_name(&self) -> &'static str {
        self.fetcher.name()
    }

    async fn fetch_with_retry(&self) -> Result<DeviceSnapshot> {
        match self.fetch_once().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if e.is_auth() => {
                self.logger
                    .warn(&format!("Telemetry rejected credentials, logging in again: {}", e));
                self.bounded(self.fetcher.reauthenticate()).await?;
                self.fetch_once().await
            }
            Err(e) if e.is_transient() => {
                self.logger
                    .warn(&format!("Telemetry fetch failed, retrying once: {}", e));
                self.fetch_once().await
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_once(&self) -> Result<DeviceSnapshot> {
        let snapshot = self.bounded(self.fetcher.fetch()).await?;
        self.logger.debug(&format!(
            "Fetched snapshot: hotwater {:.1}/{:.1} °C ({}), {} zone(s)",
            snapshot.hotwater.live_temperature,
            snapshot.hotwater.temperature_setpoint,
            snapshot.hotwater.operation_mode.as_str(),
            snapshot.zones.len()
        ));
        Ok(snapshot)
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| {
                HestiaError::upstream(format!(
                    "{} request timed out after {}s",
                    self.fetcher.name(),
                    self.request_timeout.as_secs()
                ))
            })?
    }
}
