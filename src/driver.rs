//! Composition and polling loop
//!
//! [`Driver`] wires backend, telemetry cache, reconciler and both facades
//! from the configuration, then keeps reconciliation running on a fixed
//! interval so externally started or ended quick modes are noticed even when
//! the host is not polling.

use crate::backend::{self, Backend};
use crate::charger::ChargerAdapter;
use crate::clock::{Clock, SystemClock, seconds};
use crate::config::Config;
use crate::error::Result;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::reconciler::{ModeReconciler, ReconcilerSettings};
use crate::telemetry::TelemetrySource;
use crate::vehicle::HeatpumpVehicle;
use crate::web::AppState;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

/// Main driver state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    /// No poll has completed yet
    Initializing,
    /// Last poll succeeded
    Running,
    /// Last poll failed
    Error(String),
    ShuttingDown,
}

/// Owns the shared handles and the polling loop
pub struct Driver {
    config: Config,
    charger: ChargerAdapter,
    vehicle: HeatpumpVehicle,
    state: watch::Sender<DriverState>,
    total_polls: u64,
    failed_polls: u64,
    logger: StructuredLogger,
}

impl Driver {
    /// Build everything from configuration with the system clock
    pub fn from_config(config: Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backend = backend::build(&config, clock.clone())?;
        Ok(Self::with_backend(config, backend, clock))
    }

    /// Build around an existing backend
    pub fn with_backend(config: Config, backend: Backend, clock: Arc<dyn Clock>) -> Self {
        let telemetry = Arc::new(TelemetrySource::new(
            backend.fetcher,
            clock.clone(),
            seconds(config.timing.cache_ttl_seconds),
            config.timing.request_timeout(),
        ));
        let reconciler = Arc::new(ModeReconciler::new(
            telemetry,
            backend.commands,
            clock.clone(),
            ReconcilerSettings::from_config(&config),
            config.heating.pv_use_strategy,
        ));
        let charger = ChargerAdapter::new(
            reconciler,
            clock,
            config.charger.clone(),
            config.timing.stale_after_seconds,
        );
        let vehicle = HeatpumpVehicle::new(charger.clone());
        let (state, _) = watch::channel(DriverState::Initializing);
        let logger = get_logger_with_context(
            LogContext::new("driver").with_backend(config.backend.as_str()),
        );

        Self {
            config,
            charger,
            vehicle,
            state,
            total_polls: 0,
            failed_polls: 0,
            logger,
        }
    }

    pub fn charger(&self) -> &ChargerAdapter {
        &self.charger
    }

    pub fn vehicle(&self) -> &HeatpumpVehicle {
        &self.vehicle
    }

    /// Shared state for the HTTP API
    pub fn app_state(&self) -> AppState {
        AppState {
            charger: self.charger.clone(),
            vehicle: self.vehicle.clone(),
            backend: self.config.backend.as_str(),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    /// One reconciliation pass
    pub async fn poll_cycle(&mut self) -> Result<bool> {
        self.total_polls = self.total_polls.saturating_add(1);
        match self.charger.enabled().await {
            Ok(on) => {
                self.state.send_replace(DriverState::Running);
                self.logger.debug(&format!(
                    "Poll {}: charger {}",
                    self.total_polls,
                    if on { "on" } else { "off" }
                ));
                Ok(on)
            }
            Err(e) => {
                self.failed_polls = self.failed_polls.saturating_add(1);
                self.state.send_replace(DriverState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Poll until `shutdown` turns true
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.logger.info(&format!(
            "Starting reconciliation loop every {}s",
            self.config.timing.poll_interval_seconds
        ));

        let mut poll_interval = interval(self.config.timing.poll_interval());
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.poll_cycle().await {
                        self.logger.error(&format!("Poll cycle failed: {}", e));
                        // Continue polling even on errors
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.logger.info("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        self.state.send_replace(DriverState::ShuttingDown);
        self.logger.info(&format!(
            "Driver stopped after {} polls ({} failed)",
            self.total_polls, self.failed_polls
        ));
        Ok(())
    }
}
