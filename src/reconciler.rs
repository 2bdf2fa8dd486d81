//! Quick mode state machine
//!
//! [`ModeReconciler`] owns the intended quick mode and keeps it in line with
//! what the device reports. `enable` is the only path that issues commands;
//! `enabled` only classifies the latest snapshot. The device has no push
//! channel, so changes made elsewhere (control panel, time program, vendor
//! app, automatic stop) are picked up by polling. Such a change is trusted
//! only once the grace period since our own last transition has passed,
//! because the upstream report lags behind the commands we send.
//!
//! All time based transitions are evaluated lazily on the next call.

use crate::clock::{Clock, seconds};
use crate::command::{BackendCapabilities, CommandChannel};
use crate::config::Config;
use crate::error::{HestiaError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::model::{Candidate, DeviceSnapshot, PvUseStrategy, QuickMode};
use crate::strategy;
use crate::telemetry::TelemetrySource;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

/// Tunables of the state machine
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Heating zone used for quick veto
    pub zone: u32,
    /// Added to the zone setpoint for a quick veto
    pub temperature_offset: f64,
    pub veto_duration: Duration,
    pub grace_period: Duration,
    pub idle_timeout: Duration,
    /// `None` uses the backend default, zero disables the cool-down
    pub restart_cooldown: Option<Duration>,
    pub command_timeout: std::time::Duration,
}

impl ReconcilerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            zone: config.heating.zone,
            temperature_offset: config.heating.temperature_offset,
            veto_duration: Duration::minutes(i64::from(config.heating.veto_duration_minutes)),
            grace_period: seconds(config.timing.grace_period_seconds),
            idle_timeout: seconds(config.timing.idle_timeout_seconds),
            restart_cooldown: config.timing.restart_cooldown_seconds.map(seconds),
            command_timeout: config.timing.request_timeout(),
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Intended device state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcilerState {
    pub current_mode: QuickMode,
    pub mode_started_at: DateTime<Utc>,
    pub mode_stopped_at: Option<DateTime<Utc>>,
    pub on_off: bool,
    pub veto_setpoint: Option<f64>,
    pub veto_expires_at: Option<DateTime<Utc>>,
    pub pv_strategy: PvUseStrategy,
    /// Last time a quick mode ended without a command from us
    pub device_stopped_at: Option<DateTime<Utc>>,
}

impl ReconcilerState {
    fn new(now: DateTime<Utc>, pv_strategy: PvUseStrategy) -> Self {
        Self {
            current_mode: QuickMode::None,
            mode_started_at: now,
            mode_stopped_at: None,
            on_off: false,
            veto_setpoint: None,
            veto_expires_at: None,
            pv_strategy,
            device_stopped_at: None,
        }
    }

    /// Later of the last local start and stop
    pub fn last_transition(&self) -> DateTime<Utc> {
        self.mode_stopped_at
            .map_or(self.mode_started_at, |stopped| stopped.max(self.mode_started_at))
    }

    fn start(&mut self, mode: QuickMode, now: DateTime<Utc>) {
        self.current_mode = mode;
        self.mode_started_at = now;
        self.on_off = true;
        self.veto_setpoint = None;
        self.veto_expires_at = None;
    }

    fn clear(&mut self, now: DateTime<Utc>) {
        self.current_mode = QuickMode::None;
        self.mode_stopped_at = Some(now);
        self.on_off = false;
        self.veto_setpoint = None;
        self.veto_expires_at = None;
    }
}

/// Reconciles intended and reported quick modes for one device
pub struct ModeReconciler {
    telemetry: Arc<TelemetrySource>,
    commands: Arc<dyn CommandChannel>,
    clock: Arc<dyn Clock>,
    settings: ReconcilerSettings,
    state: Mutex<ReconcilerState>,
    /// Mode as of the last completed transition, readable without the state lock
    mode: watch::Sender<QuickMode>,
    logger: StructuredLogger,
}

impl ModeReconciler {
    pub fn new(
        telemetry: Arc<TelemetrySource>,
        commands: Arc<dyn CommandChannel>,
        clock: Arc<dyn Clock>,
        settings: ReconcilerSettings,
        pv_strategy: PvUseStrategy,
    ) -> Self {
        let logger = get_logger_with_context(
            LogContext::new("reconciler")
                .with_backend(telemetry.backend_name())
                .with_field("zone", settings.zone.to_string()),
        );
        let state = ReconcilerState::new(clock.now(), pv_strategy);
        Self {
            telemetry,
            commands,
            clock,
            settings,
            state: Mutex::new(state),
            mode: watch::channel(QuickMode::None).0,
            logger,
        }
    }

    /// Whether the charger should be shown as switched on.
    ///
    /// Refreshes telemetry and adopts or drops quick modes that were started
    /// or ended outside of this process. Never sends commands.
    pub async fn enabled(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.expire_idle(&mut state);

        let snapshot = self.telemetry.get().await?;
        self.reconcile(&mut state, &snapshot);
        self.mode.send_replace(state.current_mode);
        Ok(state.on_off)
    }

    /// Switch quick mode operation on or off.
    ///
    /// State is only committed once every command in the sequence succeeded.
    pub async fn enable(&self, target: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        self.expire_idle(&mut state);

        self.telemetry.reset().await;
        let snapshot = self.telemetry.get().await?;

        let mut next = state.clone();
        if target {
            self.switch_on(&mut next, &snapshot).await?;
        } else {
            self.switch_off(&mut next).await?;
        }

        if *state != next {
            self.logger.info(&format!(
                "Quick mode {} -> {}",
                state.current_mode, next.current_mode
            ));
            *state = next;
            self.mode.send_replace(state.current_mode);
            // Next read should reflect the commands just sent
            self.telemetry.reset().await;
        }
        Ok(())
    }

    /// Copy of the current intended state
    pub async fn state(&self) -> ReconcilerState {
        self.state.lock().await.clone()
    }

    pub async fn current_mode(&self) -> QuickMode {
        self.state.lock().await.current_mode
    }

    /// Last committed mode, without waiting for a call that is still talking
    /// to the device
    pub fn latest_mode(&self) -> QuickMode {
        *self.mode.borrow()
    }

    pub async fn pv_strategy(&self) -> PvUseStrategy {
        self.state.lock().await.pv_strategy
    }

    /// Replace the PV-use strategy; returns whether it changed
    pub async fn set_pv_strategy(&self, strategy: PvUseStrategy) -> bool {
        let mut state = self.state.lock().await;
        if state.pv_strategy == strategy {
            return false;
        }
        self.logger.info(&format!(
            "PV use strategy changed from {} to {}",
            state.pv_strategy, strategy
        ));
        state.pv_strategy = strategy;
        true
    }

    pub fn telemetry(&self) -> &Arc<TelemetrySource> {
        &self.telemetry
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.commands.capabilities()
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Configured cool-down, else the backend default
    pub fn restart_cooldown(&self) -> Duration {
        self.settings
            .restart_cooldown
            .unwrap_or_else(|| seconds(self.capabilities().restart_cooldown_seconds))
    }

    fn expire_idle(&self, state: &mut ReconcilerState) {
        let now = self.clock.now();
        if state.current_mode == QuickMode::Idle
            && now - state.mode_started_at > self.settings.idle_timeout
        {
            self.logger.info("Idle placeholder expired");
            state.clear(now);
            state.device_stopped_at = Some(now);
            self.mode.send_replace(state.current_mode);
        }
    }

    fn reconcile(&self, state: &mut ReconcilerState, snapshot: &DeviceSnapshot) {
        let now = self.clock.now();
        let grace_elapsed = now - state.last_transition() >= self.settings.grace_period;
        let zone = snapshot.zone(self.settings.zone);

        match state.current_mode {
            QuickMode::None => {
                let boost = snapshot.hotwater.boost_active();
                let veto = zone.is_some_and(|z| z.veto_active());
                if !(boost || veto) {
                    return;
                }
                if !grace_elapsed {
                    self.logger
                        .debug("Device reports a quick mode, waiting for grace period");
                    return;
                }
                if boost {
                    self.logger.info(&format!(
                        "Adopting hot water boost started elsewhere ({})",
                        snapshot.hotwater.observed_quickmode
                    ));
                    state.start(QuickMode::HotwaterBoost, now);
                } else if let Some(zone) = zone {
                    self.logger.info(&format!(
                        "Adopting quick veto started elsewhere at {:.1} °C",
                        zone.desired_setpoint
                    ));
                    state.start(QuickMode::HeatingVeto, now);
                    state.veto_setpoint = Some(zone.desired_setpoint);
                }
            }
            QuickMode::HotwaterBoost => {
                if !snapshot.hotwater.boost_active() && grace_elapsed {
                    self.logger.info("Hot water boost ended on the device");
                    state.clear(now);
                    state.device_stopped_at = Some(now);
                }
            }
            QuickMode::HeatingVeto => {
                if !zone.is_some_and(|z| z.veto_active()) && grace_elapsed {
                    self.logger.info("Quick veto ended on the device");
                    state.clear(now);
                    state.device_stopped_at = Some(now);
                }
            }
            QuickMode::Idle => {}
        }
    }

    async fn switch_on(&self, next: &mut ReconcilerState, snapshot: &DeviceSnapshot) -> Result<()> {
        let now = self.clock.now();

        let cooldown = self.restart_cooldown();
        if cooldown > Duration::zero()
            && let Some(stopped) = next.device_stopped_at
            && now - stopped < cooldown
        {
            self.logger.info(&format!(
                "Not restarting, last quick mode ended without us at {}",
                stopped.format("%H:%M:%S")
            ));
            return Ok(());
        }

        let candidate = strategy::select(snapshot, next.pv_strategy, self.settings.zone);
        let wanted = QuickMode::from(candidate);
        if wanted != QuickMode::None && wanted == next.current_mode {
            self.logger
                .debug(&format!("{} already active", next.current_mode));
            return Ok(());
        }

        match candidate {
            Candidate::HotwaterBoost => {
                if next.current_mode == QuickMode::HeatingVeto {
                    self.stop_before_switch(QuickMode::HeatingVeto).await?;
                }
                self.bounded("start hot water boost", self.commands.start_hotwater_boost())
                    .await?;
                next.start(QuickMode::HotwaterBoost, now);
            }
            Candidate::HeatingVeto => {
                if next.current_mode == QuickMode::HotwaterBoost {
                    self.stop_before_switch(QuickMode::HotwaterBoost).await?;
                }
                let zone_setpoint = snapshot
                    .zone(self.settings.zone)
                    .map_or(0.0, |z| z.desired_setpoint);
                let setpoint =
                    strategy::veto_setpoint(zone_setpoint, self.settings.temperature_offset);
                self.bounded(
                    "start quick veto",
                    self.commands.start_zone_veto(
                        self.settings.zone,
                        setpoint,
                        self.settings.veto_duration,
                    ),
                )
                .await?;
                next.start(QuickMode::HeatingVeto, now);
                next.veto_setpoint = Some(setpoint);
                next.veto_expires_at = Some(now + self.settings.veto_duration);
            }
            Candidate::None => {
                if !self.capabilities().idle_placeholder {
                    self.logger.info("No quick mode possible right now");
                    return Ok(());
                }
                if next.current_mode == QuickMode::Idle {
                    return Ok(());
                }
                self.stop_mode(next.current_mode).await?;
                self.logger
                    .info("No quick mode possible, holding idle placeholder");
                next.start(QuickMode::Idle, now);
            }
        }
        Ok(())
    }

    async fn switch_off(&self, next: &mut ReconcilerState) -> Result<()> {
        if next.current_mode == QuickMode::None {
            return Ok(());
        }
        self.stop_mode(next.current_mode).await?;
        next.clear(self.clock.now());
        Ok(())
    }

    async fn stop_before_switch(&self, mode: QuickMode) -> Result<()> {
        match self.stop_mode(mode).await {
            Ok(()) => Ok(()),
            Err(e) if self.capabilities().tolerates_overlapping_stop_failure => {
                self.logger
                    .warn(&format!("Could not stop {} before switching: {}", mode, e));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn stop_mode(&self, mode: QuickMode) -> Result<()> {
        match mode {
            QuickMode::HotwaterBoost => {
                self.bounded("stop hot water boost", self.commands.stop_hotwater_boost())
                    .await
            }
            QuickMode::HeatingVeto => {
                self.bounded(
                    "stop quick veto",
                    self.commands.stop_zone_veto(self.settings.zone),
                )
                .await
            }
            QuickMode::None | QuickMode::Idle => Ok(()),
        }
    }

    async fn bounded(&self, action: &str, fut: impl Future<Output = Result<()>>) -> Result<()> {
        let result = tokio::time::timeout(self.settings.command_timeout, fut)
            .await
            .map_err(|_| HestiaError::command_failed(format!("{}: timed out", action)))?;

        result.map_err(|e| {
            self.logger.error(&format!("Failed to {}: {}", action, e));
            match e {
                HestiaError::Auth { .. } | HestiaError::CommandFailed { .. } => e,
                other => HestiaError::command_failed(format!("{}: {}", action, other)),
            }
        })
    }
}
