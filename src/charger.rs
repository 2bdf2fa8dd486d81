//! Charger facade for the host energy manager
//!
//! The host treats the heat pump as an EV charger. Switching the charger on
//! starts a quick mode, power is a nominal figure per mode and the charge
//! status is derived from the reconciler and telemetry freshness.

use crate::clock::{Clock, seconds};
use crate::config::ChargerConfig;
use crate::error::{HestiaError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::model::QuickMode;
use crate::reconciler::ModeReconciler;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;

/// Charge status in the IEC 61851 letters the host understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChargeStatus {
    /// A: no usable connection to the device
    Disconnected,
    /// B: reachable, no quick mode running
    Connected,
    /// C: a quick mode is running
    Charging,
}

impl ChargeStatus {
    pub fn letter(&self) -> &'static str {
        match self {
            ChargeStatus::Disconnected => "A",
            ChargeStatus::Connected => "B",
            ChargeStatus::Charging => "C",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ChargeStatus::Disconnected => "disconnected",
            ChargeStatus::Connected => "connected",
            ChargeStatus::Charging => "charging",
        }
    }
}

/// Host-facing charger
#[derive(Clone)]
pub struct ChargerAdapter {
    reconciler: Arc<ModeReconciler>,
    clock: Arc<dyn Clock>,
    config: ChargerConfig,
    stale_after: Duration,
    logger: StructuredLogger,
}

impl ChargerAdapter {
    pub fn new(
        reconciler: Arc<ModeReconciler>,
        clock: Arc<dyn Clock>,
        config: ChargerConfig,
        stale_after_seconds: u64,
    ) -> Self {
        Self {
            reconciler,
            clock,
            config,
            stale_after: seconds(stale_after_seconds),
            logger: get_logger("charger"),
        }
    }

    pub async fn enabled(&self) -> Result<bool> {
        self.reconciler.enabled().await
    }

    /// Switch on or off and confirm the device followed
    pub async fn enable(&self, enable: bool) -> Result<()> {
        self.reconciler.enable(enable).await?;

        let on = self.reconciler.enabled().await?;
        if on != enable {
            let msg = if enable {
                "switch on failed"
            } else {
                "switch off failed"
            };
            self.logger.warn(msg);
            return Err(HestiaError::verification_mismatch(msg));
        }
        Ok(())
    }

    /// Nominal power draw of the running quick mode in watts
    pub async fn current_power(&self) -> Result<f64> {
        let power = match self.reconciler.current_mode().await {
            QuickMode::HotwaterBoost => self.config.hotwater_power_w,
            QuickMode::HeatingVeto => self.config.heating_power_w,
            QuickMode::Idle => self.config.idle_power_w,
            QuickMode::None => 0.0,
        };
        if power < self.config.standby_power_w {
            return Ok(0.0);
        }
        Ok(power)
    }

    /// Charge status from the last committed mode and the last successful
    /// poll. Does not wait for a fetch or command that is still running.
    pub async fn status(&self) -> Result<ChargeStatus> {
        if self.reconciler.latest_mode() != QuickMode::None {
            return Ok(ChargeStatus::Charging);
        }

        let telemetry = self.reconciler.telemetry();
        if telemetry.session_expired().await {
            return Ok(ChargeStatus::Disconnected);
        }
        let fresh = telemetry
            .last_success_at()
            .is_some_and(|at| self.clock.now() - at <= self.stale_after);
        if !fresh {
            return Ok(ChargeStatus::Disconnected);
        }
        Ok(ChargeStatus::Connected)
    }

    pub fn phases(&self) -> u8 {
        self.config.phases
    }

    /// Human readable description of the running quick mode
    pub async fn mode_text(&self) -> String {
        let state = self.reconciler.state().await;
        match state.current_mode {
            QuickMode::None => "No quick mode active".to_string(),
            QuickMode::HotwaterBoost => "Hotwater Boost active".to_string(),
            QuickMode::Idle => "Idle, no quick mode possible".to_string(),
            QuickMode::HeatingVeto => {
                let mut text = "Heating Quick Veto active".to_string();
                if let Some(setpoint) = state.veto_setpoint {
                    text.push_str(&format!(" at {:.1} °C", setpoint));
                }
                if let Some(ends) = state.veto_expires_at {
                    text.push_str(&format!(
                        ". Ends {}",
                        ends.with_timezone(&chrono::Local).format("%H:%M")
                    ));
                }
                text
            }
        }
    }

    pub fn reconciler(&self) -> &Arc<ModeReconciler> {
        &self.reconciler
    }
}
