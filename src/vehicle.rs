//! Virtual vehicle view of the heat pump
//!
//! Energy managers size surplus charging by the vehicle state of charge. The
//! heat pump reports its hot water (or, while a quick veto runs, room)
//! temperature in that role, and the vehicle side may change the PV-use
//! strategy at runtime. It shares the reconciler and telemetry cache with the
//! charger facade.

use crate::charger::{ChargeStatus, ChargerAdapter};
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::model::{DeviceSnapshot, PvUseStrategy, QuickMode};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lowest room temperature considered when looking for the warmest zone
const MIN_ROOM_TEMPERATURE: f64 = 5.0;

/// Vehicle status information
#[derive(Debug, Clone, Serialize)]
pub struct VehicleStatus {
    /// Current temperature in °C, reported as state of charge
    pub soc: f64,
    /// Temperature the running mode aims for
    pub target: f64,
    pub status: ChargeStatus,
    pub pv_strategy: PvUseStrategy,
    pub timestamp: DateTime<Utc>,
}

/// Vehicle client trait
#[async_trait::async_trait]
pub trait VehicleClient: Send + Sync {
    async fn fetch_status(&self) -> Result<VehicleStatus>;
}

/// Heat pump presented as a vehicle
#[derive(Clone)]
pub struct HeatpumpVehicle {
    charger: ChargerAdapter,
    logger: StructuredLogger,
}

impl HeatpumpVehicle {
    pub fn new(charger: ChargerAdapter) -> Self {
        Self {
            charger,
            logger: get_logger("vehicle"),
        }
    }

    /// Hot water temperature, or room temperature while a quick veto runs
    pub async fn current_temp(&self) -> Result<f64> {
        let reconciler = self.charger.reconciler();
        let snapshot = reconciler.telemetry().get().await?;
        if reconciler.current_mode().await == QuickMode::HeatingVeto {
            return Ok(room_temperature(&snapshot, reconciler.settings().zone));
        }
        Ok(snapshot.hotwater.live_temperature)
    }

    /// Setpoint of the running mode
    pub async fn target_temp(&self) -> Result<f64> {
        let reconciler = self.charger.reconciler();
        let snapshot = reconciler.telemetry().get().await?;
        let state = reconciler.state().await;
        if state.current_mode == QuickMode::HeatingVeto {
            let zone_setpoint = snapshot
                .zone(reconciler.settings().zone)
                .map(|z| z.desired_setpoint);
            if let Some(setpoint) = state.veto_setpoint.or(zone_setpoint) {
                return Ok(setpoint);
            }
        }
        Ok(snapshot.hotwater.temperature_setpoint)
    }

    /// Validate and apply a PV-use strategy coming from the vehicle side
    pub async fn check_pv_use_strategy(&self, new_strategy: &str) -> Result<()> {
        let strategy: PvUseStrategy = new_strategy.parse()?;
        if !self
            .charger
            .reconciler()
            .set_pv_strategy(strategy)
            .await
        {
            self.logger
                .debug(&format!("PV use strategy unchanged ({})", strategy));
        }
        Ok(())
    }

    /// State of charge in percent, which is the current temperature
    pub async fn soc(&self) -> Result<f64> {
        self.current_temp().await
    }

    pub async fn status(&self) -> Result<ChargeStatus> {
        self.charger.status().await
    }
}

#[async_trait::async_trait]
impl VehicleClient for HeatpumpVehicle {
    async fn fetch_status(&self) -> Result<VehicleStatus> {
        Ok(VehicleStatus {
            soc: self.soc().await?,
            target: self.target_temp().await?,
            status: self.status().await?,
            pv_strategy: self.charger.reconciler().pv_strategy().await,
            timestamp: Utc::now(),
        })
    }
}

/// Room temperature of `zone`, falling back to the warmest zone
fn room_temperature(snapshot: &DeviceSnapshot, zone: u32) -> f64 {
    if let Some(z) = snapshot.zone(zone)
        && z.inside_temperature != 0.0
    {
        return z.inside_temperature;
    }
    snapshot
        .zones
        .iter()
        .map(|z| z.inside_temperature)
        .fold(MIN_ROOM_TEMPERATURE, f64::max)
}
