//! Device data model shared by every backend
//!
//! Backends translate their wire formats into a [`DeviceSnapshot`]; the
//! strategy selector and the reconciler only ever look at these types.

use crate::error::{HestiaError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Temporary override the reconciler can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickMode {
    /// Nothing requested
    #[default]
    None,
    /// Domestic hot water cylinder boost
    HotwaterBoost,
    /// Heating zone quick veto (temporary setpoint override)
    HeatingVeto,
    /// Charger shows active but nothing could be started
    Idle,
}

impl QuickMode {
    /// Stable lower-case name used in logs and the HTTP API
    pub fn as_str(&self) -> &'static str {
        match self {
            QuickMode::None => "none",
            QuickMode::HotwaterBoost => "hotwater_boost",
            QuickMode::HeatingVeto => "heating_veto",
            QuickMode::Idle => "idle",
        }
    }
}

impl fmt::Display for QuickMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quick mode the strategy selector proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Candidate {
    None,
    HotwaterBoost,
    HeatingVeto,
}

impl From<Candidate> for QuickMode {
    fn from(candidate: Candidate) -> Self {
        match candidate {
            Candidate::None => QuickMode::None,
            Candidate::HotwaterBoost => QuickMode::HotwaterBoost,
            Candidate::HeatingVeto => QuickMode::HeatingVeto,
        }
    }
}

/// Which quick mode to prefer when PV surplus is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PvUseStrategy {
    /// Only boost hot water
    Hotwater,
    /// Only raise the heating zone setpoint
    Heating,
    /// Boost hot water first, fall back to heating
    #[default]
    HotwaterThenHeating,
}

impl PvUseStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PvUseStrategy::Hotwater => "hotwater",
            PvUseStrategy::Heating => "heating",
            PvUseStrategy::HotwaterThenHeating => "hotwater_then_heating",
        }
    }
}

impl fmt::Display for PvUseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PvUseStrategy {
    type Err = HestiaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hotwater" => Ok(PvUseStrategy::Hotwater),
            "heating" => Ok(PvUseStrategy::Heating),
            "hotwater_then_heating" => Ok(PvUseStrategy::HotwaterThenHeating),
            other => Err(HestiaError::validation(
                "pv_use_strategy",
                format!(
                    "unknown strategy '{}' (expected hotwater, heating or hotwater_then_heating)",
                    other
                ),
            )),
        }
    }
}

/// Normalized operation mode of the hot water circuit or a heating zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationMode {
    /// Following the device time program
    Scheduled,
    /// Constant manual setpoint
    Manual,
    Off,
    /// Anything else, lower-cased
    Other(String),
}

impl OperationMode {
    /// Map a vendor operation mode string onto the normalized modes
    pub fn from_vendor(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TIME_CONTROLLED" | "AUTO" | "SCHEDULED" => OperationMode::Scheduled,
            "MANUAL" | "DAY" => OperationMode::Manual,
            "OFF" => OperationMode::Off,
            _ => OperationMode::Other(raw.trim().to_ascii_lowercase()),
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, OperationMode::Scheduled)
    }

    pub fn as_str(&self) -> &str {
        match self {
            OperationMode::Scheduled => "scheduled",
            OperationMode::Manual => "manual",
            OperationMode::Off => "off",
            OperationMode::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for OperationMode {
    fn from(value: String) -> Self {
        OperationMode::from_vendor(&value)
    }
}

impl From<OperationMode> for String {
    fn from(mode: OperationMode) -> Self {
        mode.as_str().to_string()
    }
}

/// Whether a reported special function means an override is running.
///
/// Each backend reports its own idle marker: the cloud API uses `REGULAR`
/// for hot water and `NONE` for zones, the gateway reports `auto`.
pub fn special_function_active(observed: &str) -> bool {
    let observed = observed.trim();
    !(observed.is_empty()
        || observed.eq_ignore_ascii_case("REGULAR")
        || observed.eq_ignore_ascii_case("NONE")
        || observed.eq_ignore_ascii_case("auto"))
}

/// Hot water circuit as reported by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotwaterState {
    pub operation_mode: OperationMode,
    /// Desired cylinder temperature in °C
    pub temperature_setpoint: f64,
    /// Measured cylinder temperature in °C
    pub live_temperature: f64,
    /// Vendor special function string, empty when none is running
    pub observed_quickmode: String,
}

impl HotwaterState {
    pub fn boost_active(&self) -> bool {
        special_function_active(&self.observed_quickmode)
    }
}

/// Heating zone as reported by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneState {
    /// Zone number as used by the vendor (first zone is 1)
    pub index: u32,
    pub operation_mode: OperationMode,
    /// Currently desired room setpoint in °C, 0 when the time program has no active slot
    pub desired_setpoint: f64,
    pub observed_quickmode: String,
    /// Measured room temperature in °C
    pub inside_temperature: f64,
}

impl ZoneState {
    pub fn veto_active(&self) -> bool {
        special_function_active(&self.observed_quickmode)
    }
}

/// Point-in-time read of device telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub hotwater: HotwaterState,
    pub zones: Vec<ZoneState>,
    pub captured_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    /// Look up a zone by its vendor index
    pub fn zone(&self, index: u32) -> Option<&ZoneState> {
        self.zones.iter().find(|z| z.index == index)
    }
}
