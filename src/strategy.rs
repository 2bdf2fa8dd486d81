//! Quick mode selection
//!
//! Pure decision logic: given a telemetry snapshot and the configured PV-use
//! strategy, which quick mode is worth starting.

use crate::model::{Candidate, DeviceSnapshot, PvUseStrategy};

/// Degrees below the cylinder setpoint at which a boost is still started
/// when hot water is not the only use for surplus power
pub const HOTWATER_EARLY_BOOST_OFFSET: f64 = -5.0;

/// Room setpoint assumed when the zone time program has no active slot
pub const FALLBACK_ZONE_SETPOINT: f64 = 20.0;

/// Whether a hot water boost would have any effect
pub fn hotwater_boost_possible(snapshot: &DeviceSnapshot, strategy: PvUseStrategy) -> bool {
    let offset = match strategy {
        PvUseStrategy::Hotwater => 0.0,
        _ => HOTWATER_EARLY_BOOST_OFFSET,
    };
    let hw = &snapshot.hotwater;
    hw.operation_mode.is_scheduled() && hw.live_temperature < hw.temperature_setpoint + offset
}

/// Whether a quick veto can be placed on the given zone
pub fn heating_veto_possible(snapshot: &DeviceSnapshot, zone: u32) -> bool {
    snapshot
        .zone(zone)
        .is_some_and(|z| z.operation_mode.is_scheduled())
}

/// Pick the quick mode to start for `strategy`
pub fn select(snapshot: &DeviceSnapshot, strategy: PvUseStrategy, zone: u32) -> Candidate {
    let boost = hotwater_boost_possible(snapshot, strategy);
    let veto = heating_veto_possible(snapshot, zone);

    match strategy {
        PvUseStrategy::Hotwater if boost => Candidate::HotwaterBoost,
        PvUseStrategy::Heating if veto => Candidate::HeatingVeto,
        PvUseStrategy::HotwaterThenHeating if boost => Candidate::HotwaterBoost,
        PvUseStrategy::HotwaterThenHeating if veto => Candidate::HeatingVeto,
        _ => Candidate::None,
    }
}

/// Round to the nearest half degree, the resolution the device accepts
pub fn round_to_half_degree(value: f64) -> f64 {
    (value * 2.0).round() / 2.0
}

/// Setpoint for a new quick veto
pub fn veto_setpoint(zone_setpoint: f64, offset: f64) -> f64 {
    let base = if zone_setpoint == 0.0 {
        FALLBACK_ZONE_SETPOINT
    } else {
        zone_setpoint
    };
    round_to_half_degree(base + offset)
}
