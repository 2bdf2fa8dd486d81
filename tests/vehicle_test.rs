mod common;

use common::{CLOUD, FakeDevice, Harness, snapshot};
use hestia::charger::{ChargeStatus, ChargerAdapter};
use hestia::config::ChargerConfig;
use hestia::error::HestiaError;
use hestia::model::PvUseStrategy;
use hestia::vehicle::{HeatpumpVehicle, VehicleClient};
use std::sync::Arc;

fn vehicle(h: &Harness) -> (ChargerAdapter, HeatpumpVehicle) {
    let charger = ChargerAdapter::new(
        h.reconciler.clone(),
        Arc::new(h.clock.clone()),
        ChargerConfig::default(),
        240,
    );
    let vehicle = HeatpumpVehicle::new(charger.clone());
    (charger, vehicle)
}

#[tokio::test]
async fn reports_hotwater_temperatures_by_default() {
    let h = Harness::new(
        FakeDevice::new(snapshot(38.5, 50.0, "TIME_CONTROLLED"), CLOUD),
        PvUseStrategy::Hotwater,
    );
    let (_charger, vehicle) = vehicle(&h);

    assert_eq!(vehicle.current_temp().await.unwrap(), 38.5);
    assert_eq!(vehicle.soc().await.unwrap(), 38.5);
    assert_eq!(vehicle.target_temp().await.unwrap(), 50.0);
}

#[tokio::test]
async fn reports_room_temperatures_during_quick_veto() {
    let h = Harness::new(
        FakeDevice::new(snapshot(38.5, 50.0, "TIME_CONTROLLED"), CLOUD),
        PvUseStrategy::Heating,
    );
    let (charger, vehicle) = vehicle(&h);
    charger.enable(true).await.unwrap();

    assert_eq!(vehicle.current_temp().await.unwrap(), 20.5);
    assert_eq!(vehicle.target_temp().await.unwrap(), 23.0);

    let status = vehicle.fetch_status().await.unwrap();
    assert_eq!(status.soc, 20.5);
    assert_eq!(status.target, 23.0);
    assert_eq!(status.status, ChargeStatus::Charging);
    assert_eq!(status.pv_strategy, PvUseStrategy::Heating);
}

#[tokio::test]
async fn strategy_can_be_changed_from_vehicle_side() {
    let h = Harness::new(
        FakeDevice::new(snapshot(38.5, 50.0, "TIME_CONTROLLED"), CLOUD),
        PvUseStrategy::HotwaterThenHeating,
    );
    let (_charger, vehicle) = vehicle(&h);

    vehicle.check_pv_use_strategy(" Heating ").await.unwrap();
    assert_eq!(h.reconciler.pv_strategy().await, PvUseStrategy::Heating);

    // Same value again is accepted
    vehicle.check_pv_use_strategy("heating").await.unwrap();

    let err = vehicle.check_pv_use_strategy("solar").await.unwrap_err();
    assert!(matches!(err, HestiaError::Validation { .. }));
    assert_eq!(h.reconciler.pv_strategy().await, PvUseStrategy::Heating);
}

#[tokio::test]
async fn vehicle_shares_the_telemetry_cache() {
    let h = Harness::new(
        FakeDevice::new(snapshot(38.5, 50.0, "TIME_CONTROLLED"), CLOUD),
        PvUseStrategy::Hotwater,
    );
    let (charger, vehicle) = vehicle(&h);

    charger.enabled().await.unwrap();
    vehicle.soc().await.unwrap();
    vehicle.target_temp().await.unwrap();
    assert_eq!(h.device.fetches(), 1);
}
