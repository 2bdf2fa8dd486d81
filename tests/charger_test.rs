mod common;

use chrono::Duration;
use common::{CLOUD, FakeDevice, GATEWAY, Harness, STALL, snapshot};
use hestia::charger::{ChargeStatus, ChargerAdapter};
use hestia::config::ChargerConfig;
use hestia::error::HestiaError;
use hestia::model::PvUseStrategy;
use std::sync::Arc;

fn charger(h: &Harness, config: ChargerConfig) -> ChargerAdapter {
    ChargerAdapter::new(h.reconciler.clone(), Arc::new(h.clock.clone()), config, 240)
}

#[tokio::test]
async fn enable_reports_charging_with_nominal_power() {
    let h = Harness::new(
        FakeDevice::new(snapshot(35.0, 50.0, "TIME_CONTROLLED"), CLOUD),
        PvUseStrategy::Hotwater,
    );
    let charger = charger(&h, ChargerConfig::default());

    charger.enable(true).await.unwrap();
    assert!(charger.enabled().await.unwrap());
    assert_eq!(charger.status().await.unwrap(), ChargeStatus::Charging);
    assert_eq!(charger.current_power().await.unwrap(), 3000.0);
    assert_eq!(charger.mode_text().await, "Hotwater Boost active");

    charger.enable(false).await.unwrap();
    assert_eq!(charger.current_power().await.unwrap(), 0.0);
    assert_eq!(charger.status().await.unwrap(), ChargeStatus::Connected);
}

#[tokio::test]
async fn enable_succeeds_while_device_report_lags() {
    // Device keeps reporting no quick mode after the start command
    let h = Harness::new(
        FakeDevice::frozen(snapshot(35.0, 50.0, "TIME_CONTROLLED"), CLOUD),
        PvUseStrategy::Hotwater,
    );
    let charger = charger(&h, ChargerConfig::default());

    charger.enable(true).await.unwrap();
    assert!(charger.enabled().await.unwrap());
}

#[tokio::test]
async fn enable_without_possible_mode_is_a_mismatch() {
    let h = Harness::new(
        FakeDevice::new(snapshot(55.0, 50.0, "off"), CLOUD),
        PvUseStrategy::HotwaterThenHeating,
    );
    let charger = charger(&h, ChargerConfig::default());

    let err = charger.enable(true).await.unwrap_err();
    assert!(matches!(err, HestiaError::VerificationMismatch { .. }));
    assert!(err.to_string().contains("switch on failed"));
}

#[tokio::test]
async fn idle_placeholder_reports_charging_without_power() {
    let h = Harness::new(
        FakeDevice::new(snapshot(55.0, 50.0, "off"), GATEWAY),
        PvUseStrategy::HotwaterThenHeating,
    );
    let charger = charger(&h, ChargerConfig::default());

    charger.enable(true).await.unwrap();
    assert_eq!(charger.status().await.unwrap(), ChargeStatus::Charging);
    assert_eq!(charger.current_power().await.unwrap(), 0.0);
    assert_eq!(charger.mode_text().await, "Idle, no quick mode possible");
}

#[tokio::test]
async fn power_below_standby_is_reported_as_zero() {
    let h = Harness::new(
        FakeDevice::new(snapshot(35.0, 50.0, "TIME_CONTROLLED"), CLOUD),
        PvUseStrategy::Heating,
    );
    let config = ChargerConfig {
        heating_power_w: 5.0,
        ..ChargerConfig::default()
    };
    let charger = charger(&h, config);

    charger.enable(true).await.unwrap();
    assert_eq!(charger.current_power().await.unwrap(), 0.0);
    assert!(
        charger
            .mode_text()
            .await
            .starts_with("Heating Quick Veto active at 23.0 °C. Ends ")
    );
}

#[tokio::test]
async fn status_tracks_telemetry_freshness() {
    let h = Harness::new(
        FakeDevice::new(snapshot(55.0, 50.0, "off"), CLOUD),
        PvUseStrategy::Hotwater,
    );
    let charger = charger(&h, ChargerConfig::default());

    // Never talked to the device yet
    assert_eq!(charger.status().await.unwrap(), ChargeStatus::Disconnected);

    assert!(!charger.enabled().await.unwrap());
    assert_eq!(charger.status().await.unwrap(), ChargeStatus::Connected);

    h.device.fail_fetch(true);
    h.advance(Duration::seconds(241)).await;
    assert!(charger.enabled().await.is_err());
    assert_eq!(charger.status().await.unwrap(), ChargeStatus::Disconnected);

    h.device.fail_fetch(false);
    assert!(!charger.enabled().await.unwrap());
    assert_eq!(charger.status().await.unwrap(), ChargeStatus::Connected);
}

#[test]
fn charge_status_letters() {
    assert_eq!(ChargeStatus::Disconnected.letter(), "A");
    assert_eq!(ChargeStatus::Connected.letter(), "B");
    assert_eq!(ChargeStatus::Charging.letter(), "C");
    assert_eq!(ChargeStatus::Charging.description(), "charging");
}

#[tokio::test]
async fn status_does_not_wait_for_a_stalled_poll() {
    let h = Harness::new(
        FakeDevice::new(snapshot(55.0, 50.0, "off"), CLOUD),
        PvUseStrategy::Hotwater,
    );
    let charger = charger(&h, ChargerConfig::default());
    assert!(!charger.enabled().await.unwrap());

    h.device.stall("fetch");
    h.advance(Duration::seconds(120)).await;
    let reconciler = h.reconciler.clone();
    let poll = tokio::spawn(async move { reconciler.enabled().await });
    // Let the poll take the locks and hang in the fetch
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let status = tokio::time::timeout(STALL / 2, charger.status())
        .await
        .expect("status blocked on the running poll")
        .unwrap();
    assert_eq!(status, ChargeStatus::Connected);

    assert!(!poll.await.unwrap().unwrap());
}
