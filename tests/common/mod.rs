#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use hestia::clock::ManualClock;
use hestia::command::{BackendCapabilities, CommandChannel};
use hestia::error::{HestiaError, Result};
use hestia::model::{DeviceSnapshot, HotwaterState, OperationMode, PvUseStrategy, ZoneState};
use hestia::reconciler::{ModeReconciler, ReconcilerSettings};
use hestia::telemetry::{SnapshotFetcher, TelemetrySource};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const CLOUD: BackendCapabilities = BackendCapabilities {
    idle_placeholder: false,
    tolerates_overlapping_stop_failure: true,
    restart_cooldown_seconds: 0,
};

pub const GATEWAY: BackendCapabilities = BackendCapabilities {
    idle_placeholder: true,
    tolerates_overlapping_stop_failure: false,
    restart_cooldown_seconds: 120,
};

/// How long a stalled call hangs
pub const STALL: std::time::Duration = std::time::Duration::from_secs(1);

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Hot water at `live`/`setpoint`, zone 1 in `zone_mode` at 21 °C
pub fn snapshot(live: f64, setpoint: f64, zone_mode: &str) -> DeviceSnapshot {
    DeviceSnapshot {
        hotwater: HotwaterState {
            operation_mode: OperationMode::Scheduled,
            temperature_setpoint: setpoint,
            live_temperature: live,
            observed_quickmode: String::new(),
        },
        zones: vec![ZoneState {
            index: 1,
            operation_mode: OperationMode::from_vendor(zone_mode),
            desired_setpoint: 21.0,
            observed_quickmode: String::new(),
            inside_temperature: 20.5,
        }],
        captured_at: start_time(),
    }
}

/// In-memory heat pump that records every command
pub struct FakeDevice {
    snapshot: Mutex<DeviceSnapshot>,
    log: Mutex<Vec<String>>,
    failing: Mutex<HashMap<&'static str, bool>>,
    stalled: Mutex<HashSet<&'static str>>,
    fail_fetch: AtomicBool,
    fetches: AtomicUsize,
    follows: bool,
    caps: BackendCapabilities,
}

impl FakeDevice {
    /// Device whose reported quick modes follow the commands it receives
    pub fn new(snapshot: DeviceSnapshot, caps: BackendCapabilities) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            log: Mutex::new(Vec::new()),
            failing: Mutex::new(HashMap::new()),
            stalled: Mutex::new(HashSet::new()),
            fail_fetch: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            follows: true,
            caps,
        }
    }

    /// Device that ignores commands in its reports
    pub fn frozen(snapshot: DeviceSnapshot, caps: BackendCapabilities) -> Self {
        Self {
            follows: false,
            ..Self::new(snapshot, caps)
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// What the device would report right now
    pub fn current(&self) -> DeviceSnapshot {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Make `command` fail; `auth` selects an auth error instead of an upstream one
    pub fn fail(&self, command: &'static str, auth: bool) {
        self.failing.lock().unwrap().insert(command, auth);
    }

    /// Make `call` ("fetch" or a command name) hang for [`STALL`]
    pub fn stall(&self, call: &'static str) {
        self.stalled.lock().unwrap().insert(call);
    }

    async fn hold(&self, call: &'static str) {
        let stalled = self.stalled.lock().unwrap().contains(call);
        if stalled {
            tokio::time::sleep(STALL).await;
        }
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_hotwater_quickmode(&self, value: &str) {
        self.snapshot.lock().unwrap().hotwater.observed_quickmode = value.to_string();
    }

    pub fn set_zone_quickmode(&self, value: &str) {
        self.snapshot.lock().unwrap().zones[0].observed_quickmode = value.to_string();
    }

    pub fn update(&self, f: impl FnOnce(&mut DeviceSnapshot)) {
        f(&mut self.snapshot.lock().unwrap());
    }

    fn run(&self, name: &'static str, entry: String) -> Result<()> {
        if let Some(auth) = self.failing.lock().unwrap().get(name) {
            return Err(if *auth {
                HestiaError::auth("token rejected")
            } else {
                HestiaError::upstream("device unreachable")
            });
        }
        self.log.lock().unwrap().push(entry);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SnapshotFetcher for FakeDevice {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch(&self) -> Result<DeviceSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.hold("fetch").await;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(HestiaError::upstream("no route to device"));
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

#[async_trait::async_trait]
impl CommandChannel for FakeDevice {
    fn capabilities(&self) -> BackendCapabilities {
        self.caps
    }

    async fn start_hotwater_boost(&self) -> Result<()> {
        self.hold("start_hotwater_boost").await;
        self.run("start_hotwater_boost", "start_hotwater_boost".to_string())?;
        if self.follows {
            self.set_hotwater_quickmode("CYLINDER_BOOST");
        }
        Ok(())
    }

    async fn stop_hotwater_boost(&self) -> Result<()> {
        self.hold("stop_hotwater_boost").await;
        self.run("stop_hotwater_boost", "stop_hotwater_boost".to_string())?;
        if self.follows {
            self.set_hotwater_quickmode("REGULAR");
        }
        Ok(())
    }

    async fn start_zone_veto(&self, zone: u32, setpoint: f64, duration: Duration) -> Result<()> {
        self.hold("start_zone_veto").await;
        self.run(
            "start_zone_veto",
            format!(
                "start_zone_veto {} {:.1} {}",
                zone,
                setpoint,
                duration.num_minutes()
            ),
        )?;
        if self.follows {
            self.set_zone_quickmode("QUICK_VETO");
        }
        Ok(())
    }

    async fn stop_zone_veto(&self, zone: u32) -> Result<()> {
        self.hold("stop_zone_veto").await;
        self.run("stop_zone_veto", format!("stop_zone_veto {}", zone))?;
        if self.follows {
            self.set_zone_quickmode("NONE");
        }
        Ok(())
    }
}

pub struct Harness {
    pub device: Arc<FakeDevice>,
    pub clock: ManualClock,
    pub reconciler: Arc<ModeReconciler>,
}

impl Harness {
    pub fn new(device: FakeDevice, strategy: PvUseStrategy) -> Self {
        Self::with_settings(device, strategy, ReconcilerSettings::default())
    }

    pub fn with_settings(
        device: FakeDevice,
        strategy: PvUseStrategy,
        settings: ReconcilerSettings,
    ) -> Self {
        let device = Arc::new(device);
        let clock = ManualClock::new(start_time());
        let telemetry = Arc::new(TelemetrySource::new(
            device.clone(),
            Arc::new(clock.clone()),
            Duration::seconds(90),
            std::time::Duration::from_secs(5),
        ));
        let reconciler = Arc::new(ModeReconciler::new(
            telemetry,
            device.clone(),
            Arc::new(clock.clone()),
            settings,
            strategy,
        ));
        Self {
            device,
            clock,
            reconciler,
        }
    }

    /// Move time forward and drop the cached snapshot
    pub async fn advance(&self, by: Duration) {
        self.clock.advance(by);
        self.reconciler.telemetry().reset().await;
    }
}
