//! Device command seam
//!
//! Each backend implements [`CommandChannel`] to start and stop the two quick
//! modes. Calls are one-shot: they report success or failure and never retry.

use crate::error::Result;
use chrono::Duration;
use serde::Serialize;

/// Behavior differences between backends that the reconciler must respect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendCapabilities {
    /// Hold an explicit idle placeholder when nothing can be started
    pub idle_placeholder: bool,
    /// A failed stop of the other quick mode may be ignored when switching modes
    pub tolerates_overlapping_stop_failure: bool,
    /// Default restart cool-down after a quick mode ended without our command
    pub restart_cooldown_seconds: u64,
}

/// Start/stop instructions for the device
#[async_trait::async_trait]
pub trait CommandChannel: Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;

    async fn start_hotwater_boost(&self) -> Result<()>;

    async fn stop_hotwater_boost(&self) -> Result<()>;

    /// Override the zone setpoint for `duration`
    async fn start_zone_veto(&self, zone: u32, setpoint: f64, duration: Duration) -> Result<()>;

    async fn stop_zone_veto(&self, zone: u32) -> Result<()>;
}
