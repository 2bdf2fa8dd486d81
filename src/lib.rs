//! # Hestia - PV surplus control for Vaillant heat pumps
//!
//! Presents a heat pump to a PV energy manager as an EV charger and a
//! virtual vehicle. When the manager switches the "charger" on, the heat pump
//! is put into a hot water boost or a heating veto quick mode so surplus
//! power is soaked up by the hot water tank or the building.
//!
//! ## Architecture
//!
//! - `model`: device snapshot and quick mode vocabulary
//! - `strategy`: pure selection of the quick mode to run
//! - `telemetry`: cached, single-flight device snapshots
//! - `command`: the command channel trait backends implement
//! - `reconciler`: mode state machine with grace period and idle timeout
//! - `charger`: charger facade with post-switch verification
//! - `vehicle`: virtual vehicle facade exposing temperatures
//! - `backend`: myVAILLANT cloud and ebusd transports
//! - `auth`: bearer token lifecycle for the cloud backend
//! - `driver`: composition root and polling loop
//! - `web`: HTTP API for the energy manager
//! - `config`: YAML configuration with validation
//! - `logging`: structured logging and tracing

pub mod auth;
pub mod backend;
pub mod charger;
pub mod clock;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod model;
pub mod reconciler;
pub mod strategy;
pub mod telemetry;
pub mod vehicle;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use driver::Driver;
pub use error::{HestiaError, Result};
