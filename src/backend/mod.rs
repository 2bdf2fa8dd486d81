//! Device backends
//!
//! Each backend implements [`SnapshotFetcher`] and [`CommandChannel`] for one
//! wire protocol. [`build`] wires the one selected in the configuration.

pub mod ebusd;
#[cfg(feature = "cloud")]
pub mod myvaillant;

use crate::clock::Clock;
use crate::command::CommandChannel;
use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::telemetry::SnapshotFetcher;
use std::sync::Arc;

/// Telemetry and command halves of one backend
#[derive(Clone)]
pub struct Backend {
    pub fetcher: Arc<dyn SnapshotFetcher>,
    pub commands: Arc<dyn CommandChannel>,
}

impl Backend {
    /// Use one client for both halves
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: SnapshotFetcher + CommandChannel + 'static,
    {
        Self {
            fetcher: client.clone(),
            commands: client,
        }
    }
}

/// Construct the configured backend
pub fn build(config: &Config, clock: Arc<dyn Clock>) -> Result<Backend> {
    match config.backend {
        BackendKind::Ebusd => {
            let client = ebusd::EbusdClient::new(
                &config.ebusd.address,
                config.heating.zone,
                config.ebusd.max_age_seconds,
                config.timing.request_timeout(),
            );
            Ok(Backend::from_client(Arc::new(client)))
        }
        BackendKind::Myvaillant => build_cloud(config, clock),
    }
}

#[cfg(feature = "cloud")]
fn build_cloud(config: &Config, clock: Arc<dyn Clock>) -> Result<Backend> {
    use crate::auth::{AuthSession, Credentials, TokenStore};
    use crate::clock::seconds;

    let cloud = &config.myvaillant;
    let timeout = config.timing.request_timeout();
    let identity = myvaillant::MyVaillantIdentity::new(&cloud.identity_base_url, &cloud.realm, timeout)?;

    let mut session = AuthSession::new(
        Arc::new(identity),
        Credentials {
            user: cloud.user.clone(),
            password: cloud.password.clone(),
        },
        clock,
        seconds(config.timing.token_refresh_margin_seconds),
    );
    if let Some(path) = &cloud.token_file {
        session = session.with_store(TokenStore::new(path));
    }

    let client = myvaillant::MyVaillantClient::new(&cloud.api_base_url, Arc::new(session), timeout)?;
    Ok(Backend::from_client(Arc::new(client)))
}

#[cfg(not(feature = "cloud"))]
fn build_cloud(_config: &Config, _clock: Arc<dyn Clock>) -> Result<Backend> {
    Err(crate::error::HestiaError::config(
        "myvaillant backend requires the 'cloud' feature",
    ))
}
