//! myVAILLANT cloud backend
//!
//! Telemetry comes from the system "tli" document of the end-user app API;
//! quick modes are started and stopped with POST/DELETE on the hot water
//! boost and zone quick-veto resources. Login is OAuth authorization code with
//! PKCE against the vendor Keycloak realm, driven through its HTML login form.

use crate::auth::{AuthSession, Credentials, IdentityProvider, Token};
use crate::command::{BackendCapabilities, CommandChannel};
use crate::error::{HestiaError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::model::{DeviceSnapshot, HotwaterState, OperationMode, ZoneState};
use crate::telemetry::SnapshotFetcher;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;

const CLIENT_ID: &str = "myvaillant";
const REDIRECT_URI: &str = "enduservaillant.page.link://login";
const SUBSCRIPTION_KEY: &str = "1e0a2f3511fb4c5bbb1c7f9fedd20b1c";

fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| HestiaError::config(format!("Failed to build HTTP client: {}", e)))
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// Random PKCE code verifier
pub fn pkce_verifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// S256 challenge for a verifier
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Target of the login form on the Keycloak login page
pub fn extract_login_action(html: &str) -> Option<String> {
    let form = html.find("<form")?;
    let rest = &html[form..];
    let start = rest.find("action=\"")? + "action=\"".len();
    let end = rest[start..].find('"')?;
    Some(rest[start..start + end].replace("&amp;", "&"))
}

/// Authorization code from the redirect location
pub fn extract_code(location: &str) -> Option<String> {
    let (_, query) = location.split_once('?')?;
    query
        .split(['&', '#'])
        .find_map(|pair| pair.strip_prefix("code="))
        .filter(|code| !code.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

impl TokenResponse {
    fn into_token(self) -> Token {
        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Utc::now() + Duration::seconds(self.expires_in),
        }
    }
}

/// Keycloak login for the myVAILLANT app client
pub struct MyVaillantIdentity {
    http: reqwest::Client,
    realm_url: String,
    logger: StructuredLogger,
}

impl MyVaillantIdentity {
    pub fn new(identity_base_url: &str, realm: &str, timeout: std::time::Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            realm_url: format!("{}/{}", identity_base_url.trim_end_matches('/'), realm),
            logger: get_logger("myvaillant-auth"),
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<Token> {
        let resp = self
            .http
            .post(format!("{}/protocol/openid-connect/token", self.realm_url))
            .form(form)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HestiaError::auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }
        let token: TokenResponse = resp.json().await?;
        Ok(token.into_token())
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MyVaillantIdentity {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Token> {
        let verifier = pkce_verifier();
        let challenge = pkce_challenge(&verifier);

        let page = self
            .http
            .get(format!("{}/protocol/openid-connect/auth", self.realm_url))
            .query(&[
                ("response_type", "code"),
                ("client_id", CLIENT_ID),
                ("redirect_uri", REDIRECT_URI),
                ("code_challenge_method", "S256"),
                ("code_challenge", challenge.as_str()),
            ])
            .send()
            .await?;
        if !page.status().is_success() {
            return Err(HestiaError::auth(format!(
                "login page returned {}",
                page.status()
            )));
        }
        let html = page.text().await?;
        let action = extract_login_action(&html)
            .ok_or_else(|| HestiaError::auth("login form not found on login page"))?;

        let resp = self
            .http
            .post(&action)
            .form(&[
                ("username", credentials.user.as_str()),
                ("password", credentials.password.as_str()),
                ("credentialId", ""),
            ])
            .send()
            .await?;
        let code = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_code)
            .ok_or_else(|| HestiaError::auth("login failed, check user and password"))?;
        self.logger.debug("Received authorization code");

        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", CLIENT_ID),
            ("code", code.as_str()),
            ("code_verifier", verifier.as_str()),
            ("redirect_uri", REDIRECT_URI),
        ])
        .await
    }

    async fn refresh(&self, token: &Token) -> Result<Token> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| HestiaError::auth("no refresh token"))?;
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", CLIENT_ID),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Home {
    system_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SystemDocument {
    state: SystemState,
    configuration: SystemConfiguration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SystemState {
    zones: Vec<ZoneStatePayload>,
    domestic_hot_water: Vec<HotwaterStatePayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ZoneStatePayload {
    index: u32,
    desired_room_temperature_setpoint: f64,
    current_room_temperature: Option<f64>,
    current_special_function: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HotwaterStatePayload {
    index: u32,
    current_special_function: String,
    current_domestic_hot_water_temperature: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SystemConfiguration {
    zones: Vec<ZoneConfigPayload>,
    domestic_hot_water: Vec<HotwaterConfigPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ZoneConfigPayload {
    index: u32,
    heating: ZoneHeatingPayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ZoneHeatingPayload {
    operation_mode_heating: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HotwaterConfigPayload {
    index: u32,
    operation_mode_domestic_hot_water: String,
    tapping_setpoint: f64,
}

impl SystemDocument {
    /// Normalize into a snapshot; also returns the vendor hot water index
    fn into_snapshot(self) -> Result<(DeviceSnapshot, u32)> {
        let dhw_state = self
            .state
            .domestic_hot_water
            .into_iter()
            .next()
            .ok_or_else(|| HestiaError::upstream("system has no domestic hot water circuit"))?;
        let dhw_config = self
            .configuration
            .domestic_hot_water
            .iter()
            .find(|c| c.index == dhw_state.index);

        let hotwater = HotwaterState {
            operation_mode: OperationMode::from_vendor(
                dhw_config.map_or("", |c| c.operation_mode_domestic_hot_water.as_str()),
            ),
            temperature_setpoint: dhw_config.map_or(0.0, |c| c.tapping_setpoint),
            live_temperature: dhw_state
                .current_domestic_hot_water_temperature
                .unwrap_or_default(),
            observed_quickmode: dhw_state.current_special_function,
        };

        let zones = self
            .state
            .zones
            .into_iter()
            .map(|z| {
                let config = self
                    .configuration
                    .zones
                    .iter()
                    .find(|c| c.index == z.index);
                ZoneState {
                    index: z.index + 1,
                    operation_mode: OperationMode::from_vendor(
                        config.map_or("", |c| c.heating.operation_mode_heating.as_str()),
                    ),
                    desired_setpoint: z.desired_room_temperature_setpoint,
                    observed_quickmode: z.current_special_function,
                    inside_temperature: z.current_room_temperature.unwrap_or_default(),
                }
            })
            .collect();

        Ok((
            DeviceSnapshot {
                hotwater,
                zones,
                captured_at: Utc::now(),
            },
            dhw_state.index,
        ))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SystemIds {
    system_id: String,
    hotwater_index: Option<u32>,
}

/// myVAILLANT REST client
pub struct MyVaillantClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<AuthSession>,
    system: Mutex<Option<SystemIds>>,
    logger: StructuredLogger,
}

impl MyVaillantClient {
    pub fn new(
        base_url: &str,
        session: Arc<AuthSession>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            system: Mutex::new(None),
            logger: get_logger("myvaillant"),
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let token = self.session.bearer().await?;
        let mut request = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("x-app-identifier", "VAILLANT")
            .header("Accept-Language", "en-GB")
            .header("x-client-locale", "en-GB")
            .header("x-idm-identifier", "KEYCLOAK")
            .header("ocp-apim-subscription-key", SUBSCRIPTION_KEY);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(HestiaError::auth(format!("{} returned {}", path, status)));
        }
        Ok(resp)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.send(Method::GET, path, None).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HestiaError::upstream(format!("GET {} returned {}", path, status)));
        }
        Ok(resp.json().await?)
    }

    async fn command(&self, method: Method, path: &str, body: Option<serde_json::Value>) -> Result<()> {
        let resp = self
            .send(method.clone(), path, body)
            .await
            .map_err(|e| match e {
                HestiaError::Auth { .. } => e,
                other => HestiaError::command_failed(other.to_string()),
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HestiaError::command_failed(format!(
                "{} {} returned {}: {}",
                method, path, status, body
            )));
        }
        self.logger.info(&format!("{} {} accepted", method, path));
        Ok(())
    }

    async fn system_id(&self) -> Result<String> {
        if let Some(ids) = self.system.lock().await.as_ref() {
            return Ok(ids.system_id.clone());
        }
        let homes: Vec<Home> = self.get_json("/homes").await?;
        let system_id = homes
            .into_iter()
            .next()
            .map(|h| h.system_id)
            .ok_or_else(|| HestiaError::upstream("account has no homes"))?;
        self.logger.info(&format!("Using system {}", system_id));
        *self.system.lock().await = Some(SystemIds {
            system_id: system_id.clone(),
            hotwater_index: None,
        });
        Ok(system_id)
    }

    async fn hotwater_path(&self) -> Result<String> {
        let cached = self.system.lock().await.clone();
        let ids = match cached {
            Some(ids) if ids.hotwater_index.is_some() => ids,
            _ => {
                self.fetch().await.map_err(|e| HestiaError::command_failed(e.to_string()))?;
                self.system
                    .lock()
                    .await
                    .clone()
                    .ok_or_else(|| HestiaError::command_failed("system not known"))?
            }
        };
        let index = ids
            .hotwater_index
            .ok_or_else(|| HestiaError::command_failed("hot water circuit not known"))?;
        Ok(format!(
            "/systems/{}/tli/domestic-hot-water/{}/boost",
            ids.system_id, index
        ))
    }

    async fn veto_path(&self, zone: u32) -> Result<String> {
        let system_id = self
            .system_id()
            .await
            .map_err(|e| HestiaError::command_failed(e.to_string()))?;
        // API zones are numbered from 0
        Ok(format!(
            "/systems/{}/tli/zones/{}/quick-veto",
            system_id,
            zone.saturating_sub(1)
        ))
    }
}

#[async_trait::async_trait]
impl SnapshotFetcher for MyVaillantClient {
    fn name(&self) -> &'static str {
        "myvaillant"
    }

    async fn fetch(&self) -> Result<DeviceSnapshot> {
        let system_id = self.system_id().await?;
        let document: SystemDocument = self
            .get_json(&format!("/systems/{}/tli", system_id))
            .await?;
        let (snapshot, hotwater_index) = document.into_snapshot()?;
        if let Some(ids) = self.system.lock().await.as_mut() {
            ids.hotwater_index = Some(hotwater_index);
        }
        Ok(snapshot)
    }

    async fn reauthenticate(&self) -> Result<()> {
        self.session.renew().await
    }

    async fn session_expired(&self) -> bool {
        self.session.is_expired()
    }
}

#[async_trait::async_trait]
impl CommandChannel for MyVaillantClient {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            idle_placeholder: false,
            tolerates_overlapping_stop_failure: true,
            restart_cooldown_seconds: 0,
        }
    }

    async fn start_hotwater_boost(&self) -> Result<()> {
        let path = self.hotwater_path().await?;
        self.command(Method::POST, &path, Some(serde_json::json!({})))
            .await
    }

    async fn stop_hotwater_boost(&self) -> Result<()> {
        let path = self.hotwater_path().await?;
        self.command(Method::DELETE, &path, None).await
    }

    async fn start_zone_veto(&self, zone: u32, setpoint: f64, duration: Duration) -> Result<()> {
        let path = self.veto_path(zone).await?;
        let hours = duration.num_minutes() as f64 / 60.0;
        self.command(
            Method::POST,
            &path,
            Some(serde_json::json!({
                "desiredRoomTemperatureSetpoint": setpoint,
                "duration": hours,
            })),
        )
        .await
    }

    async fn stop_zone_veto(&self, zone: u32) -> Result<()> {
        let path = self.veto_path(zone).await?;
        self.command(Method::DELETE, &path, None).await
    }
}
