//! HTTP API for the host energy manager
//!
//! Exposes the charger facade under `/api/charger` and the virtual vehicle
//! under `/api/vehicle`. Failures are returned as `{"ok": false, "error": ..}`
//! with a status code matching the error class.

use crate::charger::ChargerAdapter;
use crate::error::{HestiaError, Result};
use crate::vehicle::{HeatpumpVehicle, VehicleClient};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub charger: ChargerAdapter,
    pub vehicle: HeatpumpVehicle,
    pub backend: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct EnableBody {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct StrategyBody {
    pub strategy: String,
}

fn error_response(err: &HestiaError) -> Response {
    let status = match err {
        HestiaError::Validation { .. } => StatusCode::BAD_REQUEST,
        HestiaError::VerificationMismatch { .. } => StatusCode::CONFLICT,
        HestiaError::Auth { .. }
        | HestiaError::Upstream { .. }
        | HestiaError::CommandFailed { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({"ok": false, "error": err.to_string()})),
    )
        .into_response()
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "version": env!("APP_VERSION"),
        "backend": state.backend,
    }))
}

pub async fn charger_enabled(State(state): State<AppState>) -> Response {
    match state.charger.enabled().await {
        Ok(enabled) => Json(serde_json::json!({"enabled": enabled})).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn charger_enable(
    State(state): State<AppState>,
    Json(body): Json<EnableBody>,
) -> Response {
    match state.charger.enable(body.enabled).await {
        Ok(()) => Json(serde_json::json!({"ok": true, "enabled": body.enabled})).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn charger_status(State(state): State<AppState>) -> Response {
    match state.charger.status().await {
        Ok(status) => Json(serde_json::json!({
            "status": status.letter(),
            "description": status.description(),
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn charger_power(State(state): State<AppState>) -> Response {
    match state.charger.current_power().await {
        Ok(power) => Json(serde_json::json!({"power_w": power})).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn charger_phases(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({"phases": state.charger.phases()}))
}

pub async fn charger_mode(State(state): State<AppState>) -> impl IntoResponse {
    let reconciler = state.charger.reconciler();
    Json(serde_json::json!({
        "text": state.charger.mode_text().await,
        "state": reconciler.state().await,
        "capabilities": reconciler.capabilities(),
        "snapshot": reconciler.telemetry().peek().await,
    }))
}

pub async fn vehicle_soc(State(state): State<AppState>) -> Response {
    match state.vehicle.soc().await {
        Ok(soc) => Json(serde_json::json!({"soc": soc})).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn vehicle_target(State(state): State<AppState>) -> Response {
    match state.vehicle.target_temp().await {
        Ok(target) => Json(serde_json::json!({"target": target})).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn vehicle_status(State(state): State<AppState>) -> Response {
    match state.vehicle.fetch_status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn vehicle_strategy(
    State(state): State<AppState>,
    Json(body): Json<StrategyBody>,
) -> Response {
    match state.vehicle.check_pv_use_strategy(&body.strategy).await {
        Ok(()) => Json(serde_json::json!({"ok": true, "strategy": body.strategy.trim()}))
            .into_response(),
        Err(e) => error_response(&e),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/charger/enabled", get(charger_enabled))
        .route("/api/charger/enable", post(charger_enable))
        .route("/api/charger/status", get(charger_status))
        .route("/api/charger/power", get(charger_power))
        .route("/api/charger/phases", get(charger_phases))
        .route("/api/charger/mode", get(charger_mode))
        .route("/api/vehicle/soc", get(vehicle_soc))
        .route("/api/vehicle/target", get(vehicle_target))
        .route("/api/vehicle/status", get(vehicle_status))
        .route("/api/vehicle/strategy", post(vehicle_strategy))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn serve<F>(state: AppState, host: &str, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);
    let logger = crate::logging::get_logger("web");

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!(
                "Invalid host '{}'; falling back to 127.0.0.1",
                host
            ));
            ([127, 0, 0, 1], port).into()
        }
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| HestiaError::web(format!("cannot bind {}: {}", addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| HestiaError::web(e.to_string()))?;
    logger.info(&format!(
        "Web server listening at http://{}:{}",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| HestiaError::web(e.to_string()))?;
    Ok(())
}
