#![cfg(feature = "cloud")]

use chrono::{Duration, Utc};
use hestia::auth::{AuthSession, Credentials, IdentityProvider, Token};
use hestia::backend::myvaillant::{MyVaillantClient, MyVaillantIdentity};
use hestia::clock::SystemClock;
use hestia::command::CommandChannel;
use hestia::error::{HestiaError, Result};
use hestia::telemetry::SnapshotFetcher;
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;

struct StaticProvider;

#[async_trait::async_trait]
impl IdentityProvider for StaticProvider {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<Token> {
        Ok(Token {
            access_token: "test_token".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    async fn refresh(&self, _token: &Token) -> Result<Token> {
        Err(HestiaError::auth("no refresh"))
    }
}

fn credentials() -> Credentials {
    Credentials {
        user: "user@example.com".to_string(),
        password: "secret".to_string(),
    }
}

fn client(server: &Server) -> MyVaillantClient {
    let session = AuthSession::new(
        Arc::new(StaticProvider),
        credentials(),
        Arc::new(SystemClock),
        Duration::minutes(3),
    );
    MyVaillantClient::new(&server.url(), Arc::new(session), std::time::Duration::from_secs(5))
        .unwrap()
}

fn system_document() -> serde_json::Value {
    json!({
        "state": {
            "zones": [{
                "index": 0,
                "desiredRoomTemperatureSetpoint": 21.0,
                "currentRoomTemperature": 20.4,
                "currentSpecialFunction": "NONE"
            }],
            "domesticHotWater": [{
                "index": 255,
                "currentSpecialFunction": "REGULAR",
                "currentDomesticHotWaterTemperature": 41.5
            }]
        },
        "configuration": {
            "zones": [{"index": 0, "heating": {"operationModeHeating": "TIME_CONTROLLED"}}],
            "domesticHotWater": [{
                "index": 255,
                "operationModeDomesticHotWater": "TIME_CONTROLLED",
                "tappingSetpoint": 50.0
            }]
        }
    })
}

async fn mock_system(server: &mut Server) -> (mockito::Mock, mockito::Mock) {
    let homes = server
        .mock("GET", "/homes")
        .match_header("authorization", "Bearer test_token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([{"systemId": "sys-1"}]).to_string())
        .create_async()
        .await;
    let tli = server
        .mock("GET", "/systems/sys-1/tli")
        .match_header("authorization", "Bearer test_token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(system_document().to_string())
        .create_async()
        .await;
    (homes, tli)
}

#[tokio::test]
async fn fetch_normalizes_system_document() {
    let mut server = Server::new_async().await;
    let (homes, tli) = mock_system(&mut server).await;

    let client = client(&server);
    let snapshot = client.fetch().await.unwrap();

    assert!(snapshot.hotwater.operation_mode.is_scheduled());
    assert_eq!(snapshot.hotwater.live_temperature, 41.5);
    assert_eq!(snapshot.hotwater.temperature_setpoint, 50.0);
    assert!(!snapshot.hotwater.boost_active());
    let zone = snapshot.zone(1).unwrap();
    assert_eq!(zone.desired_setpoint, 21.0);
    assert!(!zone.veto_active());

    homes.assert_async().await;
    tli.assert_async().await;
}

#[tokio::test]
async fn system_id_is_looked_up_once() {
    let mut server = Server::new_async().await;
    let homes = server
        .mock("GET", "/homes")
        .with_status(200)
        .with_body(json!([{"systemId": "sys-1"}]).to_string())
        .expect(1)
        .create_async()
        .await;
    let tli = server
        .mock("GET", "/systems/sys-1/tli")
        .with_status(200)
        .with_body(system_document().to_string())
        .expect(2)
        .create_async()
        .await;

    let client = client(&server);
    client.fetch().await.unwrap();
    client.fetch().await.unwrap();

    homes.assert_async().await;
    tli.assert_async().await;
}

#[tokio::test]
async fn rejected_token_is_an_auth_error() {
    let mut server = Server::new_async().await;
    let _homes = server
        .mock("GET", "/homes")
        .with_status(401)
        .create_async()
        .await;

    let err = client(&server).fetch().await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn server_error_is_transient() {
    let mut server = Server::new_async().await;
    let _homes = server
        .mock("GET", "/homes")
        .with_status(503)
        .create_async()
        .await;

    let err = client(&server).fetch().await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn hotwater_boost_uses_discovered_circuit() {
    let mut server = Server::new_async().await;
    let _system = mock_system(&mut server).await;
    let start = server
        .mock("POST", "/systems/sys-1/tli/domestic-hot-water/255/boost")
        .match_header("authorization", "Bearer test_token")
        .match_header("x-app-identifier", "VAILLANT")
        .with_status(200)
        .create_async()
        .await;
    let stop = server
        .mock("DELETE", "/systems/sys-1/tli/domestic-hot-water/255/boost")
        .with_status(200)
        .create_async()
        .await;

    // No fetch beforehand: the client discovers the circuit itself
    let client = client(&server);
    client.start_hotwater_boost().await.unwrap();
    client.stop_hotwater_boost().await.unwrap();

    start.assert_async().await;
    stop.assert_async().await;
}

#[tokio::test]
async fn quick_veto_posts_setpoint_and_duration() {
    let mut server = Server::new_async().await;
    let _system = mock_system(&mut server).await;
    let start = server
        .mock("POST", "/systems/sys-1/tli/zones/0/quick-veto")
        .match_body(Matcher::Json(json!({
            "desiredRoomTemperatureSetpoint": 23.0,
            "duration": 0.5
        })))
        .with_status(200)
        .create_async()
        .await;

    let client = client(&server);
    client
        .start_zone_veto(1, 23.0, Duration::minutes(30))
        .await
        .unwrap();
    start.assert_async().await;
}

#[tokio::test]
async fn rejected_command_is_a_command_failure() {
    let mut server = Server::new_async().await;
    let _system = mock_system(&mut server).await;
    let _stop = server
        .mock("DELETE", "/systems/sys-1/tli/zones/0/quick-veto")
        .with_status(409)
        .with_body("no quick veto active")
        .create_async()
        .await;

    let err = client(&server).stop_zone_veto(1).await.unwrap_err();
    assert!(matches!(err, HestiaError::CommandFailed { .. }));
    assert!(err.to_string().contains("409"));
}

#[tokio::test]
async fn identity_login_follows_form_and_exchanges_code() {
    let mut server = Server::new_async().await;
    let action = format!("{}/realm/login-actions/authenticate?session_code=abc", server.url());

    let page = server
        .mock("GET", "/realm/protocol/openid-connect/auth")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("client_id".into(), "myvaillant".into()),
            Matcher::UrlEncoded("code_challenge_method".into(), "S256".into()),
        ]))
        .with_status(200)
        .with_body(format!(
            r#"<html><form id="kc-form-login" action="{}" method="post"></form></html>"#,
            action
        ))
        .create_async()
        .await;
    let login = server
        .mock("POST", "/realm/login-actions/authenticate")
        .match_query(Matcher::Any)
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("username".into(), "user@example.com".into()),
            Matcher::UrlEncoded("password".into(), "secret".into()),
        ]))
        .with_status(302)
        .with_header(
            "location",
            "enduservaillant.page.link://login?state=s&code=the-code",
        )
        .create_async()
        .await;
    let token = server
        .mock("POST", "/realm/protocol/openid-connect/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "the-code".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"access_token": "access-1", "refresh_token": "refresh-1", "expires_in": 300})
                .to_string(),
        )
        .create_async()
        .await;

    let identity =
        MyVaillantIdentity::new(&server.url(), "realm", std::time::Duration::from_secs(5))
            .unwrap();
    let issued = identity.authenticate(&credentials()).await.unwrap();

    assert_eq!(issued.access_token, "access-1");
    assert_eq!(issued.refresh_token.as_deref(), Some("refresh-1"));
    assert!(!issued.is_expired(Utc::now()));
    page.assert_async().await;
    login.assert_async().await;
    token.assert_async().await;
}

#[tokio::test]
async fn wrong_password_is_an_auth_error() {
    let mut server = Server::new_async().await;
    let action = format!("{}/realm/login-actions/authenticate", server.url());
    let _page = server
        .mock("GET", "/realm/protocol/openid-connect/auth")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(format!(r#"<form action="{}"></form>"#, action))
        .create_async()
        .await;
    // Keycloak re-renders the login page instead of redirecting
    let _login = server
        .mock("POST", "/realm/login-actions/authenticate")
        .with_status(200)
        .with_body("<html>Invalid username or password.</html>")
        .create_async()
        .await;

    let identity =
        MyVaillantIdentity::new(&server.url(), "realm", std::time::Duration::from_secs(5))
            .unwrap();
    let err = identity.authenticate(&credentials()).await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn refresh_uses_refresh_grant() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/realm/protocol/openid-connect/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
        ]))
        .with_status(200)
        .with_body(json!({"access_token": "access-2", "expires_in": 300}).to_string())
        .create_async()
        .await;

    let identity =
        MyVaillantIdentity::new(&server.url(), "realm", std::time::Duration::from_secs(5))
            .unwrap();
    let current = Token {
        access_token: "access-1".to_string(),
        refresh_token: Some("refresh-1".to_string()),
        expires_at: Utc::now(),
    };
    let refreshed = identity.refresh(&current).await.unwrap();

    assert_eq!(refreshed.access_token, "access-2");
    mock.assert_async().await;
}

#[test]
fn cloud_capabilities() {
    let server_url = "http://127.0.0.1:9";
    let session = AuthSession::new(
        Arc::new(StaticProvider),
        credentials(),
        Arc::new(SystemClock),
        Duration::minutes(3),
    );
    let client =
        MyVaillantClient::new(server_url, Arc::new(session), std::time::Duration::from_secs(1))
            .unwrap();
    let caps = client.capabilities();
    assert!(!caps.idle_placeholder);
    assert!(caps.tolerates_overlapping_stop_failure);
    assert_eq!(caps.restart_cooldown_seconds, 0);
}
