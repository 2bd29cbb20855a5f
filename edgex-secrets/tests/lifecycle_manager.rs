//! Lifecycle manager tests against a mock secret store.
//!
//! The secret store and the setup service are both served by one mockito
//! server; token files live in a temporary directory.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use edgex_bus::BusCredentials;
use edgex_secrets::{LifecyclePhase, SecretStoreConfig, TokenLifecycleManager, TOKEN_HEADER};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const SERVICE: &str = "edgex-node";
const LOOKUP: &str = "/v1/auth/token/lookup-self";
const RENEW: &str = "/v1/auth/token/renew-self";
const IDENTITY: &str = "/v1/identity/oidc/token/edgex-node";
const BUS_SECRET: &str = "/v1/secret/edgex/edgex-node/message-bus";

fn jwt_expiring_in(seconds: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + seconds;
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"ES384"}"#),
        URL_SAFE_NO_PAD.encode(json!({"sub": SERVICE, "exp": exp}).to_string())
    )
}

fn write_token_file(dir: &Path, lease_duration: u64) -> std::path::PathBuf {
    let path = dir.join("secrets-token.json");
    let record = json!({
        "auth": {
            "client_token": "s.session",
            "entity_id": "ent-1",
            "lease_duration": lease_duration
        }
    });
    std::fs::write(&path, record.to_string()).unwrap();
    path
}

fn config_for(server: &ServerGuard, token_file: &Path) -> SecretStoreConfig {
    SecretStoreConfig::default()
        .with_enabled(true)
        .with_service_key(SERVICE)
        .with_token_file(token_file)
        .with_secret_store_url(server.url())
        .with_setup_url(server.url())
        .with_retry_limit(3)
        .with_retry_delay(Duration::from_millis(10))
}

async fn mock_identity(server: &mut ServerGuard, jwt: &str, hits: usize) -> mockito::Mock {
    server
        .mock("GET", IDENTITY)
        .match_header(TOKEN_HEADER, "s.session")
        .with_status(200)
        .with_body(json!({"data": {"token": jwt}}).to_string())
        .expect(hits)
        .create_async()
        .await
}

struct Fixture {
    server: ServerGuard,
    _dir: TempDir,
    config: SecretStoreConfig,
}

async fn fixture(lease_duration: u64) -> Fixture {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let token_file = write_token_file(dir.path(), lease_duration);
    let config = config_for(&server, &token_file);
    Fixture {
        server,
        _dir: dir,
        config,
    }
}

#[tokio::test]
async fn test_bootstrap_reaches_steady() {
    let mut fx = fixture(3600).await;
    let jwt = jwt_expiring_in(3600);

    let lookup = fx
        .server
        .mock("GET", LOOKUP)
        .match_header(TOKEN_HEADER, "s.session")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let identity = mock_identity(&mut fx.server, &jwt, 1).await;

    let manager = TokenLifecycleManager::new(fx.config.clone()).unwrap();
    manager.bootstrap().await.unwrap();

    assert_eq!(manager.phase(), LifecyclePhase::Steady);
    assert_eq!(manager.session_token().as_deref(), Some("s.session"));
    assert_eq!(manager.get_identity_token().await, jwt);
    assert!(manager.renewals_active());

    manager.shutdown().await;
    assert!(!manager.renewals_active());

    lookup.assert_async().await;
    identity.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_callers_share_one_bootstrap() {
    let mut fx = fixture(3600).await;
    let jwt = jwt_expiring_in(3600);

    let lookup = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let _identity = mock_identity(&mut fx.server, &jwt, 1).await;

    let manager = TokenLifecycleManager::new(fx.config.clone()).unwrap();
    let (a, b, c) = tokio::join!(
        manager.get_identity_token(),
        manager.get_identity_token(),
        manager.get_identity_token()
    );

    assert_eq!(a, jwt);
    assert_eq!(b, jwt);
    assert_eq!(c, jwt);
    lookup.assert_async().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_forbidden_lookup_regenerates_token() {
    let mut fx = fixture(3600).await;
    let jwt = jwt_expiring_in(3600);

    // First lookup is rejected, the one after regeneration succeeds.
    let rejected = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(403)
        .expect(1)
        .create_async()
        .await;
    let accepted = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let regenerate = fx
        .server
        .mock("PUT", "/api/v3/token/entityId/ent-1")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let _identity = mock_identity(&mut fx.server, &jwt, 1).await;

    let manager = TokenLifecycleManager::new(fx.config.clone()).unwrap();
    manager.bootstrap().await.unwrap();

    assert_eq!(manager.phase(), LifecyclePhase::Steady);
    rejected.assert_async().await;
    regenerate.assert_async().await;
    accepted.assert_async().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_transient_lookup_failure_is_retried() {
    let mut fx = fixture(3600).await;
    let jwt = jwt_expiring_in(3600);

    let _mock1 = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let accepted = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let _identity = mock_identity(&mut fx.server, &jwt, 1).await;

    let manager = TokenLifecycleManager::new(fx.config.clone()).unwrap();
    manager.bootstrap().await.unwrap();

    assert_eq!(manager.phase(), LifecyclePhase::Steady);
    accepted.assert_async().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_identity_failure_degrades() {
    let mut fx = fixture(3600).await;

    let _mock2 = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let _mock3 = fx
        .server
        .mock("GET", IDENTITY)
        .with_status(500)
        .create_async()
        .await;

    let manager = TokenLifecycleManager::new(fx.config.clone()).unwrap();
    assert!(manager.bootstrap().await.is_err());
    assert_eq!(manager.phase(), LifecyclePhase::Degraded);
    assert!(!manager.renewals_active());

    // One re-bootstrap per call, still failing.
    assert_eq!(manager.get_identity_token().await, "");
    assert_eq!(manager.phase(), LifecyclePhase::Degraded);
}

#[tokio::test]
async fn test_message_bus_credentials() {
    let mut fx = fixture(3600).await;
    let jwt = jwt_expiring_in(3600);

    let _mock4 = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let _identity = mock_identity(&mut fx.server, &jwt, 1).await;
    let _mock5 = fx
        .server
        .mock("GET", BUS_SECRET)
        .match_header(TOKEN_HEADER, "s.session")
        .with_status(200)
        .with_body(
            json!({"data": {"username": "mqtt-user", "password": "mqtt-pass", "port": 1883}})
                .to_string(),
        )
        .create_async()
        .await;

    let manager = TokenLifecycleManager::start(fx.config.clone()).unwrap();
    let creds = manager.get_message_bus_credentials().await;

    assert_eq!(creds, BusCredentials::new("mqtt-user", "mqtt-pass"));
    manager.shutdown().await;
}

#[tokio::test]
async fn test_credential_failure_rebootstraps_once() {
    let mut fx = fixture(3600).await;
    let jwt = jwt_expiring_in(3600);

    let lookup = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;
    let _identity = mock_identity(&mut fx.server, &jwt, 2).await;
    let _mock6 = fx
        .server
        .mock("GET", BUS_SECRET)
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let _mock7 = fx
        .server
        .mock("GET", BUS_SECRET)
        .with_status(200)
        .with_body(json!({"data": {"username": "u", "password": "p"}}).to_string())
        .expect(1)
        .create_async()
        .await;

    let manager = TokenLifecycleManager::new(fx.config.clone()).unwrap();
    manager.bootstrap().await.unwrap();

    let creds = manager.get_message_bus_credentials().await;
    assert_eq!(creds, BusCredentials::new("u", "p"));
    lookup.assert_async().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_credentials_give_up_after_retry() {
    let mut fx = fixture(3600).await;
    let jwt = jwt_expiring_in(3600);

    let _mock8 = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let _identity = mock_identity(&mut fx.server, &jwt, 2).await;
    let secret = fx
        .server
        .mock("GET", BUS_SECRET)
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let manager = TokenLifecycleManager::new(fx.config.clone()).unwrap();
    manager.bootstrap().await.unwrap();

    assert_eq!(manager.get_message_bus_credentials().await, BusCredentials::empty());
    secret.assert_async().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_session_renewal_runs_on_schedule() {
    // A 2 second lease renews every second.
    let mut fx = fixture(2).await;
    let jwt = jwt_expiring_in(3600);

    let _mock9 = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let _identity = mock_identity(&mut fx.server, &jwt, 1).await;
    let renew = fx
        .server
        .mock("POST", RENEW)
        .match_header(TOKEN_HEADER, "s.session")
        .match_body(Matcher::Json(json!({"increment": "1h"})))
        .with_status(200)
        .with_body(
            json!({"auth": {"client_token": "s.session", "lease_duration": 2}}).to_string(),
        )
        .expect_at_least(1)
        .create_async()
        .await;

    let manager = TokenLifecycleManager::new(fx.config.clone()).unwrap();
    manager.bootstrap().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1600)).await;
    manager.shutdown().await;

    renew.assert_async().await;
    assert_eq!(manager.session_token().as_deref(), Some("s.session"));
}

#[tokio::test]
async fn test_failed_session_renewal_keeps_schedule() {
    let mut fx = fixture(2).await;
    let jwt = jwt_expiring_in(3600);

    let _lookup = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let _identity = mock_identity(&mut fx.server, &jwt, 1).await;
    let rejected = fx
        .server
        .mock("POST", RENEW)
        .with_status(500)
        .expect(1)
        .create_async()
        .await;
    let renewed = fx
        .server
        .mock("POST", RENEW)
        .with_status(200)
        .with_body(
            json!({"auth": {"client_token": "s.renewed", "lease_duration": 2}}).to_string(),
        )
        .expect_at_least(1)
        .create_async()
        .await;

    let manager = TokenLifecycleManager::new(fx.config.clone()).unwrap();
    manager.bootstrap().await.unwrap();

    tokio::time::sleep(Duration::from_millis(2600)).await;
    manager.shutdown().await;

    rejected.assert_async().await;
    renewed.assert_async().await;
    assert_eq!(manager.phase(), LifecyclePhase::Steady);
    assert_eq!(manager.session_token().as_deref(), Some("s.renewed"));
}

#[tokio::test]
async fn test_identity_renewal_runs_before_expiry() {
    let mut fx = fixture(3600).await;
    // Renewal is due 60 seconds before expiry, so within two seconds here.
    let expiring = jwt_expiring_in(62);
    let fresh = jwt_expiring_in(3600);

    let _lookup = fx
        .server
        .mock("GET", LOOKUP)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let first = mock_identity(&mut fx.server, &expiring, 1).await;
    let second = mock_identity(&mut fx.server, &fresh, 1).await;

    let manager = TokenLifecycleManager::new(fx.config.clone()).unwrap();
    manager.bootstrap().await.unwrap();
    assert_eq!(manager.get_identity_token().await, expiring);

    tokio::time::sleep(Duration::from_millis(2600)).await;

    assert_eq!(manager.get_identity_token().await, fresh);
    manager.shutdown().await;

    first.assert_async().await;
    second.assert_async().await;
}
