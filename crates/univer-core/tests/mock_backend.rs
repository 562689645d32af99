//! Authenticated request tests against a mock backend.
//!
//! These tests use wiremock to simulate the portal backend and check how the
//! client reacts to each kind of rejection without network access.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use univer_core::{
    ApiClient, ApiError, Config, CredentialKey, CredentialStore, Credentials, Language,
    MemoryCredentialStore,
};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn alice() -> Credentials {
    Credentials::new("alice", "kstu", "secret123")
}

fn test_config(server: &MockServer) -> Config {
    Config::new(&server.uri())
        .unwrap()
        .with_login_timing(Duration::from_millis(20), Duration::from_millis(100))
}

fn client_with(server: &MockServer, store: &Arc<MemoryCredentialStore>) -> ApiClient {
    ApiClient::new(test_config(server), store.clone()).unwrap()
}

fn logged_in_store() -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_credentials(&alice()).unwrap())
}

fn unauthorized(kind: &str) -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_json(json!({ "error": kind, "message": "..." }))
}

async fn mount_logout(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

// ============================================================================
// Success and plain failures
// ============================================================================

#[tokio::test]
async fn test_auth_fetch_success_sends_language() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .and(query_param("lang", "ru"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"subject": "Math"}])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());
    let schedule = client.fetch_schedule().await.unwrap();

    assert_eq!(schedule, json!([{"subject": "Math"}]));
}

#[tokio::test]
async fn test_auth_fetch_uses_configured_language() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/exams"))
        .and(query_param("lang", "kk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server).with_language(Language::Kk);
    let client = ApiClient::new(config, logged_in_store()).unwrap();

    assert_eq!(client.fetch_exams().await.unwrap(), json!([]));
}

#[tokio::test]
async fn test_base_url_path_prefix_is_kept() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/univer/api/schedule"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"week": 1})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/univer/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config::new(&format!("{}/univer", server.uri()))
        .unwrap()
        .with_login_timing(Duration::from_millis(20), Duration::from_millis(100));
    let client = ApiClient::new(config, Arc::new(MemoryCredentialStore::new())).unwrap();

    assert_eq!(client.login(alice()).await, 200);
    assert_eq!(client.fetch_schedule().await.unwrap(), json!({"week": 1}));
}

#[tokio::test]
async fn test_auth_fetch_deserializes_typed() {
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Folder {
        id: String,
        name: String,
    }

    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/umkd"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": "17", "name": "Physics"}])),
        )
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());
    let folders: Vec<Folder> = client.auth_fetch("/api/umkd").await.unwrap();

    assert_eq!(
        folders,
        vec![Folder {
            id: "17".to_string(),
            name: "Physics".to_string()
        }]
    );

    let wrong: Result<Vec<u32>, ApiError> = client.auth_fetch("/api/umkd").await;
    assert!(matches!(wrong, Err(ApiError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_forbidden_is_unauthorized_without_login() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/transcript"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = logged_in_store();
    let client = client_with(&server, &store);
    let result = client.fetch_transcript().await;

    assert!(matches!(result, Err(ApiError::Unauthorized)));
    // Forbidden is not a session problem; credentials stay
    assert_eq!(store.credentials().unwrap(), Some(alice()));
}

#[tokio::test]
async fn test_other_status_is_http_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/attestation"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());
    let err = client.fetch_attestation().await.unwrap_err();

    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn test_unreachable_backend_reports_404() {
    let server = MockServer::start().await;
    let config = test_config(&server);
    drop(server);

    let client = ApiClient::new(config, logged_in_store()).unwrap();
    let err = client.fetch_schedule().await.unwrap_err();

    assert!(matches!(err, ApiError::Http(404)));
}

// ============================================================================
// 401 handling
// ============================================================================

#[tokio::test]
async fn test_session_refreshed_retries_without_login() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(unauthorized("session_refreshed"))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"week": 5})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());

    assert_eq!(client.fetch_schedule().await.unwrap(), json!({"week": 5}));
}

#[tokio::test]
async fn test_session_refreshed_forever_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(unauthorized("session_refreshed"))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());
    let err = client.fetch_schedule().await.unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(err, ApiError::Http(408)));
}

#[tokio::test]
async fn test_credentials_changed_forces_logout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(unauthorized("credentials_changed"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = logged_in_store();
    let client = client_with(&server, &store);
    let result = client.fetch_schedule().await;

    assert!(matches!(result, Err(ApiError::Unauthorized)));
    for key in CredentialKey::ALL {
        assert_eq!(store.get(key).unwrap(), None);
    }
}

#[tokio::test]
async fn test_expired_session_relogs_and_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(unauthorized("session_expired"))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["lesson"])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({
            "username": "alice",
            "orgId": "kstu",
            "password": "secret123"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in_store();
    let client = client_with(&server, &store);

    assert_eq!(client.fetch_schedule().await.unwrap(), json!(["lesson"]));
    assert_eq!(store.credentials().unwrap(), Some(alice()));
}

#[tokio::test]
async fn test_plain_401_without_body_relogs() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/exams"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/exams"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());

    assert_eq!(client.fetch_exams().await.unwrap(), json!([]));
}

#[tokio::test]
async fn test_rejected_relogin_forces_logout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(unauthorized("unauthorized"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(unauthorized("Invalid password"))
        .expect(1)
        .mount(&server)
        .await;
    mount_logout(&server).await;

    let store = logged_in_store();
    let client = client_with(&server, &store);
    let result = client.fetch_schedule().await;

    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert_eq!(store.credentials().unwrap(), None);
    assert_eq!(store.get(CredentialKey::Username).unwrap(), None);
    assert!(!client.check_auth());
}

#[tokio::test]
async fn test_401_without_stored_credentials_is_unauthorized() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    mount_logout(&server).await;

    let store = Arc::new(MemoryCredentialStore::new());
    store.set(CredentialKey::Username, "alice").unwrap();
    let client = client_with(&server, &store);

    assert!(matches!(
        client.fetch_schedule().await,
        Err(ApiError::Unauthorized)
    ));
    assert_eq!(store.get(CredentialKey::Username).unwrap(), None);
}

#[tokio::test]
async fn test_repeated_expiry_exhausts_budget() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());
    let err = client.fetch_schedule().await.unwrap_err();

    assert!(matches!(err, ApiError::Http(408)));
}

// ============================================================================
// Deduplication through the client
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetches_share_one_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"week": 1}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());
    let calls = (0..5).map(|_| {
        let client = client.clone();
        tokio::spawn(async move { client.fetch_schedule().await.unwrap() })
    });
    let results = futures::future::join_all(calls).await;

    for result in results {
        assert_eq!(result.unwrap(), json!({"week": 1}));
    }
}

#[tokio::test]
async fn test_sequential_fetches_hit_network_each_time() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"week": 1})))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());
    client.fetch_schedule().await.unwrap();
    client.fetch_schedule().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_expired_requests_share_one_login() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/exams"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/schedule"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!("schedule")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/exams"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!("exams")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());
    let (schedule, exams) = tokio::join!(client.fetch_schedule(), client.fetch_exams());

    assert_eq!(schedule.unwrap(), json!("schedule"));
    assert_eq!(exams.unwrap(), json!("exams"));
}

// ============================================================================
// POST and raw bodies
// ============================================================================

#[tokio::test]
async fn test_auth_post_sends_json_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/push/subscribe"))
        .and(query_param("lang", "ru"))
        .and(body_json(json!({"endpoint": "https://push.example/abc"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());
    let reply: serde_json::Value = client
        .auth_post(
            "/api/push/subscribe",
            &json!({"endpoint": "https://push.example/abc"}),
        )
        .await
        .unwrap();

    assert_eq!(reply, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_auth_fetch_bytes_returns_raw_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/download/42"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x25, 0x50, 0x44, 0x46]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(&server, &logged_in_store());
    let body = client.auth_fetch_bytes("/api/download/42").await.unwrap();

    assert_eq!(body, b"%PDF".to_vec());
}

#[tokio::test]
async fn test_version_needs_no_session() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!("1.01")))
        .mount(&server)
        .await;

    let client = client_with(&server, &Arc::new(MemoryCredentialStore::new()));

    assert_eq!(client.fetch_version().await.unwrap(), "1.01");
}

// ============================================================================
// Session operations
// ============================================================================

#[tokio::test]
async fn test_login_persists_credentials_for_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(2)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let client = client_with(&server, &store);

    assert!(!client.check_auth());
    assert_eq!(client.login(alice()).await, 200);
    assert!(client.check_auth());
    assert_eq!(store.credentials().unwrap(), Some(alice()));

    // Let the grace window pass so the refresh issues its own login
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.refresh_token().await, 200);
}

#[tokio::test]
async fn test_refresh_without_credentials_is_401() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_with(&server, &Arc::new(MemoryCredentialStore::new()));

    assert_eq!(client.refresh_token().await, 401);
}

#[tokio::test]
async fn test_logout_keeps_identity() {
    let server = MockServer::start().await;
    mount_logout(&server).await;

    let store = logged_in_store();
    let client = client_with(&server, &store);
    client.logout().await;

    assert!(!client.check_auth());
    assert_eq!(store.get(CredentialKey::Username).unwrap().as_deref(), Some("alice"));
    assert_eq!(store.get(CredentialKey::OrgId).unwrap().as_deref(), Some("kstu"));
}

#[tokio::test]
async fn test_force_logout_clears_everything_even_offline() {
    let server = MockServer::start().await;
    let config = test_config(&server);
    drop(server);

    let store = logged_in_store();
    let client = ApiClient::new(config, store.clone()).unwrap();
    client.force_logout().await;

    for key in CredentialKey::ALL {
        assert_eq!(store.get(key).unwrap(), None);
    }
}
