//! End-to-end gateway flows against a mock backend.

use gateway_client::{
    AuthEvent, Credential, Gateway, GatewayConfig, GatewayError, ManualConnectivity, QueueEvent,
    RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(server: &MockServer, cache_ttl: Duration) -> (Gateway, Arc<ManualConnectivity>) {
    let config = GatewayConfig::builder()
        .base_url(server.uri())
        .retry(RetryPolicy::immediate(3))
        .cache_ttl(cache_ttl)
        .build();
    let monitor = Arc::new(ManualConnectivity::new(true));
    let gateway = Gateway::builder(config)
        .connectivity(monitor.clone())
        .build()
        .expect("gateway");
    (gateway, monitor)
}

#[tokio::test]
async fn cached_get_suppresses_second_dispatch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/current"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, Duration::from_secs(60));

    let first = gateway.get("/users/current").send().await.unwrap();
    let second = gateway.get("/users/current").send().await.unwrap();

    let first = first.into_response().unwrap();
    let second = second.into_response().unwrap();
    assert_eq!(first.bytes(), second.bytes());
    assert_eq!(second.status().as_u16(), 200);
}

#[tokio::test]
async fn expired_cache_entry_dispatches_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, Duration::from_millis(80));

    tokio_test::assert_ok!(gateway.get("/users").send().await);
    tokio::time::sleep(Duration::from_millis(150)).await;
    tokio_test::assert_ok!(gateway.get("/users").send().await);
}

#[tokio::test]
async fn persistent_503_exhausts_retry_bound() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, Duration::from_secs(60));

    let error = gateway.get("/flaky").send().await.unwrap_err();
    assert!(matches!(error, GatewayError::Server { status: 503, .. }));
}

#[tokio::test]
async fn concurrent_auth_failures_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/current"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/current"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"accessToken": "fresh"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, Duration::from_secs(60));
    gateway.store_credential(Credential::with_refresh("stale", "r1"));

    let calls = (0..20).map(|_| gateway.get("/users/current").send());
    let outcomes = futures::future::join_all(calls).await;

    assert_eq!(outcomes.len(), 20);
    for outcome in outcomes {
        let response = outcome.unwrap().into_response().unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }
    assert_eq!(
        gateway.credentials().access_token().as_deref(),
        Some("fresh")
    );
}

#[tokio::test]
async fn offline_mutations_replay_in_fifo_order() {
    let server = MockServer::start().await;
    for id in 1..=3 {
        Mock::given(method("PUT"))
            .and(path(format!("/projects/{id}")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }

    let (gateway, monitor) = gateway_for(&server, Duration::from_secs(60));
    monitor.set_online(false);

    let mut tickets = Vec::new();
    for id in 1..=3 {
        let outcome = gateway
            .put(format!("/projects/{id}"))
            .json(&serde_json::json!({"name": "p"}))
            .send()
            .await
            .unwrap();
        assert!(outcome.is_queued());
        tickets.push(outcome.into_ticket().unwrap());
    }
    assert_eq!(gateway.queue().len(), 3);

    monitor.set_online(true);
    for ticket in tickets {
        let response = ticket.outcome().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }
    assert!(gateway.queue().is_empty());

    let replayed: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.to_string() == "PUT")
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(replayed, vec!["/projects/1", "/projects/2", "/projects/3"]);
}

#[tokio::test]
async fn failed_refresh_clears_credentials_and_forces_logout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/current"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, Duration::from_secs(60));
    let mut events = gateway.subscribe_auth_events();
    gateway.store_credential(Credential::with_refresh("stale", "r1"));

    let error = gateway.get("/users/current").send().await.unwrap_err();
    assert!(error.is_auth());
    assert!(gateway.credentials().credential().is_none());
    assert!(matches!(
        events.recv().await.unwrap(),
        AuthEvent::SessionExpired
    ));

    // With the store empty, the next dispatch carries no Authorization
    // header at all.
    gateway.get("/health").send().await.unwrap();
    let last = server.received_requests().await.unwrap();
    let health = last
        .iter()
        .find(|r| r.url.path() == "/health")
        .expect("health request");
    assert!(health.headers.get("authorization").is_none());
}

#[tokio::test]
async fn terminal_replay_failure_drops_entry_and_notifies() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/projects/9"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, monitor) = gateway_for(&server, Duration::from_secs(60));
    let mut events = gateway.subscribe_queue_events();
    monitor.set_online(false);

    let outcome = gateway
        .put("/projects/9")
        .json(&serde_json::json!({"name": ""}))
        .send()
        .await
        .unwrap();
    let ticket = outcome.into_ticket().unwrap();

    monitor.set_online(true);
    let error = ticket.outcome().await.unwrap_err();
    assert!(matches!(error, GatewayError::Client { status: 400, .. }));
    assert!(matches!(
        events.recv().await.unwrap(),
        QueueEvent::Dropped { .. }
    ));
    assert!(gateway.queue().is_empty());
}

#[tokio::test]
async fn mutation_invalidates_cached_read() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"v": 1})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/projects/42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, Duration::from_secs(60));

    tokio_test::assert_ok!(gateway.get("/projects/42").send().await);
    tokio_test::assert_ok!(
        gateway
            .put("/projects/42")
            .json(&serde_json::json!({"v": 2}))
            .send()
            .await
    );
    // The cached read was invalidated by the mutation, so this dispatches.
    tokio_test::assert_ok!(gateway.get("/projects/42").send().await);
}

#[tokio::test]
async fn login_carries_no_bearer_and_stores_fresh_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"accessToken": "t2", "refreshToken": "r2"}),
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/current"))
        .and(header("authorization", "Bearer t2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 7})))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, Duration::from_secs(60));
    // A lingering credential from an earlier session must not leak into
    // the login request.
    gateway.store_credential(Credential::bearer("old"));

    let response = gateway
        .login(&serde_json::json!({"username": "admin", "password": "pw"}))
        .await
        .unwrap();
    let body: serde_json::Value = response.json().unwrap();
    gateway.store_credential(Credential::with_refresh(
        body["accessToken"].as_str().unwrap(),
        body["refreshToken"].as_str().unwrap(),
    ));

    let login = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.url.path() == "/auth/login")
        .expect("login request");
    assert!(login.headers.get("authorization").is_none());

    let outcome = gateway.get("/users/current").send().await.unwrap();
    assert_eq!(outcome.into_response().unwrap().status().as_u16(), 200);
}

#[tokio::test]
async fn timeout_surfaces_as_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, Duration::from_secs(60));

    let error = gateway
        .get("/slow")
        .timeout(Duration::from_millis(50))
        .no_retry()
        .send()
        .await
        .unwrap_err();
    assert!(matches!(error, GatewayError::Network(_)));
}

#[tokio::test]
async fn client_errors_propagate_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such resource"))
        .expect(1)
        .mount(&server)
        .await;

    let (gateway, _) = gateway_for(&server, Duration::from_secs(60));

    let error = gateway.get("/missing").send().await.unwrap_err();
    match error {
        GatewayError::Client { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "no such resource");
        }
        other => panic!("expected client error, got {other}"),
    }
}
