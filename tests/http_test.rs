//! End-to-end tests for the HTTP service over a real socket.

use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use throttled::error::Result;
use throttled::http::HttpServer;
use throttled::storage::MemoryEventStore;
use throttled::throttle::{ThrottleRule, Throttler};

struct TestServer {
    base: String,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let mut throttler = Throttler::new(Arc::new(MemoryEventStore::new()));
        throttler
            .add_throttle_rule("sign_in_attempt", Some(ThrottleRule::new("ip", 3600, [(1, 5), (2, 10)])))
            .add_throttle_rule(
                "password_reset_request",
                Some(ThrottleRule::new("user_identifier", 3600, [(1, 30)])),
            )
            .add_throttle_rule("verification_request", None);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let server = HttpServer::new(addr, throttler);

        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_listener(listener, async move {
            let _ = rx.await;
        }));

        Self {
            base: format!("http://{}", addr),
            shutdown,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn test_log_then_delay_over_http() {
    let server = TestServer::start().await;
    let client = client();

    let response = client
        .post(server.url("/throttles/sign_in_attempt/delay"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["delay_secs"], 0);
    assert_eq!(body["occurrences"], 0);

    let response = client
        .post(server.url("/throttles/sign_in_attempt/events"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let body: Value = client
        .post(server.url("/throttles/sign_in_attempt/delay"))
        .json(&json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["rule"], "sign_in_attempt");
    assert_eq!(body["occurrences"], 1);
    assert_eq!(body["delay_secs"], 5);

    server.stop().await;
}

#[tokio::test]
async fn test_field_rule_reads_request_body() {
    let server = TestServer::start().await;
    let client = client();

    let response = client
        .post(server.url("/throttles/password_reset_request/events"))
        .json(&json!({ "data": { "user_identifier": "alice" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let alice: Value = client
        .post(server.url("/throttles/password_reset_request/delay"))
        .json(&json!({ "data": { "user_identifier": "alice" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alice["delay_secs"], 30);

    let bob: Value = client
        .post(server.url("/throttles/password_reset_request/delay"))
        .json(&json!({ "data": { "user_identifier": "bob" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bob["delay_secs"], 0);

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_rule_returns_error_code() {
    let server = TestServer::start().await;
    let client = client();

    for path in ["/throttles/missing/delay", "/throttles/missing/events"] {
        let response = client
            .post(server.url(path))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{}", path);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "RULE_NOT_FOUND", "{}", path);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_rules_and_health_routes() {
    let server = TestServer::start().await;
    let client = client();

    let health: Value = client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");

    let rules: Value = client
        .get(server.url("/rules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rules.as_object().unwrap().len(), 3);
    assert!(rules["verification_request"].is_null());

    let rule: Value = client
        .get(server.url("/rules/sign_in_attempt"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rule["method"], "ip");
    assert_eq!(rule["interval"], 3600);

    server.stop().await;
}
