use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use crossbeam_channel::Receiver;
use proxy_auth::Algorithm;
use proxy_config::Config;
use proxy_server::{HttpServer, Pipeline, ServerError, ServiceState, make_app};
use proxy_stats::{RegistryGuard, StatsRegistry};
use proxy_statsd::StatsdSink;
use serde_json::{Value, json};
use similar_asserts::assert_eq;
use tower::ServiceExt;

struct TestServer {
    app: Router,
    state: ServiceState,
    registry: Arc<StatsRegistry>,
    lines: Receiver<Vec<u8>>,
    _guard: RegistryGuard,
}

impl TestServer {
    fn new(config: Value) -> Self {
        let registry = Arc::new(StatsRegistry::new());
        let guard = proxy_stats::enter(registry.clone());

        let config = Config::from_json_value(config).unwrap();
        let (lines, sink) = StatsdSink::capturing();
        let pipeline = Pipeline::from_config(&config, Arc::new(sink)).unwrap();

        let state = ServiceState::new(Arc::new(config), Arc::new(pipeline));
        let app = make_app(state.clone());

        Self {
            app,
            state,
            registry,
            lines,
            _guard: guard,
        }
    }

    async fn request(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn post_json(&self, uri: &str, body: Value) -> Response {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        self.request(request).await
    }

    /// Stops the pipeline and returns all lines sent to StatsD, sorted.
    fn shutdown(&self) -> Vec<String> {
        self.state.pipeline().shutdown();

        let mut lines: Vec<_> = self
            .lines
            .try_iter()
            .map(|line| String::from_utf8(line).unwrap())
            .collect();
        lines.sort();
        lines
    }

    fn counter(&self, name: &str) -> u64 {
        self.registry.counter_value(name, &[])
    }
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

#[tokio::test]
async fn test_heartbeat() {
    let server = TestServer::new(json!({}));

    let response = server
        .request(Request::get("/heartbeat").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK");
}

#[tokio::test]
async fn test_submit_count() {
    let server = TestServer::new(json!({"processing": {"metric_prefix": "app"}}));

    let response = server
        .post_json(
            "/count",
            json!({"metric": "request.count", "value": 5, "tags": "host=web1,env=prod"}),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "");

    assert_eq!(
        server.shutdown(),
        ["app_request.count,host=web1,env=prod:5|c"]
    );
    assert_eq!(server.counter("counters_added_total"), 1);
}

#[tokio::test]
async fn test_route_kind_wins_over_body() {
    let server = TestServer::new(json!({}));

    let response = server
        .post_json(
            "/count",
            json!({"metric": "x", "value": 1, "metric_type": "counter"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .post_json(
            "/timing/y",
            json!({"value": 30, "metric_type": "gauge"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(server.shutdown(), ["x:1|c", "y:30|ms"]);
}

#[tokio::test]
async fn test_submit_named() {
    let server = TestServer::new(json!({}));

    let response = server
        .post_json(
            "/gauge/queue_depth",
            json!({"metric": "ignored", "value": 12}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .post_json(
            "/timing/db.query",
            json!({"value": 250, "sampleRate": 0.5, "tags": "table=users"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        server.shutdown(),
        ["db.query,table=users:250|ms|@0.5", "queue_depth:12|g"]
    );
    assert_eq!(server.counter("gauges_added_total"), 1);
    assert_eq!(server.counter("timing_added_total"), 1);
}

#[tokio::test]
async fn test_unknown_kind() {
    let server = TestServer::new(json!({}));

    let response = server
        .post_json("/meter", json!({"metric": "requests", "value": 1}))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    insta::assert_json_snapshot!(body_json(response).await, @r#"
    {
      "detail": "unknown metric kind \"meter\""
    }
    "#);

    assert!(server.shutdown().is_empty());
    assert_eq!(server.counter("metrics_dropped_total"), 0);
}

#[tokio::test]
async fn test_unsupported_content_type() {
    let server = TestServer::new(json!({}));

    let request = Request::post("/count")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(r#"{"metric": "requests"}"#))
        .unwrap();
    let response = server.request(request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    insta::assert_json_snapshot!(body_json(response).await, @r#"
    {
      "detail": "unsupported content type \"text/plain\""
    }
    "#);
}

#[tokio::test]
async fn test_content_type_with_parameters() {
    let server = TestServer::new(json!({}));

    let request = Request::post("/count")
        .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Body::from(r#"{"metric": "requests"}"#))
        .unwrap();

    let response = server.request(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json() {
    let server = TestServer::new(json!({}));

    let request = Request::post("/count")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"metric\": "))
        .unwrap();
    let response = server.request(request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "invalid JSON data");
    assert_eq!(body["causes"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_body_too_large() {
    let server = TestServer::new(json!({"http": {"max_body_size": 16}}));

    let response = server
        .post_json(
            "/count",
            json!({"metric": "a_rather_long_metric_name", "value": 1}),
        )
        .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(server.shutdown().is_empty());
}

#[tokio::test]
async fn test_strict_mode_rejects_name() {
    let server = TestServer::new(json!({"processing": {"prometheus_compat": true}}));

    let response = server
        .post_json("/count", json!({"metric": "9bad-name", "value": 1}))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    insta::assert_json_snapshot!(body_json(response).await, @r#"
    {
      "detail": "invalid first character in metric name"
    }
    "#);

    assert!(server.shutdown().is_empty());
    assert_eq!(server.counter("metrics_dropped_total"), 1);
}

#[tokio::test]
async fn test_lenient_tags() {
    let server = TestServer::new(json!({}));

    let response = server
        .post_json(
            "/count",
            json!({"metric": "requests", "value": 1, "tags": "host=web1,badpair,env="}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(server.shutdown(), ["requests,host=web1:1|c"]);
    assert_eq!(server.counter("metrics_tags_dropped_total"), 2);
}

#[tokio::test]
async fn test_batch_partial_failure() {
    let server = TestServer::new(json!({}));

    let response = server
        .post_json(
            "/batch",
            json!([
                {"metric": "requests", "value": 1, "metric_type": "count"},
                {"metric": "", "value": 1, "metric_type": "count"},
                {"metric": "queue", "value": 3, "tags": "host=a,bad", "metric_type": "gauge"},
                {"metric": "meter", "value": 1, "metric_type": "meter"},
                {"metric": "no_kind", "value": 1},
                {"metric": "users", "value": 42, "metric_type": "set"},
            ]),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["accepted"], 3);
    assert_eq!(report["rejected"], 3);

    let errors = report["errors"].as_array().unwrap();
    let indexes: Vec<_> = errors.iter().map(|e| e["index"].as_u64().unwrap()).collect();
    assert_eq!(indexes, [1, 3, 4]);
    assert_eq!(errors[0]["error"], "empty metric name");
    assert!(errors[1]["error"].as_str().unwrap().contains("meter"));
    assert_eq!(errors[2]["error"], "missing metric kind");

    assert_eq!(
        server.shutdown(),
        ["queue,host=a:3|g", "requests:1|c", "users:42|s"]
    );
    assert_eq!(server.counter("metrics_dropped_total"), 3);
    assert_eq!(server.counter("metrics_tags_dropped_total"), 1);
}

#[tokio::test]
async fn test_batch_requires_array() {
    let server = TestServer::new(json!({}));

    let response = server
        .post_json("/batch", json!({"metric": "requests", "metric_type": "count"}))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_queue_closed() {
    let server = TestServer::new(json!({}));
    server.state.pipeline().close();

    let response = server
        .post_json("/count", json!({"metric": "requests", "value": 1}))
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    insta::assert_json_snapshot!(body_json(response).await, @r#"
    {
      "detail": "metric queue is closed"
    }
    "#);
}

#[tokio::test]
async fn test_root_path() {
    let server = TestServer::new(json!({"http": {"root_path": "proxy/"}}));

    let response = server
        .request(Request::get("/proxy/heartbeat").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .request(Request::get("/heartbeat").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server
        .post_json("/proxy/set/users", json!({"value": 7}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(server.shutdown(), ["users:7|s"]);
}

#[tokio::test]
async fn test_cors_preflight() {
    let server = TestServer::new(json!({}));

    let request = Request::options("/count")
        .header(header::ORIGIN, "https://example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-jwt-token,content-type")
        .body(Body::empty())
        .unwrap();
    let response = server.request(request).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let headers = response.headers();
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://example.com"
    );

    let allowed_headers = headers[header::ACCESS_CONTROL_ALLOW_HEADERS]
        .to_str()
        .unwrap();
    assert!(allowed_headers.contains("x-jwt-token"));
    assert!(allowed_headers.contains("content-type"));

    let allowed_methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap();
    assert!(allowed_methods.contains("POST"));
}

#[tokio::test]
async fn test_cors_simple_request() {
    let server = TestServer::new(json!({}));

    let request = Request::get("/heartbeat")
        .header(header::ORIGIN, "https://example.com")
        .body(Body::empty())
        .unwrap();
    let response = server.request(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://example.com"
    );
}

#[tokio::test]
async fn test_auth_missing_token() {
    let server = TestServer::new(json!({"auth": {"jwt_secret": "secret"}}));

    let response = server
        .post_json("/count", json!({"metric": "requests", "value": 1}))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    insta::assert_json_snapshot!(body_json(response).await, @r#"
    {
      "detail": "token not specified"
    }
    "#);

    assert!(server.shutdown().is_empty());
    assert_eq!(server.counter("auth_reqs_without_token_total"), 1);
}

#[tokio::test]
async fn test_auth_bad_token() {
    let server = TestServer::new(json!({"auth": {"jwt_secret": "secret"}}));
    let token = proxy_auth::sign(&json!({"sub": "app"}), b"other", Algorithm::HS256);

    let request = Request::post("/count")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-JWT-Token", token)
        .body(Body::from(r#"{"metric": "requests", "value": 1}"#))
        .unwrap();
    let response = server.request(request).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "error parsing token");

    assert!(server.shutdown().is_empty());
    assert_eq!(server.counter("auth_reqs_bad_token_total"), 1);
}

#[tokio::test]
async fn test_auth_valid_token() {
    let server = TestServer::new(json!({"auth": {"jwt_secret": "secret"}}));
    let token = proxy_auth::sign(&json!({"sub": "app"}), b"secret", Algorithm::HS256);

    let request = Request::post("/count")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-JWT-Token", &token)
        .body(Body::from(r#"{"metric": "by_header", "value": 1}"#))
        .unwrap();
    let response = server.request(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::post(format!("/count?token={token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"metric": "by_query", "value": 1}"#))
        .unwrap();
    let response = server.request(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Reading endpoints do not require a token.
    let response = server
        .request(Request::get("/heartbeat").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(server.shutdown(), ["by_header:1|c", "by_query:1|c"]);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::new(json!({}));

    let response = server
        .post_json("/count", json!({"metric": "requests", "value": 1}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .post_json("/count", json!({"metric": "", "value": 1}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(server.shutdown(), ["requests:1|c"]);

    let response = server
        .request(Request::get("/metrics").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; version=0.0.4"
    );

    let body = body_string(response).await;
    let lines: Vec<_> = body.lines().filter(|l| !l.starts_with('#')).collect();

    for expected in [
        "counters_added_total 1",
        "metrics_dropped_total 1",
        "metrics_queue_depth 0",
        r#"http_requests_total{method="POST",path="/{kind}",status_code="200"} 1"#,
        r#"http_requests_total{method="POST",path="/{kind}",status_code="400"} 1"#,
        r#"http_request_time_secs_count{method="POST",path="/{kind}",status_code="200"} 1"#,
    ] {
        assert!(lines.contains(&expected), "missing {expected:?} in:\n{body}");
    }

    assert!(lines.iter().any(|l| l.starts_with("app_uptime_secs_total ")));
}

#[tokio::test]
async fn test_unknown_route() {
    let server = TestServer::new(json!({}));

    let response = server
        .request(Request::get("/heartbeat").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .request(Request::get("/unknown/route/here").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_server_binds_plain_http() {
    let server = TestServer::new(json!({"http": {"port": 0}}));

    let http = HttpServer::new(server.state.clone()).await.unwrap();
    assert!(!http.is_tls());
    assert_ne!(http.local_addr().unwrap().port(), 0);

    server.shutdown();
}

#[tokio::test]
async fn test_server_tls_unreadable_certificate() {
    let server = TestServer::new(json!({
        "http": {
            "port": 0,
            "tls_cert": "/nonexistent/proxy/cert.pem",
            "tls_key": "/nonexistent/proxy/key.pem",
        }
    }));

    let result = HttpServer::new(server.state.clone()).await;
    let Err(error) = result else {
        panic!("server started without a certificate");
    };

    assert!(matches!(error, ServerError::TlsConfig { .. }));
    insta::assert_snapshot!(error, @"failed to load TLS certificate /nonexistent/proxy/cert.pem");

    server.shutdown();
}
