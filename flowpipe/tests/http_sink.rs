use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use flowpipe::{
    CounterSource, DataUnit, HttpSink, Mode, PipelineBuilder, PipelineError, SequenceSource,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
struct Echo {
    /// (content type, body) of every request, in arrival order
    seen: Arc<Mutex<Vec<(String, String)>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Echo {
    fn record(&self, headers: &HeaderMap, body: &str) {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.seen.lock().push((content_type, body.to_string()));
    }

    fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().clone()
    }
}

async fn echo(State(state): State<Echo>, headers: HeaderMap, body: String) -> String {
    state.record(&headers, &body);
    body
}

async fn fail(State(state): State<Echo>, headers: HeaderMap, body: String) -> (StatusCode, String) {
    state.record(&headers, &body);
    (StatusCode::INTERNAL_SERVER_ERROR, "nope".to_string())
}

async fn slow(State(state): State<Echo>, headers: HeaderMap, body: String) -> String {
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    state.record(&headers, &body);
    body
}

async fn hang(State(state): State<Echo>, headers: HeaderMap, body: String) -> String {
    state.record(&headers, &body);
    tokio::time::sleep(Duration::from_secs(5)).await;
    body
}

/// Start the echo server, returns its base URL
async fn start_server(state: Echo) -> String {
    let app = Router::new()
        .route("/", post(echo))
        .route("/fail", post(fail))
        .route("/slow", post(slow))
        .route("/hang", post(hang))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_records_posted_as_json() {
    let state = Echo::default();
    let base = start_server(state.clone()).await;

    let report = PipelineBuilder::new(Mode::Object)
        .source(CounterSource::range(Mode::Object, 1, 3))
        .sink(HttpSink::new(reqwest::Client::new(), format!("{base}/"), Mode::Object))
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.acknowledged, 3);
    let seen = state.seen();
    assert_eq!(seen.len(), 3);
    for (i, (content_type, body)) in seen.iter().enumerate() {
        assert_eq!(content_type, "application/json");
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body, json!({ "count": i + 1 }));
    }
}

#[tokio::test]
async fn test_chunks_fall_back_to_text() {
    let state = Echo::default();
    let base = start_server(state.clone()).await;

    let units: Vec<DataUnit> = vec![r#"{"a":1}"#.into(), "Lorem ipsum 1".into()];
    let report = PipelineBuilder::new(Mode::Bytes)
        .source(SequenceSource::new(Mode::Bytes, units))
        .sink(HttpSink::new(reqwest::Client::new(), format!("{base}/"), Mode::Bytes))
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.acknowledged, 2);
    let seen = state.seen();
    assert_eq!(seen[0].0, "application/json");
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&seen[0].1).unwrap(),
        json!({"a": 1})
    );
    assert_eq!(seen[1], ("text/plain".to_string(), "Lorem ipsum 1".to_string()));
}

#[tokio::test]
async fn test_error_status_is_not_fatal() {
    let state = Echo::default();
    let base = start_server(state.clone()).await;

    let report = PipelineBuilder::new(Mode::Object)
        .source(CounterSource::range(Mode::Object, 1, 2))
        .sink(HttpSink::new(reqwest::Client::new(), format!("{base}/fail"), Mode::Object))
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.acknowledged, 2);
    assert_eq!(state.seen().len(), 2);
}

#[tokio::test]
async fn test_connection_refused_is_consume_error() {
    // Grab a free port and release it again
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = PipelineBuilder::new(Mode::Object)
        .source(CounterSource::range(Mode::Object, 1, 5))
        .sink(HttpSink::new(reqwest::Client::new(), format!("http://{addr}/"), Mode::Object))
        .build()
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Consume { .. }), "{err}");
    assert_eq!(err.stage(), Some("http"));
}

#[tokio::test]
async fn test_timeout_is_consume_error() {
    let state = Echo::default();
    let base = start_server(state.clone()).await;

    let sink = HttpSink::new(reqwest::Client::new(), format!("{base}/hang"), Mode::Object)
        .with_timeout(Duration::from_millis(100));
    assert_eq!(sink.url(), format!("{base}/hang"));
    let err = PipelineBuilder::new(Mode::Object)
        .source(CounterSource::range(Mode::Object, 1, 3))
        .sink(sink)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Consume { .. }), "{err}");
    // The first request never resolved, so no second one was sent
    assert_eq!(state.seen().len(), 1);
}

#[tokio::test]
async fn test_one_request_in_flight_at_a_time() {
    let state = Echo::default();
    let base = start_server(state.clone()).await;

    let report = PipelineBuilder::new(Mode::Object)
        .source(CounterSource::range(Mode::Object, 1, 5))
        .sink(HttpSink::new(reqwest::Client::new(), format!("{base}/slow"), Mode::Object))
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.acknowledged, 5);
    assert_eq!(state.max_in_flight.load(Ordering::SeqCst), 1);
    let bodies: Vec<serde_json::Value> = state
        .seen()
        .iter()
        .map(|(_, body)| serde_json::from_str(body).unwrap())
        .collect();
    let expected: Vec<serde_json::Value> = (1..=5).map(|n| json!({ "count": n })).collect();
    assert_eq!(bodies, expected);
}
