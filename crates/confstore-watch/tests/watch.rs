use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::mpsc;

use confstore_api::{Query, QueryType, Revision};
use confstore_api_client::Client;
use confstore_watch::{WatchError, WatchOptions, WatchService};

#[derive(Default)]
struct Recorded {
    hits: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

#[derive(Debug, Clone)]
struct RecordedRequest {
    path: String,
    if_none_match: Option<String>,
    prefer: Option<String>,
    authorization: Option<String>,
}

impl Recorded {
    fn push(&self, path: String, headers: &HeaderMap) -> usize {
        self.requests.lock().unwrap().push(RecordedRequest {
            path,
            if_none_match: header(headers, "if-none-match"),
            prefer: header(headers, "prefer"),
            authorization: header(headers, "authorization"),
        });
        self.hits.fetch_add(1, Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn last_known(headers: &HeaderMap) -> i64 {
    header(headers, "if-none-match")
        .and_then(|value| value.parse().ok())
        .unwrap_or(1)
}

async fn serve(app: Router) -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok(format!("http://{addr}"))
}

fn fast_options() -> WatchOptions {
    WatchOptions {
        timeout: Duration::from_secs(1),
        delay_on_success: Duration::from_millis(10),
        min_interval: Duration::from_millis(20),
        max_interval: Duration::from_millis(100),
        backoff_seed: Some(7),
        ..WatchOptions::default()
    }
}

fn revision_3_body() -> serde_json::Value {
    serde_json::json!({
        "revision": 3,
        "entry": {"path": "/a.json", "type": "JSON", "content": {"a": "b"}}
    })
}

/// 304 on the first poll, then revision 3 forever.
async fn not_modified_then_change(
    State(state): State<Arc<Recorded>>,
    headers: HeaderMap,
) -> Response {
    if state.push("/a.json".to_string(), &headers) == 0 {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        Json(revision_3_body()).into_response()
    }
}

async fn always_revision_3(State(state): State<Arc<Recorded>>, headers: HeaderMap) -> Response {
    state.push("/a.json".to_string(), &headers);
    Json(revision_3_body()).into_response()
}

/// Repository watch endpoint: bumps the revision past whatever the caller
/// already knows.
async fn incrementing_revision(
    State(state): State<Arc<Recorded>>,
    Path(rest): Path<String>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    state.push(rest, &headers);
    Json(serde_json::json!({ "revision": last_known(&headers) + 1 }))
}

#[tokio::test(flavor = "multi_thread")]
async fn single_file_change_notifies_exactly_once() -> Result<()> {
    let state = Arc::new(Recorded::default());
    let app = Router::new()
        .route(
            "/api/v1/projects/foo/repos/bar/contents/a.json",
            get(not_modified_then_change),
        )
        .with_state(state.clone());
    let client = Client::new(serve(app).await?)?;
    let service = WatchService::new(client);

    let watcher = service.file_watcher_with_options(
        "foo",
        "bar",
        Query::identity("/a.json"),
        fast_options(),
    )?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    watcher.subscribe(move |result| drop(tx.send(result)))?;
    watcher.start();

    let result = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .unwrap();
    assert_eq!(result.revision, Revision(3));
    let entry = result.entry.as_ref().unwrap();
    assert_eq!(entry.path, "/a.json");
    assert_eq!(entry.content.to_json()?, serde_json::json!({"a": "b"}));
    assert_eq!(watcher.latest().unwrap().revision, Revision(3));

    // The server keeps answering with revision 3; the watcher deduplicates,
    // so the one notification above is all a subscriber sees.
    let silent = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(silent.is_err(), "unexpected second delivery: {silent:?}");

    let requests = state.requests();
    assert_eq!(requests[0].if_none_match.as_deref(), Some("1"));
    assert_eq!(requests[0].prefer.as_deref(), Some("wait=1"));
    assert_eq!(
        requests[0].authorization.as_deref(),
        Some("Bearer anonymous")
    );
    assert!(requests
        .iter()
        .skip(2)
        .all(|request| request.if_none_match.as_deref() == Some("3")));

    watcher.close();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn bare_file_path_is_normalized_on_the_wire() -> Result<()> {
    let state = Arc::new(Recorded::default());
    let app = Router::new()
        .route(
            "/api/v1/projects/foo/repos/bar/contents/a.json",
            get(always_revision_3),
        )
        .with_state(state.clone());
    let client = Client::new(serve(app).await?)?;
    let service = WatchService::new(client);

    // No leading slash on the query path; the request must still land on
    // /contents/a.json and the stored entry path stays "/a.json".
    let watcher = service.file_watcher_with_options(
        "foo",
        "bar",
        Query::identity("a.json"),
        fast_options(),
    )?;
    watcher.start();

    let initial = watcher
        .await_initial_value_timeout(Duration::from_secs(5))
        .await?;
    assert_eq!(initial.revision, Revision(3));
    assert_eq!(initial.entry.as_ref().unwrap().path, "/a.json");

    watcher.close();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_pattern_watches_everything() -> Result<()> {
    let state = Arc::new(Recorded::default());
    let app = Router::new()
        .route(
            "/api/v1/projects/foo/repos/bar/contents/*rest",
            get(incrementing_revision),
        )
        .with_state(state.clone());
    let client = Client::new(serve(app).await?)?;
    let service = WatchService::new(client);

    let watcher = service.repo_watcher_with_options("foo", "bar", "", fast_options())?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    watcher.subscribe(move |result| drop(tx.send(result)))?;
    watcher.start();

    for want in 2..=3i64 {
        let result = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await?
            .unwrap();
        assert_eq!(result.revision, Revision(want));
    }

    assert!(state
        .requests()
        .iter()
        .all(|request| request.path == "**"));

    watcher.close();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn bare_pattern_is_anchored_at_any_depth() -> Result<()> {
    let state = Arc::new(Recorded::default());
    let app = Router::new()
        .route(
            "/api/v1/projects/foo/repos/bar/contents/*rest",
            get(incrementing_revision),
        )
        .with_state(state.clone());
    let client = Client::new(serve(app).await?)?;
    let service = WatchService::new(client);

    let watcher = service.repo_watcher_with_options("foo", "bar", "a.json", fast_options())?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    watcher.subscribe(move |result| drop(tx.send(result)))?;
    watcher.start();

    for want in 2..=3i64 {
        let result = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await?
            .unwrap();
        assert_eq!(result.revision, Revision(want));
    }

    assert!(state
        .requests()
        .iter()
        .all(|request| request.path == "**/a.json"));

    watcher.close();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_file_channel_delivers_incrementing_revisions() -> Result<()> {
    let port = port_scanner::request_open_port().unwrap();
    tokio::spawn(confstore_api_mock::start_test_server(port));
    wait_for_server(port).await;

    let client = Client::new(format!("http://localhost:{port}"))?;
    let service = WatchService::new(client);

    let (mut changes, handle) = service.watch_file_with_options(
        "foo",
        "bar",
        Query::identity("/a.json"),
        fast_options(),
    )?;
    for want in 2..=4i64 {
        let result = tokio::time::timeout(Duration::from_secs(5), changes.recv())
            .await?
            .unwrap();
        assert_eq!(result.revision, Revision(want));
    }

    handle.close();
    handle.close();
    assert!(handle.watcher().is_closed());

    Ok(())
}

#[tokio::test]
async fn json_path_on_non_json_file_fails_at_the_factory() -> Result<()> {
    let client = Client::new("")?;
    let service = WatchService::new(client);

    let query = Query {
        path: "/a.txt".to_string(),
        kind: QueryType::JsonPath,
        expressions: vec!["$.a".to_string()],
    };
    let err = service.file_watcher("foo", "bar", query).unwrap_err();
    assert!(matches!(err, WatchError::Query(_)));

    Ok(())
}

async fn wait_for_server(port: u16) {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("mock server did not come up on port {port}");
}
