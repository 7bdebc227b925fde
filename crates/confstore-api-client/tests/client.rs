use std::time::Duration;

use anyhow::Result;

use confstore_api::{Change, ChangeType, CommitMessage, Query, Revision};
use confstore_api_client::{Client, Error, WatchPoll};
use confstore_api_mock::{
    start_test_server, EXPECTED_HEAD_REVISION, EXPECTED_PROJECT, EXPECTED_PUSH_REVISION,
    EXPECTED_REPO,
};

async fn start_client() -> Result<Client> {
    let port = port_scanner::request_open_port().unwrap();
    tokio::spawn(start_test_server(port));
    wait_for_server(port).await;
    Ok(Client::new(format!("http://localhost:{}", port))?)
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

#[tokio::test]
async fn test_list_projects() -> Result<()> {
    let client = start_client().await?;

    let projects = client.list_projects().await?;
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].name, EXPECTED_PROJECT);

    Ok(())
}

#[tokio::test]
async fn test_create_project() -> Result<()> {
    let client = start_client().await?;

    let project = client.create_project("baz").await?;
    assert_eq!(project.name, "baz");

    Ok(())
}

#[tokio::test]
async fn test_list_repositories() -> Result<()> {
    let client = start_client().await?;

    let repos = client.list_repositories(EXPECTED_PROJECT).await?;
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].name, EXPECTED_REPO);
    assert_eq!(
        repos[0].head_revision,
        Some(Revision(EXPECTED_HEAD_REVISION))
    );

    Ok(())
}

#[tokio::test]
async fn test_normalize_revision() -> Result<()> {
    let client = start_client().await?;

    let normalized = client
        .normalize_revision(EXPECTED_PROJECT, EXPECTED_REPO, Revision::HEAD)
        .await?;
    assert_eq!(normalized, Revision(EXPECTED_HEAD_REVISION));

    Ok(())
}

#[tokio::test]
async fn test_get_file() -> Result<()> {
    let client = start_client().await?;

    let entry = client
        .get_file(
            EXPECTED_PROJECT,
            EXPECTED_REPO,
            None,
            &Query::identity("/a.json"),
        )
        .await?;
    assert_eq!(entry.path, "/a.json");
    assert_eq!(
        entry.content.to_json()?,
        serde_json::json!({"a": "b"})
    );

    Ok(())
}

#[tokio::test]
async fn test_get_file_rejects_json_path_on_non_json() -> Result<()> {
    let client = start_client().await?;

    let query = Query {
        path: "/a.txt".to_string(),
        kind: confstore_api::QueryType::JsonPath,
        expressions: vec!["$.a".to_string()],
    };
    let err = client
        .get_file(EXPECTED_PROJECT, EXPECTED_REPO, None, &query)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Query(_)));

    Ok(())
}

#[tokio::test]
async fn test_watch_file_once() -> Result<()> {
    let client = start_client().await?;

    let poll = client
        .watch_file(
            EXPECTED_PROJECT,
            EXPECTED_REPO,
            Some(Revision::INIT),
            &Query::identity("/a.json"),
            Duration::from_secs(1),
        )
        .await?;
    let WatchPoll::Modified(result) = poll else {
        panic!("expected a modified result, got {poll:?}");
    };
    assert_eq!(result.revision, Revision(2));
    let entry = result.entry.unwrap();
    assert_eq!(entry.content.to_json()?, serde_json::json!({"a": 2}));

    Ok(())
}

#[tokio::test]
async fn test_watch_repo_once() -> Result<()> {
    let client = start_client().await?;

    let poll = client
        .watch_repo(
            EXPECTED_PROJECT,
            EXPECTED_REPO,
            Some(Revision(3)),
            "",
            Duration::from_secs(1),
        )
        .await?;
    let WatchPoll::Modified(result) = poll else {
        panic!("expected a modified result, got {poll:?}");
    };
    assert_eq!(result.revision, Revision(4));

    Ok(())
}

#[tokio::test]
async fn test_push() -> Result<()> {
    let client = start_client().await?;

    let changes = vec![Change {
        path: "/a.json".to_string(),
        kind: ChangeType::UpsertJson,
        content: Some(serde_json::json!({"a": "c"})),
    }];
    let message = CommitMessage {
        summary: "update a.json".to_string(),
        detail: None,
        markup: None,
    };
    let result = client
        .push(EXPECTED_PROJECT, EXPECTED_REPO, None, &message, &changes)
        .await?;
    assert_eq!(result.revision, Revision(EXPECTED_PUSH_REVISION));

    Ok(())
}

#[tokio::test]
async fn test_push_argument_errors() -> Result<()> {
    let client = start_client().await?;

    let message = CommitMessage {
        summary: String::new(),
        detail: None,
        markup: None,
    };
    let err = client
        .push(EXPECTED_PROJECT, EXPECTED_REPO, None, &message, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyCommitSummary));

    let message = CommitMessage {
        summary: "no changes".to_string(),
        detail: None,
        markup: None,
    };
    let err = client
        .push(EXPECTED_PROJECT, EXPECTED_REPO, None, &message, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoChanges));

    Ok(())
}

#[tokio::test]
async fn test_server_error_message_is_surfaced() -> Result<()> {
    let client = start_client().await?;

    let err = client.remove_project("nope").await.unwrap_err();
    match err {
        Error::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "not found");
        }
        other => panic!("expected an API error, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_security_enabled() -> Result<()> {
    let client = start_client().await?;

    assert!(client.security_enabled().await?);

    Ok(())
}

mod watch_headers {
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::Router;

    use std::time::Duration;

    use confstore_api::{Query, Revision};
    use confstore_api_client::{Client, WatchPoll};

    type Seen = Arc<Mutex<Vec<(Option<String>, Option<String>)>>>;

    async fn record_headers(State(seen): State<Seen>, headers: HeaderMap) -> StatusCode {
        let value = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        seen.lock()
            .unwrap()
            .push((value("if-none-match"), value("prefer")));
        StatusCode::NOT_MODIFIED
    }

    #[tokio::test]
    async fn test_conditional_headers() -> Result<()> {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/api/v1/projects/foo/repos/bar/contents/a.json",
                get(record_headers),
            )
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = Client::new(format!("http://{addr}"))?;
        let query = Query::identity("/a.json");

        // No prior revision: the conditional header carries -1. A zero
        // wait omits the prefer header entirely.
        let poll = client
            .watch_file("foo", "bar", None, &query, Duration::ZERO)
            .await?;
        assert_eq!(poll, WatchPoll::NotModified);

        let poll = client
            .watch_file("foo", "bar", Some(Revision(7)), &query, Duration::from_secs(1))
            .await?;
        assert_eq!(poll, WatchPoll::NotModified);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (Some("-1".to_string()), None));
        assert_eq!(
            seen[1],
            (Some("7".to_string()), Some("wait=1".to_string()))
        );

        Ok(())
    }
}
