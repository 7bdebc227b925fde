//! A mock confstore server serving canned fixtures, used by the
//! integration tests of the client and watch crates.

use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use confstore_api::{
    Author, Entry, EntryContent, EntryKind, ErrorMessage, Project, PushResult, Repository,
    Revision, WatchResult,
};

pub const EXPECTED_PROJECT: &str = "foo";
pub const EXPECTED_REPO: &str = "bar";
pub const EXPECTED_FILE_PATH: &str = "/a.json";
pub const EXPECTED_CREATOR: &str = "admin@localhost";
pub const EXPECTED_HEAD_REVISION: i64 = 5;
pub const EXPECTED_PUSH_REVISION: i64 = 2;

pub async fn start_test_server(port: u16) -> Result<()> {
    let app = Router::new()
        .route("/api/v1/projects", get(list_projects).post(create_project))
        .route(
            "/api/v1/projects/:project/repos",
            get(list_repositories).post(create_repository),
        )
        .route(
            "/api/v1/projects/:project/repos/:repo/revision/:revision",
            get(normalize_revision),
        )
        .route(
            "/api/v1/projects/:project/repos/:repo/contents",
            post(push),
        )
        .route(
            "/api/v1/projects/:project/repos/:repo/contents/*path",
            get(contents),
        )
        .route("/api/v1/projects/:project/repos/:repo/list/*path", get(list_files))
        .route("/security_enabled", get(|| async { StatusCode::OK }))
        .fallback(not_found);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    // We print the port so integration tests can use it
    println!("{}", port);
    axum_server::bind(addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

fn creator() -> Author {
    Author {
        name: Some("admin".to_string()),
        email: Some(EXPECTED_CREATOR.to_string()),
    }
}

fn file_entry() -> Entry {
    Entry {
        path: EXPECTED_FILE_PATH.to_string(),
        kind: EntryKind::Json,
        content: EntryContent::from(r#"{"a":"b"}"#),
        revision: Some(Revision(EXPECTED_HEAD_REVISION)),
        url: None,
        modified_at: None,
    }
}

async fn list_projects() -> Json<Vec<Project>> {
    Json(vec![Project {
        name: EXPECTED_PROJECT.to_string(),
        creator: Some(creator()),
        url: None,
        created_at: None,
    }])
}

async fn create_project(Json(body): Json<serde_json::Value>) -> Json<Project> {
    Json(Project {
        name: body["name"].as_str().unwrap_or_default().to_string(),
        creator: Some(creator()),
        url: None,
        created_at: None,
    })
}

async fn list_repositories(Path(_project): Path<String>) -> Json<Vec<Repository>> {
    Json(vec![Repository {
        name: EXPECTED_REPO.to_string(),
        creator: Some(creator()),
        head_revision: Some(Revision(EXPECTED_HEAD_REVISION)),
        url: None,
        created_at: None,
    }])
}

async fn create_repository(
    Path(_project): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Json<Repository> {
    Json(Repository {
        name: body["name"].as_str().unwrap_or_default().to_string(),
        creator: Some(creator()),
        head_revision: Some(Revision::INIT),
        url: None,
        created_at: None,
    })
}

async fn normalize_revision(
    Path((_project, _repo, _revision)): Path<(String, String, String)>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "revision": EXPECTED_HEAD_REVISION }))
}

/// Content lookups and watch polls share this route; a watch poll is
/// recognized by its `if-none-match` header and answers with the next
/// revision so pollers observe an incrementing stream.
async fn contents(
    Path((_project, _repo, path)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(last_known) = headers.get("if-none-match") {
        let last_known = last_known
            .to_str()
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(1)
            .max(1);
        let revision = last_known + 1;
        let content = format!(r#"{{"a":{revision}}}"#);
        return Json(WatchResult {
            revision: Revision(revision),
            entry: Some(Entry {
                path: EXPECTED_FILE_PATH.to_string(),
                kind: EntryKind::Json,
                content: EntryContent::from(content.into_bytes()),
                revision: Some(Revision(revision)),
                url: None,
                modified_at: None,
            }),
        })
        .into_response();
    }

    if path.contains('*') {
        Json(vec![file_entry()]).into_response()
    } else {
        Json(file_entry()).into_response()
    }
}

async fn list_files(
    Path((_project, _repo, _path)): Path<(String, String, String)>,
) -> Json<Vec<Entry>> {
    Json(vec![Entry {
        path: EXPECTED_FILE_PATH.to_string(),
        kind: EntryKind::Json,
        content: EntryContent::default(),
        revision: Some(Revision(EXPECTED_HEAD_REVISION)),
        url: None,
        modified_at: None,
    }])
}

async fn push(
    Path((_project, _repo)): Path<(String, String)>,
    Json(_body): Json<serde_json::Value>,
) -> Json<PushResult> {
    Json(PushResult {
        revision: Revision(EXPECTED_PUSH_REVISION),
        pushed_at: "2023-01-01T00:00:00Z".to_string(),
    })
}

async fn not_found() -> (StatusCode, Json<ErrorMessage>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorMessage {
            message: "not found".to_string(),
        }),
    )
}
