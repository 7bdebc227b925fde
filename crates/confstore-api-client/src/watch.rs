use std::time::Duration;

use reqwest::{Method, StatusCode};
use url::Url;

use confstore_api::{Query, Revision, WatchResult};

use crate::contents::{append_json_paths, normalize_path, normalize_path_pattern};
use crate::{Client, Error, Result, DEFAULT_PATH_PREFIX};

/// How long the server is asked to hold a watch request open by default.
pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Slack added to the request deadline so the server's own wait deadline
/// fires first and yields a graceful not-modified response.
const WATCH_TIMEOUT_BUFFER: Duration = Duration::from_secs(5);

/// The outcome of one long-poll watch request.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchPoll {
    /// The content moved past the caller's revision.
    Modified(WatchResult),
    /// The server answered 304: nothing newer than the caller's revision.
    NotModified,
}

impl Client {
    /// Issue one long poll against the file a query selects.
    ///
    /// The request blocks on the server until the content changes beyond
    /// `last_known_revision` or `timeout` lapses. Pass `None` for the
    /// revision when no prior value is known.
    #[tracing::instrument(skip_all)]
    pub async fn watch_file(
        &self,
        project: &str,
        repo: &str,
        last_known_revision: Option<Revision>,
        query: &Query,
        timeout: Duration,
    ) -> Result<WatchPoll> {
        query.validate()?;
        let path = normalize_path(&query.path);
        let mut url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{repo}/contents{path}"
        ))?;
        append_json_paths(&mut url, query);
        self.watch_request(url, last_known_revision, timeout).await
    }

    /// Issue one long poll against every path a pattern matches. The
    /// result carries only the new head revision, no entry.
    #[tracing::instrument(skip_all)]
    pub async fn watch_repo(
        &self,
        project: &str,
        repo: &str,
        last_known_revision: Option<Revision>,
        path_pattern: &str,
        timeout: Duration,
    ) -> Result<WatchPoll> {
        let pattern = normalize_path_pattern(path_pattern);
        let url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{repo}/contents{pattern}"
        ))?;
        self.watch_request(url, last_known_revision, timeout).await
    }

    async fn watch_request(
        &self,
        url: Url,
        last_known_revision: Option<Revision>,
        timeout: Duration,
    ) -> Result<WatchPoll> {
        let revision = last_known_revision.unwrap_or(Revision::HEAD);
        let mut request = self
            .request(Method::GET, url)
            .header("if-none-match", revision.to_string())
            .timeout(timeout + WATCH_TIMEOUT_BUFFER);
        if !timeout.is_zero() {
            request = request.header("prefer", format_wait(timeout));
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                Error::WatchTimeout { timeout }
            } else {
                Error::Reqwest(err)
            }
        })?;

        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(WatchPoll::NotModified),
            status if status.is_success() => {
                let result: WatchResult = response.json().await?;
                Ok(WatchPoll::Modified(result))
            }
            _ => Err(Self::response_error(response).await),
        }
    }
}

/// Render the `prefer: wait=<seconds>` header value, without a fractional
/// part for whole seconds.
fn format_wait(timeout: Duration) -> String {
    let seconds = timeout.as_secs_f64();
    if seconds.fract() == 0.0 {
        format!("wait={}", seconds as u64)
    } else {
        format!("wait={seconds}")
    }
}
