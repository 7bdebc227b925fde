use std::time::Duration;

use async_trait::async_trait;

use confstore_api::{Query, Revision};
use confstore_api_client::{Client, Error, WatchPoll};

/// One long poll against the store: the pluggable half of a watcher.
///
/// The poll loop owns pacing, retries and cancellation; an implementation
/// only has to issue a single request that resolves once the content moves
/// past `last_known_revision`, the server's wait lapses, or the request
/// fails.
#[async_trait]
pub trait WatchSource: Send + Sync + 'static {
    async fn poll(&self, last_known_revision: Revision) -> Result<WatchPoll, Error>;
}

pub(crate) struct FileWatchSource {
    pub(crate) client: Client,
    pub(crate) project: String,
    pub(crate) repo: String,
    pub(crate) query: Query,
    pub(crate) timeout: Duration,
}

#[async_trait]
impl WatchSource for FileWatchSource {
    async fn poll(&self, last_known_revision: Revision) -> Result<WatchPoll, Error> {
        self.client
            .watch_file(
                &self.project,
                &self.repo,
                Some(last_known_revision),
                &self.query,
                self.timeout,
            )
            .await
    }
}

pub(crate) struct RepoWatchSource {
    pub(crate) client: Client,
    pub(crate) project: String,
    pub(crate) repo: String,
    pub(crate) path_pattern: String,
    pub(crate) timeout: Duration,
}

#[async_trait]
impl WatchSource for RepoWatchSource {
    async fn poll(&self, last_known_revision: Revision) -> Result<WatchPoll, Error> {
        self.client
            .watch_repo(
                &self.project,
                &self.repo,
                Some(last_known_revision),
                &self.path_pattern,
                self.timeout,
            )
            .await
    }
}
