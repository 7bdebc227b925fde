//! Long-poll watch subsystem for the confstore client.
//!
//! The server's watch endpoint holds a `GET` open until the watched content
//! moves past the caller's revision or a wait deadline lapses. This crate
//! turns that protocol into cancellable subscriptions: a [`Watcher`] drives
//! consecutive long polls, keeps the latest observed value, and fans new
//! revisions out to listeners; [`WatchService`] builds watchers bound to a
//! file query or a repository path pattern.
//!
//! # Basic Usage
//! ```no_run
//! use confstore_api::Query;
//! use confstore_api_client::Client;
//! use confstore_watch::WatchService;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new("http://confstore.example.com:36462")?;
//! let service = WatchService::new(client);
//!
//! let watcher = service.file_watcher("foo", "bar", Query::identity("/a.json"))?;
//! watcher.subscribe(|result| {
//!     println!("rev {} changed", result.revision);
//! })?;
//! watcher.start();
//!
//! let initial = watcher.await_initial_value().await?;
//! println!("initial value at rev {}", initial.revision);
//! # Ok(())
//! # }
//! ```
//!
//! The channel-style adapters return a bounded receiver instead of taking a
//! callback:
//! ```no_run
//! # use confstore_api::Query;
//! # use confstore_api_client::Client;
//! # use confstore_watch::WatchService;
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! # let service = WatchService::new(Client::new("")?);
//! let (mut changes, handle) = service.watch_file("foo", "bar", Query::identity("/a.json"))?;
//! while let Some(result) = changes.recv().await {
//!     println!("rev {}", result.revision);
//! }
//! handle.close();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use confstore_api::{Query, WatchResult};
use confstore_api_client::{Client, DEFAULT_WATCH_TIMEOUT};

pub use crate::backoff::ExponentialBackoff;
pub use crate::error::WatchError;
pub use crate::metrics::{MetricRecorder, TracingRecorder};
pub use crate::source::WatchSource;
pub use crate::watcher::Watcher;

mod backoff;
mod error;
mod metrics;
mod source;
mod watcher;

use crate::source::{FileWatchSource, RepoWatchSource};

const DELAY_ON_SUCCESS: Duration = Duration::from_secs(1);
const MIN_INTERVAL: Duration = Duration::from_secs(2);
const MAX_INTERVAL: Duration = Duration::from_secs(60);
const JITTER_RATE: f64 = 0.2;

/// Capacity of the channel handed out by the channel-style adapters.
const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// Pacing knobs of a watcher's poll loop.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// How long the server is asked to hold each poll open.
    pub timeout: Duration,
    /// Sleep between polls after a success, a not-modified response, or an
    /// expired poll envelope.
    pub delay_on_success: Duration,
    /// First backoff step after a failed poll.
    pub min_interval: Duration,
    /// Backoff ceiling.
    pub max_interval: Duration,
    /// Uniform jitter applied to every backoff delay, as a rate.
    pub jitter_rate: f64,
    /// Seed for the backoff jitter. Defaults to entropy; tests pin it.
    pub backoff_seed: Option<u64>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WATCH_TIMEOUT,
            delay_on_success: DELAY_ON_SUCCESS,
            min_interval: MIN_INTERVAL,
            max_interval: MAX_INTERVAL,
            jitter_rate: JITTER_RATE,
            backoff_seed: None,
        }
    }
}

impl WatchOptions {
    pub(crate) fn backoff(&self) -> ExponentialBackoff {
        match self.backoff_seed {
            Some(seed) => ExponentialBackoff::with_rng(
                self.min_interval,
                self.max_interval,
                self.jitter_rate,
                StdRng::seed_from_u64(seed),
            ),
            None => ExponentialBackoff::new(self.min_interval, self.max_interval, self.jitter_rate),
        }
    }
}

/// Builds watchers over a shared [`Client`].
///
/// The service owns a root cancellation token; every watcher runs under a
/// child of it, so dropping a watcher's parent context (or cancelling the
/// token handed to [`with_cancellation`](Self::with_cancellation)) stops
/// all of its watchers, while closing one watcher affects only itself.
pub struct WatchService {
    client: Client,
    cancel: CancellationToken,
    metrics: Option<Arc<dyn MetricRecorder>>,
}

impl WatchService {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cancel: CancellationToken::new(),
            metrics: None,
        }
    }

    /// A service whose watchers stop when `parent` is cancelled.
    pub fn with_cancellation(client: Client, parent: &CancellationToken) -> Self {
        Self {
            client,
            cancel: parent.child_token(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// A watcher over the file a query selects. Not yet started.
    pub fn file_watcher(
        &self,
        project: &str,
        repo: &str,
        query: Query,
    ) -> Result<Watcher, WatchError> {
        self.file_watcher_with_options(project, repo, query, WatchOptions::default())
    }

    pub fn file_watcher_with_options(
        &self,
        project: &str,
        repo: &str,
        query: Query,
        options: WatchOptions,
    ) -> Result<Watcher, WatchError> {
        query.validate()?;
        let source = Arc::new(FileWatchSource {
            client: self.client.clone(),
            project: project.to_string(),
            repo: repo.to_string(),
            query: query.clone(),
            timeout: options.timeout,
        });
        Ok(Watcher::new(
            project,
            repo,
            &query.path,
            source,
            self.cancel.child_token(),
            options,
            self.metrics.clone(),
        ))
    }

    /// A watcher over every path the pattern matches. Not yet started.
    pub fn repo_watcher(
        &self,
        project: &str,
        repo: &str,
        path_pattern: &str,
    ) -> Result<Watcher, WatchError> {
        self.repo_watcher_with_options(project, repo, path_pattern, WatchOptions::default())
    }

    pub fn repo_watcher_with_options(
        &self,
        project: &str,
        repo: &str,
        path_pattern: &str,
        options: WatchOptions,
    ) -> Result<Watcher, WatchError> {
        let source = Arc::new(RepoWatchSource {
            client: self.client.clone(),
            project: project.to_string(),
            repo: repo.to_string(),
            path_pattern: path_pattern.to_string(),
            timeout: options.timeout,
        });
        Ok(Watcher::new(
            project,
            repo,
            path_pattern,
            source,
            self.cancel.child_token(),
            options,
            self.metrics.clone(),
        ))
    }

    /// Watch a file through a bounded channel. The watcher is started
    /// before this returns; the receiver yields the current value (once
    /// known) and every new revision after it. The library never closes
    /// the channel; use the handle to stop watching.
    pub fn watch_file(
        &self,
        project: &str,
        repo: &str,
        query: Query,
    ) -> Result<(mpsc::Receiver<Arc<WatchResult>>, WatchHandle), WatchError> {
        self.watch_file_with_options(project, repo, query, WatchOptions::default())
    }

    pub fn watch_file_with_options(
        &self,
        project: &str,
        repo: &str,
        query: Query,
        options: WatchOptions,
    ) -> Result<(mpsc::Receiver<Arc<WatchResult>>, WatchHandle), WatchError> {
        let watcher = self.file_watcher_with_options(project, repo, query, options)?;
        Self::attach(watcher)
    }

    /// The repository-pattern analogue of [`watch_file`](Self::watch_file).
    pub fn watch_repo(
        &self,
        project: &str,
        repo: &str,
        path_pattern: &str,
    ) -> Result<(mpsc::Receiver<Arc<WatchResult>>, WatchHandle), WatchError> {
        self.watch_repo_with_options(project, repo, path_pattern, WatchOptions::default())
    }

    pub fn watch_repo_with_options(
        &self,
        project: &str,
        repo: &str,
        path_pattern: &str,
        options: WatchOptions,
    ) -> Result<(mpsc::Receiver<Arc<WatchResult>>, WatchHandle), WatchError> {
        let watcher = self.repo_watcher_with_options(project, repo, path_pattern, options)?;
        Self::attach(watcher)
    }

    fn attach(
        watcher: Watcher,
    ) -> Result<(mpsc::Receiver<Arc<WatchResult>>, WatchHandle), WatchError> {
        let receiver = watcher.subscribe_channel(DEFAULT_CHANNEL_CAPACITY)?;
        watcher.start();
        Ok((receiver, WatchHandle { watcher }))
    }
}

/// Stops the watcher behind a channel-style subscription. Safe to call any
/// number of times.
#[derive(Clone)]
pub struct WatchHandle {
    watcher: Watcher,
}

impl WatchHandle {
    pub fn close(&self) {
        self.watcher.close();
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}
