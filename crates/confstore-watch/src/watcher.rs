use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use confstore_api::{Revision, WatchResult};
use confstore_api_client::WatchPoll;

use crate::backoff::ExponentialBackoff;
use crate::error::WatchError;
use crate::metrics::MetricRecorder;
use crate::source::WatchSource;
use crate::WatchOptions;

const STATE_INITIAL: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Queue depth of each listener's delivery channel.
pub(crate) const LISTENER_QUEUE_CAPACITY: usize = 32;

#[derive(Clone)]
enum InitialValue {
    Value(Arc<WatchResult>),
    Closed,
}

struct Listener {
    tx: mpsc::Sender<Arc<WatchResult>>,
    /// The highest revision handed to this listener, including the replay
    /// of `latest` at registration. Guards against a registration racing an
    /// in-flight fan-out of the same revision.
    last_sent: Option<Revision>,
}

/// Watches a file or a path pattern in a repository.
///
/// A watcher runs one poll task that drives consecutive long polls against
/// the server, keeps the latest observed [`WatchResult`], and fans new
/// revisions out to subscribed listeners. Clones share the same
/// subscription.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("project", &self.inner.project)
            .field("repo", &self.inner.repo)
            .field("path_pattern", &self.inner.path_pattern)
            .finish_non_exhaustive()
    }
}

struct WatcherInner {
    project: String,
    repo: String,
    path_pattern: String,
    source: Arc<dyn WatchSource>,
    options: WatchOptions,
    metrics: Option<Arc<dyn MetricRecorder>>,
    token: CancellationToken,
    state: AtomicU8,
    latest: ArcSwapOption<WatchResult>,
    initial_tx: watch::Sender<Option<InitialValue>>,
    initial_rx: watch::Receiver<Option<InitialValue>>,
    listeners: Mutex<Vec<Listener>>,
}

impl Watcher {
    pub(crate) fn new(
        project: &str,
        repo: &str,
        path_pattern: &str,
        source: Arc<dyn WatchSource>,
        token: CancellationToken,
        options: WatchOptions,
        metrics: Option<Arc<dyn MetricRecorder>>,
    ) -> Watcher {
        let (initial_tx, initial_rx) = watch::channel(None);
        Watcher {
            inner: Arc::new(WatcherInner {
                project: project.to_string(),
                repo: repo.to_string(),
                path_pattern: path_pattern.to_string(),
                source,
                options,
                metrics,
                token,
                state: AtomicU8::new(STATE_INITIAL),
                latest: ArcSwapOption::empty(),
                initial_tx,
                initial_rx,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn the poll task. Subsequent calls, and calls after
    /// [`close`](Self::close), do nothing.
    pub fn start(&self) {
        if self
            .inner
            .state
            .compare_exchange(
                STATE_INITIAL,
                STATE_STARTED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            let inner = self.inner.clone();
            tokio::spawn(inner.run());
        }
    }

    /// The latest value the watcher has observed.
    pub fn latest(&self) -> Result<Arc<WatchResult>, WatchError> {
        self.inner.latest.load_full().ok_or(WatchError::LatestNotSet)
    }

    /// Wait until the first value is available and return it. Every caller
    /// gets the same value for the lifetime of the watcher. Returns
    /// [`WatchError::WatcherClosed`] if the watcher closes before a value
    /// arrives.
    pub async fn await_initial_value(&self) -> Result<Arc<WatchResult>, WatchError> {
        let mut rx = self.inner.initial_rx.clone();
        let slot = rx
            .wait_for(|slot| slot.is_some())
            .await
            .map_err(|_| WatchError::WatcherClosed)?
            .clone();
        match slot {
            Some(InitialValue::Value(result)) => Ok(result),
            _ => Err(WatchError::WatcherClosed),
        }
    }

    /// Like [`await_initial_value`](Self::await_initial_value), giving up
    /// after `timeout`. Timing out does not latch anything; a later call
    /// can still succeed.
    pub async fn await_initial_value_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Arc<WatchResult>, WatchError> {
        tokio::time::timeout(timeout, self.await_initial_value())
            .await
            .map_err(|_| WatchError::InitialValueTimeout(timeout))?
    }

    /// Register a listener invoked for the current value (if one exists)
    /// and for every new revision after it, in revision order. The
    /// callback runs on its own delivery task, so a slow listener cannot
    /// stall the poll loop.
    pub fn subscribe<F>(&self, listener: F) -> Result<(), WatchError>
    where
        F: Fn(Arc<WatchResult>) + Send + Sync + 'static,
    {
        if self.inner.is_stopped() {
            return Err(WatchError::WatcherClosed);
        }
        let (tx, rx) = mpsc::channel(LISTENER_QUEUE_CAPACITY);
        tokio::spawn(deliver(self.inner.token.clone(), rx, listener));
        self.inner.register(tx);
        Ok(())
    }

    /// Register a bare queue as a listener. Used by the channel-style
    /// adapters; delivery semantics match [`subscribe`](Self::subscribe).
    pub(crate) fn subscribe_channel(
        &self,
        capacity: usize,
    ) -> Result<mpsc::Receiver<Arc<WatchResult>>, WatchError> {
        if self.inner.is_stopped() {
            return Err(WatchError::WatcherClosed);
        }
        let (tx, rx) = mpsc::channel(capacity);
        self.inner.register(tx);
        Ok(rx)
    }

    /// Stop watching. Cancels the in-flight poll, releases
    /// [`await_initial_value`](Self::await_initial_value) callers that are
    /// still waiting, and drops all listener queues. Idempotent, and safe
    /// to call from inside a listener callback.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_stopped()
    }

    pub fn project(&self) -> &str {
        &self.inner.project
    }

    pub fn repo(&self) -> &str {
        &self.inner.repo
    }

    pub fn path_pattern(&self) -> &str {
        &self.inner.path_pattern
    }
}

impl WatcherInner {
    fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_STOPPED
    }

    fn close(&self) {
        self.state.store(STATE_STOPPED, Ordering::Release);
        self.publish_initial(InitialValue::Closed);
        self.token.cancel();
        self.drain_listeners();
    }

    /// Install the initial value. Only the first publish wins; later calls
    /// (including the closed sentinel) are no-ops.
    fn publish_initial(&self, value: InitialValue) {
        self.initial_tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(value);
                true
            } else {
                false
            }
        });
    }

    fn register(&self, tx: mpsc::Sender<Arc<WatchResult>>) {
        let mut listeners = self.listeners.lock().expect("lock is valid");
        let mut last_sent = None;
        if let Some(latest) = self.latest.load_full() {
            last_sent = Some(latest.revision);
            // The queue is freshly created, so this cannot fail on
            // capacity.
            let _ = tx.try_send(latest);
        }
        listeners.push(Listener { tx, last_sent });
    }

    fn drain_listeners(&self) {
        self.listeners.lock().expect("lock is valid").clear();
    }

    fn last_known_revision(&self) -> Revision {
        self.latest
            .load_full()
            .map(|result| result.revision)
            .unwrap_or(Revision::INIT)
    }

    /// Store a new latest value. Refuses anything that is not strictly
    /// newer than the current value; the server may re-emit a revision.
    fn store_latest(&self, result: &Arc<WatchResult>) -> bool {
        if let Some(current) = self.latest.load_full() {
            if result.revision <= current.revision {
                return false;
            }
        }
        self.latest.store(Some(result.clone()));
        true
    }

    async fn run(self: Arc<Self>) {
        let mut backoff = self.options.backoff();
        let mut attempts: u32 = 0;

        loop {
            if self.is_stopped() || self.token.is_cancelled() {
                break;
            }

            let last_known = self.last_known_revision();
            let started = Instant::now();
            let poll = tokio::select! {
                _ = self.token.cancelled() => break,
                poll = self.source.poll(last_known) => poll,
            };
            self.observe("watch.poll", started.elapsed());

            let delay = match poll {
                Ok(WatchPoll::Modified(result)) => {
                    attempts = 0;
                    self.handle_update(result).await;
                    self.options.delay_on_success
                }
                Ok(WatchPoll::NotModified) => {
                    attempts = 0;
                    self.options.delay_on_success
                }
                Err(err) if err.is_timeout() => {
                    // The server held the connection for the whole wait and
                    // nothing changed; pace like a not-modified response.
                    trace!(
                        "watch poll for {}/{}{} timed out without news",
                        self.project,
                        self.repo,
                        self.path_pattern
                    );
                    attempts = 0;
                    self.options.delay_on_success
                }
                Err(err) => {
                    attempts += 1;
                    self.increment("watch.poll.error");
                    debug!(error = %err, attempts, "watch poll failed");
                    backoff.next_delay(attempts)
                }
            };

            if !self.idle(delay).await {
                break;
            }
        }

        self.finish();
    }

    async fn handle_update(&self, result: WatchResult) {
        let result = Arc::new(result);
        if !self.store_latest(&result) {
            return;
        }
        self.increment("watch.update");
        self.publish_initial(InitialValue::Value(result.clone()));
        debug!(
            "watcher noticed updated entry: {}/{}{}, rev={}",
            self.project, self.repo, self.path_pattern, result.revision
        );
        self.notify_listeners(&result).await;
    }

    async fn notify_listeners(&self, result: &Arc<WatchResult>) {
        if self.is_stopped() {
            return;
        }

        let targets: Vec<mpsc::Sender<Arc<WatchResult>>> = {
            let mut listeners = self.listeners.lock().expect("lock is valid");
            listeners.retain(|listener| !listener.tx.is_closed());
            listeners
                .iter_mut()
                .filter_map(|listener| match listener.last_sent {
                    Some(sent) if result.revision <= sent => None,
                    _ => {
                        listener.last_sent = Some(result.revision);
                        Some(listener.tx.clone())
                    }
                })
                .collect()
        };

        for tx in targets {
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tx.send(result.clone()) => {}
            }
        }
    }

    async fn idle(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.token.is_cancelled();
        }
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn finish(&self) {
        self.state.store(STATE_STOPPED, Ordering::Release);
        self.publish_initial(InitialValue::Closed);
        self.drain_listeners();
    }

    fn increment(&self, counter: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.increment(counter);
        }
    }

    fn observe(&self, name: &str, elapsed: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.observe(name, elapsed);
        }
    }
}

async fn deliver<F>(
    token: CancellationToken,
    mut rx: mpsc::Receiver<Arc<WatchResult>>,
    listener: F,
) where
    F: Fn(Arc<WatchResult>) + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            next = rx.recv() => match next {
                Some(result) => listener(result),
                None => return,
            }
        }
    }
}
