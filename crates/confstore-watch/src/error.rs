use std::time::Duration;

use confstore_api::QueryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    /// No successful poll has stored a value yet.
    #[error("latest value is not set yet")]
    LatestNotSet,
    /// The watcher has been closed, by its owner or by parent
    /// cancellation.
    #[error("watcher is closed")]
    WatcherClosed,
    #[error("failed to get the initial value within {0:?}")]
    InitialValueTimeout(Duration),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Api(#[from] confstore_api_client::Error),
}
