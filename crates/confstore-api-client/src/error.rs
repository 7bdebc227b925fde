use std::time::Duration;

use confstore_api::QueryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("error making HTTP request: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("error parsing '{url}' as URL: {err}")]
    InvalidUrl { url: String, err: url::ParseError },
    #[error("{message} (status: {status})")]
    Api { status: u16, message: String },
    #[error("unexpected status: {status}")]
    Status { status: u16 },
    #[error("watch request timeout: {} second(s)", .timeout.as_secs_f64())]
    WatchTimeout { timeout: Duration },
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("summary of the commit message must not be empty")]
    EmptyCommitSummary,
    #[error("no changes to push")]
    NoChanges,
}

impl Error {
    /// Whether this error is the expiry of a long-poll request envelope.
    /// The poll loop paces these like a not-modified response instead of
    /// backing off.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::WatchTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
