//! HTTP client for a confstore server.
//!
//! The client speaks the versioned-content HTTP API: projects and
//! repositories, file contents at a revision, commit history and diffs,
//! pushes, and the single-shot long-poll watch primitives the
//! `confstore-watch` crate builds its subscriptions on.
//!
//! # Basic Usage
//! ```no_run
//! use confstore_api::Query;
//! use confstore_api_client::Client;
//!
//! # async fn run() -> Result<(), confstore_api_client::Error> {
//! let client = Client::builder("http://confstore.example.com:36462")
//!     .token("my-access-token")
//!     .build()
//!     .await?;
//!
//! let projects = client.list_projects().await?;
//! println!("projects: {projects:?}");
//!
//! let entry = client
//!     .get_file("foo", "bar", None, &Query::identity("/a.json"))
//!     .await?;
//! println!("{:?}", entry.content);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use confstore_api::ErrorMessage;

pub use crate::error::{Error, Result};
pub use crate::watch::{WatchPoll, DEFAULT_WATCH_TIMEOUT};

mod contents;
mod error;
mod projects;
mod repositories;
mod watch;

const DEFAULT_BASE_URL: &str = "http://localhost:36462/";
const DEFAULT_SCHEME: &str = "http";
pub(crate) const DEFAULT_PATH_PREFIX: &str = "api/v1/";

const PATH_SECURITY_ENABLED: &str = "security_enabled";
const PATH_LOGIN: &str = "api/v1/login";

/// A client for the confstore server API.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct Client {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    user_agent: String,
}

impl Client {
    /// Create an unauthenticated client against the given base URL.
    ///
    /// The URL may omit the scheme (`http` is assumed) and the trailing
    /// slash; an empty string selects the default local server address.
    pub fn new(base_url: impl AsRef<str>) -> Result<Client> {
        let base_url = normalize_base_url(base_url.as_ref())?;
        let client = reqwest::Client::builder().build().map_err(Error::Reqwest)?;
        Ok(Client {
            client,
            base_url,
            token: None,
            user_agent: build_user_agent(),
        })
    }

    /// Start building a client with authentication and timeouts configured.
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether the server has security enabled. Any non-OK response means
    /// it does not.
    pub async fn security_enabled(&self) -> Result<bool> {
        let url = self.make_url(PATH_SECURITY_ENABLED)?;
        let response = self.request(Method::GET, url).send().await?;
        Ok(response.status() == reqwest::StatusCode::OK)
    }

    pub(crate) fn make_url(&self, endpoint: &str) -> Result<Url> {
        self.base_url.join(endpoint).map_err(|err| Error::InvalidUrl {
            url: format!("{}{}", self.base_url, endpoint),
            err,
        })
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let token = self.token.as_deref().unwrap_or("anonymous");
        self.client
            .request(method, url)
            .header("User-Agent", self.user_agent.clone())
            .header("Authorization", format!("Bearer {token}"))
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = Self::check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }

    pub(crate) async fn send_unit(&self, request: RequestBuilder) -> Result<()> {
        Self::check_status(request.send().await?).await?;
        Ok(())
    }

    async fn check_status(response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::response_error(response).await)
        }
    }

    /// Decode the server's `{message}` error body when there is one,
    /// falling back to a bare status error.
    pub(crate) async fn response_error(response: Response) -> Error {
        let status = response.status().as_u16();
        match response.json::<ErrorMessage>().await {
            Ok(body) => Error::Api {
                status,
                message: body.message,
            },
            Err(_) => Error::Status { status },
        }
    }
}

/// Builds a [`Client`], configuring authentication and timeouts.
pub struct ClientBuilder {
    base_url: String,
    token: Option<String>,
    credentials: Option<(String, String)>,
    timeout: Option<Duration>,
}

impl ClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            credentials: None,
            timeout: None,
        }
    }

    /// Authenticate with a pre-issued access token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Authenticate by logging in with a username and password. The login
    /// exchange happens once, in [`build`](Self::build).
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Default timeout for plain requests. Long-poll watch requests carry
    /// their own envelope and are unaffected.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn build(self) -> Result<Client> {
        let base_url = normalize_base_url(&self.base_url)?;
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(Error::Reqwest)?;

        let token = match (self.token, self.credentials) {
            (Some(token), _) => Some(token),
            (None, Some((username, password))) => {
                Some(login(&client, &base_url, &username, &password).await?)
            }
            (None, None) => None,
        };

        Ok(Client {
            client,
            base_url,
            token,
            user_agent: build_user_agent(),
        })
    }
}

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

async fn login(
    client: &reqwest::Client,
    base_url: &Url,
    username: &str,
    password: &str,
) -> Result<String> {
    let url = base_url.join(PATH_LOGIN).map_err(|err| Error::InvalidUrl {
        url: format!("{base_url}{PATH_LOGIN}"),
        err,
    })?;
    let response = client
        .post(url)
        .form(&[
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ])
        .send()
        .await?;
    let response = Client::check_status(response).await?;
    let token: AccessToken = response.json().await?;
    Ok(token.access_token)
}

fn normalize_base_url(raw: &str) -> Result<Url> {
    if raw.is_empty() {
        return Url::parse(DEFAULT_BASE_URL).map_err(|err| Error::InvalidUrl {
            url: DEFAULT_BASE_URL.to_string(),
            err,
        });
    }

    // Prepend the default scheme so "hostname:port" parses as a host, not
    // as a scheme.
    let mut url = if raw.starts_with("http") {
        raw.to_string()
    } else {
        format!("{DEFAULT_SCHEME}://{raw}")
    };
    if !url.ends_with('/') {
        url.push('/');
    }
    Url::parse(&url).map_err(|err| Error::InvalidUrl { url, err })
}

fn build_user_agent() -> String {
    format!(
        "confstore-client {} {} {}",
        env!("CARGO_PKG_VERSION"),
        env::consts::OS,
        env::consts::ARCH
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn base_url_defaults_when_empty() {
        let url = normalize_base_url("").unwrap();
        assert_eq!(url.as_str(), "http://localhost:36462/");
    }

    #[test]
    fn base_url_gains_scheme_and_trailing_slash() {
        let url = normalize_base_url("confstore.example.com:36462").unwrap();
        assert_eq!(url.as_str(), "http://confstore.example.com:36462/");

        let url = normalize_base_url("https://confstore.example.com").unwrap();
        assert_eq!(url.as_str(), "https://confstore.example.com/");
    }

    #[test]
    fn make_url_joins_relative_endpoints() {
        let client = Client::new("http://localhost:36462").unwrap();
        let url = client
            .make_url("api/v1/projects/foo/repos/bar/contents/a.json")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:36462/api/v1/projects/foo/repos/bar/contents/a.json"
        );
    }
}
