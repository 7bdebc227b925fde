//! Wire types for the confstore HTTP API, shared by the client, the watch
//! subsystem and the mock server.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A revision tag on repository state.
///
/// Revisions are monotonically increasing integers starting at `1`. Negative
/// values are relative to the repository head (`-1` is the head itself) and
/// are normalized by the server; clients only ever store absolute revisions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Revision(pub i64);

impl Revision {
    /// The first revision of any repository.
    pub const INIT: Revision = Revision(1);
    /// The head revision, relative form.
    pub const HEAD: Revision = Revision(-1);

    pub fn is_relative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Revision {
    fn from(value: i64) -> Self {
        Revision(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("the extension of the file should be json (path: {0})")]
    NotJsonPath(String),
    #[error("the path of the query must not be empty")]
    EmptyPath,
}

/// How a file query is evaluated by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    /// Retrieve the content as it is.
    Identity,
    /// Apply a series of JSON path expressions to the content.
    JsonPath,
}

/// A query on a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub path: String,
    pub kind: QueryType,
    /// JSON path expressions, applied in order. Ignored for
    /// [`QueryType::Identity`].
    pub expressions: Vec<String>,
}

impl Query {
    /// A query that returns the file content unchanged.
    pub fn identity(path: impl Into<String>) -> Query {
        Query {
            path: path.into(),
            kind: QueryType::Identity,
            expressions: Vec::new(),
        }
    }

    /// A query that narrows a JSON file through the given JSON path
    /// expressions. The path must end in `json` (case-insensitively).
    pub fn of_json_path(
        path: impl Into<String>,
        expressions: Vec<String>,
    ) -> Result<Query, QueryError> {
        let query = Query {
            path: path.into(),
            kind: QueryType::JsonPath,
            expressions,
        };
        query.validate()?;
        Ok(query)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.path.is_empty() {
            return Err(QueryError::EmptyPath);
        }
        if self.kind == QueryType::JsonPath && !self.path.to_ascii_lowercase().ends_with("json") {
            return Err(QueryError::NotJsonPath(self.path.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Json,
    Text,
    Directory,
}

/// The raw content of an entry.
///
/// On the wire, JSON entries carry a normalized JSON document and text
/// entries carry a JSON string; both are kept here as their literal bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntryContent(Vec<u8>);

impl EntryContent {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        EntryContent(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reparse the content as a JSON value.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }
}

impl AsRef<[u8]> for EntryContent {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for EntryContent {
    fn from(value: &str) -> Self {
        EntryContent(value.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for EntryContent {
    fn from(value: Vec<u8>) -> Self {
        EntryContent(value)
    }
}

impl Serialize for EntryContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match serde_json::from_slice::<serde_json::Value>(&self.0) {
            Ok(value) => value.serialize(serializer),
            Err(_) => serializer.serialize_str(&String::from_utf8_lossy(&self.0)),
        }
    }
}

impl<'de> Deserialize<'de> for EntryContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::String(s) => EntryContent(s.into_bytes()),
            serde_json::Value::Null => EntryContent::default(),
            other => EntryContent(other.to_string().into_bytes()),
        })
    }
}

/// An entry in a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "EntryContent::is_empty")]
    pub content: EntryContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(
        default,
        rename = "modifiedAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub modified_at: Option<String>,
}

/// The successful payload of a watch poll. Repository watches carry no
/// entry, only the new head revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchResult {
    pub revision: Revision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A project on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A repository within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Author>,
    #[serde(
        default,
        rename = "headRevision",
        skip_serializing_if = "Option::is_none"
    )]
    pub head_revision: Option<Revision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitMessage {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markup: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub revision: Revision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(
        default,
        rename = "commitMessage",
        skip_serializing_if = "Option::is_none"
    )]
    pub commit_message: Option<CommitMessage>,
    #[serde(default, rename = "pushedAt", skip_serializing_if = "Option::is_none")]
    pub pushed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    UpsertJson,
    UpsertText,
    Remove,
    Rename,
    ApplyJsonPatch,
    ApplyTextPatch,
}

/// A change to commit to a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResult {
    pub revision: Revision,
    #[serde(rename = "pushedAt")]
    pub pushed_at: String,
}

/// The error body returned by the server for non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}
