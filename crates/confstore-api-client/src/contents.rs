use reqwest::Method;
use serde::Serialize;
use url::Url;

use confstore_api::{
    Change, Commit, CommitMessage, Entry, PushResult, Query, QueryType, Revision,
};

use crate::{Client, Error, Result, DEFAULT_PATH_PREFIX};

/// Ensure a file path starts with a slash so it slots into the request URL.
pub(crate) fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Rewrite a repository path pattern into its canonical, URL-embeddable
/// form: empty matches everything, a bare pattern matches at any depth.
pub(crate) fn normalize_path_pattern(pattern: &str) -> String {
    if pattern.is_empty() {
        "/**".to_string()
    } else if pattern.starts_with("**") {
        format!("/{pattern}")
    } else if !pattern.starts_with('/') {
        format!("/**/{pattern}")
    } else {
        pattern.to_string()
    }
}

fn normalize_list_pattern(pattern: &str) -> String {
    if !pattern.is_empty() && !pattern.starts_with('/') {
        format!("/**/{pattern}")
    } else {
        pattern.to_string()
    }
}

pub(crate) fn append_json_paths(url: &mut Url, query: &Query) {
    if query.kind == QueryType::JsonPath {
        for expression in &query.expressions {
            url.query_pairs_mut().append_pair("jsonpath", expression);
        }
    }
}

fn append_revision(url: &mut Url, revision: Option<Revision>) {
    if let Some(revision) = revision {
        url.query_pairs_mut()
            .append_pair("revision", &revision.to_string());
    }
}

fn append_from_to(url: &mut Url, from: Option<Revision>, to: Option<Revision>) {
    if let Some(from) = from {
        url.query_pairs_mut().append_pair("from", &from.to_string());
    }
    if let Some(to) = to {
        url.query_pairs_mut().append_pair("to", &to.to_string());
    }
}

#[derive(Serialize)]
struct Push<'a> {
    #[serde(rename = "commitMessage")]
    commit_message: &'a CommitMessage,
    changes: &'a [Change],
}

impl Client {
    /// List the entries matching the given path pattern at a revision.
    pub async fn list_files(
        &self,
        project: &str,
        repo: &str,
        revision: Option<Revision>,
        path_pattern: &str,
    ) -> Result<Vec<Entry>> {
        let pattern = normalize_list_pattern(path_pattern);
        let mut url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{repo}/list{pattern}"
        ))?;
        append_revision(&mut url, revision);
        self.send_json(self.request(Method::GET, url)).await
    }

    /// Fetch the entry the query selects at a revision.
    pub async fn get_file(
        &self,
        project: &str,
        repo: &str,
        revision: Option<Revision>,
        query: &Query,
    ) -> Result<Entry> {
        query.validate()?;
        let path = normalize_path(&query.path);
        let mut url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{repo}/contents{path}"
        ))?;
        append_json_paths(&mut url, query);
        append_revision(&mut url, revision);
        self.send_json(self.request(Method::GET, url)).await
    }

    /// Fetch every entry matching the given path pattern at a revision.
    pub async fn get_files(
        &self,
        project: &str,
        repo: &str,
        revision: Option<Revision>,
        path_pattern: &str,
    ) -> Result<Vec<Entry>> {
        let pattern = normalize_list_pattern(path_pattern);
        let mut url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{repo}/contents{pattern}"
        ))?;
        append_revision(&mut url, revision);
        self.send_json(self.request(Method::GET, url)).await
    }

    /// The commit history of the files matching the path pattern, from one
    /// revision to another. Omitted bounds default to the full history up
    /// to the head.
    pub async fn get_history(
        &self,
        project: &str,
        repo: &str,
        from: Option<Revision>,
        to: Option<Revision>,
        path_pattern: &str,
        max_commits: Option<u32>,
    ) -> Result<Vec<Commit>> {
        let from = from.map(|r| r.to_string()).unwrap_or_default();
        let mut url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{repo}/commits/{from}"
        ))?;
        if !path_pattern.is_empty() {
            url.query_pairs_mut().append_pair("path", path_pattern);
        }
        if let Some(to) = to {
            url.query_pairs_mut().append_pair("to", &to.to_string());
        }
        if let Some(max_commits) = max_commits {
            url.query_pairs_mut()
                .append_pair("maxCommits", &max_commits.to_string());
        }
        self.send_json(self.request(Method::GET, url)).await
    }

    /// The diff of the file the query selects between two revisions.
    pub async fn get_diff(
        &self,
        project: &str,
        repo: &str,
        from: Option<Revision>,
        to: Option<Revision>,
        query: &Query,
    ) -> Result<Change> {
        query.validate()?;
        let path = normalize_path(&query.path);
        let mut url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{repo}/compare"
        ))?;
        url.query_pairs_mut().append_pair("path", &path);
        append_json_paths(&mut url, query);
        append_from_to(&mut url, from, to);
        self.send_json(self.request(Method::GET, url)).await
    }

    /// The diffs of the files matching the path pattern between two
    /// revisions.
    pub async fn get_diffs(
        &self,
        project: &str,
        repo: &str,
        from: Option<Revision>,
        to: Option<Revision>,
        path_pattern: &str,
    ) -> Result<Vec<Change>> {
        let pattern = if path_pattern.is_empty() {
            "/**"
        } else {
            path_pattern
        };
        let mut url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{repo}/compare"
        ))?;
        url.query_pairs_mut().append_pair("pathPattern", pattern);
        append_from_to(&mut url, from, to);
        self.send_json(self.request(Method::GET, url)).await
    }

    /// Push the changes as one commit on top of the base revision.
    #[tracing::instrument(skip_all)]
    pub async fn push(
        &self,
        project: &str,
        repo: &str,
        base_revision: Option<Revision>,
        commit_message: &CommitMessage,
        changes: &[Change],
    ) -> Result<PushResult> {
        if commit_message.summary.is_empty() {
            return Err(Error::EmptyCommitSummary);
        }
        if changes.is_empty() {
            return Err(Error::NoChanges);
        }

        let mut url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{repo}/contents"
        ))?;
        append_revision(&mut url, base_revision);
        let body = Push {
            commit_message,
            changes,
        };
        self.send_json(self.request(Method::POST, url).json(&body))
            .await
    }
}
