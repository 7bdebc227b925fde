use std::collections::HashMap;

use reqwest::Method;
use serde::Deserialize;

use confstore_api::{Repository, Revision};

use crate::projects::{JSON_PATCH_CONTENT_TYPE, UNREMOVE_PATCH};
use crate::{Client, Result, DEFAULT_PATH_PREFIX};

#[derive(Deserialize)]
struct NormalizedRevision {
    revision: Revision,
}

impl Client {
    pub async fn create_repository(&self, project: &str, name: &str) -> Result<Repository> {
        let url = self.make_url(&format!("{DEFAULT_PATH_PREFIX}projects/{project}/repos"))?;
        let body: HashMap<&str, &str> = HashMap::from([("name", name)]);
        self.send_json(self.request(Method::POST, url).json(&body))
            .await
    }

    /// Remove a repository. A removed repository can be restored with
    /// [`unremove_repository`](Self::unremove_repository).
    pub async fn remove_repository(&self, project: &str, name: &str) -> Result<()> {
        let url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{name}"
        ))?;
        self.send_unit(self.request(Method::DELETE, url)).await
    }

    pub async fn unremove_repository(&self, project: &str, name: &str) -> Result<Repository> {
        let url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{name}"
        ))?;
        let request = self
            .request(Method::PATCH, url)
            .header("Content-Type", JSON_PATCH_CONTENT_TYPE)
            .body(UNREMOVE_PATCH);
        self.send_json(request).await
    }

    pub async fn list_repositories(&self, project: &str) -> Result<Vec<Repository>> {
        let url = self.make_url(&format!("{DEFAULT_PATH_PREFIX}projects/{project}/repos"))?;
        self.send_json(self.request(Method::GET, url)).await
    }

    pub async fn list_removed_repositories(&self, project: &str) -> Result<Vec<Repository>> {
        let url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos?status=removed"
        ))?;
        self.send_json(self.request(Method::GET, url)).await
    }

    /// Resolve a relative revision (e.g. `-1`) to its absolute value.
    pub async fn normalize_revision(
        &self,
        project: &str,
        repo: &str,
        revision: Revision,
    ) -> Result<Revision> {
        let url = self.make_url(&format!(
            "{DEFAULT_PATH_PREFIX}projects/{project}/repos/{repo}/revision/{revision}"
        ))?;
        let normalized: NormalizedRevision = self.send_json(self.request(Method::GET, url)).await?;
        Ok(normalized.revision)
    }
}
