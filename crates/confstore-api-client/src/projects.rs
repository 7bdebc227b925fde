use std::collections::HashMap;

use reqwest::Method;

use confstore_api::Project;

use crate::{Client, Result, DEFAULT_PATH_PREFIX};

/// The json-patch body that flips a removed resource back to active.
pub(crate) const UNREMOVE_PATCH: &str = r#"[{"op":"replace","path":"/status","value":"active"}]"#;
pub(crate) const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

impl Client {
    pub async fn create_project(&self, name: &str) -> Result<Project> {
        let url = self.make_url(&format!("{DEFAULT_PATH_PREFIX}projects"))?;
        let body: HashMap<&str, &str> = HashMap::from([("name", name)]);
        self.send_json(self.request(Method::POST, url).json(&body))
            .await
    }

    /// Remove a project. A removed project can be restored with
    /// [`unremove_project`](Self::unremove_project).
    pub async fn remove_project(&self, name: &str) -> Result<()> {
        let url = self.make_url(&format!("{DEFAULT_PATH_PREFIX}projects/{name}"))?;
        self.send_unit(self.request(Method::DELETE, url)).await
    }

    /// Permanently delete a removed project.
    pub async fn purge_project(&self, name: &str) -> Result<()> {
        let url = self.make_url(&format!("{DEFAULT_PATH_PREFIX}projects/{name}/removed"))?;
        self.send_unit(self.request(Method::DELETE, url)).await
    }

    pub async fn unremove_project(&self, name: &str) -> Result<Project> {
        let url = self.make_url(&format!("{DEFAULT_PATH_PREFIX}projects/{name}"))?;
        let request = self
            .request(Method::PATCH, url)
            .header("Content-Type", JSON_PATCH_CONTENT_TYPE)
            .body(UNREMOVE_PATCH);
        self.send_json(request).await
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let url = self.make_url(&format!("{DEFAULT_PATH_PREFIX}projects"))?;
        self.send_json(self.request(Method::GET, url)).await
    }

    pub async fn list_removed_projects(&self) -> Result<Vec<Project>> {
        let url = self.make_url(&format!("{DEFAULT_PATH_PREFIX}projects?status=removed"))?;
        self.send_json(self.request(Method::GET, url)).await
    }
}
