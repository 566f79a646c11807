//! HTTP implementation of the repository client.
//!
//! Speaks the repository's REST API:
//! - `GET /api/version` for liveness
//! - `GET|POST|DELETE /api/v1/repo{path}` for namespaces
//! - `POST /api/v1/repo-files{path}/{file}` for file content

use crate::client::{normalize_path, Batch, RepoClient};
use crate::error::{RepoError, RepoResult};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// HTTP repository client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRepoConfig {
    /// Base URL of the repository, e.g. `http://repo.mesh-system:6060`.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpRepoConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:6060".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    base: Option<&'a str>,
}

/// Repository client backed by the REST API.
pub struct HttpRepoClient {
    config: HttpRepoConfig,
    client: Client,
}

impl HttpRepoClient {
    /// Creates a new client.
    pub fn new(config: HttpRepoConfig) -> RepoResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// Returns the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, route: &str, path: &str) -> String {
        let encoded: Vec<String> = normalize_path(path)
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!(
            "{}{}{}",
            self.config.base_url.trim_end_matches('/'),
            route,
            encoded.join("/")
        )
    }

    async fn commit(&self, path: &str, version: &str, base: Option<&str>) -> RepoResult<()> {
        let base = base.map(normalize_path);
        let body = CommitRequest {
            version,
            base: base.as_deref(),
        };
        let response = self
            .client
            .post(self.url("/api/v1/repo", path))
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await
    }

    async fn write_file(&self, path: &str, filename: &str, content: &[u8]) -> RepoResult<()> {
        let file_path = format!("{}/{}", normalize_path(path), filename);
        let response = self
            .client
            .post(self.url("/api/v1/repo-files", &file_path))
            .body(content.to_vec())
            .send()
            .await?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: Response) -> RepoResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(RepoError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RepoClient for HttpRepoClient {
    fn provider_name(&self) -> &'static str {
        "HTTP"
    }

    async fn is_ready(&self) -> RepoResult<bool> {
        let url = format!("{}/api/version", self.config.base_url.trim_end_matches('/'));
        let response = self.client.get(url).send().await?;
        Ok(response.status().is_success())
    }

    async fn namespace_exists(&self, path: &str) -> RepoResult<bool> {
        let response = self
            .client
            .get(self.url("/api/v1/repo", path))
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => ensure_success(response).await.map(|()| false),
        }
    }

    async fn write_batch(&self, version: &str, batches: &[Batch]) -> RepoResult<()> {
        for batch in batches {
            if !self.namespace_exists(&batch.basepath).await? {
                debug!("Creating namespace {} at version {}", batch.basepath, version);
                self.commit(&batch.basepath, version, None).await?;
            }
            for item in &batch.items {
                self.write_file(&batch.basepath, &item.filename, &item.content)
                    .await?;
            }
            self.commit(&batch.basepath, version, None).await?;
            debug!(
                "Committed {} file(s) to {} at version {}",
                batch.items.len(),
                batch.basepath,
                version
            );
        }
        Ok(())
    }

    async fn derive_namespace(&self, path: &str, base: &str, version: &str) -> RepoResult<()> {
        self.commit(path, version, Some(base)).await?;
        info!("Derived namespace {} from {} at version {}", path, base, version);
        Ok(())
    }

    async fn delete_namespace(&self, path: &str) -> RepoResult<()> {
        let response = self
            .client
            .delete(self.url("/api/v1/repo", path))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await
    }
}
