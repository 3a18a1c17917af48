//! GitHub releases REST adapter.
//!
//! Only the calls the publisher needs: look up a release by tag, delete it,
//! create it, and attach assets one at a time.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ReleaseApi;
use crate::error::ForgeError;

/// A release as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub html_url: String,
    /// Hypermedia template, e.g. `https://uploads.github.com/.../assets{?name,label}`
    #[serde(default)]
    pub upload_url: String,
}

/// An uploaded release asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

/// GitHub releases client
pub struct GitHubClient {
    /// REST root, e.g. https://api.github.com
    api_url: String,
    /// owner/name
    repository: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        repository: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            repository: repository.into(),
            token,
            client: reqwest::Client::new(),
        }
    }

    /// `{api}/repos/{owner}/{name}/...`, each segment percent-encoded
    fn repo_url(&self, segments: &[&str]) -> Result<Url, ForgeError> {
        let mut url = Url::parse(&self.api_url)
            .with_context(|| format!("Invalid API URL '{}'", self.api_url))
            .map_err(ForgeError::Tool)?;
        url.path_segments_mut()
            .map_err(|_| ForgeError::Tool(anyhow::anyhow!("API URL '{}' cannot take a path", self.api_url)))?
            .pop_if_empty()
            .push("repos")
            .extend(self.repository.split('/'))
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, concat!("sfmforge/", env!("CARGO_PKG_VERSION")))
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response, ForgeError> {
        req.send()
            .await
            .with_context(|| format!("Failed to reach release endpoint ({})", what))
            .map_err(ForgeError::Tool)
    }
}

/// Upload endpoint for one asset, from the release's `upload_url` template
pub fn asset_upload_url(release: &Release, file_name: &str) -> Result<Url, ForgeError> {
    let base = release
        .upload_url
        .split('{')
        .next()
        .unwrap_or_default();
    let mut url = Url::parse(base)
        .with_context(|| format!("Invalid upload URL '{}'", release.upload_url))
        .map_err(ForgeError::Tool)?;
    url.query_pairs_mut().append_pair("name", file_name);
    Ok(url)
}

/// Turn a non-success response into the matching error
async fn response_error(response: reqwest::Response) -> ForgeError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiMessage>(&body)
        .map(|m| m.message)
        .unwrap_or(body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ForgeError::Auth {
            status: status.as_u16(),
            message,
        },
        _ => ForgeError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

async fn parse_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    what: &str,
) -> Result<T, ForgeError> {
    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to parse {} response", what))
        .map_err(ForgeError::Tool)
}

#[async_trait]
impl ReleaseApi for GitHubClient {
    async fn find_release(&self, tag: &str) -> Result<Option<Release>, ForgeError> {
        let url = self.repo_url(&["releases", "tags", tag])?;
        let response = self
            .send(self.request(reqwest::Method::GET, url), "get release")
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        Ok(Some(parse_json(response, "release").await?))
    }

    async fn delete_release(&self, release: &Release) -> Result<(), ForgeError> {
        let url = self.repo_url(&["releases", &release.id.to_string()])?;
        let response = self
            .send(self.request(reqwest::Method::DELETE, url), "delete release")
            .await?;
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }

        // The tag outlives its release; drop it so the new release re-tags HEAD
        let tag_url = self.repo_url(&["git", "refs", "tags", &release.tag_name])?;
        let response = self
            .send(self.request(reqwest::Method::DELETE, tag_url), "delete tag")
            .await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            debug!(status = %response.status(), tag = %release.tag_name, "tag ref not deleted");
        }

        Ok(())
    }

    async fn create_release(
        &self,
        tag: &str,
        title: &str,
        notes: &str,
    ) -> Result<Release, ForgeError> {
        let url = self.repo_url(&["releases"])?;
        let response = self
            .send(
                self.request(reqwest::Method::POST, url).json(&serde_json::json!({
                    "tag_name": tag,
                    "name": title,
                    "body": notes,
                    "draft": false,
                    "prerelease": false,
                })),
                "create release",
            )
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(ForgeError::Conflict {
                tag: tag.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        parse_json(response, "release").await
    }

    async fn upload_asset(
        &self,
        release: &Release,
        file: &Path,
    ) -> Result<ReleaseAsset, ForgeError> {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ForgeError::Tool(anyhow::anyhow!("Not a file: {}", file.display()))
            })?;
        let url = asset_upload_url(release, &file_name)?;

        let bytes = tokio::fs::read(file).await?;
        debug!(asset = %file_name, bytes = bytes.len(), "uploading");

        let response = self
            .send(
                self.request(reqwest::Method::POST, url)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(bytes),
                "upload asset",
            )
            .await?;
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }
        parse_json(response, "asset").await
    }
}
