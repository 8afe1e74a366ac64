//! Release resolution against the two supported host API shapes.

use std::future::Future;

use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{FetchError, FetchResult};
use crate::release::{AssetDescriptor, ReleaseDescriptor, LATEST_MARKER};

/// Which release API shape the configured host speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum HostKind {
    /// Single release per query: `releases/latest` or `releases/tags/{tag}`.
    #[default]
    Github,
    /// `releases` returns every release, newest first, prereleases included.
    Forgejo,
}

impl HostKind {
    pub fn default_api_url(self) -> &'static str {
        match self {
            HostKind::Github => "https://api.github.com",
            HostKind::Forgejo => "https://codeberg.org/api/v1",
        }
    }
}

/// A release host that can turn an optional tag into candidate releases.
///
/// The returned releases are in host order; callers pick the first one that
/// carries a compatible asset.
pub trait ReleaseHost {
    fn resolve(
        &self,
        tag: Option<&str>,
    ) -> impl Future<Output = FetchResult<Vec<ReleaseDescriptor>>> + Send;
}

#[derive(Deserialize)]
struct ReleaseResponse {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    assets: Vec<AssetEntry>,
}

#[derive(Deserialize)]
struct AssetEntry {
    name: String,
    browser_download_url: String,
}

impl From<ReleaseResponse> for ReleaseDescriptor {
    fn from(r: ReleaseResponse) -> Self {
        ReleaseDescriptor {
            identifier: r
                .tag_name
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| LATEST_MARKER.to_owned()),
            prerelease: r.prerelease,
            draft: r.draft,
            assets: r
                .assets
                .into_iter()
                .map(|a| AssetDescriptor {
                    name: a.name,
                    download_url: a.browser_download_url,
                })
                .collect(),
        }
    }
}

/// `{api_url}/repos/{owner}/{repo}` plus the credentials used against it.
#[derive(Clone)]
struct RepoEndpoint {
    client: Client,
    base: String,
    token: Option<String>,
}

impl RepoEndpoint {
    fn new(client: Client, api_url: &str, owner: &str, repo: &str, token: Option<String>) -> Self {
        Self {
            client,
            base: format!("{}/repos/{owner}/{repo}", api_url.trim_end_matches('/')),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> FetchResult<T> {
        let url = format!("{}/{path}", self.base);
        let resolution = |reason: String| FetchError::Resolution {
            url: url.clone(),
            reason,
        };

        debug!("GET {url}");
        let mut req = self.client.get(&url).header("Accept", "application/json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| resolution(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(resolution(format!("host returned {status}: {}", body.trim())));
        }

        let text = resp.text().await.map_err(|e| resolution(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| resolution(format!("malformed release JSON: {e}")))
    }

    async fn tagged(&self, tag: &str) -> FetchResult<ReleaseDescriptor> {
        let release: ReleaseResponse = self.get_json(&format!("releases/tags/{tag}")).await?;
        Ok(release.into())
    }
}

/// GitHub-style host.
#[derive(Clone)]
pub struct LatestHost {
    endpoint: RepoEndpoint,
}

impl LatestHost {
    pub fn new(client: Client, api_url: &str, owner: &str, repo: &str, token: Option<String>) -> Self {
        Self {
            endpoint: RepoEndpoint::new(client, api_url, owner, repo, token),
        }
    }
}

impl ReleaseHost for LatestHost {
    async fn resolve(&self, tag: Option<&str>) -> FetchResult<Vec<ReleaseDescriptor>> {
        let release = match tag {
            Some(tag) => self.endpoint.tagged(tag).await?,
            None => self
                .endpoint
                .get_json::<ReleaseResponse>("releases/latest")
                .await?
                .into(),
        };
        Ok(vec![release])
    }
}

/// Page size requested from list hosts; servers may cap it lower.
const LIST_PAGE_SIZE: u32 = 50;

/// The list endpoint is paginated. An empty page marks the end, since a server
/// may return fewer than `limit` items on every page.
fn list_page(page: u32) -> String {
    format!("releases?page={page}&limit={LIST_PAGE_SIZE}")
}

/// Gitea/Forgejo-style host.
#[derive(Clone)]
pub struct ListHost {
    endpoint: RepoEndpoint,
}

impl ListHost {
    pub fn new(client: Client, api_url: &str, owner: &str, repo: &str, token: Option<String>) -> Self {
        Self {
            endpoint: RepoEndpoint::new(client, api_url, owner, repo, token),
        }
    }
}

impl ReleaseHost for ListHost {
    async fn resolve(&self, tag: Option<&str>) -> FetchResult<Vec<ReleaseDescriptor>> {
        if let Some(tag) = tag {
            return Ok(vec![self.endpoint.tagged(tag).await?]);
        }
        let mut releases = Vec::new();
        for page in 1.. {
            let batch: Vec<ReleaseResponse> = self.endpoint.get_json(&list_page(page)).await?;
            if batch.is_empty() {
                break;
            }
            releases.extend(batch.into_iter().map(ReleaseDescriptor::from));
        }
        debug!("host listed {} release(s)", releases.len());
        Ok(releases)
    }
}

/// The configured host, one variant per API shape.
#[derive(Clone)]
pub enum Resolver {
    Latest(LatestHost),
    List(ListHost),
}

impl Resolver {
    pub fn new(
        kind: HostKind,
        client: Client,
        api_url: &str,
        owner: &str,
        repo: &str,
        token: Option<String>,
    ) -> Self {
        match kind {
            HostKind::Github => Resolver::Latest(LatestHost::new(client, api_url, owner, repo, token)),
            HostKind::Forgejo => Resolver::List(ListHost::new(client, api_url, owner, repo, token)),
        }
    }
}

impl ReleaseHost for Resolver {
    async fn resolve(&self, tag: Option<&str>) -> FetchResult<Vec<ReleaseDescriptor>> {
        match self {
            Resolver::Latest(host) => host.resolve(tag).await,
            Resolver::List(host) => host.resolve(tag).await,
        }
    }
}
