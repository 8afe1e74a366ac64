use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};

use crate::downloader::{build_client, Downloader, ProgressFn, ScratchWorkspace};
use crate::elevate::{Elevate, SystemElevator};
use crate::error::{FetchError, FetchResult};
use crate::install::{InstallOutcome, InstallReceipt, InstallTarget, Installer, ReceiptStore};
use crate::progress::default_progress_fn;
use crate::release::{asset_suffix, select};
use crate::resolver::{HostKind, ReleaseHost, Resolver};
use crate::runtime_dep::DependencyOutcome;

// ──────────────────────────────────────────────────────────────────────────────
// Api
// ──────────────────────────────────────────────────────────────────────────────

/// Top-level entry-point with a chainable builder API.
///
/// # Example
/// ```rust,no_run
/// use jorik_installer::{Api, InstallTarget};
///
/// #[tokio::main]
/// async fn main() -> Result<(), jorik_installer::FetchError> {
///     let target = InstallTarget::new("/usr/local/bin/jorik", "jorik")?;
///     Api::new()
///         .repo("jorik-bot", "jorik-cli")
///         .latest()
///         .install("x86_64-unknown-linux-gnu", &target)
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Api {
    host: HostKind,
    api_url: Option<String>,
    token: Option<String>,
    proxy: Option<String>,
    progress: Option<ProgressFn>,
    scratch_parent: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    #[cfg_attr(not(windows), allow(dead_code))]
    modify_path: bool,
    #[cfg_attr(not(windows), allow(dead_code))]
    assume_yes: bool,
}

impl Api {
    /// Create a new `Api` targeting GitHub, with a progress bar and the
    /// default state directory.
    pub fn new() -> Self {
        Self {
            host: HostKind::default(),
            api_url: None,
            token: None,
            proxy: None,
            progress: Some(default_progress_fn()),
            scratch_parent: None,
            state_dir: ReceiptStore::default_dir(),
            modify_path: true,
            assume_yes: false,
        }
    }

    /// Select the release API shape (builder).
    pub fn set_host(mut self, host: HostKind) -> Self {
        self.host = host;
        self
    }

    /// Override the API base URL; defaults to the host kind's public instance (builder).
    pub fn set_api_url(mut self, url: &str) -> Self {
        self.api_url = Some(url.to_owned());
        self
    }

    /// Bearer token sent to the release API (builder).
    pub fn set_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Set an explicit HTTP/HTTPS proxy URL (builder).
    pub fn set_proxy(mut self, proxy: &str) -> Self {
        self.proxy = Some(proxy.to_owned());
        self
    }

    /// Override the progress callback (builder).
    pub fn set_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Disable progress output (builder).
    pub fn no_progress(mut self) -> Self {
        self.progress = None;
        self
    }

    /// Create scratch workspaces under `dir` instead of the system temp dir (builder).
    pub fn set_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_parent = Some(dir.into());
        self
    }

    /// Directory holding the install receipt (builder).
    pub fn set_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Whether to add the install directory to the user `Path` on Windows (builder).
    pub fn set_modify_path(mut self, modify: bool) -> Self {
        self.modify_path = modify;
        self
    }

    /// Answer yes to the runtime-dependency prompt (builder).
    pub fn set_assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }

    /// Select a repository and return a [`RepoApi`].
    pub fn repo(self, owner: &str, repo: &str) -> RepoApi {
        RepoApi {
            api: self,
            owner: owner.to_owned(),
            repo: repo.to_owned(),
        }
    }

    fn receipts(&self) -> Option<ReceiptStore> {
        self.state_dir.as_ref().map(|dir| ReceiptStore::new(dir.clone()))
    }

    /// Return the receipt of the current install, if any.
    pub fn installed(&self) -> FetchResult<Option<InstallReceipt>> {
        match self.receipts() {
            Some(store) => store.load(),
            None => Ok(None),
        }
    }

    /// Remove the installed binary and undo the search-path change this tool made.
    pub async fn uninstall(&self) -> FetchResult<InstallReceipt> {
        self.uninstall_with(SystemElevator).await
    }

    pub async fn uninstall_with<E: Elevate>(&self, elevator: E) -> FetchResult<InstallReceipt> {
        let store = self
            .receipts()
            .ok_or_else(|| FetchError::State("no state directory available".to_owned()))?;
        let receipt = store
            .load()?
            .ok_or_else(|| FetchError::State("jorik is not installed".to_owned()))?;

        Installer::new(elevator).remove(&receipt.destination).await?;
        info!("removed {}", receipt.destination.display());

        #[cfg(windows)]
        {
            if let Some(entry) = &receipt.path_entry {
                crate::path_env::unregister(entry)?;
            }
        }

        store.clear()?;
        Ok(receipt)
    }
}

impl Default for Api {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// RepoApi
// ──────────────────────────────────────────────────────────────────────────────

/// Intermediate builder after a repository has been specified.
pub struct RepoApi {
    api: Api,
    owner: String,
    repo: String,
}

impl RepoApi {
    /// Target the latest release (on list hosts: the newest one with a matching asset).
    pub fn latest(self) -> VersionApi {
        VersionApi {
            api: self.api,
            owner: self.owner,
            repo: self.repo,
            tag: None,
        }
    }

    /// Target a specific release tag (e.g. `"v0.3.1"`).
    pub fn version(self, tag: &str) -> VersionApi {
        VersionApi {
            api: self.api,
            owner: self.owner,
            repo: self.repo,
            tag: Some(tag.to_owned()),
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// VersionApi
// ──────────────────────────────────────────────────────────────────────────────

/// Summary of a completed install run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub tag: String,
    pub asset: String,
    pub outcome: InstallOutcome,
    /// Search-path entry owned by this tool after the run.
    pub path_entry: Option<String>,
    /// Only set on Windows.
    pub dependency: Option<DependencyOutcome>,
}

/// Intermediate builder after a version strategy has been chosen.
pub struct VersionApi {
    api: Api,
    owner: String,
    repo: String,
    tag: Option<String>,
}

impl VersionApi {
    /// Resolve, download and install the asset built for `target_triple`.
    pub async fn install(self, target_triple: &str, target: &InstallTarget) -> FetchResult<InstallReport> {
        self.install_with(target_triple, target, SystemElevator).await
    }

    /// Like [`VersionApi::install`] with a caller-supplied elevation strategy.
    pub async fn install_with<E: Elevate>(
        self,
        target_triple: &str,
        target: &InstallTarget,
        elevator: E,
    ) -> FetchResult<InstallReport> {
        let client = build_client(self.api.proxy.as_deref())
            .map_err(|e| FetchError::Config(format!("cannot build HTTP client: {e}")))?;

        // Removed on every return path below.
        let workspace = ScratchWorkspace::create(self.api.scratch_parent.as_deref())?;

        let api_url = self
            .api
            .api_url
            .clone()
            .unwrap_or_else(|| self.api.host.default_api_url().to_owned());
        let resolver = Resolver::new(
            self.api.host,
            client.clone(),
            &api_url,
            &self.owner,
            &self.repo,
            self.api.token.clone(),
        );
        let releases = resolver.resolve(self.tag.as_deref()).await?;

        let selection = select(&releases, target_triple).ok_or_else(|| FetchError::NotFound {
            suffix: asset_suffix(target_triple),
            searched: releases.len(),
        })?;
        let tag = selection.release.identifier.clone();
        let asset = selection.asset.clone();
        info!("selected {} from release {tag}", asset.name);

        let downloader = Downloader::new(client.clone(), self.api.progress.clone());
        let entry = downloader.fetch(&asset, &workspace, &target.entry_name).await?;
        let outcome = Installer::new(elevator).install(&entry, target).await?;
        drop(workspace);

        let store = self.api.receipts();
        let previous = match &store {
            Some(store) => store.load().unwrap_or_else(|e| {
                warn!("ignoring unreadable install receipt: {e}");
                None
            }),
            None => None,
        };

        let path_entry = self.register_search_path(target, previous.as_ref());

        if let Some(store) = &store {
            let receipt = InstallReceipt {
                repo: format!("{}/{}", self.owner, self.repo),
                tag: tag.clone(),
                asset: asset.name.clone(),
                destination: target.destination.clone(),
                path_entry: path_entry.clone(),
                installed_at: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
            };
            if let Err(e) = store.save(&receipt) {
                warn!("install succeeded but the receipt could not be written: {e}");
            }
        }

        let dependency = self.check_runtime(client).await;

        Ok(InstallReport {
            tag,
            asset: asset.name,
            outcome,
            path_entry,
            dependency,
        })
    }

    /// Returns the search-path entry this tool owns after the run.
    #[cfg(windows)]
    fn register_search_path(
        &self,
        target: &InstallTarget,
        previous: Option<&InstallReceipt>,
    ) -> Option<String> {
        let dir = target.directory();
        let dir_str = dir.to_string_lossy().into_owned();
        let owned_before = previous
            .and_then(|r| r.path_entry.clone())
            .filter(|e| crate::path_env::contains_entry(e, &dir_str));

        if !self.api.modify_path {
            return owned_before;
        }
        match crate::path_env::register(dir) {
            Ok(true) => Some(dir_str),
            Ok(false) => owned_before,
            Err(e) => {
                warn!("could not add {dir_str} to the user Path: {e}");
                owned_before
            }
        }
    }

    #[cfg(not(windows))]
    fn register_search_path(
        &self,
        target: &InstallTarget,
        _previous: Option<&InstallReceipt>,
    ) -> Option<String> {
        let dir = target.directory();
        if !crate::path_env::on_process_path(dir) {
            warn!("{} is not on your PATH", dir.display());
        }
        None
    }

    #[cfg(windows)]
    async fn check_runtime(&self, client: reqwest::Client) -> Option<DependencyOutcome> {
        use crate::runtime_dep::{AssumeYes, DependencyGuard, PromptConsent, VcRuntimeProbe};

        let outcome = if self.api.assume_yes {
            DependencyGuard::new(VcRuntimeProbe, AssumeYes, client).ensure().await
        } else {
            DependencyGuard::new(VcRuntimeProbe, PromptConsent, client).ensure().await
        };
        Some(outcome)
    }

    #[cfg(not(windows))]
    async fn check_runtime(&self, _client: reqwest::Client) -> Option<DependencyOutcome> {
        None
    }
}
