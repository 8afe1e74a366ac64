use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use futures_util::StreamExt;
use log::{debug, info};
use reqwest::{Client, Proxy};
use tokio::io::AsyncWriteExt;

use crate::error::{FetchError, FetchResult};
use crate::release::AssetDescriptor;

/// Callback type for reporting download progress.
/// Arguments: source URL, bytes downloaded, total bytes (0 if unknown), is_complete
pub type ProgressFn = Arc<dyn Fn(&str, u64, u64, bool) + Send + Sync>;

/// Build the HTTP client shared by the resolver and the fetcher.
///
/// No request timeout is set; transport defaults apply.
pub fn build_client(proxy: Option<&str>) -> Result<Client, reqwest::Error> {
    let mut builder =
        Client::builder().user_agent(concat!("jorik-installer/", env!("CARGO_PKG_VERSION")));
    if let Some(proxy_url) = proxy {
        builder = builder.proxy(Proxy::all(proxy_url)?);
    }
    builder.build()
}

/// Scratch directory owning every temporary file of one run.
///
/// Dropping it removes the directory, on success, on error and when the
/// owning future is cancelled.
pub struct ScratchWorkspace {
    dir: tempfile::TempDir,
}

impl ScratchWorkspace {
    /// Create a workspace in the system temp dir, or under `parent` if given.
    pub fn create(parent: Option<&Path>) -> FetchResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("jorik-install-");
        let dir = match parent {
            Some(parent) => builder
                .tempdir_in(parent)
                .map_err(|e| FetchError::io(parent, e))?,
            None => builder
                .tempdir()
                .map_err(|e| FetchError::io(std::env::temp_dir(), e))?,
        };
        debug!("scratch workspace at {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn unpack_dir(&self) -> PathBuf {
        self.dir.path().join("unpacked")
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        // Read-only directories from an archive would keep `TempDir` from
        // deleting their children.
        #[cfg(unix)]
        make_dirs_writable(self.dir.path());
    }
}

#[cfg(unix)]
fn make_dirs_writable(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            continue;
        };
        if meta.is_dir() {
            let mode = meta.permissions().mode();
            if mode & 0o700 != 0o700 {
                let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode | 0o700));
            }
            make_dirs_writable(&path);
        }
    }
}

/// Downloads release assets and unpacks them into a scratch workspace.
pub struct Downloader {
    client: Client,
    /// Optional progress callback.
    pub progress: Option<ProgressFn>,
}

impl Downloader {
    pub fn new(client: Client, progress: Option<ProgressFn>) -> Self {
        Self { client, progress }
    }

    /// Download `asset`, unpack it, and return the path of `entry_name` at the
    /// archive root.
    pub async fn fetch(
        &self,
        asset: &AssetDescriptor,
        workspace: &ScratchWorkspace,
        entry_name: &str,
    ) -> FetchResult<PathBuf> {
        let archive = workspace.path().join(archive_file_name(&asset.name));
        self.download_to_file(&asset.download_url, &archive).await?;

        let dest = workspace.unpack_dir();
        extract_tar_gz(&archive, &dest).map_err(|reason| FetchError::Packaging {
            asset: asset.name.clone(),
            reason,
        })?;

        locate_entry(&dest, entry_name).map_err(|reason| FetchError::Packaging {
            asset: asset.name.clone(),
            reason,
        })
    }

    /// Stream `url` into `dest`, reporting progress.
    async fn download_to_file(&self, url: &str, dest: &Path) -> FetchResult<()> {
        let failed = |reason: String| FetchError::Download {
            url: url.to_owned(),
            reason,
        };

        info!("downloading {url}");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(failed(format!("server returned {}", resp.status())));
        }

        let total = resp.content_length().unwrap_or(0);
        let mut downloaded: u64 = 0;
        let mut stream = resp.bytes_stream();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| FetchError::io(dest, e))?;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            downloaded += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(dest, e))?;

            if let Some(progress) = &self.progress {
                progress(url, downloaded, total, false);
            }
        }
        file.flush().await.map_err(|e| FetchError::io(dest, e))?;

        if let Some(progress) = &self.progress {
            progress(url, downloaded, total, true);
        }
        debug!("wrote {downloaded} bytes to {}", dest.display());
        Ok(())
    }
}

/// Asset names come from the host; keep only the final path component.
fn archive_file_name(asset_name: &str) -> &str {
    asset_name
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty() && *s != "..")
        .unwrap_or("asset.tar.gz")
}

/// Unpack a `.tar.gz` archive into `dest`.
///
/// `tar::Archive::unpack` refuses entries that would escape `dest`. Modes are
/// not preserved; the installer sets them on the final binary.
fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<(), String> {
    let file = File::open(archive).map_err(|e| format!("cannot open archive: {e}"))?;
    std::fs::create_dir_all(dest).map_err(|e| format!("cannot create {}: {e}", dest.display()))?;

    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.unpack(dest)
        .map_err(|e| format!("not a valid gzip-compressed tar archive: {e}"))
}

/// The entry point must be a regular file directly under the unpack root.
fn locate_entry(unpacked: &Path, entry_name: &str) -> Result<PathBuf, String> {
    let candidate = unpacked.join(entry_name);
    match std::fs::symlink_metadata(&candidate) {
        Ok(meta) if meta.is_file() => Ok(candidate),
        Ok(_) => Err(format!("`{entry_name}` at the archive root is not a regular file")),
        Err(_) => {
            let found: Vec<String> = std::fs::read_dir(unpacked)
                .map(|rd| {
                    rd.filter_map(|e| e.ok())
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            Err(format!(
                "expected `{entry_name}` at the archive root, found [{}]",
                found.join(", ")
            ))
        }
    }
}
