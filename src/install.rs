use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::elevate::Elevate;
use crate::error::{FetchError, FetchResult};

/// Where the entry point ends up and what it is called inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub destination: PathBuf,
    pub entry_name: String,
}

impl InstallTarget {
    /// Validate and build a target. `destination` must be absolute and
    /// `entry_name` a bare file name.
    pub fn new(destination: impl Into<PathBuf>, entry_name: &str) -> FetchResult<Self> {
        let destination = destination.into();
        if !destination.is_absolute() {
            return Err(FetchError::Config(format!(
                "install path must be absolute: {}",
                destination.display()
            )));
        }
        if destination.file_name().is_none() {
            return Err(FetchError::Config(format!(
                "install path has no file name: {}",
                destination.display()
            )));
        }
        if entry_name.is_empty()
            || entry_name.contains(['/', '\\'])
            || entry_name == "."
            || entry_name == ".."
        {
            return Err(FetchError::Config(format!(
                "binary name must be a plain file name: `{entry_name}`"
            )));
        }
        Ok(Self {
            destination,
            entry_name: entry_name.to_owned(),
        })
    }

    /// Directory holding the installed binary.
    pub fn directory(&self) -> &Path {
        self.destination.parent().unwrap_or_else(|| Path::new("/"))
    }
}

/// What happened during [`Installer::install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub destination: PathBuf,
    /// `true` when the direct copy was refused and the elevated path was used.
    pub elevated: bool,
    /// First line of `<binary> --version`, if it could be run.
    pub reported_version: Option<String>,
}

/// Copies the unpacked entry point into place.
pub struct Installer<E> {
    elevator: E,
}

impl<E: Elevate> Installer<E> {
    pub fn new(elevator: E) -> Self {
        Self { elevator }
    }

    /// Install `entry` at `target.destination`, overwriting whatever is there.
    ///
    /// A permission-denied error from the direct attempt triggers exactly one
    /// elevated attempt. Verification failures are logged only; the install is
    /// already committed at that point.
    pub async fn install(&self, entry: &Path, target: &InstallTarget) -> FetchResult<InstallOutcome> {
        let dest = &target.destination;
        let elevated = match copy_into_place(entry, dest) {
            Ok(()) => false,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!("cannot write {} directly: {e}", dest.display());
                self.elevator.copy(entry, dest).await?;
                true
            }
            Err(e) => return Err(FetchError::io(dest, e)),
        };
        info!("installed {}", dest.display());

        let reported_version = verify(dest).await;
        Ok(InstallOutcome {
            destination: dest.clone(),
            elevated,
            reported_version,
        })
    }

    /// Delete an installed binary, elevating on permission denial.
    /// A missing file is not an error.
    pub async fn remove(&self, path: &Path) -> FetchResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!("cannot remove {} directly: {e}", path.display());
                self.elevator.remove(path).await
            }
            Err(e) => Err(FetchError::io(path, e)),
        }
    }
}

/// Copy to a staging file beside `dest`, then rename over it.
///
/// The rename replaces a running binary on Unix without `ETXTBSY`.
fn copy_into_place(src: &Path, dest: &Path) -> io::Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{file_name}.partial"));

    let result = stage_and_rename(src, &staging, dest);
    if result.is_err() {
        let _ = std::fs::remove_file(&staging);
    }
    result
}

fn stage_and_rename(src: &Path, staging: &Path, dest: &Path) -> io::Result<()> {
    std::fs::copy(src, staging)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(staging, std::fs::Permissions::from_mode(0o755))?;
    }
    std::fs::rename(staging, dest)
}

/// Run `<binary> --version` and return the first non-empty output line.
async fn verify(binary: &Path) -> Option<String> {
    let output = match tokio::process::Command::new(binary).arg("--version").output().await {
        Ok(output) => output,
        Err(e) => {
            warn!("installed binary {} could not be executed: {e}", binary.display());
            return None;
        }
    };
    if !output.status.success() {
        warn!(
            "`{} --version` exited with {}",
            binary.display(),
            output.status
        );
        return None;
    }
    let version = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_owned);
    match &version {
        Some(v) => info!("installed binary reports: {v}"),
        None => warn!("`{} --version` printed nothing", binary.display()),
    }
    version
}

// ──────────────────────────────────────────────────────────────────────────────
// Install receipt
// ──────────────────────────────────────────────────────────────────────────────

/// Record of the last successful install, stored as `receipt.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct InstallReceipt {
    /// `owner/repo` the binary came from.
    pub repo: String,
    pub tag: String,
    pub asset: String,
    pub destination: PathBuf,
    /// Directory this tool appended to the user's search path, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_entry: Option<String>,
    /// Seconds since the Unix epoch.
    pub installed_at: u64,
}

/// Reads and writes the receipt in a state directory.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    dir: PathBuf,
}

impl ReceiptStore {
    const FILE_NAME: &'static str = "receipt.json";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<local data dir>/jorik-installer`, when the platform has one.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join("jorik-installer"))
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(Self::FILE_NAME)
    }

    /// Read back the stored receipt; `None` when nothing was installed.
    pub fn load(&self) -> FetchResult<Option<InstallReceipt>> {
        let path = self.path();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FetchError::io(path, e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| FetchError::State(format!("error parsing {}: {e}", path.display())))
    }

    /// Write (or overwrite) the receipt.
    pub fn save(&self, receipt: &InstallReceipt) -> FetchResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| FetchError::io(&self.dir, e))?;
        let json = serde_json::to_string_pretty(receipt)
            .map_err(|e| FetchError::State(format!("error serializing receipt: {e}")))?;
        let path = self.path();
        std::fs::write(&path, json).map_err(|e| FetchError::io(path, e))
    }

    pub fn clear(&self) -> FetchResult<()> {
        let path = self.path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FetchError::io(path, e)),
        }
    }
}
