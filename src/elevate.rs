//! Privileged fallback for file operations the current user cannot perform.
//!
//! Elevation is only attempted after a direct attempt failed with a
//! permission-denied error, and only once.

use std::future::Future;
use std::path::Path;

use log::info;

use crate::error::{FetchError, FetchResult};

/// Performs file operations with elevated privileges.
pub trait Elevate {
    /// Copy `src` to `dest`, creating the parent directory and marking the
    /// result executable.
    fn copy(&self, src: &Path, dest: &Path) -> impl Future<Output = FetchResult<()>> + Send;

    fn remove(&self, path: &Path) -> impl Future<Output = FetchResult<()>> + Send;
}

/// Uses the platform's consent-gated mechanism: `sudo` on Unix, the UAC
/// `runas` verb on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemElevator;

fn denied(path: &Path, reason: impl Into<String>) -> FetchError {
    FetchError::Permission {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

#[cfg(unix)]
impl SystemElevator {
    async fn sudo(&self, target: &Path, script: &str, args: &[&Path]) -> FetchResult<()> {
        let sudo = which::which("sudo")
            .map_err(|_| denied(target, "not writable and `sudo` is not available"))?;

        info!("{} requires elevated privileges, invoking sudo", target.display());
        let status = shell_command(&sudo, script, args)
            .status()
            .await
            .map_err(|e| denied(target, format!("failed to run sudo: {e}")))?;

        if !status.success() {
            return Err(denied(
                target,
                format!(
                    "elevation declined or failed (exit code {})",
                    status.code().unwrap_or(-1)
                ),
            ));
        }
        Ok(())
    }
}

/// `<launcher> sh -c <script> sh <args..>`, killed if the run is abandoned.
#[cfg(unix)]
fn shell_command(launcher: &Path, script: &str, args: &[&Path]) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(launcher);
    command
        .arg("sh")
        .arg("-c")
        .arg(script)
        .arg("sh")
        .args(args)
        .kill_on_drop(true);
    command
}

#[cfg(unix)]
impl Elevate for SystemElevator {
    async fn copy(&self, src: &Path, dest: &Path) -> FetchResult<()> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("/"));
        self.sudo(
            dest,
            r#"mkdir -p "$1" && cp -f "$2" "$3" && chmod 755 "$3""#,
            &[parent, src, dest],
        )
        .await
    }

    async fn remove(&self, path: &Path) -> FetchResult<()> {
        self.sudo(path, r#"rm -f "$1""#, &[path]).await
    }
}

#[cfg(windows)]
impl SystemElevator {
    async fn runas_cmd(&self, target: &Path, command: String) -> FetchResult<()> {
        info!("{} requires elevated privileges, requesting consent", target.display());
        let params = format!("/D /S /C \"{command}\"");
        let result = tokio::task::spawn_blocking(move || shell::run_elevated("cmd.exe", &params))
            .await
            .map_err(|e| denied(target, format!("elevation task failed: {e}")))?;

        match result {
            Ok(0) => Ok(()),
            Ok(code) => Err(denied(target, format!("elevated command exited with {code}"))),
            Err(reason) => Err(denied(target, reason)),
        }
    }
}

#[cfg(windows)]
impl Elevate for SystemElevator {
    async fn copy(&self, src: &Path, dest: &Path) -> FetchResult<()> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("C:\\"));
        let command = format!(
            "(if not exist \"{dir}\" mkdir \"{dir}\") && copy /Y \"{src}\" \"{dest}\" >NUL",
            dir = parent.display(),
            src = src.display(),
            dest = dest.display(),
        );
        self.runas_cmd(dest, command).await
    }

    async fn remove(&self, path: &Path) -> FetchResult<()> {
        let command = format!("del /F /Q \"{}\"", path.display());
        self.runas_cmd(path, command).await
    }
}

#[cfg(windows)]
mod shell {
    use windows::core::{w, HSTRING, PCWSTR};
    use windows::Win32::Foundation::{CloseHandle, ERROR_CANCELLED};
    use windows::Win32::System::Threading::{GetExitCodeProcess, WaitForSingleObject, INFINITE};
    use windows::Win32::UI::Shell::{ShellExecuteExW, SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW};
    use windows::Win32::UI::WindowsAndMessaging::SW_HIDE;

    /// Run `program` through the UAC prompt and wait for it, returning its exit code.
    pub(super) fn run_elevated(program: &str, params: &str) -> Result<u32, String> {
        let file = HSTRING::from(program);
        let params = HSTRING::from(params);
        let mut info = SHELLEXECUTEINFOW {
            cbSize: std::mem::size_of::<SHELLEXECUTEINFOW>() as u32,
            fMask: SEE_MASK_NOCLOSEPROCESS,
            lpVerb: w!("runas"),
            lpFile: PCWSTR(file.as_ptr()),
            lpParameters: PCWSTR(params.as_ptr()),
            nShow: SW_HIDE.0,
            ..Default::default()
        };

        unsafe { ShellExecuteExW(&mut info) }.map_err(|e| {
            if e.code() == ERROR_CANCELLED.to_hresult() {
                "elevation was declined".to_owned()
            } else {
                format!("elevation failed: {e}")
            }
        })?;

        if info.hProcess.is_invalid() {
            return Err("elevated process handle unavailable".to_owned());
        }

        let mut code = 0u32;
        let waited = unsafe {
            WaitForSingleObject(info.hProcess, INFINITE);
            let res = GetExitCodeProcess(info.hProcess, &mut code);
            let _ = CloseHandle(info.hProcess);
            res
        };
        waited.map_err(|e| format!("cannot read elevated exit code: {e}"))?;
        Ok(code)
    }
}
