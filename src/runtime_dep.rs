//! Post-install check for the Visual C++ runtime the Windows build links against.
//!
//! Nothing in here can fail an install: every problem ends up as
//! [`DependencyOutcome::Warning`].

use std::io::Write;

use log::{info, warn};
use reqwest::Client;

/// Installer for the VC++ 2015-2022 x64 redistributable.
pub const VC_REDIST_URL: &str = "https://aka.ms/vs/17/release/vc_redist.x64.exe";
pub const VC_REDIST_ARGS: [&str; 3] = ["/install", "/quiet", "/norestart"];

/// Registry key and value written by the redistributable installer.
pub const VC_RUNTIME_KEY: &str = r"SOFTWARE\Microsoft\VisualStudio\14.0\VC\Runtimes\x64";
pub const VC_RUNTIME_VALUE: &str = "Installed";

/// Detects whether the shared runtime component is installed.
pub trait DependencyProbe {
    fn is_present(&self) -> bool;
}

/// Asks the operator for permission to install the runtime.
pub trait Consent {
    fn confirm(&self, question: &str) -> bool;
}

/// Reads the marker value the redistributable installer leaves in `HKLM`.
#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VcRuntimeProbe;

#[cfg(windows)]
impl DependencyProbe for VcRuntimeProbe {
    fn is_present(&self) -> bool {
        crate::registry::read_machine_dword(VC_RUNTIME_KEY, VC_RUNTIME_VALUE) == Some(1)
    }
}

/// Interactive yes/no prompt. A closed or non-interactive stdin counts as "no".
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptConsent;

impl Consent for PromptConsent {
    fn confirm(&self, question: &str) -> bool {
        inquire::Confirm::new(question)
            .with_default(true)
            .prompt()
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Consent for AssumeYes {
    fn confirm(&self, _question: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    Unknown,
    Present,
    Absent,
}

impl DependencyState {
    /// Resolve `Unknown` by asking `probe`. Resolved states stay as they are.
    pub fn detect(self, probe: &impl DependencyProbe) -> Self {
        match self {
            DependencyState::Unknown if probe.is_present() => DependencyState::Present,
            DependencyState::Unknown => DependencyState::Absent,
            resolved => resolved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyOutcome {
    Present,
    Declined,
    Installed,
    /// Download or execution failed; the main install is unaffected.
    Warning(String),
}

/// Checks for the runtime and installs it on consent.
pub struct DependencyGuard<P, C> {
    probe: P,
    consent: C,
    client: Client,
    installer_url: String,
}

impl<P: DependencyProbe, C: Consent> DependencyGuard<P, C> {
    pub fn new(probe: P, consent: C, client: Client) -> Self {
        Self {
            probe,
            consent,
            client,
            installer_url: VC_REDIST_URL.to_owned(),
        }
    }

    pub fn with_installer_url(mut self, url: &str) -> Self {
        self.installer_url = url.to_owned();
        self
    }

    pub async fn ensure(&self) -> DependencyOutcome {
        match DependencyState::Unknown.detect(&self.probe) {
            DependencyState::Absent => {}
            _ => return DependencyOutcome::Present,
        }

        if !self
            .consent
            .confirm("The Microsoft Visual C++ runtime is missing. Download and install it now?")
        {
            info!("skipping Visual C++ runtime install; jorik may fail to start without it");
            return DependencyOutcome::Declined;
        }

        match self.download_and_run().await {
            Ok(()) => DependencyOutcome::Installed,
            Err(reason) => {
                warn!("Visual C++ runtime install failed: {reason}");
                DependencyOutcome::Warning(reason)
            }
        }
    }

    async fn download_and_run(&self) -> Result<(), String> {
        info!("downloading {}", self.installer_url);
        let resp = self
            .client
            .get(&self.installer_url)
            .send()
            .await
            .map_err(|e| format!("download failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("download failed with status {}", resp.status()));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| format!("download failed: {e}"))?;

        let mut file = tempfile::Builder::new()
            .prefix("vc_redist-")
            .suffix(".exe")
            .tempfile()
            .map_err(|e| format!("cannot create temporary file: {e}"))?;
        file.write_all(&bytes)
            .map_err(|e| format!("cannot write installer: {e}"))?;
        // Close the handle so the installer can be executed; deleted on drop.
        let path = file.into_temp_path();

        info!("running Visual C++ runtime installer");
        let status = tokio::process::Command::new(&path)
            .args(VC_REDIST_ARGS)
            .status()
            .await
            .map_err(|e| format!("cannot run installer: {e}"))?;
        info!("Visual C++ runtime installer finished with {status}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Fixed(bool);

    impl DependencyProbe for Fixed {
        fn is_present(&self) -> bool {
            self.0
        }
    }

    struct Answer {
        yes: bool,
        asked: Cell<u32>,
    }

    impl Answer {
        fn new(yes: bool) -> Self {
            Self { yes, asked: Cell::new(0) }
        }
    }

    impl Consent for &Answer {
        fn confirm(&self, _question: &str) -> bool {
            self.asked.set(self.asked.get() + 1);
            self.yes
        }
    }

    #[test]
    fn detect_transitions_once() {
        assert_eq!(DependencyState::Unknown.detect(&Fixed(true)), DependencyState::Present);
        assert_eq!(DependencyState::Unknown.detect(&Fixed(false)), DependencyState::Absent);
        assert_eq!(DependencyState::Present.detect(&Fixed(false)), DependencyState::Present);
    }

    #[tokio::test]
    async fn present_runtime_needs_no_prompt() {
        let answer = Answer::new(true);
        let guard = DependencyGuard::new(Fixed(true), &answer, Client::new());
        assert_eq!(guard.ensure().await, DependencyOutcome::Present);
        assert_eq!(answer.asked.get(), 0);
    }

    #[tokio::test]
    async fn declined_consent_does_nothing() {
        let answer = Answer::new(false);
        let guard = DependencyGuard::new(Fixed(false), &answer, Client::new())
            .with_installer_url("http://127.0.0.1:9/never-fetched.exe");
        assert_eq!(guard.ensure().await, DependencyOutcome::Declined);
        assert_eq!(answer.asked.get(), 1);
    }

    #[tokio::test]
    async fn failed_download_is_only_a_warning() {
        let guard = DependencyGuard::new(Fixed(false), AssumeYes, Client::new())
            .with_installer_url("http://127.0.0.1:9/vc_redist.x64.exe");
        assert!(matches!(guard.ensure().await, DependencyOutcome::Warning(_)));
    }
}
