//! Command-line and environment configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::api::Api;
use crate::error::{FetchError, FetchResult};
use crate::install::InstallTarget;
use crate::resolver::HostKind;

pub const DEFAULT_OWNER: &str = "jorik-bot";
pub const DEFAULT_REPO: &str = "jorik-cli";

/// Download and install the jorik CLI from its release page.
#[derive(Parser, Debug)]
#[command(name = "jorik-install", author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub options: Options,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Install or reinstall jorik (default)
    Install,
    /// Show what is currently installed
    Status,
    /// Remove the installed binary and undo the Path change
    Uninstall,
}

#[derive(clap::Args, Debug, Clone)]
pub struct Options {
    /// Release API shape of the host
    #[arg(long, env = "JORIK_HOST", value_enum, default_value_t = HostKind::Github)]
    pub host: HostKind,

    /// API base URL [default: public instance of --host]
    #[arg(long, env = "JORIK_API_URL")]
    pub api_url: Option<String>,

    /// Repository owner
    #[arg(long, env = "JORIK_OWNER", default_value = DEFAULT_OWNER)]
    pub owner: String,

    /// Repository name
    #[arg(long, env = "JORIK_REPO", default_value = DEFAULT_REPO)]
    pub repo: String,

    /// Target triple used to pick the asset [default: this machine]
    #[arg(long, env = "JORIK_TARGET")]
    pub target: Option<String>,

    /// Where to install the binary [default: platform specific]
    #[arg(long, env = "JORIK_INSTALL_PATH")]
    pub install_path: Option<PathBuf>,

    /// File name of the executable inside the archive
    #[arg(long, env = "JORIK_BIN_NAME")]
    pub bin_name: Option<String>,

    /// Bearer token for the release API
    #[arg(long, env = "JORIK_GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Release tag to install instead of the latest
    #[arg(long, env = "JORIK_VERSION", value_name = "TAG")]
    pub tag: Option<String>,

    /// HTTP(S) proxy URL
    #[arg(long, env = "JORIK_PROXY")]
    pub proxy: Option<String>,

    /// Do not add the install directory to the user Path (Windows)
    #[arg(long, env = "JORIK_NO_MODIFY_PATH")]
    pub no_modify_path: bool,

    /// Install the Visual C++ runtime without asking (Windows)
    #[arg(short = 'y', long = "yes", env = "JORIK_ASSUME_YES")]
    pub assume_yes: bool,

    /// Hide the download progress bar
    #[arg(short, long, env = "JORIK_QUIET")]
    pub quiet: bool,

    /// Directory for the install receipt
    #[arg(long, env = "JORIK_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

impl Options {
    pub fn target_triple(&self) -> String {
        self.target
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(default_target_triple)
    }

    pub fn install_target(&self) -> FetchResult<InstallTarget> {
        let bin_name = self.bin_name.clone().unwrap_or_else(default_bin_name);
        let destination = match &self.install_path {
            Some(path) => path.clone(),
            None => default_install_path(&bin_name)?,
        };
        InstallTarget::new(destination, &bin_name)
    }

    /// Build the [`Api`] these options describe.
    pub fn api(&self) -> Api {
        let mut api = Api::new()
            .set_host(self.host)
            .set_token(self.token.clone())
            .set_modify_path(!self.no_modify_path)
            .set_assume_yes(self.assume_yes);
        if let Some(url) = &self.api_url {
            api = api.set_api_url(url);
        }
        if let Some(proxy) = &self.proxy {
            api = api.set_proxy(proxy);
        }
        if let Some(dir) = &self.state_dir {
            api = api.set_state_dir(dir.clone());
        }
        if self.quiet {
            api = api.no_progress();
        }
        api
    }
}

/// `jorik`, plus `.exe` on Windows.
pub fn default_bin_name() -> String {
    format!("jorik{}", std::env::consts::EXE_SUFFIX)
}

/// Per-platform install location for `bin_name`.
pub fn default_install_path(bin_name: &str) -> FetchResult<PathBuf> {
    if cfg!(windows) {
        let base = dirs::data_local_dir().ok_or_else(|| {
            FetchError::Config("cannot determine %LOCALAPPDATA%; pass --install-path".to_owned())
        })?;
        Ok(base.join("Programs").join("jorik").join(bin_name))
    } else {
        Ok(PathBuf::from("/usr/local/bin").join(bin_name))
    }
}

/// Rust-style target triple of the running machine.
pub fn default_target_triple() -> String {
    let arch = std::env::consts::ARCH;
    match std::env::consts::OS {
        "linux" if cfg!(target_env = "musl") => format!("{arch}-unknown-linux-musl"),
        "linux" => format!("{arch}-unknown-linux-gnu"),
        "macos" => format!("{arch}-apple-darwin"),
        "windows" => format!("{arch}-pc-windows-msvc"),
        os => format!("{arch}-unknown-{os}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_without_arguments() {
        let cli = Cli::try_parse_from(["jorik-install"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.options.host, HostKind::Github);
        assert_eq!(cli.options.owner, DEFAULT_OWNER);
        assert_eq!(cli.options.repo, DEFAULT_REPO);
        assert!(cli.options.tag.is_none());
    }

    #[test]
    fn parses_install_options() {
        let cli = Cli::try_parse_from([
            "jorik-install",
            "--host",
            "forgejo",
            "--tag",
            "v0.3.1",
            "--target",
            "aarch64-apple-darwin",
            "--install-path",
            "/opt/jorik/bin/jorik",
            "-y",
            "uninstall",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(Command::Uninstall));
        assert_eq!(cli.options.host, HostKind::Forgejo);
        assert_eq!(cli.options.tag.as_deref(), Some("v0.3.1"));
        assert_eq!(cli.options.target_triple(), "aarch64-apple-darwin");
        assert!(cli.options.assume_yes);
    }

    #[cfg(unix)]
    #[test]
    fn install_target_from_options() {
        let cli = Cli::try_parse_from(["jorik-install", "--install-path", "/opt/jorik/bin/jorik"]).unwrap();
        let target = cli.options.install_target().unwrap();
        assert_eq!(target.destination, PathBuf::from("/opt/jorik/bin/jorik"));
        assert_eq!(target.entry_name, "jorik");
    }

    #[test]
    fn detected_triple_has_os_component() {
        let triple = default_target_triple();
        assert!(triple.starts_with(std::env::consts::ARCH));
        assert!(triple.split('-').count() >= 3, "{triple}");
    }
}
