//! # jorik-installer
//!
//! Resolves a jorik release from a GitHub or Forgejo release API, downloads the
//! archive built for the current target triple, and installs the executable,
//! falling back to `sudo` or a UAC prompt when the destination is not writable.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jorik_installer::{Api, HostKind, InstallTarget};
//!
//! #[tokio::main]
//! async fn main() {
//!     let target = InstallTarget::new("/usr/local/bin/jorik", "jorik").unwrap();
//!     Api::new()
//!         .set_host(HostKind::Forgejo)
//!         .repo("jorik-bot", "jorik-cli")
//!         .latest()
//!         .install("x86_64-unknown-linux-gnu", &target)
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod api;
pub mod config;
pub mod downloader;
pub mod elevate;
pub mod error;
pub mod install;
pub mod path_env;
pub mod progress;
#[cfg(windows)]
mod registry;
pub mod release;
pub mod resolver;
pub mod runtime_dep;

pub use api::{Api, InstallReport};
pub use downloader::Downloader;
pub use error::{FetchError, FetchResult};
pub use install::{InstallReceipt, InstallTarget};
pub use release::{AssetDescriptor, ReleaseDescriptor};
pub use resolver::{HostKind, ReleaseHost, Resolver};
