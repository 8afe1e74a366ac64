//! Release descriptors and asset selection.

use log::warn;

/// Identifier used when a host answers a "latest" query without a tag name.
pub const LATEST_MARKER: &str = "latest";

/// Archive extension every installable asset carries after its target triple.
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// A single named, downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub name: String,
    pub download_url: String,
}

/// One release as reported by a host, assets kept in host order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    /// Tag name, or [`LATEST_MARKER`].
    pub identifier: String,
    pub prerelease: bool,
    pub draft: bool,
    pub assets: Vec<AssetDescriptor>,
}

/// The asset picked for installation together with the release it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'a> {
    pub release: &'a ReleaseDescriptor,
    pub asset: &'a AssetDescriptor,
}

/// Asset-name suffix for `target_triple`, e.g. `x86_64-unknown-linux-gnu.tar.gz`.
pub fn asset_suffix(target_triple: &str) -> String {
    format!("{target_triple}{ARCHIVE_SUFFIX}")
}

/// Return the first asset of `release` whose name ends with `<target_triple>.tar.gz`.
///
/// Several matching assets are not an error: the first in host order wins and
/// the other candidates are logged, since hosts do not guarantee a stable order.
pub fn select_asset<'a>(
    release: &'a ReleaseDescriptor,
    target_triple: &str,
) -> Option<&'a AssetDescriptor> {
    let suffix = asset_suffix(target_triple);
    let mut matches = release.assets.iter().filter(|a| a.name.ends_with(&suffix));
    let first = matches.next()?;

    let others: Vec<&str> = matches.map(|a| a.name.as_str()).collect();
    if !others.is_empty() {
        warn!(
            "release {} has several assets ending in {suffix}; using {} and ignoring {}",
            release.identifier,
            first.name,
            others.join(", ")
        );
    }
    Some(first)
}

/// Scan `releases` in host order and stop at the first release holding a match.
pub fn select<'a>(releases: &'a [ReleaseDescriptor], target_triple: &str) -> Option<Selection<'a>> {
    releases.iter().find_map(|release| {
        select_asset(release, target_triple).map(|asset| Selection { release, asset })
    })
}
