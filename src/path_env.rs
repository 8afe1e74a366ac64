//! Executable search-path handling.
//!
//! The list manipulation is platform independent; persisting it into the
//! per-user `Path` registry value only exists on Windows.

use std::path::Path;

const SEPARATOR: char = ';';

fn normalize(entry: &str) -> String {
    entry
        .trim()
        .trim_matches('"')
        .trim_end_matches(['\\', '/'])
        .to_lowercase()
}

/// Whether the `;`-separated `path_value` already lists `dir`.
///
/// Comparison ignores case, surrounding quotes and trailing separators.
pub fn contains_entry(path_value: &str, dir: &str) -> bool {
    let wanted = normalize(dir);
    path_value
        .split(SEPARATOR)
        .any(|entry| !entry.trim().is_empty() && normalize(entry) == wanted)
}

/// Append `dir` to `path_value`, or `None` if it is already listed.
pub fn append_entry(path_value: &str, dir: &str) -> Option<String> {
    if contains_entry(path_value, dir) {
        return None;
    }
    let trimmed = path_value.trim_end_matches(SEPARATOR);
    if trimmed.is_empty() {
        Some(dir.to_owned())
    } else {
        Some(format!("{trimmed}{SEPARATOR}{dir}"))
    }
}

/// Remove every occurrence of `dir`, or `None` if it is not listed.
pub fn remove_entry(path_value: &str, dir: &str) -> Option<String> {
    if !contains_entry(path_value, dir) {
        return None;
    }
    let wanted = normalize(dir);
    let kept: Vec<&str> = path_value
        .split(SEPARATOR)
        .filter(|entry| !entry.trim().is_empty() && normalize(entry) != wanted)
        .collect();
    Some(kept.join(";"))
}

/// Whether `dir` is on the current process's `PATH`.
pub fn on_process_path(dir: &Path) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|p| p == dir)
}

#[cfg(windows)]
pub use self::user::{register, unregister};

#[cfg(windows)]
mod user {
    use std::path::Path;

    use log::{debug, info};

    use super::{append_entry, remove_entry};
    use crate::error::{FetchError, FetchResult};
    use crate::registry;

    /// Append `dir` to the per-user `Path`. Returns `true` when the value changed.
    pub fn register(dir: &Path) -> FetchResult<bool> {
        let dir = dir.to_string_lossy();
        let current = registry::read_user_path().map_err(FetchError::State)?;
        let (value, expandable) = current.unwrap_or_default();

        let Some(updated) = append_entry(&value, &dir) else {
            debug!("{dir} already on the user Path");
            return Ok(false);
        };
        registry::write_user_path(&updated, expandable || value.is_empty())
            .map_err(FetchError::State)?;
        registry::broadcast_environment_change();
        info!("added {dir} to the user Path; new shells will pick it up");
        Ok(true)
    }

    /// Remove `entry` from the per-user `Path`. Returns `true` when the value changed.
    pub fn unregister(entry: &str) -> FetchResult<bool> {
        let Some((value, expandable)) = registry::read_user_path().map_err(FetchError::State)?
        else {
            return Ok(false);
        };
        let Some(updated) = remove_entry(&value, entry) else {
            return Ok(false);
        };
        registry::write_user_path(&updated, expandable).map_err(FetchError::State)?;
        registry::broadcast_environment_change();
        info!("removed {entry} from the user Path");
        Ok(true)
    }
}
