use std::sync::{Arc, Mutex};

use indicatif::{ProgressBar, ProgressStyle};

use crate::downloader::ProgressFn;

const BAR_TEMPLATE: &str =
    "{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_TEMPLATE: &str = "{spinner} {msg} {bytes} ({bytes_per_sec})";

/// Returns the default progress function, drawing an `indicatif` bar on stderr.
///
/// A spinner is used instead when the server sends no content length.
pub fn default_progress_fn() -> ProgressFn {
    let bar: Mutex<Option<ProgressBar>> = Mutex::new(None);
    Arc::new(move |src: &str, current: u64, total: u64, complete: bool| {
        let mut slot = bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let pb = slot.get_or_insert_with(|| new_bar(src, total));
        pb.set_position(current);
        if complete {
            pb.finish_and_clear();
            *slot = None;
        }
    })
}

fn new_bar(src: &str, total: u64) -> ProgressBar {
    let name = src.rsplit('/').next().unwrap_or(src).to_owned();
    let pb = if total > 0 {
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            pb.set_style(style.progress_chars("=> "));
        }
        pb
    } else {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template(SPINNER_TEMPLATE) {
            pb.set_style(style);
        }
        pb
    };
    pb.set_message(name);
    pb
}
