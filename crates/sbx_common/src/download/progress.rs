//! Download progress - a byte counter shared by all chunk workers
//!
//! The counter sits behind a single mutex. The bar is purely visual: it draws
//! to stderr and hides itself when stderr is not a terminal. Under NO_COLOR
//! it is drawn without styling. Bar failures never affect the download.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;

pub struct Progress {
    bytes: Mutex<u64>,
    total: u64,
    bar: Option<ProgressBar>,
}

impl Progress {
    pub fn new(total: u64, label: &str, show: bool) -> Self {
        Self::styled(total, label, show, std::env::var_os("NO_COLOR").is_none())
    }

    fn styled(total: u64, label: &str, show: bool, color: bool) -> Self {
        let bar = if show {
            let pb = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr());
            if let Ok(style) = ProgressStyle::with_template(template(color)) {
                pb.set_style(style.progress_chars("=> "));
            }
            pb.set_message(format!("Downloading {}", label));
            Some(pb)
        } else {
            None
        };

        Self {
            bytes: Mutex::new(0),
            total,
            bar,
        }
    }

    /// Counter only, no bar.
    pub fn hidden(total: u64) -> Self {
        Self::new(total, "", false)
    }

    pub fn add(&self, n: u64) {
        let mut bytes = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        *bytes += n;
        if let Some(ref bar) = self.bar {
            bar.set_position(*bytes);
        }
    }

    pub fn bytes(&self) -> u64 {
        *self.bytes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Clear the bar so later console output starts on a clean line.
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

fn template(color: bool) -> &'static str {
    if color {
        "{msg:.cyan} [{bar:15.green}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})"
    } else {
        "{msg} [{bar:15}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})"
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            if !bar.is_finished() {
                bar.finish_and_clear();
            }
        }
    }
}
