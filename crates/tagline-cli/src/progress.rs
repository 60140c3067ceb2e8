use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tagline::batch::BatchObserver;
use tagline::report::FileDetail;

/// Terminal progress bar that also carries the Ctrl-C stop flag.
pub struct ProgressObserver {
    bar: Option<ProgressBar>,
    stop: Arc<AtomicBool>,
}

impl ProgressObserver {
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        Self { bar: None, stop }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl BatchObserver for ProgressObserver {
    fn on_start(&mut self, total: usize) {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} ({eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("##>-"));
        }
        self.bar = Some(bar);
    }

    fn on_file_start(&mut self, _index: usize, _total: usize, path: &Path) {
        if let Some(bar) = &self.bar {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            bar.set_message(name);
        }
    }

    fn on_file_done(&mut self, detail: &FileDetail) {
        if let Some(bar) = &self.bar {
            if detail.outcome.is_failure() {
                bar.println(detail.to_string());
            }
            bar.inc(1);
        }
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}
