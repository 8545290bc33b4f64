use dupsnap_core::{ProgressReporter, ScanStage, ScanStats};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// indicatif front end for scan progress.
///
/// - Collecting: spinner (file count unknown upfront)
/// - Later stages: one percent bar per stage
pub struct CliReporter {
    bar: Mutex<Option<(ScanStage, ProgressBar)>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn start(&self, stage: ScanStage, pb: ProgressBar) {
        pb.enable_steady_tick(Duration::from_millis(80));
        let previous = self.bar.lock().unwrap().replace((stage, pb));
        if let Some((done, old)) = previous {
            old.finish_and_clear();
            eprintln!("  \x1b[32m✓\x1b[0m {}", done.description());
        }
    }

    fn finish(&self) {
        if let Some((done, pb)) = self.bar.lock().unwrap().take() {
            pb.finish_and_clear();
            eprintln!("  \x1b[32m✓\x1b[0m {}", done.description());
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_stage(&self, stage: ScanStage, description: &str) {
        let pb = match stage {
            ScanStage::Done => {
                self.finish();
                return;
            }
            ScanStage::Collecting => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::with_template("{spinner:.cyan} {msg}")
                        .unwrap()
                        .tick_chars(TICKS),
                );
                pb.set_message(description.to_string());
                pb
            }
            _ => {
                let pb = ProgressBar::new(100);
                pb.set_style(
                    ProgressStyle::with_template(
                        "  {spinner:.cyan} {prefix} [{bar:30.cyan/dim}] {pos:>3}% {wide_msg}",
                    )
                    .unwrap()
                    .progress_chars("━╸─")
                    .tick_chars(TICKS),
                );
                pb.set_prefix(description.to_string());
                pb
            }
        };
        self.start(stage, pb);
    }

    fn on_progress(&self, percent: f64, message: &str) {
        let guard = self.bar.lock().unwrap();
        if let Some((_, pb)) = guard.as_ref() {
            pb.set_position(percent.round() as u64);
            pb.set_message(message.to_string());
        }
    }

    fn on_complete(&self, stats: &ScanStats) {
        self.finish();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} files in {:.2}s ({} from cache, {} skipped)",
            stats.files_found, stats.duration_secs, stats.cache_hits, stats.files_skipped
        );
    }

    fn on_failed(&self, error: &str) {
        if let Some((_, pb)) = self.bar.lock().unwrap().take() {
            pb.abandon();
        }
        eprintln!("  \x1b[31m✗\x1b[0m Scan failed: {}", error);
    }
}
