use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Tile progress on stderr; a bar when the total is known, else a spinner.
pub struct ProgressTracker {
    bar: ProgressBar,
    total: u64,
    is_bar: bool,
}

impl ProgressTracker {
    pub fn new(message: &str, total: u64) -> Self {
        let is_bar = total > 0;
        let bar = if is_bar {
            make_progress_bar(total)
        } else {
            make_spinner()
        };
        bar.set_message(message.to_string());
        Self { bar, total, is_bar }
    }

    /// Cloneable handle for worker threads.
    pub fn handle(&self) -> ProgressBar {
        self.bar.clone()
    }

    pub fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    pub fn finish(self) {
        if self.is_bar {
            self.bar.set_position(self.total);
        }
        self.bar.finish_and_clear();
    }
}

fn make_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr_with_hz(10));
    let style = ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}

fn make_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr_with_hz(20));
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg} ({pos} tiles processed)")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    spinner.set_style(style);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

pub fn progress_for_phase(message: &str, total: u64, no_progress: bool) -> Option<ProgressTracker> {
    if no_progress {
        None
    } else {
        Some(ProgressTracker::new(message, total))
    }
}
