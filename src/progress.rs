//! Centralized progress reporting
//!
//! Provides a unified interface for displaying download progress.

use human_bytes::human_bytes;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use std::fmt;
use std::time::Duration;

/// Create the download progress bar sized to the NZB's nominal bytes.
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{percent:>3}% |{bar:32.green}| {bytes} of {total_bytes} at {rate} ({eta} left)",
        )
        .expect("valid progress template")
        .progress_chars("█▌░")
        .with_key("rate", |state: &ProgressState, w: &mut dyn fmt::Write| {
            let _ = write!(w, "{}/s", human_bytes(state.per_sec()));
        })
        .with_key("eta", |state: &ProgressState, w: &mut dyn fmt::Write| {
            let _ = write_brief_duration(w, state.eta());
        }),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Render a duration as `NmSSs` past the minute mark, plain seconds
/// below it.
fn write_brief_duration(w: &mut dyn fmt::Write, d: Duration) -> fmt::Result {
    let secs = d.as_secs();
    if secs >= 60 {
        write!(w, "{}m{:02}s", secs / 60, secs % 60)
    } else {
        write!(w, "{}s", secs)
    }
}

/// Format a download summary message
pub fn format_download_summary(files: usize, bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    };
    format!(
        "{} file{} • {} in {:.0}s • {}/s",
        files,
        if files == 1 { "" } else { "s" },
        human_bytes(bytes as f64),
        secs,
        human_bytes(speed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_pluralizes() {
        let one = format_download_summary(1, 1024, Duration::from_secs(2));
        assert!(one.starts_with("1 file •"));
        let many = format_download_summary(3, 1024, Duration::from_secs(2));
        assert!(many.starts_with("3 files •"));
    }

    #[test]
    fn test_brief_duration_switches_at_a_minute() {
        let mut out = String::new();
        write_brief_duration(&mut out, Duration::from_secs(42)).unwrap();
        assert_eq!(out, "42s");

        out.clear();
        write_brief_duration(&mut out, Duration::from_secs(135)).unwrap();
        assert_eq!(out, "2m15s");
    }
}
