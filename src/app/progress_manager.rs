//! Progress bars for batch runs, one per download, driven by snapshots.

use std::collections::HashMap;

use dlmanager_core::DownloadSnapshot;
use dlmanager_core::humanize::{format_bytes, format_rate};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str = "{bar:30.cyan/blue} {percent:>3}% {msg}";

/// Renders snapshots into an indicatif `MultiProgress`, keyed by URL.
pub(crate) struct ProgressRenderer {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    style: ProgressStyle,
}

impl ProgressRenderer {
    /// Renderer drawing to stderr.
    pub(crate) fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Renderer drawing nowhere; for non-terminals and tests.
    pub(crate) fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: HashMap::new(),
            style: ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        }
    }

    /// Brings the bars in line with `snapshot`.
    pub(crate) fn render(&mut self, snapshot: &[DownloadSnapshot]) {
        for record in snapshot {
            let bar = self.bars.entry(record.url.clone()).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(0));
                bar.set_style(self.style.clone());
                bar
            });
            if record.bytes > 0 {
                bar.set_length(record.bytes);
            }
            bar.set_position(record.downloaded_bytes);
            bar.set_message(status_line(record));
        }

        let live: std::collections::HashSet<&str> =
            snapshot.iter().map(|r| r.url.as_str()).collect();
        self.bars.retain(|url, bar| {
            let keep = live.contains(url.as_str());
            if !keep {
                bar.finish_and_clear();
                self.multi.remove(bar);
            }
            keep
        });
    }

    /// Number of bars currently shown.
    pub(crate) fn len(&self) -> usize {
        self.bars.len()
    }

    /// Leaves the final state of every bar on screen.
    pub(crate) fn finish(&mut self) {
        for bar in self.bars.values() {
            bar.abandon();
        }
    }
}

/// One-line description of a download: name, sizes, rate, and state.
pub(crate) fn status_line(record: &DownloadSnapshot) -> String {
    let size = if record.bytes > 0 {
        format!(
            "{} / {}",
            format_bytes(record.downloaded_bytes),
            format_bytes(record.bytes)
        )
    } else {
        format_bytes(record.downloaded_bytes)
    };
    let mut line = format!("{} {size}", record.display_name());
    if record.bytes_per_second > 0 && !record.complete && !record.paused {
        line.push_str(&format!(" {}", format_rate(record.bytes_per_second)));
    }
    line.push_str(&format!(" [{}]", record.state));
    if record.attempt_counter > 0 && !record.complete {
        line.push_str(&format!(" retry {}", record.attempt_counter));
    }
    if let Some(error) = &record.error {
        line.push_str(&format!(" ({error})"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlmanager_core::{Download, DownloadState};

    fn snapshot(url: &str, state: DownloadState, total: u64, done: u64) -> DownloadSnapshot {
        let mut record = Download::new(url, "file.bin");
        record.state = state;
        record.bytes_total = total;
        record.bytes_downloaded = done;
        record.to_snapshot()
    }

    #[test]
    fn test_status_line_shows_sizes_and_state() {
        let line = status_line(&snapshot(
            "http://x/file.bin",
            DownloadState::Downloading,
            2048,
            1024,
        ));
        assert!(line.starts_with("file.bin 1.00 KB / 2.00 KB"), "{line}");
        assert!(line.ends_with("[downloading]"), "{line}");
    }

    #[test]
    fn test_status_line_shows_retry_and_error() {
        let mut record = Download::new("http://x/file.bin", "file.bin");
        record.state = DownloadState::Retrying;
        record.attempt_counter = 3;
        record.last_error = Some("HTTP 503".to_string());
        let line = status_line(&record.to_snapshot());
        assert!(line.contains("retry 3"), "{line}");
        assert!(line.contains("(HTTP 503)"), "{line}");
    }

    #[test]
    fn test_render_tracks_bars_by_url() {
        let mut renderer = ProgressRenderer::hidden();
        renderer.render(&[
            snapshot("http://x/a", DownloadState::Downloading, 100, 10),
            snapshot("http://x/b", DownloadState::Queued, 0, 0),
        ]);
        assert_eq!(renderer.len(), 2);

        renderer.render(&[snapshot("http://x/a", DownloadState::Complete, 100, 100)]);
        assert_eq!(renderer.len(), 1);
        renderer.finish();
    }
}
