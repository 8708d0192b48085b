//! Upload progress tracking
//!
//! Transfers report [`ProgressEvent`]s to a [`ProgressSink`]. The
//! [`ProgressTracker`] keeps the latest percentage per source, logs each
//! report, and optionally drives one indicatif bar per file.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

/// A single progress report for one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub source_name: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Integer percentage in `0..=100`
    pub percentage: u8,
}

impl ProgressEvent {
    pub fn new(source_name: impl Into<String>, bytes_transferred: u64, total_bytes: u64) -> Self {
        let percentage = if total_bytes == 0 {
            100
        } else {
            (bytes_transferred.min(total_bytes) * 100 / total_bytes) as u8
        };

        Self {
            source_name: source_name.into(),
            bytes_transferred,
            total_bytes,
            percentage,
        }
    }
}

/// Receiver for transfer progress. Called concurrently from every transfer.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Aggregate view over a batch of transfers
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatus {
    pub expected: usize,
    pub completed: usize,
    /// Mean percentage across expected transfers
    pub overall_percent: f64,
}

struct Transfer {
    percentage: u8,
    bar: Option<ProgressBar>,
}

/// Per-file progress for one direct upload batch
pub struct ProgressTracker {
    expected: usize,
    transfers: Mutex<HashMap<String, Transfer>>,
    bars: Option<MultiProgress>,
}

impl ProgressTracker {
    /// Tracker for a batch of `expected` transfers, log output only
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            transfers: Mutex::new(HashMap::new()),
            bars: None,
        }
    }

    /// Also draw a bar per file on stderr
    pub fn with_bars(mut self) -> Self {
        self.bars = Some(MultiProgress::with_draw_target(ProgressDrawTarget::stderr()));
        self
    }

    fn transfers(&self) -> MutexGuard<'_, HashMap<String, Transfer>> {
        self.transfers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_bar(&self, name: &str) -> Option<ProgressBar> {
        let bars = self.bars.as_ref()?;
        let bar = bars.add(ProgressBar::new(100));
        if let Ok(style) =
            ProgressStyle::default_bar().template("{msg:30} [{wide_bar:.cyan/blue}] {pos:>3}%")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(name.to_string());
        Some(bar)
    }

    pub fn status(&self) -> BatchStatus {
        let transfers = self.transfers();
        let completed = transfers.values().filter(|t| t.percentage == 100).count();
        let sum: u64 = transfers.values().map(|t| u64::from(t.percentage)).sum();

        let overall_percent = if self.expected == 0 {
            0.0
        } else {
            sum as f64 / self.expected as f64
        };

        BatchStatus {
            expected: self.expected,
            completed,
            overall_percent,
        }
    }

    pub fn summary(&self) -> String {
        let status = self.status();
        format!(
            "{}/{} transfers complete, {:.1}% overall",
            status.completed, status.expected, status.overall_percent
        )
    }

    /// Close every bar
    pub fn finish(&self) {
        for transfer in self.transfers().values() {
            if let Some(bar) = &transfer.bar {
                bar.finish();
            }
        }
    }
}

impl ProgressSink for ProgressTracker {
    fn report(&self, event: &ProgressEvent) {
        let mut transfers = self.transfers();

        if !transfers.contains_key(&event.source_name) {
            let bar = self.new_bar(&event.source_name);
            transfers.insert(
                event.source_name.clone(),
                Transfer { percentage: 0, bar },
            );
        }

        if let Some(transfer) = transfers.get_mut(&event.source_name) {
            // reports can arrive out of order; never move backwards
            transfer.percentage = transfer.percentage.max(event.percentage);
            if let Some(bar) = &transfer.bar {
                bar.set_position(u64::from(transfer.percentage));
            }
        }

        info!(
            file = %event.source_name,
            bytes = event.bytes_transferred,
            total = event.total_bytes,
            "{}% upload completed for {}.",
            event.percentage,
            event.source_name
        );
    }
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_percentage() {
        assert_eq!(ProgressEvent::new("a", 0, 200).percentage, 0);
        assert_eq!(ProgressEvent::new("a", 50, 200).percentage, 25);
        assert_eq!(ProgressEvent::new("a", 200, 200).percentage, 100);
        assert_eq!(ProgressEvent::new("empty", 0, 0).percentage, 100);
    }

    #[test]
    fn test_tracker_keeps_highest_percentage() {
        let tracker = ProgressTracker::new(2);
        tracker.report(&ProgressEvent::new("a.mp4", 60, 100));
        tracker.report(&ProgressEvent::new("a.mp4", 40, 100));

        let status = tracker.status();
        assert_eq!(status.completed, 0);
        assert_eq!(status.overall_percent, 30.0);
    }

    #[test]
    fn test_status_averages_over_expected() {
        let tracker = ProgressTracker::new(2);
        tracker.report(&ProgressEvent::new("a.mp4", 100, 100));

        let status = tracker.status();
        assert_eq!(status.completed, 1);
        assert_eq!(status.overall_percent, 50.0);
        assert_eq!(tracker.summary(), "1/2 transfers complete, 50.0% overall");
    }

    #[test]
    fn test_empty_batch_is_zero_percent() {
        let tracker = ProgressTracker::new(0);
        assert_eq!(tracker.status().overall_percent, 0.0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(4 * 1024 * 1024), "4.00 MB");
    }
}
