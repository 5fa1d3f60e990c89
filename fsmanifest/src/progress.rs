//! Hashing progress.
//!
//! Workers bump shared counters; a reporter thread turns them into a periodic
//! `info!` line with throughput, replacing an interactive progress bar.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::info;

/// Counters shared between workers and the reporter
#[derive(Debug, Default)]
pub struct ProgressCounters {
    files: AtomicUsize,
    bytes: AtomicU64,
}

impl ProgressCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one file whose content was read
    pub fn record(&self, bytes: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn files(&self) -> usize {
        self.files.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Progress tracker with time-based speed calculation
#[derive(Debug)]
pub struct ProgressTracker {
    start_time: Instant,
    last_update_time: Instant,
    last_bytes: u64,
    bytes_per_second: u64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update_time: now,
            last_bytes: 0,
            bytes_per_second: 0,
        }
    }

    /// Feed the current byte total; returns the instantaneous speed
    pub fn update(&mut self, processed_bytes: u64) -> u64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();

        if elapsed > 0.0 {
            let bytes_diff = processed_bytes.saturating_sub(self.last_bytes);
            self.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }

        self.last_update_time = now;
        self.last_bytes = processed_bytes;
        self.bytes_per_second
    }

    /// Get total elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get average speed since start
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.last_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Background thread logging progress until dropped.
pub struct ProgressReporter {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn spawn(label: &'static str, counters: Arc<ProgressCounters>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = thread::spawn(move || {
            let mut tracker = ProgressTracker::new();
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let bytes = counters.bytes();
                        let speed = tracker.update(bytes);
                        info!(
                            "{}: {} files, {} hashed ({})",
                            label,
                            counters.files(),
                            format_bytes(bytes),
                            format_speed(speed)
                        );
                    }
                    // Sender dropped: the operation is over
                    _ => {
                        let bytes = counters.bytes();
                        tracker.update(bytes);
                        if counters.files() > 0 {
                            info!(
                                "{}: done, {} files, {} in {} ({} average)",
                                label,
                                counters.files(),
                                format_bytes(bytes),
                                format_duration(tracker.elapsed()),
                                format_speed(tracker.average_speed())
                            );
                        }
                        break;
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format a duration for summaries
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds == 0 {
        format!("{}ms", duration.as_millis())
    } else if seconds < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let counters = ProgressCounters::new();
        counters.record(10);
        counters.record(20);
        assert_eq!(counters.files(), 2);
        assert_eq!(counters.bytes(), 30);
    }

    #[test]
    fn test_progress_tracker() {
        let mut tracker = ProgressTracker::new();
        tracker.update(100);
        thread::sleep(Duration::from_millis(50));
        let speed = tracker.update(500);
        assert!(speed > 0);
        assert!(tracker.average_speed() > 0);
    }

    #[test]
    fn test_reporter_stops_on_drop() {
        let counters = ProgressCounters::new();
        let reporter =
            ProgressReporter::spawn("test", counters.clone(), Duration::from_secs(3600));
        counters.record(1);
        let start = Instant::now();
        drop(reporter);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1024), "1.00 KB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m");
    }
}
