//! Progress accounting and the human-readable status report.
//!
//! The engine is the only writer: it records one outcome per resolved slot
//! and publishes a snapshot after each. Publishing never fails a `map` call;
//! sink errors are logged and dropped.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Most recent durations kept for the histogram
pub const MAX_SAMPLES: usize = 10_000;

/// Rows in the rendered histogram
pub const HISTOGRAM_BINS: usize = 10;

const HISTOGRAM_WIDTH: usize = 20;

/// Marker for a slot served from the cache
pub const LOADED_MARK: char = 'O';
/// Marker for a freshly computed slot
pub const PROCESSED_MARK: char = '#';
/// Marker for a slot not yet resolved
pub const REMAINING_MARK: char = '.';

/// Counts and timings for one `map` call
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    loaded: usize,
    processed: usize,
    marks: String,
    samples: VecDeque<Duration>,
    started: Instant,
}

impl ProgressTracker {
    /// Start tracking a call with `total` tasks
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            loaded: 0,
            processed: 0,
            marks: String::with_capacity(total),
            samples: VecDeque::new(),
            started: Instant::now(),
        }
    }

    /// A slot was served from the cache; `elapsed` is its stored duration
    pub fn record_load(&mut self, elapsed: Duration) {
        self.loaded += 1;
        self.marks.push(LOADED_MARK);
        self.sample(elapsed);
    }

    /// A slot was freshly computed in `elapsed`
    pub fn record_processed(&mut self, elapsed: Duration) {
        self.processed += 1;
        self.marks.push(PROCESSED_MARK);
        self.sample(elapsed);
    }

    fn sample(&mut self, elapsed: Duration) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
    }

    /// Point-in-time copy for rendering
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            loaded: self.loaded,
            processed: self.processed,
            bar: self.marks.clone(),
            samples: self.samples.iter().copied().collect(),
            elapsed: self.started.elapsed(),
        }
    }
}

/// One histogram row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBin {
    /// Lower edge of the bin, in seconds
    pub start: f64,
    /// Samples falling in the bin
    pub count: usize,
}

/// Progress at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Tasks in the call
    pub total: usize,
    /// Slots served from the cache
    pub loaded: usize,
    /// Slots freshly computed
    pub processed: usize,
    /// One marker per resolved slot, in resolution order
    pub bar: String,
    /// Recent elapsed durations
    pub samples: Vec<Duration>,
    /// Wall time since the call started
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Slots not yet resolved
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.total.saturating_sub(self.loaded + self.processed)
    }

    /// `remaining * elapsed / processed`, unknown until something was computed
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn eta(&self) -> Option<Duration> {
        if self.processed == 0 {
            return None;
        }
        Some(self.elapsed.mul_f64(self.remaining() as f64 / self.processed as f64))
    }

    /// Bucket samples into `bins` equal-width bins over their range.
    ///
    /// With no samples the range is `[0, 1]`; a single distinct value is
    /// widened by half a second on each side. The last bin is closed.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn histogram(&self, bins: usize) -> Vec<HistogramBin> {
        let bins = bins.max(1);
        let secs: Vec<f64> = self.samples.iter().map(Duration::as_secs_f64).collect();
        let (mut lo, mut hi) = secs
            .iter()
            .fold(None, |range: Option<(f64, f64)>, &s| match range {
                Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
                None => Some((s, s)),
            })
            .unwrap_or((0.0, 1.0));
        if (hi - lo).abs() < f64::EPSILON {
            lo -= 0.5;
            hi += 0.5;
        }

        let width = (hi - lo) / bins as f64;
        let mut counts = vec![0usize; bins];
        for s in secs {
            let bin = (((s - lo) / width) as usize).min(bins - 1);
            counts[bin] += 1;
        }
        counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| HistogramBin {
                start: (i as f64).mul_add(width, lo),
                count,
            })
            .collect()
    }

    /// Render the status report
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let remaining = self.remaining();

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{}{}",
            self.bar,
            REMAINING_MARK.to_string().repeat(remaining)
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "Loaded    ({LOADED_MARK}): {}", self.loaded);
        let _ = writeln!(out, "Processed ({PROCESSED_MARK}): {}", self.processed);
        let _ = writeln!(out, "Remaining ({REMAINING_MARK}): {remaining}");
        let _ = writeln!(out);

        let bins = self.histogram(HISTOGRAM_BINS);
        let tallest = bins.iter().map(|b| b.count).max().unwrap_or(0);
        for bin in &bins {
            let length = if tallest == 0 {
                0
            } else {
                bin.count * HISTOGRAM_WIDTH / tallest
            };
            let _ = writeln!(
                out,
                " {}  {:>4} |{:<width$}",
                format_duration(Duration::from_secs_f64(bin.start.max(0.0))),
                bin.count,
                "|".repeat(length),
                width = HISTOGRAM_WIDTH
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "--------------------");
        let _ = writeln!(out, "Time: {}", format_duration(self.elapsed));
        let _ = writeln!(
            out,
            "ETA:  {}",
            self.eta().map_or_else(|| "Unknown".to_string(), format_duration)
        );
        let _ = writeln!(out);
        out
    }
}

/// `H:MM:SS`, with `.ffffff` microseconds when non-zero
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs / 60) % 60, secs % 60);
    let micros = duration.subsec_micros();
    if micros == 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours}:{minutes:02}:{seconds:02}.{micros:06}")
    }
}

/// Destination for rendered snapshots
pub trait ProgressSink: Send {
    /// Publish one snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    fn publish(&mut self, snapshot: &ProgressSnapshot) -> io::Result<()>;
}

/// `<workdir>/status_<program>`, overwritten on every publish
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Status file for `program` under `workdir`
    #[must_use]
    pub fn new(workdir: &Path, program: &str) -> Self {
        Self {
            path: workdir.join(format!("status_{program}")),
        }
    }

    /// Path of the status file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressSink for StatusFile {
    fn publish(&mut self, snapshot: &ProgressSnapshot) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, snapshot.render())
    }
}

/// Standard output
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl ProgressSink for StdoutSink {
    fn publish(&mut self, snapshot: &ProgressSnapshot) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(snapshot.render().as_bytes())?;
        stdout.flush()
    }
}

/// Fans snapshots out to sinks, swallowing failures.
///
/// Per-slot sinks receive every snapshot; final sinks only the last one.
#[derive(Default)]
pub struct Reporter {
    per_slot: Vec<Box<dyn ProgressSink>>,
    at_end: Vec<Box<dyn ProgressSink>>,
}

impl Reporter {
    /// Reporter with no sinks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish to `sink` after every resolved slot and at the end
    #[must_use]
    pub fn every_slot(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.per_slot.push(Box::new(sink));
        self
    }

    /// Publish to `sink` once the call finishes
    #[must_use]
    pub fn at_end(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.at_end.push(Box::new(sink));
        self
    }

    /// Publish an intermediate snapshot
    pub fn slot(&mut self, snapshot: &ProgressSnapshot) {
        Self::publish_all(&mut self.per_slot, snapshot);
    }

    /// Publish the final snapshot to every sink
    pub fn finish(&mut self, snapshot: &ProgressSnapshot) {
        Self::publish_all(&mut self.per_slot, snapshot);
        Self::publish_all(&mut self.at_end, snapshot);
    }

    fn publish_all(sinks: &mut [Box<dyn ProgressSink>], snapshot: &ProgressSnapshot) {
        for sink in sinks {
            if let Err(e) = sink.publish(snapshot) {
                tracing::warn!(error = %e, "Failed to publish progress");
            }
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("per_slot", &self.per_slot.len())
            .field("at_end", &self.at_end.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn snapshot(samples: &[f64]) -> ProgressSnapshot {
        ProgressSnapshot {
            total: samples.len(),
            loaded: 0,
            processed: samples.len(),
            bar: "#".repeat(samples.len()),
            samples: samples
                .iter()
                .map(|s| Duration::from_secs_f64(*s))
                .collect(),
            elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_tracker_counts_and_marks() {
        let mut tracker = ProgressTracker::new(4);
        tracker.record_load(Duration::from_millis(5));
        tracker.record_processed(Duration::from_millis(7));
        tracker.record_load(Duration::ZERO);

        let snap = tracker.snapshot();
        assert_eq!(snap.loaded, 2);
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.remaining(), 1);
        assert_eq!(snap.bar, "O#O");
        assert_eq!(snap.samples.len(), 3);
    }

    #[test]
    fn test_samples_are_bounded() {
        let mut tracker = ProgressTracker::new(MAX_SAMPLES + 5);
        for i in 0..MAX_SAMPLES + 5 {
            tracker.record_processed(Duration::from_millis(i as u64));
        }
        let snap = tracker.snapshot();
        assert_eq!(snap.samples.len(), MAX_SAMPLES);
        assert_eq!(snap.samples[0], Duration::from_millis(5));
        assert_eq!(snap.processed, MAX_SAMPLES + 5);
    }

    #[test]
    fn test_eta_unknown_until_processed() {
        let mut snap = snapshot(&[]);
        snap.total = 3;
        assert_eq!(snap.eta(), None);
        assert!(snap.render().contains("ETA:  Unknown"));
    }

    #[test]
    fn test_eta_scales_with_remaining() {
        let snap = ProgressSnapshot {
            total: 4,
            loaded: 1,
            processed: 1,
            bar: "O#".into(),
            samples: vec![],
            elapsed: Duration::from_secs(10),
        };
        assert_eq!(snap.eta(), Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_histogram_bins() {
        let bins = snapshot(&[0.0, 1.0, 1.0, 10.0]).histogram(10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins[0].count, 1);
        assert_eq!(bins[1].count, 2);
        // Last bin is closed on the right
        assert_eq!(bins[9].count, 1);
        assert!((bins[1].start - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_single_value_and_empty() {
        let bins = snapshot(&[2.0, 2.0]).histogram(10);
        assert!((bins[0].start - 1.5).abs() < 1e-9);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 2);

        let empty = snapshot(&[]).histogram(10);
        assert!(empty.iter().all(|b| b.count == 0));
        assert!((empty[0].start).abs() < 1e-9);
    }

    #[test]
    fn test_render_layout() {
        let snap = ProgressSnapshot {
            total: 3,
            loaded: 1,
            processed: 1,
            bar: "O#".into(),
            samples: vec![Duration::from_secs(1), Duration::from_secs(2)],
            elapsed: Duration::from_millis(1500),
        };
        let text = snap.render();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[1], "O#.");
        assert_eq!(lines[3], "Loaded    (O): 1");
        assert_eq!(lines[4], "Processed (#): 1");
        assert_eq!(lines[5], "Remaining (.): 1");
        assert_eq!(lines[7], format!(" 0:00:01     1 |{}", "|".repeat(20)));
        assert!(text.contains("--------------------\nTime: 0:00:01.500000\n"));
        assert!(text.contains("ETA:  0:00:01.500000"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0:00:00");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(format_duration(Duration::from_micros(1_250)), "0:00:00.001250");
    }

    #[test]
    fn test_status_file_is_overwritten() {
        let temp = TempDir::new().unwrap();
        let mut file = StatusFile::new(&temp.path().join("work"), "demo");

        file.publish(&snapshot(&[1.0, 2.0])).unwrap();
        file.publish(&snapshot(&[1.0])).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(file.path(), temp.path().join("work/status_demo"));
        assert!(text.contains("Processed (#): 1\n"));
        assert!(!text.contains("Processed (#): 2"));
    }

    struct Failing;

    impl ProgressSink for Failing {
        fn publish(&mut self, _: &ProgressSnapshot) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }
    }

    #[derive(Clone, Default)]
    struct Counting(Arc<Mutex<usize>>);

    impl ProgressSink for Counting {
        fn publish(&mut self, _: &ProgressSnapshot) -> io::Result<()> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_reporter_swallows_failures_and_routes_sinks() {
        let every = Counting::default();
        let end = Counting::default();
        let mut reporter = Reporter::new()
            .every_slot(Failing)
            .every_slot(every.clone())
            .at_end(end.clone());

        let snap = snapshot(&[1.0]);
        reporter.slot(&snap);
        reporter.slot(&snap);
        reporter.finish(&snap);

        assert_eq!(*every.0.lock().unwrap(), 3);
        assert_eq!(*end.0.lock().unwrap(), 1);
    }
}
