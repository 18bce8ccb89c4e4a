//! Statistics tracking for the keyer.
//!
//! Counts what came in over the wire and what went out to the keying
//! device, plus a histogram of how long each message took to send.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Longest message duration tracked by the histogram (10 minutes).
const MAX_KEYING_MILLIS: u64 = 600_000;

/// Thread-safe statistics collector for the keyer.
#[derive(Debug)]
pub struct KeyerStats {
    /// Datagrams received, including empty and control ones
    pub datagrams: AtomicU64,

    /// Total payload bytes received
    pub bytes_received: AtomicU64,

    /// Zero-length datagrams ignored
    pub empty_datagrams: AtomicU64,

    /// Control (ESC) messages received
    pub control_messages: AtomicU64,

    /// Control messages with a directive we do not act on
    pub unknown_directives: AtomicU64,

    /// Abort directives handled
    pub aborts: AtomicU64,

    /// Characters sent to the keying device
    pub characters_keyed: AtomicU64,

    /// Characters with no Morse code
    pub unencodable: AtomicU64,

    /// Individual units written to the device
    pub units_written: AtomicU64,

    /// Messages cut short by the reset character
    pub resets: AtomicU64,

    /// External rig-control commands run
    pub rig_commands: AtomicU64,

    /// External rig-control commands that failed
    pub rig_failures: AtomicU64,

    /// Keying time per text message, in milliseconds
    keying_histogram: RwLock<Histogram<u64>>,

    /// When stats collection started
    start_time: Instant,
}

impl KeyerStats {
    /// Create a new statistics collector.
    pub fn new() -> Self {
        Self {
            datagrams: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            empty_datagrams: AtomicU64::new(0),
            control_messages: AtomicU64::new(0),
            unknown_directives: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
            characters_keyed: AtomicU64::new(0),
            unencodable: AtomicU64::new(0),
            units_written: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            rig_commands: AtomicU64::new(0),
            rig_failures: AtomicU64::new(0),
            // 1 ms to 10 minutes, 2 significant figures
            keying_histogram: RwLock::new(
                Histogram::new_with_bounds(1, MAX_KEYING_MILLIS, 2)
                    .expect("Failed to create keying histogram"),
            ),
            start_time: Instant::now(),
        }
    }

    /// Record a received datagram.
    pub fn record_datagram(&self, len: usize) {
        self.datagrams.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_empty(&self) {
        self.empty_datagrams.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_control(&self) {
        self.control_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_directive(&self) {
        self.unknown_directives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_character(&self) {
        self.characters_keyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unencodable(&self) {
        self.unencodable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit(&self) {
        self.units_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an external command run and whether it succeeded.
    pub fn record_rig_command(&self, success: bool) {
        self.rig_commands.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.rig_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record how long one text message took to key.
    pub fn record_keying_time(&self, elapsed: Duration) {
        let millis = (elapsed.as_millis() as u64).clamp(1, MAX_KEYING_MILLIS);
        if let Ok(mut hist) = self.keying_histogram.write() {
            let _ = hist.record(millis);
        }
    }

    /// Get the elapsed time since stats collection started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Generate a summary report.
    pub fn summary(&self) -> StatsSummary {
        let keying_percentiles = self
            .keying_histogram
            .read()
            .ok()
            .filter(|h| h.len() > 0)
            .map(|h| HistogramPercentiles {
                p50: h.value_at_quantile(0.50),
                p90: h.value_at_quantile(0.90),
                p99: h.value_at_quantile(0.99),
                min: h.min(),
                max: h.max(),
                mean: h.mean(),
            });

        StatsSummary {
            elapsed_secs: self.elapsed().as_secs_f64(),
            datagrams: self.datagrams.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            empty_datagrams: self.empty_datagrams.load(Ordering::Relaxed),
            control_messages: self.control_messages.load(Ordering::Relaxed),
            unknown_directives: self.unknown_directives.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            characters_keyed: self.characters_keyed.load(Ordering::Relaxed),
            unencodable: self.unencodable.load(Ordering::Relaxed),
            units_written: self.units_written.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            rig_commands: self.rig_commands.load(Ordering::Relaxed),
            rig_failures: self.rig_failures.load(Ordering::Relaxed),
            keying_percentiles,
        }
    }
}

impl Default for KeyerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Percentile values from a histogram.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramPercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

/// Summary of collected statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub elapsed_secs: f64,
    pub datagrams: u64,
    pub bytes_received: u64,
    pub empty_datagrams: u64,
    pub control_messages: u64,
    pub unknown_directives: u64,
    pub aborts: u64,
    pub characters_keyed: u64,
    pub unencodable: u64,
    pub units_written: u64,
    pub resets: u64,
    pub rig_commands: u64,
    pub rig_failures: u64,
    pub keying_percentiles: Option<HistogramPercentiles>,
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f, "                  CW KEYER STATISTICS")?;
        writeln!(f, "═══════════════════════════════════════════════════════")?;
        writeln!(f)?;
        writeln!(f, "Runtime: {:.1}s", self.elapsed_secs)?;
        writeln!(
            f,
            "Datagrams: {} ({} bytes, {} empty)",
            self.datagrams, self.bytes_received, self.empty_datagrams
        )?;
        writeln!(
            f,
            "Control messages: {} ({} aborts, {} unknown)",
            self.control_messages, self.aborts, self.unknown_directives
        )?;
        writeln!(f, "Characters keyed: {}", self.characters_keyed)?;
        writeln!(f, "Unencodable characters: {}", self.unencodable)?;
        writeln!(f, "Units written: {}", self.units_written)?;
        writeln!(f, "Resets: {}", self.resets)?;
        if self.rig_commands > 0 {
            writeln!(
                f,
                "Rig commands: {} ({} failed)",
                self.rig_commands, self.rig_failures
            )?;
        }

        if let Some(ref p) = self.keying_percentiles {
            writeln!(f)?;
            writeln!(f, "Keying Time per Message (ms):")?;
            writeln!(f, "  Min: {}, Max: {}, Mean: {:.1}", p.min, p.max, p.mean)?;
            writeln!(f, "  P50: {}, P90: {}, P99: {}", p.p50, p.p90, p.p99)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_datagram() {
        let stats = KeyerStats::new();
        stats.record_datagram(4);
        stats.record_datagram(0);
        stats.record_empty();

        assert_eq!(stats.datagrams.load(Ordering::Relaxed), 2);
        assert_eq!(stats.bytes_received.load(Ordering::Relaxed), 4);
        assert_eq!(stats.empty_datagrams.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rig_command_failures() {
        let stats = KeyerStats::new();
        stats.record_rig_command(true);
        stats.record_rig_command(false);

        let summary = stats.summary();
        assert_eq!(summary.rig_commands, 2);
        assert_eq!(summary.rig_failures, 1);
    }

    #[test]
    fn test_summary_without_messages_has_no_percentiles() {
        let summary = KeyerStats::new().summary();
        assert!(summary.keying_percentiles.is_none());
        assert!(summary.to_string().contains("Units written: 0"));
    }

    #[test]
    fn test_keying_time_histogram() {
        let stats = KeyerStats::new();
        stats.record_keying_time(Duration::from_millis(1200));
        stats.record_keying_time(Duration::ZERO);

        let p = stats.summary().keying_percentiles.unwrap();
        assert_eq!(p.min, 1);
        assert!(p.max >= 1190 && p.max <= 1210);
    }

    #[test]
    fn test_summary_display() {
        let stats = KeyerStats::new();
        stats.record_character();
        stats.record_unencodable();
        stats.record_unit();
        stats.record_rig_command(false);

        let text = stats.summary().to_string();
        assert!(text.contains("Characters keyed: 1"));
        assert!(text.contains("Unencodable characters: 1"));
        assert!(text.contains("Rig commands: 1 (1 failed)"));
    }
}
