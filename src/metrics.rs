//! Performance counters for the frame pipeline.
//!
//! Sinks are called from the generation and presentation stages, so every
//! method must return immediately. [`MetricsLogger`] only touches atomics on
//! the hot path and reports from its own thread.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::config::METRICS_LOG_INTERVAL;

/// Receiver of timing, allocation and interaction events
pub trait MetricsSink: Send + Sync {
    fn start_monitoring(&self) {}
    fn stop_monitoring(&self) {}
    fn on_frame_generated(&self, cost: Duration);
    fn on_frame_presented(&self, cost: Duration);
    fn on_buffer_allocated(&self, bytes: usize);
    fn on_buffer_released(&self, bytes: usize);
    fn on_user_interaction(&self);
    fn on_presentation_failed(&self);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn on_frame_generated(&self, _cost: Duration) {}
    fn on_frame_presented(&self, _cost: Duration) {}
    fn on_buffer_allocated(&self, _bytes: usize) {}
    fn on_buffer_released(&self, _bytes: usize) {}
    fn on_user_interaction(&self) {}
    fn on_presentation_failed(&self) {}
}

#[derive(Default)]
struct Counters {
    generated: AtomicU64,
    generation_nanos: AtomicU64,
    presented: AtomicU64,
    presentation_nanos: AtomicU64,
    interactions: AtomicU64,
    failures: AtomicU64,
    live_buffer_bytes: AtomicU64,
    peak_buffer_bytes: AtomicU64,
}

/// Point-in-time view of the counters for the current reporting interval
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_generated: u64,
    pub frames_presented: u64,
    pub interactions: u64,
    pub presentation_failures: u64,
    pub live_buffer_bytes: u64,
    pub peak_buffer_bytes: u64,
}

/// One logged report
#[derive(Clone, Copy, Debug)]
pub struct MetricsReport {
    pub fps: f64,
    pub avg_generation: Duration,
    pub avg_presentation: Duration,
    pub live_buffer_bytes: u64,
    pub peak_buffer_bytes: u64,
    pub interactions: u64,
    pub presentation_failures: u64,
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FPS: {:.1} | Gen: {:.2}ms | Present: {:.2}ms | Buffers: {} (peak {}) | Interactions: {}",
            self.fps,
            self.avg_generation.as_secs_f64() * 1000.0,
            self.avg_presentation.as_secs_f64() * 1000.0,
            format_bytes(self.live_buffer_bytes),
            format_bytes(self.peak_buffer_bytes),
            self.interactions,
        )?;
        if self.presentation_failures > 0 {
            write!(f, " | Failures: {}", self.presentation_failures)?;
        }
        Ok(())
    }
}

struct Monitor {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Aggregates pipeline events and logs a report every interval
pub struct MetricsLogger {
    counters: Arc<Counters>,
    interval: Duration,
    monitor: Mutex<Option<Monitor>>,
}

impl Default for MetricsLogger {
    fn default() -> Self {
        Self::new(METRICS_LOG_INTERVAL)
    }
}

impl MetricsLogger {
    pub fn new(interval: Duration) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            interval,
            monitor: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            frames_generated: c.generated.load(Ordering::Relaxed),
            frames_presented: c.presented.load(Ordering::Relaxed),
            interactions: c.interactions.load(Ordering::Relaxed),
            presentation_failures: c.failures.load(Ordering::Relaxed),
            live_buffer_bytes: c.live_buffer_bytes.load(Ordering::Relaxed),
            peak_buffer_bytes: c.peak_buffer_bytes.load(Ordering::Relaxed),
        }
    }

    /// Build a report for the last `elapsed` and reset the interval counters
    pub fn take_report(&self, elapsed: Duration) -> MetricsReport {
        take_report(&self.counters, elapsed)
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().map(|m| m.is_some()).unwrap_or(false)
    }
}

fn take_report(counters: &Counters, elapsed: Duration) -> MetricsReport {
    let generated = counters.generated.swap(0, Ordering::Relaxed);
    let generation_nanos = counters.generation_nanos.swap(0, Ordering::Relaxed);
    let presented = counters.presented.swap(0, Ordering::Relaxed);
    let presentation_nanos = counters.presentation_nanos.swap(0, Ordering::Relaxed);

    let average = |nanos: u64, count: u64| {
        if count > 0 {
            Duration::from_nanos(nanos / count)
        } else {
            Duration::ZERO
        }
    };
    let seconds = elapsed.as_secs_f64();

    MetricsReport {
        fps: if seconds > 0.0 { presented as f64 / seconds } else { 0.0 },
        avg_generation: average(generation_nanos, generated),
        avg_presentation: average(presentation_nanos, presented),
        live_buffer_bytes: counters.live_buffer_bytes.load(Ordering::Relaxed),
        peak_buffer_bytes: counters.peak_buffer_bytes.load(Ordering::Relaxed),
        interactions: counters.interactions.swap(0, Ordering::Relaxed),
        presentation_failures: counters.failures.swap(0, Ordering::Relaxed),
    }
}

impl MetricsSink for MetricsLogger {
    fn start_monitoring(&self) {
        let Ok(mut monitor) = self.monitor.lock() else {
            return;
        };
        if monitor.is_some() {
            return;
        }

        let (stop, stopped) = bounded::<()>(0);
        let counters = Arc::clone(&self.counters);
        let interval = self.interval;
        let spawned = std::thread::Builder::new()
            .name("voronoi-metrics".into())
            .spawn(move || {
                let mut last = Instant::now();
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let now = Instant::now();
                            let report = take_report(&counters, now - last);
                            last = now;
                            log::info!(target: "voronoi::metrics", "{}", report);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            });

        match spawned {
            Ok(handle) => *monitor = Some(Monitor { stop, handle }),
            Err(e) => log::warn!("Metrics monitor not started: {}", e),
        }
    }

    fn stop_monitoring(&self) {
        let taken = self.monitor.lock().ok().and_then(|mut m| m.take());
        if let Some(Monitor { stop, handle }) = taken {
            drop(stop);
            let _ = handle.join();
        }
    }

    fn on_frame_generated(&self, cost: Duration) {
        self.counters.generated.fetch_add(1, Ordering::Relaxed);
        self.counters
            .generation_nanos
            .fetch_add(cost.as_nanos() as u64, Ordering::Relaxed);
    }

    fn on_frame_presented(&self, cost: Duration) {
        self.counters.presented.fetch_add(1, Ordering::Relaxed);
        self.counters
            .presentation_nanos
            .fetch_add(cost.as_nanos() as u64, Ordering::Relaxed);
    }

    fn on_buffer_allocated(&self, bytes: usize) {
        let live = self
            .counters
            .live_buffer_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed)
            + bytes as u64;
        self.counters.peak_buffer_bytes.fetch_max(live, Ordering::Relaxed);
    }

    fn on_buffer_released(&self, bytes: usize) {
        let _ = self.counters.live_buffer_bytes.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |live| Some(live.saturating_sub(bytes as u64)),
        );
    }

    fn on_user_interaction(&self) {
        self.counters.interactions.fetch_add(1, Ordering::Relaxed);
    }

    fn on_presentation_failed(&self) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for MetricsLogger {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

/// Human-readable decimal byte count
pub fn format_bytes(bytes: u64) -> String {
    match bytes {
        b if b >= 1_000_000_000 => format!("{:.1} GB", b as f64 / 1_000_000_000.0),
        b if b >= 1_000_000 => format!("{:.1} MB", b as f64 / 1_000_000.0),
        b if b >= 1_000 => format!("{:.1} KB", b as f64 / 1_000.0),
        b => format!("{} B", b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2_048), "2.0 KB");
        assert_eq!(format_bytes(890_712), "890.7 KB");
        assert_eq!(format_bytes(3_500_000), "3.5 MB");
        assert_eq!(format_bytes(2_000_000_000), "2.0 GB");
    }

    #[test]
    fn test_buffer_accounting() {
        let metrics = MetricsLogger::default();
        metrics.on_buffer_allocated(1_000);
        metrics.on_buffer_allocated(1_000);
        metrics.on_buffer_released(1_000);
        let snap = metrics.snapshot();
        assert_eq!(snap.live_buffer_bytes, 1_000);
        assert_eq!(snap.peak_buffer_bytes, 2_000);

        // Releasing more than is live never wraps
        metrics.on_buffer_released(5_000);
        assert_eq!(metrics.snapshot().live_buffer_bytes, 0);
    }

    #[test]
    fn test_report_averages_and_resets() {
        let metrics = MetricsLogger::default();
        metrics.on_frame_generated(Duration::from_millis(4));
        metrics.on_frame_generated(Duration::from_millis(6));
        for _ in 0..10 {
            metrics.on_frame_presented(Duration::from_millis(2));
        }
        metrics.on_user_interaction();

        let report = metrics.take_report(Duration::from_secs(2));
        assert_eq!(report.avg_generation, Duration::from_millis(5));
        assert_eq!(report.avg_presentation, Duration::from_millis(2));
        assert!((report.fps - 5.0).abs() < 1e-9);
        assert_eq!(report.interactions, 1);

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_generated, 0);
        assert_eq!(snap.frames_presented, 0);
        assert_eq!(snap.interactions, 0);
    }

    #[test]
    fn test_monitor_start_stop() {
        let metrics = MetricsLogger::new(Duration::from_millis(5));
        metrics.start_monitoring();
        metrics.start_monitoring();
        assert!(metrics.is_monitoring());
        std::thread::sleep(Duration::from_millis(20));
        metrics.stop_monitoring();
        assert!(!metrics.is_monitoring());
    }
}
