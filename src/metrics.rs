//! Run metrics for the mining job.
//!
//! A [`MetricsRegistry`] is created once at process start, shared with every
//! pipeline component through an [`Arc`](std::sync::Arc), and read back via
//! [`MetricsRegistry::snapshot`] or [`MetricsRegistry::encode_text`] when the
//! job exits. Every cell is a lock-free atomic, so reading never blocks a
//! writer.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metric sample name to current value.
pub type MetricsSnapshot = BTreeMap<String, f64>;

fn add_f64(cell: &AtomicU64, delta: f64) {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(current) + delta).to_bits();
        match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// Something a [`Timer`] can report an elapsed duration to.
pub trait Observe: Send + Sync {
    fn observe(&self, seconds: f64);
}

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last-write-wins value, stored as `f64` bits.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn inc(&self) {
        add_f64(&self.0, 1.0);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Starts a timer that sets this gauge to the elapsed seconds when dropped.
    pub fn start_timer(&self) -> Timer<'_> {
        Timer::new(self)
    }
}

impl Observe for Gauge {
    fn observe(&self, seconds: f64) {
        self.set(seconds);
    }
}

/// Running count and sum of observed durations.
#[derive(Debug, Default)]
pub struct Summary {
    count: AtomicU64,
    sum: AtomicU64,
}

impl Summary {
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    /// Starts a timer that records one observation when dropped.
    pub fn start_timer(&self) -> Timer<'_> {
        Timer::new(self)
    }
}

impl Observe for Summary {
    fn observe(&self, seconds: f64) {
        add_f64(&self.sum, seconds);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Scope timer. Reports to its target exactly once, on drop or on
/// [`Timer::stop`], whichever comes first.
#[must_use = "dropping the timer immediately records a zero-length observation"]
pub struct Timer<'a> {
    target: &'a dyn Observe,
    start: Instant,
    done: bool,
}

impl<'a> Timer<'a> {
    fn new(target: &'a dyn Observe) -> Self {
        Self {
            target,
            start: Instant::now(),
            done: false,
        }
    }

    /// Records now and returns the elapsed seconds.
    pub fn stop(mut self) -> f64 {
        self.record()
    }

    fn record(&mut self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        if !self.done {
            self.target.observe(elapsed);
            self.done = true;
        }
        elapsed
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.record();
    }
}

/// Process-wide metrics for the mining job.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    pub extraction_duration: Summary,
    pub run_duration: Gauge,
    pub fetch_duration: Gauge,
    pub records_extracted: Gauge,
    pub dispatch_attempts: Counter,
    pub dispatch_duration: Summary,
    pub extraction_failures: Counter,
    pub dispatch_failures: Counter,
    pub unhandled_errors: Counter,
    pub last_run: Gauge,
}

#[derive(Clone, Copy)]
enum Sample<'a> {
    Counter(&'a Counter),
    Gauge(&'a Gauge),
    Summary(&'a Summary),
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `Err` results in `exceptions_total` and passes the result through.
    pub fn track<T, E>(&self, result: Result<T, E>) -> Result<T, E> {
        if result.is_err() {
            self.unhandled_errors.inc();
        }
        result
    }

    fn families(&self) -> [(&'static str, &'static str, Sample<'_>); 10] {
        [
            (
                "record_extraction_seconds",
                "Time spent extracting an individual record",
                Sample::Summary(&self.extraction_duration),
            ),
            (
                "mining_duration_seconds",
                "Time spent mining data",
                Sample::Gauge(&self.run_duration),
            ),
            (
                "data_download_seconds",
                "Time spent downloading public data",
                Sample::Gauge(&self.fetch_duration),
            ),
            (
                "record_count_total",
                "Records extracted in the current run",
                Sample::Gauge(&self.records_extracted),
            ),
            (
                "telemetry_push_attempts_total",
                "Attempts to push vehicle telemetry",
                Sample::Counter(&self.dispatch_attempts),
            ),
            (
                "telemetry_server_push_seconds",
                "Time spent sending telemetry to the telemetry service",
                Sample::Summary(&self.dispatch_duration),
            ),
            (
                "record_extraction_fail_total",
                "Records that failed extraction",
                Sample::Counter(&self.extraction_failures),
            ),
            (
                "record_sent_fail_total",
                "Records that failed delivery to the telemetry service",
                Sample::Counter(&self.dispatch_failures),
            ),
            (
                "exceptions_total",
                "Errors raised by instrumented operations",
                Sample::Counter(&self.unhandled_errors),
            ),
            (
                "mining_last_run",
                "Unix timestamp of the last run",
                Sample::Gauge(&self.last_run),
            ),
        ]
    }

    /// Current values keyed by sample name. Summaries appear as
    /// `<name>_count` and `<name>_sum`.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut out = MetricsSnapshot::new();
        for (name, _, sample) in self.families() {
            match sample {
                Sample::Counter(c) => {
                    out.insert(name.to_string(), c.get() as f64);
                }
                Sample::Gauge(g) => {
                    out.insert(name.to_string(), g.get());
                }
                Sample::Summary(s) => {
                    out.insert(format!("{name}_count"), s.count() as f64);
                    out.insert(format!("{name}_sum"), s.sum());
                }
            }
        }
        out
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn encode_text(&self) -> String {
        let mut out = String::new();
        for (name, help, sample) in self.families() {
            let kind = match sample {
                Sample::Counter(_) => "counter",
                Sample::Gauge(_) => "gauge",
                Sample::Summary(_) => "summary",
            };
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} {kind}");
            match sample {
                Sample::Counter(c) => {
                    let _ = writeln!(out, "{name} {}", c.get());
                }
                Sample::Gauge(g) => {
                    let _ = writeln!(out, "{name} {}", g.get());
                }
                Sample::Summary(s) => {
                    let _ = writeln!(out, "{name}_sum {}", s.sum());
                    let _ = writeln!(out, "{name}_count {}", s.count());
                }
            }
        }
        out
    }
}
