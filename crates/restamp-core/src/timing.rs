//! Opt-in per-stage timing for rewrite passes.
//!
//! Stages wrap themselves in [`timed`]; when collection is on, each call
//! leaves a sample in a thread-local buffer. [`collect_report`] drains the
//! buffer into a [`TimingReport`] grouped by stage name.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::json;

/// Environment variable that turns collection on.
pub const TIMING_ENV: &str = "RESTAMP_TIMING";

/// Aggregated timings for every stage that ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingReport {
    pub stages: Vec<StageTiming>,
}

/// Statistics for one named stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTiming {
    pub name: String,
    pub count: usize,
    pub total: Duration,
    pub p50: Duration,
    pub max: Duration,
}

struct Sample {
    name: &'static str,
    elapsed: Duration,
}

thread_local! {
    static SAMPLES: RefCell<Vec<Sample>> = const { RefCell::new(Vec::new()) };
}

static ENABLED: AtomicBool = AtomicBool::new(false);

/// Returns true when `RESTAMP_TIMING` holds a truthy value
/// (`1`, `true`, `yes`, `on`, any case).
#[must_use]
pub fn timing_enabled_from_env() -> bool {
    std::env::var(TIMING_ENV)
        .ok()
        .is_some_and(|value| is_truthy(&value))
}

/// Turn collection on or off. Turning it off drops pending samples.
pub fn set_timing_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
    if !enabled {
        clear_timings();
    }
}

#[must_use]
pub fn is_timing_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Drop every sample recorded on this thread.
pub fn clear_timings() {
    SAMPLES.with(|samples| samples.borrow_mut().clear());
}

/// Run `f`, recording its wall time under `stage` when collection is on.
pub fn timed<R>(stage: &'static str, f: impl FnOnce() -> R) -> R {
    if !is_timing_enabled() {
        return f();
    }
    let started = Instant::now();
    let result = f();
    record(stage, started.elapsed());
    result
}

/// Drain this thread's samples into a report, stages in name order.
#[must_use]
pub fn collect_report() -> TimingReport {
    let samples = SAMPLES.with(|samples| std::mem::take(&mut *samples.borrow_mut()));

    let mut grouped: BTreeMap<&'static str, Vec<Duration>> = BTreeMap::new();
    for sample in samples {
        grouped.entry(sample.name).or_default().push(sample.elapsed);
    }

    let stages = grouped
        .into_iter()
        .map(|(name, mut values)| {
            values.sort_unstable();
            StageTiming {
                name: name.to_string(),
                count: values.len(),
                total: values.iter().sum(),
                p50: values[(values.len() - 1) / 2],
                max: values[values.len() - 1],
            }
        })
        .collect();

    TimingReport { stages }
}

impl TimingReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Sum of every stage's total.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.stages.iter().map(|stage| stage.total).sum()
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let stages = self
            .stages
            .iter()
            .map(|stage| {
                json!({
                    "name": stage.name,
                    "count": stage.count,
                    "total_us": stage.total.as_micros(),
                    "p50_us": stage.p50.as_micros(),
                    "max_us": stage.max.as_micros(),
                })
            })
            .collect::<Vec<_>>();

        json!({ "stages": stages, "total_us": self.total().as_micros() })
    }

    /// Fixed-width table for terminal output.
    #[must_use]
    pub fn display_table(&self) -> String {
        if self.stages.is_empty() {
            return "No timing samples recorded.".to_string();
        }

        let mut out = String::new();
        out.push_str("stage                 count     total       p50       max\n");
        out.push_str("---------------------------------------------------------\n");
        for stage in &self.stages {
            let _ = writeln!(
                out,
                "{:<20} {:>6} {:>9} {:>9} {:>9}",
                stage.name,
                stage.count,
                format_duration(stage.total),
                format_duration(stage.p50),
                format_duration(stage.max),
            );
        }
        out
    }
}

fn record(stage: &'static str, elapsed: Duration) {
    SAMPLES.with(|samples| {
        samples.borrow_mut().push(Sample {
            name: stage,
            elapsed,
        });
    });
}

fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros >= 1_000_000 {
        format!("{}.{:03}s", micros / 1_000_000, (micros % 1_000_000) / 1_000)
    } else if micros >= 1_000 {
        format!("{}.{:03}ms", micros / 1_000, micros % 1_000)
    } else {
        format!("{micros}µs")
    }
}

fn is_truthy(value: &str) -> bool {
    ["1", "true", "yes", "on"]
        .iter()
        .any(|truthy| value.trim().eq_ignore_ascii_case(truthy))
}
