use std::time::{Duration, Instant};

use serde::Serialize;

/// Payload delivered to progress callbacks. Any field may be absent when
/// it is unknown (e.g. `percent` without a content length).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub message: Option<String>,
    pub percent: Option<f64>,
    pub bytes_per_second: Option<u64>,
    pub bytes_done: Option<u64>,
    pub bytes_total: Option<u64>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>, percent: Option<f64>) -> Self {
        Self {
            message: Some(message.into()),
            percent,
            ..Self::default()
        }
    }

    /// Re-map this event's percent into `[start, end]` of an enclosing operation.
    pub fn scaled(mut self, start: f64, end: f64) -> Self {
        if let Some(p) = self.percent {
            self.percent = Some(start + (end - start) * (p / 100.0));
        }
        self
    }
}

/// Callback signature used by every long-running operation.
pub type ProgressFn<'a> = dyn Fn(ProgressEvent) + Send + Sync + 'a;

pub(crate) fn emit(on_progress: Option<&ProgressFn<'_>>, event: ProgressEvent) {
    if let Some(callback) = on_progress {
        callback(event);
    }
}

/// Throttles byte-level progress to at most one event per `interval`.
pub(crate) struct ProgressTracker {
    label: String,
    interval: Duration,
    last_emit: Instant,
    last_bytes: u64,
}

impl ProgressTracker {
    pub fn new(label: impl Into<String>, interval: Duration) -> Self {
        Self {
            label: label.into(),
            interval,
            last_emit: Instant::now(),
            last_bytes: 0,
        }
    }

    pub fn update(&mut self, done: u64, total: Option<u64>) -> Option<ProgressEvent> {
        let elapsed = self.last_emit.elapsed();
        if elapsed < self.interval {
            return None;
        }
        Some(self.snapshot(done, total, elapsed))
    }

    pub fn finish(&mut self, done: u64, total: Option<u64>) -> ProgressEvent {
        let elapsed = self.last_emit.elapsed();
        self.snapshot(done, total, elapsed)
    }

    fn snapshot(&mut self, done: u64, total: Option<u64>, elapsed: Duration) -> ProgressEvent {
        let secs = elapsed.as_secs_f64();
        let speed = if secs > 0.0 {
            Some((done.saturating_sub(self.last_bytes) as f64 / secs) as u64)
        } else {
            None
        };
        self.last_emit = Instant::now();
        self.last_bytes = done;

        let percent = total
            .filter(|t| *t > 0)
            .map(|t| (done as f64 / t as f64 * 100.0).min(100.0));

        ProgressEvent {
            message: Some(format!("Downloading {}", self.label)),
            percent,
            // Speed is only meaningful when we can also report a total.
            bytes_per_second: speed.filter(|_| total.is_some()),
            bytes_done: Some(done),
            bytes_total: total,
        }
    }
}
