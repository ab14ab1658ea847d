//! Telemetry hooks for generation performance measurement.
//!
//! Provides:
//! - [`GenerationMetrics`]: time to first fragment, fragments/sec and outcome
//! - [`TelemetryHook`] trait: callback interface for metric reporting
//! - [`GenerationTimer`]: records timestamps for one attempt and computes metrics
//! - [`NoopTelemetry`] / [`LogTelemetry`] / [`TracingTelemetry`]: built-in hooks

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use uuid::Uuid;

/// How a generation attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The engine signalled completion (or its stream ended).
    Completed,
    /// The engine failed mid-stream.
    Failed,
    /// The consumer went away before completion.
    Cancelled,
}

impl fmt::Display for GenerationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationOutcome::Completed => write!(f, "completed"),
            GenerationOutcome::Failed => write!(f, "failed"),
            GenerationOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Aggregate metrics from one generation attempt.
#[derive(Debug, Clone)]
pub struct GenerationMetrics {
    pub request_id: Uuid,
    /// 1 for the first attempt, 2 for the retry.
    pub attempt: u32,
    pub outcome: GenerationOutcome,
    /// Time from start to the first non-empty fragment, in milliseconds.
    pub ttff_ms: f64,
    /// Fragments per second after the first one arrived.
    pub fragments_per_sec: f64,
    /// Number of non-empty fragments emitted.
    pub fragments: usize,
    /// Total wall-clock time in milliseconds.
    pub total_time_ms: f64,
}

/// Callback trait for generation telemetry.
///
/// All methods have default no-op implementations so hooks can be selective.
pub trait TelemetryHook: Send + Sync {
    /// Called when the first non-empty fragment of an attempt arrives.
    fn on_first_fragment(&self, _request_id: Uuid, _ttff_ms: f64) {}

    /// Called when an attempt ends, however it ended.
    fn on_generation_complete(&self, _metrics: &GenerationMetrics) {}
}

/// No-op telemetry hook.
#[derive(Debug, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Collects metrics into a retrievable report.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    reports: Arc<Mutex<Vec<GenerationMetrics>>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently finished attempt.
    pub fn last_metrics(&self) -> Option<GenerationMetrics> {
        self.reports().last().cloned()
    }

    /// Every finished attempt, oldest first.
    pub fn reports(&self) -> Vec<GenerationMetrics> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_generation_complete(&self, metrics: &GenerationMetrics) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(metrics.clone());
    }
}

/// Emits one structured `tracing` event per finished attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryHook for TracingTelemetry {
    fn on_first_fragment(&self, request_id: Uuid, ttff_ms: f64) {
        tracing::debug!(%request_id, ttff_ms, "first fragment");
    }

    fn on_generation_complete(&self, m: &GenerationMetrics) {
        tracing::info!(
            request_id = %m.request_id,
            attempt = m.attempt,
            outcome = %m.outcome,
            fragments = m.fragments,
            ttff_ms = format_args!("{:.1}", m.ttff_ms),
            fragments_per_sec = format_args!("{:.1}", m.fragments_per_sec),
            total_ms = format_args!("{:.1}", m.total_time_ms),
            "generation finished"
        );
    }
}

/// Records timestamps during one attempt to compute [`GenerationMetrics`].
///
/// Usage:
/// 1. Call [`GenerationTimer::new`] when the attempt starts
/// 2. Call [`mark_fragment`](GenerationTimer::mark_fragment) per emitted fragment
/// 3. Call [`finish`](GenerationTimer::finish) with the outcome
pub struct GenerationTimer {
    request_id: Uuid,
    attempt: u32,
    start: Instant,
    first_fragment: Option<Instant>,
    fragments: usize,
    hook: Arc<dyn TelemetryHook>,
}

impl GenerationTimer {
    pub fn new(request_id: Uuid, attempt: u32, hook: Arc<dyn TelemetryHook>) -> Self {
        Self {
            request_id,
            attempt,
            start: Instant::now(),
            first_fragment: None,
            fragments: 0,
            hook,
        }
    }

    /// Count one emitted fragment. Fires `on_first_fragment` the first time.
    pub fn mark_fragment(&mut self) {
        self.fragments += 1;
        if self.first_fragment.is_none() {
            let now = Instant::now();
            self.first_fragment = Some(now);
            let ttff_ms = now.duration_since(self.start).as_secs_f64() * 1000.0;
            self.hook.on_first_fragment(self.request_id, ttff_ms);
        }
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Finalize and return metrics. Fires `on_generation_complete`.
    pub fn finish(self, outcome: GenerationOutcome) -> GenerationMetrics {
        let total_time_ms = self.start.elapsed().as_secs_f64() * 1000.0;

        let ttff_ms = self
            .first_fragment
            .map(|t| t.duration_since(self.start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let stream_time_ms = total_time_ms - ttff_ms;
        let fragments_per_sec = if stream_time_ms > 0.0 && self.fragments > 1 {
            (self.fragments - 1) as f64 / (stream_time_ms / 1000.0)
        } else {
            0.0
        };

        let metrics = GenerationMetrics {
            request_id: self.request_id,
            attempt: self.attempt,
            outcome,
            ttff_ms,
            fragments_per_sec,
            fragments: self.fragments,
            total_time_ms,
        };

        self.hook.on_generation_complete(&metrics);
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metrics() -> GenerationMetrics {
        GenerationMetrics {
            request_id: Uuid::new_v4(),
            attempt: 1,
            outcome: GenerationOutcome::Completed,
            ttff_ms: 12.5,
            fragments_per_sec: 80.0,
            fragments: 8,
            total_time_ms: 112.5,
        }
    }

    #[test]
    fn noop_telemetry_compiles_and_runs() {
        let hook = NoopTelemetry;
        hook.on_first_fragment(Uuid::new_v4(), 10.0);
        hook.on_generation_complete(&sample_metrics());
    }

    #[test]
    fn log_telemetry_captures_metrics() {
        let hook = LogTelemetry::new();
        assert!(hook.last_metrics().is_none());

        hook.on_generation_complete(&sample_metrics());

        let captured = hook.last_metrics().unwrap();
        assert_eq!(captured.ttff_ms, 12.5);
        assert_eq!(captured.fragments, 8);
        assert_eq!(hook.reports().len(), 1);
    }

    #[test]
    fn timer_counts_fragments() {
        let log = LogTelemetry::new();
        let id = Uuid::new_v4();

        let mut timer = GenerationTimer::new(id, 2, Arc::new(log.clone()));
        timer.mark_fragment();
        timer.mark_fragment();
        timer.mark_fragment();
        assert_eq!(timer.fragments(), 3);
        let metrics = timer.finish(GenerationOutcome::Completed);

        assert_eq!(metrics.request_id, id);
        assert_eq!(metrics.attempt, 2);
        assert_eq!(metrics.fragments, 3);
        assert!(metrics.ttff_ms >= 0.0);
        assert!(metrics.total_time_ms >= metrics.ttff_ms);

        let captured = log.last_metrics().unwrap();
        assert_eq!(captured.fragments, 3);
        assert_eq!(captured.outcome, GenerationOutcome::Completed);
    }

    #[test]
    fn timer_without_fragments() {
        let timer = GenerationTimer::new(Uuid::new_v4(), 1, Arc::new(NoopTelemetry));
        let metrics = timer.finish(GenerationOutcome::Failed);
        assert_eq!(metrics.ttff_ms, 0.0);
        assert_eq!(metrics.fragments, 0);
        assert_eq!(metrics.fragments_per_sec, 0.0);
        assert_eq!(metrics.outcome, GenerationOutcome::Failed);
    }

    #[test]
    fn outcome_display() {
        assert_eq!(GenerationOutcome::Cancelled.to_string(), "cancelled");
    }
}
