//! Token and latency accounting for inference calls.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Instant;

/// Handler categories tracked when collecting metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagehandFunctionName {
    Extract,
    Observe,
}

impl StagehandFunctionName {
    pub fn as_str(self) -> &'static str {
        match self {
            StagehandFunctionName::Extract => "EXTRACT",
            StagehandFunctionName::Observe => "OBSERVE",
        }
    }
}

/// Aggregated metrics for token usage and latency.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagehandMetrics {
    pub extract_prompt_tokens: u64,
    pub extract_completion_tokens: u64,
    pub extract_inference_time_ms: u64,

    pub observe_prompt_tokens: u64,
    pub observe_completion_tokens: u64,
    pub observe_inference_time_ms: u64,

    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_inference_time_ms: u64,
}

impl StagehandMetrics {
    /// Record metrics for a handler and update cumulative totals.
    pub fn record(
        &mut self,
        function: StagehandFunctionName,
        prompt_tokens: u64,
        completion_tokens: u64,
        inference_time_ms: u64,
    ) {
        match function {
            StagehandFunctionName::Extract => {
                self.extract_prompt_tokens += prompt_tokens;
                self.extract_completion_tokens += completion_tokens;
                self.extract_inference_time_ms += inference_time_ms;
            }
            StagehandFunctionName::Observe => {
                self.observe_prompt_tokens += prompt_tokens;
                self.observe_completion_tokens += completion_tokens;
                self.observe_inference_time_ms += inference_time_ms;
            }
        }

        self.total_prompt_tokens += prompt_tokens;
        self.total_completion_tokens += completion_tokens;
        self.total_inference_time_ms += inference_time_ms;
    }
}

/// Metrics shared between the handlers of one session.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    inner: Mutex<StagehandMetrics>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        function: StagehandFunctionName,
        prompt_tokens: u64,
        completion_tokens: u64,
        inference_time_ms: u64,
    ) {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.record(function, prompt_tokens, completion_tokens, inference_time_ms);
    }

    pub fn snapshot(&self) -> StagehandMetrics {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Start an inference timer using [`Instant::now`].
pub fn start_inference_timer() -> Instant {
    Instant::now()
}

/// Return the elapsed milliseconds since the provided start instant.
pub fn get_inference_time_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn record_updates_totals() {
        let mut metrics = StagehandMetrics::default();
        metrics.record(StagehandFunctionName::Extract, 10, 5, 100);
        metrics.record(StagehandFunctionName::Extract, 2, 3, 40);
        metrics.record(StagehandFunctionName::Observe, 1, 1, 20);

        assert_eq!(metrics.extract_prompt_tokens, 12);
        assert_eq!(metrics.extract_completion_tokens, 8);
        assert_eq!(metrics.extract_inference_time_ms, 140);
        assert_eq!(metrics.observe_inference_time_ms, 20);
        assert_eq!(metrics.total_prompt_tokens, 13);
        assert_eq!(metrics.total_completion_tokens, 9);
        assert_eq!(metrics.total_inference_time_ms, 160);
    }

    #[test]
    fn recorder_snapshots_accumulated_values() {
        let recorder = MetricsRecorder::new();
        recorder.record(StagehandFunctionName::Observe, 7, 3, 12);
        recorder.record(StagehandFunctionName::Observe, 1, 1, 8);
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.observe_prompt_tokens, 8);
        assert_eq!(snapshot.total_inference_time_ms, 20);
    }

    #[test]
    fn timer_reports_elapsed_millis() {
        let start = start_inference_timer();
        std::thread::sleep(Duration::from_millis(10));
        assert!(get_inference_time_ms(start) >= 10);
    }
}
