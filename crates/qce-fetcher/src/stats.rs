use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-fetcher-instance call counters, surfaced for observability.
#[derive(Debug, Default)]
pub struct FetcherStats {
    call_count: u64,
    success_count: u64,
    failure_count: u64,
    total_response_ms: u64,
    consecutive_failures: u32,
    last_call_at: Option<DateTime<Utc>>,
}

/// Read-only snapshot, serialisable into status payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub average_response_millis: u64,
    pub consecutive_failures: u32,
    pub last_call_at: Option<DateTime<Utc>>,
}

impl FetcherStats {
    pub fn record_success(&mut self, latency_ms: u64) {
        self.call_count += 1;
        self.success_count += 1;
        self.total_response_ms += latency_ms;
        self.consecutive_failures = 0;
        self.last_call_at = Some(Utc::now());
    }

    pub fn record_failure(&mut self) {
        self.call_count += 1;
        self.failure_count += 1;
        self.consecutive_failures += 1;
        self.last_call_at = Some(Utc::now());
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            call_count: self.call_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            average_response_millis: if self.success_count > 0 {
                self.total_response_ms / self.success_count
            } else {
                0
            },
            consecutive_failures: self.consecutive_failures,
            last_call_at: self.last_call_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_over_successes_only() {
        let mut s = FetcherStats::default();
        s.record_success(100);
        s.record_failure();
        s.record_success(300);
        let snap = s.snapshot();
        assert_eq!(snap.call_count, 3);
        assert_eq!(snap.average_response_millis, 200);
    }

    #[test]
    fn consecutive_failures_reset_on_success() {
        let mut s = FetcherStats::default();
        s.record_failure();
        s.record_failure();
        assert_eq!(s.consecutive_failures(), 2);
        s.record_success(10);
        assert_eq!(s.consecutive_failures(), 0);
    }
}
