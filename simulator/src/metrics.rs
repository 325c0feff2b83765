//! Simulation metrics.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use crate::scenario::Outcome;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total transfers attempted.
    pub total_transfers: u64,
    /// Committed transfers.
    pub successful_transfers: u64,
    /// Transfers refused (invalid input, unknown account, overdraft).
    pub rejected_transfers: u64,
    /// Transfers aborted by the datastore, a deadline or cancellation.
    pub failed_transfers: u64,
    /// Latency samples (microseconds).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_transfers: 0,
            successful_transfers: 0,
            rejected_transfers: 0,
            failed_transfers: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record one transfer attempt.
    pub fn record(&mut self, outcome: Outcome, latency: Duration) {
        self.total_transfers += 1;
        match outcome {
            Outcome::Success => self.successful_transfers += 1,
            Outcome::InvalidArgument | Outcome::NotFound => self.rejected_transfers += 1,
            Outcome::Persistence | Outcome::Aborted => self.failed_transfers += 1,
        }

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples
            .push_back(u64::try_from(latency.as_micros()).unwrap_or(u64::MAX));
    }

    /// Get p50 latency.
    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_transfers == 0 {
            return 0.0;
        }

        self.successful_transfers as f64 / self.total_transfers as f64
    }

    /// Transfers per second over `elapsed`.
    pub fn throughput(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }

        self.total_transfers as f64 / secs
    }

    /// Summarize for printing.
    pub fn report(&self, scenario: &str, elapsed: Duration) -> SimulationReport {
        SimulationReport {
            scenario: scenario.to_string(),
            total: self.total_transfers,
            succeeded: self.successful_transfers,
            rejected: self.rejected_transfers,
            failed: self.failed_transfers,
            success_rate: self.success_rate(),
            p50_latency_us: self.p50_latency_us(),
            p99_latency_us: self.p99_latency_us(),
            throughput_per_sec: self.throughput(elapsed),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// End-of-run summary.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub total: u64,
    pub succeeded: u64,
    pub rejected: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub p50_latency_us: u64,
    pub p99_latency_us: u64,
    pub throughput_per_sec: f64,
    pub elapsed_ms: u64,
}
