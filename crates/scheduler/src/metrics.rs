use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// Timing collected while a run drains.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    /// Executions per group (family name, or block name for plain blocks).
    pub executions: HashMap<String, u64>,
    /// Mean duration per group.
    pub avg_duration: HashMap<String, Duration>,
    /// Duration of each block, in completion order.
    pub durations: IndexMap<String, Duration>,
    pub last_finished: HashMap<String, DateTime<Utc>>,
    /// Most blocks in flight at once.
    pub peak_in_flight: usize,
}

impl RunMetrics {
    /// Record one finished block under its group.
    pub fn record_execution(&mut self, group: &str, block: &str, duration: Duration) {
        *self.executions.entry(group.to_string()).or_default() += 1;
        self.last_finished.insert(block.to_string(), Utc::now());
        self.durations.insert(block.to_string(), duration);

        let count = self.executions[group];
        let prev_avg = self.avg_duration.get(group).copied().unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_duration.insert(group.to_string(), new_avg);
    }

    pub fn observe_in_flight(&mut self, in_flight: usize) {
        self.peak_in_flight = self.peak_in_flight.max(in_flight);
    }

    pub fn total_block_time(&self) -> Duration {
        self.durations.values().sum()
    }
}
