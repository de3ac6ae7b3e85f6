use std::collections::VecDeque;
use std::sync::Mutex;

/// Fixed bucket ladder shared by every fast-path histogram, in milliseconds.
pub const BUCKET_BOUNDS_MS: [f64; 15] = [
    0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0,
    10000.0,
];

/// Bucketed duration distribution with a bounded sample ring for percentile
/// recomputation.
#[derive(Debug)]
pub struct LatencyHistogram {
    samples: VecDeque<f64>,
    capacity: usize,
    buckets: [u64; BUCKET_BOUNDS_MS.len() + 1],
    count: u64,
    sum_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

impl LatencyHistogram {
    pub fn new(capacity: usize) -> Self {
        LatencyHistogram {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            buckets: [0; BUCKET_BOUNDS_MS.len() + 1],
            count: 0,
            sum_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
        }
    }

    pub fn record(&mut self, sample_ms: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample_ms);
        let slot = BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| sample_ms <= *bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.buckets[slot] += 1;
        self.count += 1;
        self.sum_ms += sample_ms;
        self.min_ms = self.min_ms.min(sample_ms);
        self.max_ms = self.max_ms.max(sample_ms);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms / self.count as f64
        }
    }

    /// Nearest-rank percentile over the retained sample ring; `p` in [0, 1].
    pub fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
        sorted[rank - 1]
    }

    /// `(upper_bound_ms, cumulative_count)` pairs, the final entry being
    /// `(+inf, total)`.
    pub fn cumulative_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut out = Vec::with_capacity(self.buckets.len());
        for (index, count) in self.buckets.iter().enumerate() {
            cumulative += count;
            let bound = BUCKET_BOUNDS_MS
                .get(index)
                .copied()
                .unwrap_or(f64::INFINITY);
            out.push((bound, cumulative));
        }
        out
    }

    pub fn reset(&mut self) {
        *self = LatencyHistogram::new(self.capacity);
    }
}

/// One fast-path operation class: batch commit, zero-copy send, transaction
/// commit, or transaction rollback.
#[derive(Debug)]
pub(crate) struct OpStats {
    pub histogram: LatencyHistogram,
    pub operations: u64,
}

impl OpStats {
    fn new(capacity: usize) -> Self {
        OpStats {
            histogram: LatencyHistogram::new(capacity),
            operations: 0,
        }
    }

    fn record(&mut self, duration_ms: f64) {
        self.histogram.record(duration_ms);
        self.operations += 1;
    }
}

/// Aggregated fast-path performance tracking, consumed by the Prometheus
/// exporter and `PerformanceStats` snapshots.
pub(crate) struct PerfTracker {
    pub batch: Mutex<OpStats>,
    pub zero_copy: Mutex<OpStats>,
    pub txn_commit: Mutex<OpStats>,
    pub txn_rollback: Mutex<OpStats>,
}

impl PerfTracker {
    pub fn new(sample_ring: usize) -> Self {
        PerfTracker {
            batch: Mutex::new(OpStats::new(sample_ring)),
            zero_copy: Mutex::new(OpStats::new(sample_ring)),
            txn_commit: Mutex::new(OpStats::new(sample_ring)),
            txn_rollback: Mutex::new(OpStats::new(sample_ring)),
        }
    }

    pub fn record_batch(&self, duration_ms: f64) {
        self.batch.lock().unwrap().record(duration_ms);
    }

    pub fn record_zero_copy(&self, duration_ms: f64) {
        self.zero_copy.lock().unwrap().record(duration_ms);
    }

    pub fn record_txn_commit(&self, duration_ms: f64) {
        self.txn_commit.lock().unwrap().record(duration_ms);
    }

    pub fn record_txn_rollback(&self, duration_ms: f64) {
        self.txn_rollback.lock().unwrap().record(duration_ms);
    }

    pub fn batch_mean_ms(&self) -> f64 {
        self.batch.lock().unwrap().histogram.mean_ms()
    }

    pub fn zero_copy_mean_ms(&self) -> f64 {
        self.zero_copy.lock().unwrap().histogram.mean_ms()
    }

    pub fn batch_operations(&self) -> u64 {
        self.batch.lock().unwrap().operations
    }

    pub fn zero_copy_operations(&self) -> u64 {
        self.zero_copy.lock().unwrap().operations
    }

    pub fn reset(&self) {
        self.batch.lock().unwrap().histogram.reset();
        self.zero_copy.lock().unwrap().histogram.reset();
        self.txn_commit.lock().unwrap().histogram.reset();
        self.txn_rollback.lock().unwrap().histogram.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_nearest_rank() {
        let mut histogram = LatencyHistogram::new(100);
        for sample in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0] {
            histogram.record(sample);
        }
        assert_eq!(histogram.percentile(0.50), 5.0);
        assert_eq!(histogram.percentile(0.95), 10.0);
        assert_eq!(histogram.percentile(1.0), 10.0);
    }

    #[test]
    fn ring_is_bounded() {
        let mut histogram = LatencyHistogram::new(4);
        for sample in 0..100 {
            histogram.record(sample as f64);
        }
        assert_eq!(histogram.count(), 100);
        // Percentiles only see the latest four samples.
        assert_eq!(histogram.percentile(0.5), 98.0);
    }

    #[test]
    fn buckets_accumulate() {
        let mut histogram = LatencyHistogram::new(16);
        histogram.record(0.05);
        histogram.record(0.3);
        histogram.record(15_000.0);
        let buckets = histogram.cumulative_buckets();
        assert_eq!(buckets[0], (0.1, 1));
        assert_eq!(buckets[1], (0.5, 2));
        let (bound, total) = buckets[buckets.len() - 1];
        assert!(bound.is_infinite());
        assert_eq!(total, 3);
    }

    #[test]
    fn empty_histogram_is_zeroed() {
        let histogram = LatencyHistogram::new(8);
        assert_eq!(histogram.mean_ms(), 0.0);
        assert_eq!(histogram.percentile(0.95), 0.0);
    }
}
