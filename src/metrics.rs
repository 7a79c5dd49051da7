//! Prometheus-compatible metrics for tensor pools
//!
//! A pool optionally holds an `Arc<PoolMetrics>` and updates it as it
//! allocates, evicts and recomputes. Several pools may share one instance.
//! Metrics are exported in Prometheus text format.

use prometheus_client::{
    encoding::text::encode,
    metrics::counter::Counter,
    metrics::gauge::Gauge,
    metrics::histogram::{exponential_buckets, Histogram},
    registry::Registry,
};

/// Metrics collected by [`crate::pool::TensorPool`]
///
/// All metric updates use lock-free atomic operations.
#[derive(Debug)]
pub struct PoolMetrics {
    /// Registry containing all metrics
    pub registry: Registry,

    /// Buffers evicted to make room
    pub evictions: Counter<u64>,

    /// Buffers rematerialized by kernel replay
    pub recomputations: Counter<u64>,

    /// Allocation requests that fit the budget (directly or after evicting)
    pub allocations: Counter<u64>,

    /// Allocation requests that ended in ResourceExhausted
    pub allocation_failures: Counter<u64>,

    /// Bytes currently resident under the budget
    pub resident_bytes: Gauge<i64>,

    /// Configured budget
    pub budget_bytes: Gauge<i64>,

    /// Victims evicted to satisfy one allocation
    pub evictions_per_allocation: Histogram,

    /// Wall time of one replayed kernel
    pub recompute_duration_seconds: Histogram,
}

impl PoolMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let evictions = Counter::default();
        registry.register(
            "rematforge_evictions",
            "Total number of buffers evicted",
            evictions.clone(),
        );

        let recomputations = Counter::default();
        registry.register(
            "rematforge_recomputations",
            "Total number of buffers rematerialized",
            recomputations.clone(),
        );

        let allocations = Counter::default();
        registry.register(
            "rematforge_allocations",
            "Total number of successful pool allocations",
            allocations.clone(),
        );

        let allocation_failures = Counter::default();
        registry.register(
            "rematforge_allocation_failures",
            "Total number of allocations that could not fit the budget",
            allocation_failures.clone(),
        );

        let resident_bytes = Gauge::default();
        registry.register(
            "rematforge_resident_bytes",
            "Bytes currently resident in the pool",
            resident_bytes.clone(),
        );

        let budget_bytes = Gauge::default();
        registry.register(
            "rematforge_budget_bytes",
            "Configured pool budget in bytes",
            budget_bytes.clone(),
        );

        // Buckets: 1, 2, 4, ... 128 victims
        let evictions_per_allocation = Histogram::new(exponential_buckets(1.0, 2.0, 8));
        registry.register(
            "rematforge_evictions_per_allocation",
            "Number of victims evicted for one allocation",
            evictions_per_allocation.clone(),
        );

        // Buckets: 1us .. 1s
        let recompute_duration_seconds = Histogram::new(exponential_buckets(1e-6, 10.0, 7));
        registry.register(
            "rematforge_recompute_duration_seconds",
            "Kernel replay duration in seconds",
            recompute_duration_seconds.clone(),
        );

        PoolMetrics {
            registry,
            evictions,
            recomputations,
            allocations,
            allocation_failures,
            resident_bytes,
            budget_bytes,
            evictions_per_allocation,
            recompute_duration_seconds,
        }
    }

    pub fn record_eviction(&self, resident_bytes: usize) {
        self.evictions.inc();
        self.resident_bytes.set(resident_bytes as i64);
    }

    pub fn record_allocation(&self, victims: u64, resident_bytes: usize) {
        self.allocations.inc();
        if victims > 0 {
            self.evictions_per_allocation.observe(victims as f64);
        }
        self.resident_bytes.set(resident_bytes as i64);
    }

    pub fn record_allocation_failure(&self) {
        self.allocation_failures.inc();
    }

    pub fn record_recompute(&self, duration_sec: f64) {
        self.recomputations.inc();
        self.recompute_duration_seconds.observe(duration_sec);
    }

    pub fn set_resident_bytes(&self, bytes: usize) {
        self.resident_bytes.set(bytes as i64);
    }

    pub fn set_budget_bytes(&self, bytes: usize) {
        self.budget_bytes.set(bytes as i64);
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::warn!("failed to encode pool metrics: {}", e);
        }
        buffer
    }
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}
