//! Point-in-time pool statistics

use serde::Serialize;

use crate::cost::Heuristic;
use crate::error::{internal_err, RematResult};

/// Snapshot of a pool's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub heuristic: Heuristic,
    pub budget_bytes: usize,
    pub resident_bytes: usize,
    pub peak_resident_bytes: usize,
    pub eviction_count: u64,
    pub recompute_count: u64,
    pub member_count: usize,
    pub clock: u64,
}

impl PoolStats {
    /// Share of the budget currently resident, in `[0, 1]` when within budget
    pub fn utilization(&self) -> f64 {
        if self.budget_bytes == 0 {
            return 0.0;
        }
        self.resident_bytes as f64 / self.budget_bytes as f64
    }

    pub fn to_json(&self) -> RematResult<String> {
        serde_json::to_string(self)
            .map_err(|e| internal_err(&format!("failed to serialize pool stats: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PoolStats {
        PoolStats {
            heuristic: Heuristic::Size,
            budget_bytes: 1000,
            resident_bytes: 600,
            peak_resident_bytes: 1000,
            eviction_count: 2,
            recompute_count: 1,
            member_count: 2,
            clock: 5,
        }
    }

    #[test]
    fn test_utilization() {
        assert_eq!(sample().utilization(), 0.6);
    }

    #[test]
    fn test_to_json() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["heuristic"], "size");
        assert_eq!(value["resident_bytes"], 600);
        assert_eq!(value["eviction_count"], 2);
    }
}
