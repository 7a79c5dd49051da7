//! Named eviction heuristics

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RematError;

/// Scoring rule used to pick eviction victims
///
/// Every heuristic scores a buffer by how cheap it is to lose: the candidate
/// with the lowest score is evicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heuristic {
    Random,
    Size,
    Lru,
    LocalComputeTime,
    LocalComputeTimeAndLastAccess,
    Local,
    ComputeTime,
    ComputeTimeAndSize,
    Full,
    #[default]
    Eq,
    EqComputeTimeAndLastAccess,
    Depth,
    BpAware,
}

impl Heuristic {
    pub const ALL: [Heuristic; 13] = [
        Heuristic::Random,
        Heuristic::Size,
        Heuristic::Lru,
        Heuristic::LocalComputeTime,
        Heuristic::LocalComputeTimeAndLastAccess,
        Heuristic::Local,
        Heuristic::ComputeTime,
        Heuristic::ComputeTimeAndSize,
        Heuristic::Full,
        Heuristic::Eq,
        Heuristic::EqComputeTimeAndLastAccess,
        Heuristic::Depth,
        Heuristic::BpAware,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Heuristic::Random => "random",
            Heuristic::Size => "size",
            Heuristic::Lru => "lru",
            Heuristic::LocalComputeTime => "local_compute_time",
            Heuristic::LocalComputeTimeAndLastAccess => "local_compute_time_and_last_access",
            Heuristic::Local => "local",
            Heuristic::ComputeTime => "compute_time",
            Heuristic::ComputeTimeAndSize => "compute_time_and_size",
            Heuristic::Full => "full",
            Heuristic::Eq => "eq",
            Heuristic::EqComputeTimeAndLastAccess => "eq_compute_time_and_last_access",
            Heuristic::Depth => "depth",
            Heuristic::BpAware => "bp_aware",
        }
    }
}

impl fmt::Display for Heuristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Heuristic {
    type Err = RematError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Heuristic::ALL
            .iter()
            .copied()
            .find(|h| h.as_str() == name)
            .ok_or_else(|| RematError::InvalidConfiguration(format!("unknown heuristic '{}'", s)))
    }
}
