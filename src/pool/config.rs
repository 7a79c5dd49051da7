//! Configuration for tensor pools
//!
//! [`PoolConfig`] is read once when a pool is built. It can be assembled with
//! the `with_*` builder methods or loaded from `REMAT_*` environment
//! variables with [`PoolConfig::from_env`].

use crate::cost::{Heuristic, OpCostTable};
use crate::error::{RematError, RematResult};

/// Environment variable holding the budget (`1048576`, `512KB`, `4GB`, ...)
pub const BUDGET_ENV: &str = "REMAT_BUDGET";
/// Environment variable naming the eviction heuristic
pub const HEURISTIC_ENV: &str = "REMAT_HEURISTIC";
/// Environment variable enabling per-operation debug events
pub const DEBUG_ENV: &str = "REMAT_DEBUG";
/// Toggle for the `add_n` compute-time boost
pub const HIGH_ADD_N_ENV: &str = "REMAT_HIGH_ADD_N";
/// Toggle for the convolution compute-time boost
pub const HIGH_CONV_ENV: &str = "REMAT_HIGH_CONV";
/// Seed for the `random` heuristic
pub const SEED_ENV: &str = "REMAT_SEED";

/// Operator kinds excluded from eviction unless configured otherwise
pub const DEFAULT_EXCLUDED_OPS: &[&str] = &["nll"];

/// Configuration for a [`crate::pool::TensorPool`]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on resident bytes
    pub budget_bytes: usize,

    /// Victim selection rule
    pub heuristic: Heuristic,

    /// Emit per-operation debug events
    pub debug: bool,

    /// Count only backprop-required neighbours in recursive costs
    pub backprop_filter: bool,

    /// Compute-time multipliers by operator kind
    pub op_costs: OpCostTable,

    /// Operator kinds whose outputs are never evicted
    pub excluded_ops: Vec<String>,

    /// Seed for the `random` heuristic; entropy when unset
    pub rng_seed: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            budget_bytes: 1 << 30,
            heuristic: Heuristic::default(),
            debug: false,
            backprop_filter: false,
            op_costs: OpCostTable::default(),
            excluded_ops: DEFAULT_EXCLUDED_OPS.iter().map(|s| s.to_string()).collect(),
            rng_seed: None,
        }
    }
}

impl PoolConfig {
    /// Default configuration with the given budget
    pub fn new(budget_bytes: usize) -> Self {
        PoolConfig {
            budget_bytes,
            ..Self::default()
        }
    }

    pub fn with_budget(mut self, budget_bytes: usize) -> Self {
        self.budget_bytes = budget_bytes;
        self
    }

    pub fn with_heuristic(mut self, heuristic: Heuristic) -> Self {
        self.heuristic = heuristic;
        self
    }

    /// Set the heuristic by name
    ///
    /// # Errors
    /// `InvalidConfiguration` for an unknown name.
    pub fn with_heuristic_name(mut self, name: &str) -> RematResult<Self> {
        self.heuristic = name.parse()?;
        Ok(self)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_backprop_filter(mut self, backprop_filter: bool) -> Self {
        self.backprop_filter = backprop_filter;
        self
    }

    pub fn with_op_costs(mut self, op_costs: OpCostTable) -> Self {
        self.op_costs = op_costs;
        self
    }

    pub fn with_excluded_ops(mut self, excluded_ops: Vec<String>) -> Self {
        self.excluded_ops = excluded_ops;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Check the configuration before a pool is built from it
    pub fn validate(&self) -> RematResult<()> {
        if self.budget_bytes == 0 {
            return Err(RematError::InvalidConfiguration(
                "budget_bytes must be > 0".to_string(),
            ));
        }
        self.op_costs.validate()
    }

    /// Load configuration from `REMAT_*` environment variables
    ///
    /// `REMAT_BUDGET` is required; everything else falls back to defaults.
    ///
    /// # Errors
    /// `InvalidConfiguration` when a variable is missing or malformed.
    pub fn from_env() -> RematResult<Self> {
        let budget = std::env::var(BUDGET_ENV).map_err(|_| {
            RematError::InvalidConfiguration(format!("{} is not set", BUDGET_ENV))
        })?;
        let budget_bytes = parse_bytes(&budget)?;

        let heuristic = match std::env::var(HEURISTIC_ENV) {
            Ok(name) => name.parse()?,
            Err(_) => Heuristic::default(),
        };

        let debug = env_flag(DEBUG_ENV, false)?;
        let high_add_n = env_flag(HIGH_ADD_N_ENV, true)?;
        let high_conv = env_flag(HIGH_CONV_ENV, true)?;

        let rng_seed = match std::env::var(SEED_ENV) {
            Ok(seed) => Some(seed.trim().parse::<u64>().map_err(|_| {
                RematError::InvalidConfiguration(format!("{} must be an integer, got '{}'", SEED_ENV, seed))
            })?),
            Err(_) => None,
        };

        let config = PoolConfig {
            budget_bytes,
            heuristic,
            debug,
            op_costs: OpCostTable::with_defaults(high_add_n, high_conv),
            rng_seed,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parse a byte count with an optional `KB`/`MB`/`GB` suffix (powers of 1024)
pub fn parse_bytes(value: &str) -> RematResult<usize> {
    let trimmed = value.trim();
    let upper = trimmed.to_ascii_uppercase();
    let (digits, scale) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1usize << 30)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1 << 20)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1 << 10)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1)
    } else {
        (upper.as_str(), 1)
    };

    digits
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .ok_or_else(|| RematError::InvalidConfiguration(format!("invalid byte size '{}'", value)))
}

fn env_flag(name: &str, default: bool) -> RematResult<bool> {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(RematError::InvalidConfiguration(format!(
                "{} must be a boolean, got '{}'",
                name, value
            ))),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_ENV: &[&str] = &[
        BUDGET_ENV,
        HEURISTIC_ENV,
        DEBUG_ENV,
        HIGH_ADD_N_ENV,
        HIGH_CONV_ENV,
        SEED_ENV,
    ];

    fn clear_env() {
        for name in ALL_ENV {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.heuristic, Heuristic::Eq);
        assert!(!config.debug);
        assert_eq!(config.excluded_ops, vec!["nll".to_string()]);
        assert_eq!(config.op_costs.multiplier("conv2d"), 5.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new(4096)
            .with_heuristic(Heuristic::Size)
            .with_debug(true)
            .with_backprop_filter(true)
            .with_excluded_ops(Vec::new())
            .with_rng_seed(9);

        assert_eq!(config.budget_bytes, 4096);
        assert_eq!(config.heuristic, Heuristic::Size);
        assert!(config.debug);
        assert!(config.backprop_filter);
        assert!(config.excluded_ops.is_empty());
        assert_eq!(config.rng_seed, Some(9));
    }

    #[test]
    fn test_heuristic_by_name() {
        let config = PoolConfig::new(1).with_heuristic_name("bp_aware").unwrap();
        assert_eq!(config.heuristic, Heuristic::BpAware);
        assert!(PoolConfig::new(1).with_heuristic_name("nope").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let err = PoolConfig::new(0).validate().unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("1000").unwrap(), 1000);
        assert_eq!(parse_bytes("512B").unwrap(), 512);
        assert_eq!(parse_bytes("4KB").unwrap(), 4096);
        assert_eq!(parse_bytes(" 2mb ").unwrap(), 2 << 20);
        assert_eq!(parse_bytes("1GB").unwrap(), 1 << 30);
        assert!(parse_bytes("lots").is_err());
        assert!(parse_bytes("-1").is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        std::env::set_var(BUDGET_ENV, "64MB");
        std::env::set_var(HEURISTIC_ENV, "lru");
        std::env::set_var(DEBUG_ENV, "1");
        std::env::set_var(HIGH_CONV_ENV, "false");
        std::env::set_var(SEED_ENV, "42");

        let config = PoolConfig::from_env().unwrap();
        assert_eq!(config.budget_bytes, 64 << 20);
        assert_eq!(config.heuristic, Heuristic::Lru);
        assert!(config.debug);
        assert_eq!(config.op_costs.multiplier("add_n"), 5.0);
        assert_eq!(config.op_costs.multiplier("conv2d"), 1.0);
        assert_eq!(config.rng_seed, Some(42));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_defaults_and_errors() {
        clear_env();
        assert!(PoolConfig::from_env().is_err());

        std::env::set_var(BUDGET_ENV, "1024");
        let config = PoolConfig::from_env().unwrap();
        assert_eq!(config.heuristic, Heuristic::Eq);
        assert!(!config.debug);
        assert_eq!(config.rng_seed, None);

        std::env::set_var(HEURISTIC_ENV, "smallest");
        assert!(PoolConfig::from_env().is_err());
        std::env::remove_var(HEURISTIC_ENV);

        std::env::set_var(DEBUG_ENV, "maybe");
        assert!(PoolConfig::from_env().is_err());

        clear_env();
    }
}
