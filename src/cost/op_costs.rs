//! Per-operator compute-time multipliers

use std::collections::HashMap;

use crate::error::{RematError, RematResult};

/// Operator kinds boosted by the `add_n` toggle
pub const ADD_N_OPS: &[&str] = &["add_n"];

/// Operator kinds boosted by the convolution toggle
pub const CONV_OPS: &[&str] = &["conv2d", "conv_filter_grad", "conv_data_grad"];

/// Multiplier applied to the default boosted kinds
pub const DEFAULT_BOOST: f64 = 5.0;

/// Multipliers applied to recorded compute times, keyed by operator kind
///
/// Kinds without an entry use a multiplier of 1.
#[derive(Debug, Clone, PartialEq)]
pub struct OpCostTable {
    multipliers: HashMap<String, f64>,
}

impl OpCostTable {
    /// Table without any boost
    pub fn empty() -> Self {
        OpCostTable {
            multipliers: HashMap::new(),
        }
    }

    /// Default boosts, each family enabled by its toggle
    pub fn with_defaults(high_add_n: bool, high_conv: bool) -> Self {
        let mut table = Self::empty();
        if high_add_n {
            for op in ADD_N_OPS {
                table.set(op, DEFAULT_BOOST);
            }
        }
        if high_conv {
            for op in CONV_OPS {
                table.set(op, DEFAULT_BOOST);
            }
        }
        table
    }

    pub fn set(&mut self, op_type: &str, multiplier: f64) {
        self.multipliers.insert(op_type.to_string(), multiplier);
    }

    /// Builder-style [`OpCostTable::set`]
    pub fn with(mut self, op_type: &str, multiplier: f64) -> Self {
        self.set(op_type, multiplier);
        self
    }

    pub fn remove(&mut self, op_type: &str) -> Option<f64> {
        self.multipliers.remove(op_type)
    }

    pub fn multiplier(&self, op_type: &str) -> f64 {
        self.multipliers.get(op_type).copied().unwrap_or(1.0)
    }

    pub fn len(&self) -> usize {
        self.multipliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.multipliers.is_empty()
    }

    /// Every multiplier must be finite and strictly positive
    pub fn validate(&self) -> RematResult<()> {
        for (op, multiplier) in &self.multipliers {
            if !multiplier.is_finite() || *multiplier <= 0.0 {
                return Err(RematError::InvalidConfiguration(format!(
                    "compute-time multiplier for '{}' must be finite and > 0, got {}",
                    op, multiplier
                )));
            }
        }
        Ok(())
    }
}

impl Default for OpCostTable {
    fn default() -> Self {
        Self::with_defaults(true, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_boosts() {
        let table = OpCostTable::default();
        assert_eq!(table.multiplier("add_n"), 5.0);
        assert_eq!(table.multiplier("conv2d"), 5.0);
        assert_eq!(table.multiplier("conv_filter_grad"), 5.0);
        assert_eq!(table.multiplier("conv_data_grad"), 5.0);
        assert_eq!(table.multiplier("relu"), 1.0);
    }

    #[test]
    fn test_toggles() {
        let table = OpCostTable::with_defaults(false, true);
        assert_eq!(table.multiplier("add_n"), 1.0);
        assert_eq!(table.multiplier("conv2d"), 5.0);

        let table = OpCostTable::with_defaults(false, false);
        assert!(table.is_empty());
    }

    #[test]
    fn test_custom_entries() {
        let mut table = OpCostTable::empty().with("matmul", 2.5);
        assert_eq!(table.multiplier("matmul"), 2.5);
        assert_eq!(table.remove("matmul"), Some(2.5));
        assert_eq!(table.multiplier("matmul"), 1.0);
    }

    #[test]
    fn test_validate_rejects_bad_multipliers() {
        assert!(OpCostTable::default().validate().is_ok());
        assert!(OpCostTable::empty().with("x", 0.0).validate().is_err());
        assert!(OpCostTable::empty().with("x", -1.0).validate().is_err());
        assert!(OpCostTable::empty().with("x", f64::NAN).validate().is_err());
        assert!(OpCostTable::empty().with("x", f64::INFINITY).validate().is_err());
    }
}
