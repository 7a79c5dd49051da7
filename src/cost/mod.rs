//! Eviction cost model
//!
//! [`Heuristic`] names the scoring rule, [`CostEvaluator`] applies it to
//! buffers of a pool, and [`OpCostTable`] scales recorded compute times by
//! operator kind.

pub mod evaluator;
pub mod heuristic;
pub mod op_costs;

pub use evaluator::{CostContext, CostEvaluator, Score};
pub use heuristic::Heuristic;
pub use op_costs::OpCostTable;
