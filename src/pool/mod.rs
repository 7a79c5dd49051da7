//! Tensor pool and its configuration

pub mod config;
pub mod shared;
pub mod stats;
pub mod tensor_pool;

pub use config::{parse_bytes, PoolConfig};
pub use shared::SharedTensorPool;
pub use stats::PoolStats;
pub use tensor_pool::TensorPool;
